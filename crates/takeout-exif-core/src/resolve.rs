use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static NUMBERED_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_(\d+)$").unwrap());

/// Basename lengths Takeout is known to truncate to. The exact limit is off by one
/// depending on the export, so all three are tried, longest first.
const TRUNCATED_LENGTHS: [usize; 3] = [48, 47, 46];

/// Which naming rule located a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    Exact,
    Truncated(usize),
    NumberedSuffix,
    QuotesReplaced,
    ExtensionLowercase,
    ExtensionUppercase,
    UnicodeNormalized,
}

impl std::fmt::Display for Fallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fallback::Exact => write!(f, "exact name"),
            Fallback::Truncated(n) => write!(f, "{}-char truncated name", n),
            Fallback::NumberedSuffix => write!(f, "numbered name"),
            Fallback::QuotesReplaced => write!(f, "replaced quotes"),
            Fallback::ExtensionLowercase => write!(f, "downcased extension"),
            Fallback::ExtensionUppercase => write!(f, "upcased extension"),
            Fallback::UnicodeNormalized => write!(f, "normalized unicode"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    pub rule: Fallback,
}

/// Split `title` into basename and extension (extension keeps its dot, may be empty).
fn split_title(title: &str) -> (&str, &str) {
    match title.rfind('.') {
        // A leading dot is a hidden file, not an extension.
        Some(pos) if pos > 0 && !title[pos..].contains('/') => (&title[..pos], &title[pos..]),
        _ => (title, ""),
    }
}

/// Truncate to at most `len` bytes without splitting a UTF-8 sequence.
fn truncate_at(s: &str, len: usize) -> &str {
    let mut end = len.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Candidate filenames for `title`, in the order they must be tried.
pub fn candidates(title: &str) -> Vec<(Fallback, String)> {
    let (basename, ext) = split_title(title);
    let mut out = vec![(Fallback::Exact, title.to_string())];

    for len in TRUNCATED_LENGTHS {
        if basename.len() > len {
            out.push((
                Fallback::Truncated(len),
                format!("{}{}", truncate_at(basename, len), ext),
            ));
        }
    }

    if let Some(caps) = NUMBERED_SUFFIX_RE.captures(basename) {
        let whole = caps.get(0).map_or("", |m| m.as_str());
        let digits = caps.get(1).map_or("", |m| m.as_str());
        let stem = &basename[..basename.len() - whole.len()];
        out.push((Fallback::NumberedSuffix, format!("{}({}){}", stem, digits, ext)));
    }

    if title.contains(['\'', '"']) {
        out.push((Fallback::QuotesReplaced, title.replace(['\'', '"'], "_")));
    }

    let lower = ext.to_lowercase();
    if lower != ext {
        out.push((Fallback::ExtensionLowercase, format!("{}{}", basename, lower)));
    }
    let upper = ext.to_uppercase();
    if upper != ext {
        out.push((Fallback::ExtensionUppercase, format!("{}{}", basename, upper)));
    }

    for normalized in [title.nfc().collect::<String>(), title.nfd().collect::<String>()] {
        if normalized != title {
            out.push((Fallback::UnicodeNormalized, normalized));
        }
    }

    out
}

/// Find the on-disk file for a sidecar `title` inside `dir`, trying each known
/// export-time mangling in order. The first existing candidate wins.
pub fn find_media_file(dir: &Path, title: &str) -> Option<Resolved> {
    candidates(title).into_iter().find_map(|(rule, name)| {
        let path = dir.join(&name);
        path.exists().then_some(Resolved { path, rule })
    })
}
