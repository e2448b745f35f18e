use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::sidecar::ALBUM_METADATA_FILENAME;

/// Camera RAW and container formats exiftool handles but mime databases don't classify
/// as image or video.
const EXTRA_MEDIA_EXTENSIONS: &[&str] = &[
    "cr2", "nef", "arw", "dng", "orf", "rw2", "pef", "sr2", "x3f", "heic", "heif", "mts", "m2ts",
];

/// `*.json` files other than the album descriptor.
pub fn is_sidecar(path: &Path) -> bool {
    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    let is_album = path.file_name().and_then(|n| n.to_str()) == Some(ALBUM_METADATA_FILENAME);
    is_json && !is_album
}

/// Image, video or RAW file worth asking exiftool about.
pub fn is_media_file(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = ext.to_lowercase();
    if ext == "json" {
        return false;
    }
    if EXTRA_MEDIA_EXTENSIONS.contains(&ext.as_str()) {
        return true;
    }
    mime_guess::from_ext(&ext).iter().any(|mime| {
        mime.type_() == mime_guess::mime::IMAGE || mime.type_() == mime_guess::mime::VIDEO
    })
}

/// Walk `root` depth-first, handing every file accepted by `filter` to `sink`.
///
/// Stops early when `sink` returns `false`. Unreadable entries are logged and skipped.
/// Returns the number of files handed over.
pub fn walk_files<F, S>(root: &Path, filter: F, mut sink: S) -> u64
where
    F: Fn(&Path) -> bool,
    S: FnMut(PathBuf) -> bool,
{
    let mut count = 0;
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("Skipping path due to error: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !filter(entry.path()) {
            continue;
        }
        count += 1;
        if !sink(entry.into_path()) {
            break;
        }
    }
    count
}
