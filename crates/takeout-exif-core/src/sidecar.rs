use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, IoContext, Result};

/// Fixed name of the per-directory album descriptor.
pub const ALBUM_METADATA_FILENAME: &str = "metadata.json";

/// Takeout writes timestamps as decimal strings, but numbers show up in hand-edited files.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Number(i64),
}

impl RawTimestamp {
    fn as_text(&self) -> Option<String> {
        match self {
            RawTimestamp::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            RawTimestamp::Text(_) => None,
            RawTimestamp::Number(n) => Some(n.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTimeField {
    timestamp: Option<RawTimestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSidecar {
    #[serde(default)]
    title: String,
    photo_taken_time: Option<RawTimeField>,
    /// Legacy top-level field used by some older exports.
    timestamp: Option<RawTimestamp>,
}

/// Title and capture time read from one Takeout sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarMetadata {
    pub title: String,
    pub captured_at: i64,
}

/// Parse sidecar JSON. `path` is used only for error messages.
pub fn parse_sidecar(path: &Path, bytes: &[u8]) -> Result<SidecarMetadata> {
    let raw: RawSidecar =
        serde_json::from_slice(bytes).map_err(|e| Error::parse(path, format!("malformed JSON: {}", e)))?;

    if raw.title.is_empty() {
        return Err(Error::parse(path, "missing title"));
    }

    let ts = raw
        .photo_taken_time
        .as_ref()
        .and_then(|t| t.timestamp.as_ref())
        .and_then(RawTimestamp::as_text)
        .or_else(|| raw.timestamp.as_ref().and_then(RawTimestamp::as_text))
        .ok_or_else(|| Error::parse(path, "missing photoTakenTime timestamp"))?;

    let captured_at = ts
        .parse::<i64>()
        .map_err(|_| Error::parse(path, format!("unparseable timestamp {:?}", ts)))?;

    Ok(SidecarMetadata {
        title: raw.title,
        captured_at,
    })
}

/// Read and parse a sidecar file.
pub fn read_sidecar(path: &Path) -> Result<SidecarMetadata> {
    let bytes = fs::read(path).io_context(|| format!("reading {}", path.display()))?;
    parse_sidecar(path, &bytes)
}

#[derive(Debug, Deserialize)]
struct AlbumMetadata {
    title: Option<String>,
}

pub fn album_metadata_path(dir: &Path) -> PathBuf {
    dir.join(ALBUM_METADATA_FILENAME)
}

/// Album title from `dir/metadata.json`. Missing or malformed files mean "no album".
pub fn read_album_title(dir: &Path) -> Option<String> {
    let bytes = fs::read(album_metadata_path(dir)).ok()?;
    let meta: AlbumMetadata = serde_json::from_slice(&bytes).ok()?;
    meta.title.filter(|t| !t.is_empty())
}
