use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The metadata tool could not be launched.
    #[error("failed to start {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Output stream ended before the ready marker arrived.
    #[error("metadata tool closed its output before signalling ready")]
    ProcessClosed,

    #[error("metadata tool exited with {status}")]
    ProcessExit { status: ExitStatus },

    /// An argument the line protocol cannot carry.
    #[error("invalid tool argument {arg:?}: {reason}")]
    InvalidArgument { arg: String, reason: &'static str },

    #[error("metadata tool did not update {path}: {output}")]
    ToolRejected { path: PathBuf, output: String },

    #[error("cannot use {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("no file matching {title:?} in {dir}")]
    NotFound { dir: PathBuf, title: String },
}

impl Error {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Outcomes that a real archive produces routinely and that are not worth a warning.
    pub fn is_expected(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Attach a path-bearing context to an `io::Result`.
pub(crate) trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::io(f(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_expected() {
        let err = Error::NotFound {
            dir: PathBuf::from("/tmp"),
            title: "a.jpg".to_string(),
        };
        assert!(err.is_expected());
        assert!(!Error::ProcessClosed.is_expected());
    }

    #[test]
    fn test_io_context_message() {
        let res: std::io::Result<()> = Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let err = res.io_context(|| "reading x.json").unwrap_err();
        assert_eq!(err.to_string(), "reading x.json: boom");
    }
}
