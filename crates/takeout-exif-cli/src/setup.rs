//! Program setup: logging and pre-flight checks.

use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::Context;
use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

/// Sets up env_logger with the format "LEVEL\tmessage".
///
/// Log levels:
/// Error: Worker failures (tool could not start or shut down).
/// Warn: Abandoned items.
/// Info: Run flow and sidecars without a matching file.
/// Debug: Per-file actions.
/// Trace: Exiftool output.
pub fn configure_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            let style = buf.default_level_style(record.level());
            writeln!(buf, "{style}{}{style:#}\t{}", record.level(), record.args())
        })
        .init();
}

pub fn check_source_dir(source: &Path) -> anyhow::Result<()> {
    if !source.is_dir() {
        anyhow::bail!("source directory {} does not exist", source.display());
    }
    Ok(())
}

/// Make sure `exiftool -ver` runs, returning the reported version.
pub fn check_exiftool(executable: &Path) -> anyhow::Result<String> {
    let output = Command::new(executable)
        .arg("-ver")
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("{} not found; is exiftool installed and on PATH?", executable.display()))?;
    if !output.status.success() {
        anyhow::bail!("{} -ver exited with {}", executable.display(), output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
