use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::{IoContext, Result};
use crate::exiftool::{self, MetadataTool};
use crate::pool;
use crate::progress::ProgressTracker;
use crate::{discover, ProcessOptions, RunSummary, ThrottledProgress, ToolFactory};

/// Every tag that may carry a capture or creation time.
pub const TIMESTAMP_TAGS: &[&str] = &[
    "DateTimeOriginal",
    "MediaCreateDate",
    "CreationDate",
    "TrackCreateDate",
    "CreateDate",
    "DateTimeDigitized",
    "GPSDateStamp",
    "DateTime",
];

pub fn scan_args(path: &Path) -> Result<Vec<String>> {
    let mut args: Vec<String> = TIMESTAMP_TAGS.iter().map(|t| format!("-{}", t)).collect();
    args.push("-s".to_string());
    args.push("-S".to_string());
    args.push(exiftool::path_arg(path)?);
    Ok(args)
}

fn is_value_line(line: &str) -> bool {
    line.contains(':') && line.len() >= 10 && line != "-" && !line.to_lowercase().contains("error")
}

fn is_field_line(line: &str) -> bool {
    if line.len() <= 20 {
        return false;
    }
    match line.split_once(':') {
        Some((_, value)) => {
            let value = value.trim();
            !value.is_empty() && value != "-"
        }
        None => false,
    }
}

/// Whether tool output for [`scan_args`] shows at least one populated timestamp.
pub fn has_timestamp(output: &str) -> bool {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .any(|l| is_value_line(l) || is_field_line(l))
}

/// True when `path` has none of [`TIMESTAMP_TAGS`]. A failed query counts as missing.
pub fn is_missing_timestamps(tool: &mut dyn MetadataTool, path: &Path) -> bool {
    let output = scan_args(path).and_then(|args| tool.execute(&args));
    match output {
        Ok(out) => !has_timestamp(&out),
        Err(e) => {
            log::warn!("Could not read metadata from {}: {}", path.display(), e);
            true
        }
    }
}

/// `missing_timestamps_YYYYMMDD_HHMMSS.log` with its comment header already written.
pub struct ScanReport {
    path: PathBuf,
    out: BufWriter<File>,
}

impl ScanReport {
    pub fn create(dir: &Path, source: &Path, now: DateTime<Local>) -> Result<Self> {
        let path = dir.join(format!("missing_timestamps_{}.log", now.format("%Y%m%d_%H%M%S")));
        let file = File::create(&path).io_context(|| format!("creating report {}", path.display()))?;
        let mut report = Self {
            path,
            out: BufWriter::new(file),
        };
        let header = format!(
            "# Files Missing ALL Timestamp Data\n\
             # Scan Date: {}\n\
             # Source Directory: {}\n\
             # Checked Fields: {}\n\
             #\n",
            now.format("%Y-%m-%d %H:%M:%S"),
            source.display(),
            TIMESTAMP_TAGS.join(", ")
        );
        report.write_str(&header)?;
        Ok(report)
    }

    fn write_str(&mut self, s: &str) -> Result<()> {
        let path = &self.path;
        self.out
            .write_all(s.as_bytes())
            .io_context(|| format!("writing report {}", path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the paths, sorted, and flush.
    pub fn finish(mut self, mut missing: Vec<PathBuf>) -> Result<PathBuf> {
        missing.sort();
        for p in &missing {
            self.write_str(&format!("{}\n", p.display()))?;
        }
        let path = &self.path;
        self.out
            .flush()
            .io_context(|| format!("writing report {}", path.display()))?;
        Ok(self.path)
    }
}

/// Check every media file under `options.source` and write the report.
pub fn run(
    options: &ProcessOptions,
    tools: &ToolFactory,
    progress: &ThrottledProgress,
) -> anyhow::Result<RunSummary> {
    use anyhow::Context;

    let source = fs::canonicalize(&options.source)
        .with_context(|| format!("resolving source directory {}", options.source.display()))?;
    let started_at = Local::now();
    log::info!("Checking {} for: {}", source.display(), TIMESTAMP_TAGS.join(", "));

    let tracker = ProgressTracker::new(0);
    let mut missing = Vec::new();
    let pool_report = pool::run_pool(
        options.worker_count(),
        Some(tools),
        |tx| {
            discover::walk_files(&source, discover::is_media_file, |path| {
                tracker.add_total(1);
                tx.send(path).is_ok()
            });
        },
        |worker, path| {
            let is_missing = match worker.tool() {
                Some(tool) => is_missing_timestamps(tool, &path),
                None => true,
            };
            let done = tracker.increment();
            progress.report("scan", done - 1, tracker.total(), "Checking timestamps");
            (path, is_missing)
        },
        |(path, is_missing)| {
            if is_missing {
                missing.push(path);
            }
        },
    );

    if pool_report.workers_started == 0 {
        anyhow::bail!("no worker could start {}", options.exiftool.display());
    }
    log::info!("{}", tracker.render());

    // Created only once a scan actually ran, so failed startups leave no empty report.
    let report = ScanReport::create(&options.report_dir, &source, started_at)?;
    log::info!("Writing report file: {}", report.path().display());
    let mut summary = RunSummary {
        discovered: tracker.total(),
        scanned: tracker.completed(),
        missing_timestamps: missing.len() as u64,
        workers_started: pool_report.workers_started,
        workers_failed: pool_report.workers_failed,
        ..RunSummary::default()
    };
    summary.report_path = Some(report.finish(missing)?);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_has_timestamp_short_output() {
        assert!(has_timestamp("2023:01:01 12:00:00\n"));
        assert!(has_timestamp("\n  2019:06:02 08:15:00+02:00  \n"));
        assert!(!has_timestamp(""));
        assert!(!has_timestamp("-\n"));
        assert!(!has_timestamp("Error: file\n"));
        assert!(!has_timestamp("12:00\n"));
    }

    #[test]
    fn test_has_timestamp_field_output() {
        assert!(has_timestamp("DateTimeOriginal: 2023:01:01 12:00:00\n"));
        // Long enough and colon-bearing, so it passes the value-line rule.
        assert!(has_timestamp("DateTimeOriginal   : -\n"));
        assert!(!has_timestamp("Date: -\n"));
    }

    #[test]
    fn test_scan_args() {
        let args = scan_args(Path::new("/p/a.jpg")).unwrap();
        assert_eq!(args.len(), TIMESTAMP_TAGS.len() + 3);
        assert_eq!(args[0], "-DateTimeOriginal");
        assert_eq!(&args[args.len() - 3..], ["-s", "-S", "/p/a.jpg"]);
    }

    #[test]
    fn test_failed_query_counts_as_missing() {
        struct Broken;
        impl MetadataTool for Broken {
            fn execute(&mut self, _args: &[String]) -> Result<String> {
                Err(crate::Error::ProcessClosed)
            }
            fn close(self: Box<Self>) -> Result<()> {
                Ok(())
            }
        }
        assert!(is_missing_timestamps(&mut Broken, Path::new("a.jpg")));
    }

    #[test]
    fn test_report_file() {
        let dir = tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        let report = ScanReport::create(dir.path(), Path::new("/photos"), now).unwrap();
        let path = report
            .finish(vec![PathBuf::from("/photos/b.jpg"), PathBuf::from("/photos/a.jpg")])
            .unwrap();

        assert_eq!(path, dir.path().join("missing_timestamps_20240305_070809.log"));
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# Files Missing ALL Timestamp Data");
        assert_eq!(lines[1], "# Scan Date: 2024-03-05 07:08:09");
        assert_eq!(lines[2], "# Source Directory: /photos");
        assert!(lines[3].starts_with("# Checked Fields: DateTimeOriginal, MediaCreateDate"));
        assert_eq!(lines[4], "#");
        assert_eq!(&lines[5..], ["/photos/a.jpg", "/photos/b.jpg"]);
    }
}
