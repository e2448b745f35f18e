pub mod date;
pub mod discover;
pub mod error;
pub mod exiftool;
pub mod fsops;
pub mod organize;
pub mod pool;
pub mod progress;
pub mod resolve;
pub mod scan;
pub mod sidecar;

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub use date::TimeZoneMode;
pub use error::{Error, Result};
pub use exiftool::{ExifToolSession, MetadataTool, ToolFactory};
pub use organize::{ItemOutcome, ItemReport};

pub const DEFAULT_BUCKET: &str = "ALL_PHOTOS";

fn default_bucket() -> Option<String> {
    Some(DEFAULT_BUCKET.to_string())
}

fn default_exiftool() -> PathBuf {
    PathBuf::from("exiftool")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Report media files without any timestamp tag. Read-only.
    Scan,
    /// Rewrite capture times in place.
    Update,
    /// Rewrite, then file into the date layout under `dest`.
    Sort,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Scan => "scan",
            Mode::Update => "update",
            Mode::Sort => "sort",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOptions {
    pub mode: Mode,
    pub source: PathBuf,
    #[serde(default)]
    pub dest: Option<PathBuf>,
    #[serde(default)]
    pub simulate: bool,
    #[serde(default)]
    pub keep_sidecars: bool,
    #[serde(default)]
    pub keep_source: bool,
    #[serde(default = "default_bucket")]
    pub bucket: Option<String>,
    #[serde(default)]
    pub dedupe: bool,
    #[serde(default)]
    pub time_zone: TimeZoneMode,
    #[serde(default)]
    pub set_file_mtime: bool,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_exiftool")]
    pub exiftool: PathBuf,
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

impl ProcessOptions {
    pub fn new(mode: Mode, source: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            source: source.into(),
            dest: None,
            simulate: false,
            keep_sidecars: false,
            keep_source: false,
            bucket: default_bucket(),
            dedupe: false,
            time_zone: TimeZoneMode::default(),
            set_file_mtime: false,
            workers: None,
            exiftool: default_exiftool(),
            report_dir: default_report_dir(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mode == Mode::Sort && self.dest.is_none() {
            anyhow::bail!("sort mode requires a destination directory");
        }
        if let Some(bucket) = &self.bucket {
            if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
                anyhow::bail!("invalid bucket name {:?}", bucket);
            }
        }
        if self.workers == Some(0) {
            anyhow::bail!("worker count must be at least 1");
        }
        Ok(())
    }

    /// Configured pool size, or the machine's available parallelism.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Whether this run needs live metadata tool sessions.
    pub fn needs_tool(&self) -> bool {
        self.mode == Mode::Scan || !self.simulate
    }
}

/// Counts gathered from the per-item results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub discovered: u64,
    pub processed: u64,
    pub already_present: u64,
    pub duplicates_removed: u64,
    pub not_found: u64,
    pub skipped: u64,
    pub failed: u64,
    pub album_links: u64,
    pub scanned: u64,
    pub missing_timestamps: u64,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
    pub workers_started: usize,
    pub workers_failed: usize,
}

impl RunSummary {
    pub fn record(&mut self, result: Result<ItemReport>) {
        match result {
            Ok(report) => {
                match report.outcome {
                    ItemOutcome::Updated | ItemOutcome::Relocated => self.processed += 1,
                    ItemOutcome::AlreadyPresent => self.already_present += 1,
                    ItemOutcome::DuplicateRemoved => self.duplicates_removed += 1,
                }
                if report.album_linked {
                    self.album_links += 1;
                }
            }
            Err(Error::NotFound { .. }) => self.not_found += 1,
            Err(Error::Parse { .. }) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Type alias for progress callback: `(stage, current, total, message)`.
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Throttled progress reporter: emits at most every 200ms, and always for the last item.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    last_emit: Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback) -> Self {
        let start = Instant::now();
        Self {
            inner,
            last_emit: Mutex::new(start.checked_sub(PROGRESS_INTERVAL).unwrap_or(start)),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
            if last.elapsed() < PROGRESS_INTERVAL {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Run the configured mode with real exiftool sessions.
pub fn process(options: &ProcessOptions, progress_callback: &ProgressCallback) -> anyhow::Result<RunSummary> {
    let factory = exiftool::session_factory(&options.exiftool);
    process_with_tools(options, &*factory, progress_callback)
}

/// Run the configured mode, opening one tool per worker through `tools`.
pub fn process_with_tools(
    options: &ProcessOptions,
    tools: &ToolFactory,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<RunSummary> {
    options.validate()?;
    check_source(&options.source)?;
    let tp = ThrottledProgress::new(progress_callback);

    log::info!(
        "Starting {} of {}{}",
        options.mode.as_str(),
        options.source.display(),
        if options.simulate { " [DRY RUN]" } else { "" }
    );

    let summary = match options.mode {
        Mode::Scan => scan::run(options, tools, &tp)?,
        Mode::Update => organize::run(options, tools, &tp)?,
        Mode::Sort => {
            if let Some(dest) = &options.dest {
                fsops::ensure_directory(dest, options.simulate)
                    .with_context(|| format!("preparing destination {}", dest.display()))?;
            }
            organize::run(options, tools, &tp)?
        }
    };

    log::info!(
        "Finished {}: {} processed, {} already present, {} not found, {} skipped, {} failed",
        options.mode.as_str(),
        summary.processed,
        summary.already_present,
        summary.not_found,
        summary.skipped,
        summary.failed
    );
    Ok(summary)
}

fn check_source(source: &Path) -> anyhow::Result<()> {
    let meta = std::fs::metadata(source)
        .with_context(|| format!("source directory {} is not accessible", source.display()))?;
    if !meta.is_dir() {
        anyhow::bail!("source {} is not a directory", source.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    type Calls = Arc<Mutex<Vec<Vec<String>>>>;

    struct RecordingTool {
        calls: Calls,
    }

    impl MetadataTool for RecordingTool {
        fn execute(&mut self, args: &[String]) -> Result<String> {
            self.calls.lock().unwrap().push(args.to_vec());
            if args.iter().any(|a| a == "-S") {
                return Ok(if args.last().is_some_and(|p| p.ends_with("has-date.jpg")) {
                    "2021:05:06 10:00:00\n".to_string()
                } else {
                    String::new()
                });
            }
            Ok("    1 image files updated\n".to_string())
        }

        fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    fn recording_factory(calls: &Calls) -> Box<ToolFactory> {
        let calls = Arc::clone(calls);
        Box::new(move || -> Result<Box<dyn MetadataTool>> {
            Ok(Box::new(RecordingTool {
                calls: Arc::clone(&calls),
            }))
        })
    }

    fn no_progress() -> Box<ProgressCallback> {
        Box::new(|_, _, _, _| {})
    }

    fn write_item(dir: &Path, title: &str, body: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(title), body).unwrap();
        fs::write(
            dir.join(format!("{}.json", title)),
            format!(r#"{{"title":"{}","photoTakenTime":{{"timestamp":"1672531200"}}}}"#, title),
        )
        .unwrap();
    }

    fn tree(root: &Path) -> Vec<(PathBuf, Option<PathBuf>)> {
        let mut out: Vec<_> = walkdir::WalkDir::new(root)
            .into_iter()
            .map(|e| {
                let e = e.unwrap();
                let link = fs::read_link(e.path()).ok();
                (e.path().to_path_buf(), link)
            })
            .collect();
        out.sort();
        out
    }

    #[test]
    fn test_update_scenario() {
        let dir = tempdir().unwrap();
        write_item(dir.path(), "a.jpg", "img");
        let calls = Calls::default();
        let mut options = ProcessOptions::new(Mode::Update, dir.path());
        options.workers = Some(2);

        let summary = process_with_tools(&options, &*recording_factory(&calls), &*no_progress()).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.discovered, 1);
        assert!(!dir.path().join("a.jpg.json").exists());

        let calls = calls.lock().unwrap();
        let path = dir.path().join("a.jpg").to_str().unwrap().to_string();
        assert_eq!(
            calls[0],
            vec![
                "-overwrite_original".to_string(),
                "-CreateDate=2023:01:01 00:00:00".to_string(),
                "-DateTimeOriginal=2023:01:01 00:00:00".to_string(),
                path,
            ]
        );
    }

    #[test]
    fn test_sort_scenario_without_album() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("D");
        write_item(&src, "a.jpg", "img");
        let calls = Calls::default();
        let mut options = ProcessOptions::new(Mode::Sort, &src);
        options.dest = Some(dest.clone());
        options.workers = Some(1);

        let summary = process_with_tools(&options, &*recording_factory(&calls), &*no_progress()).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.album_links, 0);
        assert!(dest.join("ALL_PHOTOS/2023/01/01/a.jpg").is_file());
        assert!(!src.join("a.jpg").exists());
        assert!(!src.join("a.jpg.json").exists());
        let entries: Vec<_> = fs::read_dir(&dest).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("ALL_PHOTOS")]);
    }

    #[test]
    fn test_sort_resolves_quote_variant() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("D");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("quote_d.jpg"), "img").unwrap();
        fs::write(
            src.join("quote'd.jpg.json"),
            r#"{"title":"quote'd.jpg","photoTakenTime":{"timestamp":"1672531200"}}"#,
        )
        .unwrap();
        let calls = Calls::default();
        let mut options = ProcessOptions::new(Mode::Sort, &src);
        options.dest = Some(dest.clone());
        options.bucket = None;

        let summary = process_with_tools(&options, &*recording_factory(&calls), &*no_progress()).unwrap();
        assert_eq!(summary.processed, 1);
        assert!(dest.join("2023/01/01/quote_d.jpg").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_destination_gets_album_link_only() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src/Trip");
        let dest = dir.path().join("D");
        write_item(&src, "a.jpg", "new");
        fs::write(src.join("metadata.json"), r#"{"title":"Trip"}"#).unwrap();
        let canonical = dest.join("ALL_PHOTOS/2023/01/01/a.jpg");
        fs::create_dir_all(canonical.parent().unwrap()).unwrap();
        fs::write(&canonical, "old").unwrap();

        let calls = Calls::default();
        let mut options = ProcessOptions::new(Mode::Sort, dir.path().join("src"));
        options.dest = Some(dest.clone());

        let summary = process_with_tools(&options, &*recording_factory(&calls), &*no_progress()).unwrap();
        assert_eq!(summary.already_present, 1);
        assert_eq!(summary.album_links, 1);
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(fs::read_to_string(&canonical).unwrap(), "old");
        assert!(src.join("a.jpg").exists());
        assert!(src.join("a.jpg.json").exists());

        let link = dest.join("Trip/a.jpg");
        assert_eq!(
            fs::read_link(&link).unwrap(),
            PathBuf::from("../ALL_PHOTOS/2023/01/01/a.jpg")
        );
        assert_eq!(fs::read_to_string(&link).unwrap(), "old");

        // Second run verifies the link instead of recreating it.
        let summary = process_with_tools(&options, &*recording_factory(&calls), &*no_progress()).unwrap();
        assert_eq!(summary.album_links, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_sort_relocates_then_links_album() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src/Trip");
        let dest = dir.path().join("D");
        write_item(&src, "a.jpg", "moved-bytes");
        fs::write(src.join("metadata.json"), r#"{"title":"Trip"}"#).unwrap();

        let calls = Calls::default();
        let mut options = ProcessOptions::new(Mode::Sort, dir.path().join("src"));
        options.dest = Some(dest.clone());

        let summary = process_with_tools(&options, &*recording_factory(&calls), &*no_progress()).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.album_links, 1);
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert!(!src.join("a.jpg").exists());
        assert!(!src.join("a.jpg.json").exists());

        let link = dest.join("Trip/a.jpg");
        assert_eq!(
            fs::read_link(&link).unwrap(),
            PathBuf::from("../ALL_PHOTOS/2023/01/01/a.jpg")
        );
        assert_eq!(fs::read_to_string(&link).unwrap(), "moved-bytes");
    }

    #[test]
    fn test_simulated_sort_changes_nothing() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src/Trip");
        write_item(&src, "a.jpg", "img");
        write_item(&src, "b.jpg", "img2");
        fs::write(src.join("metadata.json"), r#"{"title":"Trip"}"#).unwrap();
        let before = tree(dir.path());

        let calls = Calls::default();
        let mut options = ProcessOptions::new(Mode::Sort, dir.path().join("src"));
        options.dest = Some(dir.path().join("D"));
        options.simulate = true;

        let summary = process_with_tools(&options, &*recording_factory(&calls), &*no_progress()).unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.workers_started, options.worker_count());
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(tree(dir.path()), before);
    }

    #[test]
    fn test_not_found_and_malformed_are_counted() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("gone.jpg.json"),
            r#"{"title":"gone.jpg","photoTakenTime":{"timestamp":"1"}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("bad.jpg.json"), "{not json").unwrap();
        fs::write(dir.path().join("metadata.json"), r#"{"title":"Album"}"#).unwrap();

        let calls = Calls::default();
        let options = ProcessOptions::new(Mode::Update, dir.path());
        let summary = process_with_tools(&options, &*recording_factory(&calls), &*no_progress()).unwrap();
        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.not_found, 1);
        assert_eq!(summary.skipped, 1);
        assert!(dir.path().join("gone.jpg.json").exists());
    }

    #[test]
    fn test_no_worker_started_is_an_error() {
        let dir = tempdir().unwrap();
        write_item(dir.path(), "a.jpg", "img");
        let failing: Box<ToolFactory> = Box::new(|| -> Result<Box<dyn MetadataTool>> { Err(Error::ProcessClosed) });
        let options = ProcessOptions::new(Mode::Update, dir.path());

        assert!(process_with_tools(&options, &*failing, &*no_progress()).is_err());
        assert!(dir.path().join("a.jpg.json").exists());
    }

    #[test]
    fn test_scan_writes_report() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let reports = dir.path().join("reports");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&reports).unwrap();
        fs::write(src.join("has-date.jpg"), "x").unwrap();
        fs::write(src.join("no-date.mp4"), "x").unwrap();
        fs::write(src.join("no-date.jpg.json"), "{}").unwrap();
        fs::write(src.join("notes.txt"), "x").unwrap();

        let calls = Calls::default();
        let mut options = ProcessOptions::new(Mode::Scan, &src);
        options.report_dir = reports.clone();
        let summary = process_with_tools(&options, &*recording_factory(&calls), &*no_progress()).unwrap();

        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.missing_timestamps, 1);
        let report = summary.report_path.unwrap();
        assert!(report.starts_with(&reports));
        let text = fs::read_to_string(report).unwrap();
        let expected = fs::canonicalize(&src).unwrap().join("no-date.mp4");
        assert_eq!(text.lines().last().unwrap(), expected.to_str().unwrap());
    }

    #[test]
    fn test_scan_without_workers_leaves_no_report() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let reports = dir.path().join("reports");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&reports).unwrap();
        fs::write(src.join("a.jpg"), "x").unwrap();
        let failing: Box<ToolFactory> = Box::new(|| -> Result<Box<dyn MetadataTool>> { Err(Error::ProcessClosed) });
        let mut options = ProcessOptions::new(Mode::Scan, &src);
        options.report_dir = reports.clone();

        assert!(process_with_tools(&options, &*failing, &*no_progress()).is_err());
        assert_eq!(fs::read_dir(&reports).unwrap().count(), 0);
    }

    #[test]
    fn test_validate() {
        let mut o = ProcessOptions::new(Mode::Sort, "src");
        assert!(o.validate().is_err());
        o.dest = Some(PathBuf::from("out"));
        assert!(o.validate().is_ok());
        o.bucket = Some("a/b".to_string());
        assert!(o.validate().is_err());
        o.bucket = None;
        o.workers = Some(0);
        assert!(o.validate().is_err());
    }

    #[test]
    fn test_options_from_json_defaults() {
        let o: ProcessOptions = serde_json::from_str(r#"{"mode":"sort","source":"in","dest":"out"}"#).unwrap();
        assert_eq!(o.mode, Mode::Sort);
        assert_eq!(o.bucket.as_deref(), Some(DEFAULT_BUCKET));
        assert_eq!(o.exiftool, PathBuf::from("exiftool"));
        assert_eq!(o.time_zone, TimeZoneMode::Utc);
        assert!(!o.simulate && !o.dedupe);
    }

    #[test]
    fn test_throttled_progress_always_reports_last() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb: Box<ProgressCallback> = Box::new(move |_, current, _, _| sink.lock().unwrap().push(current));
        let tp = ThrottledProgress::new(&*cb);
        for i in 0..50 {
            tp.report("update", i, 50, "");
        }
        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&49));
        assert!(seen.len() < 50);
    }
}
