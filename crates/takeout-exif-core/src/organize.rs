use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use filetime::FileTime;

use crate::date::{self, DateParts};
use crate::error::{Error, IoContext, Result};
use crate::exiftool::{self, MetadataTool};
use crate::fsops::{self, FsAction};
use crate::pool::{self, Worker};
use crate::progress::ProgressTracker;
use crate::resolve::{self, Fallback, Resolved};
use crate::sidecar::{self, SidecarMetadata};
use crate::{discover, Mode, ProcessOptions, RunSummary, ThrottledProgress, ToolFactory};

/// Where sorted files land: `<dest>[/<bucket>]/YYYY/MM/DD/<name>`, albums at `<dest>/<album>/`.
#[derive(Debug, Clone)]
pub struct Layout {
    dest: PathBuf,
    bucket: Option<String>,
}

impl Layout {
    pub fn new(dest: impl Into<PathBuf>, bucket: Option<String>) -> Self {
        Self {
            dest: dest.into(),
            bucket,
        }
    }

    pub fn canonical_path(&self, parts: &DateParts, filename: &OsStr) -> PathBuf {
        let mut p = self.dest.clone();
        if let Some(bucket) = &self.bucket {
            p.push(bucket);
        }
        p.push(&parts.year);
        p.push(&parts.month);
        p.push(&parts.day);
        p.push(filename);
        p
    }

    pub fn album_dir(&self, album: &str) -> PathBuf {
        self.dest.join(album)
    }
}

/// Album titles become directory names; separators would escape the destination root.
pub fn album_dir_name(title: &str) -> Option<String> {
    let name: String = title
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Capture time rewritten in place.
    Updated,
    /// Rewritten and moved (or copied) to its canonical path.
    Relocated,
    /// A file already sits at the canonical path; nothing was moved.
    AlreadyPresent,
    /// The source was byte-identical to the canonical file and has been removed.
    DuplicateRemoved,
}

impl ItemOutcome {
    /// Whether the sidecar has served its purpose and may be deleted.
    fn consumed_source(self) -> bool {
        !matches!(self, ItemOutcome::AlreadyPresent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemReport {
    pub outcome: ItemOutcome,
    pub album_linked: bool,
}

/// A sidecar with its media file located and its date decoded.
struct Item {
    sidecar_path: PathBuf,
    dir: PathBuf,
    meta: SidecarMetadata,
    media: Resolved,
    parts: DateParts,
}

impl Item {
    fn filename(&self) -> &OsStr {
        self.media
            .path
            .file_name()
            .unwrap_or_else(|| OsStr::new(&self.meta.title))
    }
}

fn dry_run_prefix(action: FsAction) -> &'static str {
    if action == FsAction::WouldDo {
        "[DRY RUN] Would "
    } else {
        ""
    }
}

/// Runs the per-sidecar transaction for update and sort modes.
pub struct Organizer<'a> {
    options: &'a ProcessOptions,
    layout: Option<Layout>,
}

impl<'a> Organizer<'a> {
    pub fn new(options: &'a ProcessOptions) -> Self {
        let layout = options
            .dest
            .as_ref()
            .map(|d| Layout::new(d, options.bucket.clone()));
        Self { options, layout }
    }

    /// Read, resolve and date an item.
    fn load(&self, sidecar_path: &Path) -> Result<Item> {
        let meta = sidecar::read_sidecar(sidecar_path)?;
        let dir = sidecar_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let media = resolve::find_media_file(&dir, &meta.title).ok_or_else(|| Error::NotFound {
            dir: dir.clone(),
            title: meta.title.clone(),
        })?;
        if media.rule != Fallback::Exact {
            log::info!(
                "Found match for '{}' with {}: {}",
                meta.title,
                media.rule,
                media.path.display()
            );
        }

        let parts = date::date_parts(meta.captured_at).ok_or_else(|| {
            Error::parse(sidecar_path, format!("timestamp {} out of range", meta.captured_at))
        })?;

        Ok(Item {
            sidecar_path: sidecar_path.to_path_buf(),
            dir,
            meta,
            media,
            parts,
        })
    }

    /// Write the sidecar's capture time into the media file.
    fn rewrite(&self, tool: Option<&mut dyn MetadataTool>, item: &Item) -> Result<()> {
        let path = &item.media.path;
        let datetime = date::exif_datetime(item.meta.captured_at, self.options.time_zone)
            .ok_or_else(|| Error::parse(&item.sidecar_path, "timestamp out of range"))?;

        if self.options.simulate {
            log::debug!("[DRY RUN] Would set capture time of {} to {}", path.display(), datetime);
            return Ok(());
        }

        let tool = tool.ok_or(Error::ProcessClosed)?;
        let output = tool.execute(&exiftool::capture_time_args(path, &datetime)?)?;
        exiftool::check_write_output(path, &output)?;

        if self.options.set_file_mtime {
            let mtime = FileTime::from_unix_time(item.meta.captured_at, 0);
            filetime::set_file_mtime(path, mtime)
                .io_context(|| format!("setting modification time of {}", path.display()))?;
        }
        log::debug!("Set capture time of {} to {}", path.display(), datetime);
        Ok(())
    }

    fn relocate(&self, item: &Item, canonical: &Path) -> Result<()> {
        let action = fsops::move_or_copy(
            &item.media.path,
            canonical,
            self.options.simulate,
            self.options.keep_source,
        )?;
        let verb = if self.options.keep_source { "copy" } else { "move" };
        log::debug!(
            "{}{} {} -> {}",
            dry_run_prefix(action),
            verb,
            item.media.path.display(),
            canonical.display()
        );
        Ok(())
    }

    /// A file is already filed at `canonical`. With dedupe on, an identical source is removed.
    fn handle_existing(&self, item: &Item, canonical: &Path) -> Result<ItemOutcome> {
        if !self.options.dedupe || self.options.keep_source || is_same_file(&item.media.path, canonical) {
            return Ok(ItemOutcome::AlreadyPresent);
        }
        if !fsops::files_identical(&item.media.path, canonical)? {
            log::debug!(
                "{} differs from existing {}, leaving both",
                item.media.path.display(),
                canonical.display()
            );
            return Ok(ItemOutcome::AlreadyPresent);
        }

        let action = fsops::remove_file(&item.media.path, self.options.simulate)?;
        log::debug!(
            "{}delete identical duplicate source {}",
            dry_run_prefix(action),
            item.media.path.display()
        );
        Ok(ItemOutcome::DuplicateRemoved)
    }

    /// Link `canonical` into the directory's album, if it has one. Returns whether a link
    /// exists (or would exist) afterwards.
    fn link_album(&self, layout: &Layout, item: &Item, canonical: &Path) -> Result<bool> {
        let Some(title) = sidecar::read_album_title(&item.dir) else {
            return Ok(false);
        };
        let Some(name) = album_dir_name(&title) else {
            log::debug!("Ignoring unusable album title {:?} in {}", title, item.dir.display());
            return Ok(false);
        };

        let album_dir = layout.album_dir(&name);
        let action = fsops::ensure_directory(&album_dir, self.options.simulate)?;
        if action == FsAction::WouldDo {
            log::debug!("[DRY RUN] Would create directory {}", album_dir.display());
        }

        let target = pathdiff::diff_paths(canonical, &album_dir).unwrap_or_else(|| canonical.to_path_buf());
        let link = album_dir.join(item.filename());
        let action = fsops::create_symlink(&target, &link, self.options.simulate)?;
        match action {
            FsAction::Unchanged => log::debug!("Symlink already correct: {} -> {}", link.display(), target.display()),
            _ => log::debug!(
                "{}link {} -> {}",
                dry_run_prefix(action),
                link.display(),
                target.display()
            ),
        }
        Ok(true)
    }

    /// Delete the sidecar unless configured to keep it. A failure here is only a warning,
    /// as the media file has already been handled.
    fn cleanup_sidecar(&self, worker_id: usize, item: &Item) {
        if self.options.keep_sidecars {
            return;
        }
        match fsops::remove_file(&item.sidecar_path, self.options.simulate) {
            Ok(action) => log::debug!(
                "{}delete sidecar {}",
                dry_run_prefix(action),
                item.sidecar_path.display()
            ),
            Err(e) => log::warn!(
                "Worker {}: could not delete sidecar {}: {}",
                worker_id,
                item.sidecar_path.display(),
                e
            ),
        }
    }

    /// Update mode: fix the capture time in place.
    pub fn update_item(&self, worker: &mut Worker, sidecar_path: &Path) -> Result<ItemReport> {
        let item = self.load(sidecar_path)?;
        self.rewrite(worker.tool().map(|t| t as &mut dyn MetadataTool), &item)?;
        self.cleanup_sidecar(worker.id, &item);
        Ok(ItemReport {
            outcome: ItemOutcome::Updated,
            album_linked: false,
        })
    }

    /// Sort mode: fix the capture time, file the media under its date, link its album.
    pub fn sort_item(&self, worker: &mut Worker, sidecar_path: &Path) -> Result<ItemReport> {
        let layout = self
            .layout
            .as_ref()
            .ok_or_else(|| Error::parse(sidecar_path, "sort requires a destination directory"))?;
        let item = self.load(sidecar_path)?;
        let canonical = layout.canonical_path(&item.parts, item.filename());

        // Not synchronized: two sidecars naming the same canonical path may both see it absent.
        let outcome = if fs::symlink_metadata(&canonical).is_ok() {
            self.handle_existing(&item, &canonical)?
        } else {
            self.rewrite(worker.tool().map(|t| t as &mut dyn MetadataTool), &item)?;
            self.relocate(&item, &canonical)?;
            ItemOutcome::Relocated
        };

        let album_linked = self.link_album(layout, &item, &canonical)?;

        if outcome.consumed_source() {
            self.cleanup_sidecar(worker.id, &item);
        }
        Ok(ItemReport {
            outcome,
            album_linked,
        })
    }

    pub fn process_item(&self, worker: &mut Worker, sidecar_path: &Path) -> Result<ItemReport> {
        match self.options.mode {
            Mode::Sort => self.sort_item(worker, sidecar_path),
            _ => self.update_item(worker, sidecar_path),
        }
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn log_item_error(worker_id: usize, sidecar_path: &Path, err: &Error) {
    if err.is_expected() {
        log::info!("Worker {}: skipping {}: {}", worker_id, sidecar_path.display(), err);
    } else {
        log::warn!("Worker {}: skipping {}: {}", worker_id, sidecar_path.display(), err);
    }
}

/// Update or sort every sidecar under `options.source`.
pub fn run(
    options: &ProcessOptions,
    tools: &ToolFactory,
    progress: &ThrottledProgress,
) -> anyhow::Result<RunSummary> {
    let organizer = Organizer::new(options);
    let tracker = ProgressTracker::new(0);
    let stage = match options.mode {
        Mode::Sort => "sort",
        _ => "update",
    };

    // Dry runs never start the metadata tool.
    let tools = options.needs_tool().then_some(tools);
    let mut summary = RunSummary::default();

    let report = pool::run_pool(
        options.worker_count(),
        tools,
        |tx| {
            discover::walk_files(&options.source, discover::is_sidecar, |path| {
                tracker.add_total(1);
                tx.send(path).is_ok()
            });
        },
        |worker, path| {
            let result = organizer.process_item(worker, &path);
            if let Err(e) = &result {
                log_item_error(worker.id, &path, e);
            }
            let done = tracker.increment();
            progress.report(stage, done - 1, tracker.total(), "Processing sidecars");
            result
        },
        |result| summary.record(result),
    );

    summary.discovered = tracker.total();
    summary.workers_started = report.workers_started;
    summary.workers_failed = report.workers_failed;
    if tools.is_some() && report.workers_started == 0 {
        anyhow::bail!("no worker could start {}", options.exiftool.display());
    }
    log::info!("{}", tracker.render());
    Ok(summary)
}
