mod setup;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use takeout_exif_core::{Mode, ProcessOptions, ProgressCallback, RunSummary, TimeZoneMode};

#[derive(Parser)]
#[command(
    name = "takeout-exif",
    version,
    about = "Restore capture dates in a Google Photos Takeout export and sort it by date"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    flags: Flags,
}

#[derive(Subcommand)]
enum Command {
    /// Report media files that carry no timestamp metadata at all
    Scan {
        /// Extracted Takeout directory
        source: PathBuf,
    },
    /// Write the sidecar capture time into each media file, in place
    Update {
        /// Extracted Takeout directory
        source: PathBuf,
    },
    /// Update, then move files into <DEST>/<bucket>/YYYY/MM/DD and link albums
    Sort {
        /// Extracted Takeout directory
        source: PathBuf,
        /// Destination root
        dest: PathBuf,
    },
}

#[derive(Args)]
struct Flags {
    /// Show what would be done without making any changes
    #[arg(long, global = true)]
    dry_run: bool,

    /// Keep JSON sidecars after processing
    #[arg(long, global = true)]
    keep_json: bool,

    /// Copy files instead of moving them
    #[arg(long, global = true)]
    keep_files: bool,

    /// Remove sources that are byte-identical to an already sorted file
    #[arg(long, global = true)]
    dedupe: bool,

    /// Place date directories directly under the destination
    #[arg(long, global = true, conflicts_with = "bucket")]
    no_bucket: bool,

    /// Destination subdirectory holding the date tree
    #[arg(long, global = true, default_value = takeout_exif_core::DEFAULT_BUCKET)]
    bucket: String,

    /// Write capture times in local time instead of UTC
    #[arg(long, global = true)]
    local_time: bool,

    /// Also set each file's modification time to its capture time
    #[arg(long, global = true)]
    set_mtime: bool,

    /// Number of workers, each with its own exiftool process (default: CPU count)
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Directory for scan reports
    #[arg(long, global = true, default_value = ".")]
    report_dir: PathBuf,

    /// exiftool executable
    #[arg(long, global = true, env = "EXIFTOOL", default_value = "exiftool")]
    exiftool: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_options(self) -> ProcessOptions {
        let (mode, source, dest) = match self.command {
            Command::Scan { source } => (Mode::Scan, source, None),
            Command::Update { source } => (Mode::Update, source, None),
            Command::Sort { source, dest } => (Mode::Sort, source, Some(dest)),
        };
        let f = self.flags;
        let mut options = ProcessOptions::new(mode, source);
        options.dest = dest;
        options.simulate = f.dry_run;
        options.keep_sidecars = f.keep_json;
        options.keep_source = f.keep_files;
        options.dedupe = f.dedupe;
        options.bucket = (!f.no_bucket).then_some(f.bucket);
        options.time_zone = if f.local_time {
            TimeZoneMode::Local
        } else {
            TimeZoneMode::Utc
        };
        options.set_file_mtime = f.set_mtime;
        options.workers = f.workers;
        options.report_dir = f.report_dir;
        options.exiftool = f.exiftool;
        options
    }
}

fn print_summary(mode: Mode, summary: &RunSummary, secs: f64) {
    match mode {
        Mode::Scan => {
            eprintln!(
                "Done! {} files checked, {} missing all timestamp data ({:.2}s)",
                summary.scanned, summary.missing_timestamps, secs
            );
            if let Some(report) = &summary.report_path {
                eprintln!("Report written to {}", report.display());
            }
        }
        Mode::Update | Mode::Sort => {
            eprintln!(
                "Done! {} sidecars, {} processed, {} already present, {} duplicates removed, \
                 {} not found, {} skipped, {} failed, {} album links ({:.2}s)",
                summary.discovered,
                summary.processed,
                summary.already_present,
                summary.duplicates_removed,
                summary.not_found,
                summary.skipped,
                summary.failed,
                summary.album_links,
                secs
            );
        }
    }
    if summary.workers_failed > 0 {
        eprintln!("Warning: {} workers could not start exiftool", summary.workers_failed);
    }
}

/// Feed core progress reports into `pb`. The callback owns its own handle to the bar.
fn progress_callback(pb: &ProgressBar) -> Box<ProgressCallback> {
    let bar = pb.clone();
    Box::new(move |_stage, current, total, message| {
        bar.set_length(total);
        bar.set_position(current + 1);
        bar.set_message(message.to_string());
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup::configure_logging(cli.flags.verbose);
    let t_total = std::time::Instant::now();

    let options = cli.into_options();
    options.validate()?;
    setup::check_source_dir(&options.source)?;
    if options.needs_tool() {
        let version = setup::check_exiftool(&options.exiftool)?;
        log::info!("Using exiftool {}", version);
    }
    if options.simulate {
        log::info!("[DRY RUN] No files will be modified");
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:30}] {pos}/{len} ({percent}%) | Elapsed: {elapsed} | ETA: {eta} {msg}")?
            .progress_chars("=> "),
    );

    let summary = takeout_exif_core::process(&options, &*progress_callback(&pb))?;
    pb.finish_and_clear();

    print_summary(options.mode, &summary, t_total.elapsed().as_secs_f64());
    Ok(())
}
