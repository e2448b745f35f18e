use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const BAR_WIDTH: usize = 30;

/// Completed-vs-total counter shared by all workers.
///
/// `total` grows while discovery is still streaming items in, so the ETA is only as good
/// as the discovered count at the time it is asked for.
pub struct ProgressTracker {
    total: AtomicU64,
    completed: AtomicU64,
    start: Instant,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self {
            total: AtomicU64::new(total),
            completed: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    pub fn add_total(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    /// Count one finished item and return the new completed count.
    pub fn increment(&self) -> u64 {
        self.completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Linear extrapolation of the remaining time.
    pub fn eta(&self) -> Option<Duration> {
        estimate_remaining(self.elapsed(), self.completed(), self.total())
    }

    /// One-line textual bar, e.g. `[=====>      ] 5/12 (41.7%) | Elapsed: 3s | ETA: 4s`.
    pub fn render(&self) -> String {
        render_line(self.completed(), self.total(), self.elapsed())
    }
}

fn estimate_remaining(elapsed: Duration, completed: u64, total: u64) -> Option<Duration> {
    if completed == 0 || completed >= total {
        return None;
    }
    let per_item = elapsed.as_secs_f64() / completed as f64;
    Some(Duration::from_secs_f64(per_item * (total - completed) as f64))
}

fn render_line(completed: u64, total: u64, elapsed: Duration) -> String {
    let fraction = if total == 0 {
        0.0
    } else {
        (completed as f64 / total as f64).min(1.0)
    };
    let filled = (BAR_WIDTH as f64 * fraction) as usize;
    let done = total > 0 && completed >= total;

    let mut bar = String::with_capacity(BAR_WIDTH + 2);
    bar.push('[');
    for i in 0..BAR_WIDTH {
        bar.push(if i < filled {
            '='
        } else if i == filled && !done {
            '>'
        } else {
            ' '
        });
    }
    bar.push(']');

    let eta = if done {
        "Complete!".to_string()
    } else {
        match estimate_remaining(elapsed, completed, total) {
            Some(d) => format!("ETA: {}", format_duration(d)),
            None => "ETA: calculating...".to_string(),
        }
    };

    format!(
        "{} {}/{} ({:.1}%) | Elapsed: {} | {}",
        bar,
        completed,
        total,
        fraction * 100.0,
        format_duration(elapsed),
        eta
    )
}

/// `42s`, `3m7s`, `2h15m`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    }
}
