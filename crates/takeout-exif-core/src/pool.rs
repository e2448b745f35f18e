use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{bounded, unbounded, Sender};

use crate::exiftool::{MetadataTool, ToolFactory};

/// Per-thread state handed to the item handler.
pub struct Worker {
    pub id: usize,
    tool: Option<Box<dyn MetadataTool>>,
}

impl Worker {
    pub(crate) fn new(id: usize, tool: Option<Box<dyn MetadataTool>>) -> Self {
        Self { id, tool }
    }

    /// The worker's own tool session, absent when the pool runs without one.
    pub fn tool(&mut self) -> Option<&mut (dyn MetadataTool + 'static)> {
        self.tool.as_deref_mut()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolReport {
    pub workers_started: usize,
    pub workers_failed: usize,
}

/// Run `workers` threads over the items `produce` sends, collecting one result per item.
///
/// Workers start before the producer. The queue is bounded to the worker count, so the
/// producer blocks while every worker is busy. When `tools` is given each worker opens its
/// own session first; a worker that cannot open one exits without taking work, and its
/// share is drained by the others. If every worker exits, sends fail and the producer is
/// expected to stop.
///
/// `collect` runs on the calling thread.
pub fn run_pool<T, R, P, W, C>(
    workers: usize,
    tools: Option<&ToolFactory>,
    produce: P,
    work: W,
    mut collect: C,
) -> PoolReport
where
    T: Send,
    R: Send,
    P: FnOnce(&Sender<T>) + Send,
    W: Fn(&mut Worker, T) -> R + Sync,
    C: FnMut(R),
{
    let workers = workers.max(1);
    let (job_tx, job_rx) = bounded::<T>(workers);
    let (result_tx, result_rx) = unbounded::<R>();
    let started = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for id in 1..=workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let work = &work;
            let started = &started;
            let failed = &failed;
            s.spawn(move || {
                let tool = match tools {
                    Some(open) => match open() {
                        Ok(tool) => Some(tool),
                        Err(e) => {
                            log::error!("Worker {}: failed to start metadata tool: {}", id, e);
                            failed.fetch_add(1, Ordering::Relaxed);
                            return;
                        }
                    },
                    None => None,
                };
                started.fetch_add(1, Ordering::Relaxed);

                let mut worker = Worker::new(id, tool);
                for item in job_rx.iter() {
                    if result_tx.send(work(&mut worker, item)).is_err() {
                        break;
                    }
                }

                if let Some(tool) = worker.tool.take() {
                    if let Err(e) = tool.close() {
                        log::error!("Worker {}: metadata tool shutdown failed: {}", id, e);
                    }
                }
            });
        }
        // Only workers hold receivers and result senders from here on.
        drop(job_rx);
        drop(result_tx);

        s.spawn(move || {
            produce(&job_tx);
            drop(job_tx);
        });

        for result in result_rx.iter() {
            collect(result);
        }
    });

    PoolReport {
        workers_started: started.into_inner(),
        workers_failed: failed.into_inner(),
    }
}
