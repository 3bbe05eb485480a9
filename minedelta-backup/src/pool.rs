//! Fixed size worker pool for per-region work.
//!
//! Region files never alias each other, so items run fully independently. Workers
//! report back over a channel and only the calling thread talks to the progress
//! sink, which therefore does not have to be thread safe.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{BackupError, Result};
use crate::progress::Progress;

enum Event<R> {
    Started(usize),
    Finished(usize, Result<R>),
    Skipped,
}

pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(workers: NonZeroUsize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.get())
            .thread_name(|i| format!("minedelta-worker-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `job` for every item and return the results in item order.
    ///
    /// Reports `"<stage> <label>"` when a worker picks an item up and
    /// `"[k/n] <stage> <label>: done"` when it finishes. After the first failure
    /// no further items are started; items already running finish and the first
    /// error is returned.
    pub fn run<T, R, F>(
        &self,
        stage: &str,
        items: Vec<T>,
        label: impl Fn(&T) -> String,
        job: F,
        progress: &dyn Progress,
    ) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R> + Sync,
    {
        let total = items.len();
        let labels: Vec<String> = items.iter().map(label).collect();
        let mut results: Vec<Option<R>> = (0..total).map(|_| None).collect();
        let mut first_error: Option<BackupError> = None;
        let failed = AtomicBool::new(false);

        self.pool.in_place_scope(|scope| {
            let (tx, rx) = mpsc::channel::<Event<R>>();
            for (index, item) in items.into_iter().enumerate() {
                let tx = tx.clone();
                let job = &job;
                let failed = &failed;
                scope.spawn(move |_| {
                    if failed.load(Ordering::Relaxed) {
                        let _ = tx.send(Event::Skipped);
                        return;
                    }
                    let _ = tx.send(Event::Started(index));
                    let result = job(item);
                    if result.is_err() {
                        failed.store(true, Ordering::Relaxed);
                    }
                    let _ = tx.send(Event::Finished(index, result));
                });
            }
            drop(tx);

            // ends once every job has dropped its sender
            let mut done = 0;
            for event in rx {
                match event {
                    Event::Started(index) => {
                        progress.report(&format!("{stage} {}", labels[index]));
                    }
                    Event::Finished(index, Ok(result)) => {
                        done += 1;
                        let label = &labels[index];
                        progress.report(&format!("[{done}/{total}] {stage} {label}: done"));
                        results[index] = Some(result);
                    }
                    Event::Finished(index, Err(err)) => {
                        log::error!("{stage} {} failed: {err}", labels[index]);
                        first_error.get_or_insert(err);
                    }
                    Event::Skipped => {}
                }
            }
        });

        match first_error {
            Some(err) => Err(err),
            None => Ok(results.into_iter().flatten().collect()),
        }
    }
}
