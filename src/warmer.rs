use std::{num::NonZeroUsize, sync::Arc, thread};

use tokio::{
    sync::{mpsc, Mutex},
    task::{self, JoinSet},
};
use tracing::{debug, error, info, warn};

use crate::{error::StoreError, preview::PreviewCache, source::ContentStore};

pub const DEFAULT_WARMUP_YEARS: u32 = 3;
const QUEUE_CAPACITY_PER_WORKER: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmupReport {
    pub queued: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Fills the preview cache for the most recent years before traffic arrives.
pub struct CacheWarmer {
    store: Arc<ContentStore>,
    previews: Arc<PreviewCache>,
    workers: usize,
    years: u32,
}

impl CacheWarmer {
    pub fn new(store: Arc<ContentStore>, previews: Arc<PreviewCache>) -> Self {
        let workers = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            store,
            previews,
            workers,
            years: DEFAULT_WARMUP_YEARS,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_years(mut self, years: u32) -> Self {
        self.years = years;
        self
    }

    /// Requests a preview for every upload and template of `current_year` and
    /// the years before it. Failures are logged and counted, never fatal.
    pub async fn run(&self, current_year: i32) -> WarmupReport {
        let (tx, rx) = mpsc::channel::<String>(self.workers * QUEUE_CAPACITY_PER_WORKER);
        let rx = Arc::new(Mutex::new(rx));

        let mut pool = JoinSet::new();
        for worker in 0..self.workers {
            let rx = rx.clone();
            let previews = self.previews.clone();
            pool.spawn(async move { drain_queue(worker, rx, previews).await });
        }

        let store = self.store.clone();
        let years = self.years;
        // the sender moves into the producer and is dropped when it returns,
        // which closes the queue
        let queued = match task::spawn_blocking(move || enqueue_jobs(&store, current_year, years, tx))
            .await
        {
            Ok(queued) => queued,
            Err(join_err) => {
                error!(error = %join_err, "preview warmup producer panicked");
                0
            }
        };

        let mut report = WarmupReport {
            queued,
            ..WarmupReport::default()
        };
        while let Some(result) = pool.join_next().await {
            match result {
                Ok((succeeded, failed)) => {
                    report.succeeded += succeeded;
                    report.failed += failed;
                }
                Err(join_err) => error!(error = %join_err, "preview warmup worker panicked"),
            }
        }

        info!(
            queued = report.queued,
            succeeded = report.succeeded,
            failed = report.failed,
            generated = self.previews.generations(),
            "preview cache warmup finished"
        );
        report
    }
}

fn enqueue_jobs(
    store: &ContentStore,
    current_year: i32,
    years: u32,
    tx: mpsc::Sender<String>,
) -> usize {
    let mut queued = 0;
    for offset in 0..years as i32 {
        let year = current_year - offset;
        info!(year, "loading image preview cache");
        let weeks = match store.list_weeks_of_year(year) {
            Ok(weeks) => weeks,
            Err(StoreError::NotFound(_)) => {
                debug!(year, "no folder for year, skipping");
                continue;
            }
            Err(err) => {
                warn!(year, error = %err, "failed to list weeks, skipping year");
                continue;
            }
        };

        for cw in weeks {
            let week = match store.list_week_files(cw) {
                Ok(week) => week,
                Err(err) => {
                    warn!(week = %cw, error = %err, "failed to list week, skipping");
                    continue;
                }
            };
            let paths = week
                .uploads
                .iter()
                .map(|upload| upload.href())
                .chain(week.template.iter().map(|template| template.href()));
            for path in paths {
                if tx.blocking_send(path).is_err() {
                    error!("preview warmup queue closed early");
                    return queued;
                }
                queued += 1;
            }
        }
    }
    queued
}

async fn drain_queue(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
    previews: Arc<PreviewCache>,
) -> (usize, usize) {
    let (mut succeeded, mut failed) = (0, 0);
    loop {
        let job = rx.lock().await.recv().await;
        let Some(path) = job else { break };

        let previews = previews.clone();
        let job_path = path.clone();
        match task::spawn_blocking(move || previews.get_preview(&job_path)).await {
            Ok(Ok(_)) => succeeded += 1,
            Ok(Err(err)) => {
                warn!(worker, path = %path, error = %err, "failed to warm preview");
                failed += 1;
            }
            Err(join_err) => {
                error!(worker, path = %path, error = %join_err, "preview task panicked");
                failed += 1;
            }
        }
    }
    debug!(worker, succeeded, failed, "preview warmup worker done");
    (succeeded, failed)
}
