use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;
use tracing::{info, warn};

use crate::compare::{self, TaskContext};
use crate::error::TaskError;
use crate::matcher::ComparisonTask;
use crate::record::ComparisonResult;
use crate::service::Comparator;

/// Allowed range for the comparison worker count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerBounds {
    pub min: usize,
    pub max: usize,
}

impl Default for WorkerBounds {
    fn default() -> Self {
        WorkerBounds { min: 2, max: 10 }
    }
}

impl WorkerBounds {
    pub fn clamp(&self, requested: usize) -> usize {
        let workers = requested.clamp(self.min, self.max);
        if workers != requested {
            warn!(
                "max_workers {} outside [{}, {}], using {}",
                requested, self.min, self.max, workers
            );
        }
        workers
    }
}

/// What one task produced, tagged with its key.
#[derive(Debug)]
pub struct TaskOutcome {
    pub key: String,
    pub result: Result<ComparisonResult, TaskError>,
}

/// Run every task once with at most `workers` in flight.
///
/// Outcomes arrive in completion order. A panicking task yields an `Err`
/// outcome and never disturbs the others.
pub async fn run(
    tasks: Vec<ComparisonTask>,
    comparator: Arc<dyn Comparator>,
    ctx: Arc<TaskContext>,
    workers: usize,
    show_progress: bool,
) -> Vec<TaskOutcome> {
    let total = tasks.len();
    let workers = workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));

    let pb = if show_progress {
        ProgressBar::new(total as u64)
    } else {
        ProgressBar::hidden()
    };
    let template = "[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})";
    if let Ok(style) = ProgressStyle::default_bar().template(template) {
        pb.set_style(style.progress_chars("=> "));
    }

    // Workers send outcomes, this loop is the only reader
    let (tx, mut rx) = mpsc::channel::<TaskOutcome>(workers * 2);

    for task in tasks {
        let sem = Arc::clone(&semaphore);
        let comparator = Arc::clone(&comparator);
        let ctx = Arc::clone(&ctx);
        let tx = tx.clone();

        tokio::spawn(async move {
            let key = task.key().to_string();
            let result = match sem.acquire_owned().await {
                Ok(_permit) => {
                    // Inner spawn so a panic surfaces as a JoinError
                    let handle = tokio::spawn(compare::run_task(task, comparator, ctx));
                    handle.await.map_err(panicked)
                }
                Err(_) => Err(TaskError::PoolClosed),
            };
            let _ = tx.send(TaskOutcome { key, result }).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut outcomes = Vec::with_capacity(total);
    let mut failed = 0usize;
    while let Some(outcome) = rx.recv().await {
        if let Err(e) = &outcome.result {
            failed += 1;
            warn!("comparison for '{}' dropped: {}", outcome.key, e);
        }
        outcomes.push(outcome);
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        "Compared {} tasks with {} workers ({} ok, {} dropped)",
        total,
        workers,
        outcomes.len() - failed,
        failed
    );
    outcomes
}

fn panicked(err: JoinError) -> TaskError {
    if !err.is_panic() {
        return TaskError::Panicked(err.to_string());
    }
    let payload = err.into_panic();
    let msg = payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());
    TaskError::Panicked(msg)
}

// ── Tests ──
