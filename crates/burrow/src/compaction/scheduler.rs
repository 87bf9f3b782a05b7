//! Background compaction scheduling.
//!
//! A single Tokio task owns the schedule. Groups arrive through a queue or from the
//! periodic tick; each merge runs on the blocking pool. A group is never merged by two
//! tasks at once, and shutdown waits for merges already started.

use crate::compaction::engine::{CompactionEngine, CompactionOutcome};
use crate::engine::StorageEngine;
use crate::error::{BurrowError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Handle on the background compaction task.
#[derive(Debug)]
pub struct CompactionScheduler {
    queue: mpsc::UnboundedSender<String>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CompactionScheduler {
    /// Spawns the scheduling task on the current Tokio runtime.
    pub fn start(storage: Arc<StorageEngine>, engine: Arc<CompactionEngine>) -> Self {
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(schedule(storage, engine, queue_rx, shutdown_rx));
        info!("Compaction scheduler started");
        Self {
            queue,
            shutdown,
            task,
        }
    }

    /// Requests a compaction of `group` as soon as it is idle.
    pub fn submit(&self, group: impl Into<String>) -> Result<()> {
        self.queue
            .send(group.into())
            .map_err(|_| BurrowError::StorageEngine("compaction scheduler stopped".into()))
    }

    /// Stops scheduling and waits for running merges to finish.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| BurrowError::StorageEngine(format!("compaction scheduler failed: {}", e)))?;
        info!("Compaction scheduler stopped");
        Ok(())
    }
}

async fn schedule(
    storage: Arc<StorageEngine>,
    engine: Arc<CompactionEngine>,
    mut queue: mpsc::UnboundedReceiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(engine.config().interval.max(Duration::from_millis(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut running: JoinSet<(String, Option<CompactionOutcome>)> = JoinSet::new();
    let mut in_flight: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            Some(name) = queue.recv() => {
                dispatch(&storage, &engine, &mut running, &mut in_flight, name);
            }
            _ = tick.tick() => {
                for group in storage.groups() {
                    dispatch(&storage, &engine, &mut running, &mut in_flight, group.name().to_string());
                }
            }
            Some(done) = running.join_next(), if !running.is_empty() => {
                if let Ok((name, outcome)) = done {
                    report(&name, outcome);
                    in_flight.remove(&name);
                }
            }
            _ = shutdown.changed() => {
                debug!("Compaction scheduler shutting down with {} merges running", running.len());
                break;
            }
        }
    }

    while let Some(done) = running.join_next().await {
        if let Ok((name, outcome)) = done {
            report(&name, outcome);
        }
    }
}

fn dispatch(
    storage: &Arc<StorageEngine>,
    engine: &Arc<CompactionEngine>,
    running: &mut JoinSet<(String, Option<CompactionOutcome>)>,
    in_flight: &mut HashSet<String>,
    name: String,
) {
    if in_flight.contains(&name) {
        return;
    }
    let group = match storage.group(&name) {
        Ok(group) => group,
        Err(e) => {
            warn!("Ignoring compaction request: {}", e);
            return;
        }
    };
    in_flight.insert(name.clone());
    let engine = Arc::clone(engine);
    running.spawn(async move {
        let outcome = tokio::task::spawn_blocking(move || engine.run_once(&group))
            .await
            .ok();
        (name, outcome)
    });
}

fn report(name: &str, outcome: Option<CompactionOutcome>) {
    match outcome {
        Some(CompactionOutcome::Compacted(summary)) => debug!(
            "Scheduled compaction of group {} produced segment {}",
            name, summary.target
        ),
        Some(CompactionOutcome::Skipped { reason }) => {
            warn!("Scheduled compaction of group {} skipped: {}", name, reason)
        }
        Some(CompactionOutcome::NoCandidates) | Some(CompactionOutcome::Busy) => {}
        None => warn!("Compaction task of group {} panicked", name),
    }
}
