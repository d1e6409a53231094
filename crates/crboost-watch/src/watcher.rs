use camino::Utf8PathBuf;
use crboost_model::{JobKind, JobStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::derive::{StatusCounters, read_statuses};

/// Consecutive failed reads before a warning event is emitted.
const FAILURE_WARNING_THRESHOLD: u32 = 5;

/// Event streamed to progress subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A job status or aggregate counter changed.
    Status {
        jobs: BTreeMap<JobKind, JobStatus>,
        counters: StatusCounters,
        complete: bool,
    },
    /// The processes file has been unreadable for a sustained stretch.
    Warning { message: String },
}

/// A running watch task plus the channel it publishes on.
#[derive(Debug)]
pub struct WatcherHandle {
    pub sender: broadcast::Sender<ProgressEvent>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Stop the watch task. Called when the project closes.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Periodic processes-file watcher for one opened project.
#[derive(Debug, Clone)]
pub struct Watcher {
    project_root: Utf8PathBuf,
    scheme_name: String,
    selected: Vec<JobKind>,
    poll_interval: Duration,
}

impl Watcher {
    pub fn new(project_root: Utf8PathBuf, scheme_name: String, selected: Vec<JobKind>) -> Self {
        Self {
            project_root,
            scheme_name,
            selected,
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Spawn the watch task. Emits a delta event whenever any derived
    /// status or counter changes; failed reads are skipped and retried on
    /// the next tick.
    pub fn spawn(self) -> WatcherHandle {
        let (sender, _) = broadcast::channel(64);
        let tx = sender.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last: Option<BTreeMap<JobKind, JobStatus>> = None;
            let mut consecutive_failures: u32 = 0;

            loop {
                ticker.tick().await;
                match read_statuses(&self.project_root, &self.selected, &self.scheme_name) {
                    Some(statuses) => {
                        consecutive_failures = 0;
                        if last.as_ref() != Some(&statuses) {
                            let counters = StatusCounters::from_statuses(&statuses);
                            debug!(?counters, "progress changed");
                            let _ = tx.send(ProgressEvent::Status {
                                jobs: statuses.clone(),
                                counters,
                                complete: counters.is_complete(),
                            });
                            last = Some(statuses);
                        }
                    }
                    None => {
                        consecutive_failures += 1;
                        if consecutive_failures == FAILURE_WARNING_THRESHOLD {
                            warn!(root = %self.project_root, "processes file unreadable");
                            let _ = tx.send(ProgressEvent::Warning {
                                message: "processes file has been unreadable for several polls"
                                    .to_string(),
                            });
                        }
                    }
                }
            }
        });
        WatcherHandle { sender, task }
    }
}
