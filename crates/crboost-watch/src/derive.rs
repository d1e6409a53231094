use camino::Utf8Path;
use crboost_model::{JobKind, JobStatus};
use crboost_star::{ProcessStatus, ProcessTable};
use serde::Serialize;
use std::collections::BTreeMap;

/// Processes file at the project root, owned by the pipeliner.
pub const PROCESSES_FILE: &str = "default_pipeline.star";

/// Aggregate counters over the selected jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounters {
    pub total: usize,
    pub succeeded: usize,
    pub running: usize,
    pub failed: usize,
}

impl StatusCounters {
    pub fn from_statuses(statuses: &BTreeMap<JobKind, JobStatus>) -> Self {
        let mut counters = Self {
            total: statuses.len(),
            ..Self::default()
        };
        for status in statuses.values() {
            match status {
                JobStatus::Succeeded => counters.succeeded += 1,
                JobStatus::Running => counters.running += 1,
                JobStatus::Failed | JobStatus::Aborted => counters.failed += 1,
                JobStatus::Scheduled | JobStatus::NotScheduled => {}
            }
        }
        counters
    }

    /// A pipeline is complete once something was scheduled and nothing is
    /// left running.
    pub fn is_complete(&self) -> bool {
        self.running == 0 && self.total > 0
    }
}

fn to_job_status(status: ProcessStatus) -> JobStatus {
    match status {
        ProcessStatus::Scheduled => JobStatus::Scheduled,
        ProcessStatus::Running => JobStatus::Running,
        ProcessStatus::Succeeded => JobStatus::Succeeded,
        ProcessStatus::Failed => JobStatus::Failed,
        ProcessStatus::Aborted => JobStatus::Aborted,
    }
}

/// Join the selected kinds against the process table.
///
/// A selected kind not (yet) listed in the table is `scheduled`; a listed
/// kind takes the status label of its latest matching row.
pub fn derive_statuses(
    selected: &[JobKind],
    scheme_name: &str,
    table: Option<&ProcessTable>,
) -> BTreeMap<JobKind, JobStatus> {
    let mut statuses = BTreeMap::new();
    for kind in selected {
        let prefix = format!("Schemes/{scheme_name}/{}/", kind.as_str());
        let status = table
            .and_then(|t| t.status_for_prefix(&prefix))
            .map(to_job_status)
            .unwrap_or(JobStatus::Scheduled);
        statuses.insert(*kind, status);
    }
    statuses
}

/// Read the processes file and derive statuses. `None` means the file was
/// unreadable this instant (concurrent rename, partial write); the caller
/// retries on its next tick.
pub fn read_statuses(
    project_root: &Utf8Path,
    selected: &[JobKind],
    scheme_name: &str,
) -> Option<BTreeMap<JobKind, JobStatus>> {
    let path = project_root.join(PROCESSES_FILE);
    if !path.exists() {
        // Nothing has run yet; every selected job is still scheduled.
        return Some(derive_statuses(selected, scheme_name, None));
    }
    let raw = std::fs::read_to_string(path.as_std_path()).ok()?;
    let table = ProcessTable::parse(&raw).ok()?;
    Some(derive_statuses(selected, scheme_name, Some(&table)))
}
