use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

use crate::atomic::write_file_atomic;
use crate::error::ModelError;
use crate::job::{JobKind, JobRecord, JobStatus};
use crate::params::{Acquisition, Computing, GlobalParams, Microscope};

/// Name of the durable snapshot at the project root.
pub const SNAPSHOT_FILE: &str = "project_params.json";

/// A named workspace rooted at a filesystem path.
///
/// The in-memory representation is exclusively owned by the state store; the
/// project directory is the durable backing store. Created once, loaded many
/// times, never implicitly destroyed.
///
/// The ordered job selection is the key set of `jobs`: selection order is
/// required to follow [`JobKind`] enumeration order, so the sorted map *is*
/// the selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub path: Utf8PathBuf,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub microscope: Microscope,
    pub acquisition: Acquisition,
    pub computing: Computing,
    pub jobs: BTreeMap<JobKind, JobRecord>,
}

impl Project {
    /// A fresh project with the given selection, each record seeded from its
    /// kind-specific defaults and marked `scheduled`.
    pub fn new(
        name: &str,
        path: Utf8PathBuf,
        selected: &[JobKind],
    ) -> Result<Self, ModelError> {
        if name.is_empty() || name.contains('/') || name.contains(char::is_whitespace) {
            return Err(ModelError::Validation {
                field: "name".to_string(),
                reason: "project names are single non-empty path components".to_string(),
            });
        }
        let mut jobs = BTreeMap::new();
        for kind in selected {
            if jobs.contains_key(kind) {
                return Err(ModelError::Validation {
                    field: kind.as_str().to_string(),
                    reason: "job kind selected twice".to_string(),
                });
            }
            let mut record = kind.default_record();
            record.execution_status = JobStatus::Scheduled;
            jobs.insert(*kind, record);
        }
        let now = Utc::now();
        Ok(Self {
            name: name.to_string(),
            path,
            created_at: now,
            modified_at: now,
            microscope: Microscope::default(),
            acquisition: Acquisition::default(),
            computing: Computing::default(),
            jobs,
        })
    }

    /// The ordered selection (enumeration order).
    pub fn selected(&self) -> Vec<JobKind> {
        self.jobs.keys().copied().collect()
    }

    /// Scheme directory name for this project.
    pub fn scheme_name(&self) -> String {
        format!("scheme_{}", self.name)
    }

    /// Prefix applied to imported movie and metadata file names.
    pub fn import_prefix(&self) -> String {
        format!("{}_", self.name)
    }

    pub fn globals(&self) -> GlobalParams {
        GlobalParams {
            microscope: self.microscope.clone(),
            acquisition: self.acquisition.clone(),
            computing: self.computing.clone(),
        }
    }

    pub fn set_globals(&mut self, globals: GlobalParams) {
        self.microscope = globals.microscope;
        self.acquisition = globals.acquisition;
        self.computing = globals.computing;
    }

    /// Select a kind at `position` (index into the ordered selection).
    ///
    /// The selection must stay a subsequence of the enumeration order, so
    /// the only valid position for a kind is its insertion point; anything
    /// else collides with an existing entry and is rejected.
    pub fn select_job(&mut self, kind: JobKind, position: usize) -> Result<(), ModelError> {
        if self.jobs.contains_key(&kind) {
            return Err(ModelError::Validation {
                field: kind.as_str().to_string(),
                reason: "job kind is already selected".to_string(),
            });
        }
        let insertion_point = self.jobs.keys().filter(|k| **k < kind).count();
        if position != insertion_point {
            return Err(ModelError::Validation {
                field: kind.as_str().to_string(),
                reason: format!(
                    "position {position} conflicts with the pipeline order (expected {insertion_point})"
                ),
            });
        }
        let mut record = kind.default_record();
        record.execution_status = JobStatus::Scheduled;
        self.jobs.insert(kind, record);
        self.touch();
        Ok(())
    }

    pub fn deselect_job(&mut self, kind: JobKind) -> Result<(), ModelError> {
        if self.jobs.remove(&kind).is_none() {
            return Err(ModelError::Validation {
                field: kind.as_str().to_string(),
                reason: "job kind is not selected".to_string(),
            });
        }
        self.touch();
        Ok(())
    }

    /// Re-seed every record from its kind defaults, preserving the selection
    /// and marking everything `scheduled` again.
    pub fn reset_records_to_defaults(&mut self) {
        let selected = self.selected();
        self.jobs.clear();
        for kind in selected {
            let mut record = kind.default_record();
            record.execution_status = JobStatus::Scheduled;
            self.jobs.insert(kind, record);
        }
        self.touch();
    }

    /// True when any selected job is live on the cluster.
    pub fn any_running(&self) -> bool {
        self.jobs
            .values()
            .any(|r| r.execution_status == JobStatus::Running)
    }

    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }

    fn snapshot_path(&self) -> Utf8PathBuf {
        self.path.join(SNAPSHOT_FILE)
    }

    /// Atomically write the snapshot to `project_params.json`.
    pub fn write_snapshot(&self) -> Result<(), ModelError> {
        let path = self.snapshot_path();
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            ModelError::SnapshotWriteFailed {
                path: path.to_string(),
                reason: e.to_string(),
            }
        })?;
        write_file_atomic(&path, &json).map_err(|e| ModelError::SnapshotWriteFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Read a snapshot back from a project root and validate it.
    pub fn read_snapshot(root: &Utf8Path) -> Result<Self, ModelError> {
        let path = root.join(SNAPSHOT_FILE);
        let raw = fs::read_to_string(&path).map_err(|e| ModelError::SnapshotInvalid {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let project: Project =
            serde_json::from_str(&raw).map_err(|e| ModelError::SnapshotInvalid {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        project.globals().validate().map_err(|e| {
            ModelError::SnapshotInvalid {
                path: path.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ParamValue;
    use tempfile::TempDir;

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn new_project_selection_round_trips() {
        let selected = [
            JobKind::ImportMovies,
            JobKind::FsMotionAndCtf,
            JobKind::TsAlignment,
        ];
        let project = Project::new("demo", Utf8PathBuf::from("/tmp/projects/demo"), &selected)
            .unwrap();
        assert_eq!(project.selected(), selected);
        assert_eq!(project.scheme_name(), "scheme_demo");
        assert_eq!(project.import_prefix(), "demo_");
    }

    #[test]
    fn rejects_duplicate_selection() {
        let selected = [JobKind::ImportMovies, JobKind::ImportMovies];
        assert!(Project::new("demo", Utf8PathBuf::from("/p"), &selected).is_err());
    }

    #[test]
    fn rejects_bad_names() {
        assert!(Project::new("", Utf8PathBuf::from("/p"), &[]).is_err());
        assert!(Project::new("a/b", Utf8PathBuf::from("/p"), &[]).is_err());
        assert!(Project::new("a b", Utf8PathBuf::from("/p"), &[]).is_err());
    }

    #[test]
    fn select_at_wrong_position_is_rejected() {
        let mut project = Project::new(
            "demo",
            Utf8PathBuf::from("/p"),
            &[JobKind::ImportMovies, JobKind::TsAlignment],
        )
        .unwrap();

        // FsMotionAndCtf belongs between the two selected kinds: index 1.
        assert!(project.select_job(JobKind::FsMotionAndCtf, 0).is_err());
        assert!(project.select_job(JobKind::FsMotionAndCtf, 2).is_err());
        project.select_job(JobKind::FsMotionAndCtf, 1).unwrap();
        assert_eq!(
            project.selected(),
            vec![
                JobKind::ImportMovies,
                JobKind::FsMotionAndCtf,
                JobKind::TsAlignment
            ]
        );
    }

    #[test]
    fn deselect_unknown_kind_fails() {
        let mut project = Project::new("demo", Utf8PathBuf::from("/p"), &[]).unwrap();
        assert!(project.deselect_job(JobKind::TsCtf).is_err());
    }

    #[test]
    fn snapshot_round_trip_is_lossless() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let mut project = Project::new(
            "demo",
            root.clone(),
            &[JobKind::ImportMovies, JobKind::TsAlignment],
        )
        .unwrap();
        let mut globals = project.globals();
        globals
            .set_field("microscope.pixel_size_angstrom", &ParamValue::Float(1.35))
            .unwrap();
        globals
            .set_field("acquisition.dose_per_tilt", &ParamValue::Float(3.5))
            .unwrap();
        project.set_globals(globals);
        project
            .jobs
            .get_mut(&JobKind::TsAlignment)
            .unwrap()
            .set("thickness_nm", ParamValue::Int(300))
            .unwrap();

        project.write_snapshot().unwrap();
        let loaded = Project::read_snapshot(&root).unwrap();
        assert_eq!(loaded, project);
    }

    #[test]
    fn snapshot_with_unknown_kind_is_invalid() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let project = Project::new("demo", root.clone(), &[JobKind::ImportMovies]).unwrap();
        project.write_snapshot().unwrap();

        let path = root.join(SNAPSHOT_FILE);
        let mangled = fs::read_to_string(&path)
            .unwrap()
            .replace("import_movies", "transmute_gold");
        fs::write(&path, mangled).unwrap();

        assert!(matches!(
            Project::read_snapshot(&root),
            Err(ModelError::SnapshotInvalid { .. })
        ));
    }

    #[test]
    fn snapshot_with_out_of_range_value_is_invalid() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        let mut project = Project::new("demo", root.clone(), &[JobKind::ImportMovies]).unwrap();
        project.microscope.pixel_size_angstrom = Some(1.0);
        project.write_snapshot().unwrap();

        let path = root.join(SNAPSHOT_FILE);
        let mangled = fs::read_to_string(&path)
            .unwrap()
            .replace("\"pixel_size_angstrom\": 1.0", "\"pixel_size_angstrom\": 0.4");
        fs::write(&path, mangled).unwrap();

        assert!(matches!(
            Project::read_snapshot(&root),
            Err(ModelError::SnapshotInvalid { .. })
        ));
    }
}
