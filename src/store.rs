//! The single-writer state store.
//!
//! One project is open per server process. Every mutating operation
//! acquires the store lock for its full duration, including any snapshot
//! flush; reads clone a point-in-time view under the same lock and drop it
//! before doing anything else.

use camino::{Utf8Path, Utf8PathBuf};
use crboost_command::{ContainerWrapper, shell_quote_single};
use crboost_config::Config;
use crboost_mdoc::probe_first;
use crboost_model::{JobKind, ParamValue, Project};
use crboost_project::{create_layout, import_data, import_source_dirs, write_qsub};
use crboost_runner::{PIPELINER_BIN, PipelineRunner};
use crboost_scheme::{MaterializeContext, materialize_scheme};
use crboost_star::ProcessTable;
use crboost_watch::{
    PROCESSES_FILE, ProgressEvent, StatusCounters, Watcher, WatcherHandle, derive_statuses,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};

use crate::error::ServerError;

/// Everything the store needs besides the project itself.
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub config: Config,
    pub wrapper: ContainerWrapper,
    pub templates_dir: Utf8PathBuf,
}

impl ServerContext {
    pub fn new(config: Config) -> Self {
        let wrapper = ContainerWrapper::from_config(&config);
        let templates_dir = config.local.server_dir.join("templates");
        Self {
            config,
            wrapper,
            templates_dir,
        }
    }
}

/// Request payload for project creation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    /// Base directory; defaults to the configured project base.
    pub base: Option<Utf8PathBuf>,
    pub movies_glob: String,
    pub mdocs_glob: String,
    pub selected_jobs: Vec<JobKind>,
}

/// Point-in-time view handed to the wire surface.
#[derive(Debug, Clone, Serialize)]
pub struct StateView {
    pub project: Project,
    pub runner_phase: &'static str,
    pub counters: StatusCounters,
}

struct ActiveProject {
    project: Project,
    runner: PipelineRunner,
    watcher: WatcherHandle,
    /// Set once `project_params.json` is the authoritative durable state;
    /// accepted mutations are flushed immediately from then on.
    durable: bool,
}

impl ActiveProject {
    fn spawn_watcher(project: &Project) -> WatcherHandle {
        Watcher::new(
            project.path.clone(),
            project.scheme_name(),
            project.selected(),
        )
        .spawn()
    }

    /// Re-derive record statuses from the processes file. Unreadable file
    /// means the previous statuses stand.
    fn refresh_statuses(&mut self) {
        let path = self.project.path.join(PROCESSES_FILE);
        let table = match std::fs::read_to_string(path.as_std_path()) {
            Ok(raw) => match ProcessTable::parse(&raw) {
                Ok(table) => Some(table),
                Err(_) => return,
            },
            Err(_) => None,
        };
        let statuses = derive_statuses(
            &self.project.selected(),
            &self.project.scheme_name(),
            table.as_ref(),
        );
        for (kind, status) in statuses {
            if let Some(record) = self.project.jobs.get_mut(&kind) {
                record.execution_status = status;
            }
        }
    }

    fn flush(&self) -> Result<(), ServerError> {
        if self.durable {
            self.project.write_snapshot()?;
        }
        Ok(())
    }

    /// Globals freeze while an execution is live: the supervised pipeliner
    /// is active or any job is running on the cluster.
    fn globals_frozen(&self) -> bool {
        self.runner.phase().is_active() || self.project.any_running()
    }

    fn view(&self) -> StateView {
        let statuses = self
            .project
            .jobs
            .iter()
            .map(|(k, r)| (*k, r.execution_status))
            .collect();
        StateView {
            project: self.project.clone(),
            runner_phase: self.runner.phase().as_str(),
            counters: StatusCounters::from_statuses(&statuses),
        }
    }
}

/// In-process owner of the current project.
pub struct ProjectStore {
    ctx: ServerContext,
    inner: Mutex<Option<ActiveProject>>,
}

impl ProjectStore {
    pub fn new(ctx: ServerContext) -> Self {
        Self {
            ctx,
            inner: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    /// Create a project: layout, qsub template, data import, probe-seeded
    /// globals. The project lives in memory only until the first run.
    pub async fn create_project(
        &self,
        request: CreateProjectRequest,
    ) -> Result<StateView, ServerError> {
        let mut guard = self.inner.lock().await;

        let base = request
            .base
            .unwrap_or_else(|| self.ctx.config.local.default_project_base.clone());
        let root = base.join(&request.name);

        let mut project = Project::new(&request.name, root.clone(), &request.selected_jobs)?;
        create_layout(&root)?;

        match self.populate_project(&mut project, &request.movies_glob, &request.mdocs_glob) {
            Ok(()) => {}
            Err(e) => {
                // Creation failed part-way; a retry must not hit `exists`.
                let _ = std::fs::remove_dir_all(root.as_std_path());
                return Err(e);
            }
        }

        info!(name = %project.name, root = %project.path, "project created");
        let active = ActiveProject {
            watcher: ActiveProject::spawn_watcher(&project),
            runner: PipelineRunner::new(project.path.clone(), project.scheme_name()),
            project,
            durable: false,
        };
        let view = active.view();
        *guard = Some(active);
        Ok(view)
    }

    fn populate_project(
        &self,
        project: &mut Project,
        movies_glob: &str,
        mdocs_glob: &str,
    ) -> Result<(), ServerError> {
        write_qsub(
            &project.path,
            &self.ctx.templates_dir,
            &self.ctx.config.slurm_defaults,
        )?;
        let report = import_data(
            &project.path,
            movies_glob,
            mdocs_glob,
            &project.import_prefix(),
        )?;
        info!(
            imported = report.imported.len(),
            movies = report.movies_linked,
            "data import complete"
        );
        self.seed_globals(project, mdocs_glob)?;
        Ok(())
    }

    /// Seed globals from cluster defaults and the metadata probe.
    fn seed_globals(&self, project: &mut Project, mdocs_glob: &str) -> Result<(), ServerError> {
        let slurm = &self.ctx.config.slurm_defaults;
        project.computing.partition = slurm.partition.clone();
        project.computing.nodes = slurm.nodes;
        project.computing.ntasks_per_node = slurm.ntasks_per_node;
        project.computing.cpus_per_task = slurm.cpus_per_task;
        project.computing.gres = slurm.gres.clone();
        project.computing.mem = slurm.mem.clone();
        project.computing.time_budget = slurm.time.clone();

        let report = probe_first(
            mdocs_glob,
            self.ctx.config.metadata_probe.dose_adjustment,
        )?;
        project.microscope.pixel_size_angstrom = report.pixel_spacing_angstrom;
        project.microscope.voltage_kv = report.voltage_kv;
        project.acquisition.dose_per_tilt = report.dose_per_tilt;
        project.acquisition.tilt_axis_deg = report.tilt_axis_deg;
        project.acquisition.detector_width_px = report.image_width_px;
        project.acquisition.detector_height_px = report.image_height_px;
        project.acquisition.eer_fractions = report.eer_fraction_hint;
        Ok(())
    }

    /// Load an existing project from its snapshot and derive statuses from
    /// the processes file.
    pub async fn open_project(&self, path: &Utf8Path) -> Result<StateView, ServerError> {
        let mut guard = self.inner.lock().await;

        if !path.is_dir() {
            return Err(ServerError::NotFound {
                path: path.to_string(),
            });
        }
        let mut project = Project::read_snapshot(path)?;
        // The directory may have been relocated since the snapshot was
        // written; the caller's path wins.
        project.path = path.to_path_buf();

        let mut active = ActiveProject {
            watcher: ActiveProject::spawn_watcher(&project),
            runner: PipelineRunner::new(project.path.clone(), project.scheme_name()),
            project,
            durable: true,
        };
        active.refresh_statuses();
        info!(root = %path, "project opened");
        let view = active.view();
        *guard = Some(active);
        Ok(view)
    }

    /// Current state, statuses refreshed.
    pub async fn current(&self) -> Result<StateView, ServerError> {
        let mut guard = self.inner.lock().await;
        let active = guard.as_mut().ok_or(ServerError::NoProject)?;
        active.refresh_statuses();
        Ok(active.view())
    }

    pub async fn set_global(
        &self,
        field: &str,
        value: ParamValue,
    ) -> Result<StateView, ServerError> {
        let mut guard = self.inner.lock().await;
        let active = guard.as_mut().ok_or(ServerError::NoProject)?;
        active.refresh_statuses();
        if active.globals_frozen() {
            return Err(ServerError::FrozenJob {
                kind: "globals".to_string(),
            });
        }
        let mut globals = active.project.globals();
        globals.set_field(field, &value)?;
        active.project.set_globals(globals);
        active.project.touch();
        active.flush()?;
        Ok(active.view())
    }

    pub async fn set_job_field(
        &self,
        kind: JobKind,
        field: &str,
        value: ParamValue,
    ) -> Result<StateView, ServerError> {
        let mut guard = self.inner.lock().await;
        let active = guard.as_mut().ok_or(ServerError::NoProject)?;
        active.refresh_statuses();
        let record =
            active
                .project
                .jobs
                .get_mut(&kind)
                .ok_or_else(|| ServerError::Validation {
                    field: kind.as_str().to_string(),
                    reason: "job kind is not selected".to_string(),
                })?;
        if record.execution_status.is_frozen() {
            return Err(ServerError::FrozenJob {
                kind: kind.as_str().to_string(),
            });
        }
        record.set(field, value)?;
        active.project.touch();
        active.flush()?;
        Ok(active.view())
    }

    pub async fn select_job(
        &self,
        kind: JobKind,
        position: usize,
    ) -> Result<StateView, ServerError> {
        self.mutate_selection(move |project| project.select_job(kind, position))
            .await
    }

    pub async fn deselect_job(&self, kind: JobKind) -> Result<StateView, ServerError> {
        self.mutate_selection(move |project| project.deselect_job(kind))
            .await
    }

    async fn mutate_selection(
        &self,
        op: impl FnOnce(&mut Project) -> Result<(), crboost_model::ModelError>,
    ) -> Result<StateView, ServerError> {
        let mut guard = self.inner.lock().await;
        let active = guard.as_mut().ok_or(ServerError::NoProject)?;
        active.refresh_statuses();
        if active.runner.phase().is_active() || active.project.any_running() {
            return Err(ServerError::PipelineActive);
        }
        op(&mut active.project)?;
        // The watch task joins against the selection; respawn it.
        active.watcher = ActiveProject::spawn_watcher(&active.project);
        active.flush()?;
        Ok(active.view())
    }

    /// Re-seed every record from kind defaults and re-run the probe over
    /// the project's own imported session files.
    pub async fn reset_to_defaults(&self) -> Result<StateView, ServerError> {
        let mut guard = self.inner.lock().await;
        let active = guard.as_mut().ok_or(ServerError::NoProject)?;
        active.refresh_statuses();
        if active.runner.phase().is_active() || active.project.any_running() {
            return Err(ServerError::PipelineActive);
        }
        active.project.reset_records_to_defaults();
        let mdocs_glob = format!("{}/mdoc/*.mdoc", active.project.path);
        // Project-local data; a probe failure here only means no re-seed.
        let project = &mut active.project;
        if let Err(e) = self.seed_globals(project, &mdocs_glob) {
            warn!(error = %e, "probe re-run failed during reset");
        }
        active.flush()?;
        Ok(active.view())
    }

    /// Apply a named microscope preset to the global records.
    pub async fn apply_preset(&self, name: &str) -> Result<StateView, ServerError> {
        let mut guard = self.inner.lock().await;
        let active = guard.as_mut().ok_or(ServerError::NoProject)?;
        active.refresh_statuses();
        if active.globals_frozen() {
            return Err(ServerError::FrozenJob {
                kind: "globals".to_string(),
            });
        }
        let preset =
            self.ctx
                .config
                .microscopes
                .get(name)
                .ok_or_else(|| ServerError::Validation {
                    field: "preset".to_string(),
                    reason: format!("unknown microscope preset '{name}'"),
                })?;
        active.project.microscope.pixel_size_angstrom = Some(preset.pixel_size_angstrom);
        active.project.microscope.voltage_kv = Some(preset.voltage_kv);
        active.project.microscope.spherical_aberration_mm =
            Some(preset.spherical_aberration_mm);
        active.project.microscope.amplitude_contrast = Some(preset.amplitude_contrast);
        active.project.touch();
        active.flush()?;
        Ok(active.view())
    }

    /// Import additional raw data into the open project (on-the-fly
    /// acquisition keeps producing session files during a run).
    pub async fn import_more(
        &self,
        movies_glob: &str,
        mdocs_glob: &str,
    ) -> Result<StateView, ServerError> {
        let mut guard = self.inner.lock().await;
        let active = guard.as_mut().ok_or(ServerError::NoProject)?;
        let prefix = active.project.import_prefix();
        let report = import_data(&active.project.path, movies_glob, mdocs_glob, &prefix)?;
        info!(
            imported = report.imported.len(),
            skipped = report.skipped.len(),
            "additional data imported"
        );
        Ok(active.view())
    }

    /// Start a run: snapshot, then scheme, then pipeliner, in that order.
    pub async fn start_pipeline(&self) -> Result<u32, ServerError> {
        let mut guard = self.inner.lock().await;
        let active = guard.as_mut().ok_or(ServerError::NoProject)?;
        if active.runner.phase().is_active() {
            return Err(ServerError::PipelineActive);
        }

        // (a) snapshot before scheme,
        active.project.touch();
        active.project.write_snapshot()?;
        active.durable = true;

        // (b) scheme fully written before the pipeliner is spawned,
        let ctx = MaterializeContext {
            config: &self.ctx.config,
            wrapper: &self.ctx.wrapper,
            templates_dir: &self.ctx.templates_dir,
            project_base: active
                .project
                .path
                .parent()
                .unwrap_or(Utf8Path::new("/")),
        };
        materialize_scheme(&active.project, &ctx)?;

        // (c) then the supervised run.
        let command = self.pipeliner_command(&active.project, "--run --verb 2")?;
        let pid = active.runner.start(&command)?;
        Ok(pid)
    }

    /// Wrap a pipeliner invocation the same way job commands are wrapped,
    /// with the project base and the import source directories bound.
    fn pipeliner_command(
        &self,
        project: &Project,
        trailing_args: &str,
    ) -> Result<String, ServerError> {
        let raw = format!(
            "cd {root} && {PIPELINER_BIN} --scheme {scheme} {trailing_args}",
            root = shell_quote_single(project.path.as_str()),
            scheme = project.scheme_name(),
        );
        let Some(tool) = self.ctx.config.tool("relion") else {
            return Err(ServerError::Internal {
                reason: "no relion tool configured for the pipeliner".to_string(),
            });
        };
        let extra_binds: Vec<crboost_command::BindMount> = import_source_dirs(&project.path)
            .into_iter()
            .map(crboost_command::BindMount::same)
            .collect();
        let base = project.path.parent().unwrap_or(Utf8Path::new("/"));
        Ok(self.ctx.wrapper.wrap(
            &raw,
            tool,
            crboost_model::ToolTag::Relion,
            &project.path,
            base,
            &extra_binds,
        ))
    }

    pub async fn abort_pipeline(&self) -> Result<(), ServerError> {
        let mut guard = self.inner.lock().await;
        let active = guard.as_mut().ok_or(ServerError::NoProject)?;
        active.runner.abort().await?;
        active.refresh_statuses();
        Ok(())
    }

    /// Clear the pipeliner's lock directories without touching anything
    /// else.
    pub async fn unlock_pipeline(&self) -> Result<(), ServerError> {
        let guard = self.inner.lock().await;
        let active = guard.as_ref().ok_or(ServerError::NoProject)?;
        active.runner.unlock();
        Ok(())
    }

    /// Reset the scheme head back to its initial node.
    pub async fn reset_head(&self) -> Result<(), ServerError> {
        let mut guard = self.inner.lock().await;
        let active = guard.as_mut().ok_or(ServerError::NoProject)?;
        let command = self.pipeliner_command(&active.project, "--reset")?;
        active.runner.reset(&command).await?;
        active.refresh_statuses();
        Ok(())
    }

    /// Tail of the supervised pipeline log.
    pub async fn log_tail(&self, lines: usize) -> Result<Vec<String>, ServerError> {
        let guard = self.inner.lock().await;
        let active = guard.as_ref().ok_or(ServerError::NoProject)?;
        let path = active.project.path.join("Logs").join("pipeline.log");
        let content = match std::fs::read_to_string(path.as_std_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ServerError::Internal {
                    reason: e.to_string(),
                });
            }
        };
        let all: Vec<&str> = content.lines().collect();
        let start = all.len().saturating_sub(lines);
        Ok(all[start..].iter().map(|s| s.to_string()).collect())
    }

    /// Subscribe to progress events, plus the current state for the first
    /// frame.
    pub async fn subscribe(
        &self,
    ) -> Result<(StateView, broadcast::Receiver<ProgressEvent>), ServerError> {
        let mut guard = self.inner.lock().await;
        let active = guard.as_mut().ok_or(ServerError::NoProject)?;
        active.refresh_statuses();
        Ok((active.view(), active.watcher.subscribe()))
    }
}
