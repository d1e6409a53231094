use camino::{Utf8Path, Utf8PathBuf};
use crboost_config::{Config, ToolConfig};
use crboost_model::ToolTag;

/// Container-runtime variables a parent container execution leaks to its
/// children. Unset up front so nested launches start clean.
const SCRUBBED_ENV: &[&str] = &[
    "APPTAINER_BIND",
    "APPTAINER_CONTAINER",
    "APPTAINER_ENVIRONMENT",
    "APPTAINER_NAME",
    "SINGULARITY_BIND",
    "SINGULARITY_CONTAINER",
    "SINGULARITY_ENVIRONMENT",
    "SINGULARITY_NAME",
];

/// Locations the RELION image expects on PATH, ahead of the host scheduler
/// client directory.
const RELION_IMAGE_PATH: &str = "/opt/relion/bin:/usr/local/bin:/usr/bin";

/// A `<host>:<container>[:ro]` mapping passed to the container runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: Utf8PathBuf,
    pub target: Option<Utf8PathBuf>,
    pub read_only: bool,
}

impl BindMount {
    pub fn same(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source: path.into(),
            target: None,
            read_only: false,
        }
    }

    pub fn read_only(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        Self {
            source: path.clone(),
            target: Some(path),
            read_only: true,
        }
    }

    fn render(&self) -> String {
        match (&self.target, self.read_only) {
            (None, _) => self.source.to_string(),
            (Some(target), false) => format!("{}:{target}", self.source),
            (Some(target), true) => format!("{}:{target}:ro", self.source),
        }
    }
}

/// Quote a string for safe embedding in single quotes on a shell line.
pub fn shell_quote_single(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Rewrites raw tool commands into container-executor invocations.
///
/// The wrapper only decides *how* a command runs; whether the configured
/// image actually contains the tool is the config loader's concern.
#[derive(Debug, Clone)]
pub struct ContainerWrapper {
    runtime: String,
    home_dir: Utf8PathBuf,
    slurm_bin_dir: Utf8PathBuf,
    slurm_lib_dir: Utf8PathBuf,
    auth_socket_dir: Utf8PathBuf,
}

impl ContainerWrapper {
    pub fn from_config(config: &Config) -> Self {
        let home_dir = dirs::home_dir()
            .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
            .unwrap_or_else(|| Utf8PathBuf::from("/root"));
        Self {
            runtime: config.local.container_runtime.clone(),
            home_dir,
            slurm_bin_dir: config.cluster_integration.resolved_slurm_bin_dir(),
            slurm_lib_dir: config.cluster_integration.slurm_lib_dir.clone(),
            auth_socket_dir: config.cluster_integration.auth_socket_dir.clone(),
        }
    }

    /// Construct with explicit host paths. Used by tests to pin the
    /// conditional-bind decisions.
    pub fn with_paths(
        runtime: impl Into<String>,
        home_dir: impl Into<Utf8PathBuf>,
        slurm_bin_dir: impl Into<Utf8PathBuf>,
        slurm_lib_dir: impl Into<Utf8PathBuf>,
        auth_socket_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            runtime: runtime.into(),
            home_dir: home_dir.into(),
            slurm_bin_dir: slurm_bin_dir.into(),
            slurm_lib_dir: slurm_lib_dir.into(),
            auth_socket_dir: auth_socket_dir.into(),
        }
    }

    pub fn slurm_bin_dir(&self) -> &Utf8Path {
        &self.slurm_bin_dir
    }

    /// Wrap a raw command for the given tool. Binary tools pass through
    /// unchanged; containerized tools become one `exec` line with the bind
    /// policy applied and the inner command passed as a single quoted
    /// string.
    pub fn wrap(
        &self,
        raw: &str,
        tool: &ToolConfig,
        tag: ToolTag,
        project_root: &Utf8Path,
        project_base: &Utf8Path,
        extra_binds: &[BindMount],
    ) -> String {
        if !tool.is_container() {
            return raw.to_string();
        }

        let mut binds: Vec<BindMount> = vec![
            BindMount::same("/tmp"),
            BindMount::same(self.home_dir.clone()),
            BindMount::same(project_root),
            BindMount::same(project_base),
        ];
        // Scheduler integration binds apply only where the host provides
        // them.
        for dir in [&self.slurm_bin_dir, &self.slurm_lib_dir, &self.auth_socket_dir] {
            if dir.exists() {
                binds.push(BindMount::same(dir.clone()));
            }
        }
        for file in ["/etc/passwd", "/etc/group"] {
            if Utf8Path::new(file).exists() {
                binds.push(BindMount::read_only(file));
            }
        }
        binds.extend(extra_binds.iter().cloned());

        let inner = match tag {
            ToolTag::Relion => format!(
                "unset PYTHONPATH PYTHONHOME; export PATH={RELION_IMAGE_PATH}:{}; {raw}",
                self.slurm_bin_dir
            ),
            _ => raw.to_string(),
        };

        let bind_args = binds
            .iter()
            .map(|b| format!("-B {}", b.render()))
            .collect::<Vec<_>>()
            .join(" ");

        format!(
            "unset {scrub}; {runtime} exec --nv {bind_args} {image} bash -c {inner}",
            scrub = SCRUBBED_ENV.join(" "),
            runtime = self.runtime,
            image = tool.path,
            inner = shell_quote_single(&inner),
        )
    }
}
