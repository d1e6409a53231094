use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

use crate::error::ConfigError;

/// Top-level configuration document.
///
/// Loaded once at startup from a TOML file; see [`Config::load`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub local: LocalConfig,
    pub slurm_defaults: SlurmDefaults,
    #[serde(default)]
    pub cluster_integration: ClusterIntegration,
    /// Tool dispatch table keyed by tool tag (`relion`, `warp`, `pytom`, ...).
    pub tools: BTreeMap<String, ToolConfig>,
    /// Named microscope parameter presets selectable from the UI.
    #[serde(default)]
    pub microscopes: BTreeMap<String, MicroscopePreset>,
    #[serde(default)]
    pub metadata_probe: MetadataProbeConfig,
    /// Pairs mapping scheme-file parameter names to UI labels.
    #[serde(default)]
    pub aliases: Vec<AliasPair>,
}

/// Paths and host-local defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalConfig {
    /// Directory new projects are created under.
    pub default_project_base: Utf8PathBuf,
    /// Convenience default for the UI's movies glob field.
    #[serde(default)]
    pub default_movies_glob: Option<String>,
    /// Convenience default for the UI's mdocs glob field.
    #[serde(default)]
    pub default_mdocs_glob: Option<String>,
    /// Server installation root. Driver bootstraps are addressed as
    /// `<server_dir>/drivers/<kind>.py`; scheme templates live under
    /// `<server_dir>/templates/`.
    pub server_dir: Utf8PathBuf,
    /// Interpreter used by driver bootstraps on the compute nodes.
    #[serde(default = "default_python")]
    pub python: Utf8PathBuf,
    /// Container executor binary.
    #[serde(default = "default_container_runtime")]
    pub container_runtime: String,
}

fn default_python() -> Utf8PathBuf {
    Utf8PathBuf::from("python3")
}

fn default_container_runtime() -> String {
    "apptainer".to_string()
}

/// Cluster defaults substituted into the qsub template at project creation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlurmDefaults {
    pub partition: String,
    #[serde(default)]
    pub constraint: String,
    #[serde(default = "default_one")]
    pub nodes: u32,
    #[serde(default = "default_one")]
    pub ntasks_per_node: u32,
    #[serde(default = "default_cpus")]
    pub cpus_per_task: u32,
    #[serde(default)]
    pub gres: String,
    pub mem: String,
    pub time: String,
}

fn default_one() -> u32 {
    1
}

fn default_cpus() -> u32 {
    8
}

/// Host paths the container wrapper binds so that scheduler client commands
/// keep working inside an image. Each is bound only if it exists.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ClusterIntegration {
    /// Directory holding sbatch/squeue/scancel. Discovered from PATH when
    /// unset.
    #[serde(default)]
    pub slurm_bin_dir: Option<Utf8PathBuf>,
    #[serde(default = "default_slurm_lib_dir")]
    pub slurm_lib_dir: Utf8PathBuf,
    #[serde(default = "default_auth_socket_dir")]
    pub auth_socket_dir: Utf8PathBuf,
}

fn default_slurm_lib_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("/usr/lib64/slurm")
}

fn default_auth_socket_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("/run/munge")
}

impl ClusterIntegration {
    /// Resolve the scheduler client directory: the configured value, else the
    /// parent of `sbatch` on PATH, else `/usr/bin`.
    pub fn resolved_slurm_bin_dir(&self) -> Utf8PathBuf {
        if let Some(dir) = &self.slurm_bin_dir {
            return dir.clone();
        }
        if let Ok(sbatch) = which::which("sbatch") {
            if let Some(parent) = sbatch.parent() {
                if let Some(utf8) = Utf8Path::from_path(parent) {
                    return utf8.to_path_buf();
                }
            }
        }
        Utf8PathBuf::from("/usr/bin")
    }
}

/// One entry of the tool dispatch table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolConfig {
    pub binary: bool,
    pub container: bool,
    /// Path to the binary or the container image, whichever applies.
    pub path: Utf8PathBuf,
}

impl ToolConfig {
    pub fn is_container(&self) -> bool {
        self.container
    }
}

/// Default microscope parameters for one named instrument.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct MicroscopePreset {
    pub pixel_size_angstrom: f64,
    pub voltage_kv: f64,
    pub spherical_aberration_mm: f64,
    pub amplitude_contrast: f64,
}

/// Knobs for the metadata probe.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct MetadataProbeConfig {
    /// Multiplier applied to the probed per-tilt exposure dose. Preserved
    /// from a calibration decision; override per site as needed.
    #[serde(default = "default_dose_adjustment")]
    pub dose_adjustment: f64,
}

fn default_dose_adjustment() -> f64 {
    1.5
}

impl Default for MetadataProbeConfig {
    fn default() -> Self {
        Self {
            dose_adjustment: default_dose_adjustment(),
        }
    }
}

/// Maps a scheme-file parameter name to the label shown in the UI.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AliasPair {
    pub scheme_name: String,
    pub label: String,
}

impl Config {
    /// Load and validate a configuration document.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_string(),
            });
        }
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let config: Config = toml::from_str(&raw).map_err(|e| ConfigError::ParseFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a tool tag in the dispatch table.
    pub fn tool(&self, name: &str) -> Option<&ToolConfig> {
        self.tools.get(name)
    }
}
