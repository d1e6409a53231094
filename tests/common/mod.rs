//! Shared fixtures for the integration suites.
//!
//! Each test binary pulls in only the helpers it needs.
#![allow(dead_code)]

use camino::Utf8PathBuf;
use crboost_config::{
    ClusterIntegration, Config, LocalConfig, MetadataProbeConfig, SlurmDefaults, ToolConfig,
};
use crboost_server::{ProjectStore, ServerContext};
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

pub const MDOC: &str = r#"PixelSpacing = 1.35
Voltage = 300
ImageSize = 5760 4092

[T = SerialEM: Acquired on Titan Krios 11-Mar-24 10:12:44]
[T =     Tilt axis angle = 84.7, binning = 1  spot = 8]

[ZValue = 0]
TiltAngle = 0.0
ExposureDose = 3.0
SubFramePath = X:\frames\pos1_001.eer

[ZValue = 1]
TiltAngle = 3.0
ExposureDose = 3.0
SubFramePath = X:\frames\pos1_002.eer
"#;

pub struct Fixture {
    /// Keeps the temp tree alive for the fixture's lifetime.
    pub _dir: TempDir,
    pub store: Arc<ProjectStore>,
    pub projects_base: Utf8PathBuf,
    pub session_dir: Utf8PathBuf,
}

impl Fixture {
    pub fn movies_glob(&self) -> String {
        format!("{}/*.eer", self.session_dir)
    }

    pub fn mdocs_glob(&self) -> String {
        format!("{}/*.mdoc", self.session_dir)
    }
}

/// A store over a temp filesystem: session data to import, a projects base,
/// container image stand-ins, and the repo's own `templates/` directory.
pub fn fixture() -> Fixture {
    fixture_with_tool_mode(true)
}

/// Same, but every tool is declared as a host binary, so wrapped commands
/// pass through unchanged and a stub pipeliner on PATH can actually run.
pub fn fixture_with_binary_tools() -> Fixture {
    fixture_with_tool_mode(false)
}

fn fixture_with_tool_mode(containerized: bool) -> Fixture {
    let dir = TempDir::new().unwrap();
    let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

    let projects_base = base.join("projects");
    fs::create_dir_all(projects_base.as_std_path()).unwrap();

    let session_dir = base.join("session");
    fs::create_dir_all(session_dir.as_std_path()).unwrap();
    fs::write(session_dir.join("pos1.mdoc").as_std_path(), MDOC).unwrap();
    for movie in ["pos1_001.eer", "pos1_002.eer"] {
        fs::write(session_dir.join(movie).as_std_path(), b"frames").unwrap();
    }

    let mut tools = BTreeMap::new();
    for (name, image) in [("relion", "relion.sif"), ("warp", "warp.sif")] {
        let path = base.join(image);
        fs::write(path.as_std_path(), b"").unwrap();
        tools.insert(
            name.to_string(),
            ToolConfig {
                binary: !containerized,
                container: containerized,
                path,
            },
        );
    }
    tools.insert(
        "pytom".to_string(),
        ToolConfig {
            binary: true,
            container: false,
            path: base.join("pytom.py"),
        },
    );

    let config = Config {
        local: LocalConfig {
            default_project_base: projects_base.clone(),
            default_movies_glob: None,
            default_mdocs_glob: None,
            // The repo root: templates/ resolves to the shipped set.
            server_dir: Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR")),
            python: Utf8PathBuf::from("/usr/bin/python3"),
            container_runtime: "apptainer".to_string(),
        },
        slurm_defaults: SlurmDefaults {
            partition: "emgpu".to_string(),
            constraint: String::new(),
            nodes: 1,
            ntasks_per_node: 1,
            cpus_per_task: 8,
            gres: "gpu:1".to_string(),
            mem: "64G".to_string(),
            time: "1-00:00:00".to_string(),
        },
        cluster_integration: ClusterIntegration::default(),
        tools,
        microscopes: BTreeMap::new(),
        metadata_probe: MetadataProbeConfig::default(),
        aliases: Vec::new(),
    };

    let store = Arc::new(ProjectStore::new(ServerContext::new(config)));
    Fixture {
        _dir: dir,
        store,
        projects_base,
        session_dir,
    }
}
