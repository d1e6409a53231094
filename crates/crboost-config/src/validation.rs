use crate::error::ConfigError;
use crate::model::Config;

impl Config {
    /// Validate configuration values after parse.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !self.local.default_project_base.is_dir() {
            return Err(ConfigError::InvalidValue {
                key: "local.default_project_base".to_string(),
                reason: format!(
                    "'{}' is not an existing directory",
                    self.local.default_project_base
                ),
            });
        }

        if self.local.container_runtime.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "local.container_runtime".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        if self.slurm_defaults.partition.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "slurm_defaults.partition".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        if self.tools.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "tools".to_string(),
                reason: "at least one tool must be configured".to_string(),
            });
        }

        for (name, tool) in &self.tools {
            // Exactly one execution mode per tool.
            if tool.binary == tool.container {
                return Err(ConfigError::AmbiguousToolMode { name: name.clone() });
            }
            if tool.container && !tool.path.is_file() {
                return Err(ConfigError::ContainerImageMissing {
                    name: name.clone(),
                    path: tool.path.to_string(),
                });
            }
        }

        if self.metadata_probe.dose_adjustment <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "metadata_probe.dose_adjustment".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        for preset in self.microscopes.values() {
            if preset.pixel_size_angstrom <= 0.0 || preset.voltage_kv <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    key: "microscopes".to_string(),
                    reason: "preset pixel size and voltage must be positive".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{Config, ConfigError};
    use camino::Utf8Path;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, tools: &str) -> camino::Utf8PathBuf {
        let base = dir.path().join("projects");
        fs::create_dir_all(&base).unwrap();
        let doc = format!(
            r#"
[local]
default_project_base = "{base}"
server_dir = "{server}"

[slurm_defaults]
partition = "emgpu"
mem = "128G"
time = "1-00:00:00"

{tools}
"#,
            base = base.display(),
            server = dir.path().display(),
        );
        let path = dir.path().join("crboost.toml");
        fs::write(&path, doc).unwrap();
        camino::Utf8PathBuf::from_path_buf(path).unwrap()
    }

    fn touch(dir: &TempDir, name: &str) -> String {
        let p = dir.path().join(name);
        fs::write(&p, b"").unwrap();
        p.display().to_string()
    }

    #[test]
    fn load_accepts_valid_document() {
        let dir = TempDir::new().unwrap();
        let img = touch(&dir, "warp.sif");
        let path = write_config(
            &dir,
            &format!("[tools.warp]\nbinary = false\ncontainer = true\npath = \"{img}\"\n"),
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.local.container_runtime, "apptainer");
        assert_eq!(config.metadata_probe.dose_adjustment, 1.5);
        assert!(config.tool("warp").unwrap().is_container());
    }

    #[test]
    fn rejects_tool_with_both_modes() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "[tools.warp]\nbinary = true\ncontainer = true\npath = \"/x\"\n",
        );
        match Config::load(&path) {
            Err(ConfigError::AmbiguousToolMode { name }) => assert_eq!(name, "warp"),
            other => panic!("expected AmbiguousToolMode, got {other:?}"),
        }
    }

    #[test]
    fn rejects_tool_with_neither_mode() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "[tools.warp]\nbinary = false\ncontainer = false\npath = \"/x\"\n",
        );
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::AmbiguousToolMode { .. })
        ));
    }

    #[test]
    fn rejects_missing_container_image() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "[tools.warp]\nbinary = false\ncontainer = true\npath = \"/does/not/exist.sif\"\n",
        );
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::ContainerImageMissing { .. })
        ));
    }

    #[test]
    fn missing_file_is_structured() {
        assert!(matches!(
            Config::load(Utf8Path::new("/no/such/crboost.toml")),
            Err(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn missing_required_key_fails_parse() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crboost.toml");
        fs::write(&path, "[local]\n").unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(path).unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::ParseFailed { .. })
        ));
    }
}
