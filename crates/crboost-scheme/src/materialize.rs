use camino::{Utf8Path, Utf8PathBuf};
use crboost_command::{ContainerWrapper, ResolvedPaths, build_command};
use crboost_config::Config;
use crboost_model::{JobKind, Project, write_file_atomic};
use crboost_star::{JobStar, SchemeFloats, synthesize_scheme};
use std::fs;
use tracing::debug;

use crate::error::SchemeError;

/// Name of the server-shipped template scheme the job subdirectories are
/// copied from.
pub const TEMPLATE_SCHEME_NAME: &str = "relion_tomo_prep";

/// Everything materialization needs besides the project itself.
#[derive(Debug, Clone, Copy)]
pub struct MaterializeContext<'a> {
    pub config: &'a Config,
    pub wrapper: &'a ContainerWrapper,
    /// The server's `templates/` directory.
    pub templates_dir: &'a Utf8Path,
    pub project_base: &'a Utf8Path,
}

fn io_err(path: &Utf8Path, e: impl std::fmt::Display) -> SchemeError {
    SchemeError::Io {
        path: path.to_string(),
        reason: e.to_string(),
    }
}

/// The project-relative movie wildcard, derived from what was actually
/// imported into `frames/`.
pub fn movies_wildcard(project_root: &Utf8Path) -> String {
    let frames = project_root.join("frames");
    if let Ok(entries) = fs::read_dir(frames.as_std_path()) {
        for entry in entries.flatten() {
            if let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) {
                return format!("frames/*.{ext}");
            }
        }
    }
    "frames/*".to_string()
}

/// Materialize `Schemes/<scheme-name>/` for the project's current selection.
///
/// Per selected kind: copy the template subdirectory, inject the wrapped
/// command into `fn_exe`, clear `other_args`, strip the legacy `paramN_*`
/// aliasing rows, and rewrite template-scheme input references. Then write
/// the synthesized `scheme.star`. Returns the scheme directory path.
pub fn materialize_scheme(
    project: &Project,
    ctx: &MaterializeContext<'_>,
) -> Result<Utf8PathBuf, SchemeError> {
    let scheme_name = project.scheme_name();
    let scheme_dir = project.path.join("Schemes").join(&scheme_name);
    fs::create_dir_all(scheme_dir.as_std_path()).map_err(|e| io_err(&scheme_dir, e))?;

    let paths = ResolvedPaths {
        project_root: project.path.clone(),
        movies_wildcard: movies_wildcard(&project.path),
        mdocs_wildcard: "mdoc/*.mdoc".to_string(),
        server_dir: ctx.config.local.server_dir.clone(),
        python: ctx.config.local.python.clone(),
    };
    let globals = project.globals();

    for (kind, record) in &project.jobs {
        let template_dir = ctx
            .templates_dir
            .join("Schemes")
            .join(TEMPLATE_SCHEME_NAME)
            .join(kind.as_str());
        if !template_dir.is_dir() {
            return Err(SchemeError::MissingTemplate {
                kind: kind.as_str().to_string(),
                path: template_dir.to_string(),
            });
        }
        let job_dir = scheme_dir.join(kind.as_str());
        copy_dir(&template_dir, &job_dir)?;

        let job_star_path = job_dir.join("job.star");
        let raw_star = fs::read_to_string(job_star_path.as_std_path())
            .map_err(|e| io_err(&job_star_path, e))?;
        let mut job_star = JobStar::parse(&raw_star)?;

        let command = build_wrapped_command(*kind, project, &globals, record, &paths, ctx)?;
        debug!(job = kind.as_str(), "materialized command");

        job_star.set_option("fn_exe", &command);
        job_star.set_option("other_args", "");
        job_star.remove_param_aliases();
        job_star.rename_scheme_refs(TEMPLATE_SCHEME_NAME, &scheme_name);

        write_file_atomic(&job_star_path, &job_star.to_star_string())
            .map_err(|e| io_err(&job_star_path, e))?;
    }

    let selected: Vec<&str> = project.selected().iter().map(|k| k.as_str()).collect();
    let scheme_star = synthesize_scheme(&scheme_name, &selected, SchemeFloats::default());
    let scheme_star_path = scheme_dir.join("scheme.star");
    write_file_atomic(&scheme_star_path, &scheme_star.to_star_string())
        .map_err(|e| io_err(&scheme_star_path, e))?;

    Ok(scheme_dir)
}

fn build_wrapped_command(
    kind: JobKind,
    project: &Project,
    globals: &crboost_model::GlobalParams,
    record: &crboost_model::JobRecord,
    paths: &ResolvedPaths,
    ctx: &MaterializeContext<'_>,
) -> Result<String, SchemeError> {
    let raw = build_command(kind, globals, record, paths)?;
    let tag = kind.tool_tag();
    let Some(tool) = ctx.config.tool(tag.as_config_key()) else {
        return Err(SchemeError::Command(
            crboost_command::CommandError::UnknownTool {
                tool: tag.as_config_key().to_string(),
            },
        ));
    };
    Ok(ctx
        .wrapper
        .wrap(&raw, tool, tag, &project.path, ctx.project_base, &[]))
}

/// Copy a template directory's files into the destination, overwriting.
/// Templates are flat; nested directories are not expected and not copied.
fn copy_dir(from: &Utf8Path, to: &Utf8Path) -> Result<(), SchemeError> {
    fs::create_dir_all(to.as_std_path()).map_err(|e| io_err(to, e))?;
    let entries = fs::read_dir(from.as_std_path()).map_err(|e| io_err(from, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(from, e))?;
        let path = entry.path();
        if path.is_file() {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let dest = to.join(name);
            fs::copy(&path, dest.as_std_path()).map_err(|e| io_err(&dest, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crboost_config::{
        ClusterIntegration, LocalConfig, MetadataProbeConfig, SlurmDefaults, ToolConfig,
    };
    use crboost_model::ParamValue;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    const JOB_TEMPLATE: &str = r#"
data_job

_rlnJobTypeLabel    relion.external
_rlnJobIsContinue   0
_rlnJobIsTomo       1

data_joboptions_values

loop_
_rlnJobOptionVariable #1
_rlnJobOptionValue #2
fn_exe    legacy_wrapper.sh
other_args    "--legacy"
in_star    "Schemes/relion_tomo_prep/import_movies/movies.star"
param1_label    angpix
param1_value    XXX
"#;

    struct Fixture {
        _dir: TempDir,
        config: Config,
        templates_dir: Utf8PathBuf,
        project: Project,
        project_base: Utf8PathBuf,
    }

    fn fixture(selected: &[JobKind]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let templates_dir = root.join("templates");
        for kind in selected {
            let job_dir = templates_dir
                .join("Schemes")
                .join(TEMPLATE_SCHEME_NAME)
                .join(kind.as_str());
            fs::create_dir_all(job_dir.as_std_path()).unwrap();
            fs::write(job_dir.join("job.star").as_std_path(), JOB_TEMPLATE).unwrap();
        }

        let warp_image = root.join("warp.sif");
        let relion_image = root.join("relion.sif");
        fs::write(warp_image.as_std_path(), b"").unwrap();
        fs::write(relion_image.as_std_path(), b"").unwrap();

        let project_base = root.join("projects");
        let project_root = project_base.join("demo");
        fs::create_dir_all(project_root.join("frames").as_std_path()).unwrap();
        fs::write(
            project_root.join("frames").join("demo_a.eer").as_std_path(),
            b"",
        )
        .unwrap();

        let mut tools = BTreeMap::new();
        tools.insert(
            "relion".to_string(),
            ToolConfig {
                binary: false,
                container: true,
                path: relion_image,
            },
        );
        tools.insert(
            "warp".to_string(),
            ToolConfig {
                binary: false,
                container: true,
                path: warp_image,
            },
        );
        tools.insert(
            "pytom".to_string(),
            ToolConfig {
                binary: true,
                container: false,
                path: root.join("pytom.py"),
            },
        );

        let config = Config {
            local: LocalConfig {
                default_project_base: project_base.clone(),
                default_movies_glob: None,
                default_mdocs_glob: None,
                server_dir: Utf8PathBuf::from("/opt/crboost"),
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

        let mut project = Project::new("demo", project_root, selected).unwrap();
        let mut globals = project.globals();
        for (field, value) in [
            ("microscope.pixel_size_angstrom", 1.35),
            ("microscope.voltage_kv", 300.0),
            ("microscope.spherical_aberration_mm", 2.7),
            ("microscope.amplitude_contrast", 0.07),
            ("acquisition.dose_per_tilt", 4.5),
            ("acquisition.tilt_axis_deg", 84.7),
        ] {
            globals.set_field(field, &ParamValue::Float(value)).unwrap();
        }
        project.set_globals(globals);

        Fixture {
            _dir: dir,
            config,
            templates_dir,
            project,
            project_base,
        }
    }

    fn wrapper() -> ContainerWrapper {
        ContainerWrapper::with_paths(
            "apptainer",
            "/home/user",
            "/nonexistent/bin",
            "/nonexistent/lib",
            "/nonexistent/munge",
        )
    }

    fn materialize(fixture: &Fixture) -> Utf8PathBuf {
        let wrapper = wrapper();
        let ctx = MaterializeContext {
            config: &fixture.config,
            wrapper: &wrapper,
            templates_dir: &fixture.templates_dir,
            project_base: &fixture.project_base,
        };
        materialize_scheme(&fixture.project, &ctx).unwrap()
    }

    #[test]
    fn scheme_directory_mirrors_selection() {
        let selected = [
            JobKind::ImportMovies,
            JobKind::FsMotionAndCtf,
            JobKind::TsAlignment,
        ];
        let fixture = fixture(&selected);
        let scheme_dir = materialize(&fixture);

        assert!(scheme_dir.join("scheme.star").is_file());
        let mut subdirs: Vec<String> = fs::read_dir(scheme_dir.as_std_path())
            .unwrap()
            .flatten()
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        subdirs.sort();
        assert_eq!(
            subdirs,
            ["fs_motion_and_ctf", "import_movies", "ts_alignment"]
        );
    }

    #[test]
    fn fn_exe_is_wrapped_and_aliases_stripped() {
        let fixture = fixture(&[JobKind::ImportMovies]);
        let scheme_dir = materialize(&fixture);

        let job_star = fs::read_to_string(
            scheme_dir
                .join("import_movies")
                .join("job.star")
                .as_std_path(),
        )
        .unwrap();
        let parsed = JobStar::parse(&job_star).unwrap();

        let fn_exe = parsed.option("fn_exe").unwrap();
        assert!(fn_exe.starts_with("unset APPTAINER_BIND"));
        assert!(fn_exe.contains("apptainer exec --nv"));
        assert!(fn_exe.contains("relion_python_tomo_import movies"));
        assert!(fn_exe.contains("frames/*.eer"));
        assert_eq!(parsed.option("other_args"), Some(""));
        assert!(parsed.option("param1_label").is_none());
        assert!(parsed.option("param1_value").is_none());
        assert_eq!(
            parsed.option("in_star"),
            Some("Schemes/scheme_demo/import_movies/movies.star")
        );
    }

    #[test]
    fn driver_kind_gets_bootstrap_fn_exe() {
        let fixture = fixture(&[JobKind::FsMotionAndCtf]);
        let scheme_dir = materialize(&fixture);
        let job_star = fs::read_to_string(
            scheme_dir
                .join("fs_motion_and_ctf")
                .join("job.star")
                .as_std_path(),
        )
        .unwrap();
        let parsed = JobStar::parse(&job_star).unwrap();
        let fn_exe = parsed.option("fn_exe").unwrap();
        assert!(fn_exe.contains("/usr/bin/python3 /opt/crboost/drivers/fs_motion_and_ctf.py"));
        // Warp is containerized, so the bootstrap is wrapped too.
        assert!(fn_exe.contains("apptainer exec --nv"));
    }

    #[test]
    fn rematerialization_is_byte_identical() {
        let fixture = fixture(&[JobKind::ImportMovies, JobKind::TsCtf]);
        let scheme_dir = materialize(&fixture);

        let read_all = |dir: &Utf8Path| {
            let mut contents = Vec::new();
            for kind in ["import_movies", "ts_ctf"] {
                contents.push(
                    fs::read_to_string(dir.join(kind).join("job.star").as_std_path()).unwrap(),
                );
            }
            contents.push(fs::read_to_string(dir.join("scheme.star").as_std_path()).unwrap());
            contents
        };

        let first = read_all(&scheme_dir);
        let scheme_dir_again = materialize(&fixture);
        assert_eq!(scheme_dir, scheme_dir_again);
        assert_eq!(first, read_all(&scheme_dir_again));
    }

    #[test]
    fn missing_template_is_reported() {
        let mut fixture = fixture(&[JobKind::ImportMovies]);
        fixture.project.select_job(JobKind::SubtomoExtraction, 1).unwrap();
        let wrapper = wrapper();
        let ctx = MaterializeContext {
            config: &fixture.config,
            wrapper: &wrapper,
            templates_dir: &fixture.templates_dir,
            project_base: &fixture.project_base,
        };
        assert!(matches!(
            materialize_scheme(&fixture.project, &ctx),
            Err(SchemeError::MissingTemplate { .. })
        ));
    }

    #[test]
    fn missing_global_aborts_materialization() {
        let mut fixture = fixture(&[JobKind::ImportMovies]);
        fixture.project.microscope.pixel_size_angstrom = None;
        let wrapper = wrapper();
        let ctx = MaterializeContext {
            config: &fixture.config,
            wrapper: &wrapper,
            templates_dir: &fixture.templates_dir,
            project_base: &fixture.project_base,
        };
        assert!(matches!(
            materialize_scheme(&fixture.project, &ctx),
            Err(SchemeError::Command(_))
        ));
    }
}
