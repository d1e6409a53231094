use camino::Utf8Path;
use crboost_config::SlurmDefaults;
use std::fs;

use crate::error::ProjectError;

/// Name of the submission script inside `<root>/qsub/`.
pub const QSUB_FILE: &str = "qsub.sh";

/// Copy the qsub template into the project, substituting the cluster
/// defaults.
///
/// Only the defaults placeholders are resolved here. Dispatch-time tokens
/// (`XXXcommandXXX`, `XXXoutfileXXX`, `XXXerrfileXXX`, `XXXnameXXX`) are the
/// pipeliner's own substitution pass and stay untouched.
pub fn write_qsub(
    root: &Utf8Path,
    templates_dir: &Utf8Path,
    slurm: &SlurmDefaults,
) -> Result<(), ProjectError> {
    let template_path = templates_dir.join("qsub").join(QSUB_FILE);
    let template =
        fs::read_to_string(template_path.as_std_path()).map_err(|e| ProjectError::Template {
            path: template_path.to_string(),
            reason: e.to_string(),
        })?;

    let substitutions = [
        ("XXXextra1XXX", slurm.nodes.to_string()),
        ("XXXextra2XXX", slurm.ntasks_per_node.to_string()),
        ("XXXextra3XXX", slurm.partition.clone()),
        ("XXXextra4XXX", slurm.gres.clone()),
        ("XXXextra5XXX", slurm.mem.clone()),
        ("XXXthreadsXXX", slurm.cpus_per_task.to_string()),
    ];
    let mut script = template;
    for (token, value) in substitutions {
        script = script.replace(token, &value);
    }

    let dest = root.join("qsub").join(QSUB_FILE);
    fs::write(dest.as_std_path(), script).map_err(|e| ProjectError::Io {
        path: dest.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}
