use camino::{Utf8Path, Utf8PathBuf};
use crboost_mdoc::{append_root_marker, expand_glob, rewrite_subframe_paths, root_marker};
use std::collections::BTreeSet;
use std::fs;
use tracing::info;

use crate::error::ProjectError;

/// Outcome of a data import pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Session files imported this pass.
    pub imported: Vec<String>,
    /// Session files already present from the same source, left untouched.
    pub skipped: Vec<String>,
    /// Movies symlinked into `frames/`.
    pub movies_linked: usize,
}

struct ImportPlan {
    source: Utf8PathBuf,
    dest: Utf8PathBuf,
    content: String,
    movie_basenames: Vec<String>,
}

fn io_err(path: &Utf8Path, e: impl std::fmt::Display) -> ProjectError {
    ProjectError::Io {
        path: path.to_string(),
        reason: e.to_string(),
    }
}

/// Import raw data into a project.
///
/// Every session file matching `mdocs_glob` is rewritten (frame paths get
/// the project prefix), written to `<root>/mdoc/`, and its movies are
/// symlinked under the prefixed name into `<root>/frames/`. A source-path
/// marker is appended to each written file; hitting an already-imported
/// name whose marker points at a *different* source fails the whole import
/// with nothing written. Re-importing the same source is a no-op for that
/// file.
pub fn import_data(
    root: &Utf8Path,
    movies_glob: &str,
    mdocs_glob: &str,
    prefix: &str,
) -> Result<ImportReport, ProjectError> {
    let mdoc_paths = expand_glob(mdocs_glob)?;
    let movies_dir = match movies_glob.rsplit_once('/') {
        Some((dir, _)) => Utf8PathBuf::from(dir),
        None => Utf8PathBuf::from("."),
    };

    let mdoc_dir = root.join("mdoc");
    let frames_dir = root.join("frames");

    // Plan first, then execute: a duplicate anywhere must leave frames/ and
    // mdoc/ completely unchanged.
    let mut report = ImportReport::default();
    let mut plans = Vec::new();
    for source in &mdoc_paths {
        let Some(name) = source.file_name() else {
            continue;
        };
        let dest = mdoc_dir.join(format!("{prefix}{name}"));
        let content = fs::read_to_string(source.as_std_path()).map_err(|e| io_err(source, e))?;

        if dest.exists() {
            let existing = fs::read_to_string(dest.as_std_path()).map_err(|e| io_err(&dest, e))?;
            match root_marker(&existing) {
                Some(recorded) if recorded == source.as_str() => {
                    report.skipped.push(format!("{prefix}{name}"));
                    continue;
                }
                recorded => {
                    return Err(ProjectError::DuplicateImport {
                        name: format!("{prefix}{name}"),
                        existing_root: recorded.unwrap_or_else(|| "<unrecorded>".to_string()),
                        new_root: source.to_string(),
                    });
                }
            }
        }

        let (rewritten, movie_basenames) = rewrite_subframe_paths(&content, prefix);
        // Verify every referenced movie before touching the filesystem.
        for basename in &movie_basenames {
            let movie = movies_dir.join(basename);
            if !movie.is_file() {
                return Err(ProjectError::MovieMissing {
                    path: movie.to_string(),
                });
            }
        }
        plans.push(ImportPlan {
            source: source.clone(),
            dest,
            content: rewritten,
            movie_basenames,
        });
    }

    for plan in plans {
        for basename in &plan.movie_basenames {
            let source = movies_dir.join(basename);
            let link = frames_dir.join(format!("{prefix}{basename}"));
            if link.symlink_metadata().is_ok() {
                continue;
            }
            std::os::unix::fs::symlink(source.as_std_path(), link.as_std_path())
                .map_err(|e| io_err(&link, e))?;
            report.movies_linked += 1;
        }
        let marked = append_root_marker(&plan.content, plan.source.as_str());
        fs::write(plan.dest.as_std_path(), marked).map_err(|e| io_err(&plan.dest, e))?;
        let name = plan.dest.file_name().unwrap_or_default().to_string();
        info!(mdoc = %name, "imported session metadata");
        report.imported.push(name);
    }

    Ok(report)
}

/// Directories the imported data points back to: parents of the symlink
/// targets in `frames/` plus the recorded mdoc source directories. The
/// pipeliner's container needs these bound to resolve the links.
pub fn import_source_dirs(root: &Utf8Path) -> Vec<Utf8PathBuf> {
    let mut dirs = BTreeSet::new();

    if let Ok(entries) = fs::read_dir(root.join("frames").as_std_path()) {
        for entry in entries.flatten() {
            if let Ok(target) = fs::read_link(entry.path()) {
                if let Some(parent) = target.parent() {
                    if let Some(utf8) = Utf8Path::from_path(parent) {
                        dirs.insert(utf8.to_path_buf());
                    }
                }
            }
        }
    }
    if let Ok(entries) = fs::read_dir(root.join("mdoc").as_std_path()) {
        for entry in entries.flatten() {
            if let Ok(content) = fs::read_to_string(entry.path()) {
                if let Some(source) = root_marker(&content) {
                    if let Some(parent) = Utf8Path::new(&source).parent() {
                        dirs.insert(parent.to_path_buf());
                    }
                }
            }
        }
    }

    dirs.into_iter().collect()
}
