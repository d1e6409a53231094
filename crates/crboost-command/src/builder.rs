use camino::Utf8PathBuf;
use crboost_model::{GlobalParams, JobKind, JobRecord, ParamValue, format_float};

use crate::error::CommandError;

/// Paths resolved by the caller before command assembly. Wildcards are
/// project-root-relative; the pipeliner runs with the project root as its
/// working directory.
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: Utf8PathBuf,
    pub movies_wildcard: String,
    pub mdocs_wildcard: String,
    pub server_dir: Utf8PathBuf,
    pub python: Utf8PathBuf,
}

type BuildFn = fn(&GlobalParams, &JobRecord, &ResolvedPaths) -> Result<String, CommandError>;

/// Look up the assembly function for a non-driver kind. Dispatch is a
/// closed table, not a string comparison chain.
fn builder_for(kind: JobKind) -> Option<BuildFn> {
    match kind {
        JobKind::ImportMovies => Some(build_import_movies),
        JobKind::TsCtf => Some(build_ts_ctf),
        JobKind::TsReconstruct => Some(build_ts_reconstruct),
        _ => None,
    }
}

/// Build the raw (unwrapped) invocation for one job kind.
///
/// Driver kinds resolve to their bootstrap; every other kind dispatches to
/// its dedicated assembly function.
pub fn build_command(
    kind: JobKind,
    globals: &GlobalParams,
    record: &JobRecord,
    paths: &ResolvedPaths,
) -> Result<String, CommandError> {
    match builder_for(kind) {
        Some(build) => build(globals, record, paths),
        None => Ok(build_driver(kind, paths)),
    }
}

fn missing(kind: JobKind, field: &str) -> CommandError {
    CommandError::MissingParameter {
        kind: kind.as_str().to_string(),
        field: field.to_string(),
    }
}

fn require_f64(
    value: Option<f64>,
    kind: JobKind,
    field: &str,
) -> Result<f64, CommandError> {
    value.ok_or_else(|| missing(kind, field))
}

fn record_f64(record: &JobRecord, kind: JobKind, field: &str) -> Result<f64, CommandError> {
    record
        .get(field)
        .and_then(ParamValue::as_f64)
        .ok_or_else(|| missing(kind, field))
}

fn record_str<'a>(
    record: &'a JobRecord,
    kind: JobKind,
    field: &str,
) -> Result<&'a str, CommandError> {
    record
        .get(field)
        .and_then(ParamValue::as_str)
        .ok_or_else(|| missing(kind, field))
}

/// Driver kinds get a thin bootstrap; the driver re-reads the project
/// snapshot on the compute node and shapes its own command there.
fn build_driver(kind: JobKind, paths: &ResolvedPaths) -> String {
    format!(
        "{python} {server_dir}/drivers/{kind}.py",
        python = paths.python,
        server_dir = paths.server_dir,
        kind = kind.as_str()
    )
}

fn build_import_movies(
    globals: &GlobalParams,
    record: &JobRecord,
    paths: &ResolvedPaths,
) -> Result<String, CommandError> {
    let kind = JobKind::ImportMovies;
    let angpix = require_f64(
        globals.microscope.pixel_size_angstrom,
        kind,
        "microscope.pixel_size_angstrom",
    )?;
    let voltage = require_f64(globals.microscope.voltage_kv, kind, "microscope.voltage_kv")?;
    let cs = require_f64(
        globals.microscope.spherical_aberration_mm,
        kind,
        "microscope.spherical_aberration_mm",
    )?;
    let q0 = require_f64(
        globals.microscope.amplitude_contrast,
        kind,
        "microscope.amplitude_contrast",
    )?;
    let dose = require_f64(
        globals.acquisition.dose_per_tilt,
        kind,
        "acquisition.dose_per_tilt",
    )?;
    let tilt_axis = require_f64(
        globals.acquisition.tilt_axis_deg,
        kind,
        "acquisition.tilt_axis_deg",
    )?;
    let optics_group = record_str(record, kind, "optics_group")?;

    let mut cmd = format!(
        "relion_python_tomo_import movies --optics-group-name {optics_group} \
         --movies '{movies}' --mdocs '{mdocs}' --angpix {angpix} --kV {voltage} \
         --Cs {cs} --Q0 {q0} --dose {dose} --tilt-axis-angle {tilt_axis}",
        movies = paths.movies_wildcard,
        mdocs = paths.mdocs_wildcard,
        angpix = format_float(angpix),
        voltage = format_float(voltage),
        cs = format_float(cs),
        q0 = format_float(q0),
        dose = format_float(dose),
        tilt_axis = format_float(tilt_axis),
    );
    if globals.acquisition.invert_defocus_hand {
        cmd.push_str(" --invert-defocus-handedness");
    }
    if let Some(gain) = &globals.acquisition.gain_reference {
        cmd.push_str(&format!(" --gain '{gain}'"));
    }
    Ok(cmd)
}

fn build_ts_ctf(
    globals: &GlobalParams,
    record: &JobRecord,
    _paths: &ResolvedPaths,
) -> Result<String, CommandError> {
    let kind = JobKind::TsCtf;
    let voltage = require_f64(globals.microscope.voltage_kv, kind, "microscope.voltage_kv")?;
    let cs = require_f64(
        globals.microscope.spherical_aberration_mm,
        kind,
        "microscope.spherical_aberration_mm",
    )?;
    let q0 = require_f64(
        globals.microscope.amplitude_contrast,
        kind,
        "microscope.amplitude_contrast",
    )?;
    Ok(format!(
        "WarpTools ts_ctf --settings warp_tiltseries.settings \
         --range_low {low} --range_high {high} --defocus_min {dmin} --defocus_max {dmax} \
         --voltage {voltage} --cs {cs} --amplitude {q0}",
        low = format_float(record_f64(record, kind, "range_low_angstrom")?),
        high = format_float(record_f64(record, kind, "range_high_angstrom")?),
        dmin = format_float(record_f64(record, kind, "defocus_min_um")?),
        dmax = format_float(record_f64(record, kind, "defocus_max_um")?),
        voltage = format_float(voltage),
        cs = format_float(cs),
        q0 = format_float(q0),
    ))
}

fn build_ts_reconstruct(
    _globals: &GlobalParams,
    record: &JobRecord,
    _paths: &ResolvedPaths,
) -> Result<String, CommandError> {
    let kind = JobKind::TsReconstruct;
    let mut cmd = format!(
        "WarpTools ts_reconstruct --settings warp_tiltseries.settings \
         --angpix {angpix} --x {x} --y {y} --z {z}",
        angpix = format_float(record_f64(record, kind, "angpix")?),
        x = format_float(record_f64(record, kind, "x_dimension_px")?),
        y = format_float(record_f64(record, kind, "y_dimension_px")?),
        z = format_float(record_f64(record, kind, "z_dimension_px")?),
    );
    if record
        .get("deconvolve")
        .and_then(ParamValue::as_bool)
        .unwrap_or(false)
    {
        cmd.push_str(" --deconv");
    }
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn paths() -> ResolvedPaths {
        ResolvedPaths {
            project_root: Utf8PathBuf::from("/ssd/projects/demo"),
            movies_wildcard: "frames/*.eer".to_string(),
            mdocs_wildcard: "mdoc/*.mdoc".to_string(),
            server_dir: Utf8PathBuf::from("/opt/crboost"),
            python: Utf8PathBuf::from("/opt/crboost/venv/bin/python"),
        }
    }

    fn globals() -> GlobalParams {
        let mut g = GlobalParams::default();
        g.microscope.pixel_size_angstrom = Some(1.35);
        g.microscope.voltage_kv = Some(300.0);
        g.microscope.spherical_aberration_mm = Some(2.7);
        g.microscope.amplitude_contrast = Some(0.07);
        g.acquisition.dose_per_tilt = Some(4.5);
        g.acquisition.tilt_axis_deg = Some(84.7);
        g
    }

    #[test]
    fn import_movies_reads_globals_at_build_time() {
        let record = JobKind::ImportMovies.default_record();
        let cmd =
            build_command(JobKind::ImportMovies, &globals(), &record, &paths()).unwrap();
        assert!(cmd.starts_with("relion_python_tomo_import movies"));
        assert!(cmd.contains("--movies 'frames/*.eer'"));
        assert!(cmd.contains("--mdocs 'mdoc/*.mdoc'"));
        assert!(cmd.contains("--angpix 1.35"));
        assert!(cmd.contains("--kV 300"));
        assert!(cmd.contains("--Cs 2.7"));
        assert!(cmd.contains("--Q0 0.07"));
        assert!(cmd.contains("--dose 4.5"));
        assert!(cmd.contains("--tilt-axis-angle 84.7"));
        assert!(!cmd.contains("--invert-defocus-handedness"));
    }

    #[test]
    fn defocus_hand_flag_is_conditional() {
        let mut g = globals();
        g.acquisition.invert_defocus_hand = true;
        let record = JobKind::ImportMovies.default_record();
        let cmd = build_command(JobKind::ImportMovies, &g, &record, &paths()).unwrap();
        assert!(cmd.contains("--invert-defocus-handedness"));
    }

    #[test]
    fn missing_pixel_size_fails_structured() {
        let mut g = globals();
        g.microscope.pixel_size_angstrom = None;
        let record = JobKind::ImportMovies.default_record();
        match build_command(JobKind::ImportMovies, &g, &record, &paths()) {
            Err(CommandError::MissingParameter { kind, field }) => {
                assert_eq!(kind, "import_movies");
                assert_eq!(field, "microscope.pixel_size_angstrom");
            }
            other => panic!("expected MissingParameter, got {other:?}"),
        }
    }

    #[test]
    fn driver_kinds_get_bootstraps() {
        for kind in JobKind::iter().filter(|k| k.is_driver()) {
            let record = kind.default_record();
            let cmd = build_command(kind, &globals(), &record, &paths()).unwrap();
            assert_eq!(
                cmd,
                format!(
                    "/opt/crboost/venv/bin/python /opt/crboost/drivers/{}.py",
                    kind.as_str()
                )
            );
        }
    }

    #[test]
    fn ts_ctf_mixes_globals_and_record() {
        let record = JobKind::TsCtf.default_record();
        let cmd = build_command(JobKind::TsCtf, &globals(), &record, &paths()).unwrap();
        assert!(cmd.starts_with("WarpTools ts_ctf"));
        assert!(cmd.contains("--range_low 30"));
        assert!(cmd.contains("--range_high 5"));
        assert!(cmd.contains("--voltage 300"));
        assert!(cmd.contains("--amplitude 0.07"));
    }

    #[test]
    fn ts_reconstruct_uses_record_dimensions() {
        let mut record = JobKind::TsReconstruct.default_record();
        let cmd =
            build_command(JobKind::TsReconstruct, &globals(), &record, &paths()).unwrap();
        assert!(cmd.contains("--x 4096"));
        assert!(cmd.contains("--z 2048"));
        assert!(!cmd.contains("--deconv"));

        record.set("deconvolve", ParamValue::Bool(true)).unwrap();
        let cmd =
            build_command(JobKind::TsReconstruct, &globals(), &record, &paths()).unwrap();
        assert!(cmd.ends_with("--deconv"));
    }
}
