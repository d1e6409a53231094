use camino::Utf8PathBuf;
use std::fs;
use thiserror::Error;

use crate::glob::expand_glob;
use crate::session::MdocSession;

/// K3 sensor geometry in physical pixels. A session acquired on a K3 is
/// reported with an EER-fraction hint for the grouping default.
const K3_GEOMETRY: (u32, u32) = (5760, 4092);

/// EER fractions grouped per rendered frame when a K3 signature is seen.
const K3_EER_FRACTION_HINT: u32 = 32;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("No session file matches '{pattern}'")]
    NoMatch { pattern: String },

    #[error("Bad glob pattern '{pattern}': {reason}")]
    BadPattern { pattern: String, reason: String },

    #[error("IO error at {path}: {reason}")]
    Io { path: String, reason: String },
}

/// What the probe could read from a session file. Every field is optional;
/// the probe reports what it found and never fails on missing keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    /// File the values were taken from.
    pub source: Option<Utf8PathBuf>,
    pub pixel_spacing_angstrom: Option<f64>,
    pub voltage_kv: Option<f64>,
    /// Per-tilt dose after the configured adjustment multiplier.
    pub dose_per_tilt: Option<f64>,
    pub tilt_axis_deg: Option<f64>,
    pub image_width_px: Option<u32>,
    pub image_height_px: Option<u32>,
    /// Suggested EER fraction grouping, set when the detector geometry
    /// matches a known camera.
    pub eer_fraction_hint: Option<u32>,
}

/// Probe the first session file matching `pattern`.
///
/// `dose_adjustment` is multiplied into the probed per-tilt exposure dose;
/// it carries a site calibration decision and defaults to 1.5 in the server
/// configuration.
pub fn probe_first(pattern: &str, dose_adjustment: f64) -> Result<ProbeReport, ProbeError> {
    let matches = expand_glob(pattern)?;
    let Some(path) = matches.first() else {
        return Err(ProbeError::NoMatch {
            pattern: pattern.to_string(),
        });
    };
    let content = fs::read_to_string(path.as_std_path()).map_err(|e| ProbeError::Io {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    let mut report = probe_session(&MdocSession::parse(&content), dose_adjustment);
    report.source = Some(path.clone());
    Ok(report)
}

/// Pure derivation from a parsed session.
pub fn probe_session(session: &MdocSession, dose_adjustment: f64) -> ProbeReport {
    let mut report = ProbeReport {
        source: None,
        pixel_spacing_angstrom: session.value_f64("PixelSpacing"),
        voltage_kv: session.value_f64("Voltage"),
        dose_per_tilt: session
            .value_f64("ExposureDose")
            .map(|dose| dose * dose_adjustment),
        tilt_axis_deg: session.tilt_axis_angle(),
        image_width_px: None,
        image_height_px: None,
        eer_fraction_hint: None,
    };
    if let Some((w, h)) = session.image_size() {
        report.image_width_px = Some(w);
        report.image_height_px = Some(h);
        if (w, h) == K3_GEOMETRY || (h, w) == K3_GEOMETRY {
            report.eer_fraction_hint = Some(K3_EER_FRACTION_HINT);
        }
    }
    report
}
