use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::job::ParamValue;

/// Render a float without exponent notation, trimming a trailing `.0`.
pub fn format_float(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Optics parameters of the instrument. Seeded from a config preset and the
/// metadata probe; unset fields fail command assembly rather than emitting
/// placeholder values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Microscope {
    /// Pixel size in Angstrom. Valid range 0.5 to 10.0.
    pub pixel_size_angstrom: Option<f64>,
    /// Acceleration voltage in kV.
    pub voltage_kv: Option<f64>,
    /// Spherical aberration in mm.
    pub spherical_aberration_mm: Option<f64>,
    /// Amplitude contrast, 0 to 1.
    pub amplitude_contrast: Option<f64>,
}

/// Acquisition-session parameters shared by every job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Acquisition {
    /// Electron dose per tilt in e-/A^2, after the configured adjustment.
    pub dose_per_tilt: Option<f64>,
    /// Tilt axis angle in degrees, -180 to 180.
    pub tilt_axis_deg: Option<f64>,
    pub detector_width_px: Option<u32>,
    pub detector_height_px: Option<u32>,
    /// EER fractions grouped per rendered frame.
    pub eer_fractions: Option<u32>,
    pub gain_reference: Option<Utf8PathBuf>,
    /// Invert the defocus handedness downstream tools assume.
    #[serde(default)]
    pub invert_defocus_hand: bool,
}

/// Cluster resource parameters substituted into job submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Computing {
    pub partition: String,
    pub nodes: u32,
    pub ntasks_per_node: u32,
    pub cpus_per_task: u32,
    pub gres: String,
    pub mem: String,
    pub time_budget: String,
}

/// The three grouped global records. Single source of truth for every
/// parameter shared across jobs; job records may not shadow these fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalParams {
    pub microscope: Microscope,
    pub acquisition: Acquisition,
    pub computing: Computing,
}

/// Canonical names of the microscope and acquisition fields. Used to reject
/// shadowing writes into job records.
const GLOBAL_FIELD_NAMES: &[&str] = &[
    "pixel_size_angstrom",
    "voltage_kv",
    "spherical_aberration_mm",
    "amplitude_contrast",
    "dose_per_tilt",
    "tilt_axis_deg",
    "detector_width_px",
    "detector_height_px",
    "eer_fractions",
    "gain_reference",
    "invert_defocus_hand",
];

fn validation(field: &str, reason: impl Into<String>) -> ModelError {
    ModelError::Validation {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn expect_f64(field: &str, value: &ParamValue) -> Result<f64, ModelError> {
    let v = value
        .as_f64()
        .ok_or_else(|| validation(field, "expected a number"))?;
    if !v.is_finite() {
        return Err(validation(field, "must be a finite number"));
    }
    Ok(v)
}

fn expect_count(field: &str, value: &ParamValue) -> Result<u32, ModelError> {
    let v = expect_f64(field, value)?;
    if v < 1.0 || v.fract() != 0.0 || v > f64::from(u32::MAX) {
        return Err(validation(field, "expected a positive integer"));
    }
    Ok(v as u32)
}

fn check_range(field: &str, v: f64, lo: f64, hi: f64) -> Result<f64, ModelError> {
    if v < lo || v > hi {
        return Err(validation(
            field,
            format!("{} is outside the allowed range [{lo}, {hi}]", format_float(v)),
        ));
    }
    Ok(v)
}

impl GlobalParams {
    /// Whether `field` is a canonical microscope/acquisition name. Job
    /// records must never carry these.
    pub fn owns_field(field: &str) -> bool {
        GLOBAL_FIELD_NAMES.contains(&field)
    }

    /// Set one global field addressed as `<group>.<name>`, validating its
    /// range. Unknown names are rejected; state is unchanged on error.
    pub fn set_field(&mut self, field: &str, value: &ParamValue) -> Result<(), ModelError> {
        match field {
            "microscope.pixel_size_angstrom" => {
                let v = expect_f64(field, value)?;
                self.microscope.pixel_size_angstrom = Some(check_range(field, v, 0.5, 10.0)?);
            }
            "microscope.voltage_kv" => {
                let v = expect_f64(field, value)?;
                if v <= 0.0 {
                    return Err(validation(field, "must be positive"));
                }
                self.microscope.voltage_kv = Some(v);
            }
            "microscope.spherical_aberration_mm" => {
                let v = expect_f64(field, value)?;
                if v <= 0.0 {
                    return Err(validation(field, "must be positive"));
                }
                self.microscope.spherical_aberration_mm = Some(v);
            }
            "microscope.amplitude_contrast" => {
                let v = expect_f64(field, value)?;
                self.microscope.amplitude_contrast = Some(check_range(field, v, 0.0, 1.0)?);
            }
            "acquisition.dose_per_tilt" => {
                let v = expect_f64(field, value)?;
                if v < 0.1 {
                    return Err(validation(field, "must be at least 0.1"));
                }
                self.acquisition.dose_per_tilt = Some(v);
            }
            "acquisition.tilt_axis_deg" => {
                let v = expect_f64(field, value)?;
                self.acquisition.tilt_axis_deg = Some(check_range(field, v, -180.0, 180.0)?);
            }
            "acquisition.detector_width_px" => {
                self.acquisition.detector_width_px = Some(expect_count(field, value)?);
            }
            "acquisition.detector_height_px" => {
                self.acquisition.detector_height_px = Some(expect_count(field, value)?);
            }
            "acquisition.eer_fractions" => {
                self.acquisition.eer_fractions = Some(expect_count(field, value)?);
            }
            "acquisition.gain_reference" => {
                let v = value
                    .as_str()
                    .ok_or_else(|| validation(field, "expected a path"))?;
                self.acquisition.gain_reference = if v.is_empty() {
                    None
                } else {
                    Some(Utf8PathBuf::from(v))
                };
            }
            "acquisition.invert_defocus_hand" => {
                self.acquisition.invert_defocus_hand = value
                    .as_bool()
                    .ok_or_else(|| validation(field, "expected a boolean"))?;
            }
            "computing.partition" => {
                let v = value
                    .as_str()
                    .ok_or_else(|| validation(field, "expected a string"))?;
                if v.trim().is_empty() {
                    return Err(validation(field, "must not be empty"));
                }
                self.computing.partition = v.to_string();
            }
            "computing.nodes" => self.computing.nodes = expect_count(field, value)?,
            "computing.ntasks_per_node" => {
                self.computing.ntasks_per_node = expect_count(field, value)?;
            }
            "computing.cpus_per_task" => {
                self.computing.cpus_per_task = expect_count(field, value)?;
            }
            "computing.gres" => {
                self.computing.gres = value
                    .as_str()
                    .ok_or_else(|| validation(field, "expected a string"))?
                    .to_string();
            }
            "computing.mem" => {
                self.computing.mem = value
                    .as_str()
                    .ok_or_else(|| validation(field, "expected a string"))?
                    .to_string();
            }
            "computing.time_budget" => {
                self.computing.time_budget = value
                    .as_str()
                    .ok_or_else(|| validation(field, "expected a string"))?
                    .to_string();
            }
            _ => return Err(validation(field, "unknown parameter")),
        }
        Ok(())
    }

    /// Re-run the range checks against the current values. Used when a
    /// snapshot is read back from disk; enforces the same invariants as
    /// `set_field` so a hand-edited snapshot cannot smuggle in values a
    /// write would have rejected.
    pub fn validate(&self) -> Result<(), ModelError> {
        if let Some(v) = self.microscope.pixel_size_angstrom {
            check_range("microscope.pixel_size_angstrom", v, 0.5, 10.0)?;
        }
        if let Some(v) = self.microscope.voltage_kv {
            if v <= 0.0 {
                return Err(validation("microscope.voltage_kv", "must be positive"));
            }
        }
        if let Some(v) = self.microscope.spherical_aberration_mm {
            if v <= 0.0 {
                return Err(validation(
                    "microscope.spherical_aberration_mm",
                    "must be positive",
                ));
            }
        }
        if let Some(v) = self.microscope.amplitude_contrast {
            check_range("microscope.amplitude_contrast", v, 0.0, 1.0)?;
        }
        if let Some(v) = self.acquisition.dose_per_tilt {
            if v < 0.1 {
                return Err(validation("acquisition.dose_per_tilt", "must be at least 0.1"));
            }
        }
        if let Some(v) = self.acquisition.tilt_axis_deg {
            check_range("acquisition.tilt_axis_deg", v, -180.0, 180.0)?;
        }
        Ok(())
    }
}
