use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::ModelError;
use crate::params::GlobalParams;

/// The closed, ordered list of job kinds the pipeline understands.
///
/// Declaration order is pipeline order: a project's selection is always a
/// subsequence of this enumeration. Each kind carries two compile-time
/// properties: the tool it invokes ([`JobKind::tool_tag`]) and whether its
/// command is assembled by the command builder or delegated to a driver
/// bootstrap ([`JobKind::is_driver`]).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    ImportMovies,
    FsMotionAndCtf,
    TsAlignment,
    TsCtf,
    TsReconstruct,
    TemplateMatching,
    ExtractCandidates,
    SubtomoExtraction,
}

/// Identifier bridging job kinds to the config's tool dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolTag {
    Relion,
    Warp,
    Pytom,
}

impl ToolTag {
    /// Key into the `[tools]` config table.
    pub fn as_config_key(self) -> &'static str {
        match self {
            Self::Relion => "relion",
            Self::Warp => "warp",
            Self::Pytom => "pytom",
        }
    }
}

impl JobKind {
    /// The tool this kind invokes.
    pub fn tool_tag(self) -> ToolTag {
        match self {
            Self::ImportMovies => ToolTag::Relion,
            Self::FsMotionAndCtf
            | Self::TsAlignment
            | Self::TsCtf
            | Self::TsReconstruct
            | Self::SubtomoExtraction => ToolTag::Warp,
            Self::TemplateMatching | Self::ExtractCandidates => ToolTag::Pytom,
        }
    }

    /// Whether command assembly is delegated to a driver bootstrap that
    /// re-reads the project snapshot on the compute node.
    pub fn is_driver(self) -> bool {
        !matches!(self, Self::ImportMovies | Self::TsCtf | Self::TsReconstruct)
    }

    /// Stable wire name (`import_movies`, `ts_alignment`, ...).
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Kind-specific default parameter record.
    pub fn default_record(self) -> JobRecord {
        let mut params = BTreeMap::new();
        let mut f = |k: &str, v: ParamValue| {
            params.insert(k.to_string(), v);
        };
        match self {
            Self::ImportMovies => {
                f("optics_group", ParamValue::Text("opticsGroup1".into()));
            }
            Self::FsMotionAndCtf => {
                f("motion_grid", ParamValue::Text("1x1x3".into()));
                f("ctf_grid", ParamValue::Text("2x2x1".into()));
                f("ctf_range_max_angstrom", ParamValue::Float(5.0));
                f("defocus_max_um", ParamValue::Float(8.0));
                f("average_halves", ParamValue::Bool(true));
            }
            Self::TsAlignment => {
                f("alignment_program", ParamValue::Text("AreTomo".into()));
                f("rescale_angpix", ParamValue::Float(10.0));
                f("thickness_nm", ParamValue::Int(270));
            }
            Self::TsCtf => {
                f("range_low_angstrom", ParamValue::Float(30.0));
                f("range_high_angstrom", ParamValue::Float(5.0));
                f("defocus_min_um", ParamValue::Float(0.5));
                f("defocus_max_um", ParamValue::Float(8.0));
            }
            Self::TsReconstruct => {
                f("angpix", ParamValue::Float(10.0));
                f("x_dimension_px", ParamValue::Int(4096));
                f("y_dimension_px", ParamValue::Int(4096));
                f("z_dimension_px", ParamValue::Int(2048));
                f("deconvolve", ParamValue::Bool(false));
            }
            Self::TemplateMatching => {
                f("template_path", ParamValue::Text(String::new()));
                f("mask_path", ParamValue::Text(String::new()));
                f("angular_search_deg", ParamValue::Float(7.0));
                f("score_cutoff", ParamValue::Float(0.3));
            }
            Self::ExtractCandidates => {
                f("max_candidates", ParamValue::Int(1500));
                f("score_cutoff", ParamValue::Float(0.3));
                f("exclusion_radius_px", ParamValue::Int(8));
            }
            Self::SubtomoExtraction => {
                f("box_size_px", ParamValue::Int(128));
                f("output_angpix", ParamValue::Float(4.0));
                f("normalize", ParamValue::Bool(true));
            }
        }
        JobRecord {
            params,
            execution_status: JobStatus::NotScheduled,
        }
    }
}

/// Per-job status derived from the pipeliner's processes file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    NotScheduled,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl JobStatus {
    /// Frozen records reject parameter mutation for the rest of the
    /// execution's lifetime.
    pub fn is_frozen(self) -> bool {
        !matches!(self, Self::NotScheduled | Self::Scheduled)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

/// A loosely typed parameter scalar. Serializes to the plain JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Render the value the way the scheme file expects it: booleans as
    /// Yes/No, floats without exponent, integers plain.
    pub fn to_scheme_string(&self) -> String {
        match self {
            Self::Bool(true) => "Yes".to_string(),
            Self::Bool(false) => "No".to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => crate::params::format_float(*v),
            Self::Text(v) => v.clone(),
        }
    }
}

/// Job-specific knobs for one selected kind, plus its execution status.
///
/// Global microscope/acquisition fields are never stored here; the
/// no-shadowing rule is enforced on every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(flatten)]
    pub params: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub execution_status: JobStatus,
}

impl JobRecord {
    /// Set one job-specific parameter.
    ///
    /// Rejects names owned by the global records (shadowing) and basic
    /// nonsense values for the known numeric knobs. Freeze enforcement is
    /// the store's concern; this type only validates the value itself.
    pub fn set(&mut self, field: &str, value: ParamValue) -> Result<(), ModelError> {
        if GlobalParams::owns_field(field) {
            return Err(ModelError::Validation {
                field: field.to_string(),
                reason: "parameter is owned by the global records".to_string(),
            });
        }
        if field == "execution_status" {
            return Err(ModelError::Validation {
                field: field.to_string(),
                reason: "status is derived, not settable".to_string(),
            });
        }
        if let Some(v) = value.as_f64() {
            if !v.is_finite() {
                return Err(ModelError::Validation {
                    field: field.to_string(),
                    reason: "must be a finite number".to_string(),
                });
            }
            if v < 0.0 && !field.contains("angle") {
                return Err(ModelError::Validation {
                    field: field.to_string(),
                    reason: "must not be negative".to_string(),
                });
            }
        }
        self.params.insert(field.to_string(), value);
        Ok(())
    }

    pub fn get(&self, field: &str) -> Option<&ParamValue> {
        self.params.get(field)
    }
}
