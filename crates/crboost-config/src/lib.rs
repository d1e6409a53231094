//! Process-wide configuration for the CryoBoost server.
//!
//! One TOML document is loaded at startup and validated before the service
//! binds its listen socket. A validation failure is fatal: the server refuses
//! to start rather than run with a half-usable tool table.

mod error;
mod model;
mod validation;

pub use error::ConfigError;
pub use model::{
    AliasPair, ClusterIntegration, Config, LocalConfig, MetadataProbeConfig, MicroscopePreset,
    SlurmDefaults, ToolConfig,
};
