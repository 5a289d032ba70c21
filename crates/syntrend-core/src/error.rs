use thiserror::Error;

use crate::graph::DependencyError;
use crate::validation::ValidationReport;

/// Core error type shared across syntrend crates.
#[derive(Debug, Error)]
pub enum Error {
    /// The project document could not be read or decoded.
    #[error("invalid project: {0}")]
    InvalidProject(String),
    /// The project failed structural or semantic validation.
    #[error("project validation failed with {} error(s)", .0.errors.len())]
    Validation(ValidationReport),
    /// A module setting (file or environment) is malformed.
    #[error("invalid setting {key}: {message}")]
    InvalidSetting { key: String, message: String },
    /// The property dependency graph cannot be ordered.
    #[error(transparent)]
    Dependency(#[from] DependencyError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Convenience alias for results returned by syntrend crates.
pub type Result<T> = std::result::Result<T, Error>;
