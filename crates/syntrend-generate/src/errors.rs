use thiserror::Error;

use syntrend_core::DependencyError;

use crate::historian::HistoryError;
use crate::value::Value;

/// Errors emitted by the generation engine.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Invalid kind, kind option, distribution or composite shape.
    #[error("configuration error at '{path}': {message}")]
    Configuration { path: String, message: String },
    #[error("Missing leaf nodes: {}", .0.join(", "))]
    MissingDependency(Vec<String>),
    #[error("Circular dependency with {}", format_groups(.0))]
    CircularDependency(Vec<Vec<String>>),
    #[error(
        "Generator cannot provide a value that also meets condition requirements at '{path}'. \
         Generated values attempted: [{}]",
        format_values(.attempts)
    )]
    ConditionExhausted { path: String, attempts: Vec<Value> },
    #[error("'{object}' failed to generate an event with a later timestamp after {retries} attempts")]
    NonMonotonicTime { object: String, retries: u32 },
    /// An expression failed to evaluate.
    #[error("expression error in '{property}': {message}")]
    Expression {
        property: String,
        message: String,
        missing_field: Option<String>,
    },
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error("core error: {0}")]
    Core(#[from] syntrend_core::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl GenerationError {
    pub fn configuration(path: impl Into<String>, message: impl Into<String>) -> Self {
        GenerationError::Configuration {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<DependencyError> for GenerationError {
    fn from(err: DependencyError) -> Self {
        match err {
            DependencyError::MissingLeaf(paths) => GenerationError::MissingDependency(paths),
            DependencyError::Circular(groups) => GenerationError::CircularDependency(groups),
            other => GenerationError::Core(other.into()),
        }
    }
}

fn format_groups(groups: &[Vec<String>]) -> String {
    groups
        .iter()
        .map(|group| format!("[{}]", group.join(", ")))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_values(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
