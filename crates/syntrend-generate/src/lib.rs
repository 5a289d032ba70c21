//! Generation engine for syntrend.
//!
//! Property definitions from `syntrend-core` are compiled into generator
//! trees, rendered record by record with conditions, distributions and
//! expressions applied, and handed to output formatters.

pub mod distribution;
pub mod errors;
pub mod expression;
pub mod generators;
pub mod historian;
pub mod manager;
pub mod model;
pub mod output;
pub mod property;
pub mod value;

pub use errors::GenerationError;
pub use expression::{CompiledExpression, ExpressionError, compile_expression};
pub use generators::{Generator, GeneratorContext, GeneratorRegistry, RenderContext};
pub use historian::{Historian, HistoryError, Historians};
pub use manager::{MAX_PACING_DELAY, SeriesManager, pacing_delay, run_project};
pub use model::{ObjectReport, SeriesReport};
pub use output::{
    FormatRegistry, Formatter, FormatterLoader, OutputLoader, RecordEncoder, SharedBuffer,
};
pub use property::{PropertyGenerator, RecordScope, get_generator};
pub use value::{Value, ValueType};
