//! Declarative project model and dependency resolution for syntrend.
//!
//! This crate loads project files into typed definitions, validates them, and
//! orders property references so generation can resolve dependencies first.

pub mod error;
pub mod graph;
pub mod model;
pub mod parse;
pub mod schema;
pub mod validation;

pub use error::{Error, Result};
pub use graph::{
    DependencyError, DependencyMap, DependencyReport, build_dependency_report,
    evaluate_circular_dependencies, iter_property_dependencies, prepare_dependency_tree,
    project_dependencies,
};
pub use model::{
    DistributionKind, DistributionSpec, ModuleConfig, ObjectDefinition, OutputConfig,
    ProjectConfig, PropertyDefinition, PropertyDistribution, PropertyItem,
};
pub use parse::{check_document, load_project, load_project_file, read_document};
pub use schema::project_json_schema;
pub use validation::{IssueSeverity, ValidationIssue, ValidationReport, validate_project};
