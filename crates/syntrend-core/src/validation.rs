use jsonschema::JSONSchema;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::graph::{DependencyError, build_dependency_report, project_dependencies};
use crate::model::{
    DistributionKind, LIST_KIND, OBJECT_KIND, ProjectConfig, PropertyDefinition, UNION_KIND,
};
use crate::schema::project_json_schema;

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
}

/// Structured validation issue with location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub code: String,
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(
        severity: IssueSeverity,
        code: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            code: code.into(),
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Aggregated validation report with errors and warnings.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Returns true when there are no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push_error(&mut self, code: &str, path: impl Into<String>, message: impl Into<String>) {
        self.errors
            .push(ValidationIssue::new(IssueSeverity::Error, code, path, message));
    }

    pub fn push_warning(&mut self, code: &str, path: impl Into<String>, message: impl Into<String>) {
        self.warnings
            .push(ValidationIssue::new(IssueSeverity::Warning, code, path, message));
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Turn a report with errors into [`Error::Validation`].
    pub fn into_result(self) -> Result<ValidationReport> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(Error::Validation(self))
        }
    }
}

/// Validate a normalized project document against the project JSON Schema.
pub fn validate_project_json(document: &Value) -> Result<ValidationReport> {
    let schema = serde_json::to_value(project_json_schema())?;
    let compiled = JSONSchema::compile(&schema)
        .map_err(|err| Error::InvalidProject(format!("project schema does not compile: {err}")))?;

    let mut report = ValidationReport::default();
    if let Err(errors) = compiled.validate(document) {
        for error in errors {
            let path = normalized_json_pointer(&error.instance_path.to_string());
            report.push_error("schema_violation", path, error.to_string());
        }
    }
    Ok(report)
}

/// Check the invariants serde cannot express.
pub fn validate_project(project: &ProjectConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    if project.objects.is_empty() {
        report.push_error("empty_project", "objects", "a project needs at least one object");
    }
    if project.config.max_generator_retries == 0 {
        report.push_error(
            "invalid_setting",
            "config.max_generator_retries",
            "must be at least 1",
        );
    }
    if project.config.max_historian_buffer == 0 {
        report.push_error(
            "invalid_setting",
            "config.max_historian_buffer",
            "must be at least 1",
        );
    }

    for (name, object) in &project.objects {
        if object.output.count() == 0 {
            report.push_error("invalid_output", format!("{name}.output.count"), "must be at least 1");
        }
        if let Some(field) = object.output.time_field() {
            if !object.property.properties.contains_key(field) {
                report.push_warning(
                    "unknown_time_field",
                    format!("{name}.output.time_field"),
                    format!("'{field}' is not a property of '{name}'"),
                );
            }
        }
        validate_property(name, &object.property, &mut report);
    }

    match build_dependency_report(&project_dependencies(project)) {
        Ok(dependencies) => {
            for group in dependencies.cycles {
                report.push_error(
                    "circular_dependency",
                    group.first().cloned().unwrap_or_default(),
                    format!("circular reference between {}", group.join(", ")),
                );
            }
        }
        Err(DependencyError::MissingLeaf(paths)) => {
            for path in paths {
                report.push_error(
                    "missing_dependency",
                    path.clone(),
                    format!("referenced path '{path}' does not exist"),
                );
            }
        }
        Err(err) => report.push_error("dependency_resolution", "objects", err.to_string()),
    }

    report
}

fn validate_property(path: &str, definition: &PropertyDefinition, report: &mut ValidationReport) {
    let distribution = definition.distribution.resolved();
    if distribution.kind != DistributionKind::None && distribution.min_offset > distribution.max_offset {
        report.push_error(
            "invalid_distribution",
            format!("{path}.distribution"),
            format!(
                "min_offset {} is greater than max_offset {}",
                distribution.min_offset, distribution.max_offset
            ),
        );
    }

    match definition.kind.as_str() {
        OBJECT_KIND if definition.properties.is_empty() => {
            report.push_error("empty_object", path, "object properties need at least one child");
        }
        LIST_KIND if definition.sub_type.is_none() => {
            report.push_error("missing_sub_type", path, "list properties need a sub_type");
        }
        UNION_KIND if definition.definition_items().is_empty() => {
            report.push_error("empty_union", path, "union properties need at least one item definition");
        }
        _ => {}
    }

    if definition.is_composite() && definition.start.is_some() {
        report.push_warning(
            "start_on_composite",
            format!("{path}.start"),
            "start replaces every child on the first iteration",
        );
    }

    for (suffix, child) in definition.children() {
        validate_property(&format!("{path}{suffix}"), child, report);
    }
}

fn normalized_json_pointer(pointer: &str) -> String {
    if pointer.is_empty() {
        "/".to_string()
    } else {
        pointer.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(value: Value) -> ProjectConfig {
        let mut project: ProjectConfig = serde_json::from_value(value).expect("project");
        project.prepare();
        project
    }

    #[test]
    fn composite_shape_errors_carry_property_paths() {
        let report = validate_project(&project(serde_json::json!({
            "objects": {
                "reading": {
                    "type": "object",
                    "properties": {
                        "values": {"type": "list"},
                        "kind": {"type": "union"}
                    }
                }
            }
        })));
        let paths: Vec<&str> = report.errors.iter().map(|issue| issue.path.as_str()).collect();
        assert!(paths.contains(&"reading.values"));
        assert!(paths.contains(&"reading.kind"));
    }

    #[test]
    fn reversed_distribution_offsets_are_rejected() {
        let report = validate_project(&project(serde_json::json!({
            "objects": {
                "level": {
                    "type": "integer",
                    "distribution": {"type": "linear", "min_offset": 5, "max_offset": 1}
                }
            }
        })));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, "invalid_distribution");
        assert_eq!(report.errors[0].path, "level.distribution");
    }

    #[test]
    fn dangling_reference_is_a_missing_dependency() {
        let report = validate_project(&project(serde_json::json!({
            "objects": {
                "level": {"type": "integer", "expression": "new + {gauge.value}"}
            }
        })));
        assert_eq!(report.errors[0].code, "missing_dependency");
        assert_eq!(report.errors[0].path, "gauge.value");
    }

    #[test]
    fn unknown_time_field_is_only_a_warning() {
        let report = validate_project(&project(serde_json::json!({
            "objects": {
                "event": {
                    "type": "object",
                    "output": {"time_field": "ts"},
                    "properties": {"value": {"type": "integer"}}
                }
            }
        })));
        assert!(report.is_ok());
        assert_eq!(report.warnings[0].code, "unknown_time_field");
    }

    #[test]
    fn structural_validation_reports_instance_paths() {
        let report = validate_project_json(&serde_json::json!({
            "objects": {"event": {"distribution": "linear"}}
        }))
        .expect("validate");
        assert!(!report.is_ok());
        assert!(report.errors.iter().any(|issue| issue.path.starts_with("/objects")));
    }
}
