use std::path::Path;

use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::model::ProjectConfig;
use crate::validation::{ValidationReport, validate_project, validate_project_json};

/// Name given to the object of a single-object project file.
pub const SINGLE_OBJECT_NAME: &str = "this";

/// Encodings accepted for project files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// YAML, which also covers JSON documents.
    Yaml,
    Toml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => DocumentFormat::Toml,
            _ => DocumentFormat::Yaml,
        }
    }
}

/// Decode a project document into a JSON value.
pub fn parse_document(text: &str, format: DocumentFormat) -> Result<Value> {
    let document = match format {
        DocumentFormat::Yaml => serde_yaml::from_str(text)?,
        DocumentFormat::Toml => toml::from_str(text)?,
    };
    Ok(document)
}

pub fn read_document(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)?;
    parse_document(&text, DocumentFormat::from_path(path))
}

/// Expand the shorthand forms into a full `{objects, output, config}` document.
///
/// A mapping with `objects` is already a project, a mapping with a top-level
/// `type` is a single object, and any other mapping is an objects map.
pub fn normalize_document(document: Value) -> Result<Value> {
    let Value::Object(map) = document else {
        return Err(Error::InvalidProject(
            "project root must be a mapping".to_string(),
        ));
    };
    if map.contains_key("objects") {
        return Ok(Value::Object(map));
    }
    if map.contains_key("type") {
        let mut objects = Map::new();
        objects.insert(SINGLE_OBJECT_NAME.to_string(), Value::Object(map));
        return Ok(json!({ "objects": objects }));
    }
    Ok(json!({ "objects": map }))
}

/// Read, validate and prepare a project file, applying `SYNTREND_*` overrides.
pub fn load_project_file(path: &Path) -> Result<ProjectConfig> {
    let document = read_document(path)?;
    load_project_with_env(document, std::env::vars())
}

/// Validate and prepare a decoded project document.
pub fn load_project(document: Value) -> Result<ProjectConfig> {
    load_project_with_env(document, Vec::new())
}

pub fn load_project_with_env<I>(document: Value, vars: I) -> Result<ProjectConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    let document = normalize_document(document)?;
    validate_project_json(&document)?.into_result()?;

    let mut project: ProjectConfig = serde_json::from_value(document)?;
    project.config.apply_overrides(vars)?;
    project.prepare();

    validate_project(&project).into_result()?;
    Ok(project)
}

/// Run every check on a document and collect the issues instead of failing
/// on the first stage with errors.
pub fn check_document(document: Value) -> Result<ValidationReport> {
    let document = normalize_document(document)?;
    let mut report = validate_project_json(&document)?;
    if !report.is_ok() {
        return Ok(report);
    }

    let mut project: ProjectConfig = serde_json::from_value(document)?;
    project.prepare();
    report.merge(validate_project(&project));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_object_shorthand_is_named_this() {
        let document = parse_document("type: integer\nexpression: new * 2\n", DocumentFormat::Yaml)
            .expect("yaml");
        let project = load_project(document).expect("project");
        let object = project.object(SINGLE_OBJECT_NAME).expect("object");
        assert_eq!(object.property.kind, "integer");
        assert_eq!(object.property.name, "this");
    }

    #[test]
    fn bare_mapping_is_an_objects_map() {
        let document = json!({"a": {"type": "string"}, "b": {"type": "uuid"}});
        let project = load_project(document).expect("project");
        assert_eq!(project.objects.len(), 2);
    }

    #[test]
    fn project_output_is_merged_into_objects() {
        let document = parse_document(
            r#"
objects:
  reading:
    type: integer
    output:
      count: 4
output:
  format: csv
  count: 10
"#,
            DocumentFormat::Yaml,
        )
        .expect("yaml");
        let project = load_project(document).expect("project");
        let output = &project.objects["reading"].output;
        assert_eq!(output.format(), "csv");
        assert_eq!(output.count(), 4);
    }

    #[test]
    fn toml_projects_are_accepted() {
        let document = parse_document(
            r#"
[objects.user]
type = "object"

[objects.user.properties.id]
type = "uuid"

[config]
max_generator_retries = 3
"#,
            DocumentFormat::Toml,
        )
        .expect("toml");
        let project = load_project(document).expect("project");
        assert_eq!(project.config.max_generator_retries, 3);
        assert_eq!(project.objects["user"].property.properties["id"].name, "id");
    }

    #[test]
    fn env_overrides_are_applied_before_validation() {
        let err = load_project_with_env(
            json!({"type": "integer"}),
            vec![("SYNTREND_MAX_GENERATOR_RETRIES".to_string(), "0".to_string())],
        )
        .expect_err("zero retries");
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn scalar_root_is_rejected() {
        let err = load_project(json!(["a"])).expect_err("not a mapping");
        assert!(matches!(err, Error::InvalidProject(_)));
    }
}
