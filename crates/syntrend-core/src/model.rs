use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Kind tag of composite objects with named children.
pub const OBJECT_KIND: &str = "object";
/// Kind tag of lists built from a single `sub_type` definition.
pub const LIST_KIND: &str = "list";
/// Kind tag of unions choosing one alternative per record.
pub const UNION_KIND: &str = "union";

/// Prefix for environment variables overriding [`ModuleConfig`].
pub const ENV_PREFIX: &str = "SYNTREND_";

pub const DEFAULT_FORMAT: &str = "json";
pub const DEFAULT_DIRECTORY: &str = "-";
pub const DEFAULT_FILENAME_FORMAT: &str = "{name}_{id}.{format}";

/// Statistical transform applied to a generated value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DistributionKind {
    #[default]
    None,
    Linear,
    StdDev,
}

/// Full distribution configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PropertyDistribution {
    #[serde(rename = "type", default)]
    pub kind: DistributionKind,
    /// Spread of the `std_dev` distribution, in output units.
    #[serde(default)]
    pub std_dev_factor: f64,
    #[serde(default)]
    pub min_offset: f64,
    #[serde(default = "default_max_offset")]
    pub max_offset: f64,
}

impl Default for PropertyDistribution {
    fn default() -> Self {
        Self {
            kind: DistributionKind::None,
            std_dev_factor: 0.0,
            min_offset: 0.0,
            max_offset: default_max_offset(),
        }
    }
}

fn default_max_offset() -> f64 {
    1.0
}

/// Distribution as written in a project: a bare kind or a full table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum DistributionSpec {
    Kind(DistributionKind),
    Config(PropertyDistribution),
}

impl Default for DistributionSpec {
    fn default() -> Self {
        DistributionSpec::Kind(DistributionKind::None)
    }
}

impl DistributionSpec {
    /// Expand the bare-kind shorthand into a full configuration.
    pub fn resolved(&self) -> PropertyDistribution {
        match self {
            DistributionSpec::Kind(kind) => PropertyDistribution {
                kind: *kind,
                ..PropertyDistribution::default()
            },
            DistributionSpec::Config(config) => config.clone(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.resolved().kind == DistributionKind::None
    }
}

/// One entry of a property's `items` list.
///
/// Mappings carrying a `type` key are nested definitions (union alternatives);
/// anything else is a static choice value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PropertyItem {
    Definition(PropertyDefinition),
    Value(Value),
}

/// Declarative description of one value to generate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PropertyDefinition {
    /// Assigned from the parent's key while loading.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Generator kind tag.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub distribution: DistributionSpec,
    /// Boolean expressions that must all hold for a value to be accepted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    /// Expression deriving the final value from the raw generated one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Value used instead of generation on the first iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<PropertyItem>,
    /// Element definition for `list` properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<Box<PropertyDefinition>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyDefinition>,
    /// Kind-specific keyword configuration.
    #[serde(flatten)]
    pub options: BTreeMap<String, Value>,
}

impl PropertyDefinition {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            kind: kind.into(),
            distribution: DistributionSpec::default(),
            conditions: Vec::new(),
            expression: None,
            start: None,
            items: Vec::new(),
            sub_type: None,
            properties: BTreeMap::new(),
            options: BTreeMap::new(),
        }
    }

    /// Child definitions rendered by this kind, with their path suffix.
    pub fn children(&self) -> Vec<(String, &PropertyDefinition)> {
        match self.kind.as_str() {
            OBJECT_KIND => self
                .properties
                .iter()
                .map(|(name, child)| (format!(".{name}"), child))
                .collect(),
            LIST_KIND => self
                .sub_type
                .iter()
                .map(|child| ("[0]".to_string(), child.as_ref()))
                .collect(),
            UNION_KIND => self
                .definition_items()
                .into_iter()
                .enumerate()
                .map(|(index, child)| (format!("[{index}]"), child))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn definition_items(&self) -> Vec<&PropertyDefinition> {
        self.items
            .iter()
            .filter_map(|item| match item {
                PropertyItem::Definition(definition) => Some(definition),
                PropertyItem::Value(_) => None,
            })
            .collect()
    }

    /// Static choices; nested definitions are rendered back to JSON.
    pub fn item_values(&self) -> Vec<Value> {
        self.items
            .iter()
            .map(|item| match item {
                PropertyItem::Value(value) => value.clone(),
                PropertyItem::Definition(definition) => {
                    serde_json::to_value(definition).unwrap_or(Value::Null)
                }
            })
            .collect()
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.kind.as_str(), OBJECT_KIND | LIST_KIND | UNION_KIND)
    }

    /// Set this node's name and name every descendant after its key or index.
    pub fn assign_names(&mut self, name: &str) {
        self.name = name.to_string();
        for (child_name, child) in self.properties.iter_mut() {
            child.assign_names(child_name);
        }
        if let Some(sub_type) = self.sub_type.as_mut() {
            sub_type.assign_names("0");
        }
        let mut index = 0;
        for item in self.items.iter_mut() {
            if let PropertyItem::Definition(definition) = item {
                definition.assign_names(&index.to_string());
                index += 1;
            }
        }
    }
}

/// Output settings; every field is optional so project defaults can merge in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OutputConfig {
    /// Record format (`json`, `csv`, `sql`, `table`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Target directory; `-` writes to the console.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename_format: Option<String>,
    /// Buffer every record and write them as one document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<bool>,
    /// Number of records to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Child property holding the record timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_field: Option<String>,
    /// Formatter-specific options.
    #[serde(flatten)]
    pub options: BTreeMap<String, Value>,
}

impl OutputConfig {
    /// Return `self` with unset fields taken from `base`.
    pub fn merged_over(&self, base: &OutputConfig) -> OutputConfig {
        let mut options = base.options.clone();
        options.extend(self.options.clone());
        OutputConfig {
            format: self.format.clone().or_else(|| base.format.clone()),
            directory: self.directory.clone().or_else(|| base.directory.clone()),
            filename_format: self
                .filename_format
                .clone()
                .or_else(|| base.filename_format.clone()),
            collection: self.collection.or(base.collection),
            count: self.count.or(base.count),
            time_field: self.time_field.clone().or_else(|| base.time_field.clone()),
            options,
        }
    }

    pub fn format(&self) -> &str {
        self.format.as_deref().unwrap_or(DEFAULT_FORMAT)
    }

    pub fn directory(&self) -> &str {
        self.directory.as_deref().unwrap_or(DEFAULT_DIRECTORY)
    }

    pub fn filename_format(&self) -> &str {
        self.filename_format
            .as_deref()
            .unwrap_or(DEFAULT_FILENAME_FORMAT)
    }

    pub fn is_collection(&self) -> bool {
        self.collection.unwrap_or(false)
    }

    pub fn count(&self) -> u64 {
        self.count.unwrap_or(1)
    }

    pub fn time_field(&self) -> Option<&str> {
        self.time_field.as_deref().filter(|field| !field.is_empty())
    }

    pub fn writes_to_console(&self) -> bool {
        let directory = self.directory();
        directory.is_empty() || directory == DEFAULT_DIRECTORY
    }

    /// String-valued formatter option.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}

/// Top-level entity: a property tree plus its output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ObjectDefinition {
    #[serde(flatten)]
    pub property: PropertyDefinition,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ModuleConfig {
    /// Attempts allowed before a value (or timestamp) is rejected for good.
    #[serde(default = "default_max_generator_retries")]
    pub max_generator_retries: u32,
    /// Records kept per object for lookback.
    #[serde(default = "default_max_historian_buffer")]
    pub max_historian_buffer: usize,
    /// Seed for the run RNG; a random seed is drawn when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Sleep between time-correlated records to follow their timestamps.
    #[serde(default)]
    pub pacing: bool,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            max_generator_retries: default_max_generator_retries(),
            max_historian_buffer: default_max_historian_buffer(),
            seed: None,
            pacing: false,
        }
    }
}

fn default_max_generator_retries() -> u32 {
    20
}

fn default_max_historian_buffer() -> usize {
    20
}

impl ModuleConfig {
    /// Apply `SYNTREND_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply `SYNTREND_*` overrides from an explicit variable list.
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(setting) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match setting.to_ascii_lowercase().as_str() {
                "max_generator_retries" => {
                    self.max_generator_retries = parse_setting(&key, &value)?;
                }
                "max_historian_buffer" => {
                    self.max_historian_buffer = parse_setting(&key, &value)?;
                }
                "seed" => self.seed = Some(parse_setting(&key, &value)?),
                "pacing" => self.pacing = parse_setting(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }
}

fn parse_setting<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| Error::InvalidSetting {
        key: key.to_string(),
        message: err.to_string(),
    })
}

/// A complete project: objects to generate plus shared settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProjectConfig {
    pub objects: BTreeMap<String, ObjectDefinition>,
    /// Output defaults merged into every object.
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub config: ModuleConfig,
}

impl ProjectConfig {
    /// Name every property and merge the project output into each object.
    pub fn prepare(&mut self) {
        for (name, object) in self.objects.iter_mut() {
            object.property.assign_names(name);
            object.output = object.output.merged_over(&self.output);
        }
    }

    pub fn object(&self, name: &str) -> Option<&ObjectDefinition> {
        self.objects.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_merge_prefers_object_values() {
        let base = OutputConfig {
            format: Some("csv".to_string()),
            count: Some(10),
            ..OutputConfig::default()
        };
        let object = OutputConfig {
            count: Some(3),
            ..OutputConfig::default()
        };
        let merged = object.merged_over(&base);
        assert_eq!(merged.format(), "csv");
        assert_eq!(merged.count(), 3);
        assert!(merged.writes_to_console());
    }

    #[test]
    fn env_overrides_replace_module_settings() {
        let mut config = ModuleConfig::default();
        config
            .apply_overrides(vec![
                ("SYNTREND_MAX_GENERATOR_RETRIES".to_string(), "5".to_string()),
                ("SYNTREND_SEED".to_string(), "42".to_string()),
                ("OTHER_SEED".to_string(), "1".to_string()),
            ])
            .expect("apply overrides");
        assert_eq!(config.max_generator_retries, 5);
        assert_eq!(config.max_historian_buffer, 20);
        assert_eq!(config.seed, Some(42));
    }

    #[test]
    fn malformed_env_override_is_rejected() {
        let mut config = ModuleConfig::default();
        let err = config
            .apply_overrides(vec![(
                "SYNTREND_MAX_HISTORIAN_BUFFER".to_string(),
                "many".to_string(),
            )])
            .expect_err("should reject");
        assert!(err.to_string().contains("SYNTREND_MAX_HISTORIAN_BUFFER"));
    }

    #[test]
    fn bare_distribution_kind_expands_with_defaults() {
        let definition: PropertyDefinition =
            serde_json::from_value(serde_json::json!({"type": "integer", "distribution": "linear"}))
                .expect("parse");
        let distribution = definition.distribution.resolved();
        assert_eq!(distribution.kind, DistributionKind::Linear);
        assert_eq!(distribution.min_offset, 0.0);
        assert_eq!(distribution.max_offset, 1.0);
    }

    #[test]
    fn unknown_keys_are_kept_as_kind_options() {
        let definition: PropertyDefinition = serde_json::from_value(serde_json::json!({
            "type": "string",
            "min_length": 3,
            "items": ["a", {"type": "integer"}]
        }))
        .expect("parse");
        assert_eq!(definition.options.get("min_length"), Some(&serde_json::json!(3)));
        assert_eq!(definition.definition_items().len(), 1);
    }
}
