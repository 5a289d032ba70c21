//! Generator kinds and the registry that builds them.
//!
//! A kind is registered with a default configuration and a factory. The
//! composition engine merges the defaults with the user's options, hands the
//! merged map to the factory and wraps the result in a [`PropertyGenerator`].

pub mod composite;
pub mod names;
pub mod primitives;
pub mod temporal;

use std::collections::BTreeMap;
use std::fmt;

use rand::RngCore;
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;

use syntrend_core::PropertyDefinition;

use crate::errors::GenerationError;
use crate::historian::Historians;
use crate::property::{PropertyGenerator, RecordScope};
use crate::value::{Value, ValueType};

/// Merged keyword configuration of one kind.
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

pub type GeneratorFactory = Box<
    dyn Fn(&PropertyDefinition, &ConfigMap) -> Result<Box<dyn Generator>, String> + Send + Sync,
>;

/// Produces raw values for one property.
pub trait Generator: Send {
    fn kind(&self) -> &str;

    /// Type the rendered value is coerced to, when the kind declares one.
    fn output_type(&self) -> Option<ValueType> {
        None
    }

    /// Kind-specific checks run once the children are built.
    fn validate(&self, _children: &[PropertyGenerator]) -> Result<(), String> {
        Ok(())
    }

    fn generate(&mut self, ctx: &mut GeneratorContext<'_, '_>) -> Result<Value, GenerationError>;
}

/// State shared by every node rendered for the same record.
pub struct RenderContext<'r> {
    pub object: &'r str,
    pub iteration: u64,
    pub rng: &'r mut ChaCha8Rng,
    pub historians: &'r Historians,
    pub scope: &'r mut RecordScope,
    pub max_retries: u32,
}

/// View of one node handed to [`Generator::generate`].
pub struct GeneratorContext<'g, 'r> {
    pub path: &'g str,
    pub definition: &'g PropertyDefinition,
    pub(crate) children: &'g mut [PropertyGenerator],
    pub(crate) child_order: &'g [usize],
    pub(crate) render: &'g mut RenderContext<'r>,
}

impl GeneratorContext<'_, '_> {
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut *self.render.rng
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Child indexes in dependency order.
    pub fn render_order(&self) -> Vec<usize> {
        self.child_order.to_vec()
    }

    pub fn child_name(&self, index: usize) -> Option<&str> {
        self.children.get(index).map(PropertyGenerator::name)
    }

    pub fn render_child(&mut self, index: usize) -> Result<Value, GenerationError> {
        let child = self.children.get_mut(index).ok_or_else(|| {
            GenerationError::configuration(self.path, format!("no child at index {index}"))
        })?;
        child.render(self.render)
    }

    /// Forget the child's value for this iteration so the next render regenerates it.
    pub fn undo_child(&mut self, index: usize) {
        if let Some(child) = self.children.get_mut(index) {
            child.undo();
        }
    }
}

struct RegisteredKind {
    defaults: ConfigMap,
    factory: GeneratorFactory,
}

/// Kind name to default configuration and factory.
#[derive(Default)]
pub struct GeneratorRegistry {
    kinds: BTreeMap<String, RegisteredKind>,
}

impl fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorRegistry")
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl GeneratorRegistry {
    /// Empty registry; tests register only the kinds they need.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        primitives::register(&mut registry);
        temporal::register(&mut registry);
        names::register(&mut registry);
        composite::register(&mut registry);
        registry
    }

    /// Register `kind`, replacing any previous registration.
    pub fn register<F>(&mut self, kind: &str, defaults: serde_json::Value, factory: F)
    where
        F: Fn(&PropertyDefinition, &ConfigMap) -> Result<Box<dyn Generator>, String>
            + Send
            + Sync
            + 'static,
    {
        let defaults = match defaults {
            serde_json::Value::Object(map) => map,
            _ => ConfigMap::new(),
        };
        self.kinds.insert(
            kind.to_string(),
            RegisteredKind {
                defaults,
                factory: Box::new(factory),
            },
        );
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    /// Kind defaults overlaid with the definition's options; user values win.
    pub fn merged_config(&self, definition: &PropertyDefinition) -> Option<ConfigMap> {
        let registered = self.kinds.get(&definition.kind)?;
        let mut config = registered.defaults.clone();
        for (key, value) in &definition.options {
            config.insert(key.clone(), value.clone());
        }
        Some(config)
    }

    pub fn build(
        &self,
        definition: &PropertyDefinition,
        config: &ConfigMap,
    ) -> Result<Box<dyn Generator>, String> {
        let registered = self
            .kinds
            .get(&definition.kind)
            .ok_or_else(|| format!("unknown generator kind '{}'", definition.kind))?;
        (registered.factory)(definition, config)
    }
}

/// Deserialize a merged config into the kind's typed options.
pub fn decode_config<T: DeserializeOwned>(kind: &str, config: &ConfigMap) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::Object(config.clone()))
        .map_err(|err| format!("invalid {kind} options: {err}"))
}

/// Version 4 UUID drawn from the run's RNG so seeded runs repeat.
pub fn random_uuid(rng: &mut impl RngCore) -> uuid::Uuid {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_knows_every_kind() {
        let registry = GeneratorRegistry::with_builtin();
        for kind in [
            "string", "hex", "integer", "float", "boolean", "uuid", "static", "choice",
            "datetime", "timestamp", "name", "first_name", "last_name", "object", "list", "union",
        ] {
            assert!(registry.contains(kind), "missing kind {kind}");
        }
    }

    #[test]
    fn user_options_override_defaults() {
        let registry = GeneratorRegistry::with_builtin();
        let mut definition = PropertyDefinition::new("integer");
        definition
            .options
            .insert("max_offset".into(), serde_json::json!(10));
        let config = registry.merged_config(&definition).expect("known kind");
        assert_eq!(config.get("min_offset"), Some(&serde_json::json!(-500)));
        assert_eq!(config.get("max_offset"), Some(&serde_json::json!(10)));
    }

    #[test]
    fn unknown_options_fail_to_decode() {
        let registry = GeneratorRegistry::with_builtin();
        let mut definition = PropertyDefinition::new("uuid");
        definition
            .options
            .insert("colour".into(), serde_json::json!("blue"));
        let config = registry.merged_config(&definition).expect("known kind");
        let err = registry.build(&definition, &config).err().expect("unknown option");
        assert!(err.contains("colour"), "{err}");
    }

    #[test]
    fn registrations_replace_previous_kinds() {
        let mut registry = GeneratorRegistry::new();
        registry.register("answer", serde_json::json!({"value": 1}), |_, _| {
            Err("first".to_string())
        });
        registry.register("answer", serde_json::json!({}), |_, _| Err("second".to_string()));
        let definition = PropertyDefinition::new("answer");
        let config = registry.merged_config(&definition).expect("registered");
        assert!(config.is_empty());
        assert_eq!(registry.build(&definition, &config).err().as_deref(), Some("second"));
    }
}
