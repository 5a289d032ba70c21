use std::collections::BTreeMap;

use rand::Rng;
use serde::Deserialize;
use serde_json::json;

use syntrend_core::model::{LIST_KIND, OBJECT_KIND, UNION_KIND};

use crate::errors::GenerationError;
use crate::generators::{Generator, GeneratorContext, GeneratorRegistry, decode_config};
use crate::property::PropertyGenerator;
use crate::value::{Value, ValueType};

pub fn register(registry: &mut GeneratorRegistry) {
    registry.register(OBJECT_KIND, json!({}), |_, config| {
        let _: NoOptions = decode_config(OBJECT_KIND, config)?;
        Ok(Box::new(ObjectGenerator) as Box<dyn Generator>)
    });
    registry.register(
        LIST_KIND,
        json!({"min_length": 1, "max_length": 5}),
        |_, config| {
            let options: ListGenerator = decode_config(LIST_KIND, config)?;
            Ok(Box::new(options) as Box<dyn Generator>)
        },
    );
    registry.register(UNION_KIND, json!({}), |_, config| {
        let _: NoOptions = decode_config(UNION_KIND, config)?;
        Ok(Box::new(UnionGenerator) as Box<dyn Generator>)
    });
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoOptions {}

/// Map of child name to rendered child value.
struct ObjectGenerator;

impl Generator for ObjectGenerator {
    fn kind(&self) -> &str {
        OBJECT_KIND
    }

    fn output_type(&self) -> Option<ValueType> {
        Some(ValueType::Map)
    }

    fn validate(&self, children: &[PropertyGenerator]) -> Result<(), String> {
        if children.is_empty() {
            return Err("object properties must declare at least one property".to_string());
        }
        Ok(())
    }

    fn generate(&mut self, ctx: &mut GeneratorContext<'_, '_>) -> Result<Value, GenerationError> {
        let mut record = BTreeMap::new();
        for index in ctx.render_order() {
            let value = ctx.render_child(index)?;
            let name = ctx.child_name(index).unwrap_or_default().to_string();
            record.insert(name, value);
        }
        Ok(Value::Map(record))
    }
}

/// Between `min_length` and `max_length` fresh renders of the `sub_type` child.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListGenerator {
    min_length: i64,
    max_length: i64,
}

impl Generator for ListGenerator {
    fn kind(&self) -> &str {
        LIST_KIND
    }

    fn output_type(&self) -> Option<ValueType> {
        Some(ValueType::List)
    }

    fn validate(&self, children: &[PropertyGenerator]) -> Result<(), String> {
        if children.len() != 1 {
            return Err("list properties need exactly one sub_type".to_string());
        }
        if self.min_length < 0 {
            return Err("min_length must not be negative".to_string());
        }
        if self.min_length > self.max_length {
            return Err("min_length must be less than or equal to max_length".to_string());
        }
        Ok(())
    }

    fn generate(&mut self, ctx: &mut GeneratorContext<'_, '_>) -> Result<Value, GenerationError> {
        let length = ctx.rng().random_range(self.min_length..=self.max_length);
        let mut items = Vec::new();
        for _ in 0..length {
            ctx.undo_child(0);
            items.push(ctx.render_child(0)?);
        }
        Ok(Value::List(items))
    }
}

/// One alternative chosen uniformly per render.
struct UnionGenerator;

impl Generator for UnionGenerator {
    fn kind(&self) -> &str {
        UNION_KIND
    }

    fn validate(&self, children: &[PropertyGenerator]) -> Result<(), String> {
        if children.is_empty() {
            return Err("union properties need at least one alternative in items".to_string());
        }
        Ok(())
    }

    fn generate(&mut self, ctx: &mut GeneratorContext<'_, '_>) -> Result<Value, GenerationError> {
        let count = ctx.child_count();
        let index = ctx.rng().random_range(0..count);
        ctx.render_child(index)
    }
}
