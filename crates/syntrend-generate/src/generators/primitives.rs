use rand::Rng;
use serde::Deserialize;
use serde_json::json;

use crate::errors::GenerationError;
use crate::generators::{
    ConfigMap, Generator, GeneratorContext, GeneratorRegistry, decode_config, random_uuid,
};
use crate::property::PropertyGenerator;
use crate::value::{Value, ValueType};

const DEFAULT_CHARS: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const HEX_CHARS: &str = "0123456789abcdef";

pub fn register(registry: &mut GeneratorRegistry) {
    registry.register(
        "string",
        json!({"chars": DEFAULT_CHARS, "min_length": 6, "max_length": 20}),
        |_, config| StringGenerator::from_config("string", config).map(boxed),
    );
    registry.register(
        "hex",
        json!({"use_upper": false, "min_length": 6, "max_length": 20}),
        |_, config| {
            let options: HexOptions = decode_config("hex", config)?;
            let chars = if options.use_upper {
                HEX_CHARS.to_uppercase()
            } else {
                HEX_CHARS.to_string()
            };
            Ok(boxed(StringGenerator {
                kind: "hex",
                tokens: chars.chars().map(String::from).collect(),
                min_length: options.min_length,
                max_length: options.max_length,
            }))
        },
    );
    registry.register(
        "integer",
        json!({"min_offset": -500, "max_offset": 500}),
        |_, config| {
            let options: IntegerGenerator = decode_config("integer", config)?;
            Ok(boxed(options))
        },
    );
    registry.register(
        "float",
        json!({"min_offset": -500.0, "max_offset": 500.0, "num_decimals": 6}),
        |_, config| {
            let options: FloatGenerator = decode_config("float", config)?;
            Ok(boxed(options))
        },
    );
    registry.register("boolean", json!({}), |_, config| {
        let _: Empty = decode_config("boolean", config)?;
        Ok(boxed(BooleanGenerator))
    });
    registry.register(
        "uuid",
        json!({"use_upper": false, "compact": false}),
        |_, config| {
            let options: UuidGenerator = decode_config("uuid", config)?;
            Ok(boxed(options))
        },
    );
    registry.register("static", json!({}), |_, config| {
        let options: StaticOptions = decode_config("static", config)?;
        Ok(boxed(StaticGenerator {
            value: Value::from_json(&options.value),
        }))
    });
    registry.register("choice", json!({}), |definition, config| {
        let _: Empty = decode_config("choice", config)?;
        let items: Vec<Value> = definition.item_values().iter().map(Value::from_json).collect();
        Ok(boxed(ChoiceGenerator { items }))
    });
}

fn boxed(generator: impl Generator + 'static) -> Box<dyn Generator> {
    Box::new(generator)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Empty {}

/// Character tokens: a string splits into characters, a list keeps each entry whole.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CharSource {
    Text(String),
    Tokens(Vec<serde_json::Value>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StringOptions {
    chars: CharSource,
    min_length: i64,
    max_length: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HexOptions {
    use_upper: bool,
    min_length: i64,
    max_length: i64,
}

/// Random strings assembled from a token alphabet; also backs `hex`.
#[derive(Debug)]
struct StringGenerator {
    kind: &'static str,
    tokens: Vec<String>,
    min_length: i64,
    max_length: i64,
}

impl StringGenerator {
    fn from_config(kind: &'static str, config: &ConfigMap) -> Result<Self, String> {
        let options: StringOptions = decode_config(kind, config)?;
        let tokens = match options.chars {
            CharSource::Text(text) => text.chars().map(String::from).collect(),
            CharSource::Tokens(items) => items
                .iter()
                .map(|item| match item {
                    serde_json::Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect(),
        };
        Ok(Self {
            kind,
            tokens,
            min_length: options.min_length,
            max_length: options.max_length,
        })
    }
}

impl Generator for StringGenerator {
    fn kind(&self) -> &str {
        self.kind
    }

    fn output_type(&self) -> Option<ValueType> {
        Some(ValueType::Text)
    }

    fn validate(&self, _children: &[PropertyGenerator]) -> Result<(), String> {
        if self.tokens.is_empty() {
            return Err("Cannot generate random strings without a list of characters".to_string());
        }
        if self.min_length <= 0 {
            return Err("min_length must be greater than zero".to_string());
        }
        if self.min_length > self.max_length {
            return Err("min_length must be less than or equal to max_length".to_string());
        }
        Ok(())
    }

    fn generate(&mut self, ctx: &mut GeneratorContext<'_, '_>) -> Result<Value, GenerationError> {
        let rng = ctx.rng();
        let length = rng.random_range(self.min_length..=self.max_length);
        let mut text = String::new();
        for _ in 0..length {
            text.push_str(&self.tokens[rng.random_range(0..self.tokens.len())]);
        }
        Ok(Value::Text(text))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IntegerGenerator {
    min_offset: i64,
    max_offset: i64,
}

impl Generator for IntegerGenerator {
    fn kind(&self) -> &str {
        "integer"
    }

    fn output_type(&self) -> Option<ValueType> {
        Some(ValueType::Int)
    }

    fn validate(&self, _children: &[PropertyGenerator]) -> Result<(), String> {
        if self.min_offset > self.max_offset {
            return Err("min_offset must be less than or equal to max_offset".to_string());
        }
        Ok(())
    }

    fn generate(&mut self, ctx: &mut GeneratorContext<'_, '_>) -> Result<Value, GenerationError> {
        Ok(Value::Int(ctx.rng().random_range(self.min_offset..=self.max_offset)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FloatGenerator {
    min_offset: f64,
    max_offset: f64,
    num_decimals: i32,
}

impl Generator for FloatGenerator {
    fn kind(&self) -> &str {
        "float"
    }

    fn output_type(&self) -> Option<ValueType> {
        Some(ValueType::Float)
    }

    fn validate(&self, _children: &[PropertyGenerator]) -> Result<(), String> {
        if !(self.min_offset.is_finite() && self.max_offset.is_finite()) {
            return Err("offsets must be finite numbers".to_string());
        }
        if self.min_offset > self.max_offset {
            return Err("min_offset must be less than or equal to max_offset".to_string());
        }
        if !(0..=15).contains(&self.num_decimals) {
            return Err("num_decimals must be between 0 and 15".to_string());
        }
        Ok(())
    }

    fn generate(&mut self, ctx: &mut GeneratorContext<'_, '_>) -> Result<Value, GenerationError> {
        let range = self.max_offset - self.min_offset;
        let raw = ctx.rng().random::<f64>() * range + self.min_offset;
        let factor = 10f64.powi(self.num_decimals);
        Ok(Value::Float((raw * factor).round() / factor))
    }
}

struct BooleanGenerator;

impl Generator for BooleanGenerator {
    fn kind(&self) -> &str {
        "boolean"
    }

    fn output_type(&self) -> Option<ValueType> {
        Some(ValueType::Bool)
    }

    fn generate(&mut self, ctx: &mut GeneratorContext<'_, '_>) -> Result<Value, GenerationError> {
        Ok(Value::Bool(ctx.rng().random_bool(0.5)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UuidGenerator {
    use_upper: bool,
    compact: bool,
}

impl Generator for UuidGenerator {
    fn kind(&self) -> &str {
        "uuid"
    }

    fn output_type(&self) -> Option<ValueType> {
        Some(ValueType::Text)
    }

    fn generate(&mut self, ctx: &mut GeneratorContext<'_, '_>) -> Result<Value, GenerationError> {
        let uuid = random_uuid(ctx.rng());
        let text = if self.compact {
            uuid.simple().to_string()
        } else {
            uuid.hyphenated().to_string()
        };
        Ok(Value::Text(if self.use_upper {
            text.to_uppercase()
        } else {
            text
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticOptions {
    value: serde_json::Value,
}

struct StaticGenerator {
    value: Value,
}

impl Generator for StaticGenerator {
    fn kind(&self) -> &str {
        "static"
    }

    fn generate(&mut self, _ctx: &mut GeneratorContext<'_, '_>) -> Result<Value, GenerationError> {
        Ok(self.value.clone())
    }
}

struct ChoiceGenerator {
    items: Vec<Value>,
}

impl Generator for ChoiceGenerator {
    fn kind(&self) -> &str {
        "choice"
    }

    fn validate(&self, _children: &[PropertyGenerator]) -> Result<(), String> {
        if self.items.is_empty() {
            return Err("Cannot generate items from an empty list".to_string());
        }
        Ok(())
    }

    fn generate(&mut self, ctx: &mut GeneratorContext<'_, '_>) -> Result<Value, GenerationError> {
        let index = ctx.rng().random_range(0..self.items.len());
        Ok(self.items[index].clone())
    }
}
