use std::fmt;

use fake::Fake;
use fake::faker::name::{en, pt_br};
use serde::Deserialize;
use serde_json::json;

use crate::errors::GenerationError;
use crate::generators::{Generator, GeneratorContext, GeneratorRegistry, decode_config};
use crate::value::{Value, ValueType};

const DEFAULT_LOCALE: &str = "en_US";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocaleKey {
    EnUs,
    PtBr,
}

impl LocaleKey {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "en_US" => Some(Self::EnUs),
            "pt_BR" => Some(Self::PtBr),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnUs => "en_US",
            Self::PtBr => "pt_BR",
        }
    }
}

impl fmt::Display for LocaleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NamePart {
    Full,
    First,
    Last,
}

impl NamePart {
    fn kind(self) -> &'static str {
        match self {
            NamePart::Full => "name",
            NamePart::First => "first_name",
            NamePart::Last => "last_name",
        }
    }
}

pub fn register(registry: &mut GeneratorRegistry) {
    for part in [NamePart::Full, NamePart::First, NamePart::Last] {
        registry.register(part.kind(), json!({"locale": DEFAULT_LOCALE}), move |_, config| {
            let options: NameOptions = decode_config(part.kind(), config)?;
            let locale = LocaleKey::parse(&options.locale)
                .ok_or_else(|| format!("unsupported name locale '{}'", options.locale))?;
            Ok(Box::new(NameGenerator { part, locale }) as Box<dyn Generator>)
        });
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NameOptions {
    locale: String,
}

/// Person names from the `fake` catalog, drawn from the run's RNG.
struct NameGenerator {
    part: NamePart,
    locale: LocaleKey,
}

impl Generator for NameGenerator {
    fn kind(&self) -> &str {
        self.part.kind()
    }

    fn output_type(&self) -> Option<ValueType> {
        Some(ValueType::Text)
    }

    fn generate(&mut self, ctx: &mut GeneratorContext<'_, '_>) -> Result<Value, GenerationError> {
        let rng = ctx.rng();
        let value: String = match (self.part, self.locale) {
            (NamePart::Full, LocaleKey::EnUs) => en::Name().fake_with_rng(rng),
            (NamePart::First, LocaleKey::EnUs) => en::FirstName().fake_with_rng(rng),
            (NamePart::Last, LocaleKey::EnUs) => en::LastName().fake_with_rng(rng),
            (NamePart::Full, LocaleKey::PtBr) => pt_br::Name().fake_with_rng(rng),
            (NamePart::First, LocaleKey::PtBr) => pt_br::FirstName().fake_with_rng(rng),
            (NamePart::Last, LocaleKey::PtBr) => pt_br::LastName().fake_with_rng(rng),
        };
        Ok(Value::Text(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locales_round_trip_through_their_keys() {
        for key in [LocaleKey::EnUs, LocaleKey::PtBr] {
            assert_eq!(LocaleKey::parse(key.as_str()), Some(key));
        }
        assert_eq!(LocaleKey::parse("xx_YY"), None);
    }

    #[test]
    fn unsupported_locale_fails_at_build() {
        let registry = GeneratorRegistry::with_builtin();
        let mut definition = syntrend_core::PropertyDefinition::new("first_name");
        definition.options.insert("locale".into(), json!("xx_YY"));
        let config = registry.merged_config(&definition).expect("kind");
        let err = registry.build(&definition, &config).err().expect("bad locale");
        assert!(err.contains("xx_YY"));
    }
}
