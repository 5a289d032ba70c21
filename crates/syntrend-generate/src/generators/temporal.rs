use chrono::{Duration, Local, NaiveDateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::errors::GenerationError;
use crate::generators::{Generator, GeneratorContext, GeneratorRegistry, decode_config};
use crate::value::{Value, ValueType};

/// One signed offset term such as `-2d` or `30M`.
const TIME_OFFSET_PATTERN: &str = r"(-?\d+)\s*([wdHMS])";

pub fn register(registry: &mut GeneratorRegistry) {
    registry.register(
        "datetime",
        json!({"is_utc": true, "time_offset": "0d"}),
        |_, config| {
            let options: DateTimeOptions = decode_config("datetime", config)?;
            Ok(Box::new(DateTimeGenerator {
                is_utc: options.is_utc,
                offset: parse_time_offset(&options.time_offset)?,
            }) as Box<dyn Generator>)
        },
    );
    registry.register(
        "timestamp",
        json!({"is_utc": true, "time_offset": 0}),
        |_, config| {
            let options: TimestampGenerator = decode_config("timestamp", config)?;
            Ok(Box::new(options) as Box<dyn Generator>)
        },
    );
}

/// Parse offsets like `"1w2d"`, `"-90S"` or `"0d"` into a duration.
pub fn parse_time_offset(text: &str) -> Result<Duration, String> {
    let re = Regex::new(TIME_OFFSET_PATTERN).map_err(|err| err.to_string())?;
    let mut total = Duration::zero();
    let mut consumed = 0;
    for caps in re.captures_iter(text) {
        let (Some(whole), Some(amount), Some(unit)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        consumed += whole.as_str().len();
        let amount: i64 = amount
            .as_str()
            .parse()
            .map_err(|_| format!("time_offset amount '{}' is out of range", amount.as_str()))?;
        let seconds_per_unit = match unit.as_str() {
            "w" => 7 * 24 * 3600,
            "d" => 24 * 3600,
            "H" => 3600,
            "M" => 60,
            _ => 1,
        };
        let term = amount
            .checked_mul(seconds_per_unit)
            .and_then(Duration::try_seconds)
            .ok_or_else(|| format!("time_offset '{text}' is out of range"))?;
        total = total
            .checked_add(&term)
            .ok_or_else(|| format!("time_offset '{text}' is out of range"))?;
    }
    let significant = text.chars().filter(|c| !c.is_whitespace()).count();
    if consumed == 0 || consumed < significant {
        return Err(format!(
            "time_offset '{text}' must be a sequence of [-]N[wdHMS] terms"
        ));
    }
    Ok(total)
}

fn now(is_utc: bool) -> NaiveDateTime {
    if is_utc {
        Utc::now().naive_utc()
    } else {
        Local::now().naive_local()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DateTimeOptions {
    is_utc: bool,
    time_offset: String,
}

/// Wall-clock date-time shifted by a fixed offset.
struct DateTimeGenerator {
    is_utc: bool,
    offset: Duration,
}

impl Generator for DateTimeGenerator {
    fn kind(&self) -> &str {
        "datetime"
    }

    fn output_type(&self) -> Option<ValueType> {
        Some(ValueType::DateTime)
    }

    fn generate(&mut self, ctx: &mut GeneratorContext<'_, '_>) -> Result<Value, GenerationError> {
        now(self.is_utc)
            .checked_add_signed(self.offset)
            .map(Value::DateTime)
            .ok_or_else(|| GenerationError::configuration(ctx.path, "time_offset overflows the calendar"))
    }
}

/// Whole epoch seconds plus a fixed offset in seconds.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimestampGenerator {
    is_utc: bool,
    time_offset: i64,
}

impl Generator for TimestampGenerator {
    fn kind(&self) -> &str {
        "timestamp"
    }

    fn output_type(&self) -> Option<ValueType> {
        Some(ValueType::Int)
    }

    fn generate(&mut self, ctx: &mut GeneratorContext<'_, '_>) -> Result<Value, GenerationError> {
        now(self.is_utc)
            .and_utc()
            .timestamp()
            .checked_add(self.time_offset)
            .map(Value::Int)
            .ok_or_else(|| GenerationError::configuration(ctx.path, "time_offset overflows the timestamp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_sum_their_terms() {
        assert_eq!(parse_time_offset("0d"), Ok(Duration::zero()));
        assert_eq!(parse_time_offset("1w2d"), Ok(Duration::days(9)));
        assert_eq!(
            parse_time_offset("-1H 30M"),
            Ok(Duration::minutes(-30))
        );
        assert_eq!(parse_time_offset("-90S"), Ok(Duration::seconds(-90)));
    }

    #[test]
    fn malformed_offsets_are_rejected() {
        assert!(parse_time_offset("").is_err());
        assert!(parse_time_offset("3x").is_err());
        assert!(parse_time_offset("2d tomorrow").is_err());
    }
}
