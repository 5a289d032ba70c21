use std::cmp::Ordering;

use chrono::Utc;
use chrono::format::{Item, StrftimeItems};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use super::ExpressionError;
use crate::value::{self, Value, ValueType};

/// Dispatch a builtin function by name.
pub(super) fn call(name: &str, args: &[Value], rng: &mut ChaCha8Rng) -> Result<Value, ExpressionError> {
    match name {
        "abs" => abs(one(name, args)?),
        "min" => extreme(name, args, Ordering::Less),
        "max" => extreme(name, args, Ordering::Greater),
        "round" => round(name, args),
        "int" => convert(one(name, args)?, ValueType::Int),
        "float" => convert(one(name, args)?, ValueType::Float),
        "str" => convert(one(name, args)?, ValueType::Text),
        "bool" => convert(one(name, args)?, ValueType::Bool),
        "len" => len(one(name, args)?),
        "sqrt" => float_fn(name, args, f64::sqrt),
        "sin" => float_fn(name, args, f64::sin),
        "cos" => float_fn(name, args, f64::cos),
        "tan" => float_fn(name, args, f64::tan),
        "degrees" => float_fn(name, args, f64::to_degrees),
        "radians" => float_fn(name, args, f64::to_radians),
        "random" => {
            none(name, args)?;
            Ok(Value::Float(rng.random::<f64>()))
        }
        "randint" => {
            let (low, high) = two(name, args)?;
            let (low, high) = (integer(name, low)?, integer(name, high)?);
            if low > high {
                return Err(eval_error(format!("randint() empty range [{low}, {high}]")));
            }
            Ok(Value::Int(rng.random_range(low..=high)))
        }
        "uniform" => {
            let (low, high) = two(name, args)?;
            let (low, high) = (number(name, low)?, number(name, high)?);
            if !(low.is_finite() && high.is_finite()) || low > high {
                return Err(eval_error(format!("uniform() invalid range [{low}, {high}]")));
            }
            Ok(Value::Float(rng.random_range(low..=high)))
        }
        "choice" => match one(name, args)? {
            Value::List(items) if !items.is_empty() => {
                Ok(items[rng.random_range(0..items.len())].clone())
            }
            other => Err(eval_error(format!(
                "choice() needs a non-empty list, got {} '{other}'",
                other.type_name()
            ))),
        },
        "upper" => text(name, args).map(|text| Value::Text(text.to_uppercase())),
        "lower" => text(name, args).map(|text| Value::Text(text.to_lowercase())),
        "now" => {
            none(name, args)?;
            Ok(Value::DateTime(Utc::now().naive_utc()))
        }
        "to_timestamp" => {
            let input = one(name, args)?;
            input
                .timestamp_seconds()
                .map(Value::Float)
                .ok_or_else(|| eval_error(format!("cannot convert {} '{input}' to a timestamp", input.type_name())))
        }
        "to_datetime" => convert(one(name, args)?, ValueType::DateTime),
        "format_datetime" => {
            let (input, pattern) = two(name, args)?;
            let Value::DateTime(datetime) = input.clone().coerce(ValueType::DateTime).map_err(eval_error)? else {
                return Err(eval_error("format_datetime() needs a date-time"));
            };
            let Value::Text(pattern) = pattern else {
                return Err(eval_error("format_datetime() pattern must be a string"));
            };
            let items: Vec<Item<'_>> = StrftimeItems::new(pattern).collect();
            if items.iter().any(|item| matches!(item, Item::Error)) {
                return Err(eval_error(format!("invalid date-time pattern '{pattern}'")));
            }
            Ok(Value::Text(datetime.format_with_items(items.into_iter()).to_string()))
        }
        _ => Err(ExpressionError::Undefined(name.to_string())),
    }
}

fn eval_error(message: impl Into<String>) -> ExpressionError {
    ExpressionError::Evaluation(message.into())
}

fn none(name: &str, args: &[Value]) -> Result<(), ExpressionError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(eval_error(format!("{name}() takes no arguments, got {}", args.len())))
    }
}

fn one<'v>(name: &str, args: &'v [Value]) -> Result<&'v Value, ExpressionError> {
    match args {
        [arg] => Ok(arg),
        _ => Err(eval_error(format!("{name}() takes one argument, got {}", args.len()))),
    }
}

fn two<'v>(name: &str, args: &'v [Value]) -> Result<(&'v Value, &'v Value), ExpressionError> {
    match args {
        [first, second] => Ok((first, second)),
        _ => Err(eval_error(format!("{name}() takes two arguments, got {}", args.len()))),
    }
}

fn number(name: &str, value: &Value) -> Result<f64, ExpressionError> {
    match value {
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => value
            .as_f64()
            .ok_or_else(|| eval_error(format!("{name}() expects a number"))),
        other => Err(eval_error(format!(
            "{name}() expects a number, got {} '{other}'",
            other.type_name()
        ))),
    }
}

fn integer(name: &str, value: &Value) -> Result<i64, ExpressionError> {
    value.as_i64().ok_or_else(|| {
        eval_error(format!(
            "{name}() expects an integer, got {} '{value}'",
            value.type_name()
        ))
    })
}

fn text<'v>(name: &str, args: &'v [Value]) -> Result<&'v str, ExpressionError> {
    match one(name, args)? {
        Value::Text(text) => Ok(text),
        other => Err(eval_error(format!(
            "{name}() expects a string, got {} '{other}'",
            other.type_name()
        ))),
    }
}

fn convert(value: &Value, target: ValueType) -> Result<Value, ExpressionError> {
    value.clone().coerce(target).map_err(eval_error)
}

fn abs(value: &Value) -> Result<Value, ExpressionError> {
    match value {
        Value::Int(int) => int
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| eval_error("integer overflow in abs()")),
        Value::Float(float) => Ok(Value::Float(float.abs())),
        other => Err(eval_error(format!("bad operand type for abs(): '{}'", other.type_name()))),
    }
}

fn len(value: &Value) -> Result<Value, ExpressionError> {
    let length = match value {
        Value::Text(text) => text.chars().count(),
        Value::List(items) => items.len(),
        Value::Map(map) => map.len(),
        other => {
            return Err(eval_error(format!("'{}' value has no len()", other.type_name())));
        }
    };
    Ok(Value::Int(i64::try_from(length).unwrap_or(i64::MAX)))
}

/// `min`/`max` over the arguments, or over a single list argument.
fn extreme(name: &str, args: &[Value], keep: Ordering) -> Result<Value, ExpressionError> {
    let candidates = match args {
        [Value::List(items)] => items.as_slice(),
        _ => args,
    };
    let mut iter = candidates.iter();
    let mut best = iter
        .next()
        .ok_or_else(|| eval_error(format!("{name}() arg is an empty sequence")))?;
    for candidate in iter {
        let ordering = value::compare(candidate, best).ok_or_else(|| {
            eval_error(format!(
                "{name}() cannot compare '{}' and '{}'",
                candidate.type_name(),
                best.type_name()
            ))
        })?;
        if ordering == keep {
            best = candidate;
        }
    }
    Ok(best.clone())
}

/// Half-to-even rounding; integral without `ndigits`.
fn round(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    let (input, digits) = match args {
        [input] => (input, None),
        [input, digits] => (input, Some(integer(name, digits)?)),
        _ => {
            return Err(eval_error(format!(
                "{name}() takes one or two arguments, got {}",
                args.len()
            )));
        }
    };
    if let (Value::Int(int), _) = (input, digits) {
        return Ok(Value::Int(*int));
    }
    let number = number(name, input)?;
    match digits {
        None => {
            let rounded = number.round_ties_even();
            if !rounded.is_finite() {
                return Err(eval_error(format!("cannot round {number} to an integer")));
            }
            Ok(Value::Int(rounded as i64))
        }
        Some(digits) => {
            let factor = 10f64.powi(i32::try_from(digits).unwrap_or(i32::MAX).min(300));
            Ok(Value::Float((number * factor).round_ties_even() / factor))
        }
    }
}

fn float_fn(name: &str, args: &[Value], apply: fn(f64) -> f64) -> Result<Value, ExpressionError> {
    let input = number(name, one(name, args)?)?;
    Ok(Value::Float(apply(input)))
}
