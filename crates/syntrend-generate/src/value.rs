use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime};

/// Display and parse format for date-time values.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Runtime value produced by generators and expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// Declared output type of a generator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Null,
    Bool,
    Int,
    Float,
    Text,
    DateTime,
    List,
    Map,
}

impl ValueType {
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Int | ValueType::Float)
    }
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Text(_) => ValueType::Text,
            Value::DateTime(_) => ValueType::DateTime,
            Value::List(_) => ValueType::List,
            Value::Map(_) => ValueType::Map,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "str",
            Value::DateTime(_) => "datetime",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(flag) => Value::Bool(*flag),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(int) => Value::Int(int),
                None => Value::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(text) => Value::Text(text.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(key, value)| (key.clone(), Value::from_json(value)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(flag) => serde_json::Value::Bool(*flag),
            Value::Int(int) => serde_json::Value::from(*int),
            Value::Float(float) => serde_json::Number::from_f64(*float)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(text) => serde_json::Value::String(text.clone()),
            Value::DateTime(datetime) => {
                serde_json::Value::String(datetime.format(DATETIME_FORMAT).to_string())
            }
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(flag) => *flag,
            Value::Int(int) => *int != 0,
            Value::Float(float) => *float != 0.0,
            Value::Text(text) => !text.is_empty(),
            Value::DateTime(_) => true,
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(int) => Some(*int as f64),
            Value::Float(float) => Some(*float),
            Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(int) => Some(*int),
            Value::Bool(flag) => Some(i64::from(*flag)),
            _ => None,
        }
    }

    /// Seconds since the Unix epoch for timestamp-like values.
    pub fn timestamp_seconds(&self) -> Option<f64> {
        match self {
            Value::Int(int) => Some(*int as f64),
            Value::Float(float) if float.is_finite() => Some(*float),
            Value::DateTime(datetime) => {
                let utc = datetime.and_utc();
                Some(utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_nanos()) / 1e9)
            }
            Value::Text(text) => parse_datetime(text).and_then(|dt| Value::DateTime(dt).timestamp_seconds()),
            _ => None,
        }
    }

    /// Convert to `target`, following the usual scalar conversions.
    pub fn coerce(self, target: ValueType) -> Result<Value, String> {
        if self.value_type() == target {
            return Ok(self);
        }
        let failed = |value: &Value| format!("cannot convert {} '{}' to {:?}", value.type_name(), value, target);
        match (target, &self) {
            (ValueType::Int, Value::Float(float)) if float.is_finite() => Ok(Value::Int(float.trunc() as i64)),
            (ValueType::Int, Value::Bool(flag)) => Ok(Value::Int(i64::from(*flag))),
            (ValueType::Int, Value::Text(text)) => text
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .or_else(|_| text.trim().parse::<f64>().map(|f| Value::Int(f.trunc() as i64)))
                .map_err(|_| failed(&self)),
            (ValueType::Int, Value::DateTime(_)) => self
                .timestamp_seconds()
                .map(|seconds| Value::Int(seconds.trunc() as i64))
                .ok_or_else(|| failed(&self)),
            (ValueType::Float, Value::Int(int)) => Ok(Value::Float(*int as f64)),
            (ValueType::Float, Value::Bool(flag)) => Ok(Value::Float(if *flag { 1.0 } else { 0.0 })),
            (ValueType::Float, Value::Text(text)) => {
                text.trim().parse::<f64>().map(Value::Float).map_err(|_| failed(&self))
            }
            (ValueType::Float, Value::DateTime(_)) => {
                self.timestamp_seconds().map(Value::Float).ok_or_else(|| failed(&self))
            }
            (ValueType::Text, _) => Ok(Value::Text(self.to_string())),
            (ValueType::Bool, _) => Ok(Value::Bool(self.is_truthy())),
            (ValueType::DateTime, Value::Int(_) | Value::Float(_)) => self
                .timestamp_seconds()
                .and_then(datetime_from_seconds)
                .map(Value::DateTime)
                .ok_or_else(|| failed(&self)),
            (ValueType::DateTime, Value::Text(text)) => {
                parse_datetime(text).map(Value::DateTime).ok_or_else(|| failed(&self))
            }
            _ => Err(failed(&self)),
        }
    }

    /// Follow a `.field` / `[index]` path below this value.
    pub fn lookup_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path_segments(path)? {
            current = match segment {
                PathSegment::Field(field) => current.field(field)?,
                PathSegment::Index(index) => current.index(index as i64)?,
            };
        }
        Some(current)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(name),
            _ => None,
        }
    }

    /// Element at `index`; negative indexes count from the end.
    pub fn index(&self, index: i64) -> Option<&Value> {
        match self {
            Value::List(items) => {
                let position = if index < 0 {
                    items.len().checked_sub(index.unsigned_abs() as usize)?
                } else {
                    index as usize
                };
                items.get(position)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "None"),
            Value::Bool(flag) => write!(f, "{}", if *flag { "True" } else { "False" }),
            Value::Int(int) => write!(f, "{int}"),
            Value::Float(float) => {
                if float.is_finite() && float.fract() == 0.0 && float.abs() < 1e16 {
                    write!(f, "{float:.1}")
                } else {
                    write!(f, "{float}")
                }
            }
            Value::Text(text) => write!(f, "{text}"),
            Value::DateTime(datetime) => write!(f, "{}", datetime.format(DATETIME_FORMAT)),
            Value::List(_) | Value::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment<'a> {
    Field(&'a str),
    Index(usize),
}

fn path_segments(path: &str) -> Option<Vec<PathSegment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = path;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            let field = &after[..end];
            if field.is_empty() {
                return None;
            }
            segments.push(PathSegment::Field(field));
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after.find(']')?;
            segments.push(PathSegment::Index(after[..end].trim().parse().ok()?));
            rest = &after[end + 1..];
        } else {
            return None;
        }
    }
    Some(segments)
}

pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(text, DATETIME_FORMAT).ok())
        .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").ok())
        .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").ok())
}

pub fn datetime_from_seconds(seconds: f64) -> Option<NaiveDateTime> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos).map(|dt| dt.naive_utc())
}

fn numeric_pair(left: &Value, right: &Value) -> Option<(f64, f64)> {
    match (left, right) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            Some((left.as_f64()?, right.as_f64()?))
        }
        _ => None,
    }
}

fn unsupported(op: &str, left: &Value, right: &Value) -> String {
    format!(
        "unsupported operand types for {op}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    )
}

/// Longest string `*` may build.
pub const MAX_REPEAT_LEN: usize = 1 << 20;

fn overflow(op: &str) -> String {
    format!("integer overflow in {op}")
}

pub fn add(left: &Value, right: &Value) -> Result<Value, String> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.checked_add(*b).map(Value::Int).ok_or_else(|| overflow("+")),
        (Value::Text(a), Value::Text(b)) => Ok(Value::Text(format!("{a}{b}"))),
        (Value::List(a), Value::List(b)) => Ok(Value::List(a.iter().chain(b).cloned().collect())),
        (Value::DateTime(dt), other) | (other, Value::DateTime(dt)) => {
            let seconds = other.as_f64().ok_or_else(|| unsupported("+", left, right))?;
            shift_datetime(dt, seconds).ok_or_else(|| unsupported("+", left, right))
        }
        _ => numeric_pair(left, right)
            .map(|(a, b)| Value::Float(a + b))
            .ok_or_else(|| unsupported("+", left, right)),
    }
}

pub fn sub(left: &Value, right: &Value) -> Result<Value, String> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.checked_sub(*b).map(Value::Int).ok_or_else(|| overflow("-")),
        (Value::DateTime(a), Value::DateTime(b)) => {
            let delta = a.signed_duration_since(*b);
            Ok(Value::Float(delta.num_milliseconds() as f64 / 1000.0))
        }
        (Value::DateTime(dt), other) => {
            let seconds = other.as_f64().ok_or_else(|| unsupported("-", left, right))?;
            shift_datetime(dt, -seconds).ok_or_else(|| unsupported("-", left, right))
        }
        _ => numeric_pair(left, right)
            .map(|(a, b)| Value::Float(a - b))
            .ok_or_else(|| unsupported("-", left, right)),
    }
}

pub fn mul(left: &Value, right: &Value) -> Result<Value, String> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.checked_mul(*b).map(Value::Int).ok_or_else(|| overflow("*")),
        (Value::Text(text), Value::Int(count)) | (Value::Int(count), Value::Text(text)) => {
            let count = usize::try_from((*count).max(0)).map_err(|_| overflow("*"))?;
            match text.len().checked_mul(count) {
                Some(length) if length <= MAX_REPEAT_LEN => Ok(Value::Text(text.repeat(count))),
                _ => Err(format!(
                    "repeated string would exceed {MAX_REPEAT_LEN} bytes"
                )),
            }
        }
        _ => numeric_pair(left, right)
            .map(|(a, b)| Value::Float(a * b))
            .ok_or_else(|| unsupported("*", left, right)),
    }
}

pub fn div(left: &Value, right: &Value) -> Result<Value, String> {
    let (a, b) = numeric_pair(left, right).ok_or_else(|| unsupported("/", left, right))?;
    if b == 0.0 {
        return Err("division by zero".to_string());
    }
    Ok(Value::Float(a / b))
}

pub fn floor_div(left: &Value, right: &Value) -> Result<Value, String> {
    match (left, right) {
        (Value::Int(_), Value::Int(0)) => Err("division by zero".to_string()),
        (Value::Int(a), Value::Int(b)) => {
            let quotient = a.checked_div(*b).ok_or_else(|| overflow("//"))?;
            let floored = (a % b != 0) && ((*a < 0) != (*b < 0));
            Ok(Value::Int(if floored { quotient - 1 } else { quotient }))
        }
        _ => {
            let (a, b) = numeric_pair(left, right).ok_or_else(|| unsupported("//", left, right))?;
            if b == 0.0 {
                return Err("division by zero".to_string());
            }
            Ok(Value::Float((a / b).floor()))
        }
    }
}

pub fn rem(left: &Value, right: &Value) -> Result<Value, String> {
    match (left, right) {
        (Value::Int(_), Value::Int(0)) => Err("modulo by zero".to_string()),
        (Value::Int(a), Value::Int(b)) => {
            let r = a.checked_rem(*b).ok_or_else(|| overflow("%"))?;
            Ok(Value::Int(if r != 0 && (r < 0) != (*b < 0) { r + b } else { r }))
        }
        _ => {
            let (a, b) = numeric_pair(left, right).ok_or_else(|| unsupported("%", left, right))?;
            if b == 0.0 {
                return Err("modulo by zero".to_string());
            }
            Ok(Value::Float(a - b * (a / b).floor()))
        }
    }
}

pub fn pow(left: &Value, right: &Value) -> Result<Value, String> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) if *b >= 0 => {
            let exponent = u32::try_from(*b).map_err(|_| overflow("**"))?;
            a.checked_pow(exponent).map(Value::Int).ok_or_else(|| overflow("**"))
        }
        _ => numeric_pair(left, right)
            .map(|(a, b)| Value::Float(a.powf(b)))
            .ok_or_else(|| unsupported("**", left, right)),
    }
}

pub fn neg(value: &Value) -> Result<Value, String> {
    match value {
        Value::Int(int) => int.checked_neg().map(Value::Int).ok_or_else(|| overflow("-")),
        Value::Float(float) => Ok(Value::Float(-float)),
        other => Err(format!("bad operand type for unary -: '{}'", other.type_name())),
    }
}

/// Concatenate the display forms of two values.
pub fn concat(left: &Value, right: &Value) -> Value {
    Value::Text(format!("{left}{right}"))
}

/// Equality with numeric cross-type comparison.
pub fn equals(left: &Value, right: &Value) -> bool {
    match numeric_pair(left, right) {
        Some((a, b)) => a == b,
        None => left == right,
    }
}

/// Ordering for comparable pairs; `None` when the types do not order.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    if let Some((a, b)) = numeric_pair(left, right) {
        return a.partial_cmp(&b);
    }
    match (left, right) {
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
        (Value::List(a), Value::List(b)) => {
            for (x, y) in a.iter().zip(b) {
                match compare(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => None,
    }
}

/// Membership test backing the `in` operator.
pub fn contains(container: &Value, item: &Value) -> Result<bool, String> {
    match (container, item) {
        (Value::List(items), _) => Ok(items.iter().any(|candidate| equals(candidate, item))),
        (Value::Text(text), Value::Text(needle)) => Ok(text.contains(needle.as_str())),
        (Value::Map(map), Value::Text(key)) => Ok(map.contains_key(key)),
        _ => Err(format!(
            "argument of type '{}' does not support membership of '{}'",
            container.type_name(),
            item.type_name()
        )),
    }
}

fn shift_datetime(datetime: &NaiveDateTime, seconds: f64) -> Option<Value> {
    let millis = (seconds * 1000.0).round();
    if !millis.is_finite() {
        return None;
    }
    let delta = chrono::Duration::try_milliseconds(millis as i64)?;
    datetime.checked_add_signed(delta).map(Value::DateTime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_stays_integral() {
        assert_eq!(add(&Value::Int(2), &Value::Int(3)), Ok(Value::Int(5)));
        assert_eq!(add(&Value::Int(2), &Value::Float(0.5)), Ok(Value::Float(2.5)));
        assert_eq!(div(&Value::Int(3), &Value::Int(2)), Ok(Value::Float(1.5)));
        assert_eq!(floor_div(&Value::Int(-7), &Value::Int(2)), Ok(Value::Int(-4)));
        assert_eq!(rem(&Value::Int(-7), &Value::Int(3)), Ok(Value::Int(2)));
        assert_eq!(pow(&Value::Int(2), &Value::Int(10)), Ok(Value::Int(1024)));
        assert!(add(&Value::Int(i64::MAX), &Value::Int(1)).is_err());
    }

    #[test]
    fn integer_edge_cases_are_errors_not_panics() {
        assert_eq!(rem(&Value::Int(i64::MIN), &Value::Int(-1)), Err(overflow("%")));
        assert_eq!(floor_div(&Value::Int(i64::MIN), &Value::Int(-1)), Err(overflow("//")));
        assert_eq!(rem(&Value::Int(7), &Value::Int(-1)), Ok(Value::Int(0)));
        assert!(rem(&Value::Int(1), &Value::Int(0)).is_err());
    }

    #[test]
    fn string_repetition_is_bounded() {
        assert_eq!(
            mul(&Value::Text("ab".into()), &Value::Int(3)),
            Ok(Value::Text("ababab".into()))
        );
        assert_eq!(mul(&Value::Int(-2), &Value::Text("ab".into())), Ok(Value::Text(String::new())));
        assert!(mul(&Value::Text("ab".into()), &Value::Int(i64::MAX)).is_err());
        assert!(mul(&Value::Text("x".into()), &Value::Int(MAX_REPEAT_LEN as i64 + 1)).is_err());
    }

    #[test]
    fn mixed_types_are_rejected_explicitly() {
        let err = add(&Value::Text("a".into()), &Value::Int(1)).expect_err("text + int");
        assert!(err.contains("'str' and 'int'"));
        assert_eq!(compare(&Value::Text("a".into()), &Value::Int(1)), None);
        assert!(equals(&Value::Int(1), &Value::Float(1.0)));
    }

    #[test]
    fn datetimes_shift_by_seconds() {
        let start = parse_datetime("2024-01-01T00:00:00").expect("datetime");
        let shifted = add(&Value::DateTime(start), &Value::Int(90)).expect("shift");
        assert_eq!(shifted.to_string(), "2024-01-01T00:01:30");
        let delta = sub(&shifted, &Value::DateTime(start)).expect("delta");
        assert_eq!(delta, Value::Float(90.0));
        assert_eq!(Value::DateTime(start).timestamp_seconds(), Some(1_704_067_200.0));
    }

    #[test]
    fn coercion_follows_declared_type() {
        assert_eq!(Value::Float(7.9).coerce(ValueType::Int), Ok(Value::Int(7)));
        assert_eq!(Value::Int(7).coerce(ValueType::Float), Ok(Value::Float(7.0)));
        assert_eq!(Value::Int(7).coerce(ValueType::Text), Ok(Value::Text("7".into())));
        assert!(Value::Text("seven".into()).coerce(ValueType::Int).is_err());
    }

    #[test]
    fn display_matches_record_rendering() {
        assert_eq!(Value::Float(10.0).to_string(), "10.0");
        assert_eq!(Value::Float(2.25).to_string(), "2.25");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::Null.to_string(), "None");
    }

    #[test]
    fn path_lookup_walks_maps_and_lists() {
        let record = Value::from_json(&serde_json::json!({
            "readings": [{"value": 1}, {"value": 2}],
            "meta": {"site": "north"}
        }));
        assert_eq!(record.lookup_path(".readings[1].value"), Some(&Value::Int(2)));
        assert_eq!(record.lookup_path(".meta.site"), Some(&Value::Text("north".into())));
        assert_eq!(record.lookup_path(""), Some(&record));
        assert_eq!(record.lookup_path(".missing"), None);
    }
}
