use std::cmp::Ordering;

use rand_chacha::ChaCha8Rng;

use super::parser::{BinaryOp, Expr};
use super::{Bindings, ExpressionError, functions};
use crate::historian::Historian;
use crate::value::{self, Value};

/// Intermediate result: historians stay unresolved until a scalar is needed.
pub(super) enum Operand<'a> {
    Value(Value),
    History(&'a Historian),
}

impl Operand<'_> {
    pub(super) fn into_value(self) -> Result<Value, ExpressionError> {
        match self {
            Operand::Value(value) => Ok(value),
            Operand::History(historian) => Ok(historian.current()?.clone()),
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            Operand::Value(value) => value.is_truthy(),
            Operand::History(historian) => historian.has_values(),
        }
    }
}

pub(super) fn evaluate<'a>(
    expr: &Expr,
    bindings: &Bindings<'a>,
    rng: &mut ChaCha8Rng,
) -> Result<Operand<'a>, ExpressionError> {
    match expr {
        Expr::Literal(value) => Ok(Operand::Value(value.clone())),
        Expr::List(items) => {
            let values = items
                .iter()
                .map(|item| evaluate(item, bindings, rng)?.into_value())
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Operand::Value(Value::List(values)))
        }
        Expr::Name(name) => {
            lookup_name(name, bindings).ok_or_else(|| ExpressionError::Undefined(name.clone()))
        }
        Expr::Reference(path) => Ok(Operand::Value(bindings.references.resolve(path)?)),
        Expr::Not(inner) => {
            let operand = evaluate(inner, bindings, rng)?;
            Ok(Operand::Value(Value::Bool(!operand.is_truthy())))
        }
        Expr::Neg(inner) => {
            let operand = evaluate(inner, bindings, rng)?.into_value()?;
            value::neg(&operand).map(Operand::Value).map_err(ExpressionError::Evaluation)
        }
        Expr::Binary { op, left, right } => {
            let left = evaluate(left, bindings, rng)?.into_value()?;
            let right = evaluate(right, bindings, rng)?.into_value()?;
            binary(*op, &left, &right).map(Operand::Value)
        }
        Expr::And(left, right) => {
            let left = evaluate(left, bindings, rng)?;
            if !left.is_truthy() {
                return Ok(left);
            }
            evaluate(right, bindings, rng)
        }
        Expr::Or(left, right) => {
            let left = evaluate(left, bindings, rng)?;
            if left.is_truthy() {
                return Ok(left);
            }
            evaluate(right, bindings, rng)
        }
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            if evaluate(condition, bindings, rng)?.is_truthy() {
                evaluate(then, bindings, rng)
            } else {
                evaluate(otherwise, bindings, rng)
            }
        }
        Expr::Call { callee, args } => call(callee, args, bindings, rng),
        Expr::Attribute { target, name } => match evaluate(target, bindings, rng)? {
            Operand::History(historian) => historian
                .current()?
                .field(name)
                .cloned()
                .map(Operand::Value)
                .ok_or_else(|| ExpressionError::Undefined(format!("{}.{name}", historian.name()))),
            Operand::Value(value) => value
                .field(name)
                .cloned()
                .map(Operand::Value)
                .ok_or_else(|| {
                    ExpressionError::Evaluation(format!(
                        "'{}' value has no attribute '{name}'",
                        value.type_name()
                    ))
                }),
        },
        Expr::Index { target, index } => {
            let target = evaluate(target, bindings, rng)?.into_value()?;
            let index = evaluate(index, bindings, rng)?.into_value()?;
            subscript(&target, &index).map(Operand::Value)
        }
    }
}

fn lookup_name<'a>(name: &str, bindings: &Bindings<'a>) -> Option<Operand<'a>> {
    let operand = match name {
        "new" => Operand::Value(bindings.new.clone()),
        "interval" | "iteration" => {
            Operand::Value(Value::Int(i64::try_from(bindings.iteration).unwrap_or(i64::MAX)))
        }
        "kwargs" => Operand::Value(bindings.kwargs.clone()),
        "this" => Operand::History(bindings.historians.get(bindings.object)?),
        other => match bindings.historians.get(other) {
            Some(historian) => Operand::History(historian),
            None => match other {
                "pi" => Operand::Value(Value::Float(std::f64::consts::PI)),
                "e" => Operand::Value(Value::Float(std::f64::consts::E)),
                _ => return None,
            },
        },
    };
    Some(operand)
}

fn is_bound(name: &str, bindings: &Bindings<'_>) -> bool {
    matches!(name, "new" | "interval" | "iteration" | "kwargs" | "this")
        || bindings.historians.contains_key(name)
}

fn call<'a>(
    callee: &Expr,
    args: &[Expr],
    bindings: &Bindings<'a>,
    rng: &mut ChaCha8Rng,
) -> Result<Operand<'a>, ExpressionError> {
    if let Expr::Name(name) = callee {
        if !is_bound(name, bindings) {
            if name == "has_values" {
                let [arg] = args else {
                    return Err(arity(name, "exactly one argument", args.len()));
                };
                let has_values = match evaluate(arg, bindings, rng)? {
                    Operand::History(historian) => historian.has_values(),
                    Operand::Value(Value::Null) => false,
                    Operand::Value(Value::List(items)) => !items.is_empty(),
                    Operand::Value(_) => true,
                };
                return Ok(Operand::Value(Value::Bool(has_values)));
            }
            let values = args
                .iter()
                .map(|arg| evaluate(arg, bindings, rng)?.into_value())
                .collect::<Result<Vec<_>, _>>()?;
            return functions::call(name, &values, rng).map(Operand::Value);
        }
    }

    match evaluate(callee, bindings, rng)? {
        Operand::History(historian) => {
            let offset = match args {
                [] => 0,
                [offset] => {
                    let offset = evaluate(offset, bindings, rng)?.into_value()?;
                    offset.as_i64().ok_or_else(|| {
                        ExpressionError::Evaluation(format!(
                            "history offset must be an integer, got {} '{offset}'",
                            offset.type_name()
                        ))
                    })?
                }
                _ => return Err(arity(historian.name(), "at most one offset", args.len())),
            };
            Ok(Operand::Value(historian.get(offset)?.clone()))
        }
        Operand::Value(value) => Err(ExpressionError::Evaluation(format!(
            "'{}' value is not callable",
            value.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    let result = match op {
        BinaryOp::Add => value::add(left, right),
        BinaryOp::Sub => value::sub(left, right),
        BinaryOp::Mul => value::mul(left, right),
        BinaryOp::Div => value::div(left, right),
        BinaryOp::FloorDiv => value::floor_div(left, right),
        BinaryOp::Rem => value::rem(left, right),
        BinaryOp::Pow => value::pow(left, right),
        BinaryOp::Concat => Ok(value::concat(left, right)),
        BinaryOp::Eq => Ok(Value::Bool(value::equals(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!value::equals(left, right))),
        BinaryOp::Lt => ordering(left, right, "<", Ordering::is_lt),
        BinaryOp::Le => ordering(left, right, "<=", Ordering::is_le),
        BinaryOp::Gt => ordering(left, right, ">", Ordering::is_gt),
        BinaryOp::Ge => ordering(left, right, ">=", Ordering::is_ge),
        BinaryOp::In => value::contains(right, left).map(Value::Bool),
        BinaryOp::NotIn => value::contains(right, left).map(|found| Value::Bool(!found)),
    };
    result.map_err(ExpressionError::Evaluation)
}

fn ordering(
    left: &Value,
    right: &Value,
    symbol: &str,
    test: fn(Ordering) -> bool,
) -> Result<Value, String> {
    value::compare(left, right)
        .map(|ordering| Value::Bool(test(ordering)))
        .ok_or_else(|| {
            format!(
                "'{symbol}' not supported between '{}' and '{}'",
                left.type_name(),
                right.type_name()
            )
        })
}

fn subscript(target: &Value, index: &Value) -> Result<Value, ExpressionError> {
    let found = match (target, index) {
        (Value::List(_), Value::Int(position)) => target.index(*position).cloned(),
        (Value::Map(_), Value::Text(key)) => target.field(key).cloned(),
        (Value::Text(text), Value::Int(position)) => {
            let count = text.chars().count() as i64;
            let position = if *position < 0 { count + position } else { *position };
            usize::try_from(position)
                .ok()
                .and_then(|position| text.chars().nth(position))
                .map(|ch| Value::Text(ch.to_string()))
        }
        _ => {
            return Err(ExpressionError::Evaluation(format!(
                "'{}' value cannot be indexed by '{}'",
                target.type_name(),
                index.type_name()
            )));
        }
    };
    found.ok_or_else(|| ExpressionError::Evaluation(format!("index {index} out of range")))
}

fn arity(name: &str, expected: &str, got: usize) -> ExpressionError {
    ExpressionError::Evaluation(format!("{name}() takes {expected}, got {got}"))
}
