//! Compiled expressions evaluated against an explicit binding context.
//!
//! Expressions are parsed once when the generator tree is built. Each
//! evaluation receives a [`Bindings`] value describing everything visible to
//! the expression: the candidate value, the iteration index, the kind config
//! and the historians of every object. Nothing is looked up from ambient state.

mod eval;
mod functions;
mod lexer;
mod parser;

use std::collections::BTreeMap;

use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::historian::{Historians, HistoryError};
use crate::value::Value;

pub use parser::{BinaryOp, Expr};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },
    #[error("Reference field is not defined: {0}")]
    Undefined(String),
    #[error("{0}")]
    Evaluation(String),
    #[error(transparent)]
    History(#[from] HistoryError),
}

impl ExpressionError {
    /// Name of the unbound field for undefined references.
    pub fn missing_field(&self) -> Option<&str> {
        match self {
            ExpressionError::Undefined(name) => Some(name),
            _ => None,
        }
    }
}

/// Source of `{path}` reference values.
pub trait ReferenceResolver {
    fn resolve(&self, path: &str) -> Result<Value, ExpressionError>;
}

impl ReferenceResolver for BTreeMap<String, Value> {
    fn resolve(&self, path: &str) -> Result<Value, ExpressionError> {
        self.get(path)
            .cloned()
            .ok_or_else(|| ExpressionError::Undefined(path.to_string()))
    }
}

/// Names visible to one evaluation.
pub struct Bindings<'a> {
    /// Value under consideration (`new`).
    pub new: &'a Value,
    /// Iteration index of the owning object (`interval`, `iteration`).
    pub iteration: u64,
    /// Merged kind configuration (`kwargs`).
    pub kwargs: &'a Value,
    /// Owning object, bound to `this`.
    pub object: &'a str,
    pub historians: &'a Historians,
    pub references: &'a dyn ReferenceResolver,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    source: String,
    ast: Expr,
    references: Vec<String>,
}

/// Parse `source`, expanding `{this...}` references against `object`.
pub fn compile_expression(source: &str, object: &str) -> Result<CompiledExpression, ExpressionError> {
    let tokens = lexer::tokenize(source)?;
    let ast = parser::Parser::new(tokens, source.len(), object).parse()?;
    let mut references = Vec::new();
    collect_references(&ast, &mut references);
    Ok(CompiledExpression {
        source: source.to_string(),
        ast,
        references,
    })
}

impl CompiledExpression {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Absolute paths referenced with `{...}`, in order of appearance.
    pub fn references(&self) -> &[String] {
        &self.references
    }

    pub fn evaluate(&self, bindings: &Bindings<'_>, rng: &mut ChaCha8Rng) -> Result<Value, ExpressionError> {
        eval::evaluate(&self.ast, bindings, rng)?.into_value()
    }
}

fn collect_references(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Reference(path) => {
            if !out.contains(path) {
                out.push(path.clone());
            }
        }
        Expr::Literal(_) | Expr::Name(_) => {}
        Expr::List(items) => items.iter().for_each(|item| collect_references(item, out)),
        Expr::Not(inner) | Expr::Neg(inner) => collect_references(inner, out),
        Expr::Binary { left, right, .. } | Expr::And(left, right) | Expr::Or(left, right) => {
            collect_references(left, out);
            collect_references(right, out);
        }
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            collect_references(condition, out);
            collect_references(then, out);
            collect_references(otherwise, out);
        }
        Expr::Call { callee, args } => {
            collect_references(callee, out);
            args.iter().for_each(|arg| collect_references(arg, out));
        }
        Expr::Attribute { target, .. } => collect_references(target, out),
        Expr::Index { target, index } => {
            collect_references(target, out);
            collect_references(index, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::historian::Historian;

    struct Env {
        historians: Historians,
        references: BTreeMap<String, Value>,
        kwargs: Value,
    }

    impl Env {
        fn new() -> Self {
            Self {
                historians: Historians::new(),
                references: BTreeMap::new(),
                kwargs: Value::Map(BTreeMap::new()),
            }
        }

        fn eval(&self, source: &str, new: Value) -> Result<Value, ExpressionError> {
            let compiled = compile_expression(source, "sensor")?;
            let bindings = Bindings {
                new: &new,
                iteration: 3,
                kwargs: &self.kwargs,
                object: "sensor",
                historians: &self.historians,
                references: &self.references,
            };
            let mut rng = ChaCha8Rng::seed_from_u64(7);
            compiled.evaluate(&bindings, &mut rng)
        }
    }

    fn record(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
        )
    }

    #[test]
    fn arithmetic_over_new_and_iteration() {
        let env = Env::new();
        assert_eq!(env.eval("new * 2 + interval", Value::Int(5)), Ok(Value::Int(13)));
        assert_eq!(env.eval("new // 2", Value::Int(7)), Ok(Value::Int(3)));
        assert_eq!(env.eval("new ~ '!'", Value::Int(7)), Ok(Value::Text("7!".into())));
        assert_eq!(
            env.eval("'big' if new > 10 else 'small'", Value::Float(10.5)),
            Ok(Value::Text("big".into()))
        );
    }

    #[test]
    fn references_resolve_through_the_resolver() {
        let mut env = Env::new();
        env.references.insert("sensor.base".into(), Value::Int(40));
        assert_eq!(env.eval("{this.base} + new", Value::Int(2)), Ok(Value::Int(42)));

        let compiled = compile_expression("{this.base} + {other.x} + {this.base}", "sensor")
            .expect("compile");
        assert_eq!(compiled.references(), ["sensor.base", "other.x"]);
    }

    #[test]
    fn historians_support_lookback_and_fields() {
        let mut env = Env::new();
        let mut historian = Historian::new("sensor", 5);
        historian.append(record(&[("ts", Value::Int(100))]));
        historian.append(record(&[("ts", Value::Int(105))]));
        env.historians.insert("sensor".into(), historian);

        assert_eq!(env.eval("this().ts", Value::Null), Ok(Value::Int(105)));
        assert_eq!(env.eval("this(-1).ts", Value::Null), Ok(Value::Int(100)));
        assert_eq!(env.eval("sensor.ts + 1", Value::Null), Ok(Value::Int(106)));
        assert_eq!(env.eval("has_values(this)", Value::Null), Ok(Value::Bool(true)));
        assert!(matches!(
            env.eval("this(1)", Value::Null),
            Err(ExpressionError::History(HistoryError::PositiveOffset { .. }))
        ));
    }

    #[test]
    fn empty_history_short_circuits_with_has_values() {
        let mut env = Env::new();
        env.historians.insert("sensor".into(), Historian::new("sensor", 5));
        assert_eq!(
            env.eval("this().ts + 1 if has_values(this) else 0", Value::Null),
            Ok(Value::Int(0))
        );
        assert!(matches!(
            env.eval("this().ts", Value::Null),
            Err(ExpressionError::History(HistoryError::Empty(_)))
        ));
    }

    #[test]
    fn undefined_names_are_distinguishable() {
        let env = Env::new();
        let err = env.eval("missing + 1", Value::Null).expect_err("undefined");
        assert_eq!(err.missing_field(), Some("missing"));
        let err = env.eval("{this.nothing}", Value::Null).expect_err("undefined");
        assert_eq!(err.missing_field(), Some("sensor.nothing"));
    }

    #[test]
    fn type_errors_are_evaluation_errors() {
        let env = Env::new();
        assert!(matches!(
            env.eval("new + 1", Value::Text("a".into())),
            Err(ExpressionError::Evaluation(_))
        ));
        assert!(matches!(
            env.eval("new < 'a'", Value::Int(1)),
            Err(ExpressionError::Evaluation(_))
        ));
    }
}
