//! Generator composition: one [`PropertyGenerator`] per definition node.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use syntrend_core::graph::object_name;
use syntrend_core::{DependencyMap, PropertyDefinition};

use crate::distribution::Distribution;
use crate::errors::GenerationError;
use crate::expression::{
    Bindings, CompiledExpression, ExpressionError, ReferenceResolver, compile_expression,
};
use crate::generators::{Generator, GeneratorContext, GeneratorRegistry, RenderContext};
use crate::historian::Historians;
use crate::value::{Value, ValueType};

/// Values accepted so far for the record being assembled, keyed by absolute path.
pub type RecordScope = BTreeMap<String, Value>;

/// Runtime node of a property tree.
pub struct PropertyGenerator {
    path: String,
    name: String,
    definition: PropertyDefinition,
    generator: Box<dyn Generator>,
    children: Vec<PropertyGenerator>,
    child_order: Vec<usize>,
    kwargs: Value,
    expression: Option<CompiledExpression>,
    conditions: Vec<CompiledExpression>,
    distribution: Distribution,
    start: Option<Value>,
    output_type: Option<ValueType>,
    iteration: Option<u64>,
    cached: Option<Value>,
}

impl std::fmt::Debug for PropertyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyGenerator")
            .field("path", &self.path)
            .field("kind", &self.generator.kind())
            .field("iteration", &self.iteration)
            .field("cached", &self.cached)
            .field("children", &self.children)
            .finish()
    }
}

/// Build the generator tree for `definition`, rooted at the object `object`.
///
/// Every failure is a configuration error carrying the offending path, raised
/// before anything is generated.
pub fn get_generator(
    object: &str,
    definition: &PropertyDefinition,
    registry: &GeneratorRegistry,
) -> Result<PropertyGenerator, GenerationError> {
    build_node(object, object, object, definition, registry)
}

fn build_node(
    object: &str,
    path: &str,
    name: &str,
    definition: &PropertyDefinition,
    registry: &GeneratorRegistry,
) -> Result<PropertyGenerator, GenerationError> {
    let config = registry.merged_config(definition).ok_or_else(|| {
        GenerationError::configuration(path, format!("unknown generator kind '{}'", definition.kind))
    })?;
    let generator = registry
        .build(definition, &config)
        .map_err(|message| GenerationError::configuration(path, message))?;

    let children = definition
        .children()
        .into_iter()
        .map(|(suffix, child)| {
            let child_name = suffix.trim_start_matches('.').trim_matches(['[', ']']).to_string();
            build_node(object, &format!("{path}{suffix}"), &child_name, child, registry)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let compile = |source: &str| {
        compile_expression(source, object).map_err(|err| {
            GenerationError::configuration(path, format!("invalid expression '{source}': {err}"))
        })
    };
    let expression = definition.expression.as_deref().map(compile).transpose()?;
    let conditions = definition
        .conditions
        .iter()
        .map(|condition| compile(condition.as_str()))
        .collect::<Result<Vec<_>, _>>()?;

    let distribution = Distribution::from_config(&definition.distribution.resolved())
        .map_err(|message| GenerationError::configuration(path, message))?;
    let output_type = generator.output_type();
    // kinds without a declared numeric type (static, choice, union) cannot
    // take a distribution
    if !distribution.is_identity() && !output_type.is_some_and(ValueType::is_numeric) {
        let produces = match output_type {
            Some(kind) => format!("{kind:?} values"),
            None => "values of no declared type".to_string(),
        };
        return Err(GenerationError::configuration(
            path,
            format!(
                "distributions only apply to numeric kinds, '{}' produces {produces}",
                definition.kind
            ),
        ));
    }

    generator
        .validate(&children)
        .map_err(|message| GenerationError::configuration(path, message))?;

    let child_order = (0..children.len()).collect();
    Ok(PropertyGenerator {
        path: path.to_string(),
        name: name.to_string(),
        definition: definition.clone(),
        generator,
        children,
        child_order,
        kwargs: Value::from_json(&serde_json::Value::Object(config)),
        expression,
        conditions,
        distribution,
        start: definition.start.as_ref().map(Value::from_json),
        output_type,
        iteration: None,
        cached: None,
    })
}

impl PropertyGenerator {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        self.generator.kind()
    }

    pub fn definition(&self) -> &PropertyDefinition {
        &self.definition
    }

    pub fn children(&self) -> &[PropertyGenerator] {
        &self.children
    }

    /// Iteration the cached value belongs to, if any.
    pub fn iteration(&self) -> Option<u64> {
        self.iteration
    }

    pub fn cached(&self) -> Option<&Value> {
        self.cached.as_ref()
    }

    /// Order siblings so that a child whose subtree references another
    /// child's subtree renders after it. Sibling groups that reference each
    /// other keep their declaration order.
    pub fn apply_order(&mut self, dependencies: &DependencyMap) {
        let count = self.children.len();
        let mut needs: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
        for (index, child) in self.children.iter().enumerate() {
            let references = dependencies
                .iter()
                .filter(|(path, _)| within(path, &child.path))
                .flat_map(|(_, targets)| targets.iter());
            for target in references {
                for (other, sibling) in self.children.iter().enumerate() {
                    if other != index && within(target, &sibling.path) {
                        needs[index].insert(other);
                    }
                }
            }
        }

        let mut placed = vec![false; count];
        let mut order = Vec::with_capacity(count);
        while order.len() < count {
            let ready = (0..count).find(|&i| !placed[i] && needs[i].iter().all(|&j| placed[j]));
            let Some(next) = ready.or_else(|| (0..count).find(|&i| !placed[i])) else {
                break;
            };
            placed[next] = true;
            order.push(next);
        }
        self.child_order = order;

        for child in &mut self.children {
            child.apply_order(dependencies);
        }
    }

    /// Value for the current iteration, generated at most once per iteration.
    ///
    /// Candidates failing a condition are undone and regenerated until
    /// `max_retries` attempts have been rejected.
    pub fn render(&mut self, ctx: &mut RenderContext<'_>) -> Result<Value, GenerationError> {
        if self.iteration == Some(ctx.iteration) {
            if let Some(cached) = &self.cached {
                return Ok(cached.clone());
            }
        }

        let mut attempts = Vec::new();
        loop {
            let candidate = self.candidate(ctx)?;
            ctx.scope.insert(self.path.clone(), candidate.clone());

            if self.accepts(&candidate, ctx)? {
                self.iteration = Some(ctx.iteration);
                self.cached = Some(candidate.clone());
                return Ok(candidate);
            }

            debug!(
                path = %self.path,
                attempt = attempts.len() + 1,
                value = %candidate,
                "record rejected"
            );
            attempts.push(candidate);
            self.undo();
            ctx.scope.remove(&self.path);
            if attempts.len() >= ctx.max_retries as usize {
                return Err(GenerationError::ConditionExhausted {
                    path: self.path.clone(),
                    attempts,
                });
            }
        }
    }

    /// Step the iteration back so the next render regenerates this subtree.
    pub fn undo(&mut self) {
        self.iteration = self.iteration.and_then(|iteration| iteration.checked_sub(1));
        for child in &mut self.children {
            child.undo();
        }
    }

    fn candidate(&mut self, ctx: &mut RenderContext<'_>) -> Result<Value, GenerationError> {
        if ctx.iteration == 0 {
            if let Some(start) = &self.start {
                return Ok(start.clone());
            }
        }

        let raw = {
            let mut generator_ctx = GeneratorContext {
                path: &self.path,
                definition: &self.definition,
                children: &mut self.children,
                child_order: &self.child_order,
                render: &mut *ctx,
            };
            self.generator.generate(&mut generator_ctx)?
        };

        let derived = match &self.expression {
            Some(expression) => self.evaluate(expression, &raw, ctx)?,
            None => raw,
        };
        let distributed = self
            .distribution
            .apply(derived, ctx.rng)
            .map_err(|message| GenerationError::configuration(&self.path, message))?;
        match self.output_type {
            Some(target) => distributed.coerce(target).map_err(|message| GenerationError::Expression {
                property: self.path.clone(),
                message,
                missing_field: None,
            }),
            None => Ok(distributed),
        }
    }

    fn accepts(&self, candidate: &Value, ctx: &mut RenderContext<'_>) -> Result<bool, GenerationError> {
        for condition in &self.conditions {
            if !self.evaluate(condition, candidate, ctx)?.is_truthy() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn evaluate(
        &self,
        expression: &CompiledExpression,
        new: &Value,
        ctx: &mut RenderContext<'_>,
    ) -> Result<Value, GenerationError> {
        let resolver = ScopeResolver {
            object: ctx.object,
            scope: &*ctx.scope,
            historians: ctx.historians,
        };
        let bindings = Bindings {
            new,
            iteration: ctx.iteration,
            kwargs: &self.kwargs,
            object: ctx.object,
            historians: ctx.historians,
            references: &resolver,
        };
        expression
            .evaluate(&bindings, &mut *ctx.rng)
            .map_err(|err| self.expression_error(err))
    }

    fn expression_error(&self, err: ExpressionError) -> GenerationError {
        match err {
            ExpressionError::History(history) => GenerationError::History(history),
            other => GenerationError::Expression {
                property: self.path.clone(),
                missing_field: other.missing_field().map(str::to_string),
                message: other.to_string(),
            },
        }
    }
}

fn within(path: &str, root: &str) -> bool {
    path.strip_prefix(root)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.') || rest.starts_with('['))
}

/// Resolves `{path}` references against the record in progress, falling back
/// to the latest accepted record of other objects.
struct ScopeResolver<'a> {
    object: &'a str,
    scope: &'a RecordScope,
    historians: &'a Historians,
}

impl ReferenceResolver for ScopeResolver<'_> {
    fn resolve(&self, path: &str) -> Result<Value, ExpressionError> {
        let owner = object_name(path);
        if owner != self.object {
            let historian = self
                .historians
                .get(owner)
                .ok_or_else(|| ExpressionError::Undefined(path.to_string()))?;
            return historian
                .current()?
                .lookup_path(&path[owner.len()..])
                .cloned()
                .ok_or_else(|| ExpressionError::Undefined(path.to_string()));
        }

        // the outermost rendered ancestor wins: list elements share one
        // scope path, so only the rendered list knows each element
        let splits = path
            .char_indices()
            .filter(|(_, ch)| *ch == '.' || *ch == '[')
            .map(|(index, _)| index);
        for split in splits {
            if let Some(value) = self.scope.get(&path[..split]) {
                return value
                    .lookup_path(&path[split..])
                    .cloned()
                    .ok_or_else(|| ExpressionError::Undefined(path.to_string()));
            }
        }
        if let Some(value) = self.scope.get(path) {
            return Ok(value.clone());
        }
        Err(ExpressionError::Evaluation(format!(
            "reference '{path}' has not been rendered yet"
        )))
    }
}
