use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::json;

use syntrend_core::PropertyDefinition;
use syntrend_generate::{
    GenerationError, Generator, GeneratorContext, GeneratorRegistry, Historians, PropertyGenerator,
    RecordScope, RenderContext, Value, get_generator,
};

/// Returns how many values it has produced so far.
struct Counter {
    calls: Arc<AtomicUsize>,
}

impl Generator for Counter {
    fn kind(&self) -> &str {
        "counter"
    }

    fn generate(&mut self, _ctx: &mut GeneratorContext<'_, '_>) -> Result<Value, GenerationError> {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Value::Int(calls as i64))
    }
}

fn counting_registry(calls: &Arc<AtomicUsize>) -> GeneratorRegistry {
    let mut registry = GeneratorRegistry::with_builtin();
    let calls = Arc::clone(calls);
    registry.register("counter", json!({}), move |_, _| {
        Ok(Box::new(Counter {
            calls: Arc::clone(&calls),
        }) as Box<dyn Generator>)
    });
    registry
}

fn definition(yaml: &str) -> PropertyDefinition {
    let mut definition: PropertyDefinition = serde_yaml::from_str(yaml).expect("definition");
    definition.assign_names("sample");
    definition
}

fn render(
    generator: &mut PropertyGenerator,
    iteration: u64,
    rng: &mut ChaCha8Rng,
) -> Result<Value, GenerationError> {
    let historians = Historians::new();
    let mut scope = RecordScope::new();
    let mut ctx = RenderContext {
        object: "sample",
        iteration,
        rng,
        historians: &historians,
        scope: &mut scope,
        max_retries: 3,
    };
    generator.render(&mut ctx)
}

#[test]
fn rendering_twice_in_one_iteration_reuses_every_child() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(&calls);
    let mut generator = get_generator(
        "sample",
        &definition("type: object\nproperties:\n  a: {type: counter}\n  b: {type: counter}\n"),
        &registry,
    )
    .expect("generator");
    let mut rng = ChaCha8Rng::seed_from_u64(1);

    let first = render(&mut generator, 0, &mut rng).expect("first");
    let again = render(&mut generator, 0, &mut rng).expect("again");
    assert_eq!(first, again);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let next = render(&mut generator, 1, &mut rng).expect("next");
    assert_ne!(first, next);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
fn isolated_registries_do_not_share_kinds() {
    let calls = Arc::new(AtomicUsize::new(0));
    let custom = counting_registry(&calls);
    let builtin = GeneratorRegistry::with_builtin();
    assert!(custom.contains("counter"));
    assert!(!builtin.contains("counter"));

    let err = get_generator("sample", &definition("type: counter\n"), &builtin)
        .err()
        .expect("unknown kind");
    assert!(matches!(err, GenerationError::Configuration { ref path, .. } if path == "sample"));
}

#[test]
fn condition_retries_regenerate_only_the_failing_subtree() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(&calls);
    let mut generator = get_generator(
        "sample",
        &definition(
            "type: object\nproperties:\n  fixed: {type: static, value: 1}\n  even:\n    type: counter\n    conditions: ['new % 2 == 0']\n",
        ),
        &registry,
    )
    .expect("generator");
    let mut rng = ChaCha8Rng::seed_from_u64(9);

    let record = render(&mut generator, 0, &mut rng).expect("record");
    assert_eq!(record, Value::Map([
        ("even".to_string(), Value::Int(2)),
        ("fixed".to_string(), Value::Int(1)),
    ].into_iter().collect()));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn exhausted_conditions_keep_exactly_the_retry_budget() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(&calls);
    let mut generator = get_generator(
        "sample",
        &definition("type: counter\nconditions: ['new < 0']\n"),
        &registry,
    )
    .expect("generator");
    let mut rng = ChaCha8Rng::seed_from_u64(2);

    match render(&mut generator, 0, &mut rng) {
        Err(GenerationError::ConditionExhausted { path, attempts }) => {
            assert_eq!(path, "sample");
            assert_eq!(attempts, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        }
        other => panic!("expected exhausted conditions, got {other:?}"),
    }
}

#[test]
fn list_elements_are_fresh_renders() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(&calls);
    let mut generator = get_generator(
        "sample",
        &definition("type: list\nmin_length: 3\nmax_length: 3\nsub_type: {type: counter}\n"),
        &registry,
    )
    .expect("generator");
    let mut rng = ChaCha8Rng::seed_from_u64(4);

    let value = render(&mut generator, 0, &mut rng).expect("list");
    assert_eq!(
        value,
        Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
    );
}
