//! Series orchestration: load every object, then render, format and record
//! their values in dependency order.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use syntrend_core::{ModuleConfig, ProjectConfig, prepare_dependency_tree, project_dependencies};

use crate::errors::GenerationError;
use crate::generators::{GeneratorRegistry, RenderContext};
use crate::historian::{Historian, Historians};
use crate::model::{ObjectReport, SeriesReport};
use crate::output::{Formatter, FormatterLoader};
use crate::property::{PropertyGenerator, RecordScope, get_generator};
use crate::value::Value;

struct ObjectState {
    name: String,
    generator: PropertyGenerator,
    formatter: Box<dyn Formatter>,
    rng: ChaCha8Rng,
    iteration: u64,
    count: u64,
    collection: bool,
    time_field: Option<String>,
    rank: usize,
    format: String,
    destination: String,
    records: u64,
    time_retries: u64,
    last_timestamp: Option<f64>,
}

impl ObjectState {
    fn is_timed(&self) -> bool {
        self.time_field.is_some()
    }

    fn report(&self) -> ObjectReport {
        ObjectReport {
            object: self.name.clone(),
            mode: if self.collection { "collection" } else { "stream" }.to_string(),
            format: self.format.clone(),
            destination: self.destination.clone(),
            records_requested: self.count,
            records_generated: self.records,
            time_retries: self.time_retries,
        }
    }
}

/// Candidate record of a time-correlated object waiting in the merge heap.
struct Pending {
    timestamp: f64,
    object: String,
    index: usize,
    value: Value,
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .total_cmp(&other.timestamp)
            .then_with(|| self.object.cmp(&other.object))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

/// Runs a loaded project to completion.
pub struct SeriesManager {
    objects: Vec<ObjectState>,
    historians: Historians,
    config: ModuleConfig,
    seed: u64,
}

impl SeriesManager {
    /// Build every generator tree, check references and open every formatter.
    ///
    /// Nothing is written if any object fails to load.
    pub fn load(
        project: &ProjectConfig,
        registry: &GeneratorRegistry,
        loader: &dyn FormatterLoader,
    ) -> Result<Self, GenerationError> {
        let dependencies = project_dependencies(project);
        let layers = prepare_dependency_tree(&dependencies)?;
        let ranks: BTreeMap<&str, usize> = layers
            .iter()
            .enumerate()
            .flat_map(|(rank, layer)| layer.iter().map(move |path| (path.as_str(), rank)))
            .collect();

        let config = project.config.clone();
        let seed = config.seed.unwrap_or_else(rand::random);

        let mut trees = Vec::with_capacity(project.objects.len());
        for (name, object) in &project.objects {
            let mut generator = get_generator(name, &object.property, registry)?;
            generator.apply_order(&dependencies);
            trees.push((name, object, generator));
        }

        let mut historians = Historians::new();
        let mut objects = Vec::with_capacity(trees.len());
        for (name, object, generator) in trees {
            let output = &object.output;
            let time_field = match output.time_field() {
                Some(field) if output.is_collection() => {
                    warn!(object = %name, time_field = field, "time_field is ignored for collections");
                    None
                }
                other => other.map(str::to_string),
            };
            historians.insert(
                name.clone(),
                Historian::new(name.clone(), config.max_historian_buffer),
            );
            objects.push(ObjectState {
                name: name.clone(),
                generator,
                formatter: loader.load_formatter(name, output)?,
                rng: ChaCha8Rng::seed_from_u64(hash_seed(seed, name)),
                iteration: 0,
                count: output.count(),
                collection: output.is_collection(),
                time_field,
                rank: ranks.get(name.as_str()).copied().unwrap_or(0),
                format: output.format().to_string(),
                destination: output.directory().to_string(),
                records: 0,
                time_retries: 0,
                last_timestamp: None,
            });
        }

        info!(
            objects = objects.len(),
            seed,
            max_generator_retries = config.max_generator_retries,
            max_historian_buffer = config.max_historian_buffer,
            "series loaded"
        );
        Ok(Self {
            objects,
            historians,
            config,
            seed,
        })
    }

    /// Seed the per-object generators were derived from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn object_names(&self) -> impl Iterator<Item = &str> {
        self.objects.iter().map(|state| state.name.as_str())
    }

    pub fn historian(&self, object: &str) -> Option<&Historian> {
        self.historians.get(object)
    }

    /// Generate every object, then close every formatter, including after a
    /// failure.
    pub fn run(&mut self) -> Result<SeriesReport, GenerationError> {
        let mut report = SeriesReport::new(self.seed);
        let clock = Instant::now();

        let outcome = self.generate_all();
        let closed = self.close_all();

        report.objects = self.objects.iter().map(ObjectState::report).collect();
        report.records_total = self.objects.iter().map(|state| state.records).sum();
        report.finish(clock.elapsed());

        match outcome.and(closed) {
            Ok(()) => {
                info!(
                    run_id = %report.run_id,
                    records = report.records_total,
                    duration_ms = report.duration_ms,
                    "series finished"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(run_id = %report.run_id, error = %err, "series failed");
                Err(err)
            }
        }
    }

    fn generate_all(&mut self) -> Result<(), GenerationError> {
        let mut untimed: Vec<usize> = (0..self.objects.len())
            .filter(|&index| !self.objects[index].is_timed())
            .collect();
        untimed.sort_by(|&a, &b| {
            let (a, b) = (&self.objects[a], &self.objects[b]);
            a.rank
                .cmp(&b.rank)
                .then_with(|| b.collection.cmp(&a.collection))
                .then_with(|| a.name.cmp(&b.name))
        });

        for index in untimed {
            let state = &self.objects[index];
            info!(
                object = %state.name,
                count = state.count,
                collection = state.collection,
                "object started"
            );
            for _ in 0..state.count {
                let value = self.render(index)?;
                self.emit(index, value)?;
            }
        }

        self.merge_timed()
    }

    /// Emit time-correlated objects in global timestamp order.
    fn merge_timed(&mut self) -> Result<(), GenerationError> {
        let timed: Vec<usize> = (0..self.objects.len())
            .filter(|&index| self.objects[index].is_timed())
            .collect();
        if timed.is_empty() {
            return Ok(());
        }

        let mut heap = BinaryHeap::new();
        for index in timed {
            let state = &self.objects[index];
            info!(
                object = %state.name,
                count = state.count,
                time_field = state.time_field.as_deref().unwrap_or_default(),
                "object started"
            );
            if state.count > 0 {
                heap.push(Reverse(self.next_timed(index)?));
            }
        }

        let mut previous: Option<(f64, Instant)> = None;
        while let Some(Reverse(pending)) = heap.pop() {
            if self.config.pacing {
                if let Some((last, emitted_at)) = previous {
                    if let Some(delay) = pacing_delay(pending.timestamp - last, emitted_at.elapsed()) {
                        debug!(object = %pending.object, delay_ms = delay.as_millis() as u64, "pacing");
                        std::thread::sleep(delay);
                    }
                }
            }
            previous = Some((pending.timestamp, Instant::now()));

            let index = pending.index;
            self.emit(index, pending.value)?;
            if self.objects[index].records < self.objects[index].count {
                heap.push(Reverse(self.next_timed(index)?));
            }
        }
        Ok(())
    }

    /// Render the next record of a timed object, regenerating until its
    /// timestamp is later than the one emitted before it.
    fn next_timed(&mut self, index: usize) -> Result<Pending, GenerationError> {
        let mut retries = 0;
        loop {
            let value = self.render(index)?;
            let state = &mut self.objects[index];
            let timestamp = record_timestamp(state, &value)?;
            match state.last_timestamp {
                Some(last) if timestamp <= last => {
                    retries += 1;
                    state.time_retries += 1;
                    debug!(object = %state.name, timestamp, last, retries, "timestamp not increasing");
                    state.generator.undo();
                    if retries >= self.config.max_generator_retries {
                        return Err(GenerationError::NonMonotonicTime {
                            object: state.name.clone(),
                            retries,
                        });
                    }
                }
                _ => {
                    state.last_timestamp = Some(timestamp);
                    return Ok(Pending {
                        timestamp,
                        object: state.name.clone(),
                        index,
                        value,
                    });
                }
            }
        }
    }

    fn render(&mut self, index: usize) -> Result<Value, GenerationError> {
        let state = &mut self.objects[index];
        let mut scope = RecordScope::new();
        let mut ctx = RenderContext {
            object: &state.name,
            iteration: state.iteration,
            rng: &mut state.rng,
            historians: &self.historians,
            scope: &mut scope,
            max_retries: self.config.max_generator_retries,
        };
        state.generator.render(&mut ctx)
    }

    /// Hand an accepted record to the formatter and the object's history.
    fn emit(&mut self, index: usize, value: Value) -> Result<(), GenerationError> {
        let state = &mut self.objects[index];
        state.formatter.format(&value)?;
        if let Some(historian) = self.historians.get_mut(&state.name) {
            historian.append(value);
        }
        state.iteration += 1;
        state.records += 1;
        Ok(())
    }

    fn close_all(&mut self) -> Result<(), GenerationError> {
        let mut first_error = None;
        for state in &mut self.objects {
            if let Err(err) = state.formatter.close() {
                warn!(object = %state.name, error = %err, "closing output failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Load and run a project with the given registry and output loader.
pub fn run_project(
    project: &ProjectConfig,
    registry: &GeneratorRegistry,
    loader: &dyn FormatterLoader,
) -> Result<SeriesReport, GenerationError> {
    SeriesManager::load(project, registry, loader)?.run()
}

fn record_timestamp(state: &ObjectState, value: &Value) -> Result<f64, GenerationError> {
    let field = state.time_field.as_deref().unwrap_or_default();
    value
        .field(field)
        .and_then(Value::timestamp_seconds)
        .ok_or_else(|| {
            GenerationError::configuration(
                format!("{}.output.time_field", state.name),
                format!("'{field}' does not hold a timestamp in the generated record"),
            )
        })
}

/// Longest single pacing sleep.
pub const MAX_PACING_DELAY: Duration = Duration::from_secs(60);

/// Sleep needed so that `gap_seconds` of record time passes in wall-clock
/// time, given `elapsed` already spent since the previous emission. Capped at
/// [`MAX_PACING_DELAY`].
pub fn pacing_delay(gap_seconds: f64, elapsed: Duration) -> Option<Duration> {
    if !gap_seconds.is_finite() || gap_seconds <= 0.0 {
        return None;
    }
    let gap = Duration::try_from_secs_f64(gap_seconds)
        .unwrap_or(MAX_PACING_DELAY)
        .min(MAX_PACING_DELAY);
    gap.checked_sub(elapsed).filter(|delay| !delay.is_zero())
}

fn hash_seed(seed: u64, key: &str) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacing_never_sleeps_a_negative_duration() {
        assert_eq!(pacing_delay(-1.0, Duration::ZERO), None);
        assert_eq!(pacing_delay(f64::NAN, Duration::ZERO), None);
        assert_eq!(pacing_delay(1.0, Duration::from_secs(2)), None);
        assert_eq!(
            pacing_delay(1.5, Duration::from_millis(500)),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn pacing_sleeps_are_capped() {
        assert_eq!(pacing_delay(86_400.0, Duration::ZERO), Some(MAX_PACING_DELAY));
        assert_eq!(pacing_delay(1e300, Duration::ZERO), Some(MAX_PACING_DELAY));
        assert_eq!(
            pacing_delay(86_400.0, Duration::from_secs(10)),
            Some(MAX_PACING_DELAY - Duration::from_secs(10))
        );
        assert_eq!(pacing_delay(86_400.0, Duration::from_secs(90)), None);
    }

    #[test]
    fn object_seeds_differ_per_name() {
        assert_ne!(hash_seed(7, "a"), hash_seed(7, "b"));
        assert_eq!(hash_seed(7, "a"), hash_seed(7, "a"));
    }

    #[test]
    fn pending_orders_by_time_then_name() {
        let pending = |timestamp, object: &str| Pending {
            timestamp,
            object: object.to_string(),
            index: 0,
            value: Value::Null,
        };
        assert!(pending(1.0, "b") < pending(2.0, "a"));
        assert!(pending(1.0, "a") < pending(1.0, "b"));
    }
}
