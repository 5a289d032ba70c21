use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Beta, Distribution as _};

use syntrend_core::{DistributionKind, PropertyDistribution};

use crate::value::Value;

/// Resolved transform applied to a generated value before acceptance.
#[derive(Debug, Clone)]
pub enum Distribution {
    None,
    /// Adds a uniform offset in `[min, max]`.
    Linear { min: f64, max: f64 },
    /// Adds `beta_sample * scale + min`, with the Beta shape fitted so the
    /// spread around the input matches `std_dev_factor`.
    StdDev { min: f64, scale: f64, beta: Beta<f64> },
}

/// Resolve a distribution configuration, rejecting infeasible shapes.
pub fn get_distribution(config: &PropertyDistribution) -> Result<Distribution, String> {
    Distribution::from_config(config)
}

impl Distribution {
    pub fn from_config(config: &PropertyDistribution) -> Result<Self, String> {
        if config.kind != DistributionKind::None && config.min_offset > config.max_offset {
            return Err(format!(
                "distribution min_offset {} is greater than max_offset {}",
                config.min_offset, config.max_offset
            ));
        }
        match config.kind {
            DistributionKind::None => Ok(Distribution::None),
            DistributionKind::Linear => Ok(Distribution::Linear {
                min: config.min_offset,
                max: config.max_offset,
            }),
            DistributionKind::StdDev => {
                let (alpha, beta) =
                    beta_shape(config.min_offset, config.max_offset, config.std_dev_factor)?;
                let beta = Beta::new(alpha, beta).map_err(|err| err.to_string())?;
                Ok(Distribution::StdDev {
                    min: config.min_offset,
                    scale: config.max_offset - config.min_offset,
                    beta,
                })
            }
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Distribution::None)
    }

    pub fn apply(&self, value: Value, rng: &mut ChaCha8Rng) -> Result<Value, String> {
        match self {
            Distribution::None => Ok(value),
            Distribution::Linear { min, max } => match value {
                Value::Int(int) if min.fract() == 0.0 && max.fract() == 0.0 => {
                    let offset = rng.random_range(*min as i64..=*max as i64);
                    int.checked_add(offset)
                        .map(Value::Int)
                        .ok_or_else(|| "integer overflow applying linear distribution".to_string())
                }
                other => {
                    let base = numeric_input(&other)?;
                    Ok(Value::Float(base + rng.random_range(*min..=*max)))
                }
            },
            Distribution::StdDev { min, scale, beta } => {
                let base = numeric_input(&value)?;
                Ok(Value::Float(beta.sample(rng) * scale + min + base))
            }
        }
    }
}

fn numeric_input(value: &Value) -> Result<f64, String> {
    match value {
        Value::Int(_) | Value::Float(_) => value
            .as_f64()
            .ok_or_else(|| "distribution input is not numeric".to_string()),
        other => Err(format!(
            "distributions apply to numbers, got {} '{}'",
            other.type_name(),
            other
        )),
    }
}

/// Beta shape parameters whose mean sits at the input (offset zero) and whose
/// spread matches `factor`, both normalized into the offset window.
fn beta_shape(min: f64, max: f64, factor: f64) -> Result<(f64, f64), String> {
    let scale = max - min;
    let variance = (factor / scale).powi(2);
    let mean = -min / scale;
    let t = mean / (1.0 - mean);
    let beta = (t / variance - t.powi(2) - 2.0 * t - 1.0)
        / (t.powi(3) + 3.0 * t.powi(2) + 3.0 * t + 1.0);
    let alpha = beta * t;

    if !(alpha.is_finite() && beta.is_finite() && alpha > 0.0 && beta > 0.0) {
        return Err(format!(
            "std_dev_factor {factor} cannot fit the offset window [{min}, {max}] \
             (alpha {alpha}, beta {beta})"
        ));
    }
    Ok((alpha, beta))
}
