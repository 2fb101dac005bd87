//! Summary statistics over measurement values.
//!
//! Used by `get_statistics()` on the script API, and exposed as free functions
//! (`mean`, `median`, `stdev`, `min_of`, `max_of`) to trusted and developer scripts.

use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Position};

/// Statistics over a set of values. Every field but `count` is `None` when empty.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Statistics {
    /// Arithmetic mean
    pub mean: Option<f64>,
    /// Largest value
    pub max: Option<f64>,
    /// Smallest value
    pub min: Option<f64>,
    /// Sample standard deviation, 0 for a single value
    pub stdev: Option<f64>,
    /// Number of values
    pub count: usize,
}

impl Statistics {
    /// Summarize `values`.
    pub fn of(values: &[f64]) -> Self {
        Self {
            mean: mean(values),
            max: max(values),
            min: min(values),
            stdev: sample_stdev(values),
            count: values.len(),
        }
    }

    /// As a script map with keys `mean`, `max`, `min`, `stdev`, `count`.
    pub fn to_map(&self) -> Map {
        let field = |value: Option<f64>| value.map_or(Dynamic::UNIT, Dynamic::from_float);
        let mut map = Map::new();
        map.insert("mean".into(), field(self.mean));
        map.insert("max".into(), field(self.max));
        map.insert("min".into(), field(self.min));
        map.insert("stdev".into(), field(self.stdev));
        map.insert("count".into(), Dynamic::from_int(self.count as i64));
        map
    }
}

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median; the average of the middle pair for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Sample standard deviation (n - 1 denominator), 0 for one value.
pub fn sample_stdev(values: &[f64]) -> Option<f64> {
    let mean = mean(values)?;
    if values.len() == 1 {
        return Some(0.0);
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Smallest value.
pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

/// Largest value.
pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

fn numbers(array: &Array) -> Result<Vec<f64>, Box<EvalAltResult>> {
    array
        .iter()
        .filter(|value| !value.is_unit())
        .map(|value| {
            value
                .as_float()
                .or_else(|_| value.as_int().map(|n| n as f64))
                .map_err(|type_name| {
                    Box::new(EvalAltResult::ErrorRuntime(
                        format!("expected a number, found {type_name}").into(),
                        Position::NONE,
                    ))
                })
        })
        .collect()
}

fn to_dynamic(value: Option<f64>) -> Dynamic {
    value.map_or(Dynamic::UNIT, Dynamic::from_float)
}

/// Register `mean`, `median`, `stdev`, `min_of`, `max_of` over arrays.
///
/// `()` entries (failed samples) are skipped; an empty input yields `()`.
pub fn register(engine: &mut Engine) {
    engine.register_fn("mean", |values: Array| {
        numbers(&values).map(|v| to_dynamic(mean(&v)))
    });
    engine.register_fn("median", |values: Array| {
        numbers(&values).map(|v| to_dynamic(median(&v)))
    });
    engine.register_fn("stdev", |values: Array| {
        numbers(&values).map(|v| to_dynamic(sample_stdev(&v)))
    });
    engine.register_fn("min_of", |values: Array| {
        numbers(&values).map(|v| to_dynamic(min(&v)))
    });
    engine.register_fn("max_of", |values: Array| {
        numbers(&values).map(|v| to_dynamic(max(&v)))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_of_three() {
        let stats = Statistics::of(&[1.0, 2.0, 3.0]);
        assert_eq!(stats.mean, Some(2.0));
        assert_eq!(stats.max, Some(3.0));
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.stdev, Some(1.0));
        assert_eq!(stats.count, 3);
    }

    #[test]
    fn test_statistics_edge_counts() {
        let empty = Statistics::of(&[]);
        assert_eq!(empty, Statistics::default());
        let map = empty.to_map();
        assert!(map["mean"].is_unit());
        assert_eq!(map["count"].as_int().unwrap(), 0);

        assert_eq!(Statistics::of(&[4.2]).stdev, Some(0.0));
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn test_registered_functions() {
        let mut engine = Engine::new();
        register(&mut engine);
        let mean: f64 = engine.eval("mean([1, 2.0, (), 3])").unwrap();
        assert_eq!(mean, 2.0);
        let empty: Dynamic = engine.eval("max_of([])").unwrap();
        assert!(empty.is_unit());
        assert!(engine.eval::<Dynamic>(r#"mean(["x"])"#).is_err());
    }
}
