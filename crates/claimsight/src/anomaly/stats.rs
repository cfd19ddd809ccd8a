use thiserror::Error;

use crate::models::{Direction, Severity};

pub const MIN_SERIES_POINTS: usize = 3;
pub const WARNING_Z: f64 = 2.5;
pub const CRITICAL_Z: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("need at least {required} daily points, got {available}")]
pub struct InsufficientData {
    pub required: usize,
    pub available: usize,
}

/// Population statistics over the history that precedes the current point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
    pub samples: usize,
}

/// Splits `values` into a baseline (every point but the last) and the current
/// value (the last point).
pub fn baseline(values: &[f64]) -> Result<(Baseline, f64), InsufficientData> {
    let insufficient = InsufficientData {
        required: MIN_SERIES_POINTS,
        available: values.len(),
    };
    if values.len() < MIN_SERIES_POINTS {
        return Err(insufficient);
    }
    let Some((&current, history)) = values.split_last() else {
        return Err(insufficient);
    };

    let samples = history.len();
    let count = samples as f64;
    let mean = history.iter().sum::<f64>() / count;
    let variance = history
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / count;

    Ok((
        Baseline {
            mean,
            std_dev: variance.sqrt(),
            samples,
        },
        current,
    ))
}

/// A flat baseline scores zero rather than dividing by zero.
#[must_use]
pub fn z_score(current: f64, baseline: &Baseline) -> f64 {
    if baseline.std_dev == 0.0 {
        return 0.0;
    }
    (current - baseline.mean) / baseline.std_dev
}

#[must_use]
pub fn classify_severity(z: f64) -> Severity {
    let magnitude = z.abs();
    if magnitude > CRITICAL_Z {
        Severity::Critical
    } else if magnitude > WARNING_Z {
        Severity::Warning
    } else {
        Severity::Info
    }
}

#[must_use]
pub fn direction(current: f64, baseline: &Baseline) -> Direction {
    if current > baseline.mean {
        Direction::Up
    } else {
        Direction::Down
    }
}

#[cfg(test)]
mod tests {
    use super::{InsufficientData, baseline, classify_severity, direction, z_score};
    use crate::models::{Direction, Severity};

    #[test]
    fn flat_history_scores_zero_even_for_large_jumps() {
        let (stats, current) = baseline(&[10.0, 10.0, 10.0, 10.0, 50.0]).expect("enough points");
        assert_eq!(stats.mean, 10.0);
        assert_eq!(stats.std_dev, 0.0);
        assert_eq!(z_score(current, &stats), 0.0);
    }

    #[test]
    fn uses_population_standard_deviation() {
        let (stats, current) = baseline(&[10.0, 12.0, 9.0, 11.0, 30.0]).expect("enough points");
        assert!((stats.mean - 10.5).abs() < 1e-9);
        assert!((stats.std_dev - 1.25_f64.sqrt()).abs() < 1e-9);
        assert_eq!(stats.samples, 4);

        let z = z_score(current, &stats);
        assert!((z - 17.441).abs() < 1e-3, "{z}");
        assert_eq!(classify_severity(z), Severity::Critical);
        assert_eq!(direction(current, &stats), Direction::Up);
    }

    #[test]
    fn severity_boundaries_are_exclusive() {
        assert_eq!(classify_severity(3.0), Severity::Warning);
        assert_eq!(classify_severity(-3.01), Severity::Critical);
        assert_eq!(classify_severity(2.5), Severity::Info);
        assert_eq!(classify_severity(2.51), Severity::Warning);
    }

    #[test]
    fn short_series_is_insufficient() {
        assert_eq!(
            baseline(&[1.0, 2.0]),
            Err(InsufficientData {
                required: 3,
                available: 2,
            })
        );
    }
}
