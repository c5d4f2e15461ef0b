//! Scoring and trend projection over closed windows

use crate::models::{Confidence, Forecast, PerformanceWindow, ServerId, Trend};

/// Score used when a server has no samples yet
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Weights applied to the normalized latency and error terms
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub latency: f64,
    pub error: f64,
    /// Latency that maps to 100 on the normalized scale
    pub reference_latency_ms: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            latency: 0.5,
            error: 1.0,
            reference_latency_ms: 2000.0,
        }
    }
}

/// `clamp(100 - w1 * normalized_latency - w2 * error_percent, 0, 100)`
///
/// `error_rate` is a fraction.
pub fn score_from(mean_latency_ms: f64, error_rate: f64, weights: &ScoreWeights) -> f64 {
    let normalized_latency = mean_latency_ms / weights.reference_latency_ms * 100.0;
    let error_percent = error_rate * 100.0;
    (100.0 - weights.latency * normalized_latency - weights.error * error_percent).clamp(0.0, 100.0)
}

/// Ordinary least squares over `(x, y)` points, returning `(slope, intercept)`
///
/// `None` with fewer than two points or when every x is equal.
pub fn linear_regression(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.len() < 2 {
        return None;
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (mut cov, mut var) = (0.0, 0.0);
    for (x, y) in points {
        cov += (x - mean_x) * (y - mean_y);
        var += (x - mean_x) * (x - mean_x);
    }
    if var == 0.0 {
        return None;
    }

    let slope = cov / var;
    Some((slope, mean_y - slope * mean_x))
}

/// Project mean latency `horizon_days` past the newest window
///
/// Windows are day windows, oldest first; empty ones are ignored.
pub fn forecast(
    server_id: ServerId,
    windows: &[PerformanceWindow],
    horizon_days: u32,
) -> Option<Forecast> {
    let populated: Vec<_> = windows.iter().filter(|w| w.sample_count > 0).collect();
    let first = populated.first()?.start;

    let points: Vec<(f64, f64)> = populated
        .iter()
        .map(|w| {
            let day = (w.start - first).num_seconds() as f64 / 86_400.0;
            (day, w.mean_latency_ms)
        })
        .collect();
    let (slope, intercept) = linear_regression(&points)?;

    let last_x = points.last().map(|(x, _)| *x).unwrap_or(0.0);
    let predicted = (intercept + slope * (last_x + horizon_days as f64)).max(0.0);

    Some(Forecast {
        server_id,
        horizon_days,
        samples: points.len(),
        slope,
        predicted_latency_ms: predicted,
        trend: if slope > 0.0 {
            Trend::Increasing
        } else {
            Trend::Decreasing
        },
        confidence: Confidence::from_samples(points.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Granularity;
    use chrono::{Duration, TimeZone, Utc};

    fn day_window(day: i64, latency: f64, samples: u64) -> PerformanceWindow {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day);
        PerformanceWindow {
            server_id: 1,
            granularity: Granularity::Day,
            start,
            end: start + Duration::days(1),
            sample_count: samples,
            mean_latency_ms: latency,
            error_rate: 0.0,
            bytes_transferred: 0,
        }
    }

    #[test]
    fn test_score_formula() {
        let w = ScoreWeights::default();
        assert_eq!(score_from(0.0, 0.0, &w), 100.0);
        // 200ms = 10 normalized, 2% errors
        assert!((score_from(200.0, 0.02, &w) - 93.0).abs() < 1e-9);
        assert_eq!(score_from(10_000.0, 0.5, &w), 0.0);
    }

    #[test]
    fn test_regression_fits_a_line() {
        let points = [(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)];
        let (slope, intercept) = linear_regression(&points).unwrap();
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((intercept - 1.0).abs() < 1e-9);

        assert!(linear_regression(&[(1.0, 1.0)]).is_none());
        assert!(linear_regression(&[(1.0, 1.0), (1.0, 2.0)]).is_none());
    }

    #[test]
    fn test_forecast_trend_and_confidence() {
        let rising: Vec<_> = (0..10).map(|d| day_window(d, 100.0 + 10.0 * d as f64, 5)).collect();
        let f = forecast(1, &rising, 7).unwrap();
        assert_eq!(f.trend, Trend::Increasing);
        assert_eq!(f.confidence, Confidence::Medium);
        assert_eq!(f.samples, 10);
        assert!((f.predicted_latency_ms - 260.0).abs() < 1e-6);

        let falling: Vec<_> = (0..3).map(|d| day_window(d, 300.0 - 50.0 * d as f64, 5)).collect();
        let f = forecast(1, &falling, 30).unwrap();
        assert_eq!(f.trend, Trend::Decreasing);
        assert_eq!(f.confidence, Confidence::Low);
        assert_eq!(f.predicted_latency_ms, 0.0);
    }

    #[test]
    fn test_forecast_skips_empty_windows() {
        let windows = vec![day_window(0, 100.0, 0), day_window(1, 120.0, 3)];
        assert!(forecast(1, &windows, 7).is_none());
    }
}
