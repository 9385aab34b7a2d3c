//! Analytics (C12): volume prediction, trend, level distribution, and
//! frequency/pattern anomaly detection over indexed records.
//!
//! The regression itself is a few closed-form sums, not worth a numerics
//! crate dependency (`ndarray`/`nalgebra`) for.

use crate::index::IndexEngine;
use crate::model::LogRecord;
use crate::patterns::PatternRecognizer;
use std::collections::HashMap;

const DEFAULT_ANOMALY_THRESHOLD: f64 = 2.0;
const TREND_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct PredictiveResult {
    pub prediction_type: String,
    pub prediction_timestamp: i64,
    pub predicted_value: f64,
    pub confidence_level: f64,
    pub description: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl TrendDirection {
    fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "INCREASING",
            TrendDirection::Decreasing => "DECREASING",
            TrendDirection::Stable => "STABLE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyBucket {
    pub bucket_start: i64,
    pub count: u64,
    pub mean: f64,
    pub stddev: f64,
}

pub struct Analytics {
    min_sample_size: usize,
}

impl Analytics {
    pub fn new(min_sample_size: usize) -> Self {
        Self { min_sample_size }
    }

    fn bucket_counts(records: &[LogRecord], start: i64, bucket_minutes: i64) -> Vec<(i64, u64)> {
        let bucket_ms = bucket_minutes.max(1) * 60_000;
        let mut counts: HashMap<i64, u64> = HashMap::new();
        for record in records {
            let bucket = start + ((record.timestamp - start) / bucket_ms) * bucket_ms;
            *counts.entry(bucket).or_insert(0) += 1;
        }
        let mut buckets: Vec<(i64, u64)> = counts.into_iter().collect();
        buckets.sort_by_key(|(ts, _)| *ts);
        buckets
    }

    /// Ordinary least squares over `(x, y)` pairs; returns `(slope,
    /// intercept, r_squared)`. `x` values are bucket indices, not raw
    /// timestamps, so the regression is numerically well-conditioned.
    fn linear_regression(points: &[(f64, f64)]) -> (f64, f64, f64) {
        let n = points.len() as f64;
        let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
        let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
        let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
        let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();
        let denom = n * sum_xx - sum_x * sum_x;
        if denom.abs() < f64::EPSILON {
            return (0.0, sum_y / n, 0.0);
        }
        let slope = (n * sum_xy - sum_x * sum_y) / denom;
        let intercept = (sum_y - slope * sum_x) / n;

        let mean_y = sum_y / n;
        let ss_tot: f64 = points.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();
        let ss_res: f64 = points
            .iter()
            .map(|(x, y)| {
                let predicted = slope * x + intercept;
                (y - predicted).powi(2)
            })
            .sum();
        let r_squared = if ss_tot.abs() < f64::EPSILON { 1.0 } else { 1.0 - ss_res / ss_tot };
        (slope, intercept, r_squared)
    }

    /// Volume prediction: buckets the range, fits a regression over bucket
    /// counts, and projects `horizon_buckets` into the future.
    pub async fn predict_volume(
        &self,
        index: &IndexEngine,
        start: i64,
        end: i64,
        bucket_minutes: i64,
        horizon_buckets: usize,
    ) -> crate::error::Result<Vec<PredictiveResult>> {
        let records = index.search("*", false, Some(start), Some(end)).await?;
        if records.len() < self.min_sample_size {
            return Ok(Vec::new());
        }
        let buckets = Self::bucket_counts(&records, start, bucket_minutes);
        if buckets.len() < 2 {
            return Ok(Vec::new());
        }
        let points: Vec<(f64, f64)> = buckets.iter().enumerate().map(|(i, (_, c))| (i as f64, *c as f64)).collect();
        let (slope, intercept, r_squared) = Self::linear_regression(&points);
        let confidence = r_squared.clamp(0.0, 1.0);
        let bucket_ms = bucket_minutes.max(1) * 60_000;
        let last_index = buckets.len() as f64 - 1.0;
        let last_ts = buckets.last().unwrap().0;

        Ok((1..=horizon_buckets)
            .map(|step| {
                let x = last_index + step as f64;
                let predicted = (slope * x + intercept).max(0.0);
                PredictiveResult {
                    prediction_type: "VOLUME".to_string(),
                    prediction_timestamp: last_ts + step as i64 * bucket_ms,
                    predicted_value: predicted,
                    confidence_level: confidence,
                    description: format!("projected log volume {step} bucket(s) ahead"),
                    metadata: HashMap::new(),
                }
            })
            .collect())
    }

    /// Trend: one result summarizing the direction and strength of change.
    pub async fn trend(&self, index: &IndexEngine, start: i64, end: i64, bucket_minutes: i64) -> crate::error::Result<Option<PredictiveResult>> {
        let records = index.search("*", false, Some(start), Some(end)).await?;
        if records.len() < self.min_sample_size {
            return Ok(None);
        }
        let buckets = Self::bucket_counts(&records, start, bucket_minutes);
        if buckets.len() < 2 {
            return Ok(None);
        }
        let points: Vec<(f64, f64)> = buckets.iter().enumerate().map(|(i, (_, c))| (i as f64, *c as f64)).collect();
        let (slope, _intercept, r_squared) = Self::linear_regression(&points);
        let direction = if slope.abs() < TREND_EPSILON {
            TrendDirection::Stable
        } else if slope > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };

        let mut metadata = HashMap::new();
        metadata.insert("trendDirection".to_string(), direction.as_str().to_string());
        metadata.insert("slope".to_string(), slope.to_string());
        metadata.insert("rSquared".to_string(), r_squared.to_string());

        Ok(Some(PredictiveResult {
            prediction_type: "TREND".to_string(),
            prediction_timestamp: end,
            predicted_value: slope,
            confidence_level: r_squared.clamp(0.0, 1.0),
            description: format!("log volume trend is {}", direction.as_str()),
            metadata,
        }))
    }

    /// Level distribution as percentages summing to 100 (within float
    /// rounding tolerance).
    pub async fn level_distribution(&self, index: &IndexEngine, start: i64, end: i64) -> crate::error::Result<HashMap<String, f64>> {
        let records = index.search("*", false, Some(start), Some(end)).await?;
        if records.len() < self.min_sample_size {
            return Ok(HashMap::new());
        }
        let total = records.len() as f64;
        let mut counts: HashMap<String, u64> = HashMap::new();
        for record in &records {
            *counts.entry(record.level.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(counts.into_iter().map(|(k, v)| (k, (v as f64 / total) * 100.0)).collect())
    }

    /// Tumbling-window frequency anomaly detection: flags buckets whose
    /// count exceeds `mean + threshold * stddev` over the historical set.
    pub async fn frequency_anomalies(
        &self,
        index: &IndexEngine,
        start: i64,
        end: i64,
        bucket_minutes: i64,
        threshold: Option<f64>,
    ) -> crate::error::Result<Vec<AnomalyBucket>> {
        let records = index.search("*", false, Some(start), Some(end)).await?;
        if records.len() < self.min_sample_size {
            return Ok(Vec::new());
        }
        let buckets = Self::bucket_counts(&records, start, bucket_minutes);
        if buckets.is_empty() {
            return Ok(Vec::new());
        }
        let counts: Vec<f64> = buckets.iter().map(|(_, c)| *c as f64).collect();
        let mean = counts.iter().sum::<f64>() / counts.len() as f64;
        let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / counts.len() as f64;
        let stddev = variance.sqrt();
        let threshold = threshold.unwrap_or(DEFAULT_ANOMALY_THRESHOLD);

        Ok(buckets
            .into_iter()
            .filter(|(_, count)| (*count as f64) > mean + threshold * stddev)
            .map(|(bucket_start, count)| AnomalyBucket {
                bucket_start,
                count,
                mean,
                stddev,
            })
            .collect())
    }

    /// Pattern anomaly: frequency analysis over C11 templates instead of
    /// raw record counts.
    pub async fn pattern_anomalies(
        &self,
        index: &IndexEngine,
        recognizer: &PatternRecognizer,
        start: i64,
        end: i64,
        threshold: Option<f64>,
    ) -> crate::error::Result<Vec<(String, u64)>> {
        let records = index.search("*", false, Some(start), Some(end)).await?;
        if records.len() < self.min_sample_size {
            return Ok(Vec::new());
        }
        let counts = recognizer.tally(&records);
        let values: Vec<f64> = counts.values().map(|c| *c as f64).collect();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance = values.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / values.len() as f64;
        let stddev = variance.sqrt();
        let threshold = threshold.unwrap_or(DEFAULT_ANOMALY_THRESHOLD);
        Ok(counts.into_iter().filter(|(_, c)| (*c as f64) > mean + threshold * stddev).collect())
    }
}
