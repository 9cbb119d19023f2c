//! Pass/fail thresholds over aggregate statistics.
//!
//! A threshold is declared as a text expression like `"p95_latency_ms < 500"`
//! or `"error_rate < 0.01"`. Metric names form a closed enum, so an unknown
//! name is a `ConfigError` at parse time, never a silent zero at evaluation
//! time.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigError;
use crate::stats::AggregateStats;

/// The aggregates a threshold may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MetricId {
    P50LatencyMs,
    P90LatencyMs,
    P95LatencyMs,
    P99LatencyMs,
    AvgLatencyMs,
    MaxLatencyMs,
    ErrorRate,
    Requests,
}

impl MetricId {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "p50_latency_ms" => Ok(MetricId::P50LatencyMs),
            "p90_latency_ms" => Ok(MetricId::P90LatencyMs),
            "p95_latency_ms" => Ok(MetricId::P95LatencyMs),
            "p99_latency_ms" => Ok(MetricId::P99LatencyMs),
            "avg_latency_ms" => Ok(MetricId::AvgLatencyMs),
            "max_latency_ms" => Ok(MetricId::MaxLatencyMs),
            "error_rate" => Ok(MetricId::ErrorRate),
            "requests" => Ok(MetricId::Requests),
            other => Err(ConfigError::UnknownMetric(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricId::P50LatencyMs => "p50_latency_ms",
            MetricId::P90LatencyMs => "p90_latency_ms",
            MetricId::P95LatencyMs => "p95_latency_ms",
            MetricId::P99LatencyMs => "p99_latency_ms",
            MetricId::AvgLatencyMs => "avg_latency_ms",
            MetricId::MaxLatencyMs => "max_latency_ms",
            MetricId::ErrorRate => "error_rate",
            MetricId::Requests => "requests",
        }
    }

    pub fn observed(&self, stats: &AggregateStats) -> f64 {
        match self {
            MetricId::P50LatencyMs => stats.p50_latency_ms,
            MetricId::P90LatencyMs => stats.p90_latency_ms,
            MetricId::P95LatencyMs => stats.p95_latency_ms,
            MetricId::P99LatencyMs => stats.p99_latency_ms,
            MetricId::AvgLatencyMs => stats.avg_latency_ms,
            MetricId::MaxLatencyMs => stats.max_latency_ms,
            MetricId::ErrorRate => stats.error_rate,
            MetricId::Requests => stats.requests as f64,
        }
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Comparator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl Comparator {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "<" => Some(Comparator::Lt),
            "<=" => Some(Comparator::Le),
            ">" => Some(Comparator::Gt),
            ">=" => Some(Comparator::Ge),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        }
    }

    fn holds(&self, observed: f64, expected: f64) -> bool {
        match self {
            Comparator::Lt => observed < expected,
            Comparator::Le => observed <= expected,
            Comparator::Gt => observed > expected,
            Comparator::Ge => observed >= expected,
        }
    }
}

/// One declared pass/fail condition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ThresholdSpec {
    pub metric: MetricId,
    pub comparator: Comparator,
    pub value: f64,
}

impl ThresholdSpec {
    /// Parse an expression like `"p95_latency_ms < 500"`. Whitespace around
    /// the comparator is required.
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        let [metric, op, value] = parts.as_slice() else {
            return Err(ConfigError::InvalidThreshold(expr.to_string()));
        };

        let metric = MetricId::parse(metric)?;
        let comparator = Comparator::parse(op)
            .ok_or_else(|| ConfigError::InvalidThreshold(expr.to_string()))?;
        let value = value
            .parse::<f64>()
            .map_err(|_| ConfigError::InvalidThreshold(expr.to_string()))?;

        Ok(Self {
            metric,
            comparator,
            value,
        })
    }
}

impl fmt::Display for ThresholdSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.metric,
            self.comparator.as_str(),
            self.value
        )
    }
}

/// A violated threshold, with the verbatim observed value at failure time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdBreach {
    pub spec: ThresholdSpec,
    pub observed: f64,
}

impl fmt::Display for ThresholdBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "threshold failed: {} (observed {} = {})",
            self.spec, self.spec.metric, self.observed
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Pass,
    Fail(Vec<ThresholdBreach>),
    /// Not enough samples to judge yet.
    Pending,
}

/// Evaluates the declared thresholds against snapshots on a cadence and once
/// more at test completion. Fail is sticky: once any spec has been breached
/// the evaluator reports Fail for the rest of the run, keeping the first
/// observed value for each breached spec.
pub struct ThresholdEvaluator {
    specs: Vec<ThresholdSpec>,
    min_samples: u64,
    breaches: Vec<ThresholdBreach>,
}

impl ThresholdEvaluator {
    pub fn new(specs: Vec<ThresholdSpec>, min_samples: u64) -> Self {
        Self {
            specs,
            min_samples,
            breaches: Vec::new(),
        }
    }

    pub fn evaluate(&mut self, stats: &AggregateStats) -> Evaluation {
        if !self.breaches.is_empty() {
            // Sticky: new snapshots may add breaches but never clear them.
            self.collect_breaches(stats);
            return Evaluation::Fail(self.breaches.clone());
        }

        if self.specs.is_empty() {
            return Evaluation::Pass;
        }
        if stats.requests < self.min_samples {
            return Evaluation::Pending;
        }

        self.collect_breaches(stats);
        if self.breaches.is_empty() {
            Evaluation::Pass
        } else {
            Evaluation::Fail(self.breaches.clone())
        }
    }

    fn collect_breaches(&mut self, stats: &AggregateStats) {
        for spec in &self.specs {
            if self.breaches.iter().any(|b| b.spec == *spec) {
                continue;
            }
            let observed = spec.metric.observed(stats);
            if !spec.comparator.holds(observed, spec.value) {
                self.breaches.push(ThresholdBreach {
                    spec: *spec,
                    observed,
                });
            }
        }
    }

    pub fn breaches(&self) -> &[ThresholdBreach] {
        &self.breaches
    }
}
