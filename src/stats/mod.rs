//! Outcome collection and aggregation.
//!
//! Runners push one [`RequestOutcome`] per request attempt into a
//! [`ShardedAggregator`]. Shards are lock-striped by runner id so `record` is
//! a short critical section on one shard and never contends with a snapshot
//! for longer than a single shard read. `snapshot` merges every shard into
//! cumulative [`AggregateStats`] over all outcomes since test start.

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::ErrorKind;

/// The recorded result of one request attempt. Created once, never mutated;
/// owned by the aggregator after `record`.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub started_at: Instant,
    pub duration: Duration,
    /// HTTP status for attempts that produced a response.
    pub status: Option<u16>,
    /// Transport-level failure for attempts that did not.
    pub error: Option<ErrorKind>,
    pub response_bytes: u64,
}

impl RequestOutcome {
    /// Failed means a transport error or an HTTP error status. Both count
    /// against the error rate; neither is ever dropped from the sample.
    pub fn is_failure(&self) -> bool {
        self.error.is_some() || self.status.is_some_and(|s| s >= 400)
    }
}

/// Latency histogram bounds: 1us to 1h, 2 significant figures.
fn new_latency_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(1, 60 * 60 * 1000 * 1000, 2).unwrap()
}

/// Single-shard accumulator. Not shared directly; lives behind a shard lock
/// in [`ShardedAggregator`] or stands alone in tests.
pub struct StatsAggregator {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Duration,
    pub status_codes: HashMap<u16, u64>,
    pub errors: HashMap<ErrorKind, u64>,
    /// check name -> (total, passed)
    pub checks: HashMap<String, (u64, u64)>,
    pub data_received: u64,
    histogram: Histogram<u64>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            failed_requests: 0,
            total_duration: Duration::ZERO,
            min_duration: None,
            max_duration: Duration::ZERO,
            status_codes: HashMap::new(),
            errors: HashMap::new(),
            checks: HashMap::new(),
            data_received: 0,
            histogram: new_latency_histogram(),
        }
    }

    pub fn record(&mut self, outcome: RequestOutcome) {
        self.total_requests += 1;
        self.total_duration += outcome.duration;

        if self.min_duration.is_none_or(|min| outcome.duration < min) {
            self.min_duration = Some(outcome.duration);
        }
        if outcome.duration > self.max_duration {
            self.max_duration = outcome.duration;
        }

        let micros = outcome.duration.as_micros() as u64;
        let _ = self.histogram.record(micros.max(1));

        if let Some(status) = outcome.status {
            *self.status_codes.entry(status).or_insert(0) += 1;
        }
        if let Some(kind) = outcome.error {
            *self.errors.entry(kind).or_insert(0) += 1;
        }
        if outcome.is_failure() {
            self.failed_requests += 1;
        }

        self.data_received += outcome.response_bytes;
    }

    pub fn record_check(&mut self, name: &str, passed: bool) {
        let entry = self.checks.entry(name.to_string()).or_insert((0, 0));
        entry.0 += 1;
        if passed {
            entry.1 += 1;
        }
    }

    fn merge_from(&mut self, other: &StatsAggregator) {
        self.total_requests += other.total_requests;
        self.failed_requests += other.failed_requests;
        self.total_duration += other.total_duration;

        if let Some(other_min) = other.min_duration {
            if self.min_duration.is_none_or(|min| other_min < min) {
                self.min_duration = Some(other_min);
            }
        }
        if other.max_duration > self.max_duration {
            self.max_duration = other.max_duration;
        }

        for (code, count) in &other.status_codes {
            *self.status_codes.entry(*code).or_insert(0) += count;
        }
        for (kind, count) in &other.errors {
            *self.errors.entry(*kind).or_insert(0) += count;
        }
        for (name, (total, passed)) in &other.checks {
            let entry = self.checks.entry(name.clone()).or_insert((0, 0));
            entry.0 += total;
            entry.1 += passed;
        }

        self.data_received += other.data_received;
        self.histogram.add(&other.histogram).ok();
    }

    fn quantile_ms(&self, q: f64) -> f64 {
        Duration::from_micros(self.histogram.value_at_quantile(q)).as_secs_f64() * 1000.0
    }

    pub fn to_stats(&self) -> AggregateStats {
        let avg_latency_ms = if self.total_requests > 0 {
            self.total_duration.as_secs_f64() * 1000.0 / self.total_requests as f64
        } else {
            0.0
        };
        let error_rate = if self.total_requests > 0 {
            self.failed_requests as f64 / self.total_requests as f64
        } else {
            0.0
        };

        AggregateStats {
            requests: self.total_requests,
            failures: self.failed_requests,
            error_rate,
            avg_latency_ms,
            min_latency_ms: self.min_duration.unwrap_or_default().as_secs_f64() * 1000.0,
            max_latency_ms: self.max_duration.as_secs_f64() * 1000.0,
            p50_latency_ms: self.quantile_ms(0.5),
            p90_latency_ms: self.quantile_ms(0.9),
            p95_latency_ms: self.quantile_ms(0.95),
            p99_latency_ms: self.quantile_ms(0.99),
            status_codes: self.status_codes.clone(),
            errors: self
                .errors
                .iter()
                .map(|(kind, count)| (kind.as_str().to_string(), *count))
                .collect(),
            checks: self.checks.clone(),
            data_received: self.data_received,
        }
    }
}

/// Cumulative statistics over all outcomes recorded since test start.
///
/// Percentiles come from an HDR histogram with 2 significant figures, values
/// recorded in microseconds. `value_at_quantile` returns the highest value in
/// the bucket at the quantile's rank, so the result is fully determined by
/// the multiset of recorded latencies and independent of arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateStats {
    pub requests: u64,
    pub failures: u64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p90_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub status_codes: HashMap<u16, u64>,
    pub errors: HashMap<String, u64>,
    pub checks: HashMap<String, (u64, u64)>,
    pub data_received: u64,
}

impl AggregateStats {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Print the console summary.
    pub fn report(&self) {
        println!("\n--- Test Summary ---");
        if self.requests == 0 {
            println!("No requests recorded.");
            println!("--------------------\n");
            return;
        }

        println!("Total Requests: {}", self.requests);
        println!(
            "Failed:         {} ({:.2}%)",
            self.failures,
            self.error_rate * 100.0
        );
        println!("Avg Latency:    {:.2}ms", self.avg_latency_ms);
        println!("Min Latency:    {:.2}ms", self.min_latency_ms);
        println!("Max Latency:    {:.2}ms", self.max_latency_ms);
        println!("P50 Latency:    {:.2}ms", self.p50_latency_ms);
        println!("P90 Latency:    {:.2}ms", self.p90_latency_ms);
        println!("P95 Latency:    {:.2}ms", self.p95_latency_ms);
        println!("P99 Latency:    {:.2}ms", self.p99_latency_ms);

        if !self.status_codes.is_empty() {
            println!("\nStatus Codes:");
            let mut codes: Vec<_> = self.status_codes.iter().collect();
            codes.sort_by_key(|(code, _)| **code);
            for (code, count) in codes {
                println!("  {}: {}", code, count);
            }
        }

        if !self.errors.is_empty() {
            println!("\nErrors:");
            let mut errors: Vec<_> = self.errors.iter().collect();
            errors.sort_by_key(|(kind, _)| kind.as_str());
            for (kind, count) in errors {
                println!("  {}: {}", kind, count);
            }
        }

        if !self.checks.is_empty() {
            println!("\nChecks:");
            let mut checks: Vec<_> = self.checks.iter().collect();
            checks.sort_by_key(|(name, _)| name.as_str());
            for (name, (total, passed)) in checks {
                let percent = *passed as f64 / (*total).max(1) as f64 * 100.0;
                println!("  {} : {:.2}% ({}/{} passed)", name, percent, passed, total);
            }
        }

        let mb = self.data_received as f64 / 1_048_576.0;
        println!("\nData Received: {:.2} MB", mb);
        println!("--------------------\n");
    }
}

/// Sharded aggregator for reduced lock contention at high concurrency.
/// Outcomes are striped across shards by runner id; every `record` touches
/// exactly one shard, so N concurrent records followed by a snapshot always
/// observe exactly N outcomes.
pub struct ShardedAggregator {
    shards: Vec<RwLock<StatsAggregator>>,
}

impl ShardedAggregator {
    pub fn new(num_shards: usize) -> Self {
        let shards = (0..num_shards.max(1))
            .map(|_| RwLock::new(StatsAggregator::new()))
            .collect();
        Self { shards }
    }

    /// Shard count scaled to the peak worker pool, ~100 workers per shard.
    pub fn for_workers(peak_workers: usize) -> Self {
        Self::new((peak_workers / 100).clamp(16, 256))
    }

    pub fn record(&self, runner_id: usize, outcome: RequestOutcome) {
        let shard = &self.shards[runner_id % self.shards.len()];
        shard.write().record(outcome);
    }

    pub fn record_check(&self, runner_id: usize, name: &str, passed: bool) {
        let shard = &self.shards[runner_id % self.shards.len()];
        shard.write().record_check(name, passed);
    }

    /// Merge all shards into a single accumulator.
    pub fn merge(&self) -> StatsAggregator {
        let mut merged = StatsAggregator::new();
        for shard in &self.shards {
            merged.merge_from(&shard.read());
        }
        merged
    }

    /// Cumulative statistics over everything recorded so far.
    pub fn snapshot(&self) -> AggregateStats {
        self.merge().to_stats()
    }
}
