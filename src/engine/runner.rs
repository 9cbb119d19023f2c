//! Virtual user runner: the per-VU iteration loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::engine::control::ControlState;
use crate::engine::http_client::HttpSend;
use crate::error::ErrorKind;
use crate::stats::{RequestOutcome, ShardedAggregator};
use crate::target::TargetDescriptor;

/// A named assertion evaluated against every outcome, recorded as a
/// (total, passed) pair in the aggregator.
#[derive(Debug, Clone)]
pub struct CheckSpec {
    pub name: String,
    pub predicate: CheckPredicate,
}

#[derive(Debug, Clone, Copy)]
pub enum CheckPredicate {
    StatusIs(u16),
    DurationUnder(Duration),
}

impl CheckSpec {
    pub fn passes(&self, outcome: &RequestOutcome) -> bool {
        match self.predicate {
            CheckPredicate::StatusIs(expected) => outcome.status == Some(expected),
            CheckPredicate::DurationUnder(limit) => outcome.duration < limit,
        }
    }
}

/// One virtual user. Owns nothing shared with other runners except the
/// outcome sink; the scheduler holds the `running` flag to scale it down.
pub struct Runner {
    pub id: usize,
    pub descriptor: Arc<TargetDescriptor>,
    pub checks: Arc<Vec<CheckSpec>>,
    pub client: Arc<dyn HttpSend>,
    pub sink: Arc<ShardedAggregator>,
    pub control: Arc<ControlState>,
    pub running: Arc<AtomicBool>,
    /// Sleep between iterations; the only suspension point besides the
    /// request itself, and where cancellation takes effect.
    pub pacing: Option<Duration>,
    pub timeout: Duration,
    /// Optional per-VU iteration budget.
    pub iterations: Option<u64>,
}

impl Runner {
    pub async fn run_loop(self) {
        let mut iteration: u64 = 0;

        while self.running.load(Ordering::Relaxed) && !self.control.is_stopped() {
            let started_at = Instant::now();

            let outcome = match self.descriptor.render(self.id, iteration) {
                Ok(request) => match self.client.send(request, self.timeout).await {
                    Ok(result) => RequestOutcome {
                        started_at,
                        duration: started_at.elapsed(),
                        status: Some(result.status),
                        error: None,
                        response_bytes: result.body_bytes,
                    },
                    Err(kind) => RequestOutcome {
                        started_at,
                        duration: started_at.elapsed(),
                        status: None,
                        error: Some(kind),
                        response_bytes: 0,
                    },
                },
                // Descriptors are validated before the run; a render failure
                // here means a template expanded into garbage.
                Err(_) => RequestOutcome {
                    started_at,
                    duration: started_at.elapsed(),
                    status: None,
                    error: Some(ErrorKind::Protocol),
                    response_bytes: 0,
                },
            };

            for check in self.checks.iter() {
                self.sink
                    .record_check(self.id, &check.name, check.passes(&outcome));
            }
            self.sink.record(self.id, outcome);

            iteration += 1;
            if self.iterations.is_some_and(|max| iteration >= max) {
                break;
            }

            if let Some(pacing) = self.pacing {
                tokio::time::sleep(pacing).await;
            }
        }
    }
}
