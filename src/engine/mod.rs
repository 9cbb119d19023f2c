//! The scheduler: owns the virtual user pool, walks the ramp schedule, and
//! produces the run's final verdict.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{RampStage, TestPlan};
use crate::error::ConfigError;
use crate::stats::{AggregateStats, ShardedAggregator};
use crate::threshold::{Evaluation, ThresholdBreach, ThresholdEvaluator};

pub mod control;
pub mod http_client;
pub mod runner;

use control::{ControlCommand, ControlState};
use http_client::HttpSend;
use runner::Runner;

/// Pool adjustments and control commands are applied on this cadence.
const CONTROL_TICK: Duration = Duration::from_millis(100);
/// Thresholds are evaluated on this cadence, and once more at completion.
const EVAL_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle of one run. Terminal states are final; a new run gets a fresh
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Aborted,
}

/// Final verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Ramp exhausted, thresholds passed (or never became judgeable).
    CompletedPass,
    /// Ramp exhausted, but a threshold was breached.
    CompletedFail,
    /// Threshold hard-fail or external cancellation cut the run short.
    Aborted,
}

/// Observable state of a run, shared with embedding applications. Created at
/// test start, meaningful until the final report is produced.
pub struct TestRunState {
    status: RwLock<RunStatus>,
    started: RwLock<Option<Instant>>,
    control: Arc<ControlState>,
    aggregator: Arc<ShardedAggregator>,
}

impl TestRunState {
    fn new(control: Arc<ControlState>, aggregator: Arc<ShardedAggregator>) -> Self {
        Self {
            status: RwLock::new(RunStatus::Idle),
            started: RwLock::new(None),
            control,
            aggregator,
        }
    }

    pub fn status(&self) -> RunStatus {
        *self.status.read()
    }

    pub fn active_vus(&self) -> usize {
        self.control.active_vus()
    }

    pub fn elapsed(&self) -> Duration {
        self.started
            .read()
            .map(|s| s.elapsed())
            .unwrap_or_default()
    }

    /// Statistics over everything recorded so far; safe to call while the
    /// test is running.
    pub fn snapshot(&self) -> AggregateStats {
        self.aggregator.snapshot()
    }

    /// External cancellation: runners stop at their next iteration boundary
    /// and the run ends with an `Aborted` verdict.
    pub fn cancel(&self) {
        self.control.stop();
    }
}

/// Everything the run produced, returned once after the run ends.
pub struct RunReport {
    pub verdict: Verdict,
    pub stats: AggregateStats,
    pub breaches: Vec<ThresholdBreach>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::CompletedPass
    }
}

/// Drives one test run: spawns and retires runners to track the ramp
/// schedule, evaluates thresholds on a cadence, and enforces the overall
/// duration and the graceful-stop window.
pub struct Scheduler {
    plan: TestPlan,
    client: Arc<dyn HttpSend>,
    control: Arc<ControlState>,
    state: Arc<TestRunState>,
    aggregator: Arc<ShardedAggregator>,
    control_rx: Option<Receiver<ControlCommand>>,
}

impl Scheduler {
    pub fn new(plan: TestPlan, client: Arc<dyn HttpSend>) -> Self {
        let peak = plan
            .stages
            .iter()
            .map(|s| s.target_vus)
            .max()
            .unwrap_or(1);
        let aggregator = Arc::new(ShardedAggregator::for_workers(peak));
        let control = Arc::new(ControlState::new());
        let state = Arc::new(TestRunState::new(control.clone(), aggregator.clone()));
        Self {
            plan,
            client,
            control,
            state,
            aggregator,
            control_rx: None,
        }
    }

    /// Attach a command channel polled by the control loop.
    pub fn with_control(mut self, rx: Receiver<ControlCommand>) -> Self {
        self.control_rx = Some(rx);
        self
    }

    /// Shared observable state; grab a handle before calling [`run`].
    ///
    /// [`run`]: Scheduler::run
    pub fn state(&self) -> Arc<TestRunState> {
        self.state.clone()
    }

    /// Execute the run to completion. Consumes the scheduler: terminal states
    /// are final, a new run needs a fresh `Scheduler`.
    pub async fn run(self) -> Result<RunReport, ConfigError> {
        if self.plan.stages.is_empty() {
            return Err(ConfigError::EmptyRamp);
        }
        let total_duration: Duration = self.plan.stages.iter().map(|s| s.duration).sum();
        if total_duration.is_zero() {
            return Err(ConfigError::ZeroRampDuration);
        }

        let start = Instant::now();
        *self.state.status.write() = RunStatus::Running;
        *self.state.started.write() = Some(start);
        info!(
            stages = self.plan.stages.len(),
            total_secs = total_duration.as_secs_f64(),
            "starting load test"
        );

        let mut evaluator =
            ThresholdEvaluator::new(self.plan.thresholds.clone(), self.plan.min_samples);
        let mut pool: Vec<(JoinHandle<()>, Arc<AtomicBool>)> = Vec::new();
        let mut retired: Vec<(JoinHandle<()>, Arc<AtomicBool>)> = Vec::new();
        let mut next_id: usize = 0;
        let mut last_eval = start;
        let mut aborted = false;

        loop {
            let elapsed = start.elapsed();
            if elapsed >= total_duration {
                break;
            }
            if self.control.is_stopped() {
                aborted = true;
                break;
            }

            if let Some(rx) = &self.control_rx {
                while let Ok(cmd) = rx.try_recv() {
                    match cmd {
                        ControlCommand::Stop => {
                            info!("stop command received");
                            self.control.stop();
                        }
                    }
                }
            }

            let target = Self::target_vus(&self.plan.stages, elapsed);
            while pool.len() < target {
                let running = Arc::new(AtomicBool::new(true));
                let r = Runner {
                    id: next_id,
                    descriptor: self.plan.descriptor.clone(),
                    checks: self.plan.checks.clone(),
                    client: self.client.clone(),
                    sink: self.aggregator.clone(),
                    control: self.control.clone(),
                    running: running.clone(),
                    pacing: self.plan.pacing,
                    timeout: self.plan.timeout,
                    iterations: self.plan.iterations,
                };
                pool.push((tokio::spawn(r.run_loop()), running));
                next_id += 1;
            }
            while pool.len() > target {
                // Scale down: the runner finishes its current iteration and
                // exits; joined during shutdown like everyone else.
                if let Some((handle, running)) = pool.pop() {
                    running.store(false, Ordering::Relaxed);
                    retired.push((handle, running));
                }
            }
            self.control.set_active_vus(pool.len());
            debug!(active_vus = pool.len(), elapsed_ms = elapsed.as_millis() as u64, "tick");

            // With a per-VU iteration budget the pool can drain itself
            // before the schedule runs out.
            if self.plan.iterations.is_some()
                && !pool.is_empty()
                && pool.iter().all(|(h, _)| h.is_finished())
            {
                break;
            }

            if last_eval.elapsed() >= EVAL_INTERVAL {
                let stats = self.aggregator.snapshot();
                if let Evaluation::Fail(breaches) = evaluator.evaluate(&stats) {
                    for breach in &breaches {
                        warn!(%breach, "threshold breached");
                    }
                    if self.plan.abort_on_fail {
                        self.control.stop();
                        aborted = true;
                        break;
                    }
                }
                last_eval = Instant::now();
            }

            tokio::time::sleep(CONTROL_TICK).await;
        }

        // Signal every runner, then wait out the graceful-stop window for
        // in-flight requests to finish or hit their own timeout.
        for (_, running) in pool.iter().chain(retired.iter()) {
            running.store(false, Ordering::Relaxed);
        }
        let deadline = Instant::now() + self.plan.grace;
        for (mut handle, _) in pool.into_iter().chain(retired) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!("runner did not finish within the grace period, aborting it");
                handle.abort();
            }
        }
        self.control.set_active_vus(0);

        // Final evaluation over the complete outcome set.
        let stats = self.aggregator.snapshot();
        let final_eval = evaluator.evaluate(&stats);

        let verdict = if aborted {
            Verdict::Aborted
        } else {
            match final_eval {
                Evaluation::Fail(_) => Verdict::CompletedFail,
                Evaluation::Pass | Evaluation::Pending => Verdict::CompletedPass,
            }
        };
        *self.state.status.write() = match verdict {
            Verdict::Aborted => RunStatus::Aborted,
            _ => RunStatus::Completed,
        };

        let elapsed = start.elapsed();
        info!(?verdict, requests = stats.requests, elapsed_secs = elapsed.as_secs_f64(), "load test finished");

        Ok(RunReport {
            verdict,
            stats,
            breaches: evaluator.breaches().to_vec(),
            elapsed,
        })
    }

    /// Target VU count at `elapsed`, linearly interpolated within the active
    /// stage from the previous stage's target (zero before the first stage).
    /// A zero-duration stage pins the target instantly.
    fn target_vus(stages: &[RampStage], elapsed: Duration) -> usize {
        let mut offset = Duration::ZERO;
        let mut prev_target = 0usize;
        for stage in stages {
            if elapsed < offset + stage.duration {
                let progress =
                    (elapsed - offset).as_secs_f64() / stage.duration.as_secs_f64();
                let diff = stage.target_vus as f64 - prev_target as f64;
                return (prev_target as f64 + diff * progress) as usize;
            }
            offset += stage.duration;
            prev_target = stage.target_vus;
        }
        0
    }
}
