// src/live/runner.rs
//
// Closed-loop controller.
//
// INIT (bootstrap) -> repeat:
//   DECIDE  epsilon-greedy action for the current state
//   ACT     hand the action's weights to the actuator (failure logged, loop continues)
//   WAIT    dwell interval, raced against the shutdown signal
//   OBSERVE fetch latencies; on failure skip learning and keep the current state
//   LEARN   reward + next state -> Bellman update, current state := next state
//
// The loop owns the agent (and so the Q-table) exclusively; iterations
// never overlap.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::ops::{ControllerMetrics, HealthState};
use super::shutdown::ShutdownSignal;
use crate::config::ControlConfig;
use crate::io::{Actuator, BoxFuture, MetricSource, SourceError};
use crate::rl::{latency_reward, QLearningAgent, State, StateEncoder, Transition};
use crate::telemetry::{now_rfc3339, IterationPhase, IterationRecord, TelemetrySink, SCHEMA_VERSION};
use crate::types::{LatencyReading, WeightTuple};

pub type SleepFn = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("bootstrap failed during {phase}: {message}")]
    Bootstrap { phase: &'static str, message: String },
    #[error("control loop stepped before bootstrap")]
    NotBootstrapped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Learned {
        iteration: u64,
        action_index: usize,
        weights: WeightTuple,
        actuation_ok: bool,
        reward: f64,
        next_state: State,
        q_value: f64,
    },
    SkippedLearn {
        iteration: u64,
        action_index: usize,
        weights: WeightTuple,
        actuation_ok: bool,
        error: SourceError,
    },
    /// Stop requested during WAIT; nothing was observed or learned.
    Interrupted { iteration: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub iterations: u64,
    pub learned: u64,
    pub skipped: u64,
    pub actuation_failures: u64,
    pub final_epsilon: f64,
    pub final_state: Option<State>,
}

pub struct ControlLoop<M, A> {
    agent: QLearningAgent,
    encoder: StateEncoder,
    source: M,
    actuator: A,
    cfg: ControlConfig,
    current_state: Option<State>,
    iterations: u64,
    learned: u64,
    skipped: u64,
    actuation_failures: u64,
    metrics: Option<ControllerMetrics>,
    health: Option<HealthState>,
    telemetry: TelemetrySink,
    shutdown: ShutdownSignal,
    sleep_fn: SleepFn,
}

impl<M: MetricSource, A: Actuator> ControlLoop<M, A> {
    pub fn new(
        agent: QLearningAgent,
        encoder: StateEncoder,
        source: M,
        actuator: A,
        cfg: ControlConfig,
    ) -> Self {
        Self {
            agent,
            encoder,
            source,
            actuator,
            cfg,
            current_state: None,
            iterations: 0,
            learned: 0,
            skipped: 0,
            actuation_failures: 0,
            metrics: None,
            health: None,
            telemetry: TelemetrySink::off(),
            shutdown: ShutdownSignal::never(),
            sleep_fn: Arc::new(|duration| Box::pin(sleep(duration))),
        }
    }

    pub fn with_metrics(mut self, metrics: ControllerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_health(mut self, health: HealthState) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetrySink) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_sleep_fn(mut self, sleep_fn: SleepFn) -> Self {
        self.sleep_fn = sleep_fn;
        self
    }

    pub fn agent(&self) -> &QLearningAgent {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut QLearningAgent {
        &mut self.agent
    }

    pub fn source(&self) -> &M {
        &self.source
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// `None` until bootstrap succeeded.
    pub fn current_state(&self) -> Option<State> {
        self.current_state
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            iterations: self.iterations,
            learned: self.learned,
            skipped: self.skipped,
            actuation_failures: self.actuation_failures,
            final_epsilon: self.agent.epsilon(),
            final_state: self.current_state,
        }
    }

    /// INIT: check the actuator is reachable and take the first observation.
    pub async fn bootstrap(&mut self) -> Result<State, ControlError> {
        if let Err(err) = self.actuator.probe().await {
            error!(
                phase = "init",
                actuator = %self.actuator.describe(),
                reason = err.reason_label(),
                error = %err,
                "actuator unreachable"
            );
            self.mark_unhealthy();
            return Err(ControlError::Bootstrap {
                phase: "actuator probe",
                message: err.to_string(),
            });
        }
        let reading = match self.source.fetch_latencies().await {
            Ok(reading) => reading,
            Err(err) => {
                error!(
                    phase = "init",
                    source = %self.source.describe(),
                    reason = err.reason_label(),
                    error = %err,
                    "initial observation unavailable"
                );
                self.mark_unhealthy();
                return Err(ControlError::Bootstrap {
                    phase: "initial observation",
                    message: err.to_string(),
                });
            }
        };
        let state = self.encoder.encode(&reading);
        self.current_state = Some(state);
        if let Some(metrics) = &self.metrics {
            metrics.record_latencies(&reading);
            metrics.set_epsilon(self.agent.epsilon());
        }
        if let Some(health) = &self.health {
            health.set_ready(true);
        }
        info!(phase = "init", state = %state, latencies = %reading, "bootstrap complete");
        Ok(state)
    }

    /// One DECIDE -> ACT -> WAIT -> OBSERVE -> LEARN | SKIP_LEARN pass.
    pub async fn step(&mut self) -> Result<TickOutcome, ControlError> {
        let state = self.current_state.ok_or(ControlError::NotBootstrapped)?;
        let iteration = self.iterations + 1;

        // DECIDE
        let action_index = self.agent.select_action(&state);
        let weights = self.agent.weights(action_index);
        debug!(
            phase = "decide",
            iteration,
            state = %state,
            action = action_index,
            epsilon = self.agent.epsilon(),
            "action selected"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_action(action_index);
        }

        // ACT
        let actuation_ok = match self.actuator.apply(weights).await {
            Ok(()) => true,
            Err(err) => {
                self.actuation_failures += 1;
                warn!(
                    phase = "act",
                    iteration,
                    actuator = %self.actuator.describe(),
                    weights = %weights,
                    reason = err.reason_label(),
                    error = %err,
                    "actuation failed, continuing"
                );
                false
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.inc_actuation(actuation_ok);
        }

        // WAIT
        let dwell = (self.sleep_fn)(self.cfg.dwell);
        tokio::select! {
            biased;
            _ = self.shutdown.wait() => {
                info!(phase = "wait", iteration, "stop requested, abandoning iteration");
                return Ok(TickOutcome::Interrupted { iteration });
            }
            _ = dwell => {}
        }

        // OBSERVE
        let observed = self.source.fetch_latencies().await;
        self.iterations = iteration;
        if let Some(metrics) = &self.metrics {
            metrics.inc_iteration();
        }

        let outcome = match observed {
            Ok(reading) => self.learn(iteration, state, action_index, weights, actuation_ok, &reading),
            Err(err) => {
                self.skipped += 1;
                warn!(
                    phase = "observe",
                    iteration,
                    source = %self.source.describe(),
                    reason = err.reason_label(),
                    error = %err,
                    state = %state,
                    "observation failed, skipping learning"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.inc_observe_fail(err.reason_label());
                }
                self.telemetry.log_iteration(&IterationRecord {
                    schema_version: SCHEMA_VERSION,
                    kind: "iteration",
                    ts: now_rfc3339(),
                    iteration,
                    outcome: IterationPhase::SkippedLearn,
                    state: state.to_string(),
                    next_state: None,
                    action_index,
                    weights: *weights.as_array(),
                    actuation_ok,
                    epsilon: self.agent.epsilon(),
                    reward: None,
                    q_value: None,
                    latencies_ms: None,
                    observe_error: Some(err.to_string()),
                });
                TickOutcome::SkippedLearn {
                    iteration,
                    action_index,
                    weights,
                    actuation_ok,
                    error: err,
                }
            }
        };
        Ok(outcome)
    }

    fn learn(
        &mut self,
        iteration: u64,
        state: State,
        action_index: usize,
        weights: WeightTuple,
        actuation_ok: bool,
        reading: &LatencyReading,
    ) -> TickOutcome {
        let reward = latency_reward(reading);
        let next_state = self.encoder.encode(reading);
        let q_value = self.agent.learn(&Transition {
            state,
            action_index,
            reward,
            next_state,
        });
        self.current_state = Some(next_state);
        self.learned += 1;

        let epsilon = self.agent.epsilon();
        info!(
            phase = "learn",
            iteration,
            state = %state,
            action = action_index,
            weights = %weights,
            latencies = %reading,
            reward,
            q_value,
            next_state = %next_state,
            epsilon,
            "iteration complete"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_latencies(reading);
            metrics.record_learn(reward, epsilon);
        }
        self.telemetry.log_iteration(&IterationRecord {
            schema_version: SCHEMA_VERSION,
            kind: "iteration",
            ts: now_rfc3339(),
            iteration,
            outcome: IterationPhase::Learned,
            state: state.to_string(),
            next_state: Some(next_state.to_string()),
            action_index,
            weights: *weights.as_array(),
            actuation_ok,
            epsilon,
            reward: Some(reward),
            q_value: Some(q_value),
            latencies_ms: Some(*reading.values()),
            observe_error: None,
        });
        TickOutcome::Learned {
            iteration,
            action_index,
            weights,
            actuation_ok,
            reward,
            next_state,
            q_value,
        }
    }

    /// Bootstrap if needed, then step until stopped or `max_iterations`
    /// iterations have completed.
    pub async fn run(&mut self) -> Result<RunSummary, ControlError> {
        if self.current_state.is_none() {
            self.bootstrap().await?;
        }
        info!(
            source = %self.source.describe(),
            actuator = %self.actuator.describe(),
            dwell_s = self.cfg.dwell.as_secs_f64(),
            max_iterations = ?self.cfg.max_iterations,
            "control loop started"
        );
        loop {
            if self.shutdown.is_triggered() {
                info!(iterations = self.iterations, "stop requested");
                break;
            }
            if let Some(max) = self.cfg.max_iterations {
                if self.iterations >= max {
                    info!(iterations = self.iterations, "iteration limit reached");
                    break;
                }
            }
            if let TickOutcome::Interrupted { .. } = self.step().await? {
                break;
            }
        }
        self.finish();
        Ok(self.summary())
    }

    fn finish(&mut self) {
        if let Some(health) = &self.health {
            health.set_ready(false);
        }
        let snapshot = self.agent.table().snapshot();
        self.telemetry
            .log_q_table(self.iterations, self.agent.epsilon(), &snapshot);
        self.telemetry.flush();
        let summary = self.summary();
        info!(
            iterations = summary.iterations,
            learned = summary.learned,
            skipped = summary.skipped,
            actuation_failures = summary.actuation_failures,
            final_epsilon = summary.final_epsilon,
            "control loop stopped"
        );
    }

    fn mark_unhealthy(&self) {
        if let Some(health) = &self.health {
            health.set_healthy(false);
            health.set_ready(false);
        }
    }
}
