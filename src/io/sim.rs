// src/io/sim.rs
//
// In-process collaborators for dry runs and tests.
//
// - ScriptedSource: replays a queue of readings / failures, then repeats a
//   steady reading (or fails with Empty once the script is exhausted)
// - RecordingActuator: remembers every applied tuple, can be told to fail
// - NoopActuator: logs the tuple it would have applied

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::info;

use super::{ActuateError, Actuator, BoxFuture, MetricSource, SourceError};
use crate::types::{LatencyReading, WeightTuple};

pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<LatencyReading, SourceError>>>,
    steady: Option<LatencyReading>,
    calls: AtomicU64,
}

impl ScriptedSource {
    pub fn new<I>(script: I) -> Self
    where
        I: IntoIterator<Item = Result<LatencyReading, SourceError>>,
    {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            steady: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Always answers with `reading`.
    pub fn steady(reading: LatencyReading) -> Self {
        Self::new(Vec::new()).then_repeat(reading)
    }

    /// Reading returned once the script runs out.
    pub fn then_repeat(mut self, reading: LatencyReading) -> Self {
        self.steady = Some(reading);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn next(&self) -> Result<LatencyReading, SourceError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let scripted = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(_) => return Err(SourceError::transport("script lock poisoned")),
        };
        match (scripted, self.steady) {
            (Some(item), _) => item,
            (None, Some(reading)) => Ok(reading),
            (None, None) => Err(SourceError::empty("script exhausted")),
        }
    }
}

impl MetricSource for ScriptedSource {
    fn fetch_latencies(&self) -> BoxFuture<'_, Result<LatencyReading, SourceError>> {
        let result = self.next();
        Box::pin(async move { result })
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Shares its log through an `Arc`, so a clone kept by the caller sees
/// everything the loop applied.
#[derive(Clone, Default)]
pub struct RecordingActuator {
    applied: Arc<Mutex<Vec<WeightTuple>>>,
    failing: Arc<AtomicBool>,
    probe_fails: Arc<AtomicBool>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `apply` calls fail (still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn set_probe_fails(&self, fails: bool) {
        self.probe_fails.store(fails, Ordering::Relaxed);
    }

    pub fn applied(&self) -> Vec<WeightTuple> {
        self.applied
            .lock()
            .map(|applied| applied.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<WeightTuple> {
        self.applied().last().copied()
    }
}

impl Actuator for RecordingActuator {
    fn apply(&self, weights: WeightTuple) -> BoxFuture<'_, Result<(), ActuateError>> {
        if let Ok(mut applied) = self.applied.lock() {
            applied.push(weights);
        }
        let result = if self.failing.load(Ordering::Relaxed) {
            Err(ActuateError::rejected("recording actuator set to fail"))
        } else {
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn probe(&self) -> BoxFuture<'_, Result<(), ActuateError>> {
        let result = if self.probe_fails.load(Ordering::Relaxed) {
            Err(ActuateError::transport("recording actuator unreachable"))
        } else {
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

#[derive(Debug, Default)]
pub struct NoopActuator;

impl Actuator for NoopActuator {
    fn apply(&self, weights: WeightTuple) -> BoxFuture<'_, Result<(), ActuateError>> {
        info!(phase = "act", weights = %weights, "dry run, routing unchanged");
        Box::pin(async { Ok(()) })
    }

    fn describe(&self) -> String {
        "noop".to_string()
    }
}
