use std::sync::Arc;
use std::time::Duration;

use qroute::config::ControlConfig;
use qroute::io::sim::{RecordingActuator, ScriptedSource};
use qroute::io::SourceError;
use qroute::live::{shutdown_channel, ControlError, ControlLoop, HealthState, SleepFn, TickOutcome};
use qroute::rl::{
    ActionCatalog, AgentParams, LatencyLevel, LatencyThresholds, QLearningAgent, State,
    StateEncoder,
};
use qroute::telemetry::{TelemetryConfig, TelemetrySink};
use qroute::types::{LatencyReading, WeightTuple};

use LatencyLevel::{High, Low, Medium};

fn instant_sleep() -> SleepFn {
    Arc::new(|_d| Box::pin(async {}))
}

fn greedy_agent() -> QLearningAgent {
    let params = AgentParams {
        exploration_rate: 0.0,
        exploration_min: 0.0,
        ..AgentParams::default()
    };
    QLearningAgent::new(params, ActionCatalog::default(), Some(11))
}

fn control(max_iterations: Option<u64>) -> ControlConfig {
    ControlConfig {
        dwell: Duration::from_secs(20),
        max_iterations,
    }
}

fn build(
    agent: QLearningAgent,
    source: ScriptedSource,
    actuator: RecordingActuator,
    max_iterations: Option<u64>,
) -> ControlLoop<ScriptedSource, RecordingActuator> {
    ControlLoop::new(
        agent,
        StateEncoder::new(LatencyThresholds::default()),
        source,
        actuator,
        control(max_iterations),
    )
    .with_sleep_fn(instant_sleep())
}

fn table_bits(lp: &ControlLoop<ScriptedSource, RecordingActuator>) -> Vec<u64> {
    lp.agent().table().as_slice().iter().map(|v| v.to_bits()).collect()
}

#[tokio::test]
async fn end_to_end_greedy_choice_reaches_actuator() {
    let reading = LatencyReading::new([250.0, 150.0, 600.0]);
    let actuator = RecordingActuator::new();
    let mut lp = build(
        greedy_agent(),
        ScriptedSource::steady(reading),
        actuator.clone(),
        None,
    );

    let state = lp.bootstrap().await.unwrap();
    assert_eq!(state, State::new([Medium, Low, High]));
    lp.agent_mut().table_mut().set(&state, 1, 0.5);

    match lp.step().await.unwrap() {
        TickOutcome::Learned {
            action_index,
            weights,
            actuation_ok,
            next_state,
            ..
        } => {
            assert_eq!(action_index, 1);
            assert_eq!(weights, WeightTuple::new([15, 70, 15]));
            assert!(actuation_ok);
            assert_eq!(next_state, state);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(actuator.applied(), vec![WeightTuple::new([15, 70, 15])]);
}

#[tokio::test]
async fn failed_observation_skips_learning() {
    let first = LatencyReading::new([100.0, 300.0, 500.0]);
    let source = ScriptedSource::new(vec![
        Ok(first),
        Err(SourceError::transport("connection refused")),
    ]);
    let params = AgentParams::default();
    let agent = QLearningAgent::new(params, ActionCatalog::default(), Some(5));
    let mut lp = build(agent, source, RecordingActuator::new(), None);

    let state = lp.bootstrap().await.unwrap();
    lp.agent_mut().table_mut().set(&state, 3, 0.25);
    let bits_before = table_bits(&lp);
    let eps_before = lp.agent().epsilon();

    let outcome = lp.step().await.unwrap();
    assert!(matches!(outcome, TickOutcome::SkippedLearn { .. }));
    assert_eq!(table_bits(&lp), bits_before);
    assert_eq!(lp.agent().epsilon().to_bits(), eps_before.to_bits());
    assert_eq!(lp.current_state(), Some(state));
    assert_eq!(lp.agent().updates(), 0);
    assert_eq!(lp.summary().skipped, 1);
}

#[tokio::test]
async fn actuation_failure_does_not_halt_loop() {
    let actuator = RecordingActuator::new();
    actuator.set_failing(true);
    let mut lp = build(
        greedy_agent(),
        ScriptedSource::steady(LatencyReading::new([120.0, 130.0, 140.0])),
        actuator.clone(),
        Some(4),
    );
    let summary = lp.run().await.unwrap();
    assert_eq!(summary.iterations, 4);
    assert_eq!(summary.learned, 4);
    assert_eq!(summary.actuation_failures, 4);
    assert_eq!(actuator.applied().len(), 4);
}

#[tokio::test]
async fn bootstrap_failure_is_fatal() {
    let health = HealthState::new();
    let actuator = RecordingActuator::new();
    let mut lp = build(
        greedy_agent(),
        ScriptedSource::new(vec![Err(SourceError::empty("no series"))]),
        actuator.clone(),
        Some(10),
    )
    .with_health(health.clone());
    match lp.run().await {
        Err(ControlError::Bootstrap { phase, .. }) => assert_eq!(phase, "initial observation"),
        other => panic!("expected bootstrap error, got {other:?}"),
    }
    assert!(actuator.applied().is_empty());
    assert!(!health.is_healthy());
    assert!(!health.is_ready());
}

#[tokio::test]
async fn unreachable_actuator_is_fatal() {
    let actuator = RecordingActuator::new();
    actuator.set_probe_fails(true);
    let source = ScriptedSource::steady(LatencyReading::new([1.0, 1.0, 1.0]));
    let mut lp = build(greedy_agent(), source, actuator, None);
    let err = lp.bootstrap().await.unwrap_err();
    assert!(matches!(err, ControlError::Bootstrap { phase: "actuator probe", .. }));
    assert_eq!(lp.source().calls(), 0);
    assert_eq!(lp.current_state(), None);
}

#[tokio::test]
async fn stop_during_wait_abandons_iteration() {
    let (handle, signal) = shutdown_channel();
    let source = ScriptedSource::steady(LatencyReading::new([300.0, 300.0, 300.0]));
    let mut lp = build(greedy_agent(), source, RecordingActuator::new(), None)
        .with_shutdown(signal);
    lp.bootstrap().await.unwrap();
    let bits_before = table_bits(&lp);

    handle.trigger();
    let outcome = lp.step().await.unwrap();
    assert_eq!(outcome, TickOutcome::Interrupted { iteration: 1 });
    assert_eq!(table_bits(&lp), bits_before);
    assert_eq!(lp.source().calls(), 1);

    let summary = lp.run().await.unwrap();
    assert_eq!(summary.iterations, 0);
}

#[tokio::test]
async fn telemetry_records_each_iteration_and_final_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loop.jsonl");
    let source = ScriptedSource::new(vec![
        Ok(LatencyReading::new([100.0, 100.0, 100.0])),
        Ok(LatencyReading::new([250.0, 150.0, 600.0])),
        Err(SourceError::status("HTTP 503")),
    ])
    .then_repeat(LatencyReading::new([90.0, 80.0, 70.0]));
    let mut lp = build(greedy_agent(), source, RecordingActuator::new(), Some(3))
        .with_telemetry(TelemetrySink::from_config(TelemetryConfig::jsonl(&path)));
    let summary = lp.run().await.unwrap();
    assert_eq!(summary.learned, 2);
    assert_eq!(summary.skipped, 1);
    drop(lp);

    let text = std::fs::read_to_string(&path).unwrap();
    let records: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r["schema_version"] == 1));
    assert_eq!(records[0]["outcome"], "learned");
    assert_eq!(records[0]["next_state"], "(MEDIUM,LOW,HIGH)");
    assert_eq!(records[1]["outcome"], "skipped_learn");
    assert!(records[1]["reward"].is_null());
    assert_eq!(records[3]["kind"], "q_table");
}
