//! qroute core library.
//!
//! Closed-loop traffic weighting for a service mesh: observe per-variant
//! latency, pick a weight split with tabular Q-learning, apply it to the
//! routing configuration and learn from the outcome. The binaries
//! (`src/bin/qroute_live.rs`, `src/bin/qroute_collect.rs`) are thin
//! wiring around these components.

pub mod collect;
pub mod config;
pub mod io;
pub mod live;
pub mod logging;
pub mod rl;
pub mod telemetry;
pub mod types;

// --- Re-exports for ergonomic external use ---------------------------------

pub use config::{Config, ConfigError, ControlConfig, PrometheusConfig, RoutingConfig};

pub use io::{ActuateError, ActuateErrorKind, Actuator, MetricSource, SourceError, SourceErrorKind};

pub use live::{ControlError, ControlLoop, RunSummary, ShutdownHandle, ShutdownSignal, TickOutcome};

pub use rl::{
    ActionCatalog, AgentParams, ExplorationSchedule, LatencyLevel, LatencyThresholds,
    QLearningAgent, QTable, State, StateEncoder, Transition,
};

pub use telemetry::TelemetrySink;

pub use types::{LatencyMs, LatencyReading, Target, WeightTuple, NUM_TARGETS};
