//! Live control loop and its operational controls.

pub mod ops;
pub mod runner;
pub mod shutdown;

pub use ops::{config_hash, format_startup_log, start_metrics_server, ControllerMetrics, HealthState};
pub use runner::{ControlError, ControlLoop, RunSummary, SleepFn, TickOutcome};
pub use shutdown::{shutdown_channel, ShutdownHandle, ShutdownSignal};
