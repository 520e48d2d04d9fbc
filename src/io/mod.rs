// src/io/mod.rs
//
// Collaborator interfaces for the control loop.
//
// - MetricSource: supplies a per-target latency reading on demand
// - Actuator:     applies a weight tuple to the live routing configuration
//
// Implementations:
// - prometheus:      Prometheus HTTP query API source
// - virtual_service: Istio VirtualService patch through the Kubernetes API
// - sim:             scripted source, recording / no-op actuators

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::types::{LatencyReading, WeightTuple};

pub mod prometheus;
pub mod sim;
pub mod virtual_service;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceErrorKind {
    /// Connection, DNS or timeout failure.
    Transport,
    /// Non-success HTTP or API status.
    Status,
    /// Response body could not be interpreted.
    Parse,
    /// Query succeeded but returned no samples.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} error: {message}", kind_label(.kind))]
pub struct SourceError {
    pub kind: SourceErrorKind,
    pub message: String,
}

fn kind_label(kind: &SourceErrorKind) -> &'static str {
    match kind {
        SourceErrorKind::Transport => "transport",
        SourceErrorKind::Status => "status",
        SourceErrorKind::Parse => "parse",
        SourceErrorKind::Empty => "empty",
    }
}

impl SourceError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Status,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Parse,
            message: message.into(),
        }
    }

    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Empty,
            message: message.into(),
        }
    }

    pub fn reason_label(&self) -> &'static str {
        kind_label(&self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActuateErrorKind {
    Transport,
    /// The API answered but refused the change.
    Rejected,
    /// Missing or refused credentials.
    Auth,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} error: {message}", actuate_label(.kind))]
pub struct ActuateError {
    pub kind: ActuateErrorKind,
    pub message: String,
}

fn actuate_label(kind: &ActuateErrorKind) -> &'static str {
    match kind {
        ActuateErrorKind::Transport => "transport",
        ActuateErrorKind::Rejected => "rejected",
        ActuateErrorKind::Auth => "auth",
    }
}

impl ActuateError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: ActuateErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: ActuateErrorKind::Rejected,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            kind: ActuateErrorKind::Auth,
            message: message.into(),
        }
    }

    pub fn reason_label(&self) -> &'static str {
        actuate_label(&self.kind)
    }
}

/// Supplies the current per-target latency.
///
/// A failed call must be distinguishable from a valid reading: "no data"
/// is reported as [`SourceErrorKind::Empty`], never as an all-default reading.
pub trait MetricSource: Send + Sync {
    fn fetch_latencies(&self) -> BoxFuture<'_, Result<LatencyReading, SourceError>>;

    /// Short label for logs.
    fn describe(&self) -> String;
}

/// Applies a weight tuple to the live routing configuration.
///
/// Must tolerate being called every iteration with an unchanged tuple.
pub trait Actuator: Send + Sync {
    fn apply(&self, weights: WeightTuple) -> BoxFuture<'_, Result<(), ActuateError>>;

    /// Reachability check run once at bootstrap.
    fn probe(&self) -> BoxFuture<'_, Result<(), ActuateError>> {
        Box::pin(async { Ok(()) })
    }

    fn describe(&self) -> String;
}

impl<T: MetricSource + ?Sized> MetricSource for Box<T> {
    fn fetch_latencies(&self) -> BoxFuture<'_, Result<LatencyReading, SourceError>> {
        self.as_ref().fetch_latencies()
    }

    fn describe(&self) -> String {
        self.as_ref().describe()
    }
}

impl<T: Actuator + ?Sized> Actuator for Box<T> {
    fn apply(&self, weights: WeightTuple) -> BoxFuture<'_, Result<(), ActuateError>> {
        self.as_ref().apply(weights)
    }

    fn probe(&self) -> BoxFuture<'_, Result<(), ActuateError>> {
        self.as_ref().probe()
    }

    fn describe(&self) -> String {
        self.as_ref().describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_kind() {
        let err = SourceError::empty("no series for query");
        assert_eq!(err.to_string(), "empty error: no series for query");
        assert_eq!(err.reason_label(), "empty");
        let err = ActuateError::auth("401 Unauthorized");
        assert_eq!(err.to_string(), "auth error: 401 Unauthorized");
    }
}
