// src/logging.rs
//
// Process-wide `tracing` subscriber.
//
// Filter precedence: explicit level argument, then `QROUTE_LOG`, then
// `RUST_LOG`, then `info`. Any `EnvFilter` directive is accepted, e.g.
// `qroute=debug,reqwest=warn`.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "QROUTE_LOG";
pub const DEFAULT_LEVEL: &str = "info";

pub fn resolve_filter(level: Option<&str>) -> String {
    level
        .map(str::to_string)
        .or_else(|| std::env::var(LOG_ENV).ok())
        .or_else(|| std::env::var("RUST_LOG").ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string())
}

/// Install the fmt subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init_logging(level: Option<&str>) {
    let directives = resolve_filter(level);
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_level_wins() {
        assert_eq!(resolve_filter(Some("debug")), "debug");
    }

    #[test]
    fn repeated_init_is_harmless() {
        init_logging(Some("warn"));
        init_logging(Some("not a valid [filter"));
    }
}
