use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Directives appended to the configured level so dependency chatter stays quiet.
const DEPENDENCY_DIRECTIVES: &str = "hyper=warn,hyper_util=warn,rustls=warn,h2=warn";

/// Build the filter used by the global subscriber.
///
/// `RUST_LOG` wins when set and parseable; otherwise `dns.log_level` applies.
pub fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level))
}

fn default_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::new(format!("{},{}", level.as_str(), DEPENDENCY_DIRECTIVES))
}

/// Install the global tracing subscriber. Safe to call more than once.
pub fn init(level: LogLevel) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .try_init();
}
