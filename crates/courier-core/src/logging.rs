//! Logging setup shared by every courier service and example binary.
//!
//! The structured-logging contract is the `tracing` macro surface; sinks are
//! whatever subscriber the process installs. [`init_logging`] is the stock
//! installer used by courier's own binaries and tests.

use serde::{Deserialize, Serialize};

/// Logging options, resolvable through the configuration layer like any
/// other component config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct LogArgs {
    /// Log verbosity. One of trace|debug|info|warn|error|off.
    #[serde(default)]
    pub level: LogLevel,
    /// Output format. Defaults to color when stderr is a terminal, and
    /// JSON otherwise.
    #[serde(default)]
    pub format: Option<LogFormat>,
}

impl Default for LogArgs {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            format: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
    Off,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

/// The format for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// jsonl on stderr. Events keep their structured fields, so downstream
    /// collectors can forward them without re-parsing.
    Json,
    /// Plain text with no colors.
    Text,
    /// Plain text with colors for interactive terminals.
    Color,
}

fn default_log_format() -> LogFormat {
    if atty::is(atty::Stream::Stderr) {
        LogFormat::Color
    } else {
        LogFormat::Json
    }
}

/// Initializes logging using the given args. Panics if called twice.
pub fn init_logging(args: &LogArgs) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(args.level.as_str())
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        // Spans are logged once, when closed, which captures their timing
        // and all recorded fields in a single line.
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false);

    match args.format.unwrap_or_else(default_log_format) {
        LogFormat::Json => {
            builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .init();
        }
        LogFormat::Text => {
            builder.compact().with_ansi(false).init();
        }
        LogFormat::Color => {
            builder.compact().with_ansi(true).init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_round_trips_through_serde() {
        for (level, text) in [
            (LogLevel::Trace, "\"trace\""),
            (LogLevel::Warn, "\"warn\""),
            (LogLevel::Off, "\"off\""),
        ] {
            assert_eq!(serde_json::to_string(&level).unwrap(), text);
            assert_eq!(serde_json::from_str::<LogLevel>(text).unwrap(), level);
        }
    }

    #[test]
    fn default_args_are_warn_with_auto_format() {
        let args = LogArgs::default();
        assert_eq!(args.level, LogLevel::Warn);
        assert_eq!(args.format, None);
    }
}
