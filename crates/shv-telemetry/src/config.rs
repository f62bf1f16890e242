//! Logging configuration from environment variables and CLI verbosity.

use std::env;
use std::fmt;

/// Log level ladder used for `-v` / `-q` stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    const LADDER: [Level; 6] = [
        Level::Off,
        Level::Error,
        Level::Warn,
        Level::Info,
        Level::Debug,
        Level::Trace,
    ];

    /// Move `up` steps toward `Trace` and `down` steps toward `Off`, clamped.
    pub fn step(self, up: u8, down: u8) -> Level {
        let index = self as i32 + i32::from(up) - i32::from(down);
        Self::LADDER[index.clamp(0, 5) as usize]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Off => "off",
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Trace => "trace",
        }
    }

    fn parse(s: &str) -> Option<Level> {
        Self::LADDER
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for log output.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Base level
    pub level: Level,

    /// Full filter directive from `RUST_LOG`; overrides `level` and topics
    pub rust_log: Option<String>,

    /// Targets raised to `debug` on top of the base level
    pub debug_topics: Vec<String>,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            rust_log: None,
            debug_topics: Vec::new(),
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// - `RUST_LOG`: complete filter directive
    /// - `SHV_LOG_LEVEL`: base level (default: info)
    /// - `SHV_JSON_LOGS`: `1` or `true` for JSON output
    pub fn from_env() -> Self {
        Self {
            level: env::var("SHV_LOG_LEVEL")
                .ok()
                .and_then(|v| Level::parse(&v))
                .unwrap_or(Level::Info),

            rust_log: env::var("RUST_LOG").ok().filter(|v| !v.trim().is_empty()),

            debug_topics: Vec::new(),

            json_logs: env::var("SHV_JSON_LOGS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
        }
    }

    /// Apply `-v` and `-q` counts to the base level.
    pub fn with_verbosity(mut self, verbose: u8, quiet: u8) -> Self {
        self.level = self.level.step(verbose, quiet);
        self
    }

    /// Raise the named topics to `debug`.
    pub fn with_debug_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.debug_topics.extend(topics.into_iter().map(Into::into));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_stepping_clamps() {
        assert_eq!(Level::Info.step(1, 0), Level::Debug);
        assert_eq!(Level::Info.step(5, 0), Level::Trace);
        assert_eq!(Level::Info.step(0, 2), Level::Error);
        assert_eq!(Level::Info.step(0, 9), Level::Off);
        assert_eq!(Level::Info.step(2, 1), Level::Debug);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("WARN"), Some(Level::Warn));
        assert_eq!(Level::parse(" trace "), Some(Level::Trace));
        assert_eq!(Level::parse("loud"), None);
    }

    #[test]
    fn test_builder() {
        let config = TelemetryConfig::default()
            .with_verbosity(0, 1)
            .with_debug_topics(["mount", "shv_broker::service"]);
        assert_eq!(config.level, Level::Warn);
        assert_eq!(config.debug_topics.len(), 2);
        assert!(!config.json_logs);
    }
}
