//! # SHV Telemetry
//!
//! Logging setup shared by the broker executable and its tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shv_telemetry::{init_logging, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env().with_verbosity(args.verbose, args.quiet);
//! init_logging(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RUST_LOG` | unset | Full filter directive, wins over everything else |
//! | `SHV_LOG_LEVEL` | `info` | Base log level |
//! | `SHV_JSON_LOGS` | `false` | JSON formatted output |

mod config;
mod logging;

pub use config::{Level, TelemetryConfig};
pub use logging::{filter_directives, init_logging};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter '{directives}': {reason}")]
    Filter { directives: String, reason: String },

    #[error("Failed to install subscriber: {0}")]
    Install(String),
}

/// Log with a consistent `component` field.
///
/// # Example
///
/// ```rust,ignore
/// use shv_telemetry::log_event;
///
/// log_event!(info, "listener", "Accepting connections", url = %url);
/// ```
#[macro_export]
macro_rules! log_event {
    (info, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::info!(component = $component, $($($field)*,)? $msg)
    };
    (warn, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::warn!(component = $component, $($($field)*,)? $msg)
    };
    (error, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::error!(component = $component, $($($field)*,)? $msg)
    };
    (debug, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::debug!(component = $component, $($($field)*,)? $msg)
    };
    (trace, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::trace!(component = $component, $($($field)*,)? $msg)
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_log_event_expands_without_subscriber() {
        let url = "tcp://localhost:3755";
        log_event!(info, "listener", "Accepting connections", url = %url);
        log_event!(debug, "listener", "No fields");
    }
}
