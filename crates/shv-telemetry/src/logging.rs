//! Subscriber installation.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Filter directives for a config.
///
/// `RUST_LOG` wins outright. Otherwise the base level applies everywhere
/// and each debug topic adds a `debug` directive; a bare topic name is taken
/// to mean a module of the broker core.
pub fn filter_directives(config: &TelemetryConfig) -> String {
    if let Some(rust_log) = &config.rust_log {
        return rust_log.clone();
    }
    let mut directives = vec![config.level.as_str().to_string()];
    for topic in &config.debug_topics {
        let target = if topic.contains("::") || topic.contains('=') {
            topic.clone()
        } else {
            format!("shv_broker::domain::{}", topic)
        };
        if target.contains('=') {
            directives.push(target);
        } else {
            directives.push(format!("{}=debug", target));
        }
    }
    directives.join(",")
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let directives = filter_directives(config);
    let env_filter = EnvFilter::try_new(&directives).map_err(|e| TelemetryError::Filter {
        directives: directives.clone(),
        reason: e.to_string(),
    })?;

    if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
            .map_err(|e| TelemetryError::Install(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::Install(e.to_string()))?;
    }

    tracing::debug!(filter = %directives, json = config.json_logs, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Level;

    #[test]
    fn test_directives_from_level_and_topics() {
        let config = TelemetryConfig {
            level: Level::Warn,
            ..Default::default()
        }
        .with_debug_topics(["mount", "tokio::net", "hyper=trace"]);
        assert_eq!(
            filter_directives(&config),
            "warn,shv_broker::domain::mount=debug,tokio::net=debug,hyper=trace"
        );
    }

    #[test]
    fn test_rust_log_wins() {
        let config = TelemetryConfig {
            rust_log: Some("trace".into()),
            ..Default::default()
        }
        .with_debug_topics(["mount"]);
        assert_eq!(filter_directives(&config), "trace");
    }

    #[test]
    fn test_every_level_is_a_valid_filter() {
        for level in [Level::Off, Level::Error, Level::Info, Level::Trace] {
            let config = TelemetryConfig {
                level,
                ..Default::default()
            };
            assert!(EnvFilter::try_new(filter_directives(&config)).is_ok());
        }
    }
}
