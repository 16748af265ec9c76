//! Tracing setup: rolling file output, plus colored stdout in text mode.

use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Target used by the log-only event publisher.
pub const EVENTS_TARGET: &str = "events";

/// Default filter when `RUST_LOG` is unset.
///
/// sqlx logs every statement at info. Without a bus the events target is the
/// only record of published events, so it stays at info whatever the level.
pub fn default_directives(config: &AppConfig) -> String {
    let mut directives = vec![
        config.log_level.clone(),
        "sqlx=warn".to_string(),
        "hyper=warn".to_string(),
        "reqwest=warn".to_string(),
    ];
    if config.events.endpoint.is_none() {
        directives.push(format!("{}=info", EVENTS_TARGET));
    }
    directives.join(",")
}

/// Install the global subscriber. Keep the guard alive for the process
/// lifetime or buffered file output is lost.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let file_appender = match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        // Targets stay in JSON so event lines can be selected downstream
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(level: &str, yaml_extra: &str) -> AppConfig {
        let yaml = format!(
            "log_level: {}\nlog_dir: ./logs\nlog_file: t.log\nuse_json: false\nrotation: never\n\
             gateway:\n  host: 127.0.0.1\n  port: 1\n{}",
            level, yaml_extra
        );
        AppConfig::from_yaml(&yaml).unwrap()
    }

    #[test]
    fn test_default_directives_quiet_noisy_crates() {
        let directives = default_directives(&config("debug", ""));
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("sqlx=warn"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_events_target_kept_at_info_without_bus() {
        let directives = default_directives(&config("warn", ""));
        assert!(directives.starts_with("warn,"));
        assert!(directives.ends_with("events=info"));

        let directives = default_directives(&config(
            "warn",
            "events:\n  endpoint: \"http://bus:9000/events\"\n",
        ));
        assert!(!directives.contains("events="));
    }
}
