//! Logging setup
//!
//! Log lines share the terminal with the command prompt, so the console layer
//! has its own (quieter) level and writes to stderr. The rolling file keeps
//! everything the global filter lets through.

use crate::domain::settings::LogSettings;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

pub struct LoggingGuard {
    // Dropping the guard flushes and stops the file writer
    _guards: Vec<WorkerGuard>,
}

fn parse_rotation(rotation: &str) -> Rotation {
    match rotation.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

fn parse_console_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level).unwrap_or(LevelFilter::WARN)
}

fn console_layer(settings: &LogSettings) -> Option<BoxedLayer> {
    if !settings.console_logging_enabled {
        return None;
    }
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(settings.show_file_line)
        .with_line_number(settings.show_file_line)
        .with_thread_names(settings.show_thread_ids)
        .with_target(settings.show_target)
        .with_ansi(settings.ansi_colors)
        .with_filter(parse_console_level(&settings.console_level));
    Some(Box::new(layer))
}

fn file_layer(settings: &LogSettings) -> anyhow::Result<Option<(BoxedLayer, WorkerGuard)>> {
    if !settings.file_logging_enabled {
        return Ok(None);
    }
    std::fs::create_dir_all(&settings.log_dir)?;
    let appender = RollingFileAppender::new(
        parse_rotation(&settings.rotation),
        &settings.log_dir,
        &settings.file_name_prefix,
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_file(settings.show_file_line)
        .with_line_number(settings.show_file_line)
        .with_thread_ids(settings.show_thread_ids)
        .with_thread_names(settings.show_thread_ids)
        .with_target(settings.show_target);
    Ok(Some((Box::new(layer), guard)))
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    // RUST_LOG wins over the configured level
    let global_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guards = Vec::new();
    layers.extend(console_layer(settings));
    if let Some((layer, guard)) = file_layer(settings)? {
        layers.push(layer);
        guards.push(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(global_filter)
        .try_init()?;

    tracing::info!(
        "Logging to {} (console at {})",
        if settings.file_logging_enabled {
            settings.log_dir.as_str()
        } else {
            "console only"
        },
        parse_console_level(&settings.console_level)
    );

    Ok(LoggingGuard { _guards: guards })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rotation() {
        assert_eq!(parse_rotation("Hourly"), Rotation::HOURLY);
        assert_eq!(parse_rotation("never"), Rotation::NEVER);
        assert_eq!(parse_rotation("weekly"), Rotation::DAILY);
    }

    #[test]
    fn test_console_level() {
        assert_eq!(parse_console_level("debug"), LevelFilter::DEBUG);
        assert_eq!(parse_console_level("off"), LevelFilter::OFF);
        assert_eq!(parse_console_level("chatty"), LevelFilter::WARN);
    }

    #[test]
    fn test_disabled_layers_are_skipped() {
        let settings = LogSettings {
            console_logging_enabled: false,
            file_logging_enabled: false,
            ..LogSettings::default()
        };
        assert!(console_layer(&settings).is_none());
        assert!(file_layer(&settings).unwrap().is_none());
    }
}
