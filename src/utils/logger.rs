use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use log::{LevelFilter, Metadata, Record};
use once_cell::sync::Lazy;

// Console logger, filtering is left to log::max_level
struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        // stdout stays free for the helper protocol, diagnostics go to stderr
        eprintln!("[{}][{}]: {}", timestamp, record.level(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: Lazy<ConsoleLogger> = Lazy::new(|| ConsoleLogger);

pub fn init_logger(level: LevelFilter) -> Result<()> {
    log::set_logger(&*LOGGER)
        .map(|()| log::set_max_level(level))
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| "Failed to set logger")?;

    log::debug!("Logger initialized with level: {}", level);
    Ok(())
}

pub fn parse_level(value: &str) -> Option<LevelFilter> {
    match value.trim().to_lowercase().as_str() {
        "trace" => Some(LevelFilter::Trace),
        "debug" => Some(LevelFilter::Debug),
        "info" => Some(LevelFilter::Info),
        "warn" => Some(LevelFilter::Warn),
        "error" => Some(LevelFilter::Error),
        "off" => Some(LevelFilter::Off),
        _ => None,
    }
}

/// Read the level override file, falling back to `default` when it is
/// missing or holds something unrecognised.
pub fn read_log_level_file<P: AsRef<Path>>(path: P, default: LevelFilter) -> LevelFilter {
    std::fs::read_to_string(path.as_ref())
        .ok()
        .and_then(|content| parse_level(&content))
        .unwrap_or(default)
}

pub fn update_log_level<P: AsRef<Path>>(path: P, default: LevelFilter) -> LevelFilter {
    let new_level = read_log_level_file(path, default);
    if new_level != log::max_level() {
        log::set_max_level(new_level);
        log::info!("Log level updated to: {}", new_level);
    }
    new_level
}
