//! Logger setup
//!
//! Plain env_logger output locally. On Cloud Run each record is written as a
//! single JSON object with a `severity` field so Cloud Logging keeps levels.

use chrono::{SecondsFormat, Utc};
use config::{Environment, Settings};
use log::Level;
use std::io::Write;

/// Initialize the global logger (default filter `info`, overridable via RUST_LOG)
pub fn init() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if Environment.lookup("K_SERVICE").is_some() {
        builder.format(|buf, record| {
            let line = json_line(record.level(), record.target(), &record.args().to_string());
            writeln!(buf, "{}", line)
        });
    } else {
        builder.format_timestamp_millis();
    }

    builder.init();
}

/// Cloud Logging severity for a log level
fn severity(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug | Level::Trace => "DEBUG",
    }
}

fn json_line(level: Level, target: &str, message: &str) -> serde_json::Value {
    serde_json::json!({
        "severity": severity(level),
        "message": message,
        "target": target,
        "time": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}
