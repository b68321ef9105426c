//! Configuration helpers shared by the workspace
//!
//! Services in this workspace are configured from the process environment
//! (Cloud Run style), with secrets such as service-account keys mounted as
//! JSON files. Local state defaults to a per-user data directory
//! (~/.local/share/vega/ on Linux).

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Name of the application data directory
const APP_DIR: &str = "vega";

/// Get the application data directory (~/.local/share/vega/)
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join(APP_DIR))
}

/// Get the path to a file within the application data directory
pub fn data_path(filename: &str) -> Option<PathBuf> {
    data_dir().map(|p| p.join(filename))
}

/// Ensure the directory holding `path` exists (the data directory for
/// paths from `data_path`)
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) else {
        return Ok(());
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))
}

/// A source of named string settings
///
/// `Environment` reads the process environment; a `HashMap` stands in for it
/// in tests. Empty values are treated the same as unset ones.
pub trait Settings {
    /// Raw value as stored, without any filtering
    fn raw(&self, name: &str) -> Option<String>;

    /// Value of `name`, if set and non-empty
    fn lookup(&self, name: &str) -> Option<String> {
        self.raw(name).filter(|v| !v.trim().is_empty())
    }

    /// Read a required setting
    fn required(&self, name: &str) -> Result<String> {
        self.lookup(name)
            .with_context(|| format!("{} environment variable not set", name))
    }

    /// Read an optional setting, falling back to `default`
    fn or(&self, name: &str, default: &str) -> String {
        self.lookup(name).unwrap_or_else(|| default.to_string())
    }

    /// Read and parse an optional setting, falling back to `default`
    fn parse_or<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        parse_setting(name, self.lookup(name), default)
    }
}

/// The process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct Environment;

impl Settings for Environment {
    fn raw(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl Settings for HashMap<String, String> {
    fn raw(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

fn parse_setting<T>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value {:?} for {}: {}", raw, name, e)),
        None => Ok(default),
    }
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}
