use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Probe-path lists stay a single semicolon-delimited string at the
/// configuration surface; blank segments are skipped when parsed.
pub const PROBE_PATH_SEPARATOR: char = ';';

/// Settings for one proxy factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// Target type, optionally qualified with a trailing `, descriptor`
    /// that is stripped before lookup.
    pub type_name: String,

    /// Code module holding the type: a bare module name (resolved through
    /// the host registry and probe paths) or an explicit library path.
    pub module: String,

    /// Modules loaded into the domain, in order, before the target type is
    /// instantiated.
    #[serde(default)]
    pub preload: Vec<String>,

    /// Domain base directory; defaults to the module's parent directory
    /// (or the working directory for bare module names).
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    /// Semicolon-delimited extra probe directories.
    #[serde(default)]
    pub probe_paths: String,
}

impl FactoryConfig {
    pub fn new(type_name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            module: module.into(),
            preload: Vec::new(),
            base_dir: None,
            probe_paths: String::new(),
        }
    }

    pub fn with_preload(mut self, modules: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.preload = modules.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    pub fn with_probe_paths(mut self, probe_paths: impl Into<String>) -> Self {
        self.probe_paths = probe_paths.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.type_name.trim().is_empty() {
            return Err(Error::configuration("type_name", "must not be blank"));
        }
        if self.module.trim().is_empty() {
            return Err(Error::configuration("module", "must not be blank"));
        }
        if let Some(base_dir) = &self.base_dir {
            if base_dir.as_os_str().is_empty() {
                return Err(Error::configuration(
                    "base_dir",
                    "must not be blank when provided",
                ));
            }
        }
        Ok(())
    }

    /// Type name with any trailing `, qualifier` stripped.
    pub fn target_type_name(&self) -> &str {
        strip_type_qualifier(&self.type_name)
    }

    /// Base directory the domain resolves modules against.
    pub fn effective_base_dir(&self) -> PathBuf {
        if let Some(base_dir) = &self.base_dir {
            return base_dir.clone();
        }
        let module = Path::new(&self.module);
        match module.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Strip a trailing `, qualifier` from a type name before lookup.
pub fn strip_type_qualifier(type_name: &str) -> &str {
    match type_name.split_once(',') {
        Some((bare, _)) => bare.trim(),
        None => type_name.trim(),
    }
}

/// Host-wide lease timing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HostConfig {
    /// How far each sponsor-approved renewal pushes a lease deadline.
    pub lease_window: Duration,

    /// Cadence of the background renewal scan.
    pub tick_interval: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            lease_window: Duration::from_secs(5 * 60),
            tick_interval: Duration::from_millis(250),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_settings_are_rejected_by_field() {
        let err = FactoryConfig::new("  ", "demo.lib")
            .validate()
            .expect_err("blank type name");
        assert!(err.to_string().contains("type_name"));

        let err = FactoryConfig::new("Demo.Worker", " ")
            .validate()
            .expect_err("blank module");
        assert!(err.to_string().contains("module"));

        let err = FactoryConfig::new("Demo.Worker", "demo.lib")
            .with_base_dir("")
            .validate()
            .expect_err("blank base dir");
        assert!(err.to_string().contains("base_dir"));
    }

    #[test]
    fn type_qualifier_is_stripped_before_lookup() {
        let config = FactoryConfig::new("Demo.Worker, demo, v1", "demo.lib");
        assert_eq!(config.target_type_name(), "Demo.Worker");
        assert_eq!(strip_type_qualifier("Plain"), "Plain");
        assert_eq!(strip_type_qualifier(" Padded , q "), "Padded");
    }

    #[test]
    fn base_dir_defaults_to_module_parent() {
        let config = FactoryConfig::new("Demo.Worker", "/opt/libs/demo.so");
        assert_eq!(config.effective_base_dir(), PathBuf::from("/opt/libs"));

        let config = FactoryConfig::new("Demo.Worker", "demo.lib");
        assert_eq!(config.effective_base_dir(), PathBuf::from("."));

        let config = FactoryConfig::new("Demo.Worker", "demo.lib").with_base_dir("/opt/base");
        assert_eq!(config.effective_base_dir(), PathBuf::from("/opt/base"));
    }
}
