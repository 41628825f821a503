//! pflow configuration - the `~/.pflow` home and `settings.json`
//!
//! Persisted state layout:
//! - `settings.json` - node filtering, trace toggle
//! - `mcp-servers.json` - MCP server definitions
//! - `registry-cache.json` - node catalog incl. virtual MCP entries
//! - `workflows/<name>.json` - saved workflow library
//! - `debug/` - trace files
//!
//! Priority order for the test-nodes flag: `PFLOW_TEST_NODES` env var, then
//! `settings.json`, then the default (off). No inter-process lock is held;
//! single-writer per process is assumed.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PflowError, Result};
use crate::registry::FilterSettings;

/// Env var overriding `test_nodes_enabled` ("1"/"true" enable, "0"/"false" disable)
pub const TEST_NODES_ENV: &str = "PFLOW_TEST_NODES";

/// Env var overriding the home directory (tests, sandboxes)
pub const HOME_ENV: &str = "PFLOW_HOME";

/// Resolved paths under the pflow home
#[derive(Debug, Clone)]
pub struct PflowHome {
    root: PathBuf,
}

impl PflowHome {
    /// Resolve the home: `$PFLOW_HOME`, else `~/.pflow`
    pub fn resolve() -> Self {
        let root = std::env::var(HOME_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".pflow")
            });
        Self { root }
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    pub fn mcp_servers_path(&self) -> PathBuf {
        self.root.join("mcp-servers.json")
    }

    pub fn registry_cache_path(&self) -> PathBuf {
        self.root.join("registry-cache.json")
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.root.join("workflows")
    }

    pub fn debug_dir(&self) -> PathBuf {
        self.root.join("debug")
    }
}

/// `settings.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Node filtering applied at registry load time
    #[serde(default)]
    pub node_filters: FilterSettings,
    /// Traces are written unless this is set
    #[serde(default)]
    pub trace_disabled: bool,
}

impl Settings {
    /// Load settings; a missing file yields defaults, a malformed file is
    /// an error.
    pub fn load(home: &PflowHome) -> Result<Self> {
        let path = home.settings_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| PflowError::ConfigError {
            reason: format!("malformed {}: {e}", path.display()),
        })
    }

    pub fn save(&self, home: &PflowHome) -> Result<()> {
        std::fs::create_dir_all(home.root())?;
        std::fs::write(
            home.settings_path(),
            serde_json::to_string_pretty(self)?,
        )?;
        Ok(())
    }

    /// Apply environment overrides (env beats file)
    pub fn with_env(mut self) -> Self {
        if let Ok(raw) = std::env::var(TEST_NODES_ENV) {
            match raw.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.node_filters.test_nodes_enabled = true,
                "0" | "false" | "no" => self.node_filters.test_nodes_enabled = false,
                _ => {}
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn paths_hang_off_root() {
        let home = PflowHome::at("/tmp/pflow-test");
        assert!(home.settings_path().ends_with("settings.json"));
        assert!(home.mcp_servers_path().ends_with("mcp-servers.json"));
        assert!(home.registry_cache_path().ends_with("registry-cache.json"));
        assert!(home.workflows_dir().ends_with("workflows"));
        assert!(home.debug_dir().ends_with("debug"));
    }

    #[test]
    #[serial]
    fn resolve_honors_env() {
        std::env::set_var(HOME_ENV, "/tmp/custom-pflow-home");
        let home = PflowHome::resolve();
        assert_eq!(home.root(), &PathBuf::from("/tmp/custom-pflow-home"));
        std::env::remove_var(HOME_ENV);
    }

    #[test]
    fn settings_roundtrip() {
        let dir = TempDir::new().unwrap();
        let home = PflowHome::at(dir.path());

        let settings = Settings {
            node_filters: FilterSettings {
                allow: vec!["http".into()],
                deny: vec![],
                test_nodes_enabled: true,
            },
            trace_disabled: false,
        };
        settings.save(&home).unwrap();

        let loaded = Settings::load(&home).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn missing_settings_are_defaults() {
        let dir = TempDir::new().unwrap();
        let home = PflowHome::at(dir.path());
        let settings = Settings::load(&home).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn malformed_settings_are_config_error() {
        let dir = TempDir::new().unwrap();
        let home = PflowHome::at(dir.path());
        std::fs::write(home.settings_path(), "{not json").unwrap();
        let err = Settings::load(&home).unwrap_err();
        assert_eq!(err.code(), "PFLOW-070");
    }

    #[test]
    #[serial]
    fn env_overrides_test_nodes_flag() {
        std::env::set_var(TEST_NODES_ENV, "1");
        let settings = Settings::default().with_env();
        assert!(settings.node_filters.test_nodes_enabled);

        std::env::set_var(TEST_NODES_ENV, "false");
        let settings = Settings {
            node_filters: FilterSettings {
                test_nodes_enabled: true,
                ..FilterSettings::default()
            },
            ..Settings::default()
        }
        .with_env();
        assert!(!settings.node_filters.test_nodes_enabled);

        std::env::remove_var(TEST_NODES_ENV);
    }
}
