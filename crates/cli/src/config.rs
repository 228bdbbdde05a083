//! Configuration management for the CLI
//!
//! Settings are layered: built-in defaults, then the optional config file,
//! then `OOMTRACE_*` environment variables. Command-line flags are applied
//! on top by the caller.

use anyhow::{Context, Result};
use oomtrace_lib::investigate::InvestigationOptions;
use oomtrace_lib::resolve::{AmbiguousPick, DEFAULT_NODE_SELECTOR};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "OOMTRACE";

/// CLI settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Program used to stream node journals (`<cmd> adm node-logs <node>`)
    #[serde(default = "default_node_log_command")]
    pub node_log_command: String,

    /// Label selector for nodes scanned when events are missing
    #[serde(default = "default_node_selector")]
    pub node_selector: String,

    /// Namespace to read scheduler events from (all if unset)
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub ambiguous_pick: AmbiguousPick,

    /// Container log lines attached to offline reports
    #[serde(default = "default_container_log_tail")]
    pub container_log_tail: usize,
}

fn default_node_log_command() -> String {
    "oc".to_string()
}

fn default_node_selector() -> String {
    DEFAULT_NODE_SELECTOR.to_string()
}

fn default_container_log_tail() -> usize {
    20
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node_log_command: default_node_log_command(),
            node_selector: default_node_selector(),
            namespace: None,
            ambiguous_pick: AmbiguousPick::default(),
            container_log_tail: default_container_log_tail(),
        }
    }
}

impl Settings {
    /// Load settings; an explicit `path` must exist, the default file may not
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
            }
            None => {
                if let Some(default_path) = Self::config_path() {
                    builder = builder.add_source(config::File::from(default_path).required(false));
                }
            }
        }

        builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// `~/.config/oomtrace/config.toml`
    fn config_path() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| home.join(".config").join("oomtrace").join("config.toml"))
    }

    pub fn options(&self) -> InvestigationOptions {
        InvestigationOptions {
            ambiguous_pick: self.ambiguous_pick,
            container_log_tail: self.container_log_tail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.node_log_command, "oc");
        assert_eq!(settings.node_selector, DEFAULT_NODE_SELECTOR);
        assert_eq!(settings.ambiguous_pick, AmbiguousPick::Last);
        assert_eq!(settings.options().container_log_tail, 20);
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "node_selector = \"node-role.kubernetes.io/aap\"").unwrap();
        writeln!(file, "ambiguous_pick = \"first\"").unwrap();
        writeln!(file, "container_log_tail = 5").unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.node_selector, "node-role.kubernetes.io/aap");
        assert_eq!(settings.ambiguous_pick, AmbiguousPick::First);
        assert_eq!(settings.container_log_tail, 5);
        assert_eq!(settings.node_log_command, "oc");
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
