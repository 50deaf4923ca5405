//! Daemon settings.
//!
//! Operational knobs for one daemon process, loaded from a TOML file.
//! Everything has a default so a bare `hyperspace.toml` (or none at
//! all) yields a runnable development daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level daemon settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DaemonSettings {
    pub storage: StorageSettings,
    pub replication: ReplicationSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Where the storage engine keeps its data.
    pub data_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".hyperspace/data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationSettings {
    /// Pause between retransmitter repair passes, in milliseconds.
    pub retransmit_interval_ms: u64,
}

impl ReplicationSettings {
    pub fn retransmit_interval(&self) -> Duration {
        Duration::from_millis(self.retransmit_interval_ms)
    }
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            retransmit_interval_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// A `tracing_subscriber` filter directive, e.g.
    /// `info,hyperspace_replication=debug`.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl DaemonSettings {
    /// Loads settings from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings at {}", path.display()))?;
        let settings: DaemonSettings = toml::from_str(&raw)
            .with_context(|| format!("failed to parse settings at {}", path.display()))?;
        Ok(settings)
    }

    /// Loads settings, falling back to defaults when the file does not
    /// exist. Parse errors still surface.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_runnable() {
        let settings = DaemonSettings::default();
        assert_eq!(settings.storage.data_dir, PathBuf::from(".hyperspace/data"));
        assert_eq!(settings.replication.retransmit_interval_ms, 250);
        assert_eq!(settings.logging.filter, "info");
    }

    #[test]
    fn partial_toml_overlays_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[replication]\nretransmit_interval_ms = 50\n\n[logging]\nfilter = \"debug\""
        )
        .unwrap();

        let settings = DaemonSettings::load(file.path()).unwrap();
        assert_eq!(settings.replication.retransmit_interval_ms, 50);
        assert_eq!(
            settings.replication.retransmit_interval(),
            Duration::from_millis(50)
        );
        assert_eq!(settings.logging.filter, "debug");
        // Untouched sections keep their defaults.
        assert_eq!(settings.storage, StorageSettings::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings =
            DaemonSettings::load_or_default(Path::new("/nonexistent/hyperspace.toml")).unwrap();
        assert_eq!(settings, DaemonSettings::default());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not valid toml [[[").unwrap();
        assert!(DaemonSettings::load(file.path()).is_err());
    }
}
