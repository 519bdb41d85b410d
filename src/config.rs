//! Configuration management for rfpscout.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default per-portal scan history cap.
pub const DEFAULT_HISTORY_CAP: usize = 50;

/// On-disk configuration, loaded from `<data_dir>/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds to wait between portals in a sequential sweep.
    pub inter_scan_delay_secs: u64,
    /// Per-request timeout against portal sites, in seconds.
    pub request_timeout_secs: u64,
    /// How many terminal sessions to keep per portal.
    pub history_cap: usize,
    /// Backup sweep interval, in hours.
    pub backup_sweep_hours: u64,
    /// Maximum listing pages followed per scan.
    pub max_pages_per_scan: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inter_scan_delay_secs: 30,
            request_timeout_secs: 30,
            history_cap: DEFAULT_HISTORY_CAP,
            backup_sweep_hours: 6,
            max_pages_per_scan: 5,
        }
    }
}

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub config: Config,
}

impl Settings {
    /// Path to the SQLite database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("rfpscout.db")
    }

    pub fn inter_scan_delay(&self) -> Duration {
        Duration::from_secs(self.config.inter_scan_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }

    pub fn backup_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.config.backup_sweep_hours * 3600)
    }
}

/// Resolve the data directory: explicit flag, RFPSCOUT_DATA_DIR, or
/// the platform data dir.
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir;
    }
    if let Ok(dir) = std::env::var("RFPSCOUT_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rfpscout")
}

/// Load settings, creating the data directory and a default config
/// file if missing.
pub fn load_settings(data_dir: Option<PathBuf>) -> anyhow::Result<Settings> {
    let data_dir = resolve_data_dir(data_dir);
    fs::create_dir_all(&data_dir)?;

    let config_path = data_dir.join("config.toml");
    let config = if config_path.exists() {
        load_config(&config_path)?
    } else {
        let config = Config::default();
        fs::write(&config_path, toml::to_string_pretty(&config)?)?;
        config
    };

    Ok(Settings { data_dir, config })
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    let raw = fs::read_to_string(path)?;
    Ok(toml::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_default_config_on_first_load() {
        let dir = tempdir().unwrap();
        let settings = load_settings(Some(dir.path().join("data"))).unwrap();
        assert!(settings.data_dir.join("config.toml").exists());
        assert_eq!(settings.config.history_cap, DEFAULT_HISTORY_CAP);
        assert_eq!(settings.config.backup_sweep_hours, 6);
    }

    #[test]
    fn reads_existing_config() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(
            data.join("config.toml"),
            "inter_scan_delay_secs = 5\nhistory_cap = 3\n",
        )
        .unwrap();

        let settings = load_settings(Some(data)).unwrap();
        assert_eq!(settings.config.inter_scan_delay_secs, 5);
        assert_eq!(settings.config.history_cap, 3);
        // Unspecified fields keep their defaults.
        assert_eq!(settings.config.max_pages_per_scan, 5);
    }
}
