use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Which display path the app drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentMode {
    /// Windowed swapchain presentation.
    Windowed,
    /// Exclusive direct-display presentation.
    Exclusive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Output to mirror; `None` spans every output on the adapter.
    pub output: Option<usize>,
    pub vsync: bool,
    #[serde(default = "default_mode")]
    pub mode: PresentMode,
    /// Exclusive path: which enumerated display to acquire.
    #[serde(default)]
    pub exclusive_display: usize,
    /// Exclusive path: which enumerated mode to set.
    #[serde(default)]
    pub exclusive_mode: usize,
    /// Upper bound on waiting for the shared canvas each tick.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u32,
    #[serde(default = "default_log_retention")]
    pub log_retention_count: usize,
}

fn default_mode() -> PresentMode {
    PresentMode::Windowed
}

fn default_acquire_timeout() -> u32 {
    100
}

fn default_log_retention() -> usize {
    10
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output: None,
            vsync: true,
            mode: PresentMode::Windowed,
            exclusive_display: 0,
            exclusive_mode: 0,
            acquire_timeout_ms: 100,
            log_retention_count: 10,
        }
    }
}

pub struct Config {
    config_path: PathBuf,
    pub app_data_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Config {
    pub fn new() -> Result<Self> {
        let app_data = std::env::var("APPDATA")
            .context("Failed to get APPDATA environment variable")?;

        let app_data_dir = PathBuf::from(app_data).join("DeskBridge");
        Self::at(app_data_dir)
    }

    /// Root the configuration under an explicit directory.
    pub fn at(app_data_dir: PathBuf) -> Result<Self> {
        let config_path = app_data_dir.join("config.json");
        let log_dir = app_data_dir.join("logs");

        fs::create_dir_all(&app_data_dir)
            .context("Failed to create app data directory")?;
        fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

        Ok(Self {
            config_path,
            app_data_dir,
            log_dir,
        })
    }

    pub fn load(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.config_path)
            .context("Failed to read config file")?;

        let config: AppConfig =
            serde_json::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    pub fn save(&self, config: &AppConfig) -> Result<()> {
        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(&self.config_path, content).context("Failed to write config file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::at(dir.path().join("app")).unwrap();

        let loaded = config.load().unwrap();
        assert_eq!(loaded.output, None);
        assert_eq!(loaded.acquire_timeout_ms, 100);
        assert_eq!(loaded.mode, PresentMode::Windowed);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::at(dir.path().join("app")).unwrap();

        let mut app = AppConfig::default();
        app.output = Some(1);
        app.mode = PresentMode::Exclusive;
        app.exclusive_mode = 3;
        config.save(&app).unwrap();

        let loaded = config.load().unwrap();
        assert_eq!(loaded.output, Some(1));
        assert_eq!(loaded.mode, PresentMode::Exclusive);
        assert_eq!(loaded.exclusive_mode, 3);
    }

    #[test]
    fn older_config_without_new_fields_parses() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::at(dir.path().join("app")).unwrap();
        fs::write(
            dir.path().join("app").join("config.json"),
            r#"{"output": 0, "vsync": false}"#,
        )
        .unwrap();

        let loaded = config.load().unwrap();
        assert_eq!(loaded.output, Some(0));
        assert!(!loaded.vsync);
        assert_eq!(loaded.acquire_timeout_ms, 100);
    }
}
