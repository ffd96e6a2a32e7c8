use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_target: default_true(),
            ansi_colors: default_true(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "r10-bridge".to_string()
}

/// Environmental values pushed to the device via shot config.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShotConfigSettings {
    /// Ambient temperature, °F.
    pub temperature_f: f32,
    /// Relative humidity, 0.0–1.0.
    pub humidity: f32,
    /// Altitude above sea level, metres.
    pub altitude_m: f32,
    /// Air density, kg/m³. Passed to the device verbatim.
    pub air_density: f32,
    /// Tee distance from the unit, metres.
    pub tee_range_m: f32,
}

impl Default for ShotConfigSettings {
    fn default() -> Self {
        Self {
            temperature_f: 70.0,
            humidity: 0.5,
            altitude_m: 0.0,
            air_density: 1.225,
            tee_range_m: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkSettings {
    /// Emit normalised shots as newline-delimited JSON over TCP.
    #[serde(default = "default_false")]
    pub tcp_enabled: bool,
    #[serde(default = "default_tcp_address")]
    pub tcp_address: String,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            tcp_enabled: default_false(),
            tcp_address: default_tcp_address(),
        }
    }
}

fn default_tcp_address() -> String {
    "127.0.0.1:921".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Host controller to use, e.g. "hci0". None selects the default adapter.
    pub adapter: Option<String>,
    /// Launch monitor MAC address, e.g. "AA:BB:CC:DD:EE:FF".
    pub device_address: Option<String>,

    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,

    /// Issue a wake command whenever the device reports standby.
    #[serde(default = "default_true")]
    pub auto_wake: bool,
    /// Run tilt calibration as part of session setup.
    #[serde(default = "default_false")]
    pub calibrate_tilt_on_connect: bool,

    #[serde(default)]
    pub shot_config: ShotConfigSettings,
    #[serde(default)]
    pub sink: SinkSettings,
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            adapter: None,
            device_address: None,
            reconnect_delay_secs: default_reconnect_delay_secs(),
            discovery_timeout_secs: default_discovery_timeout_secs(),
            auto_wake: true,
            calibrate_tilt_on_connect: false,
            shot_config: ShotConfigSettings::default(),
            sink: SinkSettings::default(),
            log_settings: LogSettings::default(),
        }
    }
}

fn default_reconnect_delay_secs() -> u64 {
    5
}
fn default_discovery_timeout_secs() -> u64 {
    30
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::default_settings_path()?;
        Self::with_path(settings_path)
    }

    pub fn with_path(settings_path: PathBuf) -> anyhow::Result<Self> {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Ok(Self { settings, settings_path })
    }

    fn default_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("r10-bridge");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    /// Write the current settings back out, creating the file on first run
    /// so the user has something to edit.
    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
