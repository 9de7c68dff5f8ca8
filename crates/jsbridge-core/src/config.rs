//! Configuration system
//!
//! TOML file with one table per bridge component. Every table has defaults,
//! so an empty or missing file is a valid configuration.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::gamebinds::GameBind;
use crate::keybinds::ConflictPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub windows: WindowConfig,
    pub keybinds: KeybindConfig,
    pub events: EventConfig,
    pub gamebinds: GameBindConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(Self::find_config_file);

        match config_path {
            Some(path) if path.exists() => {
                info!("Loading configuration from {:?}", path);
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {path:?}"))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Failed to parse config file: {path:?}"))
            },
            Some(path) => {
                warn!("Config file not found at {:?}, using defaults", path);
                Ok(Self::default())
            },
            None => {
                info!("No config file found, using defaults");
                Ok(Self::default())
            },
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.general.namespace_prefix.is_empty()
            || !self
                .general
                .namespace_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            anyhow::bail!(
                "general.namespace_prefix must be non-empty ASCII alphanumerics, got {:?}",
                self.general.namespace_prefix
            );
        }
        if self.general.tick_rate_hz == 0 {
            anyhow::bail!("general.tick_rate_hz must be positive");
        }
        if self.windows.default_width == 0 || self.windows.default_height == 0 {
            anyhow::bail!("windows.default_width and default_height must be positive");
        }
        if self.events.max_subscriptions_per_addon == 0 {
            anyhow::bail!("events.max_subscriptions_per_addon must be positive");
        }
        for ordinal in &self.gamebinds.bound {
            GameBind::try_from_ordinal(*ordinal)
                .with_context(|| format!("gamebinds.bound contains {ordinal}"))?;
        }
        Ok(())
    }

    /// Find the configuration file
    fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            dirs::config_dir().map(|p| p.join("jsbridge/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/jsbridge/config.toml")),
            Some(PathBuf::from("/etc/jsbridge/config.toml")),
        ];

        candidates.into_iter().flatten().find(|p| p.exists())
    }

    /// Generate default configuration as a string
    pub fn default_config_string() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Error generating config"))
    }

    /// Get the socket path
    pub fn socket_path(&self) -> PathBuf {
        if let Some(ref path) = self.general.socket_path {
            PathBuf::from(path)
        } else {
            let runtime_dir =
                std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(runtime_dir).join("jsbridge.sock")
        }
    }

    pub fn addons_dir(&self) -> PathBuf {
        self.general.addons_dir.as_ref().map_or_else(
            || data_dir().join("addons"),
            PathBuf::from,
        )
    }

    /// `None` keeps keybind chords and strings in memory only.
    pub fn store_path(&self) -> Option<PathBuf> {
        match self.keybinds.store_path.as_deref() {
            Some("") => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(data_dir().join("store.json")),
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("jsbridge")
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Prefix of namespaced identifiers: `<prefix>_<addon>_<id>`
    pub namespace_prefix: String,
    /// Directory scanned for addon manifests
    pub addons_dir: Option<String>,
    /// Socket path for the wire protocol
    pub socket_path: Option<String>,
    /// Host frames per second
    pub tick_rate_hz: u32,
    /// Language used by `localization.translate`
    pub language: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: "JSLOADER".to_string(),
            addons_dir: None,
            socket_path: None,
            tick_rate_hz: 60,
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Width used when `windows.create` omits one
    pub default_width: u32,
    /// Height used when `windows.create` omits one
    pub default_height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            default_width: 800,
            default_height: 600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeybindConfig {
    pub conflict_policy: ConflictPolicy,
    /// JSON store for rebound chords and localization overrides; empty
    /// string disables persistence
    pub store_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub max_subscriptions_per_addon: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            max_subscriptions_per_addon: 64,
        }
    }
}

/// Game binds reported as bound by the headless host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameBindConfig {
    pub bound: Vec<i32>,
}

impl Default for GameBindConfig {
    fn default() -> Self {
        let movement = [
            GameBind::MoveForward,
            GameBind::MoveBackward,
            GameBind::MoveLeft,
            GameBind::MoveRight,
            GameBind::Jump,
            GameBind::Dodge,
        ];
        Self {
            bound: movement.iter().map(|b| b.ordinal()).collect(),
        }
    }
}
