//! TOML configuration file for the emulator.
//!
//! The file mirrors the controller's three sections (`[desk]`, `[twitch]` and
//! `[display_server]`) and is converted into a validated
//! [`ControllerConfig`] before anything connects.

use std::fs;
use std::path::{Path, PathBuf};

use desk_core::catalog::DEFAULT_REWARD_COST;
use desk_core::config::{
    self as core_config, ActuatorEndpoint, ActuatorMode, ActuatorProfile, ControllerConfig,
    DisplayEndpoint, FeatureFlags, MacAddress, RewardSettings,
};
use desk_core::tracker::{DeskGeometry, GeometryError};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE_NAME: &str = "desk.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid desk heights: {0}")]
    Geometry(GeometryError),
    #[error("{0}")]
    Invalid(core_config::ConfigError),
    #[error("[twitch] {0} must not be empty")]
    MissingCredential(&'static str),
}

impl From<core_config::ConfigError> for ConfigError {
    fn from(err: core_config::ConfigError) -> Self {
        ConfigError::Invalid(err)
    }
}

/// `$HOME/desk.toml`, or `./desk.toml` when no home directory is set.
pub fn default_config_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(DEFAULT_CONFIG_FILE_NAME)
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub desk: DeskSection,
    pub twitch: TwitchSection,
    #[serde(default)]
    pub display_server: DisplaySection,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DeskSection {
    pub controller_mac: String,
    pub sitting_height: f32,
    pub standing_height: f32,
    #[serde(default = "default_profile")]
    pub profile: String,
    pub data_in_uuid: Option<String>,
    pub data_out_uuid: Option<String>,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "enabled")]
    pub telemetry: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TwitchSection {
    pub client_id: String,
    pub client_secret: String,
    pub broadcaster_name: String,
    pub auth_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub enable_bits: bool,
    #[serde(default = "default_min_bits")]
    pub min_bits: u32,
    #[serde(default)]
    pub enable_channel_points: bool,
    pub desk_up_reward_name: Option<String>,
    pub desk_down_reward_name: Option<String>,
    #[serde(default = "default_reward_cost")]
    pub reward_cost: u32,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DisplaySection {
    #[serde(default)]
    pub enabled: bool,
    /// `stdout` or a `host:port` accepting JSON lines.
    pub address: Option<String>,
}

fn default_profile() -> String {
    "omnidesk".to_owned()
}

fn default_mode() -> String {
    "height".to_owned()
}

fn enabled() -> bool {
    true
}

fn default_min_bits() -> u32 {
    100
}

fn default_reward_cost() -> u32 {
    DEFAULT_REWARD_COST
}

/// Platform credentials handed to the emulated event source.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub client_id: String,
    pub broadcaster_name: String,
    pub auth_token: String,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let twitch = &self.twitch;
        for (name, value) in [
            ("client_id", &twitch.client_id),
            ("client_secret", &twitch.client_secret),
            ("broadcaster_name", &twitch.broadcaster_name),
            ("auth_token", &twitch.auth_token),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingCredential(name));
            }
        }

        Ok(Credentials {
            client_id: twitch.client_id.clone(),
            broadcaster_name: twitch.broadcaster_name.clone(),
            auth_token: twitch.auth_token.clone(),
        })
    }

    /// Builds and validates the controller record.
    pub fn controller_config(&self) -> Result<ControllerConfig, ConfigError> {
        let desk = &self.desk;
        let twitch = &self.twitch;

        let geometry = DeskGeometry::new(desk.sitting_height, desk.standing_height)
            .map_err(ConfigError::Geometry)?;
        let address: MacAddress = desk.controller_mac.parse()?;
        let profile: ActuatorProfile = desk.profile.parse()?;
        let (profile_in, profile_out) = profile.characteristics();
        let actuator = ActuatorEndpoint::with_characteristics(
            address,
            desk.data_in_uuid.as_deref().unwrap_or(profile_in),
            desk.data_out_uuid.as_deref().unwrap_or(profile_out),
        )?;
        let mode: ActuatorMode = desk.mode.parse()?;

        let rewards = if twitch.enable_channel_points {
            let mut rewards = RewardSettings::new(
                twitch.desk_up_reward_name.as_deref().unwrap_or_default(),
                twitch.desk_down_reward_name.as_deref().unwrap_or_default(),
            )?;
            rewards.cost = twitch.reward_cost;
            Some(rewards)
        } else {
            None
        };

        let display = if self.display_server.enabled {
            let address = self.display_server.address.as_deref().unwrap_or_default();
            Some(DisplayEndpoint::new(address)?)
        } else {
            None
        };

        let config = ControllerConfig {
            geometry,
            actuator,
            mode,
            display,
            features: FeatureFlags {
                telemetry: desk.telemetry,
                bits: twitch.enable_bits,
                channel_points: twitch.enable_channel_points,
                display: self.display_server.enabled,
            },
            rewards,
            min_bits: twitch.min_bits,
        };
        config.validate()?;
        Ok(config)
    }
}
