//! Controller configuration record.
//!
//! A single [`ControllerConfig`] value is built once at startup and handed to
//! every component by reference. Host front-ends parse their own file format
//! and convert into this type, then call [`ControllerConfig::validate`].

use core::fmt;
use core::str::FromStr;

use heapless::{String, Vec};
use winnow::combinator::{eof, preceded, terminated};
use winnow::prelude::*;
use winnow::token::{literal, take_while};

use crate::catalog::DEFAULT_REWARD_COST;
use crate::tracker::DeskGeometry;

/// Length of a textual 128-bit UUID.
pub const UUID_LEN: usize = 36;
/// Longest reward title accepted by the platform.
pub const REWARD_TITLE_CAPACITY: usize = 45;
/// Capacity of the display server address (`host:port` or a sink name).
pub const ADDRESS_CAPACITY: usize = 64;

pub type CharacteristicId = String<UUID_LEN>;
pub type RewardTitle = String<REWARD_TITLE_CAPACITY>;

pub const SCOPE_READ_REDEMPTIONS: &str = "channel:read:redemptions";
pub const SCOPE_MANAGE_REDEMPTIONS: &str = "channel:manage:redemptions";
pub const SCOPE_READ_BITS: &str = "bits:read";

/// Platform scopes derived from the feature flags.
pub type Scopes = Vec<&'static str, 3>;

/// Configuration problems detected while building or validating a record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    InvalidMacAddress,
    InvalidCharacteristic,
    UnknownProfile,
    UnknownMode,
    InvalidGeometry,
    /// Neither bits nor channel points are enabled.
    NoEventFeatures,
    MissingRewardTitle,
    RewardTitleTooLong,
    InvalidMinBits,
    MissingDisplayAddress,
    AddressTooLong,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            ConfigError::InvalidMacAddress => "controller address must look like AA:BB:CC:DD:EE:FF",
            ConfigError::InvalidCharacteristic => "characteristic id must be a 36 character UUID",
            ConfigError::UnknownProfile => "unknown desk profile (expected omnidesk or uplift)",
            ConfigError::UnknownMode => "unknown actuator mode (expected height or preset)",
            ConfigError::InvalidGeometry => "standing height must exceed sitting height",
            ConfigError::NoEventFeatures => "enable bits, channel points, or both",
            ConfigError::MissingRewardTitle => "channel points need raise and lower reward titles",
            ConfigError::RewardTitleTooLong => "reward title exceeds 45 characters",
            ConfigError::InvalidMinBits => "minimum bits must be at least 1",
            ConfigError::MissingDisplayAddress => "display enabled without an address",
            ConfigError::AddressTooLong => "display address too long",
        };
        f.write_str(message)
    }
}

/// Bluetooth device address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

fn hex_octet(input: &mut &str) -> ModalResult<u8> {
    take_while(2, |c: char| c.is_ascii_hexdigit())
        .verify_map(|digits: &str| u8::from_str_radix(digits, 16).ok())
        .parse_next(input)
}

fn separated_octet(input: &mut &str) -> ModalResult<u8> {
    preceded(literal(":"), hex_octet).parse_next(input)
}

fn mac_address(input: &mut &str) -> ModalResult<MacAddress> {
    terminated(
        (
            hex_octet,
            separated_octet,
            separated_octet,
            separated_octet,
            separated_octet,
            separated_octet,
        ),
        eof,
    )
    .map(|(a, b, c, d, e, f)| MacAddress([a, b, c, d, e, f]))
    .parse_next(input)
}

impl FromStr for MacAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut input = s.trim();
        mac_address(&mut input).map_err(|_| ConfigError::InvalidMacAddress)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Known JCP35N-BLT integrations and their GATT characteristics.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ActuatorProfile {
    #[default]
    Omnidesk,
    Uplift,
}

impl ActuatorProfile {
    /// `(data in, data out)` characteristic UUIDs.
    #[must_use]
    pub const fn characteristics(self) -> (&'static str, &'static str) {
        match self {
            ActuatorProfile::Omnidesk => (
                "0000ff01-0000-1000-8000-00805f9b34fb",
                "0000ff02-0000-1000-8000-00805f9b34fb",
            ),
            ActuatorProfile::Uplift => (
                "0000fe61-0000-1000-8000-00805f9b34fb",
                "0000fe62-0000-1000-8000-00805f9b34fb",
            ),
        }
    }
}

impl FromStr for ActuatorProfile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("omnidesk") {
            Ok(ActuatorProfile::Omnidesk)
        } else if s.eq_ignore_ascii_case("uplift") {
            Ok(ActuatorProfile::Uplift)
        } else {
            Err(ConfigError::UnknownProfile)
        }
    }
}

fn characteristic(value: &str) -> Result<CharacteristicId, ConfigError> {
    let well_formed = value.len() == UUID_LEN
        && value.char_indices().all(|(index, c)| match index {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        });
    if !well_formed {
        return Err(ConfigError::InvalidCharacteristic);
    }
    String::try_from(value).map_err(|_| ConfigError::InvalidCharacteristic)
}

/// Actuator address and its write/notify characteristics.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActuatorEndpoint {
    pub address: MacAddress,
    /// Characteristic commands are written to.
    pub data_in: CharacteristicId,
    /// Characteristic height notifications arrive on.
    pub data_out: CharacteristicId,
}

impl ActuatorEndpoint {
    pub fn from_profile(
        address: MacAddress,
        profile: ActuatorProfile,
    ) -> Result<Self, ConfigError> {
        let (data_in, data_out) = profile.characteristics();
        Self::with_characteristics(address, data_in, data_out)
    }

    pub fn with_characteristics(
        address: MacAddress,
        data_in: &str,
        data_out: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            address,
            data_in: characteristic(data_in)?,
            data_out: characteristic(data_out)?,
        })
    }
}

/// Network location of the display server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DisplayEndpoint {
    pub address: String<ADDRESS_CAPACITY>,
}

impl DisplayEndpoint {
    pub fn new(address: &str) -> Result<Self, ConfigError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ConfigError::MissingDisplayAddress);
        }
        Ok(Self {
            address: String::try_from(address).map_err(|_| ConfigError::AddressTooLong)?,
        })
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FeatureFlags {
    /// Track height notifications and use them to skip redundant moves.
    pub telemetry: bool,
    pub bits: bool,
    pub channel_points: bool,
    pub display: bool,
}

/// How a raise/lower request is expressed on the wire.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ActuatorMode {
    /// Set-height frame with the configured sit/stand height.
    #[default]
    TargetHeight,
    /// Memory preset frames (preset 2 up, preset 1 down).
    Preset,
}

impl FromStr for ActuatorMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("height") {
            Ok(ActuatorMode::TargetHeight)
        } else if s.eq_ignore_ascii_case("preset") {
            Ok(ActuatorMode::Preset)
        } else {
            Err(ConfigError::UnknownMode)
        }
    }
}

/// Channel point reward names and price.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RewardSettings {
    pub raise_title: RewardTitle,
    pub lower_title: RewardTitle,
    pub cost: u32,
}

impl RewardSettings {
    pub fn new(raise_title: &str, lower_title: &str) -> Result<Self, ConfigError> {
        let title = |value: &str| -> Result<RewardTitle, ConfigError> {
            let value = value.trim();
            if value.is_empty() {
                return Err(ConfigError::MissingRewardTitle);
            }
            String::try_from(value).map_err(|_| ConfigError::RewardTitleTooLong)
        };

        Ok(Self {
            raise_title: title(raise_title)?,
            lower_title: title(lower_title)?,
            cost: DEFAULT_REWARD_COST,
        })
    }
}

/// Everything the engine needs to know at runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    pub geometry: DeskGeometry,
    pub actuator: ActuatorEndpoint,
    pub mode: ActuatorMode,
    pub display: Option<DisplayEndpoint>,
    pub features: FeatureFlags,
    pub rewards: Option<RewardSettings>,
    /// Smallest cheer that may carry a desk command.
    pub min_bits: u32,
}

impl ControllerConfig {
    /// Cross-field checks that individual constructors cannot perform.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.geometry.standing_cm() <= self.geometry.sitting_cm() {
            return Err(ConfigError::InvalidGeometry);
        }
        if !self.features.bits && !self.features.channel_points {
            return Err(ConfigError::NoEventFeatures);
        }
        if self.features.channel_points && self.rewards.is_none() {
            return Err(ConfigError::MissingRewardTitle);
        }
        if self.features.bits && self.min_bits == 0 {
            return Err(ConfigError::InvalidMinBits);
        }
        if self.features.display && self.display.is_none() {
            return Err(ConfigError::MissingDisplayAddress);
        }
        Ok(())
    }

    /// Platform scopes this configuration subscribes with.
    pub fn required_scopes(&self) -> Result<Scopes, ConfigError> {
        required_scopes(self.features)
    }
}

/// Maps enabled features to the platform scopes they need.
pub fn required_scopes(features: FeatureFlags) -> Result<Scopes, ConfigError> {
    let mut scopes = Scopes::new();
    let mut push = |scope| scopes.push(scope).map_err(|_| ConfigError::NoEventFeatures);

    if features.channel_points {
        push(SCOPE_READ_REDEMPTIONS)?;
        push(SCOPE_MANAGE_REDEMPTIONS)?;
    }
    if features.bits {
        push(SCOPE_READ_BITS)?;
    }
    if scopes.is_empty() {
        return Err(ConfigError::NoEventFeatures);
    }
    Ok(scopes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ControllerConfig {
        ControllerConfig {
            geometry: DeskGeometry::new(75.0, 120.0).expect("geometry"),
            actuator: ActuatorEndpoint::from_profile(
                "C4:BE:84:1A:2B:3C".parse().expect("mac"),
                ActuatorProfile::Omnidesk,
            )
            .expect("endpoint"),
            mode: ActuatorMode::TargetHeight,
            display: None,
            features: FeatureFlags {
                telemetry: true,
                bits: true,
                channel_points: true,
                display: false,
            },
            rewards: Some(RewardSettings::new("Desk Up", "Desk Down").expect("rewards")),
            min_bits: 100,
        }
    }

    #[test]
    fn mac_addresses_parse_case_insensitively() {
        let mac: MacAddress = "c4:be:84:1a:2b:3c".parse().expect("valid mac");
        assert_eq!(mac.octets(), [0xC4, 0xBE, 0x84, 0x1A, 0x2B, 0x3C]);

        let mut text: String<17> = String::new();
        fmt::write(&mut text, format_args!("{mac}")).expect("fits");
        assert_eq!(text.as_str(), "C4:BE:84:1A:2B:3C");
    }

    #[test]
    fn malformed_mac_addresses_are_rejected() {
        for value in [
            "",
            "C4:BE:84:1A:2B",
            "C4:BE:84:1A:2B:3C:00",
            "C4-BE-84-1A-2B-3C",
            "C4:BE:84:1A:2B:3G",
            "C4:BE:84:1A:2B:3",
        ] {
            assert_eq!(
                value.parse::<MacAddress>(),
                Err(ConfigError::InvalidMacAddress),
                "{value:?} should be rejected"
            );
        }
    }

    #[test]
    fn profiles_supply_characteristics() {
        let mac = MacAddress::new([0; 6]);
        let uplift =
            ActuatorEndpoint::from_profile(mac, ActuatorProfile::Uplift).expect("endpoint");
        assert_eq!(uplift.data_in.as_str(), "0000fe61-0000-1000-8000-00805f9b34fb");
        assert_eq!(uplift.data_out.as_str(), "0000fe62-0000-1000-8000-00805f9b34fb");

        assert_eq!(
            ActuatorEndpoint::with_characteristics(mac, "ff01", "ff02"),
            Err(ConfigError::InvalidCharacteristic)
        );
        assert_eq!("UPLIFT".parse::<ActuatorProfile>(), Ok(ActuatorProfile::Uplift));
        assert_eq!("Preset".parse::<ActuatorMode>(), Ok(ActuatorMode::Preset));
        assert_eq!("memory".parse::<ActuatorMode>(), Err(ConfigError::UnknownMode));
    }

    #[test]
    fn validation_catches_cross_field_problems() {
        assert_eq!(sample().validate(), Ok(()));

        let mut config = sample();
        config.features.bits = false;
        config.features.channel_points = false;
        assert_eq!(config.validate(), Err(ConfigError::NoEventFeatures));

        let mut config = sample();
        config.rewards = None;
        assert_eq!(config.validate(), Err(ConfigError::MissingRewardTitle));

        let mut config = sample();
        config.min_bits = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMinBits));

        let mut config = sample();
        config.features.display = true;
        assert_eq!(config.validate(), Err(ConfigError::MissingDisplayAddress));
    }

    #[test]
    fn scopes_follow_features() {
        let scopes = sample().required_scopes().expect("scopes");
        assert_eq!(
            scopes.as_slice(),
            [SCOPE_READ_REDEMPTIONS, SCOPE_MANAGE_REDEMPTIONS, SCOPE_READ_BITS]
        );

        let bits_only = FeatureFlags {
            bits: true,
            ..FeatureFlags::default()
        };
        assert_eq!(
            required_scopes(bits_only).expect("scopes").as_slice(),
            [SCOPE_READ_BITS]
        );
        assert_eq!(
            required_scopes(FeatureFlags::default()),
            Err(ConfigError::NoEventFeatures)
        );
    }

    #[test]
    fn reward_titles_are_trimmed_and_bounded() {
        let rewards = RewardSettings::new("  Stand up ", "Sit down").expect("rewards");
        assert_eq!(rewards.raise_title.as_str(), "Stand up");
        assert_eq!(rewards.cost, DEFAULT_REWARD_COST);

        assert_eq!(
            RewardSettings::new("", "Sit"),
            Err(ConfigError::MissingRewardTitle)
        );
        let long = [b'x'; REWARD_TITLE_CAPACITY + 1];
        let long = core::str::from_utf8(&long).expect("ascii");
        assert_eq!(
            RewardSettings::new(long, "Sit"),
            Err(ConfigError::RewardTitleTooLong)
        );
    }
}
