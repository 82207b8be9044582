//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables with the
//! `HEFL_` prefix, nested sections being separated by `__`. An example configuration file can be
//! found in the `configs/` directory located in the repository root.

use std::{fmt, net::SocketAddr, path::Path};

use config::{Config, ConfigError, Environment};
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    common::{PeerAddress, Roles},
    crypto::{encoding::MAX_PRECISION, paillier::MIN_MODULUS_BITS, KeySeed},
    model::Hyperparameters,
};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    #[validate]
    pub node: NodeSettings,
    #[validate]
    pub transport: TransportSettings,
    #[validate]
    pub crypto: CryptoSettings,
    #[validate]
    pub model: Hyperparameters,
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("hefl")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Validate, Deserialize)]
#[validate(schema(function = "validate_node"))]
/// The identity and role settings of the node.
pub struct NodeSettings {
    /// The address under which the other nodes reach this node.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [node]
    /// address = "127.0.0.1:7001"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// HEFL_NODE__ADDRESS=127.0.0.1:7001
    /// ```
    pub address: PeerAddress,

    /// The roles of the node, either as a list or as a comma separated string.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [node]
    /// roles = ["participant", "coordinator"]
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// HEFL_NODE__ROLES=participant,coordinator
    /// ```
    #[serde(deserialize_with = "deserialize_roles")]
    pub roles: Roles,

    /// The address of the coordinator to join. Required for participants.
    #[serde(default)]
    pub coordinator: Option<PeerAddress>,

    /// The number of rounds a participant contributes to before it stops.
    #[serde(default = "default_rounds")]
    pub rounds: u32,
}

fn default_rounds() -> u32 {
    1
}

fn validate_node(node: &NodeSettings) -> Result<(), ValidationError> {
    if node.roles.is_empty() {
        return Err(ValidationError::new("a node needs at least one role"));
    }
    if node.roles.is_participant() && node.coordinator.is_none() {
        return Err(ValidationError::new(
            "a participant needs the address of a coordinator",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Validate, Deserialize)]
/// The TCP transport settings.
pub struct TransportSettings {
    /// The address the node listens on.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [transport]
    /// bind_address = "0.0.0.0:7001"
    /// ```
    pub bind_address: SocketAddr,

    /// The time in milliseconds a sender waits for a connection and for the acknowledgment of
    /// an envelope.
    #[validate(range(min = 1))]
    pub timeout: u64,

    /// The maximal size in bytes of a frame.
    #[validate(range(min = 64))]
    pub max_frame_size: usize,
}

#[derive(Debug, Validate, Deserialize)]
#[validate(schema(function = "validate_crypto"))]
/// The homomorphic encryption settings.
///
/// All nodes of a session must be configured with the same values.
pub struct CryptoSettings {
    /// The hex encoded 32 bytes seed the key pair is derived from.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [crypto]
    /// key_seed = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
    /// ```
    #[serde(deserialize_with = "deserialize_key_seed")]
    pub key_seed: KeySeed,

    /// The size in bits of the Paillier modulus.
    pub modulus_bits: usize,

    /// The number of fractional bits of the fixed-point encoding.
    pub precision: u32,
}

fn validate_crypto(crypto: &CryptoSettings) -> Result<(), ValidationError> {
    if crypto.modulus_bits < MIN_MODULUS_BITS || crypto.modulus_bits % 2 != 0 {
        return Err(ValidationError::new(
            "the modulus size must be even and at least 128 bits",
        ));
    }
    if crypto.precision == 0 || crypto.precision > MAX_PRECISION {
        return Err(ValidationError::new(
            "the precision must be between 1 and 52 bits",
        ));
    }
    // averaging squares the scale of the values, which must fit into half the modulus
    if 2 * crypto.precision as usize + 64 > crypto.modulus_bits {
        return Err(ValidationError::new(
            "the modulus is too small for the precision",
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
/// The logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// HEFL_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.3.15/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}

fn deserialize_key_seed<'de, D>(deserializer: D) -> Result<KeySeed, D::Error>
where
    D: Deserializer<'de>,
{
    struct KeySeedVisitor;

    impl<'de> Visitor<'de> for KeySeedVisitor {
        type Value = KeySeed;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a hex encoded 32 bytes seed")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            KeySeed::from_hex(value).map_err(|_| de::Error::invalid_value(de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(KeySeedVisitor)
}

fn parse_role(role: &str) -> Option<Roles> {
    match role.trim().to_lowercase().as_str() {
        "participant" => Some(Roles::PARTICIPANT),
        "coordinator" => Some(Roles::COORDINATOR),
        _ => None,
    }
}

fn deserialize_roles<'de, D>(deserializer: D) -> Result<Roles, D::Error>
where
    D: Deserializer<'de>,
{
    struct RolesVisitor;

    impl<'de> Visitor<'de> for RolesVisitor {
        type Value = Roles;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(
                formatter,
                "a list of roles among \"participant\" and \"coordinator\""
            )
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            value
                .split(',')
                .filter(|role| !role.trim().is_empty())
                .try_fold(Roles::empty(), |roles, role| {
                    parse_role(role)
                        .map(|parsed| roles | parsed)
                        .ok_or_else(|| de::Error::invalid_value(de::Unexpected::Str(role), &self))
                })
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut roles = Roles::empty();
            while let Some(role) = seq.next_element::<String>()? {
                roles |= parse_role(&role)
                    .ok_or_else(|| de::Error::invalid_value(de::Unexpected::Str(&role), &self))?;
            }
            Ok(roles)
        }
    }

    deserializer.deserialize_any(RolesVisitor)
}
