//! PDO configurations for remote nodes, loaded from TOML
use std::{collections::HashMap, path::Path};

use motocan_common::pdo::PdoMapping;
use serde::{de, Deserialize, Deserializer};
use snafu::{ResultExt, Snafu};

/// Error returned when loading configuration files
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// The file could not be read
    #[snafu(display("IO error loading {path}: {source:?}"))]
    Io {
        /// The file path
        path: String,
        /// The underlying error
        source: std::io::Error,
    },
    /// The file is not valid TOML for the configuration
    #[snafu(display("Error parsing TOML: {source}"))]
    TomlDeserialization {
        /// The underlying error
        source: toml::de::Error,
    },
}

pub(crate) fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).context(IoSnafu {
        path: path.to_string_lossy(),
    })
}

/// The PDO configuration of a node
///
/// ```toml
/// [tpdo.0]
/// enabled = true
/// transmission_type = 1
/// mappings = [
///     { index = 0x2001, sub = 0, size = 16 },
/// ]
///
/// [rpdo.0]
/// enabled = true
/// cob = 0x20A
/// transmission_type = 254
/// mappings = [{ index = 0x2003, sub = 0, size = 32 }]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Transmit PDO configurations, by PDO number
    #[serde(deserialize_with = "deserialize_pdo_map", default)]
    pub tpdo: HashMap<usize, PdoConfig>,
    /// Receive PDO configurations, by PDO number
    #[serde(deserialize_with = "deserialize_pdo_map", default)]
    pub rpdo: HashMap<usize, PdoConfig>,
}

impl NodeConfig {
    /// Read a configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<NodeConfig, ConfigError> {
        Self::load_from_str(&read_file(path.as_ref())?)
    }

    /// Read a configuration from a string
    pub fn load_from_str(s: &str) -> Result<NodeConfig, ConfigError> {
        toml::from_str(s).context(TomlDeserializationSnafu)
    }
}

/// The configuration of a single PDO
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PdoConfig {
    /// The identifier the PDO sends or receives on. The node's default is used if omitted.
    #[serde(default)]
    pub cob: Option<u32>,
    /// The PDO is activated once configured
    pub enabled: bool,
    /// The sub objects mapped into the PDO, in frame order
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
    /// Specifies when a PDO is sent or latched
    ///
    /// - 0: Sent on SYNC, but only after an application event
    /// - 1 - 240: Sent on every Nth SYNC
    /// - 252, 253: Sent on remote request
    /// - 254, 255: Event driven
    pub transmission_type: u8,
    /// Minimum time between event driven transmissions, in units of 100us. Transmit PDOs only.
    #[serde(default)]
    pub inhibit_time: u16,
}

impl PdoConfig {
    /// The mappings as PDO mapping parameters
    pub fn pdo_mappings(&self) -> Vec<PdoMapping> {
        self.mappings
            .iter()
            .map(|m| PdoMapping::new(m.index, m.sub, m.size))
            .collect()
    }
}

/// One mapped sub object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingConfig {
    /// The object index
    pub index: u16,
    /// The object sub index
    pub sub: u8,
    /// The size of the object, in **bits**
    pub size: u8,
}

fn deserialize_pdo_map<'de, D>(deserializer: D) -> Result<HashMap<usize, PdoConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let str_map = HashMap::<String, PdoConfig>::deserialize(deserializer)?;
    let original_len = str_map.len();
    let data = str_map
        .into_iter()
        .map(|(key, value)| match key.parse() {
            Ok(n) => Ok((n, value)),
            Err(_) => Err(de::Error::invalid_value(
                de::Unexpected::Str(&key),
                &"a non-negative integer",
            )),
        })
        .collect::<Result<HashMap<_, _>, _>>()?;
    // "1" and "01" are the same PDO
    if data.len() < original_len {
        return Err(de::Error::custom("detected duplicate integer key"));
    }
    Ok(data)
}
