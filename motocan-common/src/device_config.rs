//! Device config file
//!
//! A DeviceConfig is created from a TOML file, and describes a motocan node: its node ID, the
//! start-up values of the standard communication objects, and the application objects in its
//! object dictionary.
//!
//! # An example TOML file
//!
//! ```toml
//! node_id = 5
//! device_type = 0x00020192
//! heartbeat_period = 1000
//!
//! [identity]
//! vendor_id = 0xCAFE
//! product_code = 1032
//! revision_number = 1
//!
//! [heartbeat_consumer]
//! node = 1
//! time_ms = 500
//!
//! [sync]
//! period_us = 10000
//! window_us = 5000
//! counter_overflow = 16
//!
//! [emcy]
//! inhibit_100us = 100
//!
//! # Defines the number of PDOs the device will support
//! [pdos]
//! num_rpdo = 4
//! num_tpdo = 4
//!
//! [[objects]]
//! index = 0x2000
//! sub_index = 0
//! data_type = "u16"
//! access_type = "ro"
//! pdo_mapping = true
//! ```
//!
//! # Object Namespaces
//!
//! Application specific objects should be defined in the range 0x2000-0x5fff, and profile objects
//! (e.g. CiA402) in 0x6000-0x9fff. The communication objects in 0x1000-0x1fff are created by the
//! node itself and may not be listed here.
use std::collections::HashSet;

use serde::{de::Error, Deserialize};
use snafu::{ResultExt as _, Snafu};

use crate::{
    objects::{AccessType, DataType, Entry, ObjectDictionary},
    settings::{DeviceSettings, HeartbeatConsumer, Identity, SyncSettings, MAX_PDOS},
};

/// Error returned when loading a device config fails
#[derive(Debug, Snafu)]
pub enum LoadError {
    /// An IO error occured while reading the file
    #[snafu(display("IO error: {source}"))]
    Io {
        /// The underlying IO error
        source: std::io::Error,
    },
    /// An error occured in the TOML parser
    #[snafu(display("Toml parse error: {source}"))]
    TomlParsing {
        /// The toml error which led to this error
        source: toml::de::Error,
    },
    /// The same sub object is defined more than once
    #[snafu(display("Multiple definitions of sub index {sub} on object 0x{index:x}"))]
    DuplicateSubObjects {
        /// Object index
        index: u16,
        /// Sub index
        sub: u8,
    },
    /// An object was defined in the communication profile range
    #[snafu(display("Object 0x{index:x} is reserved for communication objects"))]
    ReservedIndex {
        /// Object index
        index: u16,
    },
    /// The node ID is out of range
    #[snafu(display("Invalid node ID {node_id}"))]
    InvalidNodeId {
        /// The configured value
        node_id: u8,
    },
    /// Too many PDOs were requested
    #[snafu(display("At most {MAX_PDOS} PDOs of each direction are supported, got {count}"))]
    TooManyPdos {
        /// The configured count
        count: u8,
    },
}

fn default_num_pdo() -> u8 {
    4
}

/// Configuration options for PDOs
#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct PdoConfig {
    /// The number of RX PDO slots available in the device. Defaults to 4.
    #[serde(default = "default_num_pdo")]
    pub num_rpdo: u8,
    /// The number of TX PDO slots available in the device. Defaults to 4.
    #[serde(default = "default_num_pdo")]
    pub num_tpdo: u8,
}

impl Default for PdoConfig {
    fn default() -> Self {
        Self {
            num_rpdo: default_num_pdo(),
            num_tpdo: default_num_pdo(),
        }
    }
}

/// EMCY producer options
#[derive(Deserialize, Debug, Default, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct EmcyConfig {
    /// Minimum time between EMCY messages, in units of 100us
    #[serde(default)]
    pub inhibit_100us: u16,
}

/// An application object definition
#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct ObjectDefinition {
    /// Object index
    pub index: u16,
    /// Sub index, defaults to 0
    #[serde(default)]
    pub sub_index: u8,
    /// Type of the stored value
    pub data_type: DataTypeDeser,
    /// SDO access rights
    pub access_type: AccessTypeDeser,
    /// Whether the object may be mapped to a PDO
    #[serde(default)]
    pub pdo_mapping: bool,
}

impl ObjectDefinition {
    /// Get the dictionary entry
    pub fn entry(&self) -> Entry {
        Entry {
            address: (self.index, self.sub_index).into(),
            data_type: self.data_type.0,
            access_type: self.access_type.0,
            pdo_mapping: self.pdo_mapping,
        }
    }
}

/// Device configuration structure
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    /// Node ID of the device
    pub node_id: u8,
    /// Value of the device type object (0x1000)
    #[serde(default)]
    pub device_type: u32,
    /// The identity object values
    #[serde(default)]
    pub identity: Identity,
    /// Heartbeat producer period in milliseconds. 0 disables the heartbeat.
    #[serde(default)]
    pub heartbeat_period: u16,
    /// A node whose heartbeat this device monitors
    #[serde(default)]
    pub heartbeat_consumer: HeartbeatConsumer,
    /// SYNC consumer settings
    #[serde(default)]
    pub sync: SyncSettings,
    /// EMCY producer settings
    #[serde(default)]
    pub emcy: EmcyConfig,
    /// PDO slot counts
    #[serde(default)]
    pub pdos: PdoConfig,
    /// Application objects
    #[serde(default)]
    pub objects: Vec<ObjectDefinition>,
}

impl DeviceConfig {
    /// Try to read a device config from a file
    pub fn load(config_path: impl AsRef<std::path::Path>) -> Result<Self, LoadError> {
        let config_str = std::fs::read_to_string(&config_path).context(IoSnafu)?;
        Self::load_from_str(&config_str)
    }

    /// Try to read a config from a &str
    pub fn load_from_str(config_str: &str) -> Result<Self, LoadError> {
        let config: DeviceConfig = toml::from_str(config_str).context(TomlParsingSnafu)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), LoadError> {
        if self.node_id == 0 || self.node_id > 127 {
            return InvalidNodeIdSnafu {
                node_id: self.node_id,
            }
            .fail();
        }
        for count in [self.pdos.num_rpdo, self.pdos.num_tpdo] {
            if count as usize > MAX_PDOS {
                return TooManyPdosSnafu { count }.fail();
            }
        }

        let mut found = HashSet::new();
        for obj in &self.objects {
            if obj.index < 0x2000 {
                return ReservedIndexSnafu { index: obj.index }.fail();
            }
            if !found.insert((obj.index, obj.sub_index)) {
                return DuplicateSubObjectsSnafu {
                    index: obj.index,
                    sub: obj.sub_index,
                }
                .fail();
            }
        }
        Ok(())
    }

    /// Get the application object dictionary
    ///
    /// The standard communication objects are not included; the node adds those itself.
    pub fn object_dictionary(&self) -> ObjectDictionary {
        self.objects.iter().map(|obj| obj.entry()).collect()
    }

    /// Get the settings to construct a device with
    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            node_id: self.node_id,
            device_type: self.device_type,
            identity: self.identity,
            heartbeat_producer_ms: self.heartbeat_period,
            heartbeat_consumer: self.heartbeat_consumer,
            sync: self.sync,
            emcy_inhibit_100us: self.emcy.inhibit_100us,
            num_rpdo: self.pdos.num_rpdo,
            num_tpdo: self.pdos.num_tpdo,
        }
    }
}

/// A newtype on AccessType to implement deserialization
#[derive(Clone, Copy, Debug, Default)]
pub struct AccessTypeDeser(pub AccessType);

impl<'de> serde::Deserialize<'de> for AccessTypeDeser {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        AccessType::from_name(&s).map(AccessTypeDeser).ok_or_else(|| {
            D::Error::custom(format!(
                "Invalid access type: {s} (allowed: 'ro', 'wo', 'rw', 'rwr', 'rww' or 'const')"
            ))
        })
    }
}

/// A newtype on DataType to implement deserialization
#[derive(Clone, Copy, Debug, Default)]
pub struct DataTypeDeser(pub DataType);

impl<'de> serde::Deserialize<'de> for DataTypeDeser {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DataType::from_name(&s)
            .map(DataTypeDeser)
            .ok_or_else(|| D::Error::custom(format!("Invalid data type: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use crate::device_config::{DeviceConfig, LoadError};
    use crate::objects::{AccessType, Address, DataType};
    use assertables::assert_contains;

    #[test]
    fn test_full_config() {
        const TOML: &str = r#"
            node_id = 5
            device_type = 0x00020192
            heartbeat_period = 250

            [identity]
            vendor_id = 0xCAFE
            product_code = 1032
            revision_number = 1

            [heartbeat_consumer]
            node = 1
            time_ms = 500

            [sync]
            period_us = 10000
            window_us = 5000
            counter_overflow = 16

            [[objects]]
            index = 0x2000
            data_type = "u16"
            access_type = "ro"
            pdo_mapping = true

            [[objects]]
            index = 0x2001
            sub_index = 2
            data_type = "INTEGER32"
            access_type = "rww"
        "#;

        let config = DeviceConfig::load_from_str(TOML).unwrap();
        let settings = config.device_settings();
        assert_eq!(settings.node_id, 5);
        assert_eq!(settings.identity.vendor_id, 0xCAFE);
        assert_eq!(settings.identity.serial_number, 0);
        assert_eq!(settings.heartbeat_producer_ms, 250);
        assert_eq!(settings.heartbeat_consumer.time_ms, 500);
        assert_eq!(settings.sync.cob_id, 0x80);
        assert_eq!(settings.sync.counter_overflow, 16);
        assert_eq!(settings.num_rpdo, 4);

        let od = config.object_dictionary();
        assert_eq!(od.len(), 2);
        let entry = od.lookup(Address::new(0x2001, 2)).unwrap();
        assert_eq!(entry.data_type, DataType::Int32);
        assert_eq!(entry.access_type, AccessType::ReadWriteWritePdo);
        assert!(od.lookup(Address::new(0x2000, 0)).unwrap().is_tpdo_mappable());
    }

    #[test]
    fn test_duplicate_sub_object_errors() {
        const TOML: &str = r#"
            node_id = 1

            [[objects]]
            index = 0x2000
            sub_index = 1
            data_type = "i16"
            access_type = "rw"

            [[objects]]
            index = 0x2000
            sub_index = 1
            data_type = "u8"
            access_type = "ro"
        "#;

        let result = DeviceConfig::load_from_str(TOML);

        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            LoadError::DuplicateSubObjects {
                index: 0x2000,
                sub: 1
            }
        ));
        assert_contains!(
            err.to_string().as_str(),
            "Multiple definitions of sub index 1 on object 0x2000"
        );
    }

    #[test]
    fn test_reserved_index_errors() {
        const TOML: &str = r#"
            node_id = 1

            [[objects]]
            index = 0x1017
            data_type = "u16"
            access_type = "rw"
        "#;
        let err = DeviceConfig::load_from_str(TOML).unwrap_err();
        assert!(matches!(err, LoadError::ReservedIndex { index: 0x1017 }));
    }

    #[test]
    fn test_bad_data_type_errors() {
        const TOML: &str = r#"
            node_id = 1

            [[objects]]
            index = 0x2000
            data_type = "visiblestring(10)"
            access_type = "rw"
        "#;
        let err = DeviceConfig::load_from_str(TOML).unwrap_err();
        assert_contains!(err.to_string().as_str(), "Invalid data type");
    }

    #[test]
    fn test_node_id_range() {
        let err = DeviceConfig::load_from_str("node_id = 128").unwrap_err();
        assert!(matches!(err, LoadError::InvalidNodeId { node_id: 128 }));
    }
}
