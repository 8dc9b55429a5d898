//! Object dictionary model
//!
//! The object dictionary is a fixed table of [`Entry`] values, each describing the type and access
//! rights of one sub-object. It holds no data; values live behind the handlers registered by the
//! node.
use alloc::vec::Vec;
use int_enum::IntEnum;

/// The address of a sub-object
///
/// Addresses are ordered by index first, then by sub index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Address {
    /// Object index
    pub index: u16,
    /// Sub index
    pub sub: u8,
}

impl Address {
    /// Create an address
    pub const fn new(index: u16, sub: u8) -> Self {
        Self { index, sub }
    }
}

impl From<(u16, u8)> for Address {
    fn from(value: (u16, u8)) -> Self {
        Self::new(value.0, value.1)
    }
}

impl core::fmt::Display for Address {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:04X}sub{}", self.index, self.sub)
    }
}

/// The scalar data types which can be stored in the dictionary
///
/// The discriminant of each variant is its ordinal, which is shared with the variant index of
/// [`Value`](crate::Value).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, IntEnum)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum DataType {
    #[default]
    Empty = 0,
    UInt8 = 1,
    UInt16 = 2,
    UInt32 = 3,
    UInt64 = 4,
    Int8 = 5,
    Int16 = 6,
    Int32 = 7,
    Int64 = 8,
    Real32 = 9,
}

impl DataType {
    /// Get the encoded width of the type in bytes
    pub const fn size(&self) -> usize {
        match self {
            DataType::Empty => 0,
            DataType::UInt8 | DataType::Int8 => 1,
            DataType::UInt16 | DataType::Int16 => 2,
            DataType::UInt32 | DataType::Int32 | DataType::Real32 => 4,
            DataType::UInt64 | DataType::Int64 => 8,
        }
    }

    /// Get the encoded width of the type in bits
    pub const fn bit_length(&self) -> usize {
        self.size() * 8
    }

    /// Returns true if values of this type fit in a single expedited SDO frame
    pub const fn supports_expedited(&self) -> bool {
        self.size() <= 4
    }

    /// Parse a type name as used in device config files
    ///
    /// Accepts the short Rust style names (`u8`, `i32`, `f32`) as well as the CANopen names
    /// (`UNSIGNED8`, `INTEGER32`, `REAL32`), case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        const NAMES: [(&str, &str, DataType); 10] = [
            ("empty", "empty", DataType::Empty),
            ("u8", "unsigned8", DataType::UInt8),
            ("u16", "unsigned16", DataType::UInt16),
            ("u32", "unsigned32", DataType::UInt32),
            ("u64", "unsigned64", DataType::UInt64),
            ("i8", "integer8", DataType::Int8),
            ("i16", "integer16", DataType::Int16),
            ("i32", "integer32", DataType::Int32),
            ("i64", "integer64", DataType::Int64),
            ("f32", "real32", DataType::Real32),
        ];
        NAMES
            .iter()
            .find(|(short, long, _)| {
                name.eq_ignore_ascii_case(short) || name.eq_ignore_ascii_case(long)
            })
            .map(|(_, _, data_type)| *data_type)
    }
}

/// Access type of a sub-object
///
/// The two PDO variants are read-write for SDO access, and additionally restrict which PDO
/// direction may map the object.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessType {
    /// Read-only. May be mapped to a TPDO.
    #[default]
    ReadOnly,
    /// Write-only. May be mapped to an RPDO.
    WriteOnly,
    /// Read-write. Not mappable.
    ReadWrite,
    /// Read-write, and may be mapped to a TPDO
    ReadWriteReadPdo,
    /// Read-write, and may be mapped to an RPDO
    ReadWriteWritePdo,
}

impl AccessType {
    /// Returns true if an object with this access type can be read
    pub fn is_readable(&self) -> bool {
        !matches!(self, AccessType::WriteOnly)
    }

    /// Returns true if an object with this access type can be written
    pub fn is_writable(&self) -> bool {
        !matches!(self, AccessType::ReadOnly)
    }

    /// Returns true if an object with this access type may be mapped to a TPDO
    pub fn allows_tpdo(&self) -> bool {
        matches!(self, AccessType::ReadOnly | AccessType::ReadWriteReadPdo)
    }

    /// Returns true if an object with this access type may be mapped to an RPDO
    pub fn allows_rpdo(&self) -> bool {
        matches!(self, AccessType::WriteOnly | AccessType::ReadWriteWritePdo)
    }

    /// Parse an access type name as used in device config files
    pub fn from_name(name: &str) -> Option<Self> {
        const NAMES: [(&str, AccessType); 6] = [
            ("ro", AccessType::ReadOnly),
            ("const", AccessType::ReadOnly),
            ("wo", AccessType::WriteOnly),
            ("rw", AccessType::ReadWrite),
            ("rwr", AccessType::ReadWriteReadPdo),
            ("rww", AccessType::ReadWriteWritePdo),
        ];
        NAMES
            .iter()
            .find(|(n, _)| name.eq_ignore_ascii_case(n))
            .map(|(_, access)| *access)
    }
}

/// Metadata for one sub-object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Entry {
    /// Where the sub-object lives
    pub address: Address,
    /// The type of value it holds
    pub data_type: DataType,
    /// Allowed SDO accesses
    pub access_type: AccessType,
    /// Whether the sub-object may be mapped into a PDO at all
    pub pdo_mapping: bool,
}

impl Entry {
    /// Create a non-mappable entry
    pub const fn new(index: u16, sub: u8, data_type: DataType, access_type: AccessType) -> Self {
        Self {
            address: Address::new(index, sub),
            data_type,
            access_type,
            pdo_mapping: false,
        }
    }

    /// Convenience function to create a read-only entry
    pub const fn ro(index: u16, sub: u8, data_type: DataType) -> Self {
        Self::new(index, sub, data_type, AccessType::ReadOnly)
    }

    /// Convenience function to create a read-write entry
    pub const fn rw(index: u16, sub: u8, data_type: DataType) -> Self {
        Self::new(index, sub, data_type, AccessType::ReadWrite)
    }

    /// Convenience function to mark the entry as PDO mappable
    pub const fn mappable(mut self) -> Self {
        self.pdo_mapping = true;
        self
    }

    /// Returns true if the entry can be read over SDO
    pub fn is_readable(&self) -> bool {
        self.access_type.is_readable()
    }

    /// Returns true if the entry can be written over SDO
    pub fn is_writable(&self) -> bool {
        self.access_type.is_writable()
    }

    /// Returns true if the entry may be mapped into a TPDO
    pub fn is_tpdo_mappable(&self) -> bool {
        self.pdo_mapping && self.access_type.allows_tpdo()
    }

    /// Returns true if the entry may be mapped into an RPDO
    pub fn is_rpdo_mappable(&self) -> bool {
        self.pdo_mapping && self.access_type.allows_rpdo()
    }
}

/// A set of [`Entry`] values sorted by address
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectDictionary {
    entries: Vec<Entry>,
}

impl ObjectDictionary {
    /// Build a dictionary from a list of entries
    ///
    /// When the list contains the same address more than once, the last entry wins.
    pub fn new(entries: &[Entry]) -> Self {
        let mut od = Self::default();
        od.extend(entries.iter().copied());
        od
    }

    /// Find the entry at `address`
    pub fn lookup(&self, address: Address) -> Option<&Entry> {
        self.entries
            .binary_search_by_key(&address, |e| e.address)
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Returns true if any sub-object of `index` exists
    pub fn contains_index(&self, index: u16) -> bool {
        let pos = self.entries.partition_point(|e| e.address.index < index);
        self.entries
            .get(pos)
            .is_some_and(|e| e.address.index == index)
    }

    /// Add an entry, returning the entry it replaced if the address was already present
    pub fn insert(&mut self, entry: Entry) -> Option<Entry> {
        match self
            .entries
            .binary_search_by_key(&entry.address, |e| e.address)
        {
            Ok(i) => Some(core::mem::replace(&mut self.entries[i], entry)),
            Err(i) => {
                self.entries.insert(i, entry);
                None
            }
        }
    }

    /// Get the dictionary as seen from the other end of the bus
    ///
    /// Read and write directions are swapped, so that a master mirroring a remote node may write
    /// the values the node produces and read the values the node consumes. Plain read-write
    /// entries are unchanged.
    pub fn inverted(&self) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|e| {
                let access_type = match e.access_type {
                    AccessType::ReadOnly => AccessType::WriteOnly,
                    AccessType::WriteOnly => AccessType::ReadOnly,
                    AccessType::ReadWriteReadPdo => AccessType::ReadWriteWritePdo,
                    AccessType::ReadWriteWritePdo => AccessType::ReadWriteReadPdo,
                    AccessType::ReadWrite => AccessType::ReadWrite,
                };
                Entry { access_type, ..*e }
            })
            .collect();
        Self { entries }
    }

    /// Iterate over entries in address order
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the dictionary has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Extend<Entry> for ObjectDictionary {
    fn extend<T: IntoIterator<Item = Entry>>(&mut self, iter: T) {
        for entry in iter {
            self.insert(entry);
        }
    }
}

impl FromIterator<Entry> for ObjectDictionary {
    fn from_iter<T: IntoIterator<Item = Entry>>(iter: T) -> Self {
        let mut od = Self::default();
        od.extend(iter);
        od
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_order() {
        assert!(Address::new(0x1000, 5) < Address::new(0x1001, 0));
        assert!(Address::new(0x1000, 1) < Address::new(0x1000, 2));
    }

    #[test]
    fn test_data_type_ordinals_and_sizes() {
        let sizes = [0, 1, 2, 4, 8, 1, 2, 4, 8, 4];
        for (ordinal, size) in sizes.iter().enumerate() {
            let dt = DataType::try_from(ordinal as u8).unwrap();
            assert_eq!(u8::from(dt) as usize, ordinal);
            assert_eq!(dt.size(), *size);
        }
        assert!(DataType::try_from(10).is_err());
    }

    #[test]
    fn test_mappability() {
        let tx = Entry::ro(0x2000, 0, DataType::UInt8).mappable();
        let rx = Entry::new(0x2001, 0, DataType::UInt8, AccessType::ReadWriteWritePdo).mappable();
        let plain = Entry::rw(0x2002, 0, DataType::UInt8).mappable();
        let unflagged = Entry::ro(0x2003, 0, DataType::UInt8);

        assert!(tx.is_tpdo_mappable() && !tx.is_rpdo_mappable());
        assert!(rx.is_rpdo_mappable() && !rx.is_tpdo_mappable());
        assert!(!plain.is_rpdo_mappable() && !plain.is_tpdo_mappable());
        assert!(!unflagged.is_tpdo_mappable());
        assert!(rx.is_readable() && rx.is_writable());
    }

    #[test]
    fn test_lookup() {
        let od = ObjectDictionary::new(&[
            Entry::rw(0x2002, 0, DataType::UInt32),
            Entry::ro(0x2001, 0, DataType::UInt16),
            Entry::ro(0x2001, 3, DataType::UInt8),
        ]);
        assert_eq!(od.len(), 3);
        assert_eq!(
            od.lookup(Address::new(0x2001, 3)).unwrap().data_type,
            DataType::UInt8
        );
        assert!(od.lookup(Address::new(0x2001, 1)).is_none());
        assert!(od.contains_index(0x2001));
        assert!(!od.contains_index(0x2000));
        assert!(!od.contains_index(0x2003));

        let addrs: Vec<Address> = od.iter().map(|e| e.address).collect();
        let mut sorted = addrs.clone();
        sorted.sort();
        assert_eq!(addrs, sorted);
    }

    #[test]
    fn test_inverted() {
        let od = ObjectDictionary::new(&[
            Entry::ro(0x2000, 0, DataType::UInt8).mappable(),
            Entry::new(0x2001, 0, DataType::UInt8, AccessType::ReadWriteWritePdo).mappable(),
            Entry::rw(0x2002, 0, DataType::UInt8),
        ]);
        let inv = od.inverted();
        let e = inv.lookup(Address::new(0x2000, 0)).unwrap();
        assert_eq!(e.access_type, AccessType::WriteOnly);
        assert!(e.is_rpdo_mappable());
        let e = inv.lookup(Address::new(0x2001, 0)).unwrap();
        assert!(e.is_tpdo_mappable());
        assert_eq!(
            inv.lookup(Address::new(0x2002, 0)).unwrap().access_type,
            AccessType::ReadWrite
        );
    }

    #[test]
    fn test_names() {
        assert_eq!(DataType::from_name("UNSIGNED16"), Some(DataType::UInt16));
        assert_eq!(DataType::from_name("f32"), Some(DataType::Real32));
        assert_eq!(DataType::from_name("VisibleString"), None);
        assert_eq!(AccessType::from_name("RWW"), Some(AccessType::ReadWriteWritePdo));
    }
}
