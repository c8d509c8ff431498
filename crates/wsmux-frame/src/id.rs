//! Channel identifiers.
//!
//! A [`UniqueId`] is an opaque 128-bit value. Only equality and hashing are
//! meaningful; ids carry no ordering.

use std::fmt;

use uuid::Uuid;

/// Size of an encoded [`UniqueId`] on the wire.
pub const UNIQUE_ID_SIZE: usize = 16;

/// 128-bit identifier naming a logical channel.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniqueId([u8; UNIQUE_ID_SIZE]);

impl UniqueId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    /// Build an id from its raw big-endian bytes.
    pub const fn from_bytes(bytes: [u8; UNIQUE_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build an id deterministically from high and low 64-bit halves.
    pub const fn from_parts(high: u64, low: u64) -> Self {
        Self(((high as u128) << 64 | low as u128).to_be_bytes())
    }

    /// Raw bytes in wire order.
    pub const fn as_bytes(&self) -> &[u8; UNIQUE_ID_SIZE] {
        &self.0
    }

    /// High and low 64-bit halves.
    pub fn to_parts(&self) -> (u64, u64) {
        let value = u128::from_be_bytes(self.0);
        ((value >> 64) as u64, value as u64)
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UniqueId({self})")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        let ids: HashSet<UniqueId> = (0..1000).map(|_| UniqueId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn parts_roundtrip() {
        let id = UniqueId::from_parts(0x0102_0304_0506_0708, 0x090a_0b0c_0d0e_0f10);
        assert_eq!(id.to_parts(), (0x0102_0304_0506_0708, 0x090a_0b0c_0d0e_0f10));
        assert_eq!(
            id.as_bytes(),
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]
        );
    }

    #[test]
    fn equality_compares_all_bits() {
        let a = UniqueId::from_parts(7, 1);
        let b = UniqueId::from_parts(7, 2);
        assert_ne!(a, b);
        assert_eq!(a, UniqueId::from_bytes(*a.as_bytes()));
    }

    #[test]
    fn display_is_lowercase_hex() {
        let id = UniqueId::from_parts(0, 0xff);
        assert_eq!(id.to_string(), "000000000000000000000000000000ff");
    }
}
