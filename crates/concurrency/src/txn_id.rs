//! Transaction identifiers
//!
//! A transaction id correlates one attempt's lock acquire with its release and
//! prefixes that attempt's staging qualifiers. It is a 16-byte truncated SHA-256
//! digest of what the operation targets:
//!
//! - check-and-act: the columns of its footprint
//! - mutations (increment, append): the full mutation description
//!
//! Ids are deterministic. Two identical operations contending for the same row
//! compute the same id, which is harmless: only the current lock holder ever
//! releases, and the lock serialises them.

use std::fmt;

use sha2::{Digest, Sha256};

use overlay_core::ColumnCoordinateSet;

/// Length of a transaction id in bytes
pub const TRANSACTION_ID_LEN: usize = 16;

/// Truncated SHA-256 digest identifying one operation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId([u8; TRANSACTION_ID_LEN]);

impl TransactionId {
    /// Id of a check-and-act operation targeting `footprint`
    ///
    /// Format: SHA256(for each coordinate: row_len || row || family_len || family || qualifier_len || qualifier)
    pub fn for_footprint(footprint: &ColumnCoordinateSet) -> Self {
        let mut hasher = Sha256::new();
        for coordinate in footprint {
            for part in [&coordinate.row, &coordinate.family, &coordinate.qualifier] {
                hasher.update((part.len() as u32).to_le_bytes());
                hasher.update(part);
            }
        }
        Self::from_digest(hasher.finalize().as_slice())
    }

    /// Id of a mutation, from its canonical description
    pub fn for_description(description: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(description.as_bytes());
        Self::from_digest(hasher.finalize().as_slice())
    }

    /// Wrap raw bytes
    pub fn from_bytes(bytes: [u8; TRANSACTION_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw bytes, as stored in the lock cell and staging qualifiers
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn from_digest(digest: &[u8]) -> Self {
        let mut bytes = [0u8; TRANSACTION_ID_LEN];
        bytes.copy_from_slice(&digest[..TRANSACTION_ID_LEN]);
        Self(bytes)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_footprint_id_is_deterministic_and_order_independent() {
        let mut a = ColumnCoordinateSet::new();
        a.add_column("r", "cf", "x");
        a.add_column("r", "cf", "y");
        let mut b = ColumnCoordinateSet::new();
        b.add_column("r", "cf", "y");
        b.add_column("r", "cf", "x");
        assert_eq!(TransactionId::for_footprint(&a), TransactionId::for_footprint(&b));
    }

    #[test]
    fn test_length_prefix_separates_parts() {
        let mut a = ColumnCoordinateSet::new();
        a.add_column("r", "cfx", "");
        let mut b = ColumnCoordinateSet::new();
        b.add_column("r", "cf", "x");
        assert_ne!(TransactionId::for_footprint(&a), TransactionId::for_footprint(&b));
    }

    #[test]
    fn test_description_ids_differ() {
        let a = TransactionId::for_description("increment row=r cf:n+=1");
        let b = TransactionId::for_description("increment row=r cf:n+=2");
        assert_ne!(a, b);
        assert_eq!(a.as_bytes().len(), TRANSACTION_ID_LEN);
        assert_eq!(a.to_string().len(), TRANSACTION_ID_LEN * 2);
    }
}
