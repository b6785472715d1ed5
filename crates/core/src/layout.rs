//! Reserved families and qualifier encodings inside an overlay table
//!
//! An overlay table carries two families of its own next to the user families:
//!
//! - [`META_FAMILY`] holds tombstone markers. Qualifier `family:qualifier`,
//!   value [`TOMBSTONE_VALUE`]. A marker means the column reads as absent even
//!   when the original has it.
//! - [`DIRTY_FAMILY`] holds the row lock under [`LOCK_QUALIFIER`] and transient
//!   staging copies under `transaction_id ++ family ++ qualifier`.
//!
//! Neither family is ever visible through merged reads.

/// Family holding tombstone markers
pub const META_FAMILY: &[u8] = b"_sandmeta";

/// Family holding the row lock and staging cells
pub const DIRTY_FAMILY: &[u8] = b"_sanddirty";

/// Qualifier of the row lock cell inside [`DIRTY_FAMILY`]
pub const LOCK_QUALIFIER: &[u8] = b"_TID";

/// Value written for a tombstone marker
pub const TOMBSTONE_VALUE: &[u8] = &[1];

/// Separator between family and qualifier in a tombstone qualifier
pub const TOMBSTONE_SEPARATOR: u8 = b':';

/// True for the two families the overlay reserves for itself
#[inline]
pub fn is_reserved_family(family: &[u8]) -> bool {
    family == META_FAMILY || family == DIRTY_FAMILY
}

/// Tombstone qualifier for (family, qualifier)
pub fn tombstone_qualifier(family: &[u8], qualifier: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(family.len() + 1 + qualifier.len());
    out.extend_from_slice(family);
    out.push(TOMBSTONE_SEPARATOR);
    out.extend_from_slice(qualifier);
    out
}

/// Decode a tombstone qualifier back into (family, qualifier)
///
/// Splits at the first separator, since family names cannot contain one.
/// Returns `None` when the separator is missing or the family is empty.
pub fn decode_tombstone(qualifier: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = qualifier.iter().position(|&b| b == TOMBSTONE_SEPARATOR)?;
    if pos == 0 {
        return None;
    }
    Some((&qualifier[..pos], &qualifier[pos + 1..]))
}

/// Staging qualifier for one column under one transaction
pub fn staging_qualifier(transaction_id: &[u8], family: &[u8], qualifier: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(transaction_id.len() + family.len() + qualifier.len());
    out.extend_from_slice(transaction_id);
    out.extend_from_slice(family);
    out.extend_from_slice(qualifier);
    out
}
