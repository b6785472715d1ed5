//! Point-read merge of an overlay row with its original row
//!
//! The logical value of a column (r, f, q) is decided in this order:
//!
//! ```text
//! tombstoned in the overlay      -> absent, whatever the original holds
//! real overlay cell              -> overlay value
//! otherwise                      -> original value (or absent)
//! ```
//!
//! Cells of the reserved families never leave this module.
//!
//! # Design Notes
//!
//! - The overlay read always includes the metadata family when the caller
//!   restricts families, otherwise tombstones of the requested columns would be
//!   filtered out by the store and the original would show through.
//! - For explicit-column reads the original is consulted only for the columns
//!   the overlay neither has nor tombstones. When every requested column is
//!   settled by the overlay, the original is not read at all.

use std::collections::BTreeSet;

use tracing::warn;

use overlay_core::layout::{decode_tombstone, is_reserved_family, META_FAMILY};
use overlay_core::{to_string_binary, Get, Result, RowResult, Store};

type Column = (Vec<u8>, Vec<u8>);

/// Decode the tombstone markers carried by an overlay row
///
/// Markers with an empty value are ignored. Malformed qualifiers are skipped
/// with a warning.
pub fn tombstones(row: &RowResult) -> BTreeSet<Column> {
    row.family_cells(META_FAMILY)
        .filter(|cell| !cell.value.is_empty())
        .filter_map(|cell| match decode_tombstone(&cell.qualifier) {
            Some((family, qualifier)) => Some((family.to_vec(), qualifier.to_vec())),
            None => {
                warn!(
                    target: "overlay::merge",
                    row = %to_string_binary(row.row()),
                    qualifier = %to_string_binary(&cell.qualifier),
                    "Skipping malformed tombstone marker"
                );
                None
            }
        })
        .collect()
}

/// Real (non-reserved) columns physically present in an overlay row
pub fn real_columns(row: &RowResult) -> BTreeSet<Column> {
    row.cells()
        .iter()
        .filter(|cell| !is_reserved_family(&cell.family))
        .map(|cell| (cell.family.clone(), cell.qualifier.clone()))
        .collect()
}

/// Merge one overlay row with the matching original row
///
/// Either side may be absent. The result is keyed by `row` and holds no
/// reserved family.
pub fn merge_rows(
    row: Vec<u8>,
    overlay: Option<RowResult>,
    original: Option<RowResult>,
) -> RowResult {
    let (tombstoned, overlay_cells) = match overlay {
        Some(overlay) => (tombstones(&overlay), overlay.into_cells()),
        None => (BTreeSet::new(), Vec::new()),
    };

    let mut shadowed: BTreeSet<Column> = BTreeSet::new();
    let mut cells = Vec::with_capacity(overlay_cells.len());
    for cell in overlay_cells {
        if is_reserved_family(&cell.family) {
            continue;
        }
        let column = (cell.family.clone(), cell.qualifier.clone());
        if !tombstoned.contains(&column) {
            cells.push(cell);
        }
        shadowed.insert(column);
    }

    if let Some(original) = original {
        for cell in original.into_cells() {
            if is_reserved_family(&cell.family) {
                continue;
            }
            let column = (cell.family.clone(), cell.qualifier.clone());
            if !shadowed.contains(&column) && !tombstoned.contains(&column) {
                cells.push(cell);
            }
        }
    }

    RowResult::from_cells(row, cells)
}

/// Request sent to the overlay for a user read
pub(crate) fn overlay_get(get: &Get) -> Get {
    let mut request = get.clone();
    if !request.filter.is_all() {
        request.filter.add_family(META_FAMILY);
    }
    request
}

/// Request sent to the original once the overlay row is known, or `None`
/// when the overlay settles every requested column
pub(crate) fn original_get(get: &Get, overlay_row: &RowResult) -> Option<Get> {
    if !get.filter.is_explicit_columns() {
        return Some(get.clone());
    }
    let present = real_columns(overlay_row);
    let tombstoned = tombstones(overlay_row);
    let mut request = Get::new(get.row.clone());
    let mut missing = 0usize;
    for (family, qualifier) in get.filter.columns() {
        let column = (family.to_vec(), qualifier.to_vec());
        if present.contains(&column) || tombstoned.contains(&column) {
            continue;
        }
        request = request.add_column(column.0, column.1);
        missing += 1;
    }
    (missing > 0).then_some(request)
}

/// Merged point read
///
/// # Errors
///
/// Returns the first failing store read's error.
pub fn merged_get(overlay: &dyn Store, original: &dyn Store, get: &Get) -> Result<RowResult> {
    let overlay_row = overlay.get(&overlay_get(get))?;
    let original_row = match original_get(get, &overlay_row) {
        Some(request) => Some(original.get(&request)?),
        None => None,
    };
    Ok(merge_rows(get.row.clone(), Some(overlay_row), original_row))
}

/// Merged batch read; results correspond to `gets` by position
///
/// The overlay is read with one batch call and the original with at most one.
///
/// # Errors
///
/// Returns the first failing store read's error.
pub fn merged_get_batch(
    overlay: &dyn Store,
    original: &dyn Store,
    gets: &[Get],
) -> Result<Vec<RowResult>> {
    let overlay_gets: Vec<Get> = gets.iter().map(overlay_get).collect();
    let overlay_rows = overlay.get_batch(&overlay_gets)?;

    let mut positions = Vec::new();
    let mut original_gets = Vec::new();
    for (i, (get, overlay_row)) in gets.iter().zip(&overlay_rows).enumerate() {
        if let Some(request) = original_get(get, overlay_row) {
            positions.push(i);
            original_gets.push(request);
        }
    }

    let mut original_rows: Vec<Option<RowResult>> = vec![None; gets.len()];
    if !original_gets.is_empty() {
        for (i, row) in positions
            .into_iter()
            .zip(original.get_batch(&original_gets)?)
        {
            original_rows[i] = Some(row);
        }
    }

    Ok(gets
        .iter()
        .zip(overlay_rows)
        .zip(original_rows)
        .map(|((get, overlay_row), original_row)| {
            merge_rows(get.row.clone(), Some(overlay_row), original_row)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_core::layout::{tombstone_qualifier, DIRTY_FAMILY, LOCK_QUALIFIER, TOMBSTONE_VALUE};
    use overlay_core::{Cell, Put};
    use overlay_storage::MemoryStore;

    fn cell(f: &str, q: &str, v: &str) -> Cell {
        Cell::new("r", f, q, v)
    }

    fn tombstone(f: &str, q: &str) -> Cell {
        Cell::new(
            "r",
            META_FAMILY,
            tombstone_qualifier(f.as_bytes(), q.as_bytes()),
            TOMBSTONE_VALUE,
        )
    }

    fn row(cells: Vec<Cell>) -> RowResult {
        RowResult::from_cells("r", cells)
    }

    // ========================================================================
    // merge_rows
    // ========================================================================

    #[test]
    fn overlay_value_wins() {
        let merged = merge_rows(
            b"r".to_vec(),
            Some(row(vec![cell("cf", "a", "overlay")])),
            Some(row(vec![cell("cf", "a", "original"), cell("cf", "b", "o2")])),
        );
        assert_eq!(merged.value(b"cf", b"a"), Some(&b"overlay"[..]));
        assert_eq!(merged.value(b"cf", b"b"), Some(&b"o2"[..]));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn tombstone_hides_original() {
        let merged = merge_rows(
            b"r".to_vec(),
            Some(row(vec![tombstone("cf", "a")])),
            Some(row(vec![cell("cf", "a", "original")])),
        );
        assert!(merged.is_empty());
    }

    #[test]
    fn tombstone_hides_overlay_cell_too() {
        let merged = merge_rows(
            b"r".to_vec(),
            Some(row(vec![cell("cf", "a", "x"), tombstone("cf", "a")])),
            None,
        );
        assert!(merged.is_empty());
    }

    #[test]
    fn reserved_families_stripped() {
        let merged = merge_rows(
            b"r".to_vec(),
            Some(row(vec![
                cell("cf", "a", "x"),
                Cell::new("r", DIRTY_FAMILY, LOCK_QUALIFIER, "tid"),
                tombstone("cf", "zz"),
            ])),
            None,
        );
        assert_eq!(merged.len(), 1);
        assert!(merged.family_cells(META_FAMILY).next().is_none());
        assert!(merged.family_cells(DIRTY_FAMILY).next().is_none());
    }

    #[test]
    fn malformed_tombstone_is_skipped() {
        let bad = Cell::new("r", META_FAMILY, "noseparator", TOMBSTONE_VALUE);
        let empty_family = Cell::new("r", META_FAMILY, ":q", TOMBSTONE_VALUE);
        let merged = merge_rows(
            b"r".to_vec(),
            Some(row(vec![bad, empty_family])),
            Some(row(vec![cell("cf", "q", "v")])),
        );
        assert_eq!(merged.value(b"cf", b"q"), Some(&b"v"[..]));
    }

    #[test]
    fn empty_marker_value_is_not_a_tombstone() {
        let marker = Cell::new("r", META_FAMILY, tombstone_qualifier(b"cf", b"q"), Vec::<u8>::new());
        let merged = merge_rows(
            b"r".to_vec(),
            Some(row(vec![marker])),
            Some(row(vec![cell("cf", "q", "v")])),
        );
        assert_eq!(merged.len(), 1);
    }

    // ========================================================================
    // merged_get against stores
    // ========================================================================

    fn stores() -> (MemoryStore, MemoryStore) {
        (MemoryStore::new("overlay"), MemoryStore::new("original"))
    }

    #[test]
    fn column_absent_from_both_is_absent() {
        let (overlay, original) = stores();
        let merged = merged_get(&overlay, &original, &Get::new("r").add_column("cf", "q")).unwrap();
        assert!(merged.is_empty());
    }

    #[test]
    fn family_filter_still_sees_tombstones() {
        let (overlay, original) = stores();
        original.put(&Put::new("r").add("cf", "a", "1").add("cf", "b", "2")).unwrap();
        overlay
            .put(&Put::new("r").add(META_FAMILY, tombstone_qualifier(b"cf", b"a"), TOMBSTONE_VALUE))
            .unwrap();

        let merged = merged_get(&overlay, &original, &Get::new("r").add_family("cf")).unwrap();
        assert!(!merged.contains_column(b"cf", b"a"));
        assert_eq!(merged.value(b"cf", b"b"), Some(&b"2"[..]));
    }

    #[test]
    fn explicit_columns_settled_by_overlay_skip_original() {
        let (overlay, _original) = stores();
        overlay.put(&Put::new("r").add("cf", "a", "x")).unwrap();
        let get = Get::new("r").add_column("cf", "a");
        let overlay_row = overlay.get(&overlay_get(&get)).unwrap();
        assert!(original_get(&get, &overlay_row).is_none());
    }

    #[test]
    fn explicit_columns_read_only_missing_from_original() {
        let (overlay, original) = stores();
        overlay.put(&Put::new("r").add("cf", "a", "x")).unwrap();
        original.put(&Put::new("r").add("cf", "a", "y").add("cf", "b", "z")).unwrap();

        let get = Get::new("r").add_column("cf", "a").add_column("cf", "b");
        let overlay_row = overlay.get(&overlay_get(&get)).unwrap();
        let request = original_get(&get, &overlay_row).unwrap();
        assert_eq!(request.filter.columns().count(), 1);

        let merged = merged_get(&overlay, &original, &get).unwrap();
        assert_eq!(merged.value(b"cf", b"a"), Some(&b"x"[..]));
        assert_eq!(merged.value(b"cf", b"b"), Some(&b"z"[..]));
    }

    #[test]
    fn batch_preserves_positions() {
        let (overlay, original) = stores();
        overlay.put(&Put::new("a").add("cf", "q", "overlay")).unwrap();
        original.put(&Put::new("c").add("cf", "q", "original")).unwrap();

        let gets = vec![Get::new("c"), Get::new("b"), Get::new("a").add_column("cf", "q")];
        let results = merged_get_batch(&overlay, &original, &gets).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].value(b"cf", b"q"), Some(&b"original"[..]));
        assert!(results[1].is_empty());
        assert_eq!(results[1].row(), b"b");
        assert_eq!(results[2].value(b"cf", b"q"), Some(&b"overlay"[..]));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn qualifiers() -> impl Strategy<Value = BTreeSet<u8>> {
            proptest::collection::btree_set(0u8..6, 0..6)
        }

        proptest! {
            #[test]
            fn merged_value_follows_precedence(
                overlay_cols in qualifiers(),
                dead_cols in qualifiers(),
                original_cols in qualifiers(),
            ) {
                let q = |i: &u8| format!("q{}", i);
                let mut overlay_cells: Vec<Cell> =
                    overlay_cols.iter().map(|i| cell("cf", &q(i), "overlay")).collect();
                overlay_cells.extend(dead_cols.iter().map(|i| tombstone("cf", &q(i))));
                let original_cells: Vec<Cell> =
                    original_cols.iter().map(|i| cell("cf", &q(i), "original")).collect();

                let merged = merge_rows(
                    b"r".to_vec(),
                    Some(row(overlay_cells)),
                    Some(row(original_cells)),
                );

                for i in 0u8..6 {
                    let expected: Option<&[u8]> = if dead_cols.contains(&i) {
                        None
                    } else if overlay_cols.contains(&i) {
                        Some(b"overlay")
                    } else if original_cols.contains(&i) {
                        Some(b"original")
                    } else {
                        None
                    };
                    prop_assert_eq!(merged.value(b"cf", q(&i).as_bytes()), expected);
                }
                prop_assert!(merged.cells().iter().all(|c| !is_reserved_family(&c.family)));
            }
        }
    }
}
