//! Merged scan over an overlay cursor and an original cursor
//!
//! Both cursors yield rows in ascending row order. The merge is a two-way
//! merge-sort on the row key:
//!
//! ```text
//! overlay row < original row   -> overlay row alone (own tombstones applied)
//! original row < overlay row   -> original row as-is
//! equal keys                   -> merged with the point-read rule, both advance
//! ```
//!
//! Rows left with no visible cell (every column tombstoned, or only reserved
//! cells in the overlay) are skipped. After the first error the scanner is
//! fused and yields nothing further.

use std::cmp::Ordering;

use tracing::debug;

use overlay_core::layout::META_FAMILY;
use overlay_core::{to_string_binary, Result, RowCursor, RowResult, Scan, Store};

use crate::merge::merge_rows;

/// Which store a row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The overlay table
    Overlay,
    /// The original table
    Original,
}

/// One side of the merge with a one-row lookahead
struct Side<'a> {
    source: Source,
    cursor: RowCursor<'a>,
    head: Option<RowResult>,
    exhausted: bool,
}

impl<'a> Side<'a> {
    fn new(source: Source, cursor: RowCursor<'a>) -> Self {
        Self {
            source,
            cursor,
            head: None,
            exhausted: false,
        }
    }

    fn peek(&mut self) -> Result<Option<&RowResult>> {
        if self.head.is_none() && !self.exhausted {
            match self.cursor.next() {
                Some(row) => self.head = Some(row?),
                None => self.exhausted = true,
            }
        }
        Ok(self.head.as_ref())
    }

    fn take(&mut self) -> Option<RowResult> {
        self.head.take()
    }
}

/// Forward-only merged view of a key range
///
/// Created by [`MergedScanner::open`] or `OverlayTable::scan`.
pub struct MergedScanner<'a> {
    overlay: Side<'a>,
    original: Side<'a>,
    done: bool,
    emitted: u64,
}

impl<'a> MergedScanner<'a> {
    /// Open both cursors for `scan`
    ///
    /// The overlay cursor also reads the metadata family when the scan
    /// restricts families, so tombstones of the selected columns are seen.
    ///
    /// # Errors
    ///
    /// Returns the error of either store failing to open its cursor.
    pub fn open(overlay: &'a dyn Store, original: &'a dyn Store, scan: &Scan) -> Result<Self> {
        let mut overlay_scan = scan.clone();
        if !overlay_scan.filter.is_all() {
            overlay_scan.filter.add_family(META_FAMILY);
        }
        let overlay_cursor = overlay.scan(&overlay_scan)?;
        let original_cursor = original.scan(scan)?;
        Ok(Self::from_cursors(overlay_cursor, original_cursor))
    }

    /// Merge two already opened cursors
    pub fn from_cursors(overlay: RowCursor<'a>, original: RowCursor<'a>) -> Self {
        Self {
            overlay: Side::new(Source::Overlay, overlay),
            original: Side::new(Source::Original, original),
            done: false,
            emitted: 0,
        }
    }

    /// Rows yielded so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Next candidate row, possibly empty; `None` once both sides are drained
    fn step(&mut self) -> Result<Option<RowResult>> {
        let order = {
            let overlay_row = self.overlay.peek()?.map(|r| r.row().to_vec());
            let original_row = self.original.peek()?.map(RowResult::row);
            match (overlay_row, original_row) {
                (None, None) => return Ok(None),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(o), Some(p)) => o.as_slice().cmp(p),
            }
        };

        let merged = match order {
            Ordering::Less => self.take_alone(Source::Overlay),
            Ordering::Greater => self.take_alone(Source::Original),
            Ordering::Equal => {
                let overlay_row = self.overlay.take();
                let original_row = self.original.take();
                overlay_row.map(|o| {
                    let key = o.row().to_vec();
                    merge_rows(key, Some(o), original_row)
                })
            }
        };
        Ok(merged)
    }

    fn take_alone(&mut self, source: Source) -> Option<RowResult> {
        let side = match source {
            Source::Overlay => &mut self.overlay,
            Source::Original => &mut self.original,
        };
        side.take().map(|row| {
            let key = row.row().to_vec();
            match side.source {
                Source::Overlay => merge_rows(key, Some(row), None),
                Source::Original => merge_rows(key, None, Some(row)),
            }
        })
    }
}

impl Iterator for MergedScanner<'_> {
    type Item = Result<RowResult>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.step() {
                Ok(Some(row)) if row.is_empty() => {
                    debug!(
                        target: "overlay::merge",
                        row = %to_string_binary(row.row()),
                        "Skipping row with no visible cells"
                    );
                }
                Ok(Some(row)) => {
                    self.emitted += 1;
                    return Some(Ok(row));
                }
                Ok(None) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

impl std::iter::FusedIterator for MergedScanner<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_core::layout::{tombstone_qualifier, TOMBSTONE_VALUE};
    use overlay_core::{Cell, Error, Put};
    use overlay_storage::MemoryStore;

    fn cursor(rows: Vec<Result<RowResult>>) -> RowCursor<'static> {
        Box::new(rows.into_iter())
    }

    fn row(key: &str, f: &str, q: &str, v: &str) -> RowResult {
        RowResult::from_cells(key, vec![Cell::new(key, f, q, v)])
    }

    fn keys(scanner: MergedScanner<'_>) -> Vec<Vec<u8>> {
        scanner.map(|r| r.unwrap().row().to_vec()).collect()
    }

    #[test]
    fn interleaves_in_row_order() {
        let scanner = MergedScanner::from_cursors(
            cursor(vec![Ok(row("b", "cf", "q", "1")), Ok(row("d", "cf", "q", "1"))]),
            cursor(vec![Ok(row("a", "cf", "q", "2")), Ok(row("c", "cf", "q", "2"))]),
        );
        assert_eq!(
            keys(scanner),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
        );
    }

    #[test]
    fn equal_keys_merge_with_overlay_precedence() {
        let original = RowResult::from_cells(
            "a",
            vec![Cell::new("a", "cf", "q", "old"), Cell::new("a", "cf", "p", "keep")],
        );
        let mut scanner = MergedScanner::from_cursors(
            cursor(vec![Ok(row("a", "cf", "q", "new"))]),
            cursor(vec![Ok(original)]),
        );
        let merged = scanner.next().unwrap().unwrap();
        assert_eq!(merged.value(b"cf", b"q"), Some(&b"new"[..]));
        assert_eq!(merged.value(b"cf", b"p"), Some(&b"keep"[..]));
        assert!(scanner.next().is_none());
        assert_eq!(scanner.emitted(), 1);
    }

    #[test]
    fn error_fuses_scanner() {
        let mut scanner = MergedScanner::from_cursors(
            cursor(vec![Err(Error::store("region offline")), Ok(row("z", "cf", "q", "1"))]),
            cursor(vec![Ok(row("a", "cf", "q", "1"))]),
        );
        assert!(scanner.next().unwrap().is_err());
        assert!(scanner.next().is_none());
        assert!(scanner.next().is_none());
    }

    #[test]
    fn tombstone_only_overlay_row_is_skipped() {
        let marker = RowResult::from_cells(
            "b",
            vec![Cell::new(
                "b",
                META_FAMILY,
                tombstone_qualifier(b"cf", b"q"),
                TOMBSTONE_VALUE,
            )],
        );
        let scanner = MergedScanner::from_cursors(
            cursor(vec![Ok(marker)]),
            cursor(vec![Ok(row("b", "cf", "q", "z")), Ok(row("c", "cf", "q", "w"))]),
        );
        assert_eq!(keys(scanner), vec![b"c".to_vec()]);
    }

    #[test]
    fn family_filtered_scan_sees_tombstones() {
        let overlay = MemoryStore::new("overlay");
        let original = MemoryStore::new("original");
        original.put(&Put::new("r1").add("cf", "q", "v")).unwrap();
        original.put(&Put::new("r2").add("cf", "q", "v")).unwrap();
        overlay
            .put(&Put::new("r1").add(META_FAMILY, tombstone_qualifier(b"cf", b"q"), TOMBSTONE_VALUE))
            .unwrap();

        let scanner = MergedScanner::open(&overlay, &original, &Scan::new().add_family("cf")).unwrap();
        assert_eq!(keys(scanner), vec![b"r2".to_vec()]);
    }
}
