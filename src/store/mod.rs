//! Wide-column row storage.
//!
//! Everything this bridge persists is a handful of string cells written into a
//! single row at a time, so the storage seam is small: [`RowStore::mutate_row`]
//! for writes and [`RowStore::read_row`] for the registry lookups.
//!
//! - [`memory::MemoryStore`] keeps rows in process (tests, `--simulate`)
//! - [`bigtable::BigtableStore`] talks to the Cloud Bigtable Data API over HTTPS

pub mod bigtable;
pub mod memory;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::DashResult;
use crate::side::Side;

pub use bigtable::BigtableStore;
pub use memory::MemoryStore;

/// Column family every table in this instance uses
pub const COLUMN_FAMILY: &str = "cf";

/// Column holding the scanned tag on a race row
pub const CAR_ID_COLUMN: &str = "car_id";

/// Key of a race row: `track{side+1}#{max_value - created_at}`.
///
/// Subtracting the creation time from a large constant makes the newest race sort
/// first in a lexicographic scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey(String);

impl RowKey {
    /// Key for a race on `side` starting at `now`
    pub fn new(side: Side, now: f64, max_value: f64) -> Self {
        Self(format!("track{}#{}", side.track_number(), max_value - now))
    }

    /// The key text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One cell to set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Column family
    pub family: String,
    /// Column qualifier
    pub qualifier: String,
    /// Value
    pub value: String,
}

impl Cell {
    /// A cell in the default `cf` family
    pub fn new(qualifier: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            family: COLUMN_FAMILY.to_string(),
            qualifier: qualifier.into(),
            value: value.into(),
        }
    }
}

/// Latest cell values of one row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    /// Row key
    pub key: String,
    /// `(family, qualifier) -> value`
    pub cells: BTreeMap<(String, String), String>,
}

impl Row {
    /// Empty row with a key
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            cells: BTreeMap::new(),
        }
    }

    /// Value of a column in the `cf` family
    pub fn get(&self, qualifier: &str) -> Option<&str> {
        self.get_in(COLUMN_FAMILY, qualifier)
    }

    /// Value of a column in any family
    pub fn get_in(&self, family: &str, qualifier: &str) -> Option<&str> {
        self.cells
            .get(&(family.to_string(), qualifier.to_string()))
            .map(String::as_str)
    }

    /// Overwrite a cell
    pub fn set(&mut self, cell: &Cell) {
        self.cells.insert(
            (cell.family.clone(), cell.qualifier.clone()),
            cell.value.clone(),
        );
    }
}

/// Capability: Row Storage
///
/// # Contract
/// - `mutate_row` applies all cells to one row atomically, creating it if needed
/// - `read_row` returns `None` for a row that does not exist
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Set cells on a row
    async fn mutate_row(&self, table: &str, row_key: &str, cells: &[Cell]) -> DashResult<()>;

    /// Read the latest value of every cell in a row
    async fn read_row(&self, table: &str, row_key: &str) -> DashResult<Option<Row>>;
}

#[async_trait]
impl<T: RowStore + ?Sized> RowStore for Arc<T> {
    async fn mutate_row(&self, table: &str, row_key: &str, cells: &[Cell]) -> DashResult<()> {
        (**self).mutate_row(table, row_key, cells).await
    }

    async fn read_row(&self, table: &str, row_key: &str) -> DashResult<Option<Row>> {
        (**self).read_row(table, row_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rowkey_for_left_side_uses_track_one() {
        let key = RowKey::new(Side::LEFT, 1_700_000_000.0, 9_999_999_999.0);
        assert_eq!(key.as_str(), "track1#8299999999");
    }

    #[test]
    fn rowkey_for_right_side_uses_track_two() {
        let key = RowKey::new(Side::RIGHT, 1_000.0, 9_999_999_999.0);
        assert_eq!(key.to_string(), "track2#9999998999");
    }

    #[test]
    fn newer_rows_sort_first() {
        let older = RowKey::new(Side::LEFT, 1_700_000_000.0, 9_999_999_999.0);
        let newer = RowKey::new(Side::LEFT, 1_700_000_100.0, 9_999_999_999.0);
        assert!(newer.as_str() < older.as_str());
    }

    #[test]
    fn row_cells_default_to_cf() {
        let mut row = Row::new("track1#1");
        row.set(&Cell::new("car_id", "42"));
        assert_eq!(row.get("car_id"), Some("42"));
        assert_eq!(row.get_in("other", "car_id"), None);
    }
}
