//! In-process row store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::error::{DashError, DashResult};
use crate::store::{Cell, Row, RowStore};

#[derive(Debug, Default)]
struct Tables {
    rows: BTreeMap<String, BTreeMap<String, Row>>,
    mutations: Vec<(String, String, Vec<Cell>)>,
    fail_writes: bool,
}

/// Rows kept in memory, grouped by table.
///
/// Also records every mutation in order, which is what the tests assert on.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one row
    pub fn row(&self, table: &str, row_key: &str) -> Option<Row> {
        self.inner
            .lock()
            .rows
            .get(table)
            .and_then(|t| t.get(row_key))
            .cloned()
    }

    /// Keys of every row in a table, in sort order
    pub fn row_keys(&self, table: &str) -> Vec<String> {
        self.inner
            .lock()
            .rows
            .get(table)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every mutation applied so far as `(table, row_key, cells)`
    pub fn mutations(&self) -> Vec<(String, String, Vec<Cell>)> {
        self.inner.lock().mutations.clone()
    }

    /// Make every following write fail, as a lost connection would
    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn mutate_row(&self, table: &str, row_key: &str, cells: &[Cell]) -> DashResult<()> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(DashError::Api {
                status: 503,
                table: table.to_string(),
                message: "store unavailable".to_string(),
            });
        }

        let row = inner
            .rows
            .entry(table.to_string())
            .or_default()
            .entry(row_key.to_string())
            .or_insert_with(|| Row::new(row_key));
        for cell in cells {
            row.set(cell);
        }
        inner
            .mutations
            .push((table.to_string(), row_key.to_string(), cells.to_vec()));
        Ok(())
    }

    async fn read_row(&self, table: &str, row_key: &str) -> DashResult<Option<Row>> {
        Ok(self.row(table, row_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mutations_merge_into_rows() {
        let store = MemoryStore::new();
        store
            .mutate_row("races", "track1#5", &[Cell::new("car_id", "9")])
            .await
            .unwrap();
        store
            .mutate_row("races", "track1#5", &[Cell::new("t1_s", "10.5")])
            .await
            .unwrap();

        let row = store.read_row("races", "track1#5").await.unwrap().unwrap();
        assert_eq!(row.get("car_id"), Some("9"));
        assert_eq!(row.get("t1_s"), Some("10.5"));
        assert_eq!(store.mutations().len(), 2);
    }

    #[tokio::test]
    async fn missing_row_reads_as_none() {
        let store = MemoryStore::new();
        assert!(store.read_row("races", "nope").await.unwrap().is_none());
        assert!(store.row_keys("races").is_empty());
    }

    #[tokio::test]
    async fn failing_writes_leave_rows_untouched() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        let result = store
            .mutate_row("races", "track1#5", &[Cell::new("car_id", "9")])
            .await;
        assert!(result.is_err());
        assert!(store.row("races", "track1#5").is_none());
    }
}
