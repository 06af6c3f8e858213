use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;
use thiserror::Error;

/// Errors that cross the public boundary of the planning core. Anything
/// softer (no coverage, no path, malformed rows) degrades to empty
/// results instead.
#[derive(Debug, Error)]
pub enum StoreError {
    /// the merged transit store has not been produced yet
    #[error("transit store missing at {0}, run the ingest job first")]
    Missing(PathBuf),
    #[error("transit store error: {0}")]
    Io(#[from] rusqlite::Error),
}

/// Shared read-only handle on the merged transit store.
///
/// The store is written once by the offline ingest job and only ever
/// read here. WAL keeps it safe to read while the ingest job rebuilds
/// it, `query_only` rejects any write that slips into a query, and the
/// page cache is capped so a resident copy of a multi-GB store cannot
/// build up.
#[derive(Debug)]
pub struct TransitStore {
    conn: Mutex<Connection>,
}

impl TransitStore {
    pub fn open(path: impl AsRef<Path>) -> Result<TransitStore, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::Missing(path.to_path_buf()));
        }
        let conn = Connection::open(path)?;
        // journal_mode is the one pragma that answers with a row
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        // negative cache_size is KB, so ~32 MB of pages
        conn.pragma_update(None, "cache_size", -32768)?;
        conn.pragma_update(None, "query_only", true)?;
        Ok(TransitStore {
            conn: Mutex::new(conn),
        })
    }

    /// Run a read against the store. Readers serialize on the handle;
    /// a search holds it only for the duration of one query.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&conn).map_err(StoreError::from)
    }

    /// Orderly shutdown of the shared connection.
    pub fn close(self) -> Result<(), StoreError> {
        let conn = self.conn.into_inner().unwrap_or_else(|e| e.into_inner());
        conn.close().map_err(|(_conn, err)| StoreError::Io(err))
    }
}

#[cfg(test)]
mod test {
    use super::{StoreError, TransitStore};

    #[test]
    fn missing_store_is_a_distinct_error() {
        let err = TransitStore::open("/nonexistent/transit.db").unwrap_err();
        match err {
            StoreError::Missing(path) => {
                assert!(path.ends_with("transit.db"));
            }
            other => panic!("expected Missing, got {:?}", other),
        }
    }
}
