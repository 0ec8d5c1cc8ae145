//! Persistent key-value backing for the peer directory.
//!
//! Provides a [`Table`] trait plus two implementations: [`MemTable`] for
//! tests and directories that do not need persistence, and [`SledTable`] for
//! durable peer state across restarts. The directory stores encoded
//! [`crate::peer::PeerAddress`] records keyed by the peer's hex identifier;
//! nothing else in the crate persists state.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;

/// Errors from storage operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(String),
    #[error("store codec error: {0}")]
    Codec(String),
}

/// A flat key-value table.
///
/// Implementations must be safe for concurrent use; the directory calls them
/// while holding its own lock, so operations should not block indefinitely.
pub trait Table: Send + Sync {
    fn insert(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Snapshot of every entry, used to warm the directory's in-memory index
    /// at startup.
    fn entries(&self) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}

/// In-memory table.
#[derive(Default)]
pub struct MemTable {
    inner: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Table for MemTable {
    fn insert(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.inner.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.lock().remove(key);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        Ok(self
            .inner
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Sled-backed table.
pub struct SledTable {
    #[allow(dead_code)]
    db: sled::Db,
    tree: sled::Tree,
}

impl SledTable {
    /// Open or create a sled database at the given path.
    pub fn open(path: &Path, tree: &str) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Io(e.to_string()))?;
        Self::from_db(db, tree)
    }

    /// Open a temporary database (for testing).
    pub fn open_temporary(tree: &str) -> Result<Self, StoreError> {
        let config = sled::Config::new().temporary(true);
        let db = config.open().map_err(|e| StoreError::Io(e.to_string()))?;
        Self::from_db(db, tree)
    }

    fn from_db(db: sled::Db, tree: &str) -> Result<Self, StoreError> {
        let tree = db
            .open_tree(tree)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self { db, tree })
    }
}

impl Table for SledTable {
    fn insert(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.tree
            .insert(key.as_bytes(), value)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self
            .tree
            .get(key.as_bytes())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.tree
            .remove(key.as_bytes())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut out = Vec::new();
        for item in self.tree.iter() {
            let (key, value) = item.map_err(|e| StoreError::Io(e.to_string()))?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Codec(e.to_string()))?;
            out.push((key, value.to_vec()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(table: &dyn Table) {
        assert!(table.get("a").unwrap().is_none());

        table.insert("a", b"one").unwrap();
        table.insert("b", b"two").unwrap();
        assert_eq!(table.get("a").unwrap().as_deref(), Some(&b"one"[..]));

        // Overwrite replaces.
        table.insert("a", b"uno").unwrap();
        assert_eq!(table.get("a").unwrap().as_deref(), Some(&b"uno"[..]));

        let mut entries = table.entries().unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                ("a".to_string(), b"uno".to_vec()),
                ("b".to_string(), b"two".to_vec()),
            ]
        );

        table.delete("a").unwrap();
        assert!(table.get("a").unwrap().is_none());
        // Deleting again is fine.
        table.delete("a").unwrap();
    }

    #[test]
    fn mem_table_contract() {
        exercise(&MemTable::new());
    }

    #[test]
    fn sled_table_contract() {
        let table = SledTable::open_temporary("peers").unwrap();
        exercise(&table);
    }
}
