use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::info;

use crate::error::StoreError;
use crate::locks::PartitionLocks;

struct DatabaseInner {
    tree: sled::Db,
    locks: PartitionLocks,
    path: PathBuf,
}

/// Shared handle to one open embedded store.
///
/// Every repository configured with the same path clones the same handle,
/// so all of a module's repositories observe each other's committed
/// writes, and its partition locks coordinate their sessions.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    fn open(path: &Path) -> Result<Self, StoreError> {
        if path.as_os_str().is_empty() {
            return Err(StoreError::Configuration(
                "store path must not be empty".into(),
            ));
        }

        std::fs::create_dir_all(path).map_err(|e| {
            StoreError::Configuration(format!("create store dir {}: {e}", path.display()))
        })?;

        let tree = sled::open(path).map_err(|e| {
            StoreError::Configuration(format!("open store {}: {e}", path.display()))
        })?;

        info!(path = %path.display(), "store opened");

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                tree,
                locks: PartitionLocks::new(),
                path: path.to_owned(),
            }),
        })
    }

    /// Ephemeral store for tests; contents vanish when the last handle drops.
    pub fn temporary() -> Result<Self, StoreError> {
        let tree = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::Configuration(format!("open temporary store: {e}")))?;

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                tree,
                locks: PartitionLocks::new(),
                path: PathBuf::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub(crate) fn tree(&self) -> &sled::Db {
        &self.inner.tree
    }

    pub(crate) fn locks(&self) -> &PartitionLocks {
        &self.inner.locks
    }
}

static OPEN_STORES: OnceLock<Mutex<HashMap<PathBuf, Database>>> = OnceLock::new();

fn open_stores() -> &'static Mutex<HashMap<PathBuf, Database>> {
    OPEN_STORES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Process-wide store registry: one open instance per configured path.
pub struct StoreProvider;

impl StoreProvider {
    /// Open the store at `path`, or return the handle already open there.
    /// Safe under concurrent callers; the open is idempotent.
    pub fn database_from(path: impl AsRef<Path>) -> Result<Database, StoreError> {
        let path = path.as_ref();
        let mut stores = open_stores().lock();
        if let Some(db) = stores.get(path) {
            return Ok(db.clone());
        }
        let db = Database::open(path)?;
        stores.insert(path.to_owned(), db.clone());
        Ok(db)
    }

    /// Drop the registry's handle for `path`. The store closes once every
    /// outstanding clone is dropped.
    pub fn close(path: impl AsRef<Path>) {
        open_stores().lock().remove(path.as_ref());
    }

    pub fn close_all() {
        open_stores().lock().clear();
    }

    /// Delete every record in the store. Test support.
    pub fn purge(db: &Database) -> Result<(), StoreError> {
        db.tree().clear()?;
        db.tree().flush()?;
        info!(path = %db.path().display(), "store purged");
        Ok(())
    }
}
