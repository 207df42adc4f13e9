//! Unit of work: the transaction boundary.
//!
//! A session stages primary writes, removals, and key-reference mutations
//! in memory, acquires partition locks, and applies everything as one
//! atomic batch at commit. Reads observe only committed state; a session's
//! own staged mutations are not visible to its reads.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::database::Database;
use crate::error::StoreError;
use crate::key::{CompositeKey, IndexKey};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Request-scoped holder for the active session.
///
/// One context travels with one call chain; starting a second session
/// while one is active, or asking for the current session when none has
/// been started, fails fast.
#[derive(Default)]
pub struct WorkContext {
    active: Option<UnitOfWork>,
}

impl WorkContext {
    pub fn new() -> Self {
        Self { active: None }
    }

    pub fn start(&mut self, db: &Database) -> Result<&mut UnitOfWork, StoreError> {
        if self.active.is_some() {
            return Err(StoreError::ConcurrencyContext(
                "a unit of work is already active in this context".into(),
            ));
        }
        Ok(self.active.insert(UnitOfWork::new(db.clone())))
    }

    pub fn current(&mut self) -> Result<&mut UnitOfWork, StoreError> {
        self.active.as_mut().ok_or_else(|| {
            StoreError::ConcurrencyContext("no unit of work has been started".into())
        })
    }

    /// Apply the active session atomically and retire it.
    pub fn commit(&mut self) -> Result<(), StoreError> {
        let uow = self.active.take().ok_or_else(|| {
            StoreError::ConcurrencyContext("no unit of work to commit".into())
        })?;
        uow.commit()
    }

    /// Discard the active session, if any. Staged mutations are dropped
    /// unapplied; partition locks are released.
    pub fn abandon(&mut self) {
        self.active = None;
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

struct RefSet {
    values: BTreeSet<String>,
    dirty: bool,
}

/// One in-flight transaction: a not-yet-visible log of staged operations
/// plus the partition locks the session holds.
pub struct UnitOfWork {
    db: Database,
    batch: sled::Batch,
    staged: HashMap<String, Option<Vec<u8>>>,
    reference_sets: HashMap<String, RefSet>,
    held: Vec<String>,
    session: u64,
}

impl UnitOfWork {
    fn new(db: Database) -> Self {
        Self {
            db,
            batch: sled::Batch::default(),
            staged: HashMap::new(),
            reference_sets: HashMap::new(),
            held: Vec::new(),
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Stage an upsert of the serialized snapshot at `key`.
    pub fn write<T: Serialize>(&mut self, key: &CompositeKey, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.staged.insert(key.as_str().to_owned(), Some(bytes.clone()));
        self.batch.insert(key.as_bytes(), bytes);
        Ok(())
    }

    /// Stage deletion of the snapshot at `key`.
    pub fn remove(&mut self, key: &CompositeKey) {
        self.staged.insert(key.as_str().to_owned(), None);
        self.batch.remove(key.as_bytes());
    }

    /// Add the linked primary key to the index's key-reference set,
    /// creating the set if absent. Idempotent.
    pub fn update_key_reference(&mut self, index: &IndexKey) -> Result<(), StoreError> {
        let owner = index.owner_value().to_owned();
        let set = self.reference_set(index.key())?;
        if set.values.insert(owner) {
            set.dirty = true;
        }
        Ok(())
    }

    /// Remove the linked primary key from the index's key-reference set.
    /// Idempotent even if the reference was never present.
    pub fn remove_key_reference(&mut self, index: &IndexKey) -> Result<(), StoreError> {
        let owner = index.owner_value();
        let set = self.reference_set(index.key())?;
        if set.values.remove(owner) {
            set.dirty = true;
        }
        Ok(())
    }

    /// Block until this session holds the named partition. Re-acquiring a
    /// partition already held by this session is a no-op.
    pub fn lock(&mut self, partition: &str) {
        if self.db.locks().acquire(self.session, partition) {
            self.held.push(partition.to_owned());
        }
    }

    /// Read the committed snapshot at `key`. Staged writes of this session
    /// are not visible.
    pub fn read_object<T: DeserializeOwned>(
        &self,
        key: &CompositeKey,
    ) -> Result<Option<T>, StoreError> {
        ReadView::new(&self.db).read_object(key)
    }

    /// Read the committed key-reference set at `index`, possibly empty.
    pub fn read_keys(&self, index: &CompositeKey) -> Result<Vec<String>, StoreError> {
        ReadView::new(&self.db).read_keys(index)
    }

    /// The snapshot this session would observe after commit: the staged
    /// value if one exists, otherwise the committed one. Used by
    /// repositories to re-derive index membership across repeated saves
    /// of one aggregate within a single session.
    pub(crate) fn pending_object<T: DeserializeOwned>(
        &self,
        key: &CompositeKey,
    ) -> Result<Option<T>, StoreError> {
        match self.staged.get(key.as_str()) {
            Some(Some(bytes)) => Ok(Some(serde_json::from_slice(bytes)?)),
            Some(None) => Ok(None),
            None => self.read_object(key),
        }
    }

    pub(crate) fn held_partitions(&self) -> &[String] {
        &self.held
    }

    /// Apply every staged mutation as one atomic batch, then release the
    /// session's partition locks. A failure mid-apply leaves the store as
    /// if nothing happened; locks are released on every exit path.
    pub fn commit(mut self) -> Result<(), StoreError> {
        let reference_sets = std::mem::take(&mut self.reference_sets);
        for (key, set) in &reference_sets {
            if !set.dirty {
                continue;
            }
            if set.values.is_empty() {
                self.batch.remove(key.as_bytes());
            } else {
                self.batch.insert(key.as_bytes(), serde_json::to_vec(&set.values)?);
            }
        }

        let batch = std::mem::take(&mut self.batch);
        self.db.tree().apply_batch(batch)?;
        self.db.tree().flush()?;

        debug!(
            staged = self.staged.len(),
            indexes = reference_sets.len(),
            "unit of work committed"
        );
        Ok(())
    }

    fn reference_set(&mut self, key: &CompositeKey) -> Result<&mut RefSet, StoreError> {
        let loaded = if self.reference_sets.contains_key(key.as_str()) {
            None
        } else {
            Some(load_reference_values(&self.db, key)?)
        };
        let slot = match self.reference_sets.entry(key.as_str().to_owned()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(v) => v.insert(RefSet {
                values: loaded.unwrap_or_default(),
                dirty: false,
            }),
        };
        Ok(slot)
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        self.db.locks().release_all(self.session);
    }
}

/// Query-only view over committed state. Requires no lock and no active
/// session; any number of readers may run alongside a committing writer.
pub struct ReadView<'a> {
    db: &'a Database,
}

impl<'a> ReadView<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn read_object<T: DeserializeOwned>(
        &self,
        key: &CompositeKey,
    ) -> Result<Option<T>, StoreError> {
        self.read_object_at(key.as_str())
    }

    /// Point lookup by the raw encoded key string, as stored in a
    /// key-reference set.
    pub fn read_object_at<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.db.tree().get(key.as_bytes())? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Io(format!("corrupt snapshot at {key}: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn read_keys(&self, index: &CompositeKey) -> Result<Vec<String>, StoreError> {
        Ok(load_reference_values(self.db, index)?.into_iter().collect())
    }
}

fn load_reference_values(db: &Database, key: &CompositeKey) -> Result<BTreeSet<String>, StoreError> {
    match db.tree().get(key.as_bytes())? {
        Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            StoreError::Io(format!("corrupt key-reference set at {}: {e}", key.as_str()))
        }),
        None => Ok(BTreeSet::new()),
    }
}
