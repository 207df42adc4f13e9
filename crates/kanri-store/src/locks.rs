//! Named partition locks.
//!
//! One registry per open store. A partition is identified by a key string
//! (primary namespace plus tenant id); at most one session holds a
//! partition at a time, and a session re-acquiring a partition it already
//! holds proceeds without blocking.

use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};

pub(crate) struct PartitionLocks {
    held: Mutex<HashMap<String, u64>>,
    freed: Condvar,
}

impl PartitionLocks {
    pub(crate) fn new() -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            freed: Condvar::new(),
        }
    }

    /// Block until `partition` is free, then take it for `session`.
    /// Returns false if this session already holds it.
    pub(crate) fn acquire(&self, session: u64, partition: &str) -> bool {
        let mut held = self.held.lock();
        loop {
            match held.get(partition).copied() {
                None => {
                    held.insert(partition.to_owned(), session);
                    return true;
                }
                Some(holder) if holder == session => return false,
                Some(_) => self.freed.wait(&mut held),
            }
        }
    }

    /// Release every partition held by `session` and wake waiters.
    pub(crate) fn release_all(&self, session: u64) {
        let mut held = self.held.lock();
        let before = held.len();
        held.retain(|_, holder| *holder != session);
        let released = held.len() != before;
        drop(held);
        if released {
            self.freed.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn reacquire_by_same_session_does_not_block() {
        let locks = PartitionLocks::new();
        assert!(locks.acquire(1, "tenant-a"));
        assert!(!locks.acquire(1, "tenant-a"));
    }

    #[test]
    fn disjoint_partitions_do_not_contend() {
        let locks = PartitionLocks::new();
        assert!(locks.acquire(1, "tenant-a"));
        assert!(locks.acquire(2, "tenant-b"));
    }

    #[test]
    fn second_session_blocks_until_release() {
        let locks = Arc::new(PartitionLocks::new());
        assert!(locks.acquire(1, "tenant-a"));

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                tx.send("requesting").unwrap();
                locks.acquire(2, "tenant-a");
                tx.send("acquired").unwrap();
                locks.release_all(2);
            })
        };

        assert_eq!(rx.recv().unwrap(), "requesting");
        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err(), "waiter acquired while lock was held");

        locks.release_all(1);
        assert_eq!(rx.recv().unwrap(), "acquired");
        waiter.join().unwrap();
    }

    #[test]
    fn release_all_frees_every_partition_of_the_session() {
        let locks = PartitionLocks::new();
        locks.acquire(1, "tenant-a");
        locks.acquire(1, "tenant-b");
        locks.release_all(1);
        assert!(locks.acquire(2, "tenant-a"));
        assert!(locks.acquire(2, "tenant-b"));
    }
}
