//! Per-address mutual exclusion.
//!
//! Encrypt and decrypt for one remote device read, modify and write the same
//! session record, so they must not interleave. Operations on different
//! devices never contend.

use crate::address::ProtocolAddress;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Table of per-address locks. Clones share the table. Stores hand one out
/// through `SessionStore::session_locks`, so every builder and cipher over
/// the same store contends on the same entries.
#[derive(Clone, Debug, Default)]
pub struct SessionLocks {
    table: Arc<Mutex<HashMap<ProtocolAddress, Arc<Mutex<()>>>>>,
}

impl SessionLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `address`.
    pub fn with_lock<T>(
        &self,
        address: &ProtocolAddress,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let entry = {
            let mut table = self.table.lock().map_err(|_| Error::Storage)?;
            Arc::clone(table.entry(address.clone()).or_default())
        };
        let result = {
            let _guard = entry.lock().map_err(|_| Error::Storage)?;
            f()
        };
        self.prune(address, &entry);
        result
    }

    // Drops the entry once no other caller holds or waits on it. Waiters
    // clone the entry under the table lock, so the count cannot rise here.
    fn prune(&self, address: &ProtocolAddress, entry: &Arc<Mutex<()>>) {
        if let Ok(mut table) = self.table.lock() {
            let idle = table
                .get(address)
                .is_some_and(|held| Arc::ptr_eq(held, entry) && Arc::strong_count(entry) == 2);
            if idle {
                table.remove(address);
            }
        }
    }

    /// Number of addresses currently locked or waited on.
    pub fn len(&self) -> Result<usize> {
        Ok(self.table.lock().map_err(|_| Error::Storage)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_same_address_is_serialized() {
        let locks = SessionLocks::new();
        let address = ProtocolAddress::new("alice", 1);
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let address = address.clone();
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    locks
                        .with_lock(&address, || {
                            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(locks.is_empty().unwrap());
    }

    #[test]
    fn test_error_is_passed_through() {
        let locks = SessionLocks::new();
        let result: Result<()> = locks.with_lock(&ProtocolAddress::new("bob", 1), || {
            Err(Error::InvalidMac)
        });
        assert_eq!(result, Err(Error::InvalidMac));
        assert!(locks.is_empty().unwrap());
    }

    #[test]
    fn test_entries_are_pruned_after_use() {
        let locks = SessionLocks::new();
        for device in 0..100 {
            let address = ProtocolAddress::new("carol", device);
            locks
                .with_lock(&address, || {
                    assert_eq!(locks.len()?, 1);
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(locks.len().unwrap(), 0);
    }

    #[test]
    fn test_nested_addresses_are_independent() {
        let locks = SessionLocks::new();
        let outer = ProtocolAddress::new("alice", 1);
        let inner = ProtocolAddress::new("bob", 1);

        locks
            .with_lock(&outer, || {
                locks.with_lock(&inner, || Ok(()))?;
                // Outer entry survives while its guard is held
                assert_eq!(locks.len()?, 1);
                Ok(())
            })
            .unwrap();
        assert!(locks.is_empty().unwrap());
    }
}
