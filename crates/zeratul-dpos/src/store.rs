//! Key-value store interface consumed by the contract
//!
//! The hosting chain owns the real (versioned, merkleized) store. The
//! contract only needs point reads and writes plus prefix scans, so that is
//! all the traits expose. [`MemoryStore`] backs tests and the simulator.
//!
//! Every contract call runs against an [`Overlay`]. Writes are buffered and
//! only reach the backing store through [`Changeset::commit`], which the
//! caller invokes once the call has returned `Ok`.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::ops::Bound;

/// Store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("backend: {0}")]
    Backend(String),
}

/// Read half of the store
pub trait KvRead {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// All entries whose key starts with `prefix`, in key order
    fn range(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    fn has(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Read-write store
pub trait KvStore: KvRead {
    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError>;
    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;
}

impl<S: KvRead + ?Sized> KvRead for &S {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn range(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        (**self).range(prefix)
    }
}

impl<S: KvRead + ?Sized> KvRead for &mut S {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn range(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        (**self).range(prefix)
    }
}

impl<S: KvStore + ?Sized> KvStore for &mut S {
    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        (**self).delete(key)
    }
}

/// First key that is greater than every key starting with `prefix`
fn prefix_end(prefix: &[u8]) -> Bound<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Bound::Excluded(end);
        }
    }
    Bound::Unbounded
}

fn prefix_bounds(prefix: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    (Bound::Included(prefix.to_vec()), prefix_end(prefix))
}

/// In-memory ordered store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// SHA-256 over every (key, value) pair in key order.
    ///
    /// Two executions of the same transaction sequence must produce the
    /// same root.
    pub fn root_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for (key, value) in &self.entries {
            hasher.update((key.len() as u64).to_be_bytes());
            hasher.update(key);
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value);
        }
        hasher.finalize().into()
    }
}

impl KvRead for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn range(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        Ok(self
            .entries
            .range(prefix_bounds(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

impl KvStore for MemoryStore {
    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.entries.insert(key.to_vec(), value);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Buffered writes over a read-only base
pub struct Overlay<'a, S: KvRead> {
    base: &'a S,
    /// `None` marks a deletion
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a, S: KvRead> Overlay<'a, S> {
    pub fn new(base: &'a S) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    /// Release the base borrow, keeping the buffered writes
    pub fn into_changeset(self) -> Changeset {
        Changeset {
            writes: self.writes,
        }
    }
}

impl<S: KvRead> KvRead for Overlay<'_, S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self.writes.get(key) {
            Some(write) => Ok(write.clone()),
            None => self.base.get(key),
        }
    }

    fn range(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self.base.range(prefix)?.into_iter().collect();
        for (key, write) in self.writes.range(prefix_bounds(prefix)) {
            match write {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }
}

impl<S: KvRead> KvStore for Overlay<'_, S> {
    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.writes.insert(key.to_vec(), Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }
}

/// Writes of a successful call, ready to be applied
#[derive(Debug, Default)]
pub struct Changeset {
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Changeset {
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn commit<S: KvStore>(self, store: &mut S) -> Result<(), StoreError> {
        for (key, write) in self.writes {
            match write {
                Some(value) => store.set(&key, value)?,
                None => store.delete(&key)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(entries: &[(&[u8], &[u8])]) -> MemoryStore {
        let mut store = MemoryStore::new();
        for (k, v) in entries {
            store.set(k, v.to_vec()).unwrap();
        }
        store
    }

    #[test]
    fn test_prefix_range() {
        let store = store_with(&[
            (b"a/1", b"x"),
            (b"a/2", b"y"),
            (b"b/1", b"z"),
            (b"a", b"root"),
        ]);

        let keys: Vec<_> = store.range(b"a/").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a/1".to_vec(), b"a/2".to_vec()]);
        assert_eq!(store.range(b"c/").unwrap().len(), 0);
    }

    #[test]
    fn test_prefix_end_saturates() {
        let store = store_with(&[(&[0xff, 0xff, 1], b"x"), (&[0xff, 0xfe], b"y")]);
        assert_eq!(store.range(&[0xff, 0xff]).unwrap().len(), 1);
        assert_eq!(store.range(&[]).unwrap().len(), 2);
    }

    #[test]
    fn test_overlay_isolated_until_commit() {
        let mut base = store_with(&[(b"k/1", b"old"), (b"k/2", b"gone")]);

        let changes = {
            let mut overlay = Overlay::new(&base);
            overlay.set(b"k/1", b"new".to_vec()).unwrap();
            overlay.set(b"k/3", b"added".to_vec()).unwrap();
            overlay.delete(b"k/2").unwrap();

            assert_eq!(overlay.get(b"k/1").unwrap(), Some(b"new".to_vec()));
            assert_eq!(overlay.get(b"k/2").unwrap(), None);
            let keys: Vec<_> = overlay.range(b"k/").unwrap().into_iter().map(|(k, _)| k).collect();
            assert_eq!(keys, vec![b"k/1".to_vec(), b"k/3".to_vec()]);

            overlay.into_changeset()
        };

        // base untouched before commit
        assert_eq!(base.get(b"k/1").unwrap(), Some(b"old".to_vec()));

        changes.commit(&mut base).unwrap();
        assert_eq!(base.get(b"k/1").unwrap(), Some(b"new".to_vec()));
        assert!(!base.has(b"k/2").unwrap());
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn test_root_hash_deterministic() {
        let a = store_with(&[(b"x", b"1"), (b"y", b"2")]);
        let b = store_with(&[(b"y", b"2"), (b"x", b"1")]);
        assert_eq!(a.root_hash(), b.root_hash());

        let c = store_with(&[(b"x", b"1"), (b"y", b"3")]);
        assert_ne!(a.root_hash(), c.root_hash());
    }
}
