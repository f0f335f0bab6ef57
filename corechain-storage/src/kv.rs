//! KV store façade (spec.md §4.2): ordered get/put/delete/exists plus a
//! buffered "simulate / commit / rollback" transaction, the exact contract
//! quoted in spec.md from `original_source/halocoin/engine.py::test_database`.
//! Backed by `sled`, the embedded ordered KV store spec.md §1 calls for.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use anyhow::{anyhow, Result};

/// The façade itself. Cloneable — `sled::Db` is an `Arc` handle internally.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    simulating: std::sync::Arc<AtomicBool>,
}

impl Store {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            simulating: std::sync::Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.remove(key)?;
        Ok(())
    }

    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.db.contains_key(key)?)
    }

    /// Iterate all keys under `prefix`, stripping it from the yielded key.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (k, v) = item?;
            out.push((k[prefix.len()..].to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    /// Begin a buffered transaction. Fails if another simulation is already
    /// outstanding — spec.md §4.2: "Only one outstanding simulation at a
    /// time per store."
    pub fn simulate(&self) -> Result<Transaction<'_>> {
        if self
            .simulating
            .compare_exchange(false, true, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_err()
        {
            return Err(anyhow!("a simulation is already in progress"));
        }
        Ok(Transaction {
            store: self,
            buffer: HashMap::new(),
            done: false,
        })
    }
}

/// A buffered write set over a `Store`. Reads observe buffered writes first,
/// falling through to the underlying store — spec.md §4.2: "Reads during
/// simulation observe the buffered state."
pub struct Transaction<'a> {
    store: &'a Store,
    buffer: HashMap<Vec<u8>, Option<Vec<u8>>>,
    done: bool,
}

impl<'a> Transaction<'a> {
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.buffer.get(key) {
            Some(Some(v)) => Ok(Some(v.clone())),
            Some(None) => Ok(None),
            None => self.store.get(key),
        }
    }

    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.buffer.insert(key.to_vec(), Some(value.to_vec()));
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.buffer.insert(key.to_vec(), None);
    }

    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: HashMap<Vec<u8>, Option<Vec<u8>>> = self
            .store
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(k, v)| (k, Some(v)))
            .collect();
        for (k, v) in &self.buffer {
            if let Some(stripped) = k.strip_prefix(prefix) {
                merged.insert(stripped.to_vec(), v.clone());
            }
        }
        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }

    /// Flush the buffer atomically via a single `sled` batch.
    pub fn commit(mut self) -> Result<()> {
        self.done = true;
        let mut batch = sled::Batch::default();
        for (k, v) in self.buffer.drain() {
            match v {
                Some(value) => batch.insert(k, value),
                None => batch.remove(k),
            }
        }
        self.store.db.apply_batch(batch)?;
        self.store.db.flush()?;
        self.store
            .simulating
            .store(false, AtomicOrdering::SeqCst);
        Ok(())
    }

    /// Discard every buffered write. The underlying store is left untouched.
    pub fn rollback(mut self) {
        self.done = true;
        self.buffer.clear();
        self.store
            .simulating
            .store(false, AtomicOrdering::SeqCst);
    }
}

impl<'a> Drop for Transaction<'a> {
    fn drop(&mut self) {
        if !self.done {
            self.store
                .simulating
                .store(false, AtomicOrdering::SeqCst);
        }
    }
}
