//! Key-value storage for short-lived token records
//!
//! [`KeyValueStore`] is the narrow interface the token store needs from a
//! shared hash-record store with per-key TTL: create-if-absent, atomic
//! increment that also refreshes the TTL, multi-field reads, and delete.
//! [`MemoryStore`] implements it in-process with lazy expiry, which is
//! sufficient for a single gateway instance and for tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::errors::{ForwardError, ForwardResult};

/// Hash-record store with per-key expiry
///
/// Implementations must make each method atomic with respect to the others
/// for the same key. Any expired key behaves exactly like a missing key.
pub trait KeyValueStore: Send + Sync {
    /// Create `key` with `fields` and `ttl` only if it does not exist
    ///
    /// Returns `false` (and writes nothing) if the key already exists.
    fn insert_if_absent(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> ForwardResult<bool>;

    /// Add `delta` to an integer field and reset the key's TTL
    ///
    /// A missing key or field counts as `0`. Returns the new value.
    fn increment_and_touch(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl: Duration,
    ) -> ForwardResult<i64>;

    /// Read several fields, `None` for each absent one
    fn get_fields(&self, key: &str, fields: &[&str]) -> ForwardResult<Vec<Option<String>>>;

    /// Remove a key; missing keys are ignored
    fn delete(&self, key: &str) -> ForwardResult<()>;
}

/// Single record in the in-memory store
#[derive(Debug, Clone)]
struct Record {
    fields: HashMap<String, String>,
    expires_at: Instant,
}

/// In-process [`KeyValueStore`]
///
/// One mutex guards the whole map, so every operation is atomic. Expired
/// records are dropped on access.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Record>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the map and purge expired records
    fn lock(&self) -> ForwardResult<MutexGuard<'_, HashMap<String, Record>>> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| ForwardError::Storage("memory store lock poisoned".to_owned()))?;
        let now = Instant::now();
        records.retain(|_, record| record.expires_at > now);
        Ok(records)
    }
}

impl KeyValueStore for MemoryStore {
    fn insert_if_absent(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> ForwardResult<bool> {
        let mut records = self.lock()?;
        if records.contains_key(key) {
            return Ok(false);
        }
        records.insert(
            key.to_owned(),
            Record {
                fields: fields
                    .iter()
                    .map(|(k, v)| ((*k).to_owned(), v.clone()))
                    .collect(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    fn increment_and_touch(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl: Duration,
    ) -> ForwardResult<i64> {
        let mut records = self.lock()?;
        let record = records.entry(key.to_owned()).or_insert_with(|| Record {
            fields: HashMap::new(),
            expires_at: Instant::now() + ttl,
        });

        let current = match record.fields.get(field) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                ForwardError::Storage(format!("field '{field}' does not hold an integer"))
            })?,
            None => 0,
        };
        let updated = current + delta;
        record.fields.insert(field.to_owned(), updated.to_string());
        record.expires_at = Instant::now() + ttl;
        Ok(updated)
    }

    fn get_fields(&self, key: &str, fields: &[&str]) -> ForwardResult<Vec<Option<String>>> {
        let records = self.lock()?;
        let record = records.get(key);
        Ok(fields
            .iter()
            .map(|field| record.and_then(|r| r.fields.get(*field).cloned()))
            .collect())
    }

    fn delete(&self, key: &str) -> ForwardResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
