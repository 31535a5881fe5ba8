//! Typed configuration store
//!
//! An ordered map from string key to one tagged value. Entries live in a
//! `SlotPool`; deleting a key parks its record (and its key buffer) on the
//! spare list for the next insert. The index is a vector of handles kept in
//! byte-wise key order, so lookups are binary searches and iteration is a
//! successor walk.

pub mod value;

pub use value::{ConfigType, ConfigValue, SetValue};

use crate::infrastructure::pool::{Handle, PoolError, Recycle, SlotPool};
use std::collections::TryReserveError;
use thiserror::Error;
use tracing::Level;

/// Config store errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("out of memory")]
    OutOfMemory,

    #[error("invalid type tag: {0}")]
    InvalidType(u32),

    #[error("unknown type name: {0}")]
    UnknownTypeName(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: ConfigType,
        found: ConfigType,
    },

    #[error("invalid {ty} value: {text:?}")]
    InvalidValue { ty: ConfigType, text: String },

    #[error("a value other than void needs a key")]
    MissingKey,
}

impl From<PoolError> for StoreError {
    fn from(_: PoolError) -> Self {
        StoreError::OutOfMemory
    }
}

impl From<TryReserveError> for StoreError {
    fn from(_: TryReserveError) -> Self {
        StoreError::OutOfMemory
    }
}

/// One key and its value
#[derive(Debug, Default)]
pub struct ConfigEntry {
    key: String,
    value: ConfigValue,
}

impl Recycle for ConfigEntry {
    fn recycle(&mut self) {
        // Key capacity is kept for the next insert; the payload is dropped.
        self.key.clear();
        self.value = ConfigValue::Void;
    }
}

impl ConfigEntry {
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> &ConfigValue {
        &self.value
    }

    #[inline]
    pub fn ty(&self) -> ConfigType {
        self.value.ty()
    }

    pub fn as_int(&self) -> Result<i32, StoreError> {
        self.value.as_int()
    }

    pub fn as_uint(&self) -> Result<u32, StoreError> {
        self.value.as_uint()
    }

    pub fn as_long(&self) -> Result<i64, StoreError> {
        self.value.as_long()
    }

    pub fn as_ulong(&self) -> Result<u64, StoreError> {
        self.value.as_ulong()
    }

    pub fn as_double(&self) -> Result<f64, StoreError> {
        self.value.as_double()
    }

    pub fn as_pointer(&self) -> Result<usize, StoreError> {
        self.value.as_pointer()
    }

    pub fn as_blob(&self) -> Result<&[u8], StoreError> {
        self.value.as_blob()
    }

    pub fn as_str(&self) -> Result<&str, StoreError> {
        self.value.as_str()
    }
}

/// Ordered key → tagged value map with pooled entries
#[derive(Debug, Default)]
pub struct ConfigStore {
    entries: SlotPool<ConfigEntry>,
    /// Live handles sorted by key
    index: Vec<Handle>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with `capacity` entries parked on the spare list
    pub fn with_capacity(capacity: usize) -> Result<Self, StoreError> {
        let mut index = Vec::new();
        index.try_reserve_exact(capacity)?;
        Ok(Self {
            entries: SlotPool::with_capacity(capacity)?,
            index,
        })
    }

    /// Set, replace or delete entries
    ///
    /// * `key = None` with `SetValue::Void` removes every entry
    /// * `SetValue::Void` with a key removes that entry
    /// * otherwise the key is inserted or updated in place
    ///
    /// On error an existing entry keeps its previous value.
    pub fn set(&mut self, key: Option<&str>, value: SetValue<'_>) -> Result<(), StoreError> {
        let Some(key) = key else {
            if value.ty() != ConfigType::Void {
                return Err(StoreError::MissingKey);
            }
            self.clear();
            return Ok(());
        };

        if value.ty() == ConfigType::Void {
            self.remove(key);
            return Ok(());
        }

        match self.search(key) {
            Ok(pos) => {
                if let Some(entry) = self.entries.get_mut(self.index[pos]) {
                    install(&mut entry.value, value)?;
                }
            }
            Err(pos) => {
                // Reserve before acquiring so a failure here leaves nothing behind.
                self.index.try_reserve(1)?;
                let (handle, entry) = self.entries.acquire_mut()?;
                if let Err(e) = fill(entry, key, value) {
                    self.entries.release(handle);
                    return Err(e);
                }
                self.index.insert(pos, handle);
            }
        }
        crate::log_store!(Level::TRACE, "set {} ({})", key, value.ty());
        Ok(())
    }

    /// Delete one entry, returning whether it existed
    pub fn remove(&mut self, key: &str) -> bool {
        match self.search(key) {
            Ok(pos) => {
                let handle = self.index.remove(pos);
                self.entries.release(handle);
                crate::log_store!(Level::TRACE, "removed {}", key);
                true
            }
            Err(_) => false,
        }
    }

    /// Delete every entry, keeping the records for reuse
    pub fn clear(&mut self) {
        let removed = self.index.len();
        for handle in self.index.drain(..) {
            self.entries.release(handle);
        }
        crate::log_store!(Level::DEBUG, "cleared {} entries", removed);
    }

    /// Exact lookup, or the first entry in key order when `key` is `None`
    pub fn find(&self, key: Option<&str>) -> Option<&ConfigEntry> {
        match key {
            None => self.index.first().and_then(|h| self.entries.get(*h)),
            Some(key) => {
                let pos = self.search(key).ok()?;
                self.entries.get(self.index[pos])
            }
        }
    }

    /// Successor of `prev` in key order, or the first entry when `prev` is `None`
    ///
    /// `prev` need not be present; the walk continues from the next greater key.
    pub fn next(&self, prev: Option<&str>) -> Option<&ConfigEntry> {
        let pos = match prev {
            None => 0,
            Some(prev) => match self.search(prev) {
                Ok(pos) => pos + 1,
                Err(pos) => pos,
            },
        };
        self.index.get(pos).and_then(|h| self.entries.get(*h))
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.find(Some(key)).map(ConfigEntry::value)
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = &ConfigEntry> + '_ {
        self.index.iter().filter_map(|h| self.entries.get(*h))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Recycled records waiting for reuse
    #[inline]
    pub fn spare_len(&self) -> usize {
        self.entries.spare_len()
    }

    /// Release every entry, live and spare
    pub fn teardown(mut self) {
        crate::log_store!(
            Level::DEBUG,
            "teardown: {} entries, {} spare",
            self.index.len(),
            self.entries.spare_len()
        );
        self.index.clear();
        self.entries.clear();
    }

    fn search(&self, key: &str) -> Result<usize, usize> {
        // The index only ever holds live handles.
        self.index.binary_search_by(|h| {
            self.entries
                .get(*h)
                .map_or("", ConfigEntry::key)
                .as_bytes()
                .cmp(key.as_bytes())
        })
    }
}

/// Initialise a freshly acquired record
fn fill(entry: &mut ConfigEntry, key: &str, value: SetValue<'_>) -> Result<(), StoreError> {
    entry.key.try_reserve(key.len())?;
    entry.key.push_str(key);
    install(&mut entry.value, value)
}

/// Replace `slot` with `value`, leaving `slot` untouched on failure
fn install(slot: &mut ConfigValue, value: SetValue<'_>) -> Result<(), StoreError> {
    *slot = match value {
        SetValue::Void => ConfigValue::Void,
        SetValue::Int(v) => ConfigValue::Int(v),
        SetValue::UInt(v) => ConfigValue::UInt(v),
        SetValue::Long(v) => ConfigValue::Long(v),
        SetValue::ULong(v) => ConfigValue::ULong(v),
        SetValue::Double(v) => ConfigValue::Double(v),
        SetValue::Pointer(v) => ConfigValue::Pointer(v),
        SetValue::Blob(data) => {
            let mut buf = reclaim_buffer(slot, data.len())?;
            buf.extend_from_slice(data);
            ConfigValue::Blob(buf)
        }
        SetValue::Str(text) => {
            let buf = reclaim_buffer(slot, text.len())?;
            // An empty buffer is always valid UTF-8.
            let mut s = String::from_utf8(buf).unwrap_or_default();
            s.push_str(text);
            ConfigValue::Str(s)
        }
    };
    Ok(())
}

/// Empty buffer with room for `needed` bytes
///
/// Takes over the blob/string buffer already in `slot` when it is large
/// enough. Otherwise allocates a new one and leaves `slot` alone, so an
/// allocation failure cannot disturb the previous value.
fn reclaim_buffer(slot: &mut ConfigValue, needed: usize) -> Result<Vec<u8>, StoreError> {
    let reusable = match slot {
        ConfigValue::Blob(buf) if buf.capacity() >= needed => Some(std::mem::take(buf)),
        ConfigValue::Str(s) if s.capacity() >= needed => Some(std::mem::take(s).into_bytes()),
        _ => None,
    };
    match reusable {
        Some(mut buf) => {
            buf.clear();
            Ok(buf)
        }
        None => {
            let mut buf = Vec::new();
            buf.try_reserve_exact(needed)?;
            Ok(buf)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn keys(store: &ConfigStore) -> Vec<String> {
        let mut out = Vec::new();
        let mut cursor = store.next(None);
        while let Some(entry) = cursor {
            out.push(entry.key().to_string());
            cursor = store.next(Some(entry.key()));
        }
        out
    }

    #[test]
    fn test_set_and_find_int() {
        let mut store = ConfigStore::new();
        store.set(Some("k"), SetValue::Int(5)).unwrap();

        let entry = store.find(Some("k")).unwrap();
        assert_eq!(entry.ty(), ConfigType::Int);
        assert_eq!(entry.as_int().unwrap(), 5);
    }

    #[test]
    fn test_retype_in_place() {
        let mut store = ConfigStore::new();
        store.set(Some("k"), SetValue::Int(5)).unwrap();

        store.set(Some("k"), SetValue::Str("hi")).unwrap();
        let entry = store.find(Some("k")).unwrap();
        assert_eq!(entry.ty(), ConfigType::Str);
        assert_eq!(entry.as_str().unwrap(), "hi");

        store.set(Some("k"), SetValue::Int(9)).unwrap();
        let entry = store.find(Some("k")).unwrap();
        assert_eq!(entry.ty(), ConfigType::Int);
        assert_eq!(entry.as_int().unwrap(), 9);
        assert_eq!(entry.value().buffer_capacity(), 0);

        assert_eq!(store.len(), 1);
        assert_eq!(store.spare_len(), 0);
    }

    #[test]
    fn test_reset_all() {
        let mut store = ConfigStore::new();
        for key in ["a", "b", "c"] {
            store.set(Some(key), SetValue::UInt(1)).unwrap();
        }
        store.set(None, SetValue::Void).unwrap();

        assert!(store.find(None).is_none());
        assert!(store.is_empty());
        assert_eq!(store.spare_len(), 3);
    }

    #[test]
    fn test_keyless_value_rejected() {
        let mut store = ConfigStore::new();
        store.set(Some("a"), SetValue::Int(1)).unwrap();
        assert_eq!(store.set(None, SetValue::Int(2)), Err(StoreError::MissingKey));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete_one() {
        let mut store = ConfigStore::new();
        store.set(Some("a"), SetValue::Str("x")).unwrap();
        store.set(Some("b"), SetValue::Int(2)).unwrap();

        store.set(Some("a"), SetValue::Void).unwrap();
        assert!(store.find(Some("a")).is_none());
        assert_eq!(store.find(None).unwrap().key(), "b");
        assert_eq!(store.spare_len(), 1);

        // Deleting an absent key is a no-op.
        store.set(Some("zzz"), SetValue::Void).unwrap();
        assert!(!store.remove("zzz"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_iteration_order() {
        let mut store = ConfigStore::new();
        for key in ["b", "a", "c"] {
            store.set(Some(key), SetValue::Int(0)).unwrap();
        }
        assert_eq!(keys(&store), vec!["a", "b", "c"]);

        let via_iter: Vec<_> = store.iter().map(|e| e.key().to_string()).collect();
        assert_eq!(via_iter, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_next_past_end_and_missing_prev() {
        let mut store = ConfigStore::new();
        store.set(Some("a"), SetValue::Int(0)).unwrap();
        store.set(Some("c"), SetValue::Int(0)).unwrap();

        assert!(store.next(Some("c")).is_none());
        assert_eq!(store.next(Some("b")).unwrap().key(), "c");
        assert!(ConfigStore::new().next(None).is_none());
    }

    #[test]
    fn test_bytewise_ordering() {
        let mut store = ConfigStore::new();
        for key in ["b", "B", "a", "ab", ""] {
            store.set(Some(key), SetValue::Int(0)).unwrap();
        }
        assert_eq!(keys(&store), vec!["", "B", "a", "ab", "b"]);
    }

    #[test]
    fn test_blob_buffer_reused() {
        let mut store = ConfigStore::new();
        store.set(Some("k"), SetValue::Blob(&[7u8; 64])).unwrap();
        let cap = store.get("k").unwrap().buffer_capacity();
        assert!(cap >= 64);

        store.set(Some("k"), SetValue::Str("short")).unwrap();
        let value = store.get("k").unwrap();
        assert_eq!(value.as_str().unwrap(), "short");
        assert_eq!(value.buffer_capacity(), cap);

        store.set(Some("k"), SetValue::Blob(&[])).unwrap();
        assert_eq!(store.get("k").unwrap().as_blob().unwrap(), &[] as &[u8]);
    }

    #[test]
    fn test_record_recycled_on_reinsert() {
        let mut store = ConfigStore::with_capacity(1).unwrap();
        assert_eq!(store.spare_len(), 1);

        store.set(Some("first"), SetValue::Long(1)).unwrap();
        assert_eq!(store.spare_len(), 0);
        store.remove("first");
        assert_eq!(store.spare_len(), 1);

        store.set(Some("second"), SetValue::Long(2)).unwrap();
        assert_eq!(store.spare_len(), 0);
        assert_eq!(store.find(Some("second")).unwrap().as_long().unwrap(), 2);
        assert!(store.find(Some("first")).is_none());
    }

    #[test]
    fn test_typed_accessors() {
        let mut store = ConfigStore::new();
        store.set(Some("u"), SetValue::UInt(7)).unwrap();
        store.set(Some("ul"), SetValue::ULong(u64::MAX)).unwrap();
        store.set(Some("d"), SetValue::Double(1.5)).unwrap();
        store.set(Some("p"), SetValue::Pointer(0xdead)).unwrap();

        assert_eq!(store.find(Some("u")).unwrap().as_uint().unwrap(), 7);
        assert_eq!(store.find(Some("ul")).unwrap().as_ulong().unwrap(), u64::MAX);
        assert_eq!(store.find(Some("d")).unwrap().as_double().unwrap(), 1.5);
        assert_eq!(store.find(Some("p")).unwrap().as_pointer().unwrap(), 0xdead);
        assert!(matches!(
            store.find(Some("d")).unwrap().as_int(),
            Err(StoreError::TypeMismatch {
                expected: ConfigType::Int,
                found: ConfigType::Double
            })
        ));
    }

    #[test]
    fn test_failed_parse_leaves_value() {
        let mut store = ConfigStore::new();
        store.set(Some("k"), SetValue::Int(3)).unwrap();

        let result = SetValue::parse(ConfigType::Int, "nope").and_then(|v| store.set(Some("k"), v));
        assert!(result.is_err());
        assert_eq!(store.find(Some("k")).unwrap().as_int().unwrap(), 3);
    }

    #[test]
    fn test_failed_insert_leaves_store_unchanged() {
        let mut store = ConfigStore::new();
        store.set(Some("a"), SetValue::Str("kept")).unwrap();
        store.entries.set_limit(Some(1));

        assert_eq!(
            store.set(Some("b"), SetValue::Str("new")),
            Err(StoreError::OutOfMemory)
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.spare_len(), 0);
        assert!(store.find(Some("b")).is_none());
        assert_eq!(store.find(Some("a")).unwrap().as_str().unwrap(), "kept");

        // Updates reuse the existing record and are unaffected by the limit.
        store.set(Some("a"), SetValue::Long(9)).unwrap();
        assert_eq!(store.find(Some("a")).unwrap().as_long().unwrap(), 9);

        // A record freed by delete is reused without growing.
        store.remove("a");
        store.set(Some("b"), SetValue::Int(1)).unwrap();
        assert_eq!(keys(&store), vec!["b"]);
    }

    #[test]
    fn test_teardown() {
        let mut store = ConfigStore::with_capacity(4).unwrap();
        store.set(Some("k"), SetValue::Str("v")).unwrap();
        store.teardown();
    }

    proptest! {
        #[test]
        fn prop_walk_is_sorted_and_unique(keys_in in proptest::collection::vec("[a-z]{0,6}", 0..40)) {
            let mut store = ConfigStore::new();
            for (i, key) in keys_in.iter().enumerate() {
                store.set(Some(key.as_str()), SetValue::Long(i as i64)).unwrap();
            }

            let mut expected: Vec<String> = keys_in.clone();
            expected.sort();
            expected.dedup();
            prop_assert_eq!(keys(&store), expected);

            // Last write wins.
            for (i, key) in keys_in.iter().enumerate() {
                if keys_in[i + 1..].iter().all(|k| k != key) {
                    prop_assert_eq!(store.find(Some(key.as_str())).unwrap().as_long().unwrap(), i as i64);
                }
            }
        }

        #[test]
        fn prop_removals_recycle(keys_in in proptest::collection::btree_set("[a-z]{1,4}", 1..20)) {
            let mut store = ConfigStore::new();
            for key in &keys_in {
                store.set(Some(key.as_str()), SetValue::Str(key.as_str())).unwrap();
            }
            for key in &keys_in {
                prop_assert!(store.remove(key));
            }
            prop_assert!(store.is_empty());
            prop_assert_eq!(store.spare_len(), keys_in.len());

            for key in &keys_in {
                store.set(Some(key.as_str()), SetValue::Int(1)).unwrap();
            }
            prop_assert_eq!(store.spare_len(), 0);
            prop_assert_eq!(store.len(), keys_in.len());
        }
    }
}
