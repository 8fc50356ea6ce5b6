/*!
 * Map Stores
 * Bounded hash storage with and without LRU eviction
 */

use super::{EvictionPolicy, MapStore};
use ahash::RandomState;
use dashmap::DashMap;
use moka::policy::EvictionPolicy as CachePolicy;
use moka::sync::Cache;
use nix::errno::Errno;

fn check_sizes(key: &[u8], key_size: u32, value: Option<&[u8]>, value_size: u32) -> Result<(), Errno> {
    if key.len() != key_size as usize {
        return Err(Errno::EINVAL);
    }
    match value {
        Some(v) if v.len() != value_size as usize => Err(Errno::EINVAL),
        _ => Ok(()),
    }
}

/// Plain hash map: new keys are rejected with `E2BIG` once full
pub struct HashStore {
    entries: DashMap<Vec<u8>, Vec<u8>, RandomState>,
    key_size: u32,
    value_size: u32,
    max_entries: u32,
}

impl HashStore {
    pub fn new(key_size: u32, value_size: u32, max_entries: u32) -> Self {
        Self {
            entries: DashMap::with_hasher(RandomState::new()),
            key_size,
            value_size,
            max_entries,
        }
    }
}

impl MapStore for HashStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), Errno> {
        check_sizes(key, self.key_size, Some(value), self.value_size)?;
        if let Some(mut existing) = self.entries.get_mut(key) {
            existing.value_mut().copy_from_slice(value);
            return Ok(());
        }
        if self.entries.len() >= self.max_entries as usize {
            return Err(Errno::E2BIG);
        }
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.entries.remove(key).is_some()
    }

    fn capacity(&self) -> u32 {
        self.max_entries
    }

    fn eviction(&self) -> EvictionPolicy {
        EvictionPolicy::None
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// LRU hash map: inserting into a full map evicts the least-recently-used entry
///
/// Eviction is approximate, matching the kernel's per-CPU LRU lists: the map
/// may briefly hold more than `capacity` entries before maintenance runs.
pub struct LruStore {
    cache: Cache<Vec<u8>, Vec<u8>>,
    key_size: u32,
    value_size: u32,
    max_entries: u32,
}

impl LruStore {
    pub fn new(key_size: u32, value_size: u32, max_entries: u32) -> Self {
        let cache = Cache::builder()
            .max_capacity(u64::from(max_entries))
            .eviction_policy(CachePolicy::lru())
            .build();
        Self {
            cache,
            key_size,
            value_size,
            max_entries,
        }
    }
}

impl MapStore for LruStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.cache.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), Errno> {
        check_sizes(key, self.key_size, Some(value), self.value_size)?;
        self.cache.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.cache.remove(key).is_some()
    }

    fn capacity(&self) -> u32 {
        self.max_entries
    }

    fn eviction(&self) -> EvictionPolicy {
        EvictionPolicy::Lru
    }

    fn len(&self) -> usize {
        self.cache.run_pending_tasks();
        self.cache.entry_count() as usize
    }
}
