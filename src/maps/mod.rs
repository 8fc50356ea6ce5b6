/*!
 * Maps
 * Key/value map collaborator consumed by policies and the loader
 *
 * Maps are kernel-owned storage; this host only uses `get`/`put` plus the
 * capacity and eviction metadata. Keys and values travel as raw bytes so the
 * loader can check layouts the same way for every map, and `TypedMap` puts a
 * fixed-width view on top.
 */

mod store;
mod typed;

pub use store::{HashStore, LruStore};
pub use typed::{MapPod, TypedMap};

use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Runtime-reported map kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapKind {
    /// Plain hash map, inserts fail once full
    Hash,
    /// Hash map evicting least-recently-used entries once full
    LruHash,
    /// Fixed-size array indexed by u32
    Array,
    /// Holds a struct-ops implementation (e.g. a scheduler)
    StructOps,
}

impl MapKind {
    pub fn eviction(&self) -> EvictionPolicy {
        match self {
            MapKind::LruHash => EvictionPolicy::Lru,
            _ => EvictionPolicy::None,
        }
    }
}

impl fmt::Display for MapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MapKind::Hash => "hash",
            MapKind::LruHash => "lru_hash",
            MapKind::Array => "array",
            MapKind::StructOps => "struct_ops",
        };
        f.write_str(name)
    }
}

/// What a full map does with a new key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    None,
    Lru,
}

/// Byte-level map operations
pub trait MapStore: Send + Sync {
    /// Look up a key; a miss is `None`, never an error
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Insert or overwrite a key
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), Errno>;

    /// Remove a key, returning whether it was present
    fn delete(&self, key: &[u8]) -> bool;

    /// Maximum number of entries
    fn capacity(&self) -> u32;

    fn eviction(&self) -> EvictionPolicy;

    /// Approximate number of entries
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build the store backing a map of the given kind
pub fn new_store(
    kind: MapKind,
    key_size: u32,
    value_size: u32,
    max_entries: u32,
) -> Arc<dyn MapStore> {
    match kind {
        MapKind::LruHash => Arc::new(LruStore::new(key_size, value_size, max_entries)),
        _ => Arc::new(HashStore::new(key_size, value_size, max_entries)),
    }
}
