/*!
 * Typed Map View
 * Fixed-width key/value access on top of a byte-level store
 */

use super::{EvictionPolicy, MapStore};
use nix::errno::Errno;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Plain-old-data values storable in a map
pub trait MapPod: Copy + Send + Sync + 'static {
    /// Encoded width in bytes
    const SIZE: u32;

    fn encode(&self) -> Vec<u8>;

    fn decode(bytes: &[u8]) -> Option<Self>;
}

macro_rules! impl_map_pod {
    ($($ty:ty),*) => {
        $(
            impl MapPod for $ty {
                const SIZE: u32 = std::mem::size_of::<$ty>() as u32;

                #[inline]
                fn encode(&self) -> Vec<u8> {
                    self.to_ne_bytes().to_vec()
                }

                #[inline]
                fn decode(bytes: &[u8]) -> Option<Self> {
                    bytes.try_into().ok().map(<$ty>::from_ne_bytes)
                }
            }
        )*
    };
}

impl_map_pod!(u32, u64, i32, i64);

/// Map handle with typed keys and values
pub struct TypedMap<K: MapPod, V: MapPod> {
    name: String,
    store: Arc<dyn MapStore>,
    _types: PhantomData<fn(K) -> V>,
}

impl<K: MapPod, V: MapPod> TypedMap<K, V> {
    /// Wrap a store whose layout has already been checked
    pub fn new(name: impl Into<String>, store: Arc<dyn MapStore>) -> Self {
        Self {
            name: name.into(),
            store,
            _types: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a value; a miss is `None`
    #[inline]
    pub fn get(&self, key: &K) -> Option<V> {
        self.store.get(&key.encode()).and_then(|bytes| V::decode(&bytes))
    }

    #[inline]
    pub fn put(&self, key: &K, value: &V) -> Result<(), Errno> {
        self.store.put(&key.encode(), &value.encode())
    }

    #[inline]
    pub fn delete(&self, key: &K) -> bool {
        self.store.delete(&key.encode())
    }

    pub fn capacity(&self) -> u32 {
        self.store.capacity()
    }

    pub fn eviction(&self) -> EvictionPolicy {
        self.store.eviction()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl<K: MapPod, V: MapPod> Clone for TypedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            store: Arc::clone(&self.store),
            _types: PhantomData,
        }
    }
}

impl<K: MapPod, V: MapPod> fmt::Debug for TypedMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedMap")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("eviction", &self.eviction())
            .finish()
    }
}
