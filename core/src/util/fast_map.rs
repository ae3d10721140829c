use std::sync::Arc;

pub type FastHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// Interned-name keyed table used by the type registry and property tables.
pub type NameMap<V> = FastHashMap<Arc<str>, V>;

#[inline]
pub fn fast_hash_map_new<K, V>() -> FastHashMap<K, V> {
    rustc_hash::FxHashMap::default()
}

#[inline]
pub fn fast_hash_map_with_capacity<K, V>(capacity: usize) -> FastHashMap<K, V> {
    rustc_hash::FxHashMap::with_capacity_and_hasher(capacity, Default::default())
}
