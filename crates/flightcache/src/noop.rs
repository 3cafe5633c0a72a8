//! Pass-through cache implementation

use crate::cache::Cache;
use crate::error::{Error, Result};

/// A [`Cache`] that retains nothing.
///
/// Every `get` invokes the loader; `put` and the invalidation methods do
/// nothing. Useful where caching must be disabled without changing the
/// calling code.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl NoopCache {
    /// Create a no-op cache.
    pub fn new() -> Self {
        Self
    }
}

impl<K, V> Cache<K, V> for NoopCache {
    fn get<F, E>(&self, key: &K, loader: F) -> Result<V>
    where
        F: FnOnce(&K) -> std::result::Result<V, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loader(key).map_err(Error::load)
    }

    fn put(&self, _key: K, _value: V) {}

    fn invalidate(&self, _key: &K) {}

    fn invalidate_keys<I>(&self, _keys: I)
    where
        I: IntoIterator<Item = K>,
    {
    }

    fn invalidate_all(&self) {}
}
