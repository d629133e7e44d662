//! Composite `(type, id)` keys for a tenant's object store.
//!
//! Keys order by object type first, then id, so every entry of one type
//! sits in a contiguous range of the store's `BTreeMap`. Reading a whole
//! type is a range scan starting at [`CacheKey::type_start`].

use meridian_core::ObjectType;
use std::fmt;

/// Key of one entry within a single tenant's store.
///
/// Stores are already partitioned per tenant, so the key carries no tenant
/// id; a key from one tenant's store is meaningless in another's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    inner: CacheKeyInner,
}

/// Field order defines the sort order: type, then id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct CacheKeyInner {
    object_type: ObjectType,
    id: String,
}

impl CacheKey {
    pub fn new(object_type: ObjectType, id: impl Into<String>) -> Self {
        Self {
            inner: CacheKeyInner {
                object_type,
                id: id.into(),
            },
        }
    }

    pub fn object_type(&self) -> ObjectType {
        self.inner.object_type
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Smallest key of `object_type`; the empty id sorts before all others.
    pub fn type_start(object_type: ObjectType) -> Self {
        Self::new(object_type, String::new())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.inner.object_type, self.inner.id)
    }
}
