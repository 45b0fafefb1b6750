use std::sync::Arc;

use koi_types::bundle::Bundle;
use koi_types::rid::{Rid, RidType};

use crate::error::CacheError;

/// Persistent RID → bundle store. The cache is the node's source of truth;
/// every derived structure (the network graph included) is rebuilt from it.
///
/// Implementations must be safe for concurrent readers; the node keeps all
/// writes on a single task.
pub trait Cache: Send + Sync {
    /// Read the current revision of a RID, if cached.
    fn read(&self, rid: &Rid) -> Result<Option<Bundle>, CacheError>;

    /// Write (insert or replace) a revision.
    fn write(&self, bundle: &Bundle) -> Result<(), CacheError>;

    /// Delete a RID. Returns whether a revision was present.
    fn delete(&self, rid: &Rid) -> Result<bool, CacheError>;

    /// Whether a RID is cached.
    fn exists(&self, rid: &Rid) -> Result<bool, CacheError>;

    /// List cached RIDs, filtered by type. An empty filter lists everything.
    fn list_rids(&self, rid_types: &[RidType]) -> Result<Vec<Rid>, CacheError>;
}

/// Blanket implementation for `Arc<C>` so a cache can be shared across the
/// node's subsystems.
impl<C: Cache + ?Sized> Cache for Arc<C> {
    fn read(&self, rid: &Rid) -> Result<Option<Bundle>, CacheError> {
        (**self).read(rid)
    }

    fn write(&self, bundle: &Bundle) -> Result<(), CacheError> {
        (**self).write(bundle)
    }

    fn delete(&self, rid: &Rid) -> Result<bool, CacheError> {
        (**self).delete(rid)
    }

    fn exists(&self, rid: &Rid) -> Result<bool, CacheError> {
        (**self).exists(rid)
    }

    fn list_rids(&self, rid_types: &[RidType]) -> Result<Vec<Rid>, CacheError> {
        (**self).list_rids(rid_types)
    }
}
