use std::collections::BTreeMap;
use std::sync::RwLock;

use koi_types::bundle::Bundle;
use koi_types::rid::{Rid, RidType};

use crate::error::CacheError;
use crate::traits::Cache;

/// In-memory cache backed by a BTreeMap keyed on the RID's text form, so
/// listings come out in a stable order.
pub struct MemoryCache {
    data: RwLock<BTreeMap<String, Bundle>>,
}

impl MemoryCache {
    /// Create a new empty in-memory cache.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache for MemoryCache {
    fn read(&self, rid: &Rid) -> Result<Option<Bundle>, CacheError> {
        let data = self.data.read().map_err(|e| CacheError::ReadError {
            reason: e.to_string(),
        })?;
        Ok(data.get(&rid.to_string()).cloned())
    }

    fn write(&self, bundle: &Bundle) -> Result<(), CacheError> {
        let mut data = self.data.write().map_err(|e| CacheError::WriteError {
            reason: e.to_string(),
        })?;
        data.insert(bundle.rid().to_string(), bundle.clone());
        Ok(())
    }

    fn delete(&self, rid: &Rid) -> Result<bool, CacheError> {
        let mut data = self.data.write().map_err(|e| CacheError::WriteError {
            reason: e.to_string(),
        })?;
        Ok(data.remove(&rid.to_string()).is_some())
    }

    fn exists(&self, rid: &Rid) -> Result<bool, CacheError> {
        let data = self.data.read().map_err(|e| CacheError::ReadError {
            reason: e.to_string(),
        })?;
        Ok(data.contains_key(&rid.to_string()))
    }

    fn list_rids(&self, rid_types: &[RidType]) -> Result<Vec<Rid>, CacheError> {
        let data = self.data.read().map_err(|e| CacheError::ReadError {
            reason: e.to_string(),
        })?;
        Ok(data
            .values()
            .map(|bundle| bundle.rid().clone())
            .filter(|rid| rid_types.is_empty() || rid_types.contains(&rid.rid_type()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc_bundle(name: &str) -> Bundle {
        let rid: Rid = format!("orn:example.doc:{name}").parse().unwrap();
        Bundle::generate(rid, json!({"name": name}))
    }

    fn node_bundle(name: &str) -> Bundle {
        let rid: Rid = format!("orn:koi-net.node:{name}+{name}-uuid")
            .parse()
            .unwrap();
        Bundle::generate(rid, json!({"name": name}))
    }

    #[test]
    fn test_basic_crud() {
        let cache = MemoryCache::new();
        let bundle = doc_bundle("a");
        let rid = bundle.rid().clone();

        cache.write(&bundle).unwrap();
        assert!(cache.exists(&rid).unwrap());
        assert_eq!(cache.read(&rid).unwrap(), Some(bundle));

        assert!(cache.delete(&rid).unwrap());
        assert!(!cache.exists(&rid).unwrap());
        assert_eq!(cache.read(&rid).unwrap(), None);
    }

    #[test]
    fn test_write_replaces_revision() {
        let cache = MemoryCache::new();
        let rid: Rid = "orn:example.doc:a".parse().unwrap();
        let first = Bundle::generate(rid.clone(), json!({"v": 1}));
        let second = Bundle::generate(rid.clone(), json!({"v": 2}));

        cache.write(&first).unwrap();
        cache.write(&second).unwrap();
        assert_eq!(cache.read(&rid).unwrap(), Some(second));
    }

    #[test]
    fn test_delete_missing_returns_false() {
        let cache = MemoryCache::new();
        let rid: Rid = "orn:example.doc:a".parse().unwrap();
        assert!(!cache.delete(&rid).unwrap());
    }

    #[test]
    fn test_list_rids_by_type() {
        let cache = MemoryCache::new();
        cache.write(&doc_bundle("a")).unwrap();
        cache.write(&doc_bundle("b")).unwrap();
        cache.write(&node_bundle("n")).unwrap();

        let all = cache.list_rids(&[]).unwrap();
        assert_eq!(all.len(), 3);

        let nodes = cache.list_rids(&[RidType::Node]).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].rid_type(), RidType::Node);

        let docs = cache
            .list_rids(&[RidType::Other("example.doc".to_string())])
            .unwrap();
        assert_eq!(docs.len(), 2);
    }
}
