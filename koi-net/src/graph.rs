use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::warn;

use koi_cache::traits::Cache;
use koi_types::edge::EdgeProfile;
use koi_types::node::{NodeProfile, NodeType};
use koi_types::rid::{EdgeRid, NodeRid, Rid, RidType};

use crate::error::NetError;

/// Edge direction relative to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Both,
}

#[derive(Default)]
struct GraphSnapshot {
    nodes: HashSet<NodeRid>,
    /// `(source, target)` → the edge bundle's RID and profile.
    edges: HashMap<(NodeRid, NodeRid), (EdgeRid, EdgeProfile)>,
}

/// Directed graph of nodes and subscription edges, derived from the cache's
/// node and edge bundles.
///
/// The graph is a pure index: `generate` rebuilds a fresh snapshot from the
/// cache and swaps it in atomically, so readers always observe a consistent
/// topology. Edges whose endpoints are not both cached are excluded.
pub struct NetworkGraph {
    cache: Arc<dyn Cache>,
    self_rid: NodeRid,
    snapshot: RwLock<Arc<GraphSnapshot>>,
}

impl NetworkGraph {
    pub fn new(cache: Arc<dyn Cache>, self_rid: NodeRid) -> Self {
        Self {
            cache,
            self_rid,
            snapshot: RwLock::new(Arc::new(GraphSnapshot::default())),
        }
    }

    fn current(&self) -> Arc<GraphSnapshot> {
        self.snapshot
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_default()
    }

    /// Rebuild the graph from the cache and swap in the new snapshot.
    pub fn generate(&self) -> Result<(), NetError> {
        let mut next = GraphSnapshot::default();

        for rid in self.cache.list_rids(&[RidType::Node])? {
            if let Rid::Node(node) = rid {
                next.nodes.insert(node);
            }
        }

        for rid in self.cache.list_rids(&[RidType::Edge])? {
            let Rid::Edge(edge_rid) = rid else { continue };
            let Some(bundle) = self.cache.read(&Rid::Edge(edge_rid.clone()))? else {
                continue;
            };
            let profile: EdgeProfile = match bundle.validate_contents() {
                Ok(profile) => profile,
                Err(err) => {
                    warn!(edge = %edge_rid, %err, "skipping malformed edge bundle");
                    continue;
                }
            };
            // An edge is only live while both endpoints exist.
            if !next.nodes.contains(&profile.source) || !next.nodes.contains(&profile.target) {
                continue;
            }
            next.edges.insert(
                (profile.source.clone(), profile.target.clone()),
                (edge_rid, profile),
            );
        }

        if let Ok(mut guard) = self.snapshot.write() {
            *guard = Arc::new(next);
        }
        Ok(())
    }

    /// Read a node's profile from the cache.
    pub fn get_node_profile(&self, rid: &NodeRid) -> Result<Option<NodeProfile>, NetError> {
        match self.cache.read(&Rid::Node(rid.clone()))? {
            Some(bundle) => Ok(Some(bundle.validate_contents()?)),
            None => Ok(None),
        }
    }

    /// The edge profile attached to the arc `source → target`, if any.
    pub fn get_edge_profile(&self, source: &NodeRid, target: &NodeRid) -> Option<EdgeProfile> {
        self.current()
            .edges
            .get(&(source.clone(), target.clone()))
            .map(|(_, profile)| profile.clone())
    }

    /// Neighbors of this node. `allowed_type` keeps only neighbors whose
    /// connecting edge carries that RID type.
    pub fn get_neighbors(
        &self,
        direction: Direction,
        allowed_type: Option<&RidType>,
    ) -> Vec<NodeRid> {
        let snapshot = self.current();
        let mut neighbors = HashSet::new();

        for ((source, target), (_, profile)) in snapshot.edges.iter() {
            if let Some(rid_type) = allowed_type {
                if !profile.carries(rid_type) {
                    continue;
                }
            }
            let outgoing = source == &self.self_rid;
            let incoming = target == &self.self_rid;
            match direction {
                Direction::Out if outgoing => neighbors.insert(target.clone()),
                Direction::In if incoming => neighbors.insert(source.clone()),
                Direction::Both if outgoing => neighbors.insert(target.clone()),
                Direction::Both if incoming => neighbors.insert(source.clone()),
                _ => false,
            };
        }

        neighbors.into_iter().collect()
    }

    /// Full nodes whose profile offers state for the given RID type.
    pub fn get_state_providers(&self, rid_type: &RidType) -> Result<Vec<NodeRid>, NetError> {
        let mut providers = Vec::new();
        for rid in self.cache.list_rids(&[RidType::Node])? {
            let Rid::Node(node) = rid else { continue };
            let Some(profile) = self.get_node_profile(&node)? else {
                continue;
            };
            if profile.node_type == NodeType::Full && profile.provides.state.contains(rid_type) {
                providers.push(node);
            }
        }
        Ok(providers)
    }

    /// All nodes currently in the graph.
    pub fn nodes(&self) -> Vec<NodeRid> {
        self.current().nodes.iter().cloned().collect()
    }

    /// All arcs currently in the graph, as `(source, target)` pairs.
    pub fn arcs(&self) -> Vec<(NodeRid, NodeRid)> {
        self.current().edges.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koi_cache::memory::MemoryCache;
    use koi_types::bundle::Bundle;
    use koi_types::edge::{EdgeStatus, EdgeType};
    use serde_json::json;

    fn node_rid(name: &str) -> NodeRid {
        NodeRid {
            name: name.to_string(),
            uuid: format!("{name}-uuid"),
        }
    }

    fn write_node(cache: &MemoryCache, name: &str) -> NodeRid {
        let rid = node_rid(name);
        let profile = NodeProfile {
            base_url: Some(format!("http://{name}.test")),
            node_type: NodeType::Full,
            provides: koi_types::node::NodeProvides {
                event: vec![RidType::Node],
                state: vec![RidType::Node],
            },
            public_key: "AA".to_string(),
        };
        let bundle = Bundle::generate(
            Rid::Node(rid.clone()),
            serde_json::to_value(&profile).unwrap(),
        );
        cache.write(&bundle).unwrap();
        rid
    }

    fn write_edge(
        cache: &MemoryCache,
        source: &NodeRid,
        target: &NodeRid,
        rid_types: Vec<RidType>,
    ) -> EdgeRid {
        let rid = EdgeRid::generate(format!("{}->{}", source.name, target.name));
        let profile = EdgeProfile {
            source: source.clone(),
            target: target.clone(),
            edge_type: EdgeType::Webhook,
            rid_types,
            status: EdgeStatus::Approved,
        };
        let bundle = Bundle::generate(
            Rid::Edge(rid.clone()),
            serde_json::to_value(&profile).unwrap(),
        );
        cache.write(&bundle).unwrap();
        rid
    }

    fn build_graph(cache: Arc<MemoryCache>, self_rid: &NodeRid) -> NetworkGraph {
        let graph = NetworkGraph::new(cache, self_rid.clone());
        graph.generate().unwrap();
        graph
    }

    #[test]
    fn test_generate_indexes_nodes_and_edges() {
        let cache = Arc::new(MemoryCache::new());
        let me = write_node(&cache, "me");
        let peer = write_node(&cache, "peer");
        write_edge(&cache, &me, &peer, vec![RidType::Node]);

        let graph = build_graph(cache, &me);
        assert_eq!(graph.nodes().len(), 2);
        assert_eq!(graph.arcs(), vec![(me.clone(), peer.clone())]);
        assert!(graph.get_edge_profile(&me, &peer).is_some());
        assert!(graph.get_edge_profile(&peer, &me).is_none());
    }

    #[test]
    fn test_edge_without_endpoint_excluded() {
        let cache = Arc::new(MemoryCache::new());
        let me = write_node(&cache, "me");
        let ghost = node_rid("ghost");
        write_edge(&cache, &me, &ghost, vec![RidType::Node]);

        let graph = build_graph(cache, &me);
        assert!(graph.arcs().is_empty());
    }

    #[test]
    fn test_neighbors_by_direction() {
        let cache = Arc::new(MemoryCache::new());
        let me = write_node(&cache, "me");
        let upstream = write_node(&cache, "up");
        let downstream = write_node(&cache, "down");
        write_edge(&cache, &upstream, &me, vec![RidType::Node]);
        write_edge(&cache, &me, &downstream, vec![RidType::Edge]);

        let graph = build_graph(cache, &me);
        assert_eq!(graph.get_neighbors(Direction::In, None), vec![upstream.clone()]);
        assert_eq!(
            graph.get_neighbors(Direction::Out, None),
            vec![downstream.clone()]
        );
        assert_eq!(graph.get_neighbors(Direction::Both, None).len(), 2);

        // Type filter follows the edge's rid_types.
        assert_eq!(
            graph.get_neighbors(Direction::In, Some(&RidType::Node)),
            vec![upstream]
        );
        assert!(graph
            .get_neighbors(Direction::In, Some(&RidType::Edge))
            .is_empty());
    }

    #[test]
    fn test_derivation_follows_cache() {
        let cache = Arc::new(MemoryCache::new());
        let me = write_node(&cache, "me");
        let peer = write_node(&cache, "peer");
        write_edge(&cache, &me, &peer, vec![RidType::Node]);

        let graph = build_graph(Arc::clone(&cache), &me);
        assert_eq!(graph.arcs().len(), 1);

        // Forget the peer: after regeneration the arc is gone.
        cache.delete(&Rid::Node(peer)).unwrap();
        graph.generate().unwrap();
        assert!(graph.arcs().is_empty());
        assert_eq!(graph.nodes().len(), 1);
    }

    #[test]
    fn test_state_providers() {
        let cache = Arc::new(MemoryCache::new());
        let me = write_node(&cache, "me");
        write_node(&cache, "provider");

        // A partial node never provides state.
        let partial_rid = node_rid("partial");
        let partial = NodeProfile {
            base_url: None,
            node_type: NodeType::Partial,
            provides: koi_types::node::NodeProvides {
                event: vec![],
                state: vec![RidType::Node],
            },
            public_key: "AA".to_string(),
        };
        cache
            .write(&Bundle::generate(
                Rid::Node(partial_rid),
                serde_json::to_value(&partial).unwrap(),
            ))
            .unwrap();

        let graph = build_graph(cache, &me);
        let providers = graph.get_state_providers(&RidType::Node).unwrap();
        // "me" and "provider" are full state providers; "partial" is not.
        assert_eq!(providers.len(), 2);
        assert!(providers.iter().all(|p| p.name != "partial"));

        assert!(graph
            .get_state_providers(&RidType::Other("example.doc".to_string()))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_malformed_edge_bundle_skipped() {
        let cache = Arc::new(MemoryCache::new());
        let me = write_node(&cache, "me");
        let edge_rid = EdgeRid::generate("junk");
        cache
            .write(&Bundle::generate(Rid::Edge(edge_rid), json!("not an edge")))
            .unwrap();

        let graph = build_graph(cache, &me);
        assert!(graph.arcs().is_empty());
    }
}
