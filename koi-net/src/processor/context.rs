use std::sync::Arc;

use koi_cache::traits::Cache;

use crate::graph::NetworkGraph;
use crate::handshake::Handshaker;
use crate::identity::NodeIdentity;
use crate::network::outbox::Outbox;
use crate::network::resolver::NetworkResolver;
use crate::processor::queue::KobjQueue;
use crate::sync::SyncManager;

/// Everything a knowledge handler may touch.
///
/// Handlers run on the knowledge worker, the only task that mutates the
/// cache, so cache access here never races other writers.
pub struct HandlerContext {
    pub identity: Arc<NodeIdentity>,
    pub cache: Arc<dyn Cache>,
    pub graph: Arc<NetworkGraph>,
    pub resolver: Arc<NetworkResolver>,
    pub outbox: Arc<Outbox>,
    pub kobj_queue: KobjQueue,
    pub sync: Arc<SyncManager>,
    pub handshaker: Arc<Handshaker>,
}

impl HandlerContext {
    /// The freshest bundle of this node's own profile: the cached revision
    /// when one exists, a newly stamped one otherwise.
    pub fn self_bundle(&self) -> Result<koi_types::bundle::Bundle, crate::error::NetError> {
        use koi_types::rid::Rid;
        if let Some(bundle) = self.cache.read(&Rid::Node(self.identity.rid().clone()))? {
            return Ok(bundle);
        }
        self.identity.bundle()
    }
}
