use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use koi_cache::traits::Cache;

use crate::config::NetConfig;
use crate::error::NetError;
use crate::graph::NetworkGraph;
use crate::handshake::Handshaker;
use crate::identity::NodeIdentity;
use crate::network::event_queue::{EventQueue, WebhookSignal};
use crate::network::outbox::Outbox;
use crate::network::poll_buffer::PollEventBuffer;
use crate::network::request::RequestHandler;
use crate::network::resolver::NetworkResolver;
use crate::network::response::ResponseHandler;
use crate::processor::context::HandlerContext;
use crate::processor::handlers::default_handlers;
use crate::processor::kobj::KnowledgeSource;
use crate::processor::pipeline::{KnowledgeHandler, KnowledgePipeline};
use crate::processor::queue::{KobjMsg, KobjQueue};
use crate::secure::SecureLayer;
use crate::sync::SyncManager;
use crate::workers::{EventWorker, KobjWorker};

/// The wired-together network core of a node.
///
/// Components are constructed statically, leaves first; `start` runs the
/// ordered startup sequence and `stop` the ordered shutdown.
pub struct NodeCore {
    pub identity: Arc<NodeIdentity>,
    pub cache: Arc<dyn Cache>,
    pub secure: Arc<SecureLayer>,
    pub graph: Arc<NetworkGraph>,
    pub request: Arc<RequestHandler>,
    pub response: Arc<ResponseHandler>,
    pub resolver: Arc<NetworkResolver>,
    pub poll_buffer: Arc<PollEventBuffer>,
    pub webhook_queue: Arc<EventQueue>,
    pub outbox: Arc<Outbox>,
    pub kobj_queue: KobjQueue,
    pub sync: Arc<SyncManager>,
    pub handshaker: Arc<Handshaker>,
    pub pipeline: Arc<KnowledgePipeline>,
    config: NetConfig,
    kobj_rx: Option<mpsc::UnboundedReceiver<KobjMsg>>,
    webhook_rx: Option<mpsc::UnboundedReceiver<WebhookSignal>>,
    workers: Vec<JoinHandle<()>>,
}

impl NodeCore {
    /// Wire the core together. `extra_handlers` are appended after the
    /// default handler set, in the given order.
    pub fn new(
        identity: NodeIdentity,
        cache: Arc<dyn Cache>,
        config: NetConfig,
        extra_handlers: Vec<Box<dyn KnowledgeHandler>>,
    ) -> Result<Self, NetError> {
        let identity = Arc::new(identity);

        let secure = Arc::new(SecureLayer::new(
            Arc::clone(&identity),
            Arc::clone(&cache),
            config.max_timestamp_skew,
        ));
        let graph = Arc::new(NetworkGraph::new(
            Arc::clone(&cache),
            identity.rid().clone(),
        ));
        let request = Arc::new(RequestHandler::new(
            Arc::clone(&cache),
            Arc::clone(&identity),
            Arc::clone(&secure),
            config.clone(),
        )?);
        let resolver = Arc::new(NetworkResolver::new(
            Arc::clone(&identity),
            Arc::clone(&graph),
            Arc::clone(&request),
            config.clone(),
        ));

        let poll_buffer = Arc::new(PollEventBuffer::new());
        let (webhook_queue, webhook_rx) = EventQueue::new();
        let webhook_queue = Arc::new(webhook_queue);
        let outbox = Arc::new(Outbox::new(
            Arc::clone(&identity),
            Arc::clone(&graph),
            Arc::clone(&webhook_queue),
            Arc::clone(&poll_buffer),
        ));

        let (kobj_queue, kobj_rx) = KobjQueue::new();
        let response = Arc::new(ResponseHandler::new(
            Arc::clone(&cache),
            kobj_queue.clone(),
            Arc::clone(&poll_buffer),
        ));
        let sync = Arc::new(SyncManager::new(
            Arc::clone(&identity),
            Arc::clone(&graph),
            Arc::clone(&request),
            kobj_queue.clone(),
        ));
        let handshaker = Arc::new(Handshaker::new(
            Arc::clone(&identity),
            Arc::clone(&cache),
            Arc::clone(&outbox),
            Arc::clone(&request),
        ));

        let ctx = Arc::new(HandlerContext {
            identity: Arc::clone(&identity),
            cache: Arc::clone(&cache),
            graph: Arc::clone(&graph),
            resolver: Arc::clone(&resolver),
            outbox: Arc::clone(&outbox),
            kobj_queue: kobj_queue.clone(),
            sync: Arc::clone(&sync),
            handshaker: Arc::clone(&handshaker),
        });
        let mut handlers = default_handlers();
        handlers.extend(extra_handlers);
        let pipeline = Arc::new(KnowledgePipeline::new(ctx, handlers));

        Ok(Self {
            identity,
            cache,
            secure,
            graph,
            request,
            response,
            resolver,
            poll_buffer,
            webhook_queue,
            outbox,
            kobj_queue,
            sync,
            handshaker,
            pipeline,
            config,
            kobj_rx: Some(kobj_rx),
            webhook_rx: Some(webhook_rx),
            workers: Vec::new(),
        })
    }

    /// Ordered startup: workers, graph, self re-ingest, queue drain, then
    /// catch-up with providers or first-contact handshake.
    pub async fn start(&mut self) -> Result<(), NetError> {
        info!(rid = %self.identity.rid(), "starting node core");

        let kobj_rx = self.kobj_rx.take().ok_or(NetError::ChannelClosed)?;
        self.workers
            .push(KobjWorker::spawn(Arc::clone(&self.pipeline), kobj_rx));

        let webhook_rx = self.webhook_rx.take().ok_or(NetError::ChannelClosed)?;
        self.workers.push(EventWorker::spawn(
            Arc::clone(&self.webhook_queue),
            Arc::clone(&self.request),
            Arc::clone(&self.handshaker),
            self.config.clone(),
            webhook_rx,
        ));

        self.graph.generate()?;

        // Re-ingest our own profile so a config change publishes an UPDATE.
        self.kobj_queue
            .push_bundle(self.identity.bundle()?, None, KnowledgeSource::Internal);
        self.kobj_queue.flush().await;

        if self.sync.catch_up_with_providers().await {
            return Ok(());
        }
        if let Some(first_contact) = self.config.first_contact.clone() {
            info!(target = %first_contact.rid, "no node providers, reaching out to first contact");
            if let Err(err) = self.handshaker.handshake_with(&first_contact.rid).await {
                warn!(%err, "failed to reach first contact");
            }
        }
        Ok(())
    }

    /// Ordered shutdown: sentinels to both workers, then join them.
    pub async fn stop(&mut self) {
        info!("stopping node core");
        self.kobj_queue.shutdown();
        self.webhook_queue.shutdown();
        for worker in self.workers.drain(..) {
            if let Err(err) = worker.await {
                warn!(%err, "worker join failed");
            }
        }
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }
}
