use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use koi_types::rid::NodeRid;

use crate::config::NetConfig;
use crate::error::NetError;
use crate::handshake::Handshaker;
use crate::network::event_queue::{EventQueue, WebhookSignal};
use crate::network::request::RequestHandler;
use crate::processor::pipeline::KnowledgePipeline;
use crate::processor::queue::KobjMsg;

/// Drains the knowledge object queue into the pipeline. The sole cache
/// writer in the node.
pub struct KobjWorker;

impl KobjWorker {
    pub fn spawn(
        pipeline: Arc<KnowledgePipeline>,
        mut rx: mpsc::UnboundedReceiver<KobjMsg>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("knowledge worker started");
            while let Some(msg) = rx.recv().await {
                match msg {
                    KobjMsg::Kobj(kobj) => {
                        if let Err(err) = pipeline.process(*kobj).await {
                            warn!(%err, "pipeline failed for knowledge object");
                        }
                    }
                    KobjMsg::Flush(ack) => {
                        let _ = ack.send(());
                    }
                    KobjMsg::Shutdown => {
                        info!("knowledge worker received shutdown sentinel");
                        break;
                    }
                }
            }
        })
    }
}

/// Drains per-peer webhook queues and posts event batches. The sole sender
/// of webhook broadcasts.
///
/// A transport failure puts the batch back (FIFO preserved), bumps the
/// peer's failure counter, and schedules a delayed retry; crossing the
/// failure threshold drops the backlog and falls back to a fresh handshake
/// instead of reconnecting forever. Protocol (4xx) rejections are never
/// retried.
pub struct EventWorker;

impl EventWorker {
    pub fn spawn(
        queue: Arc<EventQueue>,
        request: Arc<RequestHandler>,
        handshaker: Arc<Handshaker>,
        config: NetConfig,
        mut rx: mpsc::UnboundedReceiver<WebhookSignal>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("event worker started");
            let mut failures: HashMap<NodeRid, u32> = HashMap::new();

            while let Some(signal) = rx.recv().await {
                let peer = match signal {
                    WebhookSignal::Deliver(peer) => peer,
                    WebhookSignal::Shutdown => {
                        info!("event worker received shutdown sentinel");
                        break;
                    }
                };

                let events = queue.drain(&peer);
                if events.is_empty() {
                    continue;
                }

                debug!(count = events.len(), %peer, "delivering event batch");
                match request.broadcast_events(&peer, events.clone()).await {
                    Ok(()) => {
                        failures.remove(&peer);
                    }
                    Err(NetError::Transport { reason }) => {
                        queue.requeue_front(&peer, events);
                        let count = failures.entry(peer.clone()).or_insert(0);
                        *count += 1;
                        warn!(%peer, %reason, failures = *count, "broadcast failed, batch requeued");

                        if *count >= config.retry_threshold {
                            let dropped = queue.drain(&peer).len();
                            warn!(%peer, dropped, "failure threshold reached, falling back to handshake");
                            failures.remove(&peer);
                            if let Err(err) = handshaker.handshake_with(&peer).await {
                                warn!(%peer, %err, "recovery handshake failed");
                            }
                        } else {
                            let retry_in = Duration::from_secs(config.retry_interval);
                            let queue = Arc::clone(&queue);
                            let peer = peer.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(retry_in).await;
                                queue.notify(&peer);
                            });
                        }
                    }
                    Err(err) => {
                        warn!(%peer, %err, count = events.len(), "broadcast rejected, dropping batch");
                        failures.remove(&peer);
                    }
                }
            }
        })
    }
}
