use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::network::resolver::NetworkResolver;
use crate::processor::kobj::KnowledgeSource;
use crate::processor::queue::KobjQueue;

/// Timed poll loop for partial nodes: pulls buffered events from
/// in-neighbors and feeds them into the pipeline.
pub struct Poller;

impl Poller {
    /// Spawn the poll loop. Flip the watch channel to `true` to stop it.
    pub fn spawn(
        resolver: Arc<NetworkResolver>,
        kobj_queue: KobjQueue,
        interval_secs: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs, "poller started");
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("poller stopping");
                            break;
                        }
                        continue;
                    }
                }

                for (peer, events) in resolver.poll_neighbors().await {
                    debug!(count = events.len(), %peer, "queueing polled events");
                    for event in events {
                        kobj_queue.push_event(
                            event,
                            KnowledgeSource::External { peer: peer.clone() },
                        );
                    }
                }
            }
        })
    }
}
