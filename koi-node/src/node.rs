use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use koi_cache::memory::MemoryCache;
use koi_cache::sqlite::SqliteCache;
use koi_cache::traits::Cache;
use koi_crypto::keys::Keypair;
use koi_crypto::keystore;
use koi_net::identity::NodeIdentity;
use koi_net::lifecycle::NodeCore;
use koi_net::poller::Poller;
use koi_net::processor::pipeline::KnowledgeHandler;
use koi_types::node::{NodeProfile, NodeType};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::server::{router, ServerState};

/// The assembled node: network core plus, depending on the node type, the
/// HTTP server (full) or the poll loop (partial).
pub struct Node {
    config: NodeConfig,
    core: NodeCore,
    local_addr: Option<SocketAddr>,
    server_handle: Option<JoinHandle<()>>,
    server_shutdown: Option<watch::Sender<bool>>,
    poller_handle: Option<JoinHandle<()>>,
    poller_shutdown: Option<watch::Sender<bool>>,
}

/// Create a cache backend from the node configuration.
fn create_cache(config: &NodeConfig) -> Result<Arc<dyn Cache>, NodeError> {
    match config.cache.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryCache::new())),
        "sqlite" => {
            if let Some(parent) = Path::new(&config.cache.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Ok(Arc::new(SqliteCache::new(&config.cache.path)?))
        }
        other => Err(NodeError::ConfigError {
            reason: format!("unknown cache backend '{}'", other),
        }),
    }
}

/// Load the node's keypair, generating and persisting a fresh one on first
/// run.
fn load_or_create_keypair(config: &NodeConfig) -> Result<Keypair, NodeError> {
    let path = Path::new(&config.private_key_path);
    let password = config.key_password();
    if path.exists() {
        Ok(keystore::load_private_key(path, password.as_deref())?)
    } else {
        info!(path = %path.display(), "generating new node key");
        let keypair = Keypair::generate();
        keystore::save_private_key(path, &keypair, password.as_deref())?;
        Ok(keypair)
    }
}

impl Node {
    /// Build a node from its configuration: cache, identity, and the wired
    /// network core. `extra_handlers` extend the default pipeline.
    pub fn new(
        config: NodeConfig,
        extra_handlers: Vec<Box<dyn KnowledgeHandler>>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let cache = create_cache(&config)?;
        let keypair = load_or_create_keypair(&config)?;

        let profile = NodeProfile {
            base_url: config.base_url.clone(),
            node_type: config.node_type,
            provides: config.provides.clone(),
            public_key: String::new(),
        };
        let identity = NodeIdentity::new(&config.node_name, keypair, profile)?;
        info!(rid = %identity.rid(), "node identity loaded");

        let core = NodeCore::new(identity, cache, config.koi_net.clone(), extra_handlers)?;
        Ok(Self {
            config,
            core,
            local_addr: None,
            server_handle: None,
            server_shutdown: None,
            poller_handle: None,
            poller_shutdown: None,
        })
    }

    /// Start the node: bind the server (full nodes) so peers can answer our
    /// bootstrap traffic, run the core lifecycle, then the poller (partial
    /// nodes).
    pub async fn start(&mut self) -> Result<(), NodeError> {
        if self.config.node_type == NodeType::Full {
            self.start_server().await?;
        }

        self.core.start().await?;

        if self.config.node_type == NodeType::Partial {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = Poller::spawn(
                Arc::clone(&self.core.resolver),
                self.core.kobj_queue.clone(),
                self.core.config().polling_interval,
                shutdown_rx,
            );
            self.poller_shutdown = Some(shutdown_tx);
            self.poller_handle = Some(handle);
        }
        Ok(())
    }

    async fn start_server(&mut self) -> Result<(), NodeError> {
        let state = ServerState {
            secure: Arc::clone(&self.core.secure),
            response: Arc::clone(&self.core.response),
        };
        let app = router(state);

        let bind_addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener =
            tokio::net::TcpListener::bind(&bind_addr)
                .await
                .map_err(|e| NodeError::ServerError {
                    reason: format!("failed to bind {}: {}", bind_addr, e),
                })?;
        let local_addr = listener.local_addr().map_err(|e| NodeError::ServerError {
            reason: e.to_string(),
        })?;
        info!(%local_addr, "protocol server listening");
        self.local_addr = Some(local_addr);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(%err, "protocol server exited with error");
            }
        });
        self.server_shutdown = Some(shutdown_tx);
        self.server_handle = Some(handle);
        Ok(())
    }

    /// Stop everything in reverse order: poller, server, then the core
    /// (worker sentinels and joins).
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.poller_shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(handle) = self.poller_handle.take() {
            let _ = handle.await;
        }
        if let Some(shutdown) = self.server_shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
        self.core.stop().await;
    }

    /// The bound server address (full nodes, once started).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn core(&self) -> &NodeCore {
        &self.core
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}
