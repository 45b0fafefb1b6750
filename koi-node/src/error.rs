use thiserror::Error;

/// Errors that can occur in the node binary.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    #[error("cache error: {0}")]
    CacheError(#[from] koi_cache::error::CacheError),

    #[error("network error: {0}")]
    NetError(#[from] koi_net::error::NetError),

    #[error(transparent)]
    CryptoError(#[from] koi_types::error::KoiError),

    #[error("server error: {reason}")]
    ServerError { reason: String },

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}
