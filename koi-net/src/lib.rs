pub mod config;
pub mod error;
pub mod graph;
pub mod handshake;
pub mod identity;
pub mod lifecycle;
pub mod network;
pub mod poller;
pub mod processor;
pub mod protocol;
pub mod secure;
pub mod sync;
pub mod workers;
