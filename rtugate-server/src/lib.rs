//! # rtugate-server
//!
//! TCP session manager for rtugate.
//!
//! This crate provides:
//! - An accept loop with backoff on transient errors
//! - Device sessions with bounded reads, throttled writes and a
//!   cross-task bridge
//! - A session registry with identity lookup and eviction
//! - YAML + environment configuration

pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigError, NetworkConfig, SessionConfig};
pub use error::ServerError;
pub use registry::{CloseCallback, EvictionPolicy, SessionRegistry};
pub use server::{
    is_transient, AcceptBackoff, ConnectionHandler, Server, ServerConfig, ServerStats,
};
pub use session::{Session, SessionSettings};
