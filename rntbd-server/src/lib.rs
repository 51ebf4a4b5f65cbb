//! # rntbd-server
//!
//! RNTBD mock server.
//!
//! This crate provides:
//! - TCP connection handling with async I/O and optional TLS
//! - The per-connection context handshake state machine
//! - Dispatch of decoded frames to canned responses
//! - YAML and environment configuration

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fixture;
pub mod server;
pub mod session;
pub mod stream;
pub mod tls;

pub use config::{
    Config, ConfigError, FixtureConfig, HandshakePolicy, NetworkConfig, ProtocolConfig, TlsConfig,
};
pub use dispatcher::Dispatcher;
pub use error::ServerError;
pub use fixture::DocumentFixture;
pub use server::{Server, ServerConfig, ServerStats};
pub use session::{HandshakeState, Session};
