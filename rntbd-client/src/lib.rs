//! # rntbd-client
//!
//! Async client for RNTBD endpoints.
//!
//! This crate provides:
//! - TCP connections with optional TLS
//! - Context negotiation on connect
//! - Sequential request/response exchanges correlated by activity id
//! - A document read helper

pub mod client;
pub mod connection;
pub mod error;
pub mod stream;
pub mod tls;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig, TlsClientConfig};
pub use error::ClientError;
