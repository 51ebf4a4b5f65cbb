//! # rntbd-protocol
//!
//! RNTBD wire protocol implementation for the mock server.
//!
//! This crate provides:
//! - Frame delimiting for the little-endian, self-inclusive length prefix
//! - Header registries and the tagged token stream codec
//! - Context negotiation, request and response message types
//! - Stream decoders for both sides of a connection
//!
//! Everything here is synchronous and performs no I/O.

pub mod codec;
pub mod error;
pub mod frame;
pub mod guid;
pub mod message;
pub mod registry;
pub mod resource;
pub mod response;
pub mod stream;
pub mod token;

pub use codec::{decode_frame, Encoder, RequestDecoder, ResponseDecoder};
pub use error::ProtocolError;
pub use frame::{FrameDelimiter, RequestFrame, ResponseStatus, FRAME_PREFIX_SIZE};
pub use message::{ContextRequest, InboundMessage, Request};
pub use registry::{HeaderDescriptor, HeaderRegistry, MessageKind};
pub use resource::{OperationType, ResourceType};
pub use response::{status, ContextResponse, DataResponse, Response};
pub use stream::{TokenStream, UndefinedToken};
pub use token::{Token, TokenType, TokenValue};

/// Protocol version sent by clients in the context request.
pub const CURRENT_PROTOCOL_VERSION: u32 = 1;

/// Client version sent in the context request.
pub const CURRENT_CLIENT_VERSION: &str = "2018-09-17";

/// Default port for the mock server.
pub const DEFAULT_PORT: u16 = 8009;

/// Maximum frame size (4 MiB).
pub const MAX_FRAME_SIZE: u32 = 4 * 1024 * 1024;
