//! Protocol error types.

use crate::token::TokenType;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or token decoding.
///
/// Every variant is a structural violation of the wire format. Callers on
/// the server side treat them as fatal to the connection; application-level
/// conditions such as an unknown operation are never reported here.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("frame too small: {size} bytes (min {min})")]
    FrameTooSmall { size: u32, min: u32 },

    #[error("frame length mismatch: declared {expected}, observed {observed}")]
    LengthMismatch { expected: usize, observed: usize },

    #[error("truncated {context}: need {needed} bytes, have {available}")]
    Truncated {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("unknown token type: {0:#04x}")]
    UnknownTokenType(u8),

    #[error("invalid UTF-8 in {0} token")]
    InvalidUtf8(&'static str),

    #[error("header {header} expects {expected:?}, got {actual:?}")]
    TokenTypeMismatch {
        header: &'static str,
        expected: TokenType,
        actual: TokenType,
    },

    #[error("value of {len} bytes too long for header {header} (max {max})")]
    ValueTooLong {
        header: &'static str,
        len: usize,
        max: usize,
    },

    #[error("header id {id:#06x} is not defined for {registry}")]
    UnknownHeader { id: u16, registry: &'static str },

    #[error("invalid value {value:?} for header {header}")]
    InvalidHeaderValue { header: &'static str, value: String },

    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether the error was raised by the frame boundary checks.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::FrameTooLarge { .. }
                | ProtocolError::FrameTooSmall { .. }
                | ProtocolError::LengthMismatch { .. }
        )
    }
}

/// Returns `Truncated` unless `available >= needed`.
pub(crate) fn ensure_remaining(
    context: &'static str,
    needed: usize,
    available: usize,
) -> Result<(), ProtocolError> {
    if available < needed {
        return Err(ProtocolError::Truncated {
            context,
            needed,
            available,
        });
    }
    Ok(())
}
