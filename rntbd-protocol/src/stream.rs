//! Token stream codec.
//!
//! A [`TokenStream`] holds one slot per header of its registry. Decoding
//! walks the wire `(id, type, payload)` triples until the input is
//! exhausted; encoding writes the present slots in registry order.

use crate::error::{ensure_remaining, ProtocolError};
use crate::registry::HeaderRegistry;
use crate::token::{Token, TokenType, TokenValue, TOKEN_HEADER_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

/// A token whose id is not in the registry, or whose wire type disagrees
/// with the registered one. Kept only so its bytes are accounted for.
#[derive(Debug, Clone, PartialEq)]
pub struct UndefinedToken {
    pub id: u16,
    pub value: TokenValue,
}

impl UndefinedToken {
    pub fn token_type(&self) -> TokenType {
        self.value.token_type()
    }

    pub fn encoded_len(&self) -> usize {
        TOKEN_HEADER_SIZE + self.value.encoded_len()
    }
}

/// Token slots for every header of one registry.
#[derive(Debug, Clone)]
pub struct TokenStream {
    registry: &'static HeaderRegistry,
    tokens: Vec<Token>,
    undefined: Vec<UndefinedToken>,
}

impl TokenStream {
    /// Creates a stream with an absent slot for every registered header.
    pub fn new(registry: &'static HeaderRegistry) -> Self {
        Self {
            registry,
            tokens: registry.headers().iter().copied().map(Token::new).collect(),
            undefined: Vec::new(),
        }
    }

    pub fn registry(&self) -> &'static HeaderRegistry {
        self.registry
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn get(&self, id: u16) -> Option<&Token> {
        self.registry.position(id).map(|pos| &self.tokens[pos])
    }

    pub fn value(&self, id: u16) -> Option<&TokenValue> {
        self.get(id).and_then(Token::value)
    }

    pub fn is_present(&self, id: u16) -> bool {
        self.value(id).is_some()
    }

    pub fn get_u8(&self, id: u16) -> Option<u8> {
        self.value(id).and_then(TokenValue::as_u8)
    }

    pub fn get_u32(&self, id: u16) -> Option<u32> {
        self.value(id).and_then(TokenValue::as_u32)
    }

    pub fn get_str(&self, id: u16) -> Option<&str> {
        self.value(id).and_then(TokenValue::as_str)
    }

    /// Sets the value of a registered header.
    pub fn set(&mut self, id: u16, value: TokenValue) -> Result<(), ProtocolError> {
        let pos = self
            .registry
            .position(id)
            .ok_or(ProtocolError::UnknownHeader {
                id,
                registry: self.registry.kind().as_str(),
            })?;
        self.tokens[pos].set(value)
    }

    /// Parses `text` into the header's wire type and sets it.
    pub fn set_text(&mut self, id: u16, text: &str) -> Result<(), ProtocolError> {
        let header = self.registry.get(id).ok_or(ProtocolError::UnknownHeader {
            id,
            registry: self.registry.kind().as_str(),
        })?;
        let value = TokenValue::parse(header.token_type, text).ok_or_else(|| {
            ProtocolError::InvalidHeaderValue {
                header: header.name,
                value: text.to_string(),
            }
        })?;
        self.set(id, value)
    }

    pub fn clear(&mut self, id: u16) {
        if let Some(pos) = self.registry.position(id) {
            self.tokens[pos].clear();
        }
    }

    /// Number of present tokens.
    pub fn compute_count(&self) -> usize {
        self.tokens.iter().filter(|t| t.is_present()).count()
    }

    /// Bytes written by [`TokenStream::encode`].
    pub fn compute_length(&self) -> usize {
        self.tokens.iter().map(Token::compute_length).sum()
    }

    /// Bytes consumed on decode by tokens that were not kept.
    pub fn undefined_length(&self) -> usize {
        self.undefined.iter().map(UndefinedToken::encoded_len).sum()
    }

    pub fn undefined_tokens(&self) -> &[UndefinedToken] {
        &self.undefined
    }

    /// Required headers that are absent.
    pub fn missing_required(&self) -> impl Iterator<Item = &Token> {
        self.tokens
            .iter()
            .filter(|t| t.is_required() && !t.is_present())
    }

    /// Decodes a stream from bytes scoped to exactly the stream.
    ///
    /// Unknown ids and type mismatches are kept as undefined tokens. An
    /// unknown type tag is fatal since its payload size cannot be known.
    /// Missing required headers are logged, not rejected.
    pub fn decode(registry: &'static HeaderRegistry, mut buf: Bytes) -> Result<Self, ProtocolError> {
        let mut stream = Self::new(registry);

        while buf.has_remaining() {
            ensure_remaining("token header", TOKEN_HEADER_SIZE, buf.remaining())?;
            let id = buf.get_u16_le();
            let token_type = TokenType::from_id(buf.get_u8())?;
            let value = TokenValue::decode(token_type, &mut buf)?;

            match registry.position(id) {
                Some(pos) if stream.tokens[pos].header().token_type == token_type => {
                    stream.tokens[pos].set(value)?;
                }
                Some(pos) => {
                    let header = stream.tokens[pos].header();
                    warn!(
                        "{} header {} ({:#06x}) arrived as {:?}, expected {:?}",
                        registry.kind(),
                        header.name,
                        id,
                        token_type,
                        header.token_type
                    );
                    stream.undefined.push(UndefinedToken { id, value });
                }
                None => {
                    debug!(
                        "{} header {:#06x} is undefined, skipping {:?}",
                        registry.kind(),
                        id,
                        token_type
                    );
                    stream.undefined.push(UndefinedToken { id, value });
                }
            }
        }

        for token in stream.missing_required() {
            warn!(
                "{} is missing required header {} ({:#06x})",
                registry.kind(),
                token.header().name,
                token.id()
            );
        }

        Ok(stream)
    }

    /// Writes present tokens in registry order.
    ///
    /// Fails with `LengthMismatch` if the bytes written differ from
    /// [`TokenStream::compute_length`]; frame lengths are derived from it.
    pub fn encode(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        let expected = self.compute_length();
        let start = out.len();
        out.reserve(expected);
        for token in &self.tokens {
            token.encode(out);
        }
        let written = out.len() - start;
        if written != expected {
            return Err(ProtocolError::LengthMismatch {
                expected,
                observed: written,
            });
        }
        Ok(())
    }

    /// Writes an undefined token verbatim. Only used to build foreign
    /// streams in tests and tools.
    pub fn encode_raw(id: u16, value: &TokenValue, out: &mut BytesMut) {
        out.put_u16_le(id);
        out.put_u8(value.token_type().id());
        value.encode(out);
    }
}
