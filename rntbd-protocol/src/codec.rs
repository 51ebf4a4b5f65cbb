//! Stream decoders and the message encoder.

use crate::error::ProtocolError;
use crate::frame::FrameDelimiter;
use crate::message::{ContextRequest, InboundMessage, Request};
use crate::response::{ContextResponse, DataResponse, Response};
use bytes::{Bytes, BytesMut};

/// Decodes one delimited inbound frame.
pub fn decode_frame(frame: Bytes) -> Result<InboundMessage, ProtocolError> {
    InboundMessage::decode(frame)
}

/// Encodes messages into owned buffers.
pub struct Encoder;

impl Encoder {
    /// Encodes a response, including its payload block.
    pub fn encode_response(response: &Response) -> Result<BytesMut, ProtocolError> {
        let mut out = BytesMut::with_capacity(256);
        response.encode(&mut out)?;
        Ok(out)
    }

    pub fn encode_request(request: &Request) -> Result<BytesMut, ProtocolError> {
        let mut out = BytesMut::with_capacity(256);
        request.encode(&mut out)?;
        Ok(out)
    }

    pub fn encode_context_request(context: &ContextRequest) -> Result<BytesMut, ProtocolError> {
        let mut out = BytesMut::with_capacity(128);
        context.encode(&mut out)?;
        Ok(out)
    }
}

/// Server-side decoder: turns a byte stream into inbound messages.
pub struct RequestDecoder {
    buffer: BytesMut,
    delimiter: FrameDelimiter,
    pending: Option<Request>,
}

impl RequestDecoder {
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            delimiter: FrameDelimiter::new(max_frame_size),
            pending: None,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next message from the buffer.
    ///
    /// A request whose `PayloadPresent` token is set is held back until
    /// its payload block has fully arrived.
    pub fn decode_message(&mut self) -> Result<Option<InboundMessage>, ProtocolError> {
        loop {
            if let Some(mut request) = self.pending.take() {
                return match self.delimiter.next_payload(&mut self.buffer)? {
                    Some(payload) => {
                        request.payload = Some(payload);
                        Ok(Some(InboundMessage::Request(request)))
                    }
                    None => {
                        self.pending = Some(request);
                        Ok(None)
                    }
                };
            }

            let frame = match self.delimiter.next_frame(&mut self.buffer)? {
                Some(frame) => frame,
                None => return Ok(None),
            };

            match InboundMessage::decode(frame)? {
                InboundMessage::Request(request) if request.payload_present() => {
                    self.pending = Some(request);
                }
                message => return Ok(Some(message)),
            }
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer and any partially received request.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending = None;
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::new(crate::MAX_FRAME_SIZE)
    }
}

/// Client-side decoder for context and data responses.
pub struct ResponseDecoder {
    buffer: BytesMut,
    delimiter: FrameDelimiter,
    pending: Option<DataResponse>,
}

impl ResponseDecoder {
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            delimiter: FrameDelimiter::new(max_frame_size),
            pending: None,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn decode_context(&mut self) -> Result<Option<ContextResponse>, ProtocolError> {
        match self.delimiter.next_frame(&mut self.buffer)? {
            Some(frame) => Ok(Some(ContextResponse::decode(frame)?)),
            None => Ok(None),
        }
    }

    pub fn decode_data(&mut self) -> Result<Option<DataResponse>, ProtocolError> {
        if self.pending.is_none() {
            let frame = match self.delimiter.next_frame(&mut self.buffer)? {
                Some(frame) => frame,
                None => return Ok(None),
            };
            let (response, payload_present) = DataResponse::decode_head(frame)?;
            if !payload_present {
                return Ok(Some(response));
            }
            self.pending = Some(response);
        }

        match self.delimiter.next_payload(&mut self.buffer)? {
            Some(payload) => Ok(self.pending.take().map(|response| response.with_payload(payload))),
            None => Ok(None),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new(crate::MAX_FRAME_SIZE)
    }
}
