// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Channel framing
//!
//! Splits a byte stream into whole envelopes. Only complete frames leave
//! the decoder. A frame whose declared length cannot be trusted breaks the
//! stream and is reported as a decoder error, which closes the channel.
//! Any other malformed frame is consumed and surfaced as an item carrying
//! the protocol error, so the channel stays open and only that envelope is
//! dropped.

use crate::envelope::{Envelope, MAX_ENVELOPE_SIZE, MIN_HEADER_SIZE};
use crate::error::ProtocolError;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

/// Result of decoding one frame
pub type DecodedFrame = Result<Envelope, ProtocolError>;

/// Codec turning a byte stream into envelopes and back
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_length: usize,
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_ENVELOPE_SIZE)
    }

    /// Creates a codec with a custom upper frame bound
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(MIN_HEADER_SIZE),
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = DecodedFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length < MIN_HEADER_SIZE || length > self.max_length {
            return Err(ProtocolError::FrameLength {
                length,
                min: MIN_HEADER_SIZE,
                max: self.max_length,
            });
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let frame = src.split_to(length).freeze();
        Ok(Some(Envelope::decode(frame)))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)
    }
}
