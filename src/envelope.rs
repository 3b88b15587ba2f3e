// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Message envelope definitions
//!
//! The envelope is the unit exchanged between endpoints. Its payload is an
//! immutable reference-counted buffer, so cloning an envelope for several
//! targets copies the header only.
//!
//! Wire format (big-endian):
//! - `u32` total length (header + payload)
//! - `u8` message type, `u8` result code
//! - `u32` message id, `u32` sequence number
//! - source and target addresses, each three `u16`-length-prefixed UTF-8
//!   strings (service, role, channel hint)
//! - payload bytes

use crate::address::RoleAddress;
use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Size of the fixed part of the header
pub const FIXED_HEADER_SIZE: usize = 14;

/// Smallest possible header (all address strings empty)
pub const MIN_HEADER_SIZE: usize = FIXED_HEADER_SIZE + 6 * 2;

/// Largest envelope accepted on a channel (16 MiB)
pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024 * 1024;

/// Reserved id: the message was not processed
pub const MSG_ID_NOT_PROCESSED: u32 = 0;

/// Reserved id: invalid message
pub const MSG_ID_INVALID: u32 = u32::MAX;

/// Returns true for ids that may never carry data traffic
pub fn is_reserved_id(message_id: u32) -> bool {
    message_id == MSG_ID_NOT_PROCESSED || message_id == MSG_ID_INVALID
}

/// Envelope types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Consumer calls a provider
    Request = 1,
    /// Provider answers, or router synthesizes an answer
    Response = 2,
    /// Attribute push or notification control
    Attribute = 3,
    /// Service connect (provider registration or consumer announcement)
    Connect = 4,
    /// Service disconnect
    Disconnect = 5,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(MessageType::Request),
            2 => Ok(MessageType::Response),
            3 => Ok(MessageType::Attribute),
            4 => Ok(MessageType::Connect),
            5 => Ok(MessageType::Disconnect),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Request => write!(f, "REQUEST"),
            MessageType::Response => write!(f, "RESPONSE"),
            MessageType::Attribute => write!(f, "ATTRIBUTE"),
            MessageType::Connect => write!(f, "CONNECT"),
            MessageType::Disconnect => write!(f, "DISCONNECT"),
        }
    }
}

/// Result carried by an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultCode {
    /// Data is valid; also the success code of ordinary responses
    DataOk = 0,
    /// Cached data is no longer valid
    DataInvalid = 1,
    /// The request could not be processed
    RequestError = 2,
    /// No provider is registered for the target address
    ServiceUnavailable = 3,
    /// The provider went away while the request was in flight
    RequestCanceled = 4,
    /// The message id is not part of the service interface
    InvalidIdentifier = 5,
    /// The service is available
    ServiceConnected = 6,
    /// The service is not available
    ServiceDisconnected = 7,
}

impl ResultCode {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(ResultCode::DataOk),
            1 => Ok(ResultCode::DataInvalid),
            2 => Ok(ResultCode::RequestError),
            3 => Ok(ResultCode::ServiceUnavailable),
            4 => Ok(ResultCode::RequestCanceled),
            5 => Ok(ResultCode::InvalidIdentifier),
            6 => Ok(ResultCode::ServiceConnected),
            7 => Ok(ResultCode::ServiceDisconnected),
            other => Err(ProtocolError::UnknownResultCode(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true for results that report a failure
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ResultCode::RequestError
                | ResultCode::ServiceUnavailable
                | ResultCode::RequestCanceled
                | ResultCode::InvalidIdentifier
        )
    }
}

/// Payload of an attribute envelope sent by a consumer to a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NotifyCommand {
    /// Stop notifications
    Stop = 0,
    /// Start notifications
    Start = 1,
    /// Start notifications; a repeated start re-delivers the cached value
    StartAlways = 2,
}

impl NotifyCommand {
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        match payload {
            [0] => Ok(NotifyCommand::Stop),
            [1] => Ok(NotifyCommand::Start),
            [2] => Ok(NotifyCommand::StartAlways),
            _ => Err(ProtocolError::InvalidNotifyCommand),
        }
    }

    pub fn to_payload(self) -> Bytes {
        Bytes::copy_from_slice(&[self as u8])
    }
}

/// The framed unit exchanged over a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub message_type: MessageType,
    pub result: ResultCode,
    pub message_id: u32,
    pub sequence_nr: u32,
    pub source: RoleAddress,
    pub target: RoleAddress,
    pub payload: Bytes,
}

impl Envelope {
    /// Creates an envelope with a `DataOk` result
    pub fn new(
        message_type: MessageType,
        source: RoleAddress,
        target: RoleAddress,
        message_id: u32,
        sequence_nr: u32,
        payload: Bytes,
    ) -> Self {
        Self {
            message_type,
            result: ResultCode::DataOk,
            message_id,
            sequence_nr,
            source,
            target,
            payload,
        }
    }

    /// Creates a request from a consumer to a provider
    pub fn request(
        source: RoleAddress,
        target: RoleAddress,
        message_id: u32,
        sequence_nr: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self::new(
            MessageType::Request,
            source,
            target,
            message_id,
            sequence_nr,
            payload.into(),
        )
    }

    /// Creates the response to a request, correlated by id and sequence
    pub fn response_to(request: &Envelope, result: ResultCode, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type: MessageType::Response,
            result,
            message_id: request.message_id,
            sequence_nr: request.sequence_nr,
            source: request.target.clone(),
            target: request.source.clone(),
            payload: payload.into(),
        }
    }

    /// Creates an attribute push from a provider
    pub fn attribute_push(provider: RoleAddress, message_id: u32, payload: impl Into<Bytes>) -> Self {
        Self::new(
            MessageType::Attribute,
            provider,
            RoleAddress::empty(),
            message_id,
            0,
            payload.into(),
        )
    }

    /// Creates a push that invalidates the provider's attribute
    pub fn attribute_invalidate(provider: RoleAddress, message_id: u32) -> Self {
        Self::attribute_push(provider, message_id, Bytes::new()).with_result(ResultCode::DataInvalid)
    }

    /// Creates a notification start/stop request from a consumer
    pub fn notify_request(
        consumer: RoleAddress,
        provider: RoleAddress,
        message_id: u32,
        command: NotifyCommand,
    ) -> Self {
        Self::new(
            MessageType::Attribute,
            consumer,
            provider,
            message_id,
            0,
            command.to_payload(),
        )
    }

    /// Creates a provider registration
    pub fn provider_connect(provider: RoleAddress) -> Self {
        Self::notice(MessageType::Connect, provider, RoleAddress::empty(), ResultCode::DataOk)
    }

    /// Creates a provider deregistration
    pub fn provider_disconnect(provider: RoleAddress) -> Self {
        Self::notice(MessageType::Disconnect, provider, RoleAddress::empty(), ResultCode::DataOk)
    }

    /// Creates a consumer announcement towards a provider
    pub fn consumer_connect(consumer: RoleAddress, provider: RoleAddress) -> Self {
        Self::notice(MessageType::Connect, consumer, provider, ResultCode::DataOk)
    }

    /// Creates a consumer leaving a provider
    pub fn consumer_disconnect(consumer: RoleAddress, provider: RoleAddress) -> Self {
        Self::notice(MessageType::Disconnect, consumer, provider, ResultCode::DataOk)
    }

    /// Creates a payload-less control envelope
    pub fn notice(
        message_type: MessageType,
        source: RoleAddress,
        target: RoleAddress,
        result: ResultCode,
    ) -> Self {
        Self::new(
            message_type,
            source,
            target,
            MSG_ID_NOT_PROCESSED,
            0,
            Bytes::new(),
        )
        .with_result(result)
    }

    pub fn with_result(mut self, result: ResultCode) -> Self {
        self.result = result;
        self
    }

    /// Copies the header for a new target; the payload buffer is shared
    pub fn clone_for_target(&self, target: &RoleAddress) -> Self {
        Self {
            target: target.clone(),
            ..self.clone()
        }
    }

    /// Returns true when the target address is empty
    pub fn is_untargeted(&self) -> bool {
        self.target.is_empty()
    }

    /// Size of the encoded header in bytes
    pub fn header_len(&self) -> usize {
        FIXED_HEADER_SIZE + address_len(&self.source) + address_len(&self.target)
    }

    /// Size of the encoded envelope in bytes
    pub fn total_length(&self) -> usize {
        self.header_len() + self.payload.len()
    }

    /// Appends the encoded envelope to `dst`
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let total = self.total_length();
        if total > MAX_ENVELOPE_SIZE {
            return Err(ProtocolError::FrameLength {
                length: total,
                min: MIN_HEADER_SIZE,
                max: MAX_ENVELOPE_SIZE,
            });
        }

        dst.reserve(total);
        dst.put_u32(total as u32);
        dst.put_u8(self.message_type.as_u8());
        dst.put_u8(self.result.as_u8());
        dst.put_u32(self.message_id);
        dst.put_u32(self.sequence_nr);
        put_address(dst, &self.source)?;
        put_address(dst, &self.target)?;
        dst.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Encodes the envelope into a standalone buffer
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(self.total_length());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decodes one complete frame
    ///
    /// The payload is a zero-copy slice of `frame`.
    pub fn decode(frame: Bytes) -> Result<Self, ProtocolError> {
        if frame.len() < FIXED_HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: FIXED_HEADER_SIZE,
                available: frame.len(),
            });
        }

        let mut buf = frame;
        let actual = buf.len();
        let declared = buf.get_u32() as usize;
        if declared != actual {
            return Err(ProtocolError::LengthMismatch { declared, actual });
        }

        let message_type = MessageType::from_u8(buf.get_u8())?;
        let result = ResultCode::from_u8(buf.get_u8())?;
        let message_id = buf.get_u32();
        let sequence_nr = buf.get_u32();
        let source = get_address(&mut buf)?;
        let target = get_address(&mut buf)?;

        Ok(Self {
            message_type,
            result,
            message_id,
            sequence_nr,
            source,
            target,
            payload: buf,
        })
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} id={} seq={} {} -> {} ({:?}, {} bytes)",
            self.message_type,
            self.message_id,
            self.sequence_nr,
            self.source,
            self.target,
            self.result,
            self.payload.len()
        )
    }
}

fn address_len(address: &RoleAddress) -> usize {
    6 + address.service.len() + address.role.len() + address.channel_hint.len()
}

fn put_address(dst: &mut BytesMut, address: &RoleAddress) -> Result<(), ProtocolError> {
    for field in [&address.service, &address.role, &address.channel_hint] {
        let len = field.len();
        if len > u16::MAX as usize {
            return Err(ProtocolError::FieldTooLong(len));
        }
        dst.put_u16(len as u16);
        dst.extend_from_slice(field.as_bytes());
    }
    Ok(())
}

fn get_string(buf: &mut Bytes) -> Result<String, ProtocolError> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Truncated {
            needed: 2,
            available: buf.remaining(),
        });
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated {
            needed: len,
            available: buf.remaining(),
        });
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

fn get_address(buf: &mut Bytes) -> Result<RoleAddress, ProtocolError> {
    let service = get_string(buf)?;
    let role = get_string(buf)?;
    let channel_hint = get_string(buf)?;
    Ok(RoleAddress {
        service,
        role,
        channel_hint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc() -> RoleAddress {
        RoleAddress::new("Calc", "Server1")
    }

    fn client() -> RoleAddress {
        RoleAddress::with_hint("Calc", "Client", "main")
    }

    #[test]
    fn test_header_length_accounts_for_addresses() {
        let env = Envelope::request(client(), calc(), 5, 1, vec![1, 2, 3]);
        // 14 fixed + (6 + 4 + 6 + 4) + (6 + 4 + 7) + 3 payload
        assert_eq!(env.header_len(), 14 + 20 + 17);
        assert_eq!(env.total_length(), env.header_len() + 3);
    }

    #[test]
    fn test_encode_writes_declared_length() {
        let env = Envelope::request(client(), calc(), 5, 7, vec![9; 10]);
        let bytes = env.to_bytes().unwrap();
        assert_eq!(bytes.len(), env.total_length());
        assert_eq!(
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize,
            bytes.len()
        );
        assert_eq!(bytes[4], MessageType::Request.as_u8());

        let decoded = Envelope::decode(bytes).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(decoded.source.channel_hint, "main");
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let env = Envelope::request(client(), calc(), 5, 1, vec![1, 2, 3]);
        let mut bytes = BytesMut::from(&env.to_bytes().unwrap()[..]);
        bytes.extend_from_slice(&[0xAA]);
        let err = Envelope::decode(bytes.freeze()).unwrap_err();
        assert!(matches!(err, ProtocolError::LengthMismatch { .. }));
    }

    #[test]
    fn test_decode_rejects_truncated_address() {
        let mut buf = BytesMut::new();
        buf.put_u32(18);
        buf.put_u8(MessageType::Request.as_u8());
        buf.put_u8(0);
        buf.put_u32(5);
        buf.put_u32(0);
        buf.put_u16(100);
        buf.put_u16(0);
        let err = Envelope::decode(buf.freeze()).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }

    #[test]
    fn test_decode_rejects_unknown_message_type() {
        let env = Envelope::request(client(), calc(), 5, 1, Bytes::new());
        let mut bytes = BytesMut::from(&env.to_bytes().unwrap()[..]);
        bytes[4] = 42;
        let err = Envelope::decode(bytes.freeze()).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageType(42)));
    }

    #[test]
    fn test_response_swaps_addresses_and_keeps_correlation() {
        let req = Envelope::request(client(), calc(), 5, 77, Bytes::new());
        let resp = Envelope::response_to(&req, ResultCode::ServiceUnavailable, Bytes::new());
        assert_eq!(resp.message_type, MessageType::Response);
        assert_eq!(resp.source, calc());
        assert_eq!(resp.target, client());
        assert_eq!(resp.message_id, 5);
        assert_eq!(resp.sequence_nr, 77);
        assert!(resp.result.is_error());
    }

    #[test]
    fn test_clone_for_target_shares_payload() {
        let push = Envelope::attribute_push(calc(), 10, vec![42u8; 64]);
        let a = push.clone_for_target(&RoleAddress::new("Calc", "A"));
        let b = push.clone_for_target(&RoleAddress::new("Calc", "B"));
        assert_eq!(a.payload.as_ptr(), b.payload.as_ptr());
        assert_ne!(a.target, b.target);
    }

    #[test]
    fn test_notify_command_payload() {
        assert_eq!(
            NotifyCommand::from_payload(&NotifyCommand::StartAlways.to_payload()).unwrap(),
            NotifyCommand::StartAlways
        );
        assert!(NotifyCommand::from_payload(&[]).is_err());
        assert!(NotifyCommand::from_payload(&[7]).is_err());
    }

    #[test]
    fn test_reserved_ids() {
        assert!(is_reserved_id(MSG_ID_NOT_PROCESSED));
        assert!(is_reserved_id(MSG_ID_INVALID));
        assert!(!is_reserved_id(10));
    }
}
