//! Subprotocol messages
//!
//! Decoding is a two-step process: peek the tag of a [`Frame`], then parse the
//! rest of the bytes as the matching message shape. Payloads are sliced out of
//! the frame's `Bytes` without copying.

use crate::codec::{decode_u16, decode_u32, decode_u64, ProtoError, ProtoResult};
use crate::{ACK_FRAME_SIZE, DATA_HEADER_SIZE, MAX_DATA_LENGTH};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Offset of the length (or ack counter) field, right after the tag
const FIELD_OFFSET: usize = 2;

/// Frame tag, the first two bytes of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Tag {
    Unused = 0,
    ConnectSuccessSid = 1,
    ReconnectSuccessAck = 2,
    Deprecated = 3,
    Data = 4,
    AckLatency = 5,
    ReplyLatency = 6,
    Ack = 7,
}

impl Tag {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Tag {
    type Error = ProtoError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Tag::Unused),
            1 => Ok(Tag::ConnectSuccessSid),
            2 => Ok(Tag::ReconnectSuccessAck),
            3 => Ok(Tag::Deprecated),
            4 => Ok(Tag::Data),
            5 => Ok(Tag::AckLatency),
            6 => Ok(Tag::ReplyLatency),
            7 => Ok(Tag::Ack),
            _ => Err(ProtoError::UnknownTag(value)),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::Unused => "UNUSED",
            Tag::ConnectSuccessSid => "CONNECT_SUCCESS_SID",
            Tag::ReconnectSuccessAck => "RECONNECT_SUCCESS_ACK",
            Tag::Deprecated => "DEPRECATED",
            Tag::Data => "DATA",
            Tag::AckLatency => "ACK_LATENCY",
            Tag::ReplyLatency => "REPLY_LATENCY",
            Tag::Ack => "ACK",
        };
        write!(f, "{}({})", name, self.as_u16())
    }
}

/// Read the tag of a frame without validating the rest of it
pub fn peek_tag(frame: &[u8]) -> ProtoResult<Tag> {
    Tag::try_from(decode_u16(frame, 0)?)
}

/// Split a length-prefixed field out of a Data or ConnectSuccessSid frame.
///
/// Returns `(field, remainder)`.
fn parse_length_prefixed(frame: &Bytes) -> ProtoResult<(Bytes, Bytes)> {
    let length = decode_u32(frame, FIELD_OFFSET)? as usize;
    if length > MAX_DATA_LENGTH {
        return Err(ProtoError::PayloadTooLarge(length));
    }

    let end = DATA_HEADER_SIZE + length;
    if frame.len() < end {
        return Err(ProtoError::IncompleteData {
            needed: end,
            available: frame.len(),
        });
    }

    Ok((frame.slice(DATA_HEADER_SIZE..end), frame.slice(end..)))
}

/// Parse a Data frame into `(payload, remainder)`
pub fn parse_data(frame: &Bytes) -> ProtoResult<(Bytes, Bytes)> {
    parse_length_prefixed(frame)
}

/// Parse a ConnectSuccessSid frame into `(sid, remainder)`
///
/// The session token is opaque; bytes that are not valid UTF-8 are replaced.
pub fn parse_connect_success_sid(frame: &Bytes) -> ProtoResult<(String, Bytes)> {
    let (sid, remainder) = parse_length_prefixed(frame)?;
    Ok((String::from_utf8_lossy(&sid).into_owned(), remainder))
}

/// Parse the cumulative byte count carried by an Ack frame
pub fn parse_ack(frame: &[u8]) -> ProtoResult<u64> {
    decode_u64(frame, FIELD_OFFSET)
}

fn build_length_prefixed(tag: Tag, field: &[u8]) -> ProtoResult<Bytes> {
    if field.len() > MAX_DATA_LENGTH {
        return Err(ProtoError::PayloadTooLarge(field.len()));
    }

    let mut buf = BytesMut::with_capacity(DATA_HEADER_SIZE + field.len());
    buf.put_u16(tag.as_u16());
    buf.put_u32(field.len() as u32);
    buf.put_slice(field);

    Ok(buf.freeze())
}

/// Build a Data frame carrying `payload`
///
/// Fails with [`ProtoError::PayloadTooLarge`] above [`MAX_DATA_LENGTH`]; callers
/// must chunk their input first.
pub fn build_data(payload: &[u8]) -> ProtoResult<Bytes> {
    build_length_prefixed(Tag::Data, payload)
}

/// Build a ConnectSuccessSid frame (sent by the relay, used by tests and peers)
pub fn build_connect_success_sid(sid: &str) -> ProtoResult<Bytes> {
    build_length_prefixed(Tag::ConnectSuccessSid, sid.as_bytes())
}

/// Build an Ack frame carrying a cumulative byte count
pub fn build_ack(cumulative_bytes: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(ACK_FRAME_SIZE);
    buf.put_u16(Tag::Ack.as_u16());
    buf.put_u64(cumulative_bytes);
    buf.freeze()
}

/// Build a ReconnectSuccessAck frame
pub fn build_reconnect_success_ack() -> Bytes {
    Bytes::copy_from_slice(&Tag::ReconnectSuccessAck.as_u16().to_be_bytes())
}

/// A decoded subprotocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ConnectSuccessSid { sid: String },
    ReconnectSuccessAck,
    Data { payload: Bytes },
    Ack { received: u64 },
}

impl Message {
    pub fn tag(&self) -> Tag {
        match self {
            Message::ConnectSuccessSid { .. } => Tag::ConnectSuccessSid,
            Message::ReconnectSuccessAck => Tag::ReconnectSuccessAck,
            Message::Data { .. } => Tag::Data,
            Message::Ack { .. } => Tag::Ack,
        }
    }

    /// Encode this message into a single frame
    pub fn encode(&self) -> ProtoResult<Bytes> {
        match self {
            Message::ConnectSuccessSid { sid } => build_connect_success_sid(sid),
            Message::ReconnectSuccessAck => Ok(build_reconnect_success_ack()),
            Message::Data { payload } => build_data(payload),
            Message::Ack { received } => Ok(build_ack(*received)),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::ConnectSuccessSid { sid } => write!(f, "SID: {}", sid),
            Message::ReconnectSuccessAck => write!(f, "ReconnectAck"),
            Message::Data { payload } => write!(f, "Data: {} bytes", payload.len()),
            Message::Ack { received } => write!(f, "Ack: {}", received),
        }
    }
}

/// A raw frame as received from the transport
///
/// The tag can be inspected before committing to a concrete parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    pub fn peek_tag(&self) -> ProtoResult<Tag> {
        peek_tag(&self.bytes)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode into a typed message
    ///
    /// Tags that are defined but carry no handled shape (`Unused`, `Deprecated`,
    /// the latency messages) are reported as [`ProtoError::UnknownTag`].
    pub fn decode(&self) -> ProtoResult<Message> {
        match self.peek_tag()? {
            Tag::ConnectSuccessSid => {
                let (sid, _) = parse_connect_success_sid(&self.bytes)?;
                Ok(Message::ConnectSuccessSid { sid })
            }
            Tag::ReconnectSuccessAck => Ok(Message::ReconnectSuccessAck),
            Tag::Data => {
                let (payload, _) = parse_data(&self.bytes)?;
                Ok(Message::Data { payload })
            }
            Tag::Ack => Ok(Message::Ack {
                received: parse_ack(&self.bytes)?,
            }),
            other => Err(ProtoError::UnknownTag(other.as_u16())),
        }
    }
}

impl From<Bytes> for Frame {
    fn from(bytes: Bytes) -> Self {
        Self::new(bytes)
    }
}
