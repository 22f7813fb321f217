//! Captured WebSocket frames.
//!
//! A [`MessageRecord`] is the value handed to observers and stored in the
//! structural tree. Frame encoding itself is left to `tokio-tungstenite`;
//! this module only converts between its [`Message`] and our record.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::error::{Error, Result};
use crate::identifiers::{ChannelId, MessageId};

// ============================================================================
// Opcode
// ============================================================================

/// Frame opcode as defined by RFC 6455.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Opcode {
    /// `0x0`
    Continuation,
    /// `0x1`
    Text,
    /// `0x2`
    Binary,
    /// `0x8`
    Close,
    /// `0x9`
    Ping,
    /// `0xA`
    Pong,
}

impl Opcode {
    /// Returns the wire value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Parses a wire value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Ping or pong.
    #[inline]
    #[must_use]
    pub const fn is_heartbeat(self) -> bool {
        matches!(self, Self::Ping | Self::Pong)
    }

    /// Close, ping or pong.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Continuation => "continuation",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Direction / Initiator
// ============================================================================

/// Which way a frame travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Server to proxy.
    Incoming,
    /// Proxy to server.
    Outgoing,
}

/// Component that caused a frame to be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initiator {
    /// Relayed while proxying.
    #[default]
    Proxy,
    /// Produced by a fuzzer.
    Fuzzer,
    /// Sent manually by the user.
    ManualRequest,
    /// Received from the remote peer.
    WebSocket,
}

// ============================================================================
// MessageRecord
// ============================================================================

/// One captured frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Owning channel.
    pub channel_id: ChannelId,
    /// Sequence number within the channel.
    pub message_id: MessageId,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Direction of travel.
    pub direction: Direction,
    /// Raw payload. For close frames this is the reason text.
    pub payload: Vec<u8>,
    /// Close status code, close frames only.
    pub close_code: Option<u16>,
    /// Capture time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl MessageRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        channel_id: ChannelId,
        message_id: MessageId,
        opcode: Opcode,
        direction: Direction,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            channel_id,
            message_id,
            opcode,
            direction,
            payload,
            close_code: None,
            timestamp_ms: now_millis(),
        }
    }

    /// Converts a received tungstenite message.
    ///
    /// Returns `None` for raw [`Message::Frame`] values, which are never
    /// produced while reading.
    #[must_use]
    pub fn from_ws(
        channel_id: ChannelId,
        message_id: MessageId,
        direction: Direction,
        message: &Message,
    ) -> Option<Self> {
        let (opcode, payload, close_code) = match message {
            Message::Text(text) => (Opcode::Text, text.as_bytes().to_vec(), None),
            Message::Binary(data) => (Opcode::Binary, data.to_vec(), None),
            Message::Ping(data) => (Opcode::Ping, data.to_vec(), None),
            Message::Pong(data) => (Opcode::Pong, data.to_vec(), None),
            Message::Close(frame) => match frame {
                Some(frame) => (
                    Opcode::Close,
                    frame.reason.as_bytes().to_vec(),
                    Some(u16::from(frame.code)),
                ),
                None => (Opcode::Close, Vec::new(), None),
            },
            Message::Frame(_) => return None,
        };

        let mut record = Self::new(channel_id, message_id, opcode, direction, payload);
        record.close_code = close_code;
        Some(record)
    }

    /// Builds the tungstenite message to put on the wire.
    ///
    /// The frame carries exactly the recorded payload.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidFrame`] for continuation records, and for text or
    /// close payloads that are not valid UTF-8.
    pub fn to_ws(&self) -> Result<Message> {
        let message = match self.opcode {
            Opcode::Text => Message::Text(self.utf8_payload()?.to_string().into()),
            Opcode::Binary => Message::Binary(self.payload.clone().into()),
            Opcode::Ping => Message::Ping(self.payload.clone().into()),
            Opcode::Pong => Message::Pong(self.payload.clone().into()),
            Opcode::Close => Message::Close(match self.close_code {
                Some(code) => Some(CloseFrame {
                    code: CloseCode::from(code),
                    reason: self.utf8_payload()?.to_string().into(),
                }),
                None => None,
            }),
            Opcode::Continuation => {
                return Err(Error::invalid_frame(
                    "continuation frames cannot be sent on their own",
                ));
            }
        };
        Ok(message)
    }

    fn utf8_payload(&self) -> Result<&str> {
        self.payload_text().ok_or_else(|| {
            Error::invalid_frame(format!("{} payload is not valid UTF-8", self.opcode))
        })
    }

    /// Payload as UTF-8, if it is valid.
    #[must_use]
    pub fn payload_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Identity used for structural equality: channel, sequence, opcode and
    /// payload. Timestamps and direction are not part of it.
    #[must_use]
    pub fn same_message(&self, other: &Self) -> bool {
        self.channel_id == other.channel_id
            && self.message_id == other.message_id
            && self.opcode == other.opcode
            && self.payload == other.payload
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================
