//! Message definitions
//!
//! Message types, the fixed header, and owned inbound messages.

use bytes::Bytes;

/// Header size: flags (1) + size (3) + message type (2) + request id (4)
pub const HEADER_SIZE: usize = 10;

/// Largest value the 24-bit size field can carry
pub const MAX_SIZE_FIELD: usize = 0x00ff_ffff;

/// The store's single-message limit
pub const MAX_MESSAGE_SIZE: usize = 0xffff;

/// Message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    ErrorResponse = 0,
    LoginRequest = 1,
    LoginResponse = 2,
    AuthRequest = 3,
    AuthResponse = 4,
    AddRequest = 5,
    AddResponse = 6,
    UpdateRequest = 7,
    UpdateResponse = 8,
    RemoveRequest = 9,
    RemoveResponse = 10,
    SubscribeRequest = 11,
    SubscribeResponse = 12,
    UnsubscribeRequest = 13,
    UnsubscribeResponse = 14,
    QueryRequest = 15,
    QueryResponse = 16,
}

impl MessageType {
    /// Look up a message type by its wire code
    pub fn from_u16(code: u16) -> Option<Self> {
        let message_type = match code {
            0 => MessageType::ErrorResponse,
            1 => MessageType::LoginRequest,
            2 => MessageType::LoginResponse,
            3 => MessageType::AuthRequest,
            4 => MessageType::AuthResponse,
            5 => MessageType::AddRequest,
            6 => MessageType::AddResponse,
            7 => MessageType::UpdateRequest,
            8 => MessageType::UpdateResponse,
            9 => MessageType::RemoveRequest,
            10 => MessageType::RemoveResponse,
            11 => MessageType::SubscribeRequest,
            12 => MessageType::SubscribeResponse,
            13 => MessageType::UnsubscribeRequest,
            14 => MessageType::UnsubscribeResponse,
            15 => MessageType::QueryRequest,
            16 => MessageType::QueryResponse,
            _ => return None,
        };
        Some(message_type)
    }
}

/// Tables with fixed ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WellKnownTable {
    Clients = 0,
    /// Directory of all tables; one table entity per row
    Tables = 1,
    Time = 2,
}

impl WellKnownTable {
    pub fn id(self) -> u32 {
        self as u32
    }
}

/// Record selection for query and subscribe requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    All,
    SinceId(u64),
    SinceTime(u64),
    ById(u64),
}

impl QueryKind {
    /// Wire type code and parameter
    pub fn to_wire(self) -> (u32, u64) {
        match self {
            QueryKind::All => (0, 0),
            QueryKind::SinceId(id) => (1, id),
            QueryKind::SinceTime(time) => (2, time),
            QueryKind::ById(id) => (3, id),
        }
    }
}

/// Fixed prefix of every message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub flags: u8,
    /// Total message length, header included (24 bits on the wire)
    pub size: u32,
    /// Raw message type; unknown codes survive decoding
    pub message_type: u16,
    pub request_id: u32,
}

impl Header {
    /// More pages follow for this response
    pub const FRAGMENTED: u8 = 0x01;
    /// Payload is a length-prefixed LZ4 block
    pub const COMPRESSED: u8 = 0x02;

    pub fn new(message_type: MessageType, size: u32, request_id: u32, flags: u8) -> Self {
        Self {
            flags,
            size,
            message_type: message_type as u16,
            request_id,
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u16(self.message_type)
    }

    pub fn is(&self, message_type: MessageType) -> bool {
        self.message_type == message_type as u16
    }

    pub fn is_fragmented(&self) -> bool {
        self.flags & Self::FRAGMENTED != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & Self::COMPRESSED != 0
    }
}

/// A complete inbound message: header plus the bytes it declared
#[derive(Debug, Clone)]
pub struct Message {
    header: Header,
    bytes: Bytes,
}

impl Message {
    /// `bytes` must hold exactly `header.size` bytes, header included
    pub(crate) fn new(header: Header, bytes: Bytes) -> Self {
        debug_assert_eq!(bytes.len(), header.size as usize);
        Self { header, bytes }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The whole message, header included
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Everything after the header
    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..]
    }
}
