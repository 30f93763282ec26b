//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Header (every message, both directions)
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────────┬─────────────────┐
//! │Flags (1) │ Size (3) │ Type (2) │ RequestId (4)│     Body        │
//! └──────────┴──────────┴──────────┴──────────────┴─────────────────┘
//! ```
//! `Size` counts the whole message, header included. All integers are
//! little-endian.
//!
//! ### Bodies by Message Type
//! - LOGIN request:        user_len (2) + user
//! - LOGIN response:       pw_salt (32) + auth_salt (32)
//! - AUTH request:         signature (32)
//! - ADD/UPDATE request:   table_id (4) + entity
//! - ADD response:         id (8)
//! - REMOVE request:       table_id (4) + id (8)
//! - QUERY/SUBSCRIBE:      type (4) + table_id (4) + param (8)
//! - UNSUBSCRIBE request:  table_id (4)
//! - ERROR response:       code (2)
//!
//! ### Compressed Pages
//! ```text
//! ┌────────────────────┬──────────────────────────────┐
//! │ Uncompressed (2)   │        LZ4 block             │
//! └────────────────────┴──────────────────────────────┘
//! ```

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};

use super::message::{Header, Message, MessageType, QueryKind, HEADER_SIZE, MAX_SIZE_FIELD};
use crate::error::{ClientError, Result, ServerError};

/// Size of each login salt
pub const SALT_SIZE: usize = 32;

/// Size of the auth signature
pub const SIGNATURE_SIZE: usize = 32;

/// Salts issued by the store in its login response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSalts {
    pub pw_salt: [u8; SALT_SIZE],
    pub auth_salt: [u8; SALT_SIZE],
}

// =============================================================================
// Header Encoding/Decoding
// =============================================================================

/// Append a header to `buf`
///
/// Format: flags (1) + size (3) + type (2) + request_id (4)
pub fn encode_header(buf: &mut BytesMut, header: &Header) {
    buf.reserve(HEADER_SIZE);
    buf.put_u8(header.flags);
    buf.put_uint_le(u64::from(header.size & MAX_SIZE_FIELD as u32), 3);
    buf.put_u16_le(header.message_type);
    buf.put_u32_le(header.request_id);
}

/// Decode a header from the start of `bytes`
pub fn decode_header(bytes: &[u8]) -> Result<Header> {
    if bytes.len() < HEADER_SIZE {
        return Err(ClientError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let flags = bytes[0];
    let size = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], 0]);
    let message_type = u16::from_le_bytes([bytes[4], bytes[5]]);
    let request_id = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);

    if (size as usize) < HEADER_SIZE {
        return Err(ClientError::Protocol(format!(
            "Declared message size {} is smaller than the header",
            size
        )));
    }

    Ok(Header {
        flags,
        size,
        message_type,
        request_id,
    })
}

/// Decode a complete message; `bytes` must hold exactly the declared size
pub fn decode_message(bytes: Bytes) -> Result<Message> {
    let header = decode_header(&bytes)?;
    if bytes.len() != header.size as usize {
        return Err(ClientError::Protocol(format!(
            "Message length mismatch: header declares {} bytes, got {}",
            header.size,
            bytes.len()
        )));
    }
    Ok(Message::new(header, bytes))
}

/// Frame `body` behind a header of the given type
pub fn encode_message(message_type: MessageType, request_id: u32, flags: u8, body: &[u8]) -> Result<Bytes> {
    let size = HEADER_SIZE + body.len();
    if size > MAX_SIZE_FIELD {
        return Err(ClientError::MessageTooLarge {
            size,
            max: MAX_SIZE_FIELD,
        });
    }

    let mut message = BytesMut::with_capacity(size);
    encode_header(&mut message, &Header::new(message_type, size as u32, request_id, flags));
    message.put_slice(body);
    Ok(message.freeze())
}

// =============================================================================
// Request Encoding
// =============================================================================

/// LOGIN: user name length + raw user name
pub fn encode_login_request(request_id: u32, user: &str) -> Result<Bytes> {
    let len = u16::try_from(user.len())
        .map_err(|_| ClientError::InvalidArgument(format!("user name of {} bytes is too long", user.len())))?;

    let mut body = BytesMut::with_capacity(2 + user.len());
    body.put_u16_le(len);
    body.put_slice(user.as_bytes());
    encode_message(MessageType::LoginRequest, request_id, 0, &body)
}

/// AUTH: the 32-byte signature
pub fn encode_auth_request(request_id: u32, signature: &[u8; SIGNATURE_SIZE]) -> Result<Bytes> {
    encode_message(MessageType::AuthRequest, request_id, 0, signature)
}

/// ADD: target table + one encoded entity
pub fn encode_add_request(request_id: u32, table_id: u32, entity: &[u8]) -> Result<Bytes> {
    encode_table_request(MessageType::AddRequest, request_id, table_id, entity)
}

/// UPDATE: target table + the replacement entity (its id selects the record)
pub fn encode_update_request(request_id: u32, table_id: u32, entity: &[u8]) -> Result<Bytes> {
    encode_table_request(MessageType::UpdateRequest, request_id, table_id, entity)
}

/// REMOVE: target table + record id
pub fn encode_remove_request(request_id: u32, table_id: u32, id: u64) -> Result<Bytes> {
    encode_table_request(MessageType::RemoveRequest, request_id, table_id, &id.to_le_bytes())
}

/// QUERY: selection type + table + parameter
pub fn encode_query_request(request_id: u32, table_id: u32, kind: QueryKind) -> Result<Bytes> {
    encode_selection(MessageType::QueryRequest, request_id, table_id, kind)
}

/// SUBSCRIBE: same layout as QUERY
pub fn encode_subscribe_request(request_id: u32, table_id: u32, kind: QueryKind) -> Result<Bytes> {
    encode_selection(MessageType::SubscribeRequest, request_id, table_id, kind)
}

/// UNSUBSCRIBE: table id only
pub fn encode_unsubscribe_request(request_id: u32, table_id: u32) -> Result<Bytes> {
    encode_table_request(MessageType::UnsubscribeRequest, request_id, table_id, &[])
}

fn encode_table_request(message_type: MessageType, request_id: u32, table_id: u32, rest: &[u8]) -> Result<Bytes> {
    let mut body = BytesMut::with_capacity(4 + rest.len());
    body.put_u32_le(table_id);
    body.put_slice(rest);
    encode_message(message_type, request_id, 0, &body)
}

fn encode_selection(message_type: MessageType, request_id: u32, table_id: u32, kind: QueryKind) -> Result<Bytes> {
    let (query_type, param) = kind.to_wire();
    let mut body = BytesMut::with_capacity(16);
    body.put_u32_le(query_type);
    body.put_u32_le(table_id);
    body.put_u64_le(param);
    encode_message(message_type, request_id, 0, &body)
}

// =============================================================================
// Response Decoding
// =============================================================================

/// Decode the error code of an `errorResponse`
pub fn decode_error_response(message: &Message) -> Result<ServerError> {
    let payload = expect_body(message, MessageType::ErrorResponse, 2, "error")?;
    Ok(ServerError::from_code(u16::from_le_bytes([payload[0], payload[1]])))
}

/// Decode the salts of a login response
pub fn decode_login_response(message: &Message) -> Result<LoginSalts> {
    let payload = expect_body(message, MessageType::LoginResponse, 2 * SALT_SIZE, "login")?;

    let mut pw_salt = [0u8; SALT_SIZE];
    let mut auth_salt = [0u8; SALT_SIZE];
    pw_salt.copy_from_slice(&payload[..SALT_SIZE]);
    auth_salt.copy_from_slice(&payload[SALT_SIZE..2 * SALT_SIZE]);
    Ok(LoginSalts { pw_salt, auth_salt })
}

/// Decode the id the store assigned in an add response
pub fn decode_add_response(message: &Message) -> Result<u64> {
    let payload = expect_body(message, MessageType::AddResponse, 8, "add")?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&payload[..8]);
    Ok(u64::from_le_bytes(raw))
}

/// Check the type of a response and that its body holds at least `min_body` bytes
pub fn expect_body<'a>(message: &'a Message, expected: MessageType, min_body: usize, what: &str) -> Result<&'a [u8]> {
    let payload = message.payload();
    if !message.header().is(expected) || payload.len() < min_body {
        return Err(ClientError::Protocol(format!("Received invalid {} response.", what)));
    }
    Ok(payload)
}

/// The entity bytes of a response page, decompressed when flagged
pub fn page_payload(message: &Message) -> Result<Cow<'_, [u8]>> {
    if message.header().is_compressed() {
        decompress_payload(message.payload()).map(Cow::Owned)
    } else {
        Ok(Cow::Borrowed(message.payload()))
    }
}

/// Decompress a length-prefixed LZ4 block.
///
/// The output must be exactly the declared length.
pub fn decompress_payload(body: &[u8]) -> Result<Vec<u8>> {
    if body.len() < 2 {
        return Err(ClientError::Decompression(
            "missing uncompressed size prefix".to_string(),
        ));
    }

    let declared = u16::from_le_bytes([body[0], body[1]]) as usize;
    let output = lz4_flex::block::decompress(&body[2..], declared)
        .map_err(|e| ClientError::Decompression(e.to_string()))?;

    if output.len() != declared {
        return Err(ClientError::Decompression(format!(
            "expected {} bytes, got {}",
            declared,
            output.len()
        )));
    }
    Ok(output)
}
