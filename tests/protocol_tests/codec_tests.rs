//! Codec Tests
//!
//! Tests for header framing, request encoding, and response decoding.

use bytes::{Bytes, BytesMut};
use std::borrow::Cow;
use zlimdb_client::protocol::{
    decode_add_response, decode_error_response, decode_header, decode_login_response,
    decode_message, decompress_payload, encode_add_request, encode_auth_request, encode_entity,
    encode_header, encode_login_request, encode_message, encode_query_request,
    encode_remove_request, encode_subscribe_request, encode_unsubscribe_request,
    encode_update_request, expect_body, page_payload, Header, Message, MessageType, QueryKind,
    HEADER_SIZE, MAX_SIZE_FIELD,
};
use zlimdb_client::{ClientError, ServerError};

fn message(message_type: MessageType, request_id: u32, flags: u8, body: &[u8]) -> Message {
    decode_message(encode_message(message_type, request_id, flags, body).unwrap()).unwrap()
}

// =============================================================================
// Header Tests
// =============================================================================

#[test]
fn test_header_layout() {
    let bytes = encode_message(MessageType::QueryRequest, 0x0102_0304, Header::FRAGMENTED, &[0xaa; 3]).unwrap();

    assert_eq!(
        &bytes[..],
        &[0x01, 13, 0, 0, 15, 0, 0x04, 0x03, 0x02, 0x01, 0xaa, 0xaa, 0xaa]
    );
}

#[test]
fn test_decode_header_fields() {
    let bytes = [0x03, 0x10, 0x27, 0x00, 16, 0, 7, 0, 0, 0];
    let header = decode_header(&bytes).unwrap();

    assert_eq!(header.size, 10_000);
    assert_eq!(header.message_type(), Some(MessageType::QueryResponse));
    assert_eq!(header.request_id, 7);
    assert!(header.is_fragmented());
    assert!(header.is_compressed());
}

#[test]
fn test_encode_header_into_buffer() {
    let mut buf = BytesMut::new();
    encode_header(&mut buf, &Header::new(MessageType::AuthResponse, 10, 99, 0));

    assert_eq!(buf.len(), HEADER_SIZE);
    assert_eq!(decode_header(&buf).unwrap(), Header::new(MessageType::AuthResponse, 10, 99, 0));
}

#[test]
fn test_header_round_trip_across_field_ranges() {
    let sizes = [HEADER_SIZE as u32, 11, 0xFFFF, 0x1_0000, MAX_SIZE_FIELD as u32];
    let request_ids = [0, 1, 0x8000_0000, u32::MAX];
    let message_types = [0u16, MessageType::QueryResponse as u16, 16, 0x1234, u16::MAX];

    let mut buf = BytesMut::new();
    for flags in 0..=u8::MAX {
        for &size in &sizes {
            for &request_id in &request_ids {
                for &message_type in &message_types {
                    let header = Header {
                        flags,
                        size,
                        message_type,
                        request_id,
                    };
                    buf.clear();
                    encode_header(&mut buf, &header);
                    assert_eq!(buf.len(), HEADER_SIZE);
                    assert_eq!(decode_header(&buf).unwrap(), header);
                }
            }
        }
    }
}

#[test]
fn test_size_field_is_24_bits() {
    let body = vec![0u8; 70_000];
    let bytes = encode_message(MessageType::QueryResponse, 1, 0, &body).unwrap();
    assert_eq!(decode_header(&bytes).unwrap().size as usize, 70_010);

    let too_big = vec![0u8; MAX_SIZE_FIELD];
    assert!(matches!(
        encode_message(MessageType::QueryResponse, 1, 0, &too_big),
        Err(ClientError::MessageTooLarge { .. })
    ));
}

#[test]
fn test_unknown_message_type_survives_decoding() {
    let bytes = [0, 10, 0, 0, 0x34, 0x12, 1, 0, 0, 0];
    let header = decode_header(&bytes).unwrap();
    assert_eq!(header.message_type, 0x1234);
    assert_eq!(header.message_type(), None);
}

#[test]
fn test_decode_header_rejects_bad_input() {
    assert!(matches!(decode_header(&[0u8; 9]), Err(ClientError::Protocol(_))));
    // Declared size smaller than the header itself
    assert!(matches!(
        decode_header(&[0, 9, 0, 0, 2, 0, 1, 0, 0, 0]),
        Err(ClientError::Protocol(_))
    ));
}

#[test]
fn test_decode_message_length_mismatch() {
    let mut bytes = encode_message(MessageType::AddResponse, 1, 0, &[0u8; 8]).unwrap().to_vec();
    bytes.pop();
    assert!(decode_message(Bytes::from(bytes)).is_err());
}

#[test]
fn test_message_type_codes() {
    for code in 0..=16u16 {
        assert_eq!(MessageType::from_u16(code).unwrap() as u16, code);
    }
    assert_eq!(MessageType::from_u16(17), None);
}

// =============================================================================
// Request Encoding Tests
// =============================================================================

#[test]
fn test_login_request() {
    let login = message(MessageType::LoginRequest, 1, 0, &[]);
    assert!(login.payload().is_empty());

    let bytes = encode_login_request(1, "admin").unwrap();
    assert_eq!(&bytes[HEADER_SIZE..], &[5, 0, b'a', b'd', b'm', b'i', b'n']);
    assert_eq!(decode_header(&bytes).unwrap().message_type(), Some(MessageType::LoginRequest));
}

#[test]
fn test_auth_request() {
    let bytes = encode_auth_request(2, &[0x5a; 32]).unwrap();
    assert_eq!(bytes.len(), HEADER_SIZE + 32);
    assert!(bytes[HEADER_SIZE..].iter().all(|&b| b == 0x5a));
}

#[test]
fn test_add_and_update_requests_prefix_the_table() {
    let mut entity = BytesMut::new();
    encode_entity(&mut entity, 0, 0, b"value").unwrap();

    for bytes in [
        encode_add_request(3, 42, &entity).unwrap(),
        encode_update_request(3, 42, &entity).unwrap(),
    ] {
        assert_eq!(&bytes[HEADER_SIZE..HEADER_SIZE + 4], &42u32.to_le_bytes());
        assert_eq!(&bytes[HEADER_SIZE + 4..], &entity[..]);
    }
}

#[test]
fn test_remove_request() {
    let bytes = encode_remove_request(4, 9, 0x1122_3344_5566_7788).unwrap();
    assert_eq!(bytes.len(), HEADER_SIZE + 12);
    assert_eq!(&bytes[HEADER_SIZE..HEADER_SIZE + 4], &9u32.to_le_bytes());
    assert_eq!(&bytes[HEADER_SIZE + 4..], &0x1122_3344_5566_7788u64.to_le_bytes());
}

#[test]
fn test_query_and_subscribe_requests() {
    let query = encode_query_request(5, 8, QueryKind::SinceId(100)).unwrap();
    let mut expected = Vec::new();
    expected.extend_from_slice(&1u32.to_le_bytes());
    expected.extend_from_slice(&8u32.to_le_bytes());
    expected.extend_from_slice(&100u64.to_le_bytes());
    assert_eq!(&query[HEADER_SIZE..], &expected[..]);

    let subscribe = encode_subscribe_request(6, 8, QueryKind::SinceId(100)).unwrap();
    assert_eq!(&subscribe[HEADER_SIZE..], &expected[..]);
    assert_eq!(
        decode_header(&subscribe).unwrap().message_type(),
        Some(MessageType::SubscribeRequest)
    );
}

#[test]
fn test_query_kind_wire_codes() {
    assert_eq!(QueryKind::All.to_wire(), (0, 0));
    assert_eq!(QueryKind::SinceId(5).to_wire(), (1, 5));
    assert_eq!(QueryKind::SinceTime(6).to_wire(), (2, 6));
    assert_eq!(QueryKind::ById(7).to_wire(), (3, 7));
}

#[test]
fn test_unsubscribe_request() {
    let bytes = encode_unsubscribe_request(7, 12).unwrap();
    assert_eq!(bytes.len(), HEADER_SIZE + 4);
    assert_eq!(&bytes[HEADER_SIZE..], &12u32.to_le_bytes());
}

// =============================================================================
// Response Decoding Tests
// =============================================================================

#[test]
fn test_decode_error_response() {
    let known = message(MessageType::ErrorResponse, 1, 0, &3u16.to_le_bytes());
    assert_eq!(decode_error_response(&known).unwrap(), ServerError::TableNotFound);

    let unknown = message(MessageType::ErrorResponse, 1, 0, &500u16.to_le_bytes());
    let error = decode_error_response(&unknown).unwrap();
    assert_eq!(error, ServerError::Unknown(500));
    assert_eq!(error.to_string(), "Unknown error.");

    let truncated = message(MessageType::ErrorResponse, 1, 0, &[1]);
    assert!(decode_error_response(&truncated).is_err());
}

#[test]
fn test_decode_login_response() {
    let mut body = vec![1u8; 32];
    body.extend_from_slice(&[2u8; 32]);
    let salts = decode_login_response(&message(MessageType::LoginResponse, 1, 0, &body)).unwrap();
    assert_eq!(salts.pw_salt, [1u8; 32]);
    assert_eq!(salts.auth_salt, [2u8; 32]);

    let short = message(MessageType::LoginResponse, 1, 0, &body[..63]);
    let error = decode_login_response(&short).unwrap_err();
    assert_eq!(error.to_string(), "Protocol error: Received invalid login response.");
}

#[test]
fn test_decode_add_response() {
    let response = message(MessageType::AddResponse, 1, 0, &77u64.to_le_bytes());
    assert_eq!(decode_add_response(&response).unwrap(), 77);

    let wrong_type = message(MessageType::UpdateResponse, 1, 0, &77u64.to_le_bytes());
    assert_eq!(
        decode_add_response(&wrong_type).unwrap_err().to_string(),
        "Protocol error: Received invalid add response."
    );
}

#[test]
fn test_expect_body() {
    let response = message(MessageType::RemoveResponse, 1, 0, &[]);
    assert!(expect_body(&response, MessageType::RemoveResponse, 0, "remove").is_ok());
    assert!(expect_body(&response, MessageType::RemoveResponse, 1, "remove").is_err());
    assert!(expect_body(&response, MessageType::UpdateResponse, 0, "update").is_err());
}

// =============================================================================
// Compressed Page Tests
// =============================================================================

fn compressed(payload: &[u8], declared: u16) -> Vec<u8> {
    let mut body = declared.to_le_bytes().to_vec();
    body.extend_from_slice(&lz4_flex::block::compress(payload));
    body
}

#[test]
fn test_page_payload_borrows_uncompressed_pages() {
    let page = message(MessageType::QueryResponse, 1, 0, b"plain");
    let payload = page_payload(&page).unwrap();
    assert!(matches!(payload, Cow::Borrowed(_)));
    assert_eq!(&*payload, b"plain");
}

#[test]
fn test_page_payload_decompresses() {
    let data = b"abcabcabcabcabcabcabcabcabcabc".to_vec();
    let page = message(
        MessageType::QueryResponse,
        1,
        Header::COMPRESSED,
        &compressed(&data, data.len() as u16),
    );
    assert_eq!(page_payload(&page).unwrap().as_ref(), &data[..]);
}

#[test]
fn test_decompress_rejects_bad_pages() {
    let data = b"some entity bytes".to_vec();

    assert!(matches!(
        decompress_payload(&[7]),
        Err(ClientError::Decompression(_))
    ));
    assert!(matches!(
        decompress_payload(&compressed(&data, data.len() as u16 + 4)),
        Err(ClientError::Decompression(_))
    ));
    assert!(matches!(
        decompress_payload(&compressed(&data, data.len() as u16 - 4)),
        Err(ClientError::Decompression(_))
    ));
    assert!(matches!(
        decompress_payload(&[10, 0, 0xff, 0xff, 0xff]),
        Err(ClientError::Decompression(_))
    ));
}
