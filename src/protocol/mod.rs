//! Protocol Module
//!
//! Defines the binary wire protocol spoken with the store.
//!
//! ## Message Layout
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────────┬─────────────────┐
//! │Flags (1) │ Size (3) │ Type (2) │ RequestId (4)│     Body        │
//! └──────────┴──────────┴──────────┴──────────────┴─────────────────┘
//! ```
//!
//! ### Flags
//! - 0x01: FRAGMENTED - more pages follow under the same request id
//! - 0x02: COMPRESSED - body is an LZ4 block behind a 2-byte length
//!
//! ### Request/Response Pairs
//! - LOGIN, AUTH       - handshake, once per connection
//! - ADD, UPDATE, REMOVE
//! - QUERY, SUBSCRIBE  - answered with pages of entities
//! - UNSUBSCRIBE
//! - ERROR response    - replaces any response; carries a 2-byte code
//!
//! Response pages carry entities packed back to back; see [`entity`].

mod codec;
pub mod entity;
mod message;

pub use codec::{
    decode_add_response, decode_error_response, decode_header, decode_login_response,
    decode_message, decompress_payload, encode_add_request, encode_auth_request,
    encode_header, encode_login_request, encode_message, encode_query_request,
    encode_remove_request, encode_subscribe_request, encode_unsubscribe_request,
    encode_update_request, expect_body, page_payload, LoginSalts, SALT_SIZE, SIGNATURE_SIZE,
};
pub use entity::{
    encode_entity, encode_table_entity, iter_entities, read_bounded, EntityView, Entities,
    TableView, ENTITY_HEADER_SIZE, TABLE_HEADER_SIZE,
};
pub use message::{
    Header, Message, MessageType, QueryKind, WellKnownTable, HEADER_SIZE, MAX_MESSAGE_SIZE,
    MAX_SIZE_FIELD,
};
