//! Entity layouts
//!
//! Bounds-checked views over entities packed into a response payload, and
//! encoders for the entities carried by add/update requests.
//!
//! ## Entity Format
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────────────────────┐
//! │  Id (8)  │ Time (8) │ Size (2) │   Type-specific data     │
//! └──────────┴──────────┴──────────┴──────────────────────────┘
//! ```
//!
//! ## Table Entity Format
//! ```text
//! ┌───────────────────┬───────────┬───────────────┬──────────┐
//! │ Entity header(18) │ Flags (1) │ NameSize (2)  │   Name   │
//! └───────────────────┴───────────┴───────────────┴──────────┘
//! ```
//!
//! `Size` covers the whole entity, header included.

use std::borrow::Cow;

use bytes::{BufMut, BytesMut};

use crate::error::{ClientError, Result};

/// Entity header size: id (8) + time (8) + size (2)
pub const ENTITY_HEADER_SIZE: usize = 18;

/// Table entity header size: entity header + flags (1) + name size (2)
pub const TABLE_HEADER_SIZE: usize = ENTITY_HEADER_SIZE + 3;

/// Largest entity the 16-bit size field can describe
pub const MAX_ENTITY_SIZE: usize = u16::MAX as usize;

// =============================================================================
// Bounded reads
// =============================================================================

/// Borrow `length` bytes at `offset` of `base`, rejecting any range that
/// reaches past `declared_size` or past the end of `base`.
pub fn read_bounded(base: &[u8], offset: usize, length: usize, declared_size: usize) -> Result<&[u8]> {
    let limit = declared_size.min(base.len());
    match offset.checked_add(length) {
        Some(end) if end <= limit => Ok(&base[offset..end]),
        _ => Err(ClientError::OutOfBounds {
            offset,
            length,
            limit,
        }),
    }
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u64_at(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

// =============================================================================
// Views
// =============================================================================

/// A borrowed entity, exactly `size` bytes long
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityView<'a> {
    bytes: &'a [u8],
}

impl<'a> EntityView<'a> {
    /// View the entity at the start of `bytes`.
    ///
    /// Fails if the header is incomplete, if the declared size is smaller
    /// than the header, or if it runs past the end of `bytes`.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < ENTITY_HEADER_SIZE {
            return Err(ClientError::Protocol(format!(
                "Incomplete entity header: expected {} bytes, got {}",
                ENTITY_HEADER_SIZE,
                bytes.len()
            )));
        }
        let size = u16_at(bytes, 16) as usize;
        if size < ENTITY_HEADER_SIZE {
            return Err(ClientError::Protocol(format!(
                "Entity size {} is smaller than its header",
                size
            )));
        }
        let bytes = read_bounded(bytes, 0, size, size)?;
        Ok(Self { bytes })
    }

    pub fn id(&self) -> u64 {
        u64_at(self.bytes, 0)
    }

    pub fn time(&self) -> u64 {
        u64_at(self.bytes, 8)
    }

    pub fn size(&self) -> u16 {
        u16_at(self.bytes, 16)
    }

    /// Bytes following the entity header
    pub fn data(&self) -> &'a [u8] {
        &self.bytes[ENTITY_HEADER_SIZE..]
    }

    /// The whole entity, header included
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Read a string field stored inside this entity
    pub fn read_bytes(&self, offset: usize, length: usize) -> Result<&'a [u8]> {
        read_bounded(self.bytes, offset, length, self.size() as usize)
    }
}

/// A row of the tables directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableView<'a> {
    entity: EntityView<'a>,
    name: &'a [u8],
}

impl<'a> TableView<'a> {
    /// Interpret an entity as a table row; the name must lie inside the entity
    pub fn from_entity(entity: EntityView<'a>) -> Result<Self> {
        let bytes = entity.as_bytes();
        if bytes.len() < TABLE_HEADER_SIZE {
            return Err(ClientError::Protocol(format!(
                "Table entity too small: {} bytes",
                bytes.len()
            )));
        }
        let name_size = u16_at(bytes, ENTITY_HEADER_SIZE + 1) as usize;
        let name = entity.read_bytes(TABLE_HEADER_SIZE, name_size)?;
        Ok(Self { entity, name })
    }

    pub fn id(&self) -> u64 {
        self.entity.id()
    }

    pub fn time(&self) -> u64 {
        self.entity.time()
    }

    pub fn flags(&self) -> u8 {
        self.entity.as_bytes()[ENTITY_HEADER_SIZE]
    }

    pub fn name_bytes(&self) -> &'a [u8] {
        self.name
    }

    /// The table name; invalid UTF-8 is replaced rather than rejected
    pub fn name(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.name)
    }

    pub fn entity(&self) -> EntityView<'a> {
        self.entity
    }
}

// =============================================================================
// Iteration
// =============================================================================

/// Lazy iterator over entities packed back to back.
///
/// Stops at the end of the payload. A malformed entity yields one error
/// and ends the iteration.
#[derive(Debug, Clone)]
pub struct Entities<'a> {
    payload: &'a [u8],
    position: usize,
    min_size: usize,
    failed: bool,
}

/// Iterate the entities of a payload; each must be at least `min_size` bytes
pub fn iter_entities(payload: &[u8], min_size: usize) -> Entities<'_> {
    Entities {
        payload,
        position: 0,
        min_size: min_size.max(ENTITY_HEADER_SIZE),
        failed: false,
    }
}

impl<'a> Iterator for Entities<'a> {
    type Item = Result<EntityView<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.payload.len() {
            return None;
        }

        let result = EntityView::parse(&self.payload[self.position..]).and_then(|entity| {
            if (entity.size() as usize) < self.min_size {
                return Err(ClientError::Protocol(format!(
                    "Entity at offset {} is {} bytes, expected at least {}",
                    self.position,
                    entity.size(),
                    self.min_size
                )));
            }
            Ok(entity)
        });

        match result {
            Ok(entity) => {
                self.position += entity.size() as usize;
                Some(Ok(entity))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Append an entity with the given header fields and trailing data
pub fn encode_entity(buf: &mut BytesMut, id: u64, time: u64, data: &[u8]) -> Result<()> {
    let size = ENTITY_HEADER_SIZE + data.len();
    if size > MAX_ENTITY_SIZE {
        return Err(ClientError::InvalidArgument(format!(
            "entity of {} bytes exceeds {} bytes",
            size, MAX_ENTITY_SIZE
        )));
    }

    buf.reserve(size);
    buf.put_u64_le(id);
    buf.put_u64_le(time);
    buf.put_u16_le(size as u16);
    buf.put_slice(data);
    Ok(())
}

/// Append a table entity: flags, name length, then the raw name bytes
pub fn encode_table_entity(buf: &mut BytesMut, id: u64, time: u64, flags: u8, name: &str) -> Result<()> {
    let size = TABLE_HEADER_SIZE + name.len();
    if size > MAX_ENTITY_SIZE {
        return Err(ClientError::InvalidArgument(format!(
            "table name of {} bytes is too long",
            name.len()
        )));
    }

    buf.reserve(size);
    buf.put_u64_le(id);
    buf.put_u64_le(time);
    buf.put_u16_le(size as u16);
    buf.put_u8(flags);
    buf.put_u16_le(name.len() as u16);
    buf.put_slice(name.as_bytes());
    Ok(())
}
