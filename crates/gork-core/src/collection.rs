//! Pagination primitives shared by every collection scan.

use crate::{BrokerError, Result, ValidationErrors};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Page size used when the caller passes zero
pub const DEFAULT_LIMIT: u8 = 25;

/// Parameters applied to collection scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionParams {
    /// Continuation token from a previous page, empty to start from the beginning
    pub cursor: String,
    /// Number of records to return
    pub limit: u8,
}

impl CollectionParams {
    pub fn new(cursor: impl Into<String>, limit: u8) -> Self {
        CollectionParams {
            cursor: cursor.into(),
            limit: if limit == 0 { DEFAULT_LIMIT } else { limit },
        }
    }

    pub fn first(limit: u8) -> Self {
        Self::new(String::new(), limit)
    }

    /// Decode the cursor into the position after which the scan resumes
    pub fn start_after(&self) -> Result<Option<OrderKey>> {
        if self.cursor.is_empty() {
            return Ok(None);
        }
        OrderKey::from_cursor(&self.cursor).map(Some)
    }
}

impl Default for CollectionParams {
    fn default() -> Self {
        Self::first(DEFAULT_LIMIT)
    }
}

/// Information returned alongside a page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectionInfo {
    /// Cursor for the next page, empty once the collection is exhausted
    pub cursor: String,
    /// Total number of records in the collection
    pub total: u64,
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub info: CollectionInfo,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        !self.info.cursor.is_empty()
    }
}

/// Position of a record in creation order: creation time, then ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderKey {
    micros: i64,
    id: Uuid,
}

impl OrderKey {
    pub const LEN: usize = 24;

    pub fn new(created_at: DateTime<Utc>, id: Uuid) -> Self {
        OrderKey {
            micros: created_at.timestamp_micros(),
            id,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Big-endian encoding whose byte order matches creation order
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[..8].copy_from_slice(&sortable_i64(self.micros));
        bytes[8..].copy_from_slice(self.id.as_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }
        let mut micros = [0u8; 8];
        micros.copy_from_slice(&bytes[..8]);
        let id = Uuid::from_slice(&bytes[8..]).ok()?;
        Some(OrderKey {
            micros: (u64::from_be_bytes(micros) ^ SIGN_BIT) as i64,
            id,
        })
    }

    pub fn to_cursor(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }

    pub fn from_cursor(cursor: &str) -> Result<Self> {
        URL_SAFE_NO_PAD
            .decode(cursor)
            .ok()
            .and_then(|bytes| Self::from_bytes(&bytes))
            .ok_or_else(|| {
                let mut errors = ValidationErrors::new();
                errors.add("cursor", "malformed cursor");
                BrokerError::Validation(errors)
            })
    }
}

const SIGN_BIT: u64 = 1 << 63;

/// Encode a signed timestamp so that byte order equals numeric order
pub fn sortable_i64(value: i64) -> [u8; 8] {
    ((value as u64) ^ SIGN_BIT).to_be_bytes()
}
