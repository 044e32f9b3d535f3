//! Represents a content-addressed object held by the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata for one stored blob.
///
/// The payload itself lives on disk at `local_path`; this struct mirrors a
/// row of the `objects` table and never carries content bytes.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct ContentObject {
    /// Content identifier, derived from the SHA-256 of the payload.
    pub cid: String,

    /// Name the content was added under (file name or caller supplied).
    pub name: String,

    /// Payload size in bytes.
    pub size_bytes: i64,

    /// Content type served on retrieval.
    pub mime_type: String,

    /// Pinned objects are never garbage collected.
    pub pinned: bool,

    /// When the content was last added.
    pub uploaded_at: DateTime<Utc>,

    /// Location of the payload on disk.
    pub local_path: String,
}
