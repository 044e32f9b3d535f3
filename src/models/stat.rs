use chrono::{DateTime, Utc};
use serde::Serialize;

use super::content::ContentObject;

/// Block size used when reporting how many blocks an object spans.
pub const BLOCK_SIZE: i64 = 256 * 1024;

/// Summary returned by `stat`.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ObjectStat {
    pub cid: String,
    pub name: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub pinned: bool,
    pub uploaded_at: DateTime<Utc>,
    pub blocks: i64,
}

impl From<ContentObject> for ObjectStat {
    fn from(obj: ContentObject) -> Self {
        let blocks = block_count(obj.size_bytes);
        Self {
            cid: obj.cid,
            name: obj.name,
            size_bytes: obj.size_bytes,
            mime_type: obj.mime_type,
            pinned: obj.pinned,
            uploaded_at: obj.uploaded_at,
            blocks,
        }
    }
}

/// Number of `BLOCK_SIZE` blocks needed for `size_bytes` of content.
pub fn block_count(size_bytes: i64) -> i64 {
    if size_bytes <= 0 {
        0
    } else {
        (size_bytes + BLOCK_SIZE - 1) / BLOCK_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_count_rounds_up() {
        assert_eq!(block_count(0), 0);
        assert_eq!(block_count(1), 1);
        assert_eq!(block_count(BLOCK_SIZE), 1);
        assert_eq!(block_count(BLOCK_SIZE + 1), 2);
        assert_eq!(block_count(10 * BLOCK_SIZE), 10);
    }
}
