//! Content identifiers.
//!
//! A CID here is a mock of the IPFS v0 form: the literal prefix `Qm`
//! followed by the first 44 lowercase hex characters of the SHA-256 digest
//! of the content. Identical bytes always map to the same CID.

use sha2::{Digest, Sha256};

/// Prefix shared by every CID.
pub const CID_PREFIX: &str = "Qm";

/// Number of hex digest characters kept after the prefix.
pub const CID_DIGEST_LEN: usize = 44;

/// Compute the CID of an in-memory buffer.
pub fn compute_cid(data: &[u8]) -> String {
    let mut hasher = CidHasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Incremental CID computation for streamed content.
#[derive(Clone, Default)]
pub struct CidHasher {
    inner: Sha256,
}

impl CidHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finalize(self) -> String {
        let digest = hex::encode(self.inner.finalize());
        format!("{}{}", CID_PREFIX, &digest[..CID_DIGEST_LEN])
    }
}

/// Check that `cid` has exactly the shape produced by [`compute_cid`].
///
/// Anything else is rejected before it can reach SQL or the filesystem.
pub fn is_valid_cid(cid: &str) -> bool {
    match cid.strip_prefix(CID_PREFIX) {
        Some(digest) => {
            digest.len() == CID_DIGEST_LEN
                && digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        }
        None => false,
    }
}
