use sha2::{Digest, Sha256};
use sled::Tree;

use crate::error::{HostError, HostResult};

/// Raw graph files keyed by opaque blob id. Writes go through `HostStore` transactions so a
/// blob never exists without its owning record.
#[derive(Clone)]
pub struct GraphBlobStore {
    pub(super) blobs: Tree,
}

pub fn new_blob_id() -> String { uuid::Uuid::new_v4().simple().to_string() }

pub fn digest(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

impl GraphBlobStore {
    pub fn get(&self, blob_id: &str) -> HostResult<Option<Vec<u8>>> {
        Ok(self.blobs.get(blob_id.as_bytes())?.map(|v| v.to_vec()))
    }

    /// Fetches a blob and checks it against the digest recorded at insertion.
    pub fn fetch_verified(&self, blob_id: &str, expected_sha256: &str) -> HostResult<Vec<u8>> {
        let bytes = self.get(blob_id)?.ok_or_else(|| HostError::Storage(format!("blob {blob_id} missing")))?;
        let actual = digest(&bytes);
        if actual != expected_sha256 {
            return Err(HostError::Storage(format!("blob {blob_id} corrupt: digest {actual} != {expected_sha256}")));
        }
        Ok(bytes)
    }

    pub fn stored_len(&self) -> usize { self.blobs.len() }
}
