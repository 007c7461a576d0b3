use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::Tree;
use tracing::warn;

use crate::error::HostResult;
use crate::provider::{HostSummary, Metadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

/// Persisted host metadata. `expires_at == None` means permanent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: String,
    pub name: String,
    pub uri: String,
    pub visibility: Visibility,
    pub blob_id: String,
    /// Hex SHA-256 of the blob, checked on every read.
    pub blob_sha256: String,
    pub inserted_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl HostRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool { self.expires_at.is_some_and(|t| t <= now) }

    pub fn summary(&self) -> HostSummary {
        HostSummary { uri: self.uri.clone(), name: self.name.clone(), metadata: self.metadata.clone() }
    }
}

/// Fields supplied by the caller; id, digest and insertion time are stamped by the store.
#[derive(Debug, Clone)]
pub struct NewHostRecord {
    pub name: String,
    pub uri: String,
    pub visibility: Visibility,
    pub blob_id: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Metadata,
}

/// Read side of the record trees. Expired records are invisible here even before the sweeper runs.
#[derive(Clone)]
pub struct HostRecordStore {
    pub(super) records: Tree,
    pub(super) uri_index: Tree,
    pub(super) name_index: Tree,
}

pub(super) fn decode(raw: &[u8]) -> HostResult<HostRecord> { Ok(serde_json::from_slice(raw)?) }

impl HostRecordStore {
    pub fn get(&self, id: &str, now: DateTime<Utc>) -> HostResult<Option<HostRecord>> {
        match self.records.get(id.as_bytes())? {
            Some(raw) => Ok(Some(decode(&raw)?).filter(|r| !r.is_expired_at(now))),
            None => Ok(None),
        }
    }

    pub fn get_by_uri(&self, uri: &str, now: DateTime<Utc>) -> HostResult<Option<HostRecord>> {
        match self.uri_index.get(uri.as_bytes())? {
            Some(id) => self.get(&String::from_utf8_lossy(&id), now),
            None => Ok(None),
        }
    }

    /// Live records, optionally filtered by visibility, oldest first.
    pub fn list(&self, visibility: Option<Visibility>, now: DateTime<Utc>) -> HostResult<Vec<HostRecord>> {
        let mut out = Vec::new();
        for kv in self.records.iter() {
            let (id, raw) = kv?;
            let rec = match decode(&raw) {
                Ok(rec) => rec,
                Err(e) => {
                    warn!(id = %String::from_utf8_lossy(&id), error = %e, "undecodable host record skipped");
                    continue;
                }
            };
            if rec.is_expired_at(now) || visibility.is_some_and(|v| v != rec.visibility) {
                continue;
            }
            out.push(rec);
        }
        out.sort_by(|a, b| a.inserted_at.cmp(&b.inserted_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    /// True when a manifest-provisioned record already claims `name`.
    pub fn name_provisioned(&self, name: &str) -> HostResult<bool> { Ok(self.name_index.contains_key(name.as_bytes())?) }

    /// `(name, record id)` for every manifest-provisioned record.
    pub fn provisioned(&self) -> HostResult<Vec<(String, String)>> {
        let mut out = Vec::new();
        for kv in self.name_index.iter() {
            let (name, id) = kv?;
            out.push((String::from_utf8_lossy(&name).into_owned(), String::from_utf8_lossy(&id).into_owned()));
        }
        Ok(out)
    }

    /// Physical record count, expired ones included.
    pub fn stored_len(&self) -> usize { self.records.len() }
}
