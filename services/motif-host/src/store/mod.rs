//! Durable host records and graph blobs on sled.
//!
//! Four trees: `records` (id -> json record), `blobs` (blob id -> bytes), `uri_index`
//! (uri -> record id) and `name_index` (manifest name -> record id). Every write touching more
//! than one tree runs in a single sled transaction, so a record never exists without its blob
//! and vice versa.

use chrono::{DateTime, Utc};
use sled::transaction::{abort, ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

mod blob;
mod record;

pub use blob::{digest, new_blob_id, GraphBlobStore};
pub use record::{HostRecord, HostRecordStore, NewHostRecord, Visibility};

use crate::error::{HostError, HostResult};

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(HostRecord),
    /// `unique_name` was requested and a provisioned record already owns the name.
    NameTaken,
}

#[derive(Debug)]
enum Conflict {
    NameTaken,
    UriTaken(String),
    Codec(String),
}

#[derive(Clone)]
pub struct HostStore {
    db: Db,
    records: HostRecordStore,
    blobs: GraphBlobStore,
}

impl HostStore {
    pub fn open(path: impl AsRef<Path>) -> HostResult<Self> { Self::from_db(sled::open(path)?) }

    /// In-memory store removed on drop; used by tests and ephemeral runs.
    pub fn temporary() -> HostResult<Self> { Self::from_db(sled::Config::new().temporary(true).open()?) }

    fn from_db(db: Db) -> HostResult<Self> {
        let records = HostRecordStore {
            records: db.open_tree("records")?,
            uri_index: db.open_tree("uri_index")?,
            name_index: db.open_tree("name_index")?,
        };
        let blobs = GraphBlobStore { blobs: db.open_tree("blobs")? };
        Ok(Self { db, records, blobs })
    }

    pub fn records(&self) -> &HostRecordStore { &self.records }

    pub fn blobs(&self) -> &GraphBlobStore { &self.blobs }

    /// Writes record, blob and index entries atomically.
    ///
    /// Fails with `Storage` when a live record already holds the uri. With `unique_name`, an
    /// existing provisioned name short-circuits to `NameTaken` instead of writing anything.
    pub fn insert(&self, new: NewHostRecord, bytes: &[u8], unique_name: bool, now: DateTime<Utc>) -> HostResult<InsertOutcome> {
        let record = HostRecord {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: new.name,
            uri: new.uri,
            visibility: new.visibility,
            blob_id: new.blob_id,
            blob_sha256: digest(bytes),
            inserted_at: now,
            expires_at: new.expires_at,
            metadata: new.metadata,
        };
        let encoded = serde_json::to_vec(&record)?;
        let trees = (&self.records.records, &self.records.uri_index, &self.records.name_index, &self.blobs.blobs);
        let res = trees.transaction(|(rt, ut, nt, bt)| {
            if unique_name && nt.get(record.name.as_bytes())?.is_some() {
                return abort(Conflict::NameTaken);
            }
            if let Some(existing) = ut.get(record.uri.as_bytes())? {
                if let Some(raw) = rt.get(&existing)? {
                    let live = record::decode(&raw)
                        .map_err(|e| ConflictableTransactionError::Abort(Conflict::Codec(e.to_string())))?;
                    if !live.is_expired_at(now) {
                        return abort(Conflict::UriTaken(live.id));
                    }
                }
            }
            bt.insert(record.blob_id.as_bytes(), bytes)?;
            rt.insert(record.id.as_bytes(), encoded.as_slice())?;
            ut.insert(record.uri.as_bytes(), record.id.as_bytes())?;
            if unique_name {
                nt.insert(record.name.as_bytes(), record.id.as_bytes())?;
            }
            Ok(())
        });
        match res {
            Ok(()) => {
                self.db.flush()?;
                debug!(id = %record.id, uri = %record.uri, blob = %record.blob_id, "host record inserted");
                Ok(InsertOutcome::Inserted(record))
            }
            Err(TransactionError::Abort(Conflict::NameTaken)) => Ok(InsertOutcome::NameTaken),
            Err(TransactionError::Abort(Conflict::UriTaken(owner))) => {
                Err(HostError::Storage(format!("uri {} already held by live record {owner}", record.uri)))
            }
            Err(TransactionError::Abort(Conflict::Codec(e))) => Err(HostError::Storage(e)),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    /// Explicit deletion of a record together with its blob and index entries.
    pub fn remove(&self, record_id: &str) -> HostResult<bool> { self.remove_if(record_id, None) }

    // With `expired_at`, the record is only removed if it is expired at that instant.
    fn remove_if(&self, record_id: &str, expired_at: Option<DateTime<Utc>>) -> HostResult<bool> {
        let trees = (&self.records.records, &self.records.uri_index, &self.records.name_index, &self.blobs.blobs);
        let res = trees.transaction(|(rt, ut, nt, bt)| {
            let Some(raw) = rt.get(record_id.as_bytes())? else { return Ok(false) };
            let rec = record::decode(&raw).map_err(|e| ConflictableTransactionError::Abort(e.to_string()))?;
            if expired_at.is_some_and(|now| !rec.is_expired_at(now)) {
                return Ok(false);
            }
            rt.remove(record_id.as_bytes())?;
            bt.remove(rec.blob_id.as_bytes())?;
            if ut.get(rec.uri.as_bytes())?.is_some_and(|owner| owner == record_id.as_bytes()) {
                ut.remove(rec.uri.as_bytes())?;
            }
            if nt.get(rec.name.as_bytes())?.is_some_and(|owner| owner == record_id.as_bytes()) {
                nt.remove(rec.name.as_bytes())?;
            }
            Ok(true)
        });
        match res {
            Ok(removed) => Ok(removed),
            Err(TransactionError::Abort(e)) => Err(HostError::Storage(e)),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    /// Physically removes every record (and blob) expired at `now`. Returns how many went.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> HostResult<usize> {
        let mut expired = Vec::new();
        for kv in self.records.records.iter() {
            let (id, raw) = kv?;
            match record::decode(&raw) {
                Ok(rec) if rec.is_expired_at(now) => expired.push(String::from_utf8_lossy(&id).into_owned()),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "undecodable host record left in place"),
            }
        }
        let mut removed = 0;
        for id in expired {
            if self.remove_if(&id, Some(now))? {
                removed += 1;
            }
        }
        if removed > 0 {
            self.db.flush()?;
            motif_core::HOST_METRICS.records_swept_total.add(removed as u64, &[]);
            info!(removed, "expired host records swept");
        }
        Ok(removed)
    }
}

/// Periodically sweeps expired records until the runtime shuts down.
pub fn spawn_expiry_sweeper(store: Arc<HostStore>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let store = store.clone();
            match tokio::task::spawn_blocking(move || store.sweep_expired(Utc::now())).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "expiry sweep failed"),
                Err(e) => warn!(error = ?e, "expiry sweep task panicked"),
            }
        }
    })
}
