//! Writes manifest hosts and uploads into the record/blob store.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, instrument};

use crate::discovery::ManifestHost;
use crate::error::{ConfigError, HostResult};
use crate::store::{new_blob_id, HostStore, InsertOutcome, NewHostRecord, Visibility};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub inserted: usize,
    /// Names already claimed by an earlier provisioning run.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReceipt {
    pub uri: String,
    pub record_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Idempotent: hosts whose name is already provisioned are skipped without reading their file.
/// The name check is repeated inside the insert transaction, so concurrent runs cannot duplicate.
#[instrument(skip_all, fields(hosts = hosts.len()))]
pub fn provision_manifest(store: &HostStore, hosts: &[ManifestHost], now: DateTime<Utc>) -> HostResult<ProvisionReport> {
    let mut report = ProvisionReport::default();
    for host in hosts {
        if store.records().name_provisioned(&host.name)? {
            debug!(name = %host.name, "already provisioned");
            report.skipped += 1;
            continue;
        }
        let bytes = std::fs::read(&host.path)
            .map_err(|e| ConfigError::Unreadable { path: host.path.clone(), cause: e.to_string() })?;
        let new = NewHostRecord {
            name: host.name.clone(),
            uri: host.uri.clone(),
            visibility: Visibility::Public,
            blob_id: new_blob_id(),
            expires_at: None,
            metadata: host.metadata.clone(),
        };
        match store.insert(new, &bytes, true, now)? {
            InsertOutcome::Inserted(rec) => {
                info!(name = %rec.name, uri = %rec.uri, id = %rec.id, bytes = bytes.len(), "host provisioned");
                motif_core::HOST_METRICS.hosts_provisioned_total.add(1, &[]);
                report.inserted += 1;
            }
            InsertOutcome::NameTaken => report.skipped += 1,
        }
    }
    Ok(report)
}

/// Removes manifest-provisioned records whose name the current manifest no longer lists.
/// Uploads are never touched; they have no name-index entry.
#[instrument(skip_all, fields(keep = keep.len()))]
pub fn retire_manifest_hosts(store: &HostStore, keep: &[ManifestHost]) -> HostResult<usize> {
    let keep: HashSet<&str> = keep.iter().map(|h| h.name.as_str()).collect();
    let mut retired = 0;
    for (name, id) in store.records().provisioned()? {
        if keep.contains(name.as_str()) {
            continue;
        }
        if store.remove(&id)? {
            info!(name = %name, id = %id, "host dropped from manifest, record retired");
            retired += 1;
        }
    }
    Ok(retired)
}

/// Keeps `[A-Za-z0-9._-]`, maps everything else to `_`, and never starts with a dot.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let cleaned: String =
        base.chars().map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' }).collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() { "graph".to_string() } else { cleaned.to_string() }
}

pub fn upload_uri(blob_id: &str, filename: &str) -> String { format!("upload://{blob_id}_{filename}") }

/// Stores an uploaded graph as a private record expiring `ttl` after `now`.
///
/// Never idempotent: every call mints a fresh blob id and therefore a fresh uri.
pub fn provision_upload(store: &HostStore, filename: &str, bytes: &[u8], ttl: Duration, now: DateTime<Utc>) -> HostResult<UploadReceipt> {
    let filename = sanitize_filename(filename);
    let blob_id = new_blob_id();
    let uri = upload_uri(&blob_id, &filename);
    let expires_at = now + ttl;
    let mut metadata = crate::provider::Metadata::new();
    metadata.insert("filename".into(), filename.clone().into());
    metadata.insert("size".into(), bytes.len().into());
    let new = NewHostRecord { name: filename, uri, visibility: Visibility::Private, blob_id, expires_at: Some(expires_at), metadata };
    match store.insert(new, bytes, false, now)? {
        InsertOutcome::Inserted(rec) => {
            motif_core::HOST_METRICS.uploads_total.add(1, &[]);
            info!(uri = %rec.uri, id = %rec.id, %expires_at, "upload stored");
            Ok(UploadReceipt { uri: rec.uri, record_id: rec.id, expires_at })
        }
        // unique_name is off for uploads
        InsertOutcome::NameTaken => Err(crate::error::HostError::Storage("upload rejected by name index".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Metadata;
    use std::path::PathBuf;

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("toy.graph"), "toy.graph");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("my graph (1).json"), "my_graph__1_.json");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename(""), "graph");
    }

    #[test]
    fn unreadable_manifest_file_is_a_configuration_error() {
        let store = HostStore::temporary().unwrap();
        let host = ManifestHost {
            name: "ghost".into(),
            uri: "file://ghost".into(),
            path: PathBuf::from("/definitely/not/here.graph"),
            metadata: Metadata::new(),
        };
        let err = provision_manifest(&store, &[host], Utc::now()).unwrap_err();
        assert!(matches!(err, crate::error::HostError::Configuration(ConfigError::Unreadable { .. })));
        assert_eq!(store.records().stored_len(), 0);
    }

    #[test]
    fn hosts_dropped_from_the_manifest_are_retired() {
        let dir = std::env::temp_dir().join(format!("motif-provision-{}", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir_all(&dir).unwrap();
        let host = |name: &str| {
            std::fs::write(dir.join(format!("{name}.graph")), "a b\n").unwrap();
            ManifestHost { name: name.into(), uri: format!("file://{name}"), path: dir.join(format!("{name}.graph")), metadata: Metadata::new() }
        };
        let (toy, fly) = (host("toy"), host("fly"));
        let store = HostStore::temporary().unwrap();
        let now = Utc::now();
        provision_manifest(&store, &[toy.clone(), fly], now).unwrap();
        let upload = provision_upload(&store, "mine.graph", b"x y\n", Duration::minutes(5), now).unwrap();

        assert_eq!(retire_manifest_hosts(&store, &[toy.clone()]).unwrap(), 1);
        assert!(store.records().get_by_uri("file://fly", now).unwrap().is_none());
        assert!(!store.records().name_provisioned("fly").unwrap());
        assert!(store.records().get_by_uri("file://toy", now).unwrap().is_some());
        assert!(store.records().get(&upload.record_id, now).unwrap().is_some());
        assert_eq!(retire_manifest_hosts(&store, &[toy]).unwrap(), 0);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn upload_is_private_and_expires() {
        let store = HostStore::temporary().unwrap();
        let now = Utc::now();
        let receipt = provision_upload(&store, "toy.graph", b"a b\n", Duration::minutes(60), now).unwrap();
        assert!(receipt.uri.starts_with("upload://") && receipt.uri.ends_with("_toy.graph"));
        let rec = store.records().get(&receipt.record_id, now).unwrap().unwrap();
        assert_eq!(rec.visibility, Visibility::Private);
        assert_eq!(rec.expires_at, Some(now + Duration::minutes(60)));
        assert!(store.records().get(&receipt.record_id, now + Duration::minutes(61)).unwrap().is_none());
    }
}
