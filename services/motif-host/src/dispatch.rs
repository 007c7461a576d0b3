//! Resolves a host URI to a provider and runs a motif against it.

use chrono::{Duration, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

use crate::engine::Embedding;
use crate::error::{HostError, HostResult};
use crate::motif::Motif;
use crate::provider::{HostProvider, HostSummary, LocalEngineProvider, Provider};
use crate::provision::{self, UploadReceipt};
use crate::registry::HostRegistry;
use crate::store::{HostStore, Visibility};

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub embeddings: Vec<Embedding>,
    pub host: HostSummary,
}

impl QueryOutcome {
    /// Column-oriented table `{motif node: {row index: host node}}`.
    pub fn to_column_map(&self, motif: &Motif) -> Value { to_column_map(motif, &self.embeddings) }
}

pub fn to_column_map(motif: &Motif, embeddings: &[Embedding]) -> Value {
    let mut columns = Map::new();
    for node in motif.nodes() {
        let rows: Map<String, Value> = embeddings
            .iter()
            .enumerate()
            .filter_map(|(row, emb)| emb.get(node).map(|host| (row.to_string(), Value::String(host.clone()))))
            .collect();
        columns.insert(node.clone(), Value::Object(rows));
    }
    Value::Object(columns)
}

/// Explicit request context: registry plus the optional durable store behind it.
#[derive(Clone)]
pub struct QueryDispatcher {
    registry: Arc<HostRegistry>,
    store: Option<Arc<HostStore>>,
    upload_ttl: Duration,
}

impl QueryDispatcher {
    pub fn new(registry: Arc<HostRegistry>, store: Option<Arc<HostStore>>, upload_ttl: Duration) -> Self {
        Self { registry, store, upload_ttl }
    }

    pub fn registry(&self) -> &Arc<HostRegistry> { &self.registry }

    pub fn store(&self) -> Option<&Arc<HostStore>> { self.store.as_ref() }

    /// Registry hosts first, then live public records whose uri the registry does not serve.
    pub fn list_hosts(&self) -> HostResult<Vec<HostSummary>> {
        let mut hosts = self.registry.summaries();
        if let Some(store) = &self.store {
            let mut seen: HashSet<String> = hosts.iter().map(|h| h.uri.clone()).collect();
            for rec in store.records().list(Some(Visibility::Public), Utc::now())? {
                if seen.insert(rec.uri.clone()) {
                    hosts.push(rec.summary());
                }
            }
        }
        Ok(hosts)
    }

    #[instrument(skip(self, motif), fields(motif_nodes = motif.nodes().len()))]
    pub async fn resolve_and_find(&self, uri: &str, motif: &Motif) -> HostResult<QueryOutcome> {
        let started = Instant::now();
        let res = self.resolve_and_find_inner(uri, motif).await;
        let outcome = match &res {
            Ok(_) => "ok",
            Err(e) => e.outcome(),
        };
        let m = &motif_core::HOST_METRICS;
        m.queries_total.add(1, &[KeyValue::new("outcome", outcome)]);
        m.query_latency_ms.record(started.elapsed().as_secs_f64() * 1000.0, &[]);
        match &res {
            Ok(o) => debug!(embeddings = o.embeddings.len(), "query complete"),
            Err(e) => warn!(error = %e, outcome, "query failed"),
        }
        res
    }

    async fn resolve_and_find_inner(&self, uri: &str, motif: &Motif) -> HostResult<QueryOutcome> {
        let provider = match self.registry.get_host(uri) {
            Ok(p) => p,
            Err(HostError::HostNotFound(_)) => Arc::new(self.materialize(uri).await?),
            Err(e) => return Err(e),
        };
        let embeddings = provider.find(motif).await?;
        Ok(QueryOutcome { embeddings, host: provider.summary() })
    }

    /// Builds a transient provider from a live record and its verified blob.
    async fn materialize(&self, uri: &str) -> HostResult<Provider> {
        let Some(store) = self.store.clone() else { return Err(HostError::HostNotFound(uri.to_string())) };
        let uri = uri.to_string();
        tokio::task::spawn_blocking(move || -> HostResult<Provider> {
            let rec = store.records().get_by_uri(&uri, Utc::now())?.ok_or_else(|| HostError::HostNotFound(uri.clone()))?;
            let bytes = store.blobs().fetch_verified(&rec.blob_id, &rec.blob_sha256)?;
            let provider = LocalEngineProvider::from_bytes(rec.name, rec.uri, rec.metadata, &bytes)
                .map_err(|e| HostError::backend(&uri, format!("cannot load stored graph: {e}")))?;
            debug!(uri = %uri, nodes = provider.graph().node_count(), "record-backed provider materialized");
            Ok(Provider::from(provider))
        })
        .await
        .map_err(|e| HostError::Storage(format!("record lookup task failed: {e}")))?
    }

    pub async fn provision_upload(&self, filename: &str, bytes: Vec<u8>) -> HostResult<UploadReceipt> {
        let Some(store) = self.store.clone() else { return Err(HostError::Storage("no record store configured".into())) };
        let filename = filename.to_string();
        let ttl = self.upload_ttl;
        tokio::task::spawn_blocking(move || provision::provision_upload(&store, &filename, &bytes, ttl, Utc::now()))
            .await
            .map_err(|e| HostError::Storage(format!("upload task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Metadata;
    use crate::registry::CollisionPolicy;
    use serde_json::json;

    fn dispatcher() -> QueryDispatcher {
        let toy = LocalEngineProvider::from_bytes("toy", "file://toy", Metadata::new(), b"a b\nb c\n").unwrap();
        let registry = HostRegistry::build(vec![toy.into()], CollisionPolicy::LastWins).unwrap();
        QueryDispatcher::new(Arc::new(registry), Some(Arc::new(HostStore::temporary().unwrap())), Duration::minutes(60))
    }

    #[test]
    fn column_map_shape() {
        let motif = Motif::parse("A -> B").unwrap();
        let embeddings: Vec<Embedding> = vec![
            [("A".to_string(), "a".to_string()), ("B".to_string(), "b".to_string())].into(),
            [("A".to_string(), "b".to_string()), ("B".to_string(), "c".to_string())].into(),
        ];
        assert_eq!(to_column_map(&motif, &embeddings), json!({"A": {"0": "a", "1": "b"}, "B": {"0": "b", "1": "c"}}));
        assert_eq!(to_column_map(&motif, &[]), json!({"A": {}, "B": {}}));
    }

    #[tokio::test]
    async fn registry_host_resolves() {
        let d = dispatcher();
        let out = d.resolve_and_find("file://toy", &Motif::parse("A -> B").unwrap()).await.unwrap();
        assert_eq!(out.embeddings.len(), 2);
        assert_eq!(out.host.name, "toy");
    }

    #[tokio::test]
    async fn uploaded_host_resolves_but_stays_unlisted() {
        let d = dispatcher();
        let receipt = d.provision_upload("mine.graph", b"x y\ny z\nz x\n".to_vec()).await.unwrap();
        let out = d.resolve_and_find(&receipt.uri, &Motif::parse("A -> B\nB -> C\nC -> A").unwrap()).await.unwrap();
        assert_eq!(out.embeddings.len(), 3);
        assert!(d.list_hosts().unwrap().iter().all(|h| h.uri != receipt.uri));
    }

    #[tokio::test]
    async fn unparseable_upload_is_a_backend_failure() {
        let d = dispatcher();
        let receipt = d.provision_upload("bad.json", b"{not json".to_vec()).await.unwrap();
        let err = d.resolve_and_find(&receipt.uri, &Motif::parse("A -> B").unwrap()).await.unwrap_err();
        assert!(matches!(err, HostError::Backend { .. }));
    }

    #[tokio::test]
    async fn registry_only_dispatcher_has_no_upload_path() {
        let d = QueryDispatcher::new(Arc::new(HostRegistry::empty()), None, Duration::minutes(1));
        assert!(matches!(d.resolve_and_find("upload://x", &Motif::parse("A -> B").unwrap()).await, Err(HostError::HostNotFound(_))));
        assert!(matches!(d.provision_upload("a", vec![]).await, Err(HostError::Storage(_))));
    }
}
