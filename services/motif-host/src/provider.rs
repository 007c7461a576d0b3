use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::engine::{Embedding, MatchEngine};
use crate::error::{HostError, HostResult};
use crate::graph::{GraphError, HostGraph};
use crate::motif::Motif;
use crate::remote::RemoteApiProvider;

pub type Metadata = Map<String, Value>;

/// A backend that can run a compiled motif against one host.
///
/// `find` never mutates the provider; a failure is always an `Err`, never an empty result.
#[async_trait]
pub trait HostProvider: Send + Sync {
    fn get_name(&self) -> &str;
    fn get_uri(&self) -> &str;
    fn get_metadata(&self) -> &Metadata;
    async fn find(&self, motif: &Motif) -> HostResult<Vec<Embedding>>;
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HostSummary {
    pub uri: String,
    pub name: String,
    pub metadata: Metadata,
}

/// Closed set of backend kinds the dispatcher knows how to drive.
#[derive(Debug)]
pub enum Provider {
    LocalEngine(LocalEngineProvider),
    RemoteApi(RemoteApiProvider),
}

impl Provider {
    pub fn kind(&self) -> &'static str {
        match self {
            Provider::LocalEngine(_) => "local_engine",
            Provider::RemoteApi(_) => "remote_api",
        }
    }

    pub fn summary(&self) -> HostSummary {
        HostSummary { uri: self.get_uri().to_string(), name: self.get_name().to_string(), metadata: self.get_metadata().clone() }
    }
}

#[async_trait]
impl HostProvider for Provider {
    fn get_name(&self) -> &str {
        match self {
            Provider::LocalEngine(p) => p.get_name(),
            Provider::RemoteApi(p) => p.get_name(),
        }
    }

    fn get_uri(&self) -> &str {
        match self {
            Provider::LocalEngine(p) => p.get_uri(),
            Provider::RemoteApi(p) => p.get_uri(),
        }
    }

    fn get_metadata(&self) -> &Metadata {
        match self {
            Provider::LocalEngine(p) => p.get_metadata(),
            Provider::RemoteApi(p) => p.get_metadata(),
        }
    }

    async fn find(&self, motif: &Motif) -> HostResult<Vec<Embedding>> {
        match self {
            Provider::LocalEngine(p) => p.find(motif).await,
            Provider::RemoteApi(p) => p.find(motif).await,
        }
    }
}

impl From<LocalEngineProvider> for Provider {
    fn from(p: LocalEngineProvider) -> Self { Provider::LocalEngine(p) }
}

impl From<RemoteApiProvider> for Provider {
    fn from(p: RemoteApiProvider) -> Self { Provider::RemoteApi(p) }
}

/// Owns a loaded graph and the engine bound to it for the provider's lifetime.
///
/// The graph is immutable after construction, so concurrent `find` calls share the engine
/// without a lease.
#[derive(Debug, Clone)]
pub struct LocalEngineProvider {
    name: String,
    uri: String,
    metadata: Metadata,
    engine: Arc<MatchEngine>,
}

impl LocalEngineProvider {
    pub fn new(name: impl Into<String>, uri: impl Into<String>, metadata: Metadata, graph: HostGraph) -> Self {
        Self { name: name.into(), uri: uri.into(), metadata, engine: Arc::new(MatchEngine::new(Arc::new(graph))) }
    }

    pub fn from_bytes(name: impl Into<String>, uri: impl Into<String>, metadata: Metadata, bytes: &[u8]) -> Result<Self, GraphError> {
        let graph = HostGraph::from_bytes(bytes)?;
        Ok(Self::new(name, uri, metadata, graph))
    }

    pub fn graph(&self) -> &HostGraph { self.engine.graph() }
}

#[async_trait]
impl HostProvider for LocalEngineProvider {
    fn get_name(&self) -> &str { &self.name }

    fn get_uri(&self) -> &str { &self.uri }

    fn get_metadata(&self) -> &Metadata { &self.metadata }

    async fn find(&self, motif: &Motif) -> HostResult<Vec<Embedding>> {
        let engine = self.engine.clone();
        let motif = motif.clone();
        // Matching is the CPU-heavy step; keep it off the async workers.
        let found = tokio::task::spawn_blocking(move || engine.find(&motif))
            .await
            .map_err(|e| HostError::backend(&self.uri, format!("matcher task failed: {e}")))?;
        debug!(uri = %self.uri, embeddings = found.len(), "local find complete");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn toy() -> Provider {
        let mut meta = Metadata::new();
        meta.insert("species".into(), Value::String("fly".into()));
        LocalEngineProvider::from_bytes("toy", "file://toy", meta, b"a b\nb c\n").unwrap().into()
    }

    #[tokio::test]
    async fn local_provider_exposes_identity() {
        let p = toy();
        assert_eq!(p.kind(), "local_engine");
        assert_eq!(p.get_name(), "toy");
        assert_eq!(p.get_uri(), "file://toy");
        assert_eq!(p.summary().metadata["species"], "fly");
    }

    #[tokio::test]
    async fn repeated_find_is_stable() {
        let p = toy();
        let motif = Motif::parse("A -> B").unwrap();
        let first: BTreeSet<Embedding> = p.find(&motif).await.unwrap().into_iter().collect();
        for _ in 0..5 {
            let again: BTreeSet<Embedding> = p.find(&motif).await.unwrap().into_iter().collect();
            assert_eq!(first, again);
        }
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn empty_result_is_ok() {
        let p = toy();
        let found = p.find(&Motif::parse("A -> B\nB -> A").unwrap()).await.unwrap();
        assert!(found.is_empty());
    }
}
