//! Startup wiring from [`HostServiceConfig`] to a ready [`QueryDispatcher`].

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::{Catalog, DirectoryCatalog, HttpCatalog};
use crate::config::HostServiceConfig;
use crate::discovery::{DiscoveryReport, HostDiscovery};
use crate::dispatch::QueryDispatcher;
use crate::error::HostResult;
use crate::provider::Provider;
use crate::provision::{provision_manifest, retire_manifest_hosts};
use crate::registry::HostRegistry;
use crate::remote::RemoteApiProvider;
use crate::store::HostStore;

/// Everything needed to rebuild the registry later: the discovery sources and the optional remote backend.
pub struct HostService {
    discovery: HostDiscovery,
    remote: Option<RemoteApiProvider>,
    store: Arc<HostStore>,
    dispatcher: QueryDispatcher,
}

impl HostService {
    pub async fn bootstrap(cfg: &HostServiceConfig) -> Result<Self> {
        std::fs::create_dir_all(&cfg.data_dir).with_context(|| format!("creating {}", cfg.data_dir.display()))?;
        let store = Arc::new(HostStore::open(cfg.data_dir.join("hosts.sled"))?);
        Self::with_store(cfg, store).await
    }

    /// Same as `bootstrap` but over a caller-supplied store.
    pub async fn with_store(cfg: &HostServiceConfig, store: Arc<HostStore>) -> Result<Self> {
        let discovery = discovery_from(cfg)?;
        let remote = match cfg.neuprint.resolved_token() {
            Some(token) => Some(RemoteApiProvider::new(&cfg.neuprint.host, &cfg.neuprint.dataset, &token, cfg.neuprint.timeout())?),
            None => {
                info!("no neuPrint token configured, remote provider disabled");
                None
            }
        };
        let report = discovery.discover().await?;
        let providers = provision_and_collect(&store, report, &remote, discovery.has_manifest()).await?;
        let registry = HostRegistry::build(providers, cfg.collision_policy)?;
        let dispatcher = QueryDispatcher::new(Arc::new(registry), Some(store.clone()), cfg.upload_ttl());
        Ok(Self { discovery, remote, store, dispatcher })
    }

    pub fn dispatcher(&self) -> &QueryDispatcher { &self.dispatcher }

    pub fn store(&self) -> &Arc<HostStore> { &self.store }

    /// Re-runs discovery and provisioning, then swaps the registry. On error nothing is swapped.
    pub async fn refresh(&self) -> HostResult<usize> {
        let report = self.discovery.discover().await?;
        let providers = provision_and_collect(&self.store, report, &self.remote, self.discovery.has_manifest()).await?;
        self.dispatcher.registry().rebuild(providers)?;
        Ok(self.dispatcher.registry().len())
    }
}

fn discovery_from(cfg: &HostServiceConfig) -> Result<HostDiscovery> {
    let mut discovery = HostDiscovery::new();
    if let Some(path) = &cfg.manifest_path {
        discovery = discovery.with_manifest(path.clone(), cfg.manifest_policy);
    }
    if let Some(c) = &cfg.catalog {
        let catalog: Arc<dyn Catalog> = match (&c.url, &c.dir) {
            (Some(url), _) => Arc::new(HttpCatalog::new(url, std::time::Duration::from_secs(c.timeout_secs.max(1)))?),
            (None, Some(dir)) => Arc::new(DirectoryCatalog::new(dir.clone())),
            (None, None) => anyhow::bail!("catalog configured without url or dir"),
        };
        discovery = discovery.with_catalog(catalog, c.prefix.clone(), c.policy);
    }
    Ok(discovery)
}

/// Provisions manifest hosts and, when the manifest loaded without skips, retires records for
/// hosts it no longer lists. A partially read manifest never retires anything.
async fn provision_and_collect(
    store: &Arc<HostStore>,
    report: DiscoveryReport,
    remote: &Option<RemoteApiProvider>,
    has_manifest: bool,
) -> HostResult<Vec<Provider>> {
    let DiscoveryReport { mut providers, manifest_hosts, warnings } = report;
    if !warnings.is_empty() {
        warn!(skipped = warnings.len(), "discovery finished with skipped entries");
    }
    let retire = has_manifest && !warnings.iter().any(|w| w.source_kind == "manifest");
    let store = store.clone();
    let (provisioned, retired) = tokio::task::spawn_blocking(move || -> HostResult<_> {
        let provisioned = provision_manifest(&store, &manifest_hosts, Utc::now())?;
        let retired = if retire { retire_manifest_hosts(&store, &manifest_hosts)? } else { 0 };
        Ok((provisioned, retired))
    })
    .await
    .map_err(|e| crate::error::HostError::Storage(format!("provisioning task failed: {e}")))??;
    info!(inserted = provisioned.inserted, skipped = provisioned.skipped, retired, "manifest provisioning complete");
    if let Some(remote) = remote {
        providers.push(remote.clone().into());
    }
    Ok(providers)
}
