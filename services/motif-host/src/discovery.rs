//! Builds providers from a static manifest and from catalog prefixes.
//!
//! Each source carries its own [`SourcePolicy`]. Manifests are operator-authored and default to
//! fail-fast; catalog prefixes are opportunistic bulk imports and default to best-effort, where a
//! bad entry becomes a [`DiscoveryWarning`] and the rest still load.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::catalog::{Catalog, CatalogEntry};
use crate::error::{ConfigError, DiscoveryWarning, HostError, HostResult};
use crate::graph::GraphError;
use crate::provider::{LocalEngineProvider, Metadata, Provider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePolicy {
    FailFast,
    BestEffort,
}

/// A validated manifest entry with its graph path resolved against the manifest directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestHost {
    pub name: String,
    pub uri: String,
    pub path: PathBuf,
    pub metadata: Metadata,
}

pub fn manifest_uri(name: &str) -> String { format!("file://{name}") }

pub fn catalog_uri(entry_name: &str) -> String { format!("catalog://{entry_name}") }

#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub providers: Vec<Provider>,
    pub manifest_hosts: Vec<ManifestHost>,
    pub warnings: Vec<DiscoveryWarning>,
}

impl DiscoveryReport {
    fn absorb(&mut self, other: DiscoveryReport) {
        self.providers.extend(other.providers);
        self.manifest_hosts.extend(other.manifest_hosts);
        self.warnings.extend(other.warnings);
    }
}

enum Source {
    Manifest { path: PathBuf, policy: SourcePolicy },
    Catalog { catalog: Arc<dyn Catalog>, prefix: String, policy: SourcePolicy },
}

/// Ordered list of sources; providers come out in source order, which is the order the
/// registry applies its collision policy in.
#[derive(Default)]
pub struct HostDiscovery {
    sources: Vec<Source>,
}

impl HostDiscovery {
    pub fn new() -> Self { Self::default() }

    pub fn with_manifest(mut self, path: impl Into<PathBuf>, policy: SourcePolicy) -> Self {
        self.sources.push(Source::Manifest { path: path.into(), policy });
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>, prefix: impl Into<String>, policy: SourcePolicy) -> Self {
        self.sources.push(Source::Catalog { catalog, prefix: prefix.into(), policy });
        self
    }

    pub fn has_manifest(&self) -> bool { self.sources.iter().any(|s| matches!(s, Source::Manifest { .. })) }

    pub async fn discover(&self) -> HostResult<DiscoveryReport> {
        let mut report = DiscoveryReport::default();
        for source in &self.sources {
            let part = match source {
                Source::Manifest { path, policy } => discover_manifest(path, *policy).await?,
                Source::Catalog { catalog, prefix, policy } => discover_catalog(catalog.as_ref(), prefix, *policy).await?,
            };
            report.absorb(part);
        }
        Ok(report)
    }
}

/// Reads and validates every manifest entry. Any invalid entry is a configuration error.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestHost>, ConfigError> {
    let (entries, base) = manifest_entries(path)?;
    entries.iter().enumerate().map(|(i, e)| validate_entry(i, e, &base)).collect()
}

fn manifest_entries(path: &Path) -> Result<(Vec<Value>, PathBuf), ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable { path: path.to_path_buf(), cause: e.to_string() })?;
    let is_yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml"));
    let base = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    Ok((entries_of(&text, is_yaml)?, base))
}

pub fn parse_manifest(text: &str, is_yaml: bool, base: &Path) -> Result<Vec<ManifestHost>, ConfigError> {
    entries_of(text, is_yaml)?.iter().enumerate().map(|(i, e)| validate_entry(i, e, base)).collect()
}

fn entries_of(text: &str, is_yaml: bool) -> Result<Vec<Value>, ConfigError> {
    let doc: Value = if is_yaml {
        serde_yaml::from_str(text).map_err(|e| ConfigError::InvalidManifest(e.to_string()))?
    } else {
        serde_json::from_str(text).map_err(|e| ConfigError::InvalidManifest(e.to_string()))?
    };
    match doc {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => match obj.remove("hosts") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(ConfigError::InvalidManifest("expected a list or an object with `hosts`".into())),
        },
        _ => Err(ConfigError::InvalidManifest("expected a list of host entries".into())),
    }
}

fn validate_entry(index: usize, entry: &Value, base: &Path) -> Result<ManifestHost, ConfigError> {
    let obj = entry.as_object().ok_or(ConfigError::MissingKey { index, key: "name" })?;
    let name = obj.get("name").and_then(Value::as_str).ok_or(ConfigError::MissingKey { index, key: "name" })?;
    let location = obj.get("location").and_then(Value::as_object).ok_or(ConfigError::MissingKey { index, key: "location.type" })?;
    let kind = location.get("type").and_then(Value::as_str).ok_or(ConfigError::MissingKey { index, key: "location.type" })?;
    if kind != "file" {
        return Err(ConfigError::UnsupportedLocationType { name: name.to_string(), kind: kind.to_string() });
    }
    let raw_path = location.get("path").and_then(Value::as_str).ok_or(ConfigError::MissingKey { index, key: "location.path" })?;
    // Everything besides name/location is metadata; a nested `metadata` object is flattened in.
    let mut metadata = Metadata::new();
    for (k, v) in obj {
        match (k.as_str(), v) {
            ("name" | "location", _) => {}
            ("metadata", Value::Object(inner)) => metadata.extend(inner.clone()),
            _ => {
                metadata.insert(k.clone(), v.clone());
            }
        }
    }
    let path = Path::new(raw_path);
    let path = if path.is_absolute() { path.to_path_buf() } else { base.join(path) };
    Ok(ManifestHost { name: name.to_string(), uri: manifest_uri(name), path, metadata })
}

async fn build_local(name: String, uri: String, metadata: Metadata, bytes: Vec<u8>) -> Result<Provider, GraphError> {
    tokio::task::spawn_blocking(move || LocalEngineProvider::from_bytes(name, uri, metadata, &bytes).map(Provider::from))
        .await
        .unwrap_or_else(|e| Err(GraphError::NodeLink(format!("graph load task failed: {e}"))))
}

fn skip(report: &mut DiscoveryReport, source_kind: &'static str, entry: &str, cause: String) {
    let w = DiscoveryWarning { source_kind, entry: entry.to_string(), cause };
    warn!(source = source_kind, entry = %w.entry, cause = %w.cause, "discovery entry skipped");
    motif_core::HOST_METRICS.discovery_warnings_total.add(1, &[opentelemetry::KeyValue::new("source", source_kind)]);
    report.warnings.push(w);
}

#[instrument(skip_all, fields(manifest = %path.display(), policy = ?policy))]
pub async fn discover_manifest(path: &Path, policy: SourcePolicy) -> HostResult<DiscoveryReport> {
    let mut report = DiscoveryReport::default();
    let (entries, base) = match manifest_entries(path) {
        Ok(parsed) => parsed,
        Err(e) if policy == SourcePolicy::BestEffort => {
            skip(&mut report, "manifest", &path.display().to_string(), e.to_string());
            return Ok(report);
        }
        Err(e) => return Err(e.into()),
    };
    let mut hosts = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        match validate_entry(i, entry, &base) {
            Ok(host) => hosts.push(host),
            Err(e) if policy == SourcePolicy::BestEffort => skip(&mut report, "manifest", &format!("#{i}"), e.to_string()),
            Err(e) => return Err(e.into()),
        }
    }
    for host in hosts {
        let loaded = match tokio::fs::read(&host.path).await {
            Ok(bytes) => build_local(host.name.clone(), host.uri.clone(), host.metadata.clone(), bytes)
                .await
                .map_err(|e| ConfigError::InvalidGraph { name: host.name.clone(), cause: e.to_string() }),
            Err(e) => Err(ConfigError::Unreadable { path: host.path.clone(), cause: e.to_string() }),
        };
        match loaded {
            Ok(provider) => {
                report.providers.push(provider);
                report.manifest_hosts.push(host);
            }
            Err(e) if policy == SourcePolicy::BestEffort => skip(&mut report, "manifest", &host.name, e.to_string()),
            Err(e) => return Err(e.into()),
        }
    }
    info!(hosts = report.providers.len(), skipped = report.warnings.len(), "manifest discovery complete");
    Ok(report)
}

fn catalog_host_name(entry: &CatalogEntry, prefix: &str) -> String {
    let rel = entry.name.strip_prefix(prefix).unwrap_or(&entry.name).trim_start_matches('/');
    let stem = Path::new(rel).file_stem().and_then(|s| s.to_str()).unwrap_or(rel);
    if stem.is_empty() { entry.name.clone() } else { stem.to_string() }
}

#[instrument(skip_all, fields(catalog = %catalog.describe(), prefix = %prefix, policy = ?policy))]
pub async fn discover_catalog(catalog: &dyn Catalog, prefix: &str, policy: SourcePolicy) -> HostResult<DiscoveryReport> {
    let mut report = DiscoveryReport::default();
    let entries = match catalog.list_metadata(prefix).await {
        Ok(e) => e,
        Err(e) => {
            let warning = DiscoveryWarning { source_kind: "catalog", entry: prefix.to_string(), cause: e.to_string() };
            if policy == SourcePolicy::FailFast {
                return Err(HostError::Discovery(warning));
            }
            skip(&mut report, "catalog", prefix, warning.cause);
            return Ok(report);
        }
    };
    for entry in entries {
        let name = catalog_host_name(&entry, prefix);
        let mut metadata = entry.extra.clone();
        metadata.insert("source".into(), Value::String("catalog".into()));
        metadata.insert("file".into(), Value::String(entry.name.clone()));
        let loaded = match catalog.get_file(&entry.name).await {
            Ok(bytes) => build_local(name, catalog_uri(&entry.name), metadata, bytes).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match loaded {
            Ok(provider) => report.providers.push(provider),
            Err(cause) if policy == SourcePolicy::BestEffort => skip(&mut report, "catalog", &entry.name, cause),
            Err(cause) => return Err(HostError::Discovery(DiscoveryWarning { source_kind: "catalog", entry: entry.name, cause })),
        }
    }
    info!(hosts = report.providers.len(), skipped = report.warnings.len(), "catalog discovery complete");
    Ok(report)
}
