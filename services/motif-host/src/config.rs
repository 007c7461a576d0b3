//! Layered service configuration: defaults, optional `MOTIF_CONFIG_FILE`, then `MOTIF__*` env vars.

use anyhow::{bail, Result};
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::discovery::SourcePolicy;
use crate::registry::CollisionPolicy;
use crate::remote::{DEFAULT_DATASET, DEFAULT_HOST};

/// Conventional variable holding a neuPrint API token.
pub const NEUPRINT_TOKEN_ENV: &str = "NEUPRINT_APPLICATION_CREDENTIALS";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostServiceConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub manifest_path: Option<PathBuf>,
    pub manifest_policy: SourcePolicy,
    pub watch_manifest: bool,
    pub catalog: Option<CatalogConfig>,
    pub neuprint: NeuprintConfig,
    pub upload_ttl_minutes: i64,
    pub sweep_interval_secs: u64,
    pub collision_policy: CollisionPolicy,
}

impl Default for HostServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".into(),
            data_dir: PathBuf::from("./data/motif-host"),
            manifest_path: None,
            manifest_policy: SourcePolicy::FailFast,
            watch_manifest: false,
            catalog: None,
            neuprint: NeuprintConfig::default(),
            upload_ttl_minutes: 60,
            sweep_interval_secs: 60,
            collision_policy: CollisionPolicy::LastWins,
        }
    }
}

/// Exactly one of `url` (HTTP catalog) or `dir` (local directory) must be set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub url: Option<String>,
    pub dir: Option<PathBuf>,
    pub prefix: String,
    pub policy: SourcePolicy,
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self { Self { url: None, dir: None, prefix: String::new(), policy: SourcePolicy::BestEffort, timeout_secs: 30 } }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct NeuprintConfig {
    pub host: String,
    pub dataset: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NeuprintConfig {
    fn default() -> Self { Self { host: DEFAULT_HOST.into(), dataset: DEFAULT_DATASET.into(), token: None, timeout_secs: 30 } }
}

impl std::fmt::Debug for NeuprintConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeuprintConfig")
            .field("host", &self.host)
            .field("dataset", &self.dataset)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl NeuprintConfig {
    /// Configured token, else the conventional environment variable. Blank values count as absent.
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var(NEUPRINT_TOKEN_ENV).ok())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs.max(1)) }
}

impl HostServiceConfig {
    pub fn load() -> Result<Self> {
        let mut builder = defaults()?;
        if let Ok(file) = std::env::var("MOTIF_CONFIG_FILE") {
            builder = builder.add_source(config::File::with_name(&file).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("MOTIF").separator("__"));
        Self::finish(builder)
    }

    /// Defaults overlaid with a YAML document; environment is not consulted.
    pub fn from_yaml(text: &str) -> Result<Self> {
        Self::finish(defaults()?.add_source(config::File::from_str(text, config::FileFormat::Yaml)))
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let cfg: HostServiceConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if let Some(c) = &self.catalog {
            match (&c.url, &c.dir) {
                (Some(_), Some(_)) => bail!("catalog: set either `url` or `dir`, not both"),
                (None, None) => bail!("catalog: one of `url` or `dir` is required"),
                _ => {}
            }
        }
        if self.upload_ttl_minutes <= 0 {
            bail!("upload_ttl_minutes must be positive");
        }
        if self.watch_manifest && self.manifest_path.is_none() {
            bail!("watch_manifest requires manifest_path");
        }
        Ok(())
    }

    pub fn upload_ttl(&self) -> chrono::Duration { chrono::Duration::minutes(self.upload_ttl_minutes) }

    pub fn sweep_interval(&self) -> Duration { Duration::from_secs(self.sweep_interval_secs.max(1)) }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    Ok(config::Config::builder()
        .set_default("bind_addr", "0.0.0.0:5000")?
        .set_default("data_dir", "./data/motif-host")?
        .set_default("upload_ttl_minutes", 60)?
        .set_default("sweep_interval_secs", 60)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_sources() {
        let cfg = HostServiceConfig::from_yaml("{}").unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:5000");
        assert_eq!(cfg.manifest_policy, SourcePolicy::FailFast);
        assert_eq!(cfg.collision_policy, CollisionPolicy::LastWins);
        assert_eq!(cfg.upload_ttl(), chrono::Duration::minutes(60));
        assert_eq!(cfg.neuprint.dataset, DEFAULT_DATASET);
        assert!(cfg.catalog.is_none());
    }

    #[test]
    fn yaml_overrides_and_nested_sections() {
        let cfg = HostServiceConfig::from_yaml(
            "manifest_path: /etc/motif/hosts.json\nmanifest_policy: best_effort\ncollision_policy: reject\n\
             catalog:\n  dir: /srv/graphs\n  prefix: fly/\nneuprint:\n  dataset: manc:v1.0\n  token: abc\n",
        )
        .unwrap();
        assert_eq!(cfg.manifest_policy, SourcePolicy::BestEffort);
        assert_eq!(cfg.collision_policy, CollisionPolicy::Reject);
        let catalog = cfg.catalog.unwrap();
        assert_eq!(catalog.policy, SourcePolicy::BestEffort);
        assert_eq!(catalog.prefix, "fly/");
        assert_eq!(cfg.neuprint.resolved_token().as_deref(), Some("abc"));
        assert!(!format!("{:?}", cfg.neuprint).contains("abc"));
    }

    #[test]
    fn catalog_needs_exactly_one_location() {
        assert!(HostServiceConfig::from_yaml("catalog:\n  prefix: x\n").is_err());
        assert!(HostServiceConfig::from_yaml("catalog:\n  url: http://c\n  dir: /c\n").is_err());
        assert!(HostServiceConfig::from_yaml("watch_manifest: true\n").is_err());
    }
}
