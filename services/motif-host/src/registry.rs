//! Process-lifetime providers keyed by URI.
//!
//! The map is immutable once built; `rebuild` publishes a fresh one through `ArcSwap`, so
//! readers either see the old map or the new one, never a half-populated table.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ConfigError, HostError, HostResult};
use crate::provider::{HostProvider, HostSummary, Provider};

/// What to do when two sources produce the same URI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// The later provider replaces the earlier one, keeping the earlier position.
    #[default]
    LastWins,
    Reject,
}

#[derive(Default)]
struct RegistryMap {
    order: Vec<Arc<Provider>>,
    by_uri: HashMap<String, usize>,
}

impl RegistryMap {
    fn build(providers: Vec<Provider>, policy: CollisionPolicy) -> HostResult<Self> {
        let mut map = RegistryMap::default();
        for provider in providers {
            let uri = provider.get_uri().to_string();
            match map.by_uri.get(&uri) {
                Some(&slot) => match policy {
                    CollisionPolicy::Reject => return Err(ConfigError::DuplicateUri(uri).into()),
                    CollisionPolicy::LastWins => {
                        warn!(uri = %uri, replaced = %map.order[slot].get_name(), by = %provider.get_name(), "duplicate host uri, later source wins");
                        map.order[slot] = Arc::new(provider);
                    }
                },
                None => {
                    map.by_uri.insert(uri, map.order.len());
                    map.order.push(Arc::new(provider));
                }
            }
        }
        Ok(map)
    }
}

pub struct HostRegistry {
    policy: CollisionPolicy,
    inner: ArcSwap<RegistryMap>,
}

impl HostRegistry {
    pub fn build(providers: Vec<Provider>, policy: CollisionPolicy) -> HostResult<Self> {
        let map = RegistryMap::build(providers, policy)?;
        info!(hosts = map.order.len(), ?policy, "host registry built");
        Ok(Self { policy, inner: ArcSwap::from_pointee(map) })
    }

    pub fn empty() -> Self { Self { policy: CollisionPolicy::default(), inner: ArcSwap::from_pointee(RegistryMap::default()) } }

    pub fn get_host(&self, uri: &str) -> HostResult<Arc<Provider>> {
        let map = self.inner.load();
        map.by_uri.get(uri).map(|&slot| map.order[slot].clone()).ok_or_else(|| HostError::HostNotFound(uri.to_string()))
    }

    /// Every provider, first-seen order.
    pub fn get_hosts(&self) -> Vec<Arc<Provider>> { self.inner.load().order.clone() }

    pub fn summaries(&self) -> Vec<HostSummary> { self.inner.load().order.iter().map(|p| p.summary()).collect() }

    pub fn contains(&self, uri: &str) -> bool { self.inner.load().by_uri.contains_key(uri) }

    pub fn len(&self) -> usize { self.inner.load().order.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Builds a replacement map off to the side and swaps it in. On error the current map stays.
    pub fn rebuild(&self, providers: Vec<Provider>) -> HostResult<()> {
        let map = RegistryMap::build(providers, self.policy)?;
        let hosts = map.order.len();
        self.inner.store(Arc::new(map));
        info!(hosts, "host registry swapped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{LocalEngineProvider, Metadata};

    fn local(name: &str, uri: &str) -> Provider {
        LocalEngineProvider::from_bytes(name, uri, Metadata::new(), b"a b\n").unwrap().into()
    }

    #[test]
    fn lookup_and_order() {
        let reg = HostRegistry::build(vec![local("x", "file://x"), local("y", "file://y")], CollisionPolicy::LastWins).unwrap();
        assert_eq!(reg.get_host("file://y").unwrap().get_name(), "y");
        let names: Vec<String> = reg.get_hosts().iter().map(|p| p.get_name().to_string()).collect();
        assert_eq!(names, ["x", "y"]);
        assert!(matches!(reg.get_host("file://nope"), Err(HostError::HostNotFound(u)) if u == "file://nope"));
    }

    #[test]
    fn last_wins_replaces_in_place() {
        let reg = HostRegistry::build(
            vec![local("first", "file://x"), local("other", "file://z"), local("second", "file://x")],
            CollisionPolicy::LastWins,
        )
        .unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get_host("file://x").unwrap().get_name(), "second");
        assert_eq!(reg.get_hosts()[0].get_name(), "second");
    }

    #[test]
    fn reject_policy_reports_duplicate() {
        let err = HostRegistry::build(vec![local("a", "file://x"), local("b", "file://x")], CollisionPolicy::Reject).err();
        assert!(matches!(err, Some(HostError::Configuration(ConfigError::DuplicateUri(u))) if u == "file://x"));
    }

    #[test]
    fn rebuild_swaps_atomically_and_failed_rebuild_keeps_old_map() {
        let reg = HostRegistry::build(vec![local("x", "file://x")], CollisionPolicy::Reject).unwrap();
        let held = reg.get_host("file://x").unwrap();
        reg.rebuild(vec![local("y", "file://y")]).unwrap();
        assert!(reg.get_host("file://x").is_err());
        assert_eq!(held.get_name(), "x");
        assert!(reg.rebuild(vec![local("a", "file://a"), local("b", "file://a")]).is_err());
        assert!(reg.contains("file://y"));
    }
}
