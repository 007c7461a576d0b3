//! External graph catalogs used for prefix-based bulk discovery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use walkdir::WalkDir;

use crate::provider::Metadata;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("http: {0}")]
    Http(String),
    #[error("invalid catalog entry name `{0}`")]
    InvalidName(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    #[serde(flatten)]
    pub extra: Metadata,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Human-readable location, used in logs and warnings.
    fn describe(&self) -> String;
    async fn list_metadata(&self, prefix: &str) -> Result<Vec<CatalogEntry>, CatalogError>;
    async fn get_file(&self, name: &str) -> Result<Vec<u8>, CatalogError>;
}

/// Serves every file below `root`; entry names are `/`-separated relative paths.
#[derive(Debug, Clone)]
pub struct DirectoryCatalog {
    root: PathBuf,
}

impl DirectoryCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    fn resolve(&self, name: &str) -> Result<PathBuf, CatalogError> {
        let rel = Path::new(name);
        if name.is_empty() || rel.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(CatalogError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl Catalog for DirectoryCatalog {
    fn describe(&self) -> String { format!("dir:{}", self.root.display()) }

    async fn list_metadata(&self, prefix: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            for entry in WalkDir::new(&root).sort_by_file_name() {
                let entry = entry.map_err(|e| CatalogError::Io(e.into()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&root) else { continue };
                let name = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
                if !name.starts_with(&prefix) {
                    continue;
                }
                let mut extra = Metadata::new();
                if let Ok(meta) = entry.metadata() {
                    extra.insert("size".into(), meta.len().into());
                }
                out.push(CatalogEntry { name, extra });
            }
            Ok(out)
        })
        .await
        .map_err(|e| CatalogError::Io(std::io::Error::other(e.to_string())))?
    }

    async fn get_file(&self, name: &str) -> Result<Vec<u8>, CatalogError> {
        let path = self.resolve(name)?;
        Ok(tokio::fs::read(path).await?)
    }
}

/// Remote catalog: `GET {base}/list?prefix=..` returns `[{name, ..}]`, `GET {base}/files/{name}` the bytes.
///
/// Entry names are sent as percent-encoded path segments, so `#`, `?` and spaces survive the trip.
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    base: reqwest::Url,
    client: reqwest::Client,
}

impl HttpCatalog {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, CatalogError> {
        let base = reqwest::Url::parse(base).map_err(|e| CatalogError::Http(format!("catalog url `{base}`: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(CatalogError::Http(format!("catalog url `{base}` cannot carry a path")));
        }
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| CatalogError::Http(e.to_string()))?;
        Ok(Self { base, client })
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<reqwest::Url, CatalogError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| CatalogError::Http(format!("catalog url `{}` cannot carry a path", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `{base}/files/{name}` with each `/`-separated part of `name` encoded on its own.
    pub fn file_url(&self, name: &str) -> Result<reqwest::Url, CatalogError> {
        if name.is_empty() || name.split('/').any(|seg| matches!(seg, "" | "." | "..")) {
            return Err(CatalogError::InvalidName(name.to_string()));
        }
        self.endpoint(std::iter::once("files").chain(name.split('/')))
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    fn describe(&self) -> String { self.base.to_string() }

    async fn list_metadata(&self, prefix: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
        let resp = self
            .client
            .get(self.endpoint(["list"])?)
            .query(&[("prefix", prefix)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CatalogError::Http(e.to_string()))?;
        resp.json().await.map_err(|e| CatalogError::Http(format!("listing body: {e}")))
    }

    async fn get_file(&self, name: &str) -> Result<Vec<u8>, CatalogError> {
        let resp = self
            .client
            .get(self.file_url(name)?)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CatalogError::Http(e.to_string()))?;
        let bytes = resp.bytes().await.map_err(|e| CatalogError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("motif-catalog-{tag}-{}", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir_all(dir.join("graphs/nested")).unwrap();
        dir
    }

    #[tokio::test]
    async fn directory_catalog_lists_by_prefix() {
        let root = scratch("list");
        std::fs::write(root.join("graphs/a.graph"), "a b\n").unwrap();
        std::fs::write(root.join("graphs/nested/b.graph"), "b c\n").unwrap();
        std::fs::write(root.join("other.graph"), "x y\n").unwrap();
        let cat = DirectoryCatalog::new(&root);
        let names: Vec<String> = cat.list_metadata("graphs/").await.unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["graphs/a.graph", "graphs/nested/b.graph"]);
        assert_eq!(cat.get_file("graphs/a.graph").await.unwrap(), b"a b\n");
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn directory_catalog_rejects_escapes() {
        let root = scratch("escape");
        let cat = DirectoryCatalog::new(&root);
        assert!(matches!(cat.get_file("../etc/passwd").await, Err(CatalogError::InvalidName(_))));
        assert!(matches!(cat.get_file("/etc/passwd").await, Err(CatalogError::InvalidName(_))));
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn http_file_urls_encode_each_segment() {
        let cat = HttpCatalog::new("http://catalog.local/v1/", Duration::from_secs(1)).unwrap();
        assert_eq!(cat.file_url("fly/a#1.graph").unwrap().as_str(), "http://catalog.local/v1/files/fly/a%231.graph");
        assert_eq!(cat.file_url("fly/b?v=2.graph").unwrap().as_str(), "http://catalog.local/v1/files/fly/b%3Fv=2.graph");
        assert_eq!(cat.file_url("my graph.json").unwrap().as_str(), "http://catalog.local/v1/files/my%20graph.json");
        for bad in ["", "../secret", "fly//x", "fly/./x"] {
            assert!(matches!(cat.file_url(bad), Err(CatalogError::InvalidName(_))), "{bad}");
        }
    }

    #[test]
    fn http_catalog_rejects_unusable_base() {
        assert!(HttpCatalog::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpCatalog::new("mailto:ops@example.org", Duration::from_secs(1)).is_err());
    }
}
