//! neuPrint-compatible remote dataset provider.
//!
//! Motifs are translated to Cypher and posted to `{endpoint}/api/custom/custom`. Each `find`
//! is an independent request bounded by the configured timeout; dropping the future cancels it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::engine::Embedding;
use crate::error::{HostError, HostResult};
use crate::motif::{CmpOp, Constraint, Motif};
use crate::provider::{HostProvider, Metadata};

pub const DEFAULT_HOST: &str = "https://neuprint.janelia.org";
pub const DEFAULT_DATASET: &str = "hemibrain:v1.1";

#[derive(Clone)]
pub struct RemoteApiProvider {
    name: String,
    uri: String,
    metadata: Metadata,
    endpoint: String,
    dataset: String,
    token: String,
    timeout: Duration,
    client: reqwest::Client,
}

// Keeps the credential out of logs.
impl fmt::Debug for RemoteApiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteApiProvider")
            .field("uri", &self.uri)
            .field("endpoint", &self.endpoint)
            .field("dataset", &self.dataset)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct CypherResponse {
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

impl RemoteApiProvider {
    pub fn new(host: &str, dataset: &str, token: &str, timeout: Duration) -> HostResult<Self> {
        let bare = host.trim_start_matches("https://").trim_start_matches("http://").trim_end_matches('/');
        let endpoint = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{bare}")
        };
        let uri = format!("neuprint://{bare}/{dataset}");
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HostError::backend(&uri, format!("http client: {e}")))?;
        let mut metadata = Metadata::new();
        metadata.insert("backend".into(), Value::String("neuprint".into()));
        metadata.insert("host".into(), Value::String(endpoint.clone()));
        metadata.insert("dataset".into(), Value::String(dataset.to_string()));
        Ok(Self {
            name: format!("neuPrint {dataset}"),
            uri,
            metadata,
            endpoint,
            dataset: dataset.to_string(),
            token: token.to_string(),
            timeout,
            client,
        })
    }

    async fn query(&self, cypher: String) -> HostResult<Vec<Embedding>> {
        let url = format!("{}/api/custom/custom", self.endpoint);
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&json!({ "cypher": cypher, "dataset": self.dataset }))
            .send()
            .await
            .map_err(|e| HostError::backend(&self.uri, format!("request failed: {e}")))?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(HostError::backend(&self.uri, format!("authentication rejected ({status})")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HostError::backend(&self.uri, format!("remote returned {status}: {}", body.trim())));
        }
        let body: CypherResponse = resp
            .json()
            .await
            .map_err(|e| HostError::backend(&self.uri, format!("malformed response: {e}")))?;
        rows_to_embeddings(body).map_err(|cause| HostError::backend(&self.uri, cause))
    }
}

#[async_trait]
impl HostProvider for RemoteApiProvider {
    fn get_name(&self) -> &str { &self.name }

    fn get_uri(&self) -> &str { &self.uri }

    fn get_metadata(&self) -> &Metadata { &self.metadata }

    #[instrument(skip(self, motif), fields(uri = %self.uri))]
    async fn find(&self, motif: &Motif) -> HostResult<Vec<Embedding>> {
        let cypher = to_cypher(motif);
        debug!(%cypher, "remote motif query");
        match tokio::time::timeout(self.timeout, self.query(cypher)).await {
            Ok(res) => res,
            Err(_) => {
                warn!(timeout = ?self.timeout, "remote query timed out");
                Err(HostError::backend(&self.uri, format!("timed out after {:?}", self.timeout)))
            }
        }
    }
}

fn rows_to_embeddings(body: CypherResponse) -> Result<Vec<Embedding>, String> {
    body.data
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            if row.len() != body.columns.len() {
                return Err(format!("row {i} has {} values for {} columns", row.len(), body.columns.len()));
            }
            Ok(body
                .columns
                .iter()
                .zip(row)
                .map(|(col, v)| {
                    let id = match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (col.clone(), id)
                })
                .collect())
        })
        .collect()
}

/// Translates a motif into a neuPrint Cypher query returning one `bodyId` column per motif node.
pub fn to_cypher(motif: &Motif) -> String {
    let nodes = motif.nodes();
    let mut patterns: Vec<String> = nodes.iter().map(|n| format!("({n}:Neuron)")).collect();
    let mut conditions: Vec<String> = Vec::new();
    for (i, edge) in motif.edges().iter().enumerate() {
        let rel = format!("r{i}");
        if edge.exists {
            patterns.push(format!("({})-[{rel}:ConnectsTo]->({})", edge.source, edge.target));
            conditions.extend(edge.constraints.iter().map(|c| condition(&rel, c)));
        } else if edge.constraints.is_empty() {
            conditions.push(format!("NOT ({})-[:ConnectsTo]->({})", edge.source, edge.target));
        } else {
            let inner: Vec<String> = edge.constraints.iter().map(|c| condition(&rel, c)).collect();
            conditions.push(format!(
                "NONE({rel} IN [({})-[x:ConnectsTo]->({}) | x] WHERE {})",
                edge.source,
                edge.target,
                inner.join(" AND ")
            ));
        }
    }
    for node in nodes {
        conditions.extend(motif.node_constraints(node).iter().map(|c| condition(node, c)));
    }
    for (i, a) in nodes.iter().enumerate() {
        for b in &nodes[i + 1..] {
            conditions.push(format!("{a}.bodyId <> {b}.bodyId"));
        }
    }
    let mut q = format!("MATCH {}", patterns.join(", "));
    if !conditions.is_empty() {
        q.push_str(" WHERE ");
        q.push_str(&conditions.join(" AND "));
    }
    let returns: Vec<String> = nodes.iter().map(|n| format!("{n}.bodyId AS {n}")).collect();
    q.push_str(" RETURN ");
    q.push_str(&returns.join(", "));
    q
}

fn condition(var: &str, c: &Constraint) -> String {
    let op = match c.op {
        CmpOp::Ne => "<>",
        other => other.symbol(),
    };
    format!("{var}.`{}` {op} {}", c.attribute.replace('`', ""), c.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cypher_covers_edges_constraints_and_injectivity() {
        let m = Motif::parse("A -> B [weight >= 10]\nB !> A\nA.type = \"KC\"").unwrap();
        let q = to_cypher(&m);
        assert!(q.starts_with("MATCH (A:Neuron), (B:Neuron), (A)-[r0:ConnectsTo]->(B)"));
        assert!(q.contains("r0.`weight` >= 10"));
        assert!(q.contains("NOT (B)-[:ConnectsTo]->(A)"));
        assert!(q.contains("A.`type` = \"KC\""));
        assert!(q.contains("A.bodyId <> B.bodyId"));
        assert!(q.ends_with("RETURN A.bodyId AS A, B.bodyId AS B"));
    }

    #[test]
    fn uri_and_name_follow_dataset() {
        let p = RemoteApiProvider::new(DEFAULT_HOST, DEFAULT_DATASET, "tok", Duration::from_secs(5)).unwrap();
        assert_eq!(p.get_uri(), "neuprint://neuprint.janelia.org/hemibrain:v1.1");
        assert_eq!(p.get_name(), "neuPrint hemibrain:v1.1");
        assert!(!format!("{p:?}").contains("tok"));
    }

    #[test]
    fn mismatched_rows_are_malformed() {
        let body = CypherResponse { columns: vec!["A".into(), "B".into()], data: vec![vec![json!(1)]] };
        assert!(rows_to_embeddings(body).is_err());
        let ok = CypherResponse { columns: vec!["A".into()], data: vec![vec![json!(12345)], vec![json!("x")]] };
        let rows = rows_to_embeddings(ok).unwrap();
        assert_eq!(rows[0]["A"], "12345");
        assert_eq!(rows[1]["A"], "x");
    }
}
