//! Immutable directed host graphs loaded from raw blobs.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

pub type Attributes = BTreeMap<String, Value>;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("graph is not valid UTF-8")]
    Encoding,
    #[error("node-link json: {0}")]
    NodeLink(String),
    #[error("edge list line {line}: {message}")]
    EdgeList { line: usize, message: String },
    #[error("graph has no nodes")]
    Empty,
}

/// Directed graph keyed by string node ids. Ordered maps keep iteration deterministic.
#[derive(Debug, Clone, Default)]
pub struct HostGraph {
    nodes: BTreeMap<String, Attributes>,
    out_edges: BTreeMap<String, BTreeMap<String, Attributes>>,
    in_edges: BTreeMap<String, BTreeSet<String>>,
    edge_count: usize,
}

impl HostGraph {
    /// Accepts networkx node-link JSON (leading `{`) or a whitespace edge list.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GraphError> {
        let text = std::str::from_utf8(bytes).map_err(|_| GraphError::Encoding)?;
        let graph = if text.trim_start().starts_with('{') { Self::from_node_link(text)? } else { Self::from_edge_list(text)? };
        if graph.nodes.is_empty() {
            return Err(GraphError::Empty);
        }
        Ok(graph)
    }

    fn from_node_link(text: &str) -> Result<Self, GraphError> {
        let doc: Value = serde_json::from_str(text).map_err(|e| GraphError::NodeLink(e.to_string()))?;
        let mut g = HostGraph::default();
        let nodes = doc
            .get("nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| GraphError::NodeLink("missing `nodes` array".into()))?;
        for (i, node) in nodes.iter().enumerate() {
            let obj = node.as_object().ok_or_else(|| GraphError::NodeLink(format!("node {i} is not an object")))?;
            let id = obj.get("id").and_then(id_string).ok_or_else(|| GraphError::NodeLink(format!("node {i} has no usable `id`")))?;
            let attrs = obj.iter().filter(|(k, _)| k.as_str() != "id").map(|(k, v)| (k.clone(), v.clone())).collect();
            g.add_node(id, attrs);
        }
        let links = doc.get("links").or_else(|| doc.get("edges")).and_then(Value::as_array);
        for (i, link) in links.into_iter().flatten().enumerate() {
            let obj = link.as_object().ok_or_else(|| GraphError::NodeLink(format!("link {i} is not an object")))?;
            let endpoint = |key: &str| obj.get(key).and_then(id_string).ok_or_else(|| GraphError::NodeLink(format!("link {i} has no usable `{key}`")));
            let (source, target) = (endpoint("source")?, endpoint("target")?);
            let attrs = obj
                .iter()
                .filter(|(k, _)| !matches!(k.as_str(), "source" | "target" | "key"))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            g.add_edge(source, target, attrs);
        }
        Ok(g)
    }

    fn from_edge_list(text: &str) -> Result<Self, GraphError> {
        let mut g = HostGraph::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let (Some(source), target) = (tokens.next(), tokens.next()) else { continue };
            let Some(target) = target else {
                g.add_node(source.to_string(), Attributes::new());
                continue;
            };
            let mut attrs = Attributes::new();
            for tok in tokens {
                match tok.split_once('=') {
                    Some((k, v)) if !k.is_empty() => {
                        attrs.insert(k.to_string(), scalar(v));
                    }
                    Some(_) => return Err(GraphError::EdgeList { line: idx + 1, message: format!("bad attribute `{tok}`") }),
                    None => match tok.parse::<f64>() {
                        Ok(w) if !attrs.contains_key("weight") => {
                            attrs.insert("weight".into(), Value::from(w));
                        }
                        _ => return Err(GraphError::EdgeList { line: idx + 1, message: format!("unexpected token `{tok}`") }),
                    },
                }
            }
            g.add_edge(source.to_string(), target.to_string(), attrs);
        }
        Ok(g)
    }

    fn add_node(&mut self, id: String, attrs: Attributes) {
        self.nodes.entry(id).or_default().extend(attrs);
    }

    fn add_edge(&mut self, source: String, target: String, attrs: Attributes) {
        self.nodes.entry(source.clone()).or_default();
        self.nodes.entry(target.clone()).or_default();
        self.in_edges.entry(target.clone()).or_default().insert(source.clone());
        let slot = self.out_edges.entry(source).or_default();
        if slot.insert(target, attrs).is_none() {
            self.edge_count += 1;
        }
    }

    pub fn node_count(&self) -> usize { self.nodes.len() }

    pub fn edge_count(&self) -> usize { self.edge_count }

    pub fn nodes(&self) -> impl Iterator<Item = &String> { self.nodes.keys() }

    pub fn node_attributes(&self, id: &str) -> Option<&Attributes> { self.nodes.get(id) }

    pub fn edge(&self, source: &str, target: &str) -> Option<&Attributes> {
        self.out_edges.get(source).and_then(|m| m.get(target))
    }

    pub fn successors<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a String> + 'a {
        self.out_edges.get(id).into_iter().flat_map(|m| m.keys())
    }

    pub fn predecessors<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a String> + 'a {
        self.in_edges.get(id).into_iter().flatten()
    }

    pub fn out_degree(&self, id: &str) -> usize { self.out_edges.get(id).map_or(0, BTreeMap::len) }

    pub fn in_degree(&self, id: &str) -> usize { self.in_edges.get(id).map_or(0, BTreeSet::len) }
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::from(f);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.trim_matches('"').to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_list_with_weights_and_isolated_nodes() {
        let g = HostGraph::from_bytes(b"# toy\na b 3\nb c type=chem\nd\n").unwrap();
        assert_eq!(g.node_count(), 4);
        assert_eq!(g.edge_count(), 2);
        assert_eq!(g.edge("a", "b").unwrap()["weight"], Value::from(3.0));
        assert_eq!(g.edge("b", "c").unwrap()["type"], Value::String("chem".into()));
        assert!(g.edge("b", "a").is_none());
        assert_eq!(g.predecessors("b").collect::<Vec<_>>(), ["a"]);
    }

    #[test]
    fn node_link_with_numeric_ids() {
        let doc = br#"{"directed":true,"nodes":[{"id":1,"type":"KC"},{"id":2}],"links":[{"source":1,"target":2,"weight":7}]}"#;
        let g = HostGraph::from_bytes(doc).unwrap();
        assert_eq!(g.node_attributes("1").unwrap()["type"], Value::String("KC".into()));
        assert_eq!(g.edge("1", "2").unwrap()["weight"], Value::from(7));
        assert_eq!(g.out_degree("1"), 1);
        assert_eq!(g.in_degree("2"), 1);
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert_eq!(HostGraph::from_bytes(b"\xff\xfe").unwrap_err(), GraphError::Encoding);
        assert!(matches!(HostGraph::from_bytes(b"{\"links\": []}"), Err(GraphError::NodeLink(_))));
        assert!(matches!(HostGraph::from_bytes(b"a b c d"), Err(GraphError::EdgeList { line: 1, .. })));
        assert_eq!(HostGraph::from_bytes(b"# nothing\n").unwrap_err(), GraphError::Empty);
    }

    #[test]
    fn duplicate_edges_count_once() {
        let g = HostGraph::from_bytes(b"a b\na b\n").unwrap();
        assert_eq!(g.edge_count(), 1);
    }
}
