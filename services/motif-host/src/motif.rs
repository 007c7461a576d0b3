//! Compact motif compiler.
//!
//! One statement per line:
//!
//! ```text
//! # comment
//! A -> B [weight >= 4]
//! B !> A
//! A.type = "KC"
//! ```
//!
//! The compiled [`Motif`] is handed unchanged to every provider.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::graph::Attributes;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MotifError {
    #[error("motif parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("motif declares no nodes")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CmpOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Constraint {
    pub attribute: String,
    pub op: CmpOp,
    pub value: Value,
}

impl Constraint {
    /// A missing attribute never satisfies a constraint, whatever the operator.
    pub fn matches(&self, attrs: &Attributes) -> bool {
        let Some(actual) = attrs.get(&self.attribute) else { return false };
        match (as_number(actual), as_number(&self.value)) {
            (Some(a), Some(b)) => match self.op {
                CmpOp::Eq => a == b,
                CmpOp::Ne => a != b,
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
            },
            _ => match self.op {
                CmpOp::Eq => loosely_equal(actual, &self.value),
                CmpOp::Ne => !loosely_equal(actual, &self.value),
                CmpOp::Gt | CmpOp::Ge | CmpOp::Lt | CmpOp::Le => match (actual.as_str(), self.value.as_str()) {
                    (Some(a), Some(b)) => match self.op {
                        CmpOp::Gt => a > b,
                        CmpOp::Ge => a >= b,
                        CmpOp::Lt => a < b,
                        _ => a <= b,
                    },
                    _ => false,
                },
            },
        }
    }
}

// Graph files often carry numbers as strings, so "4" compares equal to 4.
fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::Bool(y)) | (Value::Bool(y), Value::String(x)) => x.eq_ignore_ascii_case(&y.to_string()),
        _ => a == b,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotifEdge {
    pub source: String,
    pub target: String,
    /// `false` for `A !> B`: the host must not contain this edge.
    pub exists: bool,
    pub constraints: Vec<Constraint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Motif {
    nodes: Vec<String>,
    edges: Vec<MotifEdge>,
    node_constraints: BTreeMap<String, Vec<Constraint>>,
}

impl Motif {
    pub fn parse(text: &str) -> Result<Self, MotifError> {
        let mut motif = Motif { nodes: Vec::new(), edges: Vec::new(), node_constraints: BTreeMap::new() };
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let stmt = strip_comment(raw).trim();
            if stmt.is_empty() {
                continue;
            }
            let err = |message: String| MotifError::Parse { line, message };
            if let Some((pos, exists)) = find_arrow(stmt) {
                let source = stmt[..pos].trim();
                let (target, bracket) = split_bracket(stmt[pos + 2..].trim()).map_err(err)?;
                check_ident(source).map_err(err)?;
                check_ident(target).map_err(err)?;
                let constraints = match bracket {
                    Some(body) => split_outside_quotes(body, ',')
                        .into_iter()
                        .filter(|c| !c.trim().is_empty())
                        .map(|c| parse_comparison(c.trim()))
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(err)?,
                    None => Vec::new(),
                };
                motif.add_edge(source, target, exists, constraints).map_err(err)?;
            } else if let Some(dot) = stmt.find('.') {
                let node = stmt[..dot].trim();
                check_ident(node).map_err(err)?;
                let constraint = parse_comparison(stmt[dot + 1..].trim()).map_err(err)?;
                motif.touch_node(node);
                motif.node_constraints.entry(node.to_string()).or_default().push(constraint);
            } else {
                return Err(err(format!("unrecognised statement `{stmt}`")));
            }
        }
        if motif.nodes.is_empty() {
            return Err(MotifError::Empty);
        }
        Ok(motif)
    }

    /// Motif node names in declaration order.
    pub fn nodes(&self) -> &[String] { &self.nodes }

    pub fn edges(&self) -> &[MotifEdge] { &self.edges }

    pub fn node_constraints(&self, node: &str) -> &[Constraint] {
        self.node_constraints.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_node_constraints(&self) -> &BTreeMap<String, Vec<Constraint>> { &self.node_constraints }

    /// networkx-style node-link rendering, constraints grouped as `{attr: {op: [values]}}`.
    pub fn to_node_link(&self) -> Value {
        let nodes: Vec<Value> = self
            .nodes
            .iter()
            .map(|n| json!({ "id": n, "constraints": group_constraints(self.node_constraints(n)) }))
            .collect();
        let links: Vec<Value> = self
            .edges
            .iter()
            .map(|e| {
                json!({
                    "source": e.source,
                    "target": e.target,
                    "exists": e.exists,
                    "constraints": group_constraints(&e.constraints),
                })
            })
            .collect();
        json!({ "directed": true, "multigraph": false, "graph": {}, "nodes": nodes, "links": links })
    }

    fn touch_node(&mut self, node: &str) {
        if !self.nodes.iter().any(|n| n == node) {
            self.nodes.push(node.to_string());
        }
    }

    fn add_edge(&mut self, source: &str, target: &str, exists: bool, constraints: Vec<Constraint>) -> Result<(), String> {
        self.touch_node(source);
        self.touch_node(target);
        if let Some(existing) = self.edges.iter_mut().find(|e| e.source == source && e.target == target) {
            if existing.exists != exists {
                return Err(format!("edge {source} -> {target} is declared both present and absent"));
            }
            existing.constraints.extend(constraints);
            return Ok(());
        }
        self.edges.push(MotifEdge { source: source.to_string(), target: target.to_string(), exists, constraints });
        Ok(())
    }
}

fn group_constraints(constraints: &[Constraint]) -> Value {
    let mut out: Map<String, Value> = Map::new();
    for c in constraints {
        let per_attr = out.entry(c.attribute.clone()).or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(ops) = per_attr {
            let values = ops.entry(c.op.symbol().to_string()).or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = values {
                list.push(c.value.clone());
            }
        }
    }
    Value::Object(out)
}

fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, ch) in line.char_indices() {
        match (quote, ch) {
            (None, '"') | (None, '\'') => quote = Some(ch),
            (Some(q), c) if c == q => quote = None,
            (None, '#') => return &line[..i],
            _ => {}
        }
    }
    line
}

// Returns the byte offset of `->`/`!>` and whether the edge must exist.
fn find_arrow(stmt: &str) -> Option<(usize, bool)> {
    let bytes = stmt.as_bytes();
    let limit = stmt.find('[').unwrap_or(stmt.len());
    (0..limit.saturating_sub(1)).find_map(|i| match (bytes[i], bytes[i + 1]) {
        (b'-', b'>') => Some((i, true)),
        (b'!', b'>') => Some((i, false)),
        _ => None,
    })
}

fn split_bracket(rest: &str) -> Result<(&str, Option<&str>), String> {
    match rest.find('[') {
        None => Ok((rest, None)),
        Some(open) => {
            let body = rest[open + 1..].trim_end();
            let body = body.strip_suffix(']').ok_or_else(|| "unterminated `[` in edge constraints".to_string())?;
            Ok((rest[..open].trim(), Some(body)))
        }
    }
}

fn check_ident(s: &str) -> Result<(), String> {
    let mut chars = s.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid { Ok(()) } else { Err(format!("invalid node name `{s}`")) }
}

fn split_outside_quotes(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        match (quote, ch) {
            (None, '"') | (None, '\'') => quote = Some(ch),
            (Some(q), c) if c == q => quote = None,
            (None, c) if c == sep => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_comparison(s: &str) -> Result<Constraint, String> {
    let pos = s
        .find(|c| matches!(c, '=' | '!' | '<' | '>'))
        .ok_or_else(|| format!("expected a comparison in `{s}`"))?;
    let attribute = s[..pos].trim();
    if attribute.is_empty() || attribute.contains(char::is_whitespace) {
        return Err(format!("invalid attribute name in `{s}`"));
    }
    let rest = &s[pos..];
    let (op, len) = if rest.starts_with(">=") {
        (CmpOp::Ge, 2)
    } else if rest.starts_with("<=") {
        (CmpOp::Le, 2)
    } else if rest.starts_with("!=") {
        (CmpOp::Ne, 2)
    } else if rest.starts_with("==") {
        (CmpOp::Eq, 2)
    } else if rest.starts_with('>') {
        (CmpOp::Gt, 1)
    } else if rest.starts_with('<') {
        (CmpOp::Lt, 1)
    } else if rest.starts_with('=') {
        (CmpOp::Eq, 1)
    } else {
        return Err(format!("unknown operator in `{s}`"));
    };
    let value = parse_value(rest[len..].trim())?;
    Ok(Constraint { attribute: attribute.to_string(), op, value })
}

fn parse_value(raw: &str) -> Result<Value, String> {
    if raw.is_empty() {
        return Err("missing comparison value".into());
    }
    for q in ['"', '\''] {
        if let Some(inner) = raw.strip_prefix(q) {
            return inner
                .strip_suffix(q)
                .map(|v| Value::String(v.to_string()))
                .ok_or_else(|| format!("unterminated string {raw}"));
        }
    }
    match raw {
        "true" | "True" => return Ok(Value::Bool(true)),
        "false" | "False" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(Value::from(i));
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Ok(Value::from(f));
    }
    Ok(Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_edges_and_constraints() {
        let m = Motif::parse("# toy\nA -> B [weight >= 4, type = \"chem\"]\nB !> A\nA.size > 10\n").unwrap();
        assert_eq!(m.nodes(), ["A", "B"]);
        assert_eq!(m.edges().len(), 2);
        assert!(m.edges()[0].exists);
        assert!(!m.edges()[1].exists);
        assert_eq!(m.edges()[0].constraints.len(), 2);
        assert_eq!(m.edges()[0].constraints[0].op, CmpOp::Ge);
        assert_eq!(m.node_constraints("A")[0].value, Value::from(10));
        assert!(m.node_constraints("B").is_empty());
    }

    #[test]
    fn rejects_contradictory_edges() {
        let err = Motif::parse("A -> B\nA !> B").unwrap_err();
        assert!(matches!(err, MotifError::Parse { line: 2, .. }));
    }

    #[test]
    fn rejects_garbage_and_empty() {
        assert!(matches!(Motif::parse("hello world"), Err(MotifError::Parse { line: 1, .. })));
        assert_eq!(Motif::parse("# only a comment\n"), Err(MotifError::Empty));
        assert!(Motif::parse("A -> B [weight > 4").is_err());
        assert!(Motif::parse("1A -> B").is_err());
    }

    #[test]
    fn hash_inside_quotes_is_not_a_comment() {
        let m = Motif::parse("A.label = \"#7\" # trailing").unwrap();
        assert_eq!(m.node_constraints("A")[0].value, Value::String("#7".into()));
    }

    #[test]
    fn constraint_matching_coerces_numeric_strings() {
        let c = Constraint { attribute: "weight".into(), op: CmpOp::Gt, value: Value::from(3) };
        let mut attrs = Attributes::new();
        assert!(!c.matches(&attrs));
        attrs.insert("weight".into(), Value::String("4".into()));
        assert!(c.matches(&attrs));
        attrs.insert("weight".into(), Value::from(2.5));
        assert!(!c.matches(&attrs));
    }

    #[test]
    fn node_link_groups_constraints() {
        let m = Motif::parse("A -> B [weight > 1, weight > 2]").unwrap();
        let nl = m.to_node_link();
        assert_eq!(nl["links"][0]["constraints"]["weight"][">"], json!([1, 2]));
        assert_eq!(nl["nodes"].as_array().unwrap().len(), 2);
    }
}
