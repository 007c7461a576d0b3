//! Backtracking subgraph matcher bound to one immutable host graph.
//!
//! Embeddings are injective (monomorphism semantics): every positive motif edge must map onto
//! a host edge whose attributes satisfy its constraints, and negative edges must have no
//! satisfying counterpart. Host nodes are visited in key order, so identical inputs always
//! yield identical output.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::graph::HostGraph;
use crate::motif::{Motif, MotifEdge};

/// Motif node name -> host node id.
pub type Embedding = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct MatchEngine {
    graph: Arc<HostGraph>,
}

struct Plan<'m> {
    /// Motif node indices in placement order.
    order: Vec<usize>,
    /// For each motif node: incident edges (by index into `motif.edges()`).
    incident: Vec<Vec<usize>>,
    /// For each step: an already placed neighbour to draw candidates from, and whether
    /// the new node sits at the head (`true`) or tail of that edge.
    anchor: Vec<Option<(usize, bool)>>,
    out_required: Vec<usize>,
    in_required: Vec<usize>,
    index: BTreeMap<&'m str, usize>,
}

impl MatchEngine {
    pub fn new(graph: Arc<HostGraph>) -> Self { Self { graph } }

    pub fn graph(&self) -> &HostGraph { &self.graph }

    pub fn find(&self, motif: &Motif) -> Vec<Embedding> { self.find_limited(motif, None) }

    pub fn find_limited(&self, motif: &Motif, limit: Option<usize>) -> Vec<Embedding> {
        let plan = plan(motif);
        let mut mapping: Vec<Option<&str>> = vec![None; motif.nodes().len()];
        let mut used: HashSet<&str> = HashSet::new();
        let mut out = Vec::new();
        self.extend(motif, &plan, 0, &mut mapping, &mut used, &mut out, limit);
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn extend<'g>(
        &'g self,
        motif: &Motif,
        plan: &Plan<'_>,
        step: usize,
        mapping: &mut Vec<Option<&'g str>>,
        used: &mut HashSet<&'g str>,
        out: &mut Vec<Embedding>,
        limit: Option<usize>,
    ) {
        if limit.is_some_and(|l| out.len() >= l) {
            return;
        }
        if step == plan.order.len() {
            out.push(
                motif
                    .nodes()
                    .iter()
                    .zip(mapping.iter())
                    .filter_map(|(name, host)| host.map(|h| (name.clone(), h.to_string())))
                    .collect(),
            );
            return;
        }
        let node = plan.order[step];
        let candidates: Vec<&'g str> = match plan.anchor[step] {
            Some((placed, true)) => mapping[placed]
                .map(|h| self.graph.successors(h).map(String::as_str).collect())
                .unwrap_or_default(),
            Some((placed, false)) => mapping[placed]
                .map(|h| self.graph.predecessors(h).map(String::as_str).collect())
                .unwrap_or_default(),
            None => self.graph.nodes().map(String::as_str).collect(),
        };
        let constraints = motif.node_constraints(&motif.nodes()[node]);
        for cand in candidates {
            if used.contains(cand)
                || self.graph.out_degree(cand) < plan.out_required[node]
                || self.graph.in_degree(cand) < plan.in_required[node]
            {
                continue;
            }
            let attrs = self.graph.node_attributes(cand);
            if !constraints.iter().all(|c| attrs.is_some_and(|a| c.matches(a))) {
                continue;
            }
            mapping[node] = Some(cand);
            if self.edges_consistent(motif, plan, node, mapping) {
                used.insert(cand);
                self.extend(motif, plan, step + 1, mapping, used, out, limit);
                used.remove(cand);
            }
            mapping[node] = None;
        }
    }

    // Checks every motif edge between `node` and nodes placed so far (including self-loops).
    fn edges_consistent(&self, motif: &Motif, plan: &Plan<'_>, node: usize, mapping: &[Option<&str>]) -> bool {
        plan.incident[node].iter().all(|&ei| {
            let edge = &motif.edges()[ei];
            let (s, t) = (plan.index[edge.source.as_str()], plan.index[edge.target.as_str()]);
            match (mapping[s], mapping[t]) {
                (Some(hs), Some(ht)) => self.edge_holds(edge, hs, ht),
                _ => true,
            }
        })
    }

    fn edge_holds(&self, edge: &MotifEdge, hs: &str, ht: &str) -> bool {
        let satisfied = self.graph.edge(hs, ht).is_some_and(|attrs| edge.constraints.iter().all(|c| c.matches(attrs)));
        satisfied == edge.exists
    }
}

fn plan(motif: &Motif) -> Plan<'_> {
    let n = motif.nodes().len();
    let index: BTreeMap<&str, usize> = motif.nodes().iter().enumerate().map(|(i, name)| (name.as_str(), i)).collect();
    let mut incident = vec![Vec::new(); n];
    let mut out_required = vec![0usize; n];
    let mut in_required = vec![0usize; n];
    for (ei, e) in motif.edges().iter().enumerate() {
        let (s, t) = (index[e.source.as_str()], index[e.target.as_str()]);
        incident[s].push(ei);
        if t != s {
            incident[t].push(ei);
        }
        if e.exists {
            out_required[s] += 1;
            in_required[t] += 1;
        }
    }

    let mut placed = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut anchor = Vec::with_capacity(n);
    while order.len() < n {
        // Most positive edges into the placed set first, then highest degree, then declaration order.
        let next = (0..n)
            .filter(|&i| !placed[i])
            .max_by_key(|&i| {
                let links = incident[i]
                    .iter()
                    .filter(|&&ei| {
                        let e = &motif.edges()[ei];
                        let other = if index[e.source.as_str()] == i { index[e.target.as_str()] } else { index[e.source.as_str()] };
                        e.exists && other != i && placed[other]
                    })
                    .count();
                (links, out_required[i] + in_required[i], std::cmp::Reverse(i))
            })
            .unwrap_or(0);
        let anchor_edge = incident[next].iter().find_map(|&ei| {
            let e = &motif.edges()[ei];
            let (s, t) = (index[e.source.as_str()], index[e.target.as_str()]);
            if !e.exists || s == t {
                return None;
            }
            if t == next && placed[s] {
                Some((s, true))
            } else if s == next && placed[t] {
                Some((t, false))
            } else {
                None
            }
        });
        placed[next] = true;
        order.push(next);
        anchor.push(anchor_edge);
    }
    Plan { order, incident, anchor, out_required, in_required, index }
}
