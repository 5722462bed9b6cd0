//! Graph module - weighted undirected graphs and shortest-path search
//!
//! A graph arrives as an incidence matrix (vertices x edges) plus one weight per
//! edge. Each column must mark one vertex (a self-loop) or two vertices (a normal
//! edge). Shortest paths are found by iterative edge relaxation over the
//! undirected edge list.
//!
//! Ties between equal-length paths are broken deterministically: edges are relaxed
//! in column order and only strict improvements replace a predecessor, so the
//! first-discovered path wins.

pub mod text;

use thiserror::Error;

use crate::protocol::{pack_incidence, unpack_incidence, CodecError, UploadGraphPayload};

/// Minimum number of vertices a graph must have
pub const MIN_VERTICES: u16 = 6;

/// Minimum number of edges a graph must have
pub const MIN_EDGES: u16 = 6;

/// Distance sentinel; every edge weight must stay strictly below it
pub const INFINITY: u32 = u32::MAX / 4;

/// Graph validation and search errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Graph needs at least {min} vertices, got {0}", min = MIN_VERTICES)]
    TooFewVertices(u16),

    #[error("Graph needs at least {min} edges, got {0}", min = MIN_EDGES)]
    TooFewEdges(u16),

    #[error("Incidence matrix shape does not match {vertices} vertices x {edges} edges")]
    ShapeMismatch { vertices: u16, edges: u16 },

    #[error("Expected {expected} weights, got {actual}")]
    WeightCount { expected: usize, actual: usize },

    #[error("Weight {weight} of edge {edge} is out of range")]
    WeightOutOfRange { edge: u16, weight: u32 },

    #[error("Incidence cell ({vertex}, {edge}) must be 0 or 1, got {value}")]
    InvalidCell { vertex: u16, edge: u16, value: u8 },

    #[error("Edge {edge} has {endpoints} endpoints, expected 1 or 2")]
    InvalidEdge { edge: u16, endpoints: usize },

    #[error("Vertex {vertex} is out of range (graph has {vertex_count} vertices)")]
    VertexOutOfRange { vertex: u16, vertex_count: u16 },

    #[error("Graph is not initialized")]
    Uninitialized,

    #[error("No path from {from} to {to}")]
    NoPath { from: u16, to: u16 },

    #[error("Path distance exceeds the representable range")]
    DistanceOverflow,
}

pub type GraphResult<T> = Result<T, GraphError>;

/// An undirected edge resolved from one incidence column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub u: u16,
    pub v: u16,
    pub weight: u32,
}

/// A weighted graph described by its incidence matrix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graph {
    vertex_count: u16,
    edge_count: u16,
    incidence: Vec<Vec<u8>>,
    weights: Vec<u32>,
}

/// A successful shortest-path search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortestPath {
    pub distance: u32,
    /// Vertices from source to target inclusive
    pub path: Vec<u16>,
}

impl Graph {
    /// Build a graph without validating it; see [`validate`]
    pub fn new(vertex_count: u16, edge_count: u16, incidence: Vec<Vec<u8>>, weights: Vec<u32>) -> Self {
        Self {
            vertex_count,
            edge_count,
            incidence,
            weights,
        }
    }

    /// Build a graph from a list of `(u, v, weight)` edges
    pub fn from_edges(vertex_count: u16, edges: &[(u16, u16, u32)]) -> Self {
        let edge_count = edges.len() as u16;
        let mut incidence = vec![vec![0u8; edges.len()]; vertex_count as usize];
        for (e, &(u, v, _)) in edges.iter().enumerate() {
            if let Some(row) = incidence.get_mut(u as usize) {
                row[e] = 1;
            }
            if let Some(row) = incidence.get_mut(v as usize) {
                row[e] = 1;
            }
        }
        let weights = edges.iter().map(|&(_, _, w)| w).collect();
        Self::new(vertex_count, edge_count, incidence, weights)
    }

    /// Decode the wire payload into a graph (shape only, not domain rules)
    pub fn from_payload(payload: UploadGraphPayload) -> Result<Self, CodecError> {
        let incidence = unpack_incidence(payload.vertex_count, payload.edge_count, &payload.incidence_bits)?;
        Ok(Self::new(
            payload.vertex_count,
            payload.edge_count,
            incidence,
            payload.weights,
        ))
    }

    /// Encode this graph for an `UploadGraph` request
    pub fn to_payload(&self) -> UploadGraphPayload {
        UploadGraphPayload {
            vertex_count: self.vertex_count,
            edge_count: self.edge_count,
            incidence_bits: pack_incidence(&self.incidence),
            weights: self.weights.clone(),
        }
    }

    pub fn vertex_count(&self) -> u16 {
        self.vertex_count
    }

    pub fn edge_count(&self) -> u16 {
        self.edge_count
    }

    pub fn weights(&self) -> &[u32] {
        &self.weights
    }

    pub fn incidence(&self) -> &[Vec<u8>] {
        &self.incidence
    }

    /// Resolve every column into an edge; self-loops have `u == v`
    pub fn edges(&self) -> GraphResult<Vec<Edge>> {
        let mut edges = Vec::with_capacity(self.edge_count as usize);
        for e in 0..self.edge_count {
            let endpoints: Vec<u16> = (0..self.vertex_count)
                .filter(|&v| self.incidence[v as usize][e as usize] != 0)
                .collect();
            let weight = self.weights[e as usize];
            match endpoints.as_slice() {
                [u] => edges.push(Edge { u: *u, v: *u, weight }),
                [u, v] => edges.push(Edge { u: *u, v: *v, weight }),
                other => {
                    return Err(GraphError::InvalidEdge {
                        edge: e,
                        endpoints: other.len(),
                    })
                }
            }
        }
        Ok(edges)
    }
}

/// Check that a graph satisfies every rule the search relies on
pub fn validate(graph: &Graph) -> GraphResult<()> {
    if graph.vertex_count < MIN_VERTICES {
        return Err(GraphError::TooFewVertices(graph.vertex_count));
    }
    if graph.edge_count < MIN_EDGES {
        return Err(GraphError::TooFewEdges(graph.edge_count));
    }

    let shape_ok = graph.incidence.len() == graph.vertex_count as usize
        && graph
            .incidence
            .iter()
            .all(|row| row.len() == graph.edge_count as usize);
    if !shape_ok {
        return Err(GraphError::ShapeMismatch {
            vertices: graph.vertex_count,
            edges: graph.edge_count,
        });
    }

    if graph.weights.len() != graph.edge_count as usize {
        return Err(GraphError::WeightCount {
            expected: graph.edge_count as usize,
            actual: graph.weights.len(),
        });
    }
    if let Some((edge, &weight)) = graph.weights.iter().enumerate().find(|(_, &w)| w >= INFINITY) {
        return Err(GraphError::WeightOutOfRange {
            edge: edge as u16,
            weight,
        });
    }

    for (v, row) in graph.incidence.iter().enumerate() {
        if let Some((e, &value)) = row.iter().enumerate().find(|(_, &c)| c > 1) {
            return Err(GraphError::InvalidCell {
                vertex: v as u16,
                edge: e as u16,
                value,
            });
        }
    }

    graph.edges().map(|_| ())
}

/// Find the shortest path between two vertices
pub fn shortest_path(graph: &Graph, source: u16, target: u16) -> GraphResult<ShortestPath> {
    if graph.vertex_count == 0 {
        return Err(GraphError::Uninitialized);
    }
    for vertex in [source, target] {
        if vertex >= graph.vertex_count {
            return Err(GraphError::VertexOutOfRange {
                vertex,
                vertex_count: graph.vertex_count,
            });
        }
    }
    validate(graph)?;
    let edges = graph.edges()?;

    let n = graph.vertex_count as usize;
    let mut dist: Vec<Option<u64>> = vec![None; n];
    let mut parent: Vec<Option<u16>> = vec![None; n];
    dist[source as usize] = Some(0);

    for _ in 1..n {
        let mut updated = false;
        for edge in &edges {
            let w = edge.weight as u64;
            for (from, to) in [(edge.u, edge.v), (edge.v, edge.u)] {
                let Some(d) = dist[from as usize] else { continue };
                let candidate = d + w;
                if dist[to as usize].map_or(true, |current| candidate < current) {
                    dist[to as usize] = Some(candidate);
                    parent[to as usize] = Some(from);
                    updated = true;
                }
            }
        }
        if !updated {
            break;
        }
    }

    let Some(total) = dist[target as usize] else {
        return Err(GraphError::NoPath { from: source, to: target });
    };
    let distance = u32::try_from(total).map_err(|_| GraphError::DistanceOverflow)?;

    let mut path = vec![target];
    let mut current = target;
    while current != source {
        match parent[current as usize] {
            Some(prev) if path.len() <= n => {
                path.push(prev);
                current = prev;
            }
            _ => return Err(GraphError::NoPath { from: source, to: target }),
        }
    }
    path.reverse();

    Ok(ShortestPath { distance, path })
}
