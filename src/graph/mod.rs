//! Graph Builder
//! Projects a statechart definition into a directed graph of nodes and edges
//! that the layout engine positions and the canvas renders

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{Point, Rect};
use crate::statechart::{
    delayed_transition, DelayMetadata, StatechartDefinition, TransitionDef,
};


/// Index of a node inside a [`DirectedGraph`]
pub type NodeIndex = usize;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Transition '{event}' of '{source_id}' targets unknown state '{target}'")]
    DanglingTarget {
        source_id: String,
        event: String,
        target: String,
    },
    #[error("Unknown graph node '{0}'")]
    UnknownNode(String),
}

// ============================================================================
// GRAPH TYPES
// ============================================================================

/// Edge label with its layout position
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EdgeLabel {
    /// Display text
    pub text: String,
    /// Top-left corner assigned by layout, in root coordinates
    pub position: Point,
    /// Intrinsic size used as layout input
    pub width: f64,
    pub height: f64,
}

/// One routed segment of an edge
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EdgeSection {
    pub start: Point,
    pub end: Point,
    #[serde(default)]
    pub bend_points: Vec<Point>,
}

/// A transition projected onto one (source, target) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// `<source id>:<transition index>:<target index>`, or the node id for
    /// the synthetic final-state loop
    pub id: String,
    pub source: NodeIndex,
    pub target: NodeIndex,
    /// Underlying transition definition
    pub transition: TransitionDef,
    pub label: EdgeLabel,
    /// Route assigned by layout
    pub sections: Vec<EdgeSection>,
    /// Self-loop anchoring a final state's terminal marker
    pub synthetic: bool,
}

impl GraphEdge {
    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }
}

/// A state node in the directed graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Same as the wrapped state node's id
    pub id: String,
    /// Index of the wrapped node in the definition
    pub state: usize,
    /// Parent index, used only to compute absolute positions
    pub parent: Option<NodeIndex>,
    /// Child indices in declared order
    pub children: Vec<NodeIndex>,
    /// Outgoing edges
    pub edges: Vec<GraphEdge>,
    /// Rectangle relative to the parent, set by layout
    pub layout: Option<Rect>,
    /// Root is level 0
    pub level: usize,
}

/// Directed graph over a statechart; index 0 is the root
#[derive(Debug, Clone)]
pub struct DirectedGraph {
    definition: Arc<StatechartDefinition>,
    nodes: Vec<GraphNode>,
    index: HashMap<String, NodeIndex>,
}

// ============================================================================
// BUILDING
// ============================================================================

/// Build the directed graph for a definition.
///
/// Deterministic in the definition; fails without producing a partial graph
/// when a transition targets a state that does not exist.
pub fn build_graph(definition: Arc<StatechartDefinition>) -> Result<DirectedGraph, GraphError> {
    let mut nodes = Vec::with_capacity(definition.nodes().len());
    let mut index = HashMap::with_capacity(definition.nodes().len());

    // Pass 1: nodes, in the definition's pre-order
    for (i, state) in definition.nodes().iter().enumerate() {
        index.insert(state.id.clone(), i);
        nodes.push(GraphNode {
            id: state.id.clone(),
            state: i,
            parent: state.parent,
            children: state.children.clone(),
            edges: Vec::new(),
            layout: None,
            level: state.depth,
        });
    }

    // Pass 2: edges
    for (i, state) in definition.nodes().iter().enumerate() {
        let mut edges = Vec::new();

        for (t_index, transition) in state.all_transitions().enumerate() {
            let label_text = label_text(transition, &definition);

            if transition.targets.is_empty() {
                edges.push(new_edge(
                    format!("{}:{}:0", state.id, t_index),
                    i,
                    i,
                    transition.clone(),
                    label_text,
                ));
                continue;
            }

            for (target_index, target) in transition.targets.iter().enumerate() {
                let Some(&target_idx) = index.get(target) else {
                    return Err(GraphError::DanglingTarget {
                        source_id: state.id.clone(),
                        event: transition.event.clone(),
                        target: target.clone(),
                    });
                };
                edges.push(new_edge(
                    format!("{}:{}:{}", state.id, t_index, target_index),
                    i,
                    target_idx,
                    transition.clone(),
                    label_text.clone(),
                ));
            }
        }

        if state.is_final() && edges.is_empty() {
            let mut edge = new_edge(
                state.id.clone(),
                i,
                i,
                TransitionDef::new(state.id.clone(), state.id.clone()),
                state.id.clone(),
            );
            edge.synthetic = true;
            edges.push(edge);
        }

        nodes[i].edges = edges;
    }

    log::debug!(
        "built graph for '{}': {} nodes, {} edges",
        definition.id,
        nodes.len(),
        nodes.iter().map(|n| n.edges.len()).sum::<usize>()
    );

    Ok(DirectedGraph {
        definition,
        nodes,
        index,
    })
}

fn new_edge(id: String, source: NodeIndex, target: NodeIndex, transition: TransitionDef, text: String) -> GraphEdge {
    GraphEdge {
        id,
        source,
        target,
        transition,
        label: EdgeLabel {
            text,
            ..EdgeLabel::default()
        },
        sections: Vec::new(),
        synthetic: false,
    }
}

/// Display text for a transition edge
pub fn label_text(transition: &TransitionDef, definition: &StatechartDefinition) -> String {
    let event = match delayed_transition(&transition.event, &definition.delays) {
        Some(DelayMetadata::Valid { label, .. }) => format!("after {}", label),
        Some(DelayMetadata::Invalid) => "after (invalid delay)".to_string(),
        None if transition.is_eventless() => "always".to_string(),
        None => transition.event.clone(),
    };

    let mut text = event;
    if let Some(guard) = &transition.guard {
        text.push_str(&format!(" [{}]", guard.kind));
    }
    text
}

// ============================================================================
// QUERIES
// ============================================================================

impl DirectedGraph {
    pub fn definition(&self) -> &Arc<StatechartDefinition> {
        &self.definition
    }

    pub fn root(&self) -> &GraphNode {
        &self.nodes[0]
    }

    pub fn node(&self, idx: NodeIndex) -> &GraphNode {
        &self.nodes[idx]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut GraphNode {
        &mut self.nodes[idx]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&GraphNode> {
        self.index_of(id).map(|i| &self.nodes[i])
    }

    /// All nodes, root included, in pre-order
    pub fn all_nodes(&self) -> Vec<&GraphNode> {
        let mut result = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![0];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            result.push(node);
            stack.extend(node.children.iter().rev().copied());
        }
        result
    }

    /// All edges, grouped by source in pre-order
    pub fn all_edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.all_nodes().into_iter().flat_map(|n| n.edges.iter())
    }

    pub fn edge(&self, id: &str) -> Option<&GraphEdge> {
        self.nodes.iter().flat_map(|n| n.edges.iter()).find(|e| e.id == id)
    }

    /// Incoming edges keyed by target node
    pub fn back_link_map(&self) -> HashMap<NodeIndex, Vec<&GraphEdge>> {
        let mut map: HashMap<NodeIndex, Vec<&GraphEdge>> = HashMap::new();
        for node in &self.nodes {
            for edge in &node.edges {
                map.entry(edge.target).or_default().push(edge);
            }
        }
        map
    }

    /// Absolute top-left corner of a positioned node (sums parent offsets)
    pub fn absolute_position(&self, idx: NodeIndex) -> Option<Point> {
        let mut position = self.nodes[idx].layout?.origin();
        let mut current = self.nodes[idx].parent;
        while let Some(parent) = current {
            if let Some(rect) = self.nodes[parent].layout {
                position = position.offset(rect.x, rect.y);
            }
            current = self.nodes[parent].parent;
        }
        Some(position)
    }

    /// Absolute rectangle of a positioned node
    pub fn absolute_rect(&self, idx: NodeIndex) -> Option<Rect> {
        let rect = self.nodes[idx].layout?;
        let origin = self.absolute_position(idx)?;
        Some(Rect::new(origin.x, origin.y, rect.width, rect.height))
    }

    /// Size of the laid-out content (the root's rectangle)
    pub fn content_size(&self) -> Option<(f64, f64)> {
        self.root().layout.map(|r| (r.width, r.height))
    }

    /// Nearest common ancestor of two nodes (self counts)
    pub fn common_ancestor(&self, a: NodeIndex, b: NodeIndex) -> NodeIndex {
        let chain = |mut idx: NodeIndex| {
            let mut result = vec![idx];
            while let Some(parent) = self.nodes[idx].parent {
                result.push(parent);
                idx = parent;
            }
            result
        };
        let a_chain = chain(a);
        let b_chain = chain(b);
        a_chain
            .into_iter()
            .find(|idx| b_chain.contains(idx))
            .unwrap_or(0)
    }
}
