//! Layout
//! Layout input/output shapes, the engine trait, built-in and external
//! engines, the layout coordinator and a background worker

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{Point, Rect};
use crate::graph::{DirectedGraph, EdgeSection, NodeIndex};
use crate::statechart::StateNodeDef;

mod coordinator;
mod layered;
mod process;
mod worker;

pub use coordinator::{LayoutAction, LayoutCoordinator, LayoutPhase};
pub use layered::LayeredLayout;
pub use process::ProcessLayoutEngine;
pub use worker::LayoutWorker;


#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Layout process I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid layout JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Layout process exited with {status}: {stderr}")]
    Process { status: String, stderr: String },
    #[error("Layout result references unknown node '{0}'")]
    UnknownNode(String),
    #[error("Layout worker is gone")]
    WorkerGone,
}

// ============================================================================
// LAYOUT INPUT
// ============================================================================

/// Flow direction of sibling ranks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutDirection {
    /// Top to bottom
    #[default]
    Tb,
    /// Left to right
    Lr,
}

/// Spacing knobs shared by every engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOptions {
    pub direction: LayoutDirection,
    /// Gap between siblings in the same rank
    pub node_spacing: f64,
    /// Gap between ranks
    pub rank_spacing: f64,
    /// Inner padding of compound nodes
    pub padding: f64,
    /// Space reserved for a compound node's title and action rows
    pub header_height: f64,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            direction: LayoutDirection::Tb,
            node_spacing: 40.0,
            rank_spacing: 60.0,
            padding: 20.0,
            header_height: 40.0,
        }
    }
}

/// A node in the compound layout tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutNodeInput {
    pub id: String,
    /// Intrinsic width (minimum for compound nodes)
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub parallel: bool,
    /// Initial child id, ranked first
    #[serde(default)]
    pub initial: Option<String>,
    #[serde(default)]
    pub children: Vec<LayoutNodeInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutEdgeInput {
    pub id: String,
    pub source: String,
    pub target: String,
    pub label_width: f64,
    pub label_height: f64,
}

/// Structural/size-only input handed to a layout engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutInput {
    pub root: LayoutNodeInput,
    pub edges: Vec<LayoutEdgeInput>,
    pub options: LayoutOptions,
}

// ============================================================================
// LAYOUT OUTPUT
// ============================================================================

/// Position of a node relative to its parent's top-left corner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePlacement {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Route of an edge, in root coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRoute {
    pub id: String,
    pub sections: Vec<EdgeSection>,
    /// Top-left corner of the label
    pub label: Point,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayoutResult {
    pub nodes: Vec<NodePlacement>,
    pub edges: Vec<EdgeRoute>,
    /// Content size
    pub width: f64,
    pub height: f64,
}

/// A layout algorithm; may be slow or fail
pub trait LayoutEngine: Send {
    fn name(&self) -> &str;

    fn layout(&self, input: &LayoutInput) -> Result<LayoutResult, LayoutError>;
}

/// A tagged request handed to an engine
#[derive(Debug, Clone)]
pub struct LayoutRequest {
    pub generation: u64,
    pub input: LayoutInput,
}

/// An engine's answer to a [`LayoutRequest`]
#[derive(Debug)]
pub struct LayoutResponse {
    pub generation: u64,
    pub result: Result<LayoutResult, LayoutError>,
}

// ============================================================================
// SIZE ESTIMATION
// ============================================================================

const CHAR_WIDTH: f64 = 8.0;
const LABEL_CHAR_WIDTH: f64 = 7.0;
const ACTION_LINE_HEIGHT: f64 = 16.0;

/// Estimate a state box from its key and action rows
pub fn estimate_state_size(state: &StateNodeDef) -> (f64, f64) {
    let mut action_lines = 0;
    let mut max_action_len = 0;

    for action in &state.entry {
        action_lines += 1;
        max_action_len = max_action_len.max(action.kind.len() + 7); // "entry/ "
    }
    for action in &state.exit {
        action_lines += 1;
        max_action_len = max_action_len.max(action.kind.len() + 6); // "exit/ "
    }

    let max_chars = state.key.len().max(max_action_len);
    let width = (max_chars as f64 * CHAR_WIDTH).max(100.0) + 30.0;
    let height = 30.0 + (action_lines.max(1) as f64 * ACTION_LINE_HEIGHT) + 20.0;

    (width, height)
}

/// Estimate an edge label box
pub fn estimate_label_size(text: &str) -> (f64, f64) {
    if text.is_empty() {
        return (0.0, 0.0);
    }
    (text.chars().count() as f64 * LABEL_CHAR_WIDTH + 14.0, 20.0)
}

/// Build the engine input for a graph
pub fn layout_input(graph: &DirectedGraph, options: &LayoutOptions) -> LayoutInput {
    fn node_input(graph: &DirectedGraph, idx: NodeIndex) -> LayoutNodeInput {
        let node = graph.node(idx);
        let state = graph.definition().node(node.state);
        let (width, height) = estimate_state_size(state);

        LayoutNodeInput {
            id: node.id.clone(),
            width,
            height,
            parallel: state.is_parallel(),
            initial: state.initial.map(|i| graph.definition().node(i).id.clone()),
            children: node.children.iter().map(|&c| node_input(graph, c)).collect(),
        }
    }

    let edges = graph
        .all_edges()
        .map(|edge| {
            let (label_width, label_height) = estimate_label_size(&edge.label.text);
            LayoutEdgeInput {
                id: edge.id.clone(),
                source: graph.node(edge.source).id.clone(),
                target: graph.node(edge.target).id.clone(),
                label_width,
                label_height,
            }
        })
        .collect();

    LayoutInput {
        root: node_input(graph, 0),
        edges,
        options: options.clone(),
    }
}

/// Write a layout result back into the graph
pub fn apply_layout(graph: &mut DirectedGraph, result: &LayoutResult) -> Result<(), LayoutError> {
    for placement in &result.nodes {
        let idx = graph
            .index_of(&placement.id)
            .ok_or_else(|| LayoutError::UnknownNode(placement.id.clone()))?;
        graph.node_mut(idx).layout = Some(Rect::new(
            placement.x,
            placement.y,
            placement.width,
            placement.height,
        ));
    }

    let routes: HashMap<&str, &EdgeRoute> = result.edges.iter().map(|r| (r.id.as_str(), r)).collect();
    for idx in 0..graph.len() {
        for edge in graph.node_mut(idx).edges.iter_mut() {
            match routes.get(edge.id.as_str()) {
                Some(route) => {
                    edge.sections = route.sections.clone();
                    edge.label.position = route.label;
                }
                None => log::warn!("layout result has no route for edge '{}'", edge.id),
            }
        }
    }

    // Engines may omit the root placement; keep the content size
    if graph.root().layout.is_none() {
        graph.node_mut(0).layout = Some(Rect::new(0.0, 0.0, result.width, result.height));
    }

    Ok(())
}

/// Lay out a graph synchronously
pub fn layout_graph(
    graph: &mut DirectedGraph,
    engine: &dyn LayoutEngine,
    options: &LayoutOptions,
) -> Result<(), LayoutError> {
    let input = layout_input(graph, options);
    let result = engine.layout(&input)?;
    apply_layout(graph, &result)
}
