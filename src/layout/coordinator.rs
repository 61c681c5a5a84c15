//! Layout Coordinator: `loading` / `success` with generation-tagged requests

use super::{apply_layout, layout_input, LayoutOptions, LayoutRequest, LayoutResponse};
use crate::graph::DirectedGraph;

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutPhase {
    /// Waiting for the result of request `generation`
    Loading { generation: u64 },
    Success,
}

/// Effects the host must carry out
#[derive(Debug, Clone)]
pub enum LayoutAction {
    /// Tell the orchestrator a layout is pending
    NotifyPending,
    /// Submit this request to the layout engine
    Request(LayoutRequest),
    /// Tell the orchestrator the layout is ready
    NotifyReady,
    /// Forward to the orchestrator as an error notification
    Failed(String),
}

/// Drives one layout call at a time and rejects stale results
#[derive(Debug)]
pub struct LayoutCoordinator {
    phase: LayoutPhase,
    /// Last issued generation
    generation: u64,
    /// Graph waiting for the in-flight result
    pending: Option<DirectedGraph>,
    /// Last successfully positioned graph
    layout: Option<DirectedGraph>,
    options: LayoutOptions,
}

impl LayoutCoordinator {
    pub fn new(options: LayoutOptions) -> Self {
        Self {
            phase: LayoutPhase::Loading { generation: 0 },
            generation: 0,
            pending: None,
            layout: None,
            options,
        }
    }

    pub fn phase(&self) -> LayoutPhase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, LayoutPhase::Loading { .. })
    }

    /// Latest positioned graph, kept across failures
    pub fn layout(&self) -> Option<&DirectedGraph> {
        self.layout.as_ref()
    }

    pub fn options(&self) -> &LayoutOptions {
        &self.options
    }

    /// `GRAPH_UPDATED`: accepted in any phase, supersedes the in-flight call
    pub fn graph_updated(&mut self, graph: DirectedGraph) -> Vec<LayoutAction> {
        self.generation += 1;
        self.phase = LayoutPhase::Loading {
            generation: self.generation,
        };

        let request = LayoutRequest {
            generation: self.generation,
            input: layout_input(&graph, &self.options),
        };
        self.pending = Some(graph);

        log::debug!("layout loading, generation {}", self.generation);
        vec![LayoutAction::NotifyPending, LayoutAction::Request(request)]
    }

    /// Apply an engine response if it answers the latest request
    pub fn resolve(&mut self, response: LayoutResponse) -> Vec<LayoutAction> {
        let current = match self.phase {
            LayoutPhase::Loading { generation } if generation == response.generation => generation,
            _ => {
                log::warn!(
                    "dropping stale layout result (generation {}, latest {})",
                    response.generation,
                    self.generation
                );
                return Vec::new();
            }
        };

        let Some(mut graph) = self.pending.take() else {
            log::warn!("layout result for generation {} has no pending graph", current);
            return Vec::new();
        };

        let outcome = response
            .result
            .and_then(|result| apply_layout(&mut graph, &result).map(|_| graph));

        match outcome {
            Ok(positioned) => {
                self.layout = Some(positioned);
                self.phase = LayoutPhase::Success;
                log::info!("layout ready (generation {})", current);
                vec![LayoutAction::NotifyReady]
            }
            Err(err) => {
                log::error!("layout failed (generation {}): {}", current, err);
                let mut actions = vec![LayoutAction::Failed(err.to_string())];
                if self.layout.is_some() {
                    // Previous diagram stays on screen
                    self.phase = LayoutPhase::Success;
                    actions.push(LayoutAction::NotifyReady);
                }
                actions
            }
        }
    }
}
