//! stateviz - Statechart Visualizer
//! Turns hierarchical state machines into laid-out diagrams, drives them
//! locally or from an inspected process, and generates test paths.

pub mod config;
pub mod drag;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod layout;
pub mod machine;
pub mod parser;
pub mod paths;
pub mod simulation;
pub mod statechart;
pub mod viewport;

use std::path::Path;

use serde_json::Value;

pub use config::{AppConfig, EmbedOptions};
pub use error::{Error, Result};
pub use graph::{build_graph, DirectedGraph};
pub use machine::{Event, Interpreter, LocalFactory, MachineLogic, Snapshot};
pub use parser::parse_machines;
pub use simulation::{SimulationCommand, SimulationOrchestrator};
pub use statechart::{MachineConfig, StatechartDefinition};
pub use viewport::{CanvasController, ViewportCommand};

/// Build definitions from machine source: a JSON config (one object or a
/// list) when `json` is set, the textual DSL otherwise
pub fn definitions_from_source(source: &str, json: bool) -> Result<Vec<StatechartDefinition>> {
    if json {
        let value: Value = serde_json::from_str(source).map_err(statechart::DefinitionError::from)?;
        let values = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        return values
            .into_iter()
            .map(|v| StatechartDefinition::from_value(v).map_err(Error::from))
            .collect();
    }

    parse_machines(source)?
        .into_iter()
        .map(|config| StatechartDefinition::from_config(config).map_err(Error::from))
        .collect()
}

/// Load a machine file; `.json` files are JSON configs, anything else is DSL
pub fn load_definitions(path: &Path) -> Result<Vec<StatechartDefinition>> {
    let source = std::fs::read_to_string(path)?;
    let json = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
    log::info!("loading {} ({})", path.display(), if json { "json" } else { "dsl" });
    definitions_from_source(&source, json)
}

/// Reject definitions that do not validate
pub fn validated(definition: StatechartDefinition) -> Result<StatechartDefinition> {
    match definition.validate() {
        Ok(()) => Ok(definition),
        Err(problems) => Err(Error::Invalid {
            machine: definition.id.clone(),
            problems,
        }),
    }
}
