//! Crate-level error for the binaries

use thiserror::Error;

use crate::config::ConfigError;
use crate::graph::GraphError;
use crate::layout::LayoutError;
use crate::machine::MachineError;
use crate::parser::ParseError;
use crate::paths::PathError;
use crate::simulation::inspect::InspectError;
use crate::statechart::DefinitionError;
use crate::viewport::StoreError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Machine error: {0}")]
    Machine(#[from] MachineError),
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),
    #[error("Inspection error: {0}")]
    Inspect(#[from] InspectError),
    #[error("Position store error: {0}")]
    Store(#[from] StoreError),
    #[error("Path error: {0}")]
    Path(#[from] PathError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Definition loaded but failed validation
    #[error("Invalid machine '{machine}':\n  {}", problems.join("\n  "))]
    Invalid { machine: String, problems: Vec<String> },
}

pub type Result<T> = std::result::Result<T, Error>;
