//! Statechart Definitions
//! Hierarchical/parallel state machine model consumed by the graph builder,
//! the interpreter and the path generator

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[cfg(test)]
mod tests;

/// Prefix of the event descriptors generated for delayed (`after`) transitions
pub const DELAYED_EVENT_PREFIX: &str = "xstate.after(";

/// Event descriptor used for eventless (`always`) transitions
pub const EVENTLESS: &str = "";

/// Wildcard event descriptor, matches any event
pub const WILDCARD: &str = "*";

#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("Invalid machine JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Duplicate state id '{0}'")]
    DuplicateId(String),
    #[error("Initial state '{initial}' is not a child of '{parent}'")]
    UnknownInitial { parent: String, initial: String },
}

// ============================================================================
// CONFIG SHAPES (JSON / DSL input)
// ============================================================================

/// Either a single value or a list of values, as accepted by the JSON config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

/// Action reference: a bare name or `{ "type": ..., "params": ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionConfig {
    Named(String),
    Detailed {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        params: Value,
    },
}

/// Guard reference, same shape as actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GuardConfig {
    Named(String),
    Detailed {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        params: Value,
    },
}

/// A transition candidate: a bare target or a full transition object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionSpec {
    Target(String),
    Full(TransitionConfig),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<GuardConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<OneOrMany<ActionConfig>>,
    #[serde(default)]
    pub reenter: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Configuration of one state node (xstate JSON layout)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub states: IndexMap<String, StateConfig>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub on: IndexMap<String, OneOrMany<TransitionSpec>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub after: IndexMap<String, OneOrMany<TransitionSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always: Option<OneOrMany<TransitionSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<OneOrMany<ActionConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<OneOrMany<ActionConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Top-level machine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    pub id: String,
    /// Initial extended state
    #[serde(default)]
    pub context: Value,
    /// Named delays in milliseconds
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub delays: IndexMap<String, u64>,
    #[serde(flatten)]
    pub root: StateConfig,
}

impl MachineConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context: Value::Null,
            delays: IndexMap::new(),
            root: StateConfig::default(),
        }
    }
}

// ============================================================================
// NORMALIZED DEFINITION
// ============================================================================

/// Kind of state node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Atomic or compound state
    #[default]
    #[serde(alias = "atomic", alias = "compound")]
    Normal,
    /// Children are orthogonal regions, all active at once
    Parallel,
    /// Final state
    Final,
    /// History pseudo-state
    History,
}

/// An executable action attached to a transition or entry/exit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDef {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Value,
}

impl ActionDef {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

impl From<ActionConfig> for ActionDef {
    fn from(config: ActionConfig) -> Self {
        match config {
            ActionConfig::Named(kind) => ActionDef::new(kind),
            ActionConfig::Detailed { kind, params } => ActionDef { kind, params },
        }
    }
}

/// A named guard condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardDef {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Value,
}

impl GuardDef {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Value::Null,
        }
    }
}

impl From<GuardConfig> for GuardDef {
    fn from(config: GuardConfig) -> Self {
        match config {
            GuardConfig::Named(kind) => GuardDef::new(kind),
            GuardConfig::Detailed { kind, params } => GuardDef { kind, params },
        }
    }
}

/// One transition candidate of a state node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDef {
    /// Id of the state node declaring the transition
    pub source: String,
    /// Event descriptor (`""` for eventless transitions)
    pub event: String,
    /// Resolved target ids; empty for targetless transitions
    pub targets: Vec<String>,
    pub guard: Option<GuardDef>,
    pub actions: Vec<ActionDef>,
    /// Exit and re-enter the source even when targeting a descendant
    pub reenter: bool,
    pub description: Option<String>,
}

impl TransitionDef {
    pub fn new(source: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            event: event.into(),
            targets: Vec::new(),
            guard: None,
            actions: Vec::new(),
            reenter: false,
            description: None,
        }
    }

    pub fn is_eventless(&self) -> bool {
        self.event == EVENTLESS
    }

    /// Format transition label for display
    pub fn label(&self) -> String {
        let mut parts = Vec::new();

        if !self.event.is_empty() {
            parts.push(self.event.clone());
        }

        if let Some(ref guard) = self.guard {
            parts.push(format!("[{}]", guard.kind));
        }

        if !self.actions.is_empty() {
            let names: Vec<&str> = self.actions.iter().map(|a| a.kind.as_str()).collect();
            parts.push(format!("/ {}", names.join(", ")));
        }

        parts.join(" ")
    }
}

/// A state node inside a [`StatechartDefinition`] arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateNodeDef {
    /// Unique id (dot path from the machine id unless overridden)
    pub id: String,
    /// Key within the parent
    pub key: String,
    pub kind: NodeKind,
    /// Index of the parent node, `None` for the root
    pub parent: Option<usize>,
    /// Child indices in declared order
    pub children: Vec<usize>,
    /// Index of the initial child for compound states
    pub initial: Option<usize>,
    /// Event descriptor -> ordered transition candidates
    pub transitions: IndexMap<String, Vec<TransitionDef>>,
    pub entry: Vec<ActionDef>,
    pub exit: Vec<ActionDef>,
    pub description: Option<String>,
    /// Distance from the root
    pub depth: usize,
}

impl StateNodeDef {
    pub fn is_atomic(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_compound(&self) -> bool {
        self.kind == NodeKind::Normal && !self.children.is_empty()
    }

    pub fn is_parallel(&self) -> bool {
        self.kind == NodeKind::Parallel
    }

    pub fn is_final(&self) -> bool {
        self.kind == NodeKind::Final
    }

    pub fn is_history(&self) -> bool {
        self.kind == NodeKind::History
    }

    /// All transition candidates in declared order
    pub fn all_transitions(&self) -> impl Iterator<Item = &TransitionDef> {
        self.transitions.values().flatten()
    }
}

/// A complete, normalized statechart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatechartDefinition {
    /// Machine id (also the root node id)
    pub id: String,
    /// Nodes in document (pre-)order; index 0 is the root
    nodes: Vec<StateNodeDef>,
    /// Initial extended state
    pub context: Value,
    /// Named delays in milliseconds
    pub delays: BTreeMap<String, u64>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl StatechartDefinition {
    /// Normalize a machine configuration into a definition arena
    pub fn from_config(config: MachineConfig) -> Result<Self, DefinitionError> {
        let mut def = Self {
            id: config.id.clone(),
            nodes: Vec::new(),
            context: config.context,
            delays: config.delays.into_iter().collect(),
            index: HashMap::new(),
        };

        let root_key = config.id.clone();
        def.add_state(&root_key, config.root, None)?;
        def.resolve_targets();

        log::debug!(
            "built definition '{}' with {} state nodes",
            def.id,
            def.nodes.len()
        );
        Ok(def)
    }

    /// Parse a JSON machine config
    pub fn from_json(source: &str) -> Result<Self, DefinitionError> {
        let config: MachineConfig = serde_json::from_str(source)?;
        Self::from_config(config)
    }

    /// Parse a JSON value holding a machine config (inspection payloads)
    pub fn from_value(value: Value) -> Result<Self, DefinitionError> {
        let config: MachineConfig = serde_json::from_value(value)?;
        Self::from_config(config)
    }

    fn add_state(
        &mut self,
        key: &str,
        config: StateConfig,
        parent: Option<usize>,
    ) -> Result<usize, DefinitionError> {
        let id = match (&config.id, parent) {
            (Some(custom), _) => custom.clone(),
            (None, Some(p)) => format!("{}.{}", self.nodes[p].id, key),
            (None, None) => key.to_string(),
        };

        if self.index.contains_key(&id) {
            return Err(DefinitionError::DuplicateId(id));
        }

        let idx = self.nodes.len();
        let depth = parent.map(|p| self.nodes[p].depth + 1).unwrap_or(0);
        let transitions = collect_transitions(&id, &config);

        self.index.insert(id.clone(), idx);
        self.nodes.push(StateNodeDef {
            id: id.clone(),
            key: key.to_string(),
            kind: config.kind.unwrap_or_default(),
            parent,
            children: Vec::new(),
            initial: None,
            transitions,
            entry: config
                .entry
                .map(|a| a.into_vec().into_iter().map(ActionDef::from).collect())
                .unwrap_or_default(),
            exit: config
                .exit
                .map(|a| a.into_vec().into_iter().map(ActionDef::from).collect())
                .unwrap_or_default(),
            description: config.description,
            depth,
        });

        let mut children = Vec::with_capacity(config.states.len());
        for (child_key, child_config) in config.states {
            let child = self.add_state(&child_key, child_config, Some(idx))?;
            children.push(child);
        }

        let initial = match (&config.initial, self.nodes[idx].kind) {
            (_, NodeKind::Parallel) => None,
            (Some(initial_key), _) => {
                let found = children
                    .iter()
                    .copied()
                    .find(|&c| self.nodes[c].key == *initial_key || self.nodes[c].id == *initial_key);
                match found {
                    Some(c) => Some(c),
                    None => {
                        return Err(DefinitionError::UnknownInitial {
                            parent: id,
                            initial: initial_key.clone(),
                        })
                    }
                }
            }
            // Default to the first declared child
            (None, _) => children.first().copied(),
        };

        self.nodes[idx].children = children;
        self.nodes[idx].initial = initial;
        Ok(idx)
    }

    fn resolve_targets(&mut self) {
        for idx in 0..self.nodes.len() {
            let parent_id = self.nodes[idx].parent.map(|p| self.nodes[p].id.clone());
            let own_id = self.nodes[idx].id.clone();

            let mut transitions = std::mem::take(&mut self.nodes[idx].transitions);
            for transition in transitions.values_mut().flatten() {
                for target in transition.targets.iter_mut() {
                    *target = self.resolve_target(&own_id, parent_id.as_deref(), target);
                }
            }
            self.nodes[idx].transitions = transitions;
        }
    }

    fn resolve_target(&self, source_id: &str, parent_id: Option<&str>, raw: &str) -> String {
        if let Some(absolute) = raw.strip_prefix('#') {
            if self.index.contains_key(absolute) {
                return absolute.to_string();
            }
            return raw.to_string();
        }

        if raw.starts_with('.') {
            return format!("{}{}", source_id, raw);
        }

        let sibling = format!("{}.{}", parent_id.unwrap_or(source_id), raw);
        if self.index.contains_key(&sibling) {
            sibling
        } else {
            // Either already a full id or dangling; validation reports the latter
            raw.to_string()
        }
    }

    pub fn root(&self) -> &StateNodeDef {
        &self.nodes[0]
    }

    pub fn nodes(&self) -> &[StateNodeDef] {
        &self.nodes
    }

    pub fn node(&self, idx: usize) -> &StateNodeDef {
        &self.nodes[idx]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&StateNodeDef> {
        self.index_of(id).map(|i| &self.nodes[i])
    }

    /// Proper ancestors of `idx`, nearest first
    pub fn ancestors(&self, idx: usize) -> Vec<usize> {
        let mut result = Vec::new();
        let mut current = self.nodes[idx].parent;
        while let Some(p) = current {
            result.push(p);
            current = self.nodes[p].parent;
        }
        result
    }

    /// True if `idx` is `ancestor` or lies below it
    pub fn is_descendant_or_self(&self, idx: usize, ancestor: usize) -> bool {
        idx == ancestor || self.ancestors(idx).contains(&ancestor)
    }

    /// Get all unique event descriptors, in document order
    pub fn events(&self) -> Vec<String> {
        let mut events: Vec<String> = Vec::new();
        for node in &self.nodes {
            for event in node.transitions.keys() {
                if event != EVENTLESS && !events.contains(event) {
                    events.push(event.clone());
                }
            }
        }
        events
    }

    /// Validate references that `from_config` keeps verbatim
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for node in &self.nodes {
            for transition in node.all_transitions() {
                for target in &transition.targets {
                    if !self.index.contains_key(target) {
                        errors.push(format!(
                            "Transition '{}' of '{}' targets unknown state '{}'",
                            transition.event, node.id, target
                        ));
                    }
                }
            }

            if (node.is_final() || node.is_history()) && !node.children.is_empty() {
                errors.push(format!(
                    "{:?} state '{}' cannot have child states",
                    node.kind, node.id
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn collect_transitions(source_id: &str, config: &StateConfig) -> IndexMap<String, Vec<TransitionDef>> {
    let mut map: IndexMap<String, Vec<TransitionDef>> = IndexMap::new();

    for (event, specs) in &config.on {
        let list = specs
            .clone()
            .into_vec()
            .into_iter()
            .map(|spec| to_transition(source_id, event, spec))
            .collect();
        map.insert(event.clone(), list);
    }

    for (delay, specs) in &config.after {
        let event = format!("{}{})#{}", DELAYED_EVENT_PREFIX, delay, source_id);
        let list = specs
            .clone()
            .into_vec()
            .into_iter()
            .map(|spec| to_transition(source_id, &event, spec))
            .collect();
        map.insert(event, list);
    }

    if let Some(specs) = &config.always {
        let list = specs
            .clone()
            .into_vec()
            .into_iter()
            .map(|spec| to_transition(source_id, EVENTLESS, spec))
            .collect();
        map.insert(EVENTLESS.to_string(), list);
    }

    map
}

fn to_transition(source_id: &str, event: &str, spec: TransitionSpec) -> TransitionDef {
    let mut transition = TransitionDef::new(source_id, event);
    match spec {
        TransitionSpec::Target(target) => {
            transition.targets = vec![target];
        }
        TransitionSpec::Full(config) => {
            transition.targets = config.target.map(OneOrMany::into_vec).unwrap_or_default();
            transition.guard = config.guard.map(GuardDef::from);
            transition.actions = config
                .actions
                .map(|a| a.into_vec().into_iter().map(ActionDef::from).collect())
                .unwrap_or_default();
            transition.reenter = config.reenter;
            transition.description = config.description;
        }
    }
    transition
}

// ============================================================================
// DELAYED TRANSITIONS
// ============================================================================

/// Display metadata for a delayed transition's event descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum DelayMetadata {
    Valid { delay_ms: u64, label: String },
    /// The delay expression could not be resolved; rendered as a marker only
    Invalid,
}

/// Inspect an event descriptor; `None` if it is not a delayed event
pub fn delayed_transition(event: &str, delays: &BTreeMap<String, u64>) -> Option<DelayMetadata> {
    let rest = event.strip_prefix(DELAYED_EVENT_PREFIX)?;

    let Some(end) = rest.rfind(")#") else {
        return Some(DelayMetadata::Invalid);
    };
    let expr = rest[..end].trim();

    let delay_ms = match expr.parse::<f64>() {
        Ok(ms) if ms.is_finite() && ms >= 0.0 => ms.round() as u64,
        _ => match delays.get(expr) {
            Some(ms) => *ms,
            None => return Some(DelayMetadata::Invalid),
        },
    };

    Some(DelayMetadata::Valid {
        delay_ms,
        label: format_delay(delay_ms),
    })
}

/// `"300ms"`, `"1.5s"`, `"2s"`
pub fn format_delay(delay_ms: u64) -> String {
    if delay_ms < 1000 {
        format!("{}ms", delay_ms)
    } else {
        format!("{}s", delay_ms as f64 / 1000.0)
    }
}
