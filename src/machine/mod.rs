//! Machine Execution
//! Snapshot/event values, the execution traits used by the orchestrator and
//! the path generator, and a local actor runtime on top of the interpreter

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::statechart::{DefinitionError, StatechartDefinition, EVENTLESS, WILDCARD};

mod interpreter;

pub use interpreter::{GuardFn, Interpreter};

#[cfg(test)]
mod tests;

/// Event sent to a machine when it starts
pub const INIT_EVENT: &str = "xstate.init";

/// Prefix of completion events raised when a compound or parallel state is done
pub const DONE_STATE_PREFIX: &str = "done.state.";

/// Upper bound on microsteps within a single macrostep
pub const MAX_MICROSTEPS: usize = 1000;

#[derive(Error, Debug)]
pub enum MachineError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error("Unknown state '{0}'")]
    UnknownState(String),
    #[error("Transition from '{source_id}' targets unknown state '{target}'")]
    UnknownTarget { source_id: String, target: String },
    #[error("Unknown guard '{0}'")]
    UnknownGuard(String),
    #[error("Machine did not settle after {0} microsteps")]
    Livelock(usize),
    #[error("Instance '{0}' is not running")]
    NotRunning(String),
    #[error("Invalid state value: {0}")]
    InvalidStateValue(String),
}

pub type MachineResult<T> = Result<T, MachineError>;

// ============================================================================
// VALUES
// ============================================================================

/// An event: a `type` plus arbitrary payload fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

/// Lifecycle status of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    #[default]
    Active,
    Done,
    Stopped,
}

/// Full observable state of one instance, replaced wholesale on every step
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Active state node ids, ancestors included, in document order
    pub configuration: Vec<String>,
    /// Extended state
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub status: SnapshotStatus,
    /// Event that produced this snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
}

impl Snapshot {
    /// Build an unresolved snapshot from an xstate-style state value
    /// (`"a"`, `{ "a": "b" }`, `{ "p": { "x": "y", "z": {} } }` or a list of ids).
    /// Paths are relative to the machine root; resolve against a definition
    /// with [`MachineLogic::resolve_snapshot`].
    pub fn from_state_value(value: &Value, context: Value) -> MachineResult<Self> {
        let mut configuration = Vec::new();
        collect_value_paths(value, None, &mut configuration)?;
        Ok(Self {
            configuration,
            context,
            status: SnapshotStatus::Active,
            event: None,
        })
    }

    /// True if the state node with this id is active
    pub fn matches(&self, id: &str) -> bool {
        self.configuration.iter().any(|s| s == id)
    }

    pub fn is_done(&self) -> bool {
        self.status == SnapshotStatus::Done
    }

    /// Nested xstate-style state value of the active configuration
    pub fn state_value(&self, definition: &StatechartDefinition) -> Value {
        fn value_of(definition: &StatechartDefinition, snapshot: &Snapshot, idx: usize) -> Value {
            let node = definition.node(idx);
            let active: Vec<usize> = node
                .children
                .iter()
                .copied()
                .filter(|&c| snapshot.matches(&definition.node(c).id))
                .collect();

            if !node.is_parallel() && active.len() == 1 && definition.node(active[0]).is_atomic() {
                return Value::String(definition.node(active[0]).key.clone());
            }

            let mut map = Map::new();
            for child in active {
                map.insert(definition.node(child).key.clone(), value_of(definition, snapshot, child));
            }
            Value::Object(map)
        }

        value_of(definition, self, 0)
    }
}

fn collect_value_paths(value: &Value, prefix: Option<&str>, out: &mut Vec<String>) -> MachineResult<()> {
    let join = |key: &str| match prefix {
        Some(p) => format!("{}.{}", p, key),
        None => key.to_string(),
    };

    match value {
        Value::String(key) => out.push(join(key)),
        Value::Object(map) => {
            for (key, child) in map {
                let path = join(key);
                out.push(path.clone());
                collect_value_paths(child, Some(&path), out)?;
            }
        }
        Value::Array(items) if prefix.is_none() => {
            for item in items {
                match item {
                    Value::String(id) => out.push(id.clone()),
                    other => {
                        return Err(MachineError::InvalidStateValue(other.to_string()));
                    }
                }
            }
        }
        Value::Null if prefix.is_some() => {}
        other => return Err(MachineError::InvalidStateValue(other.to_string())),
    }
    Ok(())
}

// ============================================================================
// EXECUTION TRAITS
// ============================================================================

/// Pure transition function over snapshots
pub trait MachineLogic {
    fn definition(&self) -> &StatechartDefinition;

    /// Snapshot after entering the initial configuration
    fn initial_snapshot(&self) -> MachineResult<Snapshot>;

    /// Apply one external event, running to a stable configuration
    fn transition(&self, snapshot: &Snapshot, event: &Event) -> MachineResult<Snapshot>;

    /// Normalize an externally supplied snapshot against this definition
    fn resolve_snapshot(&self, snapshot: &Snapshot) -> MachineResult<Snapshot>;

    /// Event descriptors enabled by the active configuration, document order
    fn next_events(&self, snapshot: &Snapshot) -> Vec<String>;

    /// Whether an active state declares a transition for `event`, guards aside.
    /// Unlike [`MachineLogic::next_events`] this honours wildcard descriptors.
    fn accepts(&self, snapshot: &Snapshot, event: &Event) -> bool {
        if snapshot.status != SnapshotStatus::Active {
            return false;
        }
        let definition = self.definition();
        snapshot
            .configuration
            .iter()
            .filter_map(|id| definition.get(id))
            .any(|node| node.transitions.keys().any(|d| descriptor_matches(d, Some(event))))
    }
}

/// Match a transition descriptor against an event: exact, `*`, or a
/// `prefix.*` covering `prefix.anything`. `None` is the eventless step.
pub fn descriptor_matches(descriptor: &str, event: Option<&Event>) -> bool {
    match event {
        None => descriptor == EVENTLESS,
        Some(event) => {
            if descriptor == EVENTLESS {
                return false;
            }
            if descriptor == WILDCARD || descriptor == event.kind {
                return true;
            }
            match descriptor.strip_suffix(".*") {
                Some(prefix) => event
                    .kind
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.')),
                None => false,
            }
        }
    }
}

/// Snapshot notification delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotUpdate {
    pub session_id: String,
    pub snapshot: Snapshot,
}

/// A running machine instance
pub trait MachineInstance {
    fn session_id(&self) -> &str;

    fn definition(&self) -> &Arc<StatechartDefinition>;

    /// Enter the initial configuration and notify subscribers
    fn start(&mut self) -> MachineResult<Snapshot>;

    /// Process an event; subscribers see the resulting snapshot
    fn send(&mut self, event: Event) -> MachineResult<Snapshot>;

    fn snapshot(&self) -> &Snapshot;

    fn subscribe(&mut self, subscriber: Sender<SnapshotUpdate>);

    /// Stop; no further notifications are delivered
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Enabled event descriptors for the current snapshot
    fn next_events(&self) -> Vec<String>;
}

/// Creates instances for definitions
pub trait InstanceFactory {
    fn create_instance(
        &mut self,
        definition: Arc<StatechartDefinition>,
    ) -> MachineResult<Box<dyn MachineInstance>>;
}

// ============================================================================
// LOCAL ACTOR RUNTIME
// ============================================================================

/// An instance driven in-process by a [`MachineLogic`]
pub struct Actor<L: MachineLogic> {
    session_id: String,
    logic: L,
    definition: Arc<StatechartDefinition>,
    snapshot: Snapshot,
    running: bool,
    subscribers: Vec<Sender<SnapshotUpdate>>,
}

impl<L: MachineLogic> Actor<L> {
    pub fn new(session_id: impl Into<String>, logic: L, definition: Arc<StatechartDefinition>) -> Self {
        Self {
            session_id: session_id.into(),
            logic,
            definition,
            snapshot: Snapshot::default(),
            running: false,
            subscribers: Vec::new(),
        }
    }

    pub fn logic(&self) -> &L {
        &self.logic
    }

    fn notify(&mut self) {
        let update = SnapshotUpdate {
            session_id: self.session_id.clone(),
            snapshot: self.snapshot.clone(),
        };
        // Dropped receivers unsubscribe themselves
        self.subscribers.retain(|s| s.send(update.clone()).is_ok());
    }
}

impl<L: MachineLogic> MachineInstance for Actor<L> {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn definition(&self) -> &Arc<StatechartDefinition> {
        &self.definition
    }

    fn start(&mut self) -> MachineResult<Snapshot> {
        self.snapshot = self.logic.initial_snapshot()?;
        self.running = true;
        log::info!("started instance '{}' of '{}'", self.session_id, self.definition.id);
        self.notify();
        Ok(self.snapshot.clone())
    }

    fn send(&mut self, event: Event) -> MachineResult<Snapshot> {
        if !self.running {
            return Err(MachineError::NotRunning(self.session_id.clone()));
        }
        self.snapshot = self.logic.transition(&self.snapshot, &event)?;
        log::debug!(
            "'{}' handled {} -> {:?}",
            self.session_id,
            event.kind,
            self.snapshot.configuration
        );
        self.notify();
        Ok(self.snapshot.clone())
    }

    fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    fn subscribe(&mut self, subscriber: Sender<SnapshotUpdate>) {
        self.subscribers.push(subscriber);
    }

    fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.snapshot.status = SnapshotStatus::Stopped;
            self.subscribers.clear();
            log::info!("stopped instance '{}'", self.session_id);
        }
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn next_events(&self) -> Vec<String> {
        self.logic.next_events(&self.snapshot)
    }
}

static NEXT_SESSION: AtomicU64 = AtomicU64::new(0);

/// Allocate a process-unique session id (`x:0`, `x:1`, ...)
pub fn next_session_id() -> String {
    format!("x:{}", NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
}

/// Factory creating interpreter-backed actors
#[derive(Clone, Default)]
pub struct LocalFactory {
    /// Interpreter used as a template (guards, strictness)
    template: Option<Interpreter>,
    /// Reject guards missing from the registry
    strict: bool,
}

impl LocalFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `interpreter`'s guards and strictness for every created instance
    pub fn with_template(mut self, interpreter: Interpreter) -> Self {
        self.template = Some(interpreter);
        self
    }

    /// Created instances fail on unknown guards instead of passing them
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

impl InstanceFactory for LocalFactory {
    fn create_instance(
        &mut self,
        definition: Arc<StatechartDefinition>,
    ) -> MachineResult<Box<dyn MachineInstance>> {
        let logic = match &self.template {
            Some(template) => template.for_definition(definition.clone()),
            None => Interpreter::new(definition.clone()),
        };
        let logic = if self.strict { logic.strict() } else { logic };
        logic.check_targets()?;
        Ok(Box::new(Actor::new(next_session_id(), logic, definition)))
    }
}
