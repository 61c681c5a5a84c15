//! Simulation Orchestrator
//! Tracks every known service (session) with its definition, live snapshot
//! and parent link, decides which one is focused, records event history and
//! forwards events either to local instances or to an inspected remote.
//!
//! Commands are queued and processed to completion: proxy callbacks (local
//! snapshot notifications, inbound inspection records) are turned into
//! further commands and drained before [`SimulationOrchestrator::send`] returns.

pub mod inspect;

#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::machine::{Event, InstanceFactory, Interpreter, MachineInstance, MachineLogic, Snapshot, SnapshotUpdate};
use crate::statechart::StatechartDefinition;

use inspect::{definition_from_machine, snapshot_from_state, InspectError, InspectMessage, InspectReceiver, OutboundMessage};

pub use inspect::{ChannelReceiver, QueueReceiver};

pub const TAG_INSPECTING: &str = "inspecting";
pub const TAG_VISUALIZING: &str = "visualizing";
pub const TAG_EMPTY: &str = "empty";
pub const TAG_LAYOUT_PENDING: &str = "layoutPending";

// ============================================================================
// SESSIONS
// ============================================================================

/// Where a session came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceSource {
    Visualizer,
    Inspector,
    Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    Stopped,
}

/// One registered statechart instance
#[derive(Debug, Clone)]
pub struct ServiceSession {
    pub session_id: String,
    pub definition: Arc<StatechartDefinition>,
    /// Latest snapshot, replaced wholesale on each update
    pub snapshot: Snapshot,
    pub parent: Option<String>,
    pub source: ServiceSource,
    pub status: ServiceStatus,
}

/// A delivered event, in arrival order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub event: Event,
    pub session_id: String,
    pub timestamp: SystemTime,
}

// ============================================================================
// MODES AND COMMANDS
// ============================================================================

/// Layout readiness while visualizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizingState {
    /// Nothing registered yet
    Idle,
    /// Registered, layout not finished
    Pending,
    Ready,
}

/// Top-level mode, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationMode {
    Inspecting,
    Visualizing(VisualizingState),
}

#[derive(Debug, Clone)]
pub enum SimulationCommand {
    RegisterService {
        session_id: String,
        definition: Arc<StatechartDefinition>,
        snapshot: Snapshot,
        parent: Option<String>,
        source: ServiceSource,
        status: ServiceStatus,
    },
    ServiceState {
        session_id: String,
        snapshot: Snapshot,
    },
    ServiceStop {
        session_id: String,
    },
    ServiceFocus {
        session_id: String,
    },
    ServicesUnregisterAll,
    /// Visualizing only: reset and start local instances for these machines
    MachinesRegister {
        machines: Vec<Arc<StatechartDefinition>>,
    },
    /// Visualizing only: restart the registered machines
    MachinesReset,
    EventPreview(String),
    PreviewClear,
    /// Forward to the focused session
    ServiceSend(Event),
    LayoutPending,
    LayoutReady,
    Error(String),
}

/// Receives user-facing notifications
pub trait NotificationSink {
    fn error(&mut self, message: &str);
}

/// Default sink: errors go to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn error(&mut self, message: &str) {
        log::error!("{}", message);
    }
}

// ============================================================================
// PROXIES
// ============================================================================

struct LocalProxy {
    factory: Box<dyn InstanceFactory>,
    instances: IndexMap<String, Box<dyn MachineInstance>>,
    /// Machines from the last `MachinesRegister`
    machines: Vec<Arc<StatechartDefinition>>,
    updates: Receiver<SnapshotUpdate>,
    updates_tx: Sender<SnapshotUpdate>,
}

struct InspectProxy {
    receiver: Box<dyn InspectReceiver>,
    closed: bool,
}

enum Proxy {
    Local(LocalProxy),
    Inspect(InspectProxy),
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct SimulationOrchestrator {
    mode: SimulationMode,
    services: IndexMap<String, ServiceSession>,
    focus: Option<String>,
    preview: Option<String>,
    history: Vec<HistoryEntry>,
    proxy: Proxy,
    sink: Box<dyn NotificationSink>,
    queue: VecDeque<SimulationCommand>,
}

impl SimulationOrchestrator {
    /// Local mode: machines are interpreted by instances from `factory`
    pub fn visualizing(factory: Box<dyn InstanceFactory>) -> Self {
        let (updates_tx, updates) = mpsc::channel();
        Self::with_proxy(
            SimulationMode::Visualizing(VisualizingState::Idle),
            Proxy::Local(LocalProxy {
                factory,
                instances: IndexMap::new(),
                machines: Vec::new(),
                updates,
                updates_tx,
            }),
        )
    }

    /// Relay mode: sessions are driven by records from `receiver`
    pub fn inspecting(receiver: Box<dyn InspectReceiver>) -> Self {
        Self::with_proxy(
            SimulationMode::Inspecting,
            Proxy::Inspect(InspectProxy {
                receiver,
                closed: false,
            }),
        )
    }

    fn with_proxy(mode: SimulationMode, proxy: Proxy) -> Self {
        log::info!("simulation starting in {:?} mode", mode);
        Self {
            mode,
            services: IndexMap::new(),
            focus: None,
            preview: None,
            history: Vec::new(),
            proxy,
            sink: Box::new(LogSink),
            queue: VecDeque::new(),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn mode(&self) -> SimulationMode {
        self.mode
    }

    pub fn tags(&self) -> Vec<&'static str> {
        match self.mode {
            SimulationMode::Inspecting => vec![TAG_INSPECTING],
            SimulationMode::Visualizing(VisualizingState::Idle) => vec![TAG_VISUALIZING, TAG_EMPTY],
            SimulationMode::Visualizing(VisualizingState::Pending) => vec![TAG_VISUALIZING, TAG_LAYOUT_PENDING],
            SimulationMode::Visualizing(VisualizingState::Ready) => vec![TAG_VISUALIZING],
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().iter().any(|t| *t == tag)
    }

    pub fn services(&self) -> &IndexMap<String, ServiceSession> {
        &self.services
    }

    pub fn service(&self, session_id: &str) -> Option<&ServiceSession> {
        self.services.get(session_id)
    }

    /// Sessions whose parent is `session_id`
    pub fn children_of<'a>(&'a self, session_id: &'a str) -> impl Iterator<Item = &'a ServiceSession> + 'a {
        self.services
            .values()
            .filter(move |s| s.parent.as_deref() == Some(session_id))
    }

    pub fn focused_id(&self) -> Option<&str> {
        self.focus.as_deref()
    }

    pub fn current_session(&self) -> Option<&ServiceSession> {
        self.focus.as_deref().and_then(|id| self.services.get(id))
    }

    pub fn preview(&self) -> Option<&str> {
        self.preview.as_deref()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Events the focused session accepts right now
    pub fn next_events(&self) -> Vec<String> {
        match self.current_session() {
            Some(session) => Interpreter::new(session.definition.clone()).next_events(&session.snapshot),
            None => Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Process `command` and everything it causes
    pub fn send(&mut self, command: SimulationCommand) {
        self.queue.push_back(command);
        self.run();
    }

    /// Pick up asynchronously delivered proxy records
    pub fn poll(&mut self) {
        self.run();
    }

    fn run(&mut self) {
        self.drain_proxy();
        while let Some(command) = self.queue.pop_front() {
            self.apply(command);
            self.drain_proxy();
        }
    }

    fn drain_proxy(&mut self) {
        match &mut self.proxy {
            Proxy::Local(local) => {
                while let Ok(update) = local.updates.try_recv() {
                    self.queue.push_back(SimulationCommand::ServiceState {
                        session_id: update.session_id,
                        snapshot: update.snapshot,
                    });
                }
            }
            Proxy::Inspect(remote) => {
                while !remote.closed {
                    match remote.receiver.try_recv() {
                        Ok(Some(message)) => self.queue.push_back(translate(message)),
                        Ok(None) => break,
                        Err(InspectError::Disconnected) => {
                            log::info!("inspection channel closed");
                            remote.closed = true;
                        }
                        Err(err) => {
                            self.queue.push_back(SimulationCommand::Error(err.to_string()));
                            break;
                        }
                    }
                }
            }
        }
    }

    fn apply(&mut self, command: SimulationCommand) {
        match command {
            SimulationCommand::RegisterService {
                session_id,
                definition,
                snapshot,
                parent,
                source,
                status,
            } => self.register(session_id, definition, snapshot, parent, source, status),
            SimulationCommand::ServiceState { session_id, snapshot } => self.update_state(&session_id, snapshot),
            SimulationCommand::ServiceStop { session_id } => match self.services.get_mut(&session_id) {
                Some(session) => {
                    session.status = ServiceStatus::Stopped;
                    log::info!("service '{}' stopped", session_id);
                }
                None => log::debug!("stop for unknown service '{}'", session_id),
            },
            SimulationCommand::ServiceFocus { session_id } => {
                if self.services.contains_key(&session_id) {
                    log::debug!("focus -> '{}'", session_id);
                    self.focus = Some(session_id);
                } else {
                    log::warn!("ignoring focus on unknown service '{}'", session_id);
                }
            }
            SimulationCommand::ServicesUnregisterAll => self.unregister_all(),
            SimulationCommand::MachinesRegister { machines } => {
                if let Proxy::Local(local) = &mut self.proxy {
                    local.machines = machines;
                    self.restart_local();
                } else {
                    log::warn!("MACHINES.REGISTER ignored while inspecting");
                }
            }
            SimulationCommand::MachinesReset => {
                if matches!(self.proxy, Proxy::Local(_)) {
                    self.restart_local();
                } else {
                    log::warn!("MACHINES.RESET ignored while inspecting");
                }
            }
            SimulationCommand::EventPreview(event_type) => self.preview = Some(event_type),
            SimulationCommand::PreviewClear => self.preview = None,
            SimulationCommand::ServiceSend(event) => self.forward(event),
            SimulationCommand::LayoutPending => {
                if let SimulationMode::Visualizing(_) = self.mode {
                    self.mode = SimulationMode::Visualizing(VisualizingState::Pending);
                }
            }
            SimulationCommand::LayoutReady => {
                if self.mode == SimulationMode::Visualizing(VisualizingState::Pending) {
                    self.mode = SimulationMode::Visualizing(VisualizingState::Ready);
                }
            }
            SimulationCommand::Error(message) => self.sink.error(&message),
        }
    }

    fn register(
        &mut self,
        session_id: String,
        definition: Arc<StatechartDefinition>,
        snapshot: Snapshot,
        parent: Option<String>,
        source: ServiceSource,
        status: ServiceStatus,
    ) {
        let snapshot = match Interpreter::new(definition.clone()).resolve_snapshot(&snapshot) {
            Ok(resolved) => resolved,
            Err(err) => {
                self.sink
                    .error(&format!("cannot register service '{}': {}", session_id, err));
                return;
            }
        };

        log::info!("registered service '{}' ({})", session_id, definition.id);
        if self.focus.is_none() {
            self.focus = Some(session_id.clone());
        }
        if self.mode == SimulationMode::Visualizing(VisualizingState::Idle) {
            self.mode = SimulationMode::Visualizing(VisualizingState::Pending);
        }
        self.services.insert(
            session_id.clone(),
            ServiceSession {
                session_id,
                definition,
                snapshot,
                parent,
                source,
                status,
            },
        );
    }

    fn update_state(&mut self, session_id: &str, snapshot: Snapshot) {
        let Some(session) = self.services.get_mut(session_id) else {
            log::debug!("state for unknown service '{}'", session_id);
            return;
        };

        match Interpreter::new(session.definition.clone()).resolve_snapshot(&snapshot) {
            Ok(resolved) => {
                if let Some(event) = &resolved.event {
                    self.history.push(HistoryEntry {
                        event: event.clone(),
                        session_id: session_id.to_string(),
                        timestamp: SystemTime::now(),
                    });
                }
                session.snapshot = resolved;
            }
            Err(err) => {
                let message = format!("invalid state for service '{}': {}", session_id, err);
                self.queue.push_back(SimulationCommand::Error(message));
            }
        }
    }

    fn unregister_all(&mut self) {
        if let Proxy::Local(local) = &mut self.proxy {
            for instance in local.instances.values_mut() {
                instance.stop();
            }
            local.instances.clear();
        }
        self.services.clear();
        self.focus = None;
        if let SimulationMode::Visualizing(_) = self.mode {
            self.mode = SimulationMode::Visualizing(VisualizingState::Idle);
        }
        log::info!("unregistered all services");
    }

    /// Reset history and focus, stop local instances and start fresh ones
    fn restart_local(&mut self) {
        self.history.clear();
        self.unregister_all();

        let Proxy::Local(local) = &mut self.proxy else {
            return;
        };
        for definition in local.machines.clone() {
            let started = local
                .factory
                .create_instance(definition.clone())
                .and_then(|mut instance| instance.start().map(|snapshot| (instance, snapshot)));

            match started {
                Ok((mut instance, snapshot)) => {
                    instance.subscribe(local.updates_tx.clone());
                    let session_id = instance.session_id().to_string();
                    self.queue.push_back(SimulationCommand::RegisterService {
                        session_id: session_id.clone(),
                        definition,
                        snapshot,
                        parent: None,
                        source: ServiceSource::Visualizer,
                        status: ServiceStatus::Running,
                    });
                    local.instances.insert(session_id, instance);
                }
                Err(err) => {
                    // One broken machine does not stop the others
                    let message = format!("failed to start machine '{}': {}", definition.id, err);
                    self.queue.push_back(SimulationCommand::Error(message));
                }
            }
        }
    }

    fn forward(&mut self, event: Event) {
        let Some(session_id) = self.focus.clone() else {
            log::warn!("no focused service for {}", event.kind);
            return;
        };

        match &mut self.proxy {
            Proxy::Local(local) => match local.instances.get_mut(&session_id) {
                Some(instance) => {
                    if let Err(err) = instance.send(event) {
                        let message = format!("service '{}' failed: {}", session_id, err);
                        self.queue.push_back(SimulationCommand::Error(message));
                    }
                }
                None => log::warn!("service '{}' has no local instance", session_id),
            },
            Proxy::Inspect(remote) => {
                let sent = OutboundMessage::event(&session_id, &event)
                    .and_then(|message| remote.receiver.send(message));
                if let Err(err) = sent {
                    self.queue.push_back(SimulationCommand::Error(err.to_string()));
                }
            }
        }
    }
}

/// One inbound record to one command
fn translate(message: InspectMessage) -> SimulationCommand {
    match message {
        InspectMessage::Register {
            session_id,
            machine,
            state,
            parent,
            source,
        } => {
            let decoded = definition_from_machine(&machine)
                .and_then(|definition| snapshot_from_state(&state).map(|snapshot| (definition, snapshot)));
            match decoded {
                Ok((definition, snapshot)) => SimulationCommand::RegisterService {
                    session_id,
                    definition: Arc::new(definition),
                    snapshot,
                    source: source.unwrap_or(if parent.is_some() {
                        ServiceSource::Child
                    } else {
                        ServiceSource::Inspector
                    }),
                    parent,
                    status: ServiceStatus::Running,
                },
                Err(err) => SimulationCommand::Error(format!("cannot register '{}': {}", session_id, err)),
            }
        }
        InspectMessage::State { session_id, state } => match snapshot_from_state(&state) {
            Ok(snapshot) => SimulationCommand::ServiceState { session_id, snapshot },
            Err(err) => SimulationCommand::Error(format!("bad state for '{}': {}", session_id, err)),
        },
        InspectMessage::Stop { session_id } => SimulationCommand::ServiceStop { session_id },
    }
}
