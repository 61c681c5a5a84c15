//! Inspection wire protocol
//! Inbound `service.register` / `service.state` / `service.stop` records and
//! outbound `xstate.event` records, plus receivers that carry them.

use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::machine::{Event, MachineError, Snapshot, SnapshotStatus};
use crate::statechart::{DefinitionError, StatechartDefinition};

use super::ServiceSource;

#[derive(Error, Debug)]
pub enum InspectError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid machine: {0}")]
    Definition(#[from] DefinitionError),
    #[error("Invalid state: {0}")]
    Machine(#[from] MachineError),
    #[error("Inspection channel closed")]
    Disconnected,
}

pub type InspectResult<T> = Result<T, InspectError>;

/// Inbound records. `machine` and `state` may be JSON strings or inline objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InspectMessage {
    #[serde(rename = "service.register", rename_all = "camelCase")]
    Register {
        session_id: String,
        machine: Value,
        state: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<ServiceSource>,
    },
    #[serde(rename = "service.state", rename_all = "camelCase")]
    State { session_id: String, state: Value },
    #[serde(rename = "service.stop", rename_all = "camelCase")]
    Stop { session_id: String },
}

/// Outbound records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// `event` is the JSON-serialized event
    #[serde(rename = "xstate.event", rename_all = "camelCase")]
    Event { event: String, session_id: String },
}

impl OutboundMessage {
    pub fn event(session_id: impl Into<String>, event: &Event) -> InspectResult<Self> {
        Ok(Self::Event {
            event: serde_json::to_string(event)?,
            session_id: session_id.into(),
        })
    }
}

/// Unwrap fields that arrive as JSON strings
fn json_field(value: &Value) -> InspectResult<Value> {
    match value {
        Value::String(text) => Ok(serde_json::from_str(text)?),
        other => Ok(other.clone()),
    }
}

pub fn definition_from_machine(machine: &Value) -> InspectResult<StatechartDefinition> {
    Ok(StatechartDefinition::from_value(json_field(machine)?)?)
}

/// Decode a snapshot, either our own shape (`configuration`) or an
/// xstate-style state (`value`, `context`, `event`, `done`/`status`)
pub fn snapshot_from_state(state: &Value) -> InspectResult<Snapshot> {
    let state = json_field(state)?;
    if state.get("configuration").is_some() {
        return Ok(serde_json::from_value(state)?);
    }

    // Missing value resolves to the initial configuration
    let value = state
        .get("value")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    let context = state.get("context").cloned().unwrap_or(Value::Null);
    let mut snapshot = Snapshot::from_state_value(&value, context)?;

    let event = state
        .get("event")
        .or_else(|| state.get("_event").and_then(|e| e.get("data")))
        .filter(|e| e.get("type").is_some());
    if let Some(event) = event {
        snapshot.event = Some(serde_json::from_value::<Event>(event.clone())?);
    }

    let done = state.get("done").and_then(Value::as_bool).unwrap_or(false);
    snapshot.status = match state.get("status").and_then(Value::as_str) {
        Some("done") => SnapshotStatus::Done,
        Some("stopped") => SnapshotStatus::Stopped,
        _ if done => SnapshotStatus::Done,
        _ => SnapshotStatus::Active,
    };
    Ok(snapshot)
}

/// One JSON record per line; blank lines are skipped
pub fn decode_line(line: &str) -> InspectResult<Option<InspectMessage>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

/// Forward JSON-lines records until the reader ends or the receiver is dropped.
/// Malformed lines are logged and skipped.
pub fn read_json_lines<R: BufRead>(reader: R, sink: Sender<InspectMessage>) -> std::io::Result<usize> {
    let mut forwarded = 0;
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        match decode_line(&line) {
            Ok(Some(message)) => {
                if sink.send(message).is_err() {
                    break;
                }
                forwarded += 1;
            }
            Ok(None) => {}
            Err(err) => log::warn!("skipping inspection line {}: {}", number + 1, err),
        }
    }
    Ok(forwarded)
}

// ============================================================================
// RECEIVERS
// ============================================================================

/// Transport carrying inspection records
pub trait InspectReceiver {
    /// Next inbound record, if one is waiting
    fn try_recv(&mut self) -> InspectResult<Option<InspectMessage>>;

    fn send(&mut self, message: OutboundMessage) -> InspectResult<()>;
}

/// In-process receiver, mostly for tests and embedding hosts
#[derive(Debug, Default)]
pub struct QueueReceiver {
    pub inbound: VecDeque<InspectMessage>,
    pub outbound: Vec<OutboundMessage>,
}

impl QueueReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: InspectMessage) {
        self.inbound.push_back(message);
    }
}

impl InspectReceiver for QueueReceiver {
    fn try_recv(&mut self) -> InspectResult<Option<InspectMessage>> {
        Ok(self.inbound.pop_front())
    }

    fn send(&mut self, message: OutboundMessage) -> InspectResult<()> {
        self.outbound.push(message);
        Ok(())
    }
}

/// Receiver fed from another thread (e.g. a stdin reader)
pub struct ChannelReceiver {
    inbound: Receiver<InspectMessage>,
    outbound: Sender<OutboundMessage>,
}

impl ChannelReceiver {
    /// Returns the receiver, the sender feeding it and the outbound stream
    pub fn new() -> (Self, Sender<InspectMessage>, Receiver<OutboundMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::channel();
        let (outbound_tx, outbound_rx) = mpsc::channel();
        let receiver = Self {
            inbound: inbound_rx,
            outbound: outbound_tx,
        };
        (receiver, inbound_tx, outbound_rx)
    }
}

impl InspectReceiver for ChannelReceiver {
    fn try_recv(&mut self) -> InspectResult<Option<InspectMessage>> {
        match self.inbound.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(InspectError::Disconnected),
        }
    }

    fn send(&mut self, message: OutboundMessage) -> InspectResult<()> {
        self.outbound.send(message).map_err(|_| InspectError::Disconnected)
    }
}
