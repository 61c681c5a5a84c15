//! Unit tests for the orchestrator and the inspection protocol

use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::Arc;

use serde_json::json;

use crate::machine::{Event, LocalFactory, Snapshot, SnapshotStatus};
use crate::simulation::inspect::{decode_line, read_json_lines, snapshot_from_state, InspectMessage, OutboundMessage};
use crate::simulation::{
    ChannelReceiver, NotificationSink, QueueReceiver, ServiceSource, ServiceStatus, SimulationCommand,
    SimulationMode, SimulationOrchestrator, VisualizingState, TAG_EMPTY, TAG_LAYOUT_PENDING, TAG_VISUALIZING,
};
use crate::statechart::StatechartDefinition;

#[derive(Clone, Default)]
struct CollectingSink(Rc<RefCell<Vec<String>>>);

impl NotificationSink for CollectingSink {
    fn error(&mut self, message: &str) {
        self.0.borrow_mut().push(message.to_string());
    }
}

fn light_json() -> serde_json::Value {
    json!({
        "id": "light",
        "initial": "green",
        "states": {
            "green": { "on": { "TIMER": "yellow" } },
            "yellow": { "on": { "TIMER": "red" } },
            "red": {
                "initial": "walk",
                "on": { "TIMER": "green" },
                "states": { "walk": {}, "stop": { "type": "final" } }
            }
        }
    })
}

fn light() -> Arc<StatechartDefinition> {
    Arc::new(StatechartDefinition::from_value(light_json()).unwrap())
}

fn toggle() -> Arc<StatechartDefinition> {
    Arc::new(
        StatechartDefinition::from_value(json!({
            "id": "toggle",
            "initial": "off",
            "states": { "off": { "on": { "FLIP": "on" } }, "on": { "on": { "FLIP": "off" } } }
        }))
        .unwrap(),
    )
}

fn visualizer() -> (SimulationOrchestrator, CollectingSink) {
    let sink = CollectingSink::default();
    let orchestrator =
        SimulationOrchestrator::visualizing(Box::new(LocalFactory::new())).with_sink(Box::new(sink.clone()));
    (orchestrator, sink)
}

fn register(id: &str, definition: Arc<StatechartDefinition>) -> SimulationCommand {
    SimulationCommand::RegisterService {
        session_id: id.to_string(),
        definition,
        snapshot: Snapshot::default(),
        parent: None,
        source: ServiceSource::Inspector,
        status: ServiceStatus::Running,
    }
}

// ============================================================================
// VISUALIZING
// ============================================================================

#[test]
fn test_starts_idle_with_empty_tag() {
    let (orchestrator, _) = visualizer();
    assert_eq!(orchestrator.mode(), SimulationMode::Visualizing(VisualizingState::Idle));
    assert!(orchestrator.has_tag(TAG_VISUALIZING));
    assert!(orchestrator.has_tag(TAG_EMPTY));
    assert!(orchestrator.current_session().is_none());
}

#[test]
fn test_register_machines_starts_and_focuses() {
    let (mut orchestrator, _) = visualizer();
    orchestrator.send(SimulationCommand::MachinesRegister {
        machines: vec![light(), toggle()],
    });

    assert_eq!(orchestrator.services().len(), 2);
    let first = orchestrator.services().keys().next().cloned().unwrap();
    assert_eq!(orchestrator.focused_id(), Some(first.as_str()));

    let current = orchestrator.current_session().unwrap();
    assert_eq!(current.definition.id, "light");
    assert_eq!(current.source, ServiceSource::Visualizer);
    assert_eq!(current.snapshot.configuration, vec!["light", "light.green"]);
    assert!(orchestrator.history().is_empty());

    assert!(orchestrator.has_tag(TAG_LAYOUT_PENDING));
    orchestrator.send(SimulationCommand::LayoutReady);
    assert_eq!(orchestrator.mode(), SimulationMode::Visualizing(VisualizingState::Ready));
    orchestrator.send(SimulationCommand::LayoutPending);
    assert_eq!(orchestrator.mode(), SimulationMode::Visualizing(VisualizingState::Pending));
}

#[test]
fn test_send_updates_snapshot_and_history() {
    let (mut orchestrator, _) = visualizer();
    orchestrator.send(SimulationCommand::MachinesRegister { machines: vec![light()] });
    assert_eq!(orchestrator.next_events(), vec!["TIMER"]);

    orchestrator.send(SimulationCommand::ServiceSend(Event::new("TIMER")));
    orchestrator.send(SimulationCommand::ServiceSend(Event::new("TIMER")));

    let current = orchestrator.current_session().unwrap();
    assert_eq!(current.snapshot.configuration, vec!["light", "light.red", "light.red.walk"]);
    let events: Vec<&str> = orchestrator.history().iter().map(|h| h.event.kind.as_str()).collect();
    assert_eq!(events, vec!["TIMER", "TIMER"]);
    assert_eq!(orchestrator.history()[0].session_id, current.session_id);
}

#[test]
fn test_reset_restarts_instances() {
    let (mut orchestrator, _) = visualizer();
    orchestrator.send(SimulationCommand::MachinesRegister { machines: vec![light()] });
    let before = orchestrator.focused_id().unwrap().to_string();
    orchestrator.send(SimulationCommand::ServiceSend(Event::new("TIMER")));

    orchestrator.send(SimulationCommand::MachinesReset);
    let current = orchestrator.current_session().unwrap();
    assert_ne!(current.session_id, before);
    assert_eq!(current.snapshot.configuration, vec!["light", "light.green"]);
    assert!(orchestrator.history().is_empty());
    assert_eq!(orchestrator.services().len(), 1);
}

#[test]
fn test_failing_machine_does_not_block_others() {
    let (mut orchestrator, sink) = visualizer();
    let broken = Arc::new(
        StatechartDefinition::from_value(json!({
            "id": "broken",
            "initial": "a",
            "states": { "a": { "on": { "GO": "nowhere" } } }
        }))
        .unwrap(),
    );
    orchestrator.send(SimulationCommand::MachinesRegister {
        machines: vec![broken, toggle()],
    });

    assert_eq!(orchestrator.services().len(), 1);
    assert_eq!(orchestrator.current_session().unwrap().definition.id, "toggle");
    let errors = sink.0.borrow();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("broken"));
}

// ============================================================================
// REGISTRY
// ============================================================================

#[test]
fn test_second_registration_keeps_focus() {
    let (mut orchestrator, _) = visualizer();
    orchestrator.send(register("a", light()));
    orchestrator.send(register("b", toggle()));
    assert_eq!(orchestrator.focused_id(), Some("a"));

    // Overwrite keeps a single entry
    orchestrator.send(register("b", light()));
    assert_eq!(orchestrator.services().len(), 2);
    assert_eq!(orchestrator.service("b").unwrap().definition.id, "light");
}

#[test]
fn test_state_for_unknown_service_is_ignored() {
    let (mut orchestrator, sink) = visualizer();
    orchestrator.send(register("a", light()));
    orchestrator.send(SimulationCommand::ServiceState {
        session_id: "ghost".to_string(),
        snapshot: Snapshot::default(),
    });
    assert_eq!(orchestrator.services().len(), 1);
    assert!(orchestrator.service("ghost").is_none());
    assert!(sink.0.borrow().is_empty());
}

#[test]
fn test_stop_keeps_session() {
    let (mut orchestrator, _) = visualizer();
    orchestrator.send(register("a", light()));
    orchestrator.send(SimulationCommand::ServiceStop {
        session_id: "a".to_string(),
    });
    assert_eq!(orchestrator.service("a").unwrap().status, ServiceStatus::Stopped);
}

#[test]
fn test_focus_unknown_is_rejected() {
    let (mut orchestrator, _) = visualizer();
    orchestrator.send(register("a", light()));
    orchestrator.send(register("b", toggle()));
    orchestrator.send(SimulationCommand::ServiceFocus {
        session_id: "b".to_string(),
    });
    assert_eq!(orchestrator.focused_id(), Some("b"));
    orchestrator.send(SimulationCommand::ServiceFocus {
        session_id: "zzz".to_string(),
    });
    assert_eq!(orchestrator.focused_id(), Some("b"));
}

#[test]
fn test_unregister_all_and_preview() {
    let (mut orchestrator, _) = visualizer();
    orchestrator.send(register("a", light()));
    orchestrator.send(SimulationCommand::EventPreview("TIMER".to_string()));
    assert_eq!(orchestrator.preview(), Some("TIMER"));
    orchestrator.send(SimulationCommand::PreviewClear);
    assert_eq!(orchestrator.preview(), None);

    orchestrator.send(SimulationCommand::ServicesUnregisterAll);
    assert!(orchestrator.services().is_empty());
    assert_eq!(orchestrator.focused_id(), None);
    assert!(orchestrator.has_tag(TAG_EMPTY));
}

// ============================================================================
// INSPECTING
// ============================================================================

#[test]
fn test_inspecting_relays_records() {
    let (receiver, inbound, outbound) = ChannelReceiver::new();
    let mut orchestrator = SimulationOrchestrator::inspecting(Box::new(receiver));
    assert_eq!(orchestrator.tags(), vec!["inspecting"]);

    inbound
        .send(InspectMessage::Register {
            session_id: "remote:1".to_string(),
            machine: json!(light_json().to_string()),
            state: json!({ "value": "green", "context": {}, "event": { "type": "xstate.init" } }),
            parent: None,
            source: None,
        })
        .unwrap();
    inbound
        .send(InspectMessage::State {
            session_id: "remote:1".to_string(),
            state: json!(r#"{ "value": { "red": "walk" }, "context": {}, "event": { "type": "TIMER" } }"#),
        })
        .unwrap();
    orchestrator.poll();

    let session = orchestrator.current_session().unwrap();
    assert_eq!(session.source, ServiceSource::Inspector);
    assert_eq!(session.snapshot.configuration, vec!["light", "light.red", "light.red.walk"]);
    assert_eq!(orchestrator.history().len(), 1);

    orchestrator.send(SimulationCommand::ServiceSend(Event::new("TIMER").with("by", json!("user"))));
    let OutboundMessage::Event { event, session_id } = outbound.try_recv().unwrap();
    assert_eq!(session_id, "remote:1");
    assert_eq!(serde_json::from_str::<serde_json::Value>(&event).unwrap(), json!({ "type": "TIMER", "by": "user" }));

    inbound
        .send(InspectMessage::Stop {
            session_id: "remote:1".to_string(),
        })
        .unwrap();
    drop(inbound);
    orchestrator.poll();
    assert_eq!(orchestrator.current_session().unwrap().status, ServiceStatus::Stopped);
    // A closed channel is tolerated
    orchestrator.poll();
}

#[test]
fn test_inspecting_ignores_machine_commands() {
    let mut orchestrator = SimulationOrchestrator::inspecting(Box::new(QueueReceiver::new()));
    orchestrator.send(SimulationCommand::MachinesRegister { machines: vec![light()] });
    assert!(orchestrator.services().is_empty());
    orchestrator.send(SimulationCommand::LayoutPending);
    assert_eq!(orchestrator.mode(), SimulationMode::Inspecting);
}

#[test]
fn test_bad_register_record_reports_error() {
    let sink = CollectingSink::default();
    let mut queue = QueueReceiver::new();
    queue.push(InspectMessage::Register {
        session_id: "r".to_string(),
        machine: json!("{ not json"),
        state: json!({}),
        parent: Some("p".to_string()),
        source: None,
    });
    let mut orchestrator = SimulationOrchestrator::inspecting(Box::new(queue)).with_sink(Box::new(sink.clone()));
    orchestrator.poll();
    assert!(orchestrator.services().is_empty());
    assert_eq!(sink.0.borrow().len(), 1);
}

#[test]
fn test_child_source_from_parent() {
    let mut queue = QueueReceiver::new();
    queue.push(InspectMessage::Register {
        session_id: "child".to_string(),
        machine: light_json(),
        state: json!({}),
        parent: Some("root".to_string()),
        source: None,
    });
    let mut orchestrator = SimulationOrchestrator::inspecting(Box::new(queue));
    orchestrator.poll();
    let session = orchestrator.service("child").unwrap();
    assert_eq!(session.source, ServiceSource::Child);
    assert_eq!(session.snapshot.configuration, vec!["light", "light.green"]);
    assert_eq!(orchestrator.children_of("root").count(), 1);
}

// ============================================================================
// WIRE FORMAT
// ============================================================================

#[test]
fn test_message_wire_format() {
    let message = decode_line(r#"{"type":"service.stop","sessionId":"x:3"}"#).unwrap().unwrap();
    assert_eq!(
        message,
        InspectMessage::Stop {
            session_id: "x:3".to_string()
        }
    );
    assert!(decode_line("   ").unwrap().is_none());
    assert!(decode_line(r#"{"type":"service.unknown"}"#).is_err());

    let outbound = OutboundMessage::event("x:3", &Event::new("GO")).unwrap();
    assert_eq!(
        serde_json::to_value(&outbound).unwrap(),
        json!({ "type": "xstate.event", "event": "{\"type\":\"GO\"}", "sessionId": "x:3" })
    );
}

#[test]
fn test_snapshot_from_xstate_state() {
    let snapshot = snapshot_from_state(&json!({
        "value": { "red": "walk" },
        "context": { "count": 2 },
        "_event": { "data": { "type": "TIMER", "n": 1 } },
        "done": true
    }))
    .unwrap();
    assert_eq!(snapshot.configuration, vec!["red", "red.walk"]);
    assert_eq!(snapshot.context, json!({ "count": 2 }));
    assert_eq!(snapshot.event.unwrap().payload["n"], json!(1));
    assert_eq!(snapshot.status, SnapshotStatus::Done);
}

#[test]
fn test_read_json_lines_skips_garbage() {
    let input = concat!(
        "{\"type\":\"service.stop\",\"sessionId\":\"a\"}\n",
        "\n",
        "garbage\n",
        "{\"type\":\"service.stop\",\"sessionId\":\"b\"}\n",
    );
    let (tx, rx) = mpsc::channel();
    let forwarded = read_json_lines(Cursor::new(input), tx).unwrap();
    assert_eq!(forwarded, 2);
    let received: Vec<InspectMessage> = rx.iter().collect();
    assert_eq!(received.len(), 2);
}
