//! Unit tests for snapshots, the interpreter and local actors

use std::sync::mpsc;
use std::sync::Arc;

use serde_json::json;

use crate::machine::{
    Event, InstanceFactory, Interpreter, LocalFactory, MachineError, MachineInstance, MachineLogic,
    Snapshot, SnapshotStatus,
};
use crate::statechart::StatechartDefinition;

fn definition(value: serde_json::Value) -> Arc<StatechartDefinition> {
    Arc::new(StatechartDefinition::from_value(value).expect("definition should build"))
}

fn light() -> Arc<StatechartDefinition> {
    definition(json!({
        "id": "light",
        "initial": "green",
        "states": {
            "green": { "on": { "TIMER": "yellow" } },
            "yellow": { "on": { "TIMER": "red" } },
            "red": {
                "initial": "walk",
                "on": { "TIMER": "green" },
                "states": {
                    "walk": { "on": { "COUNTDOWN": "wait" } },
                    "wait": { "on": { "COUNTDOWN": "stop" } },
                    "stop": { "type": "final" }
                }
            }
        }
    }))
}

#[test]
fn test_initial_snapshot_enters_defaults() {
    let interpreter = Interpreter::new(light());
    let snapshot = interpreter.initial_snapshot().unwrap();
    assert_eq!(snapshot.configuration, vec!["light", "light.green"]);
    assert_eq!(snapshot.status, SnapshotStatus::Active);
    assert_eq!(snapshot.event.as_ref().unwrap().kind, "xstate.init");
}

#[test]
fn test_transition_enters_nested_initial() {
    let interpreter = Interpreter::new(light());
    let s0 = interpreter.initial_snapshot().unwrap();
    let s1 = interpreter.transition(&s0, &Event::new("TIMER")).unwrap();
    let s2 = interpreter.transition(&s1, &Event::new("TIMER")).unwrap();
    assert_eq!(s2.configuration, vec!["light", "light.red", "light.red.walk"]);

    // Parent transition wins over nothing on the child
    let s3 = interpreter.transition(&s2, &Event::new("TIMER")).unwrap();
    assert_eq!(s3.configuration, vec!["light", "light.green"]);
}

#[test]
fn test_unhandled_event_keeps_configuration() {
    let interpreter = Interpreter::new(light());
    let s0 = interpreter.initial_snapshot().unwrap();
    let s1 = interpreter.transition(&s0, &Event::new("NOPE")).unwrap();
    assert_eq!(s0.configuration, s1.configuration);
    assert_eq!(s1.event.unwrap().kind, "NOPE");
}

#[test]
fn test_parallel_regions_are_all_entered() {
    let def = definition(json!({
        "id": "editor",
        "type": "parallel",
        "states": {
            "bold": {
                "initial": "off",
                "states": { "off": { "on": { "BOLD": "on" } }, "on": { "on": { "BOLD": "off" } } }
            },
            "italic": {
                "initial": "off",
                "states": { "off": { "on": { "ITALIC": "on" } }, "on": {} }
            }
        }
    }));
    let interpreter = Interpreter::new(def);
    let s0 = interpreter.initial_snapshot().unwrap();
    assert_eq!(
        s0.configuration,
        vec!["editor", "editor.bold", "editor.bold.off", "editor.italic", "editor.italic.off"]
    );

    let s1 = interpreter.transition(&s0, &Event::new("BOLD")).unwrap();
    assert!(s1.matches("editor.bold.on"));
    assert!(s1.matches("editor.italic.off"));
}

#[test]
fn test_guards_and_assign() {
    let def = definition(json!({
        "id": "counter",
        "context": { "count": 0 },
        "initial": "active",
        "states": {
            "active": {
                "on": {
                    "INC": [
                        { "guard": "belowMax", "actions": { "type": "assign", "params": { "count": 1 } } },
                        { "target": "maxed" }
                    ]
                }
            },
            "maxed": {}
        }
    }));

    let interpreter = Interpreter::new(def.clone())
        .with_guard("belowMax", |context, _| context["count"].as_i64() == Some(0));
    let s0 = interpreter.initial_snapshot().unwrap();
    let s1 = interpreter.transition(&s0, &Event::new("INC")).unwrap();
    assert_eq!(s1.context, json!({ "count": 1 }));
    assert!(s1.matches("counter.active"));

    let s2 = interpreter.transition(&s1, &Event::new("INC")).unwrap();
    assert!(s2.matches("counter.maxed"));

    let strict = Interpreter::new(def).strict();
    let s0 = strict.initial_snapshot().unwrap();
    assert!(matches!(
        strict.transition(&s0, &Event::new("INC")),
        Err(MachineError::UnknownGuard(name)) if name == "belowMax"
    ));
}

#[test]
fn test_eventless_transitions_run_to_completion() {
    let def = definition(json!({
        "id": "m",
        "initial": "a",
        "states": {
            "a": { "always": "b" },
            "b": { "always": { "target": "c" } },
            "c": {}
        }
    }));
    let snapshot = Interpreter::new(def).initial_snapshot().unwrap();
    assert_eq!(snapshot.configuration, vec!["m", "m.c"]);
}

#[test]
fn test_eventless_livelock_is_reported() {
    let def = definition(json!({
        "id": "m",
        "initial": "a",
        "states": {
            "a": { "always": "b" },
            "b": { "always": "a" }
        }
    }));
    assert!(matches!(
        Interpreter::new(def).initial_snapshot(),
        Err(MachineError::Livelock(_))
    ));
}

#[test]
fn test_done_state_event_and_top_level_final() {
    let def = definition(json!({
        "id": "m",
        "initial": "work",
        "states": {
            "work": {
                "initial": "step",
                "on": { "done.state.m.work": "finished" },
                "states": {
                    "step": { "on": { "NEXT": "complete" } },
                    "complete": { "type": "final" }
                }
            },
            "finished": { "type": "final" }
        }
    }));
    let interpreter = Interpreter::new(def);
    let s0 = interpreter.initial_snapshot().unwrap();
    let s1 = interpreter.transition(&s0, &Event::new("NEXT")).unwrap();
    assert_eq!(s1.configuration, vec!["m", "m.finished"]);
    assert!(s1.is_done());

    // Done snapshots ignore further events
    let s2 = interpreter.transition(&s1, &Event::new("NEXT")).unwrap();
    assert_eq!(s1.configuration, s2.configuration);
}

#[test]
fn test_history_enters_parent_default() {
    let def = definition(json!({
        "id": "m",
        "initial": "off",
        "states": {
            "off": { "on": { "RESUME": "on.hist" } },
            "on": {
                "initial": "low",
                "states": { "low": {}, "high": {}, "hist": { "type": "history" } }
            }
        }
    }));
    let interpreter = Interpreter::new(def);
    let s0 = interpreter.initial_snapshot().unwrap();
    let s1 = interpreter.transition(&s0, &Event::new("RESUME")).unwrap();
    assert_eq!(s1.configuration, vec!["m", "m.on", "m.on.low"]);
}

#[test]
fn test_next_events_in_document_order() {
    let interpreter = Interpreter::new(light());
    let s0 = interpreter.initial_snapshot().unwrap();
    let s1 = interpreter.transition(&s0, &Event::new("TIMER")).unwrap();
    let s2 = interpreter.transition(&s1, &Event::new("TIMER")).unwrap();
    assert_eq!(interpreter.next_events(&s2), vec!["TIMER", "COUNTDOWN"]);
}

#[test]
fn test_resolve_snapshot_from_state_value() {
    let interpreter = Interpreter::new(light());

    let nested = Snapshot::from_state_value(&json!({ "red": "wait" }), json!(null)).unwrap();
    let resolved = interpreter.resolve_snapshot(&nested).unwrap();
    assert_eq!(resolved.configuration, vec!["light", "light.red", "light.red.wait"]);

    let partial = Snapshot::from_state_value(&json!("red"), json!(null)).unwrap();
    let resolved = interpreter.resolve_snapshot(&partial).unwrap();
    assert_eq!(resolved.configuration, vec!["light", "light.red", "light.red.walk"]);

    let ids = Snapshot::from_state_value(&json!(["light.yellow"]), json!(null)).unwrap();
    let resolved = interpreter.resolve_snapshot(&ids).unwrap();
    assert_eq!(resolved.configuration, vec!["light", "light.yellow"]);

    let unknown = Snapshot::from_state_value(&json!("purple"), json!(null)).unwrap();
    assert!(matches!(
        interpreter.resolve_snapshot(&unknown),
        Err(MachineError::UnknownState(_))
    ));
}

#[test]
fn test_state_value_round_trip() {
    let def = light();
    let interpreter = Interpreter::new(def.clone());
    let s0 = interpreter.initial_snapshot().unwrap();
    assert_eq!(s0.state_value(&def), json!("green"));

    let red = interpreter
        .resolve_snapshot(&Snapshot::from_state_value(&json!({ "red": "walk" }), json!(null)).unwrap())
        .unwrap();
    assert_eq!(red.state_value(&def), json!({ "red": "walk" }));
}

#[test]
fn test_actor_notifies_subscribers_until_stopped() {
    let mut factory = LocalFactory::new();
    let mut actor = factory.create_instance(light()).unwrap();
    let (tx, rx) = mpsc::channel();
    actor.subscribe(tx);

    actor.start().unwrap();
    actor.send(Event::new("TIMER")).unwrap();
    let updates: Vec<_> = rx.try_iter().collect();
    assert_eq!(updates.len(), 2);
    assert!(updates[1].snapshot.matches("light.yellow"));
    assert_eq!(updates[1].session_id, actor.session_id());

    actor.stop();
    assert!(!actor.is_running());
    assert_eq!(actor.snapshot().status, SnapshotStatus::Stopped);
    assert!(matches!(
        actor.send(Event::new("TIMER")),
        Err(MachineError::NotRunning(_))
    ));
    assert_eq!(rx.try_iter().count(), 0);
}

#[test]
fn test_factory_rejects_dangling_targets() {
    let def = definition(json!({
        "id": "m",
        "initial": "a",
        "states": { "a": { "on": { "GO": "missing" } } }
    }));
    let mut factory = LocalFactory::new();
    assert!(matches!(
        factory.create_instance(def),
        Err(MachineError::UnknownTarget { .. })
    ));
}

#[test]
fn test_strict_factory_rejects_unknown_guards() {
    let def = definition(json!({
        "id": "door",
        "initial": "closed",
        "states": {
            "closed": { "on": { "OPEN": { "target": "open", "guard": "unlocked" } } },
            "open": {}
        }
    }));

    let mut permissive = LocalFactory::new();
    let mut actor = permissive.create_instance(def.clone()).unwrap();
    actor.start().unwrap();
    assert!(actor.send(Event::new("OPEN")).unwrap().matches("door.open"));

    let mut strict = LocalFactory::new().strict();
    let mut actor = strict.create_instance(def).unwrap();
    actor.start().unwrap();
    assert!(matches!(
        actor.send(Event::new("OPEN")),
        Err(MachineError::UnknownGuard(name)) if name == "unlocked"
    ));
}

#[test]
fn test_template_factory_shares_guards() {
    let def = definition(json!({
        "id": "door",
        "initial": "closed",
        "states": {
            "closed": { "on": { "OPEN": { "target": "open", "guard": "unlocked" } } },
            "open": {}
        }
    }));
    let template = Interpreter::new(def.clone())
        .with_guard("unlocked", |_, _| false)
        .strict();

    let mut factory = LocalFactory::new().with_template(template);
    let mut actor = factory.create_instance(def).unwrap();
    actor.start().unwrap();
    assert!(actor.send(Event::new("OPEN")).unwrap().matches("door.closed"));
}

#[test]
fn test_event_serialization_flattens_payload() {
    let event = Event::new("SUBMIT").with("value", json!(42));
    let text = serde_json::to_string(&event).unwrap();
    assert_eq!(text, r#"{"type":"SUBMIT","value":42}"#);

    let back: Event = serde_json::from_str(&text).unwrap();
    assert_eq!(back, event);
}
