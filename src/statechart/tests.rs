//! Unit tests for the statechart definitions

use std::collections::BTreeMap;

use serde_json::json;

use crate::statechart::{
    delayed_transition, format_delay, DefinitionError, DelayMetadata, NodeKind,
    StatechartDefinition, TransitionDef, GuardDef, ActionDef,
};

fn light_machine() -> StatechartDefinition {
    StatechartDefinition::from_value(json!({
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
    .expect("light machine should build")
}

#[test]
fn test_ids_follow_document_paths() {
    let def = light_machine();
    let ids: Vec<&str> = def.nodes().iter().map(|n| n.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "light",
            "light.green",
            "light.yellow",
            "light.red",
            "light.red.walk",
            "light.red.wait",
            "light.red.stop"
        ]
    );
    assert_eq!(def.root().initial, def.index_of("light.green"));
    assert_eq!(def.get("light.red.stop").unwrap().kind, NodeKind::Final);
    assert_eq!(def.get("light.red.walk").unwrap().depth, 2);
}

#[test]
fn test_sibling_targets_are_resolved() {
    let def = light_machine();
    let green = def.get("light.green").unwrap();
    let timer = &green.transitions["TIMER"][0];
    assert_eq!(timer.targets, vec!["light.yellow".to_string()]);
    assert!(def.validate().is_ok());
}

#[test]
fn test_absolute_and_relative_targets() {
    let def = StatechartDefinition::from_value(json!({
        "id": "m",
        "initial": "a",
        "states": {
            "a": {
                "initial": "x",
                "on": { "IN": ".y", "JUMP": "#done" },
                "states": { "x": {}, "y": {} }
            },
            "b": { "id": "done", "type": "final" }
        }
    }))
    .unwrap();

    let a = def.get("m.a").unwrap();
    assert_eq!(a.transitions["IN"][0].targets, vec!["m.a.y".to_string()]);
    assert_eq!(a.transitions["JUMP"][0].targets, vec!["done".to_string()]);
    assert!(def.get("done").is_some());
}

#[test]
fn test_dangling_target_reported_by_validate() {
    let def = StatechartDefinition::from_value(json!({
        "id": "m",
        "initial": "a",
        "states": { "a": { "on": { "GO": "nowhere" } } }
    }))
    .unwrap();

    let errors = def.validate().unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("nowhere"));
}

#[test]
fn test_duplicate_custom_id_is_rejected() {
    let result = StatechartDefinition::from_value(json!({
        "id": "m",
        "states": {
            "a": { "id": "same" },
            "b": { "id": "same" }
        }
    }));
    assert!(matches!(result, Err(DefinitionError::DuplicateId(id)) if id == "same"));
}

#[test]
fn test_unknown_initial_is_rejected() {
    let result = StatechartDefinition::from_value(json!({
        "id": "m",
        "initial": "missing",
        "states": { "a": {} }
    }));
    assert!(matches!(result, Err(DefinitionError::UnknownInitial { .. })));
}

#[test]
fn test_after_and_always_descriptors() {
    let def = StatechartDefinition::from_value(json!({
        "id": "m",
        "initial": "a",
        "states": {
            "a": {
                "after": { "1000": "b" },
                "always": [{ "target": "b", "guard": "ready" }]
            },
            "b": {}
        }
    }))
    .unwrap();

    let a = def.get("m.a").unwrap();
    let keys: Vec<&str> = a.transitions.keys().map(|k| k.as_str()).collect();
    assert_eq!(keys, vec!["xstate.after(1000)#m.a", ""]);
    assert!(a.transitions[""][0].is_eventless());
    assert_eq!(a.transitions[""][0].guard, Some(GuardDef::new("ready")));
}

#[test]
fn test_parallel_has_no_initial() {
    let def = StatechartDefinition::from_value(json!({
        "id": "m",
        "type": "parallel",
        "states": { "left": {}, "right": {} }
    }))
    .unwrap();
    assert!(def.root().is_parallel());
    assert!(def.root().initial.is_none());
    assert_eq!(def.root().children.len(), 2);
}

#[test]
fn test_events_are_unique_in_document_order() {
    let def = light_machine();
    assert_eq!(def.events(), vec!["TIMER".to_string(), "COUNTDOWN".to_string()]);
}

#[test]
fn test_transition_label() {
    let mut t = TransitionDef::new("m.a", "SUBMIT");
    assert_eq!(t.label(), "SUBMIT");

    t.guard = Some(GuardDef::new("isValid"));
    t.actions.push(ActionDef::new("save"));
    let label = t.label();
    assert!(label.contains("SUBMIT"));
    assert!(label.contains("[isValid]"));
    assert!(label.contains("/ save"));
}

#[test]
fn test_ancestors_nearest_first() {
    let def = light_machine();
    let walk = def.index_of("light.red.walk").unwrap();
    let red = def.index_of("light.red").unwrap();
    assert_eq!(def.ancestors(walk), vec![red, 0]);
    assert!(def.is_descendant_or_self(walk, red));
    assert!(!def.is_descendant_or_self(red, walk));
}

#[test]
fn test_delayed_transition_metadata() {
    let mut delays = BTreeMap::new();
    delays.insert("slow".to_string(), 2500);

    assert_eq!(
        delayed_transition("xstate.after(300)#m.a", &delays),
        Some(DelayMetadata::Valid {
            delay_ms: 300,
            label: "300ms".to_string()
        })
    );
    assert_eq!(
        delayed_transition("xstate.after(slow)#m.a", &delays),
        Some(DelayMetadata::Valid {
            delay_ms: 2500,
            label: "2.5s".to_string()
        })
    );
    assert_eq!(
        delayed_transition("xstate.after(unknown)#m.a", &delays),
        Some(DelayMetadata::Invalid)
    );
    assert_eq!(delayed_transition("TIMER", &delays), None);
}

#[test]
fn test_format_delay() {
    assert_eq!(format_delay(0), "0ms");
    assert_eq!(format_delay(999), "999ms");
    assert_eq!(format_delay(1000), "1s");
    assert_eq!(format_delay(1250), "1.25s");
}
