//! Unit tests for path generation

use std::sync::Arc;

use serde_json::json;

use crate::machine::{Event, Interpreter, MachineLogic, Snapshot};
use crate::paths::{
    adjacency_map, fingerprint, join_paths, path_from_events, serialize_event, shortest_paths, simple_paths,
    PathError, StatePath, TraversalOptions,
};
use crate::statechart::StatechartDefinition;

/// a -> b -> c -> a on NEXT, plus a shortcut a -> c on SKIP
fn cycle() -> Interpreter {
    let def = StatechartDefinition::from_value(json!({
        "id": "cycle",
        "initial": "a",
        "states": {
            "a": { "on": { "NEXT": "b", "SKIP": "c" } },
            "b": { "on": { "NEXT": "c" } },
            "c": { "on": { "NEXT": "a" } }
        }
    }))
    .unwrap();
    Interpreter::new(Arc::new(def))
}

fn leaf(path: &StatePath) -> &str {
    path.state.configuration.last().map(String::as_str).unwrap_or("")
}

fn kinds(path: &StatePath) -> Vec<&str> {
    path.events().map(|e| e.kind.as_str()).collect()
}

#[test]
fn test_shortest_paths_on_cycle() {
    let logic = cycle();
    let initial = logic.initial_snapshot().unwrap();
    let paths = shortest_paths(&logic, &initial, &TraversalOptions::new()).unwrap();

    assert_eq!(paths.len(), 3);
    assert_eq!(leaf(&paths[0]), "cycle.a");
    assert!(paths[0].steps.is_empty());
    assert_eq!(leaf(&paths[1]), "cycle.b");
    assert_eq!(kinds(&paths[1]), vec!["NEXT"]);
    // The shortcut wins over NEXT, NEXT
    assert_eq!(leaf(&paths[2]), "cycle.c");
    assert_eq!(kinds(&paths[2]), vec!["SKIP"]);
    assert_eq!(paths[2].weight, 1);
}

#[test]
fn test_shortest_paths_with_fixed_events() {
    let logic = cycle();
    let initial = logic.initial_snapshot().unwrap();
    let options = TraversalOptions::new().with_events(vec![Event::new("NEXT")]);
    let paths = shortest_paths(&logic, &initial, &options).unwrap();

    assert_eq!(paths.len(), 3);
    assert_eq!(kinds(&paths[2]), vec!["NEXT", "NEXT"]);
}

#[test]
fn test_shortest_paths_respect_filter_and_depth() {
    let logic = cycle();
    let initial = logic.initial_snapshot().unwrap();

    let options = TraversalOptions::new().with_filter(|s: &Snapshot| !s.matches("cycle.c"));
    let paths = shortest_paths(&logic, &initial, &options).unwrap();
    assert_eq!(paths.iter().map(leaf).collect::<Vec<_>>(), vec!["cycle.a", "cycle.b"]);

    let options = TraversalOptions::new()
        .with_events(vec![Event::new("NEXT")])
        .with_max_depth(1);
    let paths = shortest_paths(&logic, &initial, &options).unwrap();
    assert_eq!(paths.len(), 2);
}

#[test]
fn test_simple_paths_enumerates_cycle_free_paths() {
    let logic = cycle();
    let initial = logic.initial_snapshot().unwrap();
    let paths = simple_paths(&logic, &initial, &TraversalOptions::new()).unwrap();

    let routes: Vec<Vec<&str>> = paths.iter().map(kinds).collect();
    assert_eq!(
        routes,
        vec![vec![], vec!["NEXT"], vec!["NEXT", "NEXT"], vec!["SKIP"]]
    );
}

#[test]
fn test_simple_paths_max_paths_is_exact() {
    let logic = cycle();
    let initial = logic.initial_snapshot().unwrap();
    for max in 0..=5 {
        let options = TraversalOptions::new().with_max_paths(max);
        let paths = simple_paths(&logic, &initial, &options).unwrap();
        assert_eq!(paths.len(), max.min(4));
    }

    let options = TraversalOptions::new().with_max_depth(1);
    assert_eq!(simple_paths(&logic, &initial, &options).unwrap().len(), 3);
}

#[test]
fn test_paths_replay_to_same_snapshot() {
    let logic = cycle();
    let initial = logic.initial_snapshot().unwrap();
    let paths = simple_paths(&logic, &initial, &TraversalOptions::new()).unwrap();

    for path in &paths {
        let events: Vec<Event> = path.events().cloned().collect();
        let replayed = path_from_events(&logic, &initial, &events).unwrap();
        assert_eq!(fingerprint(&replayed.state).unwrap(), fingerprint(&path.state).unwrap());
    }
}

#[test]
fn test_path_from_events_rejects_unaccepted_event() {
    let logic = cycle();
    let initial = logic.initial_snapshot().unwrap();
    let err = path_from_events(&logic, &initial, &[Event::new("NEXT"), Event::new("SKIP")]).unwrap_err();
    match err {
        PathError::EventNotAccepted { event, configuration } => {
            assert_eq!(event, "SKIP");
            assert_eq!(configuration, vec!["cycle", "cycle.b"]);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_adjacency_map() {
    let logic = cycle();
    let initial = logic.initial_snapshot().unwrap();
    let map = adjacency_map(&logic, &initial, &TraversalOptions::new()).unwrap();

    assert_eq!(map.len(), 3);
    let (_, a) = map.get_index(0).unwrap();
    assert_eq!(a.transitions.len(), 2);
    let next = &a.transitions[&serialize_event(&Event::new("NEXT")).unwrap()];
    assert_eq!(map[&next.target].state.configuration, vec!["cycle", "cycle.b"]);
}

#[test]
fn test_join_paths() {
    let logic = cycle();
    let initial = logic.initial_snapshot().unwrap();
    let head = path_from_events(&logic, &initial, &[Event::new("NEXT")]).unwrap();
    let tail = path_from_events(&logic, &head.state, &[Event::new("NEXT"), Event::new("NEXT")]).unwrap();

    let joined = join_paths(&head, &tail).unwrap();
    assert_eq!(joined.weight, 3);
    assert_eq!(kinds(&joined), vec!["NEXT", "NEXT", "NEXT"]);
    assert!(joined.state.matches("cycle.a"));

    // head ends in b but starts in a
    assert!(matches!(join_paths(&head, &head), Err(PathError::Disjoint { .. })));
}

#[test]
fn test_fingerprint_ignores_event() {
    let logic = cycle();
    let initial = logic.initial_snapshot().unwrap();
    let mut other = initial.clone();
    other.event = Some(Event::new("SOMETHING"));
    assert_eq!(fingerprint(&initial).unwrap(), fingerprint(&other).unwrap());

    other.context = json!({ "n": 1 });
    assert_ne!(fingerprint(&initial).unwrap(), fingerprint(&other).unwrap());
}

/// `mouse.*` covers every `mouse.<x>` event
fn pointer() -> Interpreter {
    let def = StatechartDefinition::from_value(json!({
        "id": "m",
        "initial": "a",
        "states": {
            "a": { "on": { "mouse.*": "b" } },
            "b": { "on": { "RESET": "a" } }
        }
    }))
    .unwrap();
    Interpreter::new(Arc::new(def))
}

#[test]
fn test_path_from_events_accepts_partial_wildcard() {
    let logic = pointer();
    let initial = logic.initial_snapshot().unwrap();
    assert!(logic.accepts(&initial, &Event::new("mouse.click")));
    assert!(!logic.accepts(&initial, &Event::new("mouseclick")));

    let path = path_from_events(&logic, &initial, &[Event::new("mouse.click")]).unwrap();
    assert_eq!(path.state.configuration, vec!["m", "m.b"]);

    let err = path_from_events(&logic, &initial, &[Event::new("keyboard.press")]).unwrap_err();
    assert!(matches!(err, PathError::EventNotAccepted { .. }));
}

#[test]
fn test_fixed_event_paths_replay_through_wildcards() {
    let logic = pointer();
    let initial = logic.initial_snapshot().unwrap();
    let options = TraversalOptions::new().with_events(vec![Event::new("mouse.move"), Event::new("RESET")]);
    let paths = shortest_paths(&logic, &initial, &options).unwrap();
    assert_eq!(paths.len(), 2);

    for path in &paths {
        let events: Vec<Event> = path.events().cloned().collect();
        let replayed = path_from_events(&logic, &initial, &events).unwrap();
        assert_eq!(replayed.fingerprint, path.fingerprint);
    }
}

#[test]
fn test_paths_record_origin_and_terminal_fingerprints() {
    let logic = cycle();
    let initial = logic.initial_snapshot().unwrap();
    let start = fingerprint(&initial).unwrap();
    let paths = simple_paths(&logic, &initial, &TraversalOptions::new()).unwrap();

    for path in &paths {
        assert_eq!(path.origin_fingerprint, start);
        assert_eq!(path.fingerprint, fingerprint(&path.state).unwrap());
    }

    let head = path_from_events(&logic, &initial, &[Event::new("NEXT")]).unwrap();
    let tail = path_from_events(&logic, &head.state, &[Event::new("NEXT")]).unwrap();
    let joined = join_paths(&head, &tail).unwrap();
    assert_eq!(joined.origin_fingerprint, start);
    assert_eq!(joined.fingerprint, tail.fingerprint);
}
