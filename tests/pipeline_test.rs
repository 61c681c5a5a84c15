//! End-to-end: DSL source through layout, canvas and simulation

use std::sync::Arc;
use std::time::{Duration, Instant};

use stateviz::geometry::{Point, Rect};
use stateviz::layout::{LayeredLayout, LayoutAction, LayoutCoordinator, LayoutOptions, LayoutWorker};
use stateviz::paths::{path_from_events, shortest_paths, TraversalOptions};
use stateviz::viewport::MemoryStore;
use stateviz::{
    build_graph, definitions_from_source, validated, CanvasController, Event, Interpreter, LocalFactory,
    MachineLogic, SimulationCommand, SimulationOrchestrator, ViewportCommand,
};

const SOURCE: &str = r#"
machine light {
    initial green;
    state green { on TIMER -> yellow; }
    state yellow { on TIMER -> red; }
    state red {
        initial walk;
        on TIMER -> green;
        state walk { on PED_COUNTDOWN -> stop; }
        final state stop;
    }
}
"#;

fn light() -> Arc<stateviz::StatechartDefinition> {
    let mut definitions = definitions_from_source(SOURCE, false).unwrap();
    assert_eq!(definitions.len(), 1);
    Arc::new(validated(definitions.remove(0)).unwrap())
}

#[test]
fn test_source_to_fitted_canvas() {
    let definition = light();
    let graph = build_graph(definition).unwrap();

    let mut coordinator = LayoutCoordinator::new(LayoutOptions::default());
    let worker = LayoutWorker::spawn(Box::new(LayeredLayout::new()));

    let actions = coordinator.graph_updated(graph);
    assert!(matches!(actions[0], LayoutAction::NotifyPending));
    for action in actions {
        if let LayoutAction::Request(request) = action {
            worker.submit(request).unwrap();
        }
    }

    let response = worker
        .recv_timeout(Duration::from_secs(10))
        .unwrap()
        .expect("layout finished");
    let actions = coordinator.resolve(response);
    assert!(matches!(actions.as_slice(), [LayoutAction::NotifyReady]));

    let layout = coordinator.layout().unwrap();
    let (width, height) = layout.content_size().unwrap();
    assert!(width > 0.0 && height > 0.0);

    // Every state sits inside the root
    for idx in 1..layout.len() {
        let rect = layout.absolute_rect(idx).unwrap();
        assert!(rect.x >= 0.0 && rect.y >= 0.0);
        assert!(rect.right() <= width + 1e-6 && rect.bottom() <= height + 1e-6);
    }

    let now = Instant::now();
    let mut canvas = CanvasController::new(Box::new(MemoryStore::new()));
    canvas.handle(ViewportCommand::CanvasRectChanged(Rect::new(0.0, 0.0, 800.0, 600.0)), now);
    canvas.handle(ViewportCommand::LayoutUpdated { width, height }, now);
    canvas.handle(ViewportCommand::FitToContent, now);

    // Fitted content is centered in the panel
    let center = canvas.to_screen(Point::new(width / 2.0, height / 2.0));
    assert!((center.x - 400.0).abs() < 1e-6);
    assert!((center.y - 300.0).abs() < 1e-6);
}

#[test]
fn test_local_simulation_drives_history() {
    let mut simulation = SimulationOrchestrator::visualizing(Box::new(LocalFactory::new()));
    simulation.send(SimulationCommand::MachinesRegister { machines: vec![light()] });

    let session = simulation.current_session().unwrap();
    assert!(session.snapshot.matches("light.green"));
    assert_eq!(simulation.next_events(), vec!["TIMER".to_string()]);

    simulation.send(SimulationCommand::ServiceSend(Event::new("TIMER")));
    simulation.send(SimulationCommand::ServiceSend(Event::new("TIMER")));
    simulation.poll();

    let session = simulation.current_session().unwrap();
    assert!(session.snapshot.matches("light.red.walk"));
    let kinds: Vec<&str> = simulation.history().iter().map(|h| h.event.kind.as_str()).collect();
    assert_eq!(kinds, vec!["TIMER", "TIMER"]);
}

#[test]
fn test_paths_reach_every_state() {
    let logic = Interpreter::new(light());
    let initial = logic.initial_snapshot().unwrap();
    let paths = shortest_paths(&logic, &initial, &TraversalOptions::new()).unwrap();

    let stop = paths
        .iter()
        .find(|p| p.state.matches("light.red.stop"))
        .expect("final state reachable");
    let events: Vec<Event> = stop.events().cloned().collect();
    let kinds: Vec<&str> = events.iter().map(|e| e.kind.as_str()).collect();
    assert_eq!(kinds, vec!["TIMER", "TIMER", "PED_COUNTDOWN"]);

    let replayed = path_from_events(&logic, &initial, &events).unwrap();
    assert!(replayed.state.matches("light.red.stop"));
}
