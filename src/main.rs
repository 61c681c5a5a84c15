//! stateviz GUI - Statechart Visualizer
//! Interactive canvas for hierarchical state machines, driven locally or
//! from an inspected process (`--inspect` reads JSON lines from stdin)

use eframe::egui;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use stateviz::config::AppConfig;
use stateviz::drag::{Cursor, DragController, DragEffect, DragEvent, PointerButton, PointerInput};
use stateviz::geometry::{Point, Rect};
use stateviz::graph::{build_graph, DirectedGraph};
use stateviz::layout::{
    estimate_label_size, LayeredLayout, LayoutAction, LayoutCoordinator, LayoutEngine, LayoutWorker,
    ProcessLayoutEngine,
};
use stateviz::simulation::inspect::{read_json_lines, OutboundMessage};
use stateviz::simulation::{
    ChannelReceiver, NotificationSink, ServiceStatus, SimulationCommand, SimulationOrchestrator,
};
use stateviz::statechart::{NodeKind, StatechartDefinition};
use stateviz::viewport::{
    map_key, map_wheel, CanvasController, JsonFileStore, Key, KeyInput, MemoryStore, Modifiers, PositionStore,
    ViewportCommand, WheelInput,
};
use stateviz::{definitions_from_source, load_definitions, Event, LocalFactory};

const DEFAULT_MACHINE: &str = r#"// Statechart DSL
machine light {
    initial green;
    delay slow = 2s;

    state green { on TIMER -> yellow; }
    state yellow { on TIMER -> red; after slow -> red; }
    state red {
        initial walk;
        on TIMER -> green;
        state walk { on PED_COUNTDOWN -> wait; }
        state wait { on PED_COUNTDOWN -> stop; }
        final state stop;
    }
    on POWER_OUTAGE -> #light.red;
}
"#;

const MOUSE_POINTER: u64 = 0;

// ============================================================================
// LAUNCH
// ============================================================================

struct Launch {
    config: AppConfig,
    file: Option<PathBuf>,
}

fn parse_launch() -> Result<Launch, String> {
    let mut file = None;
    let mut config_path = None;
    let mut inspect = false;
    let mut embed = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--inspect" => inspect = true,
            "--config" => config_path = Some(PathBuf::from(args.next().ok_or("--config needs a file")?)),
            "--embed" => embed = Some(args.next().ok_or("--embed needs a query, e.g. pan=1&zoom=1")?),
            other if other.starts_with("--") => return Err(format!("unknown option {}", other)),
            other => file = Some(PathBuf::from(other)),
        }
    }

    let mut config = AppConfig::load(config_path.as_deref()).map_err(|e| e.to_string())?;
    config.inspect |= inspect;
    if let Some(query) = embed {
        config.embed = Some(stateviz::EmbedOptions::from_query(&query));
    }
    Ok(Launch { config, file })
}

fn main() -> eframe::Result<()> {
    env_logger::init();

    let launch = match parse_launch() {
        Ok(launch) => launch,
        Err(message) => {
            eprintln!("❌ {}\nUsage: stateviz [file] [--inspect] [--config file] [--embed query]", message);
            std::process::exit(2);
        }
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 900.0])
            .with_title("stateviz - Statechart Visualizer"),
        ..Default::default()
    };

    eframe::run_native(
        "stateviz",
        options,
        Box::new(|cc| Ok(Box::new(StatevizApp::new(cc, launch)))),
    )
}

// ============================================================================
// APP
// ============================================================================

/// Collects errors for the status bar
#[derive(Clone, Default)]
struct StatusSink(Rc<RefCell<Vec<String>>>);

impl NotificationSink for StatusSink {
    fn error(&mut self, message: &str) {
        log::error!("{}", message);
        self.0.borrow_mut().push(message.to_string());
    }
}

struct StatevizApp {
    config: AppConfig,
    /// Machine file currently loaded
    source_path: Option<PathBuf>,
    simulation: SimulationOrchestrator,
    coordinator: LayoutCoordinator,
    worker: LayoutWorker,
    canvas: CanvasController,
    drag: DragController,
    /// Definition of the graph handed to layout
    shown: Option<Arc<StatechartDefinition>>,
    status: StatusSink,
    pan_mode: bool,
    cursor: Option<Cursor>,
}

impl StatevizApp {
    fn new(_cc: &eframe::CreationContext<'_>, launch: Launch) -> Self {
        let Launch { config, file } = launch;
        let status = StatusSink::default();

        let simulation = if config.inspect {
            let (receiver, inbound, outbound) = ChannelReceiver::new();
            spawn_stdio_bridge(inbound, outbound);
            SimulationOrchestrator::inspecting(Box::new(receiver))
        } else {
            let mut factory = LocalFactory::new();
            if !config.permissive_guards {
                factory = factory.strict();
            }
            SimulationOrchestrator::visualizing(Box::new(factory))
        };
        let simulation = simulation.with_sink(Box::new(status.clone()));

        let engine: Box<dyn LayoutEngine> = match config
            .layout_command
            .as_deref()
            .and_then(ProcessLayoutEngine::from_command_line)
        {
            Some(process) => Box::new(process),
            None => Box::new(LayeredLayout::new()),
        };

        let store: Box<dyn PositionStore> = match &config.position_store {
            Some(path) => Box::new(JsonFileStore::new(path.clone())),
            None => Box::new(MemoryStore::new()),
        };
        let mut canvas = CanvasController::new(store);
        if let Some(embed) = config.embed {
            canvas = canvas.with_embed(embed);
        }

        let mut app = Self {
            coordinator: LayoutCoordinator::new(config.layout.clone()),
            worker: LayoutWorker::spawn(engine),
            drag: DragController::new(config.embed),
            canvas,
            simulation,
            shown: None,
            status,
            pan_mode: false,
            cursor: None,
            source_path: None,
            config,
        };

        if !app.config.inspect {
            match file {
                Some(path) => app.open_file(path),
                None => app.register_source(DEFAULT_MACHINE, false),
            }
        }
        app
    }

    fn open_file(&mut self, path: PathBuf) {
        match load_definitions(&path) {
            Ok(definitions) => {
                self.source_path = Some(path);
                self.register(definitions);
            }
            Err(e) => self.report(format!("Could not load '{}': {}", path.display(), e)),
        }
    }

    fn register_source(&mut self, source: &str, json: bool) {
        match definitions_from_source(source, json) {
            Ok(definitions) => self.register(definitions),
            Err(e) => self.report(e.to_string()),
        }
    }

    fn register(&mut self, definitions: Vec<StatechartDefinition>) {
        let mut machines = Vec::new();
        for definition in definitions {
            if let Err(problems) = definition.validate() {
                self.report(format!("'{}' is invalid: {}", definition.id, problems.join("; ")));
                continue;
            }
            machines.push(Arc::new(definition));
        }
        self.shown = None;
        self.simulation.send(SimulationCommand::MachinesRegister { machines });
    }

    fn report(&mut self, message: String) {
        self.simulation.send(SimulationCommand::Error(message));
    }

    fn read_only(&self) -> bool {
        self.config.embed.map_or(false, |e| e.read_only)
    }

    fn show_controls(&self) -> bool {
        self.config.embed.map_or(true, |e| e.controls)
    }

    // ------------------------------------------------------------------------
    // Layout pipeline
    // ------------------------------------------------------------------------

    /// Rebuild the graph when the focused definition changes, collect results
    fn sync_layout(&mut self) {
        let focused = self.simulation.current_session().map(|s| s.definition.clone());
        let changed = match (&focused, &self.shown) {
            (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
            (Some(_), None) => true,
            _ => false,
        };

        if changed {
            if let Some(definition) = focused {
                self.shown = Some(definition.clone());
                self.canvas
                    .handle(ViewportCommand::SourceChanged(definition.id.clone()), Instant::now());
                match build_graph(definition) {
                    Ok(graph) => {
                        let actions = self.coordinator.graph_updated(graph);
                        self.perform(actions);
                    }
                    Err(e) => self.report(e.to_string()),
                }
            }
        }

        while let Some(response) = self.worker.try_recv() {
            let actions = self.coordinator.resolve(response);
            self.perform(actions);
        }
    }

    fn perform(&mut self, actions: Vec<LayoutAction>) {
        for action in actions {
            match action {
                LayoutAction::NotifyPending => self.simulation.send(SimulationCommand::LayoutPending),
                LayoutAction::Request(request) => {
                    if let Err(e) = self.worker.submit(request) {
                        self.report(e.to_string());
                    }
                }
                LayoutAction::NotifyReady => {
                    self.simulation.send(SimulationCommand::LayoutReady);
                    if let Some((width, height)) = self.coordinator.layout().and_then(DirectedGraph::content_size) {
                        self.canvas
                            .handle(ViewportCommand::LayoutUpdated { width, height }, Instant::now());
                    }
                }
                LayoutAction::Failed(message) => self.report(format!("Layout failed: {}", message)),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------------

    fn handle_canvas_input(&mut self, ctx: &egui::Context, response: &egui::Response) {
        let now = Instant::now();
        let mac = cfg!(target_os = "macos");
        let rect = response.rect;
        let panel = Rect::new(
            rect.min.x as f64,
            rect.min.y as f64,
            rect.width() as f64,
            rect.height() as f64,
        );
        if panel != self.canvas.panel() {
            self.canvas.handle(ViewportCommand::CanvasRectChanged(panel), now);
        }

        let typing = ctx.wants_keyboard_input();
        let (events, scroll, modifiers) = ctx.input(|i| (i.events.clone(), i.raw_scroll_delta, i.modifiers));
        let modifiers = to_modifiers(modifiers);

        for event in events {
            match event {
                egui::Event::Key {
                    key: egui::Key::Space,
                    pressed,
                    repeat: false,
                    ..
                } if !typing => {
                    let drag_event = if pressed { DragEvent::SpaceDown } else { DragEvent::SpaceUp };
                    self.apply_drag(drag_event, now);
                }
                egui::Event::Key {
                    key,
                    pressed: true,
                    modifiers: key_modifiers,
                    ..
                } => {
                    let input = KeyInput {
                        key: to_key(key),
                        modifiers: to_modifiers(key_modifiers),
                        in_text_input: typing,
                    };
                    if let Some(command) = map_key(&input, mac) {
                        self.canvas.handle(command, now);
                    }
                }
                egui::Event::PointerButton {
                    pos, button, pressed, ..
                } => {
                    let Some(button) = to_button(button) else { continue };
                    let pointer = PointerInput::new(MOUSE_POINTER, button, Point::new(pos.x as f64, pos.y as f64));
                    if pressed && rect.contains(pos) {
                        self.apply_drag(DragEvent::PointerDown(pointer), now);
                    } else if !pressed {
                        self.apply_drag(DragEvent::PointerUp(pointer), now);
                    }
                }
                egui::Event::PointerMoved(pos) => {
                    let pointer =
                        PointerInput::new(MOUSE_POINTER, PointerButton::Left, Point::new(pos.x as f64, pos.y as f64));
                    self.apply_drag(DragEvent::PointerMove(pointer), now);
                }
                egui::Event::PointerGone => {
                    let pointer = PointerInput::new(MOUSE_POINTER, PointerButton::Left, Point::ZERO);
                    self.apply_drag(DragEvent::PointerCancel(pointer), now);
                }
                _ => {}
            }
        }

        if response.hovered() && scroll != egui::Vec2::ZERO {
            let position = ctx
                .input(|i| i.pointer.hover_pos())
                .map(|p| Point::new(p.x as f64, p.y as f64))
                .unwrap_or_else(|| panel.center());
            // egui scrolls positive upwards
            let wheel = WheelInput {
                delta_x: -scroll.x as f64,
                delta_y: -scroll.y as f64,
                position,
                modifiers,
            };
            if let Some(command) = map_wheel(&wheel, mac) {
                self.canvas.handle(command, now);
            }
        }

        match self.cursor {
            Some(Cursor::Grab) => ctx.set_cursor_icon(egui::CursorIcon::Grab),
            Some(Cursor::Grabbing) => ctx.set_cursor_icon(egui::CursorIcon::Grabbing),
            None => {}
        }
    }

    fn apply_drag(&mut self, event: DragEvent, now: Instant) {
        for effect in self.drag.handle(event) {
            match effect {
                DragEffect::SetCursor(cursor) => self.cursor = Some(cursor),
                DragEffect::ClearCursor => self.cursor = None,
                DragEffect::Pan { dx, dy } => {
                    self.canvas.handle(ViewportCommand::Pan { dx, dy }, now);
                }
                // egui keeps delivering pointer events outside the window and has no text selection on the canvas
                DragEffect::CapturePointer(_)
                | DragEffect::ReleasePointer(_)
                | DragEffect::DisableTextSelection
                | DragEffect::EnableTextSelection => {}
            }
        }
    }

    // ------------------------------------------------------------------------
    // Panels
    // ------------------------------------------------------------------------

    fn menu_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui
                        .add_enabled(!self.config.inspect, egui::Button::new("📂 Open..."))
                        .clicked()
                    {
                        if let Some(path) = rfd::FileDialog::new()
                            .add_filter("Statechart", &["json", "sc", "txt"])
                            .pick_file()
                        {
                            self.open_file(path);
                        }
                        ui.close_menu();
                    }
                    if ui
                        .add_enabled(!self.config.inspect, egui::Button::new("Example machine"))
                        .clicked()
                    {
                        self.source_path = None;
                        self.register_source(DEFAULT_MACHINE, false);
                        ui.close_menu();
                    }
                    ui.separator();
                    if ui.button("Quit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });

                if self.show_controls() {
                    ui.separator();
                    let now = Instant::now();
                    if ui.button("➖").on_hover_text("Zoom out (-)").clicked() {
                        self.canvas.handle(ViewportCommand::zoom_out(), now);
                    }
                    ui.label(format!("{:.0}%", self.canvas.zoom() * 100.0));
                    if ui.button("➕").on_hover_text("Zoom in (+)").clicked() {
                        self.canvas.handle(ViewportCommand::zoom_in(), now);
                    }
                    if ui.button("Fit").on_hover_text("Fit to content (Shift+1)").clicked() {
                        self.canvas.handle(ViewportCommand::FitToContent, now);
                    }
                    if ui.button("Reset view").clicked() {
                        self.canvas.handle(ViewportCommand::PositionReset, now);
                    }
                    if !self.drag.is_permanently_disabled() {
                        let toggled = ui.toggle_value(&mut self.pan_mode, "✋ Pan").changed();
                        if toggled {
                            let event = if self.pan_mode {
                                DragEvent::EnterPanMode
                            } else {
                                DragEvent::ExitPanMode
                            };
                            self.apply_drag(event, now);
                        }
                    }
                }

                if !self.config.inspect && !self.read_only() {
                    ui.separator();
                    if ui.button("⟲ Reset machines").clicked() {
                        self.shown = None;
                        self.simulation.send(SimulationCommand::MachinesReset);
                    }
                }

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let tags = self.simulation.tags().join(" · ");
                    ui.weak(tags);
                    if let Some(path) = &self.source_path {
                        ui.weak(path.display().to_string());
                    }
                });
            });
        });
    }

    fn side_panel(&mut self, ctx: &egui::Context) {
        egui::SidePanel::left("sessions")
            .resizable(true)
            .default_width(280.0)
            .show(ctx, |ui| {
                ui.heading("Services");
                let mut focus = None;
                for session in self.simulation.services().values() {
                    let selected = self.simulation.focused_id() == Some(session.session_id.as_str());
                    let stopped = if session.status == ServiceStatus::Stopped { " (stopped)" } else { "" };
                    let indent = if session.parent.is_some() { "  ↳ " } else { "" };
                    let text = format!("{}{} [{}]{}", indent, session.definition.id, session.session_id, stopped);
                    if ui.selectable_label(selected, text).clicked() && !selected {
                        focus = Some(session.session_id.clone());
                    }
                }
                if let Some(session_id) = focus {
                    self.simulation.send(SimulationCommand::ServiceFocus { session_id });
                }

                ui.separator();
                if let Some(session) = self.simulation.current_session() {
                    ui.label(format!("State: {}", session.snapshot.configuration.join(", ")));
                    if !session.snapshot.context.is_null() {
                        ui.monospace(session.snapshot.context.to_string());
                    }
                }

                if !self.read_only() {
                    ui.separator();
                    ui.heading("Events");
                    let mut hovered = None;
                    let mut clicked = None;
                    for event in self.simulation.next_events() {
                        let response = ui.button(event.as_str());
                        if response.hovered() {
                            hovered = Some(event.clone());
                        }
                        if response.clicked() {
                            clicked = Some(event);
                        }
                    }
                    match hovered {
                        Some(event) if self.simulation.preview() != Some(event.as_str()) => {
                            self.simulation.send(SimulationCommand::EventPreview(event));
                        }
                        None if self.simulation.preview().is_some() => {
                            self.simulation.send(SimulationCommand::PreviewClear);
                        }
                        _ => {}
                    }
                    if let Some(kind) = clicked {
                        self.simulation.send(SimulationCommand::ServiceSend(Event::new(kind)));
                    }
                }

                ui.separator();
                ui.heading("History");
                egui::ScrollArea::vertical()
                    .max_height(220.0)
                    .auto_shrink([false; 2])
                    .stick_to_bottom(true)
                    .show(ui, |ui| {
                        for entry in self.simulation.history() {
                            ui.label(format!("{}  {}", entry.session_id, entry.event.kind));
                        }
                    });

                let errors = self.status.0.borrow();
                if !errors.is_empty() {
                    ui.separator();
                    let start = errors.len().saturating_sub(5);
                    for message in &errors[start..] {
                        ui.colored_label(egui::Color32::from_rgb(255, 120, 120), message);
                    }
                }
            });
    }

    fn canvas_panel(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let (response, painter) = ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
            self.handle_canvas_input(ctx, &response);

            let rect = response.rect;
            painter.rect_filled(rect, 0.0, egui::Color32::from_rgb(25, 28, 32));
            draw_grid(&painter, rect, &self.canvas);

            if self.coordinator.is_loading() && self.coordinator.layout().is_none() {
                painter.text(
                    rect.center(),
                    egui::Align2::CENTER_CENTER,
                    "Laying out…",
                    egui::FontId::proportional(16.0),
                    egui::Color32::GRAY,
                );
                return;
            }

            if let Some(graph) = self.coordinator.layout() {
                let session = self.simulation.current_session();
                let active = |id: &str| session.map_or(false, |s| s.snapshot.matches(id));
                let preview = self.simulation.preview();
                draw_graph(&painter, graph, &self.canvas, &active, preview);
            }
        });
    }
}

impl eframe::App for StatevizApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.simulation.poll();
        self.sync_layout();
        if let Err(e) = self.canvas.poll(Instant::now()) {
            log::warn!("could not persist canvas position: {}", e);
        }

        self.menu_bar(ctx);
        self.side_panel(ctx);
        self.canvas_panel(ctx);

        // Layout results, inspection records and the save debounce arrive off-frame
        ctx.request_repaint_after(Duration::from_millis(100));
    }
}

// ============================================================================
// INSPECTION BRIDGE
// ============================================================================

/// stdin JSON lines in, outbound records as JSON lines on stdout
fn spawn_stdio_bridge(
    inbound: std::sync::mpsc::Sender<stateviz::simulation::inspect::InspectMessage>,
    outbound: std::sync::mpsc::Receiver<OutboundMessage>,
) {
    let reader = std::thread::Builder::new().name("inspect-stdin".to_string()).spawn(move || {
        let stdin = std::io::stdin();
        match read_json_lines(stdin.lock(), inbound) {
            Ok(count) => log::info!("stdin closed after {} records", count),
            Err(e) => log::error!("stdin read failed: {}", e),
        }
    });
    if let Err(e) = reader {
        log::error!("failed to spawn stdin reader: {}", e);
    }

    let writer = std::thread::Builder::new().name("inspect-stdout".to_string()).spawn(move || {
        for message in outbound {
            match serde_json::to_string(&message) {
                Ok(line) => println!("{}", line),
                Err(e) => log::error!("could not encode outbound record: {}", e),
            }
        }
    });
    if let Err(e) = writer {
        log::error!("failed to spawn stdout writer: {}", e);
    }
}

// ============================================================================
// INPUT CONVERSION
// ============================================================================

fn to_key(key: egui::Key) -> Key {
    match key {
        egui::Key::ArrowUp => Key::ArrowUp,
        egui::Key::ArrowDown => Key::ArrowDown,
        egui::Key::ArrowLeft => Key::ArrowLeft,
        egui::Key::ArrowRight => Key::ArrowRight,
        egui::Key::Plus => Key::Char('+'),
        egui::Key::Equals => Key::Char('='),
        egui::Key::Minus => Key::Char('-'),
        egui::Key::Num1 => Key::Char('1'),
        _ => Key::Other,
    }
}

fn to_modifiers(m: egui::Modifiers) -> Modifiers {
    Modifiers {
        shift: m.shift,
        ctrl: m.ctrl,
        meta: m.mac_cmd,
    }
}

fn to_button(button: egui::PointerButton) -> Option<PointerButton> {
    match button {
        egui::PointerButton::Primary => Some(PointerButton::Left),
        egui::PointerButton::Middle => Some(PointerButton::Middle),
        egui::PointerButton::Secondary => Some(PointerButton::Right),
        _ => None,
    }
}

// ============================================================================
// DRAWING
// ============================================================================

fn to_pos(canvas: &CanvasController, content: Point) -> egui::Pos2 {
    let screen = canvas.to_screen(content);
    egui::pos2(screen.x as f32, screen.y as f32)
}

fn draw_grid(painter: &egui::Painter, rect: egui::Rect, canvas: &CanvasController) {
    let zoom = canvas.zoom() as f32;
    let grid_size = 50.0 * zoom;
    if grid_size < 4.0 {
        return;
    }
    let grid_color = egui::Color32::from_rgba_unmultiplied(100, 100, 100, 30);
    let origin = to_pos(canvas, Point::ZERO);

    let start_x = ((rect.left() - origin.x) / grid_size).floor() * grid_size + origin.x;
    let start_y = ((rect.top() - origin.y) / grid_size).floor() * grid_size + origin.y;

    let mut x = start_x;
    while x < rect.right() {
        painter.line_segment(
            [egui::pos2(x, rect.top()), egui::pos2(x, rect.bottom())],
            egui::Stroke::new(1.0, grid_color),
        );
        x += grid_size;
    }

    let mut y = start_y;
    while y < rect.bottom() {
        painter.line_segment(
            [egui::pos2(rect.left(), y), egui::pos2(rect.right(), y)],
            egui::Stroke::new(1.0, grid_color),
        );
        y += grid_size;
    }
}

fn draw_graph(
    painter: &egui::Painter,
    graph: &DirectedGraph,
    canvas: &CanvasController,
    active: &dyn Fn(&str) -> bool,
    preview: Option<&str>,
) {
    let zoom = canvas.zoom() as f32;
    let definition = graph.definition();

    // Parents first so children paint on top
    for node in graph.all_nodes() {
        let Some(idx) = graph.index_of(&node.id) else { continue };
        if idx == 0 {
            continue;
        }
        let Some(rect) = graph.absolute_rect(idx) else { continue };
        let state = definition.node(node.state);
        let is_initial = state
            .parent
            .and_then(|p| definition.node(p).initial)
            .map_or(false, |i| i == node.state);
        draw_state(
            painter,
            to_pos(canvas, rect.origin()),
            zoom,
            rect,
            &state.key,
            state.kind,
            is_initial,
            active(&node.id),
        );
    }

    for edge in graph.all_edges() {
        let highlighted = preview.map_or(false, |p| edge.transition.event == p);
        let color = if highlighted {
            egui::Color32::from_rgb(255, 220, 120)
        } else {
            egui::Color32::from_rgb(150, 160, 180)
        };

        for section in &edge.sections {
            let mut route = vec![to_pos(canvas, section.start)];
            route.extend(section.bend_points.iter().map(|p| to_pos(canvas, *p)));
            route.push(to_pos(canvas, section.end));
            draw_arrow(painter, &route, zoom, color);
        }

        if !edge.label.text.is_empty() && !edge.sections.is_empty() {
            let (width, height) = estimate_label_size(&edge.label.text);
            let min = to_pos(canvas, edge.label.position);
            let label_rect = egui::Rect::from_min_size(min, egui::vec2(width as f32 * zoom, height as f32 * zoom));
            painter.rect_filled(label_rect, 3.0, egui::Color32::from_rgb(30, 35, 45));
            painter.rect_stroke(label_rect, 3.0, egui::Stroke::new(1.0, egui::Color32::from_rgb(70, 80, 95)));
            painter.text(
                label_rect.center(),
                egui::Align2::CENTER_CENTER,
                &edge.label.text,
                egui::FontId::proportional(11.0 * zoom),
                if highlighted {
                    egui::Color32::from_rgb(255, 220, 120)
                } else {
                    egui::Color32::from_rgb(205, 210, 220)
                },
            );
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn draw_state(
    painter: &egui::Painter,
    top_left: egui::Pos2,
    zoom: f32,
    rect: Rect,
    name: &str,
    kind: NodeKind,
    is_initial: bool,
    is_active: bool,
) {
    let size = egui::vec2(rect.width as f32 * zoom, rect.height as f32 * zoom);
    let screen = egui::Rect::from_min_size(top_left, size);

    let fill_color = match kind {
        NodeKind::Parallel => egui::Color32::from_rgb(45, 70, 95),
        NodeKind::Final => egui::Color32::from_rgb(100, 50, 50),
        NodeKind::History => egui::Color32::from_rgb(70, 60, 90),
        NodeKind::Normal => egui::Color32::from_rgb(40, 55, 75),
    };
    let stroke_color = if is_active {
        egui::Color32::from_rgb(255, 220, 120)
    } else if is_initial {
        egui::Color32::from_rgb(100, 220, 100)
    } else {
        egui::Color32::from_rgb(100, 120, 145)
    };
    let stroke_width = if is_active { 3.5 } else if is_initial { 3.0 } else { 1.5 };
    let corner_radius = 8.0 * zoom;

    painter.rect(
        screen,
        corner_radius,
        fill_color,
        egui::Stroke::new(stroke_width * zoom, stroke_color),
    );
    if kind == NodeKind::Parallel {
        // Dashed look for orthogonal regions
        painter.rect_stroke(
            screen.shrink(4.0 * zoom),
            corner_radius,
            egui::Stroke::new(1.0, egui::Color32::from_rgb(90, 110, 140)),
        );
    }

    painter.text(
        screen.min + egui::vec2(10.0 * zoom, 8.0 * zoom),
        egui::Align2::LEFT_TOP,
        name,
        egui::FontId::proportional(13.0 * zoom),
        egui::Color32::WHITE,
    );
}

/// Polyline with an arrowhead at the end
fn draw_arrow(painter: &egui::Painter, route: &[egui::Pos2], zoom: f32, color: egui::Color32) {
    if route.len() < 2 {
        return;
    }

    let stroke = egui::Stroke::new(1.5 * zoom, color);
    for pair in route.windows(2) {
        painter.line_segment([pair[0], pair[1]], stroke);
    }

    let last = route[route.len() - 1];
    let prev = route[route.len() - 2];
    let dir = (last - prev).normalized();

    let arrow_size = 10.0 * zoom;
    let arrow_angle = 0.4;

    let perp = egui::vec2(-dir.y, dir.x);
    let arrow_p1 = last - dir * arrow_size + perp * arrow_size * arrow_angle;
    let arrow_p2 = last - dir * arrow_size - perp * arrow_size * arrow_angle;

    painter.add(egui::Shape::convex_polygon(
        vec![last, arrow_p1, arrow_p2],
        color,
        egui::Stroke::NONE,
    ));
}
