//! Drag / Gesture Controller
//! Two orthogonal regions stepped side by side: `mode` decides when panning
//! is on (space lock, middle-button drag, explicit pan mode) and `panning`
//! runs the drag-session tracker while it is. Events raised by either region
//! go through one FIFO drained before [`DragController::handle`] returns.
//! Side effects are returned as [`DragEffect`] values for the host to apply.

pub mod session;


use std::collections::VecDeque;

use crate::config::EmbedOptions;
use crate::geometry::Point;
use crate::viewport::ViewportCommand;

pub use session::{DragSession, DragTracker, TrackerSignal, TrackerState};

// ============================================================================
// INPUT AND EFFECTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Left,
    Middle,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerInput {
    pub pointer_id: u64,
    pub button: PointerButton,
    /// Screen coordinates
    pub position: Point,
}

impl PointerInput {
    pub fn new(pointer_id: u64, button: PointerButton, position: Point) -> Self {
        Self {
            pointer_id,
            button,
            position,
        }
    }
}

/// Host input fed to the controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragEvent {
    SpaceDown,
    SpaceUp,
    PointerDown(PointerInput),
    PointerMove(PointerInput),
    PointerUp(PointerInput),
    PointerCancel(PointerInput),
    /// The pan-mode control was switched on
    EnterPanMode,
    ExitPanMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    Grab,
    Grabbing,
}

/// Side effects for the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragEffect {
    SetCursor(Cursor),
    ClearCursor,
    CapturePointer(u64),
    ReleasePointer(u64),
    DisableTextSelection,
    EnableTextSelection,
    /// Forward to the viewport as `PAN`
    Pan { dx: f64, dy: f64 },
}

impl DragEffect {
    pub fn viewport_command(&self) -> Option<ViewportCommand> {
        match *self {
            DragEffect::Pan { dx, dy } => Some(ViewportCommand::Pan { dx, dy }),
            _ => None,
        }
    }
}

// ============================================================================
// REGION STATES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Listening for space or a middle-button press
    Released,
    /// Space held
    Locked,
    /// Middle button held
    WheelPressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeState {
    Lockable(LockState),
    Pan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanningState {
    Disabled,
    Enabled(DragTracker),
}

/// Events raised inside a step
#[derive(Debug, Clone, Copy, PartialEq)]
enum Raised {
    EnablePanning(Option<DragSession>),
    DisablePanning,
    SessionStarted(DragSession),
    SessionStopped,
}

#[derive(Debug, Clone, PartialEq)]
enum ControllerState {
    /// Panning forbidden by the embedding; terminal
    PermanentlyDisabled,
    Running { mode: ModeState, panning: PanningState },
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct DragController {
    state: ControllerState,
    queue: VecDeque<Raised>,
}

impl DragController {
    /// The embedding is checked once here and never again
    pub fn new(embed: Option<EmbedOptions>) -> Self {
        let state = if embed.map_or(false, |e| !e.pan) {
            log::info!("panning disabled by embedding options");
            ControllerState::PermanentlyDisabled
        } else {
            ControllerState::Running {
                mode: ModeState::Lockable(LockState::Released),
                panning: PanningState::Disabled,
            }
        };
        Self {
            state,
            queue: VecDeque::new(),
        }
    }

    pub fn is_permanently_disabled(&self) -> bool {
        matches!(self.state, ControllerState::PermanentlyDisabled)
    }

    pub fn mode(&self) -> Option<ModeState> {
        match &self.state {
            ControllerState::Running { mode, .. } => Some(*mode),
            ControllerState::PermanentlyDisabled => None,
        }
    }

    pub fn is_panning_enabled(&self) -> bool {
        matches!(
            self.state,
            ControllerState::Running {
                panning: PanningState::Enabled(_),
                ..
            }
        )
    }

    pub fn tracker_state(&self) -> Option<TrackerState> {
        match &self.state {
            ControllerState::Running {
                panning: PanningState::Enabled(tracker),
                ..
            } => Some(tracker.state()),
            _ => None,
        }
    }

    /// Step both regions with `event`, then drain raised events
    pub fn handle(&mut self, event: DragEvent) -> Vec<DragEffect> {
        let mut effects = Vec::new();
        let ControllerState::Running { mode, panning } = &mut self.state else {
            return effects;
        };

        step_mode(mode, &event, &mut self.queue);
        step_panning(panning, &event, &mut self.queue, &mut effects);

        while let Some(raised) = self.queue.pop_front() {
            log::debug!("drag raised {:?}", raised);
            react_mode(mode, raised, &mut self.queue);
            react_panning(panning, raised, &mut self.queue, &mut effects);
        }
        effects
    }
}

// ============================================================================
// REGION LOGIC
// ============================================================================

fn step_mode(mode: &mut ModeState, event: &DragEvent, queue: &mut VecDeque<Raised>) {
    let next = match (*mode, event) {
        (ModeState::Lockable(LockState::Released), DragEvent::SpaceDown) => {
            Some((ModeState::Lockable(LockState::Locked), None))
        }
        (ModeState::Lockable(LockState::Released), DragEvent::PointerDown(pointer))
            if pointer.button == PointerButton::Middle =>
        {
            let seed = DragSession {
                pointer_id: pointer.pointer_id,
                point: pointer.position,
            };
            Some((ModeState::Lockable(LockState::WheelPressed), Some(seed)))
        }
        (ModeState::Lockable(LockState::Locked), DragEvent::SpaceUp) => {
            Some((ModeState::Lockable(LockState::Released), None))
        }
        (ModeState::Lockable(_), DragEvent::EnterPanMode) => Some((ModeState::Pan, None)),
        (ModeState::Pan, DragEvent::ExitPanMode) => Some((ModeState::Lockable(LockState::Released), None)),
        _ => None,
    };

    if let Some((target, seed)) = next {
        transition_mode(mode, target, seed, queue);
    }
}

fn react_mode(mode: &mut ModeState, raised: Raised, queue: &mut VecDeque<Raised>) {
    if let (ModeState::Lockable(LockState::WheelPressed), Raised::SessionStopped) = (*mode, raised) {
        transition_mode(mode, ModeState::Lockable(LockState::Released), None, queue);
    }
}

fn panning_active(mode: ModeState) -> bool {
    !matches!(mode, ModeState::Lockable(LockState::Released))
}

/// Exit raises `DisablePanning`, entry raises `EnablePanning`
fn transition_mode(mode: &mut ModeState, target: ModeState, seed: Option<DragSession>, queue: &mut VecDeque<Raised>) {
    log::debug!("drag mode {:?} -> {:?}", mode, target);
    if panning_active(*mode) {
        queue.push_back(Raised::DisablePanning);
    }
    *mode = target;
    if panning_active(target) {
        queue.push_back(Raised::EnablePanning(seed));
    }
}

fn step_panning(
    panning: &mut PanningState,
    event: &DragEvent,
    queue: &mut VecDeque<Raised>,
    effects: &mut Vec<DragEffect>,
) {
    if let PanningState::Enabled(tracker) = panning {
        if let Some(signal) = tracker.handle(event, effects) {
            queue.push_back(signal_to_raised(signal));
        }
    }
}

fn react_panning(
    panning: &mut PanningState,
    raised: Raised,
    queue: &mut VecDeque<Raised>,
    effects: &mut Vec<DragEffect>,
) {
    match raised {
        Raised::EnablePanning(seed) if matches!(panning, PanningState::Disabled) => {
            effects.push(DragEffect::DisableTextSelection);
            let (tracker, signal) = DragTracker::start(seed, effects);
            if let Some(signal) = signal {
                queue.push_back(signal_to_raised(signal));
            }
            *panning = PanningState::Enabled(tracker);
        }
        Raised::DisablePanning => {
            if let PanningState::Enabled(tracker) = std::mem::replace(panning, PanningState::Disabled) {
                tracker.stop(effects);
                effects.push(DragEffect::EnableTextSelection);
            }
        }
        Raised::SessionStarted(session) => {
            log::debug!("panning with pointer {}", session.pointer_id);
        }
        _ => {}
    }
}

fn signal_to_raised(signal: TrackerSignal) -> Raised {
    match signal {
        TrackerSignal::Started(session) => Raised::SessionStarted(session),
        TrackerSignal::Stopped => Raised::SessionStopped,
    }
}
