//! Drag-session tracker: `idle` → `active.grabbed` → `active.dragging` → `idle`

use crate::geometry::Point;

use super::{Cursor, DragEffect, DragEvent, PointerButton};

/// The pointer owning a drag and its last known position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragSession {
    pub pointer_id: u64,
    pub point: Point,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackerState {
    /// Waiting for a left-button pointer-down
    Idle,
    /// Pointer captured, not moved yet
    Grabbed(DragSession),
    Dragging(DragSession),
}

/// Signals the tracker raises to its parent
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackerSignal {
    Started(DragSession),
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DragTracker {
    state: TrackerState,
}

impl DragTracker {
    /// Start the tracker; a seed skips `idle` and activates immediately
    pub fn start(seed: Option<DragSession>, effects: &mut Vec<DragEffect>) -> (Self, Option<TrackerSignal>) {
        let mut tracker = Self {
            state: TrackerState::Idle,
        };
        let signal = match seed {
            Some(session) => Some(tracker.activate(session, effects)),
            None => {
                tracker.enter_idle(effects);
                None
            }
        };
        (tracker, signal)
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, TrackerState::Idle)
    }

    pub fn handle(&mut self, event: &DragEvent, effects: &mut Vec<DragEffect>) -> Option<TrackerSignal> {
        match (self.state, event) {
            (TrackerState::Idle, DragEvent::PointerDown(pointer)) if pointer.button == PointerButton::Left => {
                let session = DragSession {
                    pointer_id: pointer.pointer_id,
                    point: pointer.position,
                };
                Some(self.activate(session, effects))
            }
            (
                TrackerState::Grabbed(session) | TrackerState::Dragging(session),
                DragEvent::PointerMove(pointer),
            ) if pointer.pointer_id == session.pointer_id => {
                // The view moves opposite to the pointer's travel
                effects.push(DragEffect::Pan {
                    dx: -(pointer.position.x - session.point.x),
                    dy: -(pointer.position.y - session.point.y),
                });
                self.state = TrackerState::Dragging(DragSession {
                    pointer_id: session.pointer_id,
                    point: pointer.position,
                });
                None
            }
            (
                TrackerState::Grabbed(session) | TrackerState::Dragging(session),
                DragEvent::PointerUp(pointer) | DragEvent::PointerCancel(pointer),
            ) if pointer.pointer_id == session.pointer_id => {
                effects.push(DragEffect::ReleasePointer(session.pointer_id));
                log::debug!("drag session for pointer {} done", session.pointer_id);
                self.enter_idle(effects);
                Some(TrackerSignal::Stopped)
            }
            _ => None,
        }
    }

    /// Tear down when panning is disabled
    pub fn stop(self, effects: &mut Vec<DragEffect>) {
        if let TrackerState::Grabbed(session) | TrackerState::Dragging(session) = self.state {
            effects.push(DragEffect::ReleasePointer(session.pointer_id));
        }
        effects.push(DragEffect::ClearCursor);
    }

    fn activate(&mut self, session: DragSession, effects: &mut Vec<DragEffect>) -> TrackerSignal {
        effects.push(DragEffect::CapturePointer(session.pointer_id));
        effects.push(DragEffect::SetCursor(Cursor::Grabbing));
        self.state = TrackerState::Grabbed(session);
        log::debug!("drag session started for pointer {}", session.pointer_id);
        TrackerSignal::Started(session)
    }

    fn enter_idle(&mut self, effects: &mut Vec<DragEffect>) {
        self.state = TrackerState::Idle;
        effects.push(DragEffect::SetCursor(Cursor::Grab));
    }
}
