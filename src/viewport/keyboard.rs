//! Keyboard and wheel input mapped to viewport commands

use crate::geometry::Point;

use super::{ViewportCommand, WHEEL_ZOOM_FACTOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Char(char),
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    /// Cmd on macOS, the Windows/Super key elsewhere
    pub meta: bool,
}

impl Modifiers {
    /// Cmd on macOS, Ctrl elsewhere
    pub fn platform_meta(&self, mac: bool) -> bool {
        if mac {
            self.meta
        } else {
            self.ctrl
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyInput {
    pub key: Key,
    pub modifiers: Modifiers,
    /// Focus is inside a text field
    pub in_text_input: bool,
}

impl KeyInput {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            modifiers: Modifiers::default(),
            in_text_input: false,
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelInput {
    pub delta_x: f64,
    pub delta_y: f64,
    /// Cursor in screen coordinates
    pub position: Point,
    pub modifiers: Modifiers,
}

/// Arrow keys pan (the view moves against the arrow), `+`/`=` and `-` zoom,
/// Shift+`1` fits to content
pub fn map_key(input: &KeyInput, mac: bool) -> Option<ViewportCommand> {
    if input.in_text_input {
        return None;
    }
    let m = input.modifiers;
    let long = m.shift;

    match input.key {
        Key::ArrowUp => Some(ViewportCommand::PanDown { long }),
        Key::ArrowDown => Some(ViewportCommand::PanUp { long }),
        Key::ArrowLeft => Some(ViewportCommand::PanRight { long }),
        Key::ArrowRight => Some(ViewportCommand::PanLeft { long }),
        Key::Char('+') | Key::Char('=') if !m.platform_meta(mac) && !m.shift => {
            Some(ViewportCommand::zoom_in())
        }
        Key::Char('-') if !m.platform_meta(mac) && !m.shift => Some(ViewportCommand::zoom_out()),
        Key::Char('1') | Key::Char('!') if m.shift => Some(ViewportCommand::FitToContent),
        _ => None,
    }
}

/// Platform-meta + wheel zooms at the cursor, a plain wheel pans
pub fn map_wheel(input: &WheelInput, mac: bool) -> Option<ViewportCommand> {
    let m = input.modifiers;

    if m.platform_meta(mac) {
        let point = Some(input.position);
        let factor = Some(WHEEL_ZOOM_FACTOR);
        if input.delta_y > 0.0 {
            return Some(ViewportCommand::ZoomOut { point, factor });
        }
        if input.delta_y < 0.0 {
            return Some(ViewportCommand::ZoomIn { point, factor });
        }
        return None;
    }

    if !m.meta && !m.ctrl {
        return Some(ViewportCommand::Pan {
            dx: input.delta_x,
            dy: input.delta_y,
        });
    }
    None
}
