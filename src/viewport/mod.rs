//! Viewport / Canvas Controller
//! Zoom about a point, pan, fit-to-content and debounced persistence of the
//! canvas position. All arithmetic is synchronous; time only enters through
//! the `now` passed to [`CanvasController::handle`] and [`CanvasController::poll`].

pub mod keyboard;
pub mod store;


use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::EmbedOptions;
use crate::geometry::{Point, Rect};

pub use keyboard::{map_key, map_wheel, Key, KeyInput, Modifiers, WheelInput};
pub use store::{JsonFileStore, MemoryStore, PositionStore, StoreError};

// ============================================================================
// CONSTANTS
// ============================================================================

pub const MIN_ZOOM: f64 = 0.1;
pub const MAX_ZOOM: f64 = 2.0;
/// Default step for zoom buttons and keys
pub const ZOOM_FACTOR: f64 = 1.15;
/// Slower step for wheel zoom
pub const WHEEL_ZOOM_FACTOR: f64 = 1.09;
pub const PAN_STEP: f64 = 10.0;
pub const LONG_PAN_STEP: f64 = 50.0;
/// Fit-to-content leaves a 10% margin
pub const FIT_MARGIN: f64 = 0.9;
/// Quiet period before a position is persisted
pub const SAVE_DELAY: Duration = Duration::from_millis(300);

const JOURNAL_LIMIT: usize = 64;

// ============================================================================
// VALUE TYPES
// ============================================================================

/// Zoom plus the top-left of the visible area, in zoomed units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportPosition {
    pub zoom: f64,
    pub viewbox: Point,
}

impl Default for ViewportPosition {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            viewbox: Point::ZERO,
        }
    }
}

/// Commands accepted by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum ViewportCommand {
    /// Zoom in about `point` (panel center when `None`) by `factor` (1.15 when `None`)
    ZoomIn {
        point: Option<Point>,
        factor: Option<f64>,
    },
    /// Zoom out by the reciprocal of `factor`
    ZoomOut {
        point: Option<Point>,
        factor: Option<f64>,
    },
    Pan {
        dx: f64,
        dy: f64,
    },
    PanLeft {
        long: bool,
    },
    PanRight {
        long: bool,
    },
    PanUp {
        long: bool,
    },
    PanDown {
        long: bool,
    },
    PositionReset,
    FitToContent,
    /// On-screen placement of the canvas panel
    CanvasRectChanged(Rect),
    /// A new layout arrived; stores its size and fits to it
    LayoutUpdated {
        width: f64,
        height: f64,
    },
    /// The displayed machine changed; restores its persisted position
    SourceChanged(String),
}

impl ViewportCommand {
    pub fn zoom_in() -> Self {
        Self::ZoomIn {
            point: None,
            factor: None,
        }
    }

    pub fn zoom_out() -> Self {
        Self::ZoomOut {
            point: None,
            factor: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ZoomDirection {
    In,
    Out,
}

/// One applied zoom step, kept so the opposite step can restore `before` exactly
#[derive(Debug, Clone, Copy, PartialEq)]
struct ZoomStep {
    direction: ZoomDirection,
    factor: f64,
    anchor: Point,
    before: ViewportPosition,
    after: ViewportPosition,
}

/// Persistence debounce: `idle` until a mutation, `throttling` until quiet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveCycle {
    Idle,
    Throttling { deadline: Instant },
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct CanvasController {
    position: ViewportPosition,
    panel: Rect,
    /// Width/height of the latest layout
    content: Option<(f64, f64)>,
    embed: Option<EmbedOptions>,
    /// Key under which the position is persisted
    source: Option<String>,
    journal: VecDeque<ZoomStep>,
    save: SaveCycle,
    store: Box<dyn PositionStore>,
}

impl CanvasController {
    pub fn new(store: Box<dyn PositionStore>) -> Self {
        Self {
            position: ViewportPosition::default(),
            panel: Rect::default(),
            content: None,
            embed: None,
            source: None,
            journal: VecDeque::new(),
            save: SaveCycle::Idle,
            store,
        }
    }

    pub fn with_embed(mut self, embed: EmbedOptions) -> Self {
        self.embed = Some(embed);
        self
    }

    pub fn position(&self) -> ViewportPosition {
        self.position
    }

    pub fn zoom(&self) -> f64 {
        self.position.zoom
    }

    pub fn viewbox(&self) -> Point {
        self.position.viewbox
    }

    pub fn panel(&self) -> Rect {
        self.panel
    }

    pub fn save_cycle(&self) -> SaveCycle {
        self.save
    }

    pub fn store(&self) -> &dyn PositionStore {
        self.store.as_ref()
    }

    pub fn is_embedded(&self) -> bool {
        self.embed.is_some()
    }

    pub fn can_zoom(&self) -> bool {
        self.embed.map_or(true, |e| e.zoom)
    }

    pub fn can_pan(&self) -> bool {
        self.embed.map_or(true, |e| e.pan)
    }

    /// Content coordinates to screen coordinates
    pub fn to_screen(&self, content: Point) -> Point {
        let ViewportPosition { zoom, viewbox } = self.position;
        Point::new(
            content.x * zoom - viewbox.x + self.panel.x,
            content.y * zoom - viewbox.y + self.panel.y,
        )
    }

    /// Screen coordinates to content coordinates
    pub fn to_content(&self, screen: Point) -> Point {
        let ViewportPosition { zoom, viewbox } = self.position;
        Point::new(
            (screen.x - self.panel.x + viewbox.x) / zoom,
            (screen.y - self.panel.y + viewbox.y) / zoom,
        )
    }

    /// Apply a command; returns whether zoom or viewbox changed
    pub fn handle(&mut self, command: ViewportCommand, now: Instant) -> bool {
        log::debug!("viewport command {:?}", command);
        let before = self.position;

        match command {
            ViewportCommand::ZoomIn { point, factor } => {
                if !self.can_zoom() || self.position.zoom >= MAX_ZOOM {
                    return false;
                }
                self.zoom_step(ZoomDirection::In, point, factor.unwrap_or(ZOOM_FACTOR));
            }
            ViewportCommand::ZoomOut { point, factor } => {
                if !self.can_zoom() || self.position.zoom <= MIN_ZOOM {
                    return false;
                }
                self.zoom_step(ZoomDirection::Out, point, factor.unwrap_or(ZOOM_FACTOR));
            }
            ViewportCommand::Pan { dx, dy } => {
                if !self.can_pan() {
                    return false;
                }
                self.pan_by(dx, dy);
            }
            ViewportCommand::PanLeft { long } => {
                if !self.can_pan() {
                    return false;
                }
                self.pan_by(-pan_step(long), 0.0);
            }
            ViewportCommand::PanRight { long } => {
                if !self.can_pan() {
                    return false;
                }
                self.pan_by(pan_step(long), 0.0);
            }
            ViewportCommand::PanUp { long } => {
                if !self.can_pan() {
                    return false;
                }
                self.pan_by(0.0, -pan_step(long));
            }
            ViewportCommand::PanDown { long } => {
                if !self.can_pan() {
                    return false;
                }
                self.pan_by(0.0, pan_step(long));
            }
            ViewportCommand::PositionReset => {
                self.journal.clear();
                self.position = ViewportPosition::default();
            }
            ViewportCommand::FitToContent => self.fit_to_content(),
            ViewportCommand::CanvasRectChanged(rect) => {
                self.panel = rect;
                return false;
            }
            ViewportCommand::LayoutUpdated { width, height } => {
                self.content = Some((width, height));
                self.fit_to_content();
            }
            ViewportCommand::SourceChanged(source) => {
                self.restore(&source);
                self.source = Some(source);
                // Restoring is not a user mutation
                return self.position != before;
            }
        }

        let changed = self.position != before;
        if changed {
            self.schedule_save(now);
        }
        changed
    }

    /// Advance the save debounce; returns `Ok(true)` when a position was persisted
    pub fn poll(&mut self, now: Instant) -> Result<bool, StoreError> {
        match self.save {
            SaveCycle::Throttling { deadline } if now >= deadline => {
                self.save = SaveCycle::Idle;
                self.persist()
            }
            _ => Ok(false),
        }
    }

    fn schedule_save(&mut self, now: Instant) {
        self.save = SaveCycle::Throttling {
            deadline: now + SAVE_DELAY,
        };
    }

    fn persist(&mut self) -> Result<bool, StoreError> {
        if self.is_embedded() {
            return Ok(false);
        }
        let Some(source) = self.source.as_deref() else {
            log::debug!("no source to persist viewport under");
            return Ok(false);
        };
        self.store.save(source, self.position)?;
        log::debug!("persisted viewport for '{}'", source);
        Ok(true)
    }

    fn restore(&mut self, source: &str) {
        if self.is_embedded() {
            return;
        }
        match self.store.load(source) {
            Ok(Some(position)) => {
                self.journal.clear();
                self.position = ViewportPosition {
                    zoom: position.zoom.clamp(MIN_ZOOM, MAX_ZOOM),
                    viewbox: position.viewbox,
                };
                log::debug!("restored viewport for '{}'", source);
            }
            Ok(None) => {}
            Err(err) => log::warn!("failed to restore viewport for '{}': {}", source, err),
        }
    }

    fn pan_by(&mut self, dx: f64, dy: f64) {
        self.journal.clear();
        self.position.viewbox = self.position.viewbox.offset(dx, dy);
    }

    fn zoom_step(&mut self, direction: ZoomDirection, point: Option<Point>, factor: f64) {
        let anchor = point.unwrap_or_else(|| self.panel.center());

        // The opposite of the last step restores the journaled state exactly
        if let Some(last) = self.journal.back().copied() {
            if last.direction != direction
                && last.factor == factor
                && last.anchor == anchor
                && last.after == self.position
            {
                self.journal.pop_back();
                self.position = last.before;
                return;
            }
        }

        let before = self.position;
        let multiplier = match direction {
            ZoomDirection::In => factor,
            ZoomDirection::Out => 1.0 / factor,
        };
        let zoom = (before.zoom * multiplier).clamp(MIN_ZOOM, MAX_ZOOM);
        let ratio = zoom / before.zoom;
        let local = Point::new(anchor.x - self.panel.x, anchor.y - self.panel.y);

        self.position = ViewportPosition {
            zoom,
            viewbox: Point::new(
                (local.x + before.viewbox.x) * ratio - local.x,
                (local.y + before.viewbox.y) * ratio - local.y,
            ),
        };

        if self.journal.len() == JOURNAL_LIMIT {
            self.journal.pop_front();
        }
        self.journal.push_back(ZoomStep {
            direction,
            factor,
            anchor,
            before,
            after: self.position,
        });
    }

    fn fit_to_content(&mut self) {
        let Some((content_width, content_height)) = self.content else {
            log::debug!("fit requested before any layout");
            return;
        };
        let (panel_width, panel_height) = (self.panel.width, self.panel.height);
        if content_width <= 0.0 || content_height <= 0.0 || panel_width <= 0.0 || panel_height <= 0.0 {
            log::debug!("skipping fit for empty content or panel");
            return;
        }

        let zoom = ((panel_width / content_width)
            .min(panel_height / content_height)
            .min(MAX_ZOOM)
            * FIT_MARGIN)
            .max(MIN_ZOOM);

        self.journal.clear();
        self.position = ViewportPosition {
            zoom,
            viewbox: Point::new(
                content_width * zoom / 2.0 - panel_width / 2.0,
                content_height * zoom / 2.0 - panel_height / 2.0,
            ),
        };
    }
}

fn pan_step(long: bool) -> f64 {
    if long {
        LONG_PAN_STEP
    } else {
        PAN_STEP
    }
}
