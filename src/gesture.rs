use std::time::{Duration, Instant};

/// Downward travel past which releasing dismisses the detail view.
pub const DISMISS_THRESHOLD_PX: f32 = 100.0;
/// Travel over which the overlay fades from 1.0 towards `MIN_OPACITY`.
pub const FADE_DISTANCE_PX: f32 = 500.0;
pub const MIN_OPACITY: f32 = 0.3;
pub const SETTLE_DURATION: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchTarget {
    Overlay,
    Photo,
    /// Caption, actions and comments. Drags starting here scroll instead.
    Sidebar,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragFrame {
    pub offset_px: f32,
    pub opacity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeOutcome {
    Ignored,
    SnapBack,
    Dismiss,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    Dragging { start_y: f32 },
    Dismissing { until: Instant },
}

/// Vertical swipe-to-dismiss on the detail overlay.
///
/// Besides the phase it keeps what the overlay should look like right now: the
/// vertical offset, the opacity and whether changes are animated. `tick` reports
/// when a dismiss animation has finished and the view should close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwipeGesture {
    phase: Phase,
    offset_px: f32,
    off_screen: bool,
    opacity: f32,
    animated: bool,
}

impl Default for SwipeGesture {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            offset_px: 0.0,
            off_screen: false,
            opacity: 1.0,
            animated: true,
        }
    }
}

impl SwipeGesture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.phase, Phase::Dragging { .. })
    }

    pub fn is_dismissing(&self) -> bool {
        matches!(self.phase, Phase::Dismissing { .. })
    }

    pub fn offset_px(&self) -> f32 {
        self.offset_px
    }

    pub fn off_screen(&self) -> bool {
        self.off_screen
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn animated(&self) -> bool {
        self.animated
    }

    pub fn start(&mut self, y: f32, target: TouchTarget) -> bool {
        if self.is_dismissing() || target == TouchTarget::Sidebar {
            return false;
        }
        self.phase = Phase::Dragging { start_y: y };
        self.animated = false;
        true
    }

    pub fn drag(&mut self, y: f32) -> Option<DragFrame> {
        let Phase::Dragging { start_y } = self.phase else {
            return None;
        };
        let delta = y - start_y;
        if delta <= 0.0 {
            return None;
        }
        let frame = DragFrame {
            offset_px: delta,
            opacity: (1.0 - delta / FADE_DISTANCE_PX).max(MIN_OPACITY),
        };
        self.offset_px = frame.offset_px;
        self.opacity = frame.opacity;
        Some(frame)
    }

    pub fn end(&mut self, y: f32, now: Instant) -> SwipeOutcome {
        let Phase::Dragging { start_y } = self.phase else {
            return SwipeOutcome::Ignored;
        };
        self.animated = true;
        if y - start_y > DISMISS_THRESHOLD_PX {
            self.off_screen = true;
            self.opacity = 0.0;
            self.phase = Phase::Dismissing {
                until: now + SETTLE_DURATION,
            };
            SwipeOutcome::Dismiss
        } else {
            self.offset_px = 0.0;
            self.opacity = 1.0;
            self.phase = Phase::Idle;
            SwipeOutcome::SnapBack
        }
    }

    /// Returns `true` once, when a dismiss animation completes; presentation is reset then.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.phase {
            Phase::Dismissing { until } if now >= until => {
                *self = Self::default();
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Dismissing { until } => Some(until),
            _ => None,
        }
    }

    /// Drops any drag or animation in progress.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
