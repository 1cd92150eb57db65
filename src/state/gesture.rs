//! Pointer gesture tracking: turns down/move/up into stroke segments.

use crate::protocol::payload::{DEFAULT_WIDTH, NormalizedPoint, StrokeColor};

/// Drawing tool applied to locally generated segments.
#[derive(Debug, Clone, PartialEq)]
pub struct Pen {
    pub color: StrokeColor,
    pub width: f64,
    pub style: Option<String>,
}

impl Pen {
    #[must_use]
    pub fn eraser(width: f64) -> Self {
        Self { color: StrokeColor::Eraser, width, style: None }
    }
}

impl Default for Pen {
    fn default() -> Self {
        Self { color: StrokeColor::default(), width: DEFAULT_WIDTH, style: None }
    }
}

/// In-progress pointer gesture. Holds the last point seen since pointer-down.
#[derive(Debug, Clone, Default)]
pub struct Gesture {
    last: Option<NormalizedPoint>,
}

impl Gesture {
    pub fn down(&mut self, at: NormalizedPoint) {
        self.last = Some(at.clamped());
    }

    /// Extend the gesture to `to`. Returns the segment to draw, or `None` if
    /// no pointer is down.
    pub fn move_to(&mut self, to: NormalizedPoint) -> Option<(NormalizedPoint, NormalizedPoint)> {
        let from = self.last?;
        let to = to.clamped();
        self.last = Some(to);
        Some((from, to))
    }

    pub fn up(&mut self) {
        self.last = None;
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.last.is_some()
    }
}

#[cfg(test)]
#[path = "gesture_test.rs"]
mod tests;
