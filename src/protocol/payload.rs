//! Structural guards for drawing payloads.
//!
//! DESIGN
//! ======
//! Payloads arrive as untyped JSON inside a frame. Each guard here turns one
//! JSON fragment into a typed value or a [`PayloadError`]; nothing half-valid
//! leaves this module. Coordinates are device independent and always end up
//! inside the unit square: outbound points are clamped before they are
//! serialized, inbound finite points are clamped on the way in, and anything
//! non-numeric or non-finite is rejected outright.

use serde_json::{Map, Value};

/// Color token reserved for destructive compositing.
pub const ERASER_TOKEN: &str = "eraser";

/// Default ink color for local strokes.
pub const DEFAULT_INK: &str = "#be123c";

/// Default stroke width in surface units.
pub const DEFAULT_WIDTH: f64 = 2.0;

/// Longest accepted emote, in characters.
pub const MAX_EMOJI_CHARS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("missing field `{0}`")]
    Missing(&'static str),
    #[error("field `{0}` is not a number")]
    NotANumber(&'static str),
    #[error("field `{0}` is not finite")]
    NonFinite(&'static str),
    #[error("field `{0}` is not a string")]
    NotAString(&'static str),
    #[error("field `{0}` is not an object")]
    NotAnObject(&'static str),
    #[error("stroke width must be positive")]
    NonPositiveWidth,
    #[error("stroke color is blank")]
    BlankColor,
    #[error("emoji is blank")]
    BlankEmoji,
    #[error("emoji is too long")]
    EmojiTooLong,
}

// =============================================================================
// NORMALIZED POINT
// =============================================================================

/// A coordinate pair in the closed unit square.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    /// Build a point, clamping both axes into `[0, 1]`.
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x: clamp_unit(x), y: clamp_unit(y) }
    }

    /// Return this point with both axes clamped into `[0, 1]`.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self::new(self.x, self.y)
    }

    /// Map a position on a drawing surface of `width × height` into the unit
    /// square. Returns `None` for a degenerate surface.
    #[must_use]
    pub fn from_surface(px: f64, py: f64, width: f64, height: f64) -> Option<Self> {
        if !(width.is_finite() && height.is_finite()) || width <= 0.0 || height <= 0.0 {
            return None;
        }
        Some(Self::new(px / width, py / height))
    }

    fn to_value(self) -> Value {
        serde_json::json!({ "x": self.x, "y": self.y })
    }
}

/// Clamp one axis. NaN has no position and collapses to the origin edge.
fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

// =============================================================================
// STROKE
// =============================================================================

/// Color carried by a stroke.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StrokeColor {
    /// Subtract from the canvas instead of painting.
    Eraser,
    /// Any other color token, passed through to the renderer untouched.
    Ink(String),
}

impl StrokeColor {
    /// Parse a color token. Blank tokens are rejected.
    pub fn parse(token: &str) -> Result<Self, PayloadError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(PayloadError::BlankColor);
        }
        if token == ERASER_TOKEN {
            Ok(Self::Eraser)
        } else {
            Ok(Self::Ink(token.to_owned()))
        }
    }

    #[must_use]
    pub fn as_token(&self) -> &str {
        match self {
            Self::Eraser => ERASER_TOKEN,
            Self::Ink(token) => token,
        }
    }

    #[must_use]
    pub fn is_eraser(&self) -> bool {
        matches!(self, Self::Eraser)
    }
}

impl Default for StrokeColor {
    fn default() -> Self {
        Self::Ink(DEFAULT_INK.to_owned())
    }
}

/// One line segment between two normalized points.
#[derive(Clone, Debug, PartialEq)]
pub struct Stroke {
    pub from: NormalizedPoint,
    pub to: NormalizedPoint,
    pub color: StrokeColor,
    pub width: f64,
    /// Optional rendering-style tag (brush name); opaque to the protocol.
    pub style: Option<String>,
}

impl Stroke {
    /// Build a stroke, clamping both endpoints and checking the width.
    pub fn new(
        from: NormalizedPoint,
        to: NormalizedPoint,
        color: StrokeColor,
        width: f64,
        style: Option<String>,
    ) -> Result<Self, PayloadError> {
        Ok(Self {
            from: from.clamped(),
            to: to.clamped(),
            color,
            width: check_width(width)?,
            style: style.filter(|s| !s.trim().is_empty()),
        })
    }

    /// Parse the stroke fields of a `draw.stroke` payload.
    pub fn from_payload(data: &Value) -> Result<Self, PayloadError> {
        let from = parse_point(data.get("from"), "from")?;
        let to = parse_point(data.get("to"), "to")?;
        let color = match data.get("color") {
            None | Some(Value::Null) => return Err(PayloadError::Missing("color")),
            Some(Value::String(token)) => StrokeColor::parse(token)?,
            Some(_) => return Err(PayloadError::NotAString("color")),
        };
        let width = check_width(finite_number(data.get("width"), "width")?)?;
        let style = match data.get("style") {
            None | Some(Value::Null) => None,
            Some(Value::String(style)) if style.trim().is_empty() => None,
            Some(Value::String(style)) => Some(style.clone()),
            Some(_) => return Err(PayloadError::NotAString("style")),
        };
        Ok(Self { from, to, color, width, style })
    }

    /// Write the stroke fields into a payload object.
    pub fn write_payload(&self, out: &mut Map<String, Value>) {
        out.insert("from".into(), self.from.to_value());
        out.insert("to".into(), self.to.to_value());
        out.insert("color".into(), Value::String(self.color.as_token().to_owned()));
        out.insert("width".into(), serde_json::json!(self.width));
        if let Some(style) = &self.style {
            out.insert("style".into(), Value::String(style.clone()));
        }
    }
}

fn check_width(width: f64) -> Result<f64, PayloadError> {
    if !width.is_finite() {
        return Err(PayloadError::NonFinite("width"));
    }
    if width <= 0.0 {
        return Err(PayloadError::NonPositiveWidth);
    }
    Ok(width)
}

// =============================================================================
// GUARDS
// =============================================================================

/// Parse `{x, y}` into a clamped point.
pub fn parse_point(value: Option<&Value>, field: &'static str) -> Result<NormalizedPoint, PayloadError> {
    let point = match value {
        None | Some(Value::Null) => return Err(PayloadError::Missing(field)),
        Some(Value::Object(point)) => point,
        Some(_) => return Err(PayloadError::NotAnObject(field)),
    };
    let x = finite_number(point.get("x"), field)?;
    let y = finite_number(point.get("y"), field)?;
    Ok(NormalizedPoint::new(x, y))
}

fn finite_number(value: Option<&Value>, field: &'static str) -> Result<f64, PayloadError> {
    let number = match value {
        None | Some(Value::Null) => return Err(PayloadError::Missing(field)),
        Some(Value::Number(number)) => number.as_f64().ok_or(PayloadError::NonFinite(field))?,
        Some(_) => return Err(PayloadError::NotANumber(field)),
    };
    if number.is_finite() {
        Ok(number)
    } else {
        Err(PayloadError::NonFinite(field))
    }
}

/// Check an emote string: non-blank and short.
pub fn check_emoji(emoji: &str) -> Result<String, PayloadError> {
    let emoji = emoji.trim();
    if emoji.is_empty() {
        return Err(PayloadError::BlankEmoji);
    }
    if emoji.chars().count() > MAX_EMOJI_CHARS {
        return Err(PayloadError::EmojiTooLong);
    }
    Ok(emoji.to_owned())
}

#[cfg(test)]
#[path = "payload_test.rs"]
mod tests;
