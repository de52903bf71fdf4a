use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::foundation::error::{RavelError, RavelResult};

pub use kurbo::Affine;

/// Timeline position in frames. Fractional times are legal (retimers).
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct TimeValue(pub f64);

impl TimeValue {
    /// Nearest integer frame.
    pub fn round_nearest(self) -> i64 {
        self.0.round() as i64
    }

    /// Stable bit pattern used when the time participates in a map key.
    pub(crate) fn key_bits(self) -> u64 {
        // Normalize -0.0 so it keys identically to 0.0.
        if self.0 == 0.0 { 0u64 } else { self.0.to_bits() }
    }
}

impl PartialEq for TimeValue {
    fn eq(&self, other: &Self) -> bool {
        self.key_bits() == other.key_bits()
    }
}

impl Eq for TimeValue {}

impl std::hash::Hash for TimeValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key_bits().hash(state);
    }
}

/// Index of one view in a multi-view project (left/right eye, etc.).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct ViewIdx(pub u32);

/// Mip-map resolution tier. Level 0 is full resolution; each level halves it.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize,
    serde::Deserialize,
)]
pub struct MipLevel(pub u32);

/// Proxy render scale applied on top of the mip level.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct RenderScale {
    /// Horizontal scale factor, in (0, 1].
    pub x: f64,
    /// Vertical scale factor, in (0, 1].
    pub y: f64,
}

impl RenderScale {
    /// Full-resolution scale.
    pub fn identity() -> Self {
        Self { x: 1.0, y: 1.0 }
    }

    /// Stable bit pattern used when the scale participates in a map key.
    pub(crate) fn key_bits(self) -> (u64, u64) {
        (self.x.to_bits(), self.y.to_bits())
    }
}

impl Default for RenderScale {
    fn default() -> Self {
        Self::identity()
    }
}

impl PartialEq for RenderScale {
    fn eq(&self, other: &Self) -> bool {
        self.key_bits() == other.key_bits()
    }
}

impl Eq for RenderScale {}

impl std::hash::Hash for RenderScale {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key_bits().hash(state);
    }
}

/// Description of one image plane an effect can produce or consume.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PlaneDesc {
    /// Plane identifier ("RGBA", "A", "motion", ...).
    pub name: String,
    /// Component count per pixel, 1..=4.
    pub num_comps: u8,
}

impl PlaneDesc {
    /// Build a plane description, validating the component count.
    pub fn new(name: impl Into<String>, num_comps: u8) -> RavelResult<Self> {
        if num_comps == 0 || num_comps > 4 {
            return Err(RavelError::validation("PlaneDesc num_comps must be 1..=4"));
        }
        Ok(Self { name: name.into(), num_comps })
    }

    /// The standard 4-component color plane.
    pub fn rgba() -> Self {
        Self { name: "RGBA".to_string(), num_comps: 4 }
    }

    /// The single-channel alpha plane.
    pub fn alpha() -> Self {
        Self { name: "A".to_string(), num_comps: 1 }
    }
}

/// Axis-aligned integer rectangle in pixel coordinates, half-open on the
/// upper edges: `x1 <= x < x2`, `y1 <= y < y2`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct RectI {
    /// Left edge (inclusive).
    pub x1: i32,
    /// Bottom edge (inclusive).
    pub y1: i32,
    /// Right edge (exclusive).
    pub x2: i32,
    /// Top edge (exclusive).
    pub y2: i32,
}

impl RectI {
    /// Build a rectangle from its edges.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Width in pixels; zero when degenerate.
    pub fn width(self) -> u32 {
        (self.x2.saturating_sub(self.x1)).max(0) as u32
    }

    /// Height in pixels; zero when degenerate.
    pub fn height(self) -> u32 {
        (self.y2.saturating_sub(self.y1)).max(0) as u32
    }

    /// True when the rectangle covers no pixels.
    pub fn is_empty(self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    /// Smallest rectangle containing both operands. An empty operand
    /// contributes nothing.
    pub fn union(self, other: RectI) -> RectI {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        RectI {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    /// Overlap of both operands; possibly empty.
    pub fn intersect(self, other: RectI) -> RectI {
        let r = RectI {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        };
        if r.is_empty() { RectI::default() } else { r }
    }

    /// True when `other` lies entirely within `self`.
    pub fn contains(self, other: RectI) -> bool {
        if other.is_empty() {
            return true;
        }
        self.x1 <= other.x1 && self.y1 <= other.y1 && self.x2 >= other.x2 && self.y2 >= other.y2
    }
}

/// One produced image plane: pixel data over an integer bounds rectangle.
///
/// Pixels are `f32` components, row-major, `plane.num_comps` per pixel.
#[derive(Clone, Debug)]
pub struct ImagePlane {
    /// Which plane this image carries.
    pub plane: PlaneDesc,
    /// Pixel-space bounds of the data.
    pub bounds: RectI,
    /// Component data, `bounds.width() * bounds.height() * num_comps` long.
    pub pixels: Arc<Vec<f32>>,
}

impl ImagePlane {
    /// Allocate a zero-filled plane over `bounds`.
    pub fn new_zeroed(plane: PlaneDesc, bounds: RectI) -> Self {
        let len =
            bounds.width() as usize * bounds.height() as usize * plane.num_comps as usize;
        Self { plane, bounds, pixels: Arc::new(vec![0.0; len]) }
    }

    /// Expected component count for the bounds/plane pair.
    pub fn expected_len(&self) -> usize {
        self.bounds.width() as usize
            * self.bounds.height() as usize
            * self.plane.num_comps as usize
    }
}

/// Cloneable cooperative-cancellation flag threaded through long-running
/// calls. Cancellation is sticky: once set it never clears.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Poll the flag at a safe point.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
