use serde::{Deserialize, Serialize};

/// Axis-aligned pixel rectangle. `top`/`left` are signed so overscan
/// margins may start before the first image row or column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub top: i64,
    pub left: i64,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub const fn new(top: i64, left: i64, width: usize, height: usize) -> Self {
        Self {
            top,
            left,
            width,
            height,
        }
    }

    /// Rectangle covering a whole `width` x `height` plane.
    pub const fn plane(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    #[inline]
    pub fn bottom(&self) -> i64 {
        self.top + self.height as i64
    }

    #[inline]
    pub fn right(&self) -> i64 {
        self.left + self.width as i64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// True when the two rectangles share at least one pixel.
    pub fn intersects(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.left < other.right()
            && other.left < self.right()
            && self.top < other.bottom()
            && other.top < self.bottom()
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.intersects(other) {
            return None;
        }
        let top = self.top.max(other.top);
        let left = self.left.max(other.left);
        let bottom = self.bottom().min(other.bottom());
        let right = self.right().min(other.right());
        Some(Rect::new(
            top,
            left,
            (right - left) as usize,
            (bottom - top) as usize,
        ))
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Same size, moved so its top-left corner sits at `(x, y)`.
    pub fn translated_to(&self, x: i64, y: i64) -> Rect {
        Rect::new(y, x, self.width, self.height)
    }

    /// Grows the rectangle by `margin` pixels on every side.
    pub fn expanded(&self, margin: usize) -> Rect {
        Rect::new(
            self.top - margin as i64,
            self.left - margin as i64,
            self.width + 2 * margin,
            self.height + 2 * margin,
        )
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{top:{}, left:{}, w:{}, h:{}}}",
            self.top, self.left, self.width, self.height
        )
    }
}
