// SPDX-License-Identifier: MPL-2.0

//! Plain size and rectangle types shared across the crate

use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer size in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both dimensions are non-zero
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Width and height swapped
    pub fn transposed(self) -> Self {
        Self::new(self.height, self.width)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Floating point rectangle in item coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn left(&self) -> f64 {
        self.x
    }

    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Scale `size` to fit inside this rectangle keeping its aspect ratio and center
    /// the result. An empty `size` fills the whole rectangle.
    pub fn fit(&self, size: Size) -> Rect {
        let (width, height) = if size.is_valid() {
            let scale = (self.width / size.width as f64).min(self.height / size.height as f64);
            (size.width as f64 * scale, size.height as f64 * scale)
        } else {
            (self.width, self.height)
        };
        let (cx, cy) = self.center();
        Rect::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_letterboxes_wide_content() {
        let bounds = Rect::new(0.0, 0.0, 400.0, 400.0);
        let fitted = bounds.fit(Size::new(640, 320));
        assert_eq!(fitted, Rect::new(0.0, 100.0, 400.0, 200.0));
    }

    #[test]
    fn test_fit_empty_size_fills_bounds() {
        let bounds = Rect::new(10.0, 20.0, 300.0, 200.0);
        assert_eq!(bounds.fit(Size::default()), bounds);
    }

    #[test]
    fn test_transposed() {
        assert_eq!(Size::new(640, 480).transposed(), Size::new(480, 640));
    }
}
