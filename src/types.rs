//! Geometry and color primitives shared by the render pipeline.
//!
//! Integer vectors are used for everything that ends up on the pixel grid;
//! floating point vectors carry scale factors and animated offsets.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Neg, Sub};

/// Integer 2D vector, used for positions and sizes in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IVec2 {
    pub x: i32,
    pub y: i32,
}

impl IVec2 {
    pub const ZERO: IVec2 = IVec2 { x: 0, y: 0 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn as_vec2(self) -> Vec2 {
        Vec2::new(self.x as f64, self.y as f64)
    }

    /// Scales each component, rounding the result down.
    pub fn scale_floor(self, scale: Vec2) -> IVec2 {
        Vec2::new(self.x as f64 * scale.x, self.y as f64 * scale.y)
            .floor()
            .as_ivec2()
    }

    /// Scales each component, rounding the result up.
    pub fn scale_ceil(self, scale: Vec2) -> IVec2 {
        Vec2::new(self.x as f64 * scale.x, self.y as f64 * scale.y)
            .ceil()
            .as_ivec2()
    }
}

impl Add for IVec2 {
    type Output = IVec2;

    fn add(self, rhs: IVec2) -> IVec2 {
        IVec2::new(self.x.saturating_add(rhs.x), self.y.saturating_add(rhs.y))
    }
}

impl Sub for IVec2 {
    type Output = IVec2;

    fn sub(self, rhs: IVec2) -> IVec2 {
        IVec2::new(self.x.saturating_sub(rhs.x), self.y.saturating_sub(rhs.y))
    }
}

impl Neg for IVec2 {
    type Output = IVec2;

    fn neg(self) -> IVec2 {
        IVec2::new(-self.x, -self.y)
    }
}

/// Floating point 2D vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    /// Identity scale factor.
    pub const IDENTITY: Vec2 = Vec2 { x: 1.0, y: 1.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn floor(self) -> Vec2 {
        Vec2::new(self.x.floor(), self.y.floor())
    }

    pub fn ceil(self) -> Vec2 {
        Vec2::new(self.x.ceil(), self.y.ceil())
    }

    /// Converts to integers, truncating toward zero and saturating at the
    /// `i32` range. NaN becomes zero.
    pub fn as_ivec2(self) -> IVec2 {
        IVec2::new(self.x as i32, self.y as i32)
    }

    pub fn scale(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x * other.x, self.y * other.y)
    }

    pub fn is_identity(self) -> bool {
        self == Self::IDENTITY
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

/// Axis aligned box with an integer origin and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IBox {
    pub origin: IVec2,
    pub size: IVec2,
}

impl IBox {
    pub const fn new(origin: IVec2, size: IVec2) -> Self {
        Self { origin, size }
    }

    pub const fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            origin: IVec2::new(x, y),
            size: IVec2::new(width, height),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size.x <= 0 || self.size.y <= 0
    }

    /// Returns true if the two boxes share at least one pixel. Empty boxes
    /// never overlap anything.
    pub fn overlaps(&self, other: &IBox) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        let (ax2, ay2) = self.far_corner();
        let (bx2, by2) = other.far_corner();
        ax2 > other.origin.x as i64
            && ay2 > other.origin.y as i64
            && bx2 > self.origin.x as i64
            && by2 > self.origin.y as i64
    }

    /// Returns true if `other` lies entirely inside this box.
    pub fn contains(&self, other: &IBox) -> bool {
        let (ax2, ay2) = self.far_corner();
        let (bx2, by2) = other.far_corner();
        other.origin.x >= self.origin.x
            && other.origin.y >= self.origin.y
            && bx2 <= ax2
            && by2 <= ay2
    }

    fn far_corner(&self) -> (i64, i64) {
        (
            self.origin.x as i64 + self.size.x as i64,
            self.origin.y as i64 + self.size.y as i64,
        )
    }
}

/// Straight alpha RGBA color with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Color {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub alpha: f64,
}

impl Color {
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ibox_overlap() {
        let a = IBox::from_xywh(0, 0, 10, 10);
        assert!(a.overlaps(&IBox::from_xywh(5, 5, 10, 10)));
        assert!(!a.overlaps(&IBox::from_xywh(10, 0, 10, 10)));
        assert!(!a.overlaps(&IBox::from_xywh(-10, -10, 10, 10)));
        assert!(!a.overlaps(&IBox::from_xywh(2, 2, 0, 4)));
    }

    #[test]
    fn test_ibox_overlap_huge_sizes() {
        let screen = IBox::from_xywh(0, 0, 1920, 1080);
        let crop = IBox::from_xywh(0, 0, i32::MAX, i32::MAX);
        assert!(screen.overlaps(&crop));
        let far = IBox::from_xywh(i32::MAX - 5, 0, i32::MAX, 10);
        assert!(!screen.overlaps(&far));
    }

    #[test]
    fn test_scale_rounding() {
        let size = IVec2::new(101, 51);
        let scale = Vec2::new(0.5, 0.5);
        assert_eq!(size.scale_floor(scale), IVec2::new(50, 25));
        assert_eq!(size.scale_ceil(scale), IVec2::new(51, 26));
    }

    #[test]
    fn test_as_ivec2_saturates() {
        let v = Vec2::new(f64::INFINITY, f64::NEG_INFINITY).as_ivec2();
        assert_eq!(v, IVec2::new(i32::MAX, i32::MIN));
        assert_eq!(Vec2::new(f64::NAN, 1.9).as_ivec2(), IVec2::new(0, 1));
    }

    #[test]
    fn test_contains() {
        let monitor = IBox::from_xywh(0, 0, 100, 100);
        assert!(monitor.contains(&IBox::from_xywh(10, 10, 90, 90)));
        assert!(!monitor.contains(&IBox::from_xywh(10, 10, 91, 90)));
    }
}
