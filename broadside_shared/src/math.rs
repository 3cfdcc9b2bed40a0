//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! It avoids SIMD/unsafe and focuses on stable semantics.

use serde::{Deserialize, Serialize};

/// 2D vector used for positions, velocities, and normals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Unit vector pointing along a heading in radians.
    pub fn from_heading(rotation: f32) -> Self {
        Self::new(rotation.cos(), rotation.sin())
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn len(self) -> f32 {
        self.len_sq().sqrt()
    }

    /// Normalized copy, or `Vec2::ZERO` when the length is degenerate.
    pub fn normalized(self) -> Self {
        let len = self.len();
        if len <= f32::EPSILON {
            Self::ZERO
        } else {
            Self::new(self.x / len, self.y / len)
        }
    }

    /// Perpendicular (rotated +90 degrees). Used for lateral drift.
    pub fn perp(self) -> Self {
        Self::new(-self.y, self.x)
    }

    pub fn scale(self, k: f32) -> Self {
        Self::new(self.x * k, self.y * k)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }

    pub fn distance(self, rhs: Self) -> f32 {
        self.sub(rhs).len()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(self.x + (to.x - self.x) * t, self.y + (to.y - self.y) * t)
    }
}

/// Wraps an angle into `[-PI, PI)`.
pub fn wrap_angle(a: f32) -> f32 {
    let two_pi = std::f32::consts::TAU;
    let mut a = a % two_pi;
    if a >= std::f32::consts::PI {
        a -= two_pi;
    } else if a < -std::f32::consts::PI {
        a += two_pi;
    }
    a
}
