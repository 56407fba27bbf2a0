//! Vectors, rotations, and the synchronized pose.
//!
//! The coordinate conventions follow a Y-up scene: yaw is a rotation about the
//! Y axis, and quaternions use the Hamilton product with `(x, y, z, w)`
//! component order, which is also their order on the wire.
//!
//! # Equality
//!
//! `PartialEq` compares floats numerically, so `-0.0 == 0.0` and `NaN != NaN`.
//! Use [`Vec3::bits_eq`] / [`Quat::bits_eq`] when an exact bit-for-bit match is
//! required (for example when asserting that the codec is lossless).

use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// A 3-component `f32` vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Vec3) -> Vec3 {
        Vec3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Returns `true` if every component has the same bit pattern.
    pub fn bits_eq(&self, other: &Vec3) -> bool {
        self.x.to_bits() == other.x.to_bits()
            && self.y.to_bits() == other.y.to_bits()
            && self.z.to_bits() == other.z.to_bits()
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// A rotation quaternion.
///
/// Not validated: a decoded quaternion may be non-unit or contain NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Quat = Quat::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Rotation of `degrees` about the +Y axis.
    pub fn from_yaw_degrees(degrees: f32) -> Quat {
        let half = degrees.to_radians() * 0.5;
        Quat::new(0.0, half.sin(), 0.0, half.cos())
    }

    /// Extracts the rotation about +Y in degrees, in `(-180, 180]`.
    pub fn yaw_degrees(self) -> f32 {
        let siny = 2.0 * (self.w * self.y + self.z * self.x);
        let cosy = 1.0 - 2.0 * (self.x * self.x + self.y * self.y);
        siny.atan2(cosy).to_degrees()
    }

    pub fn norm_squared(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w
    }

    /// Inverse rotation.  Falls back to the conjugate for a zero quaternion.
    pub fn inverse(self) -> Quat {
        let n = self.norm_squared();
        let conj = Quat::new(-self.x, -self.y, -self.z, self.w);
        if n == 0.0 || n == 1.0 {
            conj
        } else {
            Quat::new(conj.x / n, conj.y / n, conj.z / n, conj.w / n)
        }
    }

    /// Rotates `v` by this quaternion (`q * v * q⁻¹` for a unit `q`).
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let u = Vec3::new(self.x, self.y, self.z);
        let t = u.cross(v) * 2.0;
        v + t * self.w + u.cross(t)
    }

    pub fn bits_eq(&self, other: &Quat) -> bool {
        self.x.to_bits() == other.x.to_bits()
            && self.y.to_bits() == other.y.to_bits()
            && self.z.to_bits() == other.z.to_bits()
            && self.w.to_bits() == other.w.to_bits()
    }
}

impl Default for Quat {
    fn default() -> Self {
        Quat::IDENTITY
    }
}

impl Mul for Quat {
    type Output = Quat;

    /// Hamilton product: `(self * rhs)` applies `rhs` first, then `self`.
    fn mul(self, rhs: Quat) -> Quat {
        Quat::new(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }
}

/// The synchronized pose of one node.
///
/// `position` is always relative to the sender's anchor frame, never raw world
/// space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TransformState {
    pub position: Vec3,
    pub rotation: Quat,
}

impl TransformState {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn bits_eq(&self, other: &TransformState) -> bool {
        self.position.bits_eq(&other.position) && self.rotation.bits_eq(&other.rotation)
    }
}
