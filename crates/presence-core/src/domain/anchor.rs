//! The local anchor frame: the reference pose relative positions are computed
//! against.
//!
//! At session start the frame is rotated by the negated compass heading, so
//! that every device's "aligned" axes point the same way regardless of how the
//! device was held when tracking began.  Once a visual anchor (for example a
//! tracked printed image) is found, its world position becomes the anchor
//! point inside that frame.  Until then the anchor sits at the frame origin.
//!
//! ```text
//! sent      = align(local_world) - align(anchor_world)
//! displayed = align(anchor_world) + received
//! ```
//!
//! Because both devices subtract their own view of the same physical anchor,
//! a peer's position means the same thing on every device.

use serde::{Deserialize, Serialize};

use super::pose::{Quat, Vec3};

/// Snapshot of the anchor frame read once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorPose {
    /// Anchor position in raw world space.
    pub position: Vec3,
    /// Yaw of the aligned frame about +Y, in degrees.
    pub yaw_degrees: f32,
}

impl AnchorPose {
    fn frame_rotation(&self) -> Quat {
        Quat::from_yaw_degrees(self.yaw_degrees)
    }

    /// Re-expresses a world-space position in the aligned frame.
    pub fn align_position(&self, world: Vec3) -> Vec3 {
        self.frame_rotation().inverse().rotate(world)
    }

    /// Re-expresses a world-space rotation in the aligned frame.
    pub fn align_rotation(&self, world: Quat) -> Quat {
        self.frame_rotation().inverse() * world
    }

    /// The anchor's own position inside the aligned frame.
    pub fn aligned_anchor_position(&self) -> Vec3 {
        self.align_position(self.position)
    }

    /// Position of `local_world` relative to the anchor, in the aligned frame.
    pub fn relative_position(&self, local_world: Vec3) -> Vec3 {
        self.align_position(local_world) - self.aligned_anchor_position()
    }

    /// Aligned-frame position at which to display a peer that reported
    /// `relative` to its own view of the anchor.
    pub fn place_relative(&self, relative: Vec3) -> Vec3 {
        self.aligned_anchor_position() + relative
    }
}

/// Supplies the anchor pose.  Read every tick; never written by the sync core.
pub trait AnchorSupplier {
    fn current_anchor_pose(&self) -> AnchorPose;
}

/// Anchor frame established from a heading and refined by a visual anchor.
///
/// Mutated only by whatever acquires the anchor; everything else reads it
/// through [`AnchorSupplier`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocalAnchorFrame {
    yaw_degrees: f32,
    anchor: Option<Vec3>,
}

impl LocalAnchorFrame {
    /// Establishes the frame from a magnetic heading reading (degrees).
    pub fn from_heading(heading_degrees: f32) -> Self {
        Self {
            yaw_degrees: -heading_degrees,
            anchor: None,
        }
    }

    /// Records the world position of a tracked visual anchor.
    pub fn refine(&mut self, anchor_world: Vec3) {
        self.anchor = Some(anchor_world);
    }

    pub fn has_visual_anchor(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn yaw_degrees(&self) -> f32 {
        self.yaw_degrees
    }
}

impl AnchorSupplier for LocalAnchorFrame {
    fn current_anchor_pose(&self) -> AnchorPose {
        AnchorPose {
            position: self.anchor.unwrap_or(Vec3::ZERO),
            yaw_degrees: self.yaw_degrees,
        }
    }
}
