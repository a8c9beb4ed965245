//! Spatial value types shared by entity definitions and actions.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// RecordablePosition
// ---------------------------------------------------------------------------

/// A recorded world position with view rotation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordablePosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Horizontal rotation in degrees.
    #[serde(default)]
    pub yaw: f32,
    /// Vertical rotation in degrees.
    #[serde(default)]
    pub pitch: f32,
}

impl RecordablePosition {
    /// A position with zero rotation.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    /// Returns a copy of this position facing the given direction.
    pub fn with_rotation(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }

    /// Euclidean distance to another position, ignoring rotation.
    pub fn distance(&self, other: &RecordablePosition) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl fmt::Display for RecordablePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// RecordableVector
// ---------------------------------------------------------------------------

/// A recorded velocity in blocks per second.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordableVector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl RecordableVector {
    /// The zero vector.
    pub const ZERO: RecordableVector = RecordableVector {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

// ---------------------------------------------------------------------------
// BlockPosition
// ---------------------------------------------------------------------------

/// Integer coordinates of a single world block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPosition {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPosition {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for BlockPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.x, self.y, self.z)
    }
}
