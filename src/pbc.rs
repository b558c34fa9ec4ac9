//! Minimum-image distances and wrapping for orthorhombic boxes.

use glam::Vec3;

use crate::BoxVec;

/// An orthorhombic periodic box described by its three edge lengths.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicBox {
    dimensions: [f32; 3],
}

impl PeriodicBox {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            dimensions: [x, y, z],
        }
    }

    /// Builds a box from the diagonal of a frame's box-edge matrix. The
    /// off-diagonal (triclinic) elements are ignored.
    pub fn from_box_matrix(boxvec: &BoxVec) -> Self {
        Self::new(boxvec.x_axis.x, boxvec.y_axis.y, boxvec.z_axis.z)
    }

    pub fn dimensions(&self) -> [f32; 3] {
        self.dimensions
    }

    /// Minimum-image distance between two points.
    pub fn distance(&self, lhs: Vec3, rhs: Vec3) -> f32 {
        self.distance_squared(lhs, rhs).sqrt()
    }

    pub fn distance_squared(&self, lhs: Vec3, rhs: Vec3) -> f32 {
        let x = self.dist1d(0, lhs.x, rhs.x);
        let y = self.dist1d(1, lhs.y, rhs.y);
        let z = self.dist1d(2, lhs.z, rhs.z);
        x * x + y * y + z * z
    }

    fn dist1d(&self, axis: usize, lhs: f32, rhs: f32) -> f32 {
        let dim = self.dimensions[axis];
        let mut dist = (lhs - rhs).abs();
        if dist > dim {
            dist -= (dist / dim).floor() * dim;
        }
        if dist > dim * 0.5 {
            dim - dist
        } else {
            dist
        }
    }

    /// Shifts `point` by whole box lengths so that its signed displacement
    /// from `reference` lies within half a box length on every axis. The
    /// result is the periodic image of `point` closest to `reference`.
    pub fn wrap(&self, reference: Vec3, point: Vec3) -> Vec3 {
        Vec3::new(
            self.wrap1d(0, reference.x, point.x),
            self.wrap1d(1, reference.y, point.y),
            self.wrap1d(2, reference.z, point.z),
        )
    }

    fn wrap1d(&self, axis: usize, reference: f32, value: f32) -> f32 {
        let dim = self.dimensions[axis];
        let mut value = value;
        let diff = value - reference;
        if diff.abs() > dim {
            value -= (diff.abs() / dim).floor() * dim * diff.signum();
        }
        // Both directions must be tested: a one-sided check misplaces points
        // sitting exactly at the negative half-box boundary.
        if value - reference > dim * 0.5 {
            value -= dim;
        } else if reference - value > dim * 0.5 {
            value += dim;
        }
        value
    }
}
