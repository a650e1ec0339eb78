//! Rotation composed from per-axis Euler angles.

use nalgebra::{Matrix4, Rotation3, Vector3};

use crate::mesh::Mesh;

/// A rotation stored both as source angles (degrees, for observability)
/// and as the composed homogeneous matrix applied in order Z∘Y∘X.
#[derive(Debug, Clone, PartialEq)]
pub struct Rotation {
    /// Source angles in degrees around X, Y, Z.
    pub degrees: [f64; 3],
    matrix: Matrix4<f64>,
}

impl Rotation {
    /// The identity rotation.
    pub fn identity() -> Self {
        Self {
            degrees: [0.0; 3],
            matrix: Matrix4::identity(),
        }
    }

    /// Compose from degrees around X, Y, Z; X is applied first.
    pub fn from_degrees(degrees: [f64; 3]) -> Self {
        let [rx, ry, rz] = degrees.map(f64::to_radians);
        let m = Rotation3::from_axis_angle(&Vector3::z_axis(), rz)
            * Rotation3::from_axis_angle(&Vector3::y_axis(), ry)
            * Rotation3::from_axis_angle(&Vector3::x_axis(), rx);
        Self {
            degrees,
            matrix: m.to_homogeneous(),
        }
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    pub fn is_identity(&self) -> bool {
        self.degrees.iter().all(|&d| d == 0.0)
    }

    /// Apply to a mesh, producing a new mesh.
    pub fn apply(&self, mesh: &Mesh) -> Mesh {
        mesh.transformed(&self.matrix)
    }
}

impl Default for Rotation {
    fn default() -> Self {
        Self::identity()
    }
}
