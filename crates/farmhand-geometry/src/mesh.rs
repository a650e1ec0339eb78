//! Core mesh data types.

use nalgebra::{Matrix4, Point3, Vector3};

/// A triangle with resolved vertex positions.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub v0: Point3<f64>,
    pub v1: Point3<f64>,
    pub v2: Point3<f64>,
}

impl Triangle {
    /// Triangle area in mm².
    pub fn area(&self) -> f64 {
        let a = self.v1 - self.v0;
        let b = self.v2 - self.v0;
        a.cross(&b).norm() * 0.5
    }

    /// Centroid of the three vertices.
    pub fn centroid(&self) -> Point3<f64> {
        Point3::from((self.v0.coords + self.v1.coords + self.v2.coords) / 3.0)
    }

    /// Signed volume of the tetrahedron spanned with the origin.
    pub fn signed_volume(&self) -> f64 {
        self.v0.coords.dot(&self.v1.coords.cross(&self.v2.coords)) / 6.0
    }
}

/// An immutable triangle soup.
///
/// Transforms produce a new mesh; nothing mutates in place. Faces index
/// into `vertices` with counter-clockwise winding.
#[derive(Debug, Clone)]
pub struct Mesh {
    vertices: Vec<Point3<f64>>,
    faces: Vec<[u32; 3]>,
}

impl Mesh {
    /// Build a mesh from raw parts. Faces referencing out-of-range
    /// vertices are dropped.
    pub fn from_parts(vertices: Vec<Point3<f64>>, faces: Vec<[u32; 3]>) -> Self {
        let limit = vertices.len() as u32;
        let faces = faces
            .into_iter()
            .filter(|f| f.iter().all(|&i| i < limit))
            .collect();
        Self { vertices, faces }
    }

    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Iterate over triangles with resolved vertex positions.
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.faces.iter().map(|&[i0, i1, i2]| Triangle {
            v0: self.vertices[i0 as usize],
            v1: self.vertices[i1 as usize],
            v2: self.vertices[i2 as usize],
        })
    }

    /// Axis-aligned bounds, or None for an empty mesh.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = *self.vertices.first()?;
        let mut min = first;
        let mut max = first;
        for v in &self.vertices[1..] {
            min.x = min.x.min(v.x);
            min.y = min.y.min(v.y);
            min.z = min.z.min(v.z);
            max.x = max.x.max(v.x);
            max.y = max.y.max(v.y);
            max.z = max.z.max(v.z);
        }
        Some((min, max))
    }

    /// Footprint (width, height) of the XY projection; (0, 0) when empty.
    pub fn footprint(&self) -> (f64, f64) {
        match self.bounds() {
            Some((min, max)) => (max.x - min.x, max.y - min.y),
            None => (0.0, 0.0),
        }
    }

    /// Total surface area in mm².
    pub fn surface_area(&self) -> f64 {
        self.triangles().map(|t| t.area()).sum()
    }

    /// Signed volume in mm³; negative for inverted winding.
    pub fn volume(&self) -> f64 {
        self.triangles().map(|t| t.signed_volume()).sum()
    }

    /// Apply a homogeneous transform, producing a new mesh.
    pub fn transformed(&self, matrix: &Matrix4<f64>) -> Self {
        let vertices = self
            .vertices
            .iter()
            .map(|v| matrix.transform_point(v))
            .collect();
        Self {
            vertices,
            faces: self.faces.clone(),
        }
    }

    /// Translate by an offset, producing a new mesh.
    pub fn translated(&self, offset: Vector3<f64>) -> Self {
        let vertices = self.vertices.iter().map(|v| v + offset).collect();
        Self {
            vertices,
            faces: self.faces.clone(),
        }
    }

    /// Merge meshes into one soup, re-basing face indices.
    pub fn merged<'a>(meshes: impl IntoIterator<Item = &'a Mesh>) -> Self {
        let mut vertices = Vec::new();
        let mut faces = Vec::new();
        for mesh in meshes {
            let base = vertices.len() as u32;
            vertices.extend_from_slice(&mesh.vertices);
            faces.extend(
                mesh.faces
                    .iter()
                    .map(|&[a, b, c]| [a + base, b + base, c + base]),
            );
        }
        Self { vertices, faces }
    }
}

#[cfg(test)]
pub(crate) mod test_meshes {
    use super::*;

    /// Axis-aligned box with one corner at the origin.
    pub fn box_mesh(w: f64, d: f64, h: f64) -> Mesh {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(w, 0.0, 0.0),
            Point3::new(w, d, 0.0),
            Point3::new(0.0, d, 0.0),
            Point3::new(0.0, 0.0, h),
            Point3::new(w, 0.0, h),
            Point3::new(w, d, h),
            Point3::new(0.0, d, h),
        ];
        let faces = vec![
            // bottom (z = 0), wound to face -Z
            [0, 2, 1],
            [0, 3, 2],
            // top
            [4, 5, 6],
            [4, 6, 7],
            // sides
            [0, 1, 5],
            [0, 5, 4],
            [1, 2, 6],
            [1, 6, 5],
            [2, 3, 7],
            [2, 7, 6],
            [3, 0, 4],
            [3, 4, 7],
        ];
        Mesh::from_parts(vertices, faces)
    }

    /// Axis-aligned cube with one corner at the origin.
    pub fn cube(size: f64) -> Mesh {
        box_mesh(size, size, size)
    }

    /// Single triangle lying flat at z = 0.
    pub fn flat_triangle() -> Mesh {
        Mesh::from_parts(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(10.0, 0.0, 0.0),
                Point3::new(0.0, 10.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_meshes::cube;
    use super::*;

    #[test]
    fn test_cube_attributes() {
        let mesh = cube(10.0);
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.face_count(), 12);
        assert!((mesh.surface_area() - 600.0).abs() < 1e-9);
        assert!((mesh.volume().abs() - 1000.0).abs() < 1e-6);

        let (min, max) = mesh.bounds().unwrap();
        assert_eq!(min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(max, Point3::new(10.0, 10.0, 10.0));
        assert_eq!(mesh.footprint(), (10.0, 10.0));
    }

    #[test]
    fn test_from_parts_drops_out_of_range_faces() {
        let mesh = Mesh::from_parts(
            vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)],
            vec![[0, 1, 7]],
        );
        assert_eq!(mesh.face_count(), 0);
    }

    #[test]
    fn test_translated_shifts_bounds() {
        let mesh = cube(2.0).translated(Vector3::new(5.0, 0.0, -1.0));
        let (min, _) = mesh.bounds().unwrap();
        assert_eq!(min, Point3::new(5.0, 0.0, -1.0));
    }

    #[test]
    fn test_merged_rebases_indices() {
        let a = cube(1.0);
        let b = cube(1.0).translated(Vector3::new(3.0, 0.0, 0.0));
        let merged = Mesh::merged([&a, &b]);
        assert_eq!(merged.vertex_count(), 16);
        assert_eq!(merged.face_count(), 24);
        let (_, max) = merged.bounds().unwrap();
        assert_eq!(max.x, 4.0);
    }
}
