//! Dense boolean voxel grid for collision and topology analysis.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

use crate::mesh::{Mesh, Triangle};

/// A dense 3D occupancy grid. `origin` is the world position of voxel
/// `(0, 0, 0)`'s minimum corner; `resolution` is mm per voxel.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    origin: Point3<f64>,
    resolution: f64,
    dims: [usize; 3],
    occupied: Vec<bool>,
}

impl VoxelGrid {
    /// Create an empty grid.
    pub fn new(origin: Point3<f64>, resolution: f64, dims: [usize; 3]) -> Self {
        let len = dims[0].max(1) * dims[1].max(1) * dims[2].max(1);
        Self {
            origin,
            resolution: resolution.max(f64::EPSILON),
            dims: [dims[0].max(1), dims[1].max(1), dims[2].max(1)],
            occupied: vec![false; len],
        }
    }

    /// Grid spanning a bed footprint up to `height` mm.
    pub fn for_bed(bed: (f64, f64), height: f64, resolution: f64) -> Self {
        let dims = [
            (bed.0 / resolution).ceil() as usize + 1,
            (bed.1 / resolution).ceil() as usize + 1,
            (height / resolution).ceil() as usize + 1,
        ];
        Self::new(Point3::origin(), resolution, dims)
    }

    /// Grid spanning a mesh's bounds, padded by one voxel on each side.
    pub fn for_mesh(mesh: &Mesh, resolution: f64) -> Option<Self> {
        let (min, max) = mesh.bounds()?;
        let resolution = resolution.max(f64::EPSILON);
        let extent = max - min;
        let dims = [
            (extent.x / resolution).ceil() as usize + 3,
            (extent.y / resolution).ceil() as usize + 3,
            (extent.z / resolution).ceil() as usize + 3,
        ];
        let origin = min - Vector3::repeat(resolution);
        Some(Self::new(origin, resolution, dims))
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn origin(&self) -> Point3<f64> {
        self.origin
    }

    /// Volume of one voxel in mm³.
    pub fn voxel_volume(&self) -> f64 {
        self.resolution.powi(3)
    }

    #[inline]
    fn index(&self, [i, j, k]: [usize; 3]) -> usize {
        (k * self.dims[1] + j) * self.dims[0] + i
    }

    #[inline]
    pub fn contains(&self, coord: [i64; 3]) -> bool {
        coord[0] >= 0
            && coord[1] >= 0
            && coord[2] >= 0
            && (coord[0] as usize) < self.dims[0]
            && (coord[1] as usize) < self.dims[1]
            && (coord[2] as usize) < self.dims[2]
    }

    /// Voxel coordinate containing a world point (may be out of range).
    pub fn world_to_voxel(&self, point: &Point3<f64>) -> [i64; 3] {
        let rel = point - self.origin;
        [
            (rel.x / self.resolution).floor() as i64,
            (rel.y / self.resolution).floor() as i64,
            (rel.z / self.resolution).floor() as i64,
        ]
    }

    /// World position of a voxel's minimum corner.
    pub fn voxel_to_world(&self, [i, j, k]: [usize; 3]) -> Point3<f64> {
        self.origin
            + Vector3::new(
                i as f64 * self.resolution,
                j as f64 * self.resolution,
                k as f64 * self.resolution,
            )
    }

    pub fn is_occupied(&self, coord: [usize; 3]) -> bool {
        self.occupied[self.index(coord)]
    }

    pub fn set(&mut self, coord: [usize; 3]) {
        let idx = self.index(coord);
        self.occupied[idx] = true;
    }

    pub fn occupied_count(&self) -> usize {
        self.occupied.iter().filter(|&&o| o).count()
    }

    /// Iterate occupied voxel coordinates.
    pub fn occupied_voxels(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        let dims = self.dims;
        self.occupied.iter().enumerate().filter_map(move |(idx, &o)| {
            if !o {
                return None;
            }
            let i = idx % dims[0];
            let j = (idx / dims[0]) % dims[1];
            let k = idx / (dims[0] * dims[1]);
            Some([i, j, k])
        })
    }

    /// Voxel indices touched by the mesh surface. With `strict`, any
    /// sample outside the grid aborts with None; otherwise out-of-grid
    /// samples are skipped.
    fn surface_indices(&self, mesh: &Mesh, strict: bool) -> Option<Vec<usize>> {
        let sample_spacing = self.resolution * 0.5;
        let triangles: Vec<Triangle> = mesh.triangles().collect();
        let per_triangle: Vec<Option<Vec<usize>>> = triangles
            .par_iter()
            .map(|t| {
                let mut indices = Vec::new();
                for p in sample_triangle(t, sample_spacing) {
                    let coord = self.world_to_voxel(&p);
                    if !self.contains(coord) {
                        if strict {
                            return None;
                        }
                        continue;
                    }
                    indices.push(self.index([
                        coord[0] as usize,
                        coord[1] as usize,
                        coord[2] as usize,
                    ]));
                }
                Some(indices)
            })
            .collect();

        let mut all = Vec::new();
        for indices in per_triangle {
            all.extend(indices?);
        }
        all.sort_unstable();
        all.dedup();
        Some(all)
    }

    /// OR-union a mesh's surface into the grid. Monotone: never clears
    /// bits. Samples outside the grid are ignored.
    pub fn union_mesh(&mut self, mesh: &Mesh) {
        let indices = self
            .surface_indices(mesh, false)
            .unwrap_or_default();
        for idx in indices {
            self.occupied[idx] = true;
        }
    }

    /// Attempt to place a mesh: collides when any surface voxel is
    /// already occupied or falls outside the grid. On success the mesh
    /// is unioned in and `true` is returned; on collision the grid is
    /// untouched.
    pub fn place(&mut self, mesh: &Mesh) -> bool {
        let Some(indices) = self.surface_indices(mesh, true) else {
            return false;
        };
        if indices.iter().any(|&idx| self.occupied[idx]) {
            return false;
        }
        for idx in indices {
            self.occupied[idx] = true;
        }
        true
    }

    /// Fill enclosed space: everything not reachable from the grid
    /// boundary through unoccupied voxels becomes occupied. Returns the
    /// filled copy, leaving `self` untouched.
    pub fn filled(&self) -> VoxelGrid {
        let mut exterior = vec![false; self.occupied.len()];
        let mut stack: Vec<[usize; 3]> = Vec::new();

        let [nx, ny, nz] = self.dims;
        let mut push_if_open = |coord: [usize; 3],
                                exterior: &mut Vec<bool>,
                                stack: &mut Vec<[usize; 3]>| {
            let idx = self.index(coord);
            if !self.occupied[idx] && !exterior[idx] {
                exterior[idx] = true;
                stack.push(coord);
            }
        };

        for i in 0..nx {
            for j in 0..ny {
                push_if_open([i, j, 0], &mut exterior, &mut stack);
                push_if_open([i, j, nz - 1], &mut exterior, &mut stack);
            }
        }
        for i in 0..nx {
            for k in 0..nz {
                push_if_open([i, 0, k], &mut exterior, &mut stack);
                push_if_open([i, ny - 1, k], &mut exterior, &mut stack);
            }
        }
        for j in 0..ny {
            for k in 0..nz {
                push_if_open([0, j, k], &mut exterior, &mut stack);
                push_if_open([nx - 1, j, k], &mut exterior, &mut stack);
            }
        }

        while let Some([i, j, k]) = stack.pop() {
            let neighbors = [
                [i.wrapping_sub(1), j, k],
                [i + 1, j, k],
                [i, j.wrapping_sub(1), k],
                [i, j + 1, k],
                [i, j, k.wrapping_sub(1)],
                [i, j, k + 1],
            ];
            for n in neighbors {
                if n[0] < nx && n[1] < ny && n[2] < nz {
                    push_if_open(n, &mut exterior, &mut stack);
                }
            }
        }

        let mut filled = self.clone();
        for idx in 0..filled.occupied.len() {
            if !exterior[idx] {
                filled.occupied[idx] = true;
            }
        }
        filled
    }
}

/// Sample a triangle's surface at roughly `spacing` intervals using a
/// barycentric sweep; always includes the three corners.
fn sample_triangle(t: &Triangle, spacing: f64) -> Vec<Point3<f64>> {
    let e0 = (t.v1 - t.v0).norm();
    let e1 = (t.v2 - t.v0).norm();
    let e2 = (t.v2 - t.v1).norm();
    let longest = e0.max(e1).max(e2);
    let steps = (longest / spacing).ceil().max(1.0) as usize;

    let mut samples = Vec::with_capacity((steps + 1) * (steps + 2) / 2);
    for i in 0..=steps {
        for j in 0..=(steps - i) {
            let a = i as f64 / steps as f64;
            let b = j as f64 / steps as f64;
            let c = 1.0 - a - b;
            samples.push(Point3::from(
                t.v0.coords * c + t.v1.coords * a + t.v2.coords * b,
            ));
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::test_meshes::cube;
    use nalgebra::Vector3;

    #[test]
    fn test_union_is_monotone() {
        let mesh = cube(10.0);
        let mut grid = VoxelGrid::for_mesh(&mesh, 1.0).unwrap();
        grid.union_mesh(&mesh);
        let first = grid.occupied_count();
        assert!(first > 0);
        grid.union_mesh(&mesh);
        assert_eq!(grid.occupied_count(), first);
    }

    #[test]
    fn test_place_detects_collision() {
        let mut bed = VoxelGrid::for_bed((100.0, 100.0), 50.0, 2.0);
        let a = cube(10.0).translated(Vector3::new(5.0, 5.0, 0.0));
        assert!(bed.place(&a));

        // Overlapping placement collides and leaves the grid unchanged.
        let before = bed.occupied_count();
        let b = cube(10.0).translated(Vector3::new(8.0, 8.0, 0.0));
        assert!(!bed.place(&b));
        assert_eq!(bed.occupied_count(), before);

        // A clear spot succeeds.
        let c = cube(10.0).translated(Vector3::new(40.0, 40.0, 0.0));
        assert!(bed.place(&c));
    }

    #[test]
    fn test_place_outside_grid_collides() {
        let mut bed = VoxelGrid::for_bed((20.0, 20.0), 20.0, 2.0);
        let out = cube(10.0).translated(Vector3::new(50.0, 0.0, 0.0));
        assert!(!bed.place(&out));
        assert_eq!(bed.occupied_count(), 0);
    }

    #[test]
    fn test_filled_closes_cube_interior() {
        let mesh = cube(10.0);
        let grid = {
            let mut g = VoxelGrid::for_mesh(&mesh, 1.0).unwrap();
            g.union_mesh(&mesh);
            g
        };
        let filled = grid.filled();
        // The hollow interior of the surface shell becomes solid.
        assert!(filled.occupied_count() > grid.occupied_count());
        let center = grid.world_to_voxel(&Point3::new(5.0, 5.0, 5.0));
        assert!(filled.is_occupied([
            center[0] as usize,
            center[1] as usize,
            center[2] as usize
        ]));
        assert!(!grid.is_occupied([
            center[0] as usize,
            center[1] as usize,
            center[2] as usize
        ]));
    }

    #[test]
    fn test_world_voxel_roundtrip() {
        let grid = VoxelGrid::new(Point3::new(-5.0, -5.0, 0.0), 0.5, [40, 40, 40]);
        let coord = grid.world_to_voxel(&Point3::new(0.0, 0.0, 1.0));
        assert_eq!(coord, [10, 10, 2]);
        let world = grid.voxel_to_world([10, 10, 2]);
        assert_eq!(world, Point3::new(0.0, 0.0, 1.0));
    }
}
