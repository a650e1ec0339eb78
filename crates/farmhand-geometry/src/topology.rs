//! Hollow-topology analysis for 3D nesting.
//!
//! Voxelizes a mesh, estimates the solid it would occupy if it had no
//! cavities, and clusters the difference into hollow regions. The
//! largest region's point cloud is classified by PCA into a coarse
//! shape family. Exposed as a kernel capability for future packing
//! strategies; the current layout pipeline does not consult it.

use std::collections::HashMap;

use nalgebra::{Matrix3, Point3, SymmetricEigen};
use tracing::debug;

use crate::mesh::Mesh;
use crate::voxel::VoxelGrid;

/// DBSCAN neighborhood radius in voxel units.
const DBSCAN_EPS: f64 = 2.0;
/// DBSCAN core-point threshold (neighbors including self).
const DBSCAN_MIN_SAMPLES: usize = 5;
/// Default density below which a mesh is considered hollow.
pub const DEFAULT_DENSITY_THRESHOLD: f64 = 0.85;

/// Coarse shape family of the dominant hollow region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HollowShape {
    Cylindrical,
    Rectangular,
    Spherical,
    Irregular,
}

/// Outcome of hollow analysis.
#[derive(Debug, Clone)]
pub struct HollowAnalysis {
    pub has_hollow: bool,
    /// Solid fraction in [0, 1]: occupied volume over expected volume.
    pub density: f64,
    /// Total hollow volume in mm³.
    pub hollow_volume: f64,
    /// World AABB of the largest hollow region.
    pub hollow_bounds: Option<(Point3<f64>, Point3<f64>)>,
    pub hollow_type: HollowShape,
    pub n_hollow_regions: usize,
}

impl HollowAnalysis {
    fn solid(density: f64) -> Self {
        Self {
            has_hollow: false,
            density: density.clamp(0.0, 1.0),
            hollow_volume: 0.0,
            hollow_bounds: None,
            hollow_type: HollowShape::Irregular,
            n_hollow_regions: 0,
        }
    }
}

/// Analyze a mesh for hollow regions at the given voxel resolution.
pub fn analyze_hollows(mesh: &Mesh, resolution: f64, density_threshold: f64) -> HollowAnalysis {
    let Some(mut surface) = VoxelGrid::for_mesh(mesh, resolution) else {
        return HollowAnalysis::solid(1.0);
    };
    surface.union_mesh(mesh);

    // The solid the part actually occupies: surface plus sealed interior.
    let solid = surface.filled();
    // The solid the part would occupy without cavities: interval fill
    // along each axis, unioned (a conservative convex approximation).
    let expected = axis_interval_fill(&solid);

    let solid_count = solid.occupied_count();
    let expected_count = expected.occupied_count();
    if expected_count == 0 {
        return HollowAnalysis::solid(1.0);
    }

    let density = solid_count as f64 / expected_count as f64;
    if density >= density_threshold {
        return HollowAnalysis::solid(density);
    }

    // Hollow voxels: expected solid that the part does not fill.
    let hollow: Vec<[i64; 3]> = expected
        .occupied_voxels()
        .filter(|&c| !solid.is_occupied(c))
        .map(|[i, j, k]| [i as i64, j as i64, k as i64])
        .collect();
    if hollow.is_empty() {
        return HollowAnalysis::solid(density);
    }

    let clusters = dbscan(&hollow, DBSCAN_EPS, DBSCAN_MIN_SAMPLES);
    let hollow_volume = hollow.len() as f64 * surface.voxel_volume();
    if clusters.is_empty() {
        // All noise: hollow but too scattered to classify.
        return HollowAnalysis {
            has_hollow: true,
            density: density.clamp(0.0, 1.0),
            hollow_volume,
            hollow_bounds: None,
            hollow_type: HollowShape::Irregular,
            n_hollow_regions: 0,
        };
    }

    let Some(largest) = clusters.iter().max_by_key(|c| c.len()) else {
        return HollowAnalysis::solid(density);
    };
    let bounds = cluster_bounds(largest, &surface);
    let shape = classify_cluster(largest);

    debug!(
        density,
        regions = clusters.len(),
        largest = largest.len(),
        ?shape,
        "hollow analysis finished"
    );

    HollowAnalysis {
        has_hollow: true,
        density: density.clamp(0.0, 1.0),
        hollow_volume,
        hollow_bounds: Some(bounds),
        hollow_type: shape,
        n_hollow_regions: clusters.len(),
    }
}

/// Union of per-axis interval fills: a voxel is expected-solid when it
/// lies between occupied voxels along at least one axis.
fn axis_interval_fill(grid: &VoxelGrid) -> VoxelGrid {
    let [nx, ny, nz] = grid.dims();
    let mut out = grid.clone();

    // Along X
    for j in 0..ny {
        for k in 0..nz {
            fill_run(&mut out, (0..nx).map(|i| [i, j, k]), grid);
        }
    }
    // Along Y
    for i in 0..nx {
        for k in 0..nz {
            fill_run(&mut out, (0..ny).map(|j| [i, j, k]), grid);
        }
    }
    // Along Z
    for i in 0..nx {
        for j in 0..ny {
            fill_run(&mut out, (0..nz).map(|k| [i, j, k]), grid);
        }
    }
    out
}

fn fill_run(
    out: &mut VoxelGrid,
    line: impl Iterator<Item = [usize; 3]> + Clone,
    grid: &VoxelGrid,
) {
    let mut first = None;
    let mut last = None;
    for (pos, coord) in line.clone().enumerate() {
        if grid.is_occupied(coord) {
            if first.is_none() {
                first = Some(pos);
            }
            last = Some(pos);
        }
    }
    let (Some(first), Some(last)) = (first, last) else {
        return;
    };
    for (pos, coord) in line.enumerate() {
        if pos > first && pos < last {
            out.set(coord);
        }
    }
}

/// DBSCAN over integer voxel coordinates. Returns clusters (noise is
/// dropped), each as a list of coordinates.
fn dbscan(points: &[[i64; 3]], eps: f64, min_samples: usize) -> Vec<Vec<[i64; 3]>> {
    let eps_sq = (eps * eps).floor() as i64;
    let index: HashMap<[i64; 3], usize> = points
        .iter()
        .enumerate()
        .map(|(i, &p)| (p, i))
        .collect();

    // Neighborhood offsets within the eps ball.
    let reach = eps.floor() as i64;
    let mut offsets = Vec::new();
    for dx in -reach..=reach {
        for dy in -reach..=reach {
            for dz in -reach..=reach {
                if dx * dx + dy * dy + dz * dz <= eps_sq {
                    offsets.push([dx, dy, dz]);
                }
            }
        }
    }

    let neighbors = |p: [i64; 3]| -> Vec<usize> {
        offsets
            .iter()
            .filter_map(|o| index.get(&[p[0] + o[0], p[1] + o[1], p[2] + o[2]]).copied())
            .collect()
    };

    let mut cluster_of: Vec<Option<usize>> = vec![None; points.len()];
    let mut visited = vec![false; points.len()];
    let mut clusters: Vec<Vec<[i64; 3]>> = Vec::new();

    for start in 0..points.len() {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let seed_neighbors = neighbors(points[start]);
        if seed_neighbors.len() < min_samples {
            continue; // noise (may be adopted by a later cluster)
        }

        let cluster_id = clusters.len();
        clusters.push(Vec::new());
        let mut queue = vec![start];
        cluster_of[start] = Some(cluster_id);

        while let Some(point) = queue.pop() {
            clusters[cluster_id].push(points[point]);
            let reachable = neighbors(points[point]);
            if reachable.len() < min_samples {
                continue; // border point: belongs, does not expand
            }
            for other in reachable {
                if cluster_of[other].is_none() {
                    cluster_of[other] = Some(cluster_id);
                    visited[other] = true;
                    queue.push(other);
                }
            }
        }
    }
    clusters
}

fn cluster_bounds(cluster: &[[i64; 3]], grid: &VoxelGrid) -> (Point3<f64>, Point3<f64>) {
    let mut min = [i64::MAX; 3];
    let mut max = [i64::MIN; 3];
    for c in cluster {
        for axis in 0..3 {
            min[axis] = min[axis].min(c[axis]);
            max[axis] = max[axis].max(c[axis]);
        }
    }
    let lo = grid.voxel_to_world([min[0] as usize, min[1] as usize, min[2] as usize]);
    let hi = grid.voxel_to_world([
        (max[0] + 1) as usize,
        (max[1] + 1) as usize,
        (max[2] + 1) as usize,
    ]);
    (lo, hi)
}

/// PCA over the cluster's coordinates; the eigenvalue spectrum decides
/// the shape family.
fn classify_cluster(cluster: &[[i64; 3]]) -> HollowShape {
    if cluster.len() < DBSCAN_MIN_SAMPLES {
        return HollowShape::Irregular;
    }
    let n = cluster.len() as f64;
    let mut mean = [0.0f64; 3];
    for c in cluster {
        for axis in 0..3 {
            mean[axis] += c[axis] as f64;
        }
    }
    for m in &mut mean {
        *m /= n;
    }

    let mut cov = Matrix3::<f64>::zeros();
    for c in cluster {
        let d = [
            c[0] as f64 - mean[0],
            c[1] as f64 - mean[1],
            c[2] as f64 - mean[2],
        ];
        for row in 0..3 {
            for col in 0..3 {
                cov[(row, col)] += d[row] * d[col] / n;
            }
        }
    }

    let eigen = SymmetricEigen::new(cov);
    let mut lambdas: Vec<f64> = eigen.eigenvalues.iter().copied().collect();
    lambdas.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let (l0, l1, l2) = (lambdas[0].max(0.0), lambdas[1].max(0.0), lambdas[2].max(0.0));
    if l0 <= f64::EPSILON {
        return HollowShape::Irregular;
    }

    let r1 = l1 / l0;
    let r2 = l2 / l0;
    if r2 < 0.05 && r1 >= 0.05 {
        // Exactly one near-zero principal variance.
        HollowShape::Cylindrical
    } else if r1 > 0.6 && r2 > 0.6 {
        // Near-uniform variances.
        HollowShape::Spherical
    } else if r1 < 0.6 && (r1 - r2).abs() < 0.15 {
        // One dominant axis, the other two near-equal.
        HollowShape::Rectangular
    } else {
        HollowShape::Irregular
    }
}
