//! Contact-area scoring.
//!
//! The objective maximized by the orientation search: the area of the
//! mesh resting on the build plate after a candidate rotation.

use crate::mesh::Mesh;
use crate::rotation::Rotation;

/// Vertical band above the lowest point counted as "touching", in mm.
const FLOOR_BAND_MM: f64 = 0.5;
/// Below this triangle-sum area the convex-hull fallback kicks in, mm².
const HULL_FALLBACK_THRESHOLD: f64 = 0.01;
/// Area reported for degenerate (one/two point) floor contacts, mm².
const DEGENERATE_CONTACT_AREA: f64 = 1.0;

/// Contact area of `mesh` under `rotation`, in mm².
///
/// Sums the areas of triangles whose centroid lies within 0.5 mm of the
/// rotated minimum Z. When nothing rests flat (point or edge contact)
/// the triangle sum collapses, so the area of the 2D convex hull of
/// near-floor vertices is used instead.
pub fn contact_area(mesh: &Mesh, rotation: &Rotation) -> f64 {
    if mesh.is_empty() {
        return 0.0;
    }
    let rotated = rotation.apply(mesh);
    let Some((min, _)) = rotated.bounds() else {
        return 0.0;
    };
    let floor = min.z + FLOOR_BAND_MM;

    let area: f64 = rotated
        .triangles()
        .filter(|t| t.centroid().z <= floor)
        .map(|t| t.area())
        .sum();

    if area >= HULL_FALLBACK_THRESHOLD {
        return area;
    }

    let near_floor: Vec<(f64, f64)> = rotated
        .vertices()
        .iter()
        .filter(|v| v.z <= floor)
        .map(|v| (v.x, v.y))
        .collect();
    hull_area(&near_floor)
}

/// Area of the 2D convex hull over projected near-floor vertices.
///
/// Degenerate inputs: no points → 0; one or two points (or a collinear
/// set) → a small constant standing in for a point/edge contact patch.
fn hull_area(points: &[(f64, f64)]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    if points.len() < 3 {
        return DEGENERATE_CONTACT_AREA;
    }
    let hull = convex_hull(points);
    if hull.len() < 3 {
        return DEGENERATE_CONTACT_AREA;
    }
    let mut twice_area = 0.0;
    for i in 0..hull.len() {
        let (x1, y1) = hull[i];
        let (x2, y2) = hull[(i + 1) % hull.len()];
        twice_area += x1 * y2 - x2 * y1;
    }
    let area = twice_area.abs() * 0.5;
    if area < f64::EPSILON {
        DEGENERATE_CONTACT_AREA
    } else {
        area
    }
}

/// Andrew's monotone chain; returns hull vertices in CCW order.
fn convex_hull(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut pts: Vec<(f64, f64)> = points.to_vec();
    pts.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let cross = |o: (f64, f64), a: (f64, f64), b: (f64, f64)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };

    let mut lower: Vec<(f64, f64)> = Vec::with_capacity(pts.len());
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }

    let mut upper: Vec<(f64, f64)> = Vec::with_capacity(pts.len());
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Convenience: contact area of the mesh as loaded (identity rotation).
pub fn resting_contact_area(mesh: &Mesh) -> f64 {
    contact_area(mesh, &Rotation::identity())
}
