//! 2D plate packing.
//!
//! Places piece footprints on the bed rectangle under a spacing
//! constraint. Three strategies:
//! - `BinPacking`: offline MaxRects, best-long-side-fit, no rotation;
//!   falls back to `Grid` when a rectangle cannot be seated
//! - `Grid`: left-to-right rows advancing by the tallest piece
//! - `Spiral`: center-out along an Archimedean spiral
//!
//! Every accepted layout is re-verified against the spacing invariants;
//! a violating layout is rejected as a whole.

use farmhand_core::config::PackingAlgorithm;
use tracing::debug;

use crate::error::{GeometryError, GeometryResult};

/// Angular step when walking the spiral, in radians.
const SPIRAL_THETA_STEP: f64 = 0.35;
/// Radial growth per radian, in mm.
const SPIRAL_RADIUS_PER_RAD: f64 = 2.0;

/// Where one piece landed. `x`/`y` is the piece's lower-left corner in
/// bed coordinates; pieces are never rotated by the packer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub rotation_z: f64,
    pub occupies_bed: bool,
}

/// An accepted plate layout: one placement per input footprint, in
/// input order.
#[derive(Debug, Clone)]
pub struct PlateLayout {
    pub placements: Vec<Placement>,
    /// Σ footprint area / bed area.
    pub utilization: f64,
}

#[derive(Debug, Clone, Copy)]
struct Cell {
    w: f64,
    h: f64,
}

/// Pack `footprints` (piece width/height pairs in mm) onto a
/// `bed = (W, H)` with `spacing` mm of clearance between pieces and
/// half that to the bed edge.
pub fn pack_plate(
    footprints: &[(f64, f64)],
    bed: (f64, f64),
    spacing: f64,
    algorithm: PackingAlgorithm,
) -> GeometryResult<PlateLayout> {
    let (bed_w, bed_h) = bed;
    if bed_w <= 0.0 || bed_h <= 0.0 {
        return Err(GeometryError::layout_rejected("bed has no area"));
    }
    for &(w, h) in footprints {
        if w <= 0.0 || h <= 0.0 || !w.is_finite() || !h.is_finite() {
            return Err(GeometryError::layout_rejected(format!(
                "degenerate footprint {w}x{h}"
            )));
        }
    }

    // Inflate each piece by the spacing; cell origins then only need to
    // stay inside the bare bed rectangle.
    let cells: Vec<Cell> = footprints
        .iter()
        .map(|&(w, h)| Cell {
            w: w + spacing,
            h: h + spacing,
        })
        .collect();

    let origins = match algorithm {
        PackingAlgorithm::BinPacking => match pack_maxrects(&cells, bed_w, bed_h) {
            Some(origins) => origins,
            None => {
                debug!("maxrects could not seat every piece; falling back to grid");
                pack_grid(&cells, bed_w, bed_h)?
            }
        },
        PackingAlgorithm::Grid => pack_grid(&cells, bed_w, bed_h)?,
        PackingAlgorithm::Spiral => pack_spiral(&cells, bed_w, bed_h)?,
    };

    let placements: Vec<Placement> = origins
        .iter()
        .map(|&(x, y)| Placement {
            x: x + spacing / 2.0,
            y: y + spacing / 2.0,
            rotation_z: 0.0,
            occupies_bed: true,
        })
        .collect();

    verify_layout(footprints, &placements, bed, spacing)?;

    let piece_area: f64 = footprints.iter().map(|&(w, h)| w * h).sum();
    Ok(PlateLayout {
        placements,
        utilization: piece_area / (bed_w * bed_h),
    })
}

/// Check the layout invariants: every piece inside the bed inset by
/// spacing/2, and pairwise gaps of at least `spacing`.
fn verify_layout(
    footprints: &[(f64, f64)],
    placements: &[Placement],
    bed: (f64, f64),
    spacing: f64,
) -> GeometryResult<()> {
    const EPS: f64 = 1e-6;
    let (bed_w, bed_h) = bed;
    let half = spacing / 2.0;

    for (i, (&(w, h), p)) in footprints.iter().zip(placements).enumerate() {
        if p.x < half - EPS
            || p.y < half - EPS
            || p.x + w > bed_w - half + EPS
            || p.y + h > bed_h - half + EPS
        {
            return Err(GeometryError::InvariantViolation {
                details: format!("piece {i} escapes the bed margin"),
            });
        }
    }

    for i in 0..placements.len() {
        for j in (i + 1)..placements.len() {
            let (wi, hi) = footprints[i];
            let (wj, hj) = footprints[j];
            let (a, b) = (&placements[i], &placements[j]);
            let gap_x = (a.x - (b.x + wj)).max(b.x - (a.x + wi));
            let gap_y = (a.y - (b.y + hj)).max(b.y - (a.y + hi));
            if gap_x.max(gap_y) < spacing - EPS {
                return Err(GeometryError::InvariantViolation {
                    details: format!("pieces {i} and {j} closer than spacing"),
                });
            }
        }
    }
    Ok(())
}

/// Row packer: left-to-right, top-to-bottom, row height = tallest piece.
fn pack_grid(cells: &[Cell], bed_w: f64, bed_h: f64) -> GeometryResult<Vec<(f64, f64)>> {
    let mut origins = Vec::with_capacity(cells.len());
    let mut x = 0.0f64;
    let mut y = 0.0f64;
    let mut row_h = 0.0f64;

    for (i, cell) in cells.iter().enumerate() {
        if cell.w > bed_w {
            return Err(GeometryError::layout_rejected(format!(
                "piece {i} wider than the bed"
            )));
        }
        if x + cell.w > bed_w {
            x = 0.0;
            y += row_h;
            row_h = 0.0;
        }
        if y + cell.h > bed_h {
            return Err(GeometryError::layout_rejected(format!(
                "piece {i} exceeds bed height"
            )));
        }
        origins.push((x, y));
        x += cell.w;
        row_h = row_h.max(cell.h);
    }
    Ok(origins)
}

#[derive(Debug, Clone, Copy)]
struct FreeRect {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

/// MaxRects with the best-long-side-fit heuristic, pieces pre-sorted by
/// descending area, no rotation. Returns None when any piece cannot be
/// seated; the caller falls back to the grid packer.
fn pack_maxrects(cells: &[Cell], bed_w: f64, bed_h: f64) -> Option<Vec<(f64, f64)>> {
    let mut order: Vec<usize> = (0..cells.len()).collect();
    order.sort_by(|&a, &b| {
        let area_a = cells[a].w * cells[a].h;
        let area_b = cells[b].w * cells[b].h;
        area_b.partial_cmp(&area_a).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut free: Vec<FreeRect> = vec![FreeRect {
        x: 0.0,
        y: 0.0,
        w: bed_w,
        h: bed_h,
    }];
    let mut origins = vec![(0.0, 0.0); cells.len()];

    for &idx in &order {
        let cell = cells[idx];
        let mut best: Option<(usize, f64, f64)> = None;
        for (fi, rect) in free.iter().enumerate() {
            if cell.w > rect.w || cell.h > rect.h {
                continue;
            }
            let leftover_w = rect.w - cell.w;
            let leftover_h = rect.h - cell.h;
            let long_side = leftover_w.max(leftover_h);
            let short_side = leftover_w.min(leftover_h);
            let better = match best {
                None => true,
                Some((_, best_long, best_short)) => {
                    long_side < best_long
                        || (long_side == best_long && short_side < best_short)
                }
            };
            if better {
                best = Some((fi, long_side, short_side));
            }
        }

        let (fi, _, _) = best?;
        let slot = free[fi];
        let placed = FreeRect {
            x: slot.x,
            y: slot.y,
            w: cell.w,
            h: cell.h,
        };
        origins[idx] = (placed.x, placed.y);

        // Split every free rect the placed piece overlaps.
        let mut next_free = Vec::with_capacity(free.len() + 4);
        for rect in &free {
            if !overlaps(rect, &placed) {
                next_free.push(*rect);
                continue;
            }
            split_free_rect(rect, &placed, &mut next_free);
        }
        prune_contained(&mut next_free);
        free = next_free;
    }

    Some(origins)
}

fn overlaps(a: &FreeRect, b: &FreeRect) -> bool {
    a.x < b.x + b.w && b.x < a.x + a.w && a.y < b.y + b.h && b.y < a.y + a.h
}

fn split_free_rect(rect: &FreeRect, placed: &FreeRect, out: &mut Vec<FreeRect>) {
    const MIN_DIM: f64 = 1e-9;
    // Left sliver
    if placed.x > rect.x {
        let w = placed.x - rect.x;
        if w > MIN_DIM {
            out.push(FreeRect { w, ..*rect });
        }
    }
    // Right sliver
    if placed.x + placed.w < rect.x + rect.w {
        let x = placed.x + placed.w;
        let w = rect.x + rect.w - x;
        if w > MIN_DIM {
            out.push(FreeRect { x, w, ..*rect });
        }
    }
    // Bottom sliver
    if placed.y > rect.y {
        let h = placed.y - rect.y;
        if h > MIN_DIM {
            out.push(FreeRect { h, ..*rect });
        }
    }
    // Top sliver
    if placed.y + placed.h < rect.y + rect.h {
        let y = placed.y + placed.h;
        let h = rect.y + rect.h - y;
        if h > MIN_DIM {
            out.push(FreeRect { y, h, ..*rect });
        }
    }
}

fn prune_contained(rects: &mut Vec<FreeRect>) {
    const EPS: f64 = 1e-9;
    let mut keep = vec![true; rects.len()];
    for i in 0..rects.len() {
        for j in 0..rects.len() {
            if i == j || !keep[i] || !keep[j] {
                continue;
            }
            let (a, b) = (&rects[i], &rects[j]);
            let contained = a.x >= b.x - EPS
                && a.y >= b.y - EPS
                && a.x + a.w <= b.x + b.w + EPS
                && a.y + a.h <= b.y + b.h + EPS;
            if contained {
                keep[i] = false;
            }
        }
    }
    let mut index = 0;
    rects.retain(|_| {
        let kept = keep[index];
        index += 1;
        kept
    });
}

/// Spiral packer: walk an Archimedean spiral from the bed center and
/// seat each piece at the first collision-free station.
fn pack_spiral(cells: &[Cell], bed_w: f64, bed_h: f64) -> GeometryResult<Vec<(f64, f64)>> {
    let center = (bed_w / 2.0, bed_h / 2.0);
    let max_radius = (bed_w * bed_w + bed_h * bed_h).sqrt();
    let mut origins: Vec<(f64, f64)> = Vec::with_capacity(cells.len());
    let mut placed: Vec<(f64, f64, Cell)> = Vec::with_capacity(cells.len());

    for (i, cell) in cells.iter().enumerate() {
        let mut theta = 0.0f64;
        let mut seated = false;
        while SPIRAL_RADIUS_PER_RAD * theta <= max_radius {
            let r = SPIRAL_RADIUS_PER_RAD * theta;
            let cx = center.0 + r * theta.cos();
            let cy = center.1 + r * theta.sin();
            let x = cx - cell.w / 2.0;
            let y = cy - cell.h / 2.0;

            let inside =
                x >= 0.0 && y >= 0.0 && x + cell.w <= bed_w && y + cell.h <= bed_h;
            let clear = placed.iter().all(|&(px, py, pc)| {
                x + cell.w <= px || px + pc.w <= x || y + cell.h <= py || py + pc.h <= y
            });
            if inside && clear {
                origins.push((x, y));
                placed.push((x, y, *cell));
                seated = true;
                break;
            }
            theta += SPIRAL_THETA_STEP;
        }
        if !seated {
            return Err(GeometryError::layout_rejected(format!(
                "piece {i} cannot be seated on the spiral"
            )));
        }
    }
    Ok(origins)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BED: (f64, f64) = (220.0, 220.0);

    #[test]
    fn test_grid_packs_uniform_pieces() {
        let pieces = vec![(50.0, 50.0); 4];
        let layout = pack_plate(&pieces, BED, 3.0, PackingAlgorithm::Grid).unwrap();
        assert_eq!(layout.placements.len(), 4);
        // Four 53-wide cells fit one row on a 220 bed.
        let ys: Vec<f64> = layout.placements.iter().map(|p| p.y).collect();
        assert!(ys.iter().all(|&y| (y - ys[0]).abs() < 1e-9));
        assert!((layout.utilization - 4.0 * 2500.0 / (220.0 * 220.0)).abs() < 1e-9);
    }

    #[test]
    fn test_single_piece_matches_grid_row() {
        let layout =
            pack_plate(&[(40.0, 30.0)], BED, 3.0, PackingAlgorithm::BinPacking).unwrap();
        let grid = pack_plate(&[(40.0, 30.0)], BED, 3.0, PackingAlgorithm::Grid).unwrap();
        assert_eq!(layout.placements[0], grid.placements[0]);
        assert_eq!(layout.placements[0].x, 1.5);
        assert_eq!(layout.placements[0].rotation_z, 0.0);
    }

    #[test]
    fn test_grid_rejects_overfull_bed() {
        let pieces = vec![(100.0, 100.0); 8];
        let result = pack_plate(&pieces, BED, 3.0, PackingAlgorithm::Grid);
        assert!(matches!(result, Err(GeometryError::LayoutRejected { .. })));
    }

    #[test]
    fn test_bin_packing_no_overlap_invariant() {
        let pieces = vec![
            (80.0, 40.0),
            (30.0, 90.0),
            (60.0, 60.0),
            (20.0, 20.0),
            (45.0, 25.0),
        ];
        let layout = pack_plate(&pieces, BED, 3.0, PackingAlgorithm::BinPacking).unwrap();
        assert_eq!(layout.placements.len(), pieces.len());
        // verify_layout ran inside pack_plate; spot-check the margin.
        for (p, &(w, h)) in layout.placements.iter().zip(&pieces) {
            assert!(p.x >= 1.5 - 1e-9);
            assert!(p.x + w <= 220.0 - 1.5 + 1e-9);
            assert!(p.y + h <= 220.0 - 1.5 + 1e-9);
        }
    }

    #[test]
    fn test_bin_packing_falls_back_to_grid_shape() {
        // Pieces that fit a grid but defeat maxrects cannot be easily
        // constructed at this size; instead check the documented
        // fallback path end-to-end with an unpackable set.
        let pieces = vec![(150.0, 150.0), (150.0, 150.0)];
        let result = pack_plate(&pieces, BED, 3.0, PackingAlgorithm::BinPacking);
        // Neither maxrects nor grid can seat two 153-cells on 220.
        assert!(result.is_err());
    }

    #[test]
    fn test_spiral_seats_first_piece_near_center() {
        let layout = pack_plate(&[(40.0, 40.0)], BED, 3.0, PackingAlgorithm::Spiral).unwrap();
        let p = layout.placements[0];
        assert!((p.x + 20.0 - 110.0).abs() < 1.0);
        assert!((p.y + 20.0 - 110.0).abs() < 1.0);
    }

    #[test]
    fn test_spiral_packs_several_without_overlap() {
        let pieces = vec![(40.0, 40.0); 5];
        let layout = pack_plate(&pieces, BED, 3.0, PackingAlgorithm::Spiral).unwrap();
        assert_eq!(layout.placements.len(), 5);
    }

    #[test]
    fn test_spiral_rejects_oversize_piece() {
        let result = pack_plate(&[(230.0, 10.0)], BED, 3.0, PackingAlgorithm::Spiral);
        assert!(matches!(result, Err(GeometryError::LayoutRejected { .. })));
    }

    #[test]
    fn test_degenerate_footprint_rejected() {
        let result = pack_plate(&[(0.0, 10.0)], BED, 3.0, PackingAlgorithm::Grid);
        assert!(result.is_err());
    }
}
