//! Optimal-orientation search.
//!
//! Two strategies share one objective (maximize contact area):
//! - Gradient: multistart steepest ascent with momentum
//! - Grid: coarse enumeration of the axis-angle product
//!
//! The search never fails across the boundary: any internal fault yields
//! the identity rotation with the fault recorded in the diagnostics.

use farmhand_core::config::{OrientationMethod, RotationConfig};
use tracing::debug;

use crate::contact::contact_area;
use crate::mesh::Mesh;
use crate::rotation::Rotation;

/// Strategic seed orientations evaluated before every gradient run.
const SEED_ORIENTATIONS: [[f64; 3]; 8] = [
    [0.0, 0.0, 0.0],
    [90.0, 0.0, 0.0],
    [180.0, 0.0, 0.0],
    [0.0, 90.0, 0.0],
    [0.0, 180.0, 0.0],
    [0.0, 0.0, 90.0],
    [90.0, 90.0, 0.0],
    [180.0, 90.0, 0.0],
];
/// Reproducible pseudo-random seeds added to the multistart set.
const RANDOM_SEED_COUNT: usize = 7;
/// Face count above which `Auto` switches from gradient to grid.
const GRADIENT_FACE_LIMIT: usize = 50_000;
/// Central-difference step in degrees.
const GRADIENT_STEP: f64 = 1e-3;
/// Gradient-norm early-stop threshold.
const CONVERGENCE_EPS: f64 = 1e-4;
/// Momentum coefficient for steepest ascent.
const MOMENTUM: f64 = 0.9;

/// Search telemetry returned alongside the result.
#[derive(Debug, Clone, Default)]
pub struct OrientationDiagnostics {
    /// Strategy actually used after `Auto` resolution.
    pub method: &'static str,
    pub iterations: u32,
    pub evaluations: u32,
    pub converged: bool,
    pub gradient_norms: Vec<f64>,
    /// Set when an internal failure forced the identity fallback.
    pub fault: Option<String>,
}

/// Result of an orientation search.
#[derive(Debug, Clone)]
pub struct OrientationOutcome {
    pub rotation: Rotation,
    pub contact_area: f64,
    pub original_area: f64,
    pub improvement_pct: f64,
    pub diagnostics: OrientationDiagnostics,
}

impl OrientationOutcome {
    /// Whether the rotation clears the configured improvement threshold.
    pub fn applied(&self, threshold_pct: f64) -> bool {
        !self.rotation.is_identity() && self.improvement_pct > threshold_pct
    }

    fn identity_fallback(original_area: f64, fault: Option<String>) -> Self {
        Self {
            rotation: Rotation::identity(),
            contact_area: original_area,
            original_area,
            improvement_pct: 0.0,
            diagnostics: OrientationDiagnostics {
                method: "identity",
                fault,
                ..Default::default()
            },
        }
    }
}

/// Find the orientation maximizing contact area.
pub fn optimize_orientation(mesh: &Mesh, config: &RotationConfig) -> OrientationOutcome {
    let original_area = safe_area(mesh, &Rotation::identity());
    if mesh.is_empty() {
        return OrientationOutcome::identity_fallback(0.0, Some("empty mesh".to_string()));
    }

    let method = resolve_method(config.method, mesh.face_count());
    let outcome = match method {
        OrientationMethod::Gradient => gradient_search(mesh, config, original_area),
        OrientationMethod::Grid => grid_search(mesh, config, original_area),
        OrientationMethod::Auto => unreachable!("resolved above"),
    };

    match outcome {
        Ok(result) => result,
        Err(fault) => {
            debug!(fault = %fault, "orientation search fault; falling back to identity");
            OrientationOutcome::identity_fallback(original_area, Some(fault))
        }
    }
}

fn resolve_method(requested: OrientationMethod, face_count: usize) -> OrientationMethod {
    match requested {
        OrientationMethod::Auto => {
            if face_count < GRADIENT_FACE_LIMIT {
                OrientationMethod::Gradient
            } else {
                OrientationMethod::Grid
            }
        }
        other => other,
    }
}

/// Contact area with NaN/∞ coerced to 0 so a bad triangle cannot poison
/// the ascent.
fn safe_area(mesh: &Mesh, rotation: &Rotation) -> f64 {
    let area = contact_area(mesh, rotation);
    if area.is_finite() {
        area
    } else {
        0.0
    }
}

fn improvement_pct(area: f64, original: f64) -> f64 {
    if original <= f64::EPSILON {
        if area > f64::EPSILON {
            100.0
        } else {
            0.0
        }
    } else {
        (area - original) / original * 100.0
    }
}

/// Deterministic LCG over [0, 360) triples; same seeds on every run.
fn pseudo_random_seeds(count: usize) -> Vec<[f64; 3]> {
    let mut state: u64 = 0x5eed_cafe_f00d_0001;
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((state >> 33) as f64 / (1u64 << 31) as f64) * 360.0
    };
    (0..count).map(|_| [next(), next(), next()]).collect()
}

fn gradient_search(
    mesh: &Mesh,
    config: &RotationConfig,
    original_area: f64,
) -> Result<OrientationOutcome, String> {
    let mut diagnostics = OrientationDiagnostics {
        method: "gradient",
        ..Default::default()
    };

    // Phase 1: multistart over strategic plus pseudo-random seeds.
    let mut best_angles = [0.0; 3];
    let mut best_area = f64::NEG_INFINITY;
    let seeds = SEED_ORIENTATIONS
        .iter()
        .copied()
        .chain(pseudo_random_seeds(RANDOM_SEED_COUNT));
    for angles in seeds {
        let area = safe_area(mesh, &Rotation::from_degrees(angles));
        diagnostics.evaluations += 1;
        if area > best_area {
            best_area = area;
            best_angles = angles;
        }
    }
    if !best_area.is_finite() {
        return Err("no finite seed evaluation".to_string());
    }

    // Phase 2: steepest ascent with momentum from the best seed.
    let mut angles = best_angles;
    let mut velocity = [0.0; 3];
    for _ in 0..config.max_iterations {
        diagnostics.iterations += 1;

        let mut gradient = [0.0; 3];
        for axis in 0..3 {
            let mut plus = angles;
            let mut minus = angles;
            plus[axis] += GRADIENT_STEP;
            minus[axis] -= GRADIENT_STEP;
            let a_plus = safe_area(mesh, &Rotation::from_degrees(plus));
            let a_minus = safe_area(mesh, &Rotation::from_degrees(minus));
            diagnostics.evaluations += 2;
            gradient[axis] = (a_plus - a_minus) / (2.0 * GRADIENT_STEP);
        }

        let norm = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
        diagnostics.gradient_norms.push(norm);
        if norm < CONVERGENCE_EPS {
            diagnostics.converged = true;
            break;
        }

        for axis in 0..3 {
            velocity[axis] = MOMENTUM * velocity[axis] + config.learning_rate * gradient[axis];
            angles[axis] = (angles[axis] + velocity[axis]).rem_euclid(360.0);
        }

        let stepped = safe_area(mesh, &Rotation::from_degrees(angles));
        diagnostics.evaluations += 1;
        if stepped > best_area {
            best_area = stepped;
            best_angles = angles;
        }
    }

    debug!(
        iterations = diagnostics.iterations,
        evaluations = diagnostics.evaluations,
        converged = diagnostics.converged,
        best_area,
        "gradient orientation search finished"
    );

    Ok(OrientationOutcome {
        rotation: Rotation::from_degrees(best_angles),
        contact_area: best_area,
        original_area,
        improvement_pct: improvement_pct(best_area, original_area),
        diagnostics,
    })
}

fn grid_search(
    mesh: &Mesh,
    config: &RotationConfig,
    original_area: f64,
) -> Result<OrientationOutcome, String> {
    let step = config.rotation_step;
    if !(step > 0.0) || !step.is_finite() {
        return Err(format!("invalid rotation step: {step}"));
    }
    let mut diagnostics = OrientationDiagnostics {
        method: "grid",
        ..Default::default()
    };

    let steps_per_axis = (360.0 / step).ceil() as u32;
    let mut best_angles = [0.0; 3];
    let mut best_area = f64::NEG_INFINITY;

    'outer: for ix in 0..steps_per_axis {
        for iy in 0..steps_per_axis {
            for iz in 0..steps_per_axis {
                if diagnostics.evaluations >= config.max_rotations {
                    break 'outer;
                }
                let angles = [ix as f64 * step, iy as f64 * step, iz as f64 * step];
                let area = safe_area(mesh, &Rotation::from_degrees(angles));
                diagnostics.evaluations += 1;
                if area > best_area {
                    best_area = area;
                    best_angles = angles;
                }
            }
        }
    }
    if !best_area.is_finite() {
        return Err("grid produced no finite evaluation".to_string());
    }

    Ok(OrientationOutcome {
        rotation: Rotation::from_degrees(best_angles),
        contact_area: best_area,
        original_area,
        improvement_pct: improvement_pct(best_area, original_area),
        diagnostics,
    })
}
