//! Pipeline configuration structs.
//!
//! The wizard used to pass free-form dicts through the pipeline; these
//! enumerated structs replace them. Every field has a serde default so a
//! partial JSON payload from the HTTP surface deserializes cleanly.

use serde::{Deserialize, Serialize};

/// Orientation search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrientationMethod {
    /// Pick gradient below 50k faces, grid above.
    #[default]
    Auto,
    /// Multistart steepest ascent with momentum.
    Gradient,
    /// Coarse enumeration of the axis-angle product.
    Grid,
}

/// Plate packing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PackingAlgorithm {
    /// Offline best-fit on rectangles (MaxRects, best-long-side-fit).
    #[default]
    BinPacking,
    /// Left-to-right rows advancing by the tallest piece.
    Grid,
    /// Center-out Archimedean spiral.
    Spiral,
}

/// Pre-rotation settings for a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub method: OrientationMethod,
    /// Minimum contact-area improvement (percent) before a rotation is applied.
    #[serde(default = "default_improvement_threshold")]
    pub improvement_threshold: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Grid step in degrees.
    #[serde(default = "default_rotation_step")]
    pub rotation_step: f64,
    /// Cap on grid evaluations.
    #[serde(default = "default_max_rotations")]
    pub max_rotations: u32,
}

fn default_improvement_threshold() -> f64 {
    5.0
}

fn default_max_iterations() -> u32 {
    50
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_rotation_step() -> f64 {
    30.0
}

fn default_max_rotations() -> u32 {
    512
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            method: OrientationMethod::Auto,
            improvement_threshold: default_improvement_threshold(),
            max_iterations: default_max_iterations(),
            learning_rate: default_learning_rate(),
            rotation_step: default_rotation_step(),
            max_rotations: default_max_rotations(),
        }
    }
}

/// Plate packing settings for a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub algorithm: PackingAlgorithm,
    /// Clearance between pieces and to the bed edge, in mm.
    #[serde(default = "default_spacing")]
    pub spacing: f64,
    /// Reserved for 3D nesting into hollows; not consulted by the current
    /// layout pipeline.
    #[serde(default)]
    pub enable_nesting: bool,
}

fn default_spacing() -> f64 {
    3.0
}

impl Default for PlatingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: PackingAlgorithm::BinPacking,
            spacing: default_spacing(),
            enable_nesting: false,
        }
    }
}

/// Slicing profile reference plus bed geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Identifier of a slicing profile registered with the slicer
    /// out-of-band; passed through as `custom_profile`.
    pub job_id: String,
    /// Bed size (width, height) in mm.
    #[serde(default = "default_bed_size")]
    pub bed_size: (f64, f64),
}

fn default_bed_size() -> (f64, f64) {
    (220.0, 220.0)
}
