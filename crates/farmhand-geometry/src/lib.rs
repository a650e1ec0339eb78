//! # Farmhand Geometry
//!
//! The geometry kernel behind the batch orchestrator:
//! - Triangle-soup mesh with STL / 3MF I/O
//! - Contact-area scoring and optimal-orientation search
//! - 2D plate packing (bin-packing / grid / spiral)
//! - Voxel grid collision and hollow-topology analysis
//!
//! Units are millimeters throughout. All types here are plain data; the
//! kernel performs no I/O beyond explicit load/save calls and holds no
//! shared state, so calls are safe to run on a blocking worker pool.

pub mod contact;
pub mod error;
pub mod io;
pub mod mesh;
pub mod orient;
pub mod packing;
pub mod rotation;
pub mod topology;
pub mod voxel;

pub use contact::contact_area;
pub use error::{GeometryError, GeometryResult};
pub use io::MeshFormat;
pub use mesh::{Mesh, Triangle};
pub use orient::{optimize_orientation, OrientationDiagnostics, OrientationOutcome};
pub use packing::{pack_plate, Placement, PlateLayout};
pub use rotation::Rotation;
pub use topology::{analyze_hollows, HollowAnalysis, HollowShape};
pub use voxel::VoxelGrid;
