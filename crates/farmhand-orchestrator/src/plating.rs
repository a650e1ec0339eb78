//! Plate combination: pack several meshes onto one bed and emit a
//! single combined STL for slicing.

use std::path::Path;

use farmhand_core::config::{PlatingConfig, ProfileConfig};
use farmhand_core::COMBINED_PLATE_FILENAME;
use farmhand_geometry::{io, pack_plate, Mesh, MeshFormat};
use nalgebra::Vector3;
use tracing::info;

/// Result of a successful plate build.
#[derive(Debug, Clone)]
pub(crate) struct PlateBuild {
    pub utilization: f64,
    pub piece_count: usize,
}

/// Pack the given meshes and write `combined_plating.stl` into the
/// session working directory. Pure CPU plus one file write; the caller
/// runs this on a blocking worker.
pub(crate) fn build_combined_plate(
    named_bytes: &[(String, Vec<u8>)],
    plating: &PlatingConfig,
    profile: &ProfileConfig,
    workdir: &Path,
) -> Result<PlateBuild, String> {
    let mut meshes = Vec::with_capacity(named_bytes.len());
    for (name, bytes) in named_bytes {
        let mesh = io::load_mesh_bytes(bytes, MeshFormat::sniff(bytes))
            .map_err(|e| format!("cannot read '{name}' for plating: {e}"))?;
        meshes.push(mesh);
    }

    let footprints: Vec<(f64, f64)> = meshes.iter().map(|m| m.footprint()).collect();
    let layout = pack_plate(
        &footprints,
        profile.bed_size,
        plating.spacing,
        plating.algorithm,
    )
    .map_err(|e| format!("packing failed: {e}"))?;

    // Seat every piece at its placement, resting on the bed plane.
    // Loaded meshes are guaranteed non-empty, so bounds always exist.
    let placed: Vec<Mesh> = meshes
        .iter()
        .zip(&layout.placements)
        .filter_map(|(mesh, placement)| {
            let (min, _) = mesh.bounds()?;
            Some(mesh.translated(Vector3::new(
                placement.x - min.x,
                placement.y - min.y,
                -min.z,
            )))
        })
        .collect();

    let combined = Mesh::merged(placed.iter());
    let path = workdir.join(COMBINED_PLATE_FILENAME);
    io::save_stl(&combined, &path).map_err(|e| format!("cannot write combined plate: {e}"))?;

    info!(
        pieces = meshes.len(),
        utilization = layout.utilization,
        path = %path.display(),
        "combined plate written"
    );
    Ok(PlateBuild {
        utilization: layout.utilization,
        piece_count: meshes.len(),
    })
}
