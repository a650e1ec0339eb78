//! Mesh I/O for STL (binary and ASCII) and 3MF.
//!
//! The orchestrator works on byte buffers that travel to the slicer, so
//! everything here has an in-memory variant next to the path variant.

use std::io::{Cursor, Read};
use std::path::Path;

use nalgebra::Point3;
use tracing::debug;

use crate::error::{GeometryError, GeometryResult};
use crate::mesh::Mesh;

/// Supported mesh file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    Stl,
    ThreeMf,
}

impl MeshFormat {
    /// Detect format from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .and_then(|ext| match ext.as_str() {
                "stl" => Some(MeshFormat::Stl),
                "3mf" => Some(MeshFormat::ThreeMf),
                _ => None,
            })
    }

    /// Detect format by sniffing the first bytes: 3MF is a zip archive,
    /// anything else is treated as STL (stl_io handles both encodings).
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(b"PK\x03\x04") {
            MeshFormat::ThreeMf
        } else {
            MeshFormat::Stl
        }
    }
}

/// Load a mesh from an in-memory buffer.
pub fn load_mesh_bytes(bytes: &[u8], format: MeshFormat) -> GeometryResult<Mesh> {
    let mesh = match format {
        MeshFormat::Stl => load_stl_bytes(bytes)?,
        MeshFormat::ThreeMf => load_3mf_bytes(bytes)?,
    };
    if mesh.is_empty() {
        return Err(GeometryError::EmptyMesh);
    }
    debug!(
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "mesh loaded"
    );
    Ok(mesh)
}

/// Load a mesh from disk, detecting the format from the extension and
/// falling back to content sniffing.
pub fn load_mesh(path: &Path) -> GeometryResult<Mesh> {
    let bytes = std::fs::read(path)?;
    let format = MeshFormat::from_path(path).unwrap_or_else(|| MeshFormat::sniff(&bytes));
    load_mesh_bytes(&bytes, format)
}

/// Serialize a mesh as binary STL.
pub fn stl_bytes(mesh: &Mesh) -> GeometryResult<Vec<u8>> {
    let triangles: Vec<stl_io::Triangle> = mesh
        .triangles()
        .map(|t| stl_io::Triangle {
            // Readers recompute normals from winding.
            normal: stl_io::Normal::new([0.0, 0.0, 0.0]),
            vertices: [
                stl_io::Vertex::new([t.v0.x as f32, t.v0.y as f32, t.v0.z as f32]),
                stl_io::Vertex::new([t.v1.x as f32, t.v1.y as f32, t.v1.z as f32]),
                stl_io::Vertex::new([t.v2.x as f32, t.v2.y as f32, t.v2.z as f32]),
            ],
        })
        .collect();

    let mut buf = Cursor::new(Vec::new());
    stl_io::write_stl(&mut buf, triangles.iter())?;
    Ok(buf.into_inner())
}

/// Write a mesh to disk as binary STL.
pub fn save_stl(mesh: &Mesh, path: &Path) -> GeometryResult<()> {
    let bytes = stl_bytes(mesh)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Convert a 3MF buffer to binary STL bytes in memory.
pub fn three_mf_to_stl_bytes(bytes: &[u8]) -> GeometryResult<Vec<u8>> {
    let mesh = load_3mf_bytes(bytes)?;
    if mesh.is_empty() {
        return Err(GeometryError::EmptyMesh);
    }
    stl_bytes(&mesh)
}

fn load_stl_bytes(bytes: &[u8]) -> GeometryResult<Mesh> {
    let mut reader = Cursor::new(bytes);
    let stl = stl_io::read_stl(&mut reader).map_err(|e| GeometryError::parse(e.to_string()))?;

    let vertices = stl
        .vertices
        .iter()
        .map(|v| Point3::new(v[0] as f64, v[1] as f64, v[2] as f64))
        .collect();
    let faces = stl
        .faces
        .iter()
        .filter(|f| {
            let [a, b, c] = f.vertices;
            a != b && b != c && a != c
        })
        .map(|f| {
            [
                f.vertices[0] as u32,
                f.vertices[1] as u32,
                f.vertices[2] as u32,
            ]
        })
        .collect();
    Ok(Mesh::from_parts(vertices, faces))
}

fn load_3mf_bytes(bytes: &[u8]) -> GeometryResult<Mesh> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| GeometryError::parse(format!("invalid 3MF archive: {e}")))?;

    let model_path = find_3mf_model_path(&mut archive)?;
    let mut xml = String::new();
    archive
        .by_name(&model_path)
        .map_err(|e| GeometryError::parse(format!("cannot open model file '{model_path}': {e}")))?
        .read_to_string(&mut xml)?;

    parse_3mf_model(&xml)
}

fn find_3mf_model_path(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
) -> GeometryResult<String> {
    let names: Vec<String> = archive.file_names().map(String::from).collect();
    if names.iter().any(|n| n == "3D/3dmodel.model") {
        return Ok("3D/3dmodel.model".to_string());
    }
    names
        .into_iter()
        .find(|n| n.ends_with(".model"))
        .ok_or_else(|| GeometryError::parse("no model file found in 3MF archive"))
}

/// Parse the 3MF model XML: all mesh objects are merged into one soup.
fn parse_3mf_model(xml: &str) -> GeometryResult<Mesh> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut vertices: Vec<Point3<f64>> = Vec::new();
    let mut faces: Vec<[u32; 3]> = Vec::new();
    let mut object_base = 0u32;
    let mut in_vertices = false;
    let mut in_triangles = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                match e.local_name().as_ref() {
                    b"mesh" => object_base = vertices.len() as u32,
                    b"vertices" => in_vertices = true,
                    b"triangles" => in_triangles = true,
                    b"vertex" if in_vertices => {
                        let mut coords = [0.0f64; 3];
                        for attr in e.attributes().flatten() {
                            let value = String::from_utf8_lossy(&attr.value);
                            match attr.key.local_name().as_ref() {
                                b"x" => coords[0] = value.parse().unwrap_or(0.0),
                                b"y" => coords[1] = value.parse().unwrap_or(0.0),
                                b"z" => coords[2] = value.parse().unwrap_or(0.0),
                                _ => {}
                            }
                        }
                        vertices.push(Point3::new(coords[0], coords[1], coords[2]));
                    }
                    b"triangle" if in_triangles => {
                        let mut idx = [0u32; 3];
                        for attr in e.attributes().flatten() {
                            let value = String::from_utf8_lossy(&attr.value);
                            match attr.key.local_name().as_ref() {
                                b"v1" => idx[0] = value.parse().unwrap_or(0),
                                b"v2" => idx[1] = value.parse().unwrap_or(0),
                                b"v3" => idx[2] = value.parse().unwrap_or(0),
                                _ => {}
                            }
                        }
                        faces.push([
                            idx[0] + object_base,
                            idx[1] + object_base,
                            idx[2] + object_base,
                        ]);
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"vertices" => in_vertices = false,
                b"triangles" => in_triangles = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(GeometryError::parse(format!("XML parse error: {e}")));
            }
            _ => {}
        }
    }

    Ok(Mesh::from_parts(vertices, faces))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::test_meshes::cube;
    use std::io::Write;

    fn sample_3mf() -> Vec<u8> {
        let model = r#"<?xml version="1.0" encoding="UTF-8"?>
<model unit="millimeter" xmlns="http://schemas.microsoft.com/3dmanufacturing/core/2015/02">
  <resources>
    <object id="1" type="model">
      <mesh>
        <vertices>
          <vertex x="0" y="0" z="0"/>
          <vertex x="10" y="0" z="0"/>
          <vertex x="0" y="10" z="0"/>
          <vertex x="0" y="0" z="10"/>
        </vertices>
        <triangles>
          <triangle v1="0" v2="1" v3="2"/>
          <triangle v1="0" v2="1" v3="3"/>
          <triangle v1="0" v2="2" v3="3"/>
          <triangle v1="1" v2="2" v3="3"/>
        </triangles>
      </mesh>
    </object>
  </resources>
  <build><item objectid="1"/></build>
</model>"#;
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("3D/3dmodel.model", options).unwrap();
            zip.write_all(model.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_stl_bytes_roundtrip() {
        let mesh = cube(10.0);
        let bytes = stl_bytes(&mesh).unwrap();
        let loaded = load_mesh_bytes(&bytes, MeshFormat::Stl).unwrap();
        assert_eq!(loaded.face_count(), mesh.face_count());
        assert!((loaded.surface_area() - mesh.surface_area()).abs() < 1e-3);
    }

    #[test]
    fn test_ascii_stl_loads() {
        let ascii = "solid tri\n facet normal 0 0 1\n  outer loop\n   vertex 0 0 0\n   vertex 10 0 0\n   vertex 0 10 0\n  endloop\n endfacet\nendsolid tri\n";
        let mesh = load_mesh_bytes(ascii.as_bytes(), MeshFormat::Stl).unwrap();
        assert_eq!(mesh.face_count(), 1);
        assert!((mesh.surface_area() - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_3mf_loads_tetrahedron() {
        let bytes = sample_3mf();
        assert_eq!(MeshFormat::sniff(&bytes), MeshFormat::ThreeMf);
        let mesh = load_mesh_bytes(&bytes, MeshFormat::ThreeMf).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.face_count(), 4);
    }

    #[test]
    fn test_3mf_to_stl_conversion() {
        let stl = three_mf_to_stl_bytes(&sample_3mf()).unwrap();
        let mesh = load_mesh_bytes(&stl, MeshFormat::Stl).unwrap();
        assert_eq!(mesh.face_count(), 4);
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let result = load_mesh_bytes(b"PK\x03\x04not really a zip", MeshFormat::ThreeMf);
        assert!(matches!(result, Err(GeometryError::Parse { .. })));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            MeshFormat::from_path(Path::new("part.STL")),
            Some(MeshFormat::Stl)
        );
        assert_eq!(
            MeshFormat::from_path(Path::new("part.3mf")),
            Some(MeshFormat::ThreeMf)
        );
        assert_eq!(MeshFormat::from_path(Path::new("part.obj")), None);
    }
}
