// SPDX-License-Identifier: CEPL-1.0
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use flicker_render::Vertex;
use thiserror::Error;

const VERTEX_BYTES: usize = 12;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("cannot open mesh {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("mesh header is missing")]
    MissingHeader,

    #[error("mesh declares {expected} vertices but only {got} are present")]
    Truncated { expected: u32, got: u32 },

    #[error("mesh read failed: {0}")]
    Io(#[from] io::Error),
}

/// Vertex file: little-endian `u32` count, then `count` records of three
/// little-endian `f32`. Trailing bytes are ignored.
pub fn load_vertices<R: Read>(mut r: R) -> Result<Vec<Vertex>, MeshError> {
    let mut header = [0u8; 4];
    r.read_exact(&mut header).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => MeshError::MissingHeader,
        _ => MeshError::Io(e),
    })?;
    let count = u32::from_le_bytes(header);

    // the header is untrusted; grow as records actually arrive
    let mut out = Vec::with_capacity(count.min(1 << 16) as usize);
    let mut rec = [0u8; VERTEX_BYTES];
    for got in 0..count {
        if let Err(e) = r.read_exact(&mut rec) {
            return Err(match e.kind() {
                io::ErrorKind::UnexpectedEof => MeshError::Truncated {
                    expected: count,
                    got,
                },
                _ => MeshError::Io(e),
            });
        }
        let f = |i: usize| f32::from_le_bytes([rec[i], rec[i + 1], rec[i + 2], rec[i + 3]]);
        out.push(Vertex {
            pos: [f(0), f(4), f(8)],
        });
    }
    Ok(out)
}

pub fn load_file(path: &Path) -> Result<Vec<Vertex>, MeshError> {
    let file = File::open(path).map_err(|source| MeshError::Open {
        path: path.display().to_string(),
        source,
    })?;
    load_vertices(BufReader::new(file))
}

/// Unit cube centred on the origin, 12 triangles.
pub fn builtin_cube() -> Vec<Vertex> {
    const C: [[f32; 3]; 8] = [
        [-0.5, -0.5, -0.5],
        [0.5, -0.5, -0.5],
        [0.5, 0.5, -0.5],
        [-0.5, 0.5, -0.5],
        [-0.5, -0.5, 0.5],
        [0.5, -0.5, 0.5],
        [0.5, 0.5, 0.5],
        [-0.5, 0.5, 0.5],
    ];
    // two triangles per face: -Z, +Z, -X, +X, -Y, +Y
    const FACES: [[usize; 4]; 6] = [
        [0, 3, 2, 1],
        [4, 5, 6, 7],
        [0, 4, 7, 3],
        [1, 2, 6, 5],
        [0, 1, 5, 4],
        [3, 7, 6, 2],
    ];
    FACES
        .iter()
        .flat_map(|&[a, b, c, d]| [a, b, c, a, c, d])
        .map(|i| Vertex { pos: C[i] })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(verts: &[[f32; 3]], declared: u32) -> Vec<u8> {
        let mut bytes = declared.to_le_bytes().to_vec();
        for v in verts {
            for c in v {
                bytes.extend_from_slice(&c.to_le_bytes());
            }
        }
        bytes
    }

    #[test]
    fn reads_declared_vertices() {
        let bytes = encode(&[[1.0, 2.0, 3.0], [-0.5, 0.25, 8.0]], 2);
        let verts = load_vertices(bytes.as_slice()).unwrap();
        assert_eq!(
            verts,
            vec![
                Vertex { pos: [1.0, 2.0, 3.0] },
                Vertex { pos: [-0.5, 0.25, 8.0] }
            ]
        );
    }

    #[test]
    fn empty_mesh_is_fine() {
        let verts = load_vertices(&0u32.to_le_bytes()[..]).unwrap();
        assert!(verts.is_empty());
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut bytes = encode(&[[1.0, 1.0, 1.0]], 1);
        bytes.extend_from_slice(&[0xFF; 7]);
        assert_eq!(load_vertices(bytes.as_slice()).unwrap().len(), 1);
    }

    #[test]
    fn short_file_reports_how_far_it_got() {
        let mut bytes = encode(&[[1.0, 1.0, 1.0], [2.0, 2.0, 2.0]], 5);
        bytes.extend_from_slice(&[0; 5]);
        let err = load_vertices(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, MeshError::Truncated { expected: 5, got: 2 }));
    }

    #[test]
    fn missing_header() {
        let err = load_vertices(&[1u8, 0][..]).unwrap_err();
        assert!(matches!(err, MeshError::MissingHeader));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_file(Path::new("/nonexistent/flicker/mesh.vertex")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/flicker/mesh.vertex"));
    }

    #[test]
    fn cube_is_twelve_triangles_on_the_unit_box() {
        let cube = builtin_cube();
        assert_eq!(cube.len(), 36);
        assert!(cube.iter().all(|v| v.pos.iter().all(|c| c.abs() == 0.5)));
        // every triangle spans a non-degenerate area
        for tri in cube.chunks(3) {
            assert_ne!(tri[0], tri[1]);
            assert_ne!(tri[1], tri[2]);
            assert_ne!(tri[0], tri[2]);
        }
    }
}
