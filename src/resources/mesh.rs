use std::io::{BufReader, Cursor};

use cgmath::{InnerSpace, Vector3};

use crate::{
    data_structures::mesh::{MeshData, Vertex},
    gpu::Topology,
};

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    }
}

impl MeshData {
    /// Parses Wavefront OBJ text into one triangle list.
    ///
    /// Every object in the file is merged. Vertices get the default color;
    /// texture coordinates and normals are taken when the file has them.
    /// Missing normals are averaged from the faces around each vertex.
    /// Material libraries are ignored.
    pub fn from_obj_str(text: &str) -> anyhow::Result<Self> {
        let mut reader = BufReader::new(Cursor::new(text));
        let (models, _) = tobj::load_obj_buf(&mut reader, &load_options(), |_| {
            Err(tobj::LoadError::OpenFileFailed)
        })?;

        let mut data = MeshData {
            vertices: Vec::new(),
            indices: Vec::new(),
            topology: Topology::TriangleList,
        };
        for model in &models {
            let m = &model.mesh;
            let base = data.vertices.len() as u32;
            let mut vertices: Vec<Vertex> = (0..m.positions.len() / 3)
                .map(|i| {
                    Vertex::new(
                        [m.positions[i * 3], m.positions[i * 3 + 1], m.positions[i * 3 + 2]],
                        [
                            m.texcoords.get(i * 2).map_or(0.0, |f| *f),
                            1.0 - m.texcoords.get(i * 2 + 1).map_or(1.0, |f| *f),
                        ],
                        [
                            m.normals.get(i * 3).map_or(0.0, |f| *f),
                            m.normals.get(i * 3 + 1).map_or(0.0, |f| *f),
                            m.normals.get(i * 3 + 2).map_or(0.0, |f| *f),
                        ],
                    )
                })
                .collect();
            if m.normals.is_empty() {
                smooth_normals(&mut vertices, &m.indices);
            }
            data.vertices.extend(vertices);
            data.indices.extend(m.indices.iter().map(|i| base + i));
        }
        log::debug!(
            "parsed {} objects, {} vertices, {} indices",
            models.len(),
            data.vertices.len(),
            data.indices.len()
        );
        Ok(data)
    }
}

fn smooth_normals(vertices: &mut [Vertex], indices: &[u32]) {
    let mut sums = vec![Vector3::new(0.0f32, 0.0, 0.0); vertices.len()];
    for c in indices.chunks_exact(3) {
        let (i0, i1, i2) = (c[0] as usize, c[1] as usize, c[2] as usize);
        if i0.max(i1).max(i2) >= vertices.len() {
            continue;
        }
        let p0: Vector3<f32> = vertices[i0].position.into();
        let p1: Vector3<f32> = vertices[i1].position.into();
        let p2: Vector3<f32> = vertices[i2].position.into();
        // area weighted
        let face = (p1 - p0).cross(p2 - p0);
        for i in [i0, i1, i2] {
            sums[i] += face;
        }
    }
    for (vertex, sum) in vertices.iter_mut().zip(sums) {
        if sum.magnitude2() > 0.0 {
            vertex.normal = sum.normalize().into();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE: &str = "
v 0 0 0
v 1 0 0
v 0 1 0
f 1 2 3
";

    #[test]
    fn face_indices_become_zero_based() {
        let data = MeshData::from_obj_str(TRIANGLE).unwrap();
        assert_eq!(data.vertices.len(), 3);
        assert_eq!(data.indices, vec![0, 1, 2]);
        assert_eq!(data.topology, Topology::TriangleList);
        assert!(data.vertices.iter().all(|v| v.color == Vertex::DEFAULT_COLOR));
    }

    #[test]
    fn missing_normals_face_the_winding() {
        let data = MeshData::from_obj_str(TRIANGLE).unwrap();
        for vertex in &data.vertices {
            assert_eq!(vertex.normal, [0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn quads_are_triangulated() {
        let data = MeshData::from_obj_str(
            "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvn 0 0 1\nf 1//1 2//1 3//1 4//1\n",
        )
        .unwrap();
        assert_eq!(data.indices.len(), 6);
        assert!(data.vertices.iter().all(|v| v.normal == [0.0, 0.0, 1.0]));
    }
}
