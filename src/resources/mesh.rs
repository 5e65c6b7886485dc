use crate::data_structures::model::{MaterialSlot, MeshData, ModelVertex};

/**
 * Convert tobj models into mesh data. With `single_index` set, positions,
 * texture coordinates and normals all share the index buffer.
 */
pub fn obj_meshes(models: &[tobj::Model], file_name: &str) -> Vec<MeshData> {
    models
        .iter()
        .map(|m| {
            let vertices = (0..m.mesh.positions.len() / 3)
                .map(|i| ModelVertex {
                    position: [
                        m.mesh.positions[i * 3],
                        m.mesh.positions[i * 3 + 1],
                        m.mesh.positions[i * 3 + 2],
                    ],
                    tex_coords: [
                        m.mesh.texcoords.get(i * 2).map_or(0.0, |f| *f),
                        1.0 - m.mesh.texcoords.get(i * 2 + 1).map_or(0.0, |f| *f),
                    ],
                    normal: [
                        m.mesh.normals.get(i * 3).map_or(0.0, |f| *f),
                        m.mesh.normals.get(i * 3 + 1).map_or(0.0, |f| *f),
                        m.mesh.normals.get(i * 3 + 2).map_or(0.0, |f| *f),
                    ],
                })
                .collect::<Vec<_>>();

            let name = if m.name.is_empty() {
                file_name.to_string()
            } else {
                format!("{}:{}", file_name, m.name)
            };
            MeshData {
                name,
                vertices,
                indices: m.mesh.indices.clone(),
                material: Some(MaterialSlot::new(m.mesh.material_id.unwrap_or(0))),
            }
        })
        .collect()
}

/// Read one glTF primitive. `buffers` are the document's loaded buffers.
pub fn gltf_primitive(
    primitive: &gltf::Primitive,
    name: String,
    buffers: &[gltf::buffer::Data],
) -> MeshData {
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|d| d.0.as_slice()));

    let mut vertices = Vec::new();
    if let Some(positions) = reader.read_positions() {
        vertices.extend(positions.map(|position| ModelVertex {
            position,
            ..Default::default()
        }));
    }
    if let Some(normals) = reader.read_normals() {
        for (vertex, normal) in vertices.iter_mut().zip(normals) {
            vertex.normal = normal;
        }
    }
    if let Some(tex_coords) = reader.read_tex_coords(0).map(|v| v.into_f32()) {
        for (vertex, tex_coord) in vertices.iter_mut().zip(tex_coords) {
            vertex.tex_coords = tex_coord;
        }
    }

    let indices = reader
        .read_indices()
        .map(|indices| indices.into_u32().collect())
        .unwrap_or_default();

    let material = primitive.material();
    let mut slot = MaterialSlot::new(material.index().unwrap_or(0));
    // blended surfaces don't occlude light
    slot.cast_shadow = !matches!(material.alpha_mode(), gltf::material::AlphaMode::Blend);

    MeshData {
        name,
        vertices,
        indices,
        material: Some(slot),
    }
}
