//! Model assets: a list of meshes plus the placements that instance them.
//!
//! `.obj` files are read with tobj and give one mesh per object, each placed
//! once at the origin. `.gltf`/`.glb` files give one mesh per primitive and
//! one placement for every node that references it, with the node's
//! accumulated transform.

use std::{
    io::{BufReader, Cursor},
    path::Path,
};

use anyhow::Context as _;
use cgmath::Quaternion;

use crate::{
    context::{GpuBackend, GpuContext, GpuError},
    data_structures::{
        instance::Instance,
        model::{Aabb, Mesh, MeshData, Placement},
    },
    resources::{Asset, AssetKind, mesh},
};

pub struct Model<B: GpuBackend> {
    pub name: String,
    meshes: Vec<Mesh<B>>,
    placements: Vec<Placement>,
}

impl<B: GpuBackend> Model<B> {
    /// Assemble a model from uploaded meshes. Placements that point at a
    /// missing mesh are dropped.
    pub fn from_parts(name: &str, meshes: Vec<Mesh<B>>, placements: Vec<Placement>) -> Self {
        let placements = placements
            .into_iter()
            .filter(|p| {
                let known = p.mesh_id < meshes.len();
                if !known {
                    log::warn!("Model {} places unknown mesh {}", name, p.mesh_id);
                }
                known
            })
            .collect();
        Self {
            name: name.to_string(),
            meshes,
            placements,
        }
    }

    /// Upload `data` and assemble a model from it.
    pub fn from_mesh_data(
        ctx: &GpuContext<B>,
        name: &str,
        data: &[MeshData],
        placements: Vec<Placement>,
    ) -> Result<Self, GpuError> {
        let meshes = data
            .iter()
            .map(|d| Mesh::new(ctx, d))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_parts(name, meshes, placements))
    }

    pub fn mesh(&self, id: usize) -> Option<&Mesh<B>> {
        self.meshes.get(id)
    }

    pub fn meshes(&self) -> &[Mesh<B>] {
        &self.meshes
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    /// How many placements reference each mesh, indexed by mesh id.
    pub fn placement_tally(&self) -> Vec<usize> {
        let mut tally = vec![0; self.meshes.len()];
        for placement in &self.placements {
            tally[placement.mesh_id] += 1;
        }
        tally
    }

    /// Bounds of all placed meshes, `None` if nothing is placed.
    pub fn bounds(&self) -> Option<Aabb> {
        self.placements
            .iter()
            .filter_map(|p| Some(self.mesh(p.mesh_id)?.bounds.transformed(&p.transform)))
            .reduce(|acc, b| acc.union(&b))
    }
}

impl<B: GpuBackend> Asset for Model<B> {
    type Context = GpuContext<B>;

    const KIND: AssetKind = AssetKind::Model;

    fn load(name: &str, ctx: &Self::Context) -> anyhow::Result<Self> {
        let path = ctx.asset_path(name);
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let (data, placements) = match extension.as_deref() {
            Some("obj") => load_obj(name, &path)?,
            Some("gltf") | Some("glb") => load_gltf(name, &path)?,
            _ => anyhow::bail!("unsupported model format: {}", path.display()),
        };
        let model = Self::from_mesh_data(ctx, name, &data, placements)?;
        log::debug!(
            "Model {} has {} meshes and {} placements",
            name,
            model.meshes.len(),
            model.placements.len()
        );
        Ok(model)
    }
}

fn load_obj(name: &str, path: &Path) -> anyhow::Result<(Vec<MeshData>, Vec<Placement>)> {
    let obj_text = std::fs::read_to_string(path)
        .with_context(|| format!("reading model {}", path.display()))?;
    let mut obj_reader = BufReader::new(Cursor::new(obj_text));
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let (models, _materials) = futures::executor::block_on(tobj::load_obj_buf_async(
        &mut obj_reader,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        |p| {
            let mtl_path = base.join(&p);
            async move {
                match std::fs::read_to_string(&mtl_path) {
                    Ok(mat_text) => tobj::load_mtl_buf(&mut BufReader::new(Cursor::new(mat_text))),
                    Err(_) => {
                        log::warn!("Material library {} not found", mtl_path.display());
                        Err(tobj::LoadError::OpenFileFailed)
                    }
                }
            }
        },
    ))
    .with_context(|| format!("parsing model {}", path.display()))?;

    let data = mesh::obj_meshes(&models, name);
    let placements = (0..data.len())
        .map(|id| Placement::new(id, Instance::new()))
        .collect();
    Ok((data, placements))
}

fn load_gltf(name: &str, path: &Path) -> anyhow::Result<(Vec<MeshData>, Vec<Placement>)> {
    let (document, buffers, _images) =
        gltf::import(path).with_context(|| format!("importing model {}", path.display()))?;

    let mut data = Vec::new();
    let mut mesh_ids: Vec<Vec<usize>> = Vec::new();
    for gltf_mesh in document.meshes() {
        let mesh_name = gltf_mesh.name().unwrap_or(name);
        let ids = gltf_mesh
            .primitives()
            .map(|primitive| {
                let primitive_name = format!("{}#{}", mesh_name, primitive.index());
                data.push(mesh::gltf_primitive(&primitive, primitive_name, &buffers));
                data.len() - 1
            })
            .collect();
        mesh_ids.push(ids);
    }

    let mut placements = Vec::new();
    match document.default_scene().or_else(|| document.scenes().next()) {
        Some(scene) => {
            for node in scene.nodes() {
                collect_placements(&node, &Instance::new(), &mesh_ids, &mut placements);
            }
        }
        None => {
            placements.extend((0..data.len()).map(|id| Placement::new(id, Instance::new())));
        }
    }
    Ok((data, placements))
}

fn collect_placements(
    node: &gltf::Node,
    parent: &Instance,
    mesh_ids: &[Vec<usize>],
    out: &mut Vec<Placement>,
) {
    let (translation, rotation, scale) = node.transform().decomposed();
    let local = Instance {
        position: translation.into(),
        // glTF stores quaternions as [x, y, z, w]
        rotation: Quaternion::new(rotation[3], rotation[0], rotation[1], rotation[2]),
        scale: scale.into(),
    };
    let world = parent * &local;
    if let Some(node_mesh) = node.mesh() {
        for id in mesh_ids.get(node_mesh.index()).into_iter().flatten() {
            out.push(Placement::new(*id, world.clone()));
        }
    }
    for child in node.children() {
        collect_placements(&child, &world, mesh_ids, out);
    }
}
