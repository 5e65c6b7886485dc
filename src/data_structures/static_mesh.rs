//! Renderable entities built from a loaded model.
//!
//! A [`StaticMesh`] either stands for one placement of a model or for all of
//! them. If it was created with a [`MeshInstancer`] it never draws itself; its
//! transform is fed to the instancer each frame instead. Otherwise it keeps a
//! small instance pool of its own with one record per placement it stands for.

use std::{sync::Arc, time::Duration};

use cgmath::{Deg, Euler, Quaternion, Vector3};
use thiserror::Error;

use crate::{
    context::{GpuBackend, GpuContext, GpuError},
    data_structures::{
        instance::{Instance, InstanceRaw},
        instance_pool::InstancePool,
        instancer::{BatchId, MeshInstancer},
        model::{Aabb, Placement},
    },
    render::{DrawTarget, ShaderPass},
    resources::{AssetHandle, AssetState, model::Model},
};

/// How long [`StaticMesh::initialize`] sleeps between readiness checks.
const MODEL_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum EntityError {
    /// The model finished loading with an error (or was unloaded while queued).
    #[error("model '{name}' is not usable (state {state:?})")]
    ModelUnavailable { name: String, state: AssetState },

    #[error("placement {index} out of range, model has {count}")]
    PlacementOutOfRange { index: usize, count: usize },

    #[error("a batched entity must stand for exactly one placement")]
    BatchNeedsPlacement,

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub visible: bool,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            visible: true,
            cast_shadow: true,
            receive_shadow: true,
        }
    }
}

pub struct StaticMesh<B: GpuBackend> {
    model: AssetHandle<Model<B>>,
    placement: Option<usize>,
    mesh_id: Option<usize>,
    batch: Option<BatchId>,
    transform: Instance,
    options: RenderOptions,
    pool: Option<InstancePool<B, InstanceRaw>>,
    dirty: bool,
}

impl<B: GpuBackend> StaticMesh<B> {
    /// Create an entity for `model`.
    ///
    /// Blocks, polling the asset state, until the model has loaded.
    ///
    /// With `placement` the entity stands for that single placement and takes
    /// its transform and the mesh's shadow flags. Without it the entity stands
    /// for every placement, unless the model has exactly one, in which case it
    /// takes placement 0. A model without placements gives an entity with
    /// nothing to draw. A `batch` requires a single placement; the
    /// entity then only contributes to that batch and never draws itself.
    pub fn initialize(
        ctx: &Arc<GpuContext<B>>,
        model: AssetHandle<Model<B>>,
        placement: Option<usize>,
        batch: Option<&MeshInstancer<B>>,
    ) -> Result<Self, EntityError> {
        let state = model.wait_until_settled(MODEL_POLL);
        let Some(data) = model.get() else {
            return Err(EntityError::ModelUnavailable {
                name: model.name().to_string(),
                state,
            });
        };
        let count = data.placements().len();
        let placement = match (placement, batch) {
            (Some(index), _) => Some(index),
            (None, Some(_)) => return Err(EntityError::BatchNeedsPlacement),
            (None, None) if count == 1 => Some(0),
            (None, None) => None,
        };

        let mut options = RenderOptions::default();
        let (transform, mesh_id) = match placement {
            Some(index) => {
                let p = data
                    .placements()
                    .get(index)
                    .ok_or(EntityError::PlacementOutOfRange { index, count })?;
                if let Some(mesh) = data.mesh(p.mesh_id) {
                    options.cast_shadow = mesh.material.cast_shadow;
                    options.receive_shadow = mesh.material.receive_shadow;
                }
                (p.transform.clone(), Some(p.mesh_id))
            }
            None => (Instance::new(), None),
        };

        let pool = match batch {
            Some(_) => None,
            None => Some(InstancePool::new(
                Arc::clone(ctx),
                format!("{} Entity Instances", model.name()),
                if placement.is_some() { 1 } else { count },
                None,
                false,
            )?),
        };

        Ok(Self {
            placement,
            mesh_id,
            batch: batch.map(MeshInstancer::id),
            transform,
            options,
            pool,
            dirty: true,
            model,
        })
    }

    pub fn model(&self) -> &AssetHandle<Model<B>> {
        &self.model
    }

    /// The placement this entity stands for, `None` if it stands for all of them.
    pub fn placement(&self) -> Option<usize> {
        self.placement
    }

    pub fn mesh_id(&self) -> Option<usize> {
        self.mesh_id
    }

    /// The batch this entity feeds, if any.
    pub fn batch(&self) -> Option<BatchId> {
        self.batch
    }

    pub fn is_batched(&self) -> bool {
        self.batch.is_some()
    }

    pub fn transform(&self) -> &Instance {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: Instance) {
        self.transform = transform;
        self.dirty = true;
    }

    pub fn set_position(&mut self, position: Vector3<f32>) {
        self.transform.position = position;
        self.dirty = true;
    }

    pub fn set_rotation(&mut self, rotation: Quaternion<f32>) {
        self.transform.rotation = rotation;
        self.dirty = true;
    }

    /// Set the rotation from Euler angles in degrees.
    pub fn set_rotation_euler(&mut self, degrees: Vector3<f32>) {
        self.set_rotation(Quaternion::from(Euler {
            x: Deg(degrees.x),
            y: Deg(degrees.y),
            z: Deg(degrees.z),
        }));
    }

    pub fn set_scale(&mut self, scale: Vector3<f32>) {
        self.transform.scale = scale;
        self.dirty = true;
    }

    pub fn options(&self) -> RenderOptions {
        self.options
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.options.visible = visible;
    }

    pub fn set_cast_shadow(&mut self, cast_shadow: bool) {
        self.options.cast_shadow = cast_shadow;
    }

    pub fn set_receive_shadow(&mut self, receive_shadow: bool) {
        self.options.receive_shadow = receive_shadow;
    }

    /// The record this entity contributes to a batch.
    pub fn instance_record(&self) -> InstanceRaw {
        self.transform.to_raw()
    }

    /// World-space bounds of everything this entity stands for.
    pub fn bounds(&self) -> Option<Aabb> {
        let model = self.model.get()?;
        represented(model.placements(), self.placement)
            .iter()
            .filter_map(|p| {
                let world = world_transform(&self.transform, p, self.placement.is_some());
                Some(model.mesh(p.mesh_id)?.bounds.transformed(&world))
            })
            .reduce(|acc, b| acc.union(&b))
    }

    pub fn triangle_count(&self) -> u32 {
        let Some(model) = self.model.get() else {
            return 0;
        };
        represented(model.placements(), self.placement)
            .iter()
            .filter_map(|p| model.mesh(p.mesh_id))
            .map(|mesh| mesh.triangle_count())
            .sum()
    }

    /// Draw this entity on its own. Does nothing for batched or invisible
    /// entities. Returns whether at least one draw was issued.
    pub fn draw<T: DrawTarget<B> + ?Sized>(&mut self, target: &mut T) -> bool {
        if self.batch.is_some() || !self.options.visible {
            return false;
        }
        let shadow_pass = target.active_pass() == ShaderPass::Shadow;
        if shadow_pass && !self.options.cast_shadow {
            return false;
        }
        if self.dirty && !self.commit_records() {
            return false;
        }

        let Some(model) = self.model.get() else {
            return false;
        };
        let Some(buffer) = self.pool.as_mut().and_then(|pool| pool.buffer()) else {
            return false;
        };
        let single = self.placement.is_some();
        let mut drawn = false;
        for (slot, p) in represented(model.placements(), self.placement).iter().enumerate() {
            let Some(mesh) = model.mesh(p.mesh_id) else {
                continue;
            };
            if shadow_pass && !mesh.material.cast_shadow {
                continue;
            }
            let world = world_transform(&self.transform, p, single);
            target.predraw(mesh, Some(world.to_matrix()), false);
            mesh.draw_instanced(target, buffer, slot as u32..slot as u32 + 1);
            drawn = true;
        }
        drawn
    }

    /// Rewrite the self-draw pool from the current transform.
    fn commit_records(&mut self) -> bool {
        let Some(model) = self.model.get() else {
            return false;
        };
        let single = self.placement.is_some();
        let records: Vec<InstanceRaw> = represented(model.placements(), self.placement)
            .iter()
            .map(|p| world_transform(&self.transform, p, single).to_raw())
            .collect();
        if records.is_empty() {
            self.dirty = false;
            return false;
        }
        let Some(pool) = self.pool.as_mut() else {
            return false;
        };
        let committed = pool.unlock(true).is_ok() && pool.append(&records).is_ok();
        pool.lock(None);
        if committed {
            self.dirty = false;
        } else {
            log::warn!("Could not commit instances of {}", self.model.name());
        }
        committed
    }
}

fn represented(placements: &[Placement], placement: Option<usize>) -> &[Placement] {
    match placement {
        Some(index) => placements.get(index..index + 1).unwrap_or(&[]),
        None => placements,
    }
}

/// A single-placement entity is placed by its own transform; otherwise the
/// entity transform is applied on top of each placement.
fn world_transform(entity: &Instance, placement: &Placement, single: bool) -> Instance {
    if single {
        entity.clone()
    } else {
        entity * &placement.transform
    }
}
