//! Instanced batches of one mesh.
//!
//! A [`MeshInstancer`] collects every placement of one mesh into a readable
//! [`InstancePool`] and draws them with a single instanced call. Each frame
//! runs `ready_batch` → `add_to_batch`* → `finish_batch` → `draw_batch`.
//!
//! Entities opt in at construction by naming the instancer they feed (see
//! [`StaticMesh::initialize`]); anything else is rejected by `add_to_batch`.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::{
    context::{GpuBackend, GpuContext, GpuError},
    data_structures::{
        instance::InstanceRaw, instance_pool::InstancePool, static_mesh::StaticMesh,
    },
    render::{DrawTarget, ShaderPass},
    resources::{AssetHandle, model::Model},
};

/// Identifies a [`MeshInstancer`]. Unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId(u64);

impl BatchId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// The mesh shared by every entity in a batch, taken from the first one added.
struct Representative<B: GpuBackend> {
    model: AssetHandle<Model<B>>,
    mesh_id: usize,
}

pub struct MeshInstancer<B: GpuBackend> {
    id: BatchId,
    pool: InstancePool<B, InstanceRaw>,
    representative: Option<Representative<B>>,
}

impl<B: GpuBackend> MeshInstancer<B> {
    /// Create an instancer with room for `capacity` instances.
    ///
    /// A capacity of zero is allowed; such an instancer never draws.
    pub fn new(ctx: &Arc<GpuContext<B>>, capacity: usize) -> Result<Self, GpuError> {
        let id = BatchId::next();
        let pool = InstancePool::new(
            Arc::clone(ctx),
            format!("Batch {} Instances", id.0),
            capacity,
            None,
            true,
        )?;
        Ok(Self {
            id,
            pool,
            representative: None,
        })
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn pool(&self) -> &InstancePool<B, InstanceRaw> {
        &self.pool
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Number of instances committed or being written this frame.
    pub fn len(&self) -> usize {
        self.pool.valid()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.valid() == 0
    }

    /// Open the batch. Unless `append_to_last_frame` is set the previous
    /// frame's instances are discarded. Returns `false` for a zero-capacity batch.
    pub fn ready_batch(&mut self, append_to_last_frame: bool) -> bool {
        self.pool.unlock(!append_to_last_frame).is_ok()
    }

    /// Append `entity`'s current transform.
    ///
    /// Rejected if the entity was not created for this batch, is invisible,
    /// uses a different mesh than the batch, or the batch is full or closed.
    pub fn add_to_batch(&mut self, entity: &StaticMesh<B>) -> bool {
        if entity.batch() != Some(self.id) {
            log::warn!(
                "Entity of {} does not belong to batch {:?}",
                entity.model().name(),
                self.id
            );
            return false;
        }
        let Some(mesh_id) = entity.mesh_id() else {
            return false;
        };
        if !entity.options().visible {
            return false;
        }
        if let Some(rep) = &self.representative {
            if rep.mesh_id != mesh_id || !rep.model.ptr_eq(entity.model()) {
                log::warn!(
                    "Batch {:?} draws mesh {} of {}, refusing mesh {} of {}",
                    self.id,
                    rep.mesh_id,
                    rep.model.name(),
                    mesh_id,
                    entity.model().name()
                );
                return false;
            }
        }

        if let Err(e) = self.pool.append(&[entity.instance_record()]) {
            log::debug!("Batch {:?} rejected instance: {}", self.id, e);
            return false;
        }
        if self.representative.is_none() {
            self.representative = Some(Representative {
                model: entity.model().clone(),
                mesh_id,
            });
        }
        true
    }

    /// Close the batch and commit its instances.
    pub fn finish_batch(&mut self) {
        self.pool.lock(None);
    }

    /// Draw every instance in the batch with one call.
    ///
    /// Finishes the batch first. Returns `false` without drawing if nothing was
    /// ever added, the batch is empty, or the mesh does not cast shadows and
    /// the shadow pass is active.
    pub fn draw_batch<T: DrawTarget<B> + ?Sized>(&mut self, target: &mut T) -> bool {
        self.finish_batch();
        let Some(rep) = &self.representative else {
            return false;
        };
        let valid = self.pool.valid() as u32;
        if valid == 0 {
            return false;
        }
        let Some(mesh) = rep.model.get().and_then(|model| model.mesh(rep.mesh_id)) else {
            return false;
        };
        if target.active_pass() == ShaderPass::Shadow && !mesh.material.cast_shadow {
            return false;
        }
        let Some(instances) = self.pool.buffer() else {
            return false;
        };
        target.predraw(mesh, None, true);
        mesh.draw_instanced(target, instances, 0..valid);
        true
    }
}
