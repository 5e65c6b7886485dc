//! Batched scene built from one model.
//!
//! [`StaticScene::from_model`] counts how many placements use each mesh,
//! creates one [`MeshInstancer`] per mesh sized to that count (possibly zero)
//! and one batched [`StaticMesh`] per placement. Every mesh goes through the
//! batching path, even if it is placed only once.

use std::{sync::Arc, time::Duration};

use crate::{
    context::{GpuBackend, GpuContext},
    data_structures::{
        instancer::MeshInstancer,
        static_mesh::{EntityError, StaticMesh},
    },
    render::DrawTarget,
    resources::{AssetHandle, model::Model},
};

pub struct StaticScene<B: GpuBackend> {
    instancers: Vec<MeshInstancer<B>>,
    entities: Vec<StaticMesh<B>>,
}

impl<B: GpuBackend> StaticScene<B> {
    /// Build instancers and entities for every placement of `model`.
    ///
    /// Blocks until the model has loaded. The batches are filled and
    /// finished once, so the scene can be drawn right away.
    pub fn from_model(
        ctx: &Arc<GpuContext<B>>,
        model: &AssetHandle<Model<B>>,
    ) -> Result<Self, EntityError> {
        let state = model.wait_until_settled(Duration::from_millis(1));
        let Some(data) = model.get() else {
            return Err(EntityError::ModelUnavailable {
                name: model.name().to_string(),
                state,
            });
        };

        let mut instancers = data
            .placement_tally()
            .into_iter()
            .map(|count| MeshInstancer::new(ctx, count))
            .collect::<Result<Vec<_>, _>>()?;
        for instancer in &mut instancers {
            instancer.ready_batch(false);
        }

        let mut entities = Vec::with_capacity(data.placements().len());
        for (index, placement) in data.placements().iter().enumerate() {
            let instancer = &mut instancers[placement.mesh_id];
            let entity = StaticMesh::initialize(ctx, model.clone(), Some(index), Some(&*instancer))?;
            instancer.add_to_batch(&entity);
            entities.push(entity);
        }
        for instancer in &mut instancers {
            instancer.finish_batch();
        }

        log::info!(
            "Scene {} batches {} placements into {} instancers",
            model.name(),
            entities.len(),
            instancers.len()
        );
        Ok(Self {
            instancers,
            entities,
        })
    }

    /// Rebuild every batch from the entities' current transforms. With
    /// `append_to_last_frame` the previous records are kept and new ones go
    /// after them.
    pub fn refresh_batches(&mut self, append_to_last_frame: bool) {
        for instancer in &mut self.instancers {
            instancer.ready_batch(append_to_last_frame);
        }
        for entity in &self.entities {
            if let Some(instancer) = entity.mesh_id().and_then(|id| self.instancers.get_mut(id)) {
                instancer.add_to_batch(entity);
            }
        }
        for instancer in &mut self.instancers {
            instancer.finish_batch();
        }
    }

    /// Draw every batch. Returns the number of draw calls issued.
    pub fn draw<T: DrawTarget<B> + ?Sized>(&mut self, target: &mut T) -> usize {
        let mut draws = 0;
        for instancer in &mut self.instancers {
            if instancer.draw_batch(target) {
                draws += 1;
            }
        }
        draws
    }

    /// The instancer for mesh `mesh_id`.
    pub fn instancer(&self, mesh_id: usize) -> Option<&MeshInstancer<B>> {
        self.instancers.get(mesh_id)
    }

    pub fn instancer_mut(&mut self, mesh_id: usize) -> Option<&mut MeshInstancer<B>> {
        self.instancers.get_mut(mesh_id)
    }

    pub fn instancers(&self) -> &[MeshInstancer<B>] {
        &self.instancers
    }

    pub fn entities(&self) -> &[StaticMesh<B>] {
        &self.entities
    }

    pub fn entity_mut(&mut self, index: usize) -> Option<&mut StaticMesh<B>> {
        self.entities.get_mut(index)
    }
}
