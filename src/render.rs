//! Draw submission for meshes, entities and batches.
//!
//! The engine core never talks to a render pass directly. It draws through a
//! [`DrawTarget`], which knows the active [`ShaderPass`], binds per-object state
//! in [`DrawTarget::predraw`] and turns a [`DrawCall`] into an (instanced) draw.
//!
//! # Key types
//!
//! - [`ShaderPass`] is the pass currently being recorded (shadow or color)
//! - [`DrawCall`] holds the buffers and ranges of one draw
//! - [`DrawTarget`] is implemented by [`WgpuPass`] and by test recorders
//!

use std::ops::Range;

use cgmath::Matrix4;

use crate::{
    context::{GpuBackend, WgpuBackend},
    data_structures::model::Mesh,
};

/// The pass a frame is currently drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderPass {
    /// Depth-only pass into the shadow map. Only shadow casters draw here.
    Shadow,
    Color,
}

/// Buffers and counts for one draw.
pub struct DrawCall<'a, B: GpuBackend> {
    pub vertex: &'a B::Buffer,
    pub index: Option<&'a B::Buffer>,
    pub instances: &'a B::Buffer,
    pub vertex_count: u32,
    pub index_count: u32,
    pub instance_range: Range<u32>,
}

pub trait DrawTarget<B: GpuBackend> {
    fn active_pass(&self) -> ShaderPass;

    /// Bind per-object state before `mesh` is drawn.
    ///
    /// `world` is `None` for instanced draws, where the transform comes from the
    /// instance records.
    fn predraw(&mut self, mesh: &Mesh<B>, world: Option<Matrix4<f32>>, instanced: bool);

    fn draw(&mut self, call: DrawCall<'_, B>);
}

/// [`DrawTarget`] that records into a wgpu render pass.
///
/// Vertex buffers go to slot 0, instance records to slot 1, matching
/// [`ModelVertex::desc`](crate::data_structures::model::ModelVertex) and
/// [`InstanceRaw::desc`](crate::data_structures::instance::InstanceRaw).
pub struct WgpuPass<'a, 'enc> {
    pass: &'a mut wgpu::RenderPass<'enc>,
    shader_pass: ShaderPass,
    pipeline: Option<&'a wgpu::RenderPipeline>,
}

impl<'a, 'enc> WgpuPass<'a, 'enc> {
    pub fn new(pass: &'a mut wgpu::RenderPass<'enc>, shader_pass: ShaderPass) -> Self {
        Self {
            pass,
            shader_pass,
            pipeline: None,
        }
    }

    /// Pipeline bound before every mesh.
    pub fn with_pipeline(mut self, pipeline: &'a wgpu::RenderPipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }
}

impl DrawTarget<WgpuBackend> for WgpuPass<'_, '_> {
    fn active_pass(&self) -> ShaderPass {
        self.shader_pass
    }

    fn predraw(&mut self, _mesh: &Mesh<WgpuBackend>, _world: Option<Matrix4<f32>>, _instanced: bool) {
        if let Some(pipeline) = self.pipeline {
            self.pass.set_pipeline(pipeline);
        }
    }

    fn draw(&mut self, call: DrawCall<'_, WgpuBackend>) {
        self.pass.set_vertex_buffer(0, call.vertex.slice(..));
        self.pass.set_vertex_buffer(1, call.instances.slice(..));
        match call.index {
            Some(index) => {
                self.pass.set_index_buffer(index.slice(..), wgpu::IndexFormat::Uint32);
                self.pass.draw_indexed(0..call.index_count, 0, call.instance_range);
            }
            None => self.pass.draw(0..call.vertex_count, call.instance_range),
        }
    }
}
