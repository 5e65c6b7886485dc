//! Meshes, placements and the vertex layout they are uploaded with.
//!
//! A loaded [`Model`](crate::resources::model::Model) is a list of distinct
//! [`Mesh`]es plus a list of [`Placement`]s. Each placement points at a mesh by
//! its index and carries the transform of one copy of that mesh in the world.

use std::ops::Range;

use cgmath::{ElementWise, Vector3};

use crate::{
    context::{BufferDesc, BufferUsage, GpuBackend, GpuContext, GpuError},
    data_structures::instance::Instance,
    render::{DrawCall, DrawTarget},
};

/// Describes how a vertex type is laid out in a vertex buffer.
pub trait Vertex {
    fn desc() -> wgpu::VertexBufferLayout<'static>;
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
    pub normal: [f32; 3],
}

impl Vertex for ModelVertex {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<ModelVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 5]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Aabb {
    pub fn new(min: Vector3<f32>, max: Vector3<f32>) -> Self {
        Self { min, max }
    }

    /// Smallest box containing all points. An empty iterator yields a box collapsed at the origin.
    pub fn from_points(points: impl IntoIterator<Item = Vector3<f32>>) -> Self {
        let mut points = points.into_iter();
        let Some(first) = points.next() else {
            return Self::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 0.0));
        };
        points.fold(Self::new(first, first), |acc, p| Self {
            min: Vector3::new(acc.min.x.min(p.x), acc.min.y.min(p.y), acc.min.z.min(p.z)),
            max: Vector3::new(acc.max.x.max(p.x), acc.max.y.max(p.y), acc.max.z.max(p.z)),
        })
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Self::from_points([self.min, self.max, other.min, other.max])
    }

    pub fn center(&self) -> Vector3<f32> {
        (self.min + self.max) * 0.5
    }

    pub fn corners(&self) -> [Vector3<f32>; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vector3::new(a.x, a.y, a.z),
            Vector3::new(b.x, a.y, a.z),
            Vector3::new(a.x, b.y, a.z),
            Vector3::new(b.x, b.y, a.z),
            Vector3::new(a.x, a.y, b.z),
            Vector3::new(b.x, a.y, b.z),
            Vector3::new(a.x, b.y, b.z),
            Vector3::new(b.x, b.y, b.z),
        ]
    }

    /// Box around this box after applying `transform`.
    pub fn transformed(&self, transform: &Instance) -> Aabb {
        Self::from_points(self.corners().into_iter().map(|corner| {
            transform.position + transform.rotation * corner.mul_element_wise(transform.scale)
        }))
    }
}

/// Material information the batching code cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaterialSlot {
    pub id: usize,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
}

impl MaterialSlot {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            cast_shadow: true,
            receive_shadow: true,
        }
    }
}

/// CPU-side geometry of one mesh, before upload.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<ModelVertex>,
    pub indices: Vec<u32>,
    pub material: Option<MaterialSlot>,
}

/// An uploaded mesh. All placements of a mesh share these buffers.
pub struct Mesh<B: GpuBackend> {
    pub name: String,
    pub vertex_buffer: B::Buffer,
    pub index_buffer: Option<B::Buffer>,
    pub num_vertices: u32,
    pub num_elements: u32,
    pub material: MaterialSlot,
    pub bounds: Aabb,
}

impl<B: GpuBackend> Mesh<B> {
    pub fn new(ctx: &GpuContext<B>, data: &MeshData) -> Result<Self, GpuError> {
        let vertex_buffer = ctx.create_buffer(&BufferDesc {
            label: &format!("{:?} Vertex Buffer", data.name),
            usage: BufferUsage::Vertex,
            size: 0,
            contents: Some(bytemuck::cast_slice(&data.vertices)),
        })?;
        let index_buffer = if data.indices.is_empty() {
            None
        } else {
            Some(ctx.create_buffer(&BufferDesc {
                label: &format!("{:?} Index Buffer", data.name),
                usage: BufferUsage::Index,
                size: 0,
                contents: Some(bytemuck::cast_slice(&data.indices)),
            })?)
        };
        let bounds = Aabb::from_points(data.vertices.iter().map(|v| Vector3::from(v.position)));
        Ok(Self {
            name: data.name.clone(),
            vertex_buffer,
            index_buffer,
            num_vertices: data.vertices.len() as u32,
            num_elements: data.indices.len() as u32,
            material: data.material.unwrap_or(MaterialSlot::new(0)),
            bounds,
        })
    }

    pub fn triangle_count(&self) -> u32 {
        if self.index_buffer.is_some() {
            self.num_elements / 3
        } else {
            self.num_vertices / 3
        }
    }

    /// Issue one draw of this mesh for the records `instances` in `instance_buffer`.
    pub fn draw_instanced<T: DrawTarget<B> + ?Sized>(
        &self,
        target: &mut T,
        instance_buffer: &B::Buffer,
        instances: Range<u32>,
    ) {
        target.draw(DrawCall {
            vertex: &self.vertex_buffer,
            index: self.index_buffer.as_ref(),
            instances: instance_buffer,
            vertex_count: self.num_vertices,
            index_count: self.num_elements,
            instance_range: instances,
        });
    }
}

/// One placement of a mesh inside a model.
#[derive(Clone, Debug, PartialEq)]
pub struct Placement {
    pub mesh_id: usize,
    pub transform: Instance,
}

impl Placement {
    pub fn new(mesh_id: usize, transform: Instance) -> Self {
        Self { mesh_id, transform }
    }
}
