//! GPU context shared by the asset loaders and the batching code.
//!
//! Everything that creates or writes GPU resources goes through a
//! [`GpuContext`]. It owns a [`GpuBackend`] and a coarse GPU-access lock so
//! that loader threads and the render thread never create resources
//! concurrently. The lock is held only around the backend call itself, never
//! across a file read or an image decode.
//!
//! # Key types
//!
//! - [`GpuBackend`] abstracts buffer/texture creation (implemented for wgpu by [`WgpuBackend`])
//! - [`GpuContext`] bundles a backend with the access lock, viewport and asset root
//! - [`GpuError`] reports failed resource creation

use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use wgpu::util::DeviceExt;

use crate::data_structures::texture::GpuTexture;

/// Errors raised while creating GPU resources.
#[derive(Debug, Error)]
pub enum GpuError {
    /// The backend refused to create a buffer.
    #[error("failed to create buffer '{label}': {reason}")]
    BufferCreation { label: String, reason: String },

    /// The backend refused to create a texture.
    #[error("failed to create texture '{label}': {reason}")]
    TextureCreation { label: String, reason: String },
}

/// What a buffer is bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    /// Per-instance vertex data, rewritten every frame.
    Instance,
}

/// Description of a buffer to create.
///
/// If `contents` is given the buffer is initialised with it and `size` is
/// ignored, otherwise a zeroed buffer of `size` bytes is created.
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub usage: BufferUsage,
    pub size: u64,
    pub contents: Option<&'a [u8]>,
}

/// Description of an RGBA8 2D texture to create.
#[derive(Debug, Clone, Copy)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub rgba: &'a [u8],
    pub srgb: bool,
}

/// The graphics API calls the engine core depends on.
///
/// Implementations need not be thread-safe with respect to resource
/// creation: [`GpuContext`] serializes every call.
pub trait GpuBackend: Send + Sync + 'static {
    type Buffer: Send + Sync + 'static;
    type Texture: Send + Sync + 'static;

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<Self::Buffer, GpuError>;
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]);
    fn create_texture(&self, desc: &TextureDesc<'_>) -> Result<Self::Texture, GpuError>;
}

pub struct GpuContext<B: GpuBackend> {
    backend: B,
    gpu_lock: Mutex<()>,
    viewport: RwLock<(u32, u32)>,
    asset_root: PathBuf,
}

impl<B: GpuBackend> GpuContext<B> {
    /// Create a context whose assets are resolved relative to `asset_root`.
    pub fn new(backend: B, asset_root: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            gpu_lock: Mutex::new(()),
            viewport: RwLock::new((0, 0)),
            asset_root: asset_root.into(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run `f` while holding the GPU-access lock.
    pub fn with_gpu<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        let _guard = self.gpu_lock.lock();
        f(&self.backend)
    }

    pub fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<B::Buffer, GpuError> {
        self.with_gpu(|backend| backend.create_buffer(desc))
    }

    pub fn write_buffer(&self, buffer: &B::Buffer, offset: u64, data: &[u8]) {
        self.with_gpu(|backend| backend.write_buffer(buffer, offset, data));
    }

    pub fn create_texture(&self, desc: &TextureDesc<'_>) -> Result<B::Texture, GpuError> {
        self.with_gpu(|backend| backend.create_texture(desc))
    }

    pub fn viewport(&self) -> (u32, u32) {
        *self.viewport.read()
    }

    pub fn set_viewport(&self, width: u32, height: u32) {
        *self.viewport.write() = (width, height);
    }

    pub fn asset_root(&self) -> &Path {
        &self.asset_root
    }

    pub fn asset_path(&self, name: &str) -> PathBuf {
        self.asset_root.join(name)
    }
}

/// [`GpuBackend`] on top of a wgpu device and queue.
#[derive(Debug)]
pub struct WgpuBackend {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }

    /// Request a device without a surface, e.g. for offscreen rendering and tests.
    pub async fn headless() -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..wgpu::InstanceDescriptor::new_without_display_handle()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;
        log::info!("Using adapter {:?}", adapter.get_info().name);
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("batch-ngin device"),
                required_limits: wgpu::Limits::downlevel_defaults(),
                ..Default::default()
            })
            .await?;
        Ok(Self { device, queue })
    }
}

impl GpuBackend for WgpuBackend {
    type Buffer = wgpu::Buffer;
    type Texture = GpuTexture;

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<Self::Buffer, GpuError> {
        let usage = match desc.usage {
            BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
            BufferUsage::Index => wgpu::BufferUsages::INDEX,
            BufferUsage::Instance => wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        };
        let size = desc.contents.map_or(desc.size, |c| c.len() as u64);
        if size == 0 || size > self.device.limits().max_buffer_size {
            return Err(GpuError::BufferCreation {
                label: desc.label.to_string(),
                reason: format!("unsupported size of {size} bytes"),
            });
        }
        let buffer = match desc.contents {
            Some(contents) => self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(desc.label),
                contents,
                usage,
            }),
            None => self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(desc.label),
                // copies must stay 4-byte aligned
                size: size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
                usage,
                mapped_at_creation: false,
            }),
        };
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(buffer, offset, data);
    }

    fn create_texture(&self, desc: &TextureDesc<'_>) -> Result<Self::Texture, GpuError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(GpuError::TextureCreation {
                label: desc.label.to_string(),
                reason: format!("unsupported dimensions {}x{}", desc.width, desc.height),
            });
        }
        Ok(GpuTexture::from_rgba(
            &self.device,
            &self.queue,
            desc.rgba,
            (desc.width, desc.height),
            desc.label,
            desc.srgb,
        ))
    }
}
