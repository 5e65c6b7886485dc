//! Texture assets.
//!
//! The file is read and decoded on the loading thread; only the upload runs
//! under the GPU-access lock.

use anyhow::Context as _;
use image::GenericImageView;

use crate::{
    context::{GpuBackend, GpuContext, GpuError, TextureDesc},
    resources::{Asset, AssetKind},
};

pub struct Texture<B: GpuBackend> {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub gpu: B::Texture,
}

impl<B: GpuBackend> Texture<B> {
    /// Decode an image file's contents (PNG, JPEG, ...) and upload it as sRGB.
    pub fn from_bytes(ctx: &GpuContext<B>, name: &str, bytes: &[u8]) -> anyhow::Result<Self> {
        let img = image::load_from_memory(bytes)
            .with_context(|| format!("decoding texture {name}"))?;
        let (width, height) = img.dimensions();
        let rgba = img.to_rgba8();
        let gpu = ctx.create_texture(&TextureDesc {
            label: name,
            width,
            height,
            rgba: &rgba,
            srgb: true,
        })?;
        Ok(Self {
            name: name.to_string(),
            width,
            height,
            gpu,
        })
    }

    /// A 1x1 texture of a single colour, used where a real texture failed to load.
    pub fn solid_color(ctx: &GpuContext<B>, name: &str, rgba: [u8; 4]) -> Result<Self, GpuError> {
        let gpu = ctx.create_texture(&TextureDesc {
            label: name,
            width: 1,
            height: 1,
            rgba: &rgba,
            srgb: true,
        })?;
        Ok(Self {
            name: name.to_string(),
            width: 1,
            height: 1,
            gpu,
        })
    }
}

impl<B: GpuBackend> Asset for Texture<B> {
    type Context = GpuContext<B>;

    const KIND: AssetKind = AssetKind::Texture;

    fn load(name: &str, ctx: &Self::Context) -> anyhow::Result<Self> {
        let path = ctx.asset_path(name);
        let bytes = std::fs::read(&path)
            .with_context(|| format!("reading texture {}", path.display()))?;
        Self::from_bytes(ctx, name, &bytes)
    }
}
