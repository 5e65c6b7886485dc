//! batch-ngin
//!
//! Asynchronous asset loading and instanced static-mesh batching on top of
//! wgpu. A background worker pool loads models and textures while the render
//! thread polls their readiness, groups every placement of a mesh into one
//! GPU instance pool and draws each pool with a single instanced call, once
//! per shader pass.
//!
//! High-level modules
//! - `config`: registry settings and logging setup
//! - `context`: GPU backend abstraction and the shared GPU-access lock
//! - `data_structures`: meshes, instances, instance pools, batches and entities
//! - `resources`: the asset registry plus texture and model assets
//! - `render`: draw submission through shader passes
//!

pub mod config;
pub mod context;
pub mod data_structures;
pub mod render;
pub mod resources;

// Re-exports commonly used crates for convenience in downstream code.
pub use cgmath;
pub use wgpu;
