//! Engine data structures: meshes, instances, pools, batches and entities.
//!
//! - `model` contains mesh data, vertex layouts, bounding boxes and placements
//! - `instance` holds per-instance transformation data and its GPU record
//! - `instance_pool` is the fixed-capacity GPU buffer of instance records
//! - `instancer` batches all placements of one mesh into one draw
//! - `static_mesh` is a renderable entity referencing a loaded model
//! - `scene` builds batched entities for a whole model
//! - `texture` contains the wgpu texture wrapper

pub mod instance;
pub mod instance_pool;
pub mod instancer;
pub mod model;
pub mod scene;
pub mod static_mesh;
pub mod texture;
