//! Loadable assets and the registry that owns them.
//!
//! Every asset type implements [`Asset`]. The [`AssetRegistry`] stores each
//! type in its own bucket, deduplicates by name and optionally loads on a
//! fixed pool of worker threads. Callers get an [`AssetHandle`] back right
//! away and poll its [`AssetState`] until it settles.
//!
//! # Key types
//!
//! - [`Asset`] is implemented by [`Texture`](texture::Texture) and [`Model`](model::Model)
//! - [`AssetState`] is the load state, advancing Unloaded → Queued → Loading → Loaded | Error
//! - [`AssetHandle`] is a shared, non-owning view of one registered asset
//! - [`AssetRegistry`] owns all assets and the loader threads

use std::{
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU8, Ordering},
    },
    thread,
    time::Duration,
};

pub mod mesh;
pub mod model;
pub mod registry;
pub mod texture;

pub use registry::{AssetError, AssetRegistry};

/// Type tag of an asset. Used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Texture,
    Model,
    Custom(&'static str),
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Texture => write!(f, "texture"),
            AssetKind::Model => write!(f, "model"),
            AssetKind::Custom(kind) => write!(f, "{kind}"),
        }
    }
}

/// Load state of an asset. Only ever moves forward.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssetState {
    Unloaded = 0,
    Queued = 1,
    Loading = 2,
    Loaded = 3,
    Error = 4,
}

impl AssetState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => AssetState::Unloaded,
            1 => AssetState::Queued,
            2 => AssetState::Loading,
            3 => AssetState::Loaded,
            _ => AssetState::Error,
        }
    }

    /// `Loaded` or `Error`.
    pub fn is_settled(self) -> bool {
        matches!(self, AssetState::Loaded | AssetState::Error)
    }
}

/// Content that can be loaded by name.
///
/// `load` runs on a loader thread when the registry has workers, so it must
/// only touch shared state through `ctx`.
pub trait Asset: Sized + Send + Sync + 'static {
    type Context: Send + Sync + 'static;

    const KIND: AssetKind;

    fn load(name: &str, ctx: &Self::Context) -> anyhow::Result<Self>;
}

/// Storage of one asset: its name, atomic state and, once loaded, its data.
pub(crate) struct AssetSlot<T> {
    name: String,
    state: AtomicU8,
    data: OnceLock<T>,
}

impl<T> AssetSlot<T> {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: AtomicU8::new(AssetState::Unloaded as u8),
            data: OnceLock::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> AssetState {
        AssetState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Fails if the slot is not in `from` or the move
    /// would go backwards.
    pub(crate) fn advance(&self, from: AssetState, to: AssetState) -> bool {
        if to <= from || from.is_settled() {
            return false;
        }
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Store the loaded value and publish the `Loaded` state.
    pub(crate) fn complete(&self, from: AssetState, value: T) -> bool {
        if self.data.set(value).is_err() {
            return false;
        }
        self.advance(from, AssetState::Loaded)
    }

    pub(crate) fn fail(&self, from: AssetState) -> bool {
        self.advance(from, AssetState::Error)
    }
}

/// Shared reference to a registered asset.
///
/// Holding a handle keeps the asset memory alive even after the registry
/// unloads it, but the registry no longer knows about it then.
pub struct AssetHandle<T> {
    slot: Arc<AssetSlot<T>>,
}

impl<T> Clone for AssetHandle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for AssetHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetHandle")
            .field("name", &self.slot.name)
            .field("state", &self.state())
            .finish()
    }
}

impl<T> AssetHandle<T> {
    pub(crate) fn new(slot: Arc<AssetSlot<T>>) -> Self {
        Self { slot }
    }

    pub(crate) fn slot(&self) -> &Arc<AssetSlot<T>> {
        &self.slot
    }

    pub fn name(&self) -> &str {
        self.slot.name()
    }

    pub fn state(&self) -> AssetState {
        self.slot.state()
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == AssetState::Loaded
    }

    /// The asset data, available once the state is `Loaded`.
    pub fn get(&self) -> Option<&T> {
        if self.is_loaded() {
            self.slot.data.get()
        } else {
            None
        }
    }

    /// Whether both handles refer to the same registered asset.
    pub fn ptr_eq(&self, other: &AssetHandle<T>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Spin until the asset is `Loaded` or `Error`, sleeping `poll` and
    /// yielding between checks.
    ///
    /// There is no notification when a load finishes. Queued loads dropped by
    /// unloading or registry shutdown end in `Error`, so this returns for them
    /// too.
    pub fn wait_until_settled(&self, poll: Duration) -> AssetState {
        loop {
            let state = self.state();
            if state.is_settled() {
                return state;
            }
            thread::sleep(poll);
            thread::yield_now();
        }
    }

    /// Like [`wait_until_settled`](Self::wait_until_settled) but gives up after
    /// `timeout`, returning `None`.
    pub fn wait_timeout(&self, timeout: Duration, poll: Duration) -> Option<AssetState> {
        let start = instant::Instant::now();
        loop {
            let state = self.state();
            if state.is_settled() {
                return Some(state);
            }
            if start.elapsed() >= timeout {
                return None;
            }
            thread::sleep(poll);
            thread::yield_now();
        }
    }
}
