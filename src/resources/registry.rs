//! The asset registry and its loader threads.
//!
//! All assets of one type live in a bucket keyed by the type's [`TypeId`].
//! With zero workers every load runs inline on the calling thread. Otherwise
//! new assets are queued and a fixed pool of threads picks them up.
//!
//! Workers only ever *try* to take the registry lock. If it is busy, or the
//! queue is empty, they sleep for the poll interval and yield, so clearing the
//! run flag always stops them promptly.

use std::{
    any::{Any, TypeId},
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    config::RegistryConfig,
    resources::{Asset, AssetHandle, AssetKind, AssetSlot, AssetState},
};

#[derive(Debug, Error)]
pub enum AssetError {
    /// An inline load failed. The asset was not registered.
    #[error("failed to load {kind} '{name}': {source}")]
    Load {
        kind: AssetKind,
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// An asset of that type and name is already registered.
    #[error("{kind} '{name}' is already registered")]
    AlreadyRegistered { kind: AssetKind, name: String },

    #[error("asset registry has been shut down")]
    ShutDown,

    #[error("failed to spawn asset worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

/// Type-erased view of one bucket.
trait AssetBucket: Send {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn len(&self) -> usize;
    /// Drop every asset. Loads still waiting in the queue end up in `Error`.
    fn clear(&mut self);
}

struct Bucket<T: Asset> {
    assets: Vec<Arc<AssetSlot<T>>>,
}

impl<T: Asset> Bucket<T> {
    fn find(&self, name: &str) -> Option<&Arc<AssetSlot<T>>> {
        self.assets.iter().find(|slot| slot.name() == name)
    }
}

impl<T: Asset> AssetBucket for Bucket<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn len(&self) -> usize {
        self.assets.len()
    }

    fn clear(&mut self) {
        for slot in self.assets.drain(..) {
            slot.fail(AssetState::Queued);
        }
    }
}

/// A queued load. `run` owns everything it needs, including the asset slot.
struct PendingLoad {
    type_id: TypeId,
    name: String,
    run: Box<dyn FnOnce() + Send>,
}

#[derive(Default)]
struct RegistryState {
    buckets: HashMap<TypeId, Box<dyn AssetBucket>>,
    queue: VecDeque<PendingLoad>,
}

impl RegistryState {
    fn bucket<T: Asset>(&self) -> Option<&Bucket<T>> {
        self.buckets.get(&TypeId::of::<T>())?.as_any().downcast_ref()
    }

    fn bucket_mut<T: Asset>(&mut self) -> Option<&mut Bucket<T>> {
        self.buckets.get_mut(&TypeId::of::<T>())?.as_any_mut().downcast_mut()
    }

    fn find<T: Asset>(&self, name: &str) -> Option<Arc<AssetSlot<T>>> {
        self.bucket::<T>()?.find(name).cloned()
    }

    fn push<T: Asset>(&mut self, slot: Arc<AssetSlot<T>>) {
        let bucket = self
            .buckets
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Bucket::<T> { assets: Vec::new() }));
        if let Some(bucket) = bucket.as_any_mut().downcast_mut::<Bucket<T>>() {
            bucket.assets.push(slot);
        }
    }

    fn remove_where<T: Asset>(&mut self, matches: impl Fn(&Arc<AssetSlot<T>>) -> bool) -> bool {
        let Some(bucket) = self.bucket_mut::<T>() else {
            return false;
        };
        let Some(index) = bucket.assets.iter().position(|slot| matches(slot)) else {
            return false;
        };
        let slot = bucket.assets.remove(index);
        let type_id = TypeId::of::<T>();
        self.queue
            .retain(|job| !(job.type_id == type_id && job.name == slot.name()));
        slot.fail(AssetState::Queued);
        true
    }
}

struct Shared {
    state: Mutex<RegistryState>,
    running: AtomicBool,
}

/// Owns every asset of every type and the threads that load them.
///
/// `C` is the context handed to [`Asset::load`]; all asset types stored in one
/// registry share it.
pub struct AssetRegistry<C: Send + Sync + 'static> {
    shared: Arc<Shared>,
    context: Arc<C>,
    workers: Vec<JoinHandle<()>>,
    config: RegistryConfig,
}

impl<C: Send + Sync + 'static> AssetRegistry<C> {
    /// Create a registry and spawn `config.workers` loader threads.
    pub fn new(context: Arc<C>, config: RegistryConfig) -> Result<Self, AssetError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(RegistryState::default()),
            running: AtomicBool::new(true),
        });
        let mut registry = Self {
            shared,
            context,
            workers: Vec::with_capacity(config.workers),
            config,
        };
        for index in 0..registry.config.workers {
            let shared = Arc::clone(&registry.shared);
            let poll = registry.config.poll_interval;
            let handle = thread::Builder::new()
                .name(format!("asset-worker-{index}"))
                .spawn(move || worker_loop(shared, poll, index))?;
            registry.workers.push(handle);
        }
        log::info!(
            "Asset registry started with {} worker(s)",
            registry.workers.len()
        );
        Ok(registry)
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn is_async(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Number of live loader threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Get the asset called `name`, loading it if it is not registered yet.
    ///
    /// An already registered asset is returned as is, whatever its state, and
    /// no new load is started. Without workers the load runs inline: on
    /// failure nothing is registered and the error is returned, so the same
    /// name can be tried again. With workers the asset is queued, registered
    /// and returned immediately in state `Queued`.
    pub fn load<T: Asset<Context = C>>(&self, name: &str) -> Result<AssetHandle<T>, AssetError> {
        if !self.is_running() {
            return Err(AssetError::ShutDown);
        }
        if !self.is_async() {
            return self.load_inline(name);
        }

        let mut state = self.shared.state.lock();
        if let Some(existing) = state.find::<T>(name) {
            return Ok(AssetHandle::new(existing));
        }
        let slot = Arc::new(AssetSlot::<T>::new(name));
        slot.advance(AssetState::Unloaded, AssetState::Queued);
        let job = {
            let slot = Arc::clone(&slot);
            let context = Arc::clone(&self.context);
            PendingLoad {
                type_id: TypeId::of::<T>(),
                name: name.to_string(),
                run: Box::new(move || run_load::<T>(&slot, &context)),
            }
        };
        state.queue.push_back(job);
        state.push(Arc::clone(&slot));
        log::debug!("Queued {} '{}' ({} pending)", T::KIND, name, state.queue.len());
        Ok(AssetHandle::new(slot))
    }

    fn load_inline<T: Asset<Context = C>>(&self, name: &str) -> Result<AssetHandle<T>, AssetError> {
        if let Some(existing) = self.shared.state.lock().find::<T>(name) {
            return Ok(AssetHandle::new(existing));
        }

        // The registry lock is not held while loading.
        let slot = Arc::new(AssetSlot::<T>::new(name));
        slot.advance(AssetState::Unloaded, AssetState::Loading);
        let start = instant::Instant::now();
        let value = T::load(name, &self.context).map_err(|e| {
            log::warn!("Failed to load {} '{}': {:#}", T::KIND, name, e);
            AssetError::Load {
                kind: T::KIND,
                name: name.to_string(),
                source: e.into(),
            }
        })?;
        slot.complete(AssetState::Loading, value);
        log::debug!("Loaded {} '{}' in {:?}", T::KIND, name, start.elapsed());

        let mut state = self.shared.state.lock();
        if let Some(existing) = state.find::<T>(name) {
            // another thread registered the same name meanwhile
            return Ok(AssetHandle::new(existing));
        }
        state.push(Arc::clone(&slot));
        Ok(AssetHandle::new(slot))
    }

    /// Register an asset built in code. It starts out `Loaded`.
    pub fn insert<T: Asset<Context = C>>(
        &self,
        name: &str,
        value: T,
    ) -> Result<AssetHandle<T>, AssetError> {
        if !self.is_running() {
            return Err(AssetError::ShutDown);
        }
        let mut state = self.shared.state.lock();
        if state.find::<T>(name).is_some() {
            return Err(AssetError::AlreadyRegistered {
                kind: T::KIND,
                name: name.to_string(),
            });
        }
        let slot = Arc::new(AssetSlot::<T>::new(name));
        slot.complete(AssetState::Unloaded, value);
        state.push(Arc::clone(&slot));
        Ok(AssetHandle::new(slot))
    }

    /// Look up a registered asset by exact name.
    pub fn find<T: Asset<Context = C>>(&self, name: &str) -> Option<AssetHandle<T>> {
        self.shared.state.lock().find::<T>(name).map(AssetHandle::new)
    }

    /// Remove the asset called `name`. A pending load for it is dropped from
    /// the queue and the asset ends in `Error`.
    pub fn unload<T: Asset<Context = C>>(&self, name: &str) -> bool {
        let removed = self
            .shared
            .state
            .lock()
            .remove_where::<T>(|slot| slot.name() == name);
        if removed {
            log::debug!("Unloaded {} '{}'", T::KIND, name);
        }
        removed
    }

    /// Remove the asset `handle` refers to.
    pub fn unload_handle<T: Asset<Context = C>>(&self, handle: &AssetHandle<T>) -> bool {
        let removed = self
            .shared
            .state
            .lock()
            .remove_where::<T>(|slot| Arc::ptr_eq(slot, handle.slot()));
        if removed {
            log::debug!("Unloaded {} '{}'", T::KIND, handle.name());
        }
        removed
    }

    /// Drop every asset of type `T` that ended in `Error`. Returns how many were removed.
    pub fn purge_errored<T: Asset<Context = C>>(&self) -> usize {
        let mut state = self.shared.state.lock();
        let Some(bucket) = state.bucket_mut::<T>() else {
            return 0;
        };
        let before = bucket.assets.len();
        bucket
            .assets
            .retain(|slot| slot.state() != AssetState::Error);
        let purged = before - bucket.assets.len();
        if purged > 0 {
            log::debug!("Purged {} errored {}(s)", purged, T::KIND);
        }
        purged
    }

    /// Number of loads waiting for a worker.
    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Number of registered assets of all types.
    pub fn asset_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .buckets
            .values()
            .map(|bucket| bucket.len())
            .sum()
    }

    pub fn asset_count_of<T: Asset<Context = C>>(&self) -> usize {
        self.shared
            .state
            .lock()
            .bucket::<T>()
            .map_or(0, |bucket| bucket.assets.len())
    }

    /// Stop the workers and release every asset.
    ///
    /// Workers finish the load they are running before they observe the
    /// stop flag; they are joined before anything is released. Loads still in
    /// the queue are dropped. Calling this twice is a no-op.
    pub fn shutdown(&mut self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("Asset worker panicked during shutdown");
            }
        }
        let mut state = self.shared.state.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        for bucket in state.buckets.values_mut() {
            bucket.clear();
        }
        state.buckets.clear();
        log::info!("Asset registry shut down, {} pending load(s) dropped", dropped);
    }
}

impl<C: Send + Sync + 'static> Drop for AssetRegistry<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>, poll: Duration, index: usize) {
    log::debug!("Asset worker {} started", index);
    while shared.running.load(Ordering::Acquire) {
        let job = shared
            .state
            .try_lock()
            .and_then(|mut state| state.queue.pop_front());
        match job {
            Some(job) => (job.run)(),
            None => {
                thread::sleep(poll);
                thread::yield_now();
            }
        }
    }
    log::debug!("Asset worker {} stopped", index);
}

fn run_load<T: Asset>(slot: &AssetSlot<T>, context: &T::Context) {
    if !slot.advance(AssetState::Queued, AssetState::Loading) {
        log::warn!("Skipping {} '{}' in state {:?}", T::KIND, slot.name(), slot.state());
        return;
    }
    log::debug!("Loading {} '{}'", T::KIND, slot.name());
    let start = instant::Instant::now();
    match T::load(slot.name(), context) {
        Ok(value) => {
            slot.complete(AssetState::Loading, value);
            log::debug!(
                "Asset {} '{}' loaded in {:?}",
                T::KIND,
                slot.name(),
                start.elapsed()
            );
        }
        Err(e) => {
            slot.fail(AssetState::Loading);
            log::error!("Failed to load {} '{}': {:#}", T::KIND, slot.name(), e);
        }
    }
}
