use std::{
    sync::{Arc, atomic::Ordering},
    thread,
    time::Duration,
};

use batch_ngin::{
    config::RegistryConfig,
    context::GpuContext,
    data_structures::{instance::InstanceRaw, instance_pool::InstancePool},
    resources::{AssetError, AssetRegistry, AssetState, model::Model, texture::Texture},
};

use crate::common::test_utils::{
    MockBackend, SLOW_LOAD_TIME, SlowAsset, TWO_OBJECT_OBJ, mock_context, mock_context_at,
    raw_at, slow_loads, write_png,
};
mod common;

const POLL: Duration = Duration::from_millis(1);
const TIMEOUT: Duration = Duration::from_secs(10);

fn registry(workers: usize) -> AssetRegistry<GpuContext<MockBackend>> {
    batch_ngin::config::init_logging();
    AssetRegistry::new(mock_context(), RegistryConfig::default().with_workers(workers))
        .expect("registry")
}

#[test]
fn sync_load_registers_a_loaded_asset() {
    let registry = registry(0);
    assert!(!registry.is_async());

    let handle = registry.load::<SlowAsset>("sync-loaded").unwrap();
    assert_eq!(handle.state(), AssetState::Loaded);
    assert_eq!(handle.get().map(|a| a.name.as_str()), Some("sync-loaded"));

    let again = registry.load::<SlowAsset>("sync-loaded").unwrap();
    assert!(handle.ptr_eq(&again));
    assert_eq!(slow_loads("sync-loaded"), 1);
    assert_eq!(registry.asset_count_of::<SlowAsset>(), 1);
}

#[test]
fn sync_failure_is_discarded_and_the_name_can_be_retried() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("black.png"), b"definitely not a png").unwrap();
    let registry = AssetRegistry::new(mock_context_at(dir.path()), RegistryConfig::default())
        .expect("registry");

    let failed = registry.load::<Texture<MockBackend>>("black.png");
    assert!(matches!(failed, Err(AssetError::Load { .. })));
    assert!(registry.find::<Texture<MockBackend>>("black.png").is_none());
    assert_eq!(registry.asset_count(), 0);

    write_png(dir.path(), "black.png", [0, 0, 0, 255]);
    let texture = registry.load::<Texture<MockBackend>>("black.png").unwrap();
    assert_eq!(texture.state(), AssetState::Loaded);
    let data = texture.get().unwrap();
    assert_eq!((data.width, data.height), (2, 3));
    assert_eq!(data.gpu.rgba.len(), 2 * 3 * 4);
    let backend = registry.context().backend();
    assert_eq!(backend.textures_created.load(Ordering::SeqCst), 1);
}

#[test]
fn requesting_a_queued_name_twice_returns_the_same_asset() {
    let registry = registry(1);

    let first = registry.load::<SlowAsset>("dedup-slow").unwrap();
    let second = registry.load::<SlowAsset>("dedup-slow").unwrap();
    assert!(first.ptr_eq(&second));
    assert!(registry.queue_len() <= 1);

    assert_eq!(first.wait_timeout(TIMEOUT, POLL), Some(AssetState::Loaded));
    assert_eq!(slow_loads("dedup-slow"), 1);
    assert_eq!(registry.asset_count_of::<SlowAsset>(), 1);
}

#[test]
fn async_load_returns_immediately_and_is_findable() {
    let registry = registry(1);

    let handle = registry.load::<SlowAsset>("findable-slow").unwrap();
    assert!(!handle.is_loaded());
    assert!(handle.get().is_none());
    let found = registry.find::<SlowAsset>("findable-slow").unwrap();
    assert!(found.ptr_eq(&handle));
    assert!(registry.find::<SlowAsset>("Findable-slow").is_none());

    assert_eq!(handle.wait_until_settled(POLL), AssetState::Loaded);
    assert!(handle.get().is_some());
}

#[test]
fn observed_states_only_move_forward() {
    let registry = registry(1);
    let handle = registry.load::<SlowAsset>("monotonic-slow").unwrap();

    let mut observed = vec![handle.state()];
    let start = std::time::Instant::now();
    while !handle.state().is_settled() && start.elapsed() < TIMEOUT {
        let state = handle.state();
        if observed.last() != Some(&state) {
            observed.push(state);
        }
        thread::yield_now();
    }
    observed.push(handle.state());

    assert!(observed.windows(2).all(|w| w[0] <= w[1]), "{observed:?}");
    assert!(matches!(
        observed.first(),
        Some(AssetState::Queued) | Some(AssetState::Loading)
    ));
    assert_eq!(observed.last(), Some(&AssetState::Loaded));
    assert!(!observed.contains(&AssetState::Error));
}

#[test]
fn two_workers_settle_every_queued_model() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("first.obj"), TWO_OBJECT_OBJ).unwrap();
    std::fs::write(dir.path().join("second.obj"), TWO_OBJECT_OBJ).unwrap();
    let registry = AssetRegistry::new(
        mock_context_at(dir.path()),
        RegistryConfig::default().with_workers(2),
    )
    .expect("registry");

    let names = ["first.obj", "second.obj", "missing.obj"];
    let handles: Vec<_> = names
        .iter()
        .map(|name| registry.load::<Model<MockBackend>>(name).unwrap())
        .collect();

    for handle in &handles {
        let state = handle.wait_timeout(TIMEOUT, POLL);
        assert!(
            matches!(state, Some(AssetState::Loaded) | Some(AssetState::Error)),
            "{} stuck in {:?}",
            handle.name(),
            handle.state()
        );
    }
    assert_eq!(registry.queue_len(), 0);
    assert_eq!(handles[0].state(), AssetState::Loaded);
    assert_eq!(handles[1].state(), AssetState::Loaded);
    assert_eq!(handles[2].state(), AssetState::Error);
}

#[test]
fn loaders_and_the_render_thread_never_touch_the_gpu_at_once() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..4 {
        std::fs::write(dir.path().join(format!("model{i}.obj")), TWO_OBJECT_OBJ).unwrap();
        write_png(dir.path(), &format!("texture{i}.png"), [i as u8, 0, 0, 255]);
    }
    let context = mock_context_at(dir.path());
    context.backend().slow_calls.store(true, Ordering::SeqCst);
    let registry = AssetRegistry::new(
        Arc::clone(&context),
        RegistryConfig::default().with_workers(4),
    )
    .expect("registry");

    let models: Vec<_> = (0..4)
        .map(|i| registry.load::<Model<MockBackend>>(&format!("model{i}.obj")).unwrap())
        .collect();
    let textures: Vec<_> = (0..4)
        .map(|i| registry.load::<Texture<MockBackend>>(&format!("texture{i}.png")).unwrap())
        .collect();

    // keep creating and filling instance buffers while the workers upload
    let started = std::time::Instant::now();
    let mut pools = 0;
    while !(models.iter().all(|h| h.state().is_settled())
        && textures.iter().all(|h| h.state().is_settled()))
    {
        assert!(started.elapsed() < TIMEOUT, "loads did not settle");
        let mut pool: InstancePool<MockBackend, InstanceRaw> =
            InstancePool::new(Arc::clone(&context), "render thread", 2, None, false).unwrap();
        pool.unlock(true).unwrap();
        pool.append(&[raw_at(1.0)]).unwrap();
        pool.lock(None);
        pools += 1;
    }

    assert!(pools > 0);
    assert!(models.iter().all(|h| h.state() == AssetState::Loaded));
    assert!(textures.iter().all(|h| h.state() == AssetState::Loaded));
    assert_eq!(context.backend().textures_created.load(Ordering::SeqCst), 4);
    assert_eq!(context.backend().max_in_flight.load(Ordering::SeqCst), 1);
}

#[test]
fn async_failures_stay_registered_until_purged() {
    let registry = registry(1);

    let bad = registry.load::<SlowAsset>("bad-async").unwrap();
    let good = registry.load::<SlowAsset>("good-async").unwrap();
    assert_eq!(bad.wait_timeout(TIMEOUT, POLL), Some(AssetState::Error));
    assert_eq!(good.wait_timeout(TIMEOUT, POLL), Some(AssetState::Loaded));

    let found = registry.find::<SlowAsset>("bad-async").unwrap();
    assert_eq!(found.state(), AssetState::Error);
    assert!(found.get().is_none());

    // no automatic retry
    let again = registry.load::<SlowAsset>("bad-async").unwrap();
    assert!(again.ptr_eq(&bad));
    assert_eq!(slow_loads("bad-async"), 1);

    assert_eq!(registry.purge_errored::<SlowAsset>(), 1);
    assert!(registry.find::<SlowAsset>("bad-async").is_none());
    assert!(registry.find::<SlowAsset>("good-async").is_some());
    assert_eq!(registry.purge_errored::<SlowAsset>(), 0);
}

#[test]
fn unload_by_name_and_by_handle() {
    let registry = registry(0);
    let a = registry.load::<SlowAsset>("unload-a").unwrap();
    registry.load::<SlowAsset>("unload-b").unwrap();

    assert!(registry.unload::<SlowAsset>("unload-b"));
    assert!(!registry.unload::<SlowAsset>("unload-b"));
    assert!(!registry.unload::<SlowAsset>("never-registered"));
    assert!(registry.unload_handle(&a));
    assert!(!registry.unload_handle(&a));
    assert_eq!(registry.asset_count(), 0);

    // the handle outlives its registration
    assert_eq!(a.get().map(|a| a.name.as_str()), Some("unload-a"));
}

#[test]
fn unloading_a_queued_asset_drops_its_pending_load() {
    let registry = registry(1);
    let busy = registry.load::<SlowAsset>("queue-busy").unwrap();
    let queued = registry.load::<SlowAsset>("queue-dropped").unwrap();

    assert!(registry.unload::<SlowAsset>("queue-dropped"));
    assert_eq!(queued.wait_timeout(TIMEOUT, POLL), Some(AssetState::Error));
    assert_eq!(busy.wait_timeout(TIMEOUT, POLL), Some(AssetState::Loaded));
    thread::sleep(SLOW_LOAD_TIME * 2);

    assert_eq!(registry.queue_len(), 0);
    assert_eq!(slow_loads("queue-dropped"), 0);
}

#[test]
fn inserted_assets_are_loaded_and_unique() {
    let registry = registry(0);
    let handle = registry
        .insert("procedural", SlowAsset { name: "procedural".into() })
        .unwrap();
    assert_eq!(handle.state(), AssetState::Loaded);
    assert!(registry.load::<SlowAsset>("procedural").unwrap().ptr_eq(&handle));
    assert_eq!(slow_loads("procedural"), 0);

    let duplicate = registry.insert("procedural", SlowAsset { name: "other".into() });
    assert!(matches!(duplicate, Err(AssetError::AlreadyRegistered { .. })));
}

#[test]
fn shutdown_joins_workers_and_releases_everything() {
    let mut registry = registry(2);
    let handles: Vec<_> = (0..6)
        .map(|i| registry.load::<SlowAsset>(&format!("teardown-{i}")).unwrap())
        .collect();
    thread::sleep(SLOW_LOAD_TIME / 2);

    registry.shutdown();

    assert_eq!(registry.worker_count(), 0);
    assert!(!registry.is_running());
    assert_eq!(registry.asset_count(), 0);
    assert_eq!(registry.queue_len(), 0);
    assert!(matches!(
        registry.load::<SlowAsset>("teardown-late"),
        Err(AssetError::ShutDown)
    ));

    // loads in flight finished, the rest were dropped
    for handle in &handles {
        assert!(handle.state().is_settled(), "{:?}", handle);
    }
    assert!(handles.iter().any(|h| h.state() == AssetState::Loaded));

    registry.shutdown();
}

#[test]
fn dropping_the_registry_stops_its_workers() {
    let context = mock_context();
    let handle = {
        let registry =
            AssetRegistry::new(Arc::clone(&context), RegistryConfig::default().with_workers(3))
                .expect("registry");
        registry.load::<SlowAsset>("dropped-registry").unwrap()
    };
    assert!(handle.state().is_settled());
    // only the test holds the context now
    assert_eq!(Arc::strong_count(&context), 1);
}
