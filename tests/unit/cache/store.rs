use super::*;

use std::sync::Barrier;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::foundation::core::{MipLevel, PlaneDesc};

fn key(action: ActionKind, node_hash: u64) -> ActionCacheKey {
    ActionCacheKey {
        action,
        node_hash,
        plugin_id: "ravel.test".to_string(),
        proxy_scale_bits: (1.0f64.to_bits(), 1.0f64.to_bits()),
        mip: MipLevel(0),
        time_bits: None,
        view: None,
        plane: None,
        rect: None,
    }
}

fn rod_of(action: &CachedAction) -> RectI {
    match action {
        CachedAction::RegionOfDefinition(r) => *r,
        other => panic!("expected a region-of-definition entry, got {other:?}"),
    }
}

#[test]
fn second_call_is_served_from_memory() {
    let cache = ActionResultCache::new();
    let k = key(ActionKind::RegionOfDefinition, 1);
    let calls = AtomicUsize::new(0);
    let compute = || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(CachedAction::RegionOfDefinition(RectI::new(0, 0, 8, 8)))
    };
    let first = cache.get_or_compute(&k, compute).unwrap();
    let second = cache
        .get_or_compute(&k, || panic!("must not recompute a published key"))
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(rod_of(&first), rod_of(&second));
}

#[test]
fn concurrent_callers_trigger_exactly_one_computation() {
    let cache = std::sync::Arc::new(ActionResultCache::new());
    let calls = std::sync::Arc::new(AtomicUsize::new(0));
    let barrier = std::sync::Arc::new(Barrier::new(4));
    let k = key(ActionKind::Components, 2);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let cache = cache.clone();
        let calls = calls.clone();
        let barrier = barrier.clone();
        let k = k.clone();
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            let v = cache
                .get_or_compute(&k, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(50));
                    Ok(CachedAction::RegionOfDefinition(RectI::new(0, 0, 2, 2)))
                })
                .unwrap();
            rod_of(&v)
        }));
    }
    for handle in handles {
        assert_eq!(handle.join().unwrap(), RectI::new(0, 0, 2, 2));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_computation_vacates_the_key() {
    let cache = ActionResultCache::new();
    let k = key(ActionKind::Identity, 3);
    let err = cache
        .get_or_compute(&k, || Err(RavelError::effect("identity query exploded")))
        .unwrap_err();
    assert!(matches!(err, RavelError::Effect(_)));

    // The key is free again; the next caller computes.
    let v = cache.get_or_compute(&k, || Ok(CachedAction::Identity(None))).unwrap();
    assert!(matches!(v, CachedAction::Identity(None)));
}

#[test]
fn persistent_kinds_round_trip_through_storage() {
    let storage = std::sync::Arc::new(MemoryCacheStorage::new());
    let k = key(ActionKind::RegionOfDefinition, 4);
    {
        let cache = ActionResultCache::with_storage(storage.clone());
        cache
            .get_or_compute(&k, || {
                Ok(CachedAction::RegionOfDefinition(RectI::new(-4, -4, 4, 4)))
            })
            .unwrap();
    }
    assert_eq!(storage.len(), 1);

    // A fresh cache over the same storage answers without computing.
    let cache = ActionResultCache::with_storage(storage);
    let v = cache
        .get_or_compute(&k, || panic!("storage must satisfy this key"))
        .unwrap();
    assert_eq!(rod_of(&v), RectI::new(-4, -4, 4, 4));
}

#[test]
fn transient_kinds_never_reach_storage() {
    let storage = std::sync::Arc::new(MemoryCacheStorage::new());
    let cache = ActionResultCache::with_storage(storage.clone());

    cache
        .get_or_compute(&key(ActionKind::Distortion, 5), || {
            Ok(CachedAction::Distortion(None))
        })
        .unwrap();
    let image = ImagePlane::new_zeroed(PlaneDesc::rgba(), RectI::new(0, 0, 2, 2));
    cache.insert(key(ActionKind::RenderedPlane, 6), CachedAction::RenderedPlane(image));

    assert!(storage.is_empty());
    // Both stay readable from process memory.
    assert!(cache.lookup(&key(ActionKind::Distortion, 5)).is_some());
    assert!(cache.lookup(&key(ActionKind::RenderedPlane, 6)).is_some());
}

#[test]
fn lookup_does_not_compute() {
    let cache = ActionResultCache::new();
    let k = key(ActionKind::FramesNeeded, 7);
    assert!(cache.lookup(&k).is_none());
    cache.insert(k.clone(), CachedAction::FramesNeeded(FramesNeeded::default()));
    assert!(matches!(cache.lookup(&k), Some(CachedAction::FramesNeeded(_))));
}
