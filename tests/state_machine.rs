use residency_cache::builtin::{register_builtin_types, MaterialResource, TextureResource, TextureSlot};
use residency_cache::{
    CacheConfig, CacheError, GpuResidencyScheduler, GpuState, LoadContext, Resource, ResourceCache,
    ResourceCore, ResourceGpuUpdateResult, ResourceKind, ResourceLoader, TypeRegistry,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upload hook that can be told to fail and records overlapping calls
struct CountingResource {
    core: ResourceCore,
    fail: AtomicBool,
    calls: AtomicUsize,
    inside: AtomicUsize,
    max_inside: AtomicUsize,
}

impl ResourceKind for CountingResource {
    const TYPE_NAME: &'static str = "Counting";
    const EXTENSIONS: &'static [&'static str] = &[".counting"];

    fn create(core: ResourceCore) -> Self {
        Self {
            core,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            inside: AtomicUsize::new(0),
            max_inside: AtomicUsize::new(0),
        }
    }
}

impl Resource for CountingResource {
    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn read_resource_from_file(&self, _context: &LoadContext<'_>) -> residency_cache::Result<bool> {
        Ok(false)
    }

    fn write_resource_to_file(&self) -> residency_cache::Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    fn upload_to_gpu(&self) -> bool {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inside.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_micros(50));
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inside.fetch_sub(1, Ordering::SeqCst);
        !self.fail.load(Ordering::SeqCst)
    }
}

fn cache() -> Arc<ResourceCache> {
    let mut registry = TypeRegistry::new();
    register_builtin_types(&mut registry).unwrap();
    registry.register::<CountingResource>().unwrap();
    Arc::new(ResourceCache::new(Arc::new(registry)))
}

fn counting(cache: &ResourceCache, name: &str) -> (Arc<CountingResource>, Arc<dyn Resource>) {
    let handle = cache.create::<CountingResource>(None, format!("{name}.counting"), name).unwrap();
    let typed = cache
        .get_resource::<CountingResource>(handle, None)
        .unwrap()
        .get_arc()
        .unwrap();
    let raw = cache.get_raw_resource_sync(handle).unwrap();
    assert!(raw.core().begin_load());
    raw.core().finish_load(true);
    (typed, raw)
}

#[test]
fn test_gpu_transitions_follow_the_cycle() {
    let cache = cache();
    let (res, _) = counting(&cache, "p");
    let core = res.core();

    assert_eq!(core.gpu_state(), GpuState::Dirty);
    assert!(matches!(
        core.set_upload_complete(),
        Err(CacheError::IllegalGpuTransition {
            observed: GpuState::Dirty,
            required: GpuState::Uploading,
            ..
        })
    ));

    core.set_uploading().unwrap();
    assert_eq!(core.gpu_state(), GpuState::Uploading);
    assert!(core.set_uploading().is_err());

    core.set_upload_complete().unwrap();
    assert_eq!(core.gpu_state(), GpuState::Clean);
    assert!(matches!(
        core.set_uploading(),
        Err(CacheError::IllegalGpuTransition {
            observed: GpuState::Clean,
            required: GpuState::Dirty,
            ..
        })
    ));

    core.make_gpu_dirty();
    assert_eq!(core.gpu_state(), GpuState::Dirty);
}

#[test]
fn test_two_passes_upload_once() {
    let cache = cache();
    let (res, _) = counting(&cache, "p");
    let scheduler = GpuResidencyScheduler::default();

    scheduler.run_cache(&cache);
    scheduler.run_cache(&cache);
    assert_eq!(res.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dirty_texture_makes_material_dirty() {
    let cache = cache();
    let tex = cache.create::<TextureResource>(None, "t.tex", "t").unwrap();
    let mat = cache.create::<MaterialResource>(None, "m.mat", "m").unwrap();
    let material = cache.get_resource::<MaterialResource>(mat, None).unwrap();
    let material = material.get().unwrap();
    material.set_texture(&cache, TextureSlot::BaseColor, tex).unwrap();

    material.core().set_uploading().unwrap();
    material.core().set_upload_complete().unwrap();

    let texture = cache.get_raw_resource_sync(tex).unwrap();
    assert_eq!(texture.core().gpu_state(), GpuState::Dirty);
    assert!(!material.core().is_self_dirty_gpu());
    assert!(material.is_dirty_gpu());
    assert!(material.texture(TextureSlot::BaseColor).is_valid_and_gpu_dirty());
}

#[test]
fn test_default_resource_stays_disk_clean() {
    let cache = cache();
    let white = cache.create_default::<TextureResource>("white", "White").unwrap();
    let tex = cache.get_resource::<TextureResource>(white, None).unwrap();
    let tex = tex.get().unwrap();

    tex.core().make_disk_dirty().unwrap();
    assert!(!tex.core().is_dirty_disk());

    tex.set_pixels(1, 1, vec![255; 4]).unwrap();
    assert!(!tex.core().is_dirty_disk());
    assert_eq!(tex.width(), 1);
}

#[test]
fn test_locked_resource_rejects_disk_dirty() {
    let cache = cache();
    let (res, _) = counting(&cache, "p");

    res.core().set_locked(true);
    let result = res.core().make_disk_dirty();
    assert!(matches!(result, Err(CacheError::ResourceLocked(h)) if h == res.handle()));
    assert!(!res.core().is_dirty_disk());
}

#[test]
fn test_failed_upload_is_parked_until_retry() {
    let cache = cache();
    let (res, raw) = counting(&cache, "p");
    res.fail.store(true, Ordering::SeqCst);
    let scheduler = GpuResidencyScheduler::default();

    let report = scheduler.run_cache(&cache);
    assert_eq!(report.failed, vec![res.handle()]);
    assert_eq!(res.core().gpu_state(), GpuState::Uploading);
    assert!(res.is_dirty_gpu());
    assert_eq!(scheduler.faulted(), vec![res.handle()]);

    // Parked: no further hook calls
    assert_eq!(
        scheduler.update_gpu(&raw).unwrap(),
        ResourceGpuUpdateResult::Failed
    );
    scheduler.run_cache(&cache);
    assert_eq!(res.calls.load(Ordering::SeqCst), 1);

    res.fail.store(false, Ordering::SeqCst);
    assert!(scheduler.retry(res.handle()).unwrap());
    assert!(!scheduler.retry(res.handle()).unwrap());
    assert_eq!(res.core().gpu_state(), GpuState::Dirty);

    let report = scheduler.run_cache(&cache);
    assert_eq!(report.uploaded, vec![res.handle()]);
    assert_eq!(res.core().gpu_state(), GpuState::Clean);
    assert_eq!(scheduler.stats().failures, 1);
}

#[test]
fn test_mutation_during_upload_is_seen_next_pass() {
    let cache = cache();
    let (res, raw) = counting(&cache, "p");
    let scheduler = GpuResidencyScheduler::default();

    res.core().set_uploading().unwrap();
    res.core().make_gpu_dirty();
    assert_eq!(res.core().gpu_state(), GpuState::Uploading);
    res.core().set_upload_complete().unwrap();
    assert_eq!(res.core().gpu_state(), GpuState::Dirty);

    assert_eq!(
        scheduler.update_gpu(&raw).unwrap(),
        ResourceGpuUpdateResult::Success
    );
    assert_eq!(res.core().gpu_state(), GpuState::Clean);
}

#[test]
fn test_overlapping_passes_never_overlap_uploads() {
    let cache = cache();
    let (res, raw) = counting(&cache, "p");
    let scheduler = GpuResidencyScheduler::new(&CacheConfig::default());
    let stop = AtomicBool::new(false);

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..200 {
                    scheduler.update_gpu(&raw).unwrap();
                }
            });
        }
        s.spawn(|| {
            while !stop.load(Ordering::SeqCst) {
                res.core().make_gpu_dirty();
                std::thread::yield_now();
            }
        });
        std::thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::SeqCst);
    });

    assert_eq!(res.max_inside.load(Ordering::SeqCst), 1);
    assert!(res.calls.load(Ordering::SeqCst) >= 1);
    assert_ne!(res.core().gpu_state(), GpuState::Uploading);
}

#[test]
fn test_change_signal_fires_after_mutation() {
    let cache = cache();
    let tex = cache.create::<TextureResource>(None, "t.tex", "t").unwrap();
    let tex = cache.get_resource::<TextureResource>(tex, None).unwrap();
    let tex = tex.get().unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let key = tex.core().connect_change(move |_| {
        h.fetch_add(1, Ordering::SeqCst);
    });

    tex.set_srgb(true).unwrap();
    tex.set_srgb(true).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Failed mutation does not signal
    tex.core().set_locked(true);
    assert!(tex.set_srgb(false).is_err());
    tex.core().set_locked(false);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert!(tex.core().disconnect_change(key));
}

#[test]
fn test_unload_keeps_resource_off_the_gpu() {
    let dir = std::env::temp_dir().join(format!("residency-unload-{}", residency_cache::generate_uuid()));
    std::fs::create_dir_all(&dir).unwrap();
    let file = dir.join("t.tex");
    std::fs::write(&file, [9u8; 16]).unwrap();

    let cache = cache();
    let loader = ResourceLoader::new(cache.clone());
    let scheduler = GpuResidencyScheduler::default();
    let handle = cache.create::<TextureResource>(None, &file, "t").unwrap();
    let tex = cache.get_resource::<TextureResource>(handle, None).unwrap();
    let tex = tex.get().unwrap();

    // Nothing to upload before the first read
    let report = scheduler.run_cache(&cache);
    assert_eq!(report.not_loaded, vec![handle]);
    assert_eq!(tex.upload_count(), 0);
    assert!(!tex.is_resident());

    loader.load_resource_sync(handle).unwrap();
    scheduler.run_cache(&cache);
    assert_eq!(tex.upload_count(), 1);
    assert!(tex.is_resident());

    cache.unload(handle).unwrap();
    scheduler.run_cache(&cache);
    assert!(!tex.core().is_loaded());
    assert!(!tex.is_resident());
    assert_eq!(tex.upload_count(), 1);
    assert_eq!(tex.core().gpu_state(), GpuState::Dirty);

    // Reload brings it back
    loader.load_resource_sync(handle).unwrap();
    scheduler.run_cache(&cache);
    assert!(tex.is_resident());
    assert_eq!(tex.upload_count(), 2);

    std::fs::remove_dir_all(dir).ok();
}
