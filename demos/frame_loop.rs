//! Demo: async loading feeding a per-frame upload pass
//!
//! Writes a few textures and a material to a temp directory, imports the
//! directory, loads everything on worker threads and runs the residency
//! scheduler once per "frame" until nothing is dirty.

use residency_cache::builtin::{
    register_builtin_types, seed_default_resources, MaterialResource, TextureResource, TextureSlot,
};
use residency_cache::{
    generate_uuid, AsyncResourceLoader, GpuResidencyScheduler, Resource, ResourceCache, ResourceLoader,
    TypeRegistry,
};
use std::sync::Arc;
use std::time::Duration;

fn main() -> residency_cache::Result<()> {
    let dir = std::env::temp_dir().join(format!("residency-demo-{}", generate_uuid()));
    std::fs::create_dir_all(&dir)?;
    for (name, shade) in [("albedo", 200u8), ("normal", 128), ("rough", 40)] {
        std::fs::write(dir.join(format!("{name}.tex")), vec![shade; 4 * 4 * 4])?;
    }

    let mut registry = TypeRegistry::new();
    register_builtin_types(&mut registry)?;
    let cache = Arc::new(ResourceCache::new(Arc::new(registry)));
    let loader = ResourceLoader::new(cache.clone());
    let scheduler = Arc::new(GpuResidencyScheduler::new(cache.config()));
    seed_default_resources(&cache)?;

    // Material referencing the three textures
    let imported = loader.visit_directory(&dir, false)?;
    println!("Imported {} resources", imported.len());
    let material = cache.create::<MaterialResource>(None, dir.join("brick.mat"), "brick")?;
    {
        let mat = cache.get_resource::<MaterialResource>(material, None)?;
        let mat = mat.get().ok_or_else(|| residency_cache::CacheError::ResourceNotFound("brick".into()))?;
        for (slot, handle) in TextureSlot::ALL.into_iter().zip(imported.iter().copied()) {
            mat.set_texture(&cache, slot, handle)?;
        }
    }
    loader.save_resource(material)?;

    let async_loader = AsyncResourceLoader::new(loader.clone(), scheduler.clone())?;
    for handle in imported.iter().chain([&material]) {
        async_loader.load_resource_async(*handle, false, None)?;
    }

    for frame in 0..10 {
        for done in async_loader.drain() {
            println!("frame {frame}: load {:?} finished ok={}", done.ticket, done.outcome.is_ok());
        }

        let report = scheduler.run_cache(&cache);
        println!(
            "frame {frame}: uploaded {} deferred {} clean {}",
            report.uploaded.len(),
            report.deferred.len(),
            report.skipped_clean
        );

        let all_clean = async_loader.pending() == 0 && cache.all_resources().iter().all(|r| !r.is_dirty_gpu());
        if all_clean {
            break;
        }
        std::thread::sleep(Duration::from_millis(16));
    }

    for texture in cache.resources_of_type(
        cache
            .registry()
            .type_of::<TextureResource>()
            .unwrap_or_default(),
    ) {
        println!("{} loaded={} gpu={:?}", texture.core().name(), texture.core().is_loaded(), texture.core().gpu_state());
    }

    async_loader.shutdown();
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}
