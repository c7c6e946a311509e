// Built-in resource types

pub mod material;
pub mod texture;

pub use material::{MaterialConstants, MaterialParams, MaterialResource, TextureSlot};
pub use texture::{GpuTexture, TextureData, TextureResource};

use crate::cache::ResourceCache;
use crate::error::{CacheError, Result};
use crate::handle::ResourceHandle;
use crate::registry::TypeRegistry;

/// Key of the 1x1 opaque white fallback texture
pub const WHITE_TEXTURE: &str = "white_texture";
/// Key of the fallback material (default parameters, white base color texture)
pub const DEFAULT_MATERIAL: &str = "default_material";

/// Register every built-in type
pub fn register_builtin_types(registry: &mut TypeRegistry) -> Result<()> {
    registry.register::<TextureResource>()?;
    registry.register::<MaterialResource>()?;
    Ok(())
}

/// Create the fallback resources callers substitute for missing or
/// failed assets. Returns the white texture and the default material.
pub fn seed_default_resources(cache: &ResourceCache) -> Result<(ResourceHandle, ResourceHandle)> {
    let white = cache.create_default::<TextureResource>(WHITE_TEXTURE, "White")?;
    cache
        .get_resource::<TextureResource>(white, None)?
        .get()
        .ok_or_else(|| CacheError::ResourceNotFound(WHITE_TEXTURE.to_string()))?
        .set_pixels(1, 1, vec![255; 4])?;

    let material = cache.create_default::<MaterialResource>(DEFAULT_MATERIAL, "Default")?;
    cache
        .get_resource::<MaterialResource>(material, None)?
        .get()
        .ok_or_else(|| CacheError::ResourceNotFound(DEFAULT_MATERIAL.to_string()))?
        .set_texture(cache, TextureSlot::BaseColor, white)?;

    tracing::debug!("seeded default resources");
    Ok((white, material))
}
