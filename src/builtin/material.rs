//! Material resource: shading parameters plus texture bindings.
//!
//! A material is GPU-dirty whenever one of its bound textures is, which
//! makes it the canonical composite resource.

use super::texture::TextureResource;
use crate::cache::ResourceCache;
use crate::error::{CacheError, Result};
use crate::handle::ResourceHandle;
use crate::loader::LoadContext;
use crate::registry::ResourceKind;
use crate::resource::{CountedOwner, Resource, ResourceCore};
use crate::resource_ref::ResourceRef;
use glam::Vec4;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

/// Texture binding points
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    BaseColor = 0,
    Normal = 1,
    Roughness = 2,
}

impl TextureSlot {
    pub const COUNT: usize = 3;
    pub const ALL: [TextureSlot; Self::COUNT] =
        [TextureSlot::BaseColor, TextureSlot::Normal, TextureSlot::Roughness];
}

/// Shading parameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialParams {
    pub base_color: Vec4,
    pub roughness: f32,
    pub metallic: f32,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            roughness: 0.5,
            metallic: 0.0,
        }
    }
}

/// Simulated constant buffer contents
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialConstants {
    pub params: MaterialParams,
    /// Bit per bound texture slot
    pub texture_mask: u32,
}

#[derive(Default, Serialize, Deserialize)]
struct MaterialProperties {
    #[serde(flatten)]
    params: MaterialParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_color_texture: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    normal_texture: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    roughness_texture: Option<Uuid>,
}

impl MaterialProperties {
    fn texture_uuid(&self, slot: TextureSlot) -> Option<Uuid> {
        match slot {
            TextureSlot::BaseColor => self.base_color_texture,
            TextureSlot::Normal => self.normal_texture,
            TextureSlot::Roughness => self.roughness_texture,
        }
    }
}

pub struct MaterialResource {
    core: ResourceCore,
    params: RwLock<MaterialParams>,
    textures: RwLock<[ResourceRef<TextureResource>; TextureSlot::COUNT]>,
    constants: RwLock<Option<MaterialConstants>>,
    upload_count: AtomicUsize,
}

impl MaterialResource {
    fn owner(&self) -> CountedOwner {
        CountedOwner::new(self.core.name(), Self::TYPE_NAME)
    }

    pub fn params(&self) -> MaterialParams {
        *self.params.read()
    }

    fn edit(&self, f: impl FnOnce(&mut MaterialParams)) -> Result<()> {
        self.core.make_disk_dirty()?;
        f(&mut self.params.write());
        self.core.make_gpu_dirty();
        self.signal_change();
        Ok(())
    }

    pub fn set_base_color(&self, color: Vec4) -> Result<()> {
        self.edit(|p| p.base_color = color)
    }

    pub fn set_roughness(&self, roughness: f32) -> Result<()> {
        self.edit(|p| p.roughness = roughness.clamp(0.0, 1.0))
    }

    pub fn set_metallic(&self, metallic: f32) -> Result<()> {
        self.edit(|p| p.metallic = metallic.clamp(0.0, 1.0))
    }

    /// Bind a texture by handle. An empty handle clears the slot.
    pub fn set_texture(&self, cache: &ResourceCache, slot: TextureSlot, handle: ResourceHandle) -> Result<()> {
        let texture = cache.get_resource::<TextureResource>(handle, Some(self.owner()))?;
        self.core.make_disk_dirty()?;
        self.textures.write()[slot as usize] = texture;
        self.core.make_gpu_dirty();
        self.signal_change();
        Ok(())
    }

    pub fn texture(&self, slot: TextureSlot) -> ResourceRef<TextureResource> {
        self.textures.read()[slot as usize].clone()
    }

    pub fn constants(&self) -> Option<MaterialConstants> {
        *self.constants.read()
    }

    pub fn upload_count(&self) -> usize {
        self.upload_count.load(Ordering::Acquire)
    }

    fn texture_mask(&self) -> u32 {
        self.textures
            .read()
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_valid())
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }
}

impl ResourceKind for MaterialResource {
    const TYPE_NAME: &'static str = "Material";
    const EXTENSIONS: &'static [&'static str] = &[".mat"];

    fn create(core: ResourceCore) -> Self {
        Self {
            core,
            params: RwLock::new(MaterialParams::default()),
            textures: RwLock::new(Default::default()),
            constants: RwLock::new(None),
            upload_count: AtomicUsize::new(0),
        }
    }
}

impl Resource for MaterialResource {
    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn are_dependencies_dirty(&self) -> bool {
        self.textures
            .read()
            .iter()
            .any(|texture| texture.is_valid_and_gpu_dirty())
    }

    /// Properties come from the sidecar, or from the `.mat` file itself when
    /// it holds hand-written JSON.
    fn read_resource_from_file(&self, context: &LoadContext<'_>) -> Result<bool> {
        let props: MaterialProperties = if context.properties.is_null() {
            let bytes = context.read_bytes()?;
            if bytes.iter().all(u8::is_ascii_whitespace) {
                MaterialProperties::default()
            } else {
                serde_json::from_slice(&bytes)
                    .map_err(|e| CacheError::DeserializationError(e.to_string()))?
            }
        } else {
            serde_json::from_value(context.properties.clone())
                .map_err(|e| CacheError::DeserializationError(e.to_string()))?
        };

        let mut textures: [ResourceRef<TextureResource>; TextureSlot::COUNT] = Default::default();
        for slot in TextureSlot::ALL {
            let Some(uuid) = props.texture_uuid(slot) else {
                continue;
            };
            let texture = context
                .cache
                .get_resource_by_uuid::<TextureResource>(&uuid, Some(self.owner()))?;
            if texture.is_empty() {
                tracing::warn!(material = %self.core.name(), %uuid, ?slot, "bound texture is not known to the cache");
            }
            textures[slot as usize] = texture;
        }

        *self.params.write() = props.params;
        *self.textures.write() = textures;
        Ok(false)
    }

    fn write_resource_to_file(&self) -> Result<serde_json::Value> {
        let textures = self.textures.read();
        let uuid_of = |slot: TextureSlot| textures[slot as usize].uuid();

        serde_json::to_value(MaterialProperties {
            params: self.params(),
            base_color_texture: uuid_of(TextureSlot::BaseColor),
            normal_texture: uuid_of(TextureSlot::Normal),
            roughness_texture: uuid_of(TextureSlot::Roughness),
        })
        .map_err(|e| CacheError::SerializationError(e.to_string()))
    }

    fn upload_to_gpu(&self) -> bool {
        *self.constants.write() = Some(MaterialConstants {
            params: self.params(),
            texture_mask: self.texture_mask(),
        });
        self.upload_count.fetch_add(1, Ordering::AcqRel);
        true
    }

    fn evict_from_gpu(&self) {
        self.constants.write().take();
    }

    fn unload(&self) {
        self.evict_from_gpu();
        *self.textures.write() = Default::default();
        *self.params.write() = MaterialParams::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::register_builtin_types;
    use crate::registry::TypeRegistry;
    use std::sync::Arc;

    fn setup() -> (Arc<ResourceCache>, ResourceHandle, ResourceHandle) {
        let mut registry = TypeRegistry::new();
        register_builtin_types(&mut registry).unwrap();
        let cache = Arc::new(ResourceCache::new(Arc::new(registry)));
        let tex = cache.create::<TextureResource>(None, "t.tex", "t").unwrap();
        let mat = cache.create::<MaterialResource>(None, "m.mat", "m").unwrap();
        (cache, tex, mat)
    }

    fn clean(resource: &dyn Resource) {
        resource.core().set_uploading().unwrap();
        assert!(resource.upload_to_gpu());
        resource.core().set_upload_complete().unwrap();
    }

    #[test]
    fn test_dirty_texture_makes_material_dirty() {
        let (cache, tex, mat) = setup();
        let material = cache.get_resource::<MaterialResource>(mat, None).unwrap();
        let material = material.get().unwrap();
        material.set_texture(&cache, TextureSlot::BaseColor, tex).unwrap();

        clean(material);
        assert!(!material.core().is_self_dirty_gpu());
        // Texture is still dirty from creation
        assert!(material.is_dirty_gpu());

        let texture = cache.get_raw_resource_sync(tex).unwrap();
        clean(texture.as_ref());
        assert!(!material.is_dirty_gpu());
    }

    #[test]
    fn test_texture_binding_records_owner() {
        let (cache, tex, mat) = setup();
        let material = cache.get_resource::<MaterialResource>(mat, None).unwrap();
        material
            .get()
            .unwrap()
            .set_texture(&cache, TextureSlot::Normal, tex)
            .unwrap();

        let texture = cache.get_raw_resource_sync(tex).unwrap();
        assert_eq!(texture.core().ref_count(), 1);
        assert_eq!(texture.core().owners(), vec![CountedOwner::new("m", "Material")]);
        assert_eq!(material.get().unwrap().texture_mask(), 0b010);
    }

    #[test]
    fn test_destroyed_texture_no_longer_dirties() {
        let (cache, tex, mat) = setup();
        let material = cache.get_resource::<MaterialResource>(mat, None).unwrap();
        let material = material.get().unwrap();
        material.set_texture(&cache, TextureSlot::Roughness, tex).unwrap();
        clean(material);

        cache.destroy(tex).unwrap();
        assert!(!material.is_dirty_gpu());
        assert!(!material.texture(TextureSlot::Roughness).is_valid());
    }

    #[test]
    fn test_properties_persist_texture_uuids() {
        let (cache, tex, mat) = setup();
        let material = cache.get_resource::<MaterialResource>(mat, None).unwrap();
        let material = material.get().unwrap();
        material.set_texture(&cache, TextureSlot::BaseColor, tex).unwrap();
        material.set_roughness(2.0).unwrap();

        let props = material.write_resource_to_file().unwrap();
        let tex_uuid = cache.get_raw_resource_sync(tex).unwrap().core().uuid();
        assert_eq!(props["base_color_texture"], serde_json::json!(tex_uuid));
        assert_eq!(props["roughness"], serde_json::json!(1.0));
        assert!(props.get("normal_texture").is_none());
    }
}
