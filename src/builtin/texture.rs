use crate::error::{CacheError, Result};
use crate::loader::LoadContext;
use crate::registry::ResourceKind;
use crate::resource::{Resource, ResourceCore};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// CPU-side pixel data, RGBA8
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub srgb: bool,
    pub pixels: Vec<u8>,
}

/// Simulated device copy
#[derive(Clone, Debug, PartialEq)]
pub struct GpuTexture {
    pub width: u32,
    pub height: u32,
    pub srgb: bool,
    pub pixels: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct TextureProperties {
    width: u32,
    height: u32,
    #[serde(default)]
    srgb: bool,
}

/// Texture resource backed by a raw RGBA8 file
pub struct TextureResource {
    core: ResourceCore,
    data: RwLock<TextureData>,
    gpu: RwLock<Option<GpuTexture>>,
    upload_count: AtomicUsize,
    locked_during_upload: AtomicBool,
}

fn check_size(width: u32, height: u32, len: usize) -> Result<()> {
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| CacheError::LoadError(format!("{width}x{height} texture is too large")))?;
    if expected != len {
        return Err(CacheError::LoadError(format!(
            "{width}x{height} texture needs {expected} bytes, got {len}"
        )));
    }
    Ok(())
}

impl TextureResource {
    pub fn width(&self) -> u32 {
        self.data.read().width
    }

    pub fn height(&self) -> u32 {
        self.data.read().height
    }

    pub fn srgb(&self) -> bool {
        self.data.read().srgb
    }

    pub fn data(&self) -> TextureData {
        self.data.read().clone()
    }

    /// Replace the pixels. Fails while the resource is locked.
    pub fn set_pixels(&self, width: u32, height: u32, pixels: Vec<u8>) -> Result<()> {
        check_size(width, height, pixels.len())?;
        self.core.make_disk_dirty()?;
        {
            let mut data = self.data.write();
            data.width = width;
            data.height = height;
            data.pixels = pixels;
        }
        self.core.make_gpu_dirty();
        self.signal_change();
        Ok(())
    }

    pub fn set_srgb(&self, srgb: bool) -> Result<()> {
        if self.srgb() == srgb {
            return Ok(());
        }
        self.core.make_disk_dirty()?;
        self.data.write().srgb = srgb;
        self.core.make_gpu_dirty();
        self.signal_change();
        Ok(())
    }

    /// Number of completed upload hook calls
    pub fn upload_count(&self) -> usize {
        self.upload_count.load(Ordering::Acquire)
    }

    pub fn gpu_texture(&self) -> Option<GpuTexture> {
        self.gpu.read().clone()
    }

    pub fn is_resident(&self) -> bool {
        self.gpu.read().is_some()
    }

    pub fn was_locked_during_last_upload(&self) -> bool {
        self.locked_during_upload.load(Ordering::Acquire)
    }
}

impl ResourceKind for TextureResource {
    const TYPE_NAME: &'static str = "Texture";
    const EXTENSIONS: &'static [&'static str] = &[".tex"];

    fn create(core: ResourceCore) -> Self {
        Self {
            core,
            data: RwLock::new(TextureData::default()),
            gpu: RwLock::new(None),
            upload_count: AtomicUsize::new(0),
            locked_during_upload: AtomicBool::new(false),
        }
    }
}

impl Resource for TextureResource {
    fn core(&self) -> &ResourceCore {
        &self.core
    }

    /// Without stored properties the file is read as one row of pixels and
    /// the resource reports itself disk-dirty.
    fn read_resource_from_file(&self, context: &LoadContext<'_>) -> Result<bool> {
        let pixels = context.read_bytes()?;

        let (props, missing) = if context.properties.is_null() {
            if pixels.len() % 4 != 0 {
                return Err(CacheError::LoadError(format!(
                    "{}: {} bytes is not RGBA8",
                    context.path.display(),
                    pixels.len()
                )));
            }
            let width = (pixels.len() / 4) as u32;
            let height = u32::from(width > 0);
            (
                TextureProperties {
                    width,
                    height,
                    srgb: false,
                },
                true,
            )
        } else {
            let props = serde_json::from_value(context.properties.clone())
                .map_err(|e| CacheError::DeserializationError(e.to_string()))?;
            (props, false)
        };

        check_size(props.width, props.height, pixels.len())?;
        *self.data.write() = TextureData {
            width: props.width,
            height: props.height,
            srgb: props.srgb,
            pixels,
        };
        Ok(missing)
    }

    fn write_resource_to_file(&self) -> Result<serde_json::Value> {
        let data = self.data.read();
        std::fs::write(self.core.path(), &data.pixels)
            .map_err(|e| CacheError::SaveError(format!("{}: {e}", self.core.path().display())))?;

        serde_json::to_value(TextureProperties {
            width: data.width,
            height: data.height,
            srgb: data.srgb,
        })
        .map_err(|e| CacheError::SerializationError(e.to_string()))
    }

    fn upload_to_gpu(&self) -> bool {
        let data = self.data.read();
        *self.gpu.write() = Some(GpuTexture {
            width: data.width,
            height: data.height,
            srgb: data.srgb,
            pixels: data.pixels.clone(),
        });
        self.locked_during_upload
            .store(self.core.is_locked(), Ordering::Release);
        self.upload_count.fetch_add(1, Ordering::AcqRel);
        true
    }

    fn evict_from_gpu(&self) {
        self.gpu.write().take();
    }

    fn unload(&self) {
        self.evict_from_gpu();
        *self.data.write() = TextureData::default();
    }
}
