//! Synchronous resource loading and saving.
//!
//! Every source file may carry a JSON sidecar `<file>.<meta_extension>`
//! listing the resources it yields (name, type name, uuid) and the
//! properties each resource persisted on its last save.

use crate::cache::ResourceCache;
use crate::error::{CacheError, Result};
use crate::handle::{generate_uuid, ResourceHandle};
use crate::resource::Resource;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Context provided to [`Resource::read_resource_from_file`]
pub struct LoadContext<'a> {
    pub cache: &'a ResourceCache,
    pub path: &'a Path,
    /// Properties stored for this resource, `Null` if none
    pub properties: &'a Value,
}

impl LoadContext<'_> {
    /// Raw contents of the source file
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        std::fs::read(self.path)
            .map_err(|e| CacheError::LoadError(format!("{}: {e}", self.path.display())))
    }
}

/// Persisted identity of one resource in a file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredResourceData {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub uuid: Uuid,
}

/// Sidecar metadata document
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceFileMeta {
    pub file_name: String,
    #[serde(default)]
    pub resources: Vec<StoredResourceData>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Reads and writes resources against the filesystem
#[derive(Clone)]
pub struct ResourceLoader {
    cache: Arc<ResourceCache>,
}

impl ResourceLoader {
    pub fn new(cache: Arc<ResourceCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    /// `<path>.<meta_extension>`
    pub fn meta_path(&self, path: &Path) -> PathBuf {
        let mut os = path.as_os_str().to_owned();
        os.push(".");
        os.push(self.cache.config().meta_extension());
        PathBuf::from(os)
    }

    fn is_meta_file(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(self.cache.config().meta_extension()))
    }

    pub fn read_meta(&self, path: &Path) -> Result<Option<ResourceFileMeta>> {
        let meta_path = self.meta_path(path);
        if !meta_path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&meta_path)?;
        let meta = serde_json::from_str(&text).map_err(|e| {
            CacheError::DeserializationError(format!("{}: {e}", meta_path.display()))
        })?;
        Ok(Some(meta))
    }

    fn write_meta(&self, path: &Path, meta: &ResourceFileMeta) -> Result<()> {
        let text = serde_json::to_string_pretty(meta)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;
        std::fs::write(self.meta_path(path), text)?;
        Ok(())
    }

    fn stored_data(resource: &dyn Resource) -> StoredResourceData {
        let core = resource.core();
        StoredResourceData {
            name: core.name(),
            type_name: core.type_name().to_string(),
            uuid: core.uuid(),
        }
    }

    /// Identity section for every resource currently known at `path`
    fn meta_for_path(&self, path: &Path) -> ResourceFileMeta {
        ResourceFileMeta {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            resources: self
                .cache
                .handles_for_path(path)
                .into_iter()
                .filter_map(|h| self.cache.get_raw_resource_sync(h))
                .map(|r| Self::stored_data(r.as_ref()))
                .collect(),
            properties: Map::new(),
        }
    }

    fn create_from_meta(&self, path: &Path, meta: &ResourceFileMeta) -> Vec<ResourceHandle> {
        let registry = self.cache.registry();
        let mut handles = Vec::with_capacity(meta.resources.len());

        for stored in &meta.resources {
            let Some(ty) = registry.type_by_name(&stored.type_name) else {
                tracing::warn!(path = %path.display(), type_name = %stored.type_name, "skipping resource of unknown type");
                continue;
            };
            match self
                .cache
                .create_resource(ty, Some(stored.uuid), path, stored.name.clone(), None, false)
            {
                Ok(handle) => handles.push(handle),
                Err(CacheError::DuplicateUuid(uuid)) => {
                    if let Some(existing) = self.cache.handle_of_uuid(&uuid) {
                        handles.push(existing);
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "could not create resource from metadata")
                }
            }
        }
        handles
    }

    /// Extension lookup, then the type's discovery hook. Fresh uuids.
    fn create_from_discovery(&self, path: &Path) -> Vec<ResourceHandle> {
        let registry = self.cache.registry();
        let Some(ty) = path
            .extension()
            .and_then(|ext| registry.get_type_by_extension(&ext.to_string_lossy()))
        else {
            return Vec::new();
        };

        let mut handles = Vec::new();
        let mut container = None;
        for data in registry.can_construct_from(ty, path) {
            let uuid = if data.uuid.is_nil() { generate_uuid() } else { data.uuid };
            let parent = if data.ty == ty { None } else { container };
            match self
                .cache
                .create_resource(data.ty, Some(uuid), path, data.name, parent, false)
            {
                Ok(handle) => {
                    if data.ty == ty && container.is_none() {
                        container = Some(handle);
                    }
                    handles.push(handle);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "could not create discovered resource")
                }
            }
        }
        handles
    }

    /// Resolve every resource `path` yields, reading the ones not yet
    /// loaded unless `meta_only` is set.
    pub fn load_path_sync(&self, path: &Path, meta_only: bool) -> Result<Vec<ResourceHandle>> {
        let _span = tracing::debug_span!("load_path", path = %path.display(), meta_only).entered();

        if !path.is_file() {
            return Err(CacheError::LoadError(format!("{} is not a file", path.display())));
        }

        let meta = self.read_meta(path)?;
        let existing = self.cache.handles_for_path(path);

        let handles = if !existing.is_empty() {
            existing
        } else if let Some(meta) = &meta {
            self.create_from_meta(path, meta)
        } else {
            let handles = self.create_from_discovery(path);
            if !handles.is_empty() {
                self.write_meta(path, &self.meta_for_path(path))?;
                tracing::info!(path = %path.display(), count = handles.len(), "imported new resource file");
            }
            handles
        };

        if !meta_only {
            let properties = meta.map(|m| m.properties).unwrap_or_default();
            for handle in &handles {
                if let Some(resource) = self.cache.get_raw_resource_sync(*handle) {
                    self.read_into(resource.as_ref(), path, &properties)?;
                }
            }
        }

        Ok(handles)
    }

    /// Load one resource by handle
    pub fn load_resource_sync(&self, handle: ResourceHandle) -> Result<ResourceHandle> {
        let resource = self
            .cache
            .get_raw_resource_sync(handle)
            .ok_or_else(|| CacheError::ResourceNotFound(handle.to_string()))?;
        let core = resource.core();

        if core.is_default() {
            core.make_disk_clean();
            return Ok(handle);
        }

        let path = core.path();
        let properties = self
            .read_meta(&path)?
            .map(|m| m.properties)
            .unwrap_or_default();
        self.read_into(resource.as_ref(), &path, &properties)?;
        Ok(handle)
    }

    fn read_into(&self, resource: &dyn Resource, path: &Path, properties: &Map<String, Value>) -> Result<()> {
        let core = resource.core();
        if core.is_default() || !core.begin_load() {
            return Ok(());
        }

        let props = properties.get(&core.name()).unwrap_or(&Value::Null);
        let result = {
            let _lock = core.lock_scope();
            let context = LoadContext {
                cache: &self.cache,
                path,
                properties: props,
            };
            resource.read_resource_from_file(&context)
        };

        match result {
            Ok(dirty_disk) => {
                core.finish_load(true);
                core.make_gpu_dirty();
                if dirty_disk {
                    core.make_disk_dirty()?;
                }
                tracing::debug!(handle = %core.handle(), name = %core.name(), "loaded resource");
                Ok(())
            }
            Err(e) => {
                core.finish_load(false);
                tracing::error!(handle = %core.handle(), error = %e, "failed to load resource");
                Err(e)
            }
        }
    }

    /// Persist a resource's properties into its sidecar
    pub fn save_resource(&self, handle: ResourceHandle) -> Result<()> {
        let resource = self
            .cache
            .get_raw_resource_sync(handle)
            .ok_or_else(|| CacheError::ResourceNotFound(handle.to_string()))?;
        let core = resource.core();

        if core.is_default() {
            core.make_disk_clean();
            return Ok(());
        }

        let path = core.path();
        if path.as_os_str().is_empty() {
            return Err(CacheError::SaveError(format!("resource {handle} has no path")));
        }

        let _lock = core.lock_scope();
        let properties = resource.write_resource_to_file()?;

        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(&path)?;
        }

        let mut meta = match self.read_meta(&path)? {
            Some(meta) => meta,
            None => self.meta_for_path(&path),
        };
        let stored = Self::stored_data(resource.as_ref());
        match meta.resources.iter_mut().find(|r| r.uuid == stored.uuid) {
            Some(entry) => *entry = stored,
            None => meta.resources.push(stored),
        }
        meta.properties.insert(core.name(), properties);
        self.write_meta(&path, &meta)?;

        core.make_disk_clean();
        tracing::debug!(%handle, path = %path.display(), "saved resource");
        Ok(())
    }

    /// Meta-only import of every file below `dir`. Hidden and
    /// underscore-prefixed entries and sidecars are skipped.
    pub fn visit_directory(&self, dir: &Path, recursive: bool) -> Result<Vec<ResourceHandle>> {
        let mut handles = Vec::new();
        self.visit_directory_into(dir, recursive, &mut handles)?;
        Ok(handles)
    }

    fn visit_directory_into(&self, dir: &Path, recursive: bool, out: &mut Vec<ResourceHandle>) -> Result<()> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        for path in entries {
            let skip = path
                .file_name()
                .map(|n| n.to_string_lossy())
                .is_some_and(|n| n.starts_with('.') || n.starts_with('_'));
            if skip {
                continue;
            }

            if path.is_dir() {
                if recursive {
                    self.visit_directory_into(&path, true, out)?;
                }
            } else if !self.is_meta_file(&path) {
                match self.load_path_sync(&path, true) {
                    Ok(handles) => out.extend(handles),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping file"),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{register_builtin_types, TextureResource};
    use crate::registry::TypeRegistry;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("residency-loader-{}", generate_uuid()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn loader() -> ResourceLoader {
        let mut registry = TypeRegistry::new();
        register_builtin_types(&mut registry).unwrap();
        ResourceLoader::new(Arc::new(ResourceCache::new(Arc::new(registry))))
    }

    #[test]
    fn test_meta_path() {
        let loader = loader();
        assert_eq!(
            loader.meta_path(Path::new("a/brick.tex")),
            PathBuf::from("a/brick.tex.meta")
        );
    }

    #[test]
    fn test_discovery_writes_sidecar() {
        let dir = temp_dir();
        let file = dir.join("brick.tex");
        std::fs::write(&file, [1u8, 2, 3, 4]).unwrap();

        let loader = loader();
        let handles = loader.load_path_sync(&file, true).unwrap();
        assert_eq!(handles.len(), 1);

        let meta = loader.read_meta(&file).unwrap().unwrap();
        assert_eq!(meta.file_name, "brick.tex");
        assert_eq!(meta.resources.len(), 1);
        assert_eq!(meta.resources[0].name, "brick");
        assert_eq!(meta.resources[0].type_name, "Texture");

        let res = loader.cache().get_raw_resource_sync(handles[0]).unwrap();
        assert!(!res.core().is_loaded());
        assert_eq!(res.core().uuid(), meta.resources[0].uuid);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_load_reuses_known_handles() {
        let dir = temp_dir();
        let file = dir.join("brick.tex");
        std::fs::write(&file, [0u8; 16]).unwrap();

        let loader = loader();
        let first = loader.load_path_sync(&file, false).unwrap();
        let second = loader.load_path_sync(&file, false).unwrap();
        assert_eq!(first, second);
        assert_eq!(loader.cache().resource_count(), 1);

        let res = loader.cache().get_raw_resource_sync(first[0]).unwrap();
        assert!(res.core().is_loaded());
        assert!(!res.core().is_locked());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_file_is_error() {
        let loader = loader();
        let result = loader.load_path_sync(Path::new("/definitely/not/here.tex"), false);
        assert!(matches!(result, Err(CacheError::LoadError(_))));
    }

    #[test]
    fn test_save_default_only_clears_dirty() {
        let loader = loader();
        let handle = loader
            .cache()
            .create_default::<TextureResource>("white", "White")
            .unwrap();
        loader.save_resource(handle).unwrap();
        loader.load_resource_sync(handle).unwrap();
        let res = loader.cache().get_raw_resource_sync(handle).unwrap();
        assert!(res.core().is_loaded());
        assert!(!res.core().is_dirty_disk());
    }

    #[test]
    fn test_visit_skips_hidden_and_sidecars() {
        let dir = temp_dir();
        std::fs::write(dir.join("a.tex"), [0u8; 4]).unwrap();
        std::fs::write(dir.join(".hidden.tex"), [0u8; 4]).unwrap();
        std::fs::write(dir.join("_private.tex"), [0u8; 4]).unwrap();
        std::fs::write(dir.join("notes.txt"), b"hello").unwrap();
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("sub").join("b.tex"), [0u8; 4]).unwrap();

        let loader = loader();
        let flat = loader.visit_directory(&dir, false).unwrap();
        assert_eq!(flat.len(), 1);
        assert!(dir.join("a.tex.meta").is_file());

        // Second visit sees the sidecar and known handles, never the sidecar itself
        let all = loader.visit_directory(&dir, true).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(loader.cache().resource_count(), 2);

        std::fs::remove_dir_all(dir).ok();
    }
}
