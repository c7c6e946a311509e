// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Central resource cache: slot tables per type plus uuid/path indices.

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::handle::{generate_uuid, ResourceHandle, ResourcePreview, ResourceType};
use crate::registry::{ResourceKind, TypeRegistry};
use crate::resource::{CountedOwner, Resource, ResourceCreateInfo};
use crate::resource_ref::ResourceRef;
use crate::slot::SlotTable;
use ahash::AHashMap;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Lexical normalization used for path keys
pub fn normalize_path(path: &Path) -> PathBuf {
    path.components().collect()
}

/// Central resource cache
pub struct ResourceCache {
    registry: Arc<TypeRegistry>,
    config: CacheConfig,
    tables: AHashMap<ResourceType, RwLock<SlotTable>>,
    by_uuid: RwLock<AHashMap<Uuid, ResourceHandle>>,
    by_path: RwLock<AHashMap<PathBuf, Vec<ResourceHandle>>>,
    defaults: RwLock<AHashMap<String, ResourceHandle>>,
}

impl ResourceCache {
    /// Create a cache over a fully populated registry
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self::with_config(registry, CacheConfig::default())
    }

    pub fn with_config(registry: Arc<TypeRegistry>, config: CacheConfig) -> Self {
        let tables = registry
            .types()
            .map(|ty| (ty, RwLock::new(SlotTable::new())))
            .collect();

        Self {
            registry,
            config,
            tables,
            by_uuid: RwLock::new(AHashMap::new()),
            by_path: RwLock::new(AHashMap::new()),
            defaults: RwLock::new(AHashMap::new()),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn table(&self, ty: ResourceType) -> Result<&RwLock<SlotTable>> {
        self.tables
            .get(&ty)
            .ok_or_else(|| CacheError::TypeNotRegistered(format!("type id {}", ty.raw())))
    }

    /// Construct a resource through its type's factory.
    ///
    /// A `None` uuid generates a fresh identity.
    pub fn create_resource(
        &self,
        ty: ResourceType,
        uuid: Option<Uuid>,
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        parent: Option<ResourceHandle>,
        is_default: bool,
    ) -> Result<ResourceHandle> {
        let registration = self
            .registry
            .get(ty)
            .ok_or_else(|| CacheError::TypeNotRegistered(format!("type id {}", ty.raw())))?;
        let factory = self
            .registry
            .get_factory(ty)
            .ok_or_else(|| CacheError::TypeNotRegistered(registration.name.to_string()))?;
        let table = self.table(ty)?;

        let uuid = uuid.unwrap_or_else(generate_uuid);
        let path = path.into();

        let (handle, version) = {
            let mut by_uuid = self.by_uuid.write();
            if by_uuid.contains_key(&uuid) {
                return Err(CacheError::DuplicateUuid(uuid));
            }
            let (id, generation) = table.write().allocate();
            let handle = ResourceHandle::new(ty, id);
            by_uuid.insert(uuid, handle);
            (handle, generation)
        };

        let resource = factory.create(ResourceCreateInfo {
            uuid,
            handle,
            version,
            type_name: registration.name.clone(),
            path: path.clone(),
            name: name.into(),
            parent,
            is_default,
        });

        // Index the path first: once the slot is occupied, `destroy` may
        // clean it up.
        if !path.as_os_str().is_empty() {
            self.by_path
                .write()
                .entry(normalize_path(&path))
                .or_default()
                .push(handle);
        }

        table.write().occupy(handle.id, resource);

        tracing::trace!(%handle, %uuid, type_name = &*registration.name, "created resource");
        Ok(handle)
    }

    /// Typed shorthand for [`ResourceCache::create_resource`]
    pub fn create<T: ResourceKind>(
        &self,
        uuid: Option<Uuid>,
        path: impl Into<PathBuf>,
        name: impl Into<String>,
    ) -> Result<ResourceHandle> {
        let ty = self.type_of::<T>()?;
        self.create_resource(ty, uuid, path, name, None, false)
    }

    /// Create a built-in resource and register it under `key`
    pub fn create_default<T: ResourceKind>(&self, key: &str, name: impl Into<String>) -> Result<ResourceHandle> {
        let ty = self.type_of::<T>()?;
        let handle = self.create_resource(ty, None, PathBuf::new(), name, None, true)?;
        self.defaults.write().insert(key.to_string(), handle);
        Ok(handle)
    }

    pub fn default_resource(&self, key: &str) -> Option<ResourceHandle> {
        self.defaults.read().get(key).copied()
    }

    fn type_of<T: 'static>(&self) -> Result<ResourceType> {
        self.registry
            .type_of::<T>()
            .ok_or_else(|| CacheError::TypeNotRegistered(std::any::type_name::<T>().to_string()))
    }

    // Lookup

    pub fn get_raw_resource_sync(&self, handle: ResourceHandle) -> Option<Arc<dyn Resource>> {
        if !handle.is_valid() {
            return None;
        }
        self.tables.get(&handle.ty)?.read().get(handle.id).cloned()
    }

    pub fn handle_of_uuid(&self, uuid: &Uuid) -> Option<ResourceHandle> {
        self.by_uuid.read().get(uuid).copied()
    }

    pub fn get_raw_resource_by_uuid(&self, uuid: &Uuid) -> Option<Arc<dyn Resource>> {
        self.handle_of_uuid(uuid)
            .and_then(|handle| self.get_raw_resource_sync(handle))
    }

    /// Typed, counted reference. An empty or unknown handle yields an empty
    /// reference; a handle of another type is an error.
    pub fn get_resource<T: Resource>(
        &self,
        handle: ResourceHandle,
        owner: Option<CountedOwner>,
    ) -> Result<ResourceRef<T>> {
        if !handle.is_valid() {
            return Ok(ResourceRef::empty());
        }

        let expected = self.type_of::<T>()?;
        if handle.ty != expected {
            return Err(CacheError::TypeMismatch {
                expected: std::any::type_name::<T>().to_string(),
                found: self
                    .registry
                    .type_name(handle.ty)
                    .unwrap_or("<unregistered>")
                    .to_string(),
            });
        }

        let Some(raw) = self.get_raw_resource_sync(handle) else {
            tracing::debug!(%handle, "resource lookup missed");
            return Ok(ResourceRef::empty());
        };

        let typed = raw
            .into_any_arc()
            .downcast::<T>()
            .map_err(|_| CacheError::TypeMismatch {
                expected: std::any::type_name::<T>().to_string(),
                found: self.registry.type_name(handle.ty).unwrap_or_default().to_string(),
            })?;

        Ok(ResourceRef::acquire(typed, owner))
    }

    pub fn get_resource_by_uuid<T: Resource>(
        &self,
        uuid: &Uuid,
        owner: Option<CountedOwner>,
    ) -> Result<ResourceRef<T>> {
        match self.handle_of_uuid(uuid) {
            Some(handle) => self.get_resource(handle, owner),
            None => Ok(ResourceRef::empty()),
        }
    }

    /// Counted reference without a type check
    pub fn get_resource_untyped(
        &self,
        handle: ResourceHandle,
        owner: Option<CountedOwner>,
    ) -> ResourceRef<dyn Resource> {
        match self.get_raw_resource_sync(handle) {
            Some(raw) => ResourceRef::acquire(raw, owner),
            None => ResourceRef::empty(),
        }
    }

    pub fn handles_for_path(&self, path: &Path) -> Vec<ResourceHandle> {
        self.by_path
            .read()
            .get(&normalize_path(path))
            .cloned()
            .unwrap_or_default()
    }

    pub fn previews(&self, ty: ResourceType) -> Vec<ResourcePreview> {
        self.resources_of_type(ty)
            .iter()
            .map(|r| r.core().preview())
            .collect()
    }

    pub fn resources_of_type(&self, ty: ResourceType) -> Vec<Arc<dyn Resource>> {
        self.tables
            .get(&ty)
            .map(|table| table.read().occupied().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every live resource, ordered by type then slot
    pub fn all_resources(&self) -> Vec<Arc<dyn Resource>> {
        self.registry
            .types()
            .flat_map(|ty| self.resources_of_type(ty))
            .collect()
    }

    pub fn resource_count(&self) -> usize {
        self.tables.values().map(|t| t.read().len()).sum()
    }

    // Lifecycle

    /// Drop CPU data and GPU realization; the resource stays addressable
    pub fn unload(&self, handle: ResourceHandle) -> Result<()> {
        let resource = self
            .get_raw_resource_sync(handle)
            .ok_or_else(|| CacheError::ResourceNotFound(handle.to_string()))?;
        Self::unload_resource(resource.as_ref());
        Ok(())
    }

    fn unload_resource(resource: &dyn Resource) {
        let core = resource.core();
        if !core.is_loaded() {
            return;
        }
        resource.unload();
        core.mark_unloaded();
        // Next load must upload again
        core.make_gpu_dirty();
        tracing::debug!(handle = %core.handle(), "unloaded resource");
    }

    /// Bump the resource's version and recycle its slot.
    ///
    /// Outstanding references become invalid immediately. Destroying an
    /// empty slot is `ResourceNotFound`.
    pub fn destroy(&self, handle: ResourceHandle) -> Result<()> {
        self.destroy_inner(handle, None)
    }

    /// Like [`ResourceCache::destroy`], but only if the slot still holds the
    /// generation `version`. A slot recycled since is left alone.
    pub fn destroy_version(&self, handle: ResourceHandle, version: u32) -> Result<()> {
        self.destroy_inner(handle, Some(version))
    }

    fn destroy_inner(&self, handle: ResourceHandle, version: Option<u32>) -> Result<()> {
        let table = self.table(handle.ty)?;

        // Same order as creation: uuid index, then slot table. Holding both
        // keeps the slot from being recycled before the indices are clean.
        let mut by_uuid = self.by_uuid.write();
        let (resource, next_version) = {
            let mut table = table.write();
            let resource = table
                .get(handle.id)
                .filter(|r| version.map_or(true, |v| r.core().version() == v))
                .cloned()
                .ok_or_else(|| CacheError::ResourceNotFound(handle.to_string()))?;
            let next_version = resource.core().destroy();
            table.release(handle.id, next_version);
            (resource, next_version)
        };

        let core = resource.core();
        if by_uuid.get(&core.uuid()) == Some(&handle) {
            by_uuid.remove(&core.uuid());
        }
        {
            let key = normalize_path(&core.path());
            let mut by_path = self.by_path.write();
            if let Some(handles) = by_path.get_mut(&key) {
                handles.retain(|h| *h != handle);
                if handles.is_empty() {
                    by_path.remove(&key);
                }
            }
        }
        drop(by_uuid);
        self.defaults.write().retain(|_, h| *h != handle);

        Self::unload_resource(resource.as_ref());
        tracing::debug!(%handle, version = next_version, "destroyed resource");
        Ok(())
    }

    /// Unload every loaded, non-default resource nobody references.
    /// Returns how many were unloaded.
    pub fn release_unreferenced(&self) -> usize {
        let mut released = 0;
        for resource in self.all_resources() {
            let core = resource.core();
            if core.is_default() || !core.is_loaded() || core.ref_count() > 0 {
                continue;
            }
            Self::unload_resource(resource.as_ref());
            released += 1;
        }
        released
    }

    /// Destroy every resource. Consumes the cache.
    pub fn teardown(self) {
        let handles: Vec<ResourceHandle> = self.all_resources().iter().map(|r| r.handle()).collect();
        for handle in &handles {
            if let Err(e) = self.destroy(*handle) {
                tracing::warn!(%handle, error = %e, "teardown could not destroy resource");
            }
        }
        tracing::info!(count = handles.len(), "resource cache torn down");
    }
}
