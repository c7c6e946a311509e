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

//! The versioned, dirty-tracked resource entity.
//!
//! Every concrete resource type embeds a [`ResourceCore`] and implements
//! [`Resource`]. The core owns identity and lifecycle state only; file and
//! GPU work happens in the trait hooks.

use crate::error::{CacheError, Result};
use crate::gpu_state::{GpuState, GpuStateCell};
use crate::handle::{ResourceHandle, ResourcePreview, ResourceType, SlotId};
use crate::loader::LoadContext;
use crate::signal::{ChangeSignal, SubscriptionKey};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Everything a factory needs to construct a resource
#[derive(Clone, Debug)]
pub struct ResourceCreateInfo {
    pub uuid: Uuid,
    pub handle: ResourceHandle,
    /// Generation of the slot the resource will occupy
    pub version: u32,
    pub type_name: Arc<str>,
    pub path: PathBuf,
    pub name: String,
    pub parent: Option<ResourceHandle>,
    pub is_default: bool,
}

/// Named holder of a reference, kept for debugging only
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CountedOwner {
    pub name: String,
    pub owner_type: String,
}

impl CountedOwner {
    pub fn new(name: impl Into<String>, owner_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner_type: owner_type.into(),
        }
    }
}

struct OwnerRecord {
    id: u64,
    owner: CountedOwner,
}

/// Shared lifecycle state of a resource
pub struct ResourceCore {
    uuid: Uuid,
    handle: ResourceHandle,
    type_name: Arc<str>,
    name: RwLock<String>,
    path: RwLock<PathBuf>,
    version: AtomicU32,
    loaded: AtomicBool,
    loading: AtomicBool,
    dirty_disk: AtomicBool,
    gpu: GpuStateCell,
    is_default: bool,
    locked: AtomicBool,
    parent: Option<ResourceHandle>,
    ref_count: AtomicUsize,
    next_owner_id: AtomicU64,
    owners: Mutex<Vec<OwnerRecord>>,
    change: ChangeSignal,
}

impl ResourceCore {
    pub fn new(info: ResourceCreateInfo) -> Self {
        Self {
            uuid: info.uuid,
            handle: info.handle,
            type_name: info.type_name,
            name: RwLock::new(info.name),
            path: RwLock::new(info.path),
            version: AtomicU32::new(info.version),
            loaded: AtomicBool::new(info.is_default),
            loading: AtomicBool::new(false),
            dirty_disk: AtomicBool::new(false),
            gpu: GpuStateCell::new(GpuState::Dirty),
            is_default: info.is_default,
            locked: AtomicBool::new(false),
            parent: info.parent,
            ref_count: AtomicUsize::new(0),
            next_owner_id: AtomicU64::new(1),
            owners: Mutex::new(Vec::new()),
            change: ChangeSignal::new(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    pub fn resource_type(&self) -> ResourceType {
        self.handle.ty
    }

    pub fn id(&self) -> SlotId {
        self.handle.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write() = name.into();
    }

    pub fn path(&self) -> PathBuf {
        self.path.read().clone()
    }

    pub fn set_path(&self, path: impl Into<PathBuf>) {
        *self.path.write() = path.into();
    }

    /// Generation counter; bumped by [`ResourceCore::destroy`]
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Container resource this one was imported from, if any
    pub fn parent(&self) -> Option<ResourceHandle> {
        self.parent
    }

    pub fn preview(&self) -> ResourcePreview {
        ResourcePreview {
            name: self.name(),
            path: self.path(),
            handle: self.handle,
        }
    }

    /// Mark the slot recyclable. Returns the new version.
    pub fn destroy(&self) -> u32 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    // Loading

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Claim the right to populate CPU data for this load cycle.
    pub fn begin_load(&self) -> bool {
        if self.is_loaded() {
            return false;
        }
        self.loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish_load(&self, success: bool) {
        if success {
            self.loaded.store(true, Ordering::Release);
        }
        self.loading.store(false, Ordering::Release);
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub(crate) fn mark_unloaded(&self) {
        self.loaded.store(false, Ordering::Release);
    }

    // Disk state

    pub fn is_dirty_disk(&self) -> bool {
        self.dirty_disk.load(Ordering::Acquire)
    }

    /// Flag in-memory data as differing from the file. No-op on default
    /// resources, an error while locked.
    pub fn make_disk_dirty(&self) -> Result<()> {
        if self.is_locked() {
            return Err(CacheError::ResourceLocked(self.handle));
        }
        if !self.is_default {
            self.dirty_disk.store(true, Ordering::Release);
        }
        Ok(())
    }

    pub fn make_disk_clean(&self) {
        self.dirty_disk.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn set_locked(&self, value: bool) {
        self.locked.store(value, Ordering::Release);
    }

    /// Lock until the returned guard drops, restoring the previous state
    pub fn lock_scope(&self) -> LockScope<'_> {
        let previous = self.locked.swap(true, Ordering::AcqRel);
        LockScope {
            core: self,
            previous,
        }
    }

    // GPU state

    pub fn gpu_state(&self) -> GpuState {
        self.gpu.load()
    }

    pub fn is_self_dirty_gpu(&self) -> bool {
        self.gpu.load() != GpuState::Clean
    }

    pub fn make_gpu_dirty(&self) {
        if self.is_default {
            return;
        }
        self.gpu.mark_dirty();
    }

    /// Claim `Dirty -> Uploading`
    pub fn set_uploading(&self) -> Result<()> {
        self.gpu
            .begin_upload()
            .map_err(|observed| self.illegal(observed, GpuState::Dirty))
    }

    /// `Uploading -> Clean`; only the claimant calls this
    pub fn set_upload_complete(&self) -> Result<()> {
        self.gpu
            .finish_upload()
            .map_err(|observed| self.illegal(observed, GpuState::Uploading))
    }

    /// Give a failed upload back to the scheduler as `Dirty`
    pub fn abandon_upload(&self) -> Result<()> {
        self.gpu
            .abandon_upload()
            .map_err(|observed| self.illegal(observed, GpuState::Uploading))
    }

    fn illegal(&self, observed: GpuState, required: GpuState) -> CacheError {
        CacheError::IllegalGpuTransition {
            handle: self.handle,
            observed,
            required,
        }
    }

    // Reference counting

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    pub(crate) fn acquire(&self, owner: Option<CountedOwner>) -> Option<u64> {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
        owner.map(|owner| {
            let id = self.next_owner_id.fetch_add(1, Ordering::Relaxed);
            self.owners.lock().push(OwnerRecord { id, owner });
            id
        })
    }

    pub(crate) fn release(&self, owner_id: Option<u64>) {
        if let Some(id) = owner_id {
            self.owners.lock().retain(|record| record.id != id);
        }
        let _ = self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
    }

    pub fn owners(&self) -> Vec<CountedOwner> {
        self.owners.lock().iter().map(|r| r.owner.clone()).collect()
    }

    // Change notification

    pub fn connect_change<F>(&self, callback: F) -> SubscriptionKey
    where
        F: Fn(ResourceHandle) + Send + Sync + 'static,
    {
        self.change.connect(callback)
    }

    pub fn disconnect_change(&self, key: SubscriptionKey) -> bool {
        self.change.disconnect(key)
    }

    pub(crate) fn change_signal(&self) -> &ChangeSignal {
        &self.change
    }
}

impl std::fmt::Debug for ResourceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCore")
            .field("uuid", &self.uuid)
            .field("handle", &self.handle)
            .field("type_name", &self.type_name)
            .field("name", &*self.name.read())
            .field("version", &self.version())
            .field("loaded", &self.is_loaded())
            .field("dirty_disk", &self.is_dirty_disk())
            .field("gpu", &self.gpu_state())
            .field("is_default", &self.is_default)
            .finish()
    }
}

/// Guard returned by [`ResourceCore::lock_scope`]
pub struct LockScope<'a> {
    core: &'a ResourceCore,
    previous: bool,
}

impl Drop for LockScope<'_> {
    fn drop(&mut self) {
        self.core.set_locked(self.previous);
    }
}

/// Type-erasure helpers, implemented for every sized `Any + Send + Sync`
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Core trait for every cached resource
pub trait Resource: AsAny {
    fn core(&self) -> &ResourceCore;

    /// Whether any directly referenced resource is GPU-dirty.
    ///
    /// Evaluated on every query, never cached.
    fn are_dependencies_dirty(&self) -> bool {
        false
    }

    /// Populate CPU-side data. Returns true if the in-memory result already
    /// differs from disk (e.g. after a format upgrade).
    fn read_resource_from_file(&self, context: &LoadContext<'_>) -> Result<bool>;

    /// Properties persisted in the sidecar metadata file
    fn write_resource_to_file(&self) -> Result<serde_json::Value>;

    /// Realize on GPU. Runs while the resource is in `Uploading`.
    fn upload_to_gpu(&self) -> bool;

    fn evict_from_gpu(&self) {}

    /// Drop CPU data. The cache marks the resource unloaded afterwards.
    fn unload(&self) {
        self.evict_from_gpu();
    }

    /// Runs before subscribers are notified. Must not signal again.
    fn on_change(&self) {}

    fn handle(&self) -> ResourceHandle {
        self.core().handle()
    }

    fn is_dirty_gpu(&self) -> bool {
        self.core().is_self_dirty_gpu() || self.are_dependencies_dirty()
    }

    fn signal_change(&self) {
        self.on_change();
        self.core().change_signal().emit(self.core().handle());
    }
}

impl std::fmt::Debug for dyn Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self.core(), f)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct PlainResource {
        core: ResourceCore,
    }

    impl PlainResource {
        pub(crate) fn new(is_default: bool) -> Self {
            Self {
                core: ResourceCore::new(ResourceCreateInfo {
                    uuid: crate::handle::generate_uuid(),
                    handle: ResourceHandle::new(ResourceType::new(1), 0),
                    version: 1,
                    type_name: Arc::from("Plain"),
                    path: PathBuf::from("plain.bin"),
                    name: "plain".to_string(),
                    parent: None,
                    is_default,
                }),
            }
        }
    }

    impl Resource for PlainResource {
        fn core(&self) -> &ResourceCore {
            &self.core
        }

        fn read_resource_from_file(&self, _context: &LoadContext<'_>) -> Result<bool> {
            Ok(false)
        }

        fn write_resource_to_file(&self) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        fn upload_to_gpu(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_initial_state() {
        let res = PlainResource::new(false);
        assert_eq!(res.core().gpu_state(), GpuState::Dirty);
        assert!(!res.core().is_loaded());
        assert!(!res.core().is_dirty_disk());
        assert_eq!(res.core().version(), 1);

        let def = PlainResource::new(true);
        assert!(def.core().is_loaded());
    }

    #[test]
    fn test_default_resource_never_disk_dirty() {
        let res = PlainResource::new(true);
        assert!(res.core().make_disk_dirty().is_ok());
        assert!(!res.core().is_dirty_disk());
    }

    #[test]
    fn test_locked_resource_rejects_disk_dirty() {
        let res = PlainResource::new(false);
        res.core().set_locked(true);
        let err = res.core().make_disk_dirty();
        assert!(matches!(err, Err(CacheError::ResourceLocked(_))));
        assert!(!res.core().is_dirty_disk());

        res.core().set_locked(false);
        res.core().make_disk_dirty().unwrap();
        assert!(res.core().is_dirty_disk());
    }

    #[test]
    fn test_lock_scope_restores_previous() {
        let res = PlainResource::new(false);
        {
            let _lock = res.core().lock_scope();
            assert!(res.core().is_locked());
            {
                let _nested = res.core().lock_scope();
            }
            assert!(res.core().is_locked());
        }
        assert!(!res.core().is_locked());
    }

    #[test]
    fn test_illegal_transitions_error() {
        let res = PlainResource::new(false);
        assert!(res.core().set_upload_complete().is_err());
        res.core().set_uploading().unwrap();
        let err = res.core().set_uploading().unwrap_err();
        assert!(matches!(
            err,
            CacheError::IllegalGpuTransition {
                observed: GpuState::Uploading,
                required: GpuState::Dirty,
                ..
            }
        ));
        res.core().set_upload_complete().unwrap();
        assert!(res.core().set_uploading().is_err());
    }

    #[test]
    fn test_destroy_bumps_version() {
        let res = PlainResource::new(false);
        assert_eq!(res.core().destroy(), 2);
        assert_eq!(res.core().version(), 2);
    }

    #[test]
    fn test_single_load_claim() {
        let res = PlainResource::new(false);
        assert!(res.core().begin_load());
        assert!(!res.core().begin_load());
        res.core().finish_load(true);
        assert!(res.core().is_loaded());
        assert!(!res.core().begin_load());
    }

    #[test]
    fn test_signal_change_calls_subscribers() {
        use std::sync::atomic::AtomicUsize;

        let res = PlainResource::new(false);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let key = res.core().connect_change(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        res.signal_change();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(res.core().disconnect_change(key));
    }
}
