//! Counted, type-checked references to cached resources.

use crate::handle::{ResourceHandle, EMPTY_RESOURCE_HANDLE};
use crate::resource::{CountedOwner, Resource};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

struct RefInner<T: Resource + ?Sized> {
    resource: Arc<T>,
    version: u32,
    owner: Option<CountedOwner>,
    owner_id: Option<u64>,
}

/// Live reference to a resource.
///
/// Holding a `ResourceRef` keeps the resource's reference count raised; it
/// never destroys anything. The version captured at acquisition detects
/// that the slot has been destroyed and recycled since.
pub struct ResourceRef<T: Resource + ?Sized = dyn Resource> {
    inner: Option<RefInner<T>>,
}

impl<T: Resource + ?Sized> ResourceRef<T> {
    /// Reference to nothing
    pub fn empty() -> Self {
        Self { inner: None }
    }

    pub(crate) fn acquire(resource: Arc<T>, owner: Option<CountedOwner>) -> Self {
        let core = resource.core();
        let version = core.version();
        let owner_id = core.acquire(owner.clone());
        Self {
            inner: Some(RefInner {
                resource,
                version,
                owner,
                owner_id,
            }),
        }
    }

    /// Non-empty and the resource has not been destroyed since acquisition
    pub fn is_valid(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.resource.core().version() == inner.version)
    }

    pub fn is_valid_and_gpu_dirty(&self) -> bool {
        self.get().is_some_and(|r| r.is_dirty_gpu())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    /// The referenced resource, if still valid
    pub fn get(&self) -> Option<&T> {
        if self.is_valid() {
            self.inner.as_ref().map(|inner| &*inner.resource)
        } else {
            None
        }
    }

    /// Shared pointer to the resource, if still valid
    pub fn get_arc(&self) -> Option<Arc<T>> {
        if self.is_valid() {
            self.inner.as_ref().map(|inner| inner.resource.clone())
        } else {
            None
        }
    }

    pub fn handle(&self) -> ResourceHandle {
        self.inner
            .as_ref()
            .map(|inner| inner.resource.core().handle())
            .unwrap_or(EMPTY_RESOURCE_HANDLE)
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.inner.as_ref().map(|inner| inner.resource.core().uuid())
    }

    /// Version captured when the reference was acquired
    pub fn captured_version(&self) -> Option<u32> {
        self.inner.as_ref().map(|inner| inner.version)
    }
}

impl<T: Resource> ResourceRef<T> {
    /// Forget the concrete type
    pub fn into_untyped(mut self) -> ResourceRef<dyn Resource> {
        let inner = self.inner.take();
        ResourceRef {
            inner: inner.map(|inner| RefInner {
                resource: inner.resource as Arc<dyn Resource>,
                version: inner.version,
                owner: inner.owner,
                owner_id: inner.owner_id,
            }),
        }
    }
}

impl ResourceRef<dyn Resource> {
    /// Recover the concrete type. Hands the reference back on mismatch.
    pub fn downcast<T: Resource>(mut self) -> std::result::Result<ResourceRef<T>, Self> {
        let Some(inner) = self.inner.take() else {
            return Ok(ResourceRef::empty());
        };

        let resource: &dyn Resource = &*inner.resource;
        if !resource.as_any().is::<T>() {
            self.inner = Some(inner);
            return Err(self);
        }

        match inner.resource.into_any_arc().downcast::<T>() {
            Ok(resource) => Ok(ResourceRef {
                inner: Some(RefInner {
                    resource,
                    version: inner.version,
                    owner: inner.owner,
                    owner_id: inner.owner_id,
                }),
            }),
            // Checked above
            Err(_) => Ok(ResourceRef::empty()),
        }
    }
}

impl<T: Resource + ?Sized> Clone for ResourceRef<T> {
    fn clone(&self) -> Self {
        match &self.inner {
            None => Self::empty(),
            Some(inner) => {
                let owner_id = inner.resource.core().acquire(inner.owner.clone());
                Self {
                    inner: Some(RefInner {
                        resource: inner.resource.clone(),
                        version: inner.version,
                        owner: inner.owner.clone(),
                        owner_id,
                    }),
                }
            }
        }
    }
}

impl<T: Resource + ?Sized> Drop for ResourceRef<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.resource.core().release(inner.owner_id);
        }
    }
}

impl<T: Resource + ?Sized> Default for ResourceRef<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Resource + ?Sized> fmt::Debug for ResourceRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRef")
            .field("handle", &self.handle())
            .field("version", &self.captured_version())
            .field("valid", &self.is_valid())
            .finish()
    }
}
