//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use residency_cache::prelude::*;
//! ```

pub use crate::async_loader::{AsyncResourceLoader, LoadCompletion, LoadOutcome};
pub use crate::builtin::{
    register_builtin_types, seed_default_resources, MaterialResource, TextureResource, TextureSlot,
};
pub use crate::cache::ResourceCache;
pub use crate::config::CacheConfig;
pub use crate::error::{CacheError, Result};
pub use crate::gpu_state::GpuState;
pub use crate::handle::{ResourceHandle, ResourceType, EMPTY_RESOURCE_HANDLE};
pub use crate::loader::{LoadContext, ResourceLoader};
pub use crate::registry::{ResourceKind, TypeRegistry};
pub use crate::resource::{CountedOwner, Resource, ResourceCore};
pub use crate::resource_ref::ResourceRef;
pub use crate::scheduler::{GpuResidencyScheduler, ResourceGpuUpdateResult, UploadReport};
