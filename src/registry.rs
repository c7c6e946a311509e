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

//! Resource type registry.
//!
//! Registration happens once at startup on a `&mut TypeRegistry`. The
//! registry is then frozen behind an `Arc` and handed to the cache, so no
//! type can be added after the first resource exists.

use crate::error::{CacheError, Result};
use crate::handle::ResourceType;
use crate::resource::{Resource, ResourceCore, ResourceCreateInfo};
use ahash::AHashMap;
use std::any::TypeId;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Constructs resources of one registered type
pub trait ResourceFactory: Send + Sync {
    fn create(&self, info: ResourceCreateInfo) -> Arc<dyn Resource>;
}

impl<F> ResourceFactory for F
where
    F: Fn(ResourceCreateInfo) -> Arc<dyn Resource> + Send + Sync,
{
    fn create(&self, info: ResourceCreateInfo) -> Arc<dyn Resource> {
        self(info)
    }
}

/// Sub-resource a container file would yield on import
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceDataInFile {
    pub name: String,
    pub ty: ResourceType,
    /// Nil until assigned by the importer or read from metadata
    pub uuid: Uuid,
}

/// Discovery hook: which sub-resources of `ty` would `path` produce
pub type DiscoveryFn = Arc<dyn Fn(ResourceType, &Path) -> Vec<ResourceDataInFile> + Send + Sync>;

/// Statically described resource type, registered with
/// [`TypeRegistry::register`]
pub trait ResourceKind: Resource + Sized {
    const TYPE_NAME: &'static str;
    const EXTENSIONS: &'static [&'static str];

    fn create(core: ResourceCore) -> Self;

    fn can_construct_from(ty: ResourceType, path: &Path) -> Vec<ResourceDataInFile> {
        default_construct_from(ty, path)
    }
}

/// One resource named after the file stem
pub fn default_construct_from(ty: ResourceType, path: &Path) -> Vec<ResourceDataInFile> {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    vec![ResourceDataInFile {
        name,
        ty,
        uuid: Uuid::nil(),
    }]
}

/// Lowercase, without a leading dot
pub fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_ascii_lowercase()
}

struct TypedFactory<T: ResourceKind> {
    _phantom: std::marker::PhantomData<fn() -> T>,
}

impl<T: ResourceKind> ResourceFactory for TypedFactory<T> {
    fn create(&self, info: ResourceCreateInfo) -> Arc<dyn Resource> {
        Arc::new(T::create(ResourceCore::new(info)))
    }
}

/// Registration data
pub struct TypeRegistration {
    pub ty: ResourceType,
    pub name: Arc<str>,
    pub extensions: Vec<String>,
    pub rust_type: Option<TypeId>,
    factory: Box<dyn ResourceFactory>,
    discovery: DiscoveryFn,
}

/// Process-wide map of resource types
#[derive(Default)]
pub struct TypeRegistry {
    registrations: Vec<TypeRegistration>,
    by_name: AHashMap<String, ResourceType>,
    by_extension: AHashMap<String, ResourceType>,
    by_type_id: AHashMap<TypeId, ResourceType>,
}

impl TypeRegistry {
    /// Create new registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type with a factory and the file extensions it is built
    /// from. Uses the default single-resource discovery hook.
    pub fn register_type(
        &mut self,
        name: &str,
        factory: impl ResourceFactory + 'static,
        extensions: &[&str],
    ) -> Result<ResourceType> {
        self.register_type_with_discovery(
            name,
            factory,
            extensions,
            Arc::new(default_construct_from),
            None,
        )
    }

    /// Register a type with a custom discovery hook
    pub fn register_type_with_discovery(
        &mut self,
        name: &str,
        factory: impl ResourceFactory + 'static,
        extensions: &[&str],
        discovery: DiscoveryFn,
        rust_type: Option<TypeId>,
    ) -> Result<ResourceType> {
        if name.is_empty() || self.by_name.contains_key(name) {
            return Err(CacheError::DuplicateType(name.to_string()));
        }

        let extensions: Vec<String> = extensions
            .iter()
            .map(|e| normalize_extension(e))
            .filter(|e| !e.is_empty())
            .collect();

        for (i, ext) in extensions.iter().enumerate() {
            if let Some(owner) = self.by_extension.get(ext) {
                return Err(CacheError::DuplicateExtension {
                    extension: ext.clone(),
                    owner: self.type_name(*owner).unwrap_or_default().to_string(),
                });
            }
            if extensions[..i].contains(ext) {
                return Err(CacheError::DuplicateExtension {
                    extension: ext.clone(),
                    owner: name.to_string(),
                });
            }
        }

        let raw = u16::try_from(self.registrations.len() + 1)
            .map_err(|_| CacheError::DuplicateType(format!("{name}: type id space exhausted")))?;
        let ty = ResourceType::new(raw);

        for ext in &extensions {
            self.by_extension.insert(ext.clone(), ty);
        }
        self.by_name.insert(name.to_string(), ty);
        if let Some(type_id) = rust_type {
            self.by_type_id.insert(type_id, ty);
        }

        self.registrations.push(TypeRegistration {
            ty,
            name: Arc::from(name),
            extensions,
            rust_type,
            factory: Box::new(factory),
            discovery,
        });

        tracing::debug!(name, ty = raw, "registered resource type");
        Ok(ty)
    }

    /// Register a statically described resource type
    pub fn register<T: ResourceKind>(&mut self) -> Result<ResourceType> {
        self.register_type_with_discovery(
            T::TYPE_NAME,
            TypedFactory::<T> {
                _phantom: std::marker::PhantomData,
            },
            T::EXTENSIONS,
            Arc::new(T::can_construct_from),
            Some(TypeId::of::<T>()),
        )
    }

    pub fn get(&self, ty: ResourceType) -> Option<&TypeRegistration> {
        if ty.is_none() {
            return None;
        }
        self.registrations.get(ty.raw() as usize - 1)
    }

    pub fn get_factory(&self, ty: ResourceType) -> Option<&dyn ResourceFactory> {
        self.get(ty).map(|r| r.factory.as_ref())
    }

    pub fn get_type_by_extension(&self, ext: &str) -> Option<ResourceType> {
        self.by_extension.get(&normalize_extension(ext)).copied()
    }

    pub fn type_by_name(&self, name: &str) -> Option<ResourceType> {
        self.by_name.get(name).copied()
    }

    pub fn type_name(&self, ty: ResourceType) -> Option<&str> {
        self.get(ty).map(|r| &*r.name)
    }

    /// Type assigned to a statically registered Rust type
    pub fn type_of<T: 'static>(&self) -> Option<ResourceType> {
        self.by_type_id.get(&TypeId::of::<T>()).copied()
    }

    /// Sub-resources `path` would yield as `ty`
    pub fn can_construct_from(&self, ty: ResourceType, path: &Path) -> Vec<ResourceDataInFile> {
        self.get(ty)
            .map(|r| (r.discovery)(ty, path))
            .unwrap_or_default()
    }

    pub fn types(&self) -> impl Iterator<Item = ResourceType> + '_ {
        self.registrations.iter().map(|r| r.ty)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::tests::PlainResource;

    fn plain_factory(_info: ResourceCreateInfo) -> Arc<dyn Resource> {
        Arc::new(PlainResource::new(false))
    }

    #[test]
    fn test_register_assigns_fresh_types() {
        let mut registry = TypeRegistry::new();
        let a = registry.register_type("A", plain_factory, &[".a"]).unwrap();
        let b = registry.register_type("B", plain_factory, &["b"]).unwrap();
        assert_ne!(a, b);
        assert!(!a.is_none());
        assert_eq!(registry.type_name(a), Some("A"));
        assert_eq!(registry.type_by_name("B"), Some(b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = TypeRegistry::new();
        registry.register_type("Texture", plain_factory, &[]).unwrap();
        assert!(matches!(
            registry.register_type("Texture", plain_factory, &[]),
            Err(CacheError::DuplicateType(_))
        ));
    }

    #[test]
    fn test_duplicate_extension_rejected_without_side_effects() {
        let mut registry = TypeRegistry::new();
        let tex = registry.register_type("Texture", plain_factory, &[".tex"]).unwrap();
        let result = registry.register_type("Other", plain_factory, &[".other", ".TEX"]);
        assert!(matches!(result, Err(CacheError::DuplicateExtension { .. })));

        assert_eq!(registry.type_by_name("Other"), None);
        assert_eq!(registry.get_type_by_extension("other"), None);
        assert_eq!(registry.get_type_by_extension("tex"), Some(tex));
    }

    #[test]
    fn test_extension_lookup_is_normalized() {
        let mut registry = TypeRegistry::new();
        let tex = registry.register_type("Texture", plain_factory, &[".Tex"]).unwrap();
        assert_eq!(registry.get_type_by_extension(".tex"), Some(tex));
        assert_eq!(registry.get_type_by_extension("TEX"), Some(tex));
        assert_eq!(registry.get_type_by_extension("png"), None);
    }

    #[test]
    fn test_default_discovery_uses_file_stem() {
        let mut registry = TypeRegistry::new();
        let tex = registry.register_type("Texture", plain_factory, &[".tex"]).unwrap();
        let found = registry.can_construct_from(tex, Path::new("assets/brick.tex"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "brick");
        assert_eq!(found[0].ty, tex);
        assert!(found[0].uuid.is_nil());
    }

    #[test]
    fn test_custom_discovery_yields_many() {
        let mut registry = TypeRegistry::new();
        let clip = registry.register_type("Clip", plain_factory, &[]).unwrap();
        let scene = registry
            .register_type_with_discovery(
                "Scene",
                plain_factory,
                &[".fbx"],
                Arc::new(move |ty, path: &Path| {
                    let mut out = default_construct_from(ty, path);
                    for name in ["walk", "run"] {
                        out.push(ResourceDataInFile {
                            name: name.to_string(),
                            ty: clip,
                            uuid: Uuid::nil(),
                        });
                    }
                    out
                }),
                None,
            )
            .unwrap();

        let found = registry.can_construct_from(scene, Path::new("hero.fbx"));
        assert_eq!(found.len(), 3);
        assert_eq!(found.iter().filter(|d| d.ty == clip).count(), 2);
    }

    #[test]
    fn test_unknown_type_lookups() {
        let registry = TypeRegistry::new();
        assert!(registry.get_factory(ResourceType::NONE).is_none());
        assert!(registry.get_factory(ResourceType::new(9)).is_none());
        assert!(registry
            .can_construct_from(ResourceType::new(9), Path::new("x"))
            .is_empty());
    }
}
