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

//! Resource identity: persisted uuids and process-local handles.

use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Numeric resource type, assigned at registration time.
///
/// `ResourceType::NONE` (0) is never handed out by the registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceType(pub(crate) u16);

impl ResourceType {
    pub const NONE: ResourceType = ResourceType(0);

    pub fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Dense per-type slot index
pub type SlotId = u32;

/// Process-local lookup key. Never serialized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle {
    pub ty: ResourceType,
    pub id: SlotId,
}

/// Canonical empty handle
pub const EMPTY_RESOURCE_HANDLE: ResourceHandle = ResourceHandle {
    ty: ResourceType::NONE,
    id: 0,
};

impl ResourceHandle {
    pub fn new(ty: ResourceType, id: SlotId) -> Self {
        Self { ty, id }
    }

    /// Check if handle points at a type at all
    pub fn is_valid(&self) -> bool {
        !self.ty.is_none()
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}:{})", self.ty.0, self.id)
    }
}

/// Lightweight listing entry for resource pickers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourcePreview {
    pub name: String,
    pub path: PathBuf,
    pub handle: ResourceHandle,
}

/// Generate a fresh asset identity
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}
