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

//! Error types

use crate::gpu_state::GpuState;
use crate::handle::ResourceHandle;
use std::fmt;
use uuid::Uuid;

/// Resource cache error type
#[derive(Debug, Clone)]
pub enum CacheError {
    /// No type registered under this name or id
    TypeNotRegistered(String),

    /// Type name registered twice
    DuplicateType(String),

    /// Extension already claimed by another type
    DuplicateExtension { extension: String, owner: String },

    /// A live resource already carries this uuid
    DuplicateUuid(Uuid),

    /// Resource not found
    ResourceNotFound(String),

    /// Typed lookup against a handle of another type
    TypeMismatch { expected: String, found: String },

    /// Disk-dirtying mutation attempted while the resource is locked
    ResourceLocked(ResourceHandle),

    /// GPU state machine violated
    IllegalGpuTransition {
        handle: ResourceHandle,
        observed: GpuState,
        required: GpuState,
    },

    /// Resource could not be read from disk
    LoadError(String),

    /// Resource could not be written to disk
    SaveError(String),

    /// Serialization error
    SerializationError(String),

    /// Deserialization error
    DeserializationError(String),

    /// Invalid configuration
    ConfigError(String),

    /// IO error (file operations, etc.)
    IoError(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::TypeNotRegistered(name) => write!(f, "Resource type not registered: {name}"),
            CacheError::DuplicateType(name) => write!(f, "Resource type {name} is already registered"),
            CacheError::DuplicateExtension { extension, owner } => {
                write!(f, "Extension '{extension}' is already claimed by {owner}")
            }
            CacheError::DuplicateUuid(uuid) => write!(f, "Resource with uuid {uuid} already exists"),
            CacheError::ResourceNotFound(msg) => write!(f, "Resource not found: {msg}"),
            CacheError::TypeMismatch { expected, found } => {
                write!(f, "Requested type {expected} is not compatible with handle type {found}")
            }
            CacheError::ResourceLocked(handle) => {
                write!(f, "Resource {handle} cannot be manipulated while locked")
            }
            CacheError::IllegalGpuTransition {
                handle,
                observed,
                required,
            } => write!(
                f,
                "Illegal GPU state transition on {handle}: state is {observed:?}, expected {required:?}"
            ),
            CacheError::LoadError(msg) => write!(f, "Resource load error: {msg}"),
            CacheError::SaveError(msg) => write!(f, "Resource save error: {msg}"),
            CacheError::SerializationError(msg) => write!(f, "Serialization error: {msg}"),
            CacheError::DeserializationError(msg) => write!(f, "Deserialization error: {msg}"),
            CacheError::ConfigError(msg) => write!(f, "Config error: {msg}"),
            CacheError::IoError(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::IoError(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CacheError>;
