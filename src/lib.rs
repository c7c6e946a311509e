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

//! Residency Cache - resource lifecycle and GPU-residency tracking
//!
//! Stable uuids plus generational `(type, slot)` handles, a tri-state GPU
//! dirty machine, pull-based dependency dirtiness and a per-tick upload
//! scheduler.

pub mod async_loader;
pub mod builtin;
pub mod cache;
pub mod config;
pub mod error;
pub mod gpu_state;
pub mod handle;
pub mod loader;
pub mod prelude;
pub mod registry;
pub mod resource;
pub mod resource_ref;
pub mod scheduler;
pub mod signal;
pub mod slot;

#[cfg(feature = "profiling")]
pub mod profiling;

pub use async_loader::*;
pub use cache::*;
pub use config::*;
pub use error::*;
pub use gpu_state::*;
pub use handle::*;
pub use loader::*;
pub use registry::*;
pub use resource::*;
pub use resource_ref::*;
pub use scheduler::*;
pub use signal::*;
