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

use crate::handle::SlotId;
use crate::resource::Resource;
use std::sync::Arc;

struct SlotEntry {
    generation: u32,
    occupant: Option<Arc<dyn Resource>>,
}

/// Dense slot storage for one resource type, with generation tracking for
/// recycled ids.
pub struct SlotTable {
    slots: Vec<SlotEntry>,
    available_ids: Vec<SlotId>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            available_ids: Vec::new(),
        }
    }

    /// Reserve a slot. Returns its id and the generation the next occupant
    /// must carry as its version.
    pub fn allocate(&mut self) -> (SlotId, u32) {
        if let Some(id) = self.available_ids.pop() {
            return (id, self.slots[id as usize].generation);
        }

        let id = self.slots.len() as SlotId;
        self.slots.push(SlotEntry {
            generation: 1,
            occupant: None,
        });
        (id, 1)
    }

    /// Place a freshly constructed resource into a reserved slot
    pub fn occupy(&mut self, id: SlotId, resource: Arc<dyn Resource>) {
        if let Some(entry) = self.slots.get_mut(id as usize) {
            entry.occupant = Some(resource);
        }
    }

    /// Vacate a slot. `next_generation` is the destroyed resource's bumped
    /// version; the next occupant starts from it.
    pub fn release(&mut self, id: SlotId, next_generation: u32) -> Option<Arc<dyn Resource>> {
        let entry = self.slots.get_mut(id as usize)?;
        let previous = entry.occupant.take()?;
        entry.generation = entry.generation.max(next_generation);
        self.available_ids.push(id);
        Some(previous)
    }

    pub fn get(&self, id: SlotId) -> Option<&Arc<dyn Resource>> {
        self.slots.get(id as usize).and_then(|e| e.occupant.as_ref())
    }

    pub fn get_generation(&self, id: SlotId) -> u32 {
        self.slots.get(id as usize).map(|e| e.generation).unwrap_or(0)
    }

    pub fn occupied(&self) -> impl Iterator<Item = &Arc<dyn Resource>> {
        self.slots.iter().filter_map(|e| e.occupant.as_ref())
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.available_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}
