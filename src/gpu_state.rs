//! Tri-state GPU residency flag.
//!
//! Legal edges are `Clean -> Dirty -> Uploading -> Clean`. The
//! `Dirty -> Uploading` edge is a compare-and-swap, so exactly one caller
//! wins the right to run the upload hook for a dirty period.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GpuState {
    Clean = 0,
    Dirty = 1,
    Uploading = 2,
}

impl GpuState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => GpuState::Clean,
            1 => GpuState::Dirty,
            _ => GpuState::Uploading,
        }
    }
}

/// Atomic cell holding a [`GpuState`]
#[derive(Debug)]
pub struct GpuStateCell {
    state: AtomicU8,
    // Set when a dirtying mutation lands while an upload is in flight.
    redirty: AtomicBool,
}

impl GpuStateCell {
    pub fn new(initial: GpuState) -> Self {
        Self {
            state: AtomicU8::new(initial as u8),
            redirty: AtomicBool::new(false),
        }
    }

    pub fn load(&self) -> GpuState {
        GpuState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// `Clean -> Dirty`. Returns true if this call performed the edge.
    ///
    /// While `Uploading` the request is parked and replayed by
    /// [`GpuStateCell::finish_upload`].
    pub fn mark_dirty(&self) -> bool {
        match self.state.compare_exchange(
            GpuState::Clean as u8,
            GpuState::Dirty as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(observed) => {
                if GpuState::from_raw(observed) == GpuState::Uploading {
                    self.redirty.store(true, Ordering::Release);
                    // The upload may have finished between the CAS and the store.
                    if self.load() == GpuState::Clean && self.redirty.swap(false, Ordering::AcqRel) {
                        return self.mark_dirty();
                    }
                }
                false
            }
        }
    }

    /// `Dirty -> Uploading`. On failure returns the observed state.
    pub fn begin_upload(&self) -> Result<(), GpuState> {
        self.state
            .compare_exchange(
                GpuState::Dirty as u8,
                GpuState::Uploading as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(GpuState::from_raw)
    }

    /// `Uploading -> Clean`, then `Clean -> Dirty` if a mutation was parked.
    pub fn finish_upload(&self) -> Result<(), GpuState> {
        self.state
            .compare_exchange(
                GpuState::Uploading as u8,
                GpuState::Clean as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(GpuState::from_raw)?;

        if self.redirty.swap(false, Ordering::AcqRel) {
            self.mark_dirty();
        }
        Ok(())
    }

    /// `Uploading -> Dirty`. Recovery edge after a failed upload hook.
    pub fn abandon_upload(&self) -> Result<(), GpuState> {
        self.state
            .compare_exchange(
                GpuState::Uploading as u8,
                GpuState::Dirty as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| {
                self.redirty.store(false, Ordering::Release);
            })
            .map_err(GpuState::from_raw)
    }
}

impl Default for GpuStateCell {
    fn default() -> Self {
        Self::new(GpuState::Dirty)
    }
}
