//! GPU residency scheduler.
//!
//! Once per tick the scheduler walks candidate resources and turns "marked
//! dirty" into "uploaded". Clean resources cost one atomic load plus a
//! shallow dependency walk. The `Dirty -> Uploading` claim guarantees a
//! resource is never inside two upload hooks at once, even when passes
//! overlap or run on several threads.

use crate::cache::ResourceCache;
use crate::config::{CacheConfig, SchedulerConfig};
use crate::error::{CacheError, Result};
use crate::gpu_state::GpuState;
use crate::handle::ResourceHandle;
use crate::resource::Resource;
use ahash::AHashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Outcome of one [`GpuResidencyScheduler::update_gpu`] call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceGpuUpdateResult {
    /// Upload hook ran and the resource is clean
    Success,
    /// Nothing to do
    AlreadyClean,
    /// A dependency is dirty; the resource was marked dirty and skipped
    DirtyDependency,
    /// Another caller holds the upload claim
    InFlight,
    /// CPU data is not loaded; the resource stays dirty and unclaimed
    NotLoaded,
    /// Upload hook failed; the resource is parked until [`GpuResidencyScheduler::retry`]
    Failed,
}

/// What one scheduler pass did
#[derive(Clone, Debug, Default)]
pub struct UploadReport {
    pub uploaded: Vec<ResourceHandle>,
    pub skipped_clean: usize,
    pub deferred: Vec<ResourceHandle>,
    pub in_flight: Vec<ResourceHandle>,
    /// Dirty but not loaded yet
    pub not_loaded: Vec<ResourceHandle>,
    pub failed: Vec<ResourceHandle>,
    /// Dirty but left for the next pass by `max_uploads_per_tick`
    pub throttled: Vec<ResourceHandle>,
}

impl UploadReport {
    pub fn upload_calls(&self) -> usize {
        self.uploaded.len() + self.failed.len()
    }

    fn record(&mut self, handle: ResourceHandle, outcome: PassOutcome) {
        match outcome {
            PassOutcome::Updated(ResourceGpuUpdateResult::Success) => self.uploaded.push(handle),
            PassOutcome::Updated(ResourceGpuUpdateResult::AlreadyClean) => self.skipped_clean += 1,
            PassOutcome::Updated(ResourceGpuUpdateResult::DirtyDependency) => self.deferred.push(handle),
            PassOutcome::Updated(ResourceGpuUpdateResult::InFlight) => self.in_flight.push(handle),
            PassOutcome::Updated(ResourceGpuUpdateResult::NotLoaded) => self.not_loaded.push(handle),
            PassOutcome::Updated(ResourceGpuUpdateResult::Failed) | PassOutcome::Error => {
                self.failed.push(handle)
            }
            PassOutcome::Throttled => self.throttled.push(handle),
        }
    }
}

/// Lifetime counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub passes: u64,
    pub uploads: u64,
    pub failures: u64,
    pub deferrals: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PassOutcome {
    Updated(ResourceGpuUpdateResult),
    Throttled,
    Error,
}

/// Per-pass upload allowance
struct Budget(Option<AtomicUsize>);

impl Budget {
    fn new(limit: Option<usize>) -> Self {
        Self(limit.map(AtomicUsize::new))
    }

    fn take(&self) -> bool {
        match &self.0 {
            None => true,
            Some(left) => left
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok(),
        }
    }

    fn refund(&self) {
        if let Some(left) = &self.0 {
            left.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// Per-tick upload driver
pub struct GpuResidencyScheduler {
    config: SchedulerConfig,
    lock_during_upload: bool,
    faulted: Mutex<AHashMap<ResourceHandle, Arc<dyn Resource>>>,
    passes: AtomicU64,
    uploads: AtomicU64,
    failures: AtomicU64,
    deferrals: AtomicU64,
}

impl GpuResidencyScheduler {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            config: config.scheduler.clone(),
            lock_during_upload: config.lock_during_upload,
            faulted: Mutex::new(AHashMap::new()),
            passes: AtomicU64::new(0),
            uploads: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            deferrals: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            passes: self.passes.load(Ordering::Relaxed),
            uploads: self.uploads.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            deferrals: self.deferrals.load(Ordering::Relaxed),
        }
    }

    /// Handles whose last upload failed and that wait for [`Self::retry`]
    pub fn faulted(&self) -> Vec<ResourceHandle> {
        let mut handles: Vec<_> = self.faulted.lock().keys().copied().collect();
        handles.sort();
        handles
    }

    pub fn is_faulted(&self, handle: ResourceHandle) -> bool {
        self.faulted.lock().contains_key(&handle)
    }

    /// Hand a failed resource back as `Dirty` so a later pass uploads it
    /// again. Returns false if the handle was not faulted.
    pub fn retry(&self, handle: ResourceHandle) -> Result<bool> {
        let Some(resource) = self.faulted.lock().remove(&handle) else {
            return Ok(false);
        };
        resource.core().abandon_upload()?;
        tracing::info!(%handle, "retrying failed upload");
        Ok(true)
    }

    /// Retry every faulted resource. Resources that cannot be reset stay
    /// faulted and the first such error is returned after the rest were
    /// handled.
    pub fn retry_all(&self) -> Result<usize> {
        let drained: Vec<_> = self.faulted.lock().drain().collect();
        let mut retried = 0;
        let mut first_error = None;
        for (handle, resource) in drained {
            match resource.core().abandon_upload() {
                Ok(()) => retried += 1,
                Err(e) => {
                    tracing::warn!(%handle, error = %e, "could not retry failed upload");
                    self.faulted.lock().insert(handle, resource);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(retried),
        }
    }

    /// Bring one resource's GPU realization up to date
    pub fn update_gpu(&self, resource: &Arc<dyn Resource>) -> Result<ResourceGpuUpdateResult> {
        self.update_gpu_inner(resource).map(|(result, _)| result)
    }

    /// Also reports whether the upload hook ran
    fn update_gpu_inner(&self, resource: &Arc<dyn Resource>) -> Result<(ResourceGpuUpdateResult, bool)> {
        let core = resource.core();
        let handle = core.handle();

        if !resource.is_dirty_gpu() {
            return Ok((ResourceGpuUpdateResult::AlreadyClean, false));
        }

        if !core.is_loaded() {
            return Ok((ResourceGpuUpdateResult::NotLoaded, false));
        }

        if resource.are_dependencies_dirty() {
            core.make_gpu_dirty();
            self.deferrals.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(%handle, "upload deferred on dirty dependency");
            return Ok((ResourceGpuUpdateResult::DirtyDependency, false));
        }

        match core.set_uploading() {
            Ok(()) => {}
            Err(CacheError::IllegalGpuTransition {
                observed: GpuState::Uploading,
                ..
            }) => {
                let result = if self.is_faulted(handle) {
                    ResourceGpuUpdateResult::Failed
                } else {
                    ResourceGpuUpdateResult::InFlight
                };
                return Ok((result, false));
            }
            Err(CacheError::IllegalGpuTransition {
                observed: GpuState::Clean,
                ..
            }) => return Ok((ResourceGpuUpdateResult::AlreadyClean, false)),
            Err(e) => return Err(e),
        }

        let uploaded = {
            let _lock = self.lock_during_upload.then(|| core.lock_scope());
            resource.upload_to_gpu()
        };

        if uploaded {
            core.set_upload_complete()?;
            self.uploads.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(%handle, name = %core.name(), "uploaded resource");
            Ok((ResourceGpuUpdateResult::Success, true))
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
            self.faulted.lock().insert(handle, resource.clone());
            tracing::error!(%handle, name = %core.name(), "GPU upload failed");
            Ok((ResourceGpuUpdateResult::Failed, true))
        }
    }

    fn process(&self, resource: &Arc<dyn Resource>, budget: &Budget) -> PassOutcome {
        if !resource.is_dirty_gpu() {
            return PassOutcome::Updated(ResourceGpuUpdateResult::AlreadyClean);
        }
        if !budget.take() {
            return PassOutcome::Throttled;
        }

        match self.update_gpu_inner(resource) {
            Ok((result, hook_ran)) => {
                if !hook_ran {
                    budget.refund();
                }
                PassOutcome::Updated(result)
            }
            Err(e) => {
                budget.refund();
                tracing::error!(handle = %resource.handle(), error = %e, "scheduler could not update resource");
                PassOutcome::Error
            }
        }
    }

    /// One pass over `candidates`
    pub fn run<I>(&self, candidates: I) -> UploadReport
    where
        I: IntoIterator<Item = Arc<dyn Resource>>,
    {
        let _span = tracing::debug_span!("gpu_residency_pass").entered();
        let budget = Budget::new(self.config.max_uploads_per_tick);
        let mut report = UploadReport::default();
        let mut deferred: SmallVec<[Arc<dyn Resource>; 16]> = SmallVec::new();

        for resource in candidates {
            let outcome = self.process(&resource, &budget);
            if outcome == PassOutcome::Updated(ResourceGpuUpdateResult::DirtyDependency)
                && self.config.retry_deferred
            {
                deferred.push(resource);
            } else {
                report.record(resource.handle(), outcome);
            }
        }

        // Dependencies uploaded earlier in this pass may have unblocked these.
        for resource in deferred {
            let outcome = self.process(&resource, &budget);
            report.record(resource.handle(), outcome);
        }

        self.finish_pass(&report);
        report
    }

    /// One pass over every live resource in `cache`
    pub fn run_cache(&self, cache: &ResourceCache) -> UploadReport {
        self.run(cache.all_resources())
    }

    /// One pass with upload hooks spread over rayon workers.
    ///
    /// Independent resources upload in no particular order.
    #[cfg(feature = "parallel")]
    pub fn run_parallel(&self, candidates: Vec<Arc<dyn Resource>>) -> UploadReport {
        use rayon::prelude::*;

        let _span = tracing::debug_span!("gpu_residency_pass_parallel", count = candidates.len()).entered();
        let budget = Budget::new(self.config.max_uploads_per_tick);

        let outcomes: Vec<(Arc<dyn Resource>, PassOutcome)> = candidates
            .into_par_iter()
            .map(|resource| {
                let outcome = self.process(&resource, &budget);
                (resource, outcome)
            })
            .collect();

        let mut report = UploadReport::default();
        let mut deferred = Vec::new();
        for (resource, outcome) in outcomes {
            if outcome == PassOutcome::Updated(ResourceGpuUpdateResult::DirtyDependency)
                && self.config.retry_deferred
            {
                deferred.push(resource);
            } else {
                report.record(resource.handle(), outcome);
            }
        }

        let retried: Vec<(ResourceHandle, PassOutcome)> = deferred
            .into_par_iter()
            .map(|resource| (resource.handle(), self.process(&resource, &budget)))
            .collect();
        for (handle, outcome) in retried {
            report.record(handle, outcome);
        }

        self.finish_pass(&report);
        report
    }

    fn finish_pass(&self, report: &UploadReport) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        if report.upload_calls() > 0 || !report.deferred.is_empty() {
            tracing::debug!(
                uploaded = report.uploaded.len(),
                deferred = report.deferred.len(),
                failed = report.failed.len(),
                throttled = report.throttled.len(),
                "gpu residency pass finished"
            );
        }
    }
}

impl Default for GpuResidencyScheduler {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
