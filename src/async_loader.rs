//! Background loading on worker threads.
//!
//! Requests go to the workers over a crossbeam channel; completions come
//! back over a second one and are polled by the owning thread, usually
//! once per frame. Callbacks run on the polling thread.

use crate::error::{CacheError, Result};
use crate::handle::ResourceHandle;
use crate::loader::ResourceLoader;
use crate::scheduler::GpuResidencyScheduler;
use ahash::AHashMap;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Identifies one submitted request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadTicket(pub u64);

#[derive(Clone, Debug)]
pub enum LoadRequest {
    /// Load one resource, optionally bringing it GPU-resident afterwards
    Resource { handle: ResourceHandle, update_gpu: bool },
    /// Resolve and load every resource a file yields
    Path { path: PathBuf, meta_only: bool },
}

#[derive(Clone, Debug)]
pub enum LoadOutcome {
    Resource(Result<ResourceHandle>),
    Path(Result<Vec<ResourceHandle>>),
}

impl LoadOutcome {
    pub fn is_ok(&self) -> bool {
        match self {
            LoadOutcome::Resource(r) => r.is_ok(),
            LoadOutcome::Path(r) => r.is_ok(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoadCompletion {
    pub ticket: LoadTicket,
    pub outcome: LoadOutcome,
}

pub type CompletionCallback = Box<dyn FnOnce(&LoadCompletion) + Send>;

struct LoadJob {
    ticket: LoadTicket,
    request: LoadRequest,
}

/// Worker pool serving [`LoadRequest`]s
pub struct AsyncResourceLoader {
    job_sender: Option<Sender<LoadJob>>,
    completion_receiver: Receiver<LoadCompletion>,
    workers: Vec<JoinHandle<()>>,
    callbacks: Mutex<AHashMap<LoadTicket, CompletionCallback>>,
    next_ticket: AtomicU64,
    pending: AtomicUsize,
}

impl AsyncResourceLoader {
    /// Spawn `loader_threads` workers from the cache configuration
    pub fn new(loader: ResourceLoader, scheduler: Arc<GpuResidencyScheduler>) -> Result<Self> {
        let threads = loader.cache().config().loader_threads.max(1);
        let (job_sender, job_receiver) = channel::unbounded::<LoadJob>();
        let (completion_sender, completion_receiver) = channel::unbounded::<LoadCompletion>();

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let loader = loader.clone();
            let scheduler = scheduler.clone();
            let jobs = job_receiver.clone();
            let completions = completion_sender.clone();
            let worker = std::thread::Builder::new()
                .name(format!("resource-loader-{index}"))
                .spawn(move || worker_loop(loader, scheduler, jobs, completions))?;
            workers.push(worker);
        }

        tracing::info!(threads, "async resource loader started");
        Ok(Self {
            job_sender: Some(job_sender),
            completion_receiver,
            workers,
            callbacks: Mutex::new(AHashMap::new()),
            next_ticket: AtomicU64::new(1),
            pending: AtomicUsize::new(0),
        })
    }

    pub fn submit(&self, request: LoadRequest, callback: Option<CompletionCallback>) -> Result<LoadTicket> {
        let sender = self
            .job_sender
            .as_ref()
            .ok_or_else(|| CacheError::LoadError("loader is shut down".into()))?;

        let ticket = LoadTicket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        if let Some(callback) = callback {
            self.callbacks.lock().insert(ticket, callback);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        if sender.send(LoadJob { ticket, request }).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            self.callbacks.lock().remove(&ticket);
            return Err(CacheError::LoadError("loader workers have exited".into()));
        }
        Ok(ticket)
    }

    pub fn load_resource_async(
        &self,
        handle: ResourceHandle,
        update_gpu: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<LoadTicket> {
        self.submit(LoadRequest::Resource { handle, update_gpu }, callback)
    }

    pub fn load_path_async(
        &self,
        path: impl Into<PathBuf>,
        meta_only: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<LoadTicket> {
        self.submit(
            LoadRequest::Path {
                path: path.into(),
                meta_only,
            },
            callback,
        )
    }

    /// Submitted requests whose completion has not been polled yet
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn complete(&self, completion: LoadCompletion) -> LoadCompletion {
        self.pending.fetch_sub(1, Ordering::AcqRel);
        let callback = self.callbacks.lock().remove(&completion.ticket);
        if let Some(callback) = callback {
            callback(&completion);
        }
        completion
    }

    /// Next finished request, if any. Never blocks.
    pub fn try_recv(&self) -> Option<LoadCompletion> {
        self.completion_receiver
            .try_recv()
            .ok()
            .map(|completion| self.complete(completion))
    }

    /// Every finished request. Call once per frame.
    pub fn drain(&self) -> Vec<LoadCompletion> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Block until every pending request completed or `timeout` elapsed
    pub fn wait_all(&self, timeout: Duration) -> Vec<LoadCompletion> {
        let deadline = Instant::now() + timeout;
        let mut done = Vec::new();
        while self.pending() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.completion_receiver.recv_timeout(remaining) {
                Ok(completion) => done.push(self.complete(completion)),
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(pending = self.pending(), "timed out waiting for loads");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        done
    }

    /// Stop accepting requests and join the workers after they finish the
    /// queue.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.job_sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("resource loader worker panicked");
            }
        }
    }
}

impl Drop for AsyncResourceLoader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    loader: ResourceLoader,
    scheduler: Arc<GpuResidencyScheduler>,
    jobs: Receiver<LoadJob>,
    completions: Sender<LoadCompletion>,
) {
    while let Ok(job) = jobs.recv() {
        let _span = tracing::debug_span!("load_job", ticket = job.ticket.0).entered();
        let outcome = match job.request {
            LoadRequest::Resource { handle, update_gpu } => {
                LoadOutcome::Resource(load_resource(&loader, &scheduler, handle, update_gpu))
            }
            LoadRequest::Path { path, meta_only } => LoadOutcome::Path(loader.load_path_sync(&path, meta_only)),
        };

        if completions
            .send(LoadCompletion {
                ticket: job.ticket,
                outcome,
            })
            .is_err()
        {
            break;
        }
    }
}

fn load_resource(
    loader: &ResourceLoader,
    scheduler: &GpuResidencyScheduler,
    handle: ResourceHandle,
    update_gpu: bool,
) -> Result<ResourceHandle> {
    let handle = loader.load_resource_sync(handle)?;
    if update_gpu {
        if let Some(resource) = loader.cache().get_raw_resource_sync(handle) {
            scheduler.update_gpu(&resource)?;
        }
    }
    Ok(handle)
}
