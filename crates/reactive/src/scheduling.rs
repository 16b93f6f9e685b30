//! Scheduling of observation work.
//!
//! Observations evaluate and deliver either right where a change happens
//! (`Scheduling::Immediate`) or in the background: a `WorkerPool` runs
//! fetches and reductions, and a serial `DispatchQueue` delivers values to
//! the application, in order.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{trace, warn};
use vigil_core::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where an observation evaluates and delivers its values.
#[derive(Clone, Debug, Default)]
pub enum Scheduling {
    /// Fetch, reduce and deliver synchronously: on the thread that starts
    /// the observation for the initial value, and on the writer thread,
    /// inside the commit, for changes. Changes committed while the
    /// observation starts are delivered by `start`, after the initial value.
    Immediate,
    /// Evaluate on the database worker pool, deliver on the database
    /// delivery queue.
    #[default]
    Deferred,
    /// Evaluate on the database worker pool, deliver on the given queue.
    DeferredOn(DispatchQueue),
}

impl Scheduling {
    /// Returns true for `Scheduling::Immediate`.
    pub fn is_immediate(&self) -> bool {
        matches!(self, Scheduling::Immediate)
    }
}

fn run_job(label: &str, job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        warn!(queue = label, "job panicked");
    }
}

fn spawn(name: String, body: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name)
        .spawn(body)
        .map_err(Error::custom)
}

/// Joins `handle` unless called from the thread itself.
fn join(handle: JoinHandle<()>) {
    if handle.thread().id() != thread::current().id() {
        let _ = handle.join();
    }
}

/// A serial queue backed by a dedicated thread.
///
/// Jobs run one at a time, in submission order. The thread exits once every
/// handle on the queue is dropped and the pending jobs have run.
#[derive(Clone)]
pub struct DispatchQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    label: String,
    sender: Option<Sender<Job>>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchQueue {
    /// Spawns a new queue.
    pub fn new(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let thread_label = label.clone();
        let handle = spawn(label.clone(), move || {
            for job in receiver {
                run_job(&thread_label, job);
            }
            trace!(queue = %thread_label, "queue drained");
        })?;
        Ok(Self {
            inner: Arc::new(QueueInner {
                label,
                sender: Some(sender),
                thread_id: handle.thread().id(),
                handle: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Returns the queue label. It is also the name of the queue thread.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Returns true when called from a job running on this queue.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    /// Schedules a job.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        let sent = match &self.inner.sender {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => false,
        };
        if !sent {
            warn!(queue = %self.inner.label, "job dropped, queue is gone");
        }
    }
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("label", &self.inner.label)
            .finish()
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        // Closing the channel ends the queue loop.
        self.sender.take();
        if let Some(handle) = self.handle.get_mut().take() {
            join(handle);
        }
    }
}

/// A fixed set of threads running jobs concurrently.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    label: String,
    sender: Option<Sender<Job>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

fn run_worker(label: String, receiver: Receiver<Job>) {
    for job in receiver {
        run_job(&label, job);
    }
}

impl WorkerPool {
    /// Spawns `size` worker threads. At least one thread is spawned.
    pub fn new(label: impl Into<String>, size: usize) -> Result<Self> {
        let label = label.into();
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let handles = (0..size.max(1))
            .map(|i| {
                let receiver = receiver.clone();
                let name = format!("{}-{}", label, i);
                let worker_label = name.clone();
                spawn(name, move || run_worker(worker_label, receiver))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                label,
                sender: Some(sender),
                handles: Mutex::new(handles),
            }),
        })
    }

    /// Returns the pool label.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Returns the number of worker threads.
    pub fn size(&self) -> usize {
        self.inner.handles.lock().len()
    }

    /// Schedules a job on one of the workers.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        self.inner
            .sender
            .as_ref()
            .ok_or(Error::Closed)?
            .send(Box::new(job))
            .map_err(|_| Error::Closed)
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("label", &self.inner.label)
            .field("size", &self.size())
            .finish()
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.handles.get_mut().drain(..) {
            join(handle);
        }
    }
}
