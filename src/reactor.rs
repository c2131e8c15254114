//! The reactor: one thread driving a current-thread tokio runtime.
//!
//! All connection I/O, request assembly and deferred callbacks run on this
//! thread. Ordinary remote methods run on the runtime's blocking pool (the
//! worker pool) so they may block freely.
//!
//! # Architecture
//!
//! ```text
//! any thread ─► next_tick(job) ─► mpsc::UnboundedSender ─► tick loop ─► job()
//! any thread ─► spawn(future) ─────────────────────────────► reactor tasks
//! reactor    ─► spawn_blocking(f) ─► worker pool
//! ```
//!
//! # Example
//!
//! ```
//! use objwire::reactor::Reactor;
//! use std::sync::mpsc;
//!
//! let reactor = Reactor::start().unwrap();
//! let (tx, rx) = mpsc::channel();
//! let handle = reactor.handle().clone();
//! reactor.handle().next_tick(move || {
//!     tx.send(handle.is_reactor_thread()).unwrap();
//! });
//! assert!(rx.recv().unwrap());
//! ```

use std::any::Any;
use std::cell::Cell;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, ThreadId};

use tokio::runtime::{Builder, Handle};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{ObjwireError, Result};

/// Default number of worker threads for ordinary method calls.
pub const DEFAULT_WORKER_THREADS: usize = 20;

/// A unit of work scheduled on the reactor thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    /// Set on worker pool threads, which may block although they carry a
    /// runtime context.
    static WORKER_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Configuration for the reactor thread and its worker pool.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Maximum worker threads running ordinary methods.
    pub worker_threads: usize,
    /// Name of the reactor thread.
    pub thread_name: String,
    /// Name given to worker threads.
    pub worker_thread_name: String,
}

impl ReactorConfig {
    /// Set the worker pool size.
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count.max(1);
        self
    }

    /// Set the reactor thread name.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            thread_name: "objwire-reactor".to_string(),
            worker_thread_name: "objwire-worker".to_string(),
        }
    }
}

/// Cheap, cloneable access to a running reactor.
#[derive(Clone)]
pub struct ReactorHandle {
    runtime: Handle,
    ticks: mpsc::UnboundedSender<Job>,
    thread: ThreadId,
}

impl ReactorHandle {
    /// Run `job` on the reactor thread after everything already queued.
    ///
    /// Jobs run one at a time in submission order. A panicking job is
    /// logged and does not stop the reactor.
    pub fn next_tick<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.ticks.send(Box::new(job)).is_err() {
            tracing::warn!("reactor stopped, dropping scheduled job");
        }
    }

    /// Spawn a task onto the reactor.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    /// Run a blocking function on the worker pool.
    pub fn spawn_blocking<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.runtime.spawn_blocking(f)
    }

    /// Whether the caller is running on the reactor thread.
    #[inline]
    pub fn is_reactor_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Whether the calling thread may block waiting for this reactor.
    ///
    /// Blocking is refused on the reactor thread and on any thread driving
    /// async code (inside a tokio runtime), except the worker pool threads
    /// of a reactor.
    pub fn can_block(&self) -> bool {
        if self.is_reactor_thread() {
            return false;
        }
        WORKER_THREAD.with(Cell::get) || Handle::try_current().is_err()
    }

    /// Drive `future` on the reactor and block the calling thread for its output.
    ///
    /// # Errors
    ///
    /// `ReactorBlocked` when [`ReactorHandle::can_block`] is false: on the
    /// reactor thread, or from async code. `ReactorStopped` if the reactor
    /// goes away first.
    pub fn block_on<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if !self.can_block() {
            return Err(ObjwireError::ReactorBlocked);
        }

        let (tx, rx) = oneshot::channel();
        self.spawn(async move {
            let _ = tx.send(future.await);
        });
        rx.blocking_recv().map_err(|_| ObjwireError::ReactorStopped)
    }
}

/// Owner of the reactor thread.
///
/// Dropping the reactor stops it; tasks still running are abandoned.
pub struct Reactor {
    handle: ReactorHandle,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Reactor {
    /// Start a reactor with the default configuration.
    pub fn start() -> Result<Self> {
        Self::with_config(ReactorConfig::default())
    }

    /// Start a reactor thread.
    pub fn with_config(config: ReactorConfig) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .max_blocking_threads(config.worker_threads.max(1))
            .thread_name(config.worker_thread_name.clone())
            .on_thread_start(|| WORKER_THREAD.with(|worker| worker.set(true)))
            .build()?;

        let (ticks_tx, ticks_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let runtime_handle = runtime.handle().clone();

        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                runtime.block_on(tick_loop(ticks_rx, stop_rx));
                runtime.shutdown_background();
                tracing::debug!("reactor thread exiting");
            })?;

        let handle = ReactorHandle {
            runtime: runtime_handle,
            ticks: ticks_tx,
            thread: thread.thread().id(),
        };

        tracing::debug!(
            "reactor started ({} worker threads)",
            config.worker_threads
        );

        Ok(Self {
            handle,
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Handle for scheduling work on this reactor.
    pub fn handle(&self) -> &ReactorHandle {
        &self.handle
    }

    /// Stop the reactor and wait for its thread to exit.
    ///
    /// When called on the reactor thread itself the stop is only signalled.
    pub fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if self.handle.is_reactor_thread() {
                return;
            }
            if thread.join().is_err() {
                tracing::error!("reactor thread panicked");
            }
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn tick_loop(mut ticks: mpsc::UnboundedReceiver<Job>, mut stop: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            job = ticks.recv() => match job {
                Some(job) => run_job(job),
                None => break,
            },
            _ = &mut stop => break,
        }
    }
}

fn run_job(job: Job) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
        tracing::error!("scheduled job panicked: {}", panic_message(&*panic));
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
