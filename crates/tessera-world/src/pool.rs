//! Fixed-size worker pool for blocking chunk work.
//!
//! Jobs go through a `crossbeam-channel` queue to named OS threads. Each
//! submission yields a [`TaskHandle`] that receives the job's result once.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool errors.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool no longer accepts work
    #[error("Worker pool is shut down")]
    ShutDown,
    /// A worker thread could not be spawned
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    /// The job panicked
    #[error("Task panicked")]
    Panicked,
    /// The job was discarded before it ran
    #[error("Task cancelled")]
    Cancelled,
    /// Waiting for a result timed out
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    /// Workers were still busy when the shutdown grace period ran out
    #[error("{0} worker(s) still running after shutdown grace period")]
    Stragglers(usize),
}

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// One-shot handle to the result of a submitted job.
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: Receiver<PoolResult<T>>,
    ready: Mutex<Option<PoolResult<T>>>,
}

impl<T> TaskHandle<T> {
    fn new(receiver: Receiver<PoolResult<T>>) -> Self {
        Self {
            receiver,
            ready: Mutex::new(None),
        }
    }

    /// Returns true once the result is available, including when the job
    /// was discarded without running.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        let mut ready = self.ready.lock();
        if ready.is_some() {
            return true;
        }
        match self.receiver.try_recv() {
            Ok(result) => *ready = Some(result),
            Err(TryRecvError::Disconnected) => *ready = Some(Err(PoolError::Cancelled)),
            Err(TryRecvError::Empty) => return false,
        }
        true
    }

    /// Takes the result if the job has finished.
    pub fn try_take(&self) -> Option<PoolResult<T>> {
        if let Some(result) = self.ready.lock().take() {
            return Some(result);
        }
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(PoolError::Cancelled)),
        }
    }

    /// Blocks until the job finishes.
    pub fn wait(self) -> PoolResult<T> {
        if let Some(result) = self.ready.lock().take() {
            return result;
        }
        self.receiver.recv().unwrap_or(Err(PoolError::Cancelled))
    }

    /// Blocks until the job finishes or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> PoolResult<T> {
        if let Some(result) = self.ready.lock().take() {
            return result;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(PoolError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(PoolError::Cancelled),
        }
    }
}

/// A fixed set of named worker threads.
pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    aborted: Arc<AtomicBool>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("workers", &self.workers.lock().len())
            .field("queued", &self.queued())
            .finish()
    }
}

impl WorkerPool {
    /// Spawns `threads` workers (at least one) named `<name>-<index>`.
    pub fn new(name: &str, threads: usize) -> PoolResult<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let aborted = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let receiver = receiver.clone();
            let aborted = Arc::clone(&aborted);
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        if aborted.load(Ordering::Acquire) {
                            continue;
                        }
                        job();
                    }
                })?;
            workers.push(handle);
        }
        debug!("Started {} '{}' workers", workers.len(), name);

        Ok(Self {
            name: name.to_string(),
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            aborted,
        })
    }

    /// Queues a job. The handle yields its return value, or
    /// [`PoolError::Panicked`] if it panicked.
    pub fn submit<T, F>(&self, job: F) -> PoolResult<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let wrapped: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(job)).map_err(|_| PoolError::Panicked);
            // The caller may have dropped its handle.
            let _ = tx.send(result);
        });

        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(PoolError::ShutDown)?;
        sender.send(wrapped).map_err(|_| PoolError::ShutDown)?;
        Ok(TaskHandle::new(rx))
    }

    /// Number of jobs waiting for a worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.sender.lock().as_ref().map_or(0, Sender::len)
    }

    /// Returns true once [`WorkerPool::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stops accepting work and waits up to `grace` for queued and running
    /// jobs to finish.
    ///
    /// When the grace period runs out, jobs still queued are discarded and
    /// workers still running are detached.
    pub fn shutdown(&self, grace: Duration) -> PoolResult<()> {
        if self.sender.lock().take().is_none() {
            return Ok(());
        }

        let deadline = Instant::now() + grace;
        let mut workers = std::mem::take(&mut *self.workers.lock());
        while !workers.iter().all(JoinHandle::is_finished) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let (finished, running): (Vec<_>, Vec<_>) =
            workers.drain(..).partition(JoinHandle::is_finished);
        for handle in finished {
            if handle.join().is_err() {
                warn!("A '{}' worker panicked", self.name);
            }
        }

        if running.is_empty() {
            info!("Worker pool '{}' shut down", self.name);
            return Ok(());
        }

        self.aborted.store(true, Ordering::Release);
        warn!(
            "Worker pool '{}': {} worker(s) still busy after {:?}, detaching",
            self.name,
            running.len(),
            grace
        );
        Err(PoolError::Stragglers(running.len()))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers exit on their own once the queue drains.
        self.sender.lock().take();
    }
}
