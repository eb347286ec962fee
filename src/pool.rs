//! Buffer reuse and bounded worker pools.
//!
//! The event loop thread never blocks on CPU-bound work: request
//! parsing and handler dispatch are submitted to one of two bounded
//! [`WorkerPool`]s (read-parse, write-dispatch). `core` threads are
//! always running; `submit` rejects synchronously, invoking the
//! caller's callback, once the bounded queue is full rather than
//! growing it or blocking the submitter.

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// A reusable stack of fixed-capacity buffers, avoiding per-connection
/// reallocation of read accumulators and response buffers.
pub(crate) struct BufferPool {
    capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn acquire(&self) -> Vec<u8> {
        self.free
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.capacity))
    }

    /// Returns `buf` to the pool, dropping it instead if it grew far
    /// beyond the pool's nominal capacity.
    pub(crate) fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        if buf.capacity() <= self.capacity * 4 {
            self.free.lock().unwrap().push(buf);
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A bounded worker pool. `core` threads are spawned up front and stay
/// alive for the pool's lifetime. When in-flight work outgrows the
/// live thread count, `submit` spawns overflow threads up to `max`;
/// an overflow thread that sits idle past [`WorkerPool::OVERFLOW_IDLE`]
/// exits instead of parking forever, so the pool settles back down to
/// `core` once load subsides. `submit` never blocks: once the bounded
/// channel is full even at `max`, it calls `on_reject` synchronously on
/// the caller's thread instead of queuing.
pub(crate) struct WorkerPool {
    name: &'static str,
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    active: Arc<AtomicUsize>,
    thread_count: Arc<AtomicUsize>,
    max: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    const OVERFLOW_IDLE: Duration = Duration::from_secs(30);

    pub(crate) fn new(name: &'static str, core: usize, max: usize, queue_capacity: usize) -> Self {
        let core = core.max(1);
        let max = max.max(core);
        let (sender, receiver) = bounded::<Job>(queue_capacity);
        let mut handles = Vec::with_capacity(core);

        for idx in 0..core {
            handles.push(Self::spawn_core(name, idx, receiver.clone()));
        }

        Self {
            name,
            sender,
            receiver,
            active: Arc::new(AtomicUsize::new(0)),
            thread_count: Arc::new(AtomicUsize::new(core)),
            max,
            handles: Mutex::new(handles),
        }
    }

    fn spawn_core(name: &'static str, idx: usize, receiver: Receiver<Job>) -> JoinHandle<()> {
        thread::Builder::new()
            .name(format!("{name}-{idx}"))
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            })
            .expect("failed to spawn worker thread")
    }

    /// Spawns one thread beyond `core`, counted against `max`. Exits
    /// once it has waited [`Self::OVERFLOW_IDLE`] without a job.
    fn spawn_overflow(&self) {
        let receiver = self.receiver.clone();
        let thread_count = self.thread_count.clone();
        let idx = self.thread_count.fetch_add(1, Ordering::Relaxed);
        let name = self.name;

        let handle = thread::Builder::new()
            .name(format!("{name}-overflow-{idx}"))
            .spawn(move || {
                loop {
                    match receiver.recv_timeout(Self::OVERFLOW_IDLE) {
                        Ok(job) => job(),
                        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                thread_count.fetch_sub(1, Ordering::Relaxed);
            })
            .expect("failed to spawn worker thread");

        self.handles.lock().unwrap().push(handle);
    }

    /// Submits `job` for execution on a worker thread. If the bounded
    /// queue is full, runs `on_reject` synchronously on the calling
    /// thread instead -- this is the pool's backpressure mechanism.
    pub(crate) fn submit<F>(&self, job: F, on_reject: impl FnOnce())
    where
        F: FnOnce() + Send + 'static,
    {
        if self.in_flight() >= self.thread_count.load(Ordering::Relaxed)
            && self.thread_count.load(Ordering::Relaxed) < self.max
        {
            self.spawn_overflow();
        }

        self.active.fetch_add(1, Ordering::Relaxed);
        let active = self.active.clone();
        let wrapped: Job = Box::new(move || {
            job();
            active.fetch_sub(1, Ordering::Relaxed);
        });

        match self.sender.try_send(wrapped) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.active.fetch_sub(1, Ordering::Relaxed);
                on_reject();
            }
        }
    }

    /// Number of jobs submitted but not yet finished running.
    pub(crate) fn in_flight(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Stops accepting new work (by dropping the sender) and waits up
    /// to `grace` for in-flight jobs to finish.
    pub(crate) fn shutdown(self, grace: Duration) {
        let deadline = Instant::now() + grace;
        drop(self.sender);

        while self.active.load(Ordering::Relaxed) > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        for handle in self.handles.into_inner().unwrap() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize as StdAtomicUsize, Ordering as StdOrdering},
        Arc,
    };

    #[test]
    fn buffer_pool_reuses_released_buffers() {
        let pool = BufferPool::new(64);
        let buf = pool.acquire();
        let cap = buf.capacity();
        pool.release(buf);

        let reused = pool.acquire();
        assert_eq!(reused.capacity(), cap);
    }

    #[test]
    fn buffer_pool_drops_oversized_buffers() {
        let pool = BufferPool::new(4);
        let mut buf = pool.acquire();
        buf.reserve(1024);
        pool.release(buf);

        let fresh = pool.acquire();
        assert!(fresh.capacity() < 1024);
    }

    #[test]
    fn worker_pool_runs_submitted_jobs() {
        let pool = WorkerPool::new("test", 2, 2, 16);
        let counter = Arc::new(StdAtomicUsize::new(0));

        for _ in 0..10 {
            let counter = counter.clone();
            pool.submit(
                move || {
                    counter.fetch_add(1, StdOrdering::SeqCst);
                },
                || panic!("unexpected rejection"),
            );
        }

        pool.shutdown(Duration::from_secs(2));
        assert_eq!(counter.load(StdOrdering::SeqCst), 10);
    }

    #[test]
    fn worker_pool_rejects_synchronously_once_queue_is_full() {
        let pool = WorkerPool::new("test-reject", 1, 1, 1);
        let rejected = Arc::new(StdAtomicUsize::new(0));
        let (tx, rx) = bounded::<()>(0);

        // Occupy the single worker so the queue backs up.
        pool.submit(
            move || {
                let _ = rx.recv();
            },
            || panic!("unexpected rejection"),
        );

        for _ in 0..8 {
            let rejected = rejected.clone();
            pool.submit(
                || {},
                move || {
                    rejected.fetch_add(1, StdOrdering::SeqCst);
                },
            );
        }

        let _ = tx.send(());
        pool.shutdown(Duration::from_secs(2));
        assert!(rejected.load(StdOrdering::SeqCst) > 0);
    }

    #[test]
    fn worker_pool_with_max_above_core_still_drains_all_jobs() {
        let pool = WorkerPool::new("test-overflow", 1, 4, 16);
        let completed = Arc::new(StdAtomicUsize::new(0));

        for _ in 0..20 {
            let completed = completed.clone();
            pool.submit(
                move || {
                    completed.fetch_add(1, StdOrdering::SeqCst);
                },
                || panic!("unexpected rejection"),
            );
        }

        pool.shutdown(Duration::from_secs(2));
        assert_eq!(completed.load(StdOrdering::SeqCst), 20);
    }
}
