//! Worker pool for asynchronous loads

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Outstanding job counter
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

/// Decrements the pending counter even if the job panics
struct JobGuard<'a>(&'a Pending);

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.0.done();
    }
}

/// Fixed set of named worker threads fed from one queue
///
/// With zero threads the pool is deferred: jobs wait in the queue until
/// [`WorkerPool::run_pending`] executes them on the calling thread.
pub(crate) struct WorkerPool {
    sender: Option<Sender<Job>>,
    receiver: Receiver<Job>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<Pending>,
}

impl WorkerPool {
    pub(crate) fn new(threads: usize) -> Self {
        let (sender, receiver) = unbounded::<Job>();
        let pending = Arc::new(Pending::default());
        let mut workers = Vec::with_capacity(threads);

        for index in 0..threads {
            let rx = receiver.clone();
            let pending = Arc::clone(&pending);
            let spawned = thread::Builder::new()
                .name(format!("lode-asset-worker-{}", index))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        let _guard = JobGuard(&pending);
                        job();
                    }
                });

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => log::error!("Failed to start asset worker {}: {}", index, e),
            }
        }

        if threads > 0 {
            if workers.is_empty() {
                log::warn!("No asset workers running, async loads run on update()");
            } else {
                log::debug!("Started {} asset worker(s)", workers.len());
            }
        }

        Self {
            sender: Some(sender),
            receiver,
            workers,
            pending,
        }
    }

    pub(crate) fn is_deferred(&self) -> bool {
        self.workers.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn thread_count(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        let Some(sender) = &self.sender else {
            return;
        };
        self.pending.add();
        if sender.send(Box::new(job)).is_err() {
            self.pending.done();
        }
    }

    /// Run queued jobs on the calling thread; returns how many ran
    ///
    /// Only does work in deferred mode.
    pub(crate) fn run_pending(&self) -> usize {
        if !self.is_deferred() {
            return 0;
        }
        let mut ran = 0;
        while let Ok(job) = self.receiver.try_recv() {
            let _guard = JobGuard(&self.pending);
            job();
            ran += 1;
        }
        ran
    }

    /// Block until every submitted job has finished
    pub(crate) fn wait_idle(&self) {
        if self.is_deferred() {
            self.run_pending();
        } else {
            self.pending.wait_idle();
        }
    }

    pub(crate) fn pending(&self) -> usize {
        *self.pending.count.lock()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Disconnect the queue so workers exit once it is drained
        self.sender.take();
        while self.receiver.try_recv().is_ok() {
            self.pending.done();
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("Asset worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_deferred_pool_runs_on_demand() {
        let pool = WorkerPool::new(0);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = counter.clone();
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert!(pool.is_deferred());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(pool.pending(), 3);

        assert_eq!(pool.run_pending(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn test_threaded_pool_wait_idle() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..16 {
            let counter = counter.clone();
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
        assert_eq!(pool.thread_count(), 2);
    }
}
