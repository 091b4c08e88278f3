//! Bounded worker pool for deferred object operations.
//!
//! A fixed set of worker threads drains a bounded queue of closures.
//! Submitting blocks while the queue is full; shutdown wakes everyone,
//! lets queued work drain, and joins the workers.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::Mutex;
use std::thread::JoinHandle;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

const DEFAULT_QUEUE_DEPTH: usize = 10;
const DEFAULT_WORKERS: usize = 3;

pub struct TaskPool {
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskPool {
    /// Zero for either parameter selects the default.
    pub fn new(queue_depth: usize, worker_count: usize) -> crate::error::Result<Self> {
        let depth = if queue_depth == 0 {
            DEFAULT_QUEUE_DEPTH
        } else {
            queue_depth
        };
        let worker_count = if worker_count == 0 {
            DEFAULT_WORKERS
        } else {
            worker_count
        };
        let (sender, receiver) = bounded::<Task>(depth);
        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("resona-worker-{i}"))
                .spawn(move || worker_loop(receiver))
                .map_err(|_| crate::error::ResonaError::ResourceError)?;
            workers.push(handle);
        }
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    /// Enqueue a task, blocking while the queue is full. Returns false once
    /// shutdown has begun.
    pub fn submit(&self, task: Task) -> bool {
        let sender = self.sender.lock().unwrap().clone();
        match sender {
            Some(tx) => tx.send(task).is_ok(),
            None => false,
        }
    }

    /// Stop accepting work, drain what was queued, and join every worker.
    /// Idempotent.
    pub fn shutdown(&self) {
        drop(self.sender.lock().unwrap().take());
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in workers {
            if handle.join().is_err() {
                log::error!("task pool worker panicked");
            }
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: Receiver<Task>) {
    log::debug!("worker started");
    while let Ok(task) = receiver.recv() {
        task();
    }
    log::debug!("worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_submitted_tasks_all_run() {
        let pool = TaskPool::new(4, 2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = counter.clone();
            assert!(pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })));
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = TaskPool::new(0, 0).unwrap();
        pool.shutdown();
        assert!(!pool.submit(Box::new(|| {})));
    }

    #[test]
    fn test_shutdown_with_blocked_submitter() {
        let pool = Arc::new(TaskPool::new(1, 1).unwrap());
        // occupy the single worker and fill the queue
        pool.submit(Box::new(|| std::thread::sleep(Duration::from_millis(50))));
        pool.submit(Box::new(|| {}));
        let submitter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.submit(Box::new(|| {})))
        };
        std::thread::sleep(Duration::from_millis(10));
        pool.shutdown();
        // the blocked submit either drained into the pool or observed shutdown;
        // either way it must have returned
        let _ = submitter.join().unwrap();
    }
}
