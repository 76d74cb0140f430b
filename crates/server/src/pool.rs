//! A bounded worker pool.
//!
//! Tasks queue on a bounded channel drained by a fixed set of worker
//! threads. When the queue is full the submitting thread runs the task
//! itself, so accept-loop pressure turns into backpressure instead of an
//! unbounded queue.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender, TrySendError};
use log::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(workers: usize, queue: usize) -> WorkerPool {
        assert!(workers > 0);
        let (tx, rx) = bounded::<Job>(queue);
        let workers = (0..workers)
            .map(|i| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("worker-{i}"))
                    .spawn(move || {
                        for job in rx {
                            job();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        WorkerPool {
            tx: Some(tx),
            workers,
        }
    }

    /// Runs `job` on a worker, or on the calling thread when the queue is
    /// full.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        let tx = self.tx.as_ref().expect("pool is live until dropped");
        match tx.try_send(Box::new(job)) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                debug!("worker queue full, running task on caller");
                job();
            }
            Err(TrySendError::Disconnected(_)) => unreachable!("workers outlive the sender"),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets the workers drain and exit.
        self.tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
