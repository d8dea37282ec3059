//! Bounded worker pool for request handlers.
//!
//! A fixed set of threads drains a bounded `crossbeam-channel` queue. When the
//! queue is full, [`WorkerPool::try_execute`] hands the job back so the caller
//! can refuse the stream instead of queueing without limit.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, TrySendError, bounded};
use tracing::{error, trace};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize, queue_depth: usize) -> io::Result<Self> {
        let (tx, rx) = bounded::<Job>(queue_depth);
        let workers = (0..threads.max(1))
            .map(|i| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("h2-worker-{i}"))
                    .spawn(move || {
                        for job in rx.iter() {
                            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                                error!(worker = i, "job panicked");
                            }
                        }
                        trace!(worker = i, "worker exiting");
                    })
            })
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self { tx: Some(tx), workers })
    }

    /// Queue `job`, or give it back if the queue is full.
    pub fn try_execute(&self, job: Job) -> Result<(), Job> {
        let Some(tx) = &self.tx else {
            return Err(job);
        };
        tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) | TrySendError::Disconnected(job) => job,
        })
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.tx.as_ref().map_or(0, Sender::len)
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets workers finish the queue and exit.
        self.tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
