use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single dedicated background thread draining a FIFO queue of jobs
/// (spec §5's "connection work threads": bounce handlers and watermark-
/// driven suspension requests run here, never on the network thread).
/// The source spawns a fresh thread per suspend/resume crossing
/// (`SPEC_FULL.md` §9's redesign note); this is the re-architecture —
/// one long-lived worker, submissions processed strictly in the order
/// they were made, so two toggles for the same session can never be
/// observed out of order.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(name: String) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            })
            .expect("spawn connection work thread");

        WorkerPool {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Enqueues `job` for the worker thread. Silently dropped if the pool
    /// has already been closed — matches how a closed session's dispatcher
    /// drops further deliveries rather than erroring.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(Box::new(job));
        }
    }

    /// Drains and runs whatever is already queued, then joins the thread.
    pub fn close(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}
