//! Background worker pool
//!
//! Runs blocking decode/parse work off the main thread. Callers get an
//! `AsyncOp` handle that can be polled each frame or waited on; the owning
//! resource's `assure()` gate does the blocking wait.

use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Mutex;
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A handle to a pending background operation
pub struct AsyncOp<T> {
    receiver: Receiver<T>,
    result: Option<T>,
}

impl<T> AsyncOp<T> {
    fn from_receiver(receiver: Receiver<T>) -> Self {
        Self {
            receiver,
            result: None,
        }
    }

    /// Wrap an already-computed value, for synchronous load paths
    pub fn ready(value: T) -> Self {
        let (sender, receiver) = channel();
        let _ = sender.send(value);
        Self::from_receiver(receiver)
    }

    /// Check if the operation has completed (polls the channel)
    pub fn is_complete(&mut self) -> bool {
        if self.result.is_some() {
            return true;
        }
        match self.receiver.try_recv() {
            Ok(result) => {
                self.result = Some(result);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => true,
        }
    }

    /// Block until the worker delivers the result, then take it.
    /// Returns `None` only if the worker thread died before sending.
    pub fn wait(mut self) -> Option<T> {
        if self.result.is_none() {
            self.result = self.receiver.recv().ok();
        }
        self.result
    }
}

/// Fixed-size pool of worker threads fed through a single job channel
pub struct WorkerPool {
    sender: Mutex<Sender<Job>>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let (sender, receiver) = channel::<Job>();
        let receiver = std::sync::Arc::new(Mutex::new(receiver));
        for _ in 0..workers.max(1) {
            let receiver = receiver.clone();
            thread::spawn(move || loop {
                let job = {
                    let guard = match receiver.lock() {
                        Ok(guard) => guard,
                        Err(_) => return,
                    };
                    guard.recv()
                };
                match job {
                    Ok(job) => job(),
                    Err(_) => return,
                }
            });
        }
        Self {
            sender: Mutex::new(sender),
        }
    }

    /// Submit a closure to the pool, returning a pollable/waitable handle
    pub fn submit<T, F>(&self, work: F) -> AsyncOp<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = channel();
        let job: Job = Box::new(move || {
            let _ = sender.send(work());
        });
        if let Ok(guard) = self.sender.lock() {
            let _ = guard.send(job);
        }
        AsyncOp::from_receiver(receiver)
    }
}
