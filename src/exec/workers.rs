use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::trace;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of worker threads shared by every dependent join in a
/// query. Independent-side harvests for sibling joins run here so a slow
/// source never serializes unrelated sub-plans.
pub struct WorkerPool {
    // Mutex-wrapped so the pool can be shared across threads; mpsc senders
    // are Send but not Sync.
    sender: Option<Mutex<Sender<Job>>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let (sender, receiver) = channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut handles = Vec::with_capacity(size.max(1));
        for id in 0..size.max(1) {
            let receiver = Arc::clone(&receiver);
            handles.push(std::thread::spawn(move || loop {
                let job = {
                    let guard = receiver.lock().unwrap_or_else(|p| p.into_inner());
                    guard.recv()
                };
                match job {
                    Ok(job) => {
                        trace!("worker {} picked up a job", id);
                        job();
                    }
                    // Channel closed, the pool is shutting down.
                    Err(_) => break,
                }
            }));
        }
        Self { sender: Some(Mutex::new(sender)), handles }
    }

    /// Queue a job. Jobs run in submission order as workers free up.
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(sender) = &self.sender {
            let sender = sender.lock().unwrap_or_else(|p| p.into_inner());
            // Receivers outlive the sender until Drop, so this cannot fail.
            let _ = sender.send(Box::new(job));
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;

    use super::*;

    #[test]
    fn test_runs_jobs_on_all_workers() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = channel();
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            });
        }
        for _ in 0..16 {
            rx.recv().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_drop_joins_workers() {
        let pool = WorkerPool::new(2);
        let (tx, rx) = channel();
        pool.spawn(move || {
            let _ = tx.send(());
        });
        rx.recv().unwrap();
        drop(pool);
    }
}
