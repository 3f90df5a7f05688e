//! Fixed-size worker pool over an unbounded queue. Connection handling is
//! bounded by the worker count; anything past that waits in the channel.
//! Shutdown abandons queued jobs rather than running them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use log::error;
use parking_lot::Mutex;

use crate::error::ServerError;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawns `workers` threads sharing one job queue. A failed spawn is
    /// logged and the pool runs with fewer workers.
    pub fn new(workers: usize) -> WorkerPool {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let shutdown = Arc::new(AtomicBool::new(false));
        for n in 0..workers {
            let receiver = Arc::clone(&receiver);
            let shutdown = Arc::clone(&shutdown);
            let spawned = thread::Builder::new()
                .name(format!("uiprobe-worker-{n}"))
                .spawn(move || worker_loop(&receiver, &shutdown));
            if let Err(e) = spawned {
                error!("failed to spawn worker {n}: {e}");
            }
        }
        WorkerPool {
            sender: Some(sender),
            shutdown,
        }
    }

    /// Queues a job. Fails once the pool has shut down; the rejected job is
    /// dropped with the error, so a job owning a connection closes it.
    pub fn execute<F>(&self, job: F) -> Result<(), ServerError>
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.sender {
            Some(sender) => sender
                .send(Box::new(job))
                .map_err(|_| ServerError::PoolClosed),
            None => Err(ServerError::PoolClosed),
        }
    }

    /// The flag raised by [`shutdown_now`](Self::shutdown_now). Long-running
    /// jobs watch it to wind down instead of finishing their work.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Tears the pool down without draining: jobs still in the queue are
    /// dropped unrun, idle workers exit, and a busy worker exits after the
    /// job it is already running.
    pub fn shutdown_now(self) {
        drop(self);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Disconnects the channel; workers see the flag before any job
        // they dequeue afterwards.
        self.sender.take();
    }
}

fn worker_loop(receiver: &Mutex<Receiver<Job>>, shutdown: &AtomicBool) {
    loop {
        // The guard is dropped before the job runs, so workers execute in
        // parallel and only dequeueing is serialized.
        let job = receiver.lock().recv();
        match job {
            Ok(job) => {
                if shutdown.load(Ordering::SeqCst) {
                    drop(job);
                    continue;
                }
                job();
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_runs_all_jobs() {
        let pool = WorkerPool::new(4);
        let (done_tx, done_rx) = mpsc::channel();
        for _ in 0..8 {
            let done_tx = done_tx.clone();
            pool.execute(move || {
                done_tx.send(()).unwrap();
            })
            .unwrap();
        }
        for _ in 0..8 {
            done_rx
                .recv_timeout(Duration::from_secs(2))
                .expect("job did not run");
        }
    }

    #[test]
    fn test_parallelism_capped_at_pool_size() {
        let pool = WorkerPool::new(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = mpsc::channel();
        for _ in 0..6 {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            let done_tx = done_tx.clone();
            pool.execute(move || {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(40));
                current.fetch_sub(1, Ordering::SeqCst);
                done_tx.send(()).unwrap();
            })
            .unwrap();
        }
        for _ in 0..6 {
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_shutdown_abandons_queued_jobs() {
        let pool = WorkerPool::new(1);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (busy_tx, busy_rx) = mpsc::channel::<()>();
        let second_ran = Arc::new(AtomicBool::new(false));

        pool.execute(move || {
            busy_tx.send(()).unwrap();
            // Holds the only worker until the gate opens.
            let _ = gate_rx.recv();
        })
        .unwrap();
        busy_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        {
            let second_ran = Arc::clone(&second_ran);
            pool.execute(move || {
                second_ran.store(true, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown_now();
        gate_tx.send(()).unwrap();

        // The worker drains the queue after its job; the queued closure
        // must be dropped, not run.
        thread::sleep(Duration::from_millis(100));
        assert!(!second_ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_running_job_sees_shutdown_flag() {
        let pool = WorkerPool::new(1);
        let flag = pool.shutdown_flag();
        let (busy_tx, busy_rx) = mpsc::channel::<()>();
        let (seen_tx, seen_rx) = mpsc::channel::<()>();
        pool.execute(move || {
            busy_tx.send(()).unwrap();
            while !flag.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            seen_tx.send(()).unwrap();
        })
        .unwrap();
        busy_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        pool.shutdown_now();
        seen_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("running job never saw the shutdown flag");
    }

    #[test]
    fn test_abandoned_job_closure_is_dropped() {
        struct NotifyOnDrop(Sender<()>);
        impl Drop for NotifyOnDrop {
            fn drop(&mut self) {
                let _ = self.0.send(());
            }
        }

        let pool = WorkerPool::new(1);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        pool.execute(move || {
            let _ = gate_rx.recv();
        })
        .unwrap();

        let (drop_tx, drop_rx) = mpsc::channel();
        let witness = NotifyOnDrop(drop_tx);
        pool.execute(move || {
            let _ = &witness;
        })
        .unwrap();

        pool.shutdown_now();
        gate_tx.send(()).unwrap();
        // Abandoned by the draining worker, which drops the closure and
        // with it the witness.
        drop_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("queued job was not dropped");
    }
}
