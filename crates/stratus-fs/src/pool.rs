//! Worker pool for request-consuming closures.
//!
//! Each worker thread owns exactly one reusable [`Request`]; submitted
//! closures run on the next idle worker with that worker's request. A
//! supervisor thread polls every worker's transfer watch so deadlines fire
//! even while a transfer is blocked in the HTTP client. Cancellation is
//! sticky: after a canceled run the worker discards its request and builds a
//! fresh one before accepting further work.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error};

use stratus_core::{Context, Error, Result};

use crate::request::{Request, TransferWatch};

const SUPERVISOR_INTERVAL: Duration = Duration::from_millis(500);

type Job = Box<dyn FnOnce(&mut Request) + Send + 'static>;

/// Fixed-size pool of worker threads, each owning one request.
pub struct WorkerPool {
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
    supervisor: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn the workers and the timeout supervisor.
    #[must_use]
    pub fn new(ctx: Context) -> Arc<Self> {
        let worker_count = ctx.config().pool_workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let shutdown = Arc::new(AtomicBool::new(false));
        let watches: Arc<Mutex<HashMap<usize, Arc<TransferWatch>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let ctx = ctx.clone();
            let rx = rx.clone();
            let watches = watches.clone();
            workers.push(thread::spawn(move || {
                worker_loop(ctx, index, &rx, &watches);
            }));
        }

        let supervisor = {
            let shutdown = shutdown.clone();
            thread::spawn(move || {
                while !shutdown.load(Ordering::SeqCst) {
                    for watch in watches.lock().values() {
                        watch.check_timeout();
                    }
                    thread::sleep(SUPERVISOR_INTERVAL);
                }
            })
        };

        Arc::new(Self {
            tx: Some(tx),
            workers,
            supervisor: Some(supervisor),
            shutdown,
        })
    }

    /// Run `f` on the next idle worker, passing that worker's request, and
    /// return its result.
    ///
    /// # Errors
    ///
    /// `f`'s own error, or `Transport` if the worker died before replying.
    pub fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Request) -> Result<T> + Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::channel();

        let job: Job = Box::new(move |req| {
            let _ = result_tx.send(f(req));
        });

        self.tx
            .as_ref()
            .expect("pool sender lives until drop")
            .send(job)
            .map_err(|_| Error::InvalidArgument("worker pool is shut down"))?;

        result_rx
            .recv()
            .map_err(|_| Error::Transport("worker exited before completing request".to_owned()))?
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        drop(self.tx.take());

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(supervisor) = self.supervisor.take() {
            let _ = supervisor.join();
        }
    }
}

fn worker_loop(
    ctx: Context,
    index: usize,
    rx: &Mutex<mpsc::Receiver<Job>>,
    watches: &Mutex<HashMap<usize, Arc<TransferWatch>>>,
) {
    let mut request = match Request::new(ctx.clone()) {
        Ok(request) => request,
        Err(e) => {
            error!(worker = index, error = %e, "failed to build worker request");
            return;
        }
    };
    watches.lock().insert(index, request.watch());

    loop {
        // Holding the receiver lock while blocked only serializes job
        // pickup; execution runs unlocked.
        let job = rx.lock().recv();

        let Ok(job) = job else {
            break;
        };

        job(&mut request);

        if request.is_canceled() {
            debug!(worker = index, "request canceled, rebuilding");
            match Request::new(ctx.clone()) {
                Ok(fresh) => {
                    watches.lock().insert(index, fresh.watch());
                    request = fresh;
                }
                Err(e) => {
                    error!(worker = index, error = %e, "failed to rebuild worker request");
                    break;
                }
            }
        }
    }

    watches.lock().remove(&index);
}
