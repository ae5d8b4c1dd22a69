//! Moves blocking driver calls off the caller's thread and delivers their
//! completions back onto it.

use log::debug;
use std::{
    panic::{AssertUnwindSafe, catch_unwind, resume_unwind},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc::{Receiver, Sender, TryRecvError, channel},
    },
    thread::{self, JoinHandle},
};

/// A unit of work executed on a worker thread. Produces the completion which
/// is to be run back on the caller's thread.
type Work = Box<dyn FnOnce() -> Completion + Send>;

/// Runs on the caller's thread once the work producing it has finished.
type Completion = Box<dyn FnOnce() + Send>;

/// Schedules blocking work onto a pool of worker threads and runs each work
/// item's completion back on the thread owning the dispatcher.
///
/// The owning thread is cooperative: [`Dispatcher::submit`] returns
/// immediately, and completions only ever run inside
/// [`Dispatcher::poll_completions`] or [`Dispatcher::wait_completion`]. They
/// therefore never run concurrently with each other, or with any other code
/// of the owning thread.
///
/// Every submitted work item gets its completion delivered exactly once,
/// whether the work succeeded or recorded a driver error. Completions are
/// delivered in the order the work items finished, which is not necessarily
/// submission order. There is no way to cancel or time out work once
/// submitted; it runs until the underlying call returns. A panic inside work
/// or completion is resumed on the owning thread rather than swallowed.
pub struct Dispatcher {
    work: Option<Sender<Work>>,
    completions: Receiver<Completion>,
    /// Submitted work items whose completion has not run yet.
    pending: AtomicUsize,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Creates a dispatcher running work on `num_workers` dedicated threads.
    pub fn new(num_workers: usize) -> Self {
        assert!(num_workers > 0, "Dispatcher needs at least one worker.");
        debug!("Spawning {num_workers} worker threads.");

        let (work_tx, work_rx) = channel::<Work>();
        let (done_tx, done_rx) = channel::<Completion>();
        let work_rx = Arc::new(Mutex::new(work_rx));

        let workers = (0..num_workers)
            .map(|index| {
                let work_rx = Arc::clone(&work_rx);
                let done_tx = done_tx.clone();
                thread::Builder::new()
                    .name(format!("odbc-dispatch-{index}"))
                    .spawn(move || {
                        loop {
                            // Holding the lock while waiting is fine: only
                            // one idle worker at a time may take the next
                            // work item anyway.
                            let work = { work_rx.lock().unwrap().recv() };
                            let Ok(work) = work else {
                                break;
                            };
                            // A panic in work must not kill the worker
                            // silently. It is resumed on the owning thread,
                            // where it counts as the one completion of this
                            // work item.
                            let completion: Completion = match catch_unwind(AssertUnwindSafe(work))
                            {
                                Ok(completion) => completion,
                                Err(payload) => Box::new(move || resume_unwind(payload)),
                            };
                            if done_tx.send(completion).is_err() {
                                break;
                            }
                        }
                    })
                    .expect("Failed to spawn dispatcher worker thread.")
            })
            .collect();

        Self {
            work: Some(work_tx),
            completions: done_rx,
            pending: AtomicUsize::new(0),
            workers,
        }
    }

    /// Runs `work` on a worker thread, then `completion` with its output on
    /// the owning thread, during one of the next calls to
    /// [`Self::poll_completions`] or [`Self::wait_completion`].
    pub fn submit<T, W, C>(&self, work: W, completion: C)
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::Relaxed);
        let work: Work = Box::new(move || {
            let output = work();
            Box::new(move || completion(output))
        });
        self.work
            .as_ref()
            .expect("Work queue outlives the dispatcher.")
            .send(work)
            .expect("Dispatcher worker threads have terminated.");
    }

    /// Runs every completion which is ready right now on the calling thread.
    /// Does not block. Returns the number of completions run.
    pub fn poll_completions(&self) -> usize {
        let mut count = 0;
        loop {
            match self.completions.try_recv() {
                Ok(completion) => {
                    self.run_completion(completion);
                    count += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break count,
            }
        }
    }

    /// Blocks until the next completion is ready and runs it on the calling
    /// thread. Returns `false` without blocking if no work is in flight.
    pub fn wait_completion(&self) -> bool {
        if self.pending.load(Ordering::Relaxed) == 0 {
            return false;
        }
        match self.completions.recv() {
            Ok(completion) => {
                self.run_completion(completion);
                true
            }
            Err(_) => false,
        }
    }

    /// Number of submitted work items whose completion has not run yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    fn run_completion(&self, completion: Completion) {
        // Count the completion as delivered before running it. Should the
        // callback panic, the panic propagates to the caller while the
        // completion still counts as spent.
        self.pending.fetch_sub(1, Ordering::Relaxed);
        completion();
    }
}

impl Drop for Dispatcher {
    /// Stops accepting work, lets in-flight work finish and joins the worker
    /// threads. Completions which have not been polled are dropped without
    /// running; resources they captured are released by dropping them.
    fn drop(&mut self) {
        drop(self.work.take());
        for worker in self.workers.drain(..) {
            if worker.join().is_err() && !thread::panicking() {
                panic!("Dispatcher worker thread panicked.")
            }
        }
    }
}
