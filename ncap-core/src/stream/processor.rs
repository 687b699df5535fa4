//! Stream finalizer pool.
//!
//! A fixed set of workers, each fed by its own bounded channel, dispatched
//! round-robin. Client-side readers get their conversation persisted,
//! server-side readers are merged and yield the service banner. A
//! pool-wide wait counter is the shutdown barrier: `shutdown` blocks until
//! every dispatched stream was handled, then terminates the workers.
//!
//! Round-robin instead of a shared queue keeps the dispatch critical
//! section at a cursor increment and preserves per-stream FIFO order.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{bounded, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::metrics::{direction, STREAM_PROCESSING_TIME};

use super::reader::StreamReader;
use super::save::StreamSaver;

/// Counter of dispatched-but-unfinished streams.
#[derive(Default)]
struct Pending {
    count: Mutex<u64>,
    zero: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    fn wait_zero(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.zero.wait(&mut count);
        }
    }
}

/// Progress shared with the workers for the shutdown status line.
struct Progress {
    done: Mutex<usize>,
    total: Mutex<usize>,
    quiet: bool,
}

impl Progress {
    fn bump(&self) {
        let mut done = self.done.lock();
        *done += 1;
        if !self.quiet {
            let total = *self.total.lock();
            eprint!(
                "\rprocessing remaining open TCP streams... ({}/{})",
                *done, total
            );
        }
    }
}

pub struct StreamProcessor {
    /// Emptied on shutdown; dropping the senders ends the worker loops.
    workers: Mutex<Vec<Sender<Arc<StreamReader>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next: Mutex<usize>,
    pending: Arc<Pending>,
    progress: Arc<Progress>,
}

impl StreamProcessor {
    /// Spawn `num_workers` workers, each with a channel of `buffer_size`
    /// slots.
    pub fn new(num_workers: usize, buffer_size: usize, saver: StreamSaver, quiet: bool) -> Self {
        let saver = Arc::new(saver);
        let pending = Arc::new(Pending::default());
        let progress = Arc::new(Progress {
            done: Mutex::new(0),
            total: Mutex::new(0),
            quiet,
        });

        let mut workers = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let (tx, rx) = bounded::<Arc<StreamReader>>(buffer_size);
            handles.push(spawn_worker(
                rx,
                Arc::clone(&saver),
                Arc::clone(&pending),
                Arc::clone(&progress),
            ));
            workers.push(tx);
        }

        Self {
            workers: Mutex::new(workers),
            handles: Mutex::new(handles),
            next: Mutex::new(0),
            pending,
            progress,
        }
    }

    /// Announce how many streams the shutdown flush will dispatch, for the
    /// progress line.
    pub fn set_total(&self, total: usize) {
        *self.progress.total.lock() = total;
    }

    /// Dispatch a stream to exactly one worker, round-robin.
    pub fn handle_stream(&self, stream: Arc<StreamReader>) {
        self.pending.add();

        let sender = {
            let workers = self.workers.lock();
            if workers.is_empty() {
                self.pending.done();
                return;
            }
            let mut next = self.next.lock();
            let sender = workers[*next].clone();
            *next = (*next + 1) % workers.len();
            sender
        };

        // The worker decrements the counter, including for saved streams
        // it skips.
        if sender.send(stream).is_err() {
            self.pending.done();
        }
    }

    /// Wait for the counter to reach zero, then terminate all workers.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.pending.wait_zero();

        self.workers.lock().clear();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn spawn_worker(
    rx: crossbeam_channel::Receiver<Arc<StreamReader>>,
    saver: Arc<StreamSaver>,
    pending: Arc<Pending>,
    progress: Arc<Progress>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in rx {
            // Streams persisted when their connection closed are
            // acknowledged without work.
            if stream.saved() {
                pending.done();
                continue;
            }

            let start = Instant::now();
            if stream.is_client() {
                if let Err(e) = saver.save_conversation(&stream) {
                    warn!(ident = stream.ident(), "failed to save conversation: {e}");
                }
                STREAM_PROCESSING_TIME
                    .with_label_values(&[direction::CLIENT_TO_SERVER])
                    .set(start.elapsed().as_nanos() as f64);
            } else {
                stream.sort_and_merge_fragments();
                if let Err(e) = saver.save_banner(&stream) {
                    warn!(ident = stream.ident(), "failed to save banner: {e}");
                }
                STREAM_PROCESSING_TIME
                    .with_label_values(&[direction::SERVER_TO_CLIENT])
                    .set(start.elapsed().as_nanos() as f64);
            }

            progress.bump();
            pending.done();
        }
    })
}
