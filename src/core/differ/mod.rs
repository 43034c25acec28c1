//! # Differ Module
//!
//! Fixed-size worker pool that consumes pairs, looks both hashes up
//! through the cache, and emits the pairs whose Hamming distance falls
//! within the threshold.
//!
//! Decoding is CPU-bound and allocation-heavy, so the pool is clamped to
//! at most `cores - 1` workers, leaving a core for the generator and I/O.
//!
//! Channel ownership: every worker holds its own clones of the result and
//! error senders, so the fan-in receivers handed to the caller close
//! exactly when the last worker exits. Nothing is ever closed twice.

use crate::core::cache::HashCache;
use crate::core::cancel::CancelToken;
use crate::core::pairs::Pair;
use crate::error::DiffError;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use prometheus::{IntCounter, IntGauge, Opts, Registry};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Two images judged to be the same, ordered by pixel area.
///
/// `small` is the deletion candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicatePair {
    /// The file with the larger pixel area
    pub big: PathBuf,
    /// The file with the smaller pixel area
    pub small: PathBuf,
    /// Pixel area of `big`
    pub big_area: u64,
    /// Pixel area of `small`
    pub small_area: u64,
}

/// Worker pool comparing hashed images under a Hamming-distance threshold
pub struct DiffPool {
    num_workers: usize,
    threshold: u32,
    input: Receiver<Pair>,
    cache: Arc<HashCache>,
    diff_time: IntGauge,
    comparisons_completed: IntCounter,
    registry: Registry,
    handles: Vec<JoinHandle<()>>,
}

impl DiffPool {
    /// Construct the pool; [`DiffPool::run`] must be called to start it.
    ///
    /// `num_workers` outside `[1, cores - 1]` is clamped to 1.
    pub fn new(
        num_workers: usize,
        threshold: u32,
        input: Receiver<Pair>,
        cache: Arc<HashCache>,
        namespace: &str,
        registry: &Registry,
    ) -> Result<Self, prometheus::Error> {
        let cores = num_cpus::get();
        let num_workers = if num_workers == 0 || num_workers > cores.saturating_sub(1) {
            1
        } else {
            num_workers
        };

        let diff_time = IntGauge::with_opts(
            Opts::new("diff_time_nano", "How long it takes to diff two images, in nanoseconds.")
                .namespace(namespace),
        )?;
        let comparisons_completed = IntCounter::with_opts(
            Opts::new("comparisons_completed", "Comparisons finished so far.").namespace(namespace),
        )?;
        registry.register(Box::new(diff_time.clone()))?;
        registry.register(Box::new(comparisons_completed.clone()))?;

        Ok(Self {
            num_workers,
            threshold,
            input,
            cache,
            diff_time,
            comparisons_completed,
            registry: registry.clone(),
            handles: Vec::new(),
        })
    }

    /// The clamped worker count
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Spawn the workers and hand back their fanned-in output channels.
    ///
    /// Both channels close once every worker has exited, which happens
    /// when the pair channel closes or cancellation fires.
    pub fn run(&mut self, cancel: &CancelToken) -> (Receiver<DuplicatePair>, Receiver<DiffError>) {
        let (result_tx, result_rx) = bounded(self.num_workers);
        let (error_tx, error_rx) = bounded(self.num_workers);

        for _ in 0..self.num_workers {
            let worker = Worker {
                input: self.input.clone(),
                results: result_tx.clone(),
                errors: error_tx.clone(),
                cache: Arc::clone(&self.cache),
                threshold: self.threshold,
                diff_time: self.diff_time.clone(),
                comparisons_completed: self.comparisons_completed.clone(),
                cancel: cancel.clone(),
            };
            self.handles.push(thread::spawn(move || worker.run()));
        }

        (result_rx, error_rx)
    }

    /// Join the workers and unregister the pool's metrics
    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        let _ = self.registry.unregister(Box::new(self.diff_time.clone()));
        let _ = self
            .registry
            .unregister(Box::new(self.comparisons_completed.clone()));
    }
}

struct Worker {
    input: Receiver<Pair>,
    results: Sender<DuplicatePair>,
    errors: Sender<DiffError>,
    cache: Arc<HashCache>,
    threshold: u32,
    diff_time: IntGauge,
    comparisons_completed: IntCounter,
    cancel: CancelToken,
}

impl Worker {
    fn run(self) {
        loop {
            let pair = select! {
                recv(self.cancel.receiver()) -> _ => return,
                recv(self.input) -> msg => match msg {
                    Ok(pair) => pair,
                    Err(_) => return,
                },
            };
            self.process(pair);
        }
    }

    /// Compare one pair. A failed hash lookup is reported and skipped;
    /// the error path does not count as a completed comparison.
    fn process(&self, pair: Pair) {
        let start = Instant::now();

        let one = match self.cache.get(&pair.one) {
            Ok(record) => record,
            Err(source) => {
                self.send_error(DiffError { path: pair.one, source });
                return;
            }
        };
        let two = match self.cache.get(&pair.two) {
            Ok(record) => record,
            Err(source) => {
                self.send_error(DiffError { path: pair.two, source });
                return;
            }
        };

        let distance = one.distance(&two);
        if distance <= self.threshold {
            let duplicate = if one.area() >= two.area() {
                DuplicatePair {
                    big: pair.one,
                    small: pair.two,
                    big_area: one.area(),
                    small_area: two.area(),
                }
            } else {
                DuplicatePair {
                    big: pair.two,
                    small: pair.one,
                    big_area: two.area(),
                    small_area: one.area(),
                }
            };
            select! {
                recv(self.cancel.receiver()) -> _ => return,
                send(self.results, duplicate) -> _ => {}
            }
        }

        self.diff_time.set(start.elapsed().as_nanos() as i64);
        self.comparisons_completed.inc();
    }

    fn send_error(&self, error: DiffError) {
        select! {
            recv(self.cancel.receiver()) -> _ => {}
            send(self.errors, error) -> _ => {}
        }
    }
}
