//! # Engine Module
//!
//! Wires the cache, pair generator, and differ pool together behind a
//! single construct/run/shutdown contract.
//!
//! ## Call protocol
//! ```rust,ignore
//! let registry = prometheus::Registry::new();
//! let mut engine = Engine::new(config, &registry)?;
//! let (canceller, token) = cancel_channel();
//! let (results, errors) = engine.run(&token, files);
//! // drain both channels until they close, or call canceller.cancel()
//! engine.shutdown()?;
//! ```
//!
//! The caller must drain both channels (or cancel) before calling
//! [`Engine::shutdown`]; shutdown joins the worker threads, and a worker
//! blocked on an undrained result channel never exits.

use crate::core::cache::HashCache;
use crate::core::cancel::CancelToken;
use crate::core::differ::{DiffPool, DuplicatePair};
use crate::core::pairs::{Pair, PairFilter, PairGenerator};
use crate::error::{DiffError, EngineError};
use crate::metrics::EngineMetrics;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use prometheus::Registry;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Engine construction parameters
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Prefix for every metric this engine registers
    pub namespace: String,
    /// Where the hash cache is loaded from and persisted to
    pub cache_path: PathBuf,
    /// Differ workers to run; clamped to `[1, cores - 1]`
    pub num_workers: usize,
    /// Number of files the run will cover; sizes the cache and filter
    pub num_files: usize,
    /// Hamming-distance threshold in `[0, 64]`
    pub threshold: u32,
    /// Skip the mirror ordering of every emitted pair
    pub dedup_pairs: bool,
}

/// The duplicate-detection engine: cache + generator + differ pool
pub struct Engine {
    cache: Arc<HashCache>,
    pool: DiffPool,
    metrics: EngineMetrics,
    filter: Option<Arc<Mutex<PairFilter>>>,
    pair_tx: Option<Sender<Pair>>,
    generator_handle: Option<JoinHandle<()>>,
    publisher_stop: Option<Sender<()>>,
    publisher_handle: Option<JoinHandle<()>>,
}

impl Engine {
    /// Set up the cache, the pool, and the stats publisher.
    ///
    /// Fails with [`EngineError::InsufficientFiles`] when there is
    /// nothing to compare.
    pub fn new(config: EngineConfig, registry: &Registry) -> Result<Engine, EngineError> {
        if config.num_files < 2 {
            return Err(EngineError::InsufficientFiles { count: config.num_files });
        }

        let metrics = EngineMetrics::register(&config.namespace, config.dedup_pairs, registry)?;
        let cache = match HashCache::load(
            &config.cache_path,
            &config.namespace,
            config.num_files,
            registry,
        ) {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                metrics.unregister();
                return Err(e.into());
            }
        };
        info!(
            entries = cache.stats().0,
            cache = %config.cache_path.display(),
            "loaded image hash cache"
        );

        let (pair_tx, pair_rx) = bounded(0);
        let pool = match DiffPool::new(
            config.num_workers,
            config.threshold,
            pair_rx,
            Arc::clone(&cache),
            &config.namespace,
            registry,
        ) {
            Ok(pool) => pool,
            Err(e) => {
                metrics.unregister();
                cache.unregister();
                return Err(e.into());
            }
        };

        let filter = config
            .dedup_pairs
            .then(|| Arc::new(Mutex::new(PairFilter::with_capacity(config.num_files))));

        let (stop_tx, stop_rx) = bounded(0);
        let publisher_handle = {
            let cache = Arc::clone(&cache);
            let filter = filter.clone();
            let metrics = metrics.clone();
            thread::spawn(move || publish_stats(&cache, filter.as_deref(), &metrics, &stop_rx))
        };

        Ok(Engine {
            cache,
            pool,
            metrics,
            filter,
            pair_tx: Some(pair_tx),
            generator_handle: None,
            publisher_stop: Some(stop_tx),
            publisher_handle: Some(publisher_handle),
        })
    }

    /// Start the differ workers and feed them pairs.
    ///
    /// Returns the pool's result and error channels; both close once the
    /// enumeration completes (and results are drained) or cancellation
    /// fires. May be called at most once.
    pub fn run(
        &mut self,
        cancel: &CancelToken,
        files: Vec<PathBuf>,
    ) -> (Receiver<DuplicatePair>, Receiver<DiffError>) {
        let pair_tx = self.pair_tx.take().expect("Engine::run may only be called once");
        info!(files = files.len(), workers = self.pool.num_workers(), "starting diff run");

        let generator =
            PairGenerator::new(files, pair_tx, self.filter.clone(), self.metrics.clone());
        let generator_cancel = cancel.clone();
        self.generator_handle = Some(thread::spawn(move || generator.run(&generator_cancel)));

        self.pool.run(cancel)
    }

    /// Stop the stats publisher, join the workers, unregister every
    /// metric, and persist the cache. First error wins.
    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        self.stop_publisher();
        if let Some(handle) = self.generator_handle.take() {
            let _ = handle.join();
        }
        self.pool.shutdown();
        self.metrics.unregister();

        debug!(entries = self.cache.stats().0, "persisting image hash cache");
        let persisted = self.cache.persist();
        self.cache.unregister();
        persisted?;
        Ok(())
    }

    fn stop_publisher(&mut self) {
        drop(self.publisher_stop.take());
        if let Some(handle) = self.publisher_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // harmless after shutdown; stops the ticker if shutdown was skipped
        self.stop_publisher();
    }
}

/// Publish cache and filter sizes every [`STATS_INTERVAL`] until the
/// engine shuts down.
fn publish_stats(
    cache: &HashCache,
    filter: Option<&Mutex<PairFilter>>,
    metrics: &EngineMetrics,
    stop: &Receiver<()>,
) {
    let ticker = tick(STATS_INTERVAL);
    loop {
        select! {
            recv(stop) -> _ => return,
            recv(ticker) -> _ => {
                let (count, bytes) = cache.stats();
                metrics.image_cache_num_images.set(count as i64);
                metrics.image_cache_size_bytes.set(bytes as i64);

                if let Some(filter) = filter {
                    let filter = filter.lock().expect("pair filter lock poisoned");
                    metrics.file_map_entries.set(filter.len() as i64);
                    metrics.file_map_bytes.set(filter.approx_bytes() as i64);
                }
            }
        }
    }
}
