//! # Pairs Module
//!
//! Enumerates the N-squared cross-product of the input file list and
//! streams it to the differ workers over a bounded channel.
//!
//! With symmetric dedup enabled, a [`PairFilter`] suppresses the mirror
//! of every emitted pair: once (a, b) has gone out, (b, a) is skipped.
//! That halves the comparisons at the cost of one filter entry per
//! emitted pair, which is why it is optional.

use crate::core::cancel::CancelToken;
use crate::metrics::EngineMetrics;
use crossbeam_channel::{select, Sender};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Two distinct files scheduled for comparison, with their positions in
/// the input list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    /// Index of `one` in the file list
    pub i: usize,
    /// Index of `two` in the file list
    pub j: usize,
    /// First file of the pair
    pub one: PathBuf,
    /// Second file of the pair
    pub two: PathBuf,
}

/// Set of unordered pairs already emitted, keyed by concatenated
/// filenames.
///
/// The generator probes with `"{one} {two}"` and records the reverse key
/// `"{two} {one}"` on emission, so the later mirror ordering probes
/// straight into a hit. Grows monotonically until the enumeration ends;
/// the stats publisher reads its footprint concurrently, hence the
/// `Mutex` around it in [`crate::core::engine`].
pub struct PairFilter {
    seen: HashSet<String>,
    bytes: usize,
}

impl PairFilter {
    /// Create a filter sized for roughly `capacity` recorded pairs
    pub fn with_capacity(capacity: usize) -> Self {
        Self { seen: HashSet::with_capacity(capacity), bytes: 0 }
    }

    fn key(one: &Path, two: &Path) -> String {
        format!("{} {}", one.display(), two.display())
    }

    /// Has this unordered pair already been emitted (in either order)?
    pub fn contains(&self, one: &Path, two: &Path) -> bool {
        self.seen.contains(&Self::key(one, two))
    }

    /// Record the reverse ordering of an emitted pair
    pub fn record_reverse(&mut self, one: &Path, two: &Path) {
        let key = Self::key(two, one);
        self.bytes += key.len();
        self.seen.insert(key);
    }

    /// Number of recorded pairs
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True when nothing has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Accumulated key bytes, a cheap footprint estimate
    pub fn approx_bytes(&self) -> usize {
        self.bytes
    }
}

/// Streams ordered (or symmetric-deduplicated) pairs to the workers
pub struct PairGenerator {
    files: Vec<PathBuf>,
    tx: Sender<Pair>,
    filter: Option<Arc<Mutex<PairFilter>>>,
    metrics: EngineMetrics,
}

impl PairGenerator {
    /// Build a generator over `files`, emitting on `tx`. Passing a filter
    /// enables symmetric dedup.
    pub fn new(
        files: Vec<PathBuf>,
        tx: Sender<Pair>,
        filter: Option<Arc<Mutex<PairFilter>>>,
        metrics: EngineMetrics,
    ) -> Self {
        Self { files, tx, filter, metrics }
    }

    /// Enumerate row-major over the file list until done or cancelled.
    ///
    /// The pair channel closes when this returns (the generator owns the
    /// only sender), so workers see a clean end-of-input either way.
    pub fn run(self, cancel: &CancelToken) {
        let n = self.files.len() as i64;
        let total = if self.filter.is_some() { (n * n - n) / 2 } else { n * n - n };
        self.metrics.total_comparisons.set(total);

        for (i, one) in self.files.iter().enumerate() {
            for (j, two) in self.files.iter().enumerate() {
                if i == j {
                    continue;
                }

                if let Some(filter) = &self.filter {
                    let already_seen = {
                        let filter = filter.lock().expect("pair filter lock poisoned");
                        filter.contains(one, two)
                    };
                    if already_seen {
                        self.metrics.file_map_hits.inc();
                        continue;
                    }
                }

                let pair = Pair { i, j, one: one.clone(), two: two.clone() };
                select! {
                    recv(cancel.receiver()) -> _ => return,
                    send(self.tx, pair) -> sent => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }

                self.metrics.pair_total.inc();
                if let Some(filter) = &self.filter {
                    let mut filter = filter.lock().expect("pair filter lock poisoned");
                    filter.record_reverse(one, two);
                    self.metrics.file_map_misses.inc();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cancel::cancel_channel;
    use crossbeam_channel::bounded;
    use prometheus::Registry;
    use std::thread;

    fn test_metrics(dedup: bool) -> EngineMetrics {
        EngineMetrics::register("test", dedup, &Registry::new()).unwrap()
    }

    fn files(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn ordered_mode_covers_the_full_cross_product() {
        let (tx, rx) = bounded(64);
        let metrics = test_metrics(false);
        let (_canceller, token) = cancel_channel();

        PairGenerator::new(files(&["a", "b", "c"]), tx, None, metrics.clone()).run(&token);

        let emitted: Vec<Pair> = rx.iter().collect();
        assert_eq!(emitted.len(), 6);
        for pair in &emitted {
            assert_ne!(pair.one, pair.two);
        }
        assert_eq!(metrics.pair_total.get(), 6);
        assert_eq!(metrics.total_comparisons.get(), 6);
    }

    #[test]
    fn dedup_mode_emits_one_representative_per_unordered_pair() {
        let (tx, rx) = bounded(64);
        let metrics = test_metrics(true);
        let filter = Arc::new(Mutex::new(PairFilter::with_capacity(3)));
        let (_canceller, token) = cancel_channel();

        PairGenerator::new(files(&["a", "b", "c"]), tx, Some(Arc::clone(&filter)), metrics.clone())
            .run(&token);

        let emitted: Vec<Pair> = rx.iter().collect();
        assert_eq!(emitted.len(), 3);

        let mut unordered: Vec<(PathBuf, PathBuf)> = emitted
            .iter()
            .map(|p| {
                if p.one < p.two {
                    (p.one.clone(), p.two.clone())
                } else {
                    (p.two.clone(), p.one.clone())
                }
            })
            .collect();
        unordered.sort();
        unordered.dedup();
        assert_eq!(unordered.len(), 3);

        assert_eq!(metrics.pair_total.get(), 3);
        assert_eq!(metrics.file_map_misses.get(), 3);
        assert_eq!(metrics.file_map_hits.get(), 3);
        assert_eq!(metrics.total_comparisons.get(), 3);
        assert_eq!(filter.lock().unwrap().len(), 3);
    }

    #[test]
    fn cancellation_closes_the_pair_channel() {
        // rendezvous channel with no receiver: the generator blocks on its
        // first send until cancellation wakes it
        let (tx, rx) = bounded(0);
        let metrics = test_metrics(false);
        let (canceller, token) = cancel_channel();

        let generator = PairGenerator::new(files(&["a", "b", "c"]), tx, None, metrics);
        let handle = thread::spawn(move || generator.run(&token));

        canceller.cancel();
        handle.join().unwrap();

        assert!(rx.recv().is_err());
    }

    #[test]
    fn filter_tracks_entries_and_bytes() {
        let mut filter = PairFilter::with_capacity(4);
        assert!(filter.is_empty());

        filter.record_reverse(Path::new("a.jpg"), Path::new("b.jpg"));

        assert_eq!(filter.len(), 1);
        assert!(filter.approx_bytes() >= "b.jpg a.jpg".len());
        assert!(filter.contains(Path::new("b.jpg"), Path::new("a.jpg")));
        assert!(!filter.contains(Path::new("a.jpg"), Path::new("b.jpg")));
    }

    #[test]
    fn single_file_emits_nothing() {
        let (tx, rx) = bounded(4);
        let metrics = test_metrics(false);
        let (_canceller, token) = cancel_channel();

        PairGenerator::new(files(&["a"]), tx, None, metrics.clone()).run(&token);

        assert!(rx.iter().next().is_none());
        assert_eq!(metrics.pair_total.get(), 0);
        assert_eq!(metrics.total_comparisons.get(), 0);
    }
}
