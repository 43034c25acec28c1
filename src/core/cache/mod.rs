//! # Cache Module
//!
//! Persistent perceptual-hash cache shared by all differ workers.
//!
//! The cache is two things at once: a JSON-backed key-value store mapping
//! absolute filenames to their 64-bit hashes, and an in-process
//! deduplicating computation layer. Hashing dominates a run's wall-clock
//! time, and across the N-squared pair stream every file shows up in
//! 2(N-1) comparisons, so caching per file turns O(N^2) decodes into O(N).
//!
//! ## At-most-once computation
//! Concurrent lookups of the same missing file must not both decode it.
//! The table is a `RwLock<HashMap>`; alongside it sits a pending map whose
//! per-key slots carry a `Condvar`. The first caller to miss becomes the
//! computing owner; later callers find the slot and block on it, then
//! receive the owner's result. Exactly one decode and one miss count per
//! filename per process run.
//!
//! ## Persisted format
//! A single JSON object `{ "<filename>": <u64 hash>, ... }`. Dimensions
//! are not persisted; entries restored from disk are completed lazily by
//! [`HashCache::get`] reading just the image header.

use crate::core::hasher::{self, HashKind, ImageRecord, PerceptualHasher};
use crate::error::{CacheError, HashError};
use prometheus::{IntCounter, Opts, Registry};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, RwLock};

/// Concurrent filename -> [`ImageRecord`] cache with JSON persistence
pub struct HashCache {
    entries: RwLock<HashMap<PathBuf, ImageRecord>>,
    pending: Mutex<HashMap<PathBuf, Arc<Pending>>>,
    store_path: PathBuf,
    hasher: PerceptualHasher,
    hits: IntCounter,
    misses: IntCounter,
    registry: Registry,
}

/// Slot for one in-flight hash computation
#[derive(Default)]
struct Pending {
    slot: Mutex<Option<std::result::Result<ImageRecord, HashError>>>,
    ready: Condvar,
}

impl Pending {
    fn publish(&self, result: std::result::Result<ImageRecord, HashError>) {
        let mut slot = self.slot.lock().expect("pending slot lock poisoned");
        *slot = Some(result);
        self.ready.notify_all();
    }

    fn wait(&self) -> std::result::Result<ImageRecord, HashError> {
        let mut slot = self.slot.lock().expect("pending slot lock poisoned");
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            slot = self.ready.wait(slot).expect("pending slot lock poisoned");
        }
    }
}

impl HashCache {
    /// Load the cache from `path`, or start empty if the file is absent
    /// or zero-length.
    ///
    /// Registers the `image_hash_cache_hits` / `image_hash_cache_misses`
    /// counters under `namespace` in the given registry.
    pub fn load(
        path: impl Into<PathBuf>,
        namespace: &str,
        expected_capacity: usize,
        registry: &Registry,
    ) -> std::result::Result<Self, CacheError> {
        let store_path = path.into();

        let hits = IntCounter::with_opts(
            Opts::new("image_hash_cache_hits", "Image hash cache hits.").namespace(namespace),
        )?;
        let misses = IntCounter::with_opts(
            Opts::new("image_hash_cache_misses", "Image hash cache misses.").namespace(namespace),
        )?;
        registry.register(Box::new(hits.clone()))?;
        registry.register(Box::new(misses.clone()))?;

        let mut entries = HashMap::with_capacity(expected_capacity);

        match File::open(&store_path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CacheError::Open { path: store_path, source: e });
            }
            Ok(file) => {
                let metadata = file.metadata().map_err(|e| CacheError::Stat {
                    path: store_path.clone(),
                    source: e,
                })?;
                if metadata.len() > 0 {
                    let stored: HashMap<String, u64> =
                        serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                            CacheError::Decode { path: store_path.clone(), source: e }
                        })?;
                    for (filename, hash) in stored {
                        // dimensions are backfilled on first lookup
                        entries.insert(
                            PathBuf::from(filename),
                            ImageRecord { hash, kind: HashKind::Perception, width: 0, height: 0 },
                        );
                    }
                }
            }
        }

        Ok(Self {
            entries: RwLock::new(entries),
            pending: Mutex::new(HashMap::new()),
            store_path,
            hasher: PerceptualHasher::new(),
            hits,
            misses,
            registry: registry.clone(),
        })
    }

    /// Return the record for `path`, computing and inserting it on a miss.
    ///
    /// A concurrent miss on the same path blocks until the first caller
    /// publishes its result, then returns the same record as a hit.
    pub fn get(&self, path: &Path) -> std::result::Result<ImageRecord, HashError> {
        let cached = {
            let entries = self.entries.read().expect("cache table lock poisoned");
            entries.get(path).copied()
        };
        if let Some(record) = cached {
            let record = if record.needs_dimensions() {
                self.backfill_dimensions(path, record)?
            } else {
                record
            };
            self.hits.inc();
            return Ok(record);
        }

        let (slot, is_owner) = {
            let mut pending = self.pending.lock().expect("pending map lock poisoned");
            match pending.get(path) {
                Some(slot) => (Arc::clone(slot), false),
                None => {
                    let slot = Arc::new(Pending::default());
                    pending.insert(path.to_path_buf(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        };

        if !is_owner {
            let result = slot.wait();
            if result.is_ok() {
                self.hits.inc();
            }
            return result;
        }

        self.misses.inc();
        let result = self.hasher.hash_file(path);

        if let Ok(record) = &result {
            let mut entries = self.entries.write().expect("cache table lock poisoned");
            entries.insert(path.to_path_buf(), *record);
        }
        slot.publish(result.clone());
        // errors are not cached; a later caller may retry the file
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .remove(path);

        result
    }

    /// Complete a restored entry whose dimensions were not persisted.
    ///
    /// Two threads racing here both store identical values, so the
    /// overlapping write is benign.
    fn backfill_dimensions(
        &self,
        path: &Path,
        record: ImageRecord,
    ) -> std::result::Result<ImageRecord, HashError> {
        let (width, height) = hasher::read_dimensions(path)?;
        let updated = ImageRecord { width, height, ..record };

        let mut entries = self.entries.write().expect("cache table lock poisoned");
        entries.insert(path.to_path_buf(), updated);
        Ok(updated)
    }

    /// Write the mapping back to the path given at load time
    pub fn persist(&self) -> std::result::Result<(), CacheError> {
        let file = File::create(&self.store_path).map_err(|e| CacheError::Create {
            path: self.store_path.clone(),
            source: e,
        })?;

        let stored: HashMap<String, u64> = {
            let entries = self.entries.read().expect("cache table lock poisoned");
            entries
                .iter()
                .map(|(path, record)| (path.display().to_string(), record.hash))
                .collect()
        };

        serde_json::to_writer(&file, &stored).map_err(|e| CacheError::Encode {
            path: self.store_path.clone(),
            source: e,
        })
    }

    /// Entry count and a cheap size estimate in bytes
    pub fn stats(&self) -> (usize, usize) {
        let entries = self.entries.read().expect("cache table lock poisoned");
        let count = entries.len();
        (count, count * 48)
    }

    /// Remove this cache's counters from the registry
    pub fn unregister(&self) {
        let _ = self.registry.unregister(Box::new(self.hits.clone()));
        let _ = self.registry.unregister(Box::new(self.misses.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::Arc;
    use std::thread;

    fn write_gradient_jpeg(dir: &Path, name: &str, offset: u8) -> PathBuf {
        let img = RgbImage::from_fn(64, 64, |x, y| {
            let v = ((x * 3 + y) as u8).saturating_add(offset);
            Rgb([v, v, v])
        });
        let path = dir.join(name);
        DynamicImage::ImageRgb8(img).save(&path).unwrap();
        path
    }

    fn new_cache(store: &Path) -> HashCache {
        HashCache::load(store, "test", 8, &Registry::new()).unwrap()
    }

    #[test]
    fn missing_file_yields_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = new_cache(&dir.path().join("absent.json"));
        assert_eq!(cache.stats(), (0, 0));
    }

    #[test]
    fn corrupt_cache_file_fails_to_decode() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("cache.json");
        std::fs::write(&store, "{ definitely not json").unwrap();

        let result = HashCache::load(&store, "test", 8, &Registry::new());
        assert!(matches!(result, Err(CacheError::Decode { .. })));
    }

    #[test]
    fn miss_then_hit_updates_counters() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_gradient_jpeg(dir.path(), "a.jpg", 0);
        let cache = new_cache(&dir.path().join("cache.json"));

        let first = cache.get(&image).unwrap();
        let second = cache.get(&image).unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.misses.get(), 1);
        assert_eq!(cache.hits.get(), 1);
    }

    #[test]
    fn concurrent_lookups_compute_once() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_gradient_jpeg(dir.path(), "a.jpg", 0);
        let cache = Arc::new(new_cache(&dir.path().join("cache.json")));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let image = image.clone();
                thread::spawn(move || cache.get(&image).unwrap())
            })
            .collect();

        let records: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(records.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.misses.get(), 1);
        assert_eq!(cache.hits.get(), 7);
    }

    #[test]
    fn persist_and_reload_round_trips_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("cache.json");
        let image_a = write_gradient_jpeg(dir.path(), "a.jpg", 0);
        let image_b = write_gradient_jpeg(dir.path(), "b.jpg", 40);

        let cache = new_cache(&store);
        let record_a = cache.get(&image_a).unwrap();
        let record_b = cache.get(&image_b).unwrap();
        cache.persist().unwrap();

        let reloaded = new_cache(&store);
        assert_eq!(reloaded.stats().0, 2);

        // restored entries are hash-only until looked up again
        let restored_a = reloaded.get(&image_a).unwrap();
        let restored_b = reloaded.get(&image_b).unwrap();
        assert_eq!(restored_a.hash, record_a.hash);
        assert_eq!(restored_b.hash, record_b.hash);
        assert_eq!((restored_a.width, restored_a.height), (64, 64));
        assert_eq!(reloaded.misses.get(), 0);
        assert_eq!(reloaded.hits.get(), 2);
    }

    #[test]
    fn corrupt_image_errors_and_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.jpg");
        std::fs::write(&bogus, b"not a jpeg").unwrap();
        let cache = new_cache(&dir.path().join("cache.json"));

        assert!(cache.get(&bogus).is_err());
        assert!(cache.get(&bogus).is_err());
        assert_eq!(cache.stats().0, 0);
        assert_eq!(cache.misses.get(), 2);
    }

    #[test]
    fn size_estimate_scales_with_count() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_gradient_jpeg(dir.path(), "a.jpg", 0);
        let cache = new_cache(&dir.path().join("cache.json"));

        cache.get(&image).unwrap();

        assert_eq!(cache.stats(), (1, 48));
    }
}
