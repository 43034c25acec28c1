//! # Metrics Module
//!
//! Orchestrator-level prometheus metrics.
//!
//! The engine takes a `prometheus::Registry` as a constructor parameter
//! instead of registering into a process-global default. That allows
//! several engine instances in one process and deterministic cleanup in
//! tests; the caller decides whether and how to expose the registry.
//!
//! The cache and the differ pool register their own metrics the same way;
//! this struct carries the counters and gauges owned by the orchestrator
//! and the pair generator.

use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Counters and gauges published by the engine and pair generator.
///
/// Handles are cheap clones of the registered collectors; incrementing a
/// clone updates the registry's view.
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    dedup_pairs: bool,
    /// Pairs emitted to the workers
    pub pair_total: IntCounter,
    /// Planned comparison count for this run
    pub total_comparisons: IntGauge,
    /// Total collector pause time; a Rust process has none, so this stays 0
    pub gc_time_nano: IntGauge,
    /// Number of entries in the hash cache
    pub image_cache_num_images: IntGauge,
    /// Approximate hash cache footprint in bytes
    pub image_cache_size_bytes: IntGauge,
    /// Symmetric-filter probes that found the pair already recorded
    pub file_map_hits: IntCounter,
    /// Symmetric-filter probes that recorded a new pair
    pub file_map_misses: IntCounter,
    /// Entries in the symmetric-pair filter
    pub file_map_entries: IntGauge,
    /// Approximate symmetric-pair filter footprint in bytes
    pub file_map_bytes: IntGauge,
}

impl EngineMetrics {
    /// Create the metric set under `namespace` and register it.
    ///
    /// The `file_map_*` series only exist when symmetric dedup is enabled.
    pub fn register(
        namespace: &str,
        dedup_pairs: bool,
        registry: &Registry,
    ) -> Result<Self, prometheus::Error> {
        let pair_total = IntCounter::with_opts(
            Opts::new("pair_total", "How many pairs we read.").namespace(namespace),
        )?;
        let total_comparisons = IntGauge::with_opts(
            Opts::new("total_comparisons", "Planned comparisons for this run.")
                .namespace(namespace),
        )?;
        let gc_time_nano = IntGauge::with_opts(
            Opts::new("gc_time_nano", "Total GC pause time, in nanoseconds.")
                .namespace(namespace),
        )?;
        let image_cache_num_images = IntGauge::with_opts(
            Opts::new("image_cache_num_images", "Images held in the hash cache.")
                .namespace(namespace),
        )?;
        let image_cache_size_bytes = IntGauge::with_opts(
            Opts::new("image_cache_size_bytes", "Approximate hash cache size in bytes.")
                .namespace(namespace),
        )?;
        let file_map_hits = IntCounter::with_opts(
            Opts::new("file_map_hits", "Pairs skipped because the reverse order was seen.")
                .namespace(namespace),
        )?;
        let file_map_misses = IntCounter::with_opts(
            Opts::new("file_map_misses", "Pairs recorded in the symmetric filter.")
                .namespace(namespace),
        )?;
        let file_map_entries = IntGauge::with_opts(
            Opts::new("file_map_entries", "Entries in the symmetric-pair filter.")
                .namespace(namespace),
        )?;
        let file_map_bytes = IntGauge::with_opts(
            Opts::new("file_map_bytes", "Approximate symmetric-pair filter size in bytes.")
                .namespace(namespace),
        )?;

        registry.register(Box::new(pair_total.clone()))?;
        registry.register(Box::new(total_comparisons.clone()))?;
        registry.register(Box::new(gc_time_nano.clone()))?;
        registry.register(Box::new(image_cache_num_images.clone()))?;
        registry.register(Box::new(image_cache_size_bytes.clone()))?;
        if dedup_pairs {
            registry.register(Box::new(file_map_hits.clone()))?;
            registry.register(Box::new(file_map_misses.clone()))?;
            registry.register(Box::new(file_map_entries.clone()))?;
            registry.register(Box::new(file_map_bytes.clone()))?;
        }

        Ok(Self {
            registry: registry.clone(),
            dedup_pairs,
            pair_total,
            total_comparisons,
            gc_time_nano,
            image_cache_num_images,
            image_cache_size_bytes,
            file_map_hits,
            file_map_misses,
            file_map_entries,
            file_map_bytes,
        })
    }

    /// Remove every metric this set registered
    pub fn unregister(&self) {
        let _ = self.registry.unregister(Box::new(self.pair_total.clone()));
        let _ = self.registry.unregister(Box::new(self.total_comparisons.clone()));
        let _ = self.registry.unregister(Box::new(self.gc_time_nano.clone()));
        let _ = self
            .registry
            .unregister(Box::new(self.image_cache_num_images.clone()));
        let _ = self
            .registry
            .unregister(Box::new(self.image_cache_size_bytes.clone()));
        if self.dedup_pairs {
            let _ = self.registry.unregister(Box::new(self.file_map_hits.clone()));
            let _ = self.registry.unregister(Box::new(self.file_map_misses.clone()));
            let _ = self.registry.unregister(Box::new(self.file_map_entries.clone()));
            let _ = self.registry.unregister(Box::new(self.file_map_bytes.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric_names(registry: &Registry) -> Vec<String> {
        registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect()
    }

    #[test]
    fn registers_namespaced_metrics() {
        let registry = Registry::new();
        let metrics = EngineMetrics::register("imagedup", true, &registry).unwrap();

        metrics.pair_total.inc();
        let names = metric_names(&registry);

        assert!(names.contains(&"imagedup_pair_total".to_string()));
        assert!(names.contains(&"imagedup_file_map_hits".to_string()));
        assert!(names.contains(&"imagedup_gc_time_nano".to_string()));
    }

    #[test]
    fn file_map_metrics_absent_without_dedup() {
        let registry = Registry::new();
        let _metrics = EngineMetrics::register("imagedup", false, &registry).unwrap();

        let names = metric_names(&registry);
        assert!(names.contains(&"imagedup_pair_total".to_string()));
        assert!(!names.iter().any(|n| n.starts_with("imagedup_file_map")));
    }

    #[test]
    fn unregister_removes_everything() {
        let registry = Registry::new();
        let metrics = EngineMetrics::register("imagedup", true, &registry).unwrap();

        metrics.unregister();

        assert!(registry.gather().is_empty());
    }

    #[test]
    fn second_engine_needs_its_own_namespace() {
        let registry = Registry::new();
        let _first = EngineMetrics::register("one", false, &registry).unwrap();
        assert!(EngineMetrics::register("one", false, &registry).is_err());
        assert!(EngineMetrics::register("two", false, &registry).is_ok());
    }
}
