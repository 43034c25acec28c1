//! # Image Dup Finder
//!
//! Finds near-duplicate images by comparing perceptual hashes pairwise.
//!
//! ## How It Works
//! - Every image gets a 64-bit DCT perceptual hash, computed once and
//!   persisted in a JSON cache across runs
//! - A generator streams the N-squared cross-product of the file list
//!   (optionally skipping symmetric repeats) to a fixed worker pool
//! - Workers flag every pair within a Hamming-distance threshold,
//!   naming the bigger file and the smaller deletion candidate
//!
//! Results arrive on a channel as they are found; a separate
//! verification step lets a human confirm deletions.
//!
//! ## Architecture
//! - `core` - The detection engine (cache, pair generator, differ pool)
//! - `metrics` - Prometheus counters and gauges, per-instance registries
//! - `report` - The JSON delete log written for human verification
//! - `error` - Error types

pub mod core;
pub mod error;
pub mod metrics;
pub mod report;

// Re-export commonly used types at the crate root
pub use crate::core::{Engine, EngineConfig};
pub use crate::error::{ImageDupError, Result};
