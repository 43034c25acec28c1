//! # Core Module
//!
//! The duplicate-detection engine.
//!
//! ## Modules
//! - `hasher` - Decodes images and computes perceptual hashes
//! - `cache` - Persists hashes and deduplicates concurrent computation
//! - `pairs` - Streams the N-squared comparison schedule
//! - `differ` - Worker pool comparing hashes under a threshold
//! - `engine` - Wires everything behind construct/run/shutdown
//! - `cancel` - Cooperative cancellation primitive

pub mod cache;
pub mod cancel;
pub mod differ;
pub mod engine;
pub mod hasher;
pub mod pairs;

// Re-export commonly used types
pub use cache::HashCache;
pub use cancel::{cancel_channel, CancelToken, Canceller};
pub use differ::DuplicatePair;
pub use engine::{Engine, EngineConfig};
pub use hasher::{HashKind, ImageRecord};
pub use pairs::Pair;
