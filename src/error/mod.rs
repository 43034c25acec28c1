//! # Error Module
//!
//! Error types for the duplicate-image engine.
//!
//! ## Design Principles
//! - **Never panic** on user data - return errors instead
//! - **Include context** - every error names the file it concerns
//! - **Non-fatal per-file failures** - a single bad image must not stop a run

use std::path::PathBuf;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum ImageDupError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("hashing error: {0}")]
    Hash(#[from] HashError),

    #[error("report error: {0}")]
    Report(#[from] std::io::Error),
}

/// Errors raised while loading or persisting the hash cache file.
///
/// All of these are fatal: a cache that cannot be read at startup or
/// written at shutdown leaves the next run without its hashes.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to open cache file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stat cache file {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode cache file {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to create cache file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode cache file {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to register cache metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Errors raised while hashing a single image.
///
/// These are per-file and non-fatal to a run; they travel over the error
/// channel tagged with the offending path. The variants carry string
/// reasons rather than source errors so a failure can be cloned to every
/// thread waiting on the same in-flight computation.
#[derive(Error, Debug, Clone)]
pub enum HashError {
    #[error("failed to open image {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("failed to decode image {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("hash computation failed for {path}: {reason}")]
    Hash { path: PathBuf, reason: String },

    #[error("failed to read image header of {path}: {reason}")]
    HeaderDecode { path: PathBuf, reason: String },
}

impl HashError {
    /// The file this error concerns
    pub fn path(&self) -> &PathBuf {
        match self {
            HashError::Open { path, .. }
            | HashError::Decode { path, .. }
            | HashError::Hash { path, .. }
            | HashError::HeaderDecode { path, .. } => path,
        }
    }
}

/// A comparison that could not be carried out because one side of the
/// pair failed to hash. Reported on the error channel; the pool keeps
/// running.
#[derive(Error, Debug, Clone)]
#[error("hash lookup failed for image {path}: {source}")]
pub struct DiffError {
    /// The file whose hash lookup failed
    pub path: PathBuf,
    #[source]
    pub source: HashError,
}

/// Errors raised while constructing or shutting down the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("insufficient files to process: only {count} files provided")]
    InsufficientFiles { count: usize },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("failed to register engine metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, ImageDupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_error_includes_path() {
        let error = HashError::Decode {
            path: PathBuf::from("/photos/broken.jpg"),
            reason: "invalid JPEG".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("/photos/broken.jpg"));
        assert!(message.contains("invalid JPEG"));
    }

    #[test]
    fn hash_error_path_accessor_covers_all_variants() {
        let path = PathBuf::from("/photos/a.jpg");
        let errors = [
            HashError::Open { path: path.clone(), reason: String::new() },
            HashError::Decode { path: path.clone(), reason: String::new() },
            HashError::Hash { path: path.clone(), reason: String::new() },
            HashError::HeaderDecode { path: path.clone(), reason: String::new() },
        ];
        for error in &errors {
            assert_eq!(error.path(), &path);
        }
    }

    #[test]
    fn diff_error_names_the_failed_file() {
        let error = DiffError {
            path: PathBuf::from("/photos/corrupt.jpg"),
            source: HashError::Decode {
                path: PathBuf::from("/photos/corrupt.jpg"),
                reason: "not a jpeg".to_string(),
            },
        };
        assert!(error.to_string().contains("/photos/corrupt.jpg"));
    }

    #[test]
    fn insufficient_files_reports_count() {
        let error = EngineError::InsufficientFiles { count: 1 };
        assert!(error.to_string().contains("only 1 files"));
    }
}
