//! # image-dups CLI
//!
//! Command-line interface for the duplicate-image finder.
//!
//! ## Usage
//! ```bash
//! image-dups --dir ~/Photos --distance 10
//! image-dups --dir ~/Photos --threads 4 --dedup-pairs --dump-metrics
//! ```

mod cli;

use image_dup_finder::Result;

fn main() -> Result<()> {
    cli::run()
}
