//! # Hasher Module
//!
//! Decodes images and computes their 64-bit perceptual hash (pHash).
//!
//! ## How It Works
//! 1. Decode the image (zune-jpeg for JPEGs, image crate for the rest)
//! 2. Downscale, convert to grayscale, apply a 2-D DCT
//! 3. Keep the 8x8 low-frequency block and threshold each coefficient
//!    against the block average to produce one bit
//!
//! Two hashes are compared with their Hamming distance: the number of
//! differing bits, in `[0, 64]`. Near-duplicate images land within a
//! small distance of each other even across resizes and recompression.

use crate::error::HashError;
use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb};
use image_hasher::{HashAlg, HasherConfig as ImageHasherConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

/// The kind of hash stored alongside each value.
///
/// Only perception hashes exist today; the tag is kept so a cache entry
/// is self-describing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashKind {
    /// DCT-based perceptual hash
    Perception,
}

impl std::fmt::Display for HashKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashKind::Perception => write!(f, "perception"),
        }
    }
}

/// One image's cached analysis: its perceptual hash and pixel dimensions.
///
/// Entries restored from a persisted cache carry `width == height == 0`
/// until a lookup backfills the dimensions from the image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRecord {
    /// 64-bit perceptual hash
    pub hash: u64,
    /// What kind of hash this is
    pub kind: HashKind,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

impl ImageRecord {
    /// Pixel area, used to decide which of two duplicates is the bigger one
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Hamming distance to another record's hash
    pub fn distance(&self, other: &ImageRecord) -> u32 {
        (self.hash ^ other.hash).count_ones()
    }

    /// Whether the dimensions still need to be read from the file
    pub fn needs_dimensions(&self) -> bool {
        self.width == 0 && self.height == 0
    }
}

/// Computes 64-bit DCT perceptual hashes.
///
/// Wraps the image_hasher crate configured for the classic pHash recipe:
/// DCT preprocessing with mean-threshold bit assignment over an 8x8 block.
pub struct PerceptualHasher {
    hasher: image_hasher::Hasher,
}

impl PerceptualHasher {
    /// Create a hasher producing 64-bit perception hashes
    pub fn new() -> Self {
        let hasher = ImageHasherConfig::new()
            .hash_size(8, 8)
            .preproc_dct()
            .hash_alg(HashAlg::Mean)
            .to_hasher();

        Self { hasher }
    }

    /// Hash an already-decoded image
    pub fn hash_image(&self, path: &Path, image: &DynamicImage) -> Result<u64, HashError> {
        let hash = self.hasher.hash_image(image);
        let bytes: [u8; 8] = hash.as_bytes().try_into().map_err(|_| HashError::Hash {
            path: path.to_path_buf(),
            reason: format!("expected a 64-bit hash, got {} bytes", hash.as_bytes().len()),
        })?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Decode a file and build its full [`ImageRecord`].
    ///
    /// The decoded image provides the dimensions directly, so no second
    /// pass over the file is needed.
    pub fn hash_file(&self, path: &Path) -> Result<ImageRecord, HashError> {
        let image = decode(path)?;
        let hash = self.hash_image(path, &image)?;
        let (width, height) = image.dimensions();

        Ok(ImageRecord {
            hash,
            kind: HashKind::Perception,
            width,
            height,
        })
    }
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Read only an image's header to obtain its dimensions.
///
/// Used to complete cache entries restored from disk, which persist the
/// hash but not the dimensions.
pub fn read_dimensions(path: &Path) -> Result<(u32, u32), HashError> {
    let reader = image::ImageReader::open(path).map_err(|e| HashError::Open {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    reader.into_dimensions().map_err(|e| HashError::HeaderDecode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Decode an image from a file using the fastest available decoder.
///
/// - JPEG: zune-jpeg (1.5-2x faster than the image crate)
/// - Other formats: image crate fallback
pub fn decode(path: &Path) -> Result<DynamicImage, HashError> {
    let is_jpeg = matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref(),
        Some("jpg" | "jpeg")
    );

    if is_jpeg {
        decode_jpeg(path).or_else(|_| decode_fallback(path))
    } else {
        decode_fallback(path)
    }
}

/// Fast JPEG decoding using zune-jpeg
fn decode_jpeg(path: &Path) -> Result<DynamicImage, HashError> {
    let file_bytes = fs::read(path).map_err(|e| HashError::Open {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let options = DecoderOptions::new_fast().jpeg_set_out_colorspace(ColorSpace::RGB);
    let mut decoder = JpegDecoder::new_with_options(&file_bytes, options);

    let pixels = decoder.decode().map_err(|e| HashError::Decode {
        path: path.to_path_buf(),
        reason: format!("zune-jpeg decode failed: {e:?}"),
    })?;

    let info = decoder.info().ok_or_else(|| HashError::Decode {
        path: path.to_path_buf(),
        reason: "no image info after decode".to_string(),
    })?;

    let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_raw(info.width as u32, info.height as u32, pixels)
            .ok_or_else(|| HashError::Decode {
                path: path.to_path_buf(),
                reason: "failed to assemble RGB buffer".to_string(),
            })?;

    Ok(DynamicImage::ImageRgb8(buffer))
}

/// Fallback to the image crate for non-JPEG formats
fn decode_fallback(path: &Path) -> Result<DynamicImage, HashError> {
    image::open(path).map_err(|e| HashError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
