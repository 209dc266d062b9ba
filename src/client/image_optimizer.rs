//! Pre-upload image shrinking.
//!
//! Large photos are scaled so the longest edge fits [`MAX_EDGE_PX`] and
//! re-encoded as JPEG. The original is kept whenever decoding or encoding
//! fails, or when the result is not meaningfully smaller.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::GenericImageView;
use std::sync::Arc;
use tracing::{debug, warn};

/// Images below this size are uploaded as-is.
pub const COMPRESSION_THRESHOLD_BYTES: usize = 600 * 1024;

pub const MAX_EDGE_PX: u32 = 1600;

pub const JPEG_QUALITY: u8 = 82;

/// The compressed image must be under this fraction of the original.
pub const MIN_SAVING_RATIO: f64 = 0.95;

/// An image picked by the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.to_ascii_lowercase().starts_with("image/")
    }
}

pub fn should_compress(file: &ImageFile) -> bool {
    file.is_image() && file.len() >= COMPRESSION_THRESHOLD_BYTES
}

/// Whether a compressed size is worth uploading instead of the original.
pub fn accept_compressed(original_len: usize, compressed_len: usize) -> bool {
    (compressed_len as f64) < (original_len as f64) * MIN_SAVING_RATIO
}

/// Target dimensions for a `width x height` image. Never upscales.
pub fn fit_within(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_edge || longest == 0 {
        return (width, height);
    }
    let scale = max_edge as f64 / longest as f64;
    let scaled = |v: u32| ((v as f64 * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

/// Decode, downscale and re-encode as JPEG. `None` when the bytes cannot be
/// decoded or encoded.
pub fn compress_to_jpeg(bytes: &[u8]) -> Option<Vec<u8>> {
    let img = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(e) => {
            debug!(error = %e, "Image not decodable, skipping compression");
            return None;
        }
    };

    let (width, height) = img.dimensions();
    let (target_w, target_h) = fit_within(width, height, MAX_EDGE_PX);
    let img = if (target_w, target_h) == (width, height) {
        img
    } else {
        img.resize_exact(target_w, target_h, FilterType::Triangle)
    };

    // JPEG has no alpha channel.
    let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    if let Err(e) = rgb.write_with_encoder(encoder) {
        warn!(error = %e, "JPEG encoding failed");
        return None;
    }
    Some(out)
}

fn jpeg_name(name: &str) -> String {
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    format!("{}.jpg", stem)
}

/// Shrink `file` if it is a large image. Never fails: any problem yields the
/// original file unchanged.
pub async fn optimize_image(file: ImageFile) -> ImageFile {
    if !should_compress(&file) {
        return file;
    }

    let ImageFile {
        name,
        mime_type,
        bytes,
    } = file;
    let original = Arc::new(bytes);
    let input = Arc::clone(&original);

    let compressed = tokio::task::spawn_blocking(move || compress_to_jpeg(&input))
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Image compression task failed");
            None
        });

    let original_len = original.len();
    match compressed {
        Some(out) if accept_compressed(original_len, out.len()) => {
            debug!(
                original_bytes = original_len,
                compressed_bytes = out.len(),
                "Image compressed for upload"
            );
            ImageFile {
                name: jpeg_name(&name),
                mime_type: "image/jpeg".to_string(),
                bytes: out,
            }
        }
        _ => ImageFile {
            name,
            mime_type,
            bytes: Arc::try_unwrap(original).unwrap_or_else(|shared| (*shared).clone()),
        },
    }
}
