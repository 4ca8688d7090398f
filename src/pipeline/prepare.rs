//! Image preparation: raster page bytes → JPEG under the byte ceiling.
//!
//! Vision APIs cap the size of an uploaded image, so each page is
//! re-encoded as JPEG at decreasing quality until it fits the configured
//! ceiling (default 4 MiB). Quality starts at 95 and steps down by 5 to a
//! floor of 10; a page that still exceeds the ceiling at the floor is sent
//! as-is rather than degraded further — at that point legibility matters
//! more than the last few hundred kilobytes.
//!
//! The compressed bytes become the image the [`crate::engine::PageRecord`]
//! owns for the rest of the review flow.

use crate::error::ExtractionError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use tracing::debug;

const JPEG_START_QUALITY: u8 = 95;
const JPEG_MIN_QUALITY: u8 = 10;
const JPEG_QUALITY_STEP: u8 = 5;

/// Decode an uploaded raster page (PNG or JPEG) and compress it under
/// `max_bytes`.
///
/// CPU-bound; the batch driver runs this under `spawn_blocking`.
pub fn prepare_page(raw: &[u8], max_bytes: usize) -> Result<Vec<u8>, ExtractionError> {
    let img = image::load_from_memory(raw).map_err(|e| ExtractionError::InvalidImage {
        detail: e.to_string(),
    })?;

    // Flatten any alpha channel; JPEG has none.
    let rgb = img.to_rgb8();

    let mut quality = JPEG_START_QUALITY;
    loop {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, quality)
            .encode_image(&rgb)
            .map_err(|e| ExtractionError::InvalidImage {
                detail: e.to_string(),
            })?;

        if buf.len() <= max_bytes || quality <= JPEG_MIN_QUALITY {
            debug!(
                "Prepared page: {}x{} px, quality {}, {} bytes",
                rgb.width(),
                rgb.height(),
                quality,
                buf.len()
            );
            return Ok(buf);
        }
        quality -= JPEG_QUALITY_STEP;
    }
}

/// Wrap compressed JPEG bytes as a base64 attachment for the vision API.
///
/// `detail: "high"` instructs GPT-4-class models to use the full image tile
/// budget; without it small print on dense invoices is lost.
pub fn encode_page(jpeg: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(jpeg);
    debug!("Encoded image → {} bytes base64", b64.len());
    ImageData::new(b64, "image/jpeg").with_detail("high")
}
