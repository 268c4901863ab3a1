//! Image encoding: `DynamicImage` → JPEG bytes.
//!
//! Catalog pages are mostly product photography. JPEG keeps those pages at a
//! few hundred kilobytes where PNG would be several megabytes, and at quality
//! 85 price text stays crisp enough for the model to read.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::fmt;
use tracing::debug;

/// One rasterised, encoded page.
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl PageImage {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("bytes", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Encode a rendered page as JPEG. Alpha is dropped; JPEG has no alpha.
pub fn encode_page(img: &DynamicImage, quality: u8) -> Result<PageImage, image::ImageError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)))?;

    debug!(
        "Encoded {}x{} page → {} bytes JPEG",
        rgb.width(),
        rgb.height(),
        buf.len()
    );

    Ok(PageImage {
        bytes: buf,
        mime_type: "image/jpeg",
        width: rgb.width(),
        height: rgb.height(),
    })
}
