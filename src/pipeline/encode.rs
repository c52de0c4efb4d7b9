//! Image encoding: `DynamicImage` → base64 PNG [`PageImage`].
//!
//! PDFium hands back RGBA bitmaps. Invoices carry no meaningful alpha, so the
//! page is flattened to RGB before encoding: lossless, and a quarter smaller
//! than the RGBA PNG for the same pixels.

use crate::output::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as a base64 RGB PNG ready for the model call.
pub fn encode_page(page_num: usize, img: &DynamicImage) -> Result<PageImage, image::ImageError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded page {} ({}x{}) → {} bytes base64",
        page_num,
        rgb.width(),
        rgb.height(),
        b64.len()
    );

    Ok(PageImage {
        page_num,
        width: rgb.width(),
        height: rgb.height(),
        png_base64: b64,
    })
}
