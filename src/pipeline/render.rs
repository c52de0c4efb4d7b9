//! PDF rasterisation: one [`Document`] → ordered [`PageImage`]s via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and keeps
//! thread-local state. `tokio::task::spawn_blocking` moves rendering onto the
//! blocking pool so the runtime's worker threads never stall.
//!
//! Rendering happens entirely in memory: each page bitmap is dropped as soon
//! as its PNG has been produced, whether encoding succeeded or not, so no
//! per-page artifact outlives the loop iteration.

use crate::config::PipelineConfig;
use crate::error::InvoiceError;
use crate::output::{Document, PageImage};
use crate::pipeline::encode::encode_page;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Turns a document into its page images, in page order.
///
/// Failure to open or parse the document is fatal for that document.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    async fn rasterize(&self, document: &Document) -> Result<Vec<PageImage>, InvoiceError>;
}

/// [`PageRasterizer`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    dpi: u32,
    max_pixels: u32,
    lib_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_pixels: config.max_rendered_pixels,
            lib_path: config.pdfium_lib_path.clone(),
        }
    }
}

#[async_trait]
impl PageRasterizer for PdfiumRasterizer {
    async fn rasterize(&self, document: &Document) -> Result<Vec<PageImage>, InvoiceError> {
        check_pdf_magic(document)?;

        let filename = document.filename.clone();
        let bytes = document.bytes.clone();
        let dpi = self.dpi;
        let max_pixels = self.max_pixels;
        let lib_path = self.lib_path.clone();

        tokio::task::spawn_blocking(move || {
            rasterize_blocking(&filename, &bytes, dpi, max_pixels, lib_path.as_deref())
        })
        .await
        .map_err(|e| InvoiceError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Reject documents that do not start with `%PDF` before pdfium sees them.
pub fn check_pdf_magic(document: &Document) -> Result<(), InvoiceError> {
    if document.bytes.starts_with(b"%PDF") {
        Ok(())
    } else {
        Err(InvoiceError::NotAPdf {
            filename: document.filename.clone(),
            magic: document.bytes.iter().take(4).copied().collect(),
        })
    }
}

/// Bind to pdfium in `lib_dir`, or to the system library when unset.
fn bind_pdfium(lib_dir: Option<&Path>) -> Result<Pdfium, InvoiceError> {
    let bindings = match lib_dir {
        Some(dir) => {
            Pdfium::bind_to_library(&Pdfium::pdfium_platform_library_name_at_path(dir))
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| InvoiceError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of page rendering.
fn rasterize_blocking(
    filename: &str,
    bytes: &[u8],
    dpi: u32,
    max_pixels: u32,
    lib_dir: Option<&Path>,
) -> Result<Vec<PageImage>, InvoiceError> {
    let pdfium = bind_pdfium(lib_dir)?;

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| InvoiceError::CorruptPdf {
            filename: filename.to_string(),
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("{}: PDF loaded, {} pages", filename, total_pages);

    // PDF user space is 72 units per inch.
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(total_pages);

    for idx in 0..total_pages {
        let page_num = idx + 1;
        let raster_err = |detail: String| InvoiceError::RasterisationFailed {
            filename: filename.to_string(),
            page: page_num,
            detail,
        };

        let page = pages
            .get(idx as u16)
            .map_err(|e| raster_err(format!("{:?}", e)))?;

        let image = {
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| raster_err(format!("{:?}", e)))?;
            bitmap.as_image()
        };

        let encoded = encode_page(page_num, &image)
            .map_err(|e| raster_err(format!("PNG encoding failed: {}", e)))?;
        debug!(
            "{}: rendered page {} → {}x{} px",
            filename, page_num, encoded.width, encoded.height
        );

        images.push(encoded);
    }

    Ok(images)
}
