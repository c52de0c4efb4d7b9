//! Pipeline stages for PDF-invoice-to-JSON extraction.
//!
//! Each submodule implements one step and is testable on its own; the
//! orchestration lives in [`crate::batch`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ extract ──▶ merge ──▶ transform ──▶ persist
//! (path/URL) (pdfium)  (PNG b64)  (per page)  (fold)    (schema)      (JSON + zip)
//! ```
//!
//! 1. [`input`]    : read a local path or download a URL into a `Document`
//! 2. [`render`]   : rasterise every page; `spawn_blocking` because pdfium
//!    is not async-safe
//! 3. [`encode`]   : RGB PNG, base64-wrapped for the multimodal request
//! 4. [`extract`]  : one vision call per page; failures become error markers
//! 5. [`merge`]    : fold page results into one record per document
//! 6. [`transform`]: reshape the merged record to the target schema
//! 7. [`persist`]  : raw/structured JSON files and the batch archive
//!
//! [`response`] holds the JSON parsing shared by steps 4 and 6.

pub mod encode;
pub mod extract;
pub mod input;
pub mod merge;
pub mod persist;
pub mod render;
pub mod response;
pub mod transform;
