//! Page extraction: one page image → section mapping or error marker.
//!
//! A page never fails the document. Whatever goes wrong (provider down,
//! HTTP error, prose instead of JSON, a JSON array) becomes
//! `{"error": "<capability> Error: <message>"}` and the batch moves on.
//! There is no retry: a failed page simply contributes nothing to the merge.

use crate::capability::{JsonCapability, JsonRequest};
use crate::config::PipelineConfig;
use crate::output::{error_marker_message, ExtractionResult, PageImage};
use crate::pipeline::response::parse_json_object;
use crate::progress::ProgressCallback;
use crate::prompts::{EXTRACTION_SYSTEM_PROMPT, EXTRACTION_USER_PROMPT};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Sends page images to the extraction capability.
pub struct PageExtractor {
    capability: Arc<dyn JsonCapability>,
    system_prompt: String,
    concurrency: usize,
    progress: Option<ProgressCallback>,
}

impl PageExtractor {
    pub fn new(capability: Arc<dyn JsonCapability>, config: &PipelineConfig) -> Self {
        Self {
            capability,
            system_prompt: config
                .extraction_prompt
                .clone()
                .unwrap_or_else(|| EXTRACTION_SYSTEM_PROMPT.to_string()),
            concurrency: config.page_concurrency.max(1),
            progress: config.progress_callback.clone(),
        }
    }

    /// Extract one page.
    pub async fn extract(&self, page: &PageImage) -> ExtractionResult {
        extract_page(self.capability.as_ref(), &self.system_prompt, page).await
    }

    /// Extract every page of one document, returning results in page order.
    ///
    /// Up to `page_concurrency` calls are in flight; `buffered` yields them
    /// in submission order, so the merge always sees document order. Each
    /// future owns its page and handles so the batch future stays `Send`.
    pub async fn extract_all(&self, filename: &str, pages: &[PageImage]) -> Vec<ExtractionResult> {
        let total = pages.len();
        let tasks: Vec<_> = pages
            .iter()
            .map(|page| {
                let capability = Arc::clone(&self.capability);
                let system_prompt = self.system_prompt.clone();
                let progress = self.progress.clone();
                let filename = filename.to_string();
                let page = page.clone();
                async move {
                    let result = extract_page(capability.as_ref(), &system_prompt, &page).await;
                    if let Some(cb) = progress {
                        match &result {
                            ExtractionResult::Sections(_) => {
                                cb.on_page_complete(&filename, page.page_num, total)
                            }
                            ExtractionResult::Error(e) => {
                                cb.on_page_error(&filename, page.page_num, total, e.clone())
                            }
                        }
                    }
                    result
                }
            })
            .collect();

        stream::iter(tasks)
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

async fn extract_page(
    capability: &dyn JsonCapability,
    system_prompt: &str,
    page: &PageImage,
) -> ExtractionResult {
    let start = Instant::now();
    let request = JsonRequest {
        system_prompt: system_prompt.to_string(),
        user_text: EXTRACTION_USER_PROMPT.to_string(),
        image: Some(page.clone()),
    };

    let outcome = capability
        .complete_json(&request)
        .await
        .and_then(|text| parse_json_object(&text));

    let message = match outcome {
        Ok(sections) => match error_marker_message(&sections) {
            // A lone `{"error": "..."}` reply is a marker, same as in raw files.
            Some(reported) => reported.to_string(),
            None => {
                debug!(
                    "Page {}: {} sections in {:?}",
                    page.page_num,
                    sections.len(),
                    start.elapsed()
                );
                return ExtractionResult::Sections(sections);
            }
        },
        Err(e) => e.to_string(),
    };

    let message = format!("{} Error: {}", capability.name(), message);
    warn!("Page {}: extraction failed: {}", page.page_num, message);
    ExtractionResult::Error(message)
}
