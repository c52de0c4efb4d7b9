//! Batch pipeline tests against stub rasteriser and model capabilities.
//!
//! No pdfium, no network: the rasteriser hands back one fake page per entry
//! in a script, and each page's "image" names the reply the extraction stub
//! should give for it. Golden behaviour therefore never depends on a model.

use async_trait::async_trait;
use invoice2json::{
    BatchProgressCallback, CapabilityError, Document, DocumentOutcome, InvoiceError,
    InvoicePipeline, JsonCapability, JsonRequest, MergeStrategy, OutputLayout, PageImage,
    PageRasterizer, PipelineConfig,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Stubs ────────────────────────────────────────────────────────────────────

/// Rasterises each document into the pages scripted for its filename.
/// Page images carry `"<filename>#<page>"` so the extractor stub can tell
/// them apart. Unscripted filenames fail like a corrupt PDF.
struct ScriptedRasterizer {
    pages: HashMap<String, usize>,
}

impl ScriptedRasterizer {
    fn new(pages: &[(&str, usize)]) -> Arc<Self> {
        Arc::new(Self {
            pages: pages.iter().map(|(f, n)| (f.to_string(), *n)).collect(),
        })
    }
}

#[async_trait]
impl PageRasterizer for ScriptedRasterizer {
    async fn rasterize(&self, document: &Document) -> Result<Vec<PageImage>, InvoiceError> {
        let count = self
            .pages
            .get(&document.filename)
            .ok_or_else(|| InvoiceError::CorruptPdf {
                filename: document.filename.clone(),
                detail: "FormatError".to_string(),
            })?;
        Ok((1..=*count)
            .map(|page_num| PageImage {
                page_num,
                width: 1654,
                height: 2339,
                png_base64: format!("{}#{}", document.filename, page_num),
            })
            .collect())
    }
}

/// Extraction stub: replies by page key, `Err` for keys scripted as failures.
struct PageReplies {
    replies: HashMap<String, Result<String, CapabilityError>>,
    calls: Mutex<Vec<String>>,
    /// When set, page `n` of `N` answers after `(N + 1 - n) * 15ms`.
    slow_early_pages: bool,
}

impl PageReplies {
    fn new(replies: Vec<(&str, Result<Value, &str>)>) -> Arc<Self> {
        Arc::new(Self::scripted(replies, false))
    }

    fn slow_early_pages(replies: Vec<(&str, Result<Value, &str>)>) -> Arc<Self> {
        Arc::new(Self::scripted(replies, true))
    }

    fn scripted(replies: Vec<(&str, Result<Value, &str>)>, slow_early_pages: bool) -> Self {
        Self {
            replies: replies
                .into_iter()
                .map(|(k, r)| {
                    let r = r
                        .map(|v| v.to_string())
                        .map_err(|e| CapabilityError::Provider(e.to_string()));
                    (k.to_string(), r)
                })
                .collect(),
            calls: Mutex::new(Vec::new()),
            slow_early_pages,
        }
    }
}

#[async_trait]
impl JsonCapability for PageReplies {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete_json(&self, request: &JsonRequest) -> Result<String, CapabilityError> {
        let key = request
            .image
            .as_ref()
            .map(|i| i.png_base64.clone())
            .unwrap_or_default();
        self.calls.lock().unwrap().push(key.clone());
        if self.slow_early_pages {
            let page: usize = key.rsplit('#').next().and_then(|n| n.parse().ok()).unwrap_or(0);
            let delay = (self.replies.len() + 1).saturating_sub(page) as u64 * 15;
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        self.replies
            .get(&key)
            .cloned()
            .unwrap_or(Err(CapabilityError::EmptyResponse))
    }
}

/// Transformation stub: echoes a fixed answer, or fails.
struct Transform {
    reply: Result<String, CapabilityError>,
    seen: Mutex<Vec<String>>,
}

impl Transform {
    fn ok(v: Value) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(v.to_string()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn failing(msg: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(CapabilityError::Provider(msg.to_string())),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl JsonCapability for Transform {
    fn name(&self) -> &str {
        "transform-stub"
    }

    async fn complete_json(&self, request: &JsonRequest) -> Result<String, CapabilityError> {
        self.seen.lock().unwrap().push(request.user_text.clone());
        self.reply.clone()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

const SCHEMA: &str = r#"{
  "guest": {"name": null, "room": null},
  "charges": null,
  "totals": {"amount": null, "currency": null}
}"#;

fn setup(root: &Path, strategy: MergeStrategy) -> PipelineConfig {
    let layout = OutputLayout::under(root);
    std::fs::write(&layout.schema_path, SCHEMA).unwrap();
    PipelineConfig::builder()
        .layout(layout)
        .merge_strategy(strategy)
        .build()
        .unwrap()
}

fn pdf(name: &str) -> Document {
    Document::new(name, b"%PDF-1.7 stub".to_vec())
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn zip_entries(path: &Path) -> HashMap<String, Value> {
    let mut zip = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    let mut entries = HashMap::new();
    for i in 0..zip.len() {
        let mut file = zip.by_index(i).unwrap();
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        entries.insert(file.name().to_string(), serde_json::from_str(&text).unwrap());
    }
    entries
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_page_invoice_is_merged_and_structured() {
    let tmp = TempDir::new().unwrap();
    let config = setup(tmp.path(), MergeStrategy::LastWriteWins);
    let page = json!({"Guest Info": {"name": "A. Guest"}, "Totals": {"amount": "120.00"}});
    let pipeline = InvoicePipeline::new(
        config,
        ScriptedRasterizer::new(&[("stay.pdf", 1)]),
        PageReplies::new(vec![("stay.pdf#1", Ok(page.clone()))]),
        Transform::ok(json!({"guest": {"name": "A. Guest"}, "totals": {"amount": 120.0}})),
    );

    let result = pipeline.process_batch(vec![pdf("stay.pdf")]).await.unwrap();

    let report = match &result.documents[0] {
        DocumentOutcome::Completed(r) => r,
        other => panic!("expected completed, got {other:?}"),
    };
    assert_eq!(report.page_count, 1);
    assert_eq!(report.failed_pages, 0);
    assert!(report.raw_path.ends_with("outputs/stay_raw.json"));
    assert_eq!(read_json(&report.raw_path), page);
    assert_eq!(
        read_json(&report.structured_path),
        json!({
            "guest": {"name": "A. Guest", "room": null},
            "charges": null,
            "totals": {"amount": 120.0, "currency": null}
        })
    );
}

#[tokio::test]
async fn later_page_wins_on_key_collision() {
    let tmp = TempDir::new().unwrap();
    let pipeline = InvoicePipeline::new(
        setup(tmp.path(), MergeStrategy::LastWriteWins),
        ScriptedRasterizer::new(&[("two.pdf", 2)]),
        PageReplies::new(vec![
            ("two.pdf#1", Ok(json!({"Totals": {"amount": "10"}}))),
            ("two.pdf#2", Ok(json!({"Totals": {"amount": "20"}}))),
        ]),
        Transform::ok(json!({})),
    );

    let result = pipeline.process_batch(vec![pdf("two.pdf")]).await.unwrap();
    let raw = read_json(&tmp.path().join("outputs/two_raw.json"));
    assert_eq!(raw["Totals"]["amount"], "20");
    assert_eq!(result.stats.total_pages, 2);
}

#[tokio::test]
async fn failed_page_contributes_nothing() {
    let tmp = TempDir::new().unwrap();
    let page2 = json!({"Charges": {"room": "80"}, "Totals": {"amount": "80"}});
    let pipeline = InvoicePipeline::new(
        setup(tmp.path(), MergeStrategy::LastWriteWins),
        ScriptedRasterizer::new(&[("scan.pdf", 2)]),
        PageReplies::new(vec![
            ("scan.pdf#1", Err("HTTP 503 Service Unavailable")),
            ("scan.pdf#2", Ok(page2.clone())),
        ]),
        Transform::ok(json!({})),
    );

    let result = pipeline.process_batch(vec![pdf("scan.pdf")]).await.unwrap();
    assert_eq!(read_json(&tmp.path().join("outputs/scan_raw.json")), page2);
    assert_eq!(result.stats.failed_pages, 1);
}

#[tokio::test]
async fn failed_transform_is_persisted_and_archived_as_marker() {
    let tmp = TempDir::new().unwrap();
    let pipeline = InvoicePipeline::new(
        setup(tmp.path(), MergeStrategy::LastWriteWins),
        ScriptedRasterizer::new(&[("bad.pdf", 1)]),
        PageReplies::new(vec![("bad.pdf#1", Ok(json!({"Totals": {"amount": "5"}})))]),
        Transform::failing("rate limited"),
    );

    let result = pipeline.process_batch(vec![pdf("bad.pdf")]).await.unwrap();
    let marker = json!({"error": "Transform Error: rate limited"});

    let structured = tmp.path().join("structured_outputs/bad_structured.json");
    assert_eq!(read_json(&structured), marker);
    assert_eq!(zip_entries(&result.archive_path)["bad_structured.json"], marker);
    assert_eq!(result.stats.transform_failures, 1);
}

#[tokio::test]
async fn batch_continues_past_unrenderable_document() {
    let tmp = TempDir::new().unwrap();
    let pipeline = InvoicePipeline::new(
        setup(tmp.path(), MergeStrategy::LastWriteWins),
        ScriptedRasterizer::new(&[("a.pdf", 1), ("c.pdf", 1)]),
        PageReplies::new(vec![
            ("a.pdf#1", Ok(json!({"Totals": {"amount": "1"}}))),
            ("c.pdf#1", Ok(json!({"Totals": {"amount": "3"}}))),
        ]),
        Transform::ok(json!({"totals": {"amount": 1}})),
    );

    let result = pipeline
        .process_batch(vec![pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf")])
        .await
        .unwrap();

    assert_eq!(result.stats.completed_documents, 2);
    assert_eq!(result.stats.failed_documents, 1);
    assert_eq!(result.documents[1].filename(), "b.pdf");
    assert!(matches!(result.documents[1], DocumentOutcome::Failed(_)));

    let failure = result.failures().next().unwrap();
    assert!(failure.error.contains("corrupt"));

    let entries = zip_entries(&result.archive_path);
    let mut names: Vec<_> = entries.keys().cloned().collect();
    names.sort();
    assert_eq!(names, ["a_structured.json", "c_structured.json"]);
    assert!(!tmp.path().join("outputs/b_raw.json").exists());
    assert!(result.archive_path.ends_with("structured_outputs/structured_invoices.zip"));
}

#[tokio::test]
async fn fail_fast_aborts_on_unrenderable_document() {
    let tmp = TempDir::new().unwrap();
    let mut config = setup(tmp.path(), MergeStrategy::LastWriteWins);
    config.fail_fast = true;
    let pipeline = InvoicePipeline::new(
        config,
        ScriptedRasterizer::new(&[("a.pdf", 1)]),
        PageReplies::new(vec![("a.pdf#1", Ok(json!({})))]),
        Transform::ok(json!({})),
    );

    let err = pipeline
        .process_batch(vec![pdf("broken.pdf"), pdf("a.pdf")])
        .await
        .unwrap_err();
    assert!(matches!(err, InvoiceError::CorruptPdf { .. }));
}

#[tokio::test]
async fn pages_are_extracted_in_document_order() {
    let tmp = TempDir::new().unwrap();
    let mut config = setup(tmp.path(), MergeStrategy::LastWriteWins);
    config.page_concurrency = 4;
    let keys: Vec<String> = (1..=6).map(|n| format!("long.pdf#{n}")).collect();
    let replies = PageReplies::slow_early_pages(
        keys.iter()
            .enumerate()
            .map(|(i, key)| {
                let n = i + 1;
                let mut page = serde_json::Map::new();
                page.insert(format!("Page{n}"), json!({"seen": true}));
                page.insert("Totals".into(), json!({"amount": n.to_string()}));
                (key.as_str(), Ok(Value::Object(page)))
            })
            .collect(),
    );
    let pipeline = InvoicePipeline::new(
        config,
        ScriptedRasterizer::new(&[("long.pdf", 6)]),
        replies.clone(),
        Transform::ok(json!({})),
    );

    pipeline.process_batch(vec![pdf("long.pdf")]).await.unwrap();
    let raw = read_json(&tmp.path().join("outputs/long_raw.json"));
    // Later pages answered first, yet the last page still wins.
    assert_eq!(raw["Totals"]["amount"], "6");
    let page_keys: Vec<&str> = raw
        .as_object()
        .unwrap()
        .keys()
        .filter(|k| k.starts_with("Page"))
        .map(String::as_str)
        .collect();
    assert_eq!(page_keys, ["Page1", "Page2", "Page3", "Page4", "Page5", "Page6"]);
    assert_eq!(replies.calls.lock().unwrap().len(), 6);
}

#[test]
fn batch_future_is_send() {
    fn assert_send<T: Send>(_: T) {}
    let tmp = TempDir::new().unwrap();
    let pipeline = InvoicePipeline::new(
        setup(tmp.path(), MergeStrategy::LastWriteWins),
        ScriptedRasterizer::new(&[("a.pdf", 2)]),
        PageReplies::new(vec![]),
        Transform::ok(json!({})),
    );
    // Served from a multi-threaded axum handler, so this must hold.
    assert_send(pipeline.process_batch(vec![pdf("a.pdf")]));
    assert_send(pipeline.restructure_raw_dir());
}

#[tokio::test]
async fn structured_output_never_exceeds_schema_keys() {
    let tmp = TempDir::new().unwrap();
    let pipeline = InvoicePipeline::new(
        setup(tmp.path(), MergeStrategy::LastWriteWins),
        ScriptedRasterizer::new(&[("x.pdf", 1)]),
        PageReplies::new(vec![("x.pdf#1", Ok(json!({"Hotel": {"name": "Grand"}})))]),
        Transform::ok(json!({"hotel": "Grand", "totals": {"amount": 9}, "notes": "n/a"})),
    );

    pipeline.process_batch(vec![pdf("x.pdf")]).await.unwrap();
    let structured = read_json(&tmp.path().join("structured_outputs/x_structured.json"));
    let keys: Vec<&String> = structured.as_object().unwrap().keys().collect();
    assert_eq!(keys, ["guest", "charges", "totals"]);
}

#[tokio::test]
async fn transform_receives_merged_record() {
    let tmp = TempDir::new().unwrap();
    let transform = Transform::ok(json!({}));
    let pipeline = InvoicePipeline::new(
        setup(tmp.path(), MergeStrategy::Deep),
        ScriptedRasterizer::new(&[("split.pdf", 2)]),
        PageReplies::new(vec![
            ("split.pdf#1", Ok(json!({"Charges": {"room": "100"}}))),
            ("split.pdf#2", Ok(json!({"Charges": {"parking": "12"}}))),
        ]),
        transform.clone(),
    );

    pipeline.process_batch(vec![pdf("split.pdf")]).await.unwrap();
    let seen = transform.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains(r#""room":"100""#));
    assert!(seen[0].contains(r#""parking":"12""#));
}

#[tokio::test]
async fn uploaded_pdf_is_saved_to_inputs_dir() {
    let tmp = TempDir::new().unwrap();
    let pipeline = InvoicePipeline::new(
        setup(tmp.path(), MergeStrategy::LastWriteWins),
        ScriptedRasterizer::new(&[("keep.pdf", 1)]),
        PageReplies::new(vec![("keep.pdf#1", Ok(json!({})))]),
        Transform::ok(json!({})),
    );

    pipeline.process_batch(vec![pdf("keep.pdf")]).await.unwrap();
    let saved = std::fs::read(tmp.path().join("inputs/keep.pdf")).unwrap();
    assert_eq!(saved, b"%PDF-1.7 stub");
}

#[tokio::test]
async fn progress_events_cover_the_batch() {
    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl BatchProgressCallback for Recorder {
        fn on_batch_start(&self, total_documents: usize) {
            self.0.lock().unwrap().push(format!("batch:{total_documents}"));
        }
        fn on_document_start(&self, filename: &str, total_pages: usize) {
            self.0.lock().unwrap().push(format!("doc:{filename}:{total_pages}"));
        }
        fn on_page_error(&self, filename: &str, page_num: usize, _total: usize, _error: String) {
            self.0.lock().unwrap().push(format!("page-error:{filename}:{page_num}"));
        }
        fn on_document_failed(&self, filename: &str, _error: String) {
            self.0.lock().unwrap().push(format!("failed:{filename}"));
        }
        fn on_batch_complete(&self, completed: usize, failed: usize) {
            self.0.lock().unwrap().push(format!("done:{completed}:{failed}"));
        }
    }

    let tmp = TempDir::new().unwrap();
    let recorder = Arc::new(Recorder::default());
    let mut config = setup(tmp.path(), MergeStrategy::LastWriteWins);
    config.progress_callback = Some(recorder.clone());
    let pipeline = InvoicePipeline::new(
        config,
        ScriptedRasterizer::new(&[("ok.pdf", 2)]),
        PageReplies::new(vec![("ok.pdf#1", Ok(json!({})))]),
        Transform::ok(json!({})),
    );

    pipeline
        .process_batch(vec![pdf("ok.pdf"), pdf("gone.pdf")])
        .await
        .unwrap();

    let events = recorder.0.lock().unwrap().clone();
    assert_eq!(
        events,
        [
            "batch:2",
            "doc:ok.pdf:2",
            "page-error:ok.pdf:2",
            "failed:gone.pdf",
            "done:1:1"
        ]
    );
}

#[tokio::test]
async fn empty_batch_still_writes_archive() {
    let tmp = TempDir::new().unwrap();
    let pipeline = InvoicePipeline::new(
        setup(tmp.path(), MergeStrategy::LastWriteWins),
        ScriptedRasterizer::new(&[]),
        PageReplies::new(vec![]),
        Transform::ok(json!({})),
    );

    let result = pipeline.process_batch(Vec::new()).await.unwrap();
    assert!(result.archive_path.exists());
    assert!(zip_entries(&result.archive_path).is_empty());
}
