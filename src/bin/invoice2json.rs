//! CLI binary for invoice2json.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs a batch, the HTTP service or re-structure mode,
//! and prints results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use invoice2json::{
    resolve_inputs, BatchProgressCallback, BatchResult, DocumentOutcome, InvoicePipeline,
    MergeStrategy, OutputLayout, PipelineConfig, ProgressCallback,
};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar over every page of the batch. The bar grows as
/// each document is rasterised and its page count becomes known.
struct CliProgressCallback {
    bar: ProgressBar,
    page_errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_errors: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_documents} invoices…"))
        ));
    }

    fn on_document_start(&self, filename: &str, total_pages: usize) {
        self.bar.inc_length(total_pages as u64);
        self.bar.set_message(filename.to_string());
    }

    fn on_page_complete(&self, _filename: &str, _page_num: usize, _total_pages: usize) {
        self.bar.inc(1);
    }

    fn on_page_error(&self, filename: &str, page_num: usize, total_pages: usize, error: String) {
        self.page_errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error
        };
        self.bar.println(format!(
            "  {} {} page {:>3}/{:<3}  {}",
            red("✗"),
            filename,
            page_num,
            total_pages,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_document_complete(&self, filename: &str, structured_ok: bool) {
        let mark = if structured_ok { green("✓") } else { cyan("⚠") };
        let note = if structured_ok {
            String::new()
        } else {
            red("transform failed")
        };
        self.bar.println(format!("  {mark} {filename}  {note}"));
    }

    fn on_document_failed(&self, filename: &str, error: String) {
        self.bar
            .println(format!("  {} {}  {}", red("✘"), filename, red(&error)));
    }

    fn on_batch_complete(&self, completed: usize, failed: usize) {
        self.bar.finish_and_clear();
        let page_errors = self.page_errors.load(Ordering::SeqCst);
        let mark = if failed == 0 && page_errors == 0 {
            green("✔")
        } else {
            cyan("⚠")
        };
        eprintln!(
            "{} {} invoices structured  ({} failed, {} page errors)",
            mark,
            bold(&completed.to_string()),
            failed,
            page_errors
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process local invoices (outputs under ./outputs and ./structured_outputs)
  invoice2json process may.pdf june.pdf

  # Process a URL and print the batch result as JSON
  invoice2json process --json https://example.com/invoices/may.pdf

  # Run the HTTP service (POST /upload-invoices/, field "files")
  invoice2json serve --bind 0.0.0.0:8000

  # Re-run the schema transformation over existing raw outputs
  invoice2json transform --language German

  # Use a specific provider and model
  invoice2json --provider anthropic --model claude-sonnet-4-20250514 process may.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory containing libpdfium (default: system library)
"#;

/// Extract structured JSON from PDF invoices using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "invoice2json",
    version,
    about = "Extract structured JSON from PDF invoices using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Target schema JSON file.
    #[arg(long, global = true, env = "INVOICE2JSON_SCHEMA",
          default_value = "invoice_target_schema.json")]
    schema: PathBuf,

    /// Directory uploaded PDFs are saved to.
    #[arg(long, global = true, env = "INVOICE2JSON_INPUTS_DIR", default_value = "inputs")]
    inputs_dir: PathBuf,

    /// Directory for merged raw extraction (`<stem>_raw.json`).
    #[arg(long, global = true, env = "INVOICE2JSON_RAW_DIR", default_value = "outputs")]
    raw_dir: PathBuf,

    /// Directory for structured output (`<stem>_structured.json`) and the archive.
    #[arg(long, global = true, env = "INVOICE2JSON_STRUCTURED_DIR",
          default_value = "structured_outputs")]
    structured_dir: PathBuf,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Vision model used for page extraction (default: gpt-4.1-nano).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Model used for the schema transformation (default: same as --model).
    #[arg(long, global = true, env = "INVOICE2JSON_TRANSFORM_MODEL")]
    transform_model: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, global = true, env = "INVOICE2JSON_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Max LLM output tokens per call.
    #[arg(long, global = true, env = "INVOICE2JSON_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Language structured values are translated to.
    #[arg(long, global = true, env = "INVOICE2JSON_LANGUAGE", default_value = "English")]
    language: String,

    /// How page results are merged.
    #[arg(long, global = true, env = "INVOICE2JSON_MERGE", value_enum,
          default_value = "last-write-wins")]
    merge: MergeArg,

    /// Page extractions of one document in flight at once.
    #[arg(long, global = true, env = "INVOICE2JSON_PAGE_CONCURRENCY", default_value_t = 1)]
    page_concurrency: usize,

    /// Text file replacing the built-in page extraction prompt.
    #[arg(long, global = true, env = "INVOICE2JSON_EXTRACTION_PROMPT")]
    extraction_prompt: Option<PathBuf>,

    /// Directory containing libpdfium; the system library is used when unset.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Abort the batch on the first document that cannot be rasterised.
    #[arg(long, global = true, env = "INVOICE2JSON_FAIL_FAST")]
    fail_fast: bool,

    /// HTTP download timeout in seconds (URL inputs).
    #[arg(long, global = true, env = "INVOICE2JSON_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Maximum upload body size for `serve`, in MiB.
    #[arg(long, global = true, env = "INVOICE2JSON_MAX_UPLOAD_MB", default_value_t = 50)]
    max_upload_mb: usize,

    /// Disable progress bar.
    #[arg(long, global = true, env = "INVOICE2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "INVOICE2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "INVOICE2JSON_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process local PDF files or URLs as one batch.
    Process {
        /// Local PDF file paths or HTTP/HTTPS URLs.
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Print the batch result as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },
    /// Run the HTTP upload service.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "INVOICE2JSON_BIND", default_value = "0.0.0.0:8000")]
        bind: SocketAddr,
    },
    /// Re-run the schema transformation over every JSON file in the raw directory.
    Transform {
        /// Print the outcomes as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MergeArg {
    LastWriteWins,
    Deep,
}

impl From<MergeArg> for MergeStrategy {
    fn from(v: MergeArg) -> Self {
        match v {
            MergeArg::LastWriteWins => MergeStrategy::LastWriteWins,
            MergeArg::Deep => MergeStrategy::Deep,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar only runs for `process`; INFO logs would tear it.
    let wants_json = matches!(
        cli.command,
        Command::Process { json: true, .. } | Command::Transform { json: true }
    );
    let show_progress = matches!(cli.command, Command::Process { .. })
        && !cli.quiet
        && !cli.no_progress
        && !wants_json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;
    let pipeline = InvoicePipeline::from_config(config).context("Failed to set up pipeline")?;

    match cli.command {
        Command::Process { ref inputs, json } => {
            let documents = resolve_inputs(inputs, cli.download_timeout)
                .await
                .context("Failed to read input")?;
            let result = pipeline
                .process_batch(documents)
                .await
                .context("Batch failed")?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&result).context("Failed to serialise result")?
                );
            } else if !cli.quiet {
                print_batch_summary(&result);
            }
        }
        Command::Serve { bind } => {
            invoice2json::server::serve(Arc::new(pipeline), bind)
                .await
                .context("HTTP service failed")?;
        }
        Command::Transform { json } => {
            let outcomes = pipeline
                .restructure_raw_dir()
                .await
                .context("Re-structuring failed")?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&outcomes)
                        .context("Failed to serialise outcomes")?
                );
            } else if !cli.quiet {
                for outcome in &outcomes {
                    print_outcome(outcome);
                }
                eprintln!("{} files re-structured", bold(&outcomes.len().to_string()));
            }
        }
    }

    Ok(())
}

fn print_outcome(outcome: &DocumentOutcome) {
    match outcome {
        DocumentOutcome::Completed(r) => {
            let mark = if r.transform_error.is_none() && r.failed_pages == 0 {
                green("✓")
            } else {
                cyan("⚠")
            };
            eprintln!(
                "  {} {}  {}/{} pages  →  {}",
                mark,
                r.filename,
                r.page_count - r.failed_pages,
                r.page_count,
                dim(&r.structured_path.display().to_string()),
            );
            if let Some(ref e) = r.transform_error {
                eprintln!("      {}", red(e));
            }
        }
        DocumentOutcome::Failed(f) => {
            eprintln!("  {} {}  {}", red("✘"), f.filename, red(&f.error));
        }
    }
}

fn print_batch_summary(result: &BatchResult) {
    for outcome in &result.documents {
        print_outcome(outcome);
    }
    let s = &result.stats;
    eprintln!(
        "{}  {}/{} invoices  {} pages ({} failed)  {}ms  →  {}",
        if s.failed_documents == 0 && s.transform_failures == 0 {
            green("✔")
        } else {
            cyan("⚠")
        },
        s.completed_documents,
        s.total_documents,
        s.total_pages,
        s.failed_pages,
        s.total_duration_ms,
        bold(&result.archive_path.display().to_string()),
    );
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let extraction_prompt = if let Some(ref path) = cli.extraction_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read extraction prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let layout = OutputLayout {
        inputs_dir: cli.inputs_dir.clone(),
        raw_dir: cli.raw_dir.clone(),
        structured_dir: cli.structured_dir.clone(),
        schema_path: cli.schema.clone(),
        ..OutputLayout::default()
    };

    let mut builder = PipelineConfig::builder()
        .dpi(cli.dpi)
        .max_tokens(cli.max_tokens)
        .target_language(cli.language.clone())
        .merge_strategy(cli.merge.into())
        .page_concurrency(cli.page_concurrency)
        .fail_fast(cli.fail_fast)
        .download_timeout_secs(cli.download_timeout)
        .max_upload_bytes(cli.max_upload_mb.saturating_mul(1024 * 1024))
        .layout(layout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref model) = cli.transform_model {
        builder = builder.transform_model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref path) = cli.pdfium_lib_path {
        builder = builder.pdfium_lib_path(path.clone());
    }
    if let Some(prompt) = extraction_prompt {
        builder = builder.extraction_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    let config = builder.build().context("Invalid configuration")?;
    config
        .layout
        .ensure_dirs()
        .context("Failed to create output directories")?;
    Ok(config)
}
