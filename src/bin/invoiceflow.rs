//! CLI binary for invoiceflow.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, drives the batch extractor, and exposes the two
//! review queues as subcommands.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use invoiceflow::{
    extract_all, fields_csv, invoices_csv, pages_csv, BatchProgressCallback, CancelToken,
    ExtractionConfig, FieldMap, JsonStore, PageKey, PageSource, ProgressCallback, Stage,
    VisionExtractionClient, WorkflowEngine,
};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: renders a live progress bar and per-page log
/// lines. The library delivers a monotonic completed count, so the bar
/// position is set absolutely and works regardless of the order concurrent
/// pages finish in.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Create a callback whose progress-bar length is set dynamically by
    /// `on_batch_start`.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_batch_start

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting extraction of {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, key: &PageKey, _total: usize) {
        self.bar.set_message(format!("{key}"));
    }

    fn on_page_done(&self, key: &PageKey, completed: usize, total: usize) {
        self.bar.println(format!(
            "  {} {key}  {}",
            green("✓"),
            dim(&format!("{completed}/{total}"))
        ));
        self.bar.set_position(completed as u64);
    }

    fn on_page_failed(&self, key: &PageKey, completed: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            let truncated: String = error.chars().take(79).collect();
            format!("{truncated}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {key}  {}  {}",
            red("✗"),
            red(&msg),
            dim(&format!("{completed}/{total}"))
        ));
        self.bar.set_position(completed as u64);
    }

    fn on_batch_complete(&self, total_pages: usize, succeeded: usize) {
        let failed = total_pages.saturating_sub(succeeded);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages extracted successfully",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages extracted  ({} failed)",
                if failed == total_pages {
                    red("✘")
                } else {
                    yellow("⚠")
                },
                bold(&succeeded.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a three-page invoice (pages pre-rendered as images)
  invoiceflow extract --document invoice.pdf page1.png page2.png page3.png

  # One single-page invoice per image file, combined CSV export
  invoiceflow extract scans/*.jpg --csv all_invoices.csv

  # Extract, then verify fields interactively (procurement review)
  invoiceflow extract --document invoice.pdf pages/*.png --review

  # Finance queue
  invoiceflow approvals
  invoiceflow approve --file invoice.pdf --page 1

  # CSV of everything awaiting approval
  invoiceflow export -o pending.csv

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY            OpenAI API key (preferred when several are set)
  ANTHROPIC_API_KEY         Anthropic API key
  GEMINI_API_KEY            Google Gemini API key
  INVOICEFLOW_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  INVOICEFLOW_MODEL         Override model ID
  RUST_LOG                  Log filter (e.g. invoiceflow=debug)

SETUP:
  1. Set an API key:   export OPENAI_API_KEY=sk-...
  2. Extract:          invoiceflow extract --document inv.pdf page1.png
"#;

/// Extract invoice fields from scanned pages and review them before approval.
#[derive(Parser, Debug)]
#[command(
    name = "invoiceflow",
    version,
    about = "Extract invoice fields from scanned pages with a two-stage human review",
    after_help = AFTER_HELP
)]
struct Cli {
    /// Path of the verified-invoice store file.
    #[arg(long, global = true, default_value = "verified_invoices.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract fields from page images and list the procurement queue.
    Extract {
        /// Page images (PNG or JPEG), one file per page.
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Treat all images as consecutive pages of this document.
        /// Without it, each image is a single-page document named after its file.
        #[arg(long)]
        document: Option<String>,

        /// Write a combined File,Page,Field,Value CSV of all extracted pages.
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Print the run's records as JSON instead of a table.
        #[arg(long)]
        json: bool,

        /// Interactively verify extracted pages (procurement review).
        #[arg(long)]
        review: bool,

        /// Model identifier, e.g. gpt-4o.
        #[arg(long)]
        model: Option<String>,

        /// Provider name (openai, anthropic, gemini, ollama).
        #[arg(long)]
        provider: Option<String>,

        /// Concurrent model calls.
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// Per-call timeout in seconds.
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },

    /// List verified invoices awaiting finance approval.
    Approvals,

    /// Approve one verified invoice and remove it from the queue.
    Approve {
        /// Source document name, as shown by `approvals`.
        #[arg(long)]
        file: String,

        /// Page number within the document.
        #[arg(long)]
        page: u32,
    },

    /// Write a CSV of all verified invoices awaiting approval.
    Export {
        /// Output path; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Extract {
            images,
            document,
            csv,
            json,
            review,
            model,
            provider,
            concurrency,
            timeout,
        } => {
            run_extract(
                &cli.store,
                images,
                document,
                csv,
                json,
                review,
                model,
                provider,
                concurrency,
                timeout,
            )
            .await
        }
        Command::Approvals => run_approvals(&cli.store),
        Command::Approve { file, page } => run_approve(&cli.store, file, page),
        Command::Export { output } => run_export(&cli.store, output),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_extract(
    store_path: &Path,
    images: Vec<PathBuf>,
    document: Option<String>,
    csv: Option<PathBuf>,
    json: bool,
    review: bool,
    model: Option<String>,
    provider: Option<String>,
    concurrency: usize,
    timeout: u64,
) -> Result<()> {
    let store = JsonStore::open(store_path)?;
    let mut engine = WorkflowEngine::new(store);

    let mut sources = Vec::with_capacity(images.len());
    if let Some(ref name) = document {
        for (idx, path) in images.iter().enumerate() {
            let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            sources.push(PageSource::new(name.clone(), idx as u32 + 1, bytes));
        }
    } else {
        for path in &images {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            sources.push(PageSource::new(name, 1, bytes));
        }
    }

    let progress = CliProgressCallback::new_dynamic();
    let mut builder = ExtractionConfig::builder()
        .concurrency(concurrency)
        .api_timeout_secs(timeout)
        .progress_callback(Arc::clone(&progress) as ProgressCallback);
    if let Some(m) = model {
        builder = builder.model(m);
    }
    if let Some(p) = provider {
        builder = builder.provider_name(p);
    }
    let config = builder.build()?;

    let cancel = CancelToken::new();
    {
        // Ctrl-C requests cancellation; in-flight pages finish as Failed.
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", yellow("Cancelling — waiting for in-flight pages…"));
                cancel.cancel();
            }
        });
    }

    let client = VisionExtractionClient::from_config(&config, cancel.clone())?;
    extract_all(&mut engine, &client, sources, &config, &cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(engine.records())?);
    } else {
        print_run_table(&engine);
    }

    if let Some(csv_path) = csv {
        fs::write(&csv_path, pages_csv(engine.records()))
            .with_context(|| format!("writing {}", csv_path.display()))?;
        eprintln!("{} Wrote {}", green("✔"), csv_path.display());
    }

    if review {
        run_review(&mut engine)?;
    } else {
        let pending = engine.list_pending_review().len();
        if pending > 0 {
            eprintln!(
                "{}",
                dim(&format!(
                    "{pending} pages pending review — rerun with --review to verify them"
                ))
            );
        }
    }
    Ok(())
}

fn print_run_table(engine: &WorkflowEngine) {
    println!("{}", bold("File                            Page  Status     Detail"));
    for record in engine.records() {
        let status = format!("{:<9}", record.stage().to_string());
        let status = match record.stage() {
            Stage::Done | Stage::Verified => green(&status),
            Stage::Failed => red(&status),
            _ => dim(&status),
        };
        let detail = match record.error() {
            Some(e) => e.to_string(),
            None => format!("{} fields", record.fields().len()),
        };
        println!(
            "{:<30}  {:>4}  {}  {}",
            record.key().document_id,
            record.key().page_number,
            status,
            dim(&detail)
        );
    }
}

/// Interactive procurement review: show each pending page's fields, accept
/// `field = value` edits, verify on an empty line.
fn run_review(engine: &mut WorkflowEngine) -> Result<()> {
    let pending: Vec<PageKey> = engine
        .list_pending_review()
        .iter()
        .map(|r| r.key().clone())
        .collect();
    if pending.is_empty() {
        println!("Nothing pending review.");
        return Ok(());
    }

    let stdin = io::stdin();
    for key in pending {
        let Some(record) = engine.record(&key) else {
            continue;
        };
        println!("\n{}", bold(&key.to_string()));
        for (field, value) in record.fields().iter() {
            println!("  {} = {}", cyan(field), value);
        }
        let mut edited: FieldMap = record.fields().clone();

        println!(
            "{}",
            dim("Edit with 'field = value'; empty line verifies, 'skip' leaves the page pending.")
        );
        let mut skip = false;
        loop {
            print!("> ");
            io::stdout().flush()?;
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                skip = true; // EOF: leave the page pending
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            if line == "skip" {
                skip = true;
                break;
            }
            match line.split_once('=') {
                Some((field, value)) => {
                    let field = field.trim();
                    if edited.get(field).is_some() {
                        edited.insert(field, value.trim());
                        println!("  {} {field} updated", green("✓"));
                    } else {
                        println!("  {} unknown field: {field}", red("✗"));
                    }
                }
                None => println!("  {} expected 'field = value'", red("✗")),
            }
        }
        if skip {
            continue;
        }

        match engine.verify(&key, edited) {
            Ok(_) => println!("{} {key} verified and forwarded to finance", green("✓")),
            Err(e) => println!("{} {e}", red("✗")),
        }
    }
    Ok(())
}

fn run_approvals(store_path: &Path) -> Result<()> {
    let store = JsonStore::open(store_path)?;
    let pending = store.list_all();
    if pending.is_empty() {
        println!("No invoices forwarded from procurement.");
        return Ok(());
    }

    println!("{}", bold("File                            Page  Fields"));
    for invoice in &pending {
        println!(
            "{:<30}  {:>4}  {}",
            invoice.document_id,
            invoice.page_number,
            invoice.fields.len()
        );
    }
    println!(
        "{}",
        dim("Approve with: invoiceflow approve --file <FILE> --page <PAGE>")
    );
    Ok(())
}

fn run_approve(store_path: &Path, file: String, page: u32) -> Result<()> {
    let store = JsonStore::open(store_path)?;
    let mut engine = WorkflowEngine::new(store);
    let key = PageKey::new(file, page);

    match engine.approve(&key) {
        Ok(removed) => {
            println!("{} Approved {key} — removed from the queue", green("✓"));
            print!("{}", fields_csv(&removed.fields));
            Ok(())
        }
        Err(e) => bail!("{e}"),
    }
}

fn run_export(store_path: &Path, output: Option<PathBuf>) -> Result<()> {
    let store = JsonStore::open(store_path)?;
    let csv = invoices_csv(&store.list_all());
    match output {
        Some(path) => {
            fs::write(&path, csv).with_context(|| format!("writing {}", path.display()))?;
            eprintln!("{} Wrote {}", green("✔"), path.display());
        }
        None => print!("{csv}"),
    }
    Ok(())
}
