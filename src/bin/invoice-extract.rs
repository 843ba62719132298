//! CLI binary for edgequake-invoice.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig`, runs one extraction and prints the stored tables.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_invoice::{
    dump_tables, extract_invoice, ExtractionConfig, ExtractionOutcome, ExtractionProgressCallback,
    ExtractionReport, InputKind, ProgressCallback, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::error;
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

/// Terminal progress callback: a spinner for the running attempt plus one
/// log line per attempt.
struct CliProgressCallback {
    bar: ProgressBar,
    attempt_started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Loading invoice…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            attempt_started: Mutex::new(None),
        })
    }

    fn attempt_elapsed(&self) -> String {
        let secs = self
            .attempt_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_run_start(&self, source: &str) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting invoice from {source}…"))
        ));
    }

    fn on_attempt_start(&self, attempt: u32, max_attempts: u32) {
        if let Ok(mut started) = self.attempt_started.lock() {
            *started = Some(Instant::now());
        }
        self.bar.set_prefix("Extracting");
        self.bar
            .set_message(format!("attempt {attempt}/{max_attempts}"));
    }

    fn on_extraction_failed(&self, attempt: u32, error: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg = match error.char_indices().nth(80) {
            Some((idx, _)) => format!("{}\u{2026}", &error[..idx]),
            None => error.to_string(),
        };
        self.bar.println(format!(
            "  {} Attempt {:>2}  {}  {}",
            red("✗"),
            attempt,
            red(&msg),
            self.attempt_elapsed(),
        ));
    }

    fn on_validated(&self, attempt: u32, errors: &[String]) {
        if errors.is_empty() {
            self.bar.println(format!(
                "  {} Attempt {:>2}  {}  {}",
                green("✓"),
                attempt,
                "totals match",
                self.attempt_elapsed(),
            ));
        } else {
            for e in errors {
                self.bar.println(format!(
                    "  {} Attempt {:>2}  {}  {}",
                    red("✗"),
                    attempt,
                    red(e),
                    self.attempt_elapsed(),
                ));
            }
        }
        self.bar.set_prefix("Validated");
    }

    fn on_run_complete(&self, stage: Stage, attempts: u32) {
        self.bar.finish_and_clear();
        match stage {
            Stage::Done => eprintln!(
                "{} invoice validated after {} attempt(s)",
                green("✔"),
                bold(&attempts.to_string())
            ),
            _ => eprintln!(
                "{} escalated to human review after {} attempt(s)",
                red("✘"),
                bold(&attempts.to_string())
            ),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract the bundled sample invoice
  invoice-extract

  # Extract a specific PDF into a custom database
  invoice-extract invoices/march.pdf --database out/invoices.db

  # Extract from a URL with a different provider
  invoice-extract --provider openai --model gpt-4.1-mini https://example.com/inv.pdf

  # Use text that was already extracted from the invoice
  invoice-extract --text invoices/march.txt

  # JSON report instead of the table dump
  invoice-extract --json invoices/march.pdf > report.json

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default provider)
  GOOGLE_API_KEY          Accepted instead of GEMINI_API_KEY
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  MISTRAL_API_KEY         Mistral API key
  EDGEQUAKE_LLM_PROVIDER  Provider used when --provider is not given
  EDGEQUAKE_MODEL         Model used when --provider is not given
  INVOICE_DB              SQLite database path
"#;

/// Extract invoices from PDFs with an LLM, check the totals and store them.
#[derive(Parser, Debug)]
#[command(
    name = "invoice-extract",
    version,
    about = "Extract invoices from PDFs with an LLM, check the totals and store them in SQLite",
    long_about = "Extract structured invoice data (number, dates, customer, line items, tax, \
grand total) from a PDF using a language model. The line items and tax are checked against the \
stated grand total; mismatches are fed back to the model and retried. Invoices that add up are \
written to SQLite; the rest are reported for human review.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: Option<String>,

    /// Same as the positional input; the positional wins when both are given.
    #[arg(short, long, env = "INVOICE_PDF_PATH")]
    pdf_path: Option<String>,

    /// Treat the input as UTF-8 text already extracted from the invoice.
    #[arg(long, env = "INVOICE_TEXT")]
    text: bool,

    /// LLM provider: gemini, openai, anthropic, mistral, azure, ollama.
    #[arg(long, env = "INVOICE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID (e.g. gemini-2.5-flash-lite, gpt-4.1-nano).
    #[arg(long, env = "INVOICE_MODEL")]
    model: Option<String>,

    /// SQLite database file; parent directories are created.
    #[arg(long, env = "INVOICE_DB", default_value = edgequake_invoice::DEFAULT_DATABASE_PATH)]
    database: PathBuf,

    /// Retries after the first failed attempt before escalating.
    #[arg(long, env = "INVOICE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "INVOICE_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max LLM output tokens.
    #[arg(long, env = "INVOICE_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Per-attempt LLM call timeout in seconds.
    #[arg(long, env = "INVOICE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "INVOICE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "INVOICE_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Print the run report as JSON instead of the table dump.
    #[arg(long, env = "INVOICE_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "INVOICE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INVOICE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "INVOICE_QUIET")]
    quiet: bool,
}

const DEFAULT_INPUT: &str = "data/invoice-correct.pdf";

impl Cli {
    /// Positional input, then `--pdf-path` (or `INVOICE_PDF_PATH`), then the
    /// bundled sample.
    fn input_path(&self) -> String {
        self.input
            .clone()
            .or_else(|| self.pdf_path.clone())
            .unwrap_or_else(|| DEFAULT_INPUT.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO-level library logs when it is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    let input = cli.input_path();
    let kind = if cli.text {
        InputKind::Text
    } else {
        InputKind::Pdf
    };

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Run extraction ───────────────────────────────────────────────────
    let report = extract_invoice(&input, kind, &config)
        .await
        .with_context(|| format!("Extraction of {input} failed"))?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
        return Ok(());
    }

    if !cli.quiet {
        print_summary(&report, &config);
    }

    // ── Dump tables ──────────────────────────────────────────────────────
    // A broken dump does not change the outcome of the run.
    match dump_tables(&config.database_path).await {
        Ok(dump) => print!("{dump}"),
        Err(e) => error!("Could not read back {}: {}", config.database_path.display(), e),
    }

    Ok(())
}

fn print_summary(report: &ExtractionReport, config: &ExtractionConfig) {
    match report.outcome {
        ExtractionOutcome::Persisted { invoice_id, ref invoice } => {
            eprintln!(
                "{}  invoice {} saved as row {} in {}  {}",
                green("✔"),
                bold(if invoice.invoice_number.is_empty() {
                    "(no number)"
                } else {
                    invoice.invoice_number.as_str()
                }),
                invoice_id,
                config.database_path.display(),
                dim(&format!("{}ms", report.duration_ms)),
            );
        }
        ExtractionOutcome::HumanReview { ref errors, .. } => {
            eprintln!(
                "{}  needs human review after {} attempt(s); nothing was saved",
                cyan("⚠"),
                report.attempts
            );
            for e in errors {
                eprintln!("   {} {}", red("•"), e);
            }
        }
    }
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ExtractionConfig::builder()
        .max_retries(cli.max_retries)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .database_path(cli.database.clone());

    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
