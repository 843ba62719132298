//! # edgequake-invoice
//!
//! Extract structured invoice data from PDFs with a language model, check the
//! arithmetic, retry with feedback, and store the result in SQLite.
//!
//! ## Why this crate?
//!
//! Language models read invoices well but occasionally misread a digit or skip
//! a line item. The stated grand total on an invoice is a free checksum: if
//! `sum(price × quantity) + tax` does not match it, the extraction is wrong.
//! This crate runs the model in a bounded loop, feeds the mismatch back into
//! the next prompt, and only writes invoices that add up. Anything that still
//! fails after the retry budget is handed back for human review.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / text
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Provider  pick the LLM and check its credential
//!  ├─ 3. Extract   oracle call (PDF attachment or text prompt)
//!  ├─ 4. Validate  line items + tax == grand total, to the cent
//!  ├─ 5. Decide    done / retry with feedback / human review
//!  └─ 6. Store     one transaction: invoice row + line item rows
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_invoice::{extract_invoice, ExtractionConfig, ExtractionOutcome, InputKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider from EDGEQUAKE_LLM_PROVIDER, otherwise gemini (GEMINI_API_KEY)
//!     let config = ExtractionConfig::default();
//!     let report = extract_invoice("data/invoice-correct.pdf", InputKind::Pdf, &config).await?;
//!     match report.outcome {
//!         ExtractionOutcome::Persisted { invoice_id, .. } => println!("stored as #{invoice_id}"),
//!         ExtractionOutcome::HumanReview { errors, .. } => eprintln!("review: {errors:?}"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoice-extract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-invoice = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod agent;
pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod oracle;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod store;
pub mod validate;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use agent::{AgentRun, AgentState, InvoiceAgent, Stage};
pub use config::{ExtractionConfig, ExtractionConfigBuilder, DEFAULT_DATABASE_PATH};
pub use error::{ErrorKind, ExtractionFailure, InvoiceError};
pub use extract::{
    extract_invoice, extract_invoice_sync, process_document, resolve_provider, ExtractionOutcome,
    ExtractionReport,
};
pub use model::{Invoice, LineItem};
pub use oracle::{oracle_for, ExtractionOracle, MultimodalPdfOracle, PlainTextOracle};
pub use pipeline::input::{load_document, Document, DocumentPayload, InputKind};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{dump_tables, save_invoice, InvoiceStore, TableDump};
pub use validate::validate;
