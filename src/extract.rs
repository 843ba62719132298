//! Top-level entry points: document in, stored invoice (or review case) out.
//!
//! ```text
//! load input ──▶ resolve provider ──▶ pick oracle ──▶ agent loop ──▶ store
//!  (config err)    (config err)                        │            (persistence err)
//!                                                      └──▶ human review (no write)
//! ```
//!
//! Configuration problems are reported before the first oracle call;
//! persistence problems after validation succeeded. Extraction and validation
//! problems never surface as `Err`: they are retried by the agent and, if the
//! budget runs out, returned as [`ExtractionOutcome::HumanReview`].

use crate::agent::{AgentRun, InvoiceAgent, Stage};
use crate::config::ExtractionConfig;
use crate::error::InvoiceError;
use crate::model::Invoice;
use crate::oracle::{oracle_for, ExtractionOracle};
use crate::pipeline::input::{self, Document, InputKind};
use crate::store;
use edgequake_llm::{LLMProvider, ProviderFactory};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Provider used when neither the config nor the environment names one.
pub const DEFAULT_PROVIDER: &str = "gemini";

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    /// The invoice validated and was written to the store.
    Persisted { invoice_id: i64, invoice: Invoice },
    /// The attempt budget ran out; nothing was written.
    HumanReview {
        errors: Vec<String>,
        last_candidate: Option<Invoice>,
    },
}

/// Result of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionReport {
    pub source: String,
    pub outcome: ExtractionOutcome,
    pub attempts: u32,
    pub iteration_count: u32,
    pub duration_ms: u64,
}

impl ExtractionReport {
    pub fn is_persisted(&self) -> bool {
        matches!(self.outcome, ExtractionOutcome::Persisted { .. })
    }
}

/// Extract an invoice from a PDF path or URL and store it.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Returns `Err(InvoiceError)` only for fatal errors:
/// - input not found / unreadable / not a PDF
/// - no credential for the selected provider
/// - the database could not be written after the invoice validated
pub async fn extract_invoice(
    input: impl AsRef<str>,
    kind: InputKind,
    config: &ExtractionConfig,
) -> Result<ExtractionReport, InvoiceError> {
    let input = input.as_ref();
    info!("Starting invoice extraction: {}", input);

    // ── Step 1: Load input ───────────────────────────────────────────────
    let document = input::load_document(input, kind, config.download_timeout_secs).await?;

    // ── Step 2: Get/create provider ──────────────────────────────────────
    let provider = resolve_provider(config, |var| std::env::var(var).ok())?;

    // ── Step 3: Pick the adapter for this payload ────────────────────────
    let oracle = oracle_for(&document.payload, provider, config);
    debug!("Using oracle {}", oracle.name());

    // ── Step 4: Run the agent and persist ────────────────────────────────
    process_document(&document, oracle, config).await
}

/// Synchronous wrapper around [`extract_invoice`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_invoice_sync(
    input: impl AsRef<str>,
    kind: InputKind,
    config: &ExtractionConfig,
) -> Result<ExtractionReport, InvoiceError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| InvoiceError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_invoice(input, kind, config))
}

/// Run the agent on an already-loaded document with the given oracle, then
/// persist the result if it validated.
pub async fn process_document(
    document: &Document,
    oracle: Arc<dyn ExtractionOracle>,
    config: &ExtractionConfig,
) -> Result<ExtractionReport, InvoiceError> {
    let start = Instant::now();
    let AgentRun { stage, state } = InvoiceAgent::new(oracle, config).run(document).await;

    let outcome = match (stage, state.invoice.clone()) {
        (Stage::Done, Some(invoice)) => {
            let invoice_id = store::save_invoice(&config.database_path, &invoice).await?;
            ExtractionOutcome::Persisted {
                invoice_id,
                invoice,
            }
        }
        (_, last_candidate) => {
            warn!("Please review the invoice data and correct the errors.");
            ExtractionOutcome::HumanReview {
                errors: state.errors.clone(),
                last_candidate,
            }
        }
    };

    Ok(ExtractionReport {
        source: state.source.clone(),
        outcome,
        attempts: state.attempts(),
        iteration_count: state.iteration_count,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Environment variables that can hold the API key for `provider`.
///
/// An empty slice means the provider needs no key (local servers).
pub fn credential_vars(provider: &str) -> &'static [&'static str] {
    match provider {
        "openai" => &["OPENAI_API_KEY"],
        "anthropic" => &["ANTHROPIC_API_KEY"],
        "gemini" => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        "mistral" => &["MISTRAL_API_KEY"],
        "azure" => &["AZURE_OPENAI_API_KEY"],
        "openrouter" => &["OPENROUTER_API_KEY"],
        _ => &[],
    }
}

/// Model used when the caller names a provider but no model.
pub fn default_model(provider: &str) -> Option<&'static str> {
    match provider {
        "gemini" => Some("gemini-2.5-flash-lite"),
        "openai" | "azure" => Some("gpt-4.1-nano"),
        "anthropic" => Some("claude-sonnet-4-20250514"),
        "mistral" => Some("pixtral-12b-2409"),
        "ollama" | "lmstudio" => Some("llava"),
        _ => None,
    }
}

/// Fail fast when no credential for `provider` is present.
pub fn check_credential(
    provider: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), InvoiceError> {
    let vars = credential_vars(provider);
    if vars.is_empty() {
        return Ok(());
    }
    let found = vars
        .iter()
        .any(|var| lookup(var).is_some_and(|v| !v.trim().is_empty()));
    if found {
        Ok(())
    } else {
        Err(InvoiceError::MissingCredential {
            provider: provider.to_string(),
            vars: vars.iter().map(|v| v.to_string()).collect(),
        })
    }
}

/// Pick the provider name and model, from most-specific to least-specific.
///
/// 1. **Named provider** (`config.provider_name`) with `config.model` or the
///    provider's default model.
/// 2. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 3. **Default**: `gemini` with `gemini-2.5-flash-lite`.
pub fn select_provider(
    config: &ExtractionConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(String, String), InvoiceError> {
    let non_empty = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

    let name = match config.provider_name {
        Some(ref name) => name.clone(),
        None => non_empty("EDGEQUAKE_LLM_PROVIDER").unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
    };
    let model = config
        .model
        .clone()
        .or_else(|| {
            if config.provider_name.is_none() {
                non_empty("EDGEQUAKE_MODEL")
            } else {
                None
            }
        })
        .or_else(|| default_model(&name).map(str::to_string))
        .ok_or_else(|| {
            InvoiceError::InvalidConfig(format!(
                "No default model for provider '{}'; pass --model",
                name
            ))
        })?;
    Ok((name, model))
}

/// Resolve the LLM provider for this run.
///
/// A pre-built provider in the config is used as-is. Otherwise the provider
/// is selected by [`select_provider`], its credential checked, and the
/// instance created with [`ProviderFactory::create_llm_provider`].
pub fn resolve_provider(
    config: &ExtractionConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn LLMProvider>, InvoiceError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let (name, model) = select_provider(config, &lookup)?;
    check_credential(&name, &lookup)?;
    info!("Using provider {} with model {}", name, model);

    ProviderFactory::create_llm_provider(&name, &model).map_err(|e| {
        InvoiceError::ProviderNotConfigured {
            provider: name.clone(),
            hint: format!("{e}"),
        }
    })
}
