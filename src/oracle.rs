//! Extraction oracles: turn a document into a candidate [`Invoice`].
//!
//! The control loop only knows the [`ExtractionOracle`] trait, so any model or
//! service can be substituted without touching retry logic. Two LLM-backed
//! adapters are provided:
//!
//! * [`MultimodalPdfOracle`]: sends the instruction text plus the PDF itself
//!   as a base64 attachment (Gemini, Claude and other PDF-capable models).
//! * [`PlainTextOracle`]: sends a text-only prompt embedding text that was
//!   extracted from the invoice beforehand; works with any chat model.
//!
//! An oracle performs no arithmetic checks and keeps no state between calls.

use crate::config::ExtractionConfig;
use crate::error::ExtractionFailure;
use crate::model::Invoice;
use crate::pipeline::encode::encode_pdf;
use crate::pipeline::input::{Document, DocumentPayload};
use crate::pipeline::llm::{build_options, request_invoice};
use crate::prompts::{pdf_instruction, text_instruction, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use tracing::debug;

/// A fallible, external service that reads an invoice.
#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    /// Short identifier used in logs and error messages.
    fn name(&self) -> &str;

    /// Extract an invoice from `document`.
    ///
    /// `prior_errors` holds the problems found in the previous attempt; it is
    /// empty on the first call.
    async fn extract(
        &self,
        document: &Document,
        prior_errors: &[String],
    ) -> Result<Invoice, ExtractionFailure>;
}

/// Settings shared by both LLM adapters.
struct LlmSettings {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
}

impl LlmSettings {
    fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            options: build_options(config),
        }
    }
}

/// Sends the PDF as a multimodal attachment.
pub struct MultimodalPdfOracle {
    llm: LlmSettings,
}

impl MultimodalPdfOracle {
    pub const NAME: &'static str = "multimodal-pdf";

    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            llm: LlmSettings::new(provider, config),
        }
    }
}

#[async_trait]
impl ExtractionOracle for MultimodalPdfOracle {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn extract(
        &self,
        document: &Document,
        prior_errors: &[String],
    ) -> Result<Invoice, ExtractionFailure> {
        let DocumentPayload::Pdf(bytes) = &document.payload else {
            return Err(unsupported(self.name(), &document.payload));
        };

        let messages = vec![
            ChatMessage::system(self.llm.system_prompt.clone()),
            ChatMessage::user_with_images(pdf_instruction(prior_errors), vec![encode_pdf(bytes)]),
        ];
        debug!(
            "{}: sending {} with {} prior errors",
            self.name(),
            document.source,
            prior_errors.len()
        );
        request_invoice(&self.llm.provider, &messages, &self.llm.options).await
    }
}

/// Sends pre-extracted invoice text in a text-only prompt.
pub struct PlainTextOracle {
    llm: LlmSettings,
}

impl PlainTextOracle {
    pub const NAME: &'static str = "plain-text";

    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            llm: LlmSettings::new(provider, config),
        }
    }
}

#[async_trait]
impl ExtractionOracle for PlainTextOracle {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn extract(
        &self,
        document: &Document,
        prior_errors: &[String],
    ) -> Result<Invoice, ExtractionFailure> {
        let DocumentPayload::Text(text) = &document.payload else {
            return Err(unsupported(self.name(), &document.payload));
        };

        let messages = vec![
            ChatMessage::system(self.llm.system_prompt.clone()),
            ChatMessage::user(text_instruction(text, prior_errors)),
        ];
        debug!(
            "{}: sending {} chars from {} with {} prior errors",
            self.name(),
            text.len(),
            document.source,
            prior_errors.len()
        );
        request_invoice(&self.llm.provider, &messages, &self.llm.options).await
    }
}

/// Pick the adapter matching the document's payload.
pub fn oracle_for(
    payload: &DocumentPayload,
    provider: Arc<dyn LLMProvider>,
    config: &ExtractionConfig,
) -> Arc<dyn ExtractionOracle> {
    match payload {
        DocumentPayload::Pdf(_) => Arc::new(MultimodalPdfOracle::new(provider, config)),
        DocumentPayload::Text(_) => Arc::new(PlainTextOracle::new(provider, config)),
    }
}

fn unsupported(oracle: &str, payload: &DocumentPayload) -> ExtractionFailure {
    ExtractionFailure::UnsupportedPayload {
        oracle: oracle.to_string(),
        payload: payload.kind().to_string(),
    }
}
