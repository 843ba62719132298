//! LLM interaction: send the extraction request and parse the reply.
//!
//! Prompt wording lives in
//! [`crate::prompts`] and retry policy lives in [`crate::agent`]. One call
//! here is exactly one provider round trip; a failure is returned as an
//! [`ExtractionFailure`] for the control loop to fold into its error list.
//!
//! ## Response cleanup
//!
//! Even when told to answer with bare JSON, models regularly wrap the object
//! in a ```json fence or add a sentence before it. The parser strips an outer
//! fence and then takes the outermost `{ … }` span before deserialising.

use crate::config::ExtractionConfig;
use crate::error::ExtractionFailure;
use crate::model::Invoice;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

static OUTER_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n(.*?)\n?\s*```\s*$").expect("valid regex")
});

/// Send `messages` to the provider and parse the reply as an [`Invoice`].
pub async fn request_invoice(
    provider: &Arc<dyn LLMProvider>,
    messages: &[ChatMessage],
    options: &CompletionOptions,
) -> Result<Invoice, ExtractionFailure> {
    let start = Instant::now();

    let response = provider
        .chat(messages, Some(options))
        .await
        .map_err(|e| {
            let detail = format!("{}", e);
            warn!("Extraction call failed: {}", detail);
            ExtractionFailure::Provider { detail }
        })?;

    debug!(
        "Extraction call: {} input tokens, {} output tokens, {:?}",
        response.prompt_tokens,
        response.completion_tokens,
        start.elapsed()
    );

    parse_invoice_response(&response.content)
}

/// Parse raw model output into an [`Invoice`].
pub fn parse_invoice_response(content: &str) -> Result<Invoice, ExtractionFailure> {
    if content.trim().is_empty() {
        return Err(ExtractionFailure::EmptyResponse);
    }

    let json = extract_json_object(content).ok_or_else(|| ExtractionFailure::MalformedResponse {
        detail: "no JSON object found in response".to_string(),
    })?;

    serde_json::from_str::<Invoice>(json).map_err(|e| ExtractionFailure::MalformedResponse {
        detail: e.to_string(),
    })
}

/// Locate the JSON object inside a model reply.
fn extract_json_object(content: &str) -> Option<&str> {
    let body = match OUTER_FENCE.captures(content) {
        Some(caps) => caps.get(1).map_or(content, |m| m.as_str()),
        None => content,
    };
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| &body[start..=end])
}

/// Build `CompletionOptions` from the extraction config.
pub fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVOICE_JSON: &str = r#"{"invoice_number":"INV-7","invoice_date":"2024-01-15","due_date":"2024-02-15","customer_name":"Jo","customer_company":"Acme","customer_email":"jo@acme.test","line_items":[{"description":"Widget","price":10.0,"quantity":2,"total":20.0}],"subtotal":20.0,"tax_rate":0.1,"tax_amount":2.0,"grand_total":22.0}"#;

    #[test]
    fn build_options_defaults() {
        let config = ExtractionConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn parses_bare_json() {
        let inv = parse_invoice_response(INVOICE_JSON).unwrap();
        assert_eq!(inv.invoice_number, "INV-7");
        assert_eq!(inv.grand_total, 22.0);
        assert_eq!(inv.line_items.len(), 1);
    }

    #[test]
    fn parses_fenced_json() {
        let content = format!("```json\n{INVOICE_JSON}\n```");
        let inv = parse_invoice_response(&content).unwrap();
        assert_eq!(inv.customer_company.as_deref(), Some("Acme"));
    }

    #[test]
    fn parses_json_surrounded_by_prose() {
        let content = format!("Here is the extracted invoice:\n{INVOICE_JSON}\nLet me know!");
        assert!(parse_invoice_response(&content).is_ok());
    }

    #[test]
    fn empty_response() {
        assert_eq!(
            parse_invoice_response("  \n").unwrap_err(),
            ExtractionFailure::EmptyResponse
        );
    }

    #[test]
    fn no_object_is_malformed() {
        let err = parse_invoice_response("I could not read the document.").unwrap_err();
        assert!(matches!(err, ExtractionFailure::MalformedResponse { .. }));
    }

    #[test]
    fn schema_mismatch_carries_parser_message() {
        let err = parse_invoice_response(r#"{"invoice_number": "X", "line_items": []}"#)
            .unwrap_err();
        match err {
            ExtractionFailure::MalformedResponse { detail } => {
                assert!(detail.contains("grand_total"), "got: {detail}")
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }
}
