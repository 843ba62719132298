//! Prompts for LLM-based invoice extraction.
//!
//! Every piece of wording sent to the model lives here, so the rendered
//! instructions can be inspected in unit tests without a provider.
//!
//! Callers can override the system prompt via
//! [`crate::config::ExtractionConfig::system_prompt`]; the JSON contract and the
//! error feedback are always appended.

/// Default system prompt for invoice extraction.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert financial auditor. Your task is to extract structured data from the attached invoice.
- Be precise with numbers.
- If a value is missing, do not guess; return null.
- Ensure the line item 'total' equals 'quantity * price'."#;

/// Output contract appended to every extraction request.
///
/// Field names match [`crate::model::Invoice`] exactly so the response can be
/// deserialised without a mapping layer.
pub const JSON_OUTPUT_CONTRACT: &str = r#"Respond with a single JSON object and nothing else, using exactly these fields:
{
  "invoice_number": string,
  "invoice_date": "YYYY-MM-DD" or null,
  "due_date": "YYYY-MM-DD" or null,
  "customer_name": string or null,
  "customer_company": string or null,
  "customer_email": string or null,
  "line_items": [
    {"description": string, "price": number (unit price), "quantity": number, "total": number (quantity * price)}
  ],
  "subtotal": number (sum of all line item totals),
  "tax_rate": number (fraction, e.g. 0.1 for 10%),
  "tax_amount": number (subtotal * tax_rate),
  "grand_total": number (subtotal + tax_amount)
}"#;

const PDF_REQUEST: &str =
    "Extract structured data from the attached invoice PDF and return it in the required format.";

const TEXT_REQUEST: &str =
    "Extract structured data from the invoice text below and return it in the required format.";

/// Render prior validation errors as a correction request.
///
/// Returns an empty string when there is nothing to correct, so the first
/// attempt's prompt carries no feedback section at all.
pub fn error_feedback(errors: &[String]) -> String {
    if errors.is_empty() {
        return String::new();
    }
    format!(
        "Previous attempt had the following errors: {}. Please fix these errors and try again.",
        errors.join(", ")
    )
}

/// Instruction text for the multimodal request; the PDF travels as an
/// attachment alongside it.
pub fn pdf_instruction(errors: &[String]) -> String {
    join_sections(&[PDF_REQUEST, JSON_OUTPUT_CONTRACT, &error_feedback(errors)])
}

/// Full text-only request embedding pre-extracted invoice text.
pub fn text_instruction(text: &str, errors: &[String]) -> String {
    let document = format!("Invoice text:\n\"\"\"\n{}\n\"\"\"", text.trim());
    join_sections(&[
        TEXT_REQUEST,
        JSON_OUTPUT_CONTRACT,
        &document,
        &error_feedback(errors),
    ])
}

fn join_sections(sections: &[&str]) -> String {
    sections
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_has_no_feedback() {
        let text = pdf_instruction(&[]);
        assert!(text.starts_with(PDF_REQUEST));
        assert!(!text.contains("Previous attempt"));
        assert!(text.contains("\"grand_total\""));
    }

    #[test]
    fn feedback_lists_every_error() {
        let errors = vec![
            "Math mismatch: Line items + tax = 22.00, but invoice says 25.00".to_string(),
            "No invoice data found.".to_string(),
        ];
        let text = pdf_instruction(&errors);
        assert!(text.ends_with("Please fix these errors and try again."));
        assert!(text.contains("22.00, but invoice says 25.00, No invoice data found."));
    }

    #[test]
    fn text_instruction_embeds_document() {
        let text = text_instruction("  INVOICE #9\nTotal: 12.00  \n", &[]);
        assert!(text.contains("\"\"\"\nINVOICE #9\nTotal: 12.00\n\"\"\""));
        assert!(text.starts_with(TEXT_REQUEST));
    }

    #[test]
    fn feedback_comes_after_document_text() {
        let text = text_instruction("INVOICE #9", &["bad total".to_string()]);
        let doc_pos = text.find("INVOICE #9").unwrap();
        let fb_pos = text.find("Previous attempt").unwrap();
        assert!(fb_pos > doc_pos);
    }
}
