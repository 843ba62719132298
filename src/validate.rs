//! Arithmetic consistency check for extracted invoices.
//!
//! The model reads numbers off the page and will occasionally misread a digit
//! or a tax rate. Recomputing the grand total from the line items catches
//! those slips without trusting any total the model reported. The returned
//! strings are written for two audiences: the model on the next attempt, and
//! a human reviewer if the attempt budget runs out.

use crate::model::{round2, Invoice};
use std::fmt;
use tracing::{debug, info};

/// A single consistency problem found by [`validate`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationMismatch {
    /// The oracle produced nothing usable.
    MissingInvoice,
    /// Line items plus tax do not add up to the stated grand total.
    GrandTotal { computed: f64, stated: f64 },
}

impl fmt::Display for ValidationMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationMismatch::MissingInvoice => write!(f, "No invoice data found."),
            ValidationMismatch::GrandTotal { computed, stated } => write!(
                f,
                "Math mismatch: Line items + tax = {:.2}, but invoice says {:.2}",
                computed, stated
            ),
        }
    }
}

/// Check an invoice candidate and describe every inconsistency found.
pub fn check(invoice: Option<&Invoice>) -> Vec<ValidationMismatch> {
    let Some(invoice) = invoice else {
        return vec![ValidationMismatch::MissingInvoice];
    };

    let computed = invoice.expected_grand_total();
    debug!(
        "Invoice {}: subtotal {} over {} line items, tax rate {}",
        invoice.invoice_number,
        invoice.computed_subtotal(),
        invoice.line_items.len(),
        invoice.tax_rate
    );

    let mut issues = Vec::new();
    if round2(computed) != round2(invoice.grand_total) {
        issues.push(ValidationMismatch::GrandTotal {
            computed: round2(computed),
            stated: invoice.grand_total,
        });
    }
    issues
}

/// Validate an invoice candidate. An empty list means the invoice is
/// consistent and may be persisted.
pub fn validate(invoice: Option<&Invoice>) -> Vec<String> {
    let errors: Vec<String> = check(invoice).iter().map(ToString::to_string).collect();
    for e in &errors {
        info!("{}", e);
    }
    errors
}
