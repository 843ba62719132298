//! Invoice data model shared by the oracle, the validator and the store.
//!
//! The field set mirrors what the extraction prompt asks the model to return.
//! Identity and contact fields are optional because the model is instructed
//! to answer `null` instead of guessing; the money fields the validator relies
//! on (`price`, `quantity`, `grand_total`) are required so that a response
//! without them fails to parse and is fed back as a schema error.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One billed line of an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Free-text description of the product or service.
    #[serde(default)]
    pub description: String,
    /// Unit price.
    pub price: f64,
    /// Billed quantity.
    pub quantity: f64,
    /// Line total as printed on the invoice (`quantity * price` when correct).
    #[serde(default)]
    pub total: f64,
}

impl LineItem {
    pub fn new(description: impl Into<String>, price: f64, quantity: f64) -> Self {
        Self {
            description: description.into(),
            price,
            quantity,
            total: price * quantity,
        }
    }

    /// `price * quantity`, ignoring the stated line total.
    pub fn computed_total(&self) -> f64 {
        self.price * self.quantity
    }
}

/// A candidate invoice produced by one extraction attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Invoice number as printed. Not unique across runs.
    #[serde(default)]
    pub invoice_number: String,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub customer_name: Option<String>,
    pub customer_company: Option<String>,
    pub customer_email: Option<String>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    /// Stated subtotal. The validator recomputes it from the line items.
    #[serde(default)]
    pub subtotal: f64,
    /// Tax rate as a fraction (`0.1` for 10 %).
    #[serde(default)]
    pub tax_rate: f64,
    #[serde(default)]
    pub tax_amount: f64,
    pub grand_total: f64,
}

impl Invoice {
    /// Σ `price * quantity` over all line items.
    pub fn computed_subtotal(&self) -> f64 {
        self.line_items.iter().map(LineItem::computed_total).sum()
    }

    /// Computed subtotal plus tax at the stated rate, unrounded.
    pub fn expected_grand_total(&self) -> f64 {
        let subtotal = self.computed_subtotal();
        subtotal + subtotal * self.tax_rate
    }

    /// Name stored in the `vendor_name` column.
    pub fn vendor_name(&self) -> Option<&str> {
        self.customer_company.as_deref()
    }
}

/// Round to two decimal places, sending exact half-cent ties to the even cent
/// (`13.125` becomes `13.12`, `0.375` becomes `0.38`).
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Invoice {
        Invoice {
            invoice_number: "INV-001".into(),
            invoice_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            due_date: NaiveDate::from_ymd_opt(2024, 3, 31),
            customer_name: Some("Ada Lovelace".into()),
            customer_company: Some("Analytical Engines Ltd".into()),
            customer_email: Some("ada@example.com".into()),
            line_items: vec![LineItem::new("Widget", 10.0, 2.0), LineItem::new("Gadget", 2.5, 4.0)],
            subtotal: 30.0,
            tax_rate: 0.2,
            tax_amount: 6.0,
            grand_total: 36.0,
        }
    }

    #[test]
    fn computed_totals() {
        let inv = sample();
        assert_eq!(inv.computed_subtotal(), 30.0);
        assert_eq!(round2(inv.expected_grand_total()), 36.0);
    }

    #[test]
    fn computed_subtotal_ignores_stated_fields() {
        let mut inv = sample();
        inv.subtotal = 999.0;
        inv.line_items[0].total = 0.0;
        assert_eq!(inv.computed_subtotal(), 30.0);
    }

    #[test]
    fn round2_behaviour() {
        assert_eq!(round2(22.000000000000004), 22.0);
        assert_eq!(round2(19.999), 20.0);
        assert_eq!(round2(-3.456), -3.46);
        assert_eq!(round2(13.125), 13.12);
        assert_eq!(round2(0.375), 0.38);
    }

    #[test]
    fn deserialises_model_output_with_nulls() {
        let json = r#"{
            "invoice_number": "A-17",
            "invoice_date": "2024-05-02",
            "due_date": null,
            "customer_name": null,
            "customer_company": "Acme",
            "customer_email": null,
            "line_items": [{"description": "Bolt", "price": 0.5, "quantity": 10}],
            "tax_rate": 0.0,
            "grand_total": 5.0
        }"#;
        let inv: Invoice = serde_json::from_str(json).expect("valid invoice json");
        assert_eq!(inv.invoice_date, NaiveDate::from_ymd_opt(2024, 5, 2));
        assert!(inv.due_date.is_none());
        assert_eq!(inv.line_items[0].quantity, 10.0);
        assert_eq!(inv.line_items[0].total, 0.0);
        assert_eq!(inv.vendor_name(), Some("Acme"));
    }

    #[test]
    fn missing_grand_total_is_rejected() {
        let json = r#"{"invoice_number": "A-17", "line_items": []}"#;
        assert!(serde_json::from_str::<Invoice>(json).is_err());
    }
}
