//! The extraction control loop.
//!
//! A run alternates between calling the oracle and validating its output:
//!
//! ```text
//!            ┌──────────── Retrying ◀──────────┐
//!            ▼                                 │ errors, budget left
//!  ──▶ Extracting ──▶ Validating ──▶ decide ───┤
//!                                              ├──▶ Done         (no errors)
//!                                              └──▶ HumanReview  (budget spent)
//! ```
//!
//! Both the extraction and the validation step bump `iteration_count`, so one
//! full cycle adds 2. The attempt budget is checked against completed
//! extraction attempts (`iteration_count / 2`): with `max_retries = 3` the loop
//! escalates after the 4th failed attempt with `iteration_count == 8`.
//!
//! [`decide`] and [`next_stage`] are pure so the state machine can be tested
//! without an oracle; [`InvoiceAgent::run`] is the only part doing I/O.

use crate::config::ExtractionConfig;
use crate::error::ExtractionFailure;
use crate::model::Invoice;
use crate::oracle::ExtractionOracle;
use crate::pipeline::input::Document;
use crate::progress::ProgressCallback;
use crate::validate::validate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Control-loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Calling the oracle.
    Extracting,
    /// Checking the candidate's arithmetic.
    Validating,
    /// Transient: routes back to `Extracting` with the errors as feedback.
    Retrying,
    /// Terminal failure: the attempt budget is spent.
    HumanReview,
    /// Terminal success: the candidate is ready to persist.
    Done,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::HumanReview | Stage::Done)
    }
}

/// Outcome of the post-validation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Finalize,
    Retry,
    Escalate,
}

/// Decide what follows a validation step.
///
/// Total over every `(errors, iteration_count)` pair: an empty error list
/// always finalizes, otherwise the completed attempt count is compared with
/// the retry budget.
pub fn decide(errors: &[String], iteration_count: u32, max_retries: u32) -> Decision {
    if errors.is_empty() {
        Decision::Finalize
    } else if completed_attempts(iteration_count) > max_retries {
        Decision::Escalate
    } else {
        Decision::Retry
    }
}

/// Pure transition function.
pub fn next_stage(stage: Stage, errors: &[String], iteration_count: u32, max_retries: u32) -> Stage {
    match stage {
        Stage::Extracting => Stage::Validating,
        Stage::Validating => match decide(errors, iteration_count, max_retries) {
            Decision::Finalize => Stage::Done,
            Decision::Retry => Stage::Retrying,
            Decision::Escalate => Stage::HumanReview,
        },
        Stage::Retrying => Stage::Extracting,
        Stage::HumanReview => Stage::HumanReview,
        Stage::Done => Stage::Done,
    }
}

/// Extraction attempts represented by an iteration count.
pub fn completed_attempts(iteration_count: u32) -> u32 {
    iteration_count / 2
}

/// Working memory of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentState {
    /// Input string the document was loaded from.
    pub source: String,
    /// Candidate from the latest extraction attempt, if it succeeded.
    pub invoice: Option<Invoice>,
    /// Errors from the latest step; fed back to the oracle on retry.
    pub errors: Vec<String>,
    /// Incremented once per extraction and once per validation.
    pub iteration_count: u32,
}

impl AgentState {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            invoice: None,
            errors: Vec::new(),
            iteration_count: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        completed_attempts(self.iteration_count)
    }
}

/// A finished run: terminal stage plus the final state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRun {
    pub stage: Stage,
    pub state: AgentState,
}

impl AgentRun {
    /// The validated invoice, if the run reached [`Stage::Done`].
    pub fn validated_invoice(&self) -> Option<&Invoice> {
        match self.stage {
            Stage::Done => self.state.invoice.as_ref(),
            _ => None,
        }
    }
}

/// Drives an [`ExtractionOracle`] through the extract/validate/retry cycle.
pub struct InvoiceAgent {
    oracle: Arc<dyn ExtractionOracle>,
    max_retries: u32,
    timeout: Duration,
    progress: Option<ProgressCallback>,
}

impl InvoiceAgent {
    pub fn new(oracle: Arc<dyn ExtractionOracle>, config: &ExtractionConfig) -> Self {
        Self {
            oracle,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.api_timeout_secs),
            progress: config.progress_callback.clone(),
        }
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the loop until it reaches `Done` or `HumanReview`.
    pub async fn run(&self, document: &Document) -> AgentRun {
        let mut state = AgentState::new(document.source.clone());
        let mut stage = Stage::Extracting;
        let max_attempts = self.max_retries.saturating_add(1);

        info!(
            "Starting invoice agent on {} with oracle {}",
            document.source,
            self.oracle.name()
        );
        if let Some(ref cb) = self.progress {
            cb.on_run_start(&document.source);
        }

        while !stage.is_terminal() {
            match stage {
                Stage::Extracting => self.extract_step(document, &mut state, max_attempts).await,
                Stage::Validating => self.validate_step(&mut state),
                Stage::Retrying => {
                    info!("Retrying extraction with error feedback.");
                }
                Stage::HumanReview | Stage::Done => {}
            }
            stage = next_stage(stage, &state.errors, state.iteration_count, self.max_retries);
            debug!("Next stage: {:?} (iteration {})", stage, state.iteration_count);
        }

        match stage {
            Stage::Done => info!("Invoice validated after {} attempt(s)", state.attempts()),
            _ => warn!(
                "Escalating to human review after {} attempts: {}",
                state.attempts(),
                state.errors.join("; ")
            ),
        }
        if let Some(ref cb) = self.progress {
            cb.on_run_complete(stage, state.attempts());
        }

        AgentRun { stage, state }
    }

    async fn extract_step(&self, document: &Document, state: &mut AgentState, max_attempts: u32) {
        let attempt = state.attempts() + 1;
        if let Some(ref cb) = self.progress {
            cb.on_attempt_start(attempt, max_attempts);
        }
        info!("Extraction attempt {}/{}", attempt, max_attempts);

        let result = match tokio::time::timeout(
            self.timeout,
            self.oracle.extract(document, &state.errors),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExtractionFailure::Timeout {
                after: self.timeout,
            }),
        };

        match result {
            Ok(invoice) => {
                state.invoice = Some(invoice);
                state.errors.clear();
            }
            Err(failure) => {
                warn!("Attempt {}: {}", attempt, failure);
                if let Some(ref cb) = self.progress {
                    cb.on_extraction_failed(attempt, &failure.to_string());
                }
                state.invoice = None;
                state.errors = vec![failure.to_string()];
            }
        }
        state.iteration_count += 1;
    }

    fn validate_step(&self, state: &mut AgentState) {
        let mut errors = std::mem::take(&mut state.errors);
        errors.extend(validate(state.invoice.as_ref()));
        state.errors = errors;
        state.iteration_count += 1;
        if let Some(ref cb) = self.progress {
            cb.on_validated(state.attempts(), &state.errors);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LineItem;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn invoice(grand_total: f64) -> Invoice {
        Invoice {
            invoice_number: "INV-1".into(),
            invoice_date: None,
            due_date: None,
            customer_name: None,
            customer_company: Some("Acme".into()),
            customer_email: None,
            line_items: vec![LineItem::new("Widget", 10.0, 2.0)],
            subtotal: 20.0,
            tax_rate: 0.1,
            tax_amount: 2.0,
            grand_total,
        }
    }

    /// Replays canned results and records the feedback it was given.
    struct ScriptedOracle {
        script: Mutex<VecDeque<Result<Invoice, ExtractionFailure>>>,
        feedback: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedOracle {
        fn new(script: Vec<Result<Invoice, ExtractionFailure>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                feedback: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.feedback.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ExtractionOracle for ScriptedOracle {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn extract(
            &self,
            _document: &Document,
            prior_errors: &[String],
        ) -> Result<Invoice, ExtractionFailure> {
            self.feedback.lock().unwrap().push(prior_errors.to_vec());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ExtractionFailure::EmptyResponse))
        }
    }

    struct SlowOracle;

    #[async_trait]
    impl ExtractionOracle for SlowOracle {
        fn name(&self) -> &str {
            "slow"
        }

        async fn extract(&self, _: &Document, _: &[String]) -> Result<Invoice, ExtractionFailure> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(invoice(22.0))
        }
    }

    fn document() -> Document {
        Document::pdf("invoice.pdf", b"%PDF-1.7".to_vec())
    }

    fn agent(oracle: Arc<dyn ExtractionOracle>) -> InvoiceAgent {
        InvoiceAgent::new(oracle, &ExtractionConfig::default())
    }

    fn provider_down() -> ExtractionFailure {
        ExtractionFailure::Provider {
            detail: "503 Service Unavailable".into(),
        }
    }

    // ── Pure state machine ───────────────────────────────────────────────

    #[test]
    fn decide_finalizes_on_empty_errors_at_any_count() {
        for count in [0, 1, 2, 7, 8, 100, u32::MAX] {
            assert_eq!(decide(&[], count, 3), Decision::Finalize);
        }
    }

    #[test]
    fn decide_retries_until_budget_is_spent() {
        let errors = vec!["bad".to_string()];
        assert_eq!(decide(&errors, 2, 3), Decision::Retry);
        assert_eq!(decide(&errors, 4, 3), Decision::Retry);
        assert_eq!(decide(&errors, 6, 3), Decision::Retry);
        assert_eq!(decide(&errors, 7, 3), Decision::Retry);
        assert_eq!(decide(&errors, 8, 3), Decision::Escalate);
        assert_eq!(decide(&errors, u32::MAX, 3), Decision::Escalate);
    }

    #[test]
    fn zero_retries_escalates_after_first_attempt() {
        let errors = vec!["bad".to_string()];
        assert_eq!(decide(&errors, 2, 0), Decision::Escalate);
    }

    #[test]
    fn next_stage_covers_every_state() {
        let errors = vec!["bad".to_string()];
        assert_eq!(next_stage(Stage::Extracting, &errors, 1, 3), Stage::Validating);
        assert_eq!(next_stage(Stage::Validating, &[], 2, 3), Stage::Done);
        assert_eq!(next_stage(Stage::Validating, &errors, 2, 3), Stage::Retrying);
        assert_eq!(next_stage(Stage::Validating, &errors, 8, 3), Stage::HumanReview);
        assert_eq!(next_stage(Stage::Retrying, &errors, 2, 3), Stage::Extracting);
        assert_eq!(next_stage(Stage::Done, &errors, 8, 3), Stage::Done);
        assert_eq!(next_stage(Stage::HumanReview, &[], 8, 3), Stage::HumanReview);
    }

    #[test]
    fn terminal_stages() {
        assert!(Stage::Done.is_terminal());
        assert!(Stage::HumanReview.is_terminal());
        assert!(!Stage::Extracting.is_terminal());
        assert!(!Stage::Validating.is_terminal());
        assert!(!Stage::Retrying.is_terminal());
    }

    // ── Driven loop ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn valid_first_attempt_is_done() {
        let oracle = ScriptedOracle::new(vec![Ok(invoice(22.0))]);
        let run = agent(oracle.clone()).run(&document()).await;

        assert_eq!(run.stage, Stage::Done);
        assert_eq!(run.state.iteration_count, 2);
        assert!(run.state.errors.is_empty());
        assert_eq!(run.validated_invoice(), Some(&invoice(22.0)));
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn persistent_oracle_failure_escalates_after_four_attempts() {
        let oracle = ScriptedOracle::new((0..4).map(|_| Err(provider_down())).collect());
        let run = agent(oracle.clone()).run(&document()).await;

        assert_eq!(run.stage, Stage::HumanReview);
        assert_eq!(run.state.iteration_count, 8);
        assert_eq!(run.state.attempts(), 4);
        assert_eq!(oracle.calls(), 4);
        assert!(run.validated_invoice().is_none());
        assert_eq!(
            run.state.errors,
            vec![
                provider_down().to_string(),
                "No invoice data found.".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn mismatch_then_correct_finishes_after_two_attempts() {
        let oracle = ScriptedOracle::new(vec![Ok(invoice(25.0)), Ok(invoice(22.0))]);
        let run = agent(oracle.clone()).run(&document()).await;

        assert_eq!(run.stage, Stage::Done);
        assert_eq!(run.state.iteration_count, 4);
        assert_eq!(oracle.calls(), 2);

        let feedback = oracle.feedback.lock().unwrap();
        assert!(feedback[0].is_empty());
        assert_eq!(feedback[1].len(), 1);
        assert!(feedback[1][0].contains("25.00"), "got: {:?}", feedback[1]);
    }

    #[tokio::test]
    async fn oracle_failure_is_fed_back_and_retried() {
        let oracle = ScriptedOracle::new(vec![Err(provider_down()), Ok(invoice(22.0))]);
        let run = agent(oracle.clone()).run(&document()).await;

        assert_eq!(run.stage, Stage::Done);
        let feedback = oracle.feedback.lock().unwrap();
        assert_eq!(feedback[1][0], provider_down().to_string());
        assert_eq!(feedback[1][1], "No invoice data found.");
    }

    #[tokio::test]
    async fn failed_attempt_discards_previous_candidate() {
        let oracle = ScriptedOracle::new(vec![
            Ok(invoice(25.0)),
            Err(provider_down()),
            Err(provider_down()),
            Err(provider_down()),
        ]);
        let run = agent(oracle).run(&document()).await;

        assert_eq!(run.stage, Stage::HumanReview);
        assert!(run.state.invoice.is_none());
    }

    #[tokio::test]
    async fn iteration_count_grows_by_two_per_cycle() {
        let oracle = ScriptedOracle::new(vec![
            Ok(invoice(30.0)),
            Ok(invoice(31.0)),
            Ok(invoice(22.0)),
        ]);
        let run = agent(oracle).run(&document()).await;
        assert_eq!(run.stage, Stage::Done);
        assert_eq!(run.state.iteration_count, 6);
        assert_eq!(run.state.attempts(), 3);
    }

    #[tokio::test]
    async fn retry_budget_follows_config() {
        let oracle = ScriptedOracle::new(vec![Ok(invoice(25.0)), Ok(invoice(22.0))]);
        let config = ExtractionConfig::builder().max_retries(0).build().unwrap();
        let run = InvoiceAgent::new(oracle.clone(), &config).run(&document()).await;

        assert_eq!(run.stage, Stage::HumanReview);
        assert_eq!(run.state.iteration_count, 2);
        assert_eq!(oracle.calls(), 1);
        assert_eq!(run.state.invoice, Some(invoice(25.0)));
    }

    #[tokio::test]
    async fn slow_oracle_times_out() {
        let config = ExtractionConfig::builder().max_retries(1).build().unwrap();
        let run = InvoiceAgent::new(Arc::new(SlowOracle), &config)
            .with_timeout(Duration::from_millis(10))
            .run(&document())
            .await;

        assert_eq!(run.stage, Stage::HumanReview);
        assert_eq!(run.state.iteration_count, 4);
        assert_eq!(run.state.errors[0], "Extraction timed out after 10ms");
    }

    #[tokio::test]
    async fn progress_events_follow_the_loop() {
        use crate::progress::ExtractionProgressCallback;

        #[derive(Default)]
        struct Recorder(Mutex<Vec<String>>);

        impl ExtractionProgressCallback for Recorder {
            fn on_attempt_start(&self, attempt: u32, max_attempts: u32) {
                self.0.lock().unwrap().push(format!("start {attempt}/{max_attempts}"));
            }
            fn on_extraction_failed(&self, attempt: u32, _error: &str) {
                self.0.lock().unwrap().push(format!("failed {attempt}"));
            }
            fn on_validated(&self, attempt: u32, errors: &[String]) {
                self.0.lock().unwrap().push(format!("validated {attempt} {}", errors.len()));
            }
            fn on_run_complete(&self, stage: Stage, attempts: u32) {
                self.0.lock().unwrap().push(format!("{stage:?} {attempts}"));
            }
        }

        let recorder = Arc::new(Recorder::default());
        let config = ExtractionConfig::builder()
            .progress_callback(recorder.clone())
            .build()
            .unwrap();
        let oracle = ScriptedOracle::new(vec![Err(provider_down()), Ok(invoice(22.0))]);
        InvoiceAgent::new(oracle, &config).run(&document()).await;

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                "start 1/4",
                "failed 1",
                "validated 1 2",
                "start 2/4",
                "validated 2 0",
                "Done 2",
            ]
        );
    }
}
