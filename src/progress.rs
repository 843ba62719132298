//! Progress-callback trait for control-loop events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the agent extracts, validates and retries.
//!
//! # Example
//!
//! ```rust
//! use edgequake_invoice::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct AttemptCounter {
//!     attempts: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for AttemptCounter {
//!     fn on_attempt_start(&self, attempt: u32, max_attempts: u32) {
//!         self.attempts.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("attempt {attempt}/{max_attempts}");
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(AttemptCounter { attempts: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::agent::Stage;
use std::sync::Arc;

/// Called by the control loop as it moves between states.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before the first extraction attempt.
    fn on_run_start(&self, source: &str) {
        let _ = source;
    }

    /// Called just before the oracle is invoked.
    ///
    /// # Arguments
    /// * `attempt`     : 1-indexed attempt number
    /// * `max_attempts`: attempts allowed before escalation
    fn on_attempt_start(&self, attempt: u32, max_attempts: u32) {
        let _ = (attempt, max_attempts);
    }

    /// Called when the oracle call itself failed.
    fn on_extraction_failed(&self, attempt: u32, error: &str) {
        let _ = (attempt, error);
    }

    /// Called after validation with the resulting error list (empty on success).
    fn on_validated(&self, attempt: u32, errors: &[String]) {
        let _ = (attempt, errors);
    }

    /// Called once the loop reached `Done` or `HumanReview`.
    fn on_run_complete(&self, stage: Stage, attempts: u32) {
        let _ = (stage, attempts);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
