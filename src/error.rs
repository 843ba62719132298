//! Error types for the edgequake-invoice library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`InvoiceError`]: **Fatal**: the run cannot proceed or its result cannot
//!   be stored (unreadable input, missing API key, database unreachable).
//!   Returned as `Err(InvoiceError)` from the top-level `extract*` functions.
//!
//! * [`ExtractionFailure`]: **Recoverable**: one oracle call failed (timeout,
//!   provider error, unparsable response). The control loop folds it into the
//!   error list and retries until the attempt budget is spent.
//!
//! Arithmetic mismatches are neither: they are plain strings produced by
//! [`crate::validate::validate`] and drive the same retry path.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of an [`InvoiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reported before any oracle call: bad input, bad credentials, bad config.
    Configuration,
    /// Reported after validation succeeded: the store could not be written.
    Persistence,
    /// Anything else (panicked task, runtime construction).
    Internal,
}

/// All fatal errors returned by the edgequake-invoice library.
#[derive(Debug, Error)]
pub enum InvoiceError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file was read but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}\nPass --text for pre-extracted text input.")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// Text input was requested but the file is not UTF-8.
    #[error("File is not UTF-8 text: '{path}'")]
    NotUtf8Text { path: PathBuf },

    // ── Provider errors ───────────────────────────────────────────────────
    /// No credential variable for the selected provider is set.
    #[error("No API key found for provider '{provider}'.\nSet one of: {}", .vars.join(", "))]
    MissingCredential { provider: String, vars: Vec<String> },

    /// The configured provider could not be constructed.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Persistence errors ────────────────────────────────────────────────
    /// The SQLite database could not be opened or its schema created.
    #[error("Failed to open invoice database '{path}': {source}")]
    StoreOpen {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The directory holding the database file could not be created.
    #[error("Failed to create database directory '{path}': {source}")]
    StoreDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Inserting a validated invoice failed; the transaction was rolled back.
    #[error("Failed to save invoice '{invoice_number}': {source}")]
    StoreWrite {
        invoice_number: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Reading the tables back failed.
    #[error("Failed to read invoice database: {0}")]
    StoreRead(#[source] rusqlite::Error),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InvoiceError {
    /// Classify the error so callers can tell setup problems from storage
    /// problems without matching every variant.
    pub fn kind(&self) -> ErrorKind {
        match self {
            InvoiceError::FileNotFound { .. }
            | InvoiceError::PermissionDenied { .. }
            | InvoiceError::InvalidInput { .. }
            | InvoiceError::DownloadFailed { .. }
            | InvoiceError::DownloadTimeout { .. }
            | InvoiceError::NotAPdf { .. }
            | InvoiceError::NotUtf8Text { .. }
            | InvoiceError::MissingCredential { .. }
            | InvoiceError::ProviderNotConfigured { .. }
            | InvoiceError::InvalidConfig(_) => ErrorKind::Configuration,
            InvoiceError::StoreOpen { .. }
            | InvoiceError::StoreDirectory { .. }
            | InvoiceError::StoreWrite { .. }
            | InvoiceError::StoreRead(_) => ErrorKind::Persistence,
            InvoiceError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// A single failed extraction attempt.
///
/// Never escapes the control loop: its `Display` text becomes an entry in
/// the error list that is fed back to the oracle on the next attempt.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionFailure {
    /// The oracle did not answer within the configured timeout.
    #[error("Extraction timed out after {after:?}")]
    Timeout { after: Duration },

    /// The LLM provider returned an error (network, auth, rate limit, 5xx).
    #[error("Extraction call failed: {detail}")]
    Provider { detail: String },

    /// The provider answered with no content.
    #[error("Extraction returned an empty response")]
    EmptyResponse,

    /// The response was not a JSON invoice matching the expected schema.
    #[error("Extraction response did not match the invoice schema: {detail}")]
    MalformedResponse { detail: String },

    /// The oracle cannot handle this kind of document.
    #[error("Oracle '{oracle}' cannot process {payload} documents")]
    UnsupportedPayload { oracle: String, payload: String },
}
