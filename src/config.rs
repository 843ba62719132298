//! Configuration types for invoice extraction.
//!
//! All run behaviour is controlled through [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. The config is resolved once at startup and
//! passed into the agent and the store; nothing reads the environment mid-run.

use crate::error::InvoiceError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default location of the SQLite database.
pub const DEFAULT_DATABASE_PATH: &str = "data/invoice.db";

/// Configuration for one extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_invoice::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .provider_name("gemini")
///     .model("gemini-2.5-flash-lite")
///     .max_retries(3)
///     .database_path("data/invoice.db")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// LLM model identifier, e.g. "gemini-2.5-flash-lite", "gpt-4.1-nano".
    /// If None, uses the default for the resolved provider.
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai", "anthropic").
    /// If None along with `provider`, falls back to the environment and then
    /// to `gemini`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`
    /// and skips the credential check.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Extraction is transcription, not generation; any randomness only adds
    /// misread digits.
    pub temperature: f32,

    /// Maximum tokens the model may generate per attempt. Default: 4096.
    pub max_tokens: usize,

    /// Retries after the first attempt before escalating to human review. Default: 3.
    ///
    /// The loop performs at most `max_retries + 1` extraction calls. The cap
    /// bounds API spend on documents the model keeps misreading.
    pub max_retries: u32,

    /// Per-oracle-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// SQLite database file. Default: `data/invoice.db`.
    pub database_path: PathBuf,

    /// Custom system prompt. If None, uses built-in default.
    pub system_prompt: Option<String>,

    /// Receives control-loop events. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 3,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            system_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("database_path", &self.database_path)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Extraction attempts allowed before the loop escalates.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = path.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, InvoiceError> {
        let c = &self.config;
        if c.api_timeout_secs == 0 {
            return Err(InvoiceError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(InvoiceError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.database_path.as_os_str().is_empty() {
            return Err(InvoiceError::InvalidConfig(
                "Database path must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.temperature, 0.0);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.max_attempts(), 4);
        assert_eq!(c.api_timeout_secs, 60);
        assert_eq!(c.database_path, PathBuf::from("data/invoice.db"));
    }

    #[test]
    fn builder_clamps_temperature() {
        let c = ExtractionConfig::builder().temperature(5.0).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let err = ExtractionConfig::builder()
            .api_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, InvoiceError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_empty_database_path() {
        assert!(ExtractionConfig::builder().database_path("").build().is_err());
    }

    #[test]
    fn max_attempts_saturates() {
        let c = ExtractionConfig::builder().max_retries(u32::MAX).build().unwrap();
        assert_eq!(c.max_attempts(), u32::MAX);
    }

    #[test]
    fn debug_hides_provider_object() {
        let c = ExtractionConfig::builder().provider_name("openai").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(dbg.contains("openai"));
        assert!(dbg.contains("provider: None"));
    }
}
