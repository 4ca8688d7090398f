//! Configuration types for batch invoice extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`],
//! built via its [`ExtractionConfigBuilder`]. Keeping every knob in one
//! struct makes it trivial to share configs across tasks and to diff two
//! runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A twelve-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use crate::error::WorkflowError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Default ceiling on a compressed page image: 4 MiB.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 4 * 1024 * 1024;

/// Configuration for a batch extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use invoiceflow::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .concurrency(8)
///     .model("gpt-4o")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Number of concurrent model calls. Default: 4.
    ///
    /// Model APIs are network-bound; independent pages share no mutable
    /// state, so parallel calls cut wall-clock time near-linearly until the
    /// provider's rate limit pushes back. If you hit `429` errors, lower
    /// this.
    pub concurrency: usize,

    /// Model identifier, e.g. "gpt-4o". If None, uses the provider default.
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected from the
    /// environment.
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the completion. Default: 0.0.
    ///
    /// Zero makes the model deterministic and faithful to what is printed
    /// on the page — exactly what field transcription wants.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 4000.
    ///
    /// Dense invoices with long line-item tables can exceed 2000 output
    /// tokens; setting this too low truncates the JSON mid-object and the
    /// page fails as unparsable.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient model failure. Default: 3.
    ///
    /// Permanent errors (bad API key) keep failing identically and simply
    /// exhaust the attempts; the page is then recorded as failed without
    /// aborting the batch.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s.
    pub retry_backoff_ms: u64,

    /// Per-model-call timeout in seconds. Default: 60.
    ///
    /// Extraction calls are the only operation with meaningful latency;
    /// without a bound a hung connection would pin its page in `Extracting`
    /// forever.
    pub api_timeout_secs: u64,

    /// Byte ceiling for a compressed page image. Default: 4 MiB.
    ///
    /// The preparation stage re-encodes at decreasing JPEG quality until the
    /// page fits, matching typical vision-API upload limits.
    pub max_image_bytes: usize,

    /// Custom system prompt. If None, uses the built-in six-section prompt.
    pub system_prompt: Option<String>,

    /// Progress callback fired per page. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4000,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            system_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_image_bytes", &self.max_image_bytes)
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
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

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

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn max_image_bytes(mut self, bytes: usize) -> Self {
        self.config.max_image_bytes = bytes;
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
    pub fn build(self) -> Result<ExtractionConfig, WorkflowError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(WorkflowError::InvalidConfig("concurrency must be ≥ 1".into()));
        }
        if c.max_image_bytes < 16 * 1024 {
            return Err(WorkflowError::InvalidConfig(format!(
                "max_image_bytes must be ≥ 16 KiB, got {}",
                c.max_image_bytes
            )));
        }
        Ok(self.config)
    }
}
