//! The extraction-client boundary: encoded page in, structured record out.
//!
//! The workflow engine treats extraction as an opaque collaborator, so the
//! seam is a small object-safe trait ([`ExtractionClient`]) that tests can
//! stub without any network. The production implementation,
//! [`VisionExtractionClient`], drives an `edgequake_llm` vision provider:
//! prompt assembly, per-call timeout, retry with exponential backoff, and
//! parsing of the model's reply.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from model APIs are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^attempt`)
//! avoids thundering-herd: with 500 ms base and 3 retries the wait sequence
//! is 500 ms → 1 s → 2 s, totalling < 4 s of back-off per page. Unparsable
//! *content* is not retried — the model answered, it just answered badly,
//! and that failure is recorded on the page.

use crate::batch::CancelToken;
use crate::config::ExtractionConfig;
use crate::engine::PageKey;
use crate::error::{ExtractionError, WorkflowError};
use crate::pipeline::prepare;
use crate::prompts::{DEFAULT_SYSTEM_PROMPT, EXTRACTION_USER_PROMPT};
use crate::value::Value;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Model used when neither config nor environment names one.
const DEFAULT_MODEL: &str = "gpt-4o";

/// Opaque extraction collaborator: one compressed page image in, one
/// structured record (or a page-level error) out.
///
/// Implementations must be `Send + Sync`; pages are extracted concurrently.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Extract the structured record for one page.
    ///
    /// Never panics on model misbehaviour: every failure mode maps to an
    /// [`ExtractionError`] that the engine records on the page.
    async fn extract(&self, key: &PageKey, jpeg: &[u8]) -> Result<Value, ExtractionError>;
}

/// Production [`ExtractionClient`] over an `edgequake_llm` vision provider.
pub struct VisionExtractionClient {
    provider: Arc<dyn LLMProvider>,
    config: ExtractionConfig,
    cancel: CancelToken,
}

impl VisionExtractionClient {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        config: &ExtractionConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            provider,
            config: config.clone(),
            cancel,
        }
    }

    /// Resolve the provider from the config/environment and build a client.
    pub fn from_config(
        config: &ExtractionConfig,
        cancel: CancelToken,
    ) -> Result<Self, WorkflowError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config, cancel))
    }
}

#[async_trait]
impl ExtractionClient for VisionExtractionClient {
    async fn extract(&self, key: &PageKey, jpeg: &[u8]) -> Result<Value, ExtractionError> {
        let start = Instant::now();
        let system_prompt = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);

        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user_with_images(EXTRACTION_USER_PROMPT, vec![prepare::encode_page(jpeg)]),
        ];
        let options = CompletionOptions {
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
            ..Default::default()
        };

        let call_timeout = Duration::from_secs(self.config.api_timeout_secs);
        let mut last_err: Option<String> = None;
        let mut timed_out = false;

        for attempt in 0..=self.config.max_retries {
            if self.cancel.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }
            if attempt > 0 {
                let backoff = self.config.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{key}: retry {}/{} after {}ms",
                    attempt, self.config.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(call_timeout, self.provider.chat(&messages, Some(&options))).await {
                Ok(Ok(response)) => {
                    debug!(
                        "{key}: {} input tokens, {} output tokens, {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    // Content-level failures are not transient; no retry.
                    return parse_record(&response.content);
                }
                Ok(Err(e)) => {
                    let err_msg = format!("{e}");
                    warn!("{key}: attempt {} failed — {}", attempt + 1, err_msg);
                    last_err = Some(err_msg);
                    timed_out = false;
                }
                Err(_) => {
                    warn!(
                        "{key}: attempt {} timed out after {}s",
                        attempt + 1,
                        self.config.api_timeout_secs
                    );
                    timed_out = true;
                }
            }
        }

        if timed_out {
            Err(ExtractionError::Timeout {
                secs: self.config.api_timeout_secs,
            })
        } else {
            Err(ExtractionError::Api {
                retries: self.config.max_retries as u8,
                detail: last_err.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }
}

/// Parse the model's reply into a [`Value`] tree.
///
/// Models occasionally wrap the JSON in prose or markdown fences despite
/// the prompt; slicing from the first `{` to the last `}` recovers the
/// object in all those cases. Anything that still fails to parse is an
/// [`ExtractionError::Unparsable`] carrying the parser's description.
pub(crate) fn parse_record(content: &str) -> Result<Value, ExtractionError> {
    let (Some(start), Some(end)) = (content.find('{'), content.rfind('}')) else {
        return Err(ExtractionError::Unparsable {
            detail: "reply contains no JSON object".to_string(),
        });
    };
    if end < start {
        return Err(ExtractionError::Unparsable {
            detail: "reply contains no JSON object".to_string(),
        });
    }
    let json: serde_json::Value =
        serde_json::from_str(&content[start..=end]).map_err(|e| ExtractionError::Unparsable {
            detail: e.to_string(),
        })?;
    Ok(Value::from(json))
}

/// Resolve the model provider, from most-specific to least-specific.
///
/// The fallback chain lets library users and CLI users each set exactly as
/// much or as little as they need:
///
/// 1. **Pre-built provider** (`config.provider`) — the caller constructed
///    and configured the provider entirely; used as-is.
/// 2. **Named provider + model** (`config.provider_name`) — reads the
///    corresponding API key (`OPENAI_API_KEY`, etc.) from the environment.
/// 3. **Environment pair** (`INVOICEFLOW_LLM_PROVIDER` +
///    `INVOICEFLOW_MODEL`) — a provider and model chosen at the execution
///    environment level (shell script, CI); checked before auto-detection
///    so the model choice is honoured even when multiple API keys exist.
/// 4. **OpenAI preference** — when `OPENAI_API_KEY` is present, OpenAI is
///    used so users with several provider keys get a stable default.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`) — the factory
///    scans all known API key variables and picks the first available.
fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, WorkflowError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("INVOICEFLOW_LLM_PROVIDER"),
        std::env::var("INVOICEFLOW_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| WorkflowError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {e}"
            ),
        })?;

    Ok(llm_provider)
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, WorkflowError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        WorkflowError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
