use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use homechef_core::error::ProviderError;
use homechef_core::gemini::{
    FALLBACK_MODELS, GenerateContentRequest, GenerateContentResponse, StatusClass, build_request,
    classify_status, response_text,
};
use homechef_core::provider::{CompletionProvider, ProviderRequest};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    /// Configured model, replaced by the first fallback that answers after a 404.
    model: Mutex<String>,
}

impl GeminiClient {
    pub fn new(settings: &GeminiSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "homechef-cli/{} (cooking assistant)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(settings.timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key: settings.api_key.trim().to_string(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: Mutex::new(settings.model.clone()),
        })
    }

    #[must_use]
    pub fn model(&self) -> String {
        self.model
            .lock()
            .map_or_else(|poisoned| poisoned.into_inner().clone(), |m| m.clone())
    }

    fn remember_model(&self, model: &str) {
        let mut guard = match self.model.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = model.to_string();
    }

    async fn generate(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<String, StatusClass> {
        let url = format!("{}/models/{model}:generateContent", self.base_url);
        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| StatusClass::Failure(transport_error(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &text));
        }

        let data: GenerateContentResponse = resp.json().await.map_err(|e| {
            StatusClass::Failure(ProviderError::Transient(format!(
                "Failed to parse Gemini response: {e}"
            )))
        })?;
        Ok(response_text(&data))
    }
}

fn transport_error(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Transient(format!("request timed out: {err}"))
    } else if err.is_builder() {
        ProviderError::Rejected(format!("invalid request: {err}"))
    } else {
        ProviderError::Transient(format!("Failed to reach Gemini API: {err}"))
    }
}

#[async_trait]
impl CompletionProvider for GeminiClient {
    async fn send(&self, request: &ProviderRequest) -> Result<String, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::Auth(
                "GEMINI_API_KEY is not set. Add it to your environment or a .env file".to_string(),
            ));
        }

        let body = build_request(request);
        let current = self.model();
        let mut candidates = vec![current.clone()];
        candidates.extend(
            FALLBACK_MODELS
                .iter()
                .filter(|m| **m != current)
                .map(|m| (*m).to_string()),
        );

        for model in &candidates {
            debug!(model = %model, turns = request.turns.len(), "Calling Gemini");
            match self.generate(model, &body).await {
                Ok(text) => {
                    if *model != current {
                        self.remember_model(model);
                    }
                    return Ok(text);
                }
                Err(StatusClass::ModelNotFound) => {
                    warn!(model = %model, "Gemini model not found, trying next fallback");
                }
                Err(StatusClass::Failure(err)) => return Err(err),
            }
        }

        Err(ProviderError::Rejected(format!(
            "No available Gemini model (tried {})",
            candidates.join(", ")
        )))
    }
}
