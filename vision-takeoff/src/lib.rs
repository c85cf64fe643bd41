use anyhow::Context;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use takeoff_core::CalcMode;
use tracing::{info, warn};

pub mod drawing;
pub mod prompt;

pub use drawing::DrawingImage;
pub use prompt::build_prompt;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Models tried in order: fast vision first, then the older vision and pro models
pub const PREFERRED_MODELS: [&str; 3] = ["gemini-1.5-flash", "gemini-pro-vision", "gemini-1.5-pro"];

/// Used when the model list cannot be fetched at all
pub const FALLBACK_MODEL: &str = "gemini-1.5-flash";

/// Errors from the hosted model API
#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("Request to model API failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Model refused the request: {0}")]
    Blocked(String),

    #[error("Model returned no text")]
    EmptyResponse,
}

impl GeminiError {
    /// The requested model name does not exist or cannot take images
    pub fn is_unsupported_model(&self) -> bool {
        match self {
            GeminiError::Api { status, message } => {
                let message = message.to_ascii_lowercase();
                *status == 404
                    || (*status == 400
                        && (message.contains("not found") || message.contains("not supported")))
            }
            _ => false,
        }
    }

    /// The API key was missing, malformed or rejected
    pub fn is_auth(&self) -> bool {
        match self {
            GeminiError::Api { status, message } => {
                *status == 401
                    || *status == 403
                    || (*status == 400 && message.contains("API key"))
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl GeminiConfig {
    /// Default config, with `GEMINI_BASE_URL` overriding the endpoint
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("GEMINI_BASE_URL") {
            if !url.trim().is_empty() {
                config.base_url = url.trim().to_string();
            }
        }
        config
    }
}

/// One takeoff request: the drawing, the user's rules and the calculation mode
#[derive(Debug, Clone)]
pub struct TakeoffRequest {
    pub image: DrawingImage,
    pub rules: String,
    pub mode: CalcMode,
    /// Force a model instead of auto-detecting one
    pub model: Option<String>,
}

/// Raw outcome of a model call; parsing is left to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub model: String,
    pub text: String,
    pub attempted: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
    #[serde(rename = "supportedGenerationMethods")]
    supported_generation_methods: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Takeoff client for the Gemini multimodal API (bring-your-own key)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    config: GeminiConfig,
}

impl GeminiClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `api_key` - Google AI Studio key supplied by the user
    /// * `config` - endpoint and timeout
    pub fn new(api_key: String, config: GeminiConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            config,
        }
    }

    /// Create from `GOOGLE_API_KEY` (or `GEMINI_API_KEY`)
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = api_key_from_env()
            .ok_or_else(|| anyhow::anyhow!("GOOGLE_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, GeminiConfig::from_env()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1beta/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Names of the models available to this key, without the `models/` prefix
    pub async fn list_models(&self) -> Result<Vec<String>, GeminiError> {
        let response = self
            .client
            .get(self.url("models"))
            .query(&[("pageSize", "1000")])
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;

        let response = check_status(response).await?;
        let list: ModelList = response.json().await?;

        Ok(list
            .models
            .into_iter()
            .filter(|m| {
                m.supported_generation_methods
                    .as_ref()
                    .map(|methods| methods.iter().any(|x| x == "generateContent"))
                    .unwrap_or(true)
            })
            .map(|m| strip_model_prefix(&m.name).to_string())
            .collect())
    }

    /// Model to use for this key: preferred list first, then whatever is available.
    /// When listing fails the fixed fallback model is used.
    pub async fn detect_model(&self) -> String {
        match self.list_models().await {
            Ok(models) => match select_model(&models) {
                Some(model) => {
                    info!("Connected to model {}", model);
                    model
                }
                None => {
                    warn!("Key lists no usable models, forcing {}", FALLBACK_MODEL);
                    FALLBACK_MODEL.to_string()
                }
            },
            Err(e) => {
                warn!("Model listing failed ({}), forcing {}", e, FALLBACK_MODEL);
                FALLBACK_MODEL.to_string()
            }
        }
    }

    /// Send the prompt and the drawing to one model, returning its text
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        image: &DrawingImage,
    ) -> Result<String, GeminiError> {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![
                    Part::Text {
                        text: prompt.to_string(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: image.mime_type().to_string(),
                            data: image.to_base64(),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig { temperature: 0.0 },
        };

        info!("Sending takeoff request to model API (model: {}, image: {} bytes)", model, image.len());

        let response = self
            .client
            .post(self.url(&format!("models/{}:generateContent", model)))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let response = check_status(response).await?;
        let api_response: GenerateResponse = response.json().await?;

        let text: String = api_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            if let Some(reason) = api_response.prompt_feedback.and_then(|f| f.block_reason) {
                return Err(GeminiError::Blocked(reason));
            }
            return Err(GeminiError::EmptyResponse);
        }

        Ok(text)
    }

    /// Run a takeoff: pick a model, then walk the fixed candidate list while
    /// models are rejected as unsupported. Any other error stops immediately.
    pub async fn analyze(&self, request: &TakeoffRequest) -> anyhow::Result<Analysis> {
        let first = match &request.model {
            Some(model) => strip_model_prefix(model).to_string(),
            None => self.detect_model().await,
        };
        let candidates = candidate_models(&first);
        let prompt = build_prompt(&request.rules, request.mode);

        let mut attempted = Vec::new();
        let mut last_error = None;

        for model in candidates {
            attempted.push(model.clone());
            match self.generate(&model, &prompt, &request.image).await {
                Ok(text) => {
                    info!("Model {} answered with {} characters", model, text.len());
                    return Ok(Analysis {
                        model,
                        text,
                        attempted,
                    });
                }
                Err(e) if e.is_unsupported_model() => {
                    warn!("Model {} is not usable here: {}", model, e);
                    last_error = Some(e);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Model {} failed", model));
                }
            }
        }

        match last_error {
            Some(e) => Err(e).with_context(|| format!("No usable model (tried {})", attempted.join(", "))),
            None => Err(anyhow::anyhow!("No candidate models to try")),
        }
    }
}

/// API key from `GOOGLE_API_KEY`, falling back to `GEMINI_API_KEY`
pub fn api_key_from_env() -> Option<String> {
    ["GOOGLE_API_KEY", "GEMINI_API_KEY"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
}

/// Priority pick: preferred models in order, else the first available one
pub fn select_model(available: &[String]) -> Option<String> {
    PREFERRED_MODELS
        .iter()
        .find(|preferred| available.iter().any(|m| strip_model_prefix(m) == **preferred))
        .map(|m| m.to_string())
        .or_else(|| available.first().map(|m| strip_model_prefix(m).to_string()))
}

/// `first`, followed by the preferred list without duplicates
pub fn candidate_models(first: &str) -> Vec<String> {
    let mut candidates = vec![first.to_string()];
    for model in PREFERRED_MODELS {
        if !candidates.iter().any(|c| c == model) {
            candidates.push(model.to_string());
        }
    }
    candidates
}

fn strip_model_prefix(name: &str) -> &str {
    name.strip_prefix("models/").unwrap_or(name)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GeminiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| default_message(status, &body));

    warn!("Model API error: {} - {}", status, message);
    Err(GeminiError::Api {
        status: status.as_u16(),
        message,
    })
}

fn default_message(status: StatusCode, body: &str) -> String {
    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        body.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_model_priority() {
        let available = names(&["models/gemini-1.5-pro", "models/gemini-pro-vision", "models/gemini-1.5-flash"]);
        assert_eq!(select_model(&available).as_deref(), Some("gemini-1.5-flash"));

        let available = names(&["models/gemini-1.5-pro", "models/gemini-pro-vision"]);
        assert_eq!(select_model(&available).as_deref(), Some("gemini-pro-vision"));

        let available = names(&["models/gemini-1.5-pro"]);
        assert_eq!(select_model(&available).as_deref(), Some("gemini-1.5-pro"));
    }

    #[test]
    fn test_select_model_falls_back_to_first_available() {
        let available = names(&["models/gemini-2.0-flash", "models/text-bison"]);
        assert_eq!(select_model(&available).as_deref(), Some("gemini-2.0-flash"));
        assert_eq!(select_model(&[]), None);
    }

    #[test]
    fn test_candidate_models_dedup() {
        assert_eq!(
            candidate_models("gemini-pro-vision"),
            names(&["gemini-pro-vision", "gemini-1.5-flash", "gemini-1.5-pro"])
        );
        assert_eq!(candidate_models("gemini-2.0-flash").len(), 4);
    }

    #[test]
    fn test_error_classification() {
        let not_found = GeminiError::Api {
            status: 404,
            message: "models/gemini-x is not found for API version v1beta".to_string(),
        };
        assert!(not_found.is_unsupported_model());
        assert!(!not_found.is_auth());

        let unsupported = GeminiError::Api {
            status: 400,
            message: "Model is not supported for generateContent".to_string(),
        };
        assert!(unsupported.is_unsupported_model());

        let bad_key = GeminiError::Api {
            status: 400,
            message: "API key not valid. Please pass a valid API key.".to_string(),
        };
        assert!(bad_key.is_auth());
        assert!(!bad_key.is_unsupported_model());

        assert!(!GeminiError::EmptyResponse.is_unsupported_model());
    }

    #[test]
    fn test_request_body_shape() {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![
                    Part::Text { text: "hi".to_string() },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/png".to_string(),
                            data: "AAAA".to_string(),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig { temperature: 0.0 },
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(json["contents"][0]["parts"][1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(json["generationConfig"]["temperature"], 0.0);
    }
}
