//! Gemini-backed enricher using the Generative Language `generateContent` API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::{EnrichError, Enricher};

/// Default Generative Language API base URL.
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// Default model asked for tags.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-3-flash-preview";

/// Environment variables consulted for the API key, in order.
const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// Tagging requests are decorative; never let one hang around.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ==================== API Response Types ====================

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

// ==================== GeminiEnricher ====================

/// Asks a Gemini model for a 2-3 word theme per video ID.
pub struct GeminiEnricher {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
}

impl std::fmt::Debug for GeminiEnricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiEnricher")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("has_api_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl GeminiEnricher {
    /// Creates an enricher with an explicit key (or none, which disables it).
    ///
    /// # Errors
    ///
    /// Returns [`EnrichError::Request`] if HTTP client construction fails.
    pub fn new(api_key: Option<String>) -> Result<Self, EnrichError> {
        Self::with_endpoint(api_key, DEFAULT_GEMINI_ENDPOINT)
    }

    /// Creates an enricher reading the key from `GEMINI_API_KEY` or `API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`EnrichError::Request`] if HTTP client construction fails.
    pub fn from_env() -> Result<Self, EnrichError> {
        let api_key = API_KEY_VARS
            .iter()
            .find_map(|name| std::env::var(name).ok())
            .filter(|key| !key.trim().is_empty());
        Self::new(api_key)
    }

    /// Creates an enricher against a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`EnrichError::Request`] if HTTP client construction fails.
    pub fn with_endpoint(
        api_key: Option<String>,
        endpoint: impl Into<String>,
    ) -> Result<Self, EnrichError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
        })
    }

    /// Overrides the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Returns true if an API key is available.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Requests tags for `ids`, keeping only requested IDs with non-empty tags.
    ///
    /// # Errors
    ///
    /// - [`EnrichError::MissingApiKey`] if no key is configured
    /// - [`EnrichError::Request`] / [`EnrichError::Status`] for transport failures
    /// - [`EnrichError::InvalidResponse`] if the model did not answer with a JSON object
    #[instrument(skip(self, ids), fields(count = ids.len(), model = %self.model))]
    pub async fn request_tags(&self, ids: &[String]) -> Result<HashMap<String, String>, EnrichError> {
        let api_key = self.api_key.as_deref().ok_or(EnrichError::MissingApiKey)?;
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": build_prompt(ids) }] }],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::Status {
                status: status.as_u16(),
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        let text = parsed
            .candidates
            .into_iter()
            .find_map(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().find_map(|part| part.text))
            .ok_or_else(|| EnrichError::invalid_response("no text candidate"))?;

        parse_tags(&text, ids)
    }
}

#[async_trait]
impl Enricher for GeminiEnricher {
    async fn tag_batch(&self, ids: &[String]) -> Option<HashMap<String, String>> {
        if !self.is_configured() || ids.is_empty() {
            return None;
        }
        match self.request_tags(ids).await {
            Ok(tags) => Some(tags),
            Err(e) => {
                debug!(error = %e, "enrichment failed");
                None
            }
        }
    }
}

fn build_prompt(ids: &[String]) -> String {
    format!(
        "I have a list of Sora video IDs: {}.\n\
         Generate a short, 2-3 word descriptive tag or \"theme\" for each ID.\n\
         If you do not recognize an ID, invent a creative \"AI Concept\" name for it.\n\
         Return a valid JSON object where keys are the IDs and values are the tags.\n\
         Example: {{\"s_123\": \"Cyberpunk Cityscape\"}}",
        ids.join(", ")
    )
}

fn parse_tags(text: &str, ids: &[String]) -> Result<HashMap<String, String>, EnrichError> {
    let value: serde_json::Value = serde_json::from_str(text.trim())
        .map_err(|e| EnrichError::invalid_response(format!("not JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| EnrichError::invalid_response("expected a JSON object"))?;

    Ok(ids
        .iter()
        .filter_map(|id| {
            let tag = object.get(id)?.as_str()?.trim();
            (!tag.is_empty()).then(|| (id.clone(), tag.to_string()))
        })
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    fn gemini_json(text: &str) -> serde_json::Value {
        json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }], "role": "model" }
            }]
        })
    }

    #[test]
    fn test_parse_tags_filters_and_trims() {
        let tags = parse_tags(
            r#"{"a": " Neon City ", "b": "", "x": "Extra", "c": 5}"#,
            &ids(&["a", "b", "c"]),
        )
        .unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags["a"], "Neon City");
    }

    #[test]
    fn test_parse_tags_rejects_non_object() {
        assert!(matches!(
            parse_tags("[1, 2]", &ids(&["a"])),
            Err(EnrichError::InvalidResponse { .. })
        ));
        assert!(parse_tags("not json", &ids(&["a"])).is_err());
    }

    #[test]
    fn test_prompt_lists_ids() {
        let prompt = build_prompt(&ids(&["abc", "def"]));
        assert!(prompt.contains("abc, def"));
        assert!(prompt.contains("JSON object"));
    }

    #[tokio::test]
    async fn test_without_key_returns_none() {
        let enricher = GeminiEnricher::with_endpoint(None, "http://127.0.0.1:9").unwrap();
        assert!(!enricher.is_configured());
        assert_eq!(enricher.tag_batch(&ids(&["a"])).await, None);
        assert!(matches!(
            enricher.request_tags(&ids(&["a"])).await,
            Err(EnrichError::MissingApiKey)
        ));
    }

    #[tokio::test]
    async fn test_request_tags_success() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("POST"))
            .and(path("/v1beta/models/test-model:generateContent"))
            .and(header("x-goog-api-key", "secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(gemini_json(r#"{"abc": "Neon City", "def": "Ocean Drift"}"#)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let enricher = GeminiEnricher::with_endpoint(Some("secret".into()), mock_server.uri())
            .unwrap()
            .with_model("test-model");
        let tags = enricher.tag_batch(&ids(&["abc", "def"])).await.unwrap();

        assert_eq!(tags["abc"], "Neon City");
        assert_eq!(tags["def"], "Ocean Drift");
    }

    #[tokio::test]
    async fn test_request_tags_http_error() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let enricher =
            GeminiEnricher::with_endpoint(Some("secret".into()), mock_server.uri()).unwrap();

        assert!(matches!(
            enricher.request_tags(&ids(&["abc"])).await,
            Err(EnrichError::Status { status: 429 })
        ));
        assert_eq!(enricher.tag_batch(&ids(&["abc"])).await, None);
    }

    #[tokio::test]
    async fn test_request_tags_without_candidates() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&mock_server)
            .await;

        let enricher =
            GeminiEnricher::with_endpoint(Some("secret".into()), mock_server.uri()).unwrap();

        assert!(matches!(
            enricher.request_tags(&ids(&["abc"])).await,
            Err(EnrichError::InvalidResponse { .. })
        ));
    }
}
