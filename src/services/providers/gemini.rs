/// Gemini generative-text provider
///
/// One-shot `generateContent` calls: system instruction plus a user prompt
/// in, the first candidate's text out. The model habitually wraps JSON
/// answers in markdown fences, so `strip_code_fences` lives here next to the
/// client that produces them.
use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::error::{AppError, AppResult};

use super::GenerativeProvider;

/// Completions take far longer than regular provider calls
const GENERATIVE_TIMEOUT_SECS: u64 = 60;

#[derive(Clone)]
pub struct GeminiProvider {
    http_client: HttpClient,
    api_key: String,
    api_base: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(config: &Config) -> AppResult<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(GENERATIVE_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http_client,
            api_key: config.gemini_api_key.clone(),
            api_base: config.generative_api_base.trim_end_matches('/').to_string(),
            model: config.gemini_model.clone(),
        })
    }
}

#[async_trait::async_trait]
impl GenerativeProvider for GeminiProvider {
    async fn generate(&self, system_instruction: &str, prompt: &str) -> AppResult<String> {
        let url = format!("{}/{}:generateContent", self.api_base, self.model);
        let body = json!({
            "system_instruction": { "parts": [{ "text": system_instruction }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });

        let response = self
            .http_client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(format!(
                "Generative API returned status {}: {}",
                status, body
            )));
        }

        let completion: GenerateContentResponse = response.json().await?;
        let text = completion.first_text();
        if text.trim().is_empty() {
            return Err(AppError::ExternalApi(
                "Generative API returned an empty completion".to_string(),
            ));
        }

        tracing::debug!(model = %self.model, chars = text.len(), "completion received");
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

impl GenerateContentResponse {
    fn first_text(&self) -> String {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .map(|part| part.text.as_str())
                    .collect::<Vec<_>>()
                    .concat()
            })
            .unwrap_or_default()
    }
}

/// Strip optional markdown code fences around a model completion
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}
