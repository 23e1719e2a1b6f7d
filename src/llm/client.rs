//! Thin reqwest client for a generateContent-style LLM endpoint.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

/// Default per-call timeout. Individual pipeline steps pass their own
/// (30-90s depending on the step).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn new(api_key: Option<String>, model: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .user_agent("WEx-Backend/1.0 (Clearing Engine)")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key,
        }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate raw text from a prompt. Timeout or transport failure is an
    /// error; callers degrade.
    pub async fn generate_text(
        &self,
        prompt: &str,
        temperature: f64,
        timeout: Duration,
    ) -> Result<String> {
        let api_key = match &self.api_key {
            Some(k) => k,
            None => bail!("LLM disabled: no API key configured"),
        };

        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url, self.model, api_key
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": temperature },
        });

        let response = tokio::time::timeout(timeout, self.client.post(&url).json(&body).send())
            .await
            .context("LLM call timed out")?
            .context("LLM request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, "LLM endpoint returned error");
            bail!("LLM endpoint returned {status}: {text}");
        }

        let payload: Value = response.json().await.context("parse LLM response body")?;
        let text = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .to_string();

        if text.is_empty() {
            bail!("LLM returned an empty response");
        }

        debug!(chars = text.len(), "LLM response received");
        Ok(text)
    }

    /// Generate and parse a JSON value, stripping markdown fences the model
    /// sometimes wraps around output. Parse failure is treated exactly like
    /// a timeout: an error the caller degrades from.
    pub async fn generate_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        temperature: f64,
        timeout: Duration,
    ) -> Result<T> {
        let text = self.generate_text(prompt, temperature, timeout).await?;
        let cleaned = strip_code_fences(&text);
        serde_json::from_str(cleaned).context("LLM returned non-conforming JSON")
    }
}

/// Remove leading/trailing markdown code fences (``` or ```json).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim_end).unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[derive(Deserialize)]
    struct Probe {
        a: i64,
    }

    #[test]
    fn test_fenced_json_parses() {
        let cleaned = strip_code_fences("```json\n{\"a\": 7}\n```");
        let probe: Probe = serde_json::from_str(cleaned).unwrap();
        assert_eq!(probe.a, 7);
    }

    #[tokio::test]
    async fn test_unconfigured_client_errors() {
        let client = LlmClient::disabled();
        assert!(!client.is_configured());
        let result = client
            .generate_text("hello", 0.2, Duration::from_secs(1))
            .await;
        assert!(result.is_err());
    }
}
