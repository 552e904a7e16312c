// src/inference.rs

use crate::config::{ModelBackend, ModelSection};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

/// Narrow contract of the external model collaborator: image bytes in,
/// cleaned tagged sequence out. The production implementation is
/// `InferenceClient`; tests substitute canned sequences.
#[async_trait(?Send)]
pub trait InferenceService {
    async fn infer(
        &self,
        image: &[u8],
        content_type: &str,
    ) -> Result<String, Box<dyn std::error::Error>>;
}

/// Resolved endpoint configuration ready to make API calls.
struct ResolvedEndpoint {
    base_url: String,
    model: String,
    api_key: Option<String>,
}

/// Resolve the model config section into a concrete endpoint.
fn resolve_endpoint(model: &ModelSection) -> Result<ResolvedEndpoint, Box<dyn std::error::Error>> {
    match model.backend {
        ModelBackend::Local => {
            info!(
                url = %model.local.base_url,
                model = %model.local.model,
                "Using local model server"
            );
            Ok(ResolvedEndpoint {
                base_url: model.local.base_url.clone(),
                model: model.local.model.clone(),
                api_key: None,
            })
        }
        ModelBackend::Remote => {
            let api_key = std::env::var("HF_API_TOKEN")
                .map_err(|_| "HF_API_TOKEN env var required for remote backend")?;
            info!(
                url = %model.remote.base_url,
                model = %model.remote.model,
                "Using remote inference API"
            );
            Ok(ResolvedEndpoint {
                base_url: model.remote.base_url.clone(),
                model: model.remote.model.clone(),
                api_key: Some(api_key),
            })
        }
    }
}

/// Local model server response: `{"sequence": "..."}`.
#[derive(Debug, Deserialize)]
struct SequenceResponse {
    sequence: String,
}

/// Hosted inference API response: `[{"generated_text": "..."}]`.
#[derive(Debug, Deserialize)]
struct GeneratedText {
    generated_text: String,
}

/// HTTP client for the receipt model, constructed once at startup and
/// passed by reference into the pipelines.
pub struct InferenceClient {
    client: Client,
    backend: ModelBackend,
    endpoint: ResolvedEndpoint,
    task_prompt: String,
}

impl InferenceClient {
    pub fn new(model: &ModelSection) -> Result<Self, Box<dyn std::error::Error>> {
        let endpoint = resolve_endpoint(model)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(model.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            backend: model.backend,
            endpoint,
            task_prompt: model.task_prompt.clone(),
        })
    }

    /// Check that the backend is reachable before a batch run. The
    /// remote API has no health endpoint, so only the local server is
    /// probed.
    pub async fn check_health(&self) -> bool {
        let ModelBackend::Local = self.backend else {
            return true;
        };

        match self
            .client
            .get(&self.endpoint.base_url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(resp) => {
                if resp.status().is_success() {
                    info!("Model server is reachable");
                    true
                } else {
                    warn!(status = %resp.status(), "Model server returned non-OK status");
                    false
                }
            }
            Err(e) => {
                warn!(error = %e, "Model server not reachable");
                false
            }
        }
    }

    async fn infer_local(
        &self,
        image: &[u8],
        content_type: &str,
    ) -> Result<String, Box<dyn std::error::Error>> {
        let url = format!("{}/extract", self.endpoint.base_url);

        let response = self
            .client
            .post(&url)
            .query(&[("task_prompt", self.task_prompt.as_str())])
            .header("Content-Type", content_type)
            .body(image.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Model server error {status}: {body}").into());
        }

        let decoded: SequenceResponse = response.json().await?;
        Ok(decoded.sequence)
    }

    async fn infer_remote(
        &self,
        image: &[u8],
        content_type: &str,
    ) -> Result<String, Box<dyn std::error::Error>> {
        let url = format!("{}/{}", self.endpoint.base_url, self.endpoint.model);
        let api_key = self
            .endpoint
            .api_key
            .as_deref()
            .ok_or("Remote backend resolved without an API key")?;

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", content_type)
            .body(image.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Inference API error {status}: {body}").into());
        }

        let outputs: Vec<GeneratedText> = response.json().await?;
        let sequence = outputs
            .into_iter()
            .next()
            .map(|o| o.generated_text)
            .ok_or("Empty response from inference API")?;
        Ok(sequence)
    }
}

#[async_trait(?Send)]
impl InferenceService for InferenceClient {
    /// Run one image through the model and return the cleaned sequence,
    /// ready for `parser::parse`.
    async fn infer(
        &self,
        image: &[u8],
        content_type: &str,
    ) -> Result<String, Box<dyn std::error::Error>> {
        let raw = match self.backend {
            ModelBackend::Local => self.infer_local(image, content_type).await?,
            ModelBackend::Remote => self.infer_remote(image, content_type).await?,
        };
        info!(raw_len = raw.len(), "Model sequence received");
        Ok(clean_model_output(&raw))
    }
}

/// Strip the model's sentinel tokens from a decoded sequence: every
/// end-of-sequence and padding token, then the first remaining
/// pseudo-tag, which is the echoed task prompt (e.g. `<s_cord-v2>`).
///
/// The parser does not re-strip; every sequence must pass through here
/// (or arrive pre-stripped) before parsing.
pub fn clean_model_output(raw: &str) -> String {
    let cleaned = raw.replace("</s>", "").replace("<pad>", "");
    let first_tag = Regex::new(r"<.*?>").expect("valid literal pattern");
    first_tag.replace(&cleaned, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_strips_sentinels_and_task_prompt() {
        let raw = "<s_cord-v2><s_menu><s_nm>Coffee</s_nm></s_menu></s><pad><pad>";
        assert_eq!(
            clean_model_output(raw),
            "<s_menu><s_nm>Coffee</s_nm></s_menu>"
        );
    }

    #[test]
    fn test_clean_removes_only_first_pseudo_tag() {
        // Only the leading task prompt goes; the grammar tags stay.
        let raw = "<s_cord-v2> <s_total><s_total_price>5</s_total_price></s_total>";
        assert_eq!(
            clean_model_output(raw),
            "<s_total><s_total_price>5</s_total_price></s_total>"
        );
    }

    #[test]
    fn test_clean_trims_whitespace() {
        assert_eq!(clean_model_output("  </s> \n "), "");
    }
}
