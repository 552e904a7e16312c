use serde::Deserialize;
use std::{fs, path::Path};

#[derive(Deserialize)]
pub struct Config {
    pub model: ModelSection,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "receipts/receipts.db".to_string()
}

/// Which inference backend serves the receipt model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    /// Self-hosted model server on this machine or LAN.
    Local,
    /// Hosted inference API (needs HF_API_TOKEN).
    Remote,
}

#[derive(Deserialize)]
pub struct ModelSection {
    pub backend: ModelBackend,
    /// Task prompt the decoder was trained with. The model echoes it as
    /// the leading pseudo-tag of every sequence.
    #[serde(default = "default_task_prompt")]
    pub task_prompt: String,
    #[serde(default = "default_local_endpoint")]
    pub local: Endpoint,
    #[serde(default = "default_remote_endpoint")]
    pub remote: Endpoint,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub base_url: String,
    pub model: String,
}

fn default_task_prompt() -> String {
    "<s_cord-v2>".to_string()
}

fn default_local_endpoint() -> Endpoint {
    Endpoint {
        base_url: "http://localhost:8089".to_string(),
        model: "donut-base-finetuned-cord-v2".to_string(),
    }
}

fn default_remote_endpoint() -> Endpoint {
    Endpoint {
        base_url: "https://api-inference.huggingface.co/models".to_string(),
        model: "naver-clova-ix/donut-base-finetuned-cord-v2".to_string(),
    }
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}
