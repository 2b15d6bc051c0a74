//! Client for a hosted text-inference endpoint speaking the Hugging Face
//! inference API: `POST {base_url}/models/{model}` with `{"inputs": ...}`.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::SummaryConfig;
use crate::models::SentimentLabel;

#[async_trait]
pub trait SentimentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<SentimentLabel>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;
}

#[derive(Debug, Clone, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

/// Classification responses come back either nested per input or flat.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassificationResponse {
    Nested(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
}

impl ClassificationResponse {
    fn best(self) -> Option<LabelScore> {
        let candidates = match self {
            ClassificationResponse::Nested(mut outer) => {
                if outer.is_empty() {
                    Vec::new()
                } else {
                    outer.swap_remove(0)
                }
            }
            ClassificationResponse::Flat(flat) => flat,
        };
        candidates
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

#[derive(Debug, Deserialize)]
struct SummaryText {
    summary_text: String,
}

pub struct InferenceClient {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    sentiment_model: String,
    summarization_model: String,
    max_summary_length: usize,
    min_summary_length: usize,
}

impl InferenceClient {
    pub fn new(config: &SummaryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build inference HTTP client")?;

        Ok(Self {
            http,
            base_url: config.inference_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            sentiment_model: config.sentiment_model.clone(),
            summarization_model: config.summarization_model.clone(),
            max_summary_length: config.max_summary_length,
            min_summary_length: config.min_summary_length,
        })
    }

    fn model_url(&self, model: &str) -> String {
        format!("{}/models/{}", self.base_url, model)
    }

    async fn post(&self, model: &str, body: Value) -> Result<reqwest::Response> {
        let mut request = self.http.post(self.model_url(model)).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("inference call to {} failed with {}: {}", model, status, text));
        }
        Ok(response)
    }
}

#[async_trait]
impl SentimentClassifier for InferenceClient {
    async fn classify(&self, text: &str) -> Result<SentimentLabel> {
        let response: ClassificationResponse = self
            .post(&self.sentiment_model, json!({ "inputs": text }))
            .await?
            .json()
            .await?;

        let best = response
            .best()
            .ok_or_else(|| anyhow!("empty classification from {}", self.sentiment_model))?;
        debug!("Classified review as {} ({:.3})", best.label, best.score);
        Ok(SentimentLabel::from_model_label(&best.label))
    }
}

#[async_trait]
impl Summarizer for InferenceClient {
    async fn summarize(&self, text: &str) -> Result<String> {
        let body = json!({
            "inputs": text,
            "parameters": {
                "max_length": self.max_summary_length,
                "min_length": self.min_summary_length,
                "do_sample": false
            }
        });
        let summaries: Vec<SummaryText> = self
            .post(&self.summarization_model, body)
            .await?
            .json()
            .await?;

        summaries
            .into_iter()
            .next()
            .map(|s| s.summary_text)
            .ok_or_else(|| anyhow!("empty summary from {}", self.summarization_model))
    }
}
