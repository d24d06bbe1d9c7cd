// Scoring Oracle
// Tokenizer + language model behind a single trait, and the HTTP client
// for the model-serving sidecar that hosts them.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

pub const ORACLE_DEFAULT_URL: &str = "http://127.0.0.1:8008";
pub const ORACLE_DEFAULT_MODEL: &str = "gpt2";

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oracle API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("JSON parse error: {0}")]
    Json(String),
    #[error("oracle returned an invalid loss: {0}")]
    InvalidLoss(f64),
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

/// A reference language model together with its tokenizer.
///
/// Implementations are shared read-only across requests, so every method takes
/// `&self` and the trait requires `Send + Sync`.
pub trait ScoringOracle: Send + Sync {
    /// Model identifier, for logs and health output
    fn model_id(&self) -> &str;

    /// Maximum number of tokens the model accepts in one forward pass
    fn max_context_length(&self) -> usize;

    fn tokenize(&self, text: &str) -> Result<Vec<u32>, OracleError>;

    /// Mean negative log-likelihood over the trailing `target_len` tokens of `window`.
    ///
    /// Earlier tokens are context only and contribute nothing to the loss.
    fn score(&self, window: &[u32], target_len: usize) -> Result<f64, OracleError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OracleInfo {
    pub model: String,
    pub max_context_length: usize,
}

#[derive(Debug, Serialize)]
struct TokenizeRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenizeResponse {
    input_ids: Vec<u32>,
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    input_ids: &'a [u32],
    target_len: usize,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    loss: f64,
}

/// Client for a model-serving sidecar exposing `/info`, `/tokenize` and `/score`.
///
/// Uses the blocking reqwest client: detection runs synchronously, off the async
/// reactor.
pub struct RemoteOracle {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    context_limit: usize,
}

impl RemoteOracle {
    /// Connect to the sidecar and read its model info.
    ///
    /// `context_limit` caps the reported maximum context length; it can only lower it.
    pub fn connect(
        base_url: &str,
        timeout: Duration,
        context_limit: Option<usize>,
    ) -> Result<Self, OracleError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let api_key = get_oracle_api_key();

        let mut oracle = Self {
            client,
            base_url,
            api_key,
            model: String::new(),
            context_limit: 0,
        };

        let info = oracle.fetch_info()?;
        if info.max_context_length == 0 {
            return Err(OracleError::Unavailable(format!(
                "model {} reports a zero context length",
                info.model
            )));
        }
        oracle.context_limit = match context_limit {
            Some(limit) if limit > 0 => limit.min(info.max_context_length),
            _ => info.max_context_length,
        };
        oracle.model = info.model;

        info!(
            url = %oracle.base_url,
            model = %oracle.model,
            context_limit = oracle.context_limit,
            "oracle.connected"
        );
        Ok(oracle)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn fetch_info(&self) -> Result<OracleInfo, OracleError> {
        let mut request = self.client.get(format!("{}/info", self.base_url));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        let response = request.send()?;
        Self::decode(response)
    }

    fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, OracleError> {
        let mut request = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        let response = request.send()?;
        Self::decode(response)
    }

    fn decode<Resp: for<'de> Deserialize<'de>>(
        response: reqwest::blocking::Response,
    ) -> Result<Resp, OracleError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(OracleError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        response
            .json()
            .map_err(|e| OracleError::Json(e.to_string()))
    }
}

impl ScoringOracle for RemoteOracle {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn max_context_length(&self) -> usize {
        self.context_limit
    }

    fn tokenize(&self, text: &str) -> Result<Vec<u32>, OracleError> {
        let data: TokenizeResponse = self.post("tokenize", &TokenizeRequest { text })?;
        Ok(data.input_ids)
    }

    fn score(&self, window: &[u32], target_len: usize) -> Result<f64, OracleError> {
        let start = Instant::now();
        let data: ScoreResponse = self.post(
            "score",
            &ScoreRequest {
                input_ids: window,
                target_len,
            },
        )?;
        debug!(
            tokens = window.len(),
            target_len,
            loss = data.loss,
            latency_ms = start.elapsed().as_millis() as u64,
            "oracle.score"
        );
        Ok(data.loss)
    }
}

/// Get the sidecar bearer token from the environment, if any
pub fn get_oracle_api_key() -> Option<String> {
    for key in ["PPLDETECTOR_ORACLE_API_KEY", "ORACLE_API_KEY"] {
        if let Ok(val) = env::var(key) {
            let v = val.trim();
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }
    }
    None
}
