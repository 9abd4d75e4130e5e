//! Remote classifier gateway.
//!
//! Submits an image to a Gradio-hosted classification model and returns the
//! raw prediction payload untouched. The default target is the public brain
//! tumor classification Space; override it with [`GatewayConfig::from_env`].
//!
//! A Gradio call is three requests: upload the file, start the call (which
//! yields an event id), then read the event stream for that id. Any failure
//! along the way is a [`GatewayUnavailable`]. There is no retry.

use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::image::ImageUpload;

const DEFAULT_BASE_URL: &str = "https://viraj2307-brain-tumor-classification.hf.space";
const DEFAULT_ENDPOINT: &str = "predict";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The remote classifier could not produce a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayUnavailable {
    #[error("could not connect to classifier during {stage}: {message}")]
    Connect { stage: &'static str, message: String },
    #[error("classifier timed out during {stage}")]
    Timeout { stage: &'static str },
    #[error("classifier returned HTTP {status} during {stage}")]
    Status { stage: &'static str, status: u16 },
    #[error("unexpected classifier response during {stage}: {message}")]
    Protocol { stage: &'static str, message: String },
    #[error("classifier reported an error: {0}")]
    Remote(String),
}

impl GatewayUnavailable {
    fn from_reqwest(stage: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { stage }
        } else if let Some(status) = err.status() {
            Self::Status {
                stage,
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            Self::Protocol {
                stage,
                message: err.to_string(),
            }
        } else {
            Self::Connect {
                stage,
                message: err.to_string(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway seam
// ---------------------------------------------------------------------------

/// Anything that can turn an image into a raw prediction payload.
#[async_trait]
pub trait ClassifierGateway: Send + Sync {
    async fn submit(&self, image: &ImageUpload) -> std::result::Result<Value, GatewayUnavailable>;

    /// Human-readable target, reported by the health endpoint.
    fn target(&self) -> String;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Gradio gateway configuration
#[derive(Clone)]
pub struct GatewayConfig {
    /// Base URL of the Gradio app (no trailing slash)
    pub base_url: String,
    /// API endpoint name, without the leading slash
    pub endpoint: String,
    /// Timeout applied to each HTTP request
    pub timeout: Duration,
    /// Optional Hugging Face token for private Spaces
    pub hf_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            hf_token: None,
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("hf_token", &self.hf_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl GatewayConfig {
    /// Defaults overridden by `NEUROSCAN_GRADIO_URL`, `NEUROSCAN_GRADIO_ENDPOINT`,
    /// `NEUROSCAN_GATEWAY_TIMEOUT_SECS` and `NEUROSCAN_HF_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("NEUROSCAN_GRADIO_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(endpoint) = std::env::var("NEUROSCAN_GRADIO_ENDPOINT") {
            config.endpoint = endpoint.trim_start_matches('/').to_string();
        }
        if let Ok(secs) = std::env::var("NEUROSCAN_GATEWAY_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .wrap_err_with(|| format!("Invalid NEUROSCAN_GATEWAY_TIMEOUT_SECS: {}", secs))?;
            config.timeout = Duration::from_secs(secs);
        }
        config.hf_token = std::env::var("NEUROSCAN_HF_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Gradio client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CallResponse {
    event_id: String,
}

/// Client for a Gradio prediction endpoint.
pub struct GradioGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl GradioGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .wrap_err("Failed to build HTTP client")?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.hf_token {
            Some(ref token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn upload(&self, image: &ImageUpload) -> std::result::Result<String, GatewayUnavailable> {
        const STAGE: &str = "upload";
        let part = reqwest::multipart::Part::bytes(image.bytes.clone())
            .file_name(image.file_name())
            .mime_str(image.kind.mime())
            .map_err(|e| GatewayUnavailable::from_reqwest(STAGE, e))?;
        let form = reqwest::multipart::Form::new().part("files", part);

        let url = format!("{}/gradio_api/upload", self.config.base_url);
        let paths: Vec<String> = self
            .authorize(self.client.post(&url).multipart(form))
            .send()
            .await
            .map_err(|e| GatewayUnavailable::from_reqwest(STAGE, e))?
            .error_for_status()
            .map_err(|e| GatewayUnavailable::from_reqwest(STAGE, e))?
            .json()
            .await
            .map_err(|e| GatewayUnavailable::from_reqwest(STAGE, e))?;

        paths
            .into_iter()
            .next()
            .ok_or_else(|| GatewayUnavailable::Protocol {
                stage: STAGE,
                message: "upload returned no file paths".to_string(),
            })
    }

    async fn start_call(&self, path: &str) -> std::result::Result<String, GatewayUnavailable> {
        const STAGE: &str = "call";
        let url = format!(
            "{}/gradio_api/call/{}",
            self.config.base_url,
            urlencoding::encode(&self.config.endpoint)
        );
        let body = json!({
            "data": [{
                "path": path,
                "meta": { "_type": "gradio.FileData" },
            }]
        });
        let resp: CallResponse = self
            .authorize(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| GatewayUnavailable::from_reqwest(STAGE, e))?
            .error_for_status()
            .map_err(|e| GatewayUnavailable::from_reqwest(STAGE, e))?
            .json()
            .await
            .map_err(|e| GatewayUnavailable::from_reqwest(STAGE, e))?;
        Ok(resp.event_id)
    }

    async fn read_result(&self, event_id: &str) -> std::result::Result<Value, GatewayUnavailable> {
        const STAGE: &str = "result";
        let url = format!(
            "{}/gradio_api/call/{}/{}",
            self.config.base_url,
            urlencoding::encode(&self.config.endpoint),
            urlencoding::encode(event_id)
        );
        let stream = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| GatewayUnavailable::from_reqwest(STAGE, e))?
            .error_for_status()
            .map_err(|e| GatewayUnavailable::from_reqwest(STAGE, e))?
            .text()
            .await
            .map_err(|e| GatewayUnavailable::from_reqwest(STAGE, e))?;
        parse_event_stream(&stream)
    }
}

#[async_trait]
impl ClassifierGateway for GradioGateway {
    async fn submit(&self, image: &ImageUpload) -> std::result::Result<Value, GatewayUnavailable> {
        info!(target_url = %self.config.base_url, kind = ?image.kind, bytes = image.bytes.len(), "submitting image to classifier");
        let path = self.upload(image).await?;
        debug!(path = %path, "image uploaded");
        let event_id = self.start_call(&path).await?;
        debug!(event_id = %event_id, "prediction started");
        let payload = self.read_result(&event_id).await?;
        debug!(payload = %payload, "raw prediction payload");
        Ok(payload)
    }

    fn target(&self) -> String {
        format!("{}/{}", self.config.base_url, self.config.endpoint)
    }
}

/// Extract the prediction payload from a Gradio event stream.
///
/// The `data:` line after `event: complete` carries a JSON array of outputs;
/// the payload is its first element. A missing first element yields `null`,
/// which the normalizer treats as no usable label.
pub fn parse_event_stream(stream: &str) -> std::result::Result<Value, GatewayUnavailable> {
    const STAGE: &str = "result";
    let mut event: Option<&str> = None;

    for line in stream.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(name) = line.strip_prefix("event:") {
            event = Some(name.trim());
            continue;
        }
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        match event {
            Some("complete") => {
                let outputs: Value =
                    serde_json::from_str(data).map_err(|e| GatewayUnavailable::Protocol {
                        stage: STAGE,
                        message: format!("invalid completion data: {}", e),
                    })?;
                return Ok(match outputs {
                    Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
                    _ => Value::Null,
                });
            }
            Some("error") => {
                let message = if data.is_empty() || data == "null" {
                    "no details".to_string()
                } else {
                    data.to_string()
                };
                return Err(GatewayUnavailable::Remote(message));
            }
            _ => {}
        }
    }

    Err(GatewayUnavailable::Protocol {
        stage: STAGE,
        message: "event stream ended without a completion".to_string(),
    })
}
