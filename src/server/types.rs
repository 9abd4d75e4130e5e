//! Request/response types and configuration for the NeuroScan server.

use serde::Serialize;
use std::net::SocketAddr;

use crate::finding::ClinicalFinding;
use crate::gateway::GatewayConfig;
use crate::normalize::Resolution;
use crate::{FallbackPolicy, FindingSource};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (defaults to 127.0.0.1:8080; use 0.0.0.0 to expose externally)
    pub bind_addr: SocketAddr,
    /// Rate limit in requests per minute per IP (0 = no limit)
    pub rate_limit_rpm: u32,
    /// Path for JSONL access log
    pub access_log_path: String,
    /// Maximum access log file size in bytes before rotation (0 = no limit)
    pub max_access_log_bytes: u64,
    /// Where usage counters are persisted between restarts (None = not persisted)
    pub metrics_path: Option<String>,
    /// Behavior when the remote classifier is unavailable
    pub fallback_policy: FallbackPolicy,
    /// Remote classifier settings
    pub gateway: GatewayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080"
                .parse()
                .expect("valid default bind address"),
            rate_limit_rpm: 60,
            access_log_path: "neuroscan-access.jsonl".to_string(),
            max_access_log_bytes: 50 * 1024 * 1024, // 50 MB
            metrics_path: None,
            fallback_policy: FallbackPolicy::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// Response from `POST /api/v1/classify`.
#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finding: Option<ClinicalFinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<FindingSource>,
    pub processing_time_ms: u64,
}

impl ClassifyResponse {
    pub fn error(message: impl Into<String>, processing_time_ms: u64) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            finding: None,
            source: None,
            processing_time_ms,
        }
    }
}

/// Response from `POST /api/v1/normalize`.
#[derive(Debug, Serialize)]
pub struct NormalizeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finding: Option<ClinicalFinding>,
    /// How the payload resolved: canonical string, strategy, matched key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    pub processing_time_ms: u64,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub gateway: String,
    pub uptime_seconds: u64,
    pub fallback_policy: FallbackPolicy,
}

/// Stats response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub requests: RequestStats,
    pub labels: LabelStats,
    pub sources: SourceStats,
    pub endpoints: EndpointStats,
}

#[derive(Debug, Serialize)]
pub struct RequestStats {
    pub total: u64,
    pub errors: u64,
}

#[derive(Debug, Serialize)]
pub struct LabelStats {
    pub glioma: u64,
    pub meningioma: u64,
    pub pituitary: u64,
    pub no_tumor: u64,
}

#[derive(Debug, Serialize)]
pub struct SourceStats {
    pub model: u64,
    pub fallback: u64,
}

#[derive(Debug, Serialize)]
pub struct EndpointStats {
    pub classify: u64,
    pub normalize: u64,
    pub stats: u64,
}
