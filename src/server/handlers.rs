//! HTTP endpoint handler functions.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::http::{header, HeaderMap, StatusCode};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::confidence::SynthesizedConfidence;
use crate::image::{ImageUpload, MAX_IMAGE_BYTES};
use crate::normalize::{finding_for, resolve};

use super::logging::RecordEvent;
use super::types::*;
use super::ServerState;

/// Maximum request body size in bytes. Slightly above the image limit so
/// oversize images get a 413 body instead of a bare connection error.
pub const MAX_BODY_BYTES: usize = MAX_IMAGE_BYTES + 64 * 1024;

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn health_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> impl axum::response::IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        gateway: state.gateway.target(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        fallback_policy: state.config.fallback_policy,
    };
    axum::Json(response)
}

pub async fn stats_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> impl axum::response::IntoResponse {
    let usage = &state.usage;
    usage.ep_stats.fetch_add(1, Ordering::Relaxed);

    let response = StatsResponse {
        uptime_seconds: state.start_time.elapsed().as_secs(),
        requests: RequestStats {
            total: usage.total_requests.load(Ordering::Relaxed),
            errors: usage.total_errors.load(Ordering::Relaxed),
        },
        labels: LabelStats {
            glioma: usage.glioma.load(Ordering::Relaxed),
            meningioma: usage.meningioma.load(Ordering::Relaxed),
            pituitary: usage.pituitary.load(Ordering::Relaxed),
            no_tumor: usage.no_tumor.load(Ordering::Relaxed),
        },
        sources: SourceStats {
            model: usage.model_results.load(Ordering::Relaxed),
            fallback: usage.fallback_results.load(Ordering::Relaxed),
        },
        endpoints: EndpointStats {
            classify: usage.ep_classify.load(Ordering::Relaxed),
            normalize: usage.ep_normalize.load(Ordering::Relaxed),
            stats: usage.ep_stats.load(Ordering::Relaxed),
        },
    };
    axum::Json(response)
}

/// `POST /api/v1/classify` — body is the raw image; `Content-Type` is used as
/// a format hint when the bytes are not recognizable on their own.
pub async fn classify_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, axum::Json<ClassifyResponse>) {
    let start = Instant::now();
    state.usage.ep_classify.fetch_add(1, Ordering::Relaxed);

    if body.len() > MAX_IMAGE_BYTES {
        state.usage.record_error();
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            axum::Json(ClassifyResponse::error(
                format!("Image exceeds {} bytes", MAX_IMAGE_BYTES),
                elapsed_ms(start),
            )),
        );
    }

    let hint = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let image = match ImageUpload::detect(body.to_vec(), hint) {
        Ok(image) => image,
        Err(e) => {
            state.usage.record_error();
            return (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                axum::Json(ClassifyResponse::error(e.to_string(), elapsed_ms(start))),
            );
        }
    };
    let digest = image.digest();

    let mut rng = StdRng::from_os_rng();
    let result = crate::classify_with_policy(
        state.gateway.as_ref(),
        &image,
        state.config.fallback_policy,
        &mut rng,
    )
    .await;

    match result {
        Ok(classification) => {
            let processing_time_ms = elapsed_ms(start);
            state.usage.record(&RecordEvent {
                endpoint: "classify",
                label: classification.finding.label(),
                source: &classification.source,
                confidence: classification.finding.confidence(),
                processing_time_ms,
                image_digest: Some(digest.as_str()),
            });
            (
                StatusCode::OK,
                axum::Json(ClassifyResponse {
                    success: true,
                    error: None,
                    finding: Some(classification.finding),
                    source: Some(classification.source),
                    processing_time_ms,
                }),
            )
        }
        Err(e) => {
            state.usage.record_error();
            (
                StatusCode::SERVICE_UNAVAILABLE,
                axum::Json(ClassifyResponse::error(
                    format!("Classifier unavailable: {}", e),
                    elapsed_ms(start),
                )),
            )
        }
    }
}

/// `POST /api/v1/normalize` — body is any JSON value, treated as a raw model
/// payload.
pub async fn normalize_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    body: Bytes,
) -> (StatusCode, axum::Json<NormalizeResponse>) {
    let start = Instant::now();
    state.usage.ep_normalize.fetch_add(1, Ordering::Relaxed);

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            state.usage.record_error();
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(NormalizeResponse {
                    success: false,
                    error: Some(format!("Invalid JSON: {}", e)),
                    finding: None,
                    resolution: None,
                    processing_time_ms: elapsed_ms(start),
                }),
            );
        }
    };

    let resolution = resolve(&payload);
    let mut confidence = SynthesizedConfidence::new(StdRng::from_os_rng());
    let finding = finding_for(&resolution, &mut confidence);
    let processing_time_ms = elapsed_ms(start);

    state.usage.record(&RecordEvent {
        endpoint: "normalize",
        label: finding.label(),
        source: &crate::FindingSource::Model,
        confidence: finding.confidence(),
        processing_time_ms,
        image_digest: None,
    });

    (
        StatusCode::OK,
        axum::Json(NormalizeResponse {
            success: true,
            error: None,
            finding: Some(finding),
            resolution: Some(resolution),
            processing_time_ms,
        }),
    )
}
