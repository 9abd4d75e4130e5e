//! Usage metrics, access logging, and metrics persistence.
//!
//! Every classification is written to the JSONL access log with its
//! `source`, so fallback findings can be audited separately from model
//! results.

use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info, warn};

use crate::finding::ClinicalLabel;
use crate::FindingSource;

/// Maximum number of rotated access log files to keep.
const MAX_ACCESS_LOG_ROTATIONS: usize = 5;

/// Interval in seconds between metrics persistence to disk.
pub const METRICS_PERSIST_INTERVAL_SECS: u64 = 60;

/// One completed request, as recorded in counters and the access log.
pub struct RecordEvent<'a> {
    pub endpoint: &'a str,
    pub label: ClinicalLabel,
    pub source: &'a FindingSource,
    pub confidence: f64,
    pub processing_time_ms: u64,
    /// Digest of the submitted image, when there was one.
    pub image_digest: Option<&'a str>,
}

pub struct UsageMetrics {
    pub total_requests: AtomicU64,
    pub total_errors: AtomicU64,

    pub glioma: AtomicU64,
    pub meningioma: AtomicU64,
    pub pituitary: AtomicU64,
    pub no_tumor: AtomicU64,

    pub model_results: AtomicU64,
    pub fallback_results: AtomicU64,

    pub ep_classify: AtomicU64,
    pub ep_normalize: AtomicU64,
    pub ep_stats: AtomicU64,

    access_log: std::sync::Mutex<Option<File>>,
    access_log_path: String,
    access_log_bytes: AtomicU64,
    max_access_log_bytes: u64,
    metrics_path: Option<String>,
}

impl UsageMetrics {
    pub fn new(access_log_path: &str, max_access_log_bytes: u64, metrics_path: Option<&str>) -> Self {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(access_log_path)
            .ok();
        if file.is_none() {
            warn!(path = access_log_path, "could not open access log");
        }
        let current_size = std::fs::metadata(access_log_path)
            .map(|m| m.len())
            .unwrap_or(0);

        let metrics = Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            glioma: AtomicU64::new(0),
            meningioma: AtomicU64::new(0),
            pituitary: AtomicU64::new(0),
            no_tumor: AtomicU64::new(0),
            model_results: AtomicU64::new(0),
            fallback_results: AtomicU64::new(0),
            ep_classify: AtomicU64::new(0),
            ep_normalize: AtomicU64::new(0),
            ep_stats: AtomicU64::new(0),
            access_log: std::sync::Mutex::new(file),
            access_log_path: access_log_path.to_string(),
            access_log_bytes: AtomicU64::new(current_size),
            max_access_log_bytes,
            metrics_path: metrics_path.map(str::to_string),
        };
        metrics.restore_from_disk();
        metrics
    }

    fn counters(&self) -> [(&'static str, &AtomicU64); 11] {
        [
            ("total_requests", &self.total_requests),
            ("total_errors", &self.total_errors),
            ("glioma", &self.glioma),
            ("meningioma", &self.meningioma),
            ("pituitary", &self.pituitary),
            ("no_tumor", &self.no_tumor),
            ("model_results", &self.model_results),
            ("fallback_results", &self.fallback_results),
            ("ep_classify", &self.ep_classify),
            ("ep_normalize", &self.ep_normalize),
            ("ep_stats", &self.ep_stats),
        ]
    }

    pub fn record(&self, event: &RecordEvent<'_>) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let label_counter = match event.label {
            ClinicalLabel::Glioma => &self.glioma,
            ClinicalLabel::Meningioma => &self.meningioma,
            ClinicalLabel::Pituitary => &self.pituitary,
            ClinicalLabel::NoTumor => &self.no_tumor,
        };
        label_counter.fetch_add(1, Ordering::Relaxed);

        match event.source {
            FindingSource::Model => self.model_results.fetch_add(1, Ordering::Relaxed),
            FindingSource::Fallback { .. } => self.fallback_results.fetch_add(1, Ordering::Relaxed),
        };

        let mut entry = serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "endpoint": event.endpoint,
            "label": event.label,
            "source": event.source.as_str(),
            "confidence": event.confidence,
            "processing_time_ms": event.processing_time_ms,
        });
        if let FindingSource::Fallback { reason } = event.source {
            entry["fallback_reason"] = serde_json::Value::String(reason.clone());
        }
        if let Some(digest) = event.image_digest {
            entry["image_digest"] = serde_json::Value::String(digest.to_string());
        }
        self.append_access_log(&entry);
    }

    pub fn record_error(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn append_access_log(&self, entry: &serde_json::Value) {
        // A panicked writer leaves the file usable; keep logging.
        let mut guard = self.access_log.lock().unwrap_or_else(|e| e.into_inner());
        let Some(ref mut file) = *guard else {
            return;
        };

        let mut line = entry.to_string();
        line.push('\n');
        let line_len = line.len() as u64;
        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!(error = %e, "failed to write access log entry");
            return;
        }
        let new_size = self.access_log_bytes.fetch_add(line_len, Ordering::Relaxed) + line_len;

        // Rotate if over size limit (0 = no limit)
        if self.max_access_log_bytes > 0 && new_size >= self.max_access_log_bytes {
            for i in (1..MAX_ACCESS_LOG_ROTATIONS).rev() {
                let from = format!("{}.{}", self.access_log_path, i);
                let to = format!("{}.{}", self.access_log_path, i + 1);
                if std::path::Path::new(&from).exists() {
                    if let Err(e) = std::fs::rename(&from, &to) {
                        warn!(from = %from, to = %to, error = %e, "log rotation rename failed");
                    }
                }
            }
            let rotated = format!("{}.1", self.access_log_path);
            if let Err(e) = std::fs::rename(&self.access_log_path, &rotated) {
                warn!(from = %self.access_log_path, to = %rotated, error = %e, "log rotation rename failed");
            }
            if let Ok(new_file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.access_log_path)
            {
                *file = new_file;
                self.access_log_bytes.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Persist current metrics snapshot to disk so they survive restarts.
    pub fn persist_to_disk(&self) {
        let Some(ref path) = self.metrics_path else {
            return;
        };
        let snapshot: serde_json::Map<String, serde_json::Value> = self
            .counters()
            .iter()
            .map(|(name, counter)| (name.to_string(), counter.load(Ordering::Relaxed).into()))
            .collect();
        match serde_json::to_vec_pretty(&snapshot) {
            Ok(data) => {
                if let Err(e) = std::fs::write(path, &data) {
                    warn!(path = %path, error = %e, "failed to persist metrics");
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to serialize metrics snapshot");
            }
        }
    }

    fn restore_from_disk(&self) {
        let Some(ref path) = self.metrics_path else {
            return;
        };
        let Ok(content) = std::fs::read_to_string(path) else {
            return;
        };
        match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(snapshot) => {
                for (name, counter) in self.counters() {
                    if let Some(v) = snapshot.get(name).and_then(|v| v.as_u64()) {
                        counter.store(v, Ordering::Relaxed);
                    }
                }
                info!(path = %path, "restored usage metrics");
            }
            Err(e) => warn!(path = %path, error = %e, "ignoring unreadable metrics snapshot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event<'a>(label: ClinicalLabel, source: &'a FindingSource) -> RecordEvent<'a> {
        RecordEvent {
            endpoint: "classify",
            label,
            source,
            confidence: 91.0,
            processing_time_ms: 12,
            image_digest: Some("sha256:abc"),
        }
    }

    #[test]
    fn test_counters_split_by_source() {
        let metrics = UsageMetrics::new("/dev/null", 0, None);
        let fallback = FindingSource::Fallback {
            reason: "timeout".to_string(),
        };
        metrics.record(&event(ClinicalLabel::Glioma, &FindingSource::Model));
        metrics.record(&event(ClinicalLabel::NoTumor, &fallback));
        metrics.record_error();

        assert_eq!(metrics.total_requests.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.total_errors.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.glioma.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.no_tumor.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.model_results.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.fallback_results.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_access_log_marks_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("access.jsonl");
        let metrics = UsageMetrics::new(log.to_str().unwrap(), 0, None);
        let fallback = FindingSource::Fallback {
            reason: "connection refused".to_string(),
        };
        metrics.record(&event(ClinicalLabel::Pituitary, &fallback));

        let content = std::fs::read_to_string(&log).unwrap();
        let entry: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(entry["source"], "fallback");
        assert_eq!(entry["label"], "pituitary");
        assert_eq!(entry["fallback_reason"], "connection refused");
        assert_eq!(entry["image_digest"], "sha256:abc");
    }

    #[test]
    fn test_access_log_waits_for_busy_writer() {
        use std::sync::{mpsc, Arc};

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("access.jsonl");
        let metrics = Arc::new(UsageMetrics::new(log.to_str().unwrap(), 0, None));

        let (locked_tx, locked_rx) = mpsc::channel();
        let holder = {
            let metrics = metrics.clone();
            std::thread::spawn(move || {
                let _guard = metrics.access_log.lock().unwrap();
                locked_tx.send(()).unwrap();
                std::thread::sleep(std::time::Duration::from_millis(100));
            })
        };
        locked_rx.recv().unwrap();

        let fallback = FindingSource::Fallback {
            reason: "timeout".to_string(),
        };
        metrics.record(&event(ClinicalLabel::Glioma, &fallback));
        holder.join().unwrap();

        let content = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        let entry: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(entry["source"], "fallback");
        assert_eq!(metrics.fallback_results.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_access_log_survives_poisoned_lock() {
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("access.jsonl");
        let metrics = Arc::new(UsageMetrics::new(log.to_str().unwrap(), 0, None));

        let poisoner = metrics.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.access_log.lock().unwrap();
            panic!("writer crashed");
        })
        .join();
        assert!(metrics.access_log.is_poisoned());

        metrics.record(&event(ClinicalLabel::Meningioma, &FindingSource::Model));
        let content = std::fs::read_to_string(&log).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn test_access_log_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("access.jsonl");
        let metrics = UsageMetrics::new(log.to_str().unwrap(), 64, None);
        for _ in 0..3 {
            metrics.record(&event(ClinicalLabel::Glioma, &FindingSource::Model));
        }
        assert!(dir.path().join("access.jsonl.1").exists());
    }

    #[test]
    fn test_metrics_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let metrics_path = dir.path().join("metrics.json");
        let metrics_path = metrics_path.to_str().unwrap();

        let first = UsageMetrics::new("/dev/null", 0, Some(metrics_path));
        first.record(&event(ClinicalLabel::Meningioma, &FindingSource::Model));
        first.persist_to_disk();

        let second = UsageMetrics::new("/dev/null", 0, Some(metrics_path));
        assert_eq!(second.total_requests.load(Ordering::Relaxed), 1);
        assert_eq!(second.meningioma.load(Ordering::Relaxed), 1);
    }
}
