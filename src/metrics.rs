//! Inference request metrics.
//!
//! Every inference request produces exactly one record: the model it
//! addressed, its [`Outcome`] and its latency. [`InferenceTimer`] enforces
//! the exactly-once rule: it records on [`InferenceTimer::finish`], or on
//! drop as a failure if nobody finished it (e.g. the client went away
//! mid-stream).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;

/// Final classification of an inference request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Invalid,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Invalid => "invalid",
        }
    }
}

/// Sink for per-request inference metrics.
pub trait MetricsRecorder: Send + Sync {
    fn record_inference(&self, model: &str, outcome: Outcome, latency_ms: u64);
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OutcomeStats {
    pub requests: u64,
    pub latency_ms_total: u64,
    pub latency_ms_max: u64,
}

/// Point-in-time view of [`InferenceMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub since: String,
    pub generated_at: String,
    pub models: BTreeMap<String, BTreeMap<Outcome, OutcomeStats>>,
}

impl MetricsSnapshot {
    /// Request count for `model` and `outcome`, zero when never recorded.
    pub fn requests(&self, model: &str, outcome: Outcome) -> u64 {
        self.models
            .get(model)
            .and_then(|m| m.get(&outcome))
            .map(|s| s.requests)
            .unwrap_or(0)
    }

    pub fn total_requests(&self) -> u64 {
        self.models
            .values()
            .flat_map(|m| m.values())
            .map(|s| s.requests)
            .sum()
    }
}

/// In-memory recorder keyed by model and outcome.
#[derive(Debug)]
pub struct InferenceMetrics {
    counters: DashMap<(String, Outcome), OutcomeStats>,
    since: DateTime<Utc>,
}

impl Default for InferenceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceMetrics {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            since: Utc::now(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut models: BTreeMap<String, BTreeMap<Outcome, OutcomeStats>> = BTreeMap::new();
        for entry in self.counters.iter() {
            let (model, outcome) = entry.key();
            models
                .entry(model.clone())
                .or_default()
                .insert(*outcome, *entry.value());
        }

        MetricsSnapshot {
            since: self.since.to_rfc3339(),
            generated_at: Utc::now().to_rfc3339(),
            models,
        }
    }
}

impl MetricsRecorder for InferenceMetrics {
    fn record_inference(&self, model: &str, outcome: Outcome, latency_ms: u64) {
        tracing::debug!(
            model = %model,
            outcome = outcome.as_str(),
            latency_ms,
            "Recorded inference metrics"
        );

        let mut stats = self
            .counters
            .entry((model.to_string(), outcome))
            .or_default();
        stats.requests += 1;
        stats.latency_ms_total += latency_ms;
        stats.latency_ms_max = stats.latency_ms_max.max(latency_ms);
    }
}

/// Measures one inference request and records it exactly once.
pub struct InferenceTimer {
    recorder: Arc<dyn MetricsRecorder>,
    model: String,
    started: Instant,
    recorded: bool,
}

impl InferenceTimer {
    /// Start timing a request whose model is not known yet.
    pub fn start(recorder: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            recorder,
            model: String::new(),
            started: Instant::now(),
            recorded: false,
        }
    }

    pub fn set_model(&mut self, model: &str) {
        self.model = model.to_string();
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn finish(mut self, outcome: Outcome) {
        self.record(outcome);
    }

    fn record(&mut self, outcome: Outcome) {
        if self.recorded {
            return;
        }
        self.recorded = true;
        let latency_ms = self.started.elapsed().as_millis() as u64;
        self.recorder
            .record_inference(&self.model, outcome, latency_ms);
    }
}

impl Drop for InferenceTimer {
    fn drop(&mut self) {
        if !self.recorded {
            tracing::debug!(model = %self.model, "Inference request dropped before completion");
            self.record(Outcome::Failure);
        }
    }
}
