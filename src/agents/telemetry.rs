//! Rolling token-throughput window
//!
//! Each backend call that reports generation timings contributes one sample.
//! Only the most recent [`WINDOW_SIZE`] samples are kept; totals and the peak
//! cover the whole process lifetime.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

use crate::agents::llm::TokenUsage;

/// Samples retained for the rolling averages
pub const WINDOW_SIZE: usize = 60;

#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySample {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub eval_count: u64,
    pub eval_duration_ns: u64,
    pub tps: f64,
    pub prompt_eval_count: u64,
    pub prompt_tps: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryStats {
    pub samples: usize,
    pub avg_tps: f64,
    pub peak_tps: f64,
    pub current_tps: f64,
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,
    pub total_requests: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sample: Option<TelemetrySample>,
}

#[derive(Debug, Default)]
struct WindowState {
    samples: VecDeque<TelemetrySample>,
    peak_tps: f64,
    total_tokens_in: u64,
    total_tokens_out: u64,
    total_requests: u64,
}

#[derive(Debug, Default)]
pub struct TelemetryWindow {
    state: Mutex<WindowState>,
}

fn per_second(count: u64, duration_ns: u64) -> f64 {
    if duration_ns == 0 {
        return 0.0;
    }
    count as f64 / (duration_ns as f64 / 1e9)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl TelemetryWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        eval_count: u64,
        eval_duration_ns: u64,
        prompt_eval_count: u64,
        prompt_eval_duration_ns: u64,
    ) {
        let sample = TelemetrySample {
            timestamp: chrono::Utc::now(),
            eval_count,
            eval_duration_ns,
            tps: round2(per_second(eval_count, eval_duration_ns)),
            prompt_eval_count,
            prompt_tps: round2(per_second(prompt_eval_count, prompt_eval_duration_ns)),
        };

        let mut state = self.state.lock();
        state.total_requests += 1;
        state.total_tokens_out += eval_count;
        state.total_tokens_in += prompt_eval_count;
        if sample.tps > state.peak_tps {
            state.peak_tps = sample.tps;
        }
        if state.samples.len() == WINDOW_SIZE {
            state.samples.pop_front();
        }
        state.samples.push_back(sample);
    }

    /// Record a sample from backend usage, if it carries generation timings
    pub fn record_usage(&self, usage: &TokenUsage) {
        match usage.eval_duration_ns {
            Some(eval_ns) if eval_ns > 0 && usage.completion_tokens > 0 => self.record(
                usage.completion_tokens,
                eval_ns,
                usage.prompt_tokens,
                usage.prompt_eval_duration_ns.unwrap_or(0),
            ),
            _ => {}
        }
    }

    pub fn stats(&self) -> TelemetryStats {
        let state = self.state.lock();
        let active: Vec<f64> = state
            .samples
            .iter()
            .map(|s| s.tps)
            .filter(|tps| *tps > 0.0)
            .collect();
        let avg_tps = if active.is_empty() {
            0.0
        } else {
            active.iter().sum::<f64>() / active.len() as f64
        };
        let last_sample = state.samples.back().cloned();

        TelemetryStats {
            samples: state.samples.len(),
            avg_tps: round2(avg_tps),
            peak_tps: round2(state.peak_tps),
            current_tps: last_sample.as_ref().map(|s| s.tps).unwrap_or(0.0),
            total_tokens_in: state.total_tokens_in,
            total_tokens_out: state.total_tokens_out,
            total_requests: state.total_requests,
            last_sample,
        }
    }
}
