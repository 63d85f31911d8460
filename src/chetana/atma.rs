//! Atma-Darshana: the self-model subsystem.
//!
//! Tracks what the agent is actually good at: per-tool mastery (success
//! rate, median latency, sample count), calibration of predicted versus
//! actual success, the velocity of calibration change, a style fingerprint,
//! and explicitly marked limitations.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

/// Latency samples retained per tool for the median.
const LATENCY_SAMPLE_CAP: usize = 50;

/// Calibration history length for learning velocity.
const CALIBRATION_WINDOW: usize = 10;

/// Mastery record for one tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolMastery {
    pub success_count: u64,
    pub failure_count: u64,
    latency_samples: VecDeque<u64>,
}

impl ToolMastery {
    /// Observed success rate; 0.5 with no data.
    pub fn success_rate(&self) -> f32 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.5
        } else {
            self.success_count as f32 / total as f32
        }
    }

    /// Median of the retained latency samples.
    pub fn median_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();
        sorted[sorted.len() / 2]
    }

    /// Total observations.
    pub fn samples(&self) -> u64 {
        self.success_count + self.failure_count
    }

    fn record(&mut self, success: bool, latency_ms: u64) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        if self.latency_samples.len() >= LATENCY_SAMPLE_CAP {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }
}

/// The self-model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Atma {
    mastery: HashMap<String, ToolMastery>,
    /// Sum of predicted success probabilities.
    predicted_sum: f64,
    /// Count of actual successes over the same span.
    actual_sum: f64,
    /// Recent calibration values, newest last.
    calibration_history: VecDeque<f32>,
    /// Observed stylistic counters (e.g. "indent" → "spaces-4").
    pub style_fingerprint: HashMap<String, String>,
    /// Self-declared things the agent should not attempt.
    known_limitations: BTreeSet<String>,
}

impl Atma {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a success prediction made before acting.
    pub fn record_prediction(&mut self, predicted_success: f32) {
        self.predicted_sum += f64::from(predicted_success.clamp(0.0, 1.0));
    }

    /// Record an observed tool outcome.
    pub fn record_tool_result(&mut self, tool: &str, success: bool, latency_ms: u64) {
        self.mastery
            .entry(tool.to_string())
            .or_default()
            .record(success, latency_ms);
        if success {
            self.actual_sum += 1.0;
        }
        let calibration = self.calibration();
        if self.calibration_history.len() >= CALIBRATION_WINDOW {
            self.calibration_history.pop_front();
        }
        self.calibration_history.push_back(calibration);
    }

    /// Ratio of predicted to actual success. 1.0 is perfectly calibrated;
    /// above 1 means overconfident. Typical range [0.5, 1.5].
    pub fn calibration(&self) -> f32 {
        if self.actual_sum <= 0.0 {
            return 1.0;
        }
        ((self.predicted_sum / self.actual_sum) as f32).clamp(0.0, 3.0)
    }

    /// Rate of calibration change over the recent window. Positive means
    /// the agent is growing more overconfident.
    pub fn learning_velocity(&self) -> f32 {
        if self.calibration_history.len() < 2 {
            return 0.0;
        }
        let first = *self.calibration_history.front().unwrap_or(&1.0);
        let last = *self.calibration_history.back().unwrap_or(&1.0);
        (last - first) / self.calibration_history.len() as f32
    }

    /// Mark a tool as off-limits.
    pub fn mark_tool_disabled(&mut self, tool: &str, reason: &str) {
        self.known_limitations
            .insert(format!("tool:{tool}: {reason}"));
    }

    /// Record a stylistic observation.
    pub fn note_style(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.style_fingerprint.insert(key.into(), value.into());
    }

    pub fn mastery(&self, tool: &str) -> Option<&ToolMastery> {
        self.mastery.get(tool)
    }

    pub fn limitations(&self) -> impl Iterator<Item = &String> {
        self.known_limitations.iter()
    }

    /// Overall observed success rate across all tools.
    pub fn overall_success_rate(&self) -> f32 {
        let (successes, total) = self.mastery.values().fold((0u64, 0u64), |(s, t), m| {
            (s + m.success_count, t + m.samples())
        });
        if total == 0 {
            0.5
        } else {
            successes as f32 / total as f32
        }
    }

    /// One-line self assessment for steering.
    pub fn self_assessment(&self) -> String {
        let calibration = self.calibration();
        let rate = self.overall_success_rate();
        format!(
            "success rate {:.0}%, calibration {:.2}, {} known limitation(s)",
            rate * 100.0,
            calibration,
            self.known_limitations.len()
        )
    }
}
