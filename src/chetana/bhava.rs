//! Bhava: the affective subsystem.
//!
//! Four scalars in `[0, 1]` (frustration, confidence, arousal, valence)
//! track how the session is going. Tool failures and user corrections raise
//! frustration and erode confidence; successes recover both; sub-agent
//! spawns raise arousal. Every turn the scalars drift back toward neutral.

use serde::{Deserialize, Serialize};

use super::events::{ChetanaEvent, EventBus};

/// The four affect scalars plus the confidence update timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectiveState {
    pub frustration: f32,
    pub confidence: f32,
    pub arousal: f32,
    pub valence: f32,
    /// Epoch ms of the last confidence mutation.
    pub confidence_updated_at: i64,
}

impl Default for AffectiveState {
    fn default() -> Self {
        Self {
            frustration: 0.1,
            confidence: 0.5,
            arousal: 0.3,
            valence: 0.5,
            confidence_updated_at: 0,
        }
    }
}

/// Tunable deltas and thresholds for affect dynamics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BhavaConfig {
    /// Frustration added per erroring tool result.
    pub error_frustration_delta: f32,
    /// Frustration added per user correction (stronger than a plain error).
    pub correction_frustration_delta: f32,
    /// Multiplier applied to frustration on success.
    pub success_recovery: f32,
    /// Confidence added per successful tool result.
    pub confidence_success_delta: f32,
    /// Multiplier applied to confidence on error.
    pub confidence_error_decay: f32,
    /// Arousal added per sub-agent spawn.
    pub arousal_spawn_delta: f32,
    /// EMA weight for `update_confidence`.
    pub confidence_ema_alpha: f32,
    /// Per-turn drift rate toward neutral.
    pub drift_rate: f32,
    /// Crossing this value (in either direction) emits `chetana:affect_changed`.
    pub alert_threshold: f32,
}

impl Default for BhavaConfig {
    fn default() -> Self {
        Self {
            error_frustration_delta: 0.15,
            correction_frustration_delta: 0.25,
            success_recovery: 0.85,
            confidence_success_delta: 0.05,
            confidence_error_decay: 0.9,
            arousal_spawn_delta: 0.1,
            confidence_ema_alpha: 0.3,
            drift_rate: 0.1,
            alert_threshold: 0.75,
        }
    }
}

/// Neutral resting values the scalars drift toward each turn.
const NEUTRAL: AffectiveState = AffectiveState {
    frustration: 0.1,
    confidence: 0.5,
    arousal: 0.3,
    valence: 0.5,
    confidence_updated_at: 0,
};

/// The affect subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bhava {
    state: AffectiveState,
    config: BhavaConfig,
}

impl Bhava {
    pub fn new(config: BhavaConfig) -> Self {
        Self {
            state: AffectiveState::default(),
            config,
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> &AffectiveState {
        &self.state
    }

    /// Restore from a persisted snapshot.
    pub fn restore(state: AffectiveState, config: BhavaConfig) -> Self {
        Self { state, config }
    }

    /// React to a tool result.
    pub fn on_tool_result(&mut self, is_error: bool, is_user_correction: bool, bus: &mut EventBus) {
        if is_user_correction {
            self.mutate(bus, |s, c| {
                s.frustration += c.correction_frustration_delta;
                s.confidence *= c.confidence_error_decay;
                s.valence -= 0.05;
            });
        } else if is_error {
            self.mutate(bus, |s, c| {
                s.frustration += c.error_frustration_delta;
                s.confidence *= c.confidence_error_decay;
                s.valence -= 0.03;
            });
        } else {
            self.mutate(bus, |s, c| {
                s.frustration *= c.success_recovery;
                s.confidence += c.confidence_success_delta;
                s.valence += 0.02;
            });
        }
        self.state.confidence_updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// React to a sub-agent spawn: arousal rises, saturating at 1.
    pub fn on_sub_agent_spawn(&mut self, bus: &mut EventBus) {
        self.mutate(bus, |s, c| {
            s.arousal += c.arousal_spawn_delta;
        });
    }

    /// Move confidence toward an observed success rate (EMA).
    pub fn update_confidence(&mut self, success_rate: f32, bus: &mut EventBus) {
        let alpha = self.config.confidence_ema_alpha;
        self.mutate(bus, |s, _| {
            s.confidence = (1.0 - alpha) * s.confidence + alpha * success_rate;
        });
        self.state.confidence_updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Per-turn drift of every scalar toward neutral.
    pub fn decay_turn(&mut self, bus: &mut EventBus) {
        let rate = self.config.drift_rate;
        self.mutate(bus, |s, _| {
            s.frustration += (NEUTRAL.frustration - s.frustration) * rate;
            s.confidence += (NEUTRAL.confidence - s.confidence) * rate;
            s.arousal += (NEUTRAL.arousal - s.arousal) * rate;
            s.valence += (NEUTRAL.valence - s.valence) * rate;
        });
    }

    /// Apply a mutation, clamp every scalar, and emit alert-crossing events.
    fn mutate(&mut self, bus: &mut EventBus, f: impl FnOnce(&mut AffectiveState, &BhavaConfig)) {
        let before = self.state.clone();
        f(&mut self.state, &self.config);
        self.state.frustration = self.state.frustration.clamp(0.0, 1.0);
        self.state.confidence = self.state.confidence.clamp(0.0, 1.0);
        self.state.arousal = self.state.arousal.clamp(0.0, 1.0);
        self.state.valence = self.state.valence.clamp(0.0, 1.0);

        let threshold = self.config.alert_threshold;
        for (field, old, new) in [
            ("frustration", before.frustration, self.state.frustration),
            ("confidence", before.confidence, self.state.confidence),
            ("arousal", before.arousal, self.state.arousal),
            ("valence", before.valence, self.state.valence),
        ] {
            if (old < threshold) != (new < threshold) {
                bus.emit(ChetanaEvent::AffectChanged {
                    field: field.to_string(),
                    value: new,
                });
            }
        }
    }
}

impl Default for Bhava {
    fn default() -> Self {
        Self::new(BhavaConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> EventBus {
        EventBus::default()
    }

    #[test]
    fn errors_raise_frustration_and_erode_confidence() {
        let mut bhava = Bhava::default();
        let mut bus = bus();
        let before = bhava.state().clone();
        bhava.on_tool_result(true, false, &mut bus);
        assert!(bhava.state().frustration > before.frustration);
        assert!(bhava.state().confidence < before.confidence);
    }

    #[test]
    fn corrections_sting_more_than_errors() {
        let mut a = Bhava::default();
        let mut b = Bhava::default();
        let mut bus = bus();
        a.on_tool_result(true, false, &mut bus);
        b.on_tool_result(true, true, &mut bus);
        assert!(b.state().frustration > a.state().frustration);
    }

    #[test]
    fn success_recovers_frustration() {
        let mut bhava = Bhava::default();
        let mut bus = bus();
        for _ in 0..4 {
            bhava.on_tool_result(true, false, &mut bus);
        }
        let frustrated = bhava.state().frustration;
        bhava.on_tool_result(false, false, &mut bus);
        assert!(bhava.state().frustration < frustrated);
    }

    #[test]
    fn scalars_stay_clamped_under_stress() {
        let mut bhava = Bhava::default();
        let mut bus = bus();
        for _ in 0..100 {
            bhava.on_tool_result(true, true, &mut bus);
            bhava.on_sub_agent_spawn(&mut bus);
        }
        let s = bhava.state();
        assert!((0.0..=1.0).contains(&s.frustration));
        assert!((0.0..=1.0).contains(&s.confidence));
        assert!((0.0..=1.0).contains(&s.arousal));
        assert!((0.0..=1.0).contains(&s.valence));
    }

    #[test]
    fn arousal_saturates_at_one() {
        let mut bhava = Bhava::default();
        let mut bus = bus();
        for _ in 0..20 {
            bhava.on_sub_agent_spawn(&mut bus);
        }
        assert!((bhava.state().arousal - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn update_confidence_moves_toward_rate() {
        let mut bhava = Bhava::default();
        let mut bus = bus();
        let before = bhava.state().confidence;
        bhava.update_confidence(1.0, &mut bus);
        let after = bhava.state().confidence;
        assert!(after > before);
        assert!(after < 1.0);
    }

    #[test]
    fn decay_drifts_toward_neutral() {
        let mut bhava = Bhava::default();
        let mut bus = bus();
        for _ in 0..10 {
            bhava.on_tool_result(true, true, &mut bus);
        }
        let stressed = bhava.state().frustration;
        for _ in 0..50 {
            bhava.decay_turn(&mut bus);
        }
        assert!(bhava.state().frustration < stressed);
        assert!((bhava.state().frustration - 0.1).abs() < 0.05);
    }

    #[test]
    fn alert_crossing_emits_event() {
        let mut bhava = Bhava::default();
        let mut bus = bus();
        for _ in 0..12 {
            bhava.on_tool_result(true, true, &mut bus);
        }
        let events = bus.drain();
        assert!(
            events.iter().any(|e| matches!(
                e,
                ChetanaEvent::AffectChanged { field, .. } if field == "frustration"
            )),
            "expected a frustration alert event, got {events:?}"
        );
    }
}
