//! Chetana: the per-turn consciousness controller.
//!
//! Four subsystems produce steering signals from what happens during a
//! turn: [`bhava`] (affect), [`dhyana`] (attention), [`atma`] (self-model),
//! and [`sankalpa`] (intentions). The controller owns all four and drives
//! them through a strict lifecycle:
//!
//! 1. `before_turn`: extract intentions and concepts from the user
//!    message, register it with attention, and assemble a
//!    [`ChetanaContext`] for the orchestrator.
//! 2. `after_tool_execution`: fan the tool outcome into every subsystem.
//! 3. `after_turn`: decay affect, refresh salience, age intentions.
//!
//! The order is a contract: intention progress is monotone and message
//! ordering is stable only because mutations are serialized here.

pub mod atma;
pub mod bhava;
pub mod dhyana;
pub mod events;
pub mod sankalpa;

use serde::{Deserialize, Serialize};

use atma::Atma;
use bhava::{AffectiveState, Bhava, BhavaConfig};
use dhyana::{Dhyana, DhyanaConfig};
use events::{ChetanaEvent, EventBus};
use sankalpa::{Intention, Sankalpa, SankalpaConfig};

/// Controller-level thresholds for steering suggestions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChetanaConfig {
    pub bhava: BhavaConfig,
    pub dhyana: DhyanaConfig,
    pub sankalpa: SankalpaConfig,
    /// Frustration at or above this suggests simplifying.
    pub frustration_alert: f32,
    /// Confidence at or above this suggests autonomy.
    pub confidence_autonomy: f32,
}

impl Default for ChetanaConfig {
    fn default() -> Self {
        Self {
            bhava: BhavaConfig::default(),
            dhyana: DhyanaConfig::default(),
            sankalpa: SankalpaConfig::default(),
            frustration_alert: 0.7,
            confidence_autonomy: 0.8,
        }
    }
}

/// Read-only snapshot handed to the orchestrator each turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChetanaContext {
    pub affect: AffectiveState,
    /// Top-salience message ids with weights.
    pub focus_window: Vec<(String, f32)>,
    /// Strongest concepts with weights.
    pub top_concepts: Vec<(String, f32)>,
    pub self_assessment: String,
    pub active_intentions: Vec<Intention>,
    pub steering_suggestions: Vec<String>,
}

/// Serialized form of the whole consciousness layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChetanaSnapshot {
    pub bhava: Bhava,
    pub dhyana: Dhyana,
    pub atma: Atma,
    pub sankalpa: Sankalpa,
}

/// The consciousness controller.
pub struct Chetana {
    bhava: Bhava,
    dhyana: Dhyana,
    atma: Atma,
    sankalpa: Sankalpa,
    bus: EventBus,
    config: ChetanaConfig,
    message_counter: u64,
}

impl Chetana {
    pub fn new(config: ChetanaConfig) -> Self {
        Self {
            bhava: Bhava::new(config.bhava.clone()),
            dhyana: Dhyana::new(config.dhyana.clone()),
            atma: Atma::new(),
            sankalpa: Sankalpa::new(config.sankalpa.clone()),
            bus: EventBus::default(),
            config,
            message_counter: 0,
        }
    }

    /// Start a turn. If a user message is present, intentions and concepts
    /// are extracted and the message registered with attention.
    pub fn before_turn(&mut self, user_message: Option<&str>) -> ChetanaContext {
        if let Some(message) = user_message {
            self.sankalpa.extract_from_message(message, &mut self.bus);
            self.dhyana.track_concepts(message);
            self.message_counter += 1;
            let id = format!("msg-{}", self.message_counter);
            self.dhyana.add_message(id, false, false);
        }
        self.context()
    }

    /// Fan a tool outcome into every subsystem.
    pub fn after_tool_execution(
        &mut self,
        tool: &str,
        success: bool,
        latency_ms: u64,
        result_content: &str,
        is_user_correction: bool,
    ) {
        self.bhava
            .on_tool_result(!success, is_user_correction, &mut self.bus);
        let score = if success { 0.8 } else { 0.2 };
        self.dhyana.on_tool_used(tool, success, score);
        self.atma.record_tool_result(tool, success, latency_ms);
        self.sankalpa.on_tool_result(tool, result_content, &mut self.bus);
    }

    /// A sub-agent was spawned mid-turn.
    pub fn on_sub_agent_spawn(&mut self) {
        self.bhava.on_sub_agent_spawn(&mut self.bus);
    }

    /// End the turn: decay affect, refresh salience, age intentions.
    pub fn after_turn(&mut self) {
        self.bhava.decay_turn(&mut self.bus);
        self.dhyana.refresh_salience();
        self.sankalpa.end_turn(&mut self.bus);
    }

    /// Assemble the current steering context without mutating anything.
    pub fn context(&self) -> ChetanaContext {
        ChetanaContext {
            affect: self.bhava.state().clone(),
            focus_window: self.dhyana.focus_window(),
            top_concepts: self.dhyana.top_concepts(10),
            self_assessment: self.atma.self_assessment(),
            active_intentions: self.sankalpa.active().into_iter().cloned().collect(),
            steering_suggestions: self.steering_suggestions(),
        }
    }

    /// Drain buffered consciousness events.
    pub fn drain_events(&mut self) -> Vec<ChetanaEvent> {
        self.bus.drain()
    }

    /// Capture a restorable snapshot of all four subsystems.
    pub fn snapshot(&self) -> ChetanaSnapshot {
        ChetanaSnapshot {
            bhava: self.bhava.clone(),
            dhyana: self.dhyana.clone(),
            atma: self.atma.clone(),
            sankalpa: self.sankalpa.clone(),
        }
    }

    /// Rebuild a controller from a snapshot. No extraction is re-run; the
    /// subsystems resume exactly where they were.
    pub fn from_snapshot(snapshot: ChetanaSnapshot, config: ChetanaConfig) -> Self {
        // Message ids continue past the restored history.
        let message_counter = snapshot.dhyana.message_count() as u64;
        Self {
            bhava: snapshot.bhava,
            dhyana: snapshot.dhyana,
            atma: snapshot.atma,
            sankalpa: snapshot.sankalpa,
            bus: EventBus::default(),
            config,
            message_counter,
        }
    }

    pub fn bhava(&self) -> &Bhava {
        &self.bhava
    }

    pub fn dhyana(&self) -> &Dhyana {
        &self.dhyana
    }

    pub fn atma(&self) -> &Atma {
        &self.atma
    }

    pub fn atma_mut(&mut self) -> &mut Atma {
        &mut self.atma
    }

    pub fn sankalpa(&self) -> &Sankalpa {
        &self.sankalpa
    }

    fn steering_suggestions(&self) -> Vec<String> {
        let mut suggestions = Vec::new();
        let affect = self.bhava.state();

        if affect.frustration >= self.config.frustration_alert {
            suggestions.push(
                "Frustration is elevated: try a simpler approach before continuing.".to_string(),
            );
        }
        if affect.confidence >= self.config.confidence_autonomy {
            suggestions
                .push("Confidence is high: proceed autonomously without check-ins.".to_string());
        }

        let half_threshold = self.config.sankalpa.abandonment_threshold / 2;
        for intention in self.sankalpa.active() {
            if intention.stale_turns > half_threshold {
                suggestions.push(format!(
                    "Goal \"{}\" is stalling ({} turns without progress); consider refocusing.",
                    intention.goal, intention.stale_turns
                ));
            }
        }

        let calibration = self.atma.calibration();
        if calibration > 1.3 {
            suggestions.push(format!(
                "Calibration {calibration:.2}: predictions may be overconfident."
            ));
        } else if calibration < 0.7 {
            suggestions.push(format!(
                "Calibration {calibration:.2}: predictions may be underconfident."
            ));
        }

        suggestions
    }
}

impl Default for Chetana {
    fn default() -> Self {
        Self::new(ChetanaConfig::default())
    }
}

impl std::fmt::Debug for Chetana {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chetana")
            .field("affect", self.bhava.state())
            .field("messages", &self.dhyana.message_count())
            .field("intentions", &self.sankalpa.len())
            .finish()
    }
}
