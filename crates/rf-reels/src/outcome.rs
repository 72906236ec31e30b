//! Per-spin outcome contract
//!
//! Everything the server decides for one spin (or one reevaluation sub-spin).
//! Reel references are raw server ids, see [`crate::layout::ReelLayout`].

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{ReelError, ReelResult};
use crate::reel::StopTarget;

/// Effect fired when a reel's symbols finalize
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnticipationTrigger {
    /// Raw id of the reel that should anticipate
    pub target_reel: usize,
    /// Row of the target, for independent reel layouts
    #[serde(default)]
    pub target_row: Option<usize>,
    /// Run the anticipation visual
    #[serde(default = "default_true")]
    pub effect: bool,
    /// Play the anticipation sound
    #[serde(default = "default_true")]
    pub sound: bool,
}

fn default_true() -> bool {
    true
}

/// Strip replacement addressed by position and layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayeredReplacement {
    pub column: usize,
    #[serde(default)]
    pub row: Option<usize>,
    #[serde(default)]
    pub layer: usize,
    /// Strip key
    pub strip: String,
}

/// Outcome of one spin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Final stop index per physical reel, in engine reel order.
    /// `-1` asks for a single silent advance.
    pub stops: Vec<i64>,

    /// Delay per stop-order entry (ms); missing entries use the profile delay
    #[serde(default)]
    pub stop_timings_ms: Vec<f64>,

    /// Raw reel id → strip key
    #[serde(default)]
    pub strip_replacements: HashMap<usize, String>,

    /// Replacements for independent or layered games
    #[serde(default)]
    pub layered_replacements: Vec<LayeredReplacement>,

    /// Raw reel id → anticipation fired when that reel lands
    #[serde(default)]
    pub anticipation_triggers: HashMap<usize, AnticipationTrigger>,

    /// Raw ids of reels that anticipate regardless of triggers
    #[serde(default)]
    pub anticipating_reels: Vec<usize>,

    /// Raw id groups that stop together for this spin only
    #[serde(default)]
    pub linked_reels: Vec<Vec<usize>>,

    /// Raw ids of reels that stay still during a reevaluation spin
    #[serde(default)]
    pub static_reels: Vec<usize>,

    /// Placeholder short name → resolved short name
    #[serde(default)]
    pub replacement_symbols: HashMap<String, String>,

    /// Server symbol matrix per layer (`[layer][column][row]`), for validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_matrix: Option<Vec<Vec<Vec<String>>>>,
}

impl Outcome {
    /// Outcome with stops only
    pub fn with_stops(stops: Vec<i64>) -> Self {
        Self {
            stops,
            ..Default::default()
        }
    }

    /// Builder: per-entry stop delays
    pub fn with_timings(mut self, timings_ms: Vec<f64>) -> Self {
        self.stop_timings_ms = timings_ms;
        self
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> ReelResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse from YAML
    pub fn from_yaml(yaml: &str) -> ReelResult<Self> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Stop for reel `index`, wrapped into `strip_len`
    pub fn stop_target(&self, index: usize, strip_len: usize) -> ReelResult<StopTarget> {
        let raw = self.stops.get(index).copied().ok_or_else(|| {
            ReelError::InvalidOutcome(format!(
                "no stop for reel {index} ({} stops)",
                self.stops.len()
            ))
        })?;
        Ok(StopTarget::from_raw(raw, strip_len))
    }

    /// Configured delay of stop entry `entry`, if any
    pub fn stop_delay(&self, entry: usize) -> Option<f64> {
        self.stop_timings_ms.get(entry).copied()
    }

    pub fn is_anticipating(&self, raw_id: usize) -> bool {
        self.anticipating_reels.contains(&raw_id)
    }

    pub fn static_set(&self) -> HashSet<usize> {
        self.static_reels.iter().copied().collect()
    }

    /// Check the outcome against the number of physical reels.
    pub fn validate(&self, reel_count: usize) -> ReelResult<()> {
        if self.stops.len() != reel_count {
            return Err(ReelError::InvalidOutcome(format!(
                "{} stops for {reel_count} reels",
                self.stops.len()
            )));
        }
        if let Some(stop) = self.stops.iter().find(|s| **s < StopTarget::NEXT_POSITION) {
            // Wrapped later; only logged here
            log::warn!("outcome stop {stop} is negative and will be wrapped");
        }
        if let Some(timing) = self.stop_timings_ms.iter().find(|t| !t.is_finite() || **t < 0.0) {
            return Err(ReelError::InvalidOutcome(format!(
                "stop timing {timing} is not a non-negative duration"
            )));
        }
        Ok(())
    }
}
