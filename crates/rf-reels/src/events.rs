//! EngineEvent: timestamped trace of everything the engine did
//!
//! Audio, UI and tooling consume these instead of hooking into the engine.

use serde::{Deserialize, Serialize};

use crate::layout::ReelId;
use crate::reel::SpliceKind;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEventKind {
    /// Spin requested; `reevaluation` for sub-spins
    SpinStart { reevaluation: bool },
    /// A reel started moving
    ReelStarted { reel: ReelId },
    /// A reel was told its stop index
    ReelSpliced {
        reel: ReelId,
        stop_index: usize,
        kind: SpliceKind,
        /// Stop cue should play
        play_sound: bool,
    },
    /// Final symbols of a reel are in place
    ReelLanded { reel: ReelId, symbols: Vec<String> },
    /// Rollback done, reel is at rest
    ReelStopped { reel: ReelId },
    /// Every reel of a stop-order entry stopped
    StopEntryDone { entry: usize },
    /// Anticipation starts on a reel
    Anticipation {
        reel: ReelId,
        effect: bool,
        sound: bool,
    },
    /// All entries done and post-stop work finished
    SpinEnd,
}

impl EngineEventKind {
    /// Short type name for logs
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SpinStart { .. } => "spin_start",
            Self::ReelStarted { .. } => "reel_started",
            Self::ReelSpliced { .. } => "reel_spliced",
            Self::ReelLanded { .. } => "reel_landed",
            Self::ReelStopped { .. } => "reel_stopped",
            Self::StopEntryDone { .. } => "stop_entry_done",
            Self::Anticipation { .. } => "anticipation",
            Self::SpinEnd => "spin_end",
        }
    }

    /// Reel the event is about, if any
    pub fn reel(&self) -> Option<ReelId> {
        match self {
            Self::ReelStarted { reel }
            | Self::ReelSpliced { reel, .. }
            | Self::ReelLanded { reel, .. }
            | Self::ReelStopped { reel }
            | Self::Anticipation { reel, .. } => Some(*reel),
            _ => None,
        }
    }
}

/// An event with its time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Milliseconds since the engine was initialized
    pub timestamp_ms: f64,

    #[serde(flatten)]
    pub kind: EngineEventKind,
}

impl EngineEvent {
    pub fn new(timestamp_ms: f64, kind: EngineEventKind) -> Self {
        Self { timestamp_ms, kind }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_flat() {
        let event = EngineEvent::new(
            150.0,
            EngineEventKind::ReelStarted {
                reel: ReelId::column(2),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reel_started");
        assert_eq!(json["timestamp_ms"], 150.0);
        assert_eq!(json["reel"]["column"], 2);

        let back: EngineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_reel_accessor() {
        assert_eq!(EngineEventKind::SpinEnd.reel(), None);
        let kind = EngineEventKind::ReelStopped {
            reel: ReelId::column(1),
        };
        assert_eq!(kind.reel(), Some(ReelId::column(1)));
        assert_eq!(kind.type_name(), "reel_stopped");
    }
}
