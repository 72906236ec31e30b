//! Reel and engine configuration

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{ReelError, ReelResult};
use crate::layout::{ReelId, ReelLayout};
use crate::timing::{ReelTiming, TimingProfile};

/// Scroll direction of a reel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpinDirection {
    /// Symbols travel downwards, new symbols enter at the top
    #[default]
    Down,
    /// Symbols travel upwards, new symbols enter at the bottom
    Up,
}

impl SpinDirection {
    pub fn reversed(self) -> Self {
        match self {
            Self::Down => Self::Up,
            Self::Up => Self::Down,
        }
    }

    /// Change of `position` per advance
    pub fn step(self) -> i64 {
        match self {
            Self::Down => -1,
            Self::Up => 1,
        }
    }
}

/// How a reel reaches its stop index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReelBehavior {
    /// Continuous scroll, spliced to the stop index
    #[default]
    Spin,
    /// Whole window swapped in place, top to bottom
    Plop,
    /// Whole window swapped in place, bottom to top
    Tumble,
}

impl ReelBehavior {
    /// Lands by refreshing the window instead of scrolling
    pub fn refreshes_in_place(self) -> bool {
        matches!(self, Self::Plop | Self::Tumble)
    }
}

/// Configuration of one physical reel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReelConfig {
    /// Logical address
    pub id: ReelId,
    /// Visible rows
    pub visible_symbols: usize,
    /// Buffer size used when no taller symbol demands more
    #[serde(default = "default_buffer_size")]
    pub default_buffer_size: usize,
    /// Initial scroll direction
    #[serde(default)]
    pub direction: SpinDirection,
    /// Stop behavior
    #[serde(default)]
    pub behavior: ReelBehavior,
    /// Key of the base strip in the strip library
    pub strip: String,
    /// Strip index shown in the bottom visible row at startup
    #[serde(default)]
    pub initial_position: usize,
    /// Scroll speed override (symbols per second)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols_per_second: Option<f64>,
    /// Begin rollback override (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin_rollback_ms: Option<f64>,
    /// End rollback override (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_rollback_ms: Option<f64>,
    /// RNG seed override for this reel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_buffer_size() -> usize {
    1
}

impl ReelConfig {
    pub fn new(id: ReelId, visible_symbols: usize, strip: impl Into<String>) -> Self {
        Self {
            id,
            visible_symbols,
            default_buffer_size: default_buffer_size(),
            direction: SpinDirection::Down,
            behavior: ReelBehavior::Spin,
            strip: strip.into(),
            initial_position: 0,
            symbols_per_second: None,
            begin_rollback_ms: None,
            end_rollback_ms: None,
            seed: None,
        }
    }

    /// Engine timing with this reel's overrides applied
    pub fn timing(&self, base: &ReelTiming) -> ReelTiming {
        let mut timing = base.clone();
        if let Some(speed) = self.symbols_per_second {
            timing.symbols_per_second = speed;
        }
        if let Some(ms) = self.begin_rollback_ms {
            timing.begin_rollback_ms = ms;
        }
        if let Some(ms) = self.end_rollback_ms {
            timing.end_rollback_ms = ms;
        }
        timing
    }

    /// Builder: set direction
    pub fn with_direction(mut self, direction: SpinDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Builder: set behavior
    pub fn with_behavior(mut self, behavior: ReelBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Builder: set initial position
    pub fn with_position(mut self, position: usize) -> Self {
        self.initial_position = position;
        self
    }

    /// Builder: set default buffer size
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.default_buffer_size = size;
        self
    }
}

/// Engine configuration, enumerated once per game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Physical reels, in update order
    pub reels: Vec<ReelConfig>,
    /// Motion and sequencing timings
    #[serde(default)]
    pub timing: ReelTiming,
    /// Explicit stop order; defaults to one entry per column
    #[serde(default)]
    pub stop_order: Option<Vec<Vec<ReelId>>>,
    /// Reel index groups linked by game data
    #[serde(default)]
    pub data_links: Vec<Vec<usize>>,
    /// Rows per column for independent reel games
    #[serde(default)]
    pub independent_rows: Option<usize>,
    /// Uniform scale applied to every stop delay
    #[serde(default)]
    pub stop_delay_multiplier: Option<f64>,
    /// Step used by `tick(None)` (ms)
    #[serde(default = "default_tick_ms")]
    pub fixed_tick_ms: f64,
    /// Return desync as an error instead of logging it
    #[serde(default)]
    pub halt_on_desync: bool,
    /// RNG seed for clobber and replacement picks
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_tick_ms() -> f64 {
    1000.0 / 60.0
}

impl EngineConfig {
    /// `columns` standard reels of `rows` visible symbols on one strip
    pub fn standard(columns: usize, rows: usize, strip: &str) -> Self {
        let reels = (0..columns)
            .map(|c| ReelConfig::new(ReelId::column(c), rows, strip))
            .collect();
        Self::with_reels(reels)
    }

    /// `columns × rows` independent single-row reels on one strip
    pub fn independent(columns: usize, rows: usize, strip: &str) -> Self {
        let reels = (0..columns)
            .flat_map(|c| (0..rows).map(move |r| (c, r)))
            .map(|(c, r)| ReelConfig::new(ReelId::cell(c, r), 1, strip))
            .collect();
        let mut config = Self::with_reels(reels);
        config.independent_rows = Some(rows);
        config
    }

    pub fn with_reels(reels: Vec<ReelConfig>) -> Self {
        Self {
            reels,
            timing: ReelTiming::default(),
            stop_order: None,
            data_links: Vec::new(),
            independent_rows: None,
            stop_delay_multiplier: None,
            fixed_tick_ms: default_tick_ms(),
            halt_on_desync: false,
            seed: None,
        }
    }

    /// Builder: set timing profile
    pub fn with_profile(mut self, profile: TimingProfile) -> Self {
        self.timing = ReelTiming::from_profile(profile);
        self
    }

    /// Builder: set timing
    pub fn with_timing(mut self, timing: ReelTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Builder: set seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Raw id scheme
    pub fn layout(&self) -> ReelLayout {
        ReelLayout {
            independent_rows: self.independent_rows,
        }
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> ReelResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from YAML
    pub fn from_yaml(yaml: &str) -> ReelResult<Self> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check structural consistency
    pub fn validate(&self) -> ReelResult<()> {
        if self.reels.is_empty() {
            return Err(ReelError::InvalidConfig("no reels configured".into()));
        }
        if !(self.fixed_tick_ms > 0.0) {
            return Err(ReelError::InvalidConfig(
                "fixed_tick_ms must be positive".into(),
            ));
        }

        let mut ids = HashSet::new();
        for reel in &self.reels {
            if reel.visible_symbols == 0 {
                return Err(ReelError::InvalidConfig(format!(
                    "reel {} has no visible symbols",
                    reel.id
                )));
            }
            if reel.symbols_per_second.is_some_and(|speed| speed <= 0.0) {
                return Err(ReelError::InvalidConfig(format!(
                    "reel {} scroll speed must be positive",
                    reel.id
                )));
            }
            if !ids.insert(reel.id) {
                return Err(ReelError::InvalidConfig(format!(
                    "duplicate reel id {}",
                    reel.id
                )));
            }
            match (self.independent_rows, reel.id.row) {
                (Some(rows), Some(row)) if row >= rows => {
                    return Err(ReelError::InvalidConfig(format!(
                        "reel {} row outside {rows} independent rows",
                        reel.id
                    )));
                }
                (None, Some(_)) => {
                    return Err(ReelError::InvalidConfig(format!(
                        "reel {} has a row but the layout is not independent",
                        reel.id
                    )));
                }
                _ => {}
            }
        }

        if let Some(order) = &self.stop_order {
            for id in order.iter().flatten() {
                if !ids.contains(id) {
                    return Err(ReelError::InvalidConfig(format!(
                        "stop order references unknown reel {id}"
                    )));
                }
            }
        }

        for index in self.data_links.iter().flatten() {
            if *index >= self.reels.len() {
                return Err(ReelError::InvalidConfig(format!(
                    "data link references reel index {index}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_config() {
        let config = EngineConfig::standard(5, 3, "base");
        assert_eq!(config.reels.len(), 5);
        assert!(config.validate().is_ok());
        assert!(!config.layout().is_independent());
    }

    #[test]
    fn test_independent_config() {
        let config = EngineConfig::independent(5, 3, "base");
        assert_eq!(config.reels.len(), 15);
        assert_eq!(config.reels[4].id, ReelId::cell(1, 1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut config = EngineConfig::standard(2, 3, "base");
        config.reels[1].id = ReelId::column(0);
        assert!(matches!(
            config.validate(),
            Err(ReelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_stop_order_reel() {
        let mut config = EngineConfig::standard(2, 3, "base");
        config.stop_order = Some(vec![vec![ReelId::column(7)]]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "reels": [
                {"id": {"column": 0}, "visible_symbols": 3, "strip": "base"},
                {"id": {"column": 1}, "visible_symbols": 3, "strip": "base", "direction": "up"}
            ],
            "stop_delay_multiplier": 1.5
        }"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.reels[1].direction, SpinDirection::Up);
        assert_eq!(config.reels[0].default_buffer_size, 1);
        assert_eq!(config.stop_delay_multiplier, Some(1.5));
        assert_eq!(config.timing, ReelTiming::normal());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
reels:
  - id: { column: 0 }
    visible_symbols: 4
    strip: base
    behavior: plop
halt_on_desync: true
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.reels[0].behavior, ReelBehavior::Plop);
        assert!(config.halt_on_desync);
    }

    #[test]
    fn test_reel_timing_overrides() {
        let mut reel = ReelConfig::new(ReelId::column(0), 3, "base");
        reel.symbols_per_second = Some(12.0);
        reel.end_rollback_ms = Some(0.0);

        let timing = reel.timing(&ReelTiming::normal());
        assert_eq!(timing.symbols_per_second, 12.0);
        assert_eq!(timing.end_rollback_ms, 0.0);
        assert_eq!(timing.begin_rollback_ms, ReelTiming::normal().begin_rollback_ms);
    }

    #[test]
    fn test_direction_step() {
        assert_eq!(SpinDirection::Down.step(), -1);
        assert_eq!(SpinDirection::Down.reversed(), SpinDirection::Up);
    }
}
