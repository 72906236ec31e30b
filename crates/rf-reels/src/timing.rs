//! Timing profiles and stop-time accumulation

use serde::{Deserialize, Serialize};

/// Timing profile for reel motion and stop sequencing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimingProfile {
    /// Normal gameplay timing
    #[default]
    Normal,
    /// Fast/Turbo mode
    Turbo,
    /// Mobile optimized (slightly faster)
    Mobile,
    /// Studio mode (long, evenly spaced stops for inspection)
    Studio,
    /// No waiting at all (headless simulation, tests)
    Instant,
    /// Custom timing multiplier
    Custom,
}

/// Reel motion and sequencing timings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReelTiming {
    /// Profile type
    pub profile: TimingProfile,

    /// Scroll speed while spinning (symbols per second)
    pub symbols_per_second: f64,

    /// Wind-up before a reel starts scrolling (ms)
    pub begin_rollback_ms: f64,

    /// Bounce after a reel lands (ms)
    pub end_rollback_ms: f64,

    /// Delay between consecutive reel starts (ms)
    pub start_delay_ms: f64,

    /// Delay between stop-order entries when the outcome carries none (ms)
    pub stop_delay_ms: f64,

    /// Extra spin time for an anticipating stop entry (ms)
    pub anticipation_delay_ms: f64,

    /// Post-stop anticipation animation (ms)
    pub anticipation_duration_ms: f64,
}

impl ReelTiming {
    /// Normal gameplay timing
    pub fn normal() -> Self {
        Self {
            profile: TimingProfile::Normal,
            symbols_per_second: 24.0,
            begin_rollback_ms: 120.0,
            end_rollback_ms: 150.0,
            start_delay_ms: 80.0,
            stop_delay_ms: 300.0,
            anticipation_delay_ms: 1500.0,
            anticipation_duration_ms: 800.0,
        }
    }

    /// Turbo mode
    pub fn turbo() -> Self {
        Self {
            profile: TimingProfile::Turbo,
            symbols_per_second: 40.0,
            begin_rollback_ms: 60.0,
            end_rollback_ms: 80.0,
            start_delay_ms: 0.0,
            stop_delay_ms: 100.0,
            anticipation_delay_ms: 800.0,
            anticipation_duration_ms: 400.0,
        }
    }

    /// Mobile optimized
    pub fn mobile() -> Self {
        Self {
            profile: TimingProfile::Mobile,
            symbols_per_second: 30.0,
            begin_rollback_ms: 100.0,
            end_rollback_ms: 120.0,
            start_delay_ms: 50.0,
            stop_delay_ms: 200.0,
            anticipation_delay_ms: 1000.0,
            anticipation_duration_ms: 600.0,
        }
    }

    /// Studio mode (wide, even gaps between stops)
    pub fn studio() -> Self {
        Self {
            profile: TimingProfile::Studio,
            symbols_per_second: 20.0,
            begin_rollback_ms: 150.0,
            end_rollback_ms: 200.0,
            start_delay_ms: 100.0,
            stop_delay_ms: 350.0,
            anticipation_delay_ms: 500.0,
            anticipation_duration_ms: 500.0,
        }
    }

    /// No waiting: reels still scroll, but nothing is delayed
    pub fn instant() -> Self {
        Self {
            profile: TimingProfile::Instant,
            symbols_per_second: 1000.0,
            begin_rollback_ms: 0.0,
            end_rollback_ms: 0.0,
            start_delay_ms: 0.0,
            stop_delay_ms: 0.0,
            anticipation_delay_ms: 0.0,
            anticipation_duration_ms: 0.0,
        }
    }

    /// Get timing for profile
    pub fn from_profile(profile: TimingProfile) -> Self {
        match profile {
            TimingProfile::Normal => Self::normal(),
            TimingProfile::Turbo => Self::turbo(),
            TimingProfile::Mobile => Self::mobile(),
            TimingProfile::Studio => Self::studio(),
            TimingProfile::Instant => Self::instant(),
            TimingProfile::Custom => Self::normal(),
        }
    }

    /// Scale timing by factor (< 1.0 = faster)
    pub fn scaled(&self, factor: f64) -> Self {
        let factor = factor.max(0.0);
        Self {
            profile: TimingProfile::Custom,
            symbols_per_second: if factor > 0.0 {
                self.symbols_per_second / factor
            } else {
                self.symbols_per_second
            },
            begin_rollback_ms: self.begin_rollback_ms * factor,
            end_rollback_ms: self.end_rollback_ms * factor,
            start_delay_ms: self.start_delay_ms * factor,
            stop_delay_ms: self.stop_delay_ms * factor,
            anticipation_delay_ms: self.anticipation_delay_ms * factor,
            anticipation_duration_ms: self.anticipation_duration_ms * factor,
        }
    }

    /// Milliseconds one advance takes at the configured speed
    pub fn advance_interval_ms(&self) -> f64 {
        if self.symbols_per_second <= 0.0 {
            return f64::INFINITY;
        }
        1000.0 / self.symbols_per_second
    }
}

impl Default for ReelTiming {
    fn default() -> Self {
        Self::normal()
    }
}

/// Conditions that change one stop entry's delay
#[derive(Debug, Clone, Copy, Default)]
pub struct StopDelayContext {
    /// Every reel due to move at this entry is locked
    pub all_locked: bool,
    /// Slam stop is active
    pub slam_stop: bool,
    /// The entry contains an anticipating reel
    pub anticipating: bool,
}

/// Accumulates per-entry stop target times, measured from the start of `EndSpin`
#[derive(Debug, Clone)]
pub struct StopScheduler {
    accumulated_ms: f64,
    multiplier: f64,
    anticipation_delay_ms: f64,
}

impl StopScheduler {
    pub fn new(multiplier: Option<f64>, anticipation_delay_ms: f64) -> Self {
        Self {
            accumulated_ms: 0.0,
            multiplier: multiplier.unwrap_or(1.0).max(0.0),
            anticipation_delay_ms,
        }
    }

    /// Reset to zero
    pub fn reset(&mut self) {
        self.accumulated_ms = 0.0;
    }

    /// Current accumulated target
    pub fn current(&self) -> f64 {
        self.accumulated_ms
    }

    /// Delay actually applied for an entry with configured `delay_ms`
    pub fn effective_delay(&self, delay_ms: f64, ctx: StopDelayContext) -> f64 {
        if ctx.all_locked || ctx.slam_stop {
            return 0.0;
        }
        let extra = if ctx.anticipating {
            self.anticipation_delay_ms
        } else {
            0.0
        };
        (delay_ms.max(0.0) + extra) * self.multiplier
    }

    /// Advance by the entry's effective delay and return its target time
    pub fn schedule(&mut self, delay_ms: f64, ctx: StopDelayContext) -> f64 {
        self.accumulated_ms += self.effective_delay(delay_ms, ctx);
        self.accumulated_ms
    }
}
