//! Reel: one scrolling column over a circular strip
//!
//! ## Geometry
//!
//! ```text
//! slot 0            ┐
//! ...               │ top buffer
//! slot tb-1         ┘
//! slot tb           ┐
//! ...               │ visible rows
//! slot tb+v-1       ┘  ← shows strip[position]
//! ...               ┐ bottom buffer
//! slot len-1        ┘
//! ```
//!
//! Strips run top to bottom on screen, so slot `k` shows
//! `strip[position - (tb + v - 1 - k)]`. A `Down` advance decrements `position`
//! and inserts at slot 0; an `Up` advance increments it and inserts at the bottom.

mod repair;
mod window;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{ReelBehavior, ReelConfig, SpinDirection};
use crate::error::{ReelError, ReelResult};
use crate::layout::ReelId;
use crate::presenter::SymbolPresenter;
use crate::strip::{ReelStrip, buffer_for_height, wrap_index};
use crate::symbols::{SymbolCache, SymbolSpec};
use crate::timing::ReelTiming;

pub use repair::{RepairReport, repair_reels};
pub use window::SymbolSlot;

/// Spin state of a single reel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SpinState {
    #[default]
    Stopped,
    /// Wind-up before scrolling
    BeginRollback,
    /// Scrolling, no stop index yet
    Spinning,
    /// Spliced; counting down the remaining advances
    SpinEnding,
    /// Landed on the stop index, bouncing
    EndRollback,
}

impl SpinState {
    /// Still in motion towards the final symbols
    pub fn is_spinning(self) -> bool {
        matches!(self, Self::BeginRollback | Self::Spinning | Self::SpinEnding)
    }
}

/// Where a reel should stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopTarget {
    /// Land with `strip[index]` in the bottom visible row
    Index(usize),
    /// Advance exactly one more position, silently
    NextPosition,
}

impl StopTarget {
    /// Sentinel used by outcomes for [`StopTarget::NextPosition`]
    pub const NEXT_POSITION: i64 = -1;

    /// Interpret a raw outcome stop; out-of-range values are wrapped and logged.
    pub fn from_raw(raw: i64, strip_len: usize) -> Self {
        if raw == Self::NEXT_POSITION {
            return Self::NextPosition;
        }
        let wrapped = wrap_index(raw, strip_len);
        if raw < 0 || raw as usize >= strip_len {
            log::warn!("stop index {raw} outside strip of length {strip_len}, using {wrapped}");
        }
        Self::Index(wrapped)
    }
}

/// How a splice was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpliceKind {
    /// Position jumped ahead of the stop index
    Splice,
    /// Strip content revealed by scrolling on, without a jump
    FullRotation,
    /// One extra advance
    NextPosition,
    /// Window refreshed in place (plop/tumble)
    InPlace,
}

/// Result of [`Reel::set_stop_index`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpliceInfo {
    pub kind: SpliceKind,
    /// Strip index the reel will land on
    pub stop_index: usize,
    /// Advances left before landing
    pub advances: usize,
    /// Stop cue should play
    pub play_sound: bool,
}

/// Notifications a reel raises during `tick`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReelSignal {
    /// Final symbols are in place
    Landed,
    /// Rollback finished, reel is stopped
    Stopped,
}

/// One scrolling column
#[derive(Debug)]
pub struct Reel {
    id: ReelId,
    behavior: ReelBehavior,
    timing: ReelTiming,
    symbols: Arc<SymbolCache>,

    base_strip: Arc<ReelStrip>,
    replacement_strip: Option<Arc<ReelStrip>>,
    /// Strip in use before the last swap; feeds gap filling until the next spin
    previous_strip: Option<Arc<ReelStrip>>,
    /// Sparse per-index overrides on top of the active strip
    overrides: BTreeMap<usize, Arc<SymbolSpec>>,
    /// Placeholder short name → resolved short name
    replacements: HashMap<String, String>,

    position: usize,
    visible: usize,
    default_buffer: usize,
    top_buffer: usize,
    bottom_buffer: usize,
    window: Vec<Option<SymbolSlot>>,

    direction: SpinDirection,
    buffers_dirty: bool,
    repair_pending: bool,
    locked: bool,

    state: SpinState,
    state_elapsed_ms: f64,
    travel: f64,
    advances_remaining: usize,
    stop_index: Option<usize>,

    rng: StdRng,
    signals: Vec<ReelSignal>,
}

impl Reel {
    /// Build a reel and fill its window from the strip.
    pub fn new(
        config: &ReelConfig,
        timing: ReelTiming,
        strip: Arc<ReelStrip>,
        symbols: Arc<SymbolCache>,
        seed: u64,
        presenter: &mut dyn SymbolPresenter,
    ) -> ReelResult<Self> {
        if config.visible_symbols == 0 {
            return Err(ReelError::InvalidConfig(format!(
                "reel {} has no visible symbols",
                config.id
            )));
        }

        let position = wrap_index(config.initial_position as i64, strip.len());
        let mut reel = Self {
            id: config.id,
            behavior: config.behavior,
            timing,
            symbols,
            base_strip: strip,
            replacement_strip: None,
            previous_strip: None,
            overrides: BTreeMap::new(),
            replacements: HashMap::new(),
            position,
            visible: config.visible_symbols,
            default_buffer: config.default_buffer_size.max(1),
            top_buffer: 0,
            bottom_buffer: 0,
            window: Vec::new(),
            direction: config.direction,
            buffers_dirty: false,
            repair_pending: true,
            locked: false,
            state: SpinState::Stopped,
            state_elapsed_ms: 0.0,
            travel: 0.0,
            advances_remaining: 0,
            stop_index: None,
            rng: StdRng::seed_from_u64(seed),
            signals: Vec::new(),
        };

        let (top, bottom) = reel.buffer_counts(reel.required_buffer());
        reel.top_buffer = top;
        reel.bottom_buffer = bottom;
        reel.window = vec![None; top + reel.visible + bottom];
        reel.fill_gaps(presenter);

        Ok(reel)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn id(&self) -> ReelId {
        self.id
    }

    pub fn behavior(&self) -> ReelBehavior {
        self.behavior
    }

    /// Strip index shown in the bottom visible row
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn state(&self) -> SpinState {
        self.state
    }

    pub fn is_spinning(&self) -> bool {
        self.state.is_spinning()
    }

    pub fn direction(&self) -> SpinDirection {
        self.direction
    }

    pub fn visible_count(&self) -> usize {
        self.visible
    }

    pub fn top_buffer(&self) -> usize {
        self.top_buffer
    }

    pub fn bottom_buffer(&self) -> usize {
        self.bottom_buffer
    }

    /// Visible rows plus both buffers
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn window(&self) -> &[Option<SymbolSlot>] {
        &self.window
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Lock the window; a locked reel is never started
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    /// Strip currently read from (replacement if set)
    pub fn active_strip(&self) -> &Arc<ReelStrip> {
        self.replacement_strip.as_ref().unwrap_or(&self.base_strip)
    }

    pub fn base_strip(&self) -> &Arc<ReelStrip> {
        &self.base_strip
    }

    pub fn replacement_strip(&self) -> Option<&Arc<ReelStrip>> {
        self.replacement_strip.as_ref()
    }

    /// Stop index of the current splice, if any
    pub fn stop_index(&self) -> Option<usize> {
        self.stop_index
    }

    pub fn advances_remaining(&self) -> usize {
        self.advances_remaining
    }

    pub fn needs_repair(&self) -> bool {
        self.repair_pending
    }

    pub fn symbol_overrides(&self) -> &BTreeMap<usize, Arc<SymbolSpec>> {
        &self.overrides
    }

    /// Symbol in visible row `row` (0 = top visible row)
    pub fn symbol_at_visible(&self, row: usize) -> Option<&Arc<SymbolSpec>> {
        if row >= self.visible {
            return None;
        }
        self.window[self.top_buffer + row]
            .as_ref()
            .map(|slot| &slot.symbol)
    }

    /// Visible symbols, top to bottom
    pub fn visible_symbols(&self) -> Vec<Option<Arc<SymbolSpec>>> {
        self.window[self.top_buffer..self.top_buffer + self.visible]
            .iter()
            .map(|slot| slot.as_ref().map(|s| Arc::clone(&s.symbol)))
            .collect()
    }

    /// Server names of the visible symbols, empty for unfilled slots
    pub fn visible_server_names(&self) -> Vec<String> {
        self.visible_symbols()
            .into_iter()
            .map(|s| s.map(|s| s.server_name.clone()).unwrap_or_default())
            .collect()
    }

    /// Drain the signals raised since the last call
    pub fn take_signals(&mut self) -> Vec<ReelSignal> {
        std::mem::take(&mut self.signals)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CONFIGURATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Placeholder → resolved short names for this spin
    pub fn set_replacement_symbols(&mut self, replacements: HashMap<String, String>) {
        self.replacements = replacements;
    }

    pub fn set_timing(&mut self, timing: ReelTiming) {
        self.timing = timing;
    }

    /// Flip scroll direction; buffers are recomputed before the next advance.
    pub fn set_direction(&mut self, direction: SpinDirection) {
        if direction != self.direction {
            self.direction = direction;
            self.buffers_dirty = true;
        }
    }

    /// Swap the base strip (new game mode)
    pub fn set_base_strip(&mut self, strip: Arc<ReelStrip>, presenter: &mut dyn SymbolPresenter) {
        if Arc::ptr_eq(&strip, &self.base_strip) {
            return;
        }
        let old_active = Arc::clone(self.active_strip());
        self.base_strip = strip;
        if self.replacement_strip.is_none() {
            self.on_active_strip_changed(old_active, presenter);
        }
    }

    /// Overlay a spin-scoped strip, or clear it with `None`.
    pub fn set_replacement_strip(
        &mut self,
        strip: Option<Arc<ReelStrip>>,
        presenter: &mut dyn SymbolPresenter,
    ) {
        let unchanged = match (&strip, &self.replacement_strip) {
            (Some(new), Some(current)) => Arc::ptr_eq(new, current),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }

        let old_active = Arc::clone(self.active_strip());
        self.replacement_strip = strip;
        self.on_active_strip_changed(old_active, presenter);
    }

    fn on_active_strip_changed(
        &mut self,
        old_active: Arc<ReelStrip>,
        presenter: &mut dyn SymbolPresenter,
    ) {
        self.previous_strip = Some(old_active);
        self.overrides.clear();
        self.position = wrap_index(self.position as i64, self.active_strip().len());
        self.update_buffer_size(presenter);

        if self.replacement_strip.is_some() && self.active_strip().avoid_splicing() {
            self.refresh_in_place(false, presenter);
        } else {
            self.repair_pending = true;
        }
    }

    /// Re-anchor on `position` (linked reel alignment)
    pub fn reset_position(&mut self, position: usize) {
        self.position = wrap_index(position as i64, self.active_strip().len());
        self.overrides.clear();
        self.repair_pending = true;
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BUFFERS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Buffer rows needed for the tallest symbol on or about to be on the reel
    pub fn required_buffer(&self) -> usize {
        let on_window = self
            .window
            .iter()
            .flatten()
            .map(|slot| slot.assembly().height)
            .max()
            .unwrap_or(1);
        let on_previous = self
            .previous_strip
            .as_ref()
            .map(|s| s.max_symbol_height())
            .unwrap_or(1);
        let tallest = self
            .active_strip()
            .max_symbol_height()
            .max(on_window)
            .max(on_previous);

        self.default_buffer.max(buffer_for_height(tallest))
    }

    /// `(top, bottom)` buffer counts for a buffer size in the current direction
    pub fn buffer_counts(&self, buffer: usize) -> (usize, usize) {
        match self.direction {
            SpinDirection::Down => (buffer, 1),
            SpinDirection::Up => (buffer, buffer),
        }
    }

    /// Recompute buffer sizes and resize the window if they changed.
    pub fn update_buffer_size(&mut self, presenter: &mut dyn SymbolPresenter) {
        let (top, bottom) = self.buffer_counts(self.required_buffer());
        if top != self.top_buffer || bottom != self.bottom_buffer {
            self.resize(self.visible, top, bottom, presenter);
        }
        self.buffers_dirty = false;
    }

    /// Apply a pending direction-driven buffer change
    pub fn apply_pending_buffers(&mut self, presenter: &mut dyn SymbolPresenter) {
        if self.buffers_dirty {
            self.update_buffer_size(presenter);
            self.repair_pending = true;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SPIN STATE MACHINE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Start spinning. Returns false for locked or already moving reels.
    pub fn start_spin(&mut self, presenter: &mut dyn SymbolPresenter) -> bool {
        if self.locked || self.state != SpinState::Stopped {
            return false;
        }

        self.apply_pending_buffers(presenter);
        self.previous_strip = None;
        self.stop_index = None;
        self.advances_remaining = 0;
        self.travel = 0.0;
        self.state_elapsed_ms = 0.0;
        self.state = if self.timing.begin_rollback_ms > 0.0 {
            SpinState::BeginRollback
        } else {
            SpinState::Spinning
        };
        true
    }

    /// Splice towards `target`; `group_offset` is the largest window of the
    /// reels stopping together (0 when stopping alone).
    pub fn set_stop_index(
        &mut self,
        target: StopTarget,
        group_offset: usize,
        presenter: &mut dyn SymbolPresenter,
    ) -> ReelResult<SpliceInfo> {
        match self.state {
            SpinState::BeginRollback => {
                self.state = SpinState::Spinning;
                self.state_elapsed_ms = 0.0;
            }
            SpinState::Spinning => {}
            _ => return Err(ReelError::InvalidPhase("reel not spinning")),
        }

        let len = self.active_strip().len();
        let step = self.direction.step();

        let info = match target {
            StopTarget::NextPosition => SpliceInfo {
                kind: SpliceKind::NextPosition,
                stop_index: wrap_index(self.position as i64 + step, len),
                advances: 1,
                play_sound: false,
            },
            StopTarget::Index(index) => {
                let stop = wrap_index(index as i64, len);
                if stop != index {
                    log::warn!("reel {}: stop index {index} wrapped to {stop}", self.id);
                }

                if self.behavior.refreshes_in_place() {
                    self.position = stop;
                    self.overrides.clear();
                    self.refresh_in_place(self.behavior == ReelBehavior::Tumble, presenter);
                    SpliceInfo {
                        kind: SpliceKind::InPlace,
                        stop_index: stop,
                        advances: 0,
                        play_sound: true,
                    }
                } else if self.active_strip().avoid_splicing() {
                    let minimum = group_offset.max(self.window.len());
                    let distance = match self.direction {
                        SpinDirection::Down => wrap_index(self.position as i64 - stop as i64, len),
                        SpinDirection::Up => wrap_index(stop as i64 - self.position as i64, len),
                    };
                    let mut advances = distance;
                    while advances < minimum {
                        advances += len;
                    }
                    SpliceInfo {
                        kind: SpliceKind::FullRotation,
                        stop_index: stop,
                        advances,
                        play_sound: true,
                    }
                } else {
                    // Remaining advances are counted, never compared against the
                    // position, so an offset that is a multiple of the strip
                    // length still scrolls the full distance.
                    let offset = group_offset.max(self.window.len());
                    self.position = wrap_index(stop as i64 - step * offset as i64, len);
                    self.overrides.clear();
                    self.repair_pending = true;
                    SpliceInfo {
                        kind: SpliceKind::Splice,
                        stop_index: stop,
                        advances: offset,
                        play_sound: true,
                    }
                }
            }
        };

        self.stop_index = Some(info.stop_index);
        self.advances_remaining = info.advances;
        self.state = SpinState::SpinEnding;
        if info.advances == 0 {
            self.land();
        }
        Ok(info)
    }

    /// Per-frame update
    pub fn tick(&mut self, delta_ms: f64, presenter: &mut dyn SymbolPresenter) {
        let delta_ms = delta_ms.max(0.0);
        match self.state {
            SpinState::Stopped => {}
            SpinState::BeginRollback => {
                self.state_elapsed_ms += delta_ms;
                if self.state_elapsed_ms >= self.timing.begin_rollback_ms {
                    self.state = SpinState::Spinning;
                    self.state_elapsed_ms = 0.0;
                }
            }
            SpinState::Spinning => {
                if self.behavior.refreshes_in_place() {
                    return;
                }
                self.travel += delta_ms / self.timing.advance_interval_ms();
                while self.travel >= 1.0 {
                    self.travel -= 1.0;
                    self.advance(self.direction, presenter);
                }
            }
            SpinState::SpinEnding => {
                self.travel += delta_ms / self.timing.advance_interval_ms();
                while self.travel >= 1.0 && self.advances_remaining > 0 {
                    self.travel -= 1.0;
                    self.advance(self.direction, presenter);
                    self.advances_remaining -= 1;
                }
                if self.advances_remaining == 0 {
                    self.land();
                }
            }
            SpinState::EndRollback => {
                self.state_elapsed_ms += delta_ms;
                if self.state_elapsed_ms >= self.timing.end_rollback_ms {
                    self.finish_stop();
                }
            }
        }
    }

    fn land(&mut self) {
        self.travel = 0.0;
        self.state_elapsed_ms = 0.0;
        self.state = SpinState::EndRollback;
        self.signals.push(ReelSignal::Landed);
        if self.timing.end_rollback_ms <= 0.0 {
            self.finish_stop();
        }
    }

    fn finish_stop(&mut self) {
        self.state = SpinState::Stopped;
        self.state_elapsed_ms = 0.0;
        self.signals.push(ReelSignal::Stopped);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REPAIR
    // ═══════════════════════════════════════════════════════════════════════════

    /// Repair this reel on its own (no mega neighbors available).
    pub fn repair(&mut self, presenter: &mut dyn SymbolPresenter) -> ReelResult<RepairReport> {
        repair::repair_alone(self, presenter)
    }

    pub(crate) fn mark_repaired(&mut self) {
        self.repair_pending = false;
    }

    /// Random 1×1 stand-in from the active strip
    pub(crate) fn pick_clobber_symbol(&mut self) -> ReelResult<Arc<SymbolSpec>> {
        let strip = Arc::clone(self.active_strip());
        let candidates = strip.clobber_candidates();
        if candidates.is_empty() {
            return Err(ReelError::NoClobberCandidate {
                reel: self.id,
                strip: strip.key().to_string(),
            });
        }
        let pick = self.rng.random_range(0..candidates.len());
        Ok(Arc::clone(&candidates[pick]))
    }

    pub(crate) fn set_override(&mut self, strip_index: i64, symbol: Arc<SymbolSpec>) {
        let index = self.active_strip().wrap(strip_index);
        self.overrides.insert(index, symbol);
    }
}
