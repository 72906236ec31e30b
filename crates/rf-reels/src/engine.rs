//! ReelEngine: spin phase machine and stop sequencing
//!
//! ```text
//! Stopped ──spin()──► BeginSpin ──last reel triggered──► Spinning
//!    ▲                (skipped when starts are not staggered)    │
//!    │                                                outcome + gate ready
//!    └── entries done + post-stop finished ◄── EndSpin ◄──────────┘
//! ```
//!
//! The engine is single threaded and driven by [`ReelEngine::tick`]. Each tick it
//! first advances its own phase, then ticks every reel in order, repairs what
//! changed and turns reel signals into [`EngineEvent`]s.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, SpinDirection};
use crate::error::{ReelError, ReelResult};
use crate::events::{EngineEvent, EngineEventKind};
use crate::gate::{GatePoll, OpenGate, StopGate, poll};
use crate::layout::{ReelId, ReelLayout};
use crate::link::{LinkGroups, LinkPartition};
use crate::outcome::Outcome;
use crate::presenter::{NullPresenter, SymbolPresenter};
use crate::reel::{Reel, ReelSignal, SpinState, repair_reels};
use crate::stop_order::{EntryProgress, PreviousEntry, StopOrder, may_splice};
use crate::strip::{ReelStrip, StripLibrary};
use crate::symbols::SymbolCache;
use crate::timing::{ReelTiming, StopDelayContext, StopScheduler, TimingProfile};
use crate::validation::{ValidationReport, compare_matrix};

/// Global spin phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EnginePhase {
    #[default]
    Stopped,
    /// Reels starting one after another
    BeginSpin,
    /// Every reel triggered, waiting for the outcome
    Spinning,
    /// Stop-order entries splicing in sequence
    EndSpin,
}

impl EnginePhase {
    pub fn name(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::BeginSpin => "BeginSpin",
            Self::Spinning => "Spinning",
            Self::EndSpin => "EndSpin",
        }
    }
}

/// Anticipation fired by a reel landing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnticipationHit {
    /// Reel that should anticipate
    pub target: ReelId,
    pub effect: bool,
    pub sound: bool,
}

/// Post-stop work of one reel
#[derive(Debug, Clone, Copy, Default)]
struct PostStop {
    pending: bool,
    /// Countdown, started once the reel stops
    remaining_ms: Option<f64>,
}

/// Owner of every reel and of the spin sequencing
pub struct ReelEngine<P: SymbolPresenter = NullPresenter> {
    config: EngineConfig,
    layout: ReelLayout,
    strips: StripLibrary,
    symbols: Arc<SymbolCache>,
    reels: Vec<Reel>,
    presenter: P,

    gate: Box<dyn StopGate>,
    /// Outstanding gate request; guards against requesting twice
    pending_gate: Option<Receiver<()>>,

    phase: EnginePhase,
    phase_elapsed_ms: f64,
    clock_ms: f64,

    base_order: StopOrder,
    /// Base order merged with this spin's link groups
    stop_order: StopOrder,
    progress: Vec<EntryProgress>,
    scheduler: StopScheduler,
    links: LinkGroups,

    outcome: Option<Outcome>,
    /// Placeholder short name → resolved short name, shared by every reel
    replacement_picks: HashMap<String, String>,
    rng: StdRng,
    reevaluation: bool,
    awaiting_release: bool,
    static_reels: HashSet<usize>,
    slam_stop: bool,

    start_targets: Vec<f64>,
    triggered: Vec<bool>,
    anticipating: HashSet<usize>,
    post_stop: Vec<PostStop>,
    final_symbols: Vec<Vec<String>>,

    events: Vec<EngineEvent>,
}

impl<P: SymbolPresenter> ReelEngine<P> {
    /// Build every reel from `config` and fill their windows.
    pub fn initialize(
        config: EngineConfig,
        strips: StripLibrary,
        symbols: Arc<SymbolCache>,
        mut presenter: P,
    ) -> ReelResult<Self> {
        config.validate()?;

        let base_seed = config.seed.unwrap_or_else(rand::random);
        let mut reels = Vec::with_capacity(config.reels.len());
        for (i, reel_config) in config.reels.iter().enumerate() {
            let strip = strips.get(&reel_config.strip)?;
            let seed = reel_config
                .seed
                .unwrap_or_else(|| base_seed.wrapping_add(i as u64));
            reels.push(Reel::new(
                reel_config,
                reel_config.timing(&config.timing),
                strip,
                Arc::clone(&symbols),
                seed,
                &mut presenter,
            )?);
        }

        let ids: Vec<ReelId> = reels.iter().map(Reel::id).collect();
        let base_order = match &config.stop_order {
            Some(order) => StopOrder::from_ids(order, &ids)?,
            None => StopOrder::by_column(&ids),
        };
        let scheduler = StopScheduler::new(
            config.stop_delay_multiplier,
            config.timing.anticipation_delay_ms,
        );
        let count = reels.len();

        let mut engine = Self {
            layout: config.layout(),
            config,
            strips,
            symbols,
            reels,
            presenter,
            gate: Box::new(OpenGate),
            pending_gate: None,
            phase: EnginePhase::Stopped,
            phase_elapsed_ms: 0.0,
            clock_ms: 0.0,
            stop_order: base_order.clone(),
            base_order,
            progress: Vec::new(),
            scheduler,
            links: LinkGroups::new(),
            outcome: None,
            replacement_picks: HashMap::new(),
            rng: StdRng::seed_from_u64(base_seed),
            reevaluation: false,
            awaiting_release: false,
            static_reels: HashSet::new(),
            slam_stop: false,
            start_targets: vec![0.0; count],
            triggered: vec![false; count],
            anticipating: HashSet::new(),
            post_stop: vec![PostStop::default(); count],
            final_symbols: vec![Vec::new(); count],
            events: Vec::new(),
        };

        engine.refresh_replacement_picks(&HashMap::new(), &[]);
        for reel in &mut engine.reels {
            reel.reresolve_placeholders(&mut engine.presenter);
        }
        engine.rebuild_data_links();
        engine.repair_all();
        log::debug!("reel engine initialized with {count} reels");
        Ok(engine)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn layout(&self) -> ReelLayout {
        self.layout
    }

    pub fn reels(&self) -> &[Reel] {
        &self.reels
    }

    pub fn reel(&self, index: usize) -> Option<&Reel> {
        self.reels.get(index)
    }

    /// Index of the reel with `id`
    pub fn reel_index(&self, id: &ReelId) -> Option<usize> {
        self.reels.iter().position(|reel| reel.id() == *id)
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn symbols(&self) -> &Arc<SymbolCache> {
        &self.symbols
    }

    pub fn links(&self) -> &LinkGroups {
        &self.links
    }

    /// Stop order in effect for the current spin
    pub fn stop_order(&self) -> &StopOrder {
        &self.stop_order
    }

    /// Per-entry progress of the current stop sequence
    pub fn stop_progress(&self) -> &[EntryProgress] {
        &self.progress
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Milliseconds ticked since initialization
    pub fn clock_ms(&self) -> f64 {
        self.clock_ms
    }

    pub fn is_slam_stop(&self) -> bool {
        self.slam_stop
    }

    /// Waiting on the pre-stop gate
    pub fn is_gated(&self) -> bool {
        self.pending_gate.is_some()
    }

    /// Server names each reel showed when its stop entry completed
    pub fn final_symbols(&self) -> &[Vec<String>] {
        &self.final_symbols
    }

    /// Post-stop work still running on any reel
    pub fn post_stop_pending(&self) -> bool {
        self.post_stop.iter().any(|p| p.pending)
    }

    /// Take every event raised since the last call
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CONFIGURATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Replace the pre-stop gate
    pub fn set_stop_gate(&mut self, gate: impl StopGate + 'static) {
        self.gate = Box::new(gate);
        self.pending_gate = None;
    }

    /// Switch every reel to a timing profile
    pub fn set_timing_profile(&mut self, profile: TimingProfile) -> ReelResult<()> {
        self.require_phase(EnginePhase::Stopped)?;
        self.config.timing = ReelTiming::from_profile(profile);
        for (reel, reel_config) in self.reels.iter_mut().zip(&self.config.reels) {
            reel.set_timing(reel_config.timing(&self.config.timing));
        }
        self.scheduler = StopScheduler::new(
            self.config.stop_delay_multiplier,
            self.config.timing.anticipation_delay_ms,
        );
        Ok(())
    }

    /// Lock or unlock a reel's window
    pub fn set_locked(&mut self, index: usize, locked: bool) -> ReelResult<()> {
        self.require_phase(EnginePhase::Stopped)?;
        self.reel_mut(index)?.set_locked(locked);
        Ok(())
    }

    /// Flip a reel's scroll direction; applied when it next starts
    pub fn set_direction(&mut self, index: usize, direction: SpinDirection) -> ReelResult<()> {
        self.require_phase(EnginePhase::Stopped)?;
        self.reel_mut(index)?.set_direction(direction);
        Ok(())
    }

    /// Link reels for the current or next spin (override partition)
    pub fn link_reels(&mut self, reels: impl IntoIterator<Item = usize>) -> ReelResult<()> {
        if self.phase == EnginePhase::EndSpin {
            return Err(ReelError::InvalidPhase(self.phase.name()));
        }
        let reels: Vec<usize> = reels.into_iter().collect();
        if let Some(bad) = reels.iter().find(|&&i| i >= self.reels.len()) {
            return Err(ReelError::InvalidConfig(format!("no reel at index {bad}")));
        }
        self.links.add(LinkPartition::Override, reels);
        Ok(())
    }

    /// Effective link group of a reel across all partitions
    pub fn resolve_link_group(&self, index: usize) -> BTreeSet<usize> {
        self.links.resolve(index)
    }

    /// Swap base strips (reel index → strip key), e.g. entering a new game mode.
    pub fn set_base_strips(&mut self, keys: &HashMap<usize, String>) -> ReelResult<()> {
        self.require_phase(EnginePhase::Stopped)?;

        let mut resolved: Vec<(usize, Arc<ReelStrip>)> = Vec::with_capacity(keys.len());
        for (&index, key) in keys {
            if index >= self.reels.len() {
                return Err(ReelError::InvalidConfig(format!("no reel at index {index}")));
            }
            resolved.push((index, self.strips.get(key)?));
        }
        resolved.sort_by_key(|(index, _)| *index);

        for (index, strip) in resolved {
            self.reels[index].set_base_strip(strip, &mut self.presenter);
        }
        self.rebuild_data_links();
        self.repair_all();
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SPIN CONTROL
    // ═══════════════════════════════════════════════════════════════════════════

    /// Start a spin
    pub fn spin(&mut self) -> ReelResult<()> {
        self.require_phase(EnginePhase::Stopped)?;
        self.reset_spin_state();
        self.emit(EngineEventKind::SpinStart {
            reevaluation: false,
        });
        self.begin_spin();
        Ok(())
    }

    /// Start a reevaluation sub-spin. Static reels stay still, and the reels are
    /// not stopped until [`ReelEngine::release_reevaluation`].
    pub fn spin_reevaluation(&mut self, outcome: Outcome) -> ReelResult<()> {
        self.require_phase(EnginePhase::Stopped)?;
        outcome.validate(self.reels.len())?;
        let replacements = self.resolve_replacements(&outcome)?;

        self.reset_spin_state();
        self.reevaluation = true;
        self.awaiting_release = true;
        self.static_reels = outcome
            .static_reels
            .iter()
            .filter_map(|raw| self.index_of_raw(*raw, 0))
            .collect();

        self.emit(EngineEventKind::SpinStart { reevaluation: true });
        self.begin_spin();
        self.apply_outcome(outcome, replacements);
        Ok(())
    }

    /// Let a reevaluation spin proceed to its stop sequence
    pub fn release_reevaluation(&mut self) -> ReelResult<()> {
        if !self.awaiting_release {
            return Err(ReelError::InvalidPhase(self.phase.name()));
        }
        self.awaiting_release = false;
        Ok(())
    }

    /// Provide the outcome of the running spin
    pub fn set_outcome(&mut self, outcome: Outcome) -> ReelResult<()> {
        match self.phase {
            EnginePhase::BeginSpin | EnginePhase::Spinning => {}
            phase => return Err(ReelError::InvalidPhase(phase.name())),
        }
        outcome.validate(self.reels.len())?;
        let replacements = self.resolve_replacements(&outcome)?;
        self.apply_outcome(outcome, replacements);
        Ok(())
    }

    /// Remove all remaining waiting between starts and stops
    pub fn slam_stop(&mut self) {
        if self.phase == EnginePhase::Stopped {
            return;
        }
        if !self.slam_stop {
            log::debug!("slam stop in {}", self.phase.name());
        }
        self.slam_stop = true;
    }

    /// End a reel's post-stop animation early
    pub fn complete_post_stop(&mut self, index: usize) {
        if let Some(post) = self.post_stop.get_mut(index) {
            post.pending = false;
            post.remaining_ms = None;
        }
    }

    /// Anticipation fired when the reel with `raw_id` lands (base layer)
    pub fn anticipation_trigger(&self, raw_id: usize) -> Option<AnticipationHit> {
        self.anticipation_trigger_on(raw_id, 0)
    }

    fn anticipation_trigger_on(&self, raw_id: usize, layer: usize) -> Option<AnticipationHit> {
        let trigger = self.outcome.as_ref()?.anticipation_triggers.get(&raw_id)?;
        Some(AnticipationHit {
            target: self
                .layout
                .from_raw(trigger.target_reel, layer, trigger.target_row),
            effect: trigger.effect,
            sound: trigger.sound,
        })
    }

    /// Compare the visible windows with a server matrix (`[layer][column][row]`).
    ///
    /// Mismatches are logged. With `halt_on_desync` the first one is returned
    /// as [`ReelError::Desync`]. Nothing is modified either way.
    pub fn validate_server_matrix(
        &self,
        matrix: &[Vec<Vec<String>>],
    ) -> ReelResult<ValidationReport> {
        let report = compare_matrix(matrix, &self.reels);
        for m in &report.mismatches {
            log::error!(
                "desync on layer {} reel {} row {}: server '{}', client '{}'",
                m.layer,
                m.column,
                m.row,
                m.expected,
                m.found
            );
        }
        if self.config.halt_on_desync {
            if let Some(first) = report.mismatches.first() {
                return Err(first.clone().into());
            }
        }
        Ok(report)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TICK
    // ═══════════════════════════════════════════════════════════════════════════

    /// Advance by `delta_ms`, or by the configured fixed step for `None`.
    ///
    /// Returns an error only for a desync at spin end with `halt_on_desync`.
    pub fn tick(&mut self, delta_ms: Option<f64>) -> ReelResult<()> {
        let dt = delta_ms.unwrap_or(self.config.fixed_tick_ms).max(0.0);
        self.clock_ms += dt;
        self.phase_elapsed_ms += dt;
        self.update_post_stop(dt);

        match self.phase {
            EnginePhase::Stopped => {}
            EnginePhase::BeginSpin => self.update_begin_spin(),
            EnginePhase::Spinning => self.update_spinning(),
            EnginePhase::EndSpin => self.update_end_spin(),
        }

        for reel in &mut self.reels {
            reel.tick(dt, &mut self.presenter);
        }
        self.repair_all();
        self.collect_signals();

        if self.phase == EnginePhase::EndSpin {
            self.update_entry_completion();
            return self.try_finish();
        }
        Ok(())
    }

    /// Tick until the engine is stopped or `max_ms` has passed. Returns whether
    /// the engine stopped.
    pub fn run_until_stopped(&mut self, step_ms: Option<f64>, max_ms: f64) -> ReelResult<bool> {
        let start = self.clock_ms;
        while self.phase != EnginePhase::Stopped {
            if self.clock_ms - start >= max_ms {
                return Ok(false);
            }
            self.tick(step_ms)?;
        }
        Ok(true)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PHASES
    // ═══════════════════════════════════════════════════════════════════════════

    fn set_phase(&mut self, phase: EnginePhase) {
        log::debug!("phase {} -> {}", self.phase.name(), phase.name());
        self.phase = phase;
        self.phase_elapsed_ms = 0.0;
    }

    fn require_phase(&self, phase: EnginePhase) -> ReelResult<()> {
        if self.phase != phase {
            return Err(ReelError::InvalidPhase(self.phase.name()));
        }
        Ok(())
    }

    fn reset_spin_state(&mut self) {
        self.outcome = None;
        self.reevaluation = false;
        self.awaiting_release = false;
        self.static_reels.clear();
        self.slam_stop = false;
        self.anticipating.clear();
        self.pending_gate = None;
        self.progress.clear();
        self.scheduler.reset();
        self.links.clear(LinkPartition::Outcome);
        self.post_stop.fill(PostStop::default());
        self.final_symbols.iter_mut().for_each(Vec::clear);

        // Replacement strips only last one spin
        for reel in &mut self.reels {
            reel.set_replacement_strip(None, &mut self.presenter);
        }
        self.refresh_replacement_picks(&HashMap::new(), &[]);
        self.rebuild_data_links();
        self.repair_all();
    }

    fn participates(&self, index: usize) -> bool {
        !self.reels[index].is_locked() && !self.static_reels.contains(&index)
    }

    /// Linked reels start together with the lowest reel of their group; the
    /// rest of the cascade keeps its stagger.
    fn begin_spin(&mut self) {
        let stagger = if self.slam_stop || self.layout.is_independent() {
            0.0
        } else {
            self.config.timing.start_delay_ms
        };

        let mut next = 0.0;
        for i in 0..self.reels.len() {
            self.triggered[i] = false;
            let leader = self.links.resolve(i).first().copied().unwrap_or(i);
            if leader < i {
                self.start_targets[i] = self.start_targets[leader];
                continue;
            }
            self.start_targets[i] = next;
            if self.participates(i) {
                next += stagger;
            }
        }

        if stagger > 0.0 {
            self.set_phase(EnginePhase::BeginSpin);
            self.update_begin_spin();
        } else {
            for i in 0..self.reels.len() {
                self.trigger_reel(i);
            }
            self.set_phase(EnginePhase::Spinning);
        }
    }

    /// Start a reel, or just mark it triggered when it must stay still.
    fn trigger_reel(&mut self, index: usize) {
        if self.triggered[index] {
            return;
        }
        self.triggered[index] = true;
        if !self.participates(index) {
            return;
        }
        if self.reels[index].start_spin(&mut self.presenter) {
            let reel = self.reels[index].id();
            self.emit(EngineEventKind::ReelStarted { reel });
        }
    }

    fn update_begin_spin(&mut self) {
        for i in 0..self.reels.len() {
            if !self.triggered[i] && (self.slam_stop || self.phase_elapsed_ms >= self.start_targets[i])
            {
                self.trigger_reel(i);
            }
        }
        if self.triggered.iter().all(|t| *t) {
            self.set_phase(EnginePhase::Spinning);
        }
    }

    fn update_spinning(&mut self) {
        if self.awaiting_release || self.outcome.is_none() {
            return;
        }
        self.stop_reels();
    }

    /// Wait for the pre-stop gate, then enter `EndSpin`.
    fn stop_reels(&mut self) {
        if self.outcome.is_none() {
            log::error!("{}", ReelError::MissingOutcome);
            return;
        }

        let receiver = match self.pending_gate.take() {
            Some(receiver) => receiver,
            None => {
                log::debug!("requesting stop gate");
                self.gate.request()
            }
        };
        match poll(&receiver) {
            GatePoll::Waiting => self.pending_gate = Some(receiver),
            GatePoll::Ready => self.enter_end_spin(),
        }
    }

    fn enter_end_spin(&mut self) {
        let Some(outcome) = self.outcome.as_ref() else {
            log::error!("{}", ReelError::MissingOutcome);
            return;
        };
        let delays: Vec<Option<f64>> = (0..self.base_order.len().max(self.reels.len()))
            .map(|e| outcome.stop_delay(e))
            .collect();

        let count = self.reels.len();
        self.stop_order = self
            .base_order
            .merged_with_links(&self.links.resolved_groups(count));
        self.scheduler.reset();

        let mut progress = Vec::with_capacity(self.stop_order.len());
        for (e, entry) in self.stop_order.entries().iter().enumerate() {
            let configured = delays.get(e).copied().flatten().unwrap_or(if e == 0 {
                0.0
            } else {
                self.config.timing.stop_delay_ms
            });
            let ctx = StopDelayContext {
                all_locked: entry.iter().all(|&i| !self.participates(i)),
                slam_stop: self.slam_stop,
                anticipating: entry.iter().any(|i| self.anticipating.contains(i)),
            };
            let delay_ms = self.scheduler.effective_delay(configured, ctx);
            let target_ms = self.scheduler.schedule(configured, ctx);
            progress.push(EntryProgress {
                delay_ms,
                target_ms,
                spliced: false,
                done: false,
            });
        }
        self.progress = progress;

        let mut anticipating: Vec<usize> = self.anticipating.iter().copied().collect();
        anticipating.sort_unstable();
        for i in anticipating {
            if self.participates(i) {
                self.post_stop[i].pending = true;
                let reel = self.reels[i].id();
                self.emit(EngineEventKind::Anticipation {
                    reel,
                    effect: true,
                    sound: true,
                });
            }
        }

        self.set_phase(EnginePhase::EndSpin);
        self.update_end_spin();
    }

    fn entry_spinning(&self, entry: usize) -> bool {
        self.stop_order.entries()[entry]
            .iter()
            .any(|&i| self.reels[i].is_spinning())
    }

    fn update_end_spin(&mut self) {
        for e in 0..self.progress.len() {
            if self.progress[e].spliced {
                continue;
            }
            let previous = e.checked_sub(1).map(|p| PreviousEntry {
                spliced: self.progress[p].spliced,
                spinning: self.entry_spinning(p),
                done: self.progress[p].done,
            });
            if may_splice(
                &self.progress[e],
                previous,
                self.phase_elapsed_ms,
                self.slam_stop,
            ) {
                self.splice_entry(e);
            }
        }
    }

    /// Tell every moving reel of entry `e` its stop index.
    fn splice_entry(&mut self, e: usize) {
        let entry = self.stop_order.entries()[e].clone();
        let moving: Vec<usize> = entry
            .into_iter()
            .filter(|&i| self.participates(i) && self.reels[i].is_spinning())
            .collect();

        // Reels stopping together take the same number of advances
        let group_offset = if moving.len() > 1 {
            moving
                .iter()
                .map(|&i| self.reels[i].window_len())
                .max()
                .unwrap_or(0)
        } else {
            0
        };

        for i in moving {
            // Linked reels all take the stop of the lowest reel in their group
            let anchor = self.links.resolve(i).first().copied().unwrap_or(i);
            let strip_len = self.reels[i].active_strip().len();
            let target = match self.outcome.as_ref() {
                Some(outcome) => {
                    if anchor != i && outcome.stops.get(anchor) != outcome.stops.get(i) {
                        log::debug!(
                            "reel {}: linked to reel {anchor}, using its stop",
                            self.reels[i].id()
                        );
                    }
                    outcome.stop_target(anchor, strip_len)
                }
                None => Err(ReelError::MissingOutcome),
            };
            let target = match target {
                Ok(target) => target,
                Err(err) => {
                    log::error!("reel {}: {err}", self.reels[i].id());
                    continue;
                }
            };

            match self.reels[i].set_stop_index(target, group_offset, &mut self.presenter) {
                Ok(info) => {
                    let reel = self.reels[i].id();
                    self.emit(EngineEventKind::ReelSpliced {
                        reel,
                        stop_index: info.stop_index,
                        kind: info.kind,
                        play_sound: info.play_sound,
                    });
                }
                Err(err) => log::error!("reel {}: {err}", self.reels[i].id()),
            }
        }

        self.progress[e].spliced = true;
        self.repair_all();
        self.collect_signals();
    }

    fn update_entry_completion(&mut self) {
        for e in 0..self.progress.len() {
            let progress = self.progress[e];
            if progress.done || !progress.spliced {
                continue;
            }
            let entry = self.stop_order.entries()[e].clone();
            let stopped = entry
                .iter()
                .all(|&i| !self.participates(i) || self.reels[i].state() == SpinState::Stopped);
            if !stopped {
                continue;
            }

            for &i in &entry {
                self.final_symbols[i] = self.reels[i].visible_server_names();
            }
            self.progress[e].done = true;
            self.emit(EngineEventKind::StopEntryDone { entry: e });
        }
    }

    fn try_finish(&mut self) -> ReelResult<()> {
        let entries_done = self.progress.iter().all(|p| p.done);
        if !entries_done || self.post_stop_pending() {
            return Ok(());
        }

        self.set_phase(EnginePhase::Stopped);
        self.links.clear(LinkPartition::Override);
        self.slam_stop = false;
        self.pending_gate = None;
        self.emit(EngineEventKind::SpinEnd);

        let matrix = self.outcome.as_ref().and_then(|o| o.symbol_matrix.clone());
        match matrix {
            Some(matrix) => self.validate_server_matrix(&matrix).map(|_| ()),
            None => Ok(()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // OUTCOME
    // ═══════════════════════════════════════════════════════════════════════════

    fn index_of_raw(&self, raw: usize, layer: usize) -> Option<usize> {
        self.reels
            .iter()
            .position(|reel| reel.id().layer == layer && self.layout.raw_id(&reel.id()) == raw)
    }

    fn reel_mut(&mut self, index: usize) -> ReelResult<&mut Reel> {
        self.reels
            .get_mut(index)
            .ok_or_else(|| ReelError::InvalidConfig(format!("no reel at index {index}")))
    }

    /// Strip replacements of an outcome, checked before anything changes
    fn resolve_replacements(&self, outcome: &Outcome) -> ReelResult<Vec<(usize, Arc<ReelStrip>)>> {
        let mut resolved = Vec::new();
        for (&raw, key) in &outcome.strip_replacements {
            match self.index_of_raw(raw, 0) {
                Some(index) => resolved.push((index, self.strips.get(key)?)),
                None => log::warn!("strip replacement for unknown reel {raw}"),
            }
        }
        for replacement in &outcome.layered_replacements {
            let id = ReelId {
                column: replacement.column,
                row: replacement.row,
                layer: replacement.layer,
            };
            match self.reel_index(&id) {
                Some(index) => resolved.push((index, self.strips.get(&replacement.strip)?)),
                None => log::warn!("strip replacement for unknown reel {id}"),
            }
        }
        resolved.sort_by_key(|(index, _)| *index);
        Ok(resolved)
    }

    fn apply_outcome(&mut self, outcome: Outcome, replacements: Vec<(usize, Arc<ReelStrip>)>) {
        let incoming: Vec<Arc<ReelStrip>> =
            replacements.iter().map(|(_, strip)| Arc::clone(strip)).collect();
        if self.refresh_replacement_picks(&outcome.replacement_symbols, &incoming) {
            for reel in &mut self.reels {
                reel.reresolve_placeholders(&mut self.presenter);
            }
        }

        let linked: Vec<Vec<usize>> = outcome
            .linked_reels
            .iter()
            .map(|group| {
                group
                    .iter()
                    .filter_map(|raw| self.index_of_raw(*raw, 0))
                    .collect()
            })
            .collect();
        self.links.set(LinkPartition::Outcome, linked);

        self.anticipating = outcome
            .anticipating_reels
            .iter()
            .filter_map(|raw| self.index_of_raw(*raw, 0))
            .collect();

        let replaced: Vec<usize> = replacements.iter().map(|(index, _)| *index).collect();
        for (index, strip) in replacements {
            self.reels[index].set_replacement_strip(Some(strip), &mut self.presenter);
        }
        self.rebuild_data_links();
        for index in replaced {
            self.align_linked(index);
        }
        self.repair_all();

        self.outcome = Some(outcome);
    }

    /// Pick one resolution per replacement placeholder, so every reel and every
    /// cell of a composite shows the same symbol. Picks hold until an outcome
    /// fixes them: `fixed` entries win over earlier picks, and `extra` strips
    /// are about to be swapped in. Returns whether an existing pick changed.
    fn refresh_replacement_picks(
        &mut self,
        fixed: &HashMap<String, String>,
        extra: &[Arc<ReelStrip>],
    ) -> bool {
        let mut changed = false;
        for (placeholder, resolved) in fixed {
            let previous = self
                .replacement_picks
                .insert(placeholder.clone(), resolved.clone());
            changed |= previous.is_some_and(|previous| previous != *resolved);
        }

        let strips: Vec<Arc<ReelStrip>> = self
            .reels
            .iter()
            .map(|reel| Arc::clone(reel.active_strip()))
            .chain(extra.iter().cloned())
            .collect();
        for strip in &strips {
            let candidates = strip.clobber_candidates();
            if candidates.is_empty() {
                continue;
            }
            for symbol in strip.symbols() {
                if !symbol.is_replacement()
                    || symbol.sub_symbol.is_some()
                    || self.replacement_picks.contains_key(&symbol.short_name)
                {
                    continue;
                }
                let pick = self.rng.random_range(0..candidates.len());
                self.replacement_picks
                    .insert(symbol.short_name.clone(), candidates[pick].short_name.clone());
            }
        }

        for reel in &mut self.reels {
            reel.set_replacement_symbols(self.replacement_picks.clone());
        }
        changed
    }

    /// Re-anchor every reel linked to `index` on its position
    fn align_linked(&mut self, index: usize) {
        let position = self.reels[index].position();
        for member in self.links.resolve(index) {
            if member != index {
                self.reels[member].reset_position(position);
            }
        }
    }

    /// Data partition: configured links plus strips sharing a link group
    fn rebuild_data_links(&mut self) {
        let mut by_group: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, reel) in self.reels.iter().enumerate() {
            if let Some(group) = reel.active_strip().link_group() {
                by_group.entry(group.to_string()).or_default().push(i);
            }
        }

        let mut groups = self.config.data_links.clone();
        groups.extend(by_group.into_values());
        self.links.set(LinkPartition::Data, groups);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REELS
    // ═══════════════════════════════════════════════════════════════════════════

    fn repair_all(&mut self) {
        if !self.reels.iter().any(Reel::needs_repair) {
            return;
        }
        let results = repair_reels(&mut self.reels, &mut self.presenter);
        for (reel, result) in self.reels.iter().zip(results) {
            match result {
                Ok(report) if !report.is_clean() => log::trace!(
                    "reel {}: repaired ({} completed, {} clobbered, {} overridden, {} deferred)",
                    reel.id(),
                    report.completed,
                    report.clobbered,
                    report.overridden,
                    report.deferred
                ),
                Ok(_) => {}
                Err(err) => log::error!("reel {}: {err}", reel.id()),
            }
        }
    }

    fn collect_signals(&mut self) {
        for i in 0..self.reels.len() {
            for signal in self.reels[i].take_signals() {
                let reel = self.reels[i].id();
                match signal {
                    ReelSignal::Landed => {
                        let symbols = self.reels[i].visible_server_names();
                        self.emit(EngineEventKind::ReelLanded { reel, symbols });
                        self.fire_trigger(i);
                    }
                    ReelSignal::Stopped => {
                        self.emit(EngineEventKind::ReelStopped { reel });
                        let duration = self.config.timing.anticipation_duration_ms;
                        let post = &mut self.post_stop[i];
                        if post.pending {
                            if duration > 0.0 {
                                post.remaining_ms = Some(duration);
                            } else {
                                post.pending = false;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Anticipation on the trigger target of a reel that just landed
    fn fire_trigger(&mut self, index: usize) {
        let id = self.reels[index].id();
        let raw = self.layout.raw_id(&id);
        let Some(hit) = self.anticipation_trigger_on(raw, id.layer) else {
            return;
        };
        let Some(target) = self.reel_index(&hit.target) else {
            log::warn!("anticipation target {} is not a reel", hit.target);
            return;
        };
        if self.anticipating.contains(&target) || !self.participates(target) {
            return;
        }
        let Some(entry) = self.stop_order.entry_of(target) else {
            return;
        };
        if self.progress.get(entry).is_none_or(|p| p.spliced) {
            return;
        }

        self.anticipating.insert(target);
        self.post_stop[target].pending = true;
        self.emit(EngineEventKind::Anticipation {
            reel: hit.target,
            effect: hit.effect,
            sound: hit.sound,
        });

        let extra = self.scheduler.effective_delay(
            0.0,
            StopDelayContext {
                anticipating: true,
                slam_stop: self.slam_stop,
                ..Default::default()
            },
        );
        self.progress[entry].delay_ms += extra;
        for progress in self.progress[entry..].iter_mut().filter(|p| !p.spliced) {
            progress.target_ms += extra;
        }
    }

    fn update_post_stop(&mut self, dt: f64) {
        for post in self.post_stop.iter_mut().filter(|p| p.pending) {
            let Some(remaining) = post.remaining_ms.map(|ms| ms - dt) else {
                continue;
            };
            if remaining <= 0.0 {
                post.pending = false;
                post.remaining_ms = None;
            } else {
                post.remaining_ms = Some(remaining);
            }
        }
    }

    fn emit(&mut self, kind: EngineEventKind) {
        log::trace!("{} at {:.1}ms", kind.type_name(), self.clock_ms);
        self.events.push(EngineEvent::new(self.clock_ms, kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::ReadyGate;

    const NAMES: [&str; 12] = ["A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L"];

    fn engine_with(config: EngineConfig) -> ReelEngine {
        let cache = Arc::new(SymbolCache::new());
        let mut strips = StripLibrary::new();
        strips.insert(ReelStrip::from_names("base", &NAMES, &cache).unwrap());
        ReelEngine::initialize(config, strips, cache, NullPresenter).unwrap()
    }

    fn instant_engine() -> ReelEngine {
        engine_with(
            EngineConfig::standard(3, 3, "base")
                .with_profile(TimingProfile::Instant)
                .with_seed(7),
        )
    }

    fn spin_to_stop(engine: &mut ReelEngine, stops: Vec<i64>) {
        engine.spin().unwrap();
        engine.tick(None).unwrap();
        engine.set_outcome(Outcome::with_stops(stops)).unwrap();
        assert!(engine.run_until_stopped(None, 5_000.0).unwrap());
    }

    fn count(events: &[EngineEvent], name: &str) -> usize {
        events.iter().filter(|e| e.type_name() == name).count()
    }

    #[test]
    fn test_spin_lands_on_stops() {
        let mut engine = instant_engine();
        spin_to_stop(&mut engine, vec![0, 4, 8]);

        assert_eq!(engine.phase(), EnginePhase::Stopped);
        assert_eq!(engine.reels()[0].visible_server_names(), vec!["K", "L", "A"]);
        assert_eq!(engine.reels()[1].visible_server_names(), vec!["C", "D", "E"]);
        assert_eq!(engine.reels()[2].visible_server_names(), vec!["G", "H", "I"]);
        assert_eq!(engine.final_symbols()[1], vec!["C", "D", "E"]);

        let events = engine.drain_events();
        assert_eq!(count(&events, "spin_start"), 1);
        assert_eq!(count(&events, "reel_started"), 3);
        assert_eq!(count(&events, "reel_spliced"), 3);
        assert_eq!(count(&events, "reel_landed"), 3);
        assert_eq!(count(&events, "stop_entry_done"), 3);
        assert_eq!(events.last().map(EngineEvent::type_name), Some("spin_end"));
        assert!(engine.drain_events().is_empty());
    }

    #[test]
    fn test_calls_outside_phase_rejected() {
        let mut engine = instant_engine();
        assert!(matches!(
            engine.set_outcome(Outcome::with_stops(vec![0, 0, 0])),
            Err(ReelError::InvalidPhase("Stopped"))
        ));

        engine.spin().unwrap();
        assert!(engine.spin().is_err());
        assert!(engine.set_locked(0, true).is_err());
        assert!(matches!(
            engine.set_outcome(Outcome::with_stops(vec![0, 0])),
            Err(ReelError::InvalidOutcome(_))
        ));
    }

    #[test]
    fn test_locked_reel_stays_put() {
        let mut engine = instant_engine();
        engine.set_locked(1, true).unwrap();
        let before = engine.reels()[1].visible_server_names();

        spin_to_stop(&mut engine, vec![3, 3, 3]);

        assert_eq!(engine.reels()[1].visible_server_names(), before);
        assert_eq!(engine.reels()[0].visible_server_names(), vec!["B", "C", "D"]);
        let events = engine.drain_events();
        assert!(
            !events
                .iter()
                .any(|e| e.kind.reel() == Some(ReelId::column(1)))
        );
    }

    #[test]
    fn test_gate_holds_stop_until_released() {
        let mut engine = instant_engine();
        let (gate, handle) = ReadyGate::new();
        engine.set_stop_gate(gate);

        engine.spin().unwrap();
        engine.set_outcome(Outcome::with_stops(vec![1, 2, 3])).unwrap();
        for _ in 0..10 {
            engine.tick(None).unwrap();
        }
        assert_eq!(engine.phase(), EnginePhase::Spinning);
        assert!(engine.is_gated());
        assert_eq!(handle.requests(), 1);

        assert!(handle.release());
        assert!(engine.run_until_stopped(None, 5_000.0).unwrap());
        assert_eq!(engine.reels()[2].position(), 3);
        assert_eq!(handle.requests(), 1);
    }

    #[test]
    fn test_reevaluation_waits_and_keeps_static_reels() {
        let mut engine = instant_engine();
        let before = engine.reels()[2].visible_server_names();

        let mut outcome = Outcome::with_stops(vec![5, 6, 7]);
        outcome.static_reels = vec![2];
        engine.spin_reevaluation(outcome).unwrap();
        for _ in 0..10 {
            engine.tick(None).unwrap();
        }
        assert_eq!(engine.phase(), EnginePhase::Spinning);
        assert!(!engine.reels()[2].is_spinning());

        engine.release_reevaluation().unwrap();
        assert!(engine.release_reevaluation().is_err());
        assert!(engine.run_until_stopped(None, 5_000.0).unwrap());

        assert_eq!(engine.reels()[0].position(), 5);
        assert_eq!(engine.reels()[2].visible_server_names(), before);
        let events = engine.drain_events();
        assert!(matches!(
            events[0].kind,
            EngineEventKind::SpinStart { reevaluation: true }
        ));
    }

    #[test]
    fn test_override_links_merge_stop_entries() {
        let mut engine = instant_engine();
        engine.link_reels([0, 2]).unwrap();
        assert_eq!(engine.resolve_link_group(2), BTreeSet::from([0, 2]));
        assert!(engine.link_reels([0, 9]).is_err());

        engine.spin().unwrap();
        engine.set_outcome(Outcome::with_stops(vec![6, 1, 6])).unwrap();
        engine.tick(None).unwrap();
        assert_eq!(engine.stop_order().entries(), &[vec![0, 2], vec![1]]);

        assert!(engine.run_until_stopped(None, 5_000.0).unwrap());
        assert_eq!(engine.reels()[0].position(), engine.reels()[2].position());
        // Override links last one spin
        assert_eq!(engine.resolve_link_group(2), BTreeSet::from([2]));
    }

    #[test]
    fn test_linked_reels_share_lowest_stop() {
        let mut engine = instant_engine();
        engine.link_reels([0, 2]).unwrap();
        spin_to_stop(&mut engine, vec![6, 1, 2]);

        assert_eq!(engine.reels()[0].position(), 6);
        assert_eq!(engine.reels()[1].position(), 1);
        assert_eq!(engine.reels()[2].position(), 6);
        assert_eq!(
            engine.reels()[0].visible_server_names(),
            engine.reels()[2].visible_server_names()
        );
    }

    #[test]
    fn test_stagger_collapses_only_inside_link_group() {
        let mut config = EngineConfig::standard(4, 3, "base")
            .with_profile(TimingProfile::Normal)
            .with_seed(3);
        config.data_links = vec![vec![1, 2]];
        let mut engine = engine_with(config);

        engine.spin().unwrap();
        assert_eq!(engine.phase(), EnginePhase::BeginSpin);
        for _ in 0..200 {
            engine.tick(Some(1.0)).unwrap();
        }
        assert_ne!(engine.phase(), EnginePhase::BeginSpin);

        let events = engine.drain_events();
        let started: Vec<f64> = (0..4)
            .map(|c| {
                events
                    .iter()
                    .find(|e| matches!(e.kind, EngineEventKind::ReelStarted { reel } if reel == ReelId::column(c)))
                    .map(|e| e.timestamp_ms)
                    .unwrap()
            })
            .collect();
        assert!(started[1] > started[0]);
        assert_eq!(started[1], started[2]);
        assert!(started[3] - started[2] >= 80.0);
    }

    #[test]
    fn test_desync_with_halt_is_returned() {
        let mut config = EngineConfig::standard(1, 3, "base")
            .with_profile(TimingProfile::Instant)
            .with_seed(1);
        config.halt_on_desync = true;
        let mut engine = engine_with(config);

        let mut outcome = Outcome::with_stops(vec![2]);
        outcome.symbol_matrix = Some(vec![vec![vec!["A".into(), "B".into(), "X".into()]]]);
        engine.spin().unwrap();
        engine.set_outcome(outcome).unwrap();

        let result = engine.run_until_stopped(None, 5_000.0);
        assert!(matches!(result, Err(ReelError::Desync { row: 2, .. })));
        assert_eq!(engine.phase(), EnginePhase::Stopped);

        let matrix = vec![vec![vec!["A".to_string(), "B".into(), "C".into()]]];
        assert!(engine.validate_server_matrix(&matrix).unwrap().is_ok());
    }

    #[test]
    fn test_slam_stop_collapses_delays() {
        let mut engine = engine_with(
            EngineConfig::standard(3, 3, "base")
                .with_profile(TimingProfile::Normal)
                .with_seed(3),
        );
        engine.spin().unwrap();
        assert_eq!(engine.phase(), EnginePhase::BeginSpin);
        engine.slam_stop();
        engine.tick(Some(1.0)).unwrap();
        assert_eq!(engine.phase(), EnginePhase::Spinning);

        engine
            .set_outcome(Outcome::with_stops(vec![1, 2, 3]).with_timings(vec![0.0, 500.0, 500.0]))
            .unwrap();
        engine.tick(Some(1.0)).unwrap();
        assert_eq!(engine.phase(), EnginePhase::EndSpin);
        let spliced: Vec<bool> = engine.stop_progress().iter().map(|p| p.spliced).collect();
        assert_eq!(spliced, vec![true, false, false]);

        engine.drain_events();
        assert!(engine.run_until_stopped(Some(10.0), 5_000.0).unwrap());
        assert!(!engine.is_slam_stop());

        // Each entry splices only after the one before it is done
        let events = engine.drain_events();
        for e in 1..3 {
            let done = events
                .iter()
                .find(|ev| matches!(ev.kind, EngineEventKind::StopEntryDone { entry } if entry == e - 1))
                .map(|ev| ev.timestamp_ms)
                .unwrap();
            let spliced = events
                .iter()
                .find(|ev| matches!(ev.kind, EngineEventKind::ReelSpliced { reel, .. } if reel == ReelId::column(e)))
                .map(|ev| ev.timestamp_ms)
                .unwrap();
            assert!(spliced >= done, "entry {e} spliced at {spliced}, previous done at {done}");
            assert!(spliced < 500.0 + done);
        }
    }

    #[test]
    fn test_anticipation_extends_post_stop() {
        let mut engine = engine_with(
            EngineConfig::standard(3, 3, "base")
                .with_profile(TimingProfile::Instant)
                .with_timing(ReelTiming {
                    anticipation_duration_ms: 200.0,
                    ..ReelTiming::instant()
                }),
        );
        let mut outcome = Outcome::with_stops(vec![1, 2, 3]);
        outcome.anticipating_reels = vec![2];
        engine.spin().unwrap();
        engine.set_outcome(outcome).unwrap();

        let mut elapsed = 0.0;
        while !engine.stop_progress().iter().all(|p| p.done) || engine.stop_progress().is_empty() {
            engine.tick(Some(10.0)).unwrap();
            elapsed += 10.0;
            assert!(elapsed < 1_000.0);
        }
        assert!(engine.post_stop_pending());
        assert_eq!(engine.phase(), EnginePhase::EndSpin);

        engine.complete_post_stop(2);
        engine.tick(Some(10.0)).unwrap();
        assert_eq!(engine.phase(), EnginePhase::Stopped);
        let events = engine.drain_events();
        assert_eq!(count(&events, "anticipation"), 1);
    }

    #[test]
    fn test_anticipation_trigger_maps_raw_ids() {
        let mut engine = instant_engine();
        let mut outcome = Outcome::with_stops(vec![1, 2, 3]);
        outcome.anticipation_triggers.insert(
            0,
            crate::outcome::AnticipationTrigger {
                target_reel: 2,
                target_row: None,
                effect: true,
                sound: false,
            },
        );
        engine.spin().unwrap();
        engine.set_outcome(outcome).unwrap();

        let hit = engine.anticipation_trigger(0).unwrap();
        assert_eq!(hit.target, ReelId::column(2));
        assert!(hit.effect && !hit.sound);
        assert!(engine.anticipation_trigger(1).is_none());
    }
}
