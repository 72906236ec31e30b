//! Composite symbol repair
//!
//! After a splice, a strip swap or a buffer resize, a composite symbol can end up
//! with some of its cells missing: the window was cut in the middle of a tall
//! symbol, or the strip about to scroll in starts halfway through one. Repair
//! finds those broken footprints and replaces them with plain 1×1 symbols.
//!
//! Three passes run per reel:
//!
//! 1. **Seam**: the composite at the next strip read must continue into the
//!    window. If it does not, its missing cells are written into the buffer
//!    slots at the insertion edge so it scrolls in whole. After a splice those
//!    slots hold pre-splice content that leaves the window before the reel
//!    lands, and the strip itself is left untouched, so the landed rows always
//!    show the strip symbols at the stop index.
//! 2. **Window**: every composite cell checks its vertical siblings. Cells past
//!    the insertion edge are compared against the strip reads still to come;
//!    cells past the discard edge are about to leave and always pass. Mega cells
//!    also check the matching row on neighbor reels, resolved identity included.
//! 3. **Strip**: when the seam could not be completed because the buffer is too
//!    short, the incoming composite run on the strip is overridden instead.
//!
//! Broken cells are planned first and applied afterwards, and the window pass is
//! repeated until nothing changes, since clobbering one cell breaks its siblings.

use std::collections::HashSet;
use std::sync::Arc;

use super::{Reel, SymbolSlot};
use crate::config::SpinDirection;
use crate::error::ReelResult;
use crate::presenter::SymbolPresenter;
use crate::symbols::SymbolSpec;

/// Upper bound on window passes per repair
const MAX_PASSES: usize = 6;

/// What one repair changed on a reel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Buffer cells rewritten to finish a composite cut at the seam
    pub completed: usize,
    /// Window cells replaced by 1×1 symbols
    pub clobbered: usize,
    /// Strip indices overridden ahead of the insertion edge
    pub overridden: usize,
    /// Broken cells left alone because no animator was attached yet
    pub deferred: usize,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.completed == 0 && self.clobbered == 0 && self.overridden == 0 && self.deferred == 0
    }
}

/// Repair every reel in `reels`, checking mega symbols across neighbors.
///
/// Results are index-aligned with `reels`. A reel without clobber candidates
/// fails on its own; the others are still repaired.
pub fn repair_reels(
    reels: &mut [Reel],
    presenter: &mut dyn SymbolPresenter,
) -> Vec<ReelResult<RepairReport>> {
    run(reels, presenter, true)
}

/// Repair a reel on its own; mega footprints are not checked.
pub(crate) fn repair_alone(
    reel: &mut Reel,
    presenter: &mut dyn SymbolPresenter,
) -> ReelResult<RepairReport> {
    run(std::slice::from_mut(reel), presenter, false)
        .pop()
        .unwrap_or_else(|| Ok(RepairReport::default()))
}

fn run(
    reels: &mut [Reel],
    presenter: &mut dyn SymbolPresenter,
    check_mega: bool,
) -> Vec<ReelResult<RepairReport>> {
    let mut results: Vec<ReelResult<RepairReport>> =
        (0..reels.len()).map(|_| Ok(RepairReport::default())).collect();
    let mut deferred: HashSet<(usize, usize)> = HashSet::new();

    let mut seam_waiting = vec![false; reels.len()];
    for (i, reel) in reels.iter_mut().enumerate() {
        let Ok(report) = &mut results[i] else { continue };
        match complete_seam(reel, presenter) {
            SeamRepair::Completed(count) => report.completed += count,
            SeamRepair::Deferred => {
                report.deferred += 1;
                seam_waiting[i] = true;
            }
            SeamRepair::Intact | SeamRepair::NoRoom => {}
        }
    }

    for _ in 0..MAX_PASSES {
        let failed: Vec<bool> = results.iter().map(|r| r.is_err()).collect();
        let plan = plan_window_pass(reels, check_mega, &failed);

        let mut changed = false;
        for (i, k) in plan {
            if results[i].is_err() || deferred.contains(&(i, k)) {
                continue;
            }
            if !footprint_animated(&reels[i], k, presenter) {
                log::debug!("reel {}: slot {k} has no animator, deferring repair", reels[i].id);
                deferred.insert((i, k));
                continue;
            }

            match reels[i].pick_clobber_symbol() {
                Ok(symbol) => {
                    log::trace!(
                        "reel {}: clobbering slot {k} with {}",
                        reels[i].id,
                        symbol.name
                    );
                    reels[i].set_slot(k, Some(SymbolSlot::new(symbol)), presenter);
                    if let Ok(report) = &mut results[i] {
                        report.clobbered += 1;
                    }
                    changed = true;
                }
                Err(e) => results[i] = Err(e),
            }
        }

        if !changed {
            break;
        }
    }

    for (i, _) in &deferred {
        if let Ok(report) = &mut results[*i] {
            report.deferred += 1;
        }
    }

    for (i, reel) in reels.iter_mut().enumerate() {
        if !seam_waiting[i] {
            if let Ok(report) = &mut results[i] {
                match override_incoming(reel) {
                    Ok(count) => report.overridden += count,
                    Err(e) => results[i] = Err(e),
                }
            }
        }

        let waiting = results[i].as_ref().is_ok_and(|report| report.deferred > 0);
        if !waiting {
            reel.mark_repaired();
        }
    }

    results
}

// ═══════════════════════════════════════════════════════════════════════════
// WINDOW PASS
// ═══════════════════════════════════════════════════════════════════════════

/// `(reel, slot)` pairs whose composite footprint is broken
fn plan_window_pass(reels: &[Reel], check_mega: bool, failed: &[bool]) -> Vec<(usize, usize)> {
    let mut broken = Vec::new();
    for (i, reel) in reels.iter().enumerate() {
        if failed[i] {
            continue;
        }
        for (k, slot) in reel.window.iter().enumerate() {
            let Some(slot) = slot else { continue };
            let cell = slot.assembly();
            if !cell.is_composite() {
                continue;
            }

            let intact = vertical_intact(reel, k, slot)
                && (!check_mega || !cell.is_mega() || horizontal_intact(reels, reel, k, slot));
            if !intact {
                broken.push((i, k));
            }
        }
    }
    broken
}

fn continues(other: &SymbolSpec, cell: &SymbolSpec, row: u32, column: u32) -> bool {
    other.same_composite(cell) && other.row == row && other.column == column
}

/// `other` is the cell at `row`/`column` of the composite in `slot`, resolved to
/// the same symbol
fn sibling_of(other: &SymbolSlot, slot: &SymbolSlot, row: u32, column: u32) -> bool {
    continues(other.assembly(), slot.assembly(), row, column)
        && other.symbol.short_name == slot.symbol.short_name
}

fn beyond_insertion_edge(reel: &Reel, slot: i64) -> bool {
    match reel.direction {
        SpinDirection::Down => slot < 0,
        SpinDirection::Up => slot >= reel.window.len() as i64,
    }
}

fn vertical_intact(reel: &Reel, k: usize, slot: &SymbolSlot) -> bool {
    let cell = slot.assembly();
    let len = reel.window.len() as i64;
    (1..=cell.height)
        .filter(|&row| row != cell.row)
        .all(|row| {
            let j = k as i64 + row as i64 - cell.row as i64;
            if (0..len).contains(&j) {
                reel.window[j as usize]
                    .as_ref()
                    .is_some_and(|s| sibling_of(s, slot, row, cell.column))
            } else if beyond_insertion_edge(reel, j) {
                let upcoming = reel.strip_symbol(reel.strip_index_of_slot(j));
                continues(&upcoming, cell, row, cell.column)
            } else {
                true
            }
        })
}

/// Same visible row on every other reel the mega spans
fn horizontal_intact(reels: &[Reel], reel: &Reel, k: usize, slot: &SymbolSlot) -> bool {
    let cell = slot.assembly();
    let visible_row = k as i64 - reel.top_buffer as i64;

    (1..=cell.width)
        .filter(|&column| column != cell.column)
        .all(|column| {
            let target = reel.id.column as i64 + column as i64 - cell.column as i64;
            let neighbor = reels.iter().find(|n| {
                n.id.layer == reel.id.layer
                    && n.id.row == reel.id.row
                    && n.id.column as i64 == target
            });
            let Some(neighbor) = neighbor else {
                return false;
            };

            let j = visible_row + neighbor.top_buffer as i64;
            if j < 0 || j >= neighbor.window.len() as i64 {
                return true;
            }
            neighbor.window[j as usize]
                .as_ref()
                .is_some_and(|s| sibling_of(s, slot, cell.row, column))
        })
}

/// Every in-window cell of the footprint around slot `k` has an animator
fn footprint_animated(reel: &Reel, k: usize, presenter: &dyn SymbolPresenter) -> bool {
    let Some(slot) = reel.window.get(k).and_then(|s| s.as_ref()) else {
        return true;
    };
    let cell = slot.assembly();
    let len = reel.window.len() as i64;

    (1..=cell.height).all(|row| {
        let j = k as i64 + row as i64 - cell.row as i64;
        !(0..len).contains(&j) || presenter.has_animator(reel.id, j as usize)
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// SEAM AND STRIP PASSES
// ═══════════════════════════════════════════════════════════════════════════

/// Composite at the next strip read that does not continue into the window
struct BrokenSeam {
    /// Strip index of the next read
    index: i64,
    cell: Arc<SymbolSpec>,
    /// `(row, slot)` of the cells that should already be in the window,
    /// nearest to the insertion edge first
    missing: Vec<(u32, i64)>,
}

fn broken_seam(reel: &Reel) -> Option<BrokenSeam> {
    let incoming = reel.incoming_slot();
    let index = reel.strip_index_of_slot(incoming);
    let cell = reel.strip_symbol(index);
    if cell.height <= 1 {
        return None;
    }

    let (h, r) = (cell.height as i64, cell.row as i64);
    let missing: Vec<(u32, i64)> = match reel.direction {
        SpinDirection::Down => (r + 1..=h)
            .map(|row| (row as u32, incoming + row - r))
            .collect(),
        SpinDirection::Up => (1..r)
            .rev()
            .map(|row| (row as u32, incoming + row - r))
            .collect(),
    };

    let connected = missing.iter().all(|&(row, j)| {
        j >= 0
            && reel
                .window
                .get(j as usize)
                .and_then(|s| s.as_ref())
                .is_some_and(|s| continues(s.assembly(), &cell, row, cell.column))
    });
    (!connected).then_some(BrokenSeam {
        index,
        cell,
        missing,
    })
}

enum SeamRepair {
    Intact,
    Completed(usize),
    /// A buffer slot to rewrite has no animator yet
    Deferred,
    /// The cut reaches into the visible rows
    NoRoom,
}

/// Write the missing cells of a cut incoming composite into the buffer.
fn complete_seam(reel: &mut Reel, presenter: &mut dyn SymbolPresenter) -> SeamRepair {
    let Some(seam) = broken_seam(reel) else {
        return SeamRepair::Intact;
    };

    let bottom_visible = reel.bottom_visible_slot();
    let len = reel.window.len() as i64;
    let in_buffer = seam.missing.iter().all(|&(_, j)| match reel.direction {
        SpinDirection::Down => j >= 0 && j < reel.top_buffer as i64,
        SpinDirection::Up => j > bottom_visible && j < len,
    });
    if !in_buffer {
        return SeamRepair::NoRoom;
    }
    if seam
        .missing
        .iter()
        .any(|&(_, j)| !presenter.has_animator(reel.id, j as usize))
    {
        log::debug!("reel {}: seam slots have no animator, deferring", reel.id);
        return SeamRepair::Deferred;
    }

    for &(row, j) in &seam.missing {
        let raw = reel
            .symbols
            .get(&seam.cell.sibling_name(row, seam.cell.column));
        let (inner, inner_below) = match reel.direction {
            SpinDirection::Down => (j - 1, false),
            SpinDirection::Up => (j + 1, true),
        };
        let slot = reel.resolve_symbol(raw, inner, inner_below);
        reel.set_slot(j as usize, Some(slot), presenter);
    }
    log::trace!(
        "reel {}: completed {} cells of {} at the seam",
        reel.id,
        seam.missing.len(),
        seam.cell.name
    );
    SeamRepair::Completed(seam.missing.len())
}

/// Override the incoming composite run when the seam could not be completed.
/// Returns the number of strip indices overridden.
fn override_incoming(reel: &mut Reel) -> ReelResult<usize> {
    let Some(seam) = broken_seam(reel) else {
        return Ok(0);
    };

    let (h, r) = (seam.cell.height as i64, seam.cell.row as i64);
    let index = seam.index;
    let run = match reel.direction {
        SpinDirection::Down => index - (r - 1)..=index,
        SpinDirection::Up => index..=index + (h - r),
    };

    let mut count = 0;
    for strip_index in run {
        let symbol = reel.pick_clobber_symbol()?;
        reel.set_override(strip_index, symbol);
        count += 1;
    }
    log::debug!(
        "reel {}: overrode {count} strip indices of broken {} ahead of the window",
        reel.id,
        seam.cell.name
    );
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::config::ReelConfig;
    use crate::error::ReelError;
    use crate::layout::ReelId;
    use crate::presenter::{NullPresenter, RecordingPresenter};
    use crate::reel::{SpinState, StopTarget};
    use crate::strip::ReelStrip;
    use crate::symbols::SymbolCache;
    use crate::timing::ReelTiming;

    fn reel(names: &[&str], config: ReelConfig) -> Reel {
        let cache = Arc::new(SymbolCache::new());
        let strip = Arc::new(ReelStrip::from_names("test", names, &cache).unwrap());
        Reel::new(
            &config,
            ReelTiming::instant(),
            strip,
            cache,
            11,
            &mut NullPresenter,
        )
        .unwrap()
    }

    fn names(reel: &Reel) -> Vec<String> {
        reel.window()
            .iter()
            .map(|s| s.as_ref().map(|s| s.symbol.name.clone()).unwrap_or_default())
            .collect()
    }

    const CUT_TALL: [&str; 12] = [
        "A", "T-3B", "T-3C", "B", "C", "D", "E", "F", "G", "H", "I", "J",
    ];

    #[test]
    fn test_growing_top_buffer_keeps_tall_intact() {
        let strip = ["T-3A", "T-3B", "T-3C", "A", "B", "C", "D", "E", "F", "G"];
        let config = ReelConfig::new(ReelId::column(0), 3, "test").with_position(7);
        let mut reel = reel(&strip, config);
        let mut presenter = NullPresenter;

        reel.resize(3, 3, 1, &mut presenter);
        assert_eq!(names(&reel)[0], "T-3C");

        reel.resize(3, 5, 1, &mut presenter);
        assert_eq!(&names(&reel)[..3], ["T-3A", "T-3B", "T-3C"]);

        let report = reel.repair(&mut presenter).unwrap();
        assert_eq!(report.clobbered, 0);
        assert_eq!(&names(&reel)[..3], ["T-3A", "T-3B", "T-3C"]);
        assert!(!reel.needs_repair());
    }

    #[test]
    fn test_cut_tall_is_clobbered_to_single_cells() {
        let config = ReelConfig::new(ReelId::column(0), 3, "test").with_position(8);
        let mut reel = reel(&CUT_TALL, config);
        assert_eq!(&names(&reel)[..2], ["T-3B", "T-3C"]);

        let report = reel.repair(&mut NullPresenter).unwrap();
        assert_eq!(report.clobbered, 2);
        for slot in reel.window().iter().flatten() {
            assert!(!slot.symbol.is_composite());
        }

        // Nothing left to do
        let again = reel.repair(&mut NullPresenter).unwrap();
        assert!(again.is_clean());
    }

    #[test]
    fn test_repair_deferred_without_animator() {
        let config = ReelConfig::new(ReelId::column(0), 3, "test").with_position(8);
        let mut reel = reel(&CUT_TALL, config);
        let mut presenter = RecordingPresenter::new();
        presenter.detached.insert((reel.id(), 0));

        let report = reel.repair(&mut presenter).unwrap();
        assert_eq!(report.clobbered, 0);
        assert_eq!(report.deferred, 2);
        assert!(reel.needs_repair());
        assert_eq!(&names(&reel)[..2], ["T-3B", "T-3C"]);

        presenter.detached.clear();
        let report = reel.repair(&mut presenter).unwrap();
        assert_eq!(report.clobbered, 2);
        assert!(!reel.needs_repair());
    }

    #[test]
    fn test_missing_candidate_is_an_error() {
        let config = ReelConfig::new(ReelId::column(0), 1, "test").with_position(3);
        let mut reel = reel(&["T-2A", "T-2B", "U-2B", "U-2A"], config);

        assert!(matches!(
            reel.repair(&mut NullPresenter),
            Err(ReelError::NoClobberCandidate { .. })
        ));
    }

    const CUT_INCOMING: [&str; 12] = [
        "A", "B", "T-3A", "T-3B", "C", "D", "E", "F", "G", "H", "I", "J",
    ];

    #[test]
    fn test_cut_incoming_tall_completed_in_buffer() {
        let config = ReelConfig::new(ReelId::column(0), 3, "test").with_position(11);
        let mut reel = reel(&CUT_INCOMING, config);
        assert_eq!(names(&reel)[0], "C");

        let report = reel.repair(&mut NullPresenter).unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.clobbered, 0);
        assert_eq!(report.overridden, 0);
        assert!(reel.symbol_overrides().is_empty());
        assert_eq!(names(&reel)[0], "T-3C");

        reel.advance(SpinDirection::Down, &mut NullPresenter);
        reel.advance(SpinDirection::Down, &mut NullPresenter);
        assert_eq!(&names(&reel)[..3], ["T-3A", "T-3B", "T-3C"]);
    }

    #[test]
    fn test_incoming_run_overridden_without_buffer_room() {
        let config = ReelConfig::new(ReelId::column(0), 3, "test").with_position(6);
        let mut reel = reel(&CUT_INCOMING, config);
        reel.resize(3, 0, 1, &mut NullPresenter);
        assert_eq!(names(&reel), ["C", "D", "E", "F"]);

        let report = reel.repair(&mut NullPresenter).unwrap();
        assert_eq!(report.completed, 0);
        assert_eq!(report.overridden, 2);
        let overridden: Vec<usize> = reel.symbol_overrides().keys().copied().collect();
        assert_eq!(overridden, vec![2, 3]);

        reel.advance(SpinDirection::Down, &mut NullPresenter);
        let top = reel.window()[0].as_ref().unwrap();
        assert!(!top.symbol.is_composite());
    }

    #[test]
    fn test_tall_top_cell_in_buffer_survives_growth() {
        let strip = ["A", "B", "T-3A", "T-3B", "T-3C", "C", "D", "E", "F", "G"];
        let config = ReelConfig::new(ReelId::column(0), 3, "test").with_position(6);
        let mut reel = reel(&strip, config);
        let mut presenter = NullPresenter;

        reel.resize(3, 3, 1, &mut presenter);
        assert_eq!(names(&reel)[1], "T-3A");

        reel.resize(3, 5, 1, &mut presenter);
        assert_eq!(
            names(&reel),
            ["G", "A", "B", "T-3A", "T-3B", "T-3C", "C", "D", "E"]
        );

        let report = reel.repair(&mut presenter).unwrap();
        assert!(report.is_clean());
        assert_eq!(&names(&reel)[3..6], ["T-3A", "T-3B", "T-3C"]);
    }

    #[test]
    fn test_upward_splice_completes_seam_and_lands_on_stop() {
        let strip: Vec<String> = (0..16)
            .map(|i| match i {
                5 => "T-3A".to_string(),
                6 => "T-3B".to_string(),
                7 => "T-3C".to_string(),
                _ => format!("S{i}"),
            })
            .collect();
        let refs: Vec<&str> = strip.iter().map(String::as_str).collect();
        let config = ReelConfig::new(ReelId::column(0), 3, "test")
            .with_direction(SpinDirection::Up)
            .with_position(10);
        let mut reel = reel(&refs, config);
        assert_eq!(reel.window_len(), 13);
        let mut presenter = NullPresenter;

        assert!(reel.start_spin(&mut presenter));
        let info = reel
            .set_stop_index(StopTarget::Index(13), 0, &mut presenter)
            .unwrap();
        assert_eq!(info.advances, 13);

        // The read after the splice is T-3B, so T-3A goes in the bottom buffer
        let report = reel.repair(&mut presenter).unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.clobbered, 0);
        assert_eq!(report.overridden, 0);
        assert_eq!(names(&reel)[12], "T-3A");

        reel.tick(100.0, &mut presenter);
        assert_eq!(reel.state(), SpinState::Stopped);
        assert_eq!(reel.symbol_at_visible(2).unwrap().name, "S13");
        for (k, name) in names(&reel).iter().enumerate() {
            assert_eq!(name, &strip[(6 + k) % 16], "slot {k}");
        }
    }

    #[test]
    fn test_mega_checked_across_neighbors() {
        let left = ["A", "B", "W-2A-2A", "W-2B-2A", "C", "D", "E", "F", "G", "H"];
        let right = ["A", "B", "W-2A-2B", "W-2B-2B", "C", "D", "E", "F", "G", "H"];
        let cache = Arc::new(SymbolCache::new());
        let build = |names: &[&str], column: usize, position: usize| {
            let strip = Arc::new(ReelStrip::from_names("mega", names, &cache).unwrap());
            let config = ReelConfig::new(ReelId::column(column), 2, "mega").with_position(position);
            Reel::new(
                &config,
                ReelTiming::instant(),
                strip,
                Arc::clone(&cache),
                3,
                &mut NullPresenter,
            )
            .unwrap()
        };

        let mut aligned = vec![build(&left, 0, 3), build(&right, 1, 3)];
        let results = repair_reels(&mut aligned, &mut NullPresenter);
        for result in results {
            assert_eq!(result.unwrap().clobbered, 0);
        }

        let mut shifted = vec![build(&left, 0, 3), build(&right, 1, 5)];
        let results = repair_reels(&mut shifted, &mut NullPresenter);
        let clobbered: Vec<usize> = results.into_iter().map(|r| r.unwrap().clobbered).collect();
        assert_eq!(clobbered, vec![2, 2]);
        for reel in &shifted {
            assert!(reel.window().iter().flatten().all(|s| !s.symbol.is_mega()));
        }
    }

    #[test]
    fn test_mega_halves_must_resolve_alike() {
        let left = ["A", "B", "RP-2A-2A", "RP-2B-2A", "C", "D", "E", "F", "G", "H"];
        let right = ["A", "B", "RP-2A-2B", "RP-2B-2B", "C", "D", "E", "F", "G", "H"];
        let cache = Arc::new(SymbolCache::new());
        let build = |names: &[&str], column: usize, resolved: &str| {
            let strip = Arc::new(ReelStrip::from_names("mega", names, &cache).unwrap());
            let config = ReelConfig::new(ReelId::column(column), 2, "mega").with_position(3);
            let mut reel = Reel::new(
                &config,
                ReelTiming::instant(),
                strip,
                Arc::clone(&cache),
                5,
                &mut NullPresenter,
            )
            .unwrap();
            let picks = HashMap::from([("RP".to_string(), resolved.to_string())]);
            reel.set_replacement_symbols(picks);
            reel.reresolve_placeholders(&mut NullPresenter);
            reel
        };

        let mut same = vec![build(&left, 0, "C"), build(&right, 1, "C")];
        assert_eq!(same[0].window()[3].as_ref().unwrap().name(), "C-2A-2A");
        assert_eq!(same[1].window()[4].as_ref().unwrap().name(), "C-2B-2B");
        let results = repair_reels(&mut same, &mut NullPresenter);
        for result in results {
            assert!(result.unwrap().is_clean());
        }

        let mut split = vec![build(&left, 0, "C"), build(&right, 1, "D")];
        let results = repair_reels(&mut split, &mut NullPresenter);
        let clobbered: Vec<usize> = results.into_iter().map(|r| r.unwrap().clobbered).collect();
        assert_eq!(clobbered, vec![2, 2]);
        for reel in &split {
            assert!(reel.window().iter().flatten().all(|s| !s.symbol.is_mega()));
        }
    }
}
