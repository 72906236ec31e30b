//! Stop order and per-entry stop progress
//!
//! A stop order is a list of entries; the reels of one entry splice together,
//! and entries stop one after another. Reels are addressed by their index in the
//! engine's reel list.

use std::collections::BTreeSet;

use crate::error::{ReelError, ReelResult};
use crate::layout::ReelId;

/// Ordered groups of reels that stop together
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOrder {
    entries: Vec<Vec<usize>>,
}

impl StopOrder {
    /// One entry per column, left to right. Reels sharing a column (rows of an
    /// independent layout, or other layers) stop together.
    pub fn by_column(ids: &[ReelId]) -> Self {
        let columns: BTreeSet<usize> = ids.iter().map(|id| id.column).collect();
        let entries = columns
            .into_iter()
            .map(|column| {
                ids.iter()
                    .enumerate()
                    .filter(|(_, id)| id.column == column)
                    .map(|(index, _)| index)
                    .collect()
            })
            .collect();
        Self { entries }
    }

    /// Explicit order. Reels the order does not mention get an entry of their own
    /// at the end.
    pub fn from_ids(order: &[Vec<ReelId>], ids: &[ReelId]) -> ReelResult<Self> {
        let mut listed = BTreeSet::new();
        let mut entries = Vec::with_capacity(order.len());

        for group in order {
            let mut entry = Vec::with_capacity(group.len());
            for id in group {
                let index = ids
                    .iter()
                    .position(|candidate| candidate == id)
                    .ok_or_else(|| {
                        ReelError::InvalidConfig(format!("stop order references unknown reel {id}"))
                    })?;
                if listed.insert(index) {
                    entry.push(index);
                }
            }
            if !entry.is_empty() {
                entries.push(entry);
            }
        }

        for index in 0..ids.len() {
            if !listed.contains(&index) {
                log::warn!("reel {} missing from stop order, stopping it last", ids[index]);
                entries.push(vec![index]);
            }
        }
        Ok(Self { entries })
    }

    /// Copy in which every link group stops within the earliest entry that
    /// holds one of its reels.
    pub fn merged_with_links(&self, groups: &[BTreeSet<usize>]) -> Self {
        let mut entries = self.entries.clone();
        for group in groups {
            let Some(first) = entries
                .iter()
                .position(|entry| entry.iter().any(|r| group.contains(r)))
            else {
                continue;
            };

            for (i, entry) in entries.iter_mut().enumerate() {
                if i != first {
                    entry.retain(|r| !group.contains(r));
                }
            }
            for &reel in group {
                if !entries[first].contains(&reel) {
                    entries[first].push(reel);
                }
            }
        }
        entries.retain(|entry| !entry.is_empty());
        Self { entries }
    }

    pub fn entries(&self) -> &[Vec<usize>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry holding `reel`
    pub fn entry_of(&self, reel: usize) -> Option<usize> {
        self.entries.iter().position(|entry| entry.contains(&reel))
    }
}

/// Progress of one stop entry during `EndSpin`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EntryProgress {
    /// Configured delay before this entry (ms)
    pub delay_ms: f64,
    /// Phase time at which this entry may splice (ms)
    pub target_ms: f64,
    /// Reels of this entry were told their stop index
    pub spliced: bool,
    /// Every reel of this entry reported stopped
    pub done: bool,
}

/// Facts about the entry before the one being considered
#[derive(Debug, Clone, Copy)]
pub struct PreviousEntry {
    pub spliced: bool,
    /// Any of its reels is still in motion
    pub spinning: bool,
    /// Every reel of it finished its stop, rollback included
    pub done: bool,
}

/// Whether an entry may splice now.
///
/// The first entry waits only for its target time. Later entries wait until the
/// previous entry has stopped spinning, unless they have no delay of their own
/// and the previous entry already spliced, in which case they stop in sync.
/// Slam stop drops the target times only: an entry still waits for the previous
/// entry to be done.
pub fn may_splice(
    entry: &EntryProgress,
    previous: Option<PreviousEntry>,
    elapsed_ms: f64,
    slam_stop: bool,
) -> bool {
    let Some(previous) = previous else {
        return slam_stop || elapsed_ms >= entry.target_ms;
    };

    if slam_stop {
        return previous.done;
    }
    let synced = entry.delay_ms == 0.0 && previous.spliced;
    if synced {
        return true;
    }
    !previous.spinning && elapsed_ms >= entry.target_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<ReelId> {
        (0..n).map(ReelId::column).collect()
    }

    #[test]
    fn test_by_column() {
        let order = StopOrder::by_column(&ids(5));
        assert_eq!(order.len(), 5);
        assert_eq!(order.entries()[3], vec![3]);

        let cells: Vec<ReelId> = (0..2)
            .flat_map(|c| (0..3).map(move |r| ReelId::cell(c, r)))
            .collect();
        let order = StopOrder::by_column(&cells);
        assert_eq!(order.entries(), &[vec![0, 1, 2], vec![3, 4, 5]]);
    }

    #[test]
    fn test_from_ids_appends_missing() {
        let all = ids(3);
        let order = StopOrder::from_ids(&[vec![ReelId::column(2), ReelId::column(0)]], &all).unwrap();
        assert_eq!(order.entries(), &[vec![2, 0], vec![1]]);

        let bad = StopOrder::from_ids(&[vec![ReelId::column(9)]], &all);
        assert!(bad.is_err());
    }

    #[test]
    fn test_links_merge_into_earliest_entry() {
        let order = StopOrder::by_column(&ids(5));
        let merged = order.merged_with_links(&[BTreeSet::from([1, 3])]);
        assert_eq!(merged.entries(), &[vec![0], vec![1, 3], vec![2], vec![4]]);
        assert_eq!(merged.entry_of(3), Some(1));
    }

    #[test]
    fn test_first_entry_waits_for_target() {
        let entry = EntryProgress {
            target_ms: 100.0,
            ..Default::default()
        };
        assert!(!may_splice(&entry, None, 50.0, false));
        assert!(may_splice(&entry, None, 100.0, false));
        assert!(may_splice(&entry, None, 0.0, true));
    }

    #[test]
    fn test_later_entry_waits_for_previous() {
        let entry = EntryProgress {
            delay_ms: 150.0,
            target_ms: 150.0,
            ..Default::default()
        };
        let moving = PreviousEntry {
            spliced: true,
            spinning: true,
            done: false,
        };
        let landed = PreviousEntry {
            spliced: true,
            spinning: false,
            done: false,
        };
        assert!(!may_splice(&entry, Some(moving), 500.0, false));
        assert!(!may_splice(&entry, Some(landed), 100.0, false));
        assert!(may_splice(&entry, Some(landed), 150.0, false));
    }

    #[test]
    fn test_synced_entry_skips_waiting() {
        let entry = EntryProgress::default();
        let moving = PreviousEntry {
            spliced: true,
            spinning: true,
            done: false,
        };
        assert!(may_splice(&entry, Some(moving), 0.0, false));

        let waiting = PreviousEntry {
            spliced: false,
            spinning: true,
            done: false,
        };
        assert!(!may_splice(&entry, Some(waiting), 0.0, false));
    }

    #[test]
    fn test_slam_waits_for_previous_done() {
        let entry = EntryProgress {
            delay_ms: 150.0,
            target_ms: 600.0,
            ..Default::default()
        };
        let waiting = PreviousEntry {
            spliced: false,
            spinning: true,
            done: false,
        };
        let moving = PreviousEntry {
            spliced: true,
            spinning: true,
            done: false,
        };
        let rolling_back = PreviousEntry {
            spliced: true,
            spinning: false,
            done: false,
        };
        let done = PreviousEntry {
            spliced: true,
            spinning: false,
            done: true,
        };
        assert!(!may_splice(&entry, Some(waiting), 0.0, true));
        assert!(!may_splice(&entry, Some(moving), 0.0, true));
        assert!(!may_splice(&entry, Some(rolling_back), 0.0, true));
        assert!(may_splice(&entry, Some(done), 0.0, true));

        // Zero-delay entries still stop in sync without slam
        let synced = EntryProgress::default();
        assert!(may_splice(&synced, Some(moving), 0.0, false));
        assert!(!may_splice(&synced, Some(moving), 0.0, true));
    }
}
