//! Reel link sets
//!
//! Linked reels must stay positionally identical. Links come from three
//! independent sources, each kept as its own partition of disjoint groups:
//!
//! - **Override**: set by the game for the current spin, cleared when it ends
//! - **Outcome**: linked reels named by the current outcome
//! - **Data**: configured links plus strips sharing a link group
//!
//! The effective group of a reel is the transitive closure across all three.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Source of a link group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPartition {
    Override,
    Outcome,
    Data,
}

impl LinkPartition {
    pub const ALL: [LinkPartition; 3] = [Self::Override, Self::Outcome, Self::Data];
}

/// Three partitions of reel indices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkGroups {
    override_groups: Vec<BTreeSet<usize>>,
    outcome_groups: Vec<BTreeSet<usize>>,
    data_groups: Vec<BTreeSet<usize>>,
}

impl LinkGroups {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, partition: LinkPartition) -> &Vec<BTreeSet<usize>> {
        match partition {
            LinkPartition::Override => &self.override_groups,
            LinkPartition::Outcome => &self.outcome_groups,
            LinkPartition::Data => &self.data_groups,
        }
    }

    fn partition_mut(&mut self, partition: LinkPartition) -> &mut Vec<BTreeSet<usize>> {
        match partition {
            LinkPartition::Override => &mut self.override_groups,
            LinkPartition::Outcome => &mut self.outcome_groups,
            LinkPartition::Data => &mut self.data_groups,
        }
    }

    /// Groups of one partition
    pub fn groups(&self, partition: LinkPartition) -> &[BTreeSet<usize>] {
        self.partition(partition)
    }

    /// Replace a partition. Overlapping groups are merged so the partition
    /// stays disjoint.
    pub fn set<G, I>(&mut self, partition: LinkPartition, groups: G)
    where
        G: IntoIterator<Item = I>,
        I: IntoIterator<Item = usize>,
    {
        self.partition_mut(partition).clear();
        for group in groups {
            self.add(partition, group);
        }
    }

    /// Add one group to a partition, merging with any group it touches.
    pub fn add(&mut self, partition: LinkPartition, group: impl IntoIterator<Item = usize>) {
        let mut merged: BTreeSet<usize> = group.into_iter().collect();
        if merged.len() < 2 {
            return;
        }

        let groups = self.partition_mut(partition);
        groups.retain(|existing| {
            if existing.is_disjoint(&merged) {
                true
            } else {
                merged.extend(existing.iter().copied());
                false
            }
        });
        groups.push(merged);
    }

    pub fn clear(&mut self, partition: LinkPartition) {
        self.partition_mut(partition).clear();
    }

    /// Group holding `reel` in one partition
    pub fn group_of(&self, partition: LinkPartition, reel: usize) -> Option<&BTreeSet<usize>> {
        self.partition(partition).iter().find(|g| g.contains(&reel))
    }

    /// Effective link group of `reel`, always containing `reel` itself.
    pub fn resolve(&self, reel: usize) -> BTreeSet<usize> {
        let mut group = BTreeSet::from([reel]);
        let mut pending = vec![reel];

        while let Some(next) = pending.pop() {
            for partition in LinkPartition::ALL {
                if let Some(members) = self.group_of(partition, next) {
                    for &member in members {
                        if group.insert(member) {
                            pending.push(member);
                        }
                    }
                }
            }
        }
        group
    }

    /// Linked to at least one other reel
    pub fn is_linked(&self, reel: usize) -> bool {
        self.resolve(reel).len() > 1
    }

    /// Distinct effective groups of two or more reels among `0..reel_count`
    pub fn resolved_groups(&self, reel_count: usize) -> Vec<BTreeSet<usize>> {
        let mut seen = BTreeSet::new();
        let mut groups = Vec::new();
        for reel in 0..reel_count {
            if seen.contains(&reel) {
                continue;
            }
            let group = self.resolve(reel);
            seen.extend(group.iter().copied());
            if group.len() > 1 {
                groups.push(group);
            }
        }
        groups
    }

    /// Anything linked at all
    pub fn is_empty(&self) -> bool {
        LinkPartition::ALL
            .iter()
            .all(|p| self.partition(*p).is_empty())
    }
}
