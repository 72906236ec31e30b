//! Presentation collaborator interface
//!
//! The core never positions or draws symbols. Every mutation of a window slot is
//! reported to a [`SymbolPresenter`], which owns whatever objects represent the
//! symbols on screen.

use std::collections::HashSet;
use std::sync::Arc;

use crate::layout::ReelId;
use crate::symbols::SymbolSpec;

/// What happened to a window slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotChangeKind {
    /// A symbol entered an empty slot
    Insert,
    /// A symbol left the window
    Dispose,
    /// A symbol was swapped for another in place
    Replace,
}

/// One window slot mutation
#[derive(Debug, Clone)]
pub struct SlotChange {
    pub reel: ReelId,
    /// Window index (0 = top)
    pub slot: usize,
    pub kind: SlotChangeKind,
    pub old: Option<Arc<SymbolSpec>>,
    pub new: Option<Arc<SymbolSpec>>,
}

/// Receiver of slot mutations
pub trait SymbolPresenter {
    /// Instantiate, transfer or dispose the presentation object for a slot
    fn slot_changed(&mut self, change: SlotChange);

    /// An animator is attached to the symbol in `slot`; repair of that symbol is
    /// deferred while this reports false.
    fn has_animator(&self, _reel: ReelId, _slot: usize) -> bool {
        true
    }
}

/// Presenter that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPresenter;

impl SymbolPresenter for NullPresenter {
    fn slot_changed(&mut self, _change: SlotChange) {}
}

/// Presenter that keeps every change, for tools and tests
#[derive(Debug, Clone, Default)]
pub struct RecordingPresenter {
    pub changes: Vec<SlotChange>,
    /// Slots reported as having no animator attached
    pub detached: HashSet<(ReelId, usize)>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes of one kind
    pub fn count(&self, kind: SlotChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }
}

impl SymbolPresenter for RecordingPresenter {
    fn slot_changed(&mut self, change: SlotChange) {
        self.changes.push(change);
    }

    fn has_animator(&self, reel: ReelId, slot: usize) -> bool {
        !self.detached.contains(&(reel, slot))
    }
}
