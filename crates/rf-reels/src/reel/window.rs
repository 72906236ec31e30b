//! Window slots, advancing and resizing

use std::sync::Arc;

use rand::prelude::*;

use super::Reel;
use crate::config::SpinDirection;
use crate::presenter::{SlotChange, SlotChangeKind, SymbolPresenter};
use crate::strip::{ReelStrip, wrap_index};
use crate::symbols::{SymbolSpec, compose_name};

/// Content of one window slot
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSlot {
    /// Symbol shown
    pub symbol: Arc<SymbolSpec>,
    /// Placeholder the symbol was resolved from
    pub placeholder: Option<Arc<SymbolSpec>>,
}

impl SymbolSlot {
    pub fn new(symbol: Arc<SymbolSpec>) -> Self {
        Self {
            symbol,
            placeholder: None,
        }
    }

    /// Identity used when checking composite structure: the placeholder when
    /// present, since strips only know placeholders.
    pub fn assembly(&self) -> &Arc<SymbolSpec> {
        self.placeholder.as_ref().unwrap_or(&self.symbol)
    }

    pub fn name(&self) -> &str {
        &self.symbol.name
    }
}

impl Reel {
    /// Slot index of the bottom visible row
    pub(crate) fn bottom_visible_slot(&self) -> i64 {
        (self.top_buffer + self.visible) as i64 - 1
    }

    /// Strip index shown by slot `k`; `k` may lie outside the window.
    pub(crate) fn strip_index_of_slot(&self, k: i64) -> i64 {
        self.position as i64 - (self.bottom_visible_slot() - k)
    }

    /// Active strip symbol with overrides applied
    pub(crate) fn strip_symbol(&self, index: i64) -> Arc<SymbolSpec> {
        let strip = self.active_strip();
        let wrapped = strip.wrap(index);
        match self.overrides.get(&wrapped) {
            Some(symbol) => Arc::clone(symbol),
            None => Arc::clone(strip.symbol_at(wrapped as i64)),
        }
    }

    /// Window slot just beyond the insertion edge
    pub(crate) fn incoming_slot(&self) -> i64 {
        match self.direction {
            SpinDirection::Down => -1,
            SpinDirection::Up => self.window.len() as i64,
        }
    }

    /// Replace the content of slot `k`, reporting the mutation.
    pub(crate) fn set_slot(
        &mut self,
        k: usize,
        slot: Option<SymbolSlot>,
        presenter: &mut dyn SymbolPresenter,
    ) {
        let old = std::mem::replace(&mut self.window[k], slot);
        let new = self.window[k].as_ref().map(|s| Arc::clone(&s.symbol));
        let old = old.map(|s| s.symbol);

        let kind = match (&old, &new) {
            (None, Some(_)) => SlotChangeKind::Insert,
            (Some(_), None) => SlotChangeKind::Dispose,
            (Some(_), Some(_)) => SlotChangeKind::Replace,
            (None, None) => return,
        };
        presenter.slot_changed(SlotChange {
            reel: self.id,
            slot: k,
            kind,
            old,
            new,
        });
    }

    /// Shift every symbol one slot towards the trailing edge and read one new
    /// symbol in at the leading edge.
    pub fn advance(&mut self, direction: SpinDirection, presenter: &mut dyn SymbolPresenter) {
        let len = self.window.len();
        if len == 0 {
            return;
        }
        let strip_len = self.active_strip().len();

        match direction {
            SpinDirection::Down => {
                self.set_slot(len - 1, None, presenter);
                self.window.pop();
                self.window.insert(0, None);
                self.position = wrap_index(self.position as i64 - 1, strip_len);

                let raw = self.strip_symbol(self.strip_index_of_slot(0));
                let slot = self.resolve_symbol(raw, 1, true);
                self.set_slot(0, Some(slot), presenter);
            }
            SpinDirection::Up => {
                self.set_slot(0, None, presenter);
                self.window.remove(0);
                self.window.push(None);
                self.position = wrap_index(self.position as i64 + 1, strip_len);

                let k = len - 1;
                let raw = self.strip_symbol(self.strip_index_of_slot(k as i64));
                let slot = self.resolve_symbol(raw, k as i64 - 1, false);
                self.set_slot(k, Some(slot), presenter);
            }
        }
    }

    /// Turn a strip symbol into slot content, resolving replacement
    /// placeholders. `neighbor` is the adjacent slot on the inner side;
    /// `neighbor_below` tells on which side of the new cell it sits.
    pub(crate) fn resolve_symbol(
        &mut self,
        raw: Arc<SymbolSpec>,
        neighbor: i64,
        neighbor_below: bool,
    ) -> SymbolSlot {
        if !raw.is_replacement() {
            return SymbolSlot::new(raw);
        }

        let from_neighbor = if raw.height > 1 && neighbor >= 0 {
            self.window
                .get(neighbor as usize)
                .and_then(|slot| slot.as_ref())
                .filter(|slot| {
                    let Some(placeholder) = &slot.placeholder else {
                        return false;
                    };
                    let adjacent = if neighbor_below {
                        placeholder.row == raw.row + 1
                    } else {
                        placeholder.row + 1 == raw.row
                    };
                    placeholder.same_composite(&raw)
                        && placeholder.column == raw.column
                        && adjacent
                })
                .map(|slot| slot.symbol.short_name.clone())
        } else {
            None
        };

        let resolved_short = from_neighbor
            .or_else(|| raw.sub_symbol.as_ref().map(|s| s.short_name.clone()))
            .or_else(|| self.replacements.get(&raw.short_name).cloned())
            .or_else(|| {
                let strip = Arc::clone(self.active_strip());
                let candidates = strip.clobber_candidates();
                if candidates.is_empty() {
                    return None;
                }
                let pick = self.rng.random_range(0..candidates.len());
                Some(candidates[pick].short_name.clone())
            });

        match resolved_short {
            Some(short) => {
                let name = compose_name(&short, raw.width, raw.height, raw.row, raw.column);
                SymbolSlot {
                    symbol: self.symbols.get(&name),
                    placeholder: Some(raw),
                }
            }
            None => SymbolSlot::new(raw),
        }
    }

    /// Point every resolved placeholder cell at the current replacement map.
    pub(crate) fn reresolve_placeholders(&mut self, presenter: &mut dyn SymbolPresenter) {
        for k in 0..self.window.len() {
            let Some(slot) = &self.window[k] else { continue };
            let Some(placeholder) = &slot.placeholder else { continue };
            if placeholder.sub_symbol.is_some() {
                continue;
            }
            let Some(short) = self.replacements.get(&placeholder.short_name) else {
                continue;
            };
            if *short == slot.symbol.short_name {
                continue;
            }

            let name = compose_name(
                short,
                placeholder.width,
                placeholder.height,
                placeholder.row,
                placeholder.column,
            );
            let updated = SymbolSlot {
                symbol: self.symbols.get(&name),
                placeholder: Some(Arc::clone(placeholder)),
            };
            self.set_slot(k, Some(updated), presenter);
        }
    }

    /// Grow or shrink the window at its edges. `position` keeps pointing at the
    /// bottom visible row, so visible changes grow or shrink the upper part.
    pub fn resize(
        &mut self,
        visible: usize,
        top_buffer: usize,
        bottom_buffer: usize,
        presenter: &mut dyn SymbolPresenter,
    ) {
        let visible = visible.max(1);
        let old_above = self.top_buffer + self.visible;
        let new_above = top_buffer + visible;

        if new_above > old_above {
            for _ in 0..new_above - old_above {
                self.window.insert(0, None);
            }
        } else {
            for _ in 0..old_above - new_above {
                self.set_slot(0, None, presenter);
                self.window.remove(0);
            }
        }

        if bottom_buffer > self.bottom_buffer {
            for _ in 0..bottom_buffer - self.bottom_buffer {
                self.window.push(None);
            }
        } else {
            for _ in 0..self.bottom_buffer - bottom_buffer {
                let last = self.window.len() - 1;
                self.set_slot(last, None, presenter);
                self.window.pop();
            }
        }

        self.visible = visible;
        self.top_buffer = top_buffer;
        self.bottom_buffer = bottom_buffer;
        self.fill_gaps(presenter);
        self.repair_pending = true;
    }

    /// Fill empty slots, walking outwards from the bottom visible row so
    /// partially built composites are completed before new strip material.
    pub(crate) fn fill_gaps(&mut self, presenter: &mut dyn SymbolPresenter) {
        let source = self
            .previous_strip
            .clone()
            .unwrap_or_else(|| Arc::clone(self.active_strip()));
        let from_active = self.previous_strip.is_none();
        let bottom_visible = self.bottom_visible_slot().max(0) as usize;
        let len = self.window.len();

        for k in (0..=bottom_visible.min(len.saturating_sub(1))).rev() {
            if self.window[k].is_none() {
                let slot = self.gap_content(k, k as i64 + 1, true, &source, from_active);
                self.set_slot(k, Some(slot), presenter);
            }
        }
        for k in bottom_visible + 1..len {
            if self.window[k].is_none() {
                let slot = self.gap_content(k, k as i64 - 1, false, &source, from_active);
                self.set_slot(k, Some(slot), presenter);
            }
        }
    }

    fn gap_content(
        &mut self,
        k: usize,
        inner: i64,
        inner_below: bool,
        source: &Arc<ReelStrip>,
        from_active: bool,
    ) -> SymbolSlot {
        if let Some(continued) = self.continuation(inner, inner_below) {
            return continued;
        }

        let index = self.strip_index_of_slot(k as i64);
        let raw = if from_active {
            self.strip_symbol(index)
        } else {
            Arc::clone(source.symbol_at(index))
        };
        self.resolve_symbol(raw, inner, inner_below)
    }

    /// Next cell of the composite in `inner`, if it continues towards the gap.
    fn continuation(&self, inner: i64, inner_below: bool) -> Option<SymbolSlot> {
        if inner < 0 {
            return None;
        }
        let slot = self.window.get(inner as usize)?.as_ref()?;
        let assembly = slot.assembly();
        if assembly.height <= 1 {
            return None;
        }

        let row = if inner_below {
            // Gap sits above the inner cell
            assembly.row.checked_sub(1).filter(|r| *r >= 1)?
        } else {
            Some(assembly.row + 1).filter(|r| *r <= assembly.height)?
        };

        let symbol = self
            .symbols
            .get(&slot.symbol.sibling_name(row, slot.symbol.column));
        let placeholder = slot
            .placeholder
            .as_ref()
            .map(|p| self.symbols.get(&p.sibling_name(row, p.column)));
        Some(SymbolSlot {
            symbol,
            placeholder,
        })
    }

    /// Re-read every slot from the active strip at the current position.
    pub(crate) fn refresh_in_place(
        &mut self,
        bottom_up: bool,
        presenter: &mut dyn SymbolPresenter,
    ) {
        let len = self.window.len();
        let order: Vec<usize> = if bottom_up {
            (0..len).rev().collect()
        } else {
            (0..len).collect()
        };

        // Drop old content first so placeholder resolution only sees new cells
        let mut old: Vec<Option<SymbolSlot>> = vec![None; len];
        std::mem::swap(&mut old, &mut self.window);

        for &k in &order {
            let raw = self.strip_symbol(self.strip_index_of_slot(k as i64));
            let (neighbor, below) = if bottom_up {
                (k as i64 + 1, true)
            } else {
                (k as i64 - 1, false)
            };
            let slot = self.resolve_symbol(raw, neighbor, below);
            self.window[k] = Some(slot);
        }

        for &k in &order {
            let previous = old[k].take();
            let new = self.window[k].as_ref().map(|s| Arc::clone(&s.symbol));
            let kind = if previous.is_some() {
                SlotChangeKind::Replace
            } else {
                SlotChangeKind::Insert
            };
            presenter.slot_changed(SlotChange {
                reel: self.id,
                slot: k,
                kind,
                old: previous.map(|s| s.symbol),
                new,
            });
        }
        self.repair_pending = false;
    }
}
