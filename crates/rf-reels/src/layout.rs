//! Reel identities and raw id remapping
//!
//! Servers number reels with plain 0-based ids. Independent reel games split each
//! column into one physical reel per row, and the server then numbers those cells
//! `column * rows + row`. [`ReelLayout`] converts between both schemes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical address of one physical reel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReelId {
    /// Column on screen (0 = leftmost)
    pub column: usize,
    /// Row within the column, for independent reels only
    #[serde(default)]
    pub row: Option<usize>,
    /// Layer for layered games (0 = base layer)
    #[serde(default)]
    pub layer: usize,
}

impl ReelId {
    /// Standard full-column reel on the base layer
    pub const fn column(column: usize) -> Self {
        Self {
            column,
            row: None,
            layer: 0,
        }
    }

    /// Independent single-row reel on the base layer
    pub const fn cell(column: usize, row: usize) -> Self {
        Self {
            column,
            row: Some(row),
            layer: 0,
        }
    }

    pub fn with_layer(mut self, layer: usize) -> Self {
        self.layer = layer;
        self
    }

    pub fn is_independent(&self) -> bool {
        self.row.is_some()
    }
}

impl fmt::Display for ReelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row {
            Some(row) => write!(f, "{}:{}@{}", self.column, row, self.layer),
            None => write!(f, "{}@{}", self.column, self.layer),
        }
    }
}

/// Raw id scheme of a game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReelLayout {
    /// Rows per column when reels are independent
    pub independent_rows: Option<usize>,
}

impl ReelLayout {
    pub fn standard() -> Self {
        Self::default()
    }

    pub fn independent(rows: usize) -> Self {
        Self {
            independent_rows: Some(rows.max(1)),
        }
    }

    pub fn is_independent(&self) -> bool {
        self.independent_rows.is_some()
    }

    /// Server-side raw id for a reel
    pub fn raw_id(&self, reel: &ReelId) -> usize {
        match (self.independent_rows, reel.row) {
            (Some(rows), Some(row)) => reel.column * rows + row,
            _ => reel.column,
        }
    }

    /// Reel addressed by a raw id on `layer`; `row_hint` picks the row of a
    /// standard id inside an independent layout.
    pub fn from_raw(&self, raw: usize, layer: usize, row_hint: Option<usize>) -> ReelId {
        let id = match self.independent_rows {
            Some(rows) => match row_hint {
                Some(row) => ReelId::cell(raw, row),
                None => ReelId::cell(raw / rows, raw % rows),
            },
            None => ReelId::column(raw),
        };
        id.with_layer(layer)
    }
}
