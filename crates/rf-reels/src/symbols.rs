//! Symbol name grammar and the shared parse cache
//!
//! Reel strips carry plain symbol identifiers. Composite symbols encode their
//! footprint in the name itself:
//!
//! ```text
//! M1            1×1 symbol
//! M1-3B         tall symbol, 3 cells high, second row from the top
//! M1-3B-2A      mega symbol, 3 high × 2 wide, row 2, column 1
//! RP-2A|M1-2A   replacement placeholder carrying a sub-symbol
//! ```
//!
//! Row and column letters are 'A'-based and 1-based ('A' = 1). Everything after
//! [`SUB_SYMBOL_DELIMITER`] is parsed recursively as its own symbol.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Separator between a symbol and its attached sub-symbol
pub const SUB_SYMBOL_DELIMITER: char = '|';

/// Separator between the short name and the size/position segments
const SEGMENT_DELIMITER: char = '-';

/// Symbol type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum SymbolType {
    /// Regular paying symbol
    #[default]
    Regular = 0,
    /// Wild - substitutes for others
    Wild = 1,
    /// Scatter - triggers features regardless of position
    Scatter = 2,
    /// Bonus - triggers bonus game
    Bonus = 3,
    /// Jackpot symbol
    Jackpot = 4,
    /// Blank/empty position
    Blank = 5,
    /// Placeholder resolved to another symbol once the outcome is known
    Replacement = 6,
}

/// Paying tier of a regular symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SymbolTier {
    Major,
    Minor,
    #[default]
    Unranked,
}

/// Structural facts derived from a symbol identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSpec {
    /// Full identifier as it appears on the strip
    pub name: String,
    /// Identifier without any sub-symbol
    pub base_name: String,
    /// Identifier without size/position segments (e.g. "M1")
    pub short_name: String,
    /// Name the server uses for this cell in its symbol matrix
    pub server_name: String,
    /// Composite width in cells
    pub width: u32,
    /// Composite height in cells
    pub height: u32,
    /// 1-based row within the composite (1 = top)
    pub row: u32,
    /// 1-based column within the composite (1 = left)
    pub column: u32,
    /// Category
    pub symbol_type: SymbolType,
    /// Paying tier
    pub tier: SymbolTier,
    /// Attached sub-symbol
    pub sub_symbol: Option<Arc<SymbolSpec>>,
}

impl SymbolSpec {
    /// Parse without caching. Prefer [`SymbolCache::get`] in hot paths.
    pub fn parse(name: &str) -> Self {
        let (base, sub) = split_sub_symbol(name);
        let sub_symbol = sub.map(|s| Arc::new(Self::parse(s)));
        Self::from_parts(name, base, sub_symbol)
    }

    fn from_parts(name: &str, base: &str, sub_symbol: Option<Arc<SymbolSpec>>) -> Self {
        let (short_name, height, row, width, column) = match parse_footprint(base) {
            Some(footprint) => footprint,
            None => (base, 1, 1, 1, 1),
        };

        let server_name = if width > 1 || height > 1 {
            short_name.to_string()
        } else {
            base.to_string()
        };

        Self {
            name: name.to_string(),
            base_name: base.to_string(),
            short_name: short_name.to_string(),
            server_name,
            width,
            height,
            row,
            column,
            symbol_type: classify(short_name),
            tier: tier_of(short_name),
            sub_symbol,
        }
    }

    /// `(width, height)` of the composite this cell belongs to
    pub fn width_and_height(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Spans more than one cell
    pub fn is_composite(&self) -> bool {
        self.width > 1 || self.height > 1
    }

    /// Spans more than one reel
    pub fn is_mega(&self) -> bool {
        self.width > 1
    }

    /// Top-left cell, the one owning animation/identity resources
    pub fn is_anchor(&self) -> bool {
        self.row == 1 && self.column == 1
    }

    pub fn is_wild(&self) -> bool {
        self.symbol_type == SymbolType::Wild
    }

    pub fn is_scatter(&self) -> bool {
        self.symbol_type == SymbolType::Scatter
    }

    pub fn is_bonus(&self) -> bool {
        self.symbol_type == SymbolType::Bonus
    }

    pub fn is_blank(&self) -> bool {
        self.symbol_type == SymbolType::Blank
    }

    pub fn is_jackpot(&self) -> bool {
        self.symbol_type == SymbolType::Jackpot
    }

    /// Placeholder resolved once the outcome is known
    pub fn is_replacement(&self) -> bool {
        self.symbol_type == SymbolType::Replacement
    }

    pub fn is_major(&self) -> bool {
        self.tier == SymbolTier::Major
    }

    pub fn is_minor(&self) -> bool {
        self.tier == SymbolTier::Minor
    }

    /// Both cells belong to the same kind of composite (short name and footprint).
    pub fn same_composite(&self, other: &SymbolSpec) -> bool {
        self.short_name == other.short_name
            && self.width == other.width
            && self.height == other.height
    }

    /// Name of the cell at `row`/`column` of this composite
    pub fn sibling_name(&self, row: u32, column: u32) -> String {
        compose_name(&self.short_name, self.width, self.height, row, column)
    }
}

/// Build a symbol identifier from its structural parts.
pub fn compose_name(short_name: &str, width: u32, height: u32, row: u32, column: u32) -> String {
    if width <= 1 && height <= 1 {
        return short_name.to_string();
    }

    let mut name = format!(
        "{short_name}{SEGMENT_DELIMITER}{height}{}",
        index_letter(row)
    );
    if width > 1 {
        name.push(SEGMENT_DELIMITER);
        name.push_str(&format!("{width}{}", index_letter(column)));
    }
    name
}

fn index_letter(index: u32) -> char {
    (b'A' + (index.clamp(1, 26) - 1) as u8) as char
}

fn split_sub_symbol(name: &str) -> (&str, Option<&str>) {
    match name.split_once(SUB_SYMBOL_DELIMITER) {
        Some((base, sub)) if !sub.is_empty() => (base, Some(sub)),
        Some((base, _)) => (base, None),
        None => (name, None),
    }
}

/// Parse one `<size><letter>` segment, e.g. "3B" → (3, 2).
fn parse_size_segment(segment: &str) -> Option<(u32, u32)> {
    let letter = segment.chars().last()?;
    if !letter.is_ascii_uppercase() {
        return None;
    }
    let digits = &segment[..segment.len() - 1];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let size: u32 = digits.parse().ok()?;
    let index = (letter as u32) - ('A' as u32) + 1;
    if size == 0 || index > size {
        return None;
    }
    Some((size, index))
}

/// `(short, height, row, width, column)` for composite names
fn parse_footprint(base: &str) -> Option<(&str, u32, u32, u32, u32)> {
    let (rest, last) = base.rsplit_once(SEGMENT_DELIMITER)?;
    let (last_size, last_index) = parse_size_segment(last)?;

    if let Some((short, prev)) = rest.rsplit_once(SEGMENT_DELIMITER) {
        if let Some((height, row)) = parse_size_segment(prev) {
            if !short.is_empty() {
                return Some((short, height, row, last_size, last_index));
            }
        }
    }

    if rest.is_empty() {
        return None;
    }
    Some((rest, last_size, last_index, 1, 1))
}

fn classify(short_name: &str) -> SymbolType {
    let upper = short_name.to_ascii_uppercase();
    let starts_with_then_digit = |prefix: &str| {
        upper.starts_with(prefix)
            && upper[prefix.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
    };

    if upper.starts_with("RP") {
        SymbolType::Replacement
    } else if upper.starts_with("WILD") || upper.starts_with("WD") || starts_with_then_digit("W")
    {
        SymbolType::Wild
    } else if upper.starts_with("SC") {
        SymbolType::Scatter
    } else if upper.starts_with("BONUS") || upper.starts_with("BN") {
        SymbolType::Bonus
    } else if upper.starts_with("BL") {
        SymbolType::Blank
    } else if upper.starts_with("JACKPOT") || upper.starts_with("JP") {
        SymbolType::Jackpot
    } else {
        SymbolType::Regular
    }
}

fn tier_of(short_name: &str) -> SymbolTier {
    let upper = short_name.to_ascii_uppercase();
    let digit_after = |prefix: &str| {
        upper.starts_with(prefix)
            && upper[prefix.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
    };

    if upper.starts_with("HP") || digit_after("M") {
        SymbolTier::Major
    } else if upper.starts_with("LP") || digit_after("L") {
        SymbolTier::Minor
    } else {
        SymbolTier::Unranked
    }
}

/// Append-only symbol parse cache
///
/// Shared read-mostly between every reel of a session via `Arc`. Reset with
/// [`SymbolCache::clear`] when a new session starts.
#[derive(Debug, Default)]
pub struct SymbolCache {
    entries: RwLock<HashMap<String, Arc<SymbolSpec>>>,
}

impl SymbolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parsed spec for `name`, parsing on first use
    pub fn get(&self, name: &str) -> Arc<SymbolSpec> {
        if let Some(spec) = self.entries.read().get(name) {
            return Arc::clone(spec);
        }

        let (base, sub) = split_sub_symbol(name);
        let sub_symbol = sub.map(|s| self.get(s));
        let spec = Arc::new(SymbolSpec::from_parts(name, base, sub_symbol));

        let mut entries = self.entries.write();
        Arc::clone(entries.entry(name.to_string()).or_insert(spec))
    }

    /// Number of cached names
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every cached entry (session reset)
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
