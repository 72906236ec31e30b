//! Reel strips and the strip library

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ReelError, ReelResult};
use crate::symbols::{SymbolCache, SymbolSpec};

/// Serializable strip definition, as found in game data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StripDef {
    /// Strip identifier referenced by configs and outcomes
    pub key: String,
    /// Symbol names, top to bottom
    pub symbols: Vec<String>,
    /// Refresh instantly instead of splicing the new content in
    #[serde(default)]
    pub avoid_splicing: bool,
    /// Reels whose strips share this group stay positionally identical
    #[serde(default)]
    pub link_group: Option<String>,
}

/// An immutable circular symbol sequence
#[derive(Debug, Clone)]
pub struct ReelStrip {
    key: String,
    symbols: Vec<Arc<SymbolSpec>>,
    avoid_splicing: bool,
    link_group: Option<String>,
    max_symbol_height: u32,
    clobber_candidates: Vec<Arc<SymbolSpec>>,
}

impl ReelStrip {
    /// Build a strip, resolving every name through the shared cache.
    pub fn new(def: &StripDef, cache: &SymbolCache) -> ReelResult<Self> {
        if def.symbols.is_empty() {
            return Err(ReelError::InvalidConfig(format!(
                "strip '{}' has no symbols",
                def.key
            )));
        }

        let symbols: Vec<Arc<SymbolSpec>> = def.symbols.iter().map(|s| cache.get(s)).collect();
        let max_symbol_height = symbols.iter().map(|s| s.height).max().unwrap_or(1);

        let mut seen = BTreeSet::new();
        let clobber_candidates = symbols
            .iter()
            .filter(|s| !s.is_composite() && !s.is_replacement() && s.sub_symbol.is_none())
            .filter(|s| seen.insert(s.name.clone()))
            .cloned()
            .collect();

        Ok(Self {
            key: def.key.clone(),
            symbols,
            avoid_splicing: def.avoid_splicing,
            link_group: def.link_group.clone(),
            max_symbol_height,
            clobber_candidates,
        })
    }

    /// Shorthand for tests and tools: a plain strip from names
    pub fn from_names(key: &str, names: &[&str], cache: &SymbolCache) -> ReelResult<Self> {
        let def = StripDef {
            key: key.to_string(),
            symbols: names.iter().map(|s| s.to_string()).collect(),
            avoid_splicing: false,
            link_group: None,
        };
        Self::new(&def, cache)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Strip length
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn avoid_splicing(&self) -> bool {
        self.avoid_splicing
    }

    pub fn link_group(&self) -> Option<&str> {
        self.link_group.as_deref()
    }

    /// Symbol at a circular index; negative indices wrap from the end
    pub fn symbol_at(&self, index: i64) -> &Arc<SymbolSpec> {
        &self.symbols[self.wrap(index)]
    }

    /// Reduce any index into `0..len`
    pub fn wrap(&self, index: i64) -> usize {
        wrap_index(index, self.symbols.len())
    }

    /// Height of the tallest composite on the strip
    pub fn max_symbol_height(&self) -> u32 {
        self.max_symbol_height
    }

    /// Minimum buffer needed to assemble the tallest symbol off-screen
    pub fn buffer_symbol_size(&self) -> usize {
        buffer_for_height(self.max_symbol_height)
    }

    /// Distinct 1×1 symbols usable to replace broken composite cells
    pub fn clobber_candidates(&self) -> &[Arc<SymbolSpec>] {
        &self.clobber_candidates
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Arc<SymbolSpec>> {
        self.symbols.iter()
    }
}

/// Buffer rows required for a symbol `height` cells tall
pub fn buffer_for_height(height: u32) -> usize {
    (height.max(1) as usize - 1) * 2 + 1
}

/// Circular reduction that never yields a negative intermediate
pub fn wrap_index(index: i64, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let len = len as i64;
    let mut value = index % len;
    while value < 0 {
        value += len;
    }
    value as usize
}

/// All strips of a game, keyed by strip identifier
#[derive(Debug, Clone, Default)]
pub struct StripLibrary {
    strips: HashMap<String, Arc<ReelStrip>>,
}

impl StripLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from serialized definitions
    pub fn from_defs(defs: &[StripDef], cache: &SymbolCache) -> ReelResult<Self> {
        let mut library = Self::new();
        for def in defs {
            library.insert(ReelStrip::new(def, cache)?);
        }
        Ok(library)
    }

    /// Parse a JSON array of strip definitions
    pub fn from_json(json: &str, cache: &SymbolCache) -> ReelResult<Self> {
        let defs: Vec<StripDef> = serde_json::from_str(json)?;
        Self::from_defs(&defs, cache)
    }

    /// Parse a YAML list of strip definitions
    pub fn from_yaml(yaml: &str, cache: &SymbolCache) -> ReelResult<Self> {
        let defs: Vec<StripDef> = serde_yml::from_str(yaml)?;
        Self::from_defs(&defs, cache)
    }

    pub fn insert(&mut self, strip: ReelStrip) -> Arc<ReelStrip> {
        let strip = Arc::new(strip);
        self.strips.insert(strip.key().to_string(), Arc::clone(&strip));
        strip
    }

    pub fn get(&self, key: &str) -> ReelResult<Arc<ReelStrip>> {
        self.strips
            .get(key)
            .cloned()
            .ok_or_else(|| ReelError::UnknownStrip(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.strips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strips.is_empty()
    }
}
