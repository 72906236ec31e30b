//! Server matrix validation (diagnostic only)

use serde::{Deserialize, Serialize};

use crate::error::ReelError;
use crate::reel::Reel;

/// One cell where the client window disagrees with the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub layer: usize,
    pub column: usize,
    pub row: usize,
    /// Server name from the matrix (empty when the matrix has no such cell)
    pub expected: String,
    /// Server name on the reel
    pub found: String,
}

impl From<Mismatch> for ReelError {
    fn from(m: Mismatch) -> Self {
        ReelError::Desync {
            layer: m.layer,
            column: m.column,
            row: m.row,
            expected: m.expected,
            found: m.found,
        }
    }
}

/// Result of comparing every visible cell
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Cells compared
    pub checked: usize,
    pub mismatches: Vec<Mismatch>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Compare visible symbols against a server matrix indexed `[layer][column][row]`.
///
/// Independent reels contribute their single visible row at their own row
/// index; full-column reels contribute every visible row. Nothing is modified.
pub fn compare_matrix(matrix: &[Vec<Vec<String>>], reels: &[Reel]) -> ValidationReport {
    let mut report = ValidationReport::default();

    for reel in reels {
        let id = reel.id();
        let first_row = id.row.unwrap_or(0);

        for (offset, found) in reel.visible_server_names().into_iter().enumerate() {
            let row = first_row + offset;
            let expected = matrix
                .get(id.layer)
                .and_then(|layer| layer.get(id.column))
                .and_then(|column| column.get(row))
                .cloned()
                .unwrap_or_default();

            report.checked += 1;
            if expected != found {
                report.mismatches.push(Mismatch {
                    layer: id.layer,
                    column: id.column,
                    row,
                    expected,
                    found,
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ReelConfig;
    use crate::layout::ReelId;
    use crate::presenter::NullPresenter;
    use crate::strip::ReelStrip;
    use crate::symbols::SymbolCache;
    use crate::timing::ReelTiming;

    fn reels() -> Vec<Reel> {
        let cache = Arc::new(SymbolCache::new());
        let strip = Arc::new(
            ReelStrip::from_names("base", &["A", "B", "C", "D", "E", "F"], &cache).unwrap(),
        );
        (0..2)
            .map(|c| {
                let config = ReelConfig::new(ReelId::column(c), 3, "base").with_position(2 + c);
                Reel::new(
                    &config,
                    ReelTiming::instant(),
                    Arc::clone(&strip),
                    Arc::clone(&cache),
                    1,
                    &mut NullPresenter,
                )
                .unwrap()
            })
            .collect()
    }

    fn matrix(columns: &[[&str; 3]]) -> Vec<Vec<Vec<String>>> {
        vec![
            columns
                .iter()
                .map(|rows| rows.iter().map(|s| s.to_string()).collect())
                .collect(),
        ]
    }

    #[test]
    fn test_matching_matrix() {
        let report = compare_matrix(&matrix(&[["A", "B", "C"], ["B", "C", "D"]]), &reels());
        assert!(report.is_ok());
        assert_eq!(report.checked, 6);
    }

    #[test]
    fn test_mismatch_reported() {
        let report = compare_matrix(&matrix(&[["A", "B", "C"], ["B", "X", "D"]]), &reels());
        assert_eq!(report.mismatches.len(), 1);
        let mismatch = &report.mismatches[0];
        assert_eq!((mismatch.column, mismatch.row), (1, 1));
        assert_eq!(mismatch.expected, "X");
        assert_eq!(mismatch.found, "C");

        let err: ReelError = mismatch.clone().into();
        assert!(matches!(err, ReelError::Desync { column: 1, .. }));
    }

    #[test]
    fn test_missing_cells_are_mismatches() {
        let report = compare_matrix(&matrix(&[["A", "B", "C"]]), &reels());
        assert_eq!(report.mismatches.len(), 3);
        assert!(report.mismatches.iter().all(|m| m.expected.is_empty()));
    }
}
