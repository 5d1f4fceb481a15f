//! Region descriptions for the three sampled models.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Largest region accepted, in cells (or path steps).
pub const MAX_REGION_CELLS: usize = 1 << 20;

/// Immutable description of the domain being sampled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RegionSpec {
    /// Monotone lattice paths with `right` right-steps and `up` up-steps.
    LatticePath { right: u32, up: u32 },
    /// Lozenge tilings of the hexagon with sides a, b, c.
    Hexagon { a: u32, b: u32, c: u32 },
    /// Domino tilings of a width x height rectangle.
    Rectangle { width: u32, height: u32 },
    /// Domino tilings of the Aztec diamond of the given order.
    AztecDiamond { order: u32 },
    /// Domino tilings of an explicit set of unit cells.
    Cells { cells: Vec<(i32, i32)> },
}

impl Default for RegionSpec {
    fn default() -> Self {
        RegionSpec::LatticePath { right: 4, up: 3 }
    }
}

impl RegionSpec {
    /// Build a domino region from `(x, y, kind)` triples. Triples with kind 0 are skipped.
    pub fn from_triples(triples: &[[i32; 3]]) -> Self {
        RegionSpec::Cells {
            cells: triples
                .iter()
                .filter(|t| t[2] != 0)
                .map(|t| (t[0], t[1]))
                .collect(),
        }
    }

    /// Number of cells (or steps) in the region.
    pub fn cell_count(&self) -> usize {
        match self {
            RegionSpec::LatticePath { right, up } => *right as usize + *up as usize,
            RegionSpec::Hexagon { a, b, c } => {
                let (a, b, c) = (*a as usize, *b as usize, *c as usize);
                a * b + b * c + c * a
            }
            RegionSpec::Rectangle { width, height } => *width as usize * *height as usize,
            RegionSpec::AztecDiamond { order } => {
                let n = *order as usize;
                2 * n * (n + 1)
            }
            RegionSpec::Cells { cells } => cells.len(),
        }
    }

    /// Unit cells of a domino region. Empty for the other models.
    pub fn domino_cells(&self) -> Vec<(i32, i32)> {
        match self {
            RegionSpec::Rectangle { width, height } => (0..*height as i32)
                .flat_map(|y| (0..*width as i32).map(move |x| (x, y)))
                .collect(),
            RegionSpec::AztecDiamond { order } => {
                let n = *order as i32;
                (-n..n)
                    .flat_map(|y| (-n..n).map(move |x| (x, y)))
                    .filter(|&(x, y)| (2 * x + 1).abs() + (2 * y + 1).abs() <= 2 * n)
                    .collect()
            }
            RegionSpec::Cells { cells } => cells.clone(),
            _ => Vec::new(),
        }
    }

    /// Check dimensions. Tileability is checked when the model is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let empty = match self {
            RegionSpec::LatticePath { right, up } => *right == 0 && *up == 0,
            RegionSpec::Hexagon { a, b, c } => *a == 0 || *b == 0 || *c == 0,
            RegionSpec::Rectangle { width, height } => *width == 0 || *height == 0,
            RegionSpec::AztecDiamond { order } => *order == 0,
            RegionSpec::Cells { cells } => cells.is_empty(),
        };
        if empty {
            return Err(ConfigError::EmptyRegion);
        }
        let cells = self.cell_count();
        if cells > MAX_REGION_CELLS {
            return Err(ConfigError::RegionTooLarge(cells));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aztec_cell_count() {
        for order in 1..5 {
            let spec = RegionSpec::AztecDiamond { order };
            assert_eq!(spec.domino_cells().len(), spec.cell_count());
        }
    }

    #[test]
    fn test_from_triples_skips_excluded() {
        let spec = RegionSpec::from_triples(&[[0, 0, 1], [1, 0, 1], [2, 0, 0]]);
        assert_eq!(spec.domino_cells(), vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn test_empty_regions_rejected() {
        assert!(RegionSpec::Rectangle { width: 0, height: 4 }.validate().is_err());
        assert!(RegionSpec::LatticePath { right: 0, up: 0 }.validate().is_err());
        assert!(RegionSpec::LatticePath { right: 0, up: 3 }.validate().is_ok());
    }

    #[test]
    fn test_region_json_roundtrip_tag() {
        let json = r#"{ "type": "Hexagon", "a": 2, "b": 3, "c": 4 }"#;
        let spec: RegionSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec, RegionSpec::Hexagon { a: 2, b: 3, c: 4 });
    }
}
