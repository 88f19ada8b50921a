//! Stackup resolution.
//!
//! A board is described by an ordered physical stack, an overlay of embedded
//! features positioned by anchors or by displacing other layers, and a list of
//! vias. Resolution merges these into one [`ResolvedColumn`] per planar
//! region, where a region is a combination of partial-coverage features being
//! present or absent.
//!
//! ```text
//! StackupDescription ──► DependencyGraph ──► canonical order ──► placements
//!                                                                   │
//!                                   regions (2^partial) ◄── paint ──┘
//! ```
//!
//! Depth `z` is measured downward from the top face of the board.

pub mod column;
pub mod layer;
pub mod resolve;

pub use column::{ColumnCoefficients, ResolvedColumn, Segment};
pub use layer::{BondRelation, LayerSpec, StackupDescription, StructuralType, ViaSpec};
pub use resolve::{DependencyGraph, MAX_PARTIAL_FEATURES, resolve, resolve_with_order};

use crate::sim::materials::Conductivity;
use column::{blend, conductance, resistance};

/// Resolved z-extent of a layer or feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub name: String,
    pub material: String,
    pub z0: f64,
    pub z1: f64,
    pub coverage: f64,
    /// Painting precedence; `None` for baseline layers.
    pub rank: Option<usize>,
}

/// Planar sub-area sharing one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Bit mask over the partial features in rank order.
    pub index: usize,
    /// Partial-coverage features present in this region.
    pub present: Vec<String>,
    pub area_fraction: f64,
    pub column: ResolvedColumn,
}

/// Through-stack conductor after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ViaPath {
    pub name: String,
    pub material: String,
    pub from: String,
    pub to: String,
    pub z0: f64,
    pub z1: f64,
    pub conductivity: Conductivity,
    pub heat_capacity: Option<f64>,
}

impl ViaPath {
    pub fn span(&self) -> f64 {
        self.z1 - self.z0
    }
}

/// Thermal series edge registered by a bond relation.
#[derive(Debug, Clone, PartialEq)]
pub struct BondEdge {
    pub layer: String,
    pub target: String,
    pub relation: BondRelation,
    /// K*m^2/W, zero when not configured.
    pub contact_resistance: f64,
}

/// Which column a mesh node uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnRef {
    Region(usize),
    /// Area-weighted blend of every region.
    Blended,
}

/// Result of stackup resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Stackup {
    pub total_thickness: f64,
    pub regions: Vec<Region>,
    pub vias: Vec<ViaPath>,
    pub bonds: Vec<BondEdge>,
    pub placements: Vec<Placement>,
}

impl Stackup {
    /// Region with no partial feature present.
    pub fn background_region(&self) -> usize {
        self.extreme_region(|a, b| a < b)
    }

    /// Region with every partial feature present.
    pub fn pour_region(&self) -> usize {
        self.extreme_region(|a, b| a > b)
    }

    fn extreme_region(&self, better: impl Fn(usize, usize) -> bool) -> usize {
        let mut best = 0;
        for (i, r) in self.regions.iter().enumerate() {
            if better(r.present.len(), self.regions[best].present.len()) {
                best = i;
            }
        }
        best
    }

    pub fn via_index(&self, name: &str) -> Option<usize> {
        self.vias.iter().position(|v| v.name == name)
    }

    pub fn placement(&self, name: &str) -> Option<&Placement> {
        self.placements.iter().find(|p| p.name == name)
    }

    /// Columns a node samples, weighted by area fraction, with the via painted
    /// over its span when given.
    pub fn weighted_columns(
        &self,
        column: ColumnRef,
        via: Option<usize>,
    ) -> Vec<(f64, ResolvedColumn)> {
        let selected: Vec<(f64, &ResolvedColumn)> = match column {
            ColumnRef::Region(i) => vec![(1.0, &self.regions[i].column)],
            ColumnRef::Blended => self
                .regions
                .iter()
                .map(|r| (r.area_fraction, &r.column))
                .collect(),
        };
        selected
            .into_iter()
            .map(|(fraction, c)| {
                let mut c = c.clone();
                if let Some(v) = via.and_then(|v| self.vias.get(v)) {
                    c.paint(
                        &v.name,
                        &v.material,
                        v.conductivity,
                        v.heat_capacity,
                        v.z0,
                        v.z1,
                    );
                }
                (fraction, c)
            })
            .collect()
    }

    /// Per-area coefficients of a node column.
    pub fn coefficients(&self, column: ColumnRef, via: Option<usize>) -> ColumnCoefficients {
        let parts: Vec<(f64, ColumnCoefficients)> = self
            .weighted_columns(column, via)
            .iter()
            .map(|(f, c)| (*f, c.coefficients()))
            .collect();
        blend(&parts)
    }

    /// Fractional blend of all regions.
    pub fn blended(&self) -> ColumnCoefficients {
        self.coefficients(ColumnRef::Blended, None)
    }

    /// Resistance per area from the column mid-plane to the mid-depth of a
    /// layer, blended over the regions that contain it. `None` if the layer
    /// is absent from every sampled column.
    pub fn resistance_to_layer(
        &self,
        column: ColumnRef,
        via: Option<usize>,
        layer: &str,
    ) -> Option<f64> {
        let mut g = 0.0;
        let mut found = false;
        for (fraction, c) in self.weighted_columns(column, via) {
            if let Some((a, b)) = c.layer_extent(layer) {
                found = true;
                g += fraction * conductance(c.through_resistance(c.mid_plane(), 0.5 * (a + b)));
            }
        }
        found.then(|| resistance(g))
    }

    /// First material lacking density or specific heat in a node column.
    pub fn missing_capacity(&self, column: ColumnRef, via: Option<usize>) -> Option<String> {
        self.weighted_columns(column, via)
            .iter()
            .find_map(|(_, c)| c.heat_capacity().err().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::materials::MaterialCatalog;
    use crate::units::mil;

    fn two_region() -> Stackup {
        let desc = StackupDescription::new(
            vec![
                LayerSpec::new("pp", "Prepreg", mil(12.0)),
                LayerSpec::new("cu", "Cu", mil(1.2))
                    .displacing("pp")
                    .with_coverage(0.5),
            ],
            vec![],
            vec![ViaSpec::new("thru", "Cu", "pp", "pp")],
        );
        resolve(&desc, &MaterialCatalog::with_presets()).unwrap()
    }

    #[test]
    fn test_background_and_pour() {
        let s = two_region();
        assert_eq!(s.background_region(), 0);
        assert_eq!(s.pour_region(), 1);
        assert!(s.regions[1].column.layer_extent("cu").is_some());
    }

    #[test]
    fn test_blended_lies_between_regions() {
        let s = two_region();
        let a = s.coefficients(ColumnRef::Region(0), None);
        let b = s.coefficients(ColumnRef::Region(1), None);
        let m = s.blended();
        assert!(m.sheet_x > a.sheet_x && m.sheet_x < b.sheet_x);
        assert!((m.sheet_x - 0.5 * (a.sheet_x + b.sheet_x)).abs() < 1e-12);
    }

    #[test]
    fn test_via_bypasses_column() {
        let s = two_region();
        let plain = s.coefficients(ColumnRef::Region(0), None);
        let via = s.coefficients(ColumnRef::Region(0), s.via_index("thru"));
        assert!(via.r_top < plain.r_top / 100.0);
        let expected = 0.5 * mil(12.0) / 385.0;
        assert!((via.r_top - expected).abs() < 1e-12, "r_top={}", via.r_top);
    }

    #[test]
    fn test_resistance_to_layer() {
        let s = two_region();
        assert!(s.resistance_to_layer(ColumnRef::Region(0), None, "cu").is_none());
        let r = s
            .resistance_to_layer(ColumnRef::Region(1), None, "cu")
            .unwrap();
        assert!(r > 0.0 && r.is_finite());
        assert!(s.resistance_to_layer(ColumnRef::Blended, None, "cu").is_some());
    }

    #[test]
    fn test_missing_capacity_names_material() {
        let s = two_region();
        assert_eq!(
            s.missing_capacity(ColumnRef::Region(0), None).as_deref(),
            Some("Prepreg")
        );
    }
}
