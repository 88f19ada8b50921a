use crate::error::ConfigError;
use crate::io::config::{LayerRecord, ViaRecord};
use crate::units::{QuantityKind, normalize, positive_length, require};

/// How a layer is manufactured, which constrains where it may sit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralType {
    /// Self-supporting sheet (core, foil, shield).
    Rigid,
    /// Flows into gaps (prepreg, air pockets).
    Fill,
    /// Thin surface layer (solder mask, paste).
    Coat,
}

impl StructuralType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Rigid" => Some(Self::Rigid),
            "Fill" => Some(Self::Fill),
            "Coat" => Some(Self::Coat),
            _ => None,
        }
    }
}

/// Relation of a bond edge between two layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondRelation {
    AdheresTo,
    BindsTop,
    BindsBottom,
    LaysAtop,
}

impl BondRelation {
    pub fn label(self) -> &'static str {
        match self {
            Self::AdheresTo => "adheres_to",
            Self::BindsTop => "binds_top",
            Self::BindsBottom => "binds_bottom",
            Self::LaysAtop => "laysatop",
        }
    }
}

/// A stack layer or an embedded feature with all quantities in SI.
#[derive(Debug, Clone)]
pub struct LayerSpec {
    pub name: String,
    pub material: String,
    /// Thickness in metres. Required for stack layers.
    pub thickness: Option<f64>,
    pub kind: StructuralType,
    pub displaces: Vec<String>,
    pub bonds: Vec<(BondRelation, String)>,
    /// Fraction of the board area the layer covers.
    pub coverage: Option<f64>,
    pub start: Option<String>,
    pub stop: Option<String>,
    /// Contact resistance of the bond edges in K*m^2/W.
    pub contact_resistance: Option<f64>,
}

impl LayerSpec {
    pub fn new(name: &str, material: &str, thickness: f64) -> Self {
        Self {
            name: name.to_string(),
            material: material.to_string(),
            thickness: Some(thickness),
            kind: StructuralType::Rigid,
            displaces: Vec::new(),
            bonds: Vec::new(),
            coverage: None,
            start: None,
            stop: None,
            contact_resistance: None,
        }
    }

    /// Embedded feature without a declared thickness.
    pub fn embedded(name: &str, material: &str) -> Self {
        Self {
            thickness: None,
            ..Self::new(name, material, 0.0)
        }
    }

    pub fn of_type(mut self, kind: StructuralType) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_thickness(mut self, thickness: f64) -> Self {
        self.thickness = Some(thickness);
        self
    }

    pub fn displacing(mut self, target: &str) -> Self {
        self.displaces.push(target.to_string());
        self
    }

    pub fn with_coverage(mut self, coverage: f64) -> Self {
        self.coverage = Some(coverage);
        self
    }

    pub fn anchored(mut self, start: &str, stop: &str) -> Self {
        self.start = Some(start.to_string());
        self.stop = Some(stop.to_string());
        self
    }

    pub fn bonded(mut self, relation: BondRelation, target: &str) -> Self {
        self.bonds.push((relation, target.to_string()));
        self
    }

    pub fn with_contact_resistance(mut self, resistance: f64) -> Self {
        self.contact_resistance = Some(resistance);
        self
    }

    /// Effective coverage; an absent value means full coverage.
    pub fn effective_coverage(&self) -> f64 {
        self.coverage.unwrap_or(1.0)
    }

    pub fn is_anchored(&self) -> bool {
        self.start.is_some() || self.stop.is_some()
    }

    /// Rejects a declared thickness that is not a positive length.
    pub fn check_thickness(&self) -> Result<(), ConfigError> {
        match self.thickness {
            Some(t) => positive_length(t, &self.name, "thickness").map(|_| ()),
            None => Ok(()),
        }
    }

    /// Names this layer depends on for placement, with the role of each.
    pub(crate) fn dependencies(&self) -> Vec<(&str, &'static str)> {
        let mut deps: Vec<(&str, &'static str)> =
            self.displaces.iter().map(|d| (d.as_str(), "displaces")).collect();
        if let Some(start) = &self.start {
            deps.push((start, "start"));
        }
        if let Some(stop) = &self.stop {
            deps.push((stop, "stop"));
        }
        deps
    }

    pub fn from_record(record: &LayerRecord) -> Result<Self, ConfigError> {
        let name = record.name.as_str();
        if name.is_empty() {
            return Err(ConfigError::MissingField {
                entity: "layer".to_string(),
                field: "name",
            });
        }
        if record.matl.is_empty() {
            return Err(ConfigError::MissingField {
                entity: name.to_string(),
                field: "matl",
            });
        }
        let kind = match record.kind.as_str() {
            "" => {
                return Err(ConfigError::MissingField {
                    entity: name.to_string(),
                    field: "type",
                });
            }
            other => StructuralType::from_name(other).ok_or_else(|| ConfigError::UnknownKind {
                entity: name.to_string(),
                field: "layer type",
                kind: other.to_string(),
            })?,
        };

        let coverage = match record.coverage.as_text().as_deref() {
            None => None,
            Some(text) => normalize(QuantityKind::Dimensionless, text, name, "coverage")?,
        };
        if let Some(c) = coverage.filter(|c| !(0.0..=1.0).contains(c)) {
            return Err(ConfigError::InvalidCoverage {
                entity: name.to_string(),
                coverage: c,
                reason: "must lie in [0, 1]",
            });
        }

        let mut bonds = Vec::new();
        for (relation, target) in [
            (BondRelation::AdheresTo, &record.adheres_to),
            (BondRelation::BindsTop, &record.binds_top),
            (BondRelation::BindsBottom, &record.binds_bottom),
            (BondRelation::LaysAtop, &record.laysatop),
        ] {
            if !target.is_empty() {
                bonds.push((relation, target.clone()));
            }
        }

        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Ok(Self {
            name: name.to_string(),
            material: record.matl.clone(),
            thickness: normalize(QuantityKind::Length, &record.thickness, name, "thickness")?
                .map(|t| positive_length(t, name, "thickness"))
                .transpose()?,
            kind,
            displaces: record.displaces.names(),
            bonds,
            coverage,
            start: non_empty(&record.start),
            stop: non_empty(&record.stop),
            contact_resistance: normalize(
                QuantityKind::ContactResistance,
                &record.contact_resistance,
                name,
                "contact_resistance",
            )?,
        })
    }

    /// Stack layers must declare their thickness.
    pub fn stack_from_record(record: &LayerRecord) -> Result<Self, ConfigError> {
        let mut layer = Self::from_record(record)?;
        let t = require(QuantityKind::Length, &record.thickness, &layer.name, "thickness")?;
        layer.thickness = Some(positive_length(t, &layer.name, "thickness")?);
        Ok(layer)
    }
}

/// Through-stack conductor between two layers.
#[derive(Debug, Clone)]
pub struct ViaSpec {
    pub name: String,
    pub material: String,
    pub from: String,
    pub to: String,
}

impl ViaSpec {
    pub fn new(name: &str, material: &str, from: &str, to: &str) -> Self {
        Self {
            name: name.to_string(),
            material: material.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn from_record(record: &ViaRecord) -> Result<Self, ConfigError> {
        let missing = |field| ConfigError::MissingField {
            entity: record.name.clone(),
            field,
        };
        if record.matl.is_empty() {
            return Err(missing("matl"));
        }
        if record.from.is_empty() {
            return Err(missing("from"));
        }
        if record.to.is_empty() {
            return Err(missing("to"));
        }
        Ok(Self::new(&record.name, &record.matl, &record.from, &record.to))
    }
}

/// Canonical description of a board, whichever view it was loaded from.
#[derive(Debug, Clone, Default)]
pub struct StackupDescription {
    /// Physical stack, top to bottom.
    pub stack: Vec<LayerSpec>,
    pub embedded: Vec<LayerSpec>,
    pub vias: Vec<ViaSpec>,
}

impl StackupDescription {
    pub fn new(stack: Vec<LayerSpec>, embedded: Vec<LayerSpec>, vias: Vec<ViaSpec>) -> Self {
        Self {
            stack,
            embedded,
            vias,
        }
    }

    /// Checks name uniqueness across the layer namespace and among vias.
    pub fn validate_names(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for layer in self.stack.iter().chain(self.embedded.iter()) {
            if !seen.insert(layer.name.as_str()) {
                return Err(ConfigError::DuplicateName {
                    section: "Stackup/Embedded",
                    name: layer.name.clone(),
                });
            }
        }
        let mut vias = std::collections::HashSet::new();
        for via in &self.vias {
            if !vias.insert(via.name.as_str()) {
                return Err(ConfigError::DuplicateName {
                    section: "Vias",
                    name: via.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// All layers in declaration order: stack first, then embedded.
    pub fn layers(&self) -> impl Iterator<Item = &LayerSpec> {
        self.stack.iter().chain(self.embedded.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::{NameList, Scalar};

    fn record(name: &str) -> LayerRecord {
        LayerRecord {
            name: name.to_string(),
            matl: "Cu".to_string(),
            thickness: "1.2mil".to_string(),
            kind: "Rigid".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_record_normalizes_units() {
        let mut r = record("side3_cu");
        r.displaces = NameList::One("side4_prepreg".to_string());
        r.coverage = Scalar::Text("0.5".to_string());
        let layer = LayerSpec::from_record(&r).unwrap();
        assert!((layer.thickness.unwrap() - 30.48e-6).abs() < 1e-12);
        assert_eq!(layer.displaces, vec!["side4_prepreg".to_string()]);
        assert_eq!(layer.coverage, Some(0.5));
        assert!(layer.start.is_none());
    }

    #[test]
    fn test_coverage_out_of_range() {
        let mut r = record("cu");
        r.coverage = Scalar::Number(1.5);
        let err = LayerSpec::from_record(&r).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCoverage { .. }));
    }

    #[test]
    fn test_stack_layer_needs_thickness() {
        let mut r = record("core1");
        r.thickness.clear();
        assert!(LayerSpec::from_record(&r).is_ok());
        let err = LayerSpec::stack_from_record(&r).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "thickness", .. }));
    }

    #[test]
    fn test_non_positive_thickness_is_rejected() {
        for text in ["-12mil", "0mil", "0"] {
            let mut r = record("pp");
            r.thickness = text.to_string();
            let err = LayerSpec::stack_from_record(&r).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidThickness { ref entity, .. } if entity == "pp"),
                "{text}: {err}"
            );
            assert!(LayerSpec::from_record(&r).is_err(), "{text}");
        }
        assert!(LayerSpec::embedded("void", "Air")
            .with_thickness(-1e-5)
            .check_thickness()
            .is_err());
        assert!(LayerSpec::embedded("void", "Air").check_thickness().is_ok());
    }

    #[test]
    fn test_unknown_structural_type() {
        let mut r = record("odd");
        r.kind = "Liquid".to_string();
        let err = LayerSpec::from_record(&r).unwrap_err();
        assert!(err.to_string().contains("Liquid"));
    }

    #[test]
    fn test_bonds_are_collected() {
        let mut r = record("topside_solder");
        r.adheres_to = "topside_cu".to_string();
        let layer = LayerSpec::from_record(&r).unwrap();
        assert_eq!(
            layer.bonds,
            vec![(BondRelation::AdheresTo, "topside_cu".to_string())]
        );
    }

    #[test]
    fn test_duplicate_names_across_stack_and_embedded() {
        let desc = StackupDescription::new(
            vec![LayerSpec::new("a", "Cu", 1e-5)],
            vec![LayerSpec::embedded("a", "Air").anchored("a", "a")],
            vec![],
        );
        assert!(matches!(
            desc.validate_names(),
            Err(ConfigError::DuplicateName { .. })
        ));
    }
}
