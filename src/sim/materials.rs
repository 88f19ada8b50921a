use std::collections::BTreeMap;

use crate::error::{ConfigError, ResolutionError};
use crate::io::config::MaterialRecord;
use crate::units::{QuantityKind, normalize, positive_length};

/// Phase of a material, which decides how it may be used in a stackup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseType {
    Solid,
    Gas,
    SolderPaste,
    Deformable,
    DeformablePad,
    Component,
}

impl PhaseType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "solid" => Some(Self::Solid),
            "gas" => Some(Self::Gas),
            "solder_paste" => Some(Self::SolderPaste),
            "deformable" => Some(Self::Deformable),
            "deformable_pad" => Some(Self::DeformablePad),
            "component" => Some(Self::Component),
            _ => None,
        }
    }
}

/// Diagonal conductivity tensor in W/(m*K).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conductivity {
    pub xx: f64,
    pub yy: f64,
    pub zz: f64,
}

impl Conductivity {
    pub fn isotropic(k: f64) -> Self {
        Self { xx: k, yy: k, zz: k }
    }

    pub fn new(xx: f64, yy: f64, zz: f64) -> Self {
        Self { xx, yy, zz }
    }
}

/// Named material. Unspecified properties are `None`, never zero.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub conductivity: Option<Conductivity>,
    /// Specific heat in J/(kg*K).
    pub specific_heat: Option<f64>,
    /// Density in kg/m^3.
    pub density: Option<f64>,
    pub emissivity: Option<f64>,
    pub reflection_coeff: Option<f64>,
    pub phase: PhaseType,
    /// Upper bound for the height of components made of this material (m).
    pub max_height: Option<f64>,
    /// Default thickness hint (m).
    pub thickness: Option<f64>,
    pub color: String,
}

impl Material {
    pub fn new(name: &str, phase: PhaseType) -> Self {
        Self {
            name: name.to_string(),
            conductivity: None,
            specific_heat: None,
            density: None,
            emissivity: None,
            reflection_coeff: None,
            phase,
            max_height: None,
            thickness: None,
            color: String::new(),
        }
    }

    pub fn with_conductivity(mut self, conductivity: Conductivity) -> Self {
        self.conductivity = Some(conductivity);
        self
    }

    pub fn with_heat_capacity(mut self, density: f64, specific_heat: f64) -> Self {
        self.density = Some(density);
        self.specific_heat = Some(specific_heat);
        self
    }

    pub fn with_max_height(mut self, max_height: f64) -> Self {
        self.max_height = Some(max_height);
        self
    }

    pub fn with_thickness(mut self, thickness: f64) -> Self {
        self.thickness = Some(thickness);
        self
    }

    pub fn with_color(mut self, color: &str) -> Self {
        self.color = color.to_string();
        self
    }

    /// Conductivity, required wherever the material ends up in a column.
    pub fn require_conductivity(&self, context: &str) -> Result<Conductivity, ConfigError> {
        self.conductivity
            .ok_or_else(|| ConfigError::MissingProperty {
                entity: format!("{context} (material '{}')", self.name),
                property: "conductivity",
            })
    }

    /// Volumetric heat capacity rho*c in J/(m^3*K), when both are known.
    pub fn volumetric_heat_capacity(&self) -> Option<f64> {
        Some(self.density? * self.specific_heat?)
    }

    /// Builds a material from its record, normalizing every unit string.
    pub fn from_record(record: &MaterialRecord) -> crate::Result<Self> {
        let name = record.name.as_str();
        if record.kind.is_empty() {
            return Err(ConfigError::MissingField {
                entity: name.to_string(),
                field: "type",
            }
            .into());
        }
        let phase = PhaseType::from_name(&record.kind).ok_or_else(|| {
            ResolutionError::InvalidMaterialType {
                material: name.to_string(),
                kind: record.kind.clone(),
            }
        })?;

        let k = |text: &str, field| normalize(QuantityKind::Conductivity, text, name, field);
        let scalar = k(&record.conductivity, "conductivity")?;
        let axes = [
            k(&record.conductivity_xx, "conductivityXX")?,
            k(&record.conductivity_yy, "conductivityYY")?,
            k(&record.conductivity_zz, "conductivityZZ")?,
        ];
        let conductivity = match (scalar, axes) {
            (Some(s), [xx, yy, zz]) => Some(Conductivity::new(
                xx.unwrap_or(s),
                yy.unwrap_or(s),
                zz.unwrap_or(s),
            )),
            (None, [Some(xx), Some(yy), Some(zz)]) => Some(Conductivity::new(xx, yy, zz)),
            (None, [None, None, None]) => None,
            (None, _) => {
                return Err(ConfigError::MissingProperty {
                    entity: name.to_string(),
                    property: "conductivity (all of XX, YY, ZZ)",
                }
                .into());
            }
        };

        let dimensionless =
            |text: &str, field| normalize(QuantityKind::Dimensionless, text, name, field);
        let length = |text: &str, field: &'static str| -> Result<Option<f64>, ConfigError> {
            normalize(QuantityKind::Length, text, name, field)?
                .map(|v| positive_length(v, name, field))
                .transpose()
        };
        Ok(Self {
            name: name.to_string(),
            conductivity,
            specific_heat: normalize(
                QuantityKind::SpecificHeat,
                &record.specific_heat,
                name,
                "specific_heat",
            )?,
            density: normalize(QuantityKind::Density, &record.density, name, "density")?,
            emissivity: dimensionless(&record.emissivity, "emissivity")?,
            reflection_coeff: dimensionless(&record.reflection_coeff, "reflection_coeff")?,
            phase,
            max_height: length(&record.max_height, "max_height")?,
            thickness: length(&record.thickness, "thickness")?,
            color: record.color.clone(),
        })
    }
}

/// Catalog of named materials, immutable once loaded.
#[derive(Debug, Clone, Default)]
pub struct MaterialCatalog {
    materials: BTreeMap<String, Material>,
}

impl MaterialCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a material, rejecting duplicate names.
    pub fn add(&mut self, material: Material) -> Result<(), ConfigError> {
        if self.materials.contains_key(&material.name) {
            return Err(ConfigError::DuplicateName {
                section: "Materials",
                name: material.name,
            });
        }
        self.materials.insert(material.name.clone(), material);
        Ok(())
    }

    pub fn from_records(records: &[MaterialRecord]) -> crate::Result<Self> {
        let mut catalog = Self::new();
        for record in records {
            catalog.add(Material::from_record(record)?)?;
        }
        tracing::debug!(count = catalog.len(), "loaded material catalog");
        Ok(catalog)
    }

    /// Case-sensitive exact lookup.
    pub fn lookup(&self, name: &str) -> Result<&Material, ResolutionError> {
        self.materials
            .get(name)
            .ok_or_else(|| ResolutionError::UnknownMaterial {
                entity: "catalog".to_string(),
                material: name.to_string(),
            })
    }

    /// Lookup that names the referencing entity in the error.
    pub fn lookup_for(&self, entity: &str, name: &str) -> Result<&Material, ResolutionError> {
        self.materials
            .get(name)
            .ok_or_else(|| ResolutionError::UnknownMaterial {
                entity: entity.to_string(),
                material: name.to_string(),
            })
    }

    pub fn get(&self, name: &str) -> Option<&Material> {
        self.materials.get(name)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Material> {
        self.materials.values()
    }

    /// Catalog with the materials of the reference 6-layer board.
    pub fn with_presets() -> Self {
        let mut catalog = Self::new();
        let presets = [
            Material::new("Al", PhaseType::Solid)
                .with_conductivity(Conductivity::isotropic(150.0))
                .with_heat_capacity(2700.0, 860.0)
                .with_color("Silver"),
            Material::new("Cu", PhaseType::Solid)
                .with_conductivity(Conductivity::isotropic(385.0))
                .with_heat_capacity(8930.0, 385.0)
                .with_color("IndianRed"),
            Material::new("Solder", PhaseType::SolderPaste)
                .with_conductivity(Conductivity::isotropic(58.0))
                .with_heat_capacity(7380.0, 230.0)
                .with_color("DimGray"),
            Material::new("Air", PhaseType::Gas)
                .with_conductivity(Conductivity::isotropic(0.0))
                .with_color("white"),
            Material::new("Solder_mask", PhaseType::Solid)
                .with_conductivity(Conductivity::isotropic(0.9))
                .with_thickness(crate::units::mil(1.0))
                .with_color("Green"),
            Material::new("Core", PhaseType::Solid)
                .with_conductivity(Conductivity::new(0.343, 0.343, 1.059))
                .with_color("LimeGreen"),
            Material::new("Prepreg", PhaseType::Deformable)
                .with_conductivity(Conductivity::isotropic(1.059))
                .with_color("Lime"),
            Material::new("FR4", PhaseType::Solid)
                .with_conductivity(Conductivity::new(0.81, 0.81, 0.29))
                .with_heat_capacity(1850.0, 1100.0)
                .with_color("DarkGreen"),
        ];
        for material in presets {
            catalog.materials.insert(material.name.clone(), material);
        }
        catalog
    }
}
