//! Serde records for a run document and the loaders that turn them into
//! canonical model types.
//!
//! Field names follow the JSON documents the board tools already produce
//! (`matl`, `solverName`, `inputFile`, `xsize`, ...). Quantities stay strings
//! here and are normalized by [`crate::units`] during conversion.
//!
//! A board can be described in three shapes, all of which reconcile into one
//! [`StackupDescription`]:
//! - ordered: `Stackup`, `Embedded` and `Vias` arrays;
//! - keyed: the same sections as objects `name -> record` ordered by `seq`;
//! - legacy: a flat `layer_matl` list where each entry is both a material and
//!   a stack layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SolveError};
use crate::sim::heat_transfer::boundary::{BoundaryCondition, BoundaryTarget};
use crate::sim::heat_transfer::field::{IsothermSpec, ThermalPath};
use crate::sim::heat_transfer::mesh::{MeshSource, MeshSpec};
use crate::sim::heat_transfer::raster::ColorMap;
use crate::sim::heat_transfer::solver::{Capacitance, SolveOptions, SolverChoice};
use crate::sim::materials::{Conductivity, Material, MaterialCatalog, PhaseType};
use crate::sim::output::OutputPlan;
use crate::stackup::{LayerSpec, StackupDescription, ViaSpec};
use crate::units::{QuantityKind, normalize, require};

/// Default mesh pitch when an entry does not give `cell_size`.
pub const DEFAULT_CELL_SIZE: f64 = 1e-3;

/// `0`/`1` or `true`/`false`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    pub fn is_set(self) -> bool {
        match self {
            Self::Bool(b) => b,
            Self::Int(i) => i != 0,
        }
    }
}

impl Default for Flag {
    fn default() -> Self {
        Self::Int(0)
    }
}

/// A value given either as a JSON number or as a quantity string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    /// Text form, or `None` when empty.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Number(n) => Some(n.to_string()),
            Self::Text(s) if s.trim().is_empty() => None,
            Self::Text(s) => Some(s.clone()),
        }
    }
}

impl Default for Scalar {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// A single name or a list of names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NameList {
    One(String),
    Many(Vec<String>),
}

impl NameList {
    pub fn names(&self) -> Vec<String> {
        match self {
            Self::One(s) if s.is_empty() => Vec::new(),
            Self::One(s) => vec![s.clone()],
            Self::Many(v) => v.iter().filter(|s| !s.is_empty()).cloned().collect(),
        }
    }
}

impl Default for NameList {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialRecord {
    pub name: String,
    #[serde(default)]
    pub conductivity: String,
    #[serde(default, rename = "conductivityXX")]
    pub conductivity_xx: String,
    #[serde(default, rename = "conductivityYY")]
    pub conductivity_yy: String,
    #[serde(default, rename = "conductivityZZ")]
    pub conductivity_zz: String,
    #[serde(default)]
    pub specific_heat: String,
    #[serde(default)]
    pub density: String,
    #[serde(default)]
    pub emissivity: String,
    #[serde(default)]
    pub reflection_coeff: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub max_height: String,
    #[serde(default)]
    pub thickness: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub matl: String,
    #[serde(default)]
    pub thickness: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub displaces: NameList,
    #[serde(default)]
    pub adheres_to: String,
    #[serde(default)]
    pub binds_top: String,
    #[serde(default)]
    pub binds_bottom: String,
    #[serde(default)]
    pub laysatop: String,
    #[serde(default)]
    pub coverage: Scalar,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub stop: String,
    #[serde(default)]
    pub contact_resistance: String,
    /// Declaration order in the keyed view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViaRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub matl: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
}

/// Entry of the legacy flat `layer_matl` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyLayerRecord {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    pub xcond: f64,
    pub xcond_unit: String,
    #[serde(default)]
    pub ycond: Option<f64>,
    #[serde(default)]
    pub ycond_unit: String,
    pub thickness: f64,
    pub thickness_unit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshEntry {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub active: Flag,
    #[serde(default)]
    pub xsize: Option<i64>,
    #[serde(default)]
    pub ysize: Option<i64>,
    #[serde(default, rename = "inputFile")]
    pub input_file: String,
    /// Physical pitch of one cell, e.g. `"1mm"`.
    #[serde(default)]
    pub cell_size: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverEntry {
    #[serde(rename = "solverName")]
    pub solver_name: String,
    #[serde(default)]
    pub active: Flag,
    #[serde(default)]
    pub max_iterations: Option<usize>,
    #[serde(default)]
    pub rel_tolerance: Option<f64>,
    #[serde(default)]
    pub abs_tolerance: Option<f64>,
    /// SOR relaxation factor for the nodal backend.
    #[serde(default)]
    pub relaxation: Option<f64>,
    /// Base name of the exported circuit deck.
    #[serde(default)]
    pub simbasename: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverFlag {
    pub flag: String,
    #[serde(default)]
    pub setting: Flag,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverSection {
    #[serde(default, rename = "solverFlags")]
    pub solver_flags: Vec<SolverFlag>,
    #[serde(default)]
    pub solvers: Vec<SolverEntry>,
}

impl SolverSection {
    pub fn flag(&self, name: &str) -> bool {
        self.solver_flags
            .iter()
            .any(|f| f.flag == name && f.setting.is_set())
    }
}

/// Channel lists for one sink family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkLists {
    #[serde(default)]
    pub png: Vec<String>,
    #[serde(default)]
    pub interactive: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputsRecord {
    #[serde(default)]
    pub active: Flag,
    #[serde(default)]
    pub mesh: SinkLists,
    #[serde(default)]
    pub deltamesh: SinkLists,
    #[serde(default)]
    pub maskedmesh: SinkLists,
    #[serde(default, rename = "maskLayer")]
    pub mask_layer: String,
}

/// Boundary condition as written in a run document.
///
/// `target` is `edge:<left|right|top|bottom>`, `face:<top|bottom>`,
/// `layer:<name>`, `via:<name>` or `tag:<name>`. Exactly one of
/// `temperature` (C) and `heat_flux` (W/m^2) is given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundaryRecord {
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub heat_flux: Option<f64>,
    /// Coupling conductance in W/K per node.
    #[serde(default)]
    pub coupling: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathRecord {
    pub source: String,
    pub sink: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacitanceRecord {
    /// Time step in seconds.
    pub dt: f64,
    pub initial_temperature: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Explicit isotherm levels (C).
    #[serde(default)]
    pub isotherms: Vec<f64>,
    /// Number of evenly spaced levels when no explicit ones are given.
    #[serde(default)]
    pub isotherm_count: Option<usize>,
    #[serde(default)]
    pub path: Option<PathRecord>,
    #[serde(default)]
    pub capacitance: Option<CapacitanceRecord>,
    #[serde(default)]
    pub time_limit_ms: Option<u64>,
}

/// A layer section given as an array or as a keyed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayerSection {
    Ordered(Vec<LayerRecord>),
    Keyed(BTreeMap<String, LayerRecord>),
}

impl Default for LayerSection {
    fn default() -> Self {
        Self::Ordered(Vec::new())
    }
}

impl LayerSection {
    /// Records in declaration order, names filled from keys.
    pub fn records(&self, section: &'static str) -> Result<Vec<LayerRecord>, ConfigError> {
        match self {
            Self::Ordered(v) => Ok(v.clone()),
            Self::Keyed(map) => {
                let keyed = map
                    .iter()
                    .map(|(name, r)| (name.as_str(), r.seq, r))
                    .collect::<Vec<_>>();
                order_by_seq(section, keyed, |name, r| LayerRecord {
                    name: name.to_string(),
                    ..r.clone()
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ViaSection {
    Ordered(Vec<ViaRecord>),
    Keyed(BTreeMap<String, ViaRecord>),
}

impl Default for ViaSection {
    fn default() -> Self {
        Self::Ordered(Vec::new())
    }
}

impl ViaSection {
    pub fn records(&self) -> Result<Vec<ViaRecord>, ConfigError> {
        match self {
            Self::Ordered(v) => Ok(v.clone()),
            Self::Keyed(map) => {
                let keyed = map
                    .iter()
                    .map(|(name, r)| (name.as_str(), r.seq, r))
                    .collect::<Vec<_>>();
                order_by_seq("Vias", keyed, |name, r| ViaRecord {
                    name: name.to_string(),
                    ..r.clone()
                })
            }
        }
    }
}

fn order_by_seq<R, T>(
    section: &'static str,
    mut keyed: Vec<(&str, Option<i64>, &R)>,
    rebuild: impl Fn(&str, &R) -> T,
) -> Result<Vec<T>, ConfigError> {
    for (name, seq, _) in &keyed {
        if seq.is_none() {
            return Err(ConfigError::MissingField {
                entity: format!("{section}.{name}"),
                field: "seq",
            });
        }
    }
    keyed.sort_by_key(|(name, seq, _)| (*seq, *name));
    for pair in keyed.windows(2) {
        if pair[0].1 == pair[1].1 {
            return Err(ConfigError::DuplicateName {
                section,
                name: format!("seq {} ({} and {})", pair[0].1.unwrap_or(0), pair[0].0, pair[1].0),
            });
        }
    }
    Ok(keyed.into_iter().map(|(name, _, r)| rebuild(name, r)).collect())
}

/// Ordered view: `Stackup` + `Embedded` + `Vias` arrays.
pub fn ordered_view(
    stack: &[LayerRecord],
    embedded: &[LayerRecord],
    vias: &[ViaRecord],
) -> Result<StackupDescription, ConfigError> {
    let description = StackupDescription::new(
        stack
            .iter()
            .map(LayerSpec::stack_from_record)
            .collect::<Result<_, _>>()?,
        embedded
            .iter()
            .map(LayerSpec::from_record)
            .collect::<Result<_, _>>()?,
        vias.iter().map(ViaSpec::from_record).collect::<Result<_, _>>()?,
    );
    description.validate_names()?;
    Ok(description)
}

/// Keyed-object view: `name -> record` maps ordered by `seq`.
pub fn keyed_view(
    stack: &BTreeMap<String, LayerRecord>,
    embedded: &BTreeMap<String, LayerRecord>,
    vias: &BTreeMap<String, ViaRecord>,
) -> Result<StackupDescription, ConfigError> {
    ordered_view(
        &LayerSection::Keyed(stack.clone()).records("Stackup")?,
        &LayerSection::Keyed(embedded.clone()).records("Embedded")?,
        &ViaSection::Keyed(vias.clone()).records()?,
    )
}

/// Legacy view: each `layer_matl` entry is a material and a stack layer of
/// the same name. The format has no through-plane value, so `zz` takes the
/// `x` conductivity.
pub fn legacy_view(
    records: &[LegacyLayerRecord],
) -> crate::Result<(MaterialCatalog, StackupDescription)> {
    let mut catalog = MaterialCatalog::new();
    let mut stack = Vec::with_capacity(records.len());
    for r in records {
        let kx = require(
            QuantityKind::Conductivity,
            &format!("{}{}", r.xcond, r.xcond_unit),
            &r.name,
            "xcond",
        )?;
        let ky = match r.ycond {
            Some(y) => require(
                QuantityKind::Conductivity,
                &format!("{}{}", y, r.ycond_unit),
                &r.name,
                "ycond",
            )?,
            None => kx,
        };
        let thickness = require(
            QuantityKind::Length,
            &format!("{}{}", r.thickness, r.thickness_unit),
            &r.name,
            "thickness",
        )?;
        let phase = match r.kind.as_str() {
            "" => PhaseType::Solid,
            other => PhaseType::from_name(other).ok_or_else(|| {
                crate::error::ResolutionError::InvalidMaterialType {
                    material: r.name.clone(),
                    kind: other.to_string(),
                }
            })?,
        };
        catalog.add(
            Material::new(&r.name, phase).with_conductivity(Conductivity::new(kx, ky, kx)),
        )?;
        stack.push(LayerSpec::new(&r.name, &r.name, thickness));
    }
    let description = StackupDescription::new(stack, Vec::new(), Vec::new());
    description.validate_names()?;
    Ok((catalog, description))
}

/// Picks the single active mesh entry.
pub fn select_active_mesh(entries: &[MeshEntry]) -> Result<MeshSpec, ConfigError> {
    let entry = single_active(
        "mesh",
        entries,
        |e| e.active,
        |e| format!("{} ({})", e.title, e.kind),
    )?;
    let entity = if entry.title.is_empty() {
        entry.kind.clone()
    } else {
        entry.title.clone()
    };
    let cell_size =
        normalize(QuantityKind::Length, &entry.cell_size, &entity, "cell_size")?
            .unwrap_or(DEFAULT_CELL_SIZE);
    let source = match entry.kind.as_str() {
        "tiny" => MeshSource::Tiny,
        "scalable" => MeshSource::Scalable {
            xsize: entry.xsize.ok_or_else(|| ConfigError::MissingField {
                entity: entity.clone(),
                field: "xsize",
            })?,
            ysize: entry.ysize.ok_or_else(|| ConfigError::MissingField {
                entity: entity.clone(),
                field: "ysize",
            })?,
        },
        "png" | "image" => {
            if entry.input_file.is_empty() {
                return Err(ConfigError::MissingField {
                    entity,
                    field: "inputFile",
                });
            }
            MeshSource::Image {
                path: entry.input_file.clone(),
                color_map: ColorMap::default_table(),
            }
        }
        other => {
            return Err(ConfigError::UnknownKind {
                entity,
                field: "mesh type",
                kind: other.to_string(),
            });
        }
    };
    Ok(MeshSpec {
        title: entity,
        cell_size,
        source,
    })
}

/// Picks the single active solver entry.
pub fn select_active_solver(entries: &[SolverEntry]) -> crate::Result<SolverChoice> {
    let active: Vec<&SolverEntry> = entries.iter().filter(|e| e.active.is_set()).collect();
    match active.as_slice() {
        [] => Err(SolveError::UnknownSolver("<no active solver>".to_string()).into()),
        [entry] => Ok(SolverChoice::from_entry(entry)?),
        many => Err(ConfigError::MultipleActiveEntries {
            section: "solvers",
            names: many.iter().map(|e| e.solver_name.clone()).collect(),
        }
        .into()),
    }
}

fn single_active<'a, T>(
    section: &'static str,
    entries: &'a [T],
    active: impl Fn(&T) -> Flag,
    label: impl Fn(&T) -> String,
) -> Result<&'a T, ConfigError> {
    let chosen: Vec<&T> = entries.iter().filter(|e| active(e).is_set()).collect();
    match chosen.as_slice() {
        [] => Err(ConfigError::NoActiveEntry { section }),
        [one] => Ok(*one),
        many => Err(ConfigError::MultipleActiveEntries {
            section,
            names: many.iter().map(|e| label(e)).collect(),
        }),
    }
}

/// A whole run document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default, rename = "Materials")]
    pub materials: Vec<MaterialRecord>,
    #[serde(default, rename = "Stackup")]
    pub stackup: LayerSection,
    #[serde(default, rename = "Embedded")]
    pub embedded: LayerSection,
    #[serde(default, rename = "Vias")]
    pub vias: ViaSection,
    #[serde(default)]
    pub layer_matl: Vec<LegacyLayerRecord>,
    #[serde(default)]
    pub mesh: Vec<MeshEntry>,
    #[serde(default)]
    pub solver: SolverSection,
    #[serde(default)]
    pub outputs: Option<OutputsRecord>,
    #[serde(default)]
    pub boundaries: Vec<BoundaryRecord>,
    #[serde(default)]
    pub analysis: AnalysisRecord,
}

impl RunConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Material catalog and board description, from whichever view is present.
    ///
    /// The legacy list is used only when no `Stackup` section is given; its
    /// materials are merged into the `Materials` catalog.
    pub fn board(&self) -> crate::Result<(MaterialCatalog, StackupDescription)> {
        let mut catalog = MaterialCatalog::from_records(&self.materials)?;
        let stack = self.stackup.records("Stackup")?;
        if stack.is_empty() && !self.layer_matl.is_empty() {
            let (legacy, description) = legacy_view(&self.layer_matl)?;
            for material in legacy.iter() {
                catalog.add(material.clone())?;
            }
            return Ok((catalog, description));
        }
        let description = ordered_view(
            &stack,
            &self.embedded.records("Embedded")?,
            &self.vias.records()?,
        )?;
        Ok((catalog, description))
    }

    pub fn mesh_spec(&self) -> Result<MeshSpec, ConfigError> {
        select_active_mesh(&self.mesh)
    }

    pub fn solver_choice(&self) -> crate::Result<SolverChoice> {
        select_active_solver(&self.solver.solvers)
    }

    pub fn boundary_conditions(&self) -> Result<Vec<BoundaryCondition>, ConfigError> {
        self.boundaries
            .iter()
            .map(BoundaryCondition::from_record)
            .collect()
    }

    pub fn solve_options(&self) -> SolveOptions {
        let a = &self.analysis;
        let isotherms = if !a.isotherms.is_empty() {
            IsothermSpec::Levels(a.isotherms.clone())
        } else if let Some(n) = a.isotherm_count {
            IsothermSpec::Count(n)
        } else {
            IsothermSpec::None
        };
        SolveOptions {
            isotherms,
            path: a
                .path
                .as_ref()
                .map(|p| ThermalPath::new(&p.source, &p.sink)),
            capacitance: a.capacitance.as_ref().map(|c| Capacitance {
                dt: c.dt,
                initial_temperature: c.initial_temperature,
            }),
        }
    }

    /// Output plan, or `None` when outputs are absent or inactive.
    pub fn output_plan(&self) -> Result<Option<OutputPlan>, ConfigError> {
        match &self.outputs {
            Some(record) if record.active.is_set() => Ok(Some(OutputPlan::from_record(record)?)),
            _ => Ok(None),
        }
    }

    /// Whether the document asks for a Matrix Market dump of the system.
    pub fn wants_matrix_market(&self) -> bool {
        self.solver.flag("matrixMarket")
    }
}

impl BoundaryCondition {
    pub fn from_record(record: &BoundaryRecord) -> Result<Self, ConfigError> {
        let target =
            BoundaryTarget::parse(&record.target).ok_or_else(|| ConfigError::UnknownKind {
                entity: record.name.clone(),
                field: "boundary target",
                kind: record.target.clone(),
            })?;
        let bc = match (record.temperature, record.heat_flux) {
            (Some(t), None) => BoundaryCondition::fixed_temperature(&record.name, target, t),
            (None, Some(q)) => BoundaryCondition::fixed_flux(&record.name, target, q),
            _ => {
                return Err(ConfigError::MissingField {
                    entity: record.name.clone(),
                    field: "temperature or heat_flux (exactly one)",
                });
            }
        };
        Ok(match record.coupling {
            Some(g) => bc.with_coupling(g),
            None => bc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERED: &str = r#"{
        "Materials": [
            { "name":"Cu", "conductivity":"385W/m-K", "type":"solid" },
            { "name":"Prepreg", "conductivity":"1.059W/m-K", "type":"deformable" }
        ],
        "Stackup": [
            { "name":"topside_cu", "matl":"Cu", "thickness":"1.2mil", "type":"Rigid" },
            { "name":"topside_prepreg", "matl":"Prepreg", "thickness":"12mil", "type":"Fill" },
            { "name":"side2_cu", "matl":"Cu", "thickness":"1.2mil", "type":"Rigid",
              "displaces":"topside_prepreg", "coverage":"0.5" }
        ],
        "Vias": [
            { "name":"thru", "matl":"Cu", "from":"topside_cu", "to":"side2_cu" }
        ],
        "mesh": [
            { "title":"Tiny", "type":"tiny", "active":0 },
            { "title":"Scalable", "type":"scalable", "xsize":5, "ysize":4, "active":1 }
        ],
        "solver": { "solvers": [
            { "solverName":"Spice", "active":0 },
            { "solverName":"Aztec", "active":1 }
        ] }
    }"#;

    #[test]
    fn test_ordered_document() {
        let config = RunConfig::from_json_str(ORDERED).unwrap();
        let (catalog, desc) = config.board().unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(desc.stack.len(), 3);
        assert_eq!(desc.stack[2].displaces, vec!["topside_prepreg".to_string()]);
        assert_eq!(desc.vias[0].from, "topside_cu");

        let mesh = config.mesh_spec().unwrap();
        assert_eq!(mesh.title, "Scalable");
        assert!(matches!(mesh.source, MeshSource::Scalable { xsize: 5, ysize: 4 }));
        assert_eq!(mesh.cell_size, DEFAULT_CELL_SIZE);

        assert!(matches!(
            config.solver_choice().unwrap(),
            SolverChoice::Iterative(_)
        ));
    }

    #[test]
    fn test_keyed_view_matches_ordered_view() {
        let keyed = r#"{
            "Stackup": {
                "side2_cu": { "matl":"Cu", "thickness":"1.2mil", "type":"Rigid",
                              "displaces":["topside_prepreg"], "coverage":0.5, "seq":2 },
                "topside_cu": { "matl":"Cu", "thickness":"1.2mil", "type":"Rigid", "seq":0 },
                "topside_prepreg": { "matl":"Prepreg", "thickness":"12mil", "type":"Fill", "seq":1 }
            }
        }"#;
        let keyed = RunConfig::from_json_str(keyed).unwrap();
        let ordered = RunConfig::from_json_str(ORDERED).unwrap();
        let a = keyed.stackup.records("Stackup").unwrap();
        let b = ordered.stackup.records("Stackup").unwrap();
        let names_a: Vec<_> = a.iter().map(|r| r.name.as_str()).collect();
        let names_b: Vec<_> = b.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names_a, names_b);
        assert_eq!(
            LayerSpec::from_record(&a[2]).unwrap().coverage,
            LayerSpec::from_record(&b[2]).unwrap().coverage
        );
    }

    #[test]
    fn test_keyed_view_requires_seq() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), LayerRecord::default());
        let err = keyed_view(&map, &BTreeMap::new(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "seq", .. }));
    }

    #[test]
    fn test_legacy_view() {
        let doc = r#"{ "layer_matl": [
            { "name":"fr4", "type":"solid", "xcond":1.0, "xcond_unit":"W/mK",
              "ycond":1.0, "ycond_unit":"W/mK", "thickness":59.0, "thickness_unit":"mil" },
            { "name":"copper", "type":"solid", "xcond":401.0, "xcond_unit":"W/mK",
              "thickness":1.2, "thickness_unit":"mil" }
        ] }"#;
        let config = RunConfig::from_json_str(doc).unwrap();
        let (catalog, desc) = config.board().unwrap();
        assert_eq!(desc.stack.len(), 2);
        let k = catalog.lookup("copper").unwrap().conductivity.unwrap();
        assert_eq!(k.yy, 401.0);
        assert!((desc.stack[0].thickness.unwrap() - 59.0 * 25.4e-6).abs() < 1e-12);
    }

    #[test]
    fn test_active_selection_errors() {
        let none = [MeshEntry {
            kind: "tiny".to_string(),
            ..Default::default()
        }];
        assert!(matches!(
            select_active_mesh(&none),
            Err(ConfigError::NoActiveEntry { .. })
        ));

        let two = [
            MeshEntry {
                kind: "tiny".to_string(),
                active: Flag::Int(1),
                ..Default::default()
            },
            MeshEntry {
                kind: "tiny".to_string(),
                active: Flag::Bool(true),
                ..Default::default()
            },
        ];
        assert!(matches!(
            select_active_mesh(&two),
            Err(ConfigError::MultipleActiveEntries { .. })
        ));

        let eigen = [SolverEntry {
            solver_name: "Eigen".to_string(),
            active: Flag::Int(1),
            ..Default::default()
        }];
        let err = select_active_solver(&eigen).unwrap_err();
        assert!(err.to_string().contains("Eigen"), "{err}");
        assert!(select_active_solver(&[]).is_err());
    }

    #[test]
    fn test_duplicate_via_names() {
        let via = ViaRecord {
            name: "thru".to_string(),
            matl: "Cu".to_string(),
            from: "a".to_string(),
            to: "b".to_string(),
            seq: None,
        };
        let err = ordered_view(&[], &[], &[via.clone(), via]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName { section: "Vias", .. }));
    }

    #[test]
    fn test_boundary_record() {
        let record = BoundaryRecord {
            name: "hot".to_string(),
            target: "edge:left".to_string(),
            temperature: Some(100.0),
            ..Default::default()
        };
        let bc = BoundaryCondition::from_record(&record).unwrap();
        assert!(bc.is_fixed_temperature());

        let both = BoundaryRecord {
            temperature: Some(1.0),
            heat_flux: Some(1.0),
            ..record
        };
        assert!(BoundaryCondition::from_record(&both).is_err());
    }
}
