use std::collections::BTreeMap;

use crate::error::ResolutionError;
use crate::sim::heat_transfer::mesh::{EdgeSide, Mesh, MeshNode};
use crate::sim::heat_transfer::mesh_2d::ISO_TAG;
use crate::stackup::column::conductance;

/// Set point of the default boundary on `iso`-tagged nodes (C).
pub const DEFAULT_ISO_TEMPERATURE: f64 = 25.0;

/// Board face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaceSide {
    Top,
    Bottom,
}

/// Nodes a boundary condition applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BoundaryTarget {
    /// Cells along one side of the grid, coupled through half a cell in-plane.
    Edge(EdgeSide),
    /// Every node, coupled through the half column to the face.
    Face(FaceSide),
    /// Shield layer, coupled from the mid-plane to the layer mid-depth.
    Layer(String),
    /// Footprint nodes of a via, coupled through the via barrel.
    Via(String),
    /// Nodes tagged by the mesh source.
    Tag(String),
}

impl BoundaryTarget {
    /// Parses `kind:name`, e.g. `edge:left` or `layer:GND`.
    pub fn parse(text: &str) -> Option<Self> {
        let (kind, name) = text.split_once(':')?;
        let name = name.trim();
        match kind.trim() {
            "edge" => EdgeSide::from_name(name).map(Self::Edge),
            "face" => match name {
                "top" => Some(Self::Face(FaceSide::Top)),
                "bottom" => Some(Self::Face(FaceSide::Bottom)),
                _ => None,
            },
            "layer" if !name.is_empty() => Some(Self::Layer(name.to_string())),
            "via" if !name.is_empty() => Some(Self::Via(name.to_string())),
            "tag" if !name.is_empty() => Some(Self::Tag(name.to_string())),
            _ => None,
        }
    }
}

/// What a boundary condition imposes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundaryKind {
    /// Temperature in C.
    FixedTemperature { temperature: f64 },
    /// Heat flux in W/m^2, positive into the board.
    FixedFlux { heat_flux: f64 },
}

/// How one node is tied to a fixed-temperature boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Coupling {
    /// Node temperature equals the set point.
    Held,
    /// Norton coupling in W/K.
    Conductance(f64),
}

/// Boundary condition of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryCondition {
    pub name: String,
    pub target: BoundaryTarget,
    pub kind: BoundaryKind,
    /// Explicit per-node coupling (W/K) overriding the geometric one.
    pub coupling: Option<f64>,
}

impl BoundaryCondition {
    pub fn fixed_temperature(name: &str, target: BoundaryTarget, temperature: f64) -> Self {
        Self {
            name: name.to_string(),
            target,
            kind: BoundaryKind::FixedTemperature { temperature },
            coupling: None,
        }
    }

    pub fn fixed_flux(name: &str, target: BoundaryTarget, heat_flux: f64) -> Self {
        Self {
            name: name.to_string(),
            target,
            kind: BoundaryKind::FixedFlux { heat_flux },
            coupling: None,
        }
    }

    pub fn with_coupling(mut self, conductance: f64) -> Self {
        self.coupling = Some(conductance);
        self
    }

    /// `iso`-tagged nodes held at 25 C.
    pub fn default_iso() -> Self {
        Self::fixed_temperature(
            ISO_TAG,
            BoundaryTarget::Tag(ISO_TAG.to_string()),
            DEFAULT_ISO_TEMPERATURE,
        )
    }

    pub fn is_fixed_temperature(&self) -> bool {
        matches!(self.kind, BoundaryKind::FixedTemperature { .. })
    }

    pub fn set_point(&self) -> Option<f64> {
        match self.kind {
            BoundaryKind::FixedTemperature { temperature } => Some(temperature),
            BoundaryKind::FixedFlux { .. } => None,
        }
    }

    /// Solver nodes this condition touches, with their coupling.
    ///
    /// Nodes whose geometric coupling is zero are left out. For flux
    /// conditions the coupling is unused and every matched node is listed.
    pub fn node_couplings(&self, mesh: &Mesh) -> Result<Vec<(usize, Coupling)>, ResolutionError> {
        let area = mesh.cell_area();
        let unresolved = |role: &'static str, anchor: &str| ResolutionError::UnresolvedAnchor {
            entity: format!("boundary '{}'", self.name),
            anchor: anchor.to_string(),
            role,
        };

        let geometric: Vec<(usize, Coupling)> = match &self.target {
            BoundaryTarget::Edge(side) => self.collect(mesh, |n| {
                mesh.is_on_side(n, *side).then(|| {
                    let gs = match side {
                        EdgeSide::Left | EdgeSide::Right => n.coefficients.sheet_x,
                        EdgeSide::Top | EdgeSide::Bottom => n.coefficients.sheet_y,
                    };
                    2.0 * gs
                })
            }),
            BoundaryTarget::Face(side) => self.collect(mesh, |n| {
                let r = match side {
                    FaceSide::Top => n.coefficients.r_top,
                    FaceSide::Bottom => n.coefficients.r_bottom,
                };
                Some(area * conductance(r))
            }),
            BoundaryTarget::Layer(layer) => {
                if mesh.stackup.placement(layer).is_none() {
                    return Err(unresolved("layer", layer));
                }
                let mut cache = BTreeMap::new();
                self.collect(mesh, |n| {
                    let r = *cache
                        .entry((n.column, n.via))
                        .or_insert_with(|| mesh.stackup.resistance_to_layer(n.column, n.via, layer));
                    r.map(|r| area * conductance(r))
                })
            }
            BoundaryTarget::Via(via) => {
                let index = mesh
                    .stackup
                    .via_index(via)
                    .ok_or_else(|| unresolved("via", via))?;
                let path = &mesh.stackup.vias[index];
                let g = area * path.conductivity.zz / path.span();
                self.collect(mesh, |n| (n.via == Some(index)).then_some(g))
            }
            BoundaryTarget::Tag(tag) => {
                let t = mesh.tag_index(tag).ok_or_else(|| unresolved("tag", tag))?;
                // Tagged nodes are held unless a coupling is given.
                return Ok(self.tagged(mesh, t));
            }
        };

        if !self.is_fixed_temperature() {
            return Ok(geometric);
        }
        Ok(geometric
            .into_iter()
            .filter_map(|(i, c)| match (self.coupling, c) {
                (Some(g), _) => Some((i, Coupling::Conductance(g))),
                (None, Coupling::Conductance(g)) if g.is_infinite() => Some((i, Coupling::Held)),
                (None, Coupling::Conductance(g)) if g <= 0.0 => None,
                (None, c) => Some((i, c)),
            })
            .collect())
    }

    fn collect(
        &self,
        mesh: &Mesh,
        mut coupling: impl FnMut(&MeshNode) -> Option<f64>,
    ) -> Vec<(usize, Coupling)> {
        mesh.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.hole)
            .filter_map(|(cell, n)| {
                let g = coupling(n)?;
                Some((mesh.solve_index(cell)?, Coupling::Conductance(g)))
            })
            .collect()
    }

    fn tagged(&self, mesh: &Mesh, tag: usize) -> Vec<(usize, Coupling)> {
        let coupling = match self.coupling {
            Some(g) => Coupling::Conductance(g),
            None => Coupling::Held,
        };
        mesh.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.hole && n.tags.contains(&tag))
            .filter_map(|(cell, _)| mesh.solve_index(cell).map(|i| (i, coupling)))
            .collect()
    }

    /// Area through which a flux condition enters one node (m^2).
    pub fn flux_area(&self, mesh: &Mesh) -> f64 {
        match self.target {
            BoundaryTarget::Edge(_) => mesh.cell_size * mesh.stackup.total_thickness,
            _ => mesh.cell_area(),
        }
    }
}
