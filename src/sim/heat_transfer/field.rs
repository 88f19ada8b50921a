//! Per-node output channels derived from a solved system.
//!
//! Every channel is a `height x width` array indexed `[[y, x]]`. Hole nodes
//! hold NaN except in `holeflag` (1) and `spicenodenum` (0, ground).

use ndarray as nd;
use tracing::warn;

use crate::error::ResolutionError;
use crate::sim::heat_transfer::boundary::{BoundaryCondition, BoundaryKind, Coupling};
use crate::sim::heat_transfer::mesh::Mesh;
use crate::sim::heat_transfer::solver::{BackendSolution, SolveOptions, SolverStats};
use crate::sim::heat_transfer::solver_nodal::KELVIN;
use crate::sim::heat_transfer::system::LinearSystem;

/// Output channel, in slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Fixed-temperature set point on boundary nodes.
    Iso,
    /// Injected heat (W).
    Heat,
    /// Thermal resistance to the path sink (K/W).
    Resis,
    /// Temperature (C).
    Deg,
    /// Rise above the coldest fixed-temperature boundary (K).
    IsoDeg,
    /// Node voltage of the circuit equivalent (K).
    SpiceDeg,
    /// Temperature normalized to [0, 1].
    NpDeg,
    /// Boundary coupling conductance (W/K), infinite on held nodes.
    BoundCond,
    /// 1-based isotherm level a node lies on.
    IsoNode,
    IsoFlag,
    /// Circuit node number, 0 for holes.
    SpiceNodeNum,
    HoleFlag,
}

impl Channel {
    pub const ALL: [Channel; 12] = [
        Channel::Iso,
        Channel::Heat,
        Channel::Resis,
        Channel::Deg,
        Channel::IsoDeg,
        Channel::SpiceDeg,
        Channel::NpDeg,
        Channel::BoundCond,
        Channel::IsoNode,
        Channel::IsoFlag,
        Channel::SpiceNodeNum,
        Channel::HoleFlag,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Channel::Iso => "iso",
            Channel::Heat => "heat",
            Channel::Resis => "resis",
            Channel::Deg => "deg",
            Channel::IsoDeg => "isodeg",
            Channel::SpiceDeg => "spicedeg",
            Channel::NpDeg => "npdeg",
            Channel::BoundCond => "boundCond",
            Channel::IsoNode => "isonode",
            Channel::IsoFlag => "isoflag",
            Channel::SpiceNodeNum => "spicenodenum",
            Channel::HoleFlag => "holeflag",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn slot(self) -> usize {
        self as usize
    }
}

/// Isotherm levels to mark.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum IsothermSpec {
    #[default]
    None,
    /// Explicit temperatures (C).
    Levels(Vec<f64>),
    /// Evenly spaced levels strictly inside the solved range.
    Count(usize),
}

impl IsothermSpec {
    pub fn levels(&self, min: f64, max: f64) -> Vec<f64> {
        match self {
            IsothermSpec::None => Vec::new(),
            IsothermSpec::Levels(levels) => levels.clone(),
            IsothermSpec::Count(n) => (1..=*n)
                .map(|k| min + (max - min) * k as f64 / (*n + 1) as f64)
                .collect(),
        }
    }
}

/// Pair of boundary conditions a resistance is reported between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThermalPath {
    pub source: String,
    pub sink: String,
}

impl ThermalPath {
    pub fn new(source: &str, sink: &str) -> Self {
        Self {
            source: source.to_string(),
            sink: sink.to_string(),
        }
    }
}

/// Power bookkeeping of a solve (W).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyBalance {
    /// Heat sources plus flux conditions.
    pub injected: f64,
    /// Power leaving through fixed-temperature boundaries.
    pub leaving: f64,
    /// Power going into heat capacity.
    pub stored: f64,
}

impl EnergyBalance {
    pub fn imbalance(&self) -> f64 {
        self.injected - self.leaving - self.stored
    }

    pub fn relative_imbalance(&self) -> f64 {
        let scale = self.injected.abs().max(self.leaving.abs()).max(1e-30);
        self.imbalance().abs() / scale
    }
}

/// Solved temperatures and every derived channel.
#[derive(Debug, Clone)]
pub struct NodeField {
    pub title: String,
    pub width: usize,
    pub height: usize,
    channels: Vec<nd::Array2<f64>>,
    /// Temperatures (C) in solver order.
    pub temperatures: Vec<f64>,
    /// `(T_source - T_sink) / Q` of the configured path (K/W).
    pub path_resistance: Option<f64>,
    pub isotherm_levels: Vec<f64>,
    /// Power leaving through each boundary condition.
    pub boundary_flows: Vec<(String, f64)>,
    pub energy: EnergyBalance,
    pub stats: SolverStats,
    pub spice_deck: Option<String>,
}

impl NodeField {
    pub fn derive(
        mesh: &Mesh,
        conditions: &[BoundaryCondition],
        system: &LinearSystem,
        solution: BackendSolution,
        options: &SolveOptions,
        stats: SolverStats,
    ) -> crate::Result<Self> {
        let (w, h) = (mesh.width, mesh.height);
        let t = solution.temperatures;
        let mut channels: Vec<nd::Array2<f64>> = Channel::ALL
            .iter()
            .map(|_| nd::Array2::from_elem((h, w), f64::NAN))
            .collect();

        let (t_min, t_max) = t
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        let coldest = conditions
            .iter()
            .filter_map(BoundaryCondition::set_point)
            .reduce(f64::min)
            .unwrap_or(t_min);
        let range = t_max - t_min;

        let boundary_flows = system.boundary_outflows(&t);
        let stored = system.storage.as_ref().map_or(0.0, |s| {
            s.iter()
                .zip(&t)
                .map(|(c, ti)| c * (ti - system.previous_temperature))
                .sum()
        });
        let energy = EnergyBalance {
            injected: system.injected.iter().sum(),
            leaving: system
                .loads
                .iter()
                .zip(&boundary_flows)
                .filter(|(load, _)| matches!(load.kind, BoundaryKind::FixedTemperature { .. }))
                .map(|(_, (_, q))| q)
                .sum(),
            stored,
        };

        let path = match &options.path {
            None => None,
            Some(p) => Some(path_reference(conditions, system, &boundary_flows, &t, p)?),
        };
        let path_resistance = path.and_then(|(t_source, t_sink, q)| {
            if q.abs() < 1e-300 {
                warn!("no heat leaves through the path sink");
                None
            } else {
                Some((t_source - t_sink) / q)
            }
        });

        // Couplings and set points per node; the first condition wins.
        let n = t.len();
        let mut set_point = vec![None; n];
        let mut coupling = vec![0.0_f64; n];
        for load in &system.loads {
            let BoundaryKind::FixedTemperature { temperature } = load.kind else {
                continue;
            };
            for (i, c) in &load.nodes {
                set_point[*i].get_or_insert(temperature);
                coupling[*i] += match c {
                    Coupling::Held => f64::INFINITY,
                    Coupling::Conductance(g) => *g,
                };
            }
        }

        let levels = options.isotherms.levels(t_min, t_max);
        let mut level_of = vec![0usize; n];
        for e in &mesh.edges {
            let (Some(a), Some(b)) = (mesh.solve_index(e.a), mesh.solve_index(e.b)) else {
                continue;
            };
            for (k, level) in levels.iter().enumerate() {
                // The node on the warm side of a crossing lies on the level.
                let hot = if t[a] >= *level && t[b] < *level {
                    a
                } else if t[b] >= *level && t[a] < *level {
                    b
                } else {
                    continue;
                };
                level_of[hot] = level_of[hot].max(k + 1);
            }
        }

        let sink_reference = path
            .zip(path_resistance)
            .map(|((_, t_sink, q), _)| (t_sink, q));
        for (cell, node) in mesh.nodes.iter().enumerate() {
            let idx = [node.y, node.x];
            let Some(i) = mesh.solve_index(cell) else {
                channels[Channel::HoleFlag.slot()][idx] = 1.0;
                channels[Channel::SpiceNodeNum.slot()][idx] = 0.0;
                continue;
            };
            let ti = t[i];
            let mut put = |c: Channel, v: f64| channels[c.slot()][idx] = v;
            put(Channel::Iso, set_point[i].unwrap_or(0.0));
            put(Channel::Heat, system.injected[i]);
            put(
                Channel::Resis,
                match sink_reference {
                    Some((t_sink, q)) => (ti - t_sink) / q,
                    None => {
                        let gs = node.coefficients.sheet_x;
                        if gs > 0.0 { 1.0 / gs } else { f64::INFINITY }
                    }
                },
            );
            put(Channel::Deg, ti);
            put(Channel::IsoDeg, ti - coldest);
            put(Channel::SpiceDeg, ti + KELVIN);
            put(
                Channel::NpDeg,
                if range > 0.0 { (ti - t_min) / range } else { 0.0 },
            );
            put(Channel::BoundCond, coupling[i]);
            put(Channel::IsoNode, level_of[i] as f64);
            put(Channel::IsoFlag, if level_of[i] > 0 { 1.0 } else { 0.0 });
            put(Channel::SpiceNodeNum, (i + 1) as f64);
            put(Channel::HoleFlag, 0.0);
        }

        Ok(Self {
            title: mesh.title.clone(),
            width: w,
            height: h,
            channels,
            temperatures: t,
            path_resistance,
            isotherm_levels: levels,
            boundary_flows,
            energy,
            stats,
            spice_deck: solution.deck,
        })
    }

    pub fn channel(&self, channel: Channel) -> &nd::Array2<f64> {
        &self.channels[channel.slot()]
    }

    pub fn value(&self, channel: Channel, x: usize, y: usize) -> f64 {
        self.channels[channel.slot()][[y, x]]
    }

    /// Temperature at a grid position, `None` on holes.
    pub fn temperature(&self, x: usize, y: usize) -> Option<f64> {
        let v = self.value(Channel::Deg, x, y);
        (!v.is_nan()).then_some(v)
    }

    pub fn max_temperature(&self) -> f64 {
        self.temperatures.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn min_temperature(&self) -> f64 {
        self.temperatures.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Outflow of a named boundary condition (W).
    pub fn boundary_flow(&self, name: &str) -> Option<f64> {
        self.boundary_flows
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, q)| *q)
    }
}

/// Reference temperatures of the path ends and the heat leaving the sink.
fn path_reference(
    conditions: &[BoundaryCondition],
    system: &LinearSystem,
    flows: &[(String, f64)],
    t: &[f64],
    path: &ThermalPath,
) -> Result<(f64, f64, f64), ResolutionError> {
    let find = |name: &str, role: &'static str| {
        conditions
            .iter()
            .position(|bc| bc.name == name)
            .ok_or_else(|| ResolutionError::UnresolvedAnchor {
                entity: "thermal path".to_string(),
                anchor: name.to_string(),
                role,
            })
    };
    let source = find(&path.source, "source")?;
    let sink = find(&path.sink, "sink")?;

    let reference = |k: usize| match conditions[k].set_point() {
        Some(temperature) => temperature,
        None => {
            let nodes = &system.loads[k].nodes;
            if nodes.is_empty() {
                f64::NAN
            } else {
                nodes.iter().map(|(i, _)| t[*i]).sum::<f64>() / nodes.len() as f64
            }
        }
    };
    Ok((reference(source), reference(sink), flows[sink].1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names_round_trip_in_slot_order() {
        for (slot, c) in Channel::ALL.into_iter().enumerate() {
            assert_eq!(c.slot(), slot);
            assert_eq!(Channel::from_name(c.name()), Some(c));
        }
        assert_eq!(Channel::from_name("boundCond"), Some(Channel::BoundCond));
        assert_eq!(Channel::from_name("boundcond"), None);
    }

    #[test]
    fn test_isotherm_levels() {
        assert!(IsothermSpec::None.levels(0.0, 10.0).is_empty());
        assert_eq!(IsothermSpec::Count(4).levels(0.0, 10.0), vec![2.0, 4.0, 6.0, 8.0]);
        assert_eq!(
            IsothermSpec::Levels(vec![30.0]).levels(0.0, 10.0),
            vec![30.0]
        );
    }

    #[test]
    fn test_energy_balance() {
        let b = EnergyBalance {
            injected: 10.0,
            leaving: 9.0,
            stored: 1.0,
        };
        assert_eq!(b.imbalance(), 0.0);
        let b = EnergyBalance {
            injected: 10.0,
            leaving: 8.0,
            stored: 0.0,
        };
        assert!((b.relative_imbalance() - 0.2).abs() < 1e-12);
    }
}
