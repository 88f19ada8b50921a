//! Circuit-equivalent nodal analysis.
//!
//! The conductance system maps onto a resistor network: every in-plane link
//! is a resistor, every coupling to a fixed temperature is a resistor to
//! ground fed by a Norton current source, and held nodes are voltage sources.
//! Voltages are absolute temperatures (K) so that ground is 0 K.

use std::fmt::Write as _;

use crate::error::SolveError;
use crate::sim::heat_transfer::solver::{BackendSolution, LinearBackend, SolveControl};
use crate::sim::heat_transfer::system::LinearSystem;

const NAME: &str = "nodal";

/// Offset between C and K.
pub const KELVIN: f64 = 273.15;

/// Configuration of the nodal backend.
#[derive(Debug, Clone, PartialEq)]
pub struct NodalConfig {
    pub max_iterations: usize,
    /// Largest voltage update (K) at which the sweep stops.
    pub tolerance: f64,
    /// Successive over-relaxation factor, in (0, 2).
    pub relaxation: f64,
    /// Title of the exported deck; no deck is built when `None`.
    pub deck_title: Option<String>,
}

impl Default for NodalConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100_000,
            tolerance: 1e-9,
            relaxation: 1.8,
            deck_title: None,
        }
    }
}

/// Circuit element. Node 0 is ground; node `i + 1` is solver node `i`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Element {
    Resistor { a: usize, b: usize, ohms: f64 },
    /// Current injected into `node` from ground.
    CurrentSource { node: usize, amps: f64 },
    /// Voltage of `node` against ground.
    VoltageSource { node: usize, volts: f64 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Netlist {
    /// Number of circuit nodes excluding ground.
    pub nodes: usize,
    pub elements: Vec<Element>,
}

impl Netlist {
    pub fn from_system(system: &LinearSystem) -> Self {
        let n = system.len();
        let mut elements = Vec::new();
        for i in 0..n {
            for (j, a) in system.matrix.row(i) {
                if j > i && a < 0.0 {
                    elements.push(Element::Resistor {
                        a: i + 1,
                        b: j + 1,
                        ohms: -1.0 / a,
                    });
                }
            }
        }
        for i in 0..n {
            if system.shunt[i] > 0.0 {
                elements.push(Element::Resistor {
                    a: i + 1,
                    b: 0,
                    ohms: 1.0 / system.shunt[i],
                });
            }
            let amps = system.rhs[i] + system.shunt[i] * KELVIN;
            if amps != 0.0 {
                elements.push(Element::CurrentSource { node: i + 1, amps });
            }
            if let Some(t) = system.fixed[i] {
                elements.push(Element::VoltageSource {
                    node: i + 1,
                    volts: t + KELVIN,
                });
            }
        }
        Self { nodes: n, elements }
    }

    /// SPICE deck for an operating-point analysis.
    pub fn to_spice(&self, title: &str) -> String {
        let mut deck = format!("* {title}\n");
        let (mut r, mut i, mut v) = (0, 0, 0);
        for e in &self.elements {
            // Writing to a String cannot fail.
            let _ = match *e {
                Element::Resistor { a, b, ohms } => {
                    r += 1;
                    writeln!(deck, "R{r} {a} {b} {ohms:e}")
                }
                Element::CurrentSource { node, amps } => {
                    i += 1;
                    writeln!(deck, "I{i} 0 {node} DC {amps:e}")
                }
                Element::VoltageSource { node, volts } => {
                    v += 1;
                    writeln!(deck, "V{v} {node} 0 DC {volts:e}")
                }
            };
        }
        deck.push_str(".op\n.end\n");
        deck
    }

    /// Solves the node voltages by successive over-relaxation.
    pub fn solve_sor(
        &self,
        config: &NodalConfig,
        initial: f64,
        control: &SolveControl,
    ) -> crate::Result<(Vec<f64>, usize, f64)> {
        let n = self.nodes;
        let mut links: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n + 1];
        let mut total = vec![0.0; n + 1];
        let mut source = vec![0.0; n + 1];
        let mut held: Vec<Option<f64>> = vec![None; n + 1];
        held[0] = Some(0.0);
        for e in &self.elements {
            match *e {
                Element::Resistor { a, b, ohms } => {
                    let g = 1.0 / ohms;
                    links[a].push((b, g));
                    links[b].push((a, g));
                    total[a] += g;
                    total[b] += g;
                }
                Element::CurrentSource { node, amps } => source[node] += amps,
                Element::VoltageSource { node, volts } => {
                    held[node].get_or_insert(volts);
                }
            }
        }

        let mut v: Vec<f64> = held.iter().map(|h| h.unwrap_or(initial)).collect();
        let w = config.relaxation;
        let mut change = f64::INFINITY;
        for iteration in 1..=config.max_iterations {
            control.check(NAME, iteration - 1)?;
            change = 0.0_f64;
            for node in 1..=n {
                if held[node].is_some() {
                    continue;
                }
                if total[node] <= 0.0 {
                    return Err(SolveError::Breakdown {
                        backend: NAME,
                        row: node - 1,
                    }
                    .into());
                }
                let inflow: f64 = links[node].iter().map(|(j, g)| g * v[*j]).sum();
                let target = (source[node] + inflow) / total[node];
                let next = (1.0 - w) * v[node] + w * target;
                change = change.max((next - v[node]).abs());
                v[node] = next;
            }
            if change <= config.tolerance {
                return Ok((v[1..].to_vec(), iteration, change));
            }
        }
        Err(SolveError::NonConvergence {
            backend: NAME,
            iterations: config.max_iterations,
            residual: change,
        }
        .into())
    }
}

#[derive(Debug, Clone)]
pub struct NodalBackend {
    config: NodalConfig,
}

impl NodalBackend {
    pub fn new(config: NodalConfig) -> Self {
        Self { config }
    }
}

impl LinearBackend for NodalBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn solve(
        &self,
        system: &LinearSystem,
        control: &SolveControl,
    ) -> crate::Result<BackendSolution> {
        let netlist = Netlist::from_system(system);
        let initial = system.previous_temperature + KELVIN;
        let (volts, iterations, residual) = netlist.solve_sor(&self.config, initial, control)?;
        Ok(BackendSolution {
            temperatures: volts.into_iter().map(|v| v - KELVIN).collect(),
            iterations,
            residual,
            deck: self
                .config
                .deck_title
                .as_deref()
                .map(|title| netlist.to_spice(title)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn divider() -> Netlist {
        // 100 C and 0 C sources across two equal resistors.
        Netlist {
            nodes: 3,
            elements: vec![
                Element::VoltageSource {
                    node: 1,
                    volts: 100.0 + KELVIN,
                },
                Element::VoltageSource {
                    node: 3,
                    volts: KELVIN,
                },
                Element::Resistor {
                    a: 1,
                    b: 2,
                    ohms: 2.0,
                },
                Element::Resistor {
                    a: 2,
                    b: 3,
                    ohms: 2.0,
                },
            ],
        }
    }

    #[test]
    fn test_divider_midpoint() {
        let (v, iterations, _) = divider()
            .solve_sor(&NodalConfig::default(), KELVIN, &SolveControl::new())
            .unwrap();
        assert!((v[1] - (50.0 + KELVIN)).abs() < 1e-6, "v2={}", v[1]);
        assert!(iterations < 200, "iterations={iterations}");
    }

    #[test]
    fn test_spice_deck() {
        let deck = divider().to_spice("divider");
        assert!(deck.starts_with("* divider\n"));
        assert!(deck.contains("V1 1 0 DC"));
        assert!(deck.contains("R2 2 3 2e0"));
        assert!(deck.ends_with(".op\n.end\n"));
    }

    #[test]
    fn test_sor_non_convergence() {
        let config = NodalConfig {
            max_iterations: 1,
            tolerance: 0.0,
            ..Default::default()
        };
        let err = divider()
            .solve_sor(&config, 0.0, &SolveControl::new())
            .unwrap_err();
        assert!(err.to_string().contains("no convergence"), "{err}");
    }
}
