//! Steady-state thermal analysis of multi-layer printed circuit boards.
//!
//! A board stackup is resolved into per-region vertical columns, meshed on a
//! planar grid, and solved as a conductance network for node temperatures.

pub mod error;
pub mod io;
pub mod sim;
pub mod stackup;
pub mod units;

pub use error::{Result, ThermalError};
pub use io::RunConfig;
pub use sim::heat_transfer::{BoundaryCondition, BoundaryTarget, MeshSpec, NodeField, SolverChoice};
pub use sim::materials::{Conductivity, Material, MaterialCatalog, PhaseType};
pub use sim::run::{RunInputs, RunOutput, run, run_with};
pub use stackup::{Stackup, StackupDescription, resolve};
