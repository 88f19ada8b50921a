//! Finite-volume conduction on a planar board mesh.
//!
//! Each mesh cell is one node carrying the sheet and vertical conductances
//! of the resolved column it sits in. The solver only sees the nodal
//! system, so every backend works on the same assembled matrix.
//!
//! ```text
//! Stackup ──► build_mesh() ──► Mesh ──► LinearSystem::assemble()
//!                                             │
//!                         LinearBackend::solve() ──► NodeField::derive()
//! ```

pub mod boundary;
pub mod field;
pub mod mesh;
pub mod mesh_2d;
pub mod raster;
pub mod solver;
pub mod solver_dense;
pub mod solver_direct;
pub mod solver_nodal;
pub mod solver_sparse;
pub mod system;

pub use boundary::{BoundaryCondition, BoundaryKind, BoundaryTarget, Coupling, FaceSide};
pub use field::{Channel, EnergyBalance, IsothermSpec, NodeField, ThermalPath};
pub use mesh::{EdgeSide, Mesh, MeshEdge, MeshNode, MeshSource, MeshSpec};
pub use mesh_2d::{ISO_TAG, build_mesh};
pub use raster::{ColorMap, InMemoryRaster, PixelClass, PixelGrid, RasterDecoder, RegionSelector};
pub use solver::{
    Capacitance, LinearBackend, SolveControl, SolveOptions, SolverChoice, SolverStats, solve,
    solve_with_system,
};
pub use solver_dense::DenseBackend;
pub use solver_direct::DirectBackend;
pub use solver_nodal::{NodalBackend, NodalConfig};
pub use solver_sparse::{IterativeBackend, IterativeConfig};
pub use system::{CsrMatrix, LinearSystem};
