use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, info_span, warn};

use crate::error::{SolveError, TimeoutError};
use crate::io::config::SolverEntry;
use crate::sim::heat_transfer::boundary::BoundaryCondition;
use crate::sim::heat_transfer::field::{IsothermSpec, NodeField, ThermalPath};
use crate::sim::heat_transfer::mesh::Mesh;
use crate::sim::heat_transfer::solver_dense::DenseBackend;
use crate::sim::heat_transfer::solver_direct::DirectBackend;
use crate::sim::heat_transfer::solver_nodal::{NodalBackend, NodalConfig};
use crate::sim::heat_transfer::solver_sparse::{IterativeBackend, IterativeConfig};
use crate::sim::heat_transfer::system::LinearSystem;

/// Relative energy imbalance above which a warning is logged.
const IMBALANCE_WARNING: f64 = 1e-6;

/// Solution of a backend, in solver node order.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSolution {
    pub temperatures: Vec<f64>,
    pub iterations: usize,
    /// Final residual norm reported by the backend.
    pub residual: f64,
    /// Circuit deck, for backends that build one.
    pub deck: Option<String>,
}

/// Strategy solving an assembled system.
pub trait LinearBackend {
    fn name(&self) -> &'static str;

    fn solve(
        &self,
        system: &LinearSystem,
        control: &SolveControl,
    ) -> crate::Result<BackendSolution>;
}

/// Which backend a run uses.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SolverChoice {
    /// Banded Cholesky factorization.
    #[default]
    Direct,
    /// Jacobi-preconditioned conjugate gradient.
    Iterative(IterativeConfig),
    /// Circuit-equivalent nodal analysis.
    Nodal(NodalConfig),
    /// Dense Gaussian elimination.
    Dense,
}

impl SolverChoice {
    /// Maps a solver entry to a backend. The legacy package names `Amesos`,
    /// `Aztec`, `Spice` and `Numpy` are accepted as aliases.
    pub fn from_entry(entry: &SolverEntry) -> Result<Self, SolveError> {
        match entry.solver_name.as_str() {
            "Direct" | "Amesos" => Ok(Self::Direct),
            "Iterative" | "Aztec" => {
                let mut config = IterativeConfig::default();
                if let Some(n) = entry.max_iterations {
                    config.max_iterations = n;
                }
                if let Some(t) = entry.rel_tolerance {
                    config.rel_tolerance = t;
                }
                if let Some(t) = entry.abs_tolerance {
                    config.abs_tolerance = t;
                }
                Ok(Self::Iterative(config))
            }
            "Nodal" | "Spice" => {
                let mut config = NodalConfig::default();
                if let Some(n) = entry.max_iterations {
                    config.max_iterations = n;
                }
                if let Some(t) = entry.abs_tolerance {
                    config.tolerance = t;
                }
                if let Some(w) = entry.relaxation {
                    config.relaxation = w;
                }
                if !entry.simbasename.is_empty() {
                    config.deck_title = Some(entry.simbasename.clone());
                }
                Ok(Self::Nodal(config))
            }
            "Dense" | "Numpy" => Ok(Self::Dense),
            other => Err(SolveError::UnknownSolver(other.to_string())),
        }
    }

    pub fn backend(&self) -> Box<dyn LinearBackend> {
        match self {
            Self::Direct => Box::new(DirectBackend),
            Self::Iterative(config) => Box::new(IterativeBackend::new(*config)),
            Self::Nodal(config) => Box::new(NodalBackend::new(config.clone())),
            Self::Dense => Box::new(DenseBackend),
        }
    }
}

/// Single backward-Euler step from a uniform temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capacitance {
    /// Time step (s).
    pub dt: f64,
    /// Temperature before the step (C).
    pub initial_temperature: f64,
}

/// Derivations requested on top of the temperature solve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveOptions {
    pub isotherms: IsothermSpec,
    pub path: Option<ThermalPath>,
    pub capacitance: Option<Capacitance>,
}

/// Cancellation flag and time budget shared with a running solve.
#[derive(Debug, Clone)]
pub struct SolveControl {
    cancel: Arc<AtomicBool>,
    time_limit: Option<Duration>,
    started: Instant,
}

impl SolveControl {
    pub fn new() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            time_limit: None,
            started: Instant::now(),
        }
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// Handle another thread can use to abort the solve.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Called by backends between iterations or rows.
    pub fn check(&self, backend: &'static str, iterations: usize) -> Result<(), TimeoutError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(TimeoutError::Cancelled {
                backend,
                iterations,
            });
        }
        match self.time_limit {
            Some(limit) if self.started.elapsed() > limit => Err(TimeoutError::Elapsed {
                backend,
                limit,
                iterations,
            }),
            _ => Ok(()),
        }
    }
}

impl Default for SolveControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Bookkeeping of one solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverStats {
    pub backend: &'static str,
    pub unknowns: usize,
    pub nonzeros: usize,
    pub iterations: usize,
    pub residual: f64,
    pub elapsed: Duration,
}

/// Assembles, checks and solves the nodal system of a mesh, then derives
/// every output channel.
pub fn solve(
    mesh: &Mesh,
    conditions: &[BoundaryCondition],
    choice: &SolverChoice,
    options: &SolveOptions,
    control: &SolveControl,
) -> crate::Result<NodeField> {
    solve_with_system(mesh, conditions, choice, options, control).map(|(_, field)| field)
}

/// [`solve`], also returning the assembled system.
pub fn solve_with_system(
    mesh: &Mesh,
    conditions: &[BoundaryCondition],
    choice: &SolverChoice,
    options: &SolveOptions,
    control: &SolveControl,
) -> crate::Result<(LinearSystem, NodeField)> {
    let backend = choice.backend();
    let span = info_span!("solve", backend = backend.name(), mesh = %mesh.title);
    let _guard = span.enter();
    let started = Instant::now();

    let system = LinearSystem::assemble(mesh, conditions, options.capacitance.as_ref())?;
    system.check_islands(mesh)?;

    let solution = backend.solve(&system, control)?;
    let stats = SolverStats {
        backend: backend.name(),
        unknowns: system.len(),
        nonzeros: system.matrix.nnz(),
        iterations: solution.iterations,
        residual: solution.residual,
        elapsed: started.elapsed(),
    };
    info!(
        unknowns = stats.unknowns,
        nonzeros = stats.nonzeros,
        iterations = stats.iterations,
        residual = stats.residual,
        "solved system"
    );

    let field = NodeField::derive(mesh, conditions, &system, solution, options, stats)?;
    let balance = &field.energy;
    info!(
        injected = balance.injected,
        leaving = balance.leaving,
        stored = balance.stored,
        "energy balance"
    );
    if balance.relative_imbalance() > IMBALANCE_WARNING {
        warn!(
            imbalance = balance.imbalance(),
            relative = balance.relative_imbalance(),
            "energy balance does not close"
        );
    }
    Ok((system, field))
}
