//! Error taxonomy shared by every pipeline stage.
//!
//! Each stage fails fast with an error naming the offending entity. The
//! top-level [`ThermalError`] only wraps the per-stage enums so callers can
//! match on the stage that aborted the run.

use std::time::Duration;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ThermalError>;

#[derive(Debug, Error)]
pub enum ThermalError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error(transparent)]
    Solve(#[from] SolveError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

/// Malformed or inconsistent configuration input.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate name '{name}' in {section}")]
    DuplicateName { section: &'static str, name: String },

    #[error("{entity}: required field '{field}' is missing")]
    MissingField { entity: String, field: &'static str },

    #[error("{entity}: property '{property}' is required but not specified")]
    MissingProperty { entity: String, property: &'static str },

    #[error("{entity}: cannot parse '{text}' for field '{field}'")]
    BadUnit {
        entity: String,
        field: &'static str,
        text: String,
    },

    #[error("{entity}: coverage {coverage} is invalid here ({reason})")]
    InvalidCoverage {
        entity: String,
        coverage: f64,
        reason: &'static str,
    },

    #[error("{entity}: {field} {value} m is not a positive length")]
    InvalidThickness {
        entity: String,
        field: &'static str,
        value: f64,
    },

    #[error("{entity}: extent {z0:.6e}..{z1:.6e} m overruns '{bound}'")]
    Overrun {
        entity: String,
        bound: String,
        z0: f64,
        z1: f64,
    },

    #[error("{entity}: unknown {field} '{kind}'")]
    UnknownKind {
        entity: String,
        field: &'static str,
        kind: String,
    },

    #[error("no active entry in {section}")]
    NoActiveEntry { section: &'static str },

    #[error("more than one active entry in {section}: {names:?}")]
    MultipleActiveEntries {
        section: &'static str,
        names: Vec<String>,
    },

    #[error("unknown output channel '{0}'")]
    UnknownChannel(String),

    #[error("{count} partial-coverage features exceed the limit of {limit}")]
    TooManyPartialFeatures { count: usize, limit: usize },

    #[error("invalid run document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure to merge the stackup views into resolved columns.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("{entity}: {role} target '{anchor}' not found")]
    UnresolvedAnchor {
        entity: String,
        anchor: String,
        role: &'static str,
    },

    #[error("cyclic displacement chain: {}", chain.join(" -> "))]
    CyclicDisplacement { chain: Vec<String> },

    #[error("{entity}: unknown material '{material}'")]
    UnknownMaterial { entity: String, material: String },

    #[error("material '{material}': invalid type '{kind}'")]
    InvalidMaterialType { material: String, kind: String },
}

/// Failure to discretize the board footprint.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("mesh '{title}': invalid size {width}x{height} (cell size {cell_size} m)")]
    MeshSizeMismatch {
        title: String,
        width: i64,
        height: i64,
        cell_size: f64,
    },

    #[error("mesh '{title}': failed to decode image '{path}': {reason}")]
    ImageDecode {
        title: String,
        path: String,
        reason: String,
    },
}

/// Failure to assemble or solve the linear system.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error(
        "singular system: island of {island_size} node(s) around ({x}, {y}) has no fixed-temperature boundary"
    )]
    SingularSystem { island_size: usize, x: usize, y: usize },

    #[error("{backend}: no convergence after {iterations} iterations (residual {residual:.3e})")]
    NonConvergence {
        backend: &'static str,
        iterations: usize,
        residual: f64,
    },

    #[error("unknown solver '{0}'")]
    UnknownSolver(String),

    #[error("{backend}: numerical breakdown at row {row}")]
    Breakdown { backend: &'static str, row: usize },
}

/// The solve was aborted by its control hook.
#[derive(Debug, Error)]
pub enum TimeoutError {
    #[error("{backend}: exceeded time limit of {limit:?} after {iterations} iterations")]
    Elapsed {
        backend: &'static str,
        limit: Duration,
        iterations: usize,
    },

    #[error("{backend}: cancelled after {iterations} iterations")]
    Cancelled {
        backend: &'static str,
        iterations: usize,
    },
}
