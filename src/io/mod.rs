//! Run documents and matrix export.
//!
//! A run is described by one JSON document (see [`config::RunConfig`]).
//! Layers may be given as an ordered list, as a keyed map, or in the legacy
//! `layer_matl` form; all three resolve to the same board description.

pub mod config;
pub mod matrix_market;

pub use config::RunConfig;
