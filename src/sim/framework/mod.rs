//! Stage runtime for a thermal run.
//!
//! A run is a single forward pass over a list of stages. Stages never call
//! each other; they exchange artifacts through the typed [`Bus`], so a stage
//! only depends on the artifact types it reads.

pub mod bus;
pub mod context;
pub mod pipeline;
pub mod stage;

pub use bus::Bus;
pub use context::RunContext;
pub use pipeline::Pipeline;
pub use stage::Stage;
