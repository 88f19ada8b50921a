use super::{Bus, RunContext};

/// One step of a run.
///
/// A stage reads the artifacts it needs from the [`Bus`] and publishes its
/// own. Stages run exactly once, in pipeline order.
pub trait Stage {
    /// Identifier used for the tracing span and error messages.
    fn name(&self) -> &'static str;

    fn run(&self, ctx: &RunContext, bus: &mut Bus) -> crate::Result<()>;
}
