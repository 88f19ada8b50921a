use tracing::{debug, info_span};

use super::{Bus, RunContext, Stage};

/// Executes a sequence of stages; the first failure aborts the pass.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { stages: vec![] }
    }

    pub fn with_stage<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn run(&self, ctx: &RunContext, bus: &mut Bus) -> crate::Result<()> {
        for stage in &self.stages {
            let span = info_span!("stage", name = stage.name());
            let _guard = span.enter();
            stage.run(ctx, bus)?;
            debug!(artifacts = bus.len(), "stage finished");
        }
        Ok(())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
