use uuid::Uuid;

use crate::sim::heat_transfer::raster::RasterDecoder;
use crate::sim::heat_transfer::solver::SolveControl;
use crate::sim::run::RunInputs;

/// Read-only context shared by the stages of one run.
pub struct RunContext<'a> {
    /// Fresh per run; recorded on the run's tracing span.
    pub run_id: Uuid,
    pub inputs: &'a RunInputs,
    /// Decoder for image mesh sources.
    pub raster: Option<&'a dyn RasterDecoder>,
    pub control: SolveControl,
}

impl<'a> RunContext<'a> {
    pub fn new(inputs: &'a RunInputs) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            inputs,
            raster: None,
            control: SolveControl::new(),
        }
    }

    pub fn with_raster(mut self, raster: &'a dyn RasterDecoder) -> Self {
        self.raster = Some(raster);
        self
    }

    pub fn with_control(mut self, control: SolveControl) -> Self {
        self.control = control;
        self
    }
}
