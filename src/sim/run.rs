//! The resolve, mesh and solve stages and the run entry points.

use std::time::Duration;

use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::io::config::RunConfig;
use crate::io::matrix_market;
use crate::sim::framework::{Bus, Pipeline, RunContext, Stage};
use crate::sim::heat_transfer::boundary::BoundaryCondition;
use crate::sim::heat_transfer::field::NodeField;
use crate::sim::heat_transfer::mesh::{Mesh, MeshSpec};
use crate::sim::heat_transfer::mesh_2d::{ISO_TAG, build_mesh};
use crate::sim::heat_transfer::raster::RasterDecoder;
use crate::sim::heat_transfer::solver::{SolveControl, SolveOptions, SolverChoice, solve_with_system};
use crate::sim::materials::MaterialCatalog;
use crate::sim::output::{ChannelProjector, OutputPlan};
use crate::stackup::{Stackup, StackupDescription, resolve};

/// Everything a run needs, already validated.
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub catalog: MaterialCatalog,
    pub description: StackupDescription,
    pub mesh: MeshSpec,
    /// When empty, `iso`-tagged nodes are held at 25 C.
    pub boundaries: Vec<BoundaryCondition>,
    pub solver: SolverChoice,
    pub options: SolveOptions,
    pub time_limit: Option<Duration>,
    pub outputs: Option<OutputPlan>,
    /// Keep a Matrix Market dump of the reduced system.
    pub export_matrix: bool,
}

impl Default for RunInputs {
    fn default() -> Self {
        Self {
            catalog: MaterialCatalog::with_presets(),
            description: StackupDescription::default(),
            mesh: MeshSpec::tiny(),
            boundaries: Vec::new(),
            solver: SolverChoice::default(),
            options: SolveOptions::default(),
            time_limit: None,
            outputs: None,
            export_matrix: false,
        }
    }
}

impl RunInputs {
    pub fn new(catalog: MaterialCatalog, description: StackupDescription, mesh: MeshSpec) -> Self {
        Self {
            catalog,
            description,
            mesh,
            ..Default::default()
        }
    }

    pub fn with_boundary(mut self, bc: BoundaryCondition) -> Self {
        self.boundaries.push(bc);
        self
    }

    pub fn with_solver(mut self, solver: SolverChoice) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_options(mut self, options: SolveOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates a run document into inputs.
    pub fn from_config(config: &RunConfig) -> crate::Result<Self> {
        let (catalog, description) = config.board()?;
        Ok(Self {
            catalog,
            description,
            mesh: config.mesh_spec()?,
            boundaries: config.boundary_conditions()?,
            solver: config.solver_choice()?,
            options: config.solve_options(),
            time_limit: config.analysis.time_limit_ms.map(Duration::from_millis),
            outputs: config.output_plan()?,
            export_matrix: config.wants_matrix_market(),
        })
    }
}

/// Artifacts kept from a successful run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub run_id: Uuid,
    pub stackup: Stackup,
    pub mesh: Mesh,
    pub field: NodeField,
    /// Matrix Market text of the reduced system, when requested.
    pub matrix_market: Option<String>,
}

pub struct ResolveStage;

impl Stage for ResolveStage {
    fn name(&self) -> &'static str {
        "resolve"
    }

    fn run(&self, ctx: &RunContext, bus: &mut Bus) -> crate::Result<()> {
        let stackup = resolve(&ctx.inputs.description, &ctx.inputs.catalog)?;
        bus.put(stackup);
        Ok(())
    }
}

pub struct MeshStage;

impl Stage for MeshStage {
    fn name(&self) -> &'static str {
        "mesh"
    }

    fn run(&self, ctx: &RunContext, bus: &mut Bus) -> crate::Result<()> {
        let stackup = bus.require::<Stackup>(self.name())?;
        let mesh = build_mesh(&ctx.inputs.mesh, stackup, ctx.raster)?;
        bus.put(mesh);
        Ok(())
    }
}

pub struct SolveStage;

impl Stage for SolveStage {
    fn name(&self) -> &'static str {
        "solve"
    }

    fn run(&self, ctx: &RunContext, bus: &mut Bus) -> crate::Result<()> {
        let mesh = bus.require::<Mesh>(self.name())?;
        let defaults;
        let conditions = if ctx.inputs.boundaries.is_empty() && mesh.tag_index(ISO_TAG).is_some() {
            defaults = [BoundaryCondition::default_iso()];
            &defaults[..]
        } else {
            &ctx.inputs.boundaries[..]
        };
        let (system, field) = solve_with_system(
            mesh,
            conditions,
            &ctx.inputs.solver,
            &ctx.inputs.options,
            &ctx.control,
        )?;
        if ctx.inputs.export_matrix {
            let mut text = Vec::new();
            match matrix_market::write_system(&mut text, &system) {
                Ok(()) => bus.put(MatrixMarketText(String::from_utf8_lossy(&text).into_owned())),
                Err(e) => warn!(error = %e, "matrix export failed"),
            }
        }
        bus.put(field);
        Ok(())
    }
}

struct MatrixMarketText(String);

/// The resolve, mesh and solve stages in order.
pub fn thermal_pipeline() -> Pipeline {
    Pipeline::new()
        .with_stage(ResolveStage)
        .with_stage(MeshStage)
        .with_stage(SolveStage)
}

/// Runs the pipeline with no raster decoder and no time limit beyond the
/// inputs' own.
pub fn run(inputs: &RunInputs) -> crate::Result<RunOutput> {
    run_with(inputs, None, SolveControl::new(), None)
}

/// Runs the pipeline, then hands the configured channels to `projector`.
pub fn run_with(
    inputs: &RunInputs,
    raster: Option<&dyn RasterDecoder>,
    control: SolveControl,
    projector: Option<&mut dyn ChannelProjector>,
) -> crate::Result<RunOutput> {
    let control = match inputs.time_limit {
        Some(limit) => control.with_time_limit(limit),
        None => control,
    };
    let mut ctx = RunContext::new(inputs).with_control(control);
    if let Some(raster) = raster {
        ctx = ctx.with_raster(raster);
    }
    let span = info_span!("run", run_id = %ctx.run_id);
    let _guard = span.enter();

    let mut bus = Bus::new();
    thermal_pipeline().run(&ctx, &mut bus)?;

    let missing = |stage: &str| crate::error::ConfigError::MissingField {
        entity: format!("{stage} stage"),
        field: "output artifact",
    };
    let stackup = bus.take::<Stackup>().ok_or_else(|| missing("resolve"))?;
    let mesh = bus.take::<Mesh>().ok_or_else(|| missing("mesh"))?;
    let field = bus.take::<NodeField>().ok_or_else(|| missing("solve"))?;
    let matrix_market = bus.take::<MatrixMarketText>().map(|m| m.0);

    if let (Some(plan), Some(projector)) = (&inputs.outputs, projector) {
        plan.dispatch(&field, projector);
    }
    info!(
        max_temperature = field.max_temperature(),
        path_resistance = ?field.path_resistance,
        "run finished"
    );
    Ok(RunOutput {
        run_id: ctx.run_id,
        stackup,
        mesh,
        field,
        matrix_market,
    })
}
