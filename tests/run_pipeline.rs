use std::time::Duration;

use boardtherm::error::{ConfigError, ThermalError, TimeoutError};
use boardtherm::sim::heat_transfer::{
    BoundaryCondition, BoundaryTarget, Channel, FaceSide, SolveControl, SolverChoice,
};
use boardtherm::sim::output::MemoryProjector;
use boardtherm::{RunConfig, RunInputs, run, run_with};

const BOARD: &str = r#"{
    "Materials": [
        { "name":"Cu", "conductivity":"385W/m-K", "type":"solid" },
        { "name":"Prepreg", "conductivity":"1.059W/m-K", "type":"deformable" }
    ],
    "Stackup": [
        { "name":"topside_cu", "matl":"Cu", "thickness":"1.2mil", "type":"Rigid" },
        { "name":"topside_prepreg", "matl":"Prepreg", "thickness":"12mil", "type":"Fill" },
        { "name":"side2_cu", "matl":"Cu", "thickness":"1.2mil", "type":"Rigid",
          "displaces":"topside_prepreg", "coverage":"0.5" }
    ],
    "mesh": [
        { "title":"Scalable", "type":"scalable", "xsize":8, "ysize":6, "active":1 }
    ],
    "solver": {
        "solverFlags": [ { "flag":"matrixMarket", "setting":1 } ],
        "solvers": [ { "solverName":"Amesos", "active":1 } ]
    },
    "outputs": {
        "active": 1,
        "mesh": { "png": ["deg", "holeflag"], "interactive": [] },
        "deltamesh": { "png": ["deg", "isodeg"], "interactive": [] },
        "maskedmesh": { "png": [], "interactive": ["deg"] },
        "maskLayer": "holeflag"
    },
    "analysis": { "isotherm_count": 3 }
}"#;

fn inputs() -> anyhow::Result<RunInputs> {
    let config = RunConfig::from_json_str(BOARD)?;
    Ok(RunInputs::from_config(&config)?)
}

#[test]
fn run_from_document() -> anyhow::Result<()> {
    let inputs = inputs()?;
    assert_eq!(inputs.solver, SolverChoice::Direct);
    assert!(inputs.export_matrix);

    let mut projector = MemoryProjector::default();
    let out = run_with(&inputs, None, SolveControl::new(), Some(&mut projector))?;

    assert_eq!(out.stackup.regions.len(), 2);
    assert_eq!((out.mesh.width, out.mesh.height), (8, 6));
    // No boundaries given: the perimeter is held at 25 C.
    assert_eq!(out.field.min_temperature(), 25.0);
    assert!(out.field.max_temperature() > 25.0);
    assert_eq!(out.field.isotherm_levels.len(), 3);
    assert!(out.field.energy.relative_imbalance() < 1e-6);

    let text = out.matrix_market.expect("matrix export requested");
    assert!(text.starts_with("%%MatrixMarket matrix coordinate real symmetric"));
    let n = out.mesh.solve_count();
    assert!(text.lines().nth(1).unwrap().starts_with(&format!("{n} {n} ")));

    assert_eq!(projector.projections.len(), 4);
    let deg = projector.get("deg").unwrap();
    assert_eq!(deg.dim(), (6, 8));
    let masked = projector.get("masked_deg").unwrap();
    assert!(masked[[1, 1]].is_nan());
    assert_eq!(masked[[2, 2]], deg[[2, 2]]);
    let delta = projector.get("png_deg_isodeg").unwrap();
    // isodeg is the rise above the 25 C boundary.
    assert!((delta[[3, 3]] - 25.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn explicit_boundaries_replace_the_default() -> anyhow::Result<()> {
    let mut inputs = inputs()?;
    inputs.outputs = None;
    inputs.export_matrix = false;
    let inputs = inputs.with_boundary(BoundaryCondition::fixed_temperature(
        "heatsink",
        BoundaryTarget::Face(FaceSide::Bottom),
        40.0,
    ));
    let out = run(&inputs)?;
    assert!(out.matrix_market.is_none());
    assert!(out.field.min_temperature() > 40.0);
    assert_eq!(out.field.value(Channel::Iso, 0, 0), 40.0);
    let q = out.field.boundary_flow("heatsink").unwrap();
    assert!((q - 10.0).abs() < 1e-6, "{q}");
    Ok(())
}

#[test]
fn run_ids_are_unique() -> anyhow::Result<()> {
    let mut inputs = inputs()?;
    inputs.outputs = None;
    let a = run(&inputs)?;
    let b = run(&inputs)?;
    assert_ne!(a.run_id, b.run_id);
    assert_eq!(a.field.temperatures, b.field.temperatures);
    Ok(())
}

#[test]
fn cancelled_run_times_out() -> anyhow::Result<()> {
    let inputs = inputs()?.with_solver(SolverChoice::Iterative(Default::default()));
    let control = SolveControl::new();
    control.cancel();
    let err = run_with(&inputs, None, control, None).unwrap_err();
    assert!(
        matches!(err, ThermalError::Timeout(TimeoutError::Cancelled { .. })),
        "{err}"
    );
    Ok(())
}

#[test]
fn zero_time_limit_aborts_the_solve() -> anyhow::Result<()> {
    let mut inputs = inputs()?;
    inputs.time_limit = Some(Duration::ZERO);
    let control = SolveControl::new();
    std::thread::sleep(Duration::from_millis(2));
    let err = run_with(&inputs, None, control, None).unwrap_err();
    assert!(matches!(err, ThermalError::Timeout(_)), "{err}");
    Ok(())
}

#[test]
fn unknown_boundary_layer_fails_resolution() -> anyhow::Result<()> {
    let inputs = inputs()?.with_boundary(BoundaryCondition::fixed_temperature(
        "cold",
        BoundaryTarget::Layer("missing_cu".to_string()),
        20.0,
    ));
    let err = run(&inputs).unwrap_err();
    assert!(err.to_string().contains("missing_cu"), "{err}");
    Ok(())
}

#[test]
fn unknown_output_channel_is_a_config_error() {
    let doc = BOARD.replace(r#""holeflag"]"#, r#""temperature"]"#);
    let config = RunConfig::from_json_str(&doc).unwrap();
    let err = RunInputs::from_config(&config).unwrap_err();
    assert!(
        matches!(err, ThermalError::Config(ConfigError::UnknownChannel(ref c)) if c == "temperature"),
        "{err}"
    );
}

#[test]
fn unknown_solver_is_rejected() {
    let doc = BOARD.replace("Amesos", "Pardiso");
    let config = RunConfig::from_json_str(&doc).unwrap();
    let err = RunInputs::from_config(&config).unwrap_err();
    assert!(err.to_string().contains("Pardiso"), "{err}");
}
