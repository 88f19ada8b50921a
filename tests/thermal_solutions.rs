use boardtherm::error::{SolveError, ThermalError};
use boardtherm::MaterialCatalog;
use boardtherm::sim::heat_transfer::mesh::{EdgeSide, Mesh};
use boardtherm::sim::heat_transfer::{
    BoundaryCondition, BoundaryTarget, Capacitance, Channel, ColorMap, FaceSide, InMemoryRaster,
    IsothermSpec, IterativeConfig, LinearSystem, MeshSource, MeshSpec, NodalConfig, NodeField,
    PixelGrid, SolveControl, SolveOptions, SolverChoice, ThermalPath, build_mesh, solve,
    solve_with_system,
};
use boardtherm::stackup::{LayerSpec, Stackup, StackupDescription, resolve};
use boardtherm::units::mil;

const GREEN: [u8; 3] = [0, 255, 0];
const WHITE: [u8; 3] = [255, 255, 255];

fn board(layers: Vec<LayerSpec>) -> Stackup {
    let description = StackupDescription::new(layers, vec![], vec![]);
    resolve(&description, &MaterialCatalog::with_presets()).expect("board resolves")
}

fn cu_prepreg() -> Stackup {
    board(vec![
        LayerSpec::new("cu", "Cu", mil(1.2)),
        LayerSpec::new("pp", "Prepreg", mil(12.0)),
    ])
}

fn cu_fr4() -> Stackup {
    board(vec![
        LayerSpec::new("cu", "Cu", mil(1.2)),
        LayerSpec::new("fr4", "FR4", mil(60.0)),
    ])
}

/// Mesh of a uniformly coloured raster.
fn image_mesh(stackup: &Stackup, grid: PixelGrid) -> Mesh {
    let raster = InMemoryRaster::new().with_image("board.png", grid);
    let spec = MeshSpec::new(
        "image",
        1e-3,
        MeshSource::Image {
            path: "board.png".to_string(),
            color_map: ColorMap::default_table(),
        },
    );
    build_mesh(&spec, stackup, Some(&raster)).expect("image mesh builds")
}

fn edge(name: &str, side: EdgeSide, t: f64) -> BoundaryCondition {
    BoundaryCondition::fixed_temperature(name, BoundaryTarget::Edge(side), t)
}

fn face(name: &str, side: FaceSide, t: f64) -> BoundaryCondition {
    BoundaryCondition::fixed_temperature(name, BoundaryTarget::Face(side), t)
}

fn path_options(source: &str, sink: &str) -> SolveOptions {
    SolveOptions {
        path: Some(ThermalPath::new(source, sink)),
        ..Default::default()
    }
}

fn same_bits(a: &NodeField, b: &NodeField) -> bool {
    Channel::ALL.iter().all(|&c| {
        a.channel(c)
            .iter()
            .zip(b.channel(c).iter())
            .all(|(x, y)| x.to_bits() == y.to_bits())
    })
}

#[test]
fn edge_to_edge_field_is_linear() -> anyhow::Result<()> {
    let (w, h) = (8, 3);
    let stackup = cu_prepreg();
    let mesh = image_mesh(&stackup, PixelGrid::new(w, h, GREEN));
    let bcs = [
        edge("hot", EdgeSide::Left, 100.0),
        edge("cold", EdgeSide::Right, 25.0),
    ];
    let field = solve(
        &mesh,
        &bcs,
        &SolverChoice::Direct,
        &path_options("hot", "cold"),
        &SolveControl::new(),
    )?;

    for y in 0..h {
        for x in 0..w {
            let expected = 100.0 - 75.0 * (x as f64 + 0.5) / w as f64;
            let t = field.temperature(x, y).unwrap();
            assert!((t - expected).abs() < 1e-9, "({x}, {y}): {t} vs {expected}");
        }
    }

    let gs = mesh.node(0, 0).coefficients.sheet_x;
    let expected_r = w as f64 / (h as f64 * gs);
    let r = field.path_resistance.unwrap();
    assert!((r - expected_r).abs() / expected_r < 1e-9, "{r} vs {expected_r}");

    let q = field.boundary_flow("cold").unwrap();
    assert!((q + field.boundary_flow("hot").unwrap()).abs() < 1e-9 * q.abs());
    // Resistance to the sink falls off linearly towards the cold edge.
    let resis = field.value(Channel::Resis, w - 1, 1);
    assert!((resis - 0.5 / (h as f64 * gs)).abs() < 1e-9 * resis);
    Ok(())
}

#[test]
fn through_plane_resistance_matches_hand_calculation() -> anyhow::Result<()> {
    let (w, h) = (4, 4);
    let stackup = cu_prepreg();
    let mesh = image_mesh(&stackup, PixelGrid::new(w, h, GREEN));
    let bcs = [
        face("top", FaceSide::Top, 100.0),
        face("bottom", FaceSide::Bottom, 25.0),
    ];
    let field = solve(
        &mesh,
        &bcs,
        &SolverChoice::default(),
        &path_options("top", "bottom"),
        &SolveControl::new(),
    )?;

    let per_area = mil(1.2) / 385.0 + mil(12.0) / 1.059;
    let expected = per_area / ((w * h) as f64 * mesh.cell_area());
    let r = field.path_resistance.unwrap();
    assert!((r - expected).abs() / expected < 0.01, "{r} vs {expected}");
    Ok(())
}

#[test]
fn face_flux_rises_by_flux_times_resistance() -> anyhow::Result<()> {
    let stackup = cu_prepreg();
    let mesh = image_mesh(&stackup, PixelGrid::new(3, 2, GREEN));
    let q = 2.0e4;
    let bcs = [
        BoundaryCondition::fixed_flux("load", BoundaryTarget::Face(FaceSide::Top), q),
        face("sink", FaceSide::Bottom, 25.0),
    ];
    let field = solve(
        &mesh,
        &bcs,
        &SolverChoice::Dense,
        &SolveOptions::default(),
        &SolveControl::new(),
    )?;
    let r_bottom = mesh.node(0, 0).coefficients.r_bottom;
    for t in &field.temperatures {
        assert!((t - 25.0 - q * r_bottom).abs() < 1e-9);
    }
    let injected = q * mesh.cell_area() * 6.0;
    assert!((field.energy.injected - injected).abs() < 1e-12);
    assert!(field.energy.relative_imbalance() < 1e-9);
    Ok(())
}

#[test]
fn disconnected_island_is_singular() {
    let stackup = cu_prepreg();
    let mut grid = PixelGrid::new(5, 2, GREEN);
    for row in 0..2 {
        grid.set(2, row, WHITE);
    }
    let mesh = image_mesh(&stackup, grid);
    let bcs = [edge("left", EdgeSide::Left, 25.0)];
    let err = solve(
        &mesh,
        &bcs,
        &SolverChoice::Direct,
        &SolveOptions::default(),
        &SolveControl::new(),
    )
    .unwrap_err();
    assert!(
        matches!(
            err,
            ThermalError::Solve(SolveError::SingularSystem { island_size: 4, .. })
        ),
        "{err}"
    );
}

#[test]
fn holes_carry_no_unknowns() -> anyhow::Result<()> {
    let stackup = cu_fr4();
    let mesh = build_mesh(&MeshSpec::scalable(6, 5), &stackup, None)?;
    let hole = mesh.cell_index(1, 1);
    assert!(mesh.nodes[hole].hole);
    assert_eq!(mesh.solve_index(hole), None);
    assert_eq!(mesh.solve_count(), 6 * 5 - 1);
    assert!(mesh.edges.iter().all(|e| e.a != hole && e.b != hole));

    let bcs = [BoundaryCondition::default_iso()];
    let system = LinearSystem::assemble(&mesh, &bcs, None)?;
    assert_eq!(system.len(), mesh.solve_count());

    let field = solve(
        &mesh,
        &bcs,
        &SolverChoice::Direct,
        &SolveOptions::default(),
        &SolveControl::new(),
    )?;
    assert!(field.value(Channel::Deg, 1, 1).is_nan());
    assert!(field.value(Channel::Resis, 1, 1).is_nan());
    assert_eq!(field.value(Channel::HoleFlag, 1, 1), 1.0);
    assert_eq!(field.value(Channel::SpiceNodeNum, 1, 1), 0.0);
    assert_eq!(field.value(Channel::HoleFlag, 2, 2), 0.0);
    assert_eq!(field.temperature(1, 1), None);
    Ok(())
}

#[test]
fn tiny_problem_is_deterministic() -> anyhow::Result<()> {
    let stackup = cu_fr4();
    let solve_once = || -> anyhow::Result<NodeField> {
        let mesh = build_mesh(&MeshSpec::tiny(), &stackup, None)?;
        Ok(solve(
            &mesh,
            &[BoundaryCondition::default_iso()],
            &SolverChoice::Direct,
            &SolveOptions::default(),
            &SolveControl::new(),
        )?)
    };
    let a = solve_once()?;
    let b = solve_once()?;
    assert!(same_bits(&a, &b));

    // The heated centre node is the hottest one; the iso row sits at 25 C.
    assert_eq!(a.max_temperature(), a.temperature(1, 1).unwrap());
    for x in 0..3 {
        assert_eq!(a.temperature(x, 0), Some(25.0));
    }
    assert!((a.energy.injected - 2.0).abs() < 1e-12);
    assert!(a.energy.relative_imbalance() < 1e-6);
    Ok(())
}

#[test]
fn backends_agree_on_scalable_problem() -> anyhow::Result<()> {
    let stackup = cu_fr4();
    let mesh = build_mesh(&MeshSpec::scalable(12, 10), &stackup, None)?;
    let bcs = [BoundaryCondition::default_iso()];
    let run = |choice: SolverChoice| {
        solve(
            &mesh,
            &bcs,
            &choice,
            &SolveOptions::default(),
            &SolveControl::new(),
        )
    };

    let reference = run(SolverChoice::Direct)?;
    assert!((reference.energy.injected - 10.0).abs() < 1e-9);
    assert!(reference.energy.relative_imbalance() < 1e-6);
    let rise = reference.max_temperature() - 25.0;
    assert!(rise > 0.0);

    for choice in [
        SolverChoice::Dense,
        SolverChoice::Iterative(IterativeConfig::default()),
        SolverChoice::Nodal(NodalConfig::default()),
    ] {
        let field = run(choice.clone())?;
        let worst = reference
            .temperatures
            .iter()
            .zip(&field.temperatures)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        assert!(worst < 1e-6 * rise, "{choice:?} differs by {worst}");
    }
    Ok(())
}

#[test]
fn explicit_coupling_overrides_geometry() -> anyhow::Result<()> {
    let stackup = cu_prepreg();
    let mesh = image_mesh(&stackup, PixelGrid::new(1, 1, GREEN));
    let bcs = [
        BoundaryCondition::fixed_flux("load", BoundaryTarget::Face(FaceSide::Top), 1.0e6),
        face("sink", FaceSide::Bottom, 20.0).with_coupling(0.5),
    ];
    let field = solve(
        &mesh,
        &bcs,
        &SolverChoice::Direct,
        &SolveOptions::default(),
        &SolveControl::new(),
    )?;
    // 1 W through 0.5 W/K.
    assert!((field.temperatures[0] - 22.0).abs() < 1e-9);
    assert_eq!(field.value(Channel::BoundCond, 0, 0), 0.5);
    assert!((field.boundary_flow("sink").unwrap() - 1.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn capacitance_step_stores_the_injected_heat() -> anyhow::Result<()> {
    let stackup = cu_fr4();
    let mesh = build_mesh(&MeshSpec::tiny(), &stackup, None)?;
    let options = SolveOptions {
        capacitance: Some(Capacitance {
            dt: 0.5,
            initial_temperature: 20.0,
        }),
        ..Default::default()
    };
    let field = solve(
        &mesh,
        &[],
        &SolverChoice::Iterative(IterativeConfig::default()),
        &options,
        &SolveControl::new(),
    )?;
    assert!(field.min_temperature() > 20.0);
    assert!((field.energy.stored - 2.0).abs() < 1e-6);
    assert_eq!(field.energy.leaving, 0.0);
    Ok(())
}

#[test]
fn isotherms_mark_the_warm_side() -> anyhow::Result<()> {
    let stackup = cu_prepreg();
    let mesh = image_mesh(&stackup, PixelGrid::new(8, 1, GREEN));
    let bcs = [
        edge("hot", EdgeSide::Left, 100.0),
        edge("cold", EdgeSide::Right, 20.0),
    ];
    let options = SolveOptions {
        isotherms: IsothermSpec::Levels(vec![60.0]),
        ..Default::default()
    };
    let (system, field) = solve_with_system(
        &mesh,
        &bcs,
        &SolverChoice::Direct,
        &options,
        &SolveControl::new(),
    )?;
    assert_eq!(system.len(), 8);
    // Nodes sit at 95, 85, ..., 25; 60 falls between x = 3 and x = 4.
    for x in 0..8 {
        let expected = if x == 3 { 1.0 } else { 0.0 };
        assert_eq!(field.value(Channel::IsoNode, x, 0), expected, "x = {x}");
        assert_eq!(field.value(Channel::IsoFlag, x, 0), expected);
    }
    Ok(())
}
