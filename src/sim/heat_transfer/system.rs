//! Assembly of the nodal conductance system.
//!
//! Unknowns are the non-hole mesh nodes in solver order. The full system
//! `K T = b` keeps every node as an unknown; fixed nodes are removed
//! symmetrically in [`LinearSystem::reduced`] before a backend sees it.

use rayon::prelude::*;
use tracing::debug;

use crate::error::{ConfigError, SolveError};
use crate::sim::heat_transfer::boundary::{BoundaryCondition, BoundaryKind, Coupling};
use crate::sim::heat_transfer::mesh::Mesh;
use crate::sim::heat_transfer::solver::Capacitance;

/// Sparse matrix in compressed sparse row form. Columns are sorted per row.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    pub n: usize,
    pub row_ptr: Vec<usize>,
    pub col_idx: Vec<usize>,
    pub values: Vec<f64>,
}

impl CsrMatrix {
    /// Builds from per-row entries; each row must be sorted by column.
    pub fn from_rows(rows: Vec<Vec<(usize, f64)>>) -> Self {
        let n = rows.len();
        let mut row_ptr = Vec::with_capacity(n + 1);
        row_ptr.push(0);
        let nnz = rows.iter().map(Vec::len).sum();
        let mut col_idx = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        for row in rows {
            for (j, v) in row {
                col_idx.push(j);
                values.push(v);
            }
            row_ptr.push(col_idx.len());
        }
        Self {
            n,
            row_ptr,
            col_idx,
            values,
        }
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        self.col_idx[range.clone()]
            .iter()
            .copied()
            .zip(self.values[range].iter().copied())
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        match self.col_idx[range.clone()].binary_search(&j) {
            Ok(k) => self.values[range.start + k],
            Err(_) => 0.0,
        }
    }

    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.n).map(|i| self.get(i, i)).collect()
    }

    /// `y = A x`, rows in parallel.
    pub fn mul_vec(&self, x: &[f64], y: &mut [f64]) {
        y.par_iter_mut().enumerate().for_each(|(i, yi)| {
            *yi = self.row(i).map(|(j, a)| a * x[j]).sum();
        });
    }

    /// Largest `|i - j|` over the stored entries.
    pub fn bandwidth(&self) -> usize {
        (0..self.n)
            .flat_map(|i| self.row(i).map(move |(j, _)| i.abs_diff(j)))
            .max()
            .unwrap_or(0)
    }
}

/// Per-node attachment of one boundary condition.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryLoad {
    pub name: String,
    pub kind: BoundaryKind,
    pub nodes: Vec<(usize, Coupling)>,
    /// Area per node for flux conditions (m^2).
    pub flux_area: f64,
}

impl BoundaryLoad {
    /// Power leaving the board through this boundary (W) for a solution.
    ///
    /// `drawn` is the power each held node hands to its boundary, and
    /// `holder` names the load credited with it.
    pub fn outflow(&self, x: &[f64], drawn: &[f64], holder: &[Option<usize>], me: usize) -> f64 {
        match self.kind {
            BoundaryKind::FixedFlux { heat_flux } => -heat_flux * self.flux_area * self.nodes.len() as f64,
            BoundaryKind::FixedTemperature { temperature } => self
                .nodes
                .iter()
                .map(|(i, c)| match c {
                    Coupling::Conductance(g) => g * (x[*i] - temperature),
                    Coupling::Held if holder[*i] == Some(me) => drawn[*i],
                    Coupling::Held => 0.0,
                })
                .sum(),
        }
    }
}

/// Assembled nodal system of one mesh.
#[derive(Debug, Clone)]
pub struct LinearSystem {
    /// Full symmetric conductance matrix including Norton and capacitance terms.
    pub matrix: CsrMatrix,
    pub rhs: Vec<f64>,
    /// Set point of held nodes.
    pub fixed: Vec<Option<f64>>,
    /// Index into `loads` of the condition holding each node.
    pub holder: Vec<Option<usize>>,
    /// Conductance from each node to a fixed potential (W/K).
    pub shunt: Vec<f64>,
    /// Heat entering each node from sources and flux conditions (W).
    pub injected: Vec<f64>,
    /// `C/dt` per node when a capacitance term is present (W/K).
    pub storage: Option<Vec<f64>>,
    pub previous_temperature: f64,
    pub loads: Vec<BoundaryLoad>,
    /// Symmetric system with held rows replaced by identity rows.
    pub reduced: CsrMatrix,
    pub reduced_rhs: Vec<f64>,
}

impl LinearSystem {
    pub fn assemble(
        mesh: &Mesh,
        conditions: &[BoundaryCondition],
        capacitance: Option<&Capacitance>,
    ) -> crate::Result<Self> {
        let n = mesh.solve_count();
        let mut incident: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        for e in &mesh.edges {
            if let (Some(a), Some(b)) = (mesh.solve_index(e.a), mesh.solve_index(e.b)) {
                incident[a].push((b, e.conductance));
                incident[b].push((a, e.conductance));
            }
        }

        let mut shunt = vec![0.0; n];
        let mut rhs = vec![0.0; n];
        let mut injected: Vec<f64> = (0..n).map(|i| mesh.nodes[mesh.cell_of(i)].heat).collect();
        let mut fixed = vec![None; n];
        let mut holder = vec![None; n];
        let mut loads = Vec::with_capacity(conditions.len());

        for (k, bc) in conditions.iter().enumerate() {
            let nodes = bc.node_couplings(mesh)?;
            let flux_area = bc.flux_area(mesh);
            match bc.kind {
                BoundaryKind::FixedTemperature { temperature } => {
                    for (i, c) in &nodes {
                        match c {
                            Coupling::Conductance(g) => {
                                shunt[*i] += g;
                                rhs[*i] += g * temperature;
                            }
                            Coupling::Held => {
                                if fixed[*i].is_none() {
                                    fixed[*i] = Some(temperature);
                                    holder[*i] = Some(k);
                                }
                            }
                        }
                    }
                }
                BoundaryKind::FixedFlux { heat_flux } => {
                    for (i, _) in &nodes {
                        injected[*i] += heat_flux * flux_area;
                    }
                }
            }
            debug!(boundary = %bc.name, nodes = nodes.len(), "applied boundary condition");
            loads.push(BoundaryLoad {
                name: bc.name.clone(),
                kind: bc.kind,
                nodes,
                flux_area,
            });
        }

        let mut previous_temperature = 0.0;
        let storage = match capacitance {
            None => None,
            Some(cap) => {
                previous_temperature = cap.initial_temperature;
                let area = mesh.cell_area();
                let mut per_node = Vec::with_capacity(n);
                for i in 0..n {
                    let node = &mesh.nodes[mesh.cell_of(i)];
                    let c = node.coefficients.capacity.ok_or_else(|| {
                        let material = mesh
                            .stackup
                            .missing_capacity(node.column, node.via)
                            .unwrap_or_else(|| "column".to_string());
                        ConfigError::MissingProperty {
                            entity: material,
                            property: "density and specific_heat",
                        }
                    })?;
                    per_node.push(area * c / cap.dt);
                }
                for (i, s) in per_node.iter().enumerate() {
                    shunt[i] += s;
                    rhs[i] += s * cap.initial_temperature;
                }
                Some(per_node)
            }
        };

        for (r, q) in rhs.iter_mut().zip(&injected) {
            *r += q;
        }

        let rows: Vec<Vec<(usize, f64)>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut row: Vec<(usize, f64)> = Vec::with_capacity(incident[i].len() + 1);
                let mut diag = shunt[i];
                for (j, g) in &incident[i] {
                    diag += g;
                    row.push((*j, -g));
                }
                row.push((i, diag));
                row.sort_by_key(|(j, _)| *j);
                row
            })
            .collect();
        let matrix = CsrMatrix::from_rows(rows);
        let (reduced, reduced_rhs) = eliminate(&matrix, &rhs, &fixed);

        debug!(
            unknowns = n,
            nonzeros = matrix.nnz(),
            held = fixed.iter().filter(|f| f.is_some()).count(),
            "assembled system"
        );
        Ok(Self {
            matrix,
            rhs,
            fixed,
            holder,
            shunt,
            injected,
            storage,
            previous_temperature,
            loads,
            reduced,
            reduced_rhs,
        })
    }

    pub fn len(&self) -> usize {
        self.matrix.n
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.n == 0
    }

    /// Fails on the first connected component that nothing ties to a fixed
    /// temperature.
    pub fn check_islands(&self, mesh: &Mesh) -> Result<(), SolveError> {
        let n = self.len();
        let mut component = vec![usize::MAX; n];
        let mut stack = Vec::new();
        for seed in 0..n {
            if component[seed] != usize::MAX {
                continue;
            }
            component[seed] = seed;
            stack.push(seed);
            let mut size = 0;
            let mut anchored = false;
            while let Some(i) = stack.pop() {
                size += 1;
                anchored |= self.fixed[i].is_some() || self.shunt[i] > 0.0;
                for (j, a) in self.matrix.row(i) {
                    if j != i && a < 0.0 && component[j] == usize::MAX {
                        component[j] = seed;
                        stack.push(j);
                    }
                }
            }
            if !anchored {
                let (x, y) = mesh.coords_of(seed);
                return Err(SolveError::SingularSystem {
                    island_size: size,
                    x,
                    y,
                });
            }
        }
        Ok(())
    }

    /// `K x - b` of the full system. On a held node this is minus the power
    /// its boundary draws.
    pub fn residual(&self, x: &[f64]) -> Vec<f64> {
        let mut r = vec![0.0; self.len()];
        self.matrix.mul_vec(x, &mut r);
        for (ri, bi) in r.iter_mut().zip(&self.rhs) {
            *ri -= bi;
        }
        r
    }

    /// Power leaving through each boundary condition, in declaration order.
    pub fn boundary_outflows(&self, x: &[f64]) -> Vec<(String, f64)> {
        let drawn: Vec<f64> = self.residual(x).iter().map(|r| -r).collect();
        self.loads
            .iter()
            .enumerate()
            .map(|(k, load)| (load.name.clone(), load.outflow(x, &drawn, &self.holder, k)))
            .collect()
    }
}

/// Replaces held rows with identity rows and moves their columns to the rhs.
fn eliminate(matrix: &CsrMatrix, rhs: &[f64], fixed: &[Option<f64>]) -> (CsrMatrix, Vec<f64>) {
    let (rows, b): (Vec<Vec<(usize, f64)>>, Vec<f64>) = (0..matrix.n)
        .into_par_iter()
        .map(|i| {
            if let Some(t) = fixed[i] {
                return (vec![(i, 1.0)], t);
            }
            let mut bi = rhs[i];
            let mut row = Vec::new();
            for (j, a) in matrix.row(i) {
                match fixed[j] {
                    Some(t) if j != i => bi -= a * t,
                    _ => row.push((j, a)),
                }
            }
            (row, bi)
        })
        .unzip();
    (CsrMatrix::from_rows(rows), b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThermalError;
    use crate::sim::heat_transfer::boundary::BoundaryTarget;
    use crate::sim::heat_transfer::mesh::{EdgeSide, MeshSpec};
    use crate::sim::heat_transfer::mesh_2d::build_mesh;
    use crate::sim::materials::MaterialCatalog;
    use crate::stackup::{LayerSpec, Stackup, StackupDescription, resolve};
    use crate::units::mil;

    fn stackup() -> Stackup {
        let desc = StackupDescription::new(
            vec![
                LayerSpec::new("cu", "Cu", mil(1.2)),
                LayerSpec::new("fr4", "FR4", mil(60.0)),
            ],
            vec![],
            vec![],
        );
        resolve(&desc, &MaterialCatalog::with_presets()).unwrap()
    }

    #[test]
    fn test_matrix_is_symmetric_with_zero_row_sums() {
        let mesh = build_mesh(&MeshSpec::scalable(5, 4), &stackup(), None).unwrap();
        let sys = LinearSystem::assemble(&mesh, &[], None).unwrap();
        for i in 0..sys.len() {
            let sum: f64 = sys.matrix.row(i).map(|(_, a)| a).sum();
            assert!(sum.abs() < 1e-12, "row {i} sums to {sum}");
            for (j, a) in sys.matrix.row(i) {
                assert_eq!(a, sys.matrix.get(j, i));
            }
        }
    }

    #[test]
    fn test_held_rows_are_eliminated_symmetrically() {
        let mesh = build_mesh(&MeshSpec::tiny(), &stackup(), None).unwrap();
        let bcs = [BoundaryCondition::default_iso()];
        let sys = LinearSystem::assemble(&mesh, &bcs, None).unwrap();
        for i in 0..3 {
            assert_eq!(sys.fixed[i], Some(25.0));
            assert_eq!(sys.reduced.row(i).collect::<Vec<_>>(), vec![(i, 1.0)]);
            assert_eq!(sys.reduced_rhs[i], 25.0);
        }
        for i in 3..sys.len() {
            for (j, a) in sys.reduced.row(i) {
                assert_eq!(a, sys.reduced.get(j, i), "asymmetric at ({i}, {j})");
            }
        }
        // Heat on the centre node stays in the rhs.
        assert!(sys.reduced_rhs[4] > 2.0);
    }

    #[test]
    fn test_norton_coupling_adds_to_diagonal() {
        let mesh = build_mesh(&MeshSpec::tiny(), &stackup(), None).unwrap();
        let bcs = [BoundaryCondition::fixed_temperature(
            "sink",
            BoundaryTarget::Edge(EdgeSide::Right),
            40.0,
        )
        .with_coupling(3.0)];
        let sys = LinearSystem::assemble(&mesh, &bcs, None).unwrap();
        let i = mesh.solve_index_at(2, 1).unwrap();
        let row_sum: f64 = sys.matrix.row(i).map(|(_, a)| a).sum();
        assert!((row_sum - 3.0).abs() < 1e-12);
        assert!((sys.rhs[i] - 120.0).abs() < 1e-12);
    }

    #[test]
    fn test_isolated_mesh_is_singular() {
        let mesh = build_mesh(&MeshSpec::tiny(), &stackup(), None).unwrap();
        let sys = LinearSystem::assemble(&mesh, &[], None).unwrap();
        let err = sys.check_islands(&mesh).unwrap_err();
        assert!(matches!(err, SolveError::SingularSystem { island_size: 9, x: 0, y: 0 }));
    }

    #[test]
    fn test_capacitance_anchors_and_requires_properties() {
        let mesh = build_mesh(&MeshSpec::tiny(), &stackup(), None).unwrap();
        let cap = Capacitance {
            dt: 1.0,
            initial_temperature: 20.0,
        };
        let sys = LinearSystem::assemble(&mesh, &[], Some(&cap)).unwrap();
        assert!(sys.check_islands(&mesh).is_ok());

        let desc = StackupDescription::new(
            vec![LayerSpec::new("pp", "Prepreg", mil(12.0))],
            vec![],
            vec![],
        );
        let bare = resolve(&desc, &MaterialCatalog::with_presets()).unwrap();
        let mesh = build_mesh(&MeshSpec::tiny(), &bare, None).unwrap();
        let err = LinearSystem::assemble(&mesh, &[], Some(&cap)).unwrap_err();
        assert!(
            matches!(&err, ThermalError::Config(ConfigError::MissingProperty { entity, .. }) if entity == "Prepreg"),
            "{err}"
        );
    }

    #[test]
    fn test_bandwidth_follows_row_length() {
        let mesh = build_mesh(&MeshSpec::scalable(6, 5), &stackup(), None).unwrap();
        let sys = LinearSystem::assemble(&mesh, &[], None).unwrap();
        // One hole shifts solver numbers, the widest link spans a grid row.
        assert!(sys.matrix.bandwidth() <= 6);
        assert!(sys.matrix.bandwidth() >= 5);
    }
}
