use ndarray as nd;

use crate::error::SolveError;
use crate::sim::heat_transfer::solver::{BackendSolution, LinearBackend, SolveControl};
use crate::sim::heat_transfer::system::{CsrMatrix, LinearSystem};

const NAME: &str = "dense";

/// Gaussian elimination on the densified reduced system. Intended for small
/// meshes and as a reference for the other backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseBackend;

impl LinearBackend for DenseBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn solve(
        &self,
        system: &LinearSystem,
        control: &SolveControl,
    ) -> crate::Result<BackendSolution> {
        let x = solve_dense(
            densify(&system.reduced),
            nd::Array1::from(system.reduced_rhs.clone()),
            control,
        )?;
        let mut ax = vec![0.0; x.len()];
        system.reduced.mul_vec(&x, &mut ax);
        let residual = ax
            .iter()
            .zip(&system.reduced_rhs)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        Ok(BackendSolution {
            iterations: x.len(),
            temperatures: x,
            residual,
            deck: None,
        })
    }
}

pub fn densify(a: &CsrMatrix) -> nd::Array2<f64> {
    let mut dense = nd::Array2::zeros((a.n, a.n));
    for i in 0..a.n {
        for (j, v) in a.row(i) {
            dense[[i, j]] = v;
        }
    }
    dense
}

/// Solves `A * x = b` by Gaussian elimination with partial pivoting.
pub fn solve_dense(
    mut a: nd::Array2<f64>,
    mut b: nd::Array1<f64>,
    control: &SolveControl,
) -> crate::Result<Vec<f64>> {
    let n = b.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let scale = a.iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(1e-300);

    // Forward elimination
    for col in 0..n {
        control.check(NAME, col)?;

        let mut pivot_row = col;
        let mut pivot_val = a[[col, col]].abs();
        for r in (col + 1)..n {
            let v = a[[r, col]].abs();
            if v > pivot_val {
                pivot_val = v;
                pivot_row = r;
            }
        }
        if pivot_val <= 1e-14 * scale {
            return Err(SolveError::Breakdown {
                backend: NAME,
                row: col,
            }
            .into());
        }

        if pivot_row != col {
            for c in 0..n {
                a.swap([pivot_row, c], [col, c]);
            }
            b.swap(pivot_row, col);
        }

        let pivot = a[[col, col]];
        for r in (col + 1)..n {
            let factor = a[[r, col]] / pivot;
            if factor == 0.0 {
                continue;
            }
            a[[r, col]] = 0.0;
            for c in (col + 1)..n {
                a[[r, c]] -= factor * a[[col, c]];
            }
            b[r] -= factor * b[col];
        }
    }

    // Back substitution
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut rhs = b[i];
        for j in (i + 1)..n {
            rhs -= a[[i, j]] * x[j];
        }
        x[i] = rhs / a[[i, i]];
    }

    if let Some(row) = x.iter().position(|xi| !xi.is_finite()) {
        return Err(SolveError::Breakdown { backend: NAME, row }.into());
    }
    Ok(x)
}
