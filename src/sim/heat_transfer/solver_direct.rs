use crate::error::SolveError;
use crate::sim::heat_transfer::solver::{BackendSolution, LinearBackend, SolveControl};
use crate::sim::heat_transfer::system::{CsrMatrix, LinearSystem};

const NAME: &str = "direct";

/// Rows factorized between two control checks.
const CHECK_EVERY: usize = 64;

/// Banded `L D L^T` factorization of the reduced system.
///
/// Row-major node numbering keeps the half bandwidth close to the mesh
/// width, so the cost is `O(n * width^2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectBackend;

impl LinearBackend for DirectBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn solve(
        &self,
        system: &LinearSystem,
        control: &SolveControl,
    ) -> crate::Result<BackendSolution> {
        let factor = BandedLdl::factorize(&system.reduced, control)?;
        let x = factor.solve(&system.reduced_rhs);
        let mut ax = vec![0.0; x.len()];
        system.reduced.mul_vec(&x, &mut ax);
        let residual = ax
            .iter()
            .zip(&system.reduced_rhs)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        Ok(BackendSolution {
            temperatures: x,
            iterations: 1,
            residual,
            deck: None,
        })
    }
}

/// Lower band of `L` with unit diagonal, plus the pivots `D`.
#[derive(Debug, Clone)]
pub struct BandedLdl {
    n: usize,
    bandwidth: usize,
    /// `lower[i * bandwidth + (bandwidth - (i - j))]` holds `L[i][j]` for
    /// `i - bandwidth <= j < i`.
    lower: Vec<f64>,
    pivots: Vec<f64>,
}

impl BandedLdl {
    pub fn factorize(a: &CsrMatrix, control: &SolveControl) -> crate::Result<Self> {
        let n = a.n;
        let bw = a.bandwidth();
        let mut lower = vec![0.0; n * bw.max(1)];
        let mut pivots = vec![0.0; n];
        let slot = |i: usize, j: usize| i * bw + (bw - (i - j));

        // Load the strictly lower band of A.
        for i in 0..n {
            for (j, v) in a.row(i) {
                if j < i {
                    lower[slot(i, j)] = v;
                }
            }
        }
        let scale = a.diagonal().iter().fold(0.0_f64, |m, d| m.max(d.abs()));

        for i in 0..n {
            if i % CHECK_EVERY == 0 {
                control.check(NAME, i)?;
            }
            let start = i.saturating_sub(bw);
            for j in start..i {
                let k0 = start.max(j.saturating_sub(bw));
                let mut s = lower[slot(i, j)];
                for k in k0..j {
                    s -= lower[slot(i, k)] * lower[slot(j, k)] * pivots[k];
                }
                lower[slot(i, j)] = s / pivots[j];
            }
            let mut d = a.get(i, i);
            for k in start..i {
                let l = lower[slot(i, k)];
                d -= l * l * pivots[k];
            }
            if d.is_nan() || d <= 1e-14 * scale {
                return Err(SolveError::Breakdown {
                    backend: NAME,
                    row: i,
                }
                .into());
            }
            pivots[i] = d;
        }

        Ok(Self {
            n,
            bandwidth: bw,
            lower,
            pivots,
        })
    }

    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let bw = self.bandwidth;
        let slot = |i: usize, j: usize| i * bw + (bw - (i - j));
        let mut y = b.to_vec();
        for i in 0..self.n {
            for j in i.saturating_sub(bw)..i {
                y[i] -= self.lower[slot(i, j)] * y[j];
            }
        }
        for (yi, d) in y.iter_mut().zip(&self.pivots) {
            *yi /= d;
        }
        for i in (0..self.n).rev() {
            for j in (i + 1)..(i + bw + 1).min(self.n) {
                y[i] -= self.lower[slot(j, i)] * y[j];
            }
        }
        y
    }
}
