use crate::error::SolveError;
use crate::sim::heat_transfer::solver::{BackendSolution, LinearBackend, SolveControl};
use crate::sim::heat_transfer::system::{CsrMatrix, LinearSystem};

const NAME: &str = "iterative";

/// Configuration for the conjugate gradient backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterativeConfig {
    /// Maximum number of PCG iterations.
    pub max_iterations: usize,
    /// Relative residual tolerance.
    pub rel_tolerance: f64,
    /// Absolute residual tolerance.
    pub abs_tolerance: f64,
}

impl Default for IterativeConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            rel_tolerance: 1e-9,
            abs_tolerance: 1e-12,
        }
    }
}

/// Preconditioned conjugate gradients (Jacobi preconditioner) on the
/// reduced system.
#[derive(Debug, Clone)]
pub struct IterativeBackend {
    config: IterativeConfig,
}

impl IterativeBackend {
    pub fn new(config: IterativeConfig) -> Self {
        Self { config }
    }
}

impl LinearBackend for IterativeBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn solve(
        &self,
        system: &LinearSystem,
        control: &SolveControl,
    ) -> crate::Result<BackendSolution> {
        // Held rows are identity rows, so the set points are a good start.
        let x0: Vec<f64> = system
            .fixed
            .iter()
            .map(|f| f.unwrap_or(system.previous_temperature))
            .collect();
        pcg_solve(
            &system.reduced,
            &system.reduced_rhs,
            &x0,
            self.config,
            control,
        )
    }
}

/// Solves `A x = b` for a symmetric positive definite `A`.
pub fn pcg_solve(
    a: &CsrMatrix,
    b: &[f64],
    x0: &[f64],
    config: IterativeConfig,
    control: &SolveControl,
) -> crate::Result<BackendSolution> {
    let n = b.len();
    let done = |x: Vec<f64>, iterations: usize, residual: f64| BackendSolution {
        temperatures: x,
        iterations,
        residual,
        deck: None,
    };
    if n == 0 {
        return Ok(done(Vec::new(), 0, 0.0));
    }

    let diag = a.diagonal();
    let precondition = |r: &[f64], z: &mut [f64]| {
        for i in 0..n {
            z[i] = if diag[i].abs() > 1e-30 {
                r[i] / diag[i]
            } else {
                r[i]
            };
        }
    };

    let mut x = x0.to_vec();
    let mut ax = vec![0.0; n];
    a.mul_vec(&x, &mut ax);
    let mut r: Vec<f64> = b.iter().zip(&ax).map(|(bi, axi)| bi - axi).collect();

    let b_norm = l2_norm(b).max(1.0);
    let tol = config.abs_tolerance.max(config.rel_tolerance * b_norm);
    let mut r_norm = l2_norm(&r);
    if r_norm <= tol {
        return Ok(done(x, 0, r_norm));
    }

    let mut z = vec![0.0; n];
    precondition(&r, &mut z);
    let mut p = z.clone();
    let mut rz_old = dot(&r, &z);

    let mut ap = vec![0.0; n];
    for iteration in 1..=config.max_iterations {
        control.check(NAME, iteration - 1)?;

        a.mul_vec(&p, &mut ap);
        let denom = dot(&p, &ap);
        if denom.abs() < 1e-300 {
            return Err(SolveError::Breakdown { backend: NAME, row: 0 }.into());
        }

        let alpha = rz_old / denom;
        for i in 0..n {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }

        r_norm = l2_norm(&r);
        if r_norm <= tol {
            return Ok(done(x, iteration, r_norm));
        }

        precondition(&r, &mut z);
        let rz_new = dot(&r, &z);
        let beta = rz_new / rz_old;
        for i in 0..n {
            p[i] = z[i] + beta * p[i];
        }
        rz_old = rz_new;
    }

    Err(SolveError::NonConvergence {
        backend: NAME,
        iterations: config.max_iterations,
        residual: r_norm,
    }
    .into())
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn l2_norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThermalError;

    fn laplacian(n: usize) -> CsrMatrix {
        // 1D chain with both ends tied to ground through unit conductances.
        let rows = (0..n)
            .map(|i| {
                let mut row = Vec::new();
                if i > 0 {
                    row.push((i - 1, -1.0));
                }
                row.push((i, 2.0));
                if i + 1 < n {
                    row.push((i + 1, -1.0));
                }
                row
            })
            .collect();
        CsrMatrix::from_rows(rows)
    }

    #[test]
    fn test_pcg_chain() {
        let a = laplacian(10);
        let mut b = vec![0.0; 10];
        b[0] = 100.0;
        let sol = pcg_solve(
            &a,
            &b,
            &[0.0; 10],
            IterativeConfig::default(),
            &SolveControl::new(),
        )
        .unwrap();
        // Linear drop from the grounded ends: x_i = 100 * (10 - i) / 11.
        for (i, xi) in sol.temperatures.iter().enumerate() {
            let expected = 100.0 * (10 - i) as f64 / 11.0;
            assert!((xi - expected).abs() < 1e-6, "x[{i}]={xi}, expected {expected}");
        }
        assert!(sol.iterations <= 12, "iterations={}", sol.iterations);
    }

    #[test]
    fn test_pcg_reports_non_convergence() {
        let a = laplacian(50);
        let b = vec![1.0; 50];
        let config = IterativeConfig {
            max_iterations: 2,
            ..Default::default()
        };
        let err = pcg_solve(&a, &b, &[0.0; 50], config, &SolveControl::new()).unwrap_err();
        assert!(
            matches!(
                err,
                ThermalError::Solve(SolveError::NonConvergence { iterations: 2, .. })
            ),
            "{err}"
        );
    }

    #[test]
    fn test_pcg_honours_cancel() {
        let a = laplacian(50);
        let b = vec![1.0; 50];
        let control = SolveControl::new();
        control.cancel();
        let err = pcg_solve(&a, &b, &[0.0; 50], IterativeConfig::default(), &control).unwrap_err();
        assert!(matches!(err, ThermalError::Timeout(_)), "{err}");
    }
}
