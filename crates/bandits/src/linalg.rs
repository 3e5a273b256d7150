//! Small dense matrix helpers for the linear strategies.
//!
//! The Gram matrices here are 15x15, so a plain Gauss-Jordan inverse
//! and an unblocked Cholesky are plenty. Degeneracy surfaces as
//! `NudgeError::Numeric`; callers reinitialize the offending arm state
//! and retry once.

use ndarray::{Array1, Array2};

use nudge_core::{NudgeError, NudgeResult};

const PIVOT_EPS: f64 = 1e-12;

/// Invert via Gauss-Jordan with partial pivoting.
pub fn invert(m: &Array2<f64>) -> NudgeResult<Array2<f64>> {
    let n = m.nrows();
    if m.ncols() != n {
        return Err(NudgeError::numeric(format!(
            "cannot invert {}x{} matrix",
            m.nrows(),
            m.ncols()
        )));
    }

    // Augmented [M | I], reduced in place.
    let mut a = m.clone();
    let mut inv = Array2::<f64>::eye(n);

    for col in 0..n {
        let mut pivot = col;
        let mut best = a[[col, col]].abs();
        for row in (col + 1)..n {
            let v = a[[row, col]].abs();
            if v > best {
                best = v;
                pivot = row;
            }
        }
        if best < PIVOT_EPS || !best.is_finite() {
            return Err(NudgeError::numeric("singular matrix"));
        }
        if pivot != col {
            swap_rows(&mut a, pivot, col);
            swap_rows(&mut inv, pivot, col);
        }

        let diag = a[[col, col]];
        for j in 0..n {
            a[[col, j]] /= diag;
            inv[[col, j]] /= diag;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                a[[row, j]] -= factor * a[[col, j]];
                inv[[row, j]] -= factor * inv[[col, j]];
            }
        }
    }
    Ok(inv)
}

fn swap_rows(m: &mut Array2<f64>, i: usize, j: usize) {
    let n = m.ncols();
    for col in 0..n {
        let tmp = m[[i, col]];
        m[[i, col]] = m[[j, col]];
        m[[j, col]] = tmp;
    }
}

/// Lower-triangular Cholesky factor L with `m = L * L^T`.
pub fn cholesky(m: &Array2<f64>) -> NudgeResult<Array2<f64>> {
    let n = m.nrows();
    if m.ncols() != n {
        return Err(NudgeError::numeric("cholesky requires a square matrix"));
    }
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = m[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return Err(NudgeError::numeric("matrix not positive definite"));
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Ok(l)
}

/// `x^T M x`, clamped at zero so callers can take a square root.
pub fn quadratic_form(m: &Array2<f64>, x: &Array1<f64>) -> f64 {
    x.dot(&m.dot(x)).max(0.0)
}
