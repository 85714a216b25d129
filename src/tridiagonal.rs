// Direct solve of tridiagonal systems

use ndarray::{Array1, ArrayViewMut1};

use crate::error::{CoreError, Result};

/// Pivots smaller than this (relative to the row scale) count as singular.
const PIVOT_EPSILON: f64 = 1e-300;

/// Symmetric tridiagonal matrix with a single coupling band.
///
/// `off[i]` couples rows `i` and `i + 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct Tridiagonal {
    pub main: Array1<f64>,
    pub off: Array1<f64>,
}

impl Tridiagonal {
    pub fn zeros(n: usize) -> Self {
        Tridiagonal {
            main: Array1::zeros(n),
            off: Array1::zeros(n.saturating_sub(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.main.len()
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_empty()
    }

    /// Solves `A x = rhs` in place with the Thomas algorithm.
    ///
    /// On return `rhs` holds `x`. `scratch` must have the length of the
    /// system and is overwritten. O(n), no pivoting.
    pub fn solve_into(
        &self,
        mut rhs: ArrayViewMut1<'_, f64>,
        mut scratch: ArrayViewMut1<'_, f64>,
    ) -> Result<()> {
        let n = self.len();
        if n == 0 {
            return Ok(());
        }
        // forward sweep, scratch holds the modified super-diagonal
        let mut pivot = self.main[0];
        if pivot.abs() < PIVOT_EPSILON || !pivot.is_finite() {
            return Err(CoreError::SingularSystem { row: 0 });
        }
        rhs[0] /= pivot;
        for i in 1..n {
            scratch[i - 1] = self.off[i - 1] / pivot;
            pivot = self.main[i] - self.off[i - 1] * scratch[i - 1];
            if pivot.abs() < PIVOT_EPSILON || !pivot.is_finite() {
                return Err(CoreError::SingularSystem { row: i });
            }
            rhs[i] = (rhs[i] - self.off[i - 1] * rhs[i - 1]) / pivot;
        }
        for i in (0..n - 1).rev() {
            rhs[i] -= scratch[i] * rhs[i + 1];
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, ArrayView1};

    fn dot(matrix: &Tridiagonal, x: ArrayView1<'_, f64>) -> Array1<f64> {
        let n = matrix.len();
        Array1::from_shape_fn(n, |i| {
            let mut value = matrix.main[i] * x[i];
            if i > 0 {
                value += matrix.off[i - 1] * x[i - 1];
            }
            if i + 1 < n {
                value += matrix.off[i] * x[i + 1];
            }
            value
        })
    }

    fn solve(matrix: &Tridiagonal, rhs: ArrayView1<'_, f64>) -> Result<Array1<f64>> {
        let mut x = rhs.to_owned();
        let mut scratch = Array1::zeros(matrix.len());
        matrix.solve_into(x.view_mut(), scratch.view_mut())?;
        Ok(x)
    }

    #[test]
    fn solves_a_diffusion_like_system() {
        let matrix = Tridiagonal {
            main: array![-3.0, -4.0, -4.0, -3.0],
            off: array![1.0, 2.0, 1.0],
        };
        let expected = array![1.0, -2.0, 0.5, 4.0];
        let rhs = dot(&matrix, expected.view());
        let x = solve(&matrix, rhs.view()).unwrap();
        for (a, b) in x.iter().zip(expected.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn single_row() {
        let matrix = Tridiagonal {
            main: array![2.0],
            off: Array1::zeros(0),
        };
        assert_eq!(solve(&matrix, array![3.0].view()).unwrap(), array![1.5]);
    }

    #[test]
    fn zero_pivot_is_singular() {
        let matrix = Tridiagonal {
            main: array![1.0, 1.0, 1.0],
            off: array![1.0, 0.0],
        };
        assert_eq!(
            solve(&matrix, array![1.0, 1.0, 1.0].view()).unwrap_err(),
            CoreError::SingularSystem { row: 1 }
        );
    }
}
