// Klinkenberg gas-slippage correction

use anyhow::{bail, Result as AnyResult};
use peroxide::fuga::RootFindingProblem;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Empirical slip-flow correlation between apparent and intrinsic permeability
///
/// $$\begin{equation}
/// k_a = k_i + \frac{b \, k_i^{m}}{\bar p}
/// \end{equation}$$
///
/// with $k$ in m² and the mean pore pressure $\bar p$ expressed in
/// `pressure_unit` (bar by default).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KlinkenbergCorrelation {
    /// slip coefficient b
    pub coefficient: f64,
    /// exponent m
    pub exponent: f64,
    /// Pa per unit of mean pressure used by the correlation
    pub pressure_unit: f64,
    /// fixed number of Newton iterations
    pub iterations: usize,
}

impl Default for KlinkenbergCorrelation {
    fn default() -> Self {
        KlinkenbergCorrelation {
            coefficient: 3.05351e-6,
            exponent: 0.65,
            pressure_unit: 1e5,
            iterations: 5,
        }
    }
}

/// Root-finding problem $f(k_i) = b k_i^m / \bar p + k_i - k_a$
struct SlipResidual {
    correlation: KlinkenbergCorrelation,
    apparent: f64,
    mean_pressure: f64,
}

impl SlipResidual {
    fn residual(&self, k: f64) -> f64 {
        let c = &self.correlation;
        c.coefficient * k.powf(c.exponent) / self.mean_pressure + k - self.apparent
    }

    fn slope(&self, k: f64) -> f64 {
        let c = &self.correlation;
        c.exponent * c.coefficient / (self.mean_pressure * k.powf(1.0 - c.exponent)) + 1.0
    }
}

impl RootFindingProblem<1, 1, f64> for SlipResidual {
    fn function(&self, x: [f64; 1]) -> AnyResult<[f64; 1]> {
        if !(x[0] > 0.0) {
            bail!("permeability iterate {} is not positive", x[0]);
        }
        Ok([self.residual(x[0])])
    }

    fn initial_guess(&self) -> f64 {
        self.apparent
    }

    fn derivative(&self, x: [f64; 1]) -> AnyResult<[[f64; 1]; 1]> {
        if !(x[0] > 0.0) {
            bail!("permeability iterate {} is not positive", x[0]);
        }
        Ok([[self.slope(x[0])]])
    }
}

impl KlinkenbergCorrelation {
    fn problem(&self, apparent_permeability: f64, mean_pore_pressure: f64) -> Result<SlipResidual> {
        if !(apparent_permeability > 0.0) || !apparent_permeability.is_finite() {
            return Err(CoreError::Klinkenberg(format!(
                "apparent permeability must be positive, got {}",
                apparent_permeability
            )));
        }
        if !(mean_pore_pressure > 0.0) || !mean_pore_pressure.is_finite() {
            return Err(CoreError::Klinkenberg(format!(
                "mean pore pressure must be positive, got {} Pa",
                mean_pore_pressure
            )));
        }
        Ok(SlipResidual {
            correlation: *self,
            apparent: apparent_permeability,
            mean_pressure: mean_pore_pressure / self.pressure_unit,
        })
    }

    /// Intrinsic permeability after a fixed number of Newton steps.
    ///
    /// Starts from the apparent permeability and performs exactly
    /// `iterations` updates without a convergence test, so identical inputs
    /// always give the identical answer. A step that leaves the positive
    /// axis (very low mean pressure) is reported as an error.
    ///
    /// # Arguments
    /// * apparent_permeability: fitted permeability in m^2
    /// * mean_pore_pressure: mean pore pressure in Pa
    pub fn correct(&self, apparent_permeability: f64, mean_pore_pressure: f64) -> Result<f64> {
        let problem = self.problem(apparent_permeability, mean_pore_pressure)?;
        let mut k = problem.initial_guess();
        for _ in 0..self.iterations {
            let f = problem
                .function([k])
                .map_err(|err| CoreError::Klinkenberg(err.to_string()))?;
            let df = problem
                .derivative([k])
                .map_err(|err| CoreError::Klinkenberg(err.to_string()))?;
            k -= f[0] / df[0][0];
        }
        if !(k > 0.0) || !k.is_finite() {
            return Err(CoreError::Klinkenberg(format!(
                "newton iterate {} is not a permeability",
                k
            )));
        }
        Ok(k)
    }

    /// Value of the correlation residual at `intrinsic_permeability`.
    pub fn residual(
        &self,
        intrinsic_permeability: f64,
        apparent_permeability: f64,
        mean_pore_pressure: f64,
    ) -> f64 {
        SlipResidual {
            correlation: *self,
            apparent: apparent_permeability,
            mean_pressure: mean_pore_pressure / self.pressure_unit,
        }
        .residual(intrinsic_permeability)
    }
}

/// Steady-state gas permeability from a flow-through measurement
///
/// $$\begin{equation}
/// k = \frac{2 Q L \mu p_{ref}}{A \left(p_{in}^2 - p_{out}^2\right)}
/// \end{equation}$$
///
/// # Arguments
/// * flow_rate: volumetric flow rate at `p_ref` in m^3/s
/// * length: sample length in m
/// * area: flow cross-section in m^2
/// * viscosity: gas viscosity at mean pressure in Pa.s
/// * p_in: inlet pressure in Pa
/// * p_out: outlet pressure in Pa
/// * p_ref: pressure the flow rate refers to in Pa
///
/// # Returns
/// apparent permeability in m^2
pub fn steady_state_permeability(
    flow_rate: f64,
    length: f64,
    area: f64,
    viscosity: f64,
    p_in: f64,
    p_out: f64,
    p_ref: f64,
) -> f64 {
    2.0 * flow_rate * length * viscosity * p_ref / (area * (p_in.powi(2) - p_out.powi(2)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn matches_reference_iterates() {
        let correlation = KlinkenbergCorrelation::default();
        let k = correlation.correct(1e-18, 50e5).unwrap();
        assert_relative_eq!(k, 8.872637409748042e-19, max_relative = 1e-12);
        let k = correlation.correct(1e-14, 2e5).unwrap();
        assert_relative_eq!(k, 8.877567006141814e-15, max_relative = 1e-12);
    }

    #[test]
    fn corrected_value_satisfies_the_correlation() {
        let correlation = KlinkenbergCorrelation::default();
        for (apparent, pressure) in [(1e-15, 10e5), (3e-17, 80e5), (1e-19, 200e5)] {
            let k = correlation.correct(apparent, pressure).unwrap();
            assert!(k < apparent);
            let residual = correlation.residual(k, apparent, pressure);
            assert!(residual.abs() < 1e-9 * apparent, "residual {}", residual);
        }
    }

    #[test]
    fn fixed_budget_is_deterministic() {
        let correlation = KlinkenbergCorrelation::default();
        let a = correlation.correct(2.5e-17, 12e5).unwrap();
        let b = correlation.correct(2.5e-17, 12e5).unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn low_pressure_overshoot_is_an_error() {
        let correlation = KlinkenbergCorrelation::default();
        assert!(matches!(
            correlation.correct(1e-18, 1e5),
            Err(CoreError::Klinkenberg(_))
        ));
        assert!(correlation.correct(-1e-18, 1e7).is_err());
        assert!(correlation.correct(1e-18, 0.0).is_err());
    }

    #[test]
    fn steady_state_formula() {
        let k = steady_state_permeability(1e-6, 0.05, 2e-3, 1.8e-5, 2e5, 1e5, 1e5);
        assert_relative_eq!(k, 2.0 * 1e-6 * 0.05 * 1.8e-5 * 1e5 / (2e-3 * 3e10));
    }
}
