// Tunable constants of the solver, the calibration and the studies

use serde::{Deserialize, Serialize};

use crate::convergence::OrderEstimate;
use crate::error::{CoreError, Result};
use crate::klinkenberg::KlinkenbergCorrelation;

/// Discretization and Picard-loop budget of one simulation run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Cells along the core, the two chamber cells included.
    pub number_of_cells: usize,
    /// Relative L2 change below which the Picard loop stops.
    pub picard_tolerance: f64,
    /// Hard cap on Picard iterations per time step.
    pub max_picard_iterations: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            number_of_cells: 50,
            picard_tolerance: 1e-4,
            max_picard_iterations: 10,
        }
    }
}

impl SolverSettings {
    pub fn with_cells(number_of_cells: usize) -> Self {
        SolverSettings {
            number_of_cells,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.number_of_cells < 3 {
            return Err(CoreError::InvalidSettings(format!(
                "number_of_cells must be at least 3, got {}",
                self.number_of_cells
            )));
        }
        if self.max_picard_iterations == 0 {
            return Err(CoreError::InvalidSettings(
                "max_picard_iterations must be positive".to_string(),
            ));
        }
        if !(self.picard_tolerance > 0.0) {
            return Err(CoreError::InvalidSettings(
                "picard_tolerance must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Simplex search budget and penalty used by the calibrator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Standard deviation of the simplex objective values (percent) below
    /// which the search stops.
    pub tolerance: f64,
    /// Iteration budget per free parameter.
    pub max_iterations_per_dim: usize,
    /// Relative size of the initial simplex edges.
    pub initial_step: f64,
    /// Objective value assigned to evaluations whose simulation failed.
    pub penalty: f64,
    pub solver: SolverSettings,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        CalibrationSettings {
            tolerance: 1e-3,
            max_iterations_per_dim: 200,
            initial_step: 0.05,
            penalty: 1e10,
            solver: SolverSettings::default(),
        }
    }
}

/// Resolution ladder and GCI options of the grid convergence study.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceSettings {
    /// `(number_of_cells, number_of_time_samples)` from finest to coarsest.
    pub levels: [(usize, usize); 3],
    pub safety_factor: f64,
    pub order_estimate: OrderEstimate,
    /// Run the three levels on the rayon pool.
    pub parallel: bool,
}

impl Default for ConvergenceSettings {
    fn default() -> Self {
        ConvergenceSettings {
            levels: [(100, 200), (50, 100), (25, 50)],
            safety_factor: 1.25,
            order_estimate: OrderEstimate::DirectRatio,
            parallel: true,
        }
    }
}

/// Aggregate of every tunable, loadable from a JSON document.
///
/// Missing keys fall back to their defaults, so `{}` is a valid document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub calibration: CalibrationSettings,
    pub klinkenberg: KlinkenbergCorrelation,
    pub convergence: ConvergenceSettings,
    /// Points of the logarithmic time grid used when resampling raw data.
    pub time_samples: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            calibration: CalibrationSettings::default(),
            klinkenberg: KlinkenbergCorrelation::default(),
            convergence: ConvergenceSettings::default(),
            time_samples: crate::series::DEFAULT_TIME_SAMPLES,
        }
    }
}

impl Settings {
    pub fn from_json(text: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(text)?;
        settings.calibration.solver.validate()?;
        Ok(settings)
    }
}
