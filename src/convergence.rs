// Grid convergence study with Richardson extrapolation and GCI

use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calibrate::Calibrator;
use crate::error::{CoreError, Result};
use crate::flow::{simulate, SimulationDiagnostics};
use crate::gas::GasProperties;
use crate::sample::{FitMode, ParameterVector, SampleGeometry};
use crate::series::MeasuredSeries;
use crate::settings::{CalibrationSettings, ConvergenceSettings, SolverSettings};

/// How the observed order of convergence is estimated from three levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEstimate {
    /// $p = |\ln|\Delta_c / \Delta_f|| / \ln r$
    DirectRatio,
    /// $p = \ln(\Delta_c^2 / \Delta_f^2) / (2 \ln r)$, negative when the
    /// differences grow under refinement.
    SquaredDifference,
}

impl OrderEstimate {
    pub fn order(&self, delta_fine: f64, delta_coarse: f64, refinement_ratio: f64) -> f64 {
        match self {
            OrderEstimate::DirectRatio => {
                (delta_coarse / delta_fine).abs().ln().abs() / refinement_ratio.ln()
            }
            OrderEstimate::SquaredDifference => {
                (delta_coarse.powi(2) / delta_fine.powi(2)).ln() / (2.0 * refinement_ratio.ln())
            }
        }
    }
}

/// What each level of the study computes.
#[derive(Clone, Debug, PartialEq)]
pub enum StudyTarget {
    /// Simulate with fixed parameters.
    Fixed(ParameterVector),
    /// Calibrate at each level and keep the field of the fitted run.
    Calibrated {
        initial_guess: ParameterVector,
        mode: FitMode,
        settings: CalibrationSettings,
    },
}

/// Outcome of one resolution level.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvergenceRecord {
    pub number_of_cells: usize,
    pub time_samples: usize,
    /// Final pressure of the first cell (inlet chamber), in Pa.
    pub inlet: f64,
    /// Final pressure of the last cell (outlet chamber), in Pa.
    pub outlet: f64,
    /// Parameters the level was run with (fitted ones for calibrated studies).
    pub parameters: ParameterVector,
    pub diagnostics: SimulationDiagnostics,
}

/// Richardson extrapolation and GCI of one boundary quantity.
///
/// Values are plain IEEE results: identical levels give non-finite orders.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundaryConvergence {
    pub fine: f64,
    pub medium: f64,
    pub coarse: f64,
    pub order: f64,
    /// Richardson-extrapolated value from the two finest levels.
    pub extrapolated: f64,
    /// GCI between fine and medium level, in percent.
    pub gci_fine: f64,
    /// GCI between medium and coarse level, in percent.
    pub gci_coarse: f64,
    /// `gci_coarse / (r^p gci_fine)`; close to 1 in the asymptotic range.
    pub asymptotic_range: f64,
}

/// Observed order, extrapolated value and grid convergence indices of a
/// quantity computed on three levels with a constant refinement ratio
///
/// $$\begin{equation}
/// f_{exact} = f_1 + \frac{f_1 - f_2}{r^p - 1}, \qquad
/// GCI = F_s \frac{|e|}{r^p - 1} \times 100
/// \end{equation}$$
///
/// # Arguments
/// * values: quantity on the fine, medium and coarse level
/// * refinement_ratio: ratio r between successive levels
/// * safety_factor: F_s (1.25 for three-level studies, 3 for two-level)
/// * estimate: order estimation formula
pub fn richardson(
    values: [f64; 3],
    refinement_ratio: f64,
    safety_factor: f64,
    estimate: OrderEstimate,
) -> BoundaryConvergence {
    let [fine, medium, coarse] = values;
    let order = estimate.order(fine - medium, medium - coarse, refinement_ratio);
    let r_p = refinement_ratio.powf(order);
    let extrapolated = fine + (fine - medium) / (r_p - 1.0);
    let relative_error_fine = ((medium - fine) / fine).abs();
    let relative_error_coarse = ((coarse - medium) / medium).abs();
    let gci_fine = safety_factor * relative_error_fine / (r_p - 1.0) * 100.0;
    let gci_coarse = safety_factor * relative_error_coarse / (r_p - 1.0) * 100.0;
    BoundaryConvergence {
        fine,
        medium,
        coarse,
        order,
        extrapolated,
        gci_fine,
        gci_coarse,
        asymptotic_range: gci_coarse / (r_p * gci_fine),
    }
}

/// Grid convergence study of the boundary pressures.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvergenceReport {
    /// Fine, medium and coarse level.
    pub records: Vec<ConvergenceRecord>,
    pub refinement_ratio: f64,
    pub safety_factor: f64,
    pub inlet: BoundaryConvergence,
    pub outlet: BoundaryConvergence,
}

/// Combined space-time refinement ratio of the ladder.
///
/// Both transitions must refine by the same factor.
pub fn refinement_ratio(levels: &[(usize, usize); 3]) -> Result<f64> {
    let ratio = |a: (usize, usize), b: (usize, usize)| {
        (a.0 as f64 / b.0 as f64) * (a.1 as f64 / b.1 as f64)
    };
    let r_fine = ratio(levels[0], levels[1]);
    let r_coarse = ratio(levels[1], levels[2]);
    if !(r_fine > 1.0) || (r_fine - r_coarse).abs() > 1e-9 * r_fine {
        return Err(CoreError::InvalidSettings(format!(
            "levels must refine by one constant ratio > 1, got {} and {}",
            r_fine, r_coarse
        )));
    }
    Ok(r_fine)
}

fn run_level<G: GasProperties + ?Sized>(
    source: &MeasuredSeries,
    geometry: &SampleGeometry,
    target: &StudyTarget,
    gas: &G,
    (number_of_cells, time_samples): (usize, usize),
) -> Result<ConvergenceRecord> {
    let measured = source.resample_log(time_samples)?;
    let (parameters, cell_pressure, diagnostics) = match target {
        StudyTarget::Fixed(parameters) => {
            let settings = SolverSettings {
                number_of_cells,
                ..SolverSettings::default()
            };
            let output = simulate(&measured, geometry, parameters, gas, &settings)?;
            (*parameters, output.cell_pressure, output.diagnostics)
        }
        StudyTarget::Calibrated {
            initial_guess,
            mode,
            settings,
        } => {
            let mut settings = *settings;
            settings.solver.number_of_cells = number_of_cells;
            let result = Calibrator::new(geometry, gas)
                .with_settings(settings)
                .fit(&measured, *initial_guess, *mode)?;
            (result.parameters, result.cell_pressure, result.diagnostics)
        }
    };
    Ok(ConvergenceRecord {
        number_of_cells,
        time_samples,
        inlet: cell_pressure[0],
        outlet: cell_pressure[number_of_cells - 1],
        parameters,
        diagnostics,
    })
}

/// Runs the solver (or the whole calibration) on three resolutions and
/// evaluates the discretization error of the boundary pressures.
///
/// Every level receives its own resampled series, cell count and solver
/// arena, so the levels are independent; with `settings.parallel` they run
/// on the rayon pool.
///
/// # Arguments
/// * source: measurement to resample for each level (must start at 1 s)
/// * geometry: core and chamber dimensions
/// * target: fixed parameters or a calibration per level
/// * gas: gas property provider
/// * settings: resolution ladder, safety factor and order estimate
pub fn study<G: GasProperties + ?Sized>(
    source: &MeasuredSeries,
    geometry: &SampleGeometry,
    target: &StudyTarget,
    gas: &G,
    settings: &ConvergenceSettings,
) -> Result<ConvergenceReport> {
    let ratio = refinement_ratio(&settings.levels)?;
    let records: Vec<ConvergenceRecord> = if settings.parallel {
        settings
            .levels
            .par_iter()
            .map(|&level| run_level(source, geometry, target, gas, level))
            .collect::<Result<_>>()?
    } else {
        settings
            .levels
            .iter()
            .map(|&level| run_level(source, geometry, target, gas, level))
            .collect::<Result<_>>()?
    };

    let inlet = richardson(
        [records[0].inlet, records[1].inlet, records[2].inlet],
        ratio,
        settings.safety_factor,
        settings.order_estimate,
    );
    let outlet = richardson(
        [records[0].outlet, records[1].outlet, records[2].outlet],
        ratio,
        settings.safety_factor,
        settings.order_estimate,
    );
    info!(
        order_inlet = inlet.order,
        order_outlet = outlet.order,
        gci_inlet = inlet.gci_fine,
        gci_outlet = outlet.gci_fine,
        "grid convergence study finished"
    );
    Ok(ConvergenceReport {
        records,
        refinement_ratio: ratio,
        safety_factor: settings.safety_factor,
        inlet,
        outlet,
    })
}

impl fmt::Display for ConvergenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (inlet, outlet) = (&self.inlet, &self.outlet);
        writeln!(f, "--- Grid Convergence Study ---")?;
        writeln!(f)?;
        writeln!(f, "Number of grids = {}", self.records.len())?;
        writeln!(f, "Refinement ratio r = {}", self.refinement_ratio)?;
        writeln!(f)?;
        writeln!(f, "{:>8} {:>12}   quantity (first cell | last cell)", "cells", "time steps")?;
        for record in &self.records {
            writeln!(
                f,
                "{:>8} {:>12}   {:.0} | {:.0}",
                record.number_of_cells, record.time_samples, record.inlet, record.outlet
            )?;
        }
        writeln!(f)?;
        writeln!(f, "Order of convergence p = {:.5} | {:.5}", inlet.order, outlet.order)?;
        writeln!(
            f,
            "Richardson extrapolation p_exact = {:.0} | {:.0}",
            inlet.extrapolated, outlet.extrapolated
        )?;
        writeln!(f)?;
        writeln!(f, "Grid convergence index, factor of safety = {}", self.safety_factor)?;
        writeln!(f, "GCI 1-2 [%] = {:.4} | {:.4}", inlet.gci_fine, outlet.gci_fine)?;
        writeln!(f, "GCI 2-3 [%] = {:.4} | {:.4}", inlet.gci_coarse, outlet.gci_coarse)?;
        writeln!(
            f,
            "asymptotic range (1.0 = asymptotic) = {:.4} | {:.4}",
            inlet.asymptotic_range, outlet.asymptotic_range
        )
    }
}
