// Permeability/porosity calibration against a measured pressure decay

use std::cell::RefCell;

use argmin::core::{
    CostFunction, Error as ArgminError, Executor, State, TerminationReason, TerminationStatus,
};
use argmin::solver::neldermead::NelderMead;
use ndarray::Array1;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::flow::{simulate, SimulationDiagnostics};
use crate::gas::GasProperties;
use crate::klinkenberg::KlinkenbergCorrelation;
use crate::objective;
use crate::sample::{FitMode, ParameterVector, SampleGeometry};
use crate::series::{ComputedSeries, MeasuredSeries};
use crate::settings::{CalibrationSettings, SolverSettings};

/// One objective evaluation made during the search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Evaluation {
    pub parameters: ParameterVector,
    /// Relative error in percent, or the penalty when the simulation failed.
    pub error: f64,
}

/// Fitted parameters with everything needed to judge the fit.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationResult {
    /// Best parameters; `permeability` is the apparent (gas) permeability.
    pub parameters: ParameterVector,
    /// Klinkenberg-corrected permeability, absent when the correction failed.
    pub intrinsic_permeability: Option<f64>,
    /// Mean pore pressure used for the correction, in Pa.
    pub mean_pore_pressure: f64,
    /// Objective of the clean re-simulation at `parameters`, in percent.
    pub error: f64,
    pub computed: ComputedSeries,
    pub cell_pressure: Array1<f64>,
    pub diagnostics: SimulationDiagnostics,
    pub trace: Vec<Evaluation>,
    pub converged: bool,
    pub iterations: usize,
    pub evaluations: usize,
}

impl CalibrationResult {
    pub fn apparent_permeability(&self) -> f64 {
        self.parameters.permeability
    }
}

/// Calibration over one window of a stepwise run.
#[derive(Clone, Debug, PartialEq)]
pub struct StepwiseFit {
    /// Last duration of the window, in s.
    pub window_end: f64,
    pub result: CalibrationResult,
}

/// Fits permeability (and optionally porosity) by a Nelder-Mead search on
/// the simulated-vs-measured error.
pub struct Calibrator<'a, G: ?Sized> {
    geometry: &'a SampleGeometry,
    gas: &'a G,
    pub settings: CalibrationSettings,
    pub klinkenberg: KlinkenbergCorrelation,
}

impl<'a, G: GasProperties + ?Sized> Calibrator<'a, G> {
    pub fn new(geometry: &'a SampleGeometry, gas: &'a G) -> Self {
        Calibrator {
            geometry,
            gas,
            settings: CalibrationSettings::default(),
            klinkenberg: KlinkenbergCorrelation::default(),
        }
    }

    pub fn with_settings(mut self, settings: CalibrationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_klinkenberg(mut self, klinkenberg: KlinkenbergCorrelation) -> Self {
        self.klinkenberg = klinkenberg;
        self
    }

    /// Calibrates against `measured`.
    ///
    /// The search runs in coordinates scaled by the initial guess. Failed
    /// simulations score `settings.penalty`. After the search the best point
    /// is simulated once more from scratch to produce the reported series.
    ///
    /// # Arguments
    /// * measured: resampled measurement
    /// * initial_guess: starting point; its porosity is kept in permeability mode
    /// * mode: which parameters are free
    pub fn fit(
        &self,
        measured: &MeasuredSeries,
        initial_guess: ParameterVector,
        mode: FitMode,
    ) -> Result<CalibrationResult> {
        measured.ensure_not_degenerate()?;
        self.geometry.validate()?;
        self.settings.solver.validate()?;
        initial_guess.validate()?;

        let dimension = mode.dimension();
        let trace = RefCell::new(Vec::new());
        let problem = DecayFit {
            measured,
            geometry: self.geometry,
            gas: self.gas,
            solver: self.settings.solver,
            initial_guess,
            mode,
            penalty: self.settings.penalty,
            trace: &trace,
        };
        let solver = NelderMead::new(initial_simplex(dimension, self.settings.initial_step))
            .with_sd_tolerance(self.settings.tolerance)
            .map_err(optimizer_error)?;
        let max_iterations = (self.settings.max_iterations_per_dim * dimension) as u64;
        let search = Executor::new(problem, solver)
            .configure(|state| state.max_iters(max_iterations))
            .run()
            .map_err(optimizer_error)?;

        let state = search.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| CoreError::Optimizer("search returned no point".to_string()))?;
        let parameters = unscale(best, &initial_guess, mode);
        let iterations = state.get_iter() as usize;
        let converged = matches!(
            state.get_termination_status(),
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        );
        // the problem borrows the trace
        drop(search);
        let trace = trace.into_inner();
        let evaluations = trace.len();

        let output = simulate(
            measured,
            self.geometry,
            &parameters,
            self.gas,
            &self.settings.solver,
        )?;
        let error = objective::error(measured, &output.computed)?;

        let mean_pore_pressure = measured.mean_pore_pressure();
        let intrinsic_permeability = match self
            .klinkenberg
            .correct(parameters.permeability, mean_pore_pressure)
        {
            Ok(k) => Some(k),
            Err(err) => {
                warn!(error = %err, "klinkenberg correction unavailable");
                None
            }
        };

        if !converged {
            warn!(
                iterations,
                evaluations,
                "nelder-mead stopped on its budget before reaching the tolerance"
            );
        }
        info!(
            permeability = parameters.permeability,
            porosity = parameters.porosity,
            intrinsic = ?intrinsic_permeability,
            error,
            evaluations,
            "calibration finished"
        );

        Ok(CalibrationResult {
            parameters,
            intrinsic_permeability,
            mean_pore_pressure,
            error,
            computed: output.computed,
            cell_pressure: output.cell_pressure,
            diagnostics: output.diagnostics,
            trace,
            converged,
            iterations,
            evaluations,
        })
    }

    /// Calibrates on growing windows (10 %, 20 %, ... 100 % of the
    /// measurement) to show whether the fitted permeability has settled.
    ///
    /// Each window of the raw series is resampled onto `time_samples` log
    /// points. Windows too short to resample are skipped.
    pub fn fit_stepwise(
        &self,
        raw: &MeasuredSeries,
        initial_guess: ParameterVector,
        mode: FitMode,
        time_samples: usize,
    ) -> Result<Vec<StepwiseFit>> {
        let mut fits = Vec::with_capacity(10);
        for tenth in 1..=10 {
            let window_end = raw.max_duration() * tenth as f64 / 10.0;
            let window = match raw
                .window(window_end)
                .and_then(|w| w.resample_log(time_samples))
            {
                Ok(window) => window,
                Err(err @ (CoreError::SeriesTooShort { .. } | CoreError::DegenerateSeries(_))) => {
                    debug!(window_end, error = %err, "window skipped");
                    continue;
                }
                Err(err) => return Err(err),
            };
            let result = self.fit(&window, initial_guess, mode)?;
            fits.push(StepwiseFit {
                window_end: window.max_duration(),
                result,
            });
        }
        Ok(fits)
    }
}

/// Objective of the simplex search: relative error of a simulation at
/// parameters scaled by the initial guess.
///
/// Failed simulations score `penalty` instead of aborting the search. Every
/// call is appended to `trace`.
struct DecayFit<'a, G: ?Sized> {
    measured: &'a MeasuredSeries,
    geometry: &'a SampleGeometry,
    gas: &'a G,
    solver: SolverSettings,
    initial_guess: ParameterVector,
    mode: FitMode,
    penalty: f64,
    trace: &'a RefCell<Vec<Evaluation>>,
}

impl<G: GasProperties + ?Sized> CostFunction for DecayFit<'_, G> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> std::result::Result<f64, ArgminError> {
        let parameters = unscale(x, &self.initial_guess, self.mode);
        let error = simulate(
            self.measured,
            self.geometry,
            &parameters,
            self.gas,
            &self.solver,
        )
        .and_then(|output| objective::error(self.measured, &output.computed));
        let error = match error {
            Ok(error) if error.is_finite() => error,
            Ok(error) => {
                debug!(error, "non-finite objective, penalised");
                self.penalty
            }
            Err(err) => {
                debug!(error = %err, "evaluation failed, penalised");
                self.penalty
            }
        };
        debug!(
            permeability = parameters.permeability,
            porosity = parameters.porosity,
            error,
            "evaluation"
        );
        self.trace.borrow_mut().push(Evaluation { parameters, error });
        Ok(error)
    }
}

/// Start point at 1 in every scaled coordinate plus one vertex per
/// coordinate moved by `step`.
fn initial_simplex(dimension: usize, step: f64) -> Vec<Vec<f64>> {
    let start = vec![1.0; dimension];
    let mut simplex = vec![start.clone()];
    for j in 0..dimension {
        let mut vertex = start.clone();
        vertex[j] += step;
        simplex.push(vertex);
    }
    simplex
}

fn optimizer_error(err: ArgminError) -> CoreError {
    CoreError::Optimizer(err.to_string())
}

/// Maps scaled search coordinates back to physical parameters.
fn unscale(x: &[f64], initial_guess: &ParameterVector, mode: FitMode) -> ParameterVector {
    match mode {
        FitMode::Permeability => ParameterVector {
            permeability: x[0] * initial_guess.permeability,
            porosity: initial_guess.porosity,
        },
        FitMode::Both => ParameterVector {
            permeability: x[0] * initial_guess.permeability,
            porosity: x[1] * initial_guess.porosity,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas::IdealGas;
    use crate::settings::SolverSettings;
    use approx::assert_relative_eq;
    use ndarray::Array;

    fn geometry() -> SampleGeometry {
        SampleGeometry::cylinder(0.05, 0.05, "N2", 10e-6, 10e-6).unwrap()
    }

    fn synthetic(truth: ParameterVector, cells: usize) -> MeasuredSeries {
        let duration = Array::geomspace(1.0, 2000.0, 12).unwrap();
        let template = MeasuredSeries::new(
            duration.clone(),
            Array1::from_elem(12, 5e6),
            Array1::from_elem(12, 1e5),
            Array1::from_elem(12, 298.0),
        )
        .unwrap();
        let out = simulate(
            &template,
            &geometry(),
            &truth,
            &IdealGas,
            &SolverSettings::with_cells(cells),
        )
        .unwrap();
        template
            .with_pressures(out.computed.inlet, out.computed.outlet)
            .unwrap()
    }

    #[test]
    fn unscale_keeps_porosity_in_permeability_mode() {
        let guess = ParameterVector::new(1e-18, 0.2);
        let p = unscale(&[3.0], &guess, FitMode::Permeability);
        assert_relative_eq!(p.permeability, 3e-18);
        assert_eq!(p.porosity, 0.2);
        let p = unscale(&[2.0, 0.5], &guess, FitMode::Both);
        assert_relative_eq!(p.porosity, 0.1);
    }

    #[test]
    fn initial_simplex_moves_one_coordinate_per_vertex() {
        let simplex = initial_simplex(2, 0.05);
        assert_eq!(simplex, vec![vec![1.0, 1.0], vec![1.05, 1.0], vec![1.0, 1.05]]);
    }

    #[test]
    fn recovers_permeability_with_fixed_porosity() {
        let truth = ParameterVector::new(2e-18, 0.1);
        let measured = synthetic(truth, 20);
        let gas = IdealGas;
        let geometry = geometry();
        let mut settings = CalibrationSettings::default();
        settings.solver = SolverSettings::with_cells(20);
        let calibrator = Calibrator::new(&geometry, &gas).with_settings(settings);

        let result = calibrator
            .fit(&measured, ParameterVector::new(1e-18, 0.1), FitMode::Permeability)
            .unwrap();
        assert!(result.converged);
        assert_relative_eq!(result.parameters.permeability, 2e-18, max_relative = 0.02);
        assert_eq!(result.parameters.porosity, 0.1);
        assert!(result.error < 0.5);
        assert_eq!(result.trace.len(), result.evaluations);
        assert!(result.intrinsic_permeability.unwrap() < result.apparent_permeability());
    }

    #[test]
    fn failed_evaluations_are_penalised_not_fatal() {
        let truth = ParameterVector::new(2e-18, 0.1);
        let measured = synthetic(truth, 10);
        let gas = IdealGas;
        let geometry = geometry();
        let mut settings = CalibrationSettings::default();
        settings.solver = SolverSettings::with_cells(10);
        // a large first step pushes the simplex across k = 0
        settings.initial_step = -1.5;
        let calibrator = Calibrator::new(&geometry, &gas).with_settings(settings);
        let result = calibrator
            .fit(&measured, ParameterVector::new(1e-18, 0.1), FitMode::Permeability)
            .unwrap();
        assert!(result.trace.iter().any(|e| e.error == settings.penalty));
        assert!(result.parameters.permeability > 0.0);
    }

    #[test]
    fn exhausted_budget_still_returns_the_best_point() {
        let truth = ParameterVector::new(2e-18, 0.1);
        let measured = synthetic(truth, 10);
        let gas = IdealGas;
        let geometry = geometry();
        let mut settings = CalibrationSettings::default();
        settings.solver = SolverSettings::with_cells(10);
        settings.max_iterations_per_dim = 3;
        let calibrator = Calibrator::new(&geometry, &gas).with_settings(settings);
        let result = calibrator
            .fit(&measured, ParameterVector::new(1e-18, 0.1), FitMode::Permeability)
            .unwrap();
        assert!(!result.converged);
        assert!(result.error.is_finite());
        assert_eq!(result.computed.len(), measured.len());
    }

    #[test]
    fn degenerate_measurement_is_fatal() {
        let zero = MeasuredSeries::from_rows(&[(1.0, 0.0, 0.0, 298.0), (2.0, 0.0, 0.0, 298.0)])
            .unwrap();
        let gas = IdealGas;
        let geometry = geometry();
        let result = Calibrator::new(&geometry, &gas).fit(
            &zero,
            ParameterVector::new(1e-18, 0.1),
            FitMode::Both,
        );
        assert!(matches!(result, Err(CoreError::DegenerateSeries(_))));
    }
}
