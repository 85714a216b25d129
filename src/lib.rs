// library

pub mod calibrate;
pub mod convergence;
pub mod error;
pub mod flow;
pub mod gas;
pub mod klinkenberg;
pub mod objective;
pub mod sample;
pub mod series;
pub mod settings;
pub mod tridiagonal;
pub mod uncertainty;

pub use calibrate::{CalibrationResult, Calibrator};
pub use convergence::{study, ConvergenceReport, StudyTarget};
pub use error::{CoreError, Result};
pub use flow::{simulate, SimulationOutput};
pub use gas::{ConstantGas, GasProperties, GasState, IdealGas, ScaledGas};
pub use klinkenberg::KlinkenbergCorrelation;
pub use sample::{FitMode, ParameterVector, SampleGeometry};
pub use series::{ComputedSeries, MeasuredSeries};
pub use settings::Settings;

#[cfg(feature = "python")]
mod python {
    use numpy::{IntoPyArray, PyArray1, PyReadonlyArray1};
    use pyo3::{exceptions::PyValueError, pymodule, types::PyModule, PyErr, PyResult, Python};

    use crate::{
        objective, simulate, Calibrator, CoreError, FitMode, IdealGas, KlinkenbergCorrelation,
        MeasuredSeries, ParameterVector, SampleGeometry,
    };
    use crate::settings::{CalibrationSettings, SolverSettings};

    fn to_py(err: CoreError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }

    fn series(
        duration: PyReadonlyArray1<f64>,
        inlet: PyReadonlyArray1<f64>,
        outlet: PyReadonlyArray1<f64>,
        temperature: PyReadonlyArray1<f64>,
    ) -> PyResult<MeasuredSeries> {
        MeasuredSeries::new(
            duration.as_array().to_owned(),
            inlet.as_array().to_owned(),
            outlet.as_array().to_owned(),
            temperature.as_array().to_owned(),
        )
        .map_err(to_py)
    }

    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        //wrapper
        #[pyfn(m)]
        #[pyo3(name = "simulate")]
        #[allow(clippy::too_many_arguments)]
        fn simulate_py<'py>(
            py: Python<'py>,
            duration: PyReadonlyArray1<f64>,
            inlet: PyReadonlyArray1<f64>,
            outlet: PyReadonlyArray1<f64>,
            temperature: PyReadonlyArray1<f64>,
            length: f64,
            diameter: f64,
            inlet_chamber_volume: f64,
            outlet_chamber_volume: f64,
            gas: &str,
            permeability: f64,
            porosity: f64,
            number_of_cells: usize,
        ) -> PyResult<(&'py PyArray1<f64>, &'py PyArray1<f64>)> {
            let measured = series(duration, inlet, outlet, temperature)?;
            let geometry = SampleGeometry::cylinder(
                length,
                diameter,
                gas,
                inlet_chamber_volume,
                outlet_chamber_volume,
            )
            .map_err(to_py)?;
            let output = simulate(
                &measured,
                &geometry,
                &ParameterVector::new(permeability, porosity),
                &IdealGas,
                &SolverSettings::with_cells(number_of_cells),
            )
            .map_err(to_py)?;
            Ok((
                output.computed.inlet.into_pyarray(py),
                output.computed.outlet.into_pyarray(py),
            ))
        }

        /// Returns (apparent permeability, porosity, error in percent,
        /// intrinsic permeability or None, converged).
        #[pyfn(m)]
        #[pyo3(name = "calibrate")]
        #[allow(clippy::too_many_arguments)]
        fn calibrate_py(
            duration: PyReadonlyArray1<f64>,
            inlet: PyReadonlyArray1<f64>,
            outlet: PyReadonlyArray1<f64>,
            temperature: PyReadonlyArray1<f64>,
            length: f64,
            diameter: f64,
            inlet_chamber_volume: f64,
            outlet_chamber_volume: f64,
            gas: &str,
            permeability_guess: f64,
            porosity_guess: f64,
            mode: &str,
            number_of_cells: usize,
        ) -> PyResult<(f64, f64, f64, Option<f64>, bool)> {
            let measured = series(duration, inlet, outlet, temperature)?;
            let geometry = SampleGeometry::cylinder(
                length,
                diameter,
                gas,
                inlet_chamber_volume,
                outlet_chamber_volume,
            )
            .map_err(to_py)?;
            let mode: FitMode = mode.parse().map_err(to_py)?;
            let settings = CalibrationSettings {
                solver: SolverSettings::with_cells(number_of_cells),
                ..Default::default()
            };
            let result = Calibrator::new(&geometry, &IdealGas)
                .with_settings(settings)
                .fit(
                    &measured,
                    ParameterVector::new(permeability_guess, porosity_guess),
                    mode,
                )
                .map_err(to_py)?;
            Ok((
                result.parameters.permeability,
                result.parameters.porosity,
                result.error,
                result.intrinsic_permeability,
                result.converged,
            ))
        }

        #[pyfn(m)]
        #[pyo3(name = "klinkenberg_correction")]
        fn klinkenberg_correction_py(
            apparent_permeability: f64,
            mean_pore_pressure: f64,
        ) -> PyResult<f64> {
            KlinkenbergCorrelation::default()
                .correct(apparent_permeability, mean_pore_pressure)
                .map_err(to_py)
        }

        #[pyfn(m)]
        #[pyo3(name = "relative_error")]
        fn relative_error_py(
            measured_inlet: PyReadonlyArray1<f64>,
            measured_outlet: PyReadonlyArray1<f64>,
            computed_inlet: PyReadonlyArray1<f64>,
            computed_outlet: PyReadonlyArray1<f64>,
        ) -> PyResult<f64> {
            objective::relative_error(
                measured_inlet.as_array(),
                measured_outlet.as_array(),
                computed_inlet.as_array(),
                computed_outlet.as_array(),
            )
            .map_err(to_py)
        }

        Ok(())
    }
}
