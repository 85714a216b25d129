// Sensitivity of the fitted parameters to measurement and property errors

use ndarray::{Array1, Zip};
use tracing::info;

use crate::calibrate::{CalibrationResult, Calibrator};
use crate::error::{CoreError, Result};
use crate::gas::{GasProperties, ScaledGas};
use crate::sample::{FitMode, ParameterVector, SampleGeometry};
use crate::series::MeasuredSeries;
use crate::settings::CalibrationSettings;

/// Full-scale range and relative accuracy of a pressure transducer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SensorError {
    /// full-scale range in Pa
    pub range: f64,
    /// accuracy as a fraction of the range
    pub error: f64,
}

/// Sign of a sensor drift on the two chambers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Drift {
    InletHighOutletLow,
    InletLowOutletHigh,
}

impl Drift {
    fn opposite(self) -> Drift {
        match self {
            Drift::InletHighOutletLow => Drift::InletLowOutletHigh,
            Drift::InletLowOutletHigh => Drift::InletHighOutletLow,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bound {
    Lower,
    Upper,
}

/// One perturbation of the measurement, the sample or the gas tables.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scenario {
    Baseline,
    /// Sensor error that is largest at the start and vanishes at the end of
    /// the test.
    SensorDrift(Drift),
    /// Offset added to the measured temperature, in K.
    Temperature(f64),
    /// Factors on the core length and diameter.
    Geometry { length: f64, diameter: f64 },
    /// Factor on both chamber volumes.
    ChamberVolumes(f64),
    /// Factors on the gas property lookups.
    GasProperties {
        compressibility: f64,
        viscosity: f64,
        density: f64,
    },
    /// Every perturbation at its lower or upper bound at once. `Lower` takes
    /// the sensor drift that lowered the fitted permeability, judged from the
    /// baseline and `SensorDrift(InletHighOutletLow)` fits, which must come
    /// earlier in the scenario list. `Upper` takes the other drift.
    Combined(Bound),
}

impl Scenario {
    /// The 17 runs of the standard uncertainty assessment.
    pub fn standard_set() -> Vec<Scenario> {
        vec![
            Scenario::Baseline,
            Scenario::SensorDrift(Drift::InletHighOutletLow),
            Scenario::SensorDrift(Drift::InletLowOutletHigh),
            Scenario::Combined(Bound::Lower),
            Scenario::Combined(Bound::Upper),
            Scenario::Temperature(-0.5),
            Scenario::Temperature(0.5),
            Scenario::Geometry {
                length: 0.995,
                diameter: 1.005,
            },
            Scenario::Geometry {
                length: 1.005,
                diameter: 0.995,
            },
            Scenario::ChamberVolumes(0.98),
            Scenario::ChamberVolumes(1.02),
            Scenario::GasProperties {
                compressibility: 0.997,
                viscosity: 1.0,
                density: 1.0,
            },
            Scenario::GasProperties {
                compressibility: 1.003,
                viscosity: 1.0,
                density: 1.0,
            },
            Scenario::GasProperties {
                compressibility: 1.0,
                viscosity: 0.96,
                density: 1.0,
            },
            Scenario::GasProperties {
                compressibility: 1.0,
                viscosity: 1.04,
                density: 1.0,
            },
            Scenario::GasProperties {
                compressibility: 1.0,
                viscosity: 1.0,
                density: 0.9996,
            },
            Scenario::GasProperties {
                compressibility: 1.0,
                viscosity: 1.0,
                density: 1.0004,
            },
        ]
    }
}

/// Inputs of one perturbed calibration.
#[derive(Clone, Debug, PartialEq)]
struct Perturbation {
    drift: Option<Drift>,
    temperature_offset: f64,
    length: f64,
    diameter: f64,
    chambers: f64,
    compressibility: f64,
    viscosity: f64,
    density: f64,
}

impl Default for Perturbation {
    fn default() -> Self {
        Perturbation {
            drift: None,
            temperature_offset: 0.0,
            length: 1.0,
            diameter: 1.0,
            chambers: 1.0,
            compressibility: 1.0,
            viscosity: 1.0,
            density: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScenarioFit {
    pub scenario: Scenario,
    pub result: CalibrationResult,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UncertaintyReport {
    pub fits: Vec<ScenarioFit>,
}

impl UncertaintyReport {
    pub fn baseline(&self) -> Option<&CalibrationResult> {
        find(&self.fits, Scenario::Baseline)
    }

    /// Smallest and largest fitted (apparent) permeability over all scenarios.
    pub fn permeability_range(&self) -> Option<(f64, f64)> {
        spread(self.fits.iter().map(|fit| fit.result.parameters.permeability))
    }

    pub fn porosity_range(&self) -> Option<(f64, f64)> {
        spread(self.fits.iter().map(|fit| fit.result.parameters.porosity))
    }
}

fn spread(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |range, v| match range {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

fn find(fits: &[ScenarioFit], scenario: Scenario) -> Option<&CalibrationResult> {
    fits.iter()
        .find(|fit| fit.scenario == scenario)
        .map(|fit| &fit.result)
}

/// Adds a linearly vanishing sensor error: the full `inlet_error` /
/// `outlet_error` at t = 0 and none at the last sample.
pub fn apply_drift(
    series: &MeasuredSeries,
    drift: Drift,
    inlet_error: f64,
    outlet_error: f64,
) -> Result<MeasuredSeries> {
    let t_max = series.max_duration();
    let sign = match drift {
        Drift::InletHighOutletLow => 1.0,
        Drift::InletLowOutletHigh => -1.0,
    };
    let ramp = series.duration().mapv(|t| 1.0 - t / t_max);
    let inlet: Array1<f64> = Zip::from(series.inlet())
        .and(&ramp)
        .map_collect(|&p, &w| p + sign * inlet_error * w);
    let outlet: Array1<f64> = Zip::from(series.outlet())
        .and(&ramp)
        .map_collect(|&p, &w| p - sign * outlet_error * w);
    series.with_pressures(inlet, outlet)
}

fn combined(bound: Bound, drift: Drift) -> Perturbation {
    match bound {
        Bound::Lower => Perturbation {
            drift: Some(drift),
            temperature_offset: -0.5,
            length: 0.995,
            diameter: 1.005,
            chambers: 0.98,
            compressibility: 0.997,
            viscosity: 0.96,
            density: 0.9996,
        },
        Bound::Upper => Perturbation {
            drift: Some(drift),
            temperature_offset: 0.5,
            length: 1.005,
            diameter: 0.995,
            chambers: 1.02,
            compressibility: 1.003,
            viscosity: 1.04,
            density: 1.0004,
        },
    }
}

fn perturbation(scenario: Scenario, fits: &[ScenarioFit]) -> Result<Perturbation> {
    let perturbation = match scenario {
        Scenario::Baseline => Perturbation::default(),
        Scenario::SensorDrift(drift) => Perturbation {
            drift: Some(drift),
            ..Default::default()
        },
        Scenario::Temperature(offset) => Perturbation {
            temperature_offset: offset,
            ..Default::default()
        },
        Scenario::Geometry { length, diameter } => Perturbation {
            length,
            diameter,
            ..Default::default()
        },
        Scenario::ChamberVolumes(factor) => Perturbation {
            chambers: factor,
            ..Default::default()
        },
        Scenario::GasProperties {
            compressibility,
            viscosity,
            density,
        } => Perturbation {
            compressibility,
            viscosity,
            density,
            ..Default::default()
        },
        Scenario::Combined(bound) => {
            let reference = find(fits, Scenario::Baseline);
            let drifted = find(fits, Scenario::SensorDrift(Drift::InletHighOutletLow));
            let (reference, drifted) = match (reference, drifted) {
                (Some(r), Some(d)) => (r, d),
                _ => {
                    return Err(CoreError::InvalidSettings(
                        "combined scenarios need the baseline and the \
                         inlet-high/outlet-low drift fits first"
                            .to_string(),
                    ))
                }
            };
            // drift that moves k down
            let drift = if reference.parameters.permeability > drifted.parameters.permeability {
                Drift::InletHighOutletLow
            } else {
                Drift::InletLowOutletHigh
            };
            let drift = match bound {
                Bound::Lower => drift,
                Bound::Upper => drift.opposite(),
            };
            combined(bound, drift)
        }
    };
    Ok(perturbation)
}

/// Re-calibrates the sample under each scenario in order.
///
/// Sensor errors are `range * (error + e_0)` where `e_0` is the relative fit
/// error of the baseline run (zero until the baseline has been fitted).
///
/// # Arguments
/// * measured: resampled measurement
/// * geometry: nominal sample geometry
/// * gas: nominal property provider
/// * initial_guess: starting point of every calibration
/// * mode: which parameters are free
/// * scenarios: perturbations to run, see `Scenario::standard_set`
/// * sensors: inlet and outlet transducer errors
/// * settings: calibration budget
#[allow(clippy::too_many_arguments)]
pub fn run<G: GasProperties + ?Sized>(
    measured: &MeasuredSeries,
    geometry: &SampleGeometry,
    gas: &G,
    initial_guess: ParameterVector,
    mode: FitMode,
    scenarios: &[Scenario],
    sensors: (SensorError, SensorError),
    settings: &CalibrationSettings,
) -> Result<UncertaintyReport> {
    let (inlet_sensor, outlet_sensor) = sensors;
    let mut fits: Vec<ScenarioFit> = Vec::with_capacity(scenarios.len());
    for &scenario in scenarios {
        let p = perturbation(scenario, &fits)?;
        let base_error = find(&fits, Scenario::Baseline).map_or(0.0, |r| r.error / 100.0);

        let mut series = measured.with_temperature_offset(p.temperature_offset)?;
        if let Some(drift) = p.drift {
            series = apply_drift(
                &series,
                drift,
                inlet_sensor.range * (inlet_sensor.error + base_error),
                outlet_sensor.range * (outlet_sensor.error + base_error),
            )?;
        }
        let sample = SampleGeometry {
            length: geometry.length * p.length,
            area: geometry.area * p.diameter.powi(2),
            gas: geometry.gas.clone(),
            inlet_chamber_volume: geometry.inlet_chamber_volume * p.chambers,
            outlet_chamber_volume: geometry.outlet_chamber_volume * p.chambers,
        };
        let scaled = ScaledGas {
            compressibility: p.compressibility,
            viscosity: p.viscosity,
            density: p.density,
            ..ScaledGas::new(gas)
        };

        let result = Calibrator::new(&sample, &scaled)
            .with_settings(*settings)
            .fit(&series, initial_guess, mode)?;
        info!(
            scenario = ?scenario,
            permeability = result.parameters.permeability,
            porosity = result.parameters.porosity,
            error = result.error,
            "uncertainty scenario fitted"
        );
        fits.push(ScenarioFit { scenario, result });
    }
    Ok(UncertaintyReport { fits })
}
