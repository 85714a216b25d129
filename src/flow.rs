// Transient gas flow through a core between two chambers

use ndarray::{Array1, ArrayView1, Zip};
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::gas::{GasProperties, GasState};
use crate::sample::{ParameterVector, SampleGeometry};
use crate::series::{ComputedSeries, MeasuredSeries};
use crate::settings::SolverSettings;
use crate::tridiagonal::Tridiagonal;

/// Result of one full time-marched simulation.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationOutput {
    /// Boundary pressures on the measured duration grid.
    pub computed: ComputedSeries,
    /// Cell pressures after the last time step, in Pa.
    pub cell_pressure: Array1<f64>,
    pub diagnostics: SimulationDiagnostics,
}

/// Counters describing how well the nonlinear loop and the property lookups
/// behaved during one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimulationDiagnostics {
    /// Time steps.
    pub steps: usize,
    /// Picard iterations summed over all time steps.
    pub picard_iterations: usize,
    /// Time steps whose Picard loop used its whole budget without reaching
    /// the tolerance.
    pub unconverged_steps: usize,
    /// Cell evaluations that fell back to neutral gas properties.
    pub property_fallbacks: usize,
}

impl SimulationDiagnostics {
    pub fn converged(&self) -> bool {
        self.unconverged_steps == 0
    }

    pub fn degraded(&self) -> bool {
        self.property_fallbacks > 0
    }
}

fn check_cells(number_of_cells: usize) -> Result<()> {
    if number_of_cells < 3 {
        return Err(CoreError::InvalidSettings(format!(
            "number_of_cells must be at least 3, got {}",
            number_of_cells
        )));
    }
    Ok(())
}

/// Initial cell pressures: everything at the initial outlet pressure except
/// the inlet chamber cell.
pub fn initial_pressure(measured: &MeasuredSeries, number_of_cells: usize) -> Result<Array1<f64>> {
    check_cells(number_of_cells)?;
    let mut pressure = Array1::from_elem(number_of_cells, measured.initial_outlet());
    pressure[0] = measured.initial_inlet();
    Ok(pressure)
}

/// Permeability and porosity fields for a trial parameter pair.
///
/// The two chamber cells are pinned to 1 so that they never scale the
/// storage term with the trial values.
pub fn initialize_permeability_porosity(
    parameters: &ParameterVector,
    number_of_cells: usize,
) -> Result<(Array1<f64>, Array1<f64>)> {
    check_cells(number_of_cells)?;
    let mut permeability = Array1::from_elem(number_of_cells, parameters.permeability);
    let mut porosity = Array1::from_elem(number_of_cells, parameters.porosity);
    for boundary in [0, number_of_cells - 1] {
        permeability[boundary] = 1.0;
        porosity[boundary] = 1.0;
    }
    Ok((permeability, porosity))
}

/// Relative L2 norm of the change between two pressure fields
///
/// $$\begin{equation}
/// \varepsilon = \frac{\lVert p_{trial} - p_{prev} \rVert_2}{\lVert p_{prev} \rVert_2}
/// \end{equation}$$
///
/// Falls back to the absolute norm when the previous field is zero.
pub fn relative_change(trial: ArrayView1<'_, f64>, previous: ArrayView1<'_, f64>) -> f64 {
    let difference = Zip::from(&trial)
        .and(&previous)
        .fold(0.0, |acc, &a, &b| acc + (a - b).powi(2))
        .sqrt();
    let reference = previous.dot(&previous).sqrt();
    if reference > 0.0 {
        difference / reference
    } else {
        difference
    }
}

/// Cell-wise gas properties of the current iterate.
#[derive(Clone, Debug, PartialEq)]
pub struct CellProperties {
    pub compressibility: Array1<f64>,
    pub viscosity: Array1<f64>,
    pub density: Array1<f64>,
}

impl CellProperties {
    fn zeros(n: usize) -> Self {
        CellProperties {
            compressibility: Array1::zeros(n),
            viscosity: Array1::zeros(n),
            density: Array1::zeros(n),
        }
    }

    /// Evaluates every cell; failing lookups get [`GasState::NEUTRAL`].
    ///
    /// Returns the number of fallbacks.
    pub fn evaluate<G: GasProperties + ?Sized>(
        &mut self,
        gas: &G,
        gas_name: &str,
        temperature: f64,
        pressure: ArrayView1<'_, f64>,
    ) -> usize {
        let mut fallbacks = 0;
        for (i, &p) in pressure.iter().enumerate() {
            let state = gas
                .properties(temperature, p, gas_name)
                .unwrap_or_else(|err| {
                    fallbacks += 1;
                    debug!(cell = i, error = %err, "gas property lookup failed, using unit values");
                    GasState::NEUTRAL
                });
            self.compressibility[i] = state.compressibility;
            self.viscosity[i] = state.viscosity;
            self.density[i] = state.density;
        }
        fallbacks
    }
}

/// Builds the backward-Euler system for one Picard iteration.
///
/// Writes the tridiagonal matrix into `matrix` and the storage coefficients
/// (without transmissibilities) into `storage`. Off-diagonals are the face
/// transmissibilities
///
/// $$\begin{equation}
/// T_{i+1/2} = \frac{\bar\rho A \, k_h}{\bar\mu \, \Delta x}
/// \end{equation}$$
///
/// with arithmetic means $\bar\rho, \bar\mu$ and the harmonic mean $k_h$;
/// diagonals are $-(S_i + T_{i-1/2} + T_{i+1/2})$.
///
/// # Arguments
/// * geometry: core and chamber dimensions
/// * permeability: cell permeability field (chambers pinned to 1)
/// * porosity: cell porosity field (chambers pinned to 1)
/// * properties: gas properties of the current iterate
/// * dt: time step in s
/// * dx: cell spacing in m
pub fn build_diagonals(
    geometry: &SampleGeometry,
    permeability: ArrayView1<'_, f64>,
    porosity: ArrayView1<'_, f64>,
    properties: &CellProperties,
    dt: f64,
    dx: f64,
    matrix: &mut Tridiagonal,
    storage: &mut Array1<f64>,
) {
    let n = permeability.len();
    let rho = &properties.density;
    let mu = &properties.viscosity;
    let c = &properties.compressibility;

    for i in 0..n - 1 {
        let k_harmonic =
            2.0 * permeability[i] * permeability[i + 1] / (permeability[i] + permeability[i + 1]);
        let rho_mean = 0.5 * (rho[i] + rho[i + 1]);
        let mu_mean = 0.5 * (mu[i] + mu[i + 1]);
        matrix.off[i] = rho_mean * geometry.area * k_harmonic / (mu_mean * dx);
    }

    storage[0] = geometry.inlet_chamber_volume * rho[0] * c[0] / dt;
    storage[n - 1] = geometry.outlet_chamber_volume * rho[n - 1] * c[n - 1] / dt;
    for i in 1..n - 1 {
        storage[i] = geometry.area * porosity[i] * c[i] * rho[i] * dx / dt;
    }

    for i in 0..n {
        let mut coupling = 0.0;
        if i > 0 {
            coupling += matrix.off[i - 1];
        }
        if i + 1 < n {
            coupling += matrix.off[i];
        }
        matrix.main[i] = -(storage[i] + coupling);
    }
}

/// Scratch storage of one `simulate` call.
///
/// Allocated once per run and dropped with it, so nothing leaks between
/// optimizer evaluations.
struct Workspace {
    pressure: Array1<f64>,
    time_level: Array1<f64>,
    trial: Array1<f64>,
    permeability: Array1<f64>,
    porosity: Array1<f64>,
    properties: CellProperties,
    storage: Array1<f64>,
    matrix: Tridiagonal,
    scratch: Array1<f64>,
}

impl Workspace {
    fn new(measured: &MeasuredSeries, parameters: &ParameterVector, n: usize) -> Result<Self> {
        let (permeability, porosity) = initialize_permeability_porosity(parameters, n)?;
        Ok(Workspace {
            pressure: initial_pressure(measured, n)?,
            time_level: Array1::zeros(n),
            trial: Array1::zeros(n),
            permeability,
            porosity,
            properties: CellProperties::zeros(n),
            storage: Array1::zeros(n),
            matrix: Tridiagonal::zeros(n),
            scratch: Array1::zeros(n),
        })
    }
}

/// Simulates the pressure decay for one trial parameter pair.
///
/// The measured series provides the time grid, the initial chamber pressures
/// and the temperature; its later pressures are not used. Each step runs a
/// Picard loop that stops once the relative change drops below the tolerance
/// or after the iteration budget, keeping the last trial either way.
///
/// # Arguments
/// * measured: resampled measurement
/// * geometry: core and chamber dimensions
/// * parameters: trial permeability and porosity
/// * gas: gas property provider
/// * settings: cell count and Picard budget
///
/// # Returns
/// computed boundary pressures, the final cell field and run diagnostics
pub fn simulate<G: GasProperties + ?Sized>(
    measured: &MeasuredSeries,
    geometry: &SampleGeometry,
    parameters: &ParameterVector,
    gas: &G,
    settings: &SolverSettings,
) -> Result<SimulationOutput> {
    settings.validate()?;
    geometry.validate()?;
    parameters.validate()?;

    let n = settings.number_of_cells;
    let n_t = measured.len();
    let dx = geometry.cell_spacing(n);
    let duration = measured.duration();
    let temperature = measured.temperature();

    let mut work = Workspace::new(measured, parameters, n)?;
    let mut inlet = Array1::zeros(n_t);
    let mut outlet = Array1::zeros(n_t);
    inlet[0] = work.pressure[0];
    outlet[0] = work.pressure[n - 1];

    let mut diagnostics = SimulationDiagnostics {
        steps: n_t - 1,
        ..Default::default()
    };

    for step in 0..n_t - 1 {
        let dt = duration[step + 1] - duration[step];
        if !(dt > 0.0) {
            return Err(CoreError::NonIncreasingDurations {
                index: step + 1,
                previous: duration[step],
                current: duration[step + 1],
            });
        }
        work.time_level.assign(&work.pressure);

        let mut converged = false;
        for _ in 0..settings.max_picard_iterations {
            diagnostics.picard_iterations += 1;
            diagnostics.property_fallbacks += work.properties.evaluate(
                gas,
                &geometry.gas,
                temperature[step + 1],
                work.pressure.view(),
            );
            build_diagonals(
                geometry,
                work.permeability.view(),
                work.porosity.view(),
                &work.properties,
                dt,
                dx,
                &mut work.matrix,
                &mut work.storage,
            );
            Zip::from(&mut work.trial)
                .and(&work.storage)
                .and(&work.time_level)
                .for_each(|x, &s, &p| *x = -s * p);
            work.matrix
                .solve_into(work.trial.view_mut(), work.scratch.view_mut())?;
            if work.trial.iter().any(|p| !p.is_finite()) {
                return Err(CoreError::NonFiniteSolution { step: step + 1 });
            }

            let change = relative_change(work.trial.view(), work.pressure.view());
            work.pressure.assign(&work.trial);
            if change < settings.picard_tolerance {
                converged = true;
                break;
            }
        }
        if !converged {
            diagnostics.unconverged_steps += 1;
        }

        inlet[step + 1] = work.pressure[0];
        outlet[step + 1] = work.pressure[n - 1];
    }

    if diagnostics.degraded() {
        warn!(
            fallbacks = diagnostics.property_fallbacks,
            gas = %geometry.gas,
            "gas properties unavailable for some cells, neutral values were used"
        );
    }
    if !diagnostics.converged() {
        warn!(
            unconverged_steps = diagnostics.unconverged_steps,
            steps = diagnostics.steps,
            "picard loop hit its iteration budget"
        );
    }

    Ok(SimulationOutput {
        computed: ComputedSeries {
            duration: duration.to_owned(),
            inlet,
            outlet,
        },
        cell_pressure: work.pressure,
        diagnostics,
    })
}
