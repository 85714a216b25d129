// Measured and computed pressure series

use ndarray::{Array, Array1, ArrayView1};

use crate::error::{CoreError, Result};

/// Points of the logarithmic time grid used when resampling raw data.
pub const DEFAULT_TIME_SAMPLES: usize = 100;

/// Pressure-decay measurement: duration (s), inlet and outlet pressure (Pa)
/// and temperature (K), one entry per sample.
///
/// Construction checks that the four channels have the same length, that
/// there are at least two samples and that durations are strictly increasing.
#[derive(Clone, Debug, PartialEq)]
pub struct MeasuredSeries {
    duration: Array1<f64>,
    inlet: Array1<f64>,
    outlet: Array1<f64>,
    temperature: Array1<f64>,
}

impl MeasuredSeries {
    pub fn new(
        duration: Array1<f64>,
        inlet: Array1<f64>,
        outlet: Array1<f64>,
        temperature: Array1<f64>,
    ) -> Result<Self> {
        let n_t = duration.len();
        if inlet.len() != n_t || outlet.len() != n_t || temperature.len() != n_t {
            return Err(CoreError::ChannelLengthMismatch);
        }
        if n_t < 2 {
            return Err(CoreError::SeriesTooShort {
                required: 2,
                actual: n_t,
            });
        }
        check_durations(duration.view())?;
        let all_finite = inlet
            .iter()
            .chain(outlet.iter())
            .chain(temperature.iter())
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(CoreError::DegenerateSeries(
                "pressures and temperatures must be finite".to_string(),
            ));
        }
        Ok(MeasuredSeries {
            duration,
            inlet,
            outlet,
            temperature,
        })
    }

    /// Builds a series from row tuples `(duration, inlet, outlet, temperature)`.
    pub fn from_rows(rows: &[(f64, f64, f64, f64)]) -> Result<Self> {
        MeasuredSeries::new(
            rows.iter().map(|r| r.0).collect(),
            rows.iter().map(|r| r.1).collect(),
            rows.iter().map(|r| r.2).collect(),
            rows.iter().map(|r| r.3).collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.duration.len()
    }

    pub fn is_empty(&self) -> bool {
        self.duration.is_empty()
    }

    pub fn duration(&self) -> ArrayView1<'_, f64> {
        self.duration.view()
    }

    pub fn inlet(&self) -> ArrayView1<'_, f64> {
        self.inlet.view()
    }

    pub fn outlet(&self) -> ArrayView1<'_, f64> {
        self.outlet.view()
    }

    pub fn temperature(&self) -> ArrayView1<'_, f64> {
        self.temperature.view()
    }

    pub fn max_duration(&self) -> f64 {
        self.duration[self.len() - 1]
    }

    pub fn initial_inlet(&self) -> f64 {
        self.inlet[0]
    }

    pub fn initial_outlet(&self) -> f64 {
        self.outlet[0]
    }

    /// Time average of the mean of inlet and outlet pressure, in Pa.
    pub fn mean_pore_pressure(&self) -> f64 {
        (&self.inlet + &self.outlet).mean().unwrap_or(0.0) / 2.0
    }

    /// Fails when every pressure is zero, which makes relative errors undefined.
    pub fn ensure_not_degenerate(&self) -> Result<()> {
        let norm = self.inlet.mapv(|p| p * p).sum() + self.outlet.mapv(|p| p * p).sum();
        if norm <= f64::MIN_POSITIVE {
            return Err(CoreError::DegenerateSeries(
                "all measured pressures are zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Interpolates the series linearly onto `geomspace(1, max_duration, n)`,
    /// rounded to 0.01 s.
    ///
    /// The raw series must start at or before 1 s.
    ///
    /// # Arguments
    /// * time_samples: number of points of the logarithmic grid
    pub fn resample_log(&self, time_samples: usize) -> Result<MeasuredSeries> {
        if time_samples < 2 {
            return Err(CoreError::SeriesTooShort {
                required: 2,
                actual: time_samples,
            });
        }
        let t_max = self.max_duration();
        if self.duration[0] > 1.0 || t_max <= 1.0 {
            return Err(CoreError::DegenerateSeries(format!(
                "log grid needs samples spanning 1 s..t_max, got {} s..{} s",
                self.duration[0], t_max
            )));
        }
        let grid = Array::geomspace(1.0, t_max, time_samples)
            .ok_or_else(|| CoreError::DegenerateSeries("invalid log grid".to_string()))?
            .mapv(|t: f64| ((t * 100.0).round() / 100.0).min(t_max));

        let duration = self.duration.view();
        let inlet = grid.mapv(|t| interpolate(duration, self.inlet.view(), t));
        let outlet = grid.mapv(|t| interpolate(duration, self.outlet.view(), t));
        let temperature = grid.mapv(|t| interpolate(duration, self.temperature.view(), t));
        MeasuredSeries::new(grid, inlet, outlet, temperature)
    }

    /// Keeps the samples with `1 <= duration <= max_duration`.
    pub fn window(&self, max_duration: f64) -> Result<MeasuredSeries> {
        let keep: Vec<usize> = self
            .duration
            .iter()
            .enumerate()
            .filter(|&(_, &t)| (1.0..=max_duration).contains(&t))
            .map(|(i, _)| i)
            .collect();
        MeasuredSeries::new(
            keep.iter().map(|&i| self.duration[i]).collect(),
            keep.iter().map(|&i| self.inlet[i]).collect(),
            keep.iter().map(|&i| self.outlet[i]).collect(),
            keep.iter().map(|&i| self.temperature[i]).collect(),
        )
    }

    /// Returns a copy with the pressure channels replaced.
    pub fn with_pressures(&self, inlet: Array1<f64>, outlet: Array1<f64>) -> Result<Self> {
        MeasuredSeries::new(
            self.duration.clone(),
            inlet,
            outlet,
            self.temperature.clone(),
        )
    }

    /// Returns a copy with the temperature channel shifted by `offset` K.
    pub fn with_temperature_offset(&self, offset: f64) -> Result<Self> {
        MeasuredSeries::new(
            self.duration.clone(),
            self.inlet.clone(),
            self.outlet.clone(),
            &self.temperature + offset,
        )
    }
}

fn check_durations(duration: ArrayView1<'_, f64>) -> Result<()> {
    if duration.iter().any(|t| !t.is_finite() || *t < 0.0) {
        return Err(CoreError::DegenerateSeries(
            "durations must be finite and non-negative".to_string(),
        ));
    }
    for (index, pair) in duration.windows(2).into_iter().enumerate() {
        if pair[1] <= pair[0] {
            return Err(CoreError::NonIncreasingDurations {
                index: index + 1,
                previous: pair[0],
                current: pair[1],
            });
        }
    }
    Ok(())
}

/// Piecewise-linear interpolation of `y(x)` at `at`, clamped to the end
/// values outside the sampled range. `x` must be increasing.
pub fn interpolate(x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>, at: f64) -> f64 {
    let n = x.len();
    if at <= x[0] {
        return y[0];
    }
    if at >= x[n - 1] {
        return y[n - 1];
    }
    let (mut lo, mut hi) = (0, n - 1);
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if x[mid] <= at {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let weight = (at - x[lo]) / (x[hi] - x[lo]);
    y[lo] + weight * (y[hi] - y[lo])
}

/// Simulated boundary pressures on the measured duration grid.
#[derive(Clone, Debug, PartialEq)]
pub struct ComputedSeries {
    pub duration: Array1<f64>,
    pub inlet: Array1<f64>,
    pub outlet: Array1<f64>,
}

impl ComputedSeries {
    pub fn len(&self) -> usize {
        self.duration.len()
    }

    pub fn is_empty(&self) -> bool {
        self.duration.is_empty()
    }
}
