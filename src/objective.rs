// Misfit between measured and simulated pressures

use ndarray::{ArrayView1, Zip};

use crate::error::{CoreError, Result};
use crate::series::{ComputedSeries, MeasuredSeries};

/// Combined relative L2 error between measured and computed pressures, in percent
///
/// $$\begin{equation}
/// E = \frac{\sqrt{\sum_t \left(|p^m_{in} - p^c_{in}| + |p^m_{out} - p^c_{out}|\right)^2}}
/// {\sqrt{\sum_t \left((p^m_{in})^2 + (p^m_{out})^2\right)}} \times 100
/// \end{equation}$$
///
/// The measured series must not be all zero. Channels of different length
/// are rejected.
pub fn relative_error(
    measured_inlet: ArrayView1<'_, f64>,
    measured_outlet: ArrayView1<'_, f64>,
    computed_inlet: ArrayView1<'_, f64>,
    computed_outlet: ArrayView1<'_, f64>,
) -> Result<f64> {
    let n = measured_inlet.len();
    if measured_outlet.len() != n || computed_inlet.len() != n || computed_outlet.len() != n {
        return Err(CoreError::ChannelLengthMismatch);
    }
    let numerator = Zip::from(&measured_inlet)
        .and(&measured_outlet)
        .and(&computed_inlet)
        .and(&computed_outlet)
        .fold(0.0, |acc, &m_in, &m_out, &c_in, &c_out| {
            acc + ((m_in - c_in).abs() + (m_out - c_out).abs()).powi(2)
        });
    let denominator = measured_inlet.dot(&measured_inlet) + measured_outlet.dot(&measured_outlet);
    Ok(numerator.sqrt() / denominator.sqrt() * 100.0)
}

pub fn error(measured: &MeasuredSeries, computed: &ComputedSeries) -> Result<f64> {
    relative_error(
        measured.inlet(),
        measured.outlet(),
        computed.inlet.view(),
        computed.outlet.view(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn identical_series_have_zero_error() {
        let inlet = array![1e7, 8e6, 6e6];
        let outlet = array![1e5, 2e5, 4e5];
        assert_eq!(
            relative_error(inlet.view(), outlet.view(), inlet.view(), outlet.view()).unwrap(),
            0.0
        );
    }

    #[test]
    fn sign_of_the_deviation_does_not_matter() {
        let inlet = array![1e7, 8e6];
        let outlet = array![1e5, 2e5];
        let above = array![1.01e7, 8.1e6];
        let below = array![0.99e7, 7.9e6];
        let e_above = relative_error(inlet.view(), outlet.view(), above.view(), outlet.view()).unwrap();
        let e_below = relative_error(inlet.view(), outlet.view(), below.view(), outlet.view()).unwrap();
        assert_relative_eq!(e_above, e_below, max_relative = 1e-12);
    }

    #[test]
    fn hand_computed_value() {
        let measured_inlet = array![3.0, 0.0];
        let measured_outlet = array![0.0, 4.0];
        let computed_inlet = array![2.0, 0.0];
        let computed_outlet = array![1.0, 4.0];
        // sqrt((1 + 1)^2) / sqrt(9 + 16) * 100
        assert_relative_eq!(
            relative_error(
                measured_inlet.view(),
                measured_outlet.view(),
                computed_inlet.view(),
                computed_outlet.view()
            )
            .unwrap(),
            40.0
        );
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let long = array![1e7, 8e6, 6e6];
        let short = array![1e5, 2e5];
        assert!(matches!(
            relative_error(long.view(), long.view(), short.view(), long.view()),
            Err(CoreError::ChannelLengthMismatch)
        ));
    }
}
