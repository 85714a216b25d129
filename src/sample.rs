// Core sample geometry and the fitted parameters

use std::f64::consts::PI;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Geometry of the core and its chambers, plus the test gas.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleGeometry {
    /// core length in m
    pub length: f64,
    /// flow cross-section in m^2
    pub area: f64,
    /// gas identifier handed to the property provider
    pub gas: String,
    /// inlet chamber volume in m^3
    pub inlet_chamber_volume: f64,
    /// outlet chamber volume in m^3
    pub outlet_chamber_volume: f64,
}

impl SampleGeometry {
    pub fn new(
        length: f64,
        area: f64,
        gas: impl Into<String>,
        inlet_chamber_volume: f64,
        outlet_chamber_volume: f64,
    ) -> Result<Self> {
        let geometry = SampleGeometry {
            length,
            area,
            gas: gas.into(),
            inlet_chamber_volume,
            outlet_chamber_volume,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Solid cylinder: $A = \pi d^2 / 4$
    pub fn cylinder(
        length: f64,
        diameter: f64,
        gas: impl Into<String>,
        inlet_chamber_volume: f64,
        outlet_chamber_volume: f64,
    ) -> Result<Self> {
        SampleGeometry::new(
            length,
            0.25 * PI * diameter.powi(2),
            gas,
            inlet_chamber_volume,
            outlet_chamber_volume,
        )
    }

    /// Hollow cylinder (casing annulus): $A = \pi (d_o^2 - d_i^2) / 4$
    pub fn annulus(
        length: f64,
        outer_diameter: f64,
        inner_diameter: f64,
        gas: impl Into<String>,
        inlet_chamber_volume: f64,
        outlet_chamber_volume: f64,
    ) -> Result<Self> {
        if inner_diameter >= outer_diameter {
            return Err(CoreError::InvalidGeometry(format!(
                "inner diameter {} must be below outer diameter {}",
                inner_diameter, outer_diameter
            )));
        }
        SampleGeometry::new(
            length,
            0.25 * PI * (outer_diameter.powi(2) - inner_diameter.powi(2)),
            gas,
            inlet_chamber_volume,
            outlet_chamber_volume,
        )
    }

    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("length", self.length),
            ("area", self.area),
            ("inlet_chamber_volume", self.inlet_chamber_volume),
            ("outlet_chamber_volume", self.outlet_chamber_volume),
        ];
        for (name, value) in fields {
            if !(value > 0.0) || !value.is_finite() {
                return Err(CoreError::InvalidGeometry(format!(
                    "{} must be positive and finite, got {}",
                    name, value
                )));
            }
        }
        if self.gas.trim().is_empty() {
            return Err(CoreError::InvalidGeometry("gas is empty".to_string()));
        }
        Ok(())
    }

    /// Cell spacing for a grid of `number_of_cells` cells.
    pub fn cell_spacing(&self, number_of_cells: usize) -> f64 {
        self.length / (number_of_cells as f64 - 1.0)
    }
}

/// Permeability (m^2) and porosity (fraction) of the core.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParameterVector {
    pub permeability: f64,
    pub porosity: f64,
}

impl ParameterVector {
    pub fn new(permeability: f64, porosity: f64) -> Self {
        ParameterVector {
            permeability,
            porosity,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.permeability > 0.0) || !self.permeability.is_finite() {
            return Err(CoreError::InvalidParameters(format!(
                "permeability must be positive, got {}",
                self.permeability
            )));
        }
        if !(self.porosity > 0.0) || !self.porosity.is_finite() {
            return Err(CoreError::InvalidParameters(format!(
                "porosity must be positive, got {}",
                self.porosity
            )));
        }
        Ok(())
    }
}

/// Which parameters the calibrator is free to move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FitMode {
    /// Permeability only, porosity held at the initial guess.
    Permeability,
    /// Permeability and porosity jointly.
    Both,
}

impl FitMode {
    pub fn dimension(&self) -> usize {
        match self {
            FitMode::Permeability => 1,
            FitMode::Both => 2,
        }
    }
}

impl FromStr for FitMode {
    type Err = CoreError;

    fn from_str(input: &str) -> Result<FitMode> {
        match input {
            "k" | "permeability" => Ok(FitMode::Permeability),
            "both" => Ok(FitMode::Both),
            _ => Err(CoreError::InvalidSettings(format!(
                "unknown fit mode '{}'",
                input
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cylinder_area() {
        let geometry = SampleGeometry::cylinder(0.2, 0.1, "H2", 150e-6, 160e-6).unwrap();
        assert_relative_eq!(geometry.area, PI * 0.25 * 0.1_f64.powi(2));
        assert_relative_eq!(geometry.cell_spacing(3), 0.1);
    }

    #[test]
    fn annulus_area() {
        let geometry = SampleGeometry::annulus(0.2, 0.1, 0.06, "CO2", 1e-4, 1e-4).unwrap();
        assert_relative_eq!(geometry.area, PI * 0.25 * (0.01 - 0.0036));
        assert!(SampleGeometry::annulus(0.2, 0.05, 0.06, "CO2", 1e-4, 1e-4).is_err());
    }

    #[test]
    fn non_positive_geometry_is_rejected() {
        assert!(matches!(
            SampleGeometry::new(0.0, 1e-3, "N2", 1e-4, 1e-4),
            Err(CoreError::InvalidGeometry(_))
        ));
        assert!(SampleGeometry::new(0.1, 1e-3, "N2", -1e-4, 1e-4).is_err());
        assert!(SampleGeometry::new(0.1, 1e-3, " ", 1e-4, 1e-4).is_err());
    }

    #[test]
    fn parameters_must_be_positive() {
        assert!(ParameterVector::new(1e-18, 0.1).validate().is_ok());
        assert!(ParameterVector::new(-1e-18, 0.1).validate().is_err());
        assert!(ParameterVector::new(1e-18, 0.0).validate().is_err());
        assert!(ParameterVector::new(f64::NAN, 0.1).validate().is_err());
    }

    #[test]
    fn fit_mode_parses_the_short_names() {
        assert_eq!("k".parse::<FitMode>().unwrap(), FitMode::Permeability);
        assert_eq!("both".parse::<FitMode>().unwrap().dimension(), 2);
        assert!("n".parse::<FitMode>().is_err());
    }
}
