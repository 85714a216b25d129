// Gas property providers

use crate::error::{CoreError, Result};

/// Universal gas constant in J/(mol.K)
pub const GAS_CONSTANT: f64 = 8.314_462_618;

/// Gas state at one pressure and temperature.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GasState {
    /// isothermal compressibility in 1/Pa
    pub compressibility: f64,
    /// dynamic viscosity in Pa.s
    pub viscosity: f64,
    /// density in kg/m^3
    pub density: f64,
}

impl GasState {
    /// Unit values substituted by the solver when a lookup fails.
    ///
    /// They keep the linear system well posed; the answer is finite but wrong.
    pub const NEUTRAL: GasState = GasState {
        compressibility: 1.0,
        viscosity: 1.0,
        density: 1.0,
    };
}

/// Equation-of-state capability injected into the solver.
///
/// Implementations must be shareable across threads because the convergence
/// study may run its resolutions concurrently.
pub trait GasProperties: Sync {
    /// Properties of `gas` at `temperature` (K) and `pressure` (Pa).
    fn properties(&self, temperature: f64, pressure: f64, gas: &str) -> Result<GasState>;
}

impl<G: GasProperties + ?Sized> GasProperties for &G {
    fn properties(&self, temperature: f64, pressure: f64, gas: &str) -> Result<GasState> {
        (**self).properties(temperature, pressure, gas)
    }
}

/// Constants of one gas for the ideal-gas provider.
///
/// Viscosity follows Sutherland's law
///
/// $$\begin{equation}
/// \mu = \mu_0 \left(\frac{T}{T_0}\right)^{3/2} \frac{T_0 + S}{T + S}
/// \end{equation}$$
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GasConstants {
    /// molar mass in kg/mol
    pub molar_mass: f64,
    /// reference viscosity in Pa.s
    pub viscosity_ref: f64,
    /// reference temperature in K
    pub temperature_ref: f64,
    /// Sutherland constant in K
    pub sutherland: f64,
}

impl GasConstants {
    /// Looks up a gas by its usual formula (case-insensitive).
    pub fn named(gas: &str) -> Option<GasConstants> {
        let constants = match gas.trim().to_ascii_uppercase().as_str() {
            "N2" | "NITROGEN" => (28.0134e-3, 17.81e-6, 300.55, 111.0),
            "H2" | "HYDROGEN" => (2.01588e-3, 8.76e-6, 293.85, 72.0),
            "HE" | "HELIUM" => (4.002602e-3, 19.0e-6, 273.0, 79.4),
            "AR" | "ARGON" => (39.948e-3, 21.25e-6, 273.0, 144.4),
            "CO2" => (44.0095e-3, 14.8e-6, 293.15, 240.0),
            "CH4" | "METHANE" => (16.0425e-3, 11.0e-6, 293.15, 164.0),
            "AIR" => (28.9647e-3, 18.27e-6, 291.15, 120.0),
            _ => return None,
        };
        Some(GasConstants {
            molar_mass: constants.0,
            viscosity_ref: constants.1,
            temperature_ref: constants.2,
            sutherland: constants.3,
        })
    }

    pub fn viscosity(&self, temperature: f64) -> f64 {
        self.viscosity_ref
            * (temperature / self.temperature_ref).powf(1.5)
            * (self.temperature_ref + self.sutherland)
            / (temperature + self.sutherland)
    }
}

/// Ideal-gas provider for the gases listed in [`GasConstants::named`].
///
/// $\rho = pM/(RT)$ and $c = 1/p$. Unknown gases and non-positive states
/// are reported as errors.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdealGas;

impl GasProperties for IdealGas {
    fn properties(&self, temperature: f64, pressure: f64, gas: &str) -> Result<GasState> {
        let failure = |reason: &str| CoreError::GasProperty {
            gas: gas.to_string(),
            pressure,
            temperature,
            reason: reason.to_string(),
        };
        let constants = GasConstants::named(gas).ok_or_else(|| failure("unknown gas"))?;
        if !(pressure > 0.0) || !pressure.is_finite() {
            return Err(failure("pressure out of range"));
        }
        if !(temperature > 0.0) || !temperature.is_finite() {
            return Err(failure("temperature out of range"));
        }
        Ok(GasState {
            compressibility: 1.0 / pressure,
            viscosity: constants.viscosity(temperature),
            density: pressure * constants.molar_mass / (GAS_CONSTANT * temperature),
        })
    }
}

/// Multiplies the properties of another provider by fixed factors.
///
/// Used by the uncertainty study to bracket the error of the property tables.
#[derive(Clone, Copy, Debug)]
pub struct ScaledGas<G> {
    pub inner: G,
    pub compressibility: f64,
    pub viscosity: f64,
    pub density: f64,
}

impl<G: GasProperties> ScaledGas<G> {
    pub fn new(inner: G) -> Self {
        ScaledGas {
            inner,
            compressibility: 1.0,
            viscosity: 1.0,
            density: 1.0,
        }
    }
}

impl<G: GasProperties> GasProperties for ScaledGas<G> {
    fn properties(&self, temperature: f64, pressure: f64, gas: &str) -> Result<GasState> {
        let state = self.inner.properties(temperature, pressure, gas)?;
        Ok(GasState {
            compressibility: state.compressibility * self.compressibility,
            viscosity: state.viscosity * self.viscosity,
            density: state.density * self.density,
        })
    }
}

/// Pressure- and temperature-independent properties.
///
/// With this provider the flow equation is linear, which is what the
/// manufactured convergence cases need.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantGas(pub GasState);

impl GasProperties for ConstantGas {
    fn properties(&self, _temperature: f64, _pressure: f64, _gas: &str) -> Result<GasState> {
        Ok(self.0)
    }
}
