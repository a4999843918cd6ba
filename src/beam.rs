//! # Beam parameters
//!
//! A lattice is built for one beam: particle species (rest mass and charge) and
//! kinematic state. The user supplies a partial description ([`BeamSpec`]) and
//! [`augment_beam`] completes it into a consistent [`Beam`] using the relativistic
//! relations
//!
//! ```text
//! E² = (pc)² + m²,   γ = E / m,   β = sqrt(1 - 1/γ²),   Bρ = pc / (|q| c)
//! ```
//!
//! Energies, momenta and masses are in GeV, rigidity in T·m.

use crate::error::{LatticeError, Result};
use serde::{Deserialize, Serialize};

/// Speed of light in vacuum [m/s].
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Electron rest mass [GeV].
pub const ELECTRON_MASS: f64 = 0.510_998_950_00e-3;

/// Proton rest mass [GeV].
pub const PROTON_MASS: f64 = 0.938_272_088_16;

/// Muon rest mass [GeV].
pub const MUON_MASS: f64 = 0.105_658_375_5;

/// Atomic mass unit [GeV].
pub const ATOMIC_MASS_UNIT: f64 = 0.931_494_102_42;

/// Look up `(charge, mass)` of a named particle species.
///
/// # Examples
///
/// ```
/// use beamline_rs::beam::{particle, PROTON_MASS};
///
/// assert_eq!(particle("proton"), Some((1.0, PROTON_MASS)));
/// assert_eq!(particle("photon"), None);
/// ```
pub fn particle(name: &str) -> Option<(f64, f64)> {
    match name {
        "positron" => Some((1.0, ELECTRON_MASS)),
        "electron" => Some((-1.0, ELECTRON_MASS)),
        "proton" => Some((1.0, PROTON_MASS)),
        "antiproton" => Some((-1.0, PROTON_MASS)),
        "posmuon" => Some((1.0, MUON_MASS)),
        "negmuon" => Some((-1.0, MUON_MASS)),
        "ion" => Some((1.0, ATOMIC_MASS_UNIT)),
        _ => None,
    }
}

/// Partial beam description, as found in a machine description's beam command.
///
/// The species is given by `particle` or by `charge` + `mass` (in that order of
/// precedence; for `particle = "ion"` explicit charge and mass override the
/// defaults). The kinematics are given by one of `energy`, `pc`, `gamma`, `beta`,
/// `brho`, again in that order of precedence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeamSpec {
    pub particle: Option<String>,
    pub charge: Option<f64>,
    pub mass: Option<f64>,
    pub energy: Option<f64>,
    pub pc: Option<f64>,
    pub gamma: Option<f64>,
    pub beta: Option<f64>,
    pub brho: Option<f64>,
}

impl BeamSpec {
    /// Empty description.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn particle(mut self, name: &str) -> Self {
        self.particle = Some(name.to_string());
        self
    }

    pub fn charge(mut self, charge: f64) -> Self {
        self.charge = Some(charge);
        self
    }

    pub fn mass(mut self, mass: f64) -> Self {
        self.mass = Some(mass);
        self
    }

    pub fn energy(mut self, energy: f64) -> Self {
        self.energy = Some(energy);
        self
    }

    pub fn pc(mut self, pc: f64) -> Self {
        self.pc = Some(pc);
        self
    }

    pub fn gamma(mut self, gamma: f64) -> Self {
        self.gamma = Some(gamma);
        self
    }

    pub fn beta(mut self, beta: f64) -> Self {
        self.beta = Some(beta);
        self
    }

    pub fn brho(mut self, brho: f64) -> Self {
        self.brho = Some(brho);
        self
    }
}

/// Complete, consistent beam definition shared by all elements of a lattice.
///
/// `beta` and `gamma` are always present. The remaining fields are absent only for
/// a beam that was specified by its relativistic factors alone, without a species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beam {
    /// Species name; `None` for a custom `(charge, mass)` pair.
    pub particle: Option<String>,
    /// Charge state in units of the elementary charge.
    pub charge: Option<f64>,
    /// Rest mass [GeV].
    pub mass: Option<f64>,
    /// Total energy [GeV].
    pub energy: Option<f64>,
    /// Momentum times speed of light [GeV].
    pub pc: Option<f64>,
    /// Relativistic gamma factor.
    pub gamma: f64,
    /// Relativistic beta factor.
    pub beta: f64,
    /// Magnetic rigidity [T·m].
    pub brho: Option<f64>,
}

impl Beam {
    /// Beam known only through its relativistic gamma factor.
    pub fn from_gamma(gamma: f64) -> Result<Self> {
        if !(gamma >= 1.0) {
            return Err(LatticeError::InvalidValue(format!(
                "gamma must be at least 1 (got {})",
                gamma
            )));
        }
        Ok(Self {
            particle: None,
            charge: None,
            mass: None,
            energy: None,
            pc: None,
            gamma,
            beta: (1.0 - 1.0 / (gamma * gamma)).sqrt(),
            brho: None,
        })
    }

    /// Beam known only through its relativistic beta factor.
    pub fn from_beta(beta: f64) -> Result<Self> {
        check_beta(beta)?;
        let mut beam = Self::from_gamma(1.0 / (1.0 - beta * beta).sqrt())?;
        beam.beta = beta;
        Ok(beam)
    }

    /// `(βγ)²`, the factor relating path length and momentum deviation.
    pub fn beta_gamma_sq(&self) -> f64 {
        (self.beta * self.gamma).powi(2)
    }
}

fn check_beta(beta: f64) -> Result<()> {
    if !(0.0..1.0).contains(&beta) {
        return Err(LatticeError::InvalidValue(format!(
            "beta must lie in [0, 1) (got {})",
            beta
        )));
    }
    Ok(())
}

/// Complete a partial beam description.
///
/// Without a species, a beam given by `gamma` or `beta` alone falls back to a
/// beta/gamma-only [`Beam`].
///
/// # Errors
///
/// [`LatticeError::InvalidValue`] if the particle name is unknown, if no species
/// is given (and the beta/gamma fallback does not apply), if none of the kinematic
/// quantities is given, or if the given quantity is unphysical.
///
/// # Examples
///
/// ```
/// use beamline_rs::beam::{augment_beam, BeamSpec};
///
/// let beam = augment_beam(&BeamSpec::new().mass(1.0).charge(1.0).gamma(2.0)).unwrap();
/// assert_eq!(beam.energy, Some(2.0));
/// assert!((beam.beta - 0.75f64.sqrt()).abs() < 1e-12);
/// ```
pub fn augment_beam(spec: &BeamSpec) -> Result<Beam> {
    let (particle, charge, mass) = match (&spec.particle, spec.charge, spec.mass) {
        (Some(name), charge, mass) => {
            let (default_charge, default_mass) = particle(name).ok_or_else(|| {
                LatticeError::InvalidValue(format!("Unknown particle type: {}", name))
            })?;
            if name == "ion" {
                (
                    Some(name.clone()),
                    charge.unwrap_or(default_charge),
                    mass.unwrap_or(default_mass),
                )
            } else {
                (Some(name.clone()), default_charge, default_mass)
            }
        }
        (None, Some(charge), Some(mass)) => (None, charge, mass),
        (None, _, _) => {
            if let Some(gamma) = spec.gamma {
                return Beam::from_gamma(gamma);
            }
            if let Some(beta) = spec.beta {
                return Beam::from_beta(beta);
            }
            return Err(LatticeError::InvalidValue(
                "Either particle or charge and mass need to be specified".to_string(),
            ));
        }
    };

    if !(mass > 0.0) {
        return Err(LatticeError::InvalidValue(format!(
            "Particle mass must be positive (got {})",
            mass
        )));
    }

    let rigidity_unit = charge.abs() * SPEED_OF_LIGHT * 1e-9;
    let energy = if let Some(energy) = spec.energy {
        energy
    } else if let Some(pc) = spec.pc {
        (pc * pc + mass * mass).sqrt()
    } else if let Some(gamma) = spec.gamma {
        gamma * mass
    } else if let Some(beta) = spec.beta {
        check_beta(beta)?;
        mass / (1.0 - beta * beta).sqrt()
    } else if let Some(brho) = spec.brho {
        let pc = brho * rigidity_unit;
        (pc * pc + mass * mass).sqrt()
    } else {
        return Err(LatticeError::InvalidValue(
            "Beam energy must be specified via one of (energy, pc, gamma, beta, brho)".to_string(),
        ));
    };

    if !(energy >= mass) {
        return Err(LatticeError::InvalidValue(format!(
            "Total energy {} is below the rest mass {}",
            energy, mass
        )));
    }

    let pc = (energy * energy - mass * mass).sqrt();
    let gamma = energy / mass;
    let beta = (1.0 - 1.0 / (gamma * gamma)).sqrt();
    let brho = pc / rigidity_unit;

    Ok(Beam {
        particle,
        charge: Some(charge),
        mass: Some(mass),
        energy: Some(energy),
        pc: Some(pc),
        gamma,
        beta,
        brho: Some(brho),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_species_lookup() {
        let beam = augment_beam(&BeamSpec::new().particle("electron").energy(1.0)).unwrap();
        assert_eq!(beam.charge, Some(-1.0));
        assert_eq!(beam.mass, Some(ELECTRON_MASS));
        assert_eq!(beam.particle.as_deref(), Some("electron"));
    }

    #[test]
    fn test_ion_overrides() {
        let beam = augment_beam(
            &BeamSpec::new()
                .particle("ion")
                .charge(6.0)
                .mass(11.17)
                .energy(20.0),
        )
        .unwrap();
        assert_eq!(beam.charge, Some(6.0));
        assert_eq!(beam.mass, Some(11.17));

        // Explicit values are ignored for fixed species.
        let beam = augment_beam(&BeamSpec::new().particle("proton").mass(5.0).energy(2.0)).unwrap();
        assert_eq!(beam.mass, Some(PROTON_MASS));
    }

    #[test]
    fn test_energy_precedence() {
        let beam =
            augment_beam(&BeamSpec::new().mass(1.0).charge(1.0).energy(2.0).gamma(5.0)).unwrap();
        assert_relative_eq!(beam.gamma, 2.0, max_relative = 1e-12);
    }

    #[test]
    fn test_beta_gamma_fallback() {
        let beam = augment_beam(&BeamSpec::new().gamma(2.0)).unwrap();
        assert_eq!(beam.mass, None);
        assert_relative_eq!(beam.beta, 0.75f64.sqrt(), max_relative = 1e-12);

        let beam = augment_beam(&BeamSpec::new().beta(0.75f64.sqrt())).unwrap();
        assert_relative_eq!(beam.gamma, 2.0, max_relative = 1e-12);
    }

    #[test]
    fn test_invalid_specs() {
        assert!(matches!(
            augment_beam(&BeamSpec::new().particle("photon").energy(1.0)),
            Err(LatticeError::InvalidValue(_))
        ));
        assert!(matches!(
            augment_beam(&BeamSpec::new().energy(1.0)),
            Err(LatticeError::InvalidValue(_))
        ));
        assert!(matches!(
            augment_beam(&BeamSpec::new().particle("proton")),
            Err(LatticeError::InvalidValue(_))
        ));
        assert!(augment_beam(&BeamSpec::new().mass(1.0).charge(1.0).energy(0.5)).is_err());
        assert!(augment_beam(&BeamSpec::new().mass(1.0).charge(1.0).beta(1.0)).is_err());
    }
}
