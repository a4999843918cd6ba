//! Parameter bounds
//!
//! Tracked lattice parameters can be restricted to an interval. The typical use is a
//! quadrupole gradient that must never reach zero while it is varied: giving it the
//! bounds `[eps, k1_max]` keeps every value produced by a fit on one side of the
//! singular point.

use serde::{Deserialize, Serialize};
use std::f64::{INFINITY, NEG_INFINITY};
use thiserror::Error;

/// Errors that can occur when working with parameter bounds
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("Invalid bounds: min ({min}) must be less than max ({max})")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Parameter value {value} is outside bounds: [{min}, {max}]")]
    ValueOutsideBounds { value: f64, min: f64, max: f64 },

    #[error("Infinite parameter value is not allowed")]
    InfiniteValue,
}

/// Closed interval `[min, max]` a parameter value must stay in.
///
/// Infinite ends are written as `null` in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "BoundsRepr", into = "BoundsRepr")]
pub struct Bounds {
    /// Minimum allowed value
    pub min: f64,

    /// Maximum allowed value
    pub max: f64,
}

#[derive(Serialize, Deserialize)]
struct BoundsRepr {
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

impl From<BoundsRepr> for Bounds {
    fn from(repr: BoundsRepr) -> Self {
        Self {
            min: repr.min.unwrap_or(NEG_INFINITY),
            max: repr.max.unwrap_or(INFINITY),
        }
    }
}

impl From<Bounds> for BoundsRepr {
    fn from(bounds: Bounds) -> Self {
        Self {
            min: bounds.min.is_finite().then_some(bounds.min),
            max: bounds.max.is_finite().then_some(bounds.max),
        }
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min: NEG_INFINITY,
            max: INFINITY,
        }
    }
}

impl Bounds {
    /// Create new bounds
    ///
    /// # Arguments
    ///
    /// * `min` - Minimum allowed value
    /// * `max` - Maximum allowed value
    ///
    /// # Returns
    ///
    /// The bounds if `min <= max`, an error otherwise
    ///
    /// # Examples
    ///
    /// ```
    /// use beamline_rs::parameters::Bounds;
    ///
    /// let bounds = Bounds::new(1e-16, 0.5).unwrap();
    /// assert!(bounds.is_within_bounds(0.1));
    /// assert!(!bounds.is_within_bounds(0.0));
    /// ```
    pub fn new(min: f64, max: f64) -> Result<Self, BoundsError> {
        if min > max {
            return Err(BoundsError::InvalidBounds { min, max });
        }

        Ok(Self { min, max })
    }

    /// Bounds without any restriction.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Check if a value lies inside the interval (ends included).
    pub fn is_within_bounds(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// `true` if zero is not an admissible value.
    pub fn excludes_zero(&self) -> bool {
        !self.is_within_bounds(0.0)
    }

    /// Clamp a value into the interval.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}
