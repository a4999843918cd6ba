//! Parameter definition and implementation
//!
//! A [`Parameter`] is a named lattice quantity that is *tracked*: it is driven by a
//! control knob of the machine description and is exposed to fitting code. Element
//! attributes hold either a plain constant or a `Parameter`
//! (see [`ParameterValue`](crate::parameters::ParameterValue)).

use crate::parameters::bounds::{Bounds, BoundsError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when working with parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Bounds error: {0}")]
    BoundsError(#[from] BoundsError),

    #[error("Parameter '{name}' not found")]
    ParameterNotFound { name: String },

    #[error("Parameter '{name}' is defined twice with different values ({first} and {second})")]
    ConflictingDefinition {
        name: String,
        first: f64,
        second: f64,
    },
}

/// A tracked, named numeric value
///
/// Parameters are created by the lattice builder for every attribute flagged as a
/// variable, or directly by user code. Fitting code varies them through
/// [`set_value`](Parameter::set_value); the transport maps of the owning elements are
/// recomputed on every read, so new values take effect immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Name of the parameter
    pub name: String,

    /// Current value of the parameter
    value: f64,

    /// Value at creation time (for reset operations)
    init_value: f64,

    /// Whether fitting code may vary this parameter
    pub vary: bool,

    /// Admissible interval for the value
    bounds: Bounds,
}

impl Parameter {
    /// Create a new parameter with the given name and value
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the parameter
    /// * `value` - Initial value of the parameter
    ///
    /// # Examples
    ///
    /// ```
    /// use beamline_rs::parameters::Parameter;
    ///
    /// let k1 = Parameter::new("qf.k1", 0.25);
    /// assert_eq!(k1.name(), "qf.k1");
    /// assert_eq!(k1.value(), 0.25);
    /// assert!(k1.vary());
    /// ```
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            init_value: value,
            vary: true,
            bounds: Bounds::default(),
        }
    }

    /// Create a new parameter restricted to `[min, max]`
    ///
    /// The initial value is clamped into the interval.
    ///
    /// # Examples
    ///
    /// ```
    /// use beamline_rs::parameters::Parameter;
    ///
    /// let k1 = Parameter::with_bounds("qf.k1", 0.0, 1e-16, 1.0).unwrap();
    /// assert_eq!(k1.value(), 1e-16);
    /// ```
    pub fn with_bounds(name: &str, value: f64, min: f64, max: f64) -> Result<Self, ParameterError> {
        let bounds = Bounds::new(min, max)?;
        let value = bounds.clamp(value);

        Ok(Self {
            name: name.to_string(),
            value,
            init_value: value,
            vary: true,
            bounds,
        })
    }

    /// Get the current value of the parameter
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Set the value of the parameter
    ///
    /// # Returns
    ///
    /// `Ok(())` if the value was set, or an error if it is non-finite or outside the bounds
    pub fn set_value(&mut self, value: f64) -> Result<(), ParameterError> {
        if !value.is_finite() {
            return Err(BoundsError::InfiniteValue.into());
        }
        if !self.bounds.is_within_bounds(value) {
            return Err(ParameterError::BoundsError(BoundsError::ValueOutsideBounds {
                value,
                min: self.bounds.min,
                max: self.bounds.max,
            }));
        }

        self.value = value;
        Ok(())
    }

    /// Get the initial value of the parameter
    pub fn init_value(&self) -> f64 {
        self.init_value
    }

    /// Reset the parameter to its initial value
    pub fn reset(&mut self) {
        self.value = self.bounds.clamp(self.init_value);
    }

    /// Get the name of the parameter
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the parameter may be varied
    pub fn vary(&self) -> bool {
        self.vary
    }

    /// Set whether the parameter may be varied
    pub fn set_vary(&mut self, vary: bool) {
        self.vary = vary;
    }

    /// Set the bounds for the parameter, clamping the current value into them
    pub fn set_bounds(&mut self, min: f64, max: f64) -> Result<(), ParameterError> {
        let bounds = Bounds::new(min, max)?;
        self.bounds = bounds;
        self.value = bounds.clamp(self.value);
        Ok(())
    }

    /// Get the minimum allowed value
    pub fn min(&self) -> f64 {
        self.bounds.min
    }

    /// Get the maximum allowed value
    pub fn max(&self) -> f64 {
        self.bounds.max
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Derive a parameter with the same identity but a different value.
    ///
    /// Used when an attribute is rescaled (thin slicing, integrated field errors):
    /// the result keeps the name and `vary` flag and drops the bounds.
    pub fn derive(&self, value: f64) -> Self {
        Self {
            name: self.name.clone(),
            value,
            init_value: value,
            vary: self.vary,
            bounds: Bounds::default(),
        }
    }
}
