//! Constant-or-parameter attribute values
//!
//! Every physics attribute of a lattice element is a [`ParameterValue`]: either a
//! plain constant or a tracked [`Parameter`]. Transport-map code only ever reads
//! [`ParameterValue::value`], so both variants produce identical maps. The variant
//! matters only where a tracked value must not take a singular value
//! (see [`ParameterValue::is_tracked`]).

use crate::parameters::parameter::{Parameter, ParameterError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg};

/// An element attribute: a constant or a tracked parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    /// Plain number.
    Constant(f64),
    /// Named value exposed to fitting code.
    Tracked(Parameter),
}

impl ParameterValue {
    /// Current numeric value.
    pub fn value(&self) -> f64 {
        match self {
            ParameterValue::Constant(v) => *v,
            ParameterValue::Tracked(p) => p.value(),
        }
    }

    /// `true` if the value is a [`Parameter`].
    pub fn is_tracked(&self) -> bool {
        matches!(self, ParameterValue::Tracked(_))
    }

    /// `true` if the current value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.value() == 0.0
    }

    /// The underlying parameter, if tracked.
    pub fn parameter(&self) -> Option<&Parameter> {
        match self {
            ParameterValue::Tracked(p) => Some(p),
            ParameterValue::Constant(_) => None,
        }
    }

    /// Mutable access to the underlying parameter, if tracked.
    pub fn parameter_mut(&mut self) -> Option<&mut Parameter> {
        match self {
            ParameterValue::Tracked(p) => Some(p),
            ParameterValue::Constant(_) => None,
        }
    }

    /// Overwrite the numeric value in place, keeping the variant.
    ///
    /// For a tracked value the parameter's bounds apply.
    pub fn set_value(&mut self, value: f64) -> Result<(), ParameterError> {
        match self {
            ParameterValue::Constant(v) => {
                *v = value;
                Ok(())
            }
            ParameterValue::Tracked(p) => p.set_value(value),
        }
    }

    /// Apply `f` to the value; a tracked value stays tracked under the same name.
    pub fn map<F: FnOnce(f64) -> f64>(&self, f: F) -> ParameterValue {
        match self {
            ParameterValue::Constant(v) => ParameterValue::Constant(f(*v)),
            ParameterValue::Tracked(p) => ParameterValue::Tracked(p.derive(f(p.value()))),
        }
    }

    /// Promote to a tracked value named `name`; tracked values are returned unchanged.
    pub fn into_tracked(self, name: &str) -> ParameterValue {
        match self {
            ParameterValue::Constant(v) => ParameterValue::Tracked(Parameter::new(name, v)),
            tracked => tracked,
        }
    }
}

impl Default for ParameterValue {
    fn default() -> Self {
        ParameterValue::Constant(0.0)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        ParameterValue::Constant(v)
    }
}

impl From<Parameter> for ParameterValue {
    fn from(p: Parameter) -> Self {
        ParameterValue::Tracked(p)
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Constant(v) => write!(f, "{}", v),
            ParameterValue::Tracked(p) => write!(f, "Parameter({}={})", p.name(), p.value()),
        }
    }
}

/// Sum of two attributes. The result is tracked if either operand is; it then
/// carries the name of the first tracked operand.
impl Add for &ParameterValue {
    type Output = ParameterValue;

    fn add(self, rhs: &ParameterValue) -> ParameterValue {
        let sum = self.value() + rhs.value();
        match (self, rhs) {
            (ParameterValue::Tracked(p), _) | (_, ParameterValue::Tracked(p)) => {
                ParameterValue::Tracked(p.derive(sum))
            }
            _ => ParameterValue::Constant(sum),
        }
    }
}

impl Add<f64> for &ParameterValue {
    type Output = ParameterValue;

    fn add(self, rhs: f64) -> ParameterValue {
        self.map(|v| v + rhs)
    }
}

impl Mul<f64> for &ParameterValue {
    type Output = ParameterValue;

    fn mul(self, rhs: f64) -> ParameterValue {
        self.map(|v| v * rhs)
    }
}

impl Div<f64> for &ParameterValue {
    type Output = ParameterValue;

    fn div(self, rhs: f64) -> ParameterValue {
        self.map(|v| v / rhs)
    }
}

impl Neg for &ParameterValue {
    type Output = ParameterValue;

    fn neg(self) -> ParameterValue {
        self.map(|v| -v)
    }
}
