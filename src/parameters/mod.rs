//! # Parameter System
//!
//! Element attributes that are driven by accelerator control knobs are *tracked*:
//! they hold a named [`Parameter`] instead of a plain number. This module provides
//! the pieces of that system.
//!
//! ## Core Components
//!
//! - [`Parameter`]: named value with bounds and a `vary` flag
//! - [`ParameterValue`]: the constant-or-parameter slot used by every element attribute
//! - [`Parameters`]: a name-indexed collection used to read and write the tracked
//!   values of a whole lattice
//! - [`Bounds`]: admissible interval of a parameter
//!
//! ## Example Usage
//!
//! ```rust
//! use beamline_rs::parameters::{Parameter, ParameterValue};
//!
//! // A quadrupole gradient that may be varied, but never crosses zero
//! let k1 = Parameter::with_bounds("qf.k1", 0.25, 1e-16, 1.0).unwrap();
//! let value = ParameterValue::from(k1);
//! assert!(value.is_tracked());
//! assert_eq!(value.value(), 0.25);
//! ```

pub mod bounds;
pub mod parameter;
pub mod parameters;
pub mod value;

// Re-export key types
pub use bounds::{Bounds, BoundsError};
pub use parameter::{Parameter, ParameterError};
pub use parameters::Parameters;
pub use value::ParameterValue;
