//! Parameters collection implementation
//!
//! A [`Parameters`] collection is the interface between a lattice and fitting code:
//! [`Segment::parameters`](crate::segment::Segment::parameters) gathers every tracked
//! attribute of a lattice by name, fitting code varies the values, and
//! [`Segment::update_parameters`](crate::segment::Segment::update_parameters) writes
//! them back.

use crate::parameters::parameter::{Parameter, ParameterError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A collection of named parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// Map of parameter names to Parameter objects
    params: HashMap<String, Parameter>,
}

impl Parameters {
    /// Create a new empty parameters collection
    ///
    /// # Examples
    ///
    /// ```
    /// use beamline_rs::parameters::Parameters;
    ///
    /// let params = Parameters::new();
    /// assert!(params.is_empty());
    /// ```
    pub fn new() -> Self {
        Self {
            params: HashMap::new(),
        }
    }

    /// Add a parameter to the collection
    ///
    /// Adding a parameter whose name is already present is accepted when the values
    /// agree (the same knob drives several elements) and rejected otherwise.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the parameter was added or already present with the same value
    pub fn add(&mut self, param: Parameter) -> Result<(), ParameterError> {
        if let Some(existing) = self.params.get(param.name()) {
            if existing.value() != param.value() {
                return Err(ParameterError::ConflictingDefinition {
                    name: param.name().to_string(),
                    first: existing.value(),
                    second: param.value(),
                });
            }
            return Ok(());
        }
        self.params.insert(param.name().to_string(), param);
        Ok(())
    }

    /// Get a parameter by name
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    /// Get a mutable reference to a parameter by name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.get_mut(name)
    }

    /// Set the value of the named parameter
    pub fn set_value(&mut self, name: &str, value: f64) -> Result<(), ParameterError> {
        self.params
            .get_mut(name)
            .ok_or_else(|| ParameterError::ParameterNotFound {
                name: name.to_string(),
            })?
            .set_value(value)
    }

    /// Check if the collection contains a parameter
    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// `true` if the collection holds no parameters
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Sorted parameter names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.params.keys().cloned().collect();
        names.sort();
        names
    }

    /// Iterate over `(name, parameter)` pairs (arbitrary order)
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Parameter)> {
        self.params.iter()
    }

    /// Parameters that fitting code may vary, sorted by name
    pub fn varying(&self) -> Vec<&Parameter> {
        let mut varying: Vec<&Parameter> = self.params.values().filter(|p| p.vary()).collect();
        varying.sort_by(|a, b| a.name().cmp(b.name()));
        varying
    }

    /// Values of the varying parameters, ordered like [`varying`](Self::varying)
    pub fn varying_values(&self) -> Vec<f64> {
        self.varying().iter().map(|p| p.value()).collect()
    }

    /// Write `values` into the varying parameters, ordered like [`varying`](Self::varying)
    pub fn update_varying(&mut self, values: &[f64]) -> Result<(), ParameterError> {
        let names: Vec<String> = self.varying().iter().map(|p| p.name().to_string()).collect();
        for (name, value) in names.iter().zip(values) {
            self.set_value(name, *value)?;
        }
        Ok(())
    }

    /// Reset all parameters to their initial values
    pub fn reset(&mut self) {
        for param in self.params.values_mut() {
            param.reset();
        }
    }

    /// Serialize the collection to a JSON string
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize a collection from a JSON string
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
