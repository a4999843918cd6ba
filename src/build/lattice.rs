//! Assembling lattices in code.
//!
//! [`Lattice`] places elements one after another, either back to back or at
//! explicit positions, and fills the gaps with drifts.

use crate::beam::{augment_beam, Beam, BeamSpec};
use crate::elements::{BendConfig, DriftKind, Element, Physics, SBend};
use crate::error::{LatticeError, Result};
use crate::parameters::ParameterValue;
use crate::segment::{LatticeElement, Segment};
use std::collections::HashMap;
use std::fmt;
use std::ops::AddAssign;
use tracing::debug;

/// Where [`Lattice::insert`] places an element's entrance.
#[derive(Debug, Clone, PartialEq)]
pub enum Position {
    /// Absolute position [m].
    At(f64),
    /// Distance [m] from the exit of the most recent element with this label.
    After(String, f64),
}

/// A lattice under construction.
///
/// Elements are only ever appended; an element placed before the current end of
/// the lattice is an error.
///
/// # Examples
///
/// ```rust
/// use beamline_rs::beam::BeamSpec;
/// use beamline_rs::build::{Lattice, Position};
///
/// let spec = BeamSpec::new().particle("proton").energy(1.0);
/// let lattice = Lattice::sequence(&spec, |lat| {
///     lat.quadrupole(0.5, 1.0)?;
///     lat.drift(2.0)?;
///     lat.quadrupole(-0.5, 1.0)?;
///     Ok(())
/// })
/// .unwrap();
/// assert_eq!(lattice.len(), 3);
/// assert_eq!(lattice.by_label("e3").unwrap().l(), 1.0);
///
/// let mut lattice = Lattice::new(&spec).unwrap();
/// let q = lattice.quadrupole(0.5, 1.0).unwrap();
/// lattice.insert(Position::At(3.0), q).unwrap();
/// assert_eq!(lattice.len(), 2);
/// assert_eq!(lattice.s(1), Some(3.0));
/// ```
#[derive(Debug, Clone)]
pub struct Lattice {
    beam: Beam,
    elements: Vec<LatticeElement>,
    positions: Vec<f64>,
    labels: HashMap<String, usize>,
    autolabel: bool,
    counter: usize,
    immediate: bool,
}

impl Lattice {
    /// Empty lattice for the given beam.
    ///
    /// # Errors
    ///
    /// The errors of [`augment_beam`].
    pub fn new(beam: &BeamSpec) -> Result<Self> {
        Ok(Self {
            beam: augment_beam(beam)?,
            elements: Vec::new(),
            positions: Vec::new(),
            labels: HashMap::new(),
            autolabel: true,
            counter: 0,
            immediate: false,
        })
    }

    /// Build a lattice in which every element made by the factory methods is
    /// appended as soon as it is made.
    pub fn sequence<F>(beam: &BeamSpec, build: F) -> Result<Self>
    where
        F: FnOnce(&mut Lattice) -> Result<()>,
    {
        let mut lattice = Self::new(beam)?;
        lattice.immediate = true;
        build(&mut lattice)?;
        lattice.immediate = false;
        Ok(lattice)
    }

    /// Keep unlabelled elements unlabelled.
    pub fn without_autolabel(mut self) -> Self {
        self.autolabel = false;
        self
    }

    pub fn beam(&self) -> &Beam {
        &self.beam
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LatticeElement> {
        self.elements.iter()
    }

    /// Total length [m].
    pub fn l(&self) -> f64 {
        match (self.positions.last(), self.elements.last()) {
            (Some(s), Some(last)) => s + last.l(),
            _ => 0.0,
        }
    }

    /// Entrance position of the element at `index`.
    pub fn s(&self, index: usize) -> Option<f64> {
        self.positions.get(index).copied()
    }

    pub fn get(&self, index: usize) -> Option<&LatticeElement> {
        self.elements.get(index)
    }

    /// Most recent element with the given label.
    pub fn by_label(&self, label: &str) -> Option<&LatticeElement> {
        self.labels.get(label).map(|&i| &self.elements[i])
    }

    /// Append an element at the current end of the lattice.
    pub fn push(&mut self, element: impl Into<LatticeElement>) {
        let mut element = element.into();
        if self.autolabel && element.label().is_none() {
            element.set_label(Some(self.next_label()));
        }
        self.append(element);
    }

    fn append(&mut self, element: LatticeElement) {
        let s = self.l();
        if let Some(label) = element.label() {
            self.labels.insert(label.to_string(), self.elements.len());
        }
        self.positions.push(s);
        self.elements.push(element);
    }

    /// Place an element, preceded by a drift if it starts after the current end.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Index`] for an unknown label and [`LatticeError::Build`]
    /// if the element would start before the current end of the lattice.
    pub fn insert(&mut self, position: Position, element: impl Into<LatticeElement>) -> Result<()> {
        let s = match &position {
            Position::At(s) => *s,
            Position::After(label, distance) => {
                let &i = self
                    .labels
                    .get(label)
                    .ok_or_else(|| LatticeError::Index(format!("No element labelled {:?}", label)))?;
                self.positions[i] + self.elements[i].l() + distance
            }
        };
        let end = self.l();
        let gap = s - end;
        if gap < 0.0 {
            return Err(LatticeError::Build(format!(
                "Negative offset between elements: {} placed at {} but the lattice ends at {}",
                element_name(&position),
                s,
                end
            )));
        }
        if gap > 0.0 {
            debug!(s = end, l = gap, "Inserting implicit drift");
            // Gap drifts stay unlabelled and take no autolabel number
            self.append(Element::drift(gap, self.beam.clone()).into());
        }
        self.push(element);
        Ok(())
    }

    /// Place `element` at `s` under the given label.
    pub fn place(&mut self, label: &str, s: f64, element: impl Into<LatticeElement>) -> Result<()> {
        let mut element = element.into();
        element.set_label(Some(label.to_string()));
        self.insert(Position::At(s), element)
    }

    pub fn into_segment(self) -> Segment {
        Segment::new(self.elements)
    }

    fn next_label(&mut self) -> String {
        self.counter += 1;
        format!("e{}", self.counter)
    }

    fn make(&mut self, element: impl Into<LatticeElement>) -> Result<LatticeElement> {
        let mut element = element.into();
        if self.autolabel && element.label().is_none() {
            element.set_label(Some(self.next_label()));
        }
        if self.immediate {
            self.push(element.clone());
        }
        Ok(element)
    }

    pub fn drift(&mut self, l: f64) -> Result<LatticeElement> {
        let drift = Element::new(Physics::Drift(DriftKind::Drift), l, self.beam.clone())?;
        self.make(drift)
    }

    pub fn marker(&mut self) -> Result<LatticeElement> {
        let marker = Element::marker(self.beam.clone());
        self.make(marker)
    }

    pub fn monitor(&mut self, l: f64) -> Result<LatticeElement> {
        let monitor = Element::monitor(l, self.beam.clone());
        self.make(monitor)
    }

    pub fn quadrupole(&mut self, k1: impl Into<ParameterValue>, l: f64) -> Result<LatticeElement> {
        let quadrupole = Element::quadrupole(k1, l, self.beam.clone());
        self.make(quadrupole)
    }

    pub fn sextupole(&mut self, k2: impl Into<ParameterValue>, l: f64) -> Result<LatticeElement> {
        let sextupole = Element::sextupole(k2, l, self.beam.clone());
        self.make(sextupole)
    }

    pub fn hkicker(&mut self, kick: impl Into<ParameterValue>, l: f64) -> Result<LatticeElement> {
        let kicker = Element::hkicker(kick, l, self.beam.clone());
        self.make(kicker)
    }

    pub fn vkicker(&mut self, kick: impl Into<ParameterValue>, l: f64) -> Result<LatticeElement> {
        let kicker = Element::vkicker(kick, l, self.beam.clone());
        self.make(kicker)
    }

    pub fn kicker(
        &mut self,
        hkick: impl Into<ParameterValue>,
        vkick: impl Into<ParameterValue>,
        l: f64,
    ) -> Result<LatticeElement> {
        let kicker = Element::kicker(hkick, vkick, l, self.beam.clone());
        self.make(kicker)
    }

    pub fn sbend(
        &mut self,
        angle: impl Into<ParameterValue>,
        l: f64,
        config: BendConfig,
    ) -> Result<LatticeElement> {
        let bend = SBend::new(angle, l, config, self.beam.clone())?;
        self.make(bend)
    }
}

fn element_name(position: &Position) -> String {
    match position {
        Position::At(_) => "element".to_string(),
        Position::After(label, _) => format!("element after {:?}", label),
    }
}

impl AddAssign<LatticeElement> for Lattice {
    fn add_assign(&mut self, element: LatticeElement) {
        self.push(element);
    }
}

impl AddAssign<Element> for Lattice {
    fn add_assign(&mut self, element: Element) {
        self.push(element);
    }
}

impl AddAssign<SBend> for Lattice {
    fn add_assign(&mut self, bend: SBend) {
        self.push(bend);
    }
}

impl AddAssign<Vec<LatticeElement>> for Lattice {
    fn add_assign(&mut self, elements: Vec<LatticeElement>) {
        for element in elements {
            self.push(element);
        }
    }
}

impl From<Lattice> for Segment {
    fn from(lattice: Lattice) -> Self {
        lattice.into_segment()
    }
}

impl fmt::Display for Lattice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (s, element) in self.positions.iter().zip(&self.elements) {
            writeln!(f, "[{:12.6}]  {}", s, element)?;
        }
        Ok(())
    }
}
