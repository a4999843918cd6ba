//! # Segments
//!
//! A [`Segment`] is an ordered list of [`LatticeElement`]s: compact elements,
//! compound bends, thin representations, alignment wrappers and nested segments.
//!
//! ## Lookup
//!
//! Entries are addressed with a [`SegmentKey`]:
//!
//! - positions, negative values counting from the end
//! - labels (exact, or shell-style with `*`), regular expressions and kinds
//! - the `n`-th match of a selector
//! - ranges whose bounds are positions or single-entry keys (label bounds are
//!   inclusive)
//!
//! ```rust
//! use beamline_rs::beam::Beam;
//! use beamline_rs::elements::{Element, Kind};
//! use beamline_rs::segment::{Segment, SegmentKey};
//!
//! let beam = Beam::from_gamma(1.25).unwrap();
//! let segment = Segment::new(vec![
//!     Element::drift(1.0, beam.clone()).with_label("d1").into(),
//!     Element::quadrupole(0.5, 1.0, beam.clone()).with_label("q1").into(),
//!     Element::drift(1.0, beam.clone()).with_label("d2").into(),
//! ]);
//! assert_eq!(segment.get("q1").unwrap().single().unwrap().kind(), Kind::Quadrupole);
//! assert_eq!(segment.get("d*").unwrap().len(), 2);
//! assert_eq!(segment.get(SegmentKey::range(Some("q1"), None::<SegmentKey>)).unwrap().len(), 2);
//! ```
//!
//! Tracking is implemented in [`tracking`], element selection in [`selector`].

pub mod selector;
pub mod tracking;

pub use selector::{Criteria, SegmentKey, Selector};
pub use tracking::{
    CustomMethod, History, LossFunc, LossRecord, LossRecording, Method, Observe, TrackOptions,
    TrackResult,
};

use crate::alignment::Alignment;
use crate::aperture::Aperture;
use crate::beam::Beam;
use crate::elements::{Element, Kind, SBend, SliceStyle, ThinElement};
use crate::error::{LatticeError, Result};
use crate::parameters::{ParameterValue, Parameters};
use crate::transfer::{contract, update_reference, TransferMap, TransferMapOrder};
use ndarray::{Array1, Array2};
use rand::Rng;
use std::fmt;
use std::ops::{AddAssign, Index, IndexMut, Range};
use tracing::debug;

/// Any entry of a lattice.
#[derive(Debug, Clone, PartialEq)]
pub enum LatticeElement {
    Element(Element),
    SBend(SBend),
    Thin(ThinElement),
    Alignment(Alignment),
    Segment(Segment),
}

impl From<Element> for LatticeElement {
    fn from(element: Element) -> Self {
        LatticeElement::Element(element)
    }
}

impl From<SBend> for LatticeElement {
    fn from(bend: SBend) -> Self {
        LatticeElement::SBend(bend)
    }
}

impl From<ThinElement> for LatticeElement {
    fn from(thin: ThinElement) -> Self {
        LatticeElement::Thin(thin)
    }
}

impl From<Alignment> for LatticeElement {
    fn from(alignment: Alignment) -> Self {
        LatticeElement::Alignment(alignment)
    }
}

impl From<Segment> for LatticeElement {
    fn from(segment: Segment) -> Self {
        LatticeElement::Segment(segment)
    }
}

impl LatticeElement {
    /// Label of the entry; wrappers report the label of their target.
    pub fn label(&self) -> Option<&str> {
        match self {
            LatticeElement::Element(e) => e.label(),
            LatticeElement::SBend(b) => b.label(),
            LatticeElement::Thin(t) => t.label(),
            LatticeElement::Alignment(a) => a.target().label(),
            LatticeElement::Segment(s) => s.label(),
        }
    }

    pub fn set_label(&mut self, label: Option<String>) {
        match self {
            LatticeElement::Element(e) => e.set_label(label),
            LatticeElement::SBend(b) => b.set_label(label),
            LatticeElement::Thin(t) => t.set_label(label),
            LatticeElement::Alignment(a) => a.target_mut().set_label(label),
            LatticeElement::Segment(s) => s.set_label(label),
        }
    }

    /// Length [m].
    pub fn l(&self) -> f64 {
        match self {
            LatticeElement::Element(e) => e.l(),
            LatticeElement::SBend(b) => b.l(),
            LatticeElement::Thin(t) => t.l(),
            LatticeElement::Alignment(a) => a.target().l(),
            LatticeElement::Segment(s) => s.l(),
        }
    }

    /// Type tag of the entry itself (the outermost wrapper for wrapped entries).
    pub fn kind(&self) -> Kind {
        match self {
            LatticeElement::Element(e) => e.kind(),
            LatticeElement::SBend(b) => b.kind(),
            LatticeElement::Thin(t) => t.kind(),
            LatticeElement::Alignment(a) => a.kind(),
            LatticeElement::Segment(_) => Kind::Segment,
        }
    }

    /// `true` if the entry or any wrapped target is of kind `kind`.
    pub fn is_a(&self, kind: Kind) -> bool {
        self.unwrap_chain().iter().any(|e| e.kind().is_a(kind))
    }

    /// Beam of the entry; segments report the beam of their first entry.
    pub fn beam(&self) -> Option<&Beam> {
        match self {
            LatticeElement::Element(e) => Some(e.beam()),
            LatticeElement::SBend(b) => Some(b.beam()),
            LatticeElement::Thin(t) => Some(t.beam()),
            LatticeElement::Alignment(a) => a.target().beam(),
            LatticeElement::Segment(s) => s.iter().find_map(|e| e.beam()),
        }
    }

    pub fn aperture(&self) -> Option<&Aperture> {
        match self {
            LatticeElement::Element(e) => e.aperture(),
            LatticeElement::SBend(b) => b.aperture(),
            LatticeElement::Thin(t) => t.aperture(),
            LatticeElement::Alignment(a) => a.target().aperture(),
            LatticeElement::Segment(_) => None,
        }
    }

    /// The entry followed by its nested wrapper targets, outermost first.
    pub fn unwrap_chain(&self) -> Vec<&LatticeElement> {
        let mut chain = vec![self];
        let mut current = self;
        while let LatticeElement::Alignment(a) = current {
            current = a.target();
            chain.push(current);
        }
        chain
    }

    /// The innermost entry behind any number of alignment wrappers.
    pub fn element(&self) -> &LatticeElement {
        match self {
            LatticeElement::Alignment(a) => a.target().element(),
            other => other,
        }
    }

    pub fn element_mut(&mut self) -> &mut LatticeElement {
        match self {
            LatticeElement::Alignment(a) => a.target_mut().element_mut(),
            other => other,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            LatticeElement::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            LatticeElement::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_alignment(&self) -> Option<&Alignment> {
        match self {
            LatticeElement::Alignment(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_segment(&self) -> Option<&Segment> {
        match self {
            LatticeElement::Segment(s) => Some(s),
            _ => None,
        }
    }

    /// `true` for unwrapped members of the drift family.
    pub fn is_drift(&self) -> bool {
        self.as_element().map_or(false, Element::is_drift)
    }

    /// Attribute names of the entry; wrappers list their own attributes first.
    pub fn attribute_names(&self) -> Vec<&'static str> {
        match self {
            LatticeElement::Element(e) => e.attribute_names(),
            LatticeElement::SBend(b) => b.attribute_names(),
            LatticeElement::Thin(t) => t.base().attribute_names(),
            LatticeElement::Alignment(a) => {
                let mut names = a.attribute_names();
                names.extend(a.target().attribute_names());
                names
            }
            LatticeElement::Segment(_) => Vec::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<ParameterValue> {
        match self {
            LatticeElement::Element(e) => e.attribute(name),
            LatticeElement::SBend(b) => b.attribute(name),
            LatticeElement::Thin(t) => t.base().attribute(name),
            LatticeElement::Alignment(a) => a.attribute(name),
            LatticeElement::Segment(_) => None,
        }
    }

    /// Replace an attribute value. For thin representations only the thick base
    /// element is changed; the slices keep their values.
    ///
    /// # Errors
    ///
    /// [`LatticeError::InvalidValue`] for unknown attributes,
    /// [`LatticeError::Type`] for segments.
    pub fn set_attribute(&mut self, name: &str, value: ParameterValue) -> Result<()> {
        match self {
            LatticeElement::Element(e) => e.set_attribute(name, value),
            LatticeElement::SBend(b) => b.set_attribute(name, value),
            LatticeElement::Thin(t) => t.base_mut().set_attribute(name, value),
            LatticeElement::Alignment(a) => a.set_attribute(name, value),
            LatticeElement::Segment(_) => Err(LatticeError::Type(format!(
                "Segments have no attribute {:?}",
                name
            ))),
        }
    }

    /// Independent attribute values of the entry.
    ///
    /// Thin representations contribute the values of their thick base only: the
    /// slice strengths are derived from those values when slicing.
    pub fn values(&self) -> Vec<&ParameterValue> {
        match self {
            LatticeElement::Element(e) => e.values(),
            LatticeElement::SBend(b) => b.values(),
            LatticeElement::Thin(t) => t.base().values(),
            LatticeElement::Alignment(a) => a.values(),
            LatticeElement::Segment(s) => s.values(),
        }
    }

    pub fn values_mut(&mut self) -> Vec<&mut ParameterValue> {
        match self {
            LatticeElement::Element(e) => e.values_mut(),
            LatticeElement::SBend(b) => b.values_mut(),
            LatticeElement::Thin(t) => t.base_mut().values_mut(),
            LatticeElement::Alignment(a) => a.values_mut(),
            LatticeElement::Segment(s) => s.values_mut(),
        }
    }

    /// Aperture loss per particle at the entrance of the entry.
    pub fn loss(&self, x: &Array2<f64>) -> Array1<f64> {
        match self {
            LatticeElement::Element(e) => e.loss(x),
            LatticeElement::SBend(b) => b.loss(x),
            LatticeElement::Thin(t) => t.loss(x),
            LatticeElement::Alignment(a) => a.loss(x),
            LatticeElement::Segment(_) => Array1::zeros(x.ncols()),
        }
    }

    /// Position readings `(2, N)` of a (possibly wrapped) monitor.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Type`] if the entry is not a monitor.
    pub fn readout<R: Rng + ?Sized>(&self, x: &Array2<f64>, rng: &mut R) -> Result<Array2<f64>> {
        match self {
            LatticeElement::Element(e) => e.readout(x),
            LatticeElement::Alignment(a) => a.readout(x, rng),
            other => Err(LatticeError::Type(format!("{} has no readout", other.kind()))),
        }
    }

    /// Slice the entry into `n` thin kicks, see [`Element::makethin`].
    ///
    /// Wrappers slice their target; segments slice every entry.
    ///
    /// # Errors
    ///
    /// [`LatticeError::NotImplemented`] for bends and for thin representations
    /// with `n > 0`.
    pub fn makethin(&self, n: usize, style: Option<SliceStyle>) -> Result<LatticeElement> {
        match self {
            LatticeElement::Element(e) => e.makethin(n, style),
            LatticeElement::Alignment(a) => Ok(LatticeElement::Alignment(a.makethin(n, style)?)),
            LatticeElement::Thin(_) if n == 0 => Ok(self.clone()),
            LatticeElement::Segment(s) => {
                let styles = style.map_or_else(Criteria::new, Criteria::all);
                Ok(LatticeElement::Segment(s.makethin(&Criteria::all(n), &styles)?))
            }
            other => Err(LatticeError::NotImplemented(format!("makethin for {}", other.kind()))),
        }
    }

    /// Transfer map of the entry.
    ///
    /// Segments and thin representations contract the maps of their entries with
    /// default [`MapOptions`]; wrappers contract entrance, target and exit maps.
    pub fn transfer_map(&self) -> Result<TransferMap> {
        match self {
            LatticeElement::Element(e) => e.transfer_map(),
            LatticeElement::SBend(b) => b.transfer_map(),
            LatticeElement::Thin(t) => t.segment().transfer_map(&MapOptions::default()),
            LatticeElement::Segment(s) => s.transfer_map(&MapOptions::default()),
            LatticeElement::Alignment(a) => {
                let order = TransferMapOrder::Second;
                let entered = contract(&a.transfer_map_enter(), &a.target().transfer_map()?, order, false)?;
                contract(&entered, &a.transfer_map_exit(), order, false)
            }
        }
    }
}

impl fmt::Display for LatticeElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatticeElement::Element(e) => write!(f, "{}", e),
            LatticeElement::SBend(b) => write!(f, "{}", b),
            LatticeElement::Thin(t) => write!(f, "{}", t),
            LatticeElement::Alignment(a) => write!(f, "{}", a),
            LatticeElement::Segment(s) => write!(f, "{}", s),
        }
    }
}

/// Result of a [`Segment::get`] lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection<'a> {
    Single(&'a LatticeElement),
    Many(Vec<&'a LatticeElement>),
    /// Copy of a contiguous range.
    Segment(Segment),
}

impl<'a> Selection<'a> {
    /// The selected entry.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Index`] unless exactly one entry was selected.
    pub fn single(&self) -> Result<&LatticeElement> {
        match self {
            Selection::Single(e) => Ok(*e),
            Selection::Many(v) if v.len() == 1 => Ok(v[0]),
            Selection::Segment(s) if s.len() == 1 => Ok(&s[0]),
            other => Err(LatticeError::Index(format!(
                "Expected a single entry, found {}",
                other.len()
            ))),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Selection::Single(_) => 1,
            Selection::Many(v) => v.len(),
            Selection::Segment(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Owned copies of the selected entries.
    pub fn to_vec(&self) -> Vec<LatticeElement> {
        match self {
            Selection::Single(e) => vec![(*e).clone()],
            Selection::Many(v) => v.iter().map(|e| (*e).clone()).collect(),
            Selection::Segment(s) => s.elements().to_vec(),
        }
    }
}

/// Positions resolved from a key.
enum Resolved {
    Single(usize),
    Many(Vec<usize>),
    Range(Range<usize>),
}

/// How [`Segment::transfer_maps`] combines the entries' maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMethod {
    /// Map from the start of the segment to the exit of each entry.
    Accumulate,
    /// Map of the whole segment.
    Reduce,
    /// Map of each entry expanded around the orbit at its entrance.
    Local,
}

/// Options of [`Segment::transfer_maps`].
#[derive(Debug, Clone, PartialEq)]
pub struct MapOptions {
    /// Truncation order of the contraction.
    ///
    /// Default: `TransferMapOrder::Second`
    pub order: TransferMapOrder,

    /// Symplectify the feed-down corrected linear parts.
    ///
    /// Default: true
    pub symplectify: bool,

    /// Emit the entrance and exit maps of alignment wrappers separately.
    ///
    /// Default: false
    pub unfold_alignment_errors: bool,

    /// Map the contraction starts from.
    ///
    /// Default: `None` (identity)
    pub initial: Option<TransferMap>,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            order: TransferMapOrder::Second,
            symplectify: true,
            unfold_alignment_errors: false,
            initial: None,
        }
    }
}

impl MapOptions {
    pub fn with_order(mut self, order: TransferMapOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_symplectify(mut self, symplectify: bool) -> Self {
        self.symplectify = symplectify;
        self
    }

    pub fn with_unfold_alignment_errors(mut self, unfold: bool) -> Self {
        self.unfold_alignment_errors = unfold;
        self
    }

    pub fn with_initial(mut self, initial: TransferMap) -> Self {
        self.initial = Some(initial);
        self
    }
}

/// Ordered container of lattice entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segment {
    elements: Vec<LatticeElement>,
    label: Option<String>,
}

impl FromIterator<LatticeElement> for Segment {
    fn from_iter<I: IntoIterator<Item = LatticeElement>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Extend<LatticeElement> for Segment {
    fn extend<I: IntoIterator<Item = LatticeElement>>(&mut self, iter: I) {
        self.elements.extend(iter);
    }
}

impl AddAssign<LatticeElement> for Segment {
    fn add_assign(&mut self, element: LatticeElement) {
        self.push(element);
    }
}

impl AddAssign<Element> for Segment {
    fn add_assign(&mut self, element: Element) {
        self.push(element);
    }
}

impl AddAssign<Vec<LatticeElement>> for Segment {
    fn add_assign(&mut self, elements: Vec<LatticeElement>) {
        self.extend(elements);
    }
}

impl Index<usize> for Segment {
    type Output = LatticeElement;

    fn index(&self, index: usize) -> &LatticeElement {
        &self.elements[index]
    }
}

impl IndexMut<usize> for Segment {
    fn index_mut(&mut self, index: usize) -> &mut LatticeElement {
        &mut self.elements[index]
    }
}

impl<'a> IntoIterator for &'a Segment {
    type Item = &'a LatticeElement;
    type IntoIter = std::slice::Iter<'a, LatticeElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

fn flatten_entry<'a>(element: &'a LatticeElement) -> Box<dyn Iterator<Item = &'a LatticeElement> + 'a> {
    match element {
        LatticeElement::Segment(s) => s.flatten(),
        LatticeElement::Thin(t) => t.segment().flatten(),
        other => Box::new(std::iter::once(other)),
    }
}

fn is_squeezable(element: &LatticeElement) -> bool {
    match element {
        LatticeElement::Element(e) => {
            e.kind() == Kind::Drift && !e.aperture().map_or(false, Aperture::is_finite)
        }
        _ => false,
    }
}

/// Joins the labels of merged drifts with `_`, skipping unlabelled drifts.
pub fn join_labels(labels: &[Option<&str>]) -> Option<String> {
    let labels: Vec<&str> = labels.iter().flatten().copied().collect();
    if labels.is_empty() {
        None
    } else {
        Some(labels.join("_"))
    }
}

impl Segment {
    pub fn new(elements: Vec<LatticeElement>) -> Self {
        Self {
            elements,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }

    pub fn elements(&self) -> &[LatticeElement] {
        &self.elements
    }

    pub fn into_elements(self) -> Vec<LatticeElement> {
        self.elements
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LatticeElement> {
        self.elements.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, LatticeElement> {
        self.elements.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Total length [m].
    pub fn l(&self) -> f64 {
        self.elements.iter().map(LatticeElement::l).sum()
    }

    pub fn push(&mut self, element: impl Into<LatticeElement>) {
        self.elements.push(element.into());
    }

    pub fn values(&self) -> Vec<&ParameterValue> {
        self.elements.iter().flat_map(LatticeElement::values).collect()
    }

    pub fn values_mut(&mut self) -> Vec<&mut ParameterValue> {
        self.elements
            .iter_mut()
            .flat_map(LatticeElement::values_mut)
            .collect()
    }

    fn matching(&self, selector: &Selector) -> Vec<usize> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| selector.matches(e))
            .map(|(i, _)| i)
            .collect()
    }

    fn normalize(&self, index: isize) -> Result<usize> {
        let len = self.len() as isize;
        let i = if index < 0 { index + len } else { index };
        if (0..len).contains(&i) {
            Ok(i as usize)
        } else {
            Err(LatticeError::Index(format!(
                "Index {} out of range for segment of length {}",
                index,
                self.len()
            )))
        }
    }

    fn slice_bound(&self, key: &SegmentKey, stop: bool) -> Result<usize> {
        let len = self.len() as isize;
        match key {
            SegmentKey::Index(i) => {
                let i = if *i < 0 { (*i + len).max(0) } else { (*i).min(len) };
                Ok(i as usize)
            }
            other => {
                let i = self.get_element_index(other.clone())?;
                Ok(if stop { i + 1 } else { i })
            }
        }
    }

    fn resolve(&self, key: &SegmentKey) -> Result<Resolved> {
        match key {
            SegmentKey::Index(i) => self.normalize(*i).map(Resolved::Single),
            SegmentKey::Select(selector) => {
                let found = self.matching(selector);
                match selector {
                    Selector::Label(_) | Selector::Identity(_) if found.len() == 1 => {
                        Ok(Resolved::Single(found[0]))
                    }
                    _ => Ok(Resolved::Many(found)),
                }
            }
            SegmentKey::Occurrence(selector, n) => {
                let found = self.matching(selector);
                found.get(*n).copied().map(Resolved::Single).ok_or_else(|| {
                    LatticeError::Index(format!(
                        "Occurrence {} of {} requested but only {} found",
                        n,
                        selector,
                        found.len()
                    ))
                })
            }
            SegmentKey::Range(start, stop) => {
                let start = match start {
                    Some(k) => self.slice_bound(k, false)?,
                    None => 0,
                };
                let stop = match stop {
                    Some(k) => self.slice_bound(k, true)?,
                    None => self.len(),
                };
                Ok(Resolved::Range(start..stop.max(start)))
            }
        }
    }

    /// Look up entries by key.
    ///
    /// Exact labels and identity selectors with a single match select that entry;
    /// every other selector returns all matches (possibly none).
    ///
    /// # Errors
    ///
    /// [`LatticeError::Index`] for positions out of range, missing occurrences
    /// and range bounds that do not resolve to exactly one entry.
    pub fn get(&self, key: impl Into<SegmentKey>) -> Result<Selection<'_>> {
        let selection = match self.resolve(&key.into())? {
            Resolved::Single(i) => Selection::Single(&self.elements[i]),
            Resolved::Many(indices) => {
                Selection::Many(indices.into_iter().map(|i| &self.elements[i]).collect())
            }
            Resolved::Range(range) => Selection::Segment(Segment::new(self.elements[range].to_vec())),
        };
        Ok(selection)
    }

    /// Mutable access to the single entry addressed by `key`.
    pub fn get_mut(&mut self, key: impl Into<SegmentKey>) -> Result<&mut LatticeElement> {
        let i = self.get_element_index(key)?;
        Ok(&mut self.elements[i])
    }

    /// Position of the entry addressed by `key`.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Index`] if nothing matches or a selector matches several
    /// entries without naming an occurrence, [`LatticeError::Type`] for ranges.
    pub fn get_element_index(&self, key: impl Into<SegmentKey>) -> Result<usize> {
        match key.into() {
            SegmentKey::Index(i) => self.normalize(i),
            SegmentKey::Select(selector) => match self.matching(&selector).as_slice() {
                [] => Err(LatticeError::Index(format!("Component {} not found in segment", selector))),
                [i] => Ok(*i),
                found => Err(LatticeError::Index(format!(
                    "Multiple occurrences of component {} in segment (count = {}), use an occurrence to select one",
                    selector,
                    found.len()
                ))),
            },
            key @ SegmentKey::Occurrence(..) => match self.resolve(&key)? {
                Resolved::Single(i) => Ok(i),
                _ => Err(LatticeError::Index(format!("Cannot resolve {}", key))),
            },
            key @ SegmentKey::Range(..) => Err(LatticeError::Type(format!(
                "Cannot resolve a single position from range {}",
                key
            ))),
        }
    }

    /// Replace the single entry addressed by `key`.
    pub fn set(&mut self, key: impl Into<SegmentKey>, element: impl Into<LatticeElement>) -> Result<()> {
        let i = self.get_element_index(key)?;
        self.elements[i] = element.into();
        Ok(())
    }

    /// Replace the addressed entries by drifts of the same length and label.
    ///
    /// # Errors
    ///
    /// Lookup errors of [`Segment::get`]; [`LatticeError::Type`] for an entry
    /// without a beam (an empty nested segment).
    pub fn delete(&mut self, key: impl Into<SegmentKey>) -> Result<()> {
        let indices: Vec<usize> = match self.resolve(&key.into())? {
            Resolved::Single(i) => vec![i],
            Resolved::Many(indices) => indices,
            Resolved::Range(range) => range.collect(),
        };
        for i in indices {
            let entry = &self.elements[i];
            let beam = entry.beam().cloned().ok_or_else(|| {
                LatticeError::Type(format!("Cannot replace {} without a beam", entry))
            })?;
            let mut drift = Element::drift(entry.l(), beam);
            drift.set_label(entry.label().map(str::to_string));
            self.elements[i] = LatticeElement::Element(drift);
        }
        Ok(())
    }

    /// Give every top-level entry a unique label.
    ///
    /// Unlabelled entries become `e{i}` (1-based position); repeated labels get
    /// a `_{count}` suffix.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Build`] if a suffixed label collides with an existing one.
    pub fn apply_unique_labels(&mut self) -> Result<()> {
        let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for (i, element) in self.elements.iter_mut().enumerate() {
            let label = match element.label() {
                None => format!("e{}", i + 1),
                Some(label) => label.to_string(),
            };
            let label = match counts.get_mut(&label) {
                Some(count) => {
                    *count += 1;
                    let renamed = format!("{}_{}", label, count);
                    if counts.contains_key(&renamed) {
                        return Err(LatticeError::Build(format!(
                            "Cannot make label {:?} unique: {:?} is already taken",
                            label, renamed
                        )));
                    }
                    counts.insert(renamed.clone(), 1);
                    renamed
                }
                None => {
                    counts.insert(label.clone(), 1);
                    label
                }
            };
            element.set_label(Some(label));
        }
        Ok(())
    }

    /// Entries with nested segments and thin representations expanded
    /// recursively. Compound bends and wrappers stay whole.
    pub fn flatten(&self) -> Box<dyn Iterator<Item = &LatticeElement> + '_> {
        Box::new(self.elements.iter().flat_map(flatten_entry))
    }

    /// Copy of the segment with all nesting expanded, see [`Segment::flatten`].
    pub fn flat(&self) -> Segment {
        Segment {
            elements: self.flatten().cloned().collect(),
            label: self.label.clone(),
        }
    }

    /// Copy of the segment with consecutive plain drifts merged, labels joined
    /// by [`join_labels`].
    pub fn squeeze(&self) -> Segment {
        self.squeeze_with(join_labels)
    }

    /// Merge runs of consecutive plain drifts (no monitors, no finite aperture)
    /// into one drift of the summed length, labelled by `labeler`.
    pub fn squeeze_with<F>(&self, labeler: F) -> Segment
    where
        F: Fn(&[Option<&str>]) -> Option<String>,
    {
        let mut elements = Vec::with_capacity(self.len());
        let mut run: Vec<&Element> = Vec::new();
        let flush = |run: &mut Vec<&Element>, elements: &mut Vec<LatticeElement>| {
            match run.as_slice() {
                [] => {}
                [single] => elements.push(LatticeElement::Element((*single).clone())),
                drifts => {
                    let labels: Vec<Option<&str>> = drifts.iter().map(|d| d.label()).collect();
                    let l = drifts.iter().map(|d| d.l()).sum();
                    let mut merged = Element::drift(l, drifts[0].beam().clone());
                    merged.set_label(labeler(&labels));
                    elements.push(LatticeElement::Element(merged));
                }
            }
            run.clear();
        };
        for element in &self.elements {
            match element {
                LatticeElement::Element(drift) if is_squeezable(element) => run.push(drift),
                other => {
                    flush(&mut run, &mut elements);
                    elements.push(other.clone());
                }
            }
        }
        flush(&mut run, &mut elements);
        Segment {
            elements,
            label: self.label.clone(),
        }
    }

    /// Slice entries into thin kicks.
    ///
    /// The number of slices and the style of each entry are taken from the first
    /// matching criterion; entries matching no count criterion stay thick, those
    /// matching no style criterion use their own `makethin_style`. Nested
    /// segments apply the same criteria to their entries.
    pub fn makethin(&self, n: &Criteria<usize>, style: &Criteria<SliceStyle>) -> Result<Segment> {
        let mut elements = Vec::with_capacity(self.len());
        for element in &self.elements {
            let sliced = match element {
                LatticeElement::Segment(segment) => LatticeElement::Segment(segment.makethin(n, style)?),
                other => match n.find(other) {
                    Some(&count) if count > 0 => other.makethin(count, style.find(other).copied())?,
                    Some(_) => other.clone(),
                    None => {
                        debug!(element = %other, "No slice count criterion matched, element stays thick");
                        other.clone()
                    }
                },
            };
            elements.push(sliced);
        }
        Ok(Segment {
            elements,
            label: self.label.clone(),
        })
    }

    /// Every tracked parameter of the lattice, by name.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Parameter`] if two parameters of the same name disagree.
    pub fn parameters(&self) -> Result<Parameters> {
        let mut parameters = Parameters::new();
        for value in self.values() {
            if let Some(parameter) = value.parameter() {
                parameters.add(parameter.clone())?;
            }
        }
        Ok(parameters)
    }

    /// Write `parameters` to the tracked attributes of the same name: value,
    /// bounds and `vary` flag. Returns the number of attributes updated.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Parameter`] for non-finite values.
    pub fn update_parameters(&mut self, parameters: &Parameters) -> Result<usize> {
        let mut updated = 0;
        for value in self.values_mut() {
            let Some(target) = value.parameter_mut() else {
                continue;
            };
            let Some(source) = parameters.get(target.name()) else {
                continue;
            };
            let bounds = source.bounds();
            target.set_bounds(bounds.min, bounds.max)?;
            target.set_vary(source.vary());
            target.set_value(source.value())?;
            updated += 1;
        }
        Ok(updated)
    }

    /// Values of the parameters that fitting code may vary, sorted by name.
    pub fn varying_values(&self) -> Result<Vec<f64>> {
        Ok(self.parameters()?.varying_values())
    }

    /// Write `values` into the varying parameters, in the order of
    /// [`varying_values`](Self::varying_values). Returns the number of attributes
    /// updated.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Parameter`] for values outside a parameter's bounds.
    pub fn update_varying(&mut self, values: &[f64]) -> Result<usize> {
        let mut parameters = self.parameters()?;
        parameters.update_varying(values)?;
        self.update_parameters(&parameters)
    }

    /// Put every tracked attribute back to the value it was created with.
    pub fn reset_parameters(&mut self) -> Result<usize> {
        let mut parameters = self.parameters()?;
        parameters.reset();
        self.update_parameters(&parameters)
    }

    fn process(x: &TransferMap, y: &TransferMap, method: MapMethod, options: &MapOptions) -> Result<TransferMap> {
        let contracted = contract(x, y, options.order, options.symplectify)?;
        if method != MapMethod::Local {
            return Ok(contracted);
        }
        let local = update_reference(x, y, options.order, options.symplectify)?;
        Ok(TransferMap {
            d: contracted.d,
            r: local.r,
            t: local.t,
        })
    }

    fn fold_entry(
        element: &LatticeElement,
        x: TransferMap,
        method: MapMethod,
        options: &MapOptions,
        out: &mut Vec<(Option<String>, TransferMap)>,
    ) -> Result<TransferMap> {
        let label = element.label().map(str::to_string);
        let nested = match element {
            LatticeElement::Segment(s) => Some(s),
            LatticeElement::Thin(t) => Some(t.segment()),
            _ => None,
        };
        let y = match (element, nested) {
            (_, Some(segment)) => {
                let start = if method == MapMethod::Local {
                    TransferMap {
                        d: x.d.clone(),
                        ..TransferMap::identity()
                    }
                } else {
                    x
                };
                let mut discard = Vec::new();
                let y = segment
                    .iter()
                    .try_fold(start, |x, e| Self::fold_entry(e, x, MapMethod::Reduce, options, &mut discard))?;
                out.push((label, y.clone()));
                return Ok(y);
            }
            (LatticeElement::Alignment(a), None) if options.unfold_alignment_errors => {
                let z = Self::process(&x, &a.transfer_map_enter(), method, options)?;
                out.push((label.clone(), z.clone()));
                let z = Self::fold_entry(a.target(), z, method, options, out)?;
                let z = Self::process(&z, &a.transfer_map_exit(), method, options)?;
                out.push((label, z.clone()));
                return Ok(z);
            }
            _ => element.transfer_map()?,
        };
        let z = Self::process(&x, &y, method, options)?;
        out.push((label, z.clone()));
        Ok(z)
    }

    /// Transfer maps of the entries, each labelled by its entry.
    ///
    /// With `unfold_alignment_errors` a wrapped entry contributes its entrance
    /// map, the maps of its target and its exit map, all under the target's label.
    pub fn labeled_transfer_maps(
        &self,
        method: MapMethod,
        options: &MapOptions,
    ) -> Result<Vec<(Option<String>, TransferMap)>> {
        let initial = options.initial.clone().unwrap_or_else(TransferMap::identity);
        let mut maps = Vec::with_capacity(self.len());
        let last = self
            .iter()
            .try_fold(initial, |x, e| Self::fold_entry(e, x, method, options, &mut maps))?;
        match method {
            MapMethod::Reduce => Ok(vec![(self.label.clone(), last)]),
            MapMethod::Accumulate | MapMethod::Local => Ok(maps),
        }
    }

    /// Transfer maps of the entries combined according to `method`.
    ///
    /// `Reduce` returns a single map (the initial map for an empty segment).
    pub fn transfer_maps(&self, method: MapMethod, options: &MapOptions) -> Result<Vec<TransferMap>> {
        Ok(self
            .labeled_transfer_maps(method, options)?
            .into_iter()
            .map(|(_, map)| map)
            .collect())
    }

    /// Map of the whole segment.
    pub fn transfer_map(&self, options: &MapOptions) -> Result<TransferMap> {
        let initial = options.initial.clone().unwrap_or_else(TransferMap::identity);
        let mut discard = Vec::new();
        self.iter()
            .try_fold(initial, |x, e| Self::fold_entry(e, x, MapMethod::Reduce, options, &mut discard))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Segment(label={:?}, l={}, elements=[", self.label, self.l())?;
        for element in &self.elements {
            for (i, line) in element.to_string().lines().enumerate() {
                let indent = if i == 0 { "\n    " } else { "\n        " };
                write!(f, "{}{}", indent, line)?;
            }
        }
        if !self.elements.is_empty() {
            writeln!(f)?;
        }
        write!(f, "])")
    }
}
