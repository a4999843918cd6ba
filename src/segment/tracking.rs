//! Particle tracking through a segment.
//!
//! [`Segment::forward`] pushes a `(6, N)` ensemble through the entries in order.
//! The tracking method is chosen per entry from [`TrackOptions::method`]; with
//! `exact_drift` set, drifts always use the exact solution. Aperture checks happen
//! at the entrance of every entry, and particles with a positive loss are removed
//! before the entry is tracked. Once all particles are lost the remaining entries
//! are skipped, producing empty `(6, 0)` results.

use super::{LatticeElement, Segment};
use crate::error::{LatticeError, Result};
use crate::segment::selector::{Criteria, Selector};
use crate::transfer::survivors;
use ndarray::{Array1, Array2};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// User supplied tracking function.
pub type CustomMethod =
    Arc<dyn Fn(&LatticeElement, &Array2<f64>) -> Result<Array2<f64>> + Send + Sync>;

/// Transformation applied to the loss array of an entry before it is recorded.
pub type LossFunc = Arc<dyn Fn(&Array1<f64>) -> Array1<f64> + Send + Sync>;

/// How particles are pushed through an entry.
#[derive(Clone)]
pub enum Method {
    /// `d + R·x`
    Linear,
    /// `d + R·x + T·x·x`
    SecondOrder,
    /// Non-truncated solution, where available.
    Exact,
    Custom(CustomMethod),
}

impl Method {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&LatticeElement, &Array2<f64>) -> Result<Array2<f64>> + Send + Sync + 'static,
    {
        Method::Custom(Arc::new(f))
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Linear => write!(f, "Linear"),
            Method::SecondOrder => write!(f, "SecondOrder"),
            Method::Exact => write!(f, "Exact"),
            Method::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Observation points recorded during tracking.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Observe {
    #[default]
    None,
    All,
    At(Vec<Selector>),
}

impl Observe {
    fn is_active(&self) -> bool {
        match self {
            Observe::None => false,
            Observe::All => true,
            Observe::At(places) => !places.is_empty(),
        }
    }

    fn matches(&self, element: &LatticeElement) -> bool {
        match self {
            Observe::None => false,
            Observe::All => true,
            Observe::At(places) => places.iter().any(|p| p.matches(element)),
        }
    }
}

/// Where particle loss is recorded. Any recording turns aperture checks on.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum LossRecording {
    #[default]
    None,
    /// Loss arrays of every entry, keyed by label.
    All,
    /// Sum of the (transformed) loss of every entry.
    Sum,
    /// Loss arrays of the selected entries, keyed by label.
    At(Vec<Selector>),
}

impl LossRecording {
    fn is_active(&self) -> bool {
        match self {
            LossRecording::None => false,
            LossRecording::At(places) => !places.is_empty(),
            LossRecording::All | LossRecording::Sum => true,
        }
    }

    fn matches(&self, element: &LatticeElement) -> bool {
        match self {
            LossRecording::None => false,
            LossRecording::All | LossRecording::Sum => true,
            LossRecording::At(places) => places.iter().any(|p| p.matches(element)),
        }
    }
}

/// Options of [`Segment::forward`].
#[derive(Clone)]
pub struct TrackOptions {
    /// Tracking method per entry; the first matching criterion is used.
    /// Entries that are segments themselves and match no criterion pass the
    /// criteria on to their own entries.
    pub method: Criteria<Method>,

    /// Check apertures and remove lost particles. Default: false
    pub aperture: bool,

    /// Track drifts with the exact solution regardless of `method`. Default: true
    pub exact_drift: bool,

    /// Positions to record after entries. Default: `Observe::None`
    pub observe: Observe,

    /// Loss to record at the entrance of entries. Default: `LossRecording::None`
    pub recloss: LossRecording,

    /// Applied to each loss array before it is recorded (and summed for
    /// `LossRecording::Sum`). Default: None
    pub loss_func: Option<LossFunc>,
}

impl TrackOptions {
    /// Options tracking every entry with `method`.
    pub fn new(method: Method) -> Self {
        Self::with_criteria(Criteria::all(method))
    }

    pub fn with_criteria(method: Criteria<Method>) -> Self {
        Self {
            method,
            aperture: false,
            exact_drift: true,
            observe: Observe::None,
            recloss: LossRecording::None,
            loss_func: None,
        }
    }

    pub fn with_aperture(mut self, aperture: bool) -> Self {
        self.aperture = aperture;
        self
    }

    pub fn with_exact_drift(mut self, exact_drift: bool) -> Self {
        self.exact_drift = exact_drift;
        self
    }

    pub fn with_observe(mut self, observe: Observe) -> Self {
        self.observe = observe;
        self
    }

    pub fn with_recloss(mut self, recloss: LossRecording) -> Self {
        self.recloss = recloss;
        self
    }

    pub fn with_loss_func<F>(mut self, f: F) -> Self
    where
        F: Fn(&Array1<f64>) -> Array1<f64> + Send + Sync + 'static,
    {
        self.loss_func = Some(Arc::new(f));
        self
    }

    /// Options for a nested segment: same method selection and checks, no recording.
    fn nested(&self, method: Criteria<Method>) -> Self {
        Self {
            aperture: self.aperture,
            exact_drift: self.exact_drift,
            ..Self::with_criteria(method)
        }
    }
}

impl fmt::Debug for TrackOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackOptions")
            .field("method", &self.method)
            .field("aperture", &self.aperture)
            .field("exact_drift", &self.exact_drift)
            .field("observe", &self.observe)
            .field("recloss", &self.recloss)
            .field("loss_func", &self.loss_func.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Recorded values keyed by entry label, in order of first insertion.
///
/// Recording again under a label replaces the value but keeps its position.
#[derive(Debug, Clone, PartialEq)]
pub struct History<T> {
    entries: Vec<(Option<String>, T)>,
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> History<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: Option<&str>, value: T) {
        match self.entries.iter_mut().find(|(l, _)| l.as_deref() == label) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((label.map(str::to_string), value)),
        }
    }

    pub fn get(&self, label: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|(l, _)| l.as_deref() == Some(label))
            .map(|(_, v)| v)
    }

    pub fn labels(&self) -> Vec<Option<&str>> {
        self.entries.iter().map(|(l, _)| l.as_deref()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Option<&str>, &T)> {
        self.entries.iter().map(|(l, v)| (l.as_deref(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Recorded particle loss.
#[derive(Debug, Clone, PartialEq)]
pub enum LossRecord {
    Sum(f64),
    History(History<Array1<f64>>),
}

/// Result of [`Segment::forward`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrackResult {
    /// Coordinates of the particles that reached the end, `(6, M)`.
    pub x: Array2<f64>,
    /// Positions after the observed entries, if observation was requested.
    pub history: Option<History<Array2<f64>>>,
    /// Recorded loss, if loss recording was requested.
    pub loss: Option<LossRecord>,
}

impl LatticeElement {
    /// Nested segment to be tracked entry by entry (sub-segments, thin
    /// representations and bends).
    fn as_tracked_segment(&self) -> Option<Cow<'_, Segment>> {
        match self {
            LatticeElement::Segment(segment) => Some(Cow::Borrowed(segment)),
            LatticeElement::Thin(thin) => Some(Cow::Borrowed(thin.segment())),
            LatticeElement::SBend(bend) => Some(Cow::Owned(Segment::new(
                bend.parts().into_iter().map(LatticeElement::Element).collect(),
            ))),
            _ => None,
        }
    }

    /// Track `x` through the entry with `method`.
    ///
    /// Segment-like entries track their own entries with the same method;
    /// alignment wrappers bracket their target with the entrance and exit
    /// transformations.
    pub fn track(&self, method: &Method, x: &Array2<f64>) -> Result<Array2<f64>> {
        if let Method::Custom(f) = method {
            return f(self, x);
        }
        match self {
            LatticeElement::Element(element) => match method {
                Method::Linear => element.linear(x),
                Method::SecondOrder => element.second_order(x),
                _ => element.exact(x),
            },
            LatticeElement::SBend(bend) => match method {
                Method::Linear => bend.linear(x),
                Method::SecondOrder => bend.second_order(x),
                _ => bend.exact(x),
            },
            LatticeElement::Thin(thin) => thin.segment().track_with(x, method),
            LatticeElement::Segment(segment) => segment.track_with(x, method),
            LatticeElement::Alignment(alignment) => {
                let entered = alignment.enter(x);
                let mut y = alignment.target().track(method, &entered)?;
                alignment.exit_in_place(&mut y);
                Ok(y)
            }
        }
    }

    pub fn linear(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.track(&Method::Linear, x)
    }

    pub fn second_order(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.track(&Method::SecondOrder, x)
    }

    pub fn exact(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.track(&Method::Exact, x)
    }
}

impl Segment {
    fn track_with(&self, x: &Array2<f64>, method: &Method) -> Result<Array2<f64>> {
        Ok(self.forward(x, &TrackOptions::new(method.clone()))?.x)
    }

    /// Linear tracking of every entry (drifts exact).
    pub fn linear(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.track_with(x, &Method::Linear)
    }

    /// Second order tracking of every entry (drifts exact).
    pub fn second_order(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.track_with(x, &Method::SecondOrder)
    }

    pub fn exact(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.track_with(x, &Method::Exact)
    }

    fn step(&self, element: &LatticeElement, x: &Array2<f64>, options: &TrackOptions) -> Result<Array2<f64>> {
        if let LatticeElement::Element(e) = element {
            if options.exact_drift && e.is_drift() {
                return e.exact(x);
            }
        }
        match options.method.find(element) {
            Some(Method::Custom(f)) => f(element, x),
            Some(method) => match element.as_tracked_segment() {
                Some(segment) => Ok(segment
                    .forward(x, &options.nested(Criteria::all(method.clone())))?
                    .x),
                None => element.track(method, x),
            },
            None => match element.as_tracked_segment() {
                Some(segment) => Ok(segment.forward(x, &options.nested(options.method.clone()))?.x),
                None => Err(LatticeError::Tracking(format!(
                    "The following element did not match any tracking method specification: {}",
                    element
                ))),
            },
        }
    }

    /// Track `x` (shape `(6, N)`) through the segment.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Tracking`] if an entry matches no method, or any error of
    /// the entries' tracking methods.
    pub fn forward(&self, x: &Array2<f64>, options: &TrackOptions) -> Result<TrackResult> {
        let recording = options.recloss.is_active();
        let aperture = options.aperture || recording;
        let observing = options.observe.is_active();

        if !(aperture || observing) {
            let x = self
                .iter()
                .try_fold(x.clone(), |x, element| self.step(element, &x, options))?;
            return Ok(TrackResult {
                x,
                history: None,
                loss: None,
            });
        }

        let sum = options.recloss == LossRecording::Sum;
        let mut total_loss = 0.0;
        let mut loss_history = History::new();
        let mut history = History::new();
        let mut x = x.clone();

        for element in self.iter() {
            if aperture {
                let loss = if x.ncols() > 0 {
                    element.loss(&x)
                } else {
                    Array1::zeros(0)
                };
                if options.recloss.matches(element) {
                    let value = match &options.loss_func {
                        Some(f) => f(&loss),
                        None => loss.clone(),
                    };
                    if sum {
                        total_loss += value.sum();
                    } else {
                        loss_history.insert(element.label(), value);
                    }
                }
                x = survivors(&x, &loss);
            }
            if x.ncols() > 0 {
                x = self.step(element, &x, options)?;
            }
            if options.observe.matches(element) {
                history.insert(element.label(), x.clone());
            }
        }

        let loss = if sum {
            Some(LossRecord::Sum(total_loss))
        } else if recording {
            Some(LossRecord::History(loss_history))
        } else {
            None
        };
        Ok(TrackResult {
            x,
            history: observing.then_some(history),
            loss,
        })
    }
}
