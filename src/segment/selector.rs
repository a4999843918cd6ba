//! Element selection: selectors, per-element criteria and segment keys.

use super::LatticeElement;
use crate::elements::Kind;
use crate::error::{LatticeError, Result};
use regex::Regex;
use std::fmt;

/// Matches lattice entries by label, label pattern, type or identity.
#[derive(Debug, Clone)]
pub enum Selector {
    /// Matches every entry.
    Any,
    /// Exact label.
    Label(String),
    /// Label pattern, matched at the start of the label.
    Pattern(Regex),
    /// Entries of this kind (or a sub-kind), also behind alignment wrappers.
    Kind(Kind),
    /// One particular entry, see [`Selector::element`].
    Identity(usize),
}

impl Selector {
    /// Exact label, or a shell-style pattern if `label` contains `*`.
    ///
    /// ```rust
    /// use beamline_rs::segment::Selector;
    ///
    /// assert!(matches!(Selector::label("q1"), Selector::Label(_)));
    /// assert!(matches!(Selector::label("q*"), Selector::Pattern(_)));
    /// ```
    pub fn label(label: &str) -> Self {
        if label.contains('*') {
            let pattern = format!("^{}$", regex::escape(label).replace("\\*", ".*?"));
            match Regex::new(&pattern) {
                Ok(regex) => Selector::Pattern(regex),
                Err(_) => Selector::Label(label.to_string()),
            }
        } else {
            Selector::Label(label.to_string())
        }
    }

    /// Regular expression matched at the start of labels.
    ///
    /// # Errors
    ///
    /// [`LatticeError::InvalidValue`] if `pattern` is not a valid regex.
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Selector::Pattern)
            .map_err(|e| LatticeError::InvalidValue(format!("Invalid pattern {:?}: {}", pattern, e)))
    }

    /// Selects exactly `element` (by address). Only valid as long as the segment
    /// holding `element` is not modified.
    pub fn element(element: &LatticeElement) -> Self {
        Selector::Identity(element as *const LatticeElement as usize)
    }

    /// `true` for selectors that may match several entries by design.
    pub fn is_multi(&self) -> bool {
        matches!(self, Selector::Any | Selector::Pattern(_) | Selector::Kind(_))
    }

    pub fn matches(&self, element: &LatticeElement) -> bool {
        match self {
            Selector::Any => true,
            Selector::Label(label) => element.label() == Some(label.as_str()),
            Selector::Pattern(regex) => element
                .label()
                .and_then(|label| regex.find(label))
                .map_or(false, |m| m.start() == 0),
            Selector::Kind(kind) => element.unwrap_chain().iter().any(|e| e.kind().is_a(*kind)),
            Selector::Identity(address) => {
                std::ptr::eq(element, *address as *const LatticeElement)
            }
        }
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Selector::Any, Selector::Any) => true,
            (Selector::Label(a), Selector::Label(b)) => a == b,
            (Selector::Pattern(a), Selector::Pattern(b)) => a.as_str() == b.as_str(),
            (Selector::Kind(a), Selector::Kind(b)) => a == b,
            (Selector::Identity(a), Selector::Identity(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Any => write!(f, "None"),
            Selector::Label(label) => write!(f, "{:?}", label),
            Selector::Pattern(regex) => write!(f, "re({:?})", regex.as_str()),
            Selector::Kind(kind) => write!(f, "{}", kind),
            Selector::Identity(address) => write!(f, "element@{:#x}", address),
        }
    }
}

impl From<&str> for Selector {
    fn from(label: &str) -> Self {
        Selector::label(label)
    }
}

impl From<String> for Selector {
    fn from(label: String) -> Self {
        Selector::label(&label)
    }
}

impl From<Regex> for Selector {
    fn from(regex: Regex) -> Self {
        Selector::Pattern(regex)
    }
}

impl From<Kind> for Selector {
    fn from(kind: Kind) -> Self {
        Selector::Kind(kind)
    }
}

/// Ordered `(selector, value)` pairs; the first matching pair decides.
///
/// A catch-all default goes last:
///
/// ```rust
/// use beamline_rs::elements::Kind;
/// use beamline_rs::segment::Criteria;
///
/// let slices = Criteria::new()
///     .with("qf", 8)
///     .with(Kind::Quadrupole, 4)
///     .or_default(1);
/// assert_eq!(slices.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Criteria<T> {
    entries: Vec<(Selector, T)>,
}

impl<T> Default for Criteria<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> Criteria<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single criterion matching every entry.
    pub fn all(value: T) -> Self {
        Self {
            entries: vec![(Selector::Any, value)],
        }
    }

    pub fn with(mut self, selector: impl Into<Selector>, value: T) -> Self {
        self.push(selector, value);
        self
    }

    pub fn push(&mut self, selector: impl Into<Selector>, value: T) {
        self.entries.push((selector.into(), value));
    }

    /// Append a catch-all criterion.
    pub fn or_default(self, value: T) -> Self {
        self.with(Selector::Any, value)
    }

    /// Value of the first criterion matching `element`.
    pub fn find(&self, element: &LatticeElement) -> Option<&T> {
        self.entries
            .iter()
            .find(|(selector, _)| selector.matches(element))
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Selector, T)> {
        self.entries.iter()
    }
}

/// Key for looking up entries of a [`Segment`](super::Segment).
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentKey {
    /// Position; negative values count from the end.
    Index(isize),
    /// All entries matched by the selector. An exact label with a single match
    /// selects that entry alone.
    Select(Selector),
    /// The `n`-th entry matched by the selector.
    Occurrence(Selector, usize),
    /// Contiguous sub-segment. Non-positional bounds must resolve to a single
    /// entry; a non-positional stop bound is inclusive.
    Range(Option<Box<SegmentKey>>, Option<Box<SegmentKey>>),
}

impl SegmentKey {
    pub fn range(start: Option<impl Into<SegmentKey>>, stop: Option<impl Into<SegmentKey>>) -> Self {
        SegmentKey::Range(
            start.map(|k| Box::new(k.into())),
            stop.map(|k| Box::new(k.into())),
        )
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentKey::Index(i) => write!(f, "{}", i),
            SegmentKey::Select(selector) => write!(f, "{}", selector),
            SegmentKey::Occurrence(selector, n) => write!(f, "({}, {})", selector, n),
            SegmentKey::Range(start, stop) => {
                let bound = |b: &Option<Box<SegmentKey>>| {
                    b.as_ref().map_or_else(String::new, |k| k.to_string())
                };
                write!(f, "{}:{}", bound(start), bound(stop))
            }
        }
    }
}

impl From<isize> for SegmentKey {
    fn from(index: isize) -> Self {
        SegmentKey::Index(index)
    }
}

impl From<i32> for SegmentKey {
    fn from(index: i32) -> Self {
        SegmentKey::Index(index as isize)
    }
}

impl From<usize> for SegmentKey {
    fn from(index: usize) -> Self {
        SegmentKey::Index(index as isize)
    }
}

impl From<Selector> for SegmentKey {
    fn from(selector: Selector) -> Self {
        SegmentKey::Select(selector)
    }
}

impl From<&str> for SegmentKey {
    fn from(label: &str) -> Self {
        SegmentKey::Select(Selector::label(label))
    }
}

impl From<String> for SegmentKey {
    fn from(label: String) -> Self {
        SegmentKey::Select(Selector::label(&label))
    }
}

impl From<Regex> for SegmentKey {
    fn from(regex: Regex) -> Self {
        SegmentKey::Select(Selector::Pattern(regex))
    }
}

impl From<Kind> for SegmentKey {
    fn from(kind: Kind) -> Self {
        SegmentKey::Select(Selector::Kind(kind))
    }
}

impl<S: Into<Selector>> From<(S, usize)> for SegmentKey {
    fn from((selector, n): (S, usize)) -> Self {
        SegmentKey::Occurrence(selector.into(), n)
    }
}
