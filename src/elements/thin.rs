//! Thin lens slicing of thick elements.
//!
//! [`Element::makethin`] replaces a thick kicker, quadrupole or sextupole by `n`
//! zero length kicks separated by drifts. Let `δ` be the distance from the
//! entrance to the first kick (and from the last kick to the exit) and `Δ` the
//! distance between kicks, both relative to the element length, so that
//! `2δ + (n - 1)Δ = 1`:
//!
//! | style  | δ            | Δ           |
//! |--------|--------------|-------------|
//! | teapot | 1 / (2(n+1)) | n / (n²-1)  |
//! | simple | 1 / (2n)     | 1 / n       |
//! | edge   | 0            | 1 / (n-1)   |
//!
//! A single slice always sits in the middle of the element (`δ = 0.5`).
//!
//! Slicing copies the current attribute values. Tracked parameters of the slices are
//! derived from the thick element, so after updating parameters the element has to
//! be sliced again.

use super::{Element, Kind, Physics};
use crate::aperture::Aperture;
use crate::beam::Beam;
use crate::error::{LatticeError, Result};
use crate::segment::{LatticeElement, Segment};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Distribution of thin kicks along a sliced element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SliceStyle {
    Edge,
    Simple,
    Teapot,
}

impl SliceStyle {
    /// `(δ, Δ)` for `n` slices.
    ///
    /// # Errors
    ///
    /// [`LatticeError::InvalidValue`] if `n < 1`.
    pub fn deltas(self, n: usize) -> Result<(f64, f64)> {
        if n < 1 {
            return Err(LatticeError::InvalidValue(
                "Number of thin slices must be at least 1".to_string(),
            ));
        }
        if n == 1 {
            return Ok((0.5, 0.0));
        }
        let n = n as f64;
        let deltas = match self {
            SliceStyle::Edge => (0.0, 1.0 / (n - 1.0)),
            SliceStyle::Simple => (0.5 / n, 1.0 / n),
            SliceStyle::Teapot => (0.5 / (n + 1.0), n / (n * n - 1.0)),
        };
        Ok(deltas)
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "edge" => Some(SliceStyle::Edge),
            "simple" => Some(SliceStyle::Simple),
            "teapot" => Some(SliceStyle::Teapot),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            SliceStyle::Edge => "edge",
            SliceStyle::Simple => "simple",
            SliceStyle::Teapot => "teapot",
        }
    }
}

impl fmt::Display for SliceStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Thin representation of an element: the slices and drifts that replace it,
/// together with the thick element it was made from.
///
/// Label, length and aperture are those of the thick element.
#[derive(Debug, Clone, PartialEq)]
pub struct ThinElement {
    base: Element,
    segment: Segment,
}

impl ThinElement {
    pub fn new(base: Element, segment: Segment) -> Self {
        Self { base, segment }
    }

    /// The thick element.
    pub fn base(&self) -> &Element {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut Element {
        &mut self.base
    }

    /// Drifts and kicks, in order.
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn segment_mut(&mut self) -> &mut Segment {
        &mut self.segment
    }

    pub fn into_segment(self) -> Segment {
        self.segment
    }

    pub fn label(&self) -> Option<&str> {
        self.base.label()
    }

    pub fn set_label(&mut self, label: Option<String>) {
        self.base.set_label(label);
    }

    pub fn l(&self) -> f64 {
        self.base.l()
    }

    pub fn beam(&self) -> &Beam {
        self.base.beam()
    }

    pub fn aperture(&self) -> Option<&Aperture> {
        self.base.aperture()
    }

    pub fn kind(&self) -> Kind {
        Kind::ThinElement
    }

    pub fn loss(&self, x: &Array2<f64>) -> Array1<f64> {
        self.base.loss(x)
    }
}

impl fmt::Display for ThinElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        for element in self.segment.iter() {
            write!(f, "\n    > {}", element)?;
        }
        Ok(())
    }
}

/// Alternating sequence `drift, kick, drift, ..., kick, drift` with `n` kicks
/// made by `kick` over the length `l`.
///
/// Drifts are labelled `{base_label}__d{i}` and kicks `{base_label}__{i}`.
pub fn create_thin_sequence<F>(
    n: usize,
    l: f64,
    beam: &Beam,
    kick: F,
    base_label: &str,
    style: SliceStyle,
) -> Result<Vec<LatticeElement>>
where
    F: Fn(String) -> Element,
{
    let (delta, interior) = style.deltas(n)?;
    let drift = |length: f64, label: String| {
        LatticeElement::Element(Element::drift(length, beam.clone()).with_label(label))
    };

    let mut slices = Vec::with_capacity(2 * n + 1);
    slices.push(drift(l * delta, format!("{}__d0", base_label)));
    for i in 0..n - 1 {
        slices.push(LatticeElement::Element(kick(format!("{}__{}", base_label, i))));
        slices.push(drift(l * interior, format!("{}__d{}", base_label, i + 1)));
    }
    slices.push(LatticeElement::Element(kick(format!("{}__{}", base_label, n - 1))));
    slices.push(drift(l * delta, format!("{}__d{}", base_label, n)));
    Ok(slices)
}

impl Element {
    /// Slice the element into `n` thin kicks.
    ///
    /// Returns a copy of the element for `n == 0`, for elements shorter than
    /// `makethin_min_length` and for the drift family. `style` defaults to the
    /// element's `makethin_style`.
    ///
    /// # Errors
    ///
    /// [`LatticeError::NotImplemented`] for thin multipoles and bend parts.
    pub fn makethin(&self, n: usize, style: Option<SliceStyle>) -> Result<LatticeElement> {
        match self.physics {
            Physics::ThinQuadrupole { .. }
            | Physics::ThinSextupole { .. }
            | Physics::SBendBody { .. }
            | Physics::Dipedge { .. } => {
                return Err(LatticeError::NotImplemented(format!(
                    "makethin for {}",
                    self.kind()
                )))
            }
            Physics::Marker | Physics::Drift(_) | Physics::Monitor(_) => {
                return Ok(LatticeElement::Element(self.clone()))
            }
            _ => {}
        }
        if n == 0 || self.l < self.settings.makethin_min_length {
            return Ok(LatticeElement::Element(self.clone()));
        }

        let l = self.l;
        let scale = l / n as f64;
        let physics = match &self.physics {
            Physics::Kicker { flavor, hkick, vkick, dkh, dkv } => Physics::Kicker {
                flavor: *flavor,
                hkick: hkick / n as f64,
                vkick: vkick / n as f64,
                dkh: dkh / n as f64,
                dkv: dkv / n as f64,
            },
            Physics::Quadrupole { k1, dk1 } => Physics::ThinQuadrupole {
                k1l: k1 * scale,
                dk1l: dk1 * scale,
            },
            Physics::Sextupole { k2, dk2 } => Physics::ThinSextupole {
                k2l: k2 * scale,
                dk2l: dk2 * scale,
            },
            _ => return Ok(LatticeElement::Element(self.clone())),
        };

        let kick = |label: String| {
            Element::from_parts(physics.clone(), 0.0, self.beam.clone())
                .with_settings(self.settings)
                .with_label(label)
        };
        let base_label = self.label.as_deref().unwrap_or("None");
        let style = style.unwrap_or(self.settings.makethin_style);
        let slices = create_thin_sequence(n, l, &self.beam, kick, base_label, style)?;
        Ok(LatticeElement::Thin(ThinElement::new(
            self.clone(),
            Segment::new(slices),
        )))
    }
}
