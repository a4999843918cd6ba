//! Transverse apertures
//!
//! An [`Aperture`] bounds the transverse position `(x, y)` of particles inside an
//! element. [`Aperture::loss`] returns one non-negative value per particle: zero
//! inside the shape (including exactly on the boundary) and positive outside.
//!
//! The effective bound per axis is `aperture + padding`, measured from the aperture
//! center at `offset`.

use crate::error::{LatticeError, Result};
use crate::parameters::ParameterValue;
use ndarray::{Array1, ArrayView2, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape of an aperture, as named by the `apertype` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApertureShape {
    /// One value: radius.
    Circle,
    /// Two values: horizontal and vertical semi-axes.
    Ellipse,
    /// Two values: half width and half height.
    Rectangle,
    /// Four values: rectangle half width/height followed by ellipse semi-axes.
    RectEllipse,
}

impl ApertureShape {
    /// Number of values describing the shape.
    pub fn arity(&self) -> usize {
        match self {
            ApertureShape::Circle => 1,
            ApertureShape::Ellipse | ApertureShape::Rectangle => 2,
            ApertureShape::RectEllipse => 4,
        }
    }

    /// Parse an `apertype` keyword (case-insensitive).
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "circle" => Some(ApertureShape::Circle),
            "ellipse" => Some(ApertureShape::Ellipse),
            "rectangle" => Some(ApertureShape::Rectangle),
            "rectellipse" => Some(ApertureShape::RectEllipse),
            _ => None,
        }
    }

    /// The `apertype` keyword of this shape.
    pub fn keyword(&self) -> &'static str {
        match self {
            ApertureShape::Circle => "circle",
            ApertureShape::Ellipse => "ellipse",
            ApertureShape::Rectangle => "rectangle",
            ApertureShape::RectEllipse => "rectellipse",
        }
    }
}

/// Transverse aperture of an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aperture {
    shape: ApertureShape,
    values: Vec<ParameterValue>,
    padding: Vec<f64>,
    offset: [f64; 2],
}

impl Aperture {
    /// Create an aperture from its shape and values.
    ///
    /// # Errors
    ///
    /// [`LatticeError::InvalidValue`] if the number of values does not match the shape.
    pub fn new(shape: ApertureShape, values: Vec<ParameterValue>) -> Result<Self> {
        if values.len() != shape.arity() {
            return Err(LatticeError::InvalidValue(format!(
                "{} aperture requires {} value(s) (got {})",
                shape.keyword(),
                shape.arity(),
                values.len()
            )));
        }
        Ok(Self {
            shape,
            padding: vec![0.0; values.len()],
            values,
            offset: [0.0, 0.0],
        })
    }

    /// Circular aperture with radius `r`.
    pub fn circle(r: impl Into<ParameterValue>) -> Self {
        Self {
            shape: ApertureShape::Circle,
            values: vec![r.into()],
            padding: vec![0.0],
            offset: [0.0, 0.0],
        }
    }

    /// Elliptical aperture with semi-axes `a` (horizontal) and `b` (vertical).
    pub fn ellipse(a: impl Into<ParameterValue>, b: impl Into<ParameterValue>) -> Self {
        Self {
            shape: ApertureShape::Ellipse,
            values: vec![a.into(), b.into()],
            padding: vec![0.0; 2],
            offset: [0.0, 0.0],
        }
    }

    /// Rectangular aperture with half width `a` and half height `b`.
    pub fn rectangle(a: impl Into<ParameterValue>, b: impl Into<ParameterValue>) -> Self {
        Self {
            shape: ApertureShape::Rectangle,
            values: vec![a.into(), b.into()],
            padding: vec![0.0; 2],
            offset: [0.0, 0.0],
        }
    }

    /// Overlay of the rectangle `(a, b)` and the ellipse `(c, d)`.
    pub fn rect_ellipse(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self {
            shape: ApertureShape::RectEllipse,
            values: vec![a.into(), b.into(), c.into(), d.into()],
            padding: vec![0.0; 4],
            offset: [0.0, 0.0],
        }
    }

    /// Circle of infinite radius; never loses particles.
    pub fn unbounded() -> Self {
        Self::circle(f64::INFINITY)
    }

    /// Set the padding per transverse axis `[x, y]`.
    ///
    /// A circle uses the horizontal padding; a rect-ellipse pads both of its
    /// components.
    pub fn with_padding(mut self, padding: [f64; 2]) -> Self {
        self.padding = match self.shape {
            ApertureShape::Circle => vec![padding[0]],
            ApertureShape::Ellipse | ApertureShape::Rectangle => padding.to_vec(),
            ApertureShape::RectEllipse => vec![padding[0], padding[1], padding[0], padding[1]],
        };
        self
    }

    /// Move the aperture center to `offset`.
    pub fn with_offset(mut self, offset: [f64; 2]) -> Self {
        self.offset = offset;
        self
    }

    pub fn shape(&self) -> ApertureShape {
        self.shape
    }

    pub fn values(&self) -> &[ParameterValue] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [ParameterValue] {
        &mut self.values
    }

    pub fn padding(&self) -> &[f64] {
        &self.padding
    }

    pub fn offset(&self) -> [f64; 2] {
        self.offset
    }

    /// `true` if all bounds are finite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.value().is_finite())
    }

    fn effective(&self) -> Vec<f64> {
        self.values
            .iter()
            .zip(&self.padding)
            .map(|(v, p)| v.value() + p)
            .collect()
    }

    /// Loss value per column of `xy` (shape `(2, N)`, rows x and y).
    pub fn loss(&self, xy: ArrayView2<f64>) -> Array1<f64> {
        let bounds = self.effective();
        let [x0, y0] = self.offset;
        let x = xy.row(0).mapv(|x| x - x0);
        let y = xy.row(1).mapv(|y| y - y0);
        match self.shape {
            ApertureShape::Circle => circle_loss(&x, &y, bounds[0]),
            ApertureShape::Ellipse => ellipse_loss(&x, &y, bounds[0], bounds[1]),
            ApertureShape::Rectangle => rectangle_loss(&x, &y, bounds[0], bounds[1]),
            ApertureShape::RectEllipse => {
                let rect = rectangle_loss(&x, &y, bounds[0], bounds[1]);
                let ellipse = ellipse_loss(&x, &y, bounds[2], bounds[3]);
                Zip::from(&rect).and(&ellipse).map_collect(|r, e| r.max(*e))
            }
        }
    }

    /// `true` for every column of `xy` that lies inside the aperture.
    pub fn contains(&self, xy: ArrayView2<f64>) -> Array1<bool> {
        self.loss(xy).mapv(|l| l == 0.0)
    }
}

impl Default for Aperture {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl fmt::Display for Aperture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.values.iter().map(|v| v.value().to_string()).collect();
        write!(f, "{}({})", self.shape.keyword(), values.join(", "))
    }
}

fn relu(v: f64) -> f64 {
    if v > 0.0 {
        v
    } else {
        0.0
    }
}

fn circle_loss(x: &Array1<f64>, y: &Array1<f64>, r: f64) -> Array1<f64> {
    Zip::from(x)
        .and(y)
        .map_collect(|x, y| relu(x.hypot(*y) - r))
}

fn ellipse_loss(x: &Array1<f64>, y: &Array1<f64>, a: f64, b: f64) -> Array1<f64> {
    Zip::from(x)
        .and(y)
        .map_collect(|x, y| relu((x / a).powi(2) + (y / b).powi(2) - 1.0))
}

fn rectangle_loss(x: &Array1<f64>, y: &Array1<f64>, a: f64, b: f64) -> Array1<f64> {
    Zip::from(x)
        .and(y)
        .map_collect(|x, y| relu((x.abs() - a).max(y.abs() - b)))
}
