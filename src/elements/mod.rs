//! # Lattice Elements
//!
//! Compact elements are the leaves of a lattice: every [`Element`] owns a length, a
//! copy of the [`Beam`] it was built for, an optional [`Aperture`] and a
//! [`Physics`] variant holding the kind-specific attributes. Transport maps are
//! computed from the current attribute values on every call and never cached.
//!
//! ## Element Kinds
//!
//! - Drift family: `Drift`, `Instrument`, `Placeholder`, `Monitor`, `HMonitor`, `VMonitor`
//! - `Marker`: zero length identity
//! - Kicker family: `Kicker`, `HKicker`, `VKicker`, `TKicker`
//! - Multipoles: `Quadrupole`, `ThinQuadrupole`, `Sextupole`, `ThinSextupole`
//! - Dipoles: `SBendBody`, `Dipedge` and the compound [`SBend`] / `RBend`
//!
//! Thick elements are sliced into [`ThinElement`]s by [`Element::makethin`].
//!
//! ## Example Usage
//!
//! ```rust
//! use beamline_rs::beam::Beam;
//! use beamline_rs::elements::Element;
//! use ndarray::Array2;
//!
//! let beam = Beam::from_gamma(1.25).unwrap();
//! let quad = Element::quadrupole(0.25, 1.0, beam).with_label("qf");
//! let x = Array2::zeros((6, 10));
//! let y = quad.linear(&x).unwrap();
//! assert_eq!(y.dim(), (6, 10));
//! ```

pub mod bend;
pub mod drift;
pub mod kicker;
pub mod kind;
pub mod multipole;
pub mod thin;

pub use bend::{BendConfig, SBend};
pub use kind::Kind;
pub use thin::{SliceStyle, ThinElement};

use crate::aperture::Aperture;
use crate::beam::Beam;
use crate::error::{LatticeError, Result};
use crate::parameters::ParameterValue;
use crate::transfer::{positions, TransferMap, TransferMapOrder};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-element settings for slicing and map computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementSettings {
    /// Elements shorter than this are considered thin already and are not sliced
    /// by `makethin`. Thick kickers at or above this length refuse map tracking.
    ///
    /// Default: 1e-6
    pub makethin_min_length: f64,

    /// Slicing style used when `makethin` is called without an explicit style.
    ///
    /// Default: `SliceStyle::Teapot`
    pub makethin_style: SliceStyle,

    /// Truncation order of [`Element::transfer_map`].
    ///
    /// Default: `TransferMapOrder::Second`
    pub transfer_map_order: TransferMapOrder,
}

impl Default for ElementSettings {
    fn default() -> Self {
        Self {
            makethin_min_length: 1e-6,
            makethin_style: SliceStyle::Teapot,
            transfer_map_order: TransferMapOrder::Second,
        }
    }
}

/// Variant of a field-free element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriftKind {
    Drift,
    Instrument,
    Placeholder,
}

/// Measurement plane of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonitorPlane {
    Both,
    Horizontal,
    Vertical,
}

/// Variant of a kicker magnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KickerFlavor {
    /// Combined horizontal and vertical kicker.
    Combined,
    /// Horizontal kicker; `kick` aliases `hkick`.
    Horizontal,
    /// Vertical kicker; `kick` aliases `vkick`.
    Vertical,
    /// Same as `Combined`.
    T,
}

/// Kind-specific attributes of a compact element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Physics {
    Marker,
    Drift(DriftKind),
    Monitor(MonitorPlane),
    Kicker {
        flavor: KickerFlavor,
        /// Horizontal kick [rad].
        hkick: ParameterValue,
        /// Vertical kick [rad].
        vkick: ParameterValue,
        /// Horizontal field error [rad].
        dkh: ParameterValue,
        /// Vertical field error [rad].
        dkv: ParameterValue,
    },
    Quadrupole {
        /// Normalized gradient [1/m²].
        k1: ParameterValue,
        dk1: ParameterValue,
    },
    ThinQuadrupole {
        /// Integrated gradient [1/m].
        k1l: ParameterValue,
        dk1l: ParameterValue,
    },
    Sextupole {
        /// Normalized sextupole coefficient [1/m³].
        k2: ParameterValue,
        dk2: ParameterValue,
    },
    ThinSextupole {
        /// Integrated sextupole coefficient [1/m²].
        k2l: ParameterValue,
        dk2l: ParameterValue,
    },
    SBendBody {
        /// Bending angle [rad].
        angle: ParameterValue,
        /// Dipole field error [rad/m].
        dk0: ParameterValue,
    },
    Dipedge {
        /// Curvature of the associated dipole body [1/m].
        h: ParameterValue,
        /// Pole face rotation [rad].
        e1: ParameterValue,
        /// Fringe field integral.
        fint: ParameterValue,
        /// Half gap [m].
        hgap: ParameterValue,
        /// Pole face curvature [1/m].
        he: ParameterValue,
        entrance: bool,
    },
}

impl Physics {
    /// Zero-strength physics of a compact kind, `None` for containers and wrappers.
    pub fn for_kind(kind: Kind) -> Option<Physics> {
        let zero = ParameterValue::default;
        let kicker = |flavor| Physics::Kicker {
            flavor,
            hkick: zero(),
            vkick: zero(),
            dkh: zero(),
            dkv: zero(),
        };
        let physics = match kind {
            Kind::Marker => Physics::Marker,
            Kind::Drift => Physics::Drift(DriftKind::Drift),
            Kind::Instrument => Physics::Drift(DriftKind::Instrument),
            Kind::Placeholder => Physics::Drift(DriftKind::Placeholder),
            Kind::Monitor => Physics::Monitor(MonitorPlane::Both),
            Kind::HMonitor => Physics::Monitor(MonitorPlane::Horizontal),
            Kind::VMonitor => Physics::Monitor(MonitorPlane::Vertical),
            Kind::Kicker => kicker(KickerFlavor::Combined),
            Kind::HKicker => kicker(KickerFlavor::Horizontal),
            Kind::VKicker => kicker(KickerFlavor::Vertical),
            Kind::TKicker => kicker(KickerFlavor::T),
            Kind::Quadrupole => Physics::Quadrupole { k1: zero(), dk1: zero() },
            Kind::ThinQuadrupole => Physics::ThinQuadrupole { k1l: zero(), dk1l: zero() },
            Kind::Sextupole => Physics::Sextupole { k2: zero(), dk2: zero() },
            Kind::ThinSextupole => Physics::ThinSextupole { k2l: zero(), dk2l: zero() },
            Kind::SBendBody => Physics::SBendBody { angle: zero(), dk0: zero() },
            Kind::Dipedge => Physics::Dipedge {
                h: zero(),
                e1: zero(),
                fint: zero(),
                hgap: zero(),
                he: zero(),
                entrance: true,
            },
            _ => return None,
        };
        Some(physics)
    }

    fn kind(&self) -> Kind {
        match self {
            Physics::Marker => Kind::Marker,
            Physics::Drift(DriftKind::Drift) => Kind::Drift,
            Physics::Drift(DriftKind::Instrument) => Kind::Instrument,
            Physics::Drift(DriftKind::Placeholder) => Kind::Placeholder,
            Physics::Monitor(MonitorPlane::Both) => Kind::Monitor,
            Physics::Monitor(MonitorPlane::Horizontal) => Kind::HMonitor,
            Physics::Monitor(MonitorPlane::Vertical) => Kind::VMonitor,
            Physics::Kicker { flavor, .. } => match flavor {
                KickerFlavor::Combined => Kind::Kicker,
                KickerFlavor::Horizontal => Kind::HKicker,
                KickerFlavor::Vertical => Kind::VKicker,
                KickerFlavor::T => Kind::TKicker,
            },
            Physics::Quadrupole { .. } => Kind::Quadrupole,
            Physics::ThinQuadrupole { .. } => Kind::ThinQuadrupole,
            Physics::Sextupole { .. } => Kind::Sextupole,
            Physics::ThinSextupole { .. } => Kind::ThinSextupole,
            Physics::SBendBody { .. } => Kind::SBendBody,
            Physics::Dipedge { .. } => Kind::Dipedge,
        }
    }

    /// Named attribute slots, including field error slots.
    fn slots(&self) -> Vec<(&'static str, &ParameterValue)> {
        match self {
            Physics::Marker | Physics::Drift(_) | Physics::Monitor(_) => Vec::new(),
            Physics::Kicker { hkick, vkick, dkh, dkv, .. } => {
                vec![("hkick", hkick), ("vkick", vkick), ("dkh", dkh), ("dkv", dkv)]
            }
            Physics::Quadrupole { k1, dk1 } => vec![("k1", k1), ("dk1", dk1)],
            Physics::ThinQuadrupole { k1l, dk1l } => vec![("k1l", k1l), ("dk1l", dk1l)],
            Physics::Sextupole { k2, dk2 } => vec![("k2", k2), ("dk2", dk2)],
            Physics::ThinSextupole { k2l, dk2l } => vec![("k2l", k2l), ("dk2l", dk2l)],
            Physics::SBendBody { angle, dk0 } => vec![("angle", angle), ("dk0", dk0)],
            Physics::Dipedge { h, e1, fint, hgap, he, .. } => vec![
                ("h", h),
                ("e1", e1),
                ("fint", fint),
                ("hgap", hgap),
                ("he", he),
            ],
        }
    }

    fn slots_mut(&mut self) -> Vec<(&'static str, &mut ParameterValue)> {
        match self {
            Physics::Marker | Physics::Drift(_) | Physics::Monitor(_) => Vec::new(),
            Physics::Kicker { hkick, vkick, dkh, dkv, .. } => {
                vec![("hkick", hkick), ("vkick", vkick), ("dkh", dkh), ("dkv", dkv)]
            }
            Physics::Quadrupole { k1, dk1 } => vec![("k1", k1), ("dk1", dk1)],
            Physics::ThinQuadrupole { k1l, dk1l } => vec![("k1l", k1l), ("dk1l", dk1l)],
            Physics::Sextupole { k2, dk2 } => vec![("k2", k2), ("dk2", dk2)],
            Physics::ThinSextupole { k2l, dk2l } => vec![("k2l", k2l), ("dk2l", dk2l)],
            Physics::SBendBody { angle, dk0 } => vec![("angle", angle), ("dk0", dk0)],
            Physics::Dipedge { h, e1, fint, hgap, he, .. } => vec![
                ("h", h),
                ("e1", e1),
                ("fint", fint),
                ("hgap", hgap),
                ("he", he),
            ],
        }
    }
}

/// A compact lattice element.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    l: f64,
    label: Option<String>,
    aperture: Option<Aperture>,
    beam: Beam,
    physics: Physics,
    settings: ElementSettings,
}

impl Element {
    /// Create an element from its physics attributes.
    ///
    /// # Errors
    ///
    /// [`LatticeError::InvalidValue`] for a negative or non-finite length, or a
    /// marker with non-zero length.
    pub fn new(physics: Physics, l: f64, beam: Beam) -> Result<Self> {
        if !(l.is_finite() && l >= 0.0) {
            return Err(LatticeError::InvalidValue(format!(
                "Element length must be finite and non-negative (got {})",
                l
            )));
        }
        if matches!(physics, Physics::Marker) && l != 0.0 {
            return Err(LatticeError::InvalidValue(
                "Marker with non-zero length is not allowed".to_string(),
            ));
        }
        Ok(Self::from_parts(physics, l, beam))
    }

    pub(crate) fn from_parts(physics: Physics, l: f64, beam: Beam) -> Self {
        Self {
            l,
            label: None,
            aperture: None,
            beam,
            physics,
            settings: ElementSettings::default(),
        }
    }

    /// Zero length marker.
    pub fn marker(beam: Beam) -> Self {
        Self::from_parts(Physics::Marker, 0.0, beam)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_aperture(mut self, aperture: Aperture) -> Self {
        self.aperture = Some(aperture);
        self
    }

    pub fn with_settings(mut self, settings: ElementSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Length [m].
    pub fn l(&self) -> f64 {
        self.l
    }

    pub fn set_l(&mut self, l: f64) {
        self.l = l;
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }

    pub fn aperture(&self) -> Option<&Aperture> {
        self.aperture.as_ref()
    }

    pub fn set_aperture(&mut self, aperture: Option<Aperture>) {
        self.aperture = aperture;
    }

    pub fn beam(&self) -> &Beam {
        &self.beam
    }

    pub fn physics(&self) -> &Physics {
        &self.physics
    }

    pub fn physics_mut(&mut self) -> &mut Physics {
        &mut self.physics
    }

    pub fn settings(&self) -> &ElementSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ElementSettings {
        &mut self.settings
    }

    pub fn kind(&self) -> Kind {
        self.physics.kind()
    }

    /// `true` if the element is at least `makethin_min_length` long.
    pub fn is_thick(&self) -> bool {
        self.l >= self.settings.makethin_min_length
    }

    /// Ordered names of the element's physics attributes (field errors excluded).
    pub fn attribute_names(&self) -> Vec<&'static str> {
        let mut names = vec!["l"];
        match &self.physics {
            Physics::Marker | Physics::Drift(_) | Physics::Monitor(_) => {}
            Physics::Kicker { flavor, .. } => match flavor {
                KickerFlavor::Horizontal | KickerFlavor::Vertical => names.push("kick"),
                KickerFlavor::Combined | KickerFlavor::T => names.extend(["hkick", "vkick"]),
            },
            Physics::Quadrupole { .. } => names.push("k1"),
            Physics::ThinQuadrupole { .. } => names.push("k1l"),
            Physics::Sextupole { .. } => names.push("k2"),
            Physics::ThinSextupole { .. } => names.push("k2l"),
            Physics::SBendBody { .. } => names.push("angle"),
            Physics::Dipedge { .. } => names.extend(["h", "e1", "fint", "hgap"]),
        }
        names
    }

    /// Pairs of `(field coefficient, field error attribute)`.
    pub fn field_errors(&self) -> &'static [(&'static str, &'static str)] {
        match &self.physics {
            Physics::Kicker { .. } => &[("hkick", "dkh"), ("vkick", "dkv")],
            Physics::Quadrupole { .. } => &[("k1", "dk1")],
            Physics::ThinQuadrupole { .. } => &[("k1l", "dk1l")],
            Physics::Sextupole { .. } => &[("k2", "dk2")],
            Physics::ThinSextupole { .. } => &[("k2l", "dk2l")],
            Physics::SBendBody { .. } => &[("k0", "dk0")],
            _ => &[],
        }
    }

    fn resolve_alias<'a>(&self, name: &'a str) -> &'a str {
        match (&self.physics, name) {
            (Physics::Kicker { flavor: KickerFlavor::Horizontal, .. }, "kick") => "hkick",
            (Physics::Kicker { flavor: KickerFlavor::Vertical, .. }, "kick") => "vkick",
            _ => name,
        }
    }

    /// Current value of the named attribute.
    ///
    /// Besides the names of [`attribute_names`](Self::attribute_names) this accepts
    /// field error names, every kicker's `hkick`/`vkick` and the derived `k0` of a
    /// bend body.
    pub fn attribute(&self, name: &str) -> Option<ParameterValue> {
        let name = self.resolve_alias(name);
        if name == "l" {
            return Some(ParameterValue::Constant(self.l));
        }
        if let (Physics::SBendBody { angle, .. }, "k0") = (&self.physics, name) {
            return Some(angle / self.l);
        }
        self.physics
            .slots()
            .into_iter()
            .find(|(slot, _)| *slot == name)
            .map(|(_, value)| value.clone())
    }

    /// Mutable access to a stored attribute (`l` and derived attributes excluded).
    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut ParameterValue> {
        let name = self.resolve_alias(name).to_string();
        self.physics
            .slots_mut()
            .into_iter()
            .find(|(slot, _)| *slot == name)
            .map(|(_, value)| value)
    }

    /// Replace the named attribute.
    ///
    /// # Errors
    ///
    /// [`LatticeError::InvalidValue`] if the element has no such attribute.
    pub fn set_attribute(&mut self, name: &str, value: ParameterValue) -> Result<()> {
        let resolved = self.resolve_alias(name).to_string();
        if resolved == "l" {
            self.l = value.value();
            return Ok(());
        }
        if let (Physics::SBendBody { angle, .. }, "k0") = (&mut self.physics, resolved.as_str()) {
            *angle = &value * self.l;
            return Ok(());
        }
        let kind = self.kind();
        match self.attribute_mut(&resolved) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(LatticeError::InvalidValue(format!(
                "{} has no attribute {:?}",
                kind, name
            ))),
        }
    }

    /// All attribute values, aperture bounds included.
    pub fn values(&self) -> Vec<&ParameterValue> {
        let mut values: Vec<&ParameterValue> =
            self.physics.slots().into_iter().map(|(_, v)| v).collect();
        if let Some(aperture) = &self.aperture {
            values.extend(aperture.values());
        }
        values
    }

    pub fn values_mut(&mut self) -> Vec<&mut ParameterValue> {
        let mut values: Vec<&mut ParameterValue> =
            self.physics.slots_mut().into_iter().map(|(_, v)| v).collect();
        if let Some(aperture) = &mut self.aperture {
            values.extend(aperture.values_mut().iter_mut());
        }
        values
    }

    fn guard_thick(&self, operation: &str) -> Result<()> {
        if matches!(self.physics, Physics::Kicker { .. }) && self.is_thick() {
            return Err(LatticeError::Tracking(format!(
                "Cannot use {:?} of thick {} (use makethin beforehand): {}",
                operation,
                self.kind(),
                self
            )));
        }
        Ok(())
    }

    fn compute_map(&self, order: TransferMapOrder) -> Result<TransferMap> {
        let l = self.l;
        let beam = &self.beam;
        let map = match &self.physics {
            Physics::Marker => TransferMap::identity(),
            Physics::Drift(_) | Physics::Monitor(_) => TransferMap::drift(l, beam, order),
            Physics::Kicker { hkick, vkick, dkh, dkv, .. } => {
                kicker::kicker_map(&(hkick + dkh), &(vkick + dkv), l, beam, order)
            }
            Physics::Quadrupole { k1, dk1 } => multipole::quadrupole_map(k1, dk1, l, beam, order)?,
            Physics::ThinQuadrupole { k1l, dk1l } => multipole::thin_quadrupole_map(&(k1l + dk1l)),
            Physics::Sextupole { k2, dk2 } => multipole::sextupole_map(&(k2 + dk2), l, beam, order),
            Physics::ThinSextupole { k2l, dk2l } => {
                multipole::thin_sextupole_map(&(k2l + dk2l), order)
            }
            Physics::SBendBody { angle, dk0 } => {
                bend::sbend_body_map(angle.value(), dk0.value(), l, beam, order)
            }
            Physics::Dipedge { h, e1, fint, hgap, he, entrance } => bend::dipedge_map(
                h.value(),
                e1.value(),
                fint.value(),
                hgap.value(),
                he.value(),
                *entrance,
                order,
            ),
        };
        Ok(map)
    }

    /// Transfer map truncated at the configured `transfer_map_order`.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Tracking`] for thick kickers, [`LatticeError::InvalidValue`]
    /// for a quadrupole whose tracked gradient is exactly zero.
    pub fn transfer_map(&self) -> Result<TransferMap> {
        self.guard_thick("transfer_map")?;
        self.compute_map(self.settings.transfer_map_order)
    }

    /// `d + R·x`
    pub fn linear(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if let Physics::Marker = self.physics {
            return Ok(x.clone());
        }
        self.guard_thick("linear")?;
        Ok(self.compute_map(TransferMapOrder::First)?.apply_linear(x))
    }

    /// `d + R·x + T·x·x`
    pub fn second_order(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.guard_thick("second_order")?;
        Ok(self
            .compute_map(TransferMapOrder::Second)?
            .apply_second_order(x))
    }

    /// Exact (non-truncated) tracking.
    ///
    /// Available for the drift family, markers and zero length kicks.
    ///
    /// # Errors
    ///
    /// [`LatticeError::NotImplemented`] for every other element.
    pub fn exact(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        match &self.physics {
            Physics::Marker => Ok(x.clone()),
            Physics::Drift(_) | Physics::Monitor(_) => Ok(drift::exact(x, self.l, self.beam.beta)),
            Physics::ThinQuadrupole { .. } | Physics::ThinSextupole { .. } => self.second_order(x),
            Physics::Kicker { .. } if self.l == 0.0 => self.second_order(x),
            _ => Err(LatticeError::NotImplemented(format!(
                "Exact tracking through {} (use makethin beforehand)",
                self.kind()
            ))),
        }
    }

    /// Aperture loss per particle (zero when the element has no aperture).
    pub fn loss(&self, x: &Array2<f64>) -> Array1<f64> {
        match &self.aperture {
            Some(aperture) => aperture.loss(positions(x).view()),
            None => Array1::zeros(x.ncols()),
        }
    }

    /// Position readings `(2, N)` of a monitor.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Type`] if the element is not a monitor.
    pub fn readout(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        match self.physics {
            Physics::Monitor(_) => Ok(positions(x)),
            _ => Err(LatticeError::Type(format!("{} has no readout", self.kind()))),
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<String> = self
            .attribute_names()
            .into_iter()
            .filter_map(|name| self.attribute(name).map(|v| format!("{}={}", name, v)))
            .collect();
        for (_, error) in self.field_errors() {
            if let Some(v) = self.attribute(error) {
                fields.push(format!("{}={}", error, v));
            }
        }
        if let Some(aperture) = self.aperture.as_ref().filter(|a| a.is_finite()) {
            fields.push(format!("aperture={}", aperture));
        }
        fields.push(format!("label={:?}", self.label));
        write!(f, "{}({})", self.kind(), fields.join(", "))
    }
}
