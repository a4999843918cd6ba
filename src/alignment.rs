//! # Alignment Errors
//!
//! An [`Alignment`] wraps a lattice entry and brackets its transport with a
//! coordinate transformation at the entrance and the inverse transformation at the
//! exit. Wrappers nest (`Tilt(Offset(LongitudinalRoll(element)))`); attributes that
//! a wrapper does not own are looked up on its target.
//!
//! - `Offset(dx, dy)`: shifts the transverse positions by `-(dx, dy)` at the
//!   entrance and by `+(dx, dy)` at the exit.
//! - `LongitudinalRoll(psi)` / `Tilt(psi)`: rotates `(x, y)` and `(px, py)` by
//!   `psi`. For a positive `psi` the trajectory is rotated clockwise, as MAD-X uses
//!   a right-handed coordinate system: at the entrance `x' = x cos + y sin`,
//!   `y' = -x sin + y cos`.
//! - `BPMError`: leaves the trajectory alone and perturbs monitor readings,
//!   `(1 + r)(xy + a) + noise`.

use crate::elements::{Kind, SliceStyle};
use crate::error::{LatticeError, Result};
use crate::parameters::ParameterValue;
use crate::segment::LatticeElement;
use crate::transfer::{positions, TransferMap};
use ndarray::{arr2, s, Array1, Array2, Zip};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default noise scale of BPM readings; effectively noise free.
pub const DEFAULT_NOISE_SCALE: [f64; 2] = [1e-100, 1e-100];

/// Kind-specific attributes of an alignment error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AlignmentKind {
    Offset {
        /// Horizontal offset [m].
        dx: ParameterValue,
        /// Vertical offset [m].
        dy: ParameterValue,
    },
    LongitudinalRoll {
        /// Rotation angle about the s-axis [rad].
        psi: ParameterValue,
    },
    /// Same transformation as `LongitudinalRoll`; a tilt is part of the design,
    /// not an error.
    Tilt { psi: ParameterValue },
    BpmError {
        /// Absolute read errors [m].
        ax: ParameterValue,
        ay: ParameterValue,
        /// Relative read errors.
        rx: ParameterValue,
        ry: ParameterValue,
        /// Standard deviation of the Gaussian reading noise in x and y [m].
        noise_scale: [f64; 2],
    },
}

/// An alignment error applied to a lattice entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    error: AlignmentKind,
    target: Box<LatticeElement>,
}

impl Alignment {
    pub fn new(error: AlignmentKind, target: impl Into<LatticeElement>) -> Self {
        Self {
            error,
            target: Box::new(target.into()),
        }
    }

    pub fn offset(
        target: impl Into<LatticeElement>,
        dx: impl Into<ParameterValue>,
        dy: impl Into<ParameterValue>,
    ) -> Self {
        let error = AlignmentKind::Offset {
            dx: dx.into(),
            dy: dy.into(),
        };
        Self::new(error, target)
    }

    pub fn longitudinal_roll(target: impl Into<LatticeElement>, psi: impl Into<ParameterValue>) -> Self {
        Self::new(AlignmentKind::LongitudinalRoll { psi: psi.into() }, target)
    }

    pub fn tilt(target: impl Into<LatticeElement>, psi: impl Into<ParameterValue>) -> Self {
        Self::new(AlignmentKind::Tilt { psi: psi.into() }, target)
    }

    /// BPM readout errors with [`DEFAULT_NOISE_SCALE`].
    pub fn bpm_error(
        target: impl Into<LatticeElement>,
        ax: impl Into<ParameterValue>,
        ay: impl Into<ParameterValue>,
        rx: impl Into<ParameterValue>,
        ry: impl Into<ParameterValue>,
    ) -> Self {
        let error = AlignmentKind::BpmError {
            ax: ax.into(),
            ay: ay.into(),
            rx: rx.into(),
            ry: ry.into(),
            noise_scale: DEFAULT_NOISE_SCALE,
        };
        Self::new(error, target)
    }

    /// Set the noise scale of a BPM error; other wrappers are returned unchanged.
    pub fn with_noise_scale(mut self, scale: [f64; 2]) -> Self {
        if let AlignmentKind::BpmError { noise_scale, .. } = &mut self.error {
            *noise_scale = scale;
        }
        self
    }

    /// Error-table columns whose non-zero values call for a wrapper of `kind`.
    pub fn triggers(kind: Kind) -> &'static [&'static str] {
        match kind {
            Kind::Offset => &["dx", "dy"],
            Kind::LongitudinalRoll => &["dpsi"],
            Kind::Tilt => &["tilt"],
            Kind::BpmError => &["mrex", "mrey", "mscalx", "mscaly"],
            _ => &[],
        }
    }

    pub fn error(&self) -> &AlignmentKind {
        &self.error
    }

    pub fn kind(&self) -> Kind {
        match self.error {
            AlignmentKind::Offset { .. } => Kind::Offset,
            AlignmentKind::LongitudinalRoll { .. } => Kind::LongitudinalRoll,
            AlignmentKind::Tilt { .. } => Kind::Tilt,
            AlignmentKind::BpmError { .. } => Kind::BpmError,
        }
    }

    pub fn target(&self) -> &LatticeElement {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut LatticeElement {
        &mut self.target
    }

    pub fn into_target(self) -> LatticeElement {
        *self.target
    }

    /// Names of the wrapper's own attributes.
    pub fn attribute_names(&self) -> Vec<&'static str> {
        self.slots().into_iter().map(|(name, _)| name).collect()
    }

    fn slots(&self) -> Vec<(&'static str, &ParameterValue)> {
        match &self.error {
            AlignmentKind::Offset { dx, dy } => vec![("dx", dx), ("dy", dy)],
            AlignmentKind::LongitudinalRoll { psi } | AlignmentKind::Tilt { psi } => {
                vec![("psi", psi)]
            }
            AlignmentKind::BpmError { ax, ay, rx, ry, .. } => {
                vec![("ax", ax), ("ay", ay), ("rx", rx), ("ry", ry)]
            }
        }
    }

    fn slots_mut(&mut self) -> Vec<(&'static str, &mut ParameterValue)> {
        match &mut self.error {
            AlignmentKind::Offset { dx, dy } => vec![("dx", dx), ("dy", dy)],
            AlignmentKind::LongitudinalRoll { psi } | AlignmentKind::Tilt { psi } => {
                vec![("psi", psi)]
            }
            AlignmentKind::BpmError { ax, ay, rx, ry, .. } => {
                vec![("ax", ax), ("ay", ay), ("rx", rx), ("ry", ry)]
            }
        }
    }

    /// Own attribute, or the target's attribute of that name.
    pub fn attribute(&self, name: &str) -> Option<ParameterValue> {
        match self.slots().into_iter().find(|(slot, _)| *slot == name) {
            Some((_, value)) => Some(value.clone()),
            None => self.target.attribute(name),
        }
    }

    /// Replace an own attribute or delegate to the target.
    pub fn set_attribute(&mut self, name: &str, value: ParameterValue) -> Result<()> {
        match self.slots_mut().into_iter().find(|(slot, _)| *slot == name) {
            Some((_, slot)) => {
                *slot = value;
                Ok(())
            }
            None => self.target.set_attribute(name, value),
        }
    }

    /// Own attribute values followed by those of the target.
    pub fn values(&self) -> Vec<&ParameterValue> {
        let mut values: Vec<&ParameterValue> = self.slots().into_iter().map(|(_, v)| v).collect();
        values.extend(self.target.values());
        values
    }

    pub fn values_mut(&mut self) -> Vec<&mut ParameterValue> {
        let Self { error, target } = self;
        let mut values: Vec<&mut ParameterValue> = match error {
            AlignmentKind::Offset { dx, dy } => vec![dx, dy],
            AlignmentKind::LongitudinalRoll { psi } | AlignmentKind::Tilt { psi } => vec![psi],
            AlignmentKind::BpmError { ax, ay, rx, ry, .. } => vec![ax, ay, rx, ry],
        };
        values.extend(target.values_mut());
        values
    }

    fn rotation(psi: f64, inverse: bool) -> TransferMap {
        let (sin, cos) = psi.sin_cos();
        let sin = if inverse { -sin } else { sin };
        let mut map = TransferMap::identity();
        for i in 0..4 {
            map.r[[i, i]] = cos;
        }
        map.r[[0, 2]] = sin;
        map.r[[1, 3]] = sin;
        map.r[[2, 0]] = -sin;
        map.r[[3, 1]] = -sin;
        map
    }

    /// Map of the transformation at the entrance.
    pub fn transfer_map_enter(&self) -> TransferMap {
        match &self.error {
            AlignmentKind::Offset { dx, dy } => {
                let mut map = TransferMap::identity();
                map.d[0] = -dx.value();
                map.d[2] = -dy.value();
                map
            }
            AlignmentKind::LongitudinalRoll { psi } | AlignmentKind::Tilt { psi } => {
                Self::rotation(psi.value(), false)
            }
            AlignmentKind::BpmError { .. } => TransferMap::identity(),
        }
    }

    /// Map of the transformation at the exit.
    pub fn transfer_map_exit(&self) -> TransferMap {
        match &self.error {
            AlignmentKind::Offset { dx, dy } => {
                let mut map = TransferMap::identity();
                map.d[0] = dx.value();
                map.d[2] = dy.value();
                map
            }
            AlignmentKind::LongitudinalRoll { psi } | AlignmentKind::Tilt { psi } => {
                Self::rotation(psi.value(), true)
            }
            AlignmentKind::BpmError { .. } => TransferMap::identity(),
        }
    }

    fn transform_in_place(&self, x: &mut Array2<f64>, map: TransferMap) {
        match &self.error {
            AlignmentKind::Offset { .. } => {
                x.row_mut(0).mapv_inplace(|v| v + map.d[0]);
                x.row_mut(2).mapv_inplace(|v| v + map.d[2]);
            }
            AlignmentKind::LongitudinalRoll { .. } | AlignmentKind::Tilt { .. } => {
                let (cos, sin) = (map.r[[0, 0]], map.r[[0, 2]]);
                for (a, b) in [(0, 2), (1, 3)] {
                    let (row_a, row_b) = x.multi_slice_mut((s![a, ..], s![b, ..]));
                    Zip::from(row_a).and(row_b).for_each(|u, v| {
                        let (p, q) = (*u, *v);
                        *u = cos * p + sin * q;
                        *v = -sin * p + cos * q;
                    });
                }
            }
            AlignmentKind::BpmError { .. } => {}
        }
    }

    /// Apply the entrance transformation to `x` in place.
    ///
    /// Callers that need the untransformed coordinates afterwards must use
    /// [`enter`](Self::enter) instead.
    pub fn enter_in_place(&self, x: &mut Array2<f64>) {
        self.transform_in_place(x, self.transfer_map_enter());
    }

    /// Apply the exit transformation to `x` in place.
    pub fn exit_in_place(&self, x: &mut Array2<f64>) {
        self.transform_in_place(x, self.transfer_map_exit());
    }

    /// Entrance transformation of a copy of `x`.
    pub fn enter(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut y = x.clone();
        self.enter_in_place(&mut y);
        y
    }

    /// Exit transformation of a copy of `x`.
    pub fn exit(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut y = x.clone();
        self.exit_in_place(&mut y);
        y
    }

    pub fn loss(&self, x: &Array2<f64>) -> Array1<f64> {
        self.target.loss(x)
    }

    /// Position readings `(2, N)`.
    ///
    /// A BPM error reads `(1 + r)(xy + a)` plus Gaussian noise drawn from `rng`
    /// (x row first); any other wrapper delegates to its target.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Type`] if the innermost element is not a monitor.
    pub fn readout<R: Rng + ?Sized>(&self, x: &Array2<f64>, rng: &mut R) -> Result<Array2<f64>> {
        match &self.error {
            AlignmentKind::BpmError { ax, ay, rx, ry, noise_scale } => {
                if !self.target.element().kind().is_a(Kind::Monitor) {
                    return Err(LatticeError::Type(format!(
                        "BPMError target {} has no readout",
                        self.target.kind()
                    )));
                }
                let mut xy = positions(x);
                let shift = [(ax.value(), 1.0 + rx.value()), (ay.value(), 1.0 + ry.value())];
                for (i, (a, r)) in shift.into_iter().enumerate() {
                    xy.row_mut(i).mapv_inplace(|v| r * (v + a));
                }
                let noise = Array2::<f64>::from_shape_simple_fn(xy.raw_dim(), || rng.sample(StandardNormal));
                let scale = arr2(&[[noise_scale[0]], [noise_scale[1]]]);
                Ok(xy + noise * scale)
            }
            _ => self.target.readout(x, rng),
        }
    }

    /// Copy of the wrapper around the sliced target.
    pub fn makethin(&self, n: usize, style: Option<SliceStyle>) -> Result<Self> {
        Ok(Self {
            error: self.error.clone(),
            target: Box::new(self.target.makethin(n, style)?),
        })
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self
            .slots()
            .into_iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        write!(f, "{}({}, target={})", self.kind(), fields.join(", "), self.target)
    }
}
