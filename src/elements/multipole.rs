//! Quadrupoles and sextupoles, thick and thin.

use super::{Element, Physics};
use crate::beam::Beam;
use crate::error::{LatticeError, Result};
use crate::parameters::ParameterValue;
use crate::transfer::{TransferMap, TransferMapOrder};

impl Element {
    /// Quadrupole magnet; `k1 > 0` focuses horizontally.
    ///
    /// A tracked `k1` must never be exactly zero, since the drift limit of the map
    /// is a separate branch. Use bounds like `[1e-16, k1_max]` instead.
    pub fn quadrupole(k1: impl Into<ParameterValue>, l: f64, beam: Beam) -> Self {
        let physics = Physics::Quadrupole {
            k1: k1.into(),
            dk1: ParameterValue::default(),
        };
        Self::from_parts(physics, l, beam)
    }

    /// Thin lens quadrupole with integrated gradient `k1l`.
    pub fn thin_quadrupole(k1l: impl Into<ParameterValue>, beam: Beam) -> Self {
        let physics = Physics::ThinQuadrupole {
            k1l: k1l.into(),
            dk1l: ParameterValue::default(),
        };
        Self::from_parts(physics, 0.0, beam)
    }

    /// Sextupole magnet.
    pub fn sextupole(k2: impl Into<ParameterValue>, l: f64, beam: Beam) -> Self {
        let physics = Physics::Sextupole {
            k2: k2.into(),
            dk2: ParameterValue::default(),
        };
        Self::from_parts(physics, l, beam)
    }

    /// Thin lens sextupole with integrated strength `k2l`.
    pub fn thin_sextupole(k2l: impl Into<ParameterValue>, beam: Beam) -> Self {
        let physics = Physics::ThinSextupole {
            k2l: k2l.into(),
            dk2l: ParameterValue::default(),
        };
        Self::from_parts(physics, 0.0, beam)
    }
}

/// Map of a thick quadrupole with total gradient `k1 + dk1`.
pub(super) fn quadrupole_map(
    k1: &ParameterValue,
    dk1: &ParameterValue,
    l: f64,
    beam: &Beam,
    order: TransferMapOrder,
) -> Result<TransferMap> {
    let k = k1 + dk1;
    if k.is_zero() {
        return match k1.parameter() {
            Some(p) if p.bounds().excludes_zero() => Err(LatticeError::InvalidValue(format!(
                "{} is bounded away from zero but cancelled by dk1 = {}",
                p.name(),
                dk1.value()
            ))),
            Some(p) => Err(LatticeError::InvalidValue(format!(
                "Tracked k1 {} must not be zero; bound it away from zero, e.g. [1e-16, k1_max]",
                p.name()
            ))),
            None if dk1.is_tracked() => Err(LatticeError::InvalidValue(
                "k1 + dk1 must not be zero while dk1 is tracked".to_string(),
            )),
            None => Ok(TransferMap::drift(l, beam, order)),
        };
    }
    let k1 = k.value();
    let beta = beam.beta;

    let w = k1.abs().sqrt();
    let wl = w * l;
    let (mut cx, mut sx) = (wl.cos(), wl.sin() / w);
    let (mut cy, mut sy) = (wl.cosh(), wl.sinh() / w);
    if k1 < 0.0 {
        std::mem::swap(&mut cx, &mut cy);
        std::mem::swap(&mut sx, &mut sy);
    }

    let mut map = TransferMap::identity();
    let r = &mut map.r;
    r[[0, 0]] = cx;
    r[[1, 1]] = cx;
    r[[0, 1]] = sx;
    r[[1, 0]] = -k1 * sx;
    r[[2, 2]] = cy;
    r[[3, 3]] = cy;
    r[[2, 3]] = sy;
    r[[3, 2]] = k1 * sy;
    r[[4, 5]] = l / beam.beta_gamma_sq();

    if order == TransferMapOrder::Second {
        let q = 0.25 / beta;
        let t = &mut map.t;
        let mut sym = |i: usize, j: usize, k: usize, v: f64| {
            t[[i, j, k]] = v;
            t[[i, k, j]] = v;
        };
        let c005 = k1 * l * sx * q;
        let c225 = -k1 * l * sy * q;

        sym(0, 0, 5, c005);
        sym(0, 1, 5, -(sx + l * cx) * q);
        sym(1, 0, 5, -k1 * (sx - l * cx) * q);
        sym(1, 1, 5, c005);
        sym(2, 2, 5, c225);
        sym(2, 3, 5, -(sy + l * cy) * q);
        sym(3, 2, 5, k1 * (sy - l * cy) * q);
        sym(3, 3, 5, c225);
        sym(4, 0, 0, -k1 * (l - sx * cx) * q);
        sym(4, 0, 1, k1 * sx * sx * q);
        sym(4, 1, 1, -(l + sx * cx) * q);
        sym(4, 2, 2, k1 * (l - sy * cy) * q);
        sym(4, 2, 3, -k1 * sy * sy * q);
        sym(4, 3, 3, -(l + sy * cy) * q);
        sym(4, 5, 5, -1.5 * l / beta / beam.beta_gamma_sq());
    }
    Ok(map)
}

/// Map of a thin quadrupole with total integrated gradient `k1l`.
pub(super) fn thin_quadrupole_map(k1l: &ParameterValue) -> TransferMap {
    let mut map = TransferMap::identity();
    map.r[[1, 0]] = -k1l.value();
    map.r[[3, 2]] = k1l.value();
    map
}

/// Map of a thick sextupole with total coefficient `k2` (`k2 + dk2`): the drift map
/// plus the sextupole's second order terms.
pub(super) fn sextupole_map(
    k2: &ParameterValue,
    l: f64,
    beam: &Beam,
    order: TransferMapOrder,
) -> TransferMap {
    let mut map = TransferMap::drift(l, beam, order);
    if order == TransferMapOrder::Second {
        let c1 = k2.value() * l / 2.0;
        let c2 = c1 * l / 2.0;
        let c3 = c2 * l / 3.0;
        let c4 = c3 * l / 4.0;
        let t = &mut map.t;
        let mut sym = |i: usize, j: usize, k: usize, v: f64| {
            t[[i, j, k]] = v;
            t[[i, k, j]] = v;
        };

        sym(0, 0, 0, -c2);
        sym(0, 0, 1, -c3);
        sym(0, 1, 1, -2.0 * c4);
        sym(0, 2, 2, c2);
        sym(0, 2, 3, c3);
        sym(0, 3, 3, 2.0 * c4);

        sym(1, 0, 0, -c1);
        sym(1, 0, 1, -c2);
        sym(1, 1, 1, -2.0 * c3);
        sym(1, 2, 2, c1);
        sym(1, 2, 3, c2);
        sym(1, 3, 3, 2.0 * c3);

        sym(2, 0, 2, c2);
        sym(2, 0, 3, c3);
        sym(2, 1, 2, c3);
        sym(2, 1, 3, 2.0 * c4);

        sym(3, 0, 2, c1);
        sym(3, 0, 3, c2);
        sym(3, 1, 2, c2);
        sym(3, 1, 3, 2.0 * c3);
    }
    map
}

/// Map of a thin sextupole with total integrated strength `k2l`.
pub(super) fn thin_sextupole_map(k2l: &ParameterValue, order: TransferMapOrder) -> TransferMap {
    let mut map = TransferMap::identity();
    if order == TransferMapOrder::Second {
        let h = k2l.value() / 2.0;
        map.t[[1, 0, 0]] = -h;
        map.t[[1, 2, 2]] = h;
        map.t[[3, 0, 2]] = h;
        map.t[[3, 2, 0]] = h;
    }
    map
}
