//! Field-free elements: drifts, instruments, placeholders and monitors.

use super::{DriftKind, Element, MonitorPlane, Physics};
use crate::beam::Beam;
use ndarray::{Array2, Zip};

impl Element {
    /// Drift space of length `l`.
    ///
    /// Unlike in MAD-X, drifts take part in aperture checks.
    pub fn drift(l: f64, beam: Beam) -> Self {
        Self::from_parts(Physics::Drift(DriftKind::Drift), l, beam)
    }

    /// Place holder for any type of beam instrumentation.
    pub fn instrument(l: f64, beam: Beam) -> Self {
        Self::from_parts(Physics::Drift(DriftKind::Instrument), l, beam)
    }

    /// Place holder for any type of element.
    pub fn placeholder(l: f64, beam: Beam) -> Self {
        Self::from_parts(Physics::Drift(DriftKind::Placeholder), l, beam)
    }

    /// Beam position monitor.
    pub fn monitor(l: f64, beam: Beam) -> Self {
        Self::from_parts(Physics::Monitor(MonitorPlane::Both), l, beam)
    }

    pub fn hmonitor(l: f64, beam: Beam) -> Self {
        Self::from_parts(Physics::Monitor(MonitorPlane::Horizontal), l, beam)
    }

    pub fn vmonitor(l: f64, beam: Beam) -> Self {
        Self::from_parts(Physics::Monitor(MonitorPlane::Vertical), l, beam)
    }

    /// `true` for the drift family (drifts, instruments, placeholders, monitors).
    pub fn is_drift(&self) -> bool {
        matches!(self.physics(), Physics::Drift(_) | Physics::Monitor(_))
    }
}

/// Exact solution of the field-free motion over length `l`:
///
/// ```text
/// pz = sqrt(1 + 2 pt/β + pt² - px² - py²)
/// x += px l / pz,   y += py l / pz,   t += (1/β - (1/β + pt) / pz) l
/// ```
pub fn exact(x: &Array2<f64>, l: f64, beta: f64) -> Array2<f64> {
    let (px, py, pt) = (x.row(1), x.row(3), x.row(5));
    let pz = Zip::from(&px)
        .and(&py)
        .and(&pt)
        .map_collect(|&px, &py, &pt| (1.0 + 2.0 * pt / beta + pt * pt - px * px - py * py).sqrt());

    let mut out = x.clone();
    Zip::from(out.row_mut(0))
        .and(&px)
        .and(&pz)
        .for_each(|x, &px, &pz| *x += px * l / pz);
    Zip::from(out.row_mut(2))
        .and(&py)
        .and(&pz)
        .for_each(|y, &py, &pz| *y += py * l / pz);
    Zip::from(out.row_mut(4))
        .and(&pt)
        .and(&pz)
        .for_each(|t, &pt, &pz| *t += (1.0 / beta - (1.0 / beta + pt) / pz) * l);
    out
}
