//! Sector bends: the magnet body, the pole face fringe fields and the compound
//! [`SBend`] / `RBend` element made of both.

use super::{Element, ElementSettings, Kind, Physics};
use crate::aperture::Aperture;
use crate::beam::Beam;
use crate::error::{LatticeError, Result};
use crate::parameters::ParameterValue;
use crate::transfer::{contract, positions, TransferMap, TransferMapOrder};
use ndarray::{Array1, Array2};
use std::fmt;

impl Element {
    /// Body of a sector bend with bending angle `angle` and length `l`.
    pub fn sbend_body(angle: impl Into<ParameterValue>, l: f64, beam: Beam) -> Self {
        let physics = Physics::SBendBody {
            angle: angle.into(),
            dk0: ParameterValue::default(),
        };
        Self::from_parts(physics, l, beam)
    }

    /// Fringe field of a dipole pole face.
    ///
    /// `h` is the curvature of the associated body, `e1` the pole face rotation,
    /// `he` the pole face curvature.
    #[allow(clippy::too_many_arguments)]
    pub fn dipedge(
        h: impl Into<ParameterValue>,
        e1: impl Into<ParameterValue>,
        fint: impl Into<ParameterValue>,
        hgap: impl Into<ParameterValue>,
        he: impl Into<ParameterValue>,
        entrance: bool,
        beam: Beam,
    ) -> Self {
        let physics = Physics::Dipedge {
            h: h.into(),
            e1: e1.into(),
            fint: fint.into(),
            hgap: hgap.into(),
            he: he.into(),
            entrance,
        };
        Self::from_parts(physics, 0.0, beam)
    }
}

/// Map of a sector bend body; `dh` is the dipole field error.
pub(super) fn sbend_body_map(
    angle: f64,
    dh: f64,
    l: f64,
    beam: &Beam,
    order: TransferMapOrder,
) -> TransferMap {
    let beta = beam.beta;
    let bg_sq = beam.beta_gamma_sq();
    let second = order == TransferMapOrder::Second;

    if angle == 0.0 {
        let mut map = TransferMap::drift(l, beam, order);
        if dh != 0.0 {
            map.d[0] = -0.5 * dh * l * l;
            map.d[1] = -dh * l;
            if second {
                map.d[4] -= dh * dh * l.powi(3) / 6.0 / beta;
                map.r[[0, 5]] += 0.5 * dh * l * l / beta;
                map.r[[4, 1]] += 0.5 * dh * l * l / beta;
            }
        }
        return map;
    }

    let k0 = angle / l;
    let cx = angle.cos();
    let sx = angle.sin();

    let mut map = TransferMap::identity();
    {
        let r = &mut map.r;
        r[[0, 0]] = cx;
        r[[0, 1]] = sx / k0;
        r[[0, 5]] = (1.0 - cx) / (k0 * beta);
        r[[1, 0]] = -k0 * sx;
        r[[1, 1]] = cx;
        r[[1, 5]] = sx / beta;
        r[[2, 3]] = l;
        r[[4, 0]] = -sx / beta;
        r[[4, 1]] = (cx - 1.0) / (k0 * beta);
        r[[4, 5]] = l / bg_sq - (k0 * l - sx) / (k0 * beta * beta);
    }

    if second {
        let t = &mut map.t;
        let mut sym = |i: usize, j: usize, k: usize, v: f64| {
            t[[i, j, k]] = v;
            t[[i, k, j]] = v;
        };
        sym(0, 0, 0, -0.5 * k0 * sx * sx);
        sym(0, 0, 1, 0.5 * cx * sx);
        sym(0, 0, 5, 0.5 * sx * sx / beta);
        sym(0, 1, 1, 0.5 * cx * (1.0 - cx) / k0);
        sym(0, 1, 5, -0.5 * sx * cx / k0 / beta);
        sym(0, 3, 3, -0.5 * (1.0 - cx) / k0);
        sym(0, 5, 5, -0.5 * sx * sx / k0 / (beta * beta) - 0.5 * (1.0 - cx) / k0 / bg_sq);
        sym(1, 1, 1, -0.5 * sx);
        sym(1, 3, 3, -0.5 * sx);
        sym(1, 5, 5, -0.5 * sx / bg_sq);
        sym(2, 0, 3, 0.5 * sx);
        sym(2, 1, 3, 0.5 * (1.0 - cx) / k0);
        sym(2, 3, 5, -0.5 * sx / k0 / beta);
        sym(4, 0, 5, 0.5 * sx / bg_sq);
        sym(4, 1, 1, -0.5 * sx / beta / k0);
        sym(4, 1, 5, 0.5 * (1.0 - cx) / k0 / bg_sq);
        sym(4, 3, 3, -0.5 * sx / k0 / beta);
        sym(4, 5, 5, -1.5 * sx / k0 / bg_sq / beta);
    }

    if dh != 0.0 {
        let k0_sq = k0 * k0;
        let arc = sx / k0 - l;
        map.d[0] = -dh * (1.0 - cx) / k0_sq;
        map.d[1] = -dh * sx / k0;
        map.d[4] = -dh * arc / k0 / beta;
        if second {
            map.d[0] += 0.5 * dh * dh * (1.0 - cx).powi(2) / (k0_sq * k0);
            map.d[4] += dh * dh * arc / k0_sq / beta;

            let r = &mut map.r;
            r[[0, 0]] -= dh * sx * sx / k0;
            r[[0, 1]] -= dh * sx * (1.0 - cx) / k0_sq;
            r[[0, 5]] += dh * (cx - cx * cx) / k0_sq / beta;
            r[[1, 0]] -= dh * sx;
            r[[4, 1]] += dh * (1.0 - cx) / k0_sq / beta;
            r[[4, 5]] -= dh * arc / k0;
            r[[2, 3]] += dh * arc / k0;
        }
    }
    map
}

/// Map of a pole face fringe field.
pub(super) fn dipedge_map(
    h: f64,
    e1: f64,
    fint: f64,
    hgap: f64,
    he: f64,
    entrance: bool,
    order: TransferMapOrder,
) -> TransferMap {
    let (sin, cos, tan) = (e1.sin(), e1.cos(), e1.tan());
    let mut map = TransferMap::identity();
    map.r[[1, 0]] = h * tan;
    map.r[[3, 2]] = -h * (e1 - 2.0 * hgap * h * fint * (1.0 + sin * sin) / cos).tan();

    if order == TransferMapOrder::Second {
        let sign = if entrance { 1.0 } else { -1.0 };
        let t000 = -sign * 0.5 * h * tan * tan;
        let t022 = sign * 0.5 * h / (cos * cos);
        let t100 = 0.5 * h * he / cos.powi(3);
        let t122 = sign * 0.5 * h * h * tan.powi(3) - t100;
        let t = &mut map.t;
        let mut sym = |i: usize, j: usize, k: usize, v: f64| {
            t[[i, j, k]] = v;
            t[[i, k, j]] = v;
        };
        sym(0, 0, 0, t000);
        sym(0, 2, 2, t022);
        sym(1, 0, 0, t100);
        sym(1, 0, 1, -t000);
        sym(1, 2, 2, t122);
        sym(1, 2, 3, t000);
        sym(2, 0, 2, -t000);
        sym(3, 0, 2, -t100);
        sym(3, 0, 3, t000);
        sym(3, 1, 2, -t022);

        let edge = 0.5 * h * h * tan / (cos * cos);
        if entrance {
            t[[1, 2, 2]] += edge;
        } else {
            t[[1, 0, 0]] -= 0.5 * h * h * tan.powi(3);
            t[[3, 0, 2]] += edge;
            t[[3, 2, 0]] += edge;
        }
    }
    map
}

/// Pole face and error attributes of a bend. All values default to zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BendConfig {
    /// Entrance pole face rotation [rad].
    pub e1: ParameterValue,
    /// Exit pole face rotation [rad].
    pub e2: ParameterValue,
    /// Fringe field integral at the entrance.
    pub fint: ParameterValue,
    /// Fringe field integral at the exit.
    ///
    /// Default: `None` (the value of `fint` is used)
    pub fintx: Option<ParameterValue>,
    /// Half gap of the magnet [m].
    pub hgap: ParameterValue,
    /// Entrance pole face curvature [1/m].
    pub h1: ParameterValue,
    /// Exit pole face curvature [1/m].
    pub h2: ParameterValue,
    /// Dipole field error [rad/m].
    pub dk0: ParameterValue,
}

/// Sector bending magnet composed of `[Dipedge, SBendBody, Dipedge]`.
///
/// The curvature of both edges follows the body (`h = angle / l`) and `hgap` is
/// shared between them.
#[derive(Debug, Clone, PartialEq)]
pub struct SBend {
    entrance: Element,
    body: Element,
    exit: Element,
    hgap: ParameterValue,
    rbend: bool,
    label: Option<String>,
    aperture: Option<Aperture>,
    settings: ElementSettings,
}

impl SBend {
    /// Sector bend with bending angle `angle` and length `l`.
    ///
    /// # Errors
    ///
    /// [`LatticeError::InvalidValue`] unless `l > 0`.
    pub fn new(
        angle: impl Into<ParameterValue>,
        l: f64,
        config: BendConfig,
        beam: Beam,
    ) -> Result<Self> {
        Self::assemble(angle.into(), l, config, beam, false)
    }

    /// Bend with parallel pole faces: `angle / 2` is added to `e1` and `e2`.
    pub fn rbend(
        angle: impl Into<ParameterValue>,
        l: f64,
        mut config: BendConfig,
        beam: Beam,
    ) -> Result<Self> {
        let angle = angle.into();
        let half = angle.value() / 2.0;
        config.e1 = &config.e1 + half;
        config.e2 = &config.e2 + half;
        Self::assemble(angle, l, config, beam, true)
    }

    fn assemble(
        angle: ParameterValue,
        l: f64,
        config: BendConfig,
        beam: Beam,
        rbend: bool,
    ) -> Result<Self> {
        if !(l > 0.0 && l.is_finite()) {
            return Err(LatticeError::InvalidValue(format!(
                "Bend length must be positive (got {})",
                l
            )));
        }
        let h = angle.value() / l;
        let fintx = config.fintx.unwrap_or_else(|| config.fint.clone());
        let entrance = Element::dipedge(
            h,
            config.e1,
            config.fint,
            config.hgap.clone(),
            config.h1,
            true,
            beam.clone(),
        );
        let mut body = Element::sbend_body(angle, l, beam.clone());
        body.set_attribute("dk0", config.dk0)?;
        let exit = Element::dipedge(h, config.e2, fintx, config.hgap.clone(), config.h2, false, beam);
        Ok(Self {
            entrance,
            body,
            exit,
            hgap: config.hgap,
            rbend,
            label: None,
            aperture: None,
            settings: ElementSettings::default(),
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_aperture(mut self, aperture: Aperture) -> Self {
        self.aperture = Some(aperture);
        self
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

    pub fn settings(&self) -> &ElementSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ElementSettings {
        &mut self.settings
    }

    pub fn l(&self) -> f64 {
        self.body.l()
    }

    pub fn beam(&self) -> &Beam {
        self.body.beam()
    }

    pub fn kind(&self) -> Kind {
        if self.rbend {
            Kind::RBend
        } else {
            Kind::SBend
        }
    }

    /// The entrance edge, body and exit edge, with the edges' curvature and half
    /// gap synchronized to the current body and `hgap`.
    pub fn parts(&self) -> [Element; 3] {
        let h = ParameterValue::Constant(self.body_angle() / self.l());
        let mut entrance = self.entrance.clone();
        let mut exit = self.exit.clone();
        for edge in [&mut entrance, &mut exit] {
            if let Physics::Dipedge { h: edge_h, hgap, .. } = edge.physics_mut() {
                *edge_h = h.clone();
                *hgap = self.hgap.clone();
            }
        }
        [entrance, self.body.clone(), exit]
    }

    fn body_angle(&self) -> f64 {
        self.body.attribute("angle").map_or(0.0, |a| a.value())
    }

    pub fn attribute_names(&self) -> Vec<&'static str> {
        vec!["l", "angle", "e1", "e2", "fint", "fintx", "hgap", "h1", "h2"]
    }

    pub fn field_errors(&self) -> &'static [(&'static str, &'static str)] {
        &[("k0", "dk0")]
    }

    fn route(&self, name: &str) -> Option<(&Element, &'static str)> {
        let routed = match name {
            "l" => (&self.body, "l"),
            "angle" => (&self.body, "angle"),
            "k0" => (&self.body, "k0"),
            "dk0" => (&self.body, "dk0"),
            "e1" => (&self.entrance, "e1"),
            "fint" => (&self.entrance, "fint"),
            "h1" => (&self.entrance, "he"),
            "e2" => (&self.exit, "e1"),
            "fintx" => (&self.exit, "fint"),
            "h2" => (&self.exit, "he"),
            _ => return None,
        };
        Some(routed)
    }

    /// Current value of a bend attribute, routed to the part that holds it.
    pub fn attribute(&self, name: &str) -> Option<ParameterValue> {
        if name == "hgap" {
            return Some(self.hgap.clone());
        }
        let (part, attribute) = self.route(name)?;
        part.attribute(attribute)
    }

    /// Replace a bend attribute.
    ///
    /// # Errors
    ///
    /// [`LatticeError::InvalidValue`] if the bend has no such attribute.
    pub fn set_attribute(&mut self, name: &str, value: ParameterValue) -> Result<()> {
        let (part, attribute) = match name {
            "hgap" => {
                self.hgap = value;
                return Ok(());
            }
            "l" | "angle" | "k0" | "dk0" => (&mut self.body, name),
            "e1" => (&mut self.entrance, "e1"),
            "fint" => (&mut self.entrance, "fint"),
            "h1" => (&mut self.entrance, "he"),
            "e2" => (&mut self.exit, "e1"),
            "fintx" => (&mut self.exit, "fint"),
            "h2" => (&mut self.exit, "he"),
            _ => {
                return Err(LatticeError::InvalidValue(format!(
                    "{} has no attribute {:?}",
                    self.kind(),
                    name
                )))
            }
        };
        part.set_attribute(attribute, value)
    }

    /// All independent attribute values, aperture bounds included.
    pub fn values(&self) -> Vec<&ParameterValue> {
        let mut values = self.body.values();
        for edge in [&self.entrance, &self.exit] {
            values.extend(
                edge.physics
                    .slots()
                    .into_iter()
                    .filter(|(name, _)| matches!(*name, "e1" | "fint" | "he"))
                    .map(|(_, v)| v),
            );
        }
        values.push(&self.hgap);
        if let Some(aperture) = &self.aperture {
            values.extend(aperture.values());
        }
        values
    }

    pub fn values_mut(&mut self) -> Vec<&mut ParameterValue> {
        let mut values = self.body.values_mut();
        for edge in [&mut self.entrance, &mut self.exit] {
            values.extend(
                edge.physics
                    .slots_mut()
                    .into_iter()
                    .filter(|(name, _)| matches!(*name, "e1" | "fint" | "he"))
                    .map(|(_, v)| v),
            );
        }
        values.push(&mut self.hgap);
        if let Some(aperture) = &mut self.aperture {
            values.extend(aperture.values_mut().iter_mut());
        }
        values
    }

    /// Contraction of the parts' maps at the configured order (not symplectified).
    pub fn transfer_map(&self) -> Result<TransferMap> {
        let order = self.settings.transfer_map_order;
        let mut map = TransferMap::identity();
        for part in self.parts().iter() {
            map = contract(&map, &part.compute_map(order)?, order, false)?;
        }
        Ok(map)
    }

    pub fn linear(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.parts()
            .iter()
            .try_fold(x.clone(), |x, part| part.linear(&x))
    }

    pub fn second_order(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.parts()
            .iter()
            .try_fold(x.clone(), |x, part| part.second_order(&x))
    }

    pub fn exact(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.parts()
            .iter()
            .try_fold(x.clone(), |x, part| part.exact(&x))
    }

    /// Aperture loss per particle (zero when the bend has no aperture).
    pub fn loss(&self, x: &Array2<f64>) -> Array1<f64> {
        match &self.aperture {
            Some(aperture) => aperture.loss(positions(x).view()),
            None => Array1::zeros(x.ncols()),
        }
    }
}

impl fmt::Display for SBend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<String> = self
            .attribute_names()
            .into_iter()
            .chain(self.field_errors().iter().map(|(_, error)| *error))
            .filter_map(|name| self.attribute(name).map(|v| format!("{}={}", name, v)))
            .collect();
        if let Some(aperture) = self.aperture.as_ref().filter(|a| a.is_finite()) {
            fields.push(format!("aperture={}", aperture));
        }
        fields.push(format!("label={:?}", self.label));
        write!(f, "{}({})", self.kind(), fields.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::is_symplectic;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn beam() -> Beam {
        Beam::from_gamma(1.25).unwrap()
    }

    fn random_ensemble(n: usize) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        Array2::from_shape_fn((6, n), |_| rng.gen_range(-1e-3..1e-3))
    }

    #[test]
    fn test_zero_angle_is_drift() {
        let x = random_ensemble(8);
        for l in [0.5, 2.0] {
            let bend = SBend::new(0.0, l, BendConfig::default(), beam()).unwrap();
            let drift = Element::drift(l, beam());
            assert_eq!(bend.linear(&x).unwrap(), drift.linear(&x).unwrap());

            let body = Element::sbend_body(0.0, l, beam());
            assert_eq!(body.linear(&x).unwrap(), drift.linear(&x).unwrap());
        }
    }

    #[test]
    fn test_body_is_symplectic() {
        let map = Element::sbend_body(0.1, 1.0, beam()).transfer_map().unwrap();
        assert!(is_symplectic(&map.r, 1e-12));
        assert_abs_diff_eq!(map.r[[0, 1]], 0.1f64.sin() / 0.1, epsilon = 1e-15);
    }

    #[test]
    fn test_field_error_without_angle() {
        let mut body = Element::sbend_body(0.0, 2.0, beam());
        body.set_attribute("dk0", 0.01.into()).unwrap();
        let map = body.transfer_map().unwrap();
        assert_abs_diff_eq!(map.d[0], -0.5 * 0.01 * 4.0, epsilon = 1e-15);
        assert_abs_diff_eq!(map.d[1], -0.02, epsilon = 1e-15);
        assert!(map.d[4] < 0.0);
    }

    #[test]
    fn test_k0_attribute() {
        let mut body = Element::sbend_body(0.2, 2.0, beam());
        assert_abs_diff_eq!(body.attribute("k0").unwrap().value(), 0.1, epsilon = 1e-15);
        body.set_attribute("k0", 0.2.into()).unwrap();
        assert_abs_diff_eq!(body.attribute("angle").unwrap().value(), 0.4, epsilon = 1e-15);
    }

    #[test]
    fn test_edges() {
        let config = BendConfig {
            e1: 0.1.into(),
            fint: 0.5.into(),
            hgap: 0.02.into(),
            ..BendConfig::default()
        };
        let bend = SBend::new(0.3, 1.5, config, beam()).unwrap();
        assert_eq!(bend.attribute("fintx").unwrap().value(), 0.5);
        assert_eq!(bend.attribute("e2").unwrap().value(), 0.0);

        let [entrance, _, exit] = bend.parts();
        assert_abs_diff_eq!(entrance.attribute("h").unwrap().value(), 0.2, epsilon = 1e-15);
        assert_eq!(exit.attribute("hgap").unwrap().value(), 0.02);

        let rbend = SBend::rbend(0.3, 1.5, BendConfig::default(), beam()).unwrap();
        assert_eq!(rbend.kind(), Kind::RBend);
        assert_abs_diff_eq!(rbend.attribute("e1").unwrap().value(), 0.15, epsilon = 1e-15);
        assert_abs_diff_eq!(rbend.attribute("e2").unwrap().value(), 0.15, epsilon = 1e-15);
        assert!(rbend.kind().is_a(Kind::SBend));
    }

    #[test]
    fn test_hgap_is_shared() {
        let mut bend = SBend::new(0.3, 1.5, BendConfig::default(), beam()).unwrap();
        bend.set_attribute("hgap", 0.05.into()).unwrap();
        for part in [&bend.parts()[0], &bend.parts()[2]] {
            assert_eq!(part.attribute("hgap").unwrap().value(), 0.05);
        }
        bend.set_attribute("angle", 0.6.into()).unwrap();
        assert_abs_diff_eq!(bend.parts()[2].attribute("h").unwrap().value(), 0.4, epsilon = 1e-15);
        assert!(bend.set_attribute("k1", 1.0.into()).is_err());
    }

    #[test]
    fn test_compound_map_matches_tracking() {
        let config = BendConfig {
            e1: 0.05.into(),
            e2: (-0.02).into(),
            ..BendConfig::default()
        };
        let mut bend = SBend::new(0.2, 1.0, config, beam()).unwrap();
        bend.settings_mut().transfer_map_order = TransferMapOrder::First;
        let map = bend.transfer_map().unwrap();
        let x = random_ensemble(5);
        let tracked = bend.linear(&x).unwrap();
        let mapped = map.apply_linear(&x);
        for (a, b) in tracked.iter().zip(mapped.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-15);
        }
    }

    #[test]
    fn test_requires_length() {
        assert!(SBend::new(0.1, 0.0, BendConfig::default(), beam()).is_err());
    }
}
