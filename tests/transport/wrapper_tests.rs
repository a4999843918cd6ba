//! Alignment wrappers around elements

use crate::test_helpers::{ensemble, matrix_approx_eq, proton_beam};
use approx::assert_abs_diff_eq;
use beamline_rs::alignment::{Alignment, DEFAULT_NOISE_SCALE};
use beamline_rs::elements::{Element, Kind};
use beamline_rs::segment::LatticeElement;
use ndarray::{array, Array2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::f64::consts::FRAC_PI_2;

#[test]
fn test_deep_chains_unwrap_to_the_element() {
    let beam = proton_beam();
    let mut element = LatticeElement::from(Element::quadrupole(0.2, 1.0, beam).with_label("q"));
    for i in 0..20 {
        element = match i % 3 {
            0 => Alignment::offset(element, 1e-4, 0.0).into(),
            1 => Alignment::tilt(element, 0.01).into(),
            _ => Alignment::longitudinal_roll(element, -0.01).into(),
        };
    }
    let chain = element.unwrap_chain();
    assert_eq!(chain.len(), 21);
    assert_eq!(chain.last().unwrap().kind(), Kind::Quadrupole);
    assert_eq!(element.element().kind(), Kind::Quadrupole);
    assert_eq!(element.label(), Some("q"));
    assert_eq!(element.l(), 1.0);
}

#[test]
fn test_four_point_rotation() {
    let roll = Alignment::longitudinal_roll(Element::drift(1.0, proton_beam()), FRAC_PI_2);
    let points = array![
        [1.0, 0.0, -1.0, 0.0],
        [0.0, 0.0, 0.0, 0.0],
        [0.0, -1.0, 0.0, 1.0],
        [0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0]
    ];
    let rotated = roll.enter(&points);
    let expected = [(0.0, -1.0), (-1.0, 0.0), (0.0, 1.0), (1.0, 0.0)];
    for (i, (x, y)) in expected.into_iter().enumerate() {
        assert_abs_diff_eq!(rotated[[0, i]], x, epsilon = 1e-15);
        assert_abs_diff_eq!(rotated[[2, i]], y, epsilon = 1e-15);
    }
}

#[test]
fn test_tilted_offset_round_trip() {
    let x = ensemble(20, 1e-2, 31);
    for (psi, dx, dy) in [(0.1, 1e-3, 0.0), (-2.0, 0.0, -5e-3), (3.0, 2e-2, 1e-2)] {
        let offset = Alignment::offset(Element::sextupole(1.0, 0.5, proton_beam()), dx, dy);
        let tilt = Alignment::tilt(offset.clone(), psi);
        let restored = offset.exit(&tilt.exit(&tilt.enter(&offset.enter(&x))));
        assert!(matrix_approx_eq(&restored, &x, 1e-12));
    }
}

#[test]
fn test_tilted_quadrupole_tracking() {
    let beam = proton_beam();
    let x = ensemble(10, 1e-3, 32);
    let quad = Element::quadrupole(0.6, 0.5, beam);
    let tilt = Alignment::tilt(quad.clone(), 0.3);

    let manual = tilt.exit(&quad.linear(&tilt.enter(&x)).unwrap());
    let tracked = LatticeElement::from(tilt.clone()).linear(&x).unwrap();
    assert!(matrix_approx_eq(&manual, &tracked, 1e-15));

    let map = LatticeElement::from(tilt).transfer_map().unwrap();
    assert!(matrix_approx_eq(&map.apply_linear(&x), &tracked, 1e-14));
}

#[test]
fn test_default_bpm_noise_is_negligible() {
    let beam = proton_beam();
    let mut rng = ChaCha8Rng::seed_from_u64(33);
    let bpm = Alignment::bpm_error(Element::monitor(0.0, beam), 1e-3, -1e-3, 0.0, 0.0);
    let x: Array2<f64> = ensemble(5, 1e-3, 34);
    let first = bpm.readout(&x, &mut rng).unwrap();
    let second = bpm.readout(&x, &mut rng).unwrap();
    assert_eq!(first.shape(), &[2, 5]);
    assert!(matrix_approx_eq(&first, &second, 1e-90));
    assert!(DEFAULT_NOISE_SCALE.iter().all(|&s| s > 0.0 && s < 1e-50));

    // Readout errors leave the trajectory alone
    assert_eq!(bpm.enter(&x), x);
    assert_eq!(bpm.exit(&x), x);
}
