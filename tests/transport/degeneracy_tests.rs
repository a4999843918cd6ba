//! Zero-strength elements and the maps of simple elements

use crate::test_helpers::{ensemble, matrix_approx_eq, proton_beam};
use approx::assert_relative_eq;
use beamline_rs::elements::{BendConfig, Element, SBend};
use beamline_rs::error::LatticeError;
use beamline_rs::parameters::Parameter;
use beamline_rs::transfer::is_symplectic;

#[test]
fn test_zero_strength_elements_are_drifts() {
    let beam = proton_beam();
    let x = ensemble(32, 1e-3, 11);
    for l in [1e-3, 0.4, 1.0, 7.5] {
        let drift = Element::drift(l, beam.clone()).linear(&x).unwrap();

        let quad = Element::quadrupole(0.0, l, beam.clone());
        assert_eq!(quad.linear(&x).unwrap(), drift);

        let sbend = SBend::new(0.0, l, BendConfig::default(), beam.clone()).unwrap();
        assert_eq!(sbend.linear(&x).unwrap(), drift);

        let sextupole = Element::sextupole(0.0, l, beam.clone());
        assert_eq!(sextupole.linear(&x).unwrap(), drift);
    }
}

#[test]
fn test_tracked_zero_gradient_is_rejected() {
    let beam = proton_beam();
    let x = ensemble(4, 1e-3, 12);
    let quad = Element::quadrupole(Parameter::new("k1", 0.0), 5.0, beam.clone());
    assert!(matches!(quad.linear(&x), Err(LatticeError::InvalidValue(_))));

    // A tracked non-zero gradient and a constant zero are both fine
    let quad = Element::quadrupole(Parameter::new("k1", 0.2), 5.0, beam.clone());
    assert!(quad.linear(&x).is_ok());
    let quad = Element::quadrupole(0.0, 5.0, beam);
    assert!(quad.linear(&x).is_ok());
}

#[test]
fn test_tracked_and_constant_values_agree() {
    let beam = proton_beam();
    let x = ensemble(16, 1e-3, 13);
    let constant = Element::quadrupole(0.35, 0.8, beam.clone());
    let tracked = Element::quadrupole(Parameter::new("k1", 0.35), 0.8, beam.clone());
    assert_eq!(constant.linear(&x).unwrap(), tracked.linear(&x).unwrap());
    assert_eq!(constant.second_order(&x).unwrap(), tracked.second_order(&x).unwrap());
}

#[test]
fn test_thin_kickers_change_momenta_only() {
    let beam = proton_beam();
    let x = ensemble(8, 1e-3, 14);
    let kicker = Element::kicker(1e-3, -2e-3, 0.0, beam);
    let y = kicker.linear(&x).unwrap();
    for i in 0..x.ncols() {
        assert_eq!(y[[0, i]], x[[0, i]]);
        assert_eq!(y[[2, i]], x[[2, i]]);
        assert_relative_eq!(y[[1, i]], x[[1, i]] + 1e-3, epsilon = 1e-15);
        assert_relative_eq!(y[[3, i]], x[[3, i]] - 2e-3, epsilon = 1e-15);
    }
}

#[test]
fn test_marker_is_identity() {
    let x = ensemble(8, 1e-2, 15);
    let marker = Element::marker(proton_beam());
    assert_eq!(marker.linear(&x).unwrap(), x);
    assert_eq!(marker.exact(&x).unwrap(), x);
}

#[test]
fn test_maps_are_symplectic() {
    let beam = proton_beam();
    let elements = [
        Element::drift(2.0, beam.clone()),
        Element::quadrupole(0.7, 0.5, beam.clone()),
        Element::quadrupole(-0.7, 0.5, beam.clone()),
        Element::sbend_body(0.2, 1.5, beam.clone()),
    ];
    for element in &elements {
        let map = element.transfer_map().unwrap();
        assert!(is_symplectic(&map.r, 1e-10), "{}", element);
    }
    let bend = SBend::new(0.1, 2.0, BendConfig::default(), beam).unwrap();
    assert!(is_symplectic(&bend.transfer_map().unwrap().r, 1e-10));
}

#[test]
fn test_second_order_close_to_linear_for_small_amplitudes() {
    let beam = proton_beam();
    let x = ensemble(16, 1e-6, 16);
    let quad = Element::quadrupole(0.5, 1.0, beam);
    let linear = quad.linear(&x).unwrap();
    let second = quad.second_order(&x).unwrap();
    assert!(matrix_approx_eq(&linear, &second, 1e-10));
}
