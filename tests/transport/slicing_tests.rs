//! Thin slicing of thick elements and whole lattices

use crate::test_helpers::{ensemble, proton_beam};
use approx::assert_abs_diff_eq;
use beamline_rs::elements::{Element, Kind, SliceStyle};
use beamline_rs::parameters::{Parameter, ParameterValue};
use beamline_rs::segment::{Criteria, LatticeElement, Segment};
use ndarray::Array2;

fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
}

#[test]
fn test_thin_quadrupole_converges_to_thick() {
    let beam = proton_beam();
    let x = ensemble(16, 1e-3, 21);
    let quad = Element::quadrupole(0.8, 1.2, beam);
    let thick = quad.linear(&x).unwrap();

    let mut previous = f64::INFINITY;
    for n in [1, 4, 16, 64] {
        let thin = quad.makethin(n, Some(SliceStyle::Teapot)).unwrap();
        let error = max_abs_diff(&thin.linear(&x).unwrap(), &thick);
        assert!(error < previous, "n = {}: {} >= {}", n, error, previous);
        previous = error;
    }
    assert!(previous < 1e-6);
}

#[test]
fn test_every_style_conserves_length() {
    let beam = proton_beam();
    let elements = [
        Element::quadrupole(0.3, 0.9, beam.clone()).with_label("q"),
        Element::sextupole(2.0, 0.3, beam.clone()).with_label("s"),
        Element::hkicker(1e-3, 0.2, beam).with_label("h"),
    ];
    for element in &elements {
        for style in [SliceStyle::Edge, SliceStyle::Simple, SliceStyle::Teapot] {
            for n in [1, 2, 3, 10] {
                let LatticeElement::Thin(thin) = element.makethin(n, Some(style)).unwrap() else {
                    panic!("{} was not sliced", element);
                };
                let segment = thin.segment();
                assert_eq!(segment.len(), 2 * n + 1);
                let drifts: f64 = segment.iter().filter(|e| e.is_drift()).map(|e| e.l()).sum();
                assert_abs_diff_eq!(drifts, element.l(), epsilon = 1e-12);
                assert!(segment.iter().skip(1).step_by(2).all(|e| e.l() == 0.0));
            }
        }
    }
}

#[test]
fn test_sliced_lattice_keeps_parameters() {
    let beam = proton_beam();
    let segment = Segment::new(vec![
        Element::drift(1.0, beam.clone()).with_label("d1").into(),
        Element::quadrupole(Parameter::new("qf.k1", 0.4), 1.0, beam.clone())
            .with_label("qf")
            .into(),
        Element::drift(1.0, beam.clone()).with_label("d2").into(),
        Element::quadrupole(-0.4, 1.0, beam).with_label("qd").into(),
    ]);
    let thin = segment
        .makethin(&Criteria::new().with(Kind::Quadrupole, 5), &Criteria::all(SliceStyle::Simple))
        .unwrap();
    assert_eq!(thin.len(), 4);
    assert_abs_diff_eq!(thin.l(), segment.l(), epsilon = 1e-12);
    assert_eq!(thin.parameters().unwrap().names(), vec!["qf.k1"]);

    let flat = thin.flat();
    assert_eq!(flat.len(), 2 + 2 * 11);
    let kicks = flat.iter().filter(|e| e.kind() == Kind::ThinQuadrupole).count();
    assert_eq!(kicks, 10);

    let k1l = flat[2].attribute("k1l").unwrap();
    assert!(matches!(k1l, ParameterValue::Tracked(_)));
    assert_abs_diff_eq!(k1l.value(), 0.08, epsilon = 1e-15);
}
