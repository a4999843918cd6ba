//! Editing built lattices

use crate::test_helpers::{ensemble, proton_spec};
use approx::assert_abs_diff_eq;
use beamline_rs::build::{from_sequence, BuildOptions, Command, Lattice, Position};
use beamline_rs::elements::{Element, Kind};
use beamline_rs::error::LatticeError;
use beamline_rs::segment::{LatticeElement, Segment, SegmentKey, Selector};

fn built() -> Segment {
    let commands = vec![
        Command::new("drift").with_label("d1").with("l", 1.0),
        Command::new("drift").with_label("d2").with("l", 0.5),
        Command::new("quadrupole").with_label("q1").with("l", 1.0).with("k1", 0.2),
        Command::new("drift").with_label("d3").with("l", 1.0),
        Command::new("monitor").with_label("m1"),
        Command::new("drift").with_label("d4").with("l", 1.0),
        Command::new("drift").with_label("d5").with("l", 2.0),
        Command::new("quadrupole").with_label("q2").with("l", 1.0).with("k1", -0.2),
        Command::new("drift").with_label("d6").with("l", 1.0).with("aperture", 0.05),
        Command::new("drift").with_label("d7").with("l", 1.0),
    ];
    from_sequence(&proton_spec(), &commands, &BuildOptions::default()).unwrap()
}

#[test]
fn test_squeeze_built_lattice() {
    let lattice = built();
    let squeezed = lattice.squeeze();
    let labels: Vec<Option<&str>> = squeezed.iter().map(LatticeElement::label).collect();
    assert_eq!(
        labels,
        vec![Some("d1_d2"), Some("q1"), Some("d3"), Some("m1"), Some("d4_d5"), Some("q2"), Some("d6"), Some("d7")]
    );
    assert_abs_diff_eq!(squeezed.l(), lattice.l(), epsilon = 1e-12);

    let x = ensemble(8, 1e-3, 61);
    let a = lattice.linear(&x).unwrap();
    let b = squeezed.linear(&x).unwrap();
    for (u, v) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(*u, *v, epsilon = 1e-15);
    }
}

#[test]
fn test_delete_by_pattern_and_kind() {
    let mut lattice = built();
    let (len, l) = (lattice.len(), lattice.l());
    lattice.delete("q*").unwrap();
    lattice.delete(Kind::Monitor).unwrap();
    assert_eq!(lattice.len(), len);
    assert_abs_diff_eq!(lattice.l(), l, epsilon = 1e-12);
    assert!(lattice.iter().all(|e| e.kind() == Kind::Drift));
    assert_eq!(lattice[2].label(), Some("q1"));
    assert_eq!(lattice[4].label(), Some("m1"));

    // Only drifts are left, so everything merges except the apertured one
    assert_eq!(lattice.squeeze().len(), 3);
}

#[test]
fn test_set_and_lookup_errors() {
    let mut lattice = built();
    let beam = lattice[0].beam().unwrap().clone();
    lattice
        .set("q2", Element::sextupole(1.0, 1.0, beam).with_label("s1"))
        .unwrap();
    assert_eq!(lattice[7].kind(), Kind::Sextupole);
    assert_eq!(lattice.get_element_index("s1").unwrap(), 7);
    assert_eq!(lattice.get_element_index((Selector::label("d*"), 3)).unwrap(), 5);
    assert_eq!(lattice.get(-1).unwrap().single().unwrap().label(), Some("d7"));

    assert!(lattice.get("q2").unwrap().is_empty());
    assert!(matches!(lattice.get_element_index("q2"), Err(LatticeError::Index(_))));
    assert!(matches!(lattice.get(42), Err(LatticeError::Index(_))));
    assert!(matches!(
        lattice.get_element_index(SegmentKey::range(Some(0), Some(2))),
        Err(LatticeError::Type(_))
    ));
    assert!(lattice.get("x*").unwrap().is_empty());
}

#[test]
fn test_unique_labels_on_lattice_helper() {
    let mut lattice = Lattice::new(&proton_spec()).unwrap().without_autolabel();
    for s in [1.0, 3.0, 5.0] {
        let quad = lattice.quadrupole(0.1, 1.0).unwrap();
        lattice.insert(Position::At(s), quad).unwrap();
    }
    let mut segment = lattice.into_segment();
    assert_eq!(segment.len(), 6);
    segment.apply_unique_labels().unwrap();
    let labels: Vec<&str> = segment.iter().filter_map(|e| e.label()).collect();
    assert_eq!(labels, vec!["e1", "e2", "e3", "e4", "e5", "e6"]);
}
