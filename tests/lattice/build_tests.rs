//! Lattices built from command sequences

use crate::test_helpers::{ensemble, proton_spec};
use approx::assert_abs_diff_eq;
use beamline_rs::build::{
    collect_device_data, from_device_data, from_sequence, AttributeValue, BuildOptions, Command, Definitions,
    DeviceTable, ErrorSource, ErrorTable, Refer,
};
use beamline_rs::parameters::{Parameter, ParameterValue};
use beamline_rs::elements::Kind;
use beamline_rs::error::LatticeError;
use beamline_rs::segment::{Criteria, MapOptions, Segment, SegmentKey};

/// Nine labelled elements at fixed positions, with drifts in between.
fn positioned_lattice() -> Segment {
    let commands = vec![
        Command::new("quadrupole").with_label("q1").with("l", 1.0).with("k1", 0.3).with("at", 1.0),
        Command::new("monitor").with_label("m1").with("at", 2.5),
        Command::new("quadrupole").with_label("q2").with("l", 1.0).with("k1", -0.3).with("at", 4.0),
        Command::new("monitor").with_label("m2").with("at", 5.5),
        Command::new("quadrupole").with_label("q3").with("l", 1.0).with("k1", 0.3).with("at", 7.0),
        Command::new("sextupole").with_label("s1").with("l", 0.5).with("k2", 1.0).with("at", 8.5),
        Command::new("hkicker").with_label("h1").with("kick", 1e-4).with("at", 9.5),
        Command::new("vkicker").with_label("v1").with("kick", -1e-4).with("at", 10.0),
        Command::new("quadrupole").with_label("q4").with("l", 1.0).with("k1", -0.3).with("at", 11.0),
    ];
    let options = BuildOptions::new().with_layout(13.0, Refer::Entry);
    from_sequence(&proton_spec(), &commands, &options).unwrap()
}

#[test]
fn test_positioned_lattice_layout() {
    let lattice = positioned_lattice();
    assert_abs_diff_eq!(lattice.l(), 13.0, epsilon = 1e-12);

    let labelled = ["q1", "m1", "q2", "m2", "q3", "s1", "h1", "v1", "q4"];
    let found: Vec<&str> = lattice
        .iter()
        .filter_map(|e| e.label())
        .filter(|label| !label.starts_with("pad_drift"))
        .collect();
    assert_eq!(found, labelled);

    // Every labelled element is preceded by a drift
    for label in labelled {
        let i = lattice.get_element_index(label).unwrap();
        assert_eq!(lattice[i - 1].kind(), Kind::Drift, "{}", label);
    }
}

#[test]
fn test_label_and_position_agree() {
    let lattice = positioned_lattice();
    let q1 = lattice.get("q1").unwrap();
    assert!(std::ptr::eq(q1.single().unwrap(), &lattice[1]));

    let by_label = lattice.get(SegmentKey::range(Some("q2"), Some(-1))).unwrap().to_vec();
    let start = lattice.get_element_index("q2").unwrap();
    let by_position = lattice
        .get(SegmentKey::range(Some(start as isize), Some(-1)))
        .unwrap()
        .to_vec();
    assert_eq!(by_label, by_position);
    assert_eq!(by_label.len(), lattice.len() - 1 - start);

    let quads = lattice.get(Kind::Quadrupole).unwrap();
    assert_eq!(quads.len(), 4);
    let kickers = lattice.get(Kind::Kicker).unwrap();
    assert_eq!(kickers.len(), 2);
    let hkickers = lattice.get(Kind::HKicker).unwrap();
    assert_eq!(hkickers.single().unwrap().label(), Some("h1"));
}

#[test]
fn test_inherited_classes_and_variables() {
    let mut definitions = Definitions::new();
    definitions
        .define(Command::new("quadrupole").with_label("qf").with("l", 0.5).with("k1", AttributeValue::Variable(0.4)))
        .unwrap();
    definitions
        .define(Command::new("quadrupole").with_label("qd").with("l", 0.5).with("k1", -0.4))
        .unwrap();
    let commands = vec![
        Command::new("qf").with_label("qf1"),
        Command::new("drift").with("l", 2.0),
        Command::new("qd").with_label("qd1").with("k1", AttributeValue::Variable(-0.45)),
        Command::new("drift").with("l", 2.0),
        Command::new("qf").with_label("qf2").with("l", 0.25),
    ];
    let options = BuildOptions::new().with_definitions(definitions);
    let mut lattice = from_sequence(&proton_spec(), &commands, &options).unwrap();

    let parameters = lattice.parameters().unwrap();
    assert_eq!(parameters.len(), 3);
    for name in ["qf1.k1", "qd1.k1", "qf2.k1"] {
        assert!(parameters.contains(name), "{}", name);
    }
    assert_eq!(lattice[4].l(), 0.25);
    assert_eq!(lattice[4].attribute("k1").unwrap().value(), 0.4);

    // Writing the parameters back changes the tracking result
    let x = ensemble(4, 1e-3, 41);
    let before = lattice.linear(&x).unwrap();
    let mut parameters = parameters;
    parameters.set_value("qd1.k1", -0.5).unwrap();
    assert_eq!(lattice.update_parameters(&parameters).unwrap(), 3);
    assert_eq!(lattice[2].attribute("k1").unwrap().value(), -0.5);
    assert_ne!(lattice.linear(&x).unwrap(), before);
}

#[test]
fn test_unlabelled_variables_stay_distinct() {
    let commands = vec![
        Command::new("quadrupole").with("l", 0.5).with("k1", AttributeValue::Variable(0.3)),
        Command::new("drift").with("l", 2.0),
        Command::new("quadrupole").with("l", 0.5).with("k1", AttributeValue::Variable(-0.3)),
    ];
    let mut lattice = from_sequence(&proton_spec(), &commands, &BuildOptions::default()).unwrap();
    let mut parameters = lattice.parameters().unwrap();
    assert_eq!(parameters.names(), vec!["quadrupole[0].k1", "quadrupole[2].k1"]);

    parameters.set_value("quadrupole[2].k1", -0.4).unwrap();
    assert_eq!(lattice.update_parameters(&parameters).unwrap(), 2);
    assert_eq!(lattice[0].attribute("k1").unwrap().value(), 0.3);
    assert_eq!(lattice[2].attribute("k1").unwrap().value(), -0.4);
}

#[test]
fn test_device_data_rebuilds_the_lattice() {
    let commands = vec![
        Command::new("quadrupole")
            .with_label("qf")
            .with("l", 0.5)
            .with("k1", AttributeValue::Variable(0.8))
            .with("tilt", 0.02)
            .with("aperture", 0.03),
        Command::new("drift").with("l", 1.5),
        Command::new("sbend").with_label("b1").with("l", 2.0).with("angle", 0.1).with("e1", 0.05).with("fint", true),
        Command::new("drift").with("l", 1.5),
        Command::new("quadrupole").with_label("qd").with("l", 0.5).with("k1", AttributeValue::Variable(-0.8)),
        Command::new("hkicker").with_label("h1").with("l", 0.2).with("kick", AttributeValue::Variable(1e-4)),
        Command::new("monitor").with_label("bpm"),
    ];
    let errors = ErrorTable::new()
        .with_row("qd", [("dx", ParameterValue::from(Parameter::new("qd.dx", 1e-4))), ("dk1", ParameterValue::from(0.01))])
        .with_row("bpm", [("mrex", ParameterValue::from(2e-4)), ("dpsi", ParameterValue::from(1e-3))]);
    let options = BuildOptions::new().with_errors(ErrorSource::Table(errors));
    let lattice = from_sequence(&proton_spec(), &commands, &options).unwrap();

    let table = collect_device_data(&lattice).unwrap();
    let table = DeviceTable::from_json(&table.to_json().unwrap()).unwrap();
    let mut rebuilt = from_device_data(&proton_spec(), &table).unwrap();
    assert_eq!(rebuilt, lattice);

    let mut parameters = lattice.parameters().unwrap();
    assert_eq!(rebuilt.parameters().unwrap(), parameters);
    assert_eq!(parameters.names(), vec!["h1.kick", "qd.dx", "qd.k1", "qf.k1"]);

    parameters.set_value("qd.k1", -0.6).unwrap();
    assert_eq!(rebuilt.update_parameters(&parameters).unwrap(), 4);
    assert_abs_diff_eq!(rebuilt.get("qd").unwrap().single().unwrap().attribute("k1").unwrap().value(), -0.6);

    let x = ensemble(16, 1e-4, 17);
    let mut original = lattice.clone();
    original.update_parameters(&parameters).unwrap();
    assert_eq!(rebuilt.linear(&x).unwrap(), original.linear(&x).unwrap());
}

#[test]
fn test_apertures_and_padding() {
    let commands = vec![
        Command::new("drift").with_label("d1").with("l", 1.0).with("apertype", "rectangle").with("aperture", vec![0.02, 0.01]),
        Command::new("quadrupole").with_label("q1").with("l", 1.0).with("k1", 0.1).with("aperture", 0.03),
        Command::new("quadrupole")
            .with_label("q2")
            .with("l", 1.0)
            .with("apertype", "ellipse")
            .with("aperture", vec![0.03, 0.02])
            .with("aper_offset", vec![1e-3, 0.0]),
    ];
    let padding = Criteria::new().with("q2", [0.0, 0.005]).with(Kind::Quadrupole, [0.01, 0.01]);
    let lattice = from_sequence(&proton_spec(), &commands, &BuildOptions::new().with_padding(padding)).unwrap();

    let d1 = lattice[0].aperture().unwrap();
    assert_eq!(d1.padding(), &[0.0, 0.0]);
    assert_eq!(lattice[1].aperture().unwrap().padding(), &[0.01]);
    let q2 = lattice[2].aperture().unwrap();
    assert_eq!(q2.padding(), &[0.0, 0.005]);
    assert_eq!(q2.offset(), [1e-3, 0.0]);
}

#[test]
fn test_build_errors() {
    let derived = [Command::new("quadrupole").with_label("q").with("l", 1.0), Command::new("q").with_label("q2")];
    assert!(from_sequence(&proton_spec(), &derived, &BuildOptions::default()).is_ok());

    let bend_without_length = [Command::new("rbend").with_label("b").with("angle", 0.1).with_line_number(12)];
    match from_sequence(&proton_spec(), &bend_without_length, &BuildOptions::default()) {
        Err(LatticeError::Build(message)) => assert!(message.contains("Line 12")),
        other => panic!("expected a build error, got {:?}", other),
    }

    let overlapping = [
        Command::new("quadrupole").with_label("q1").with("l", 2.0).with("at", 1.0),
        Command::new("quadrupole").with_label("q2").with("l", 2.0).with("at", 2.0),
    ];
    let options = BuildOptions::new().with_layout(10.0, Refer::Center);
    assert!(matches!(
        from_sequence(&proton_spec(), &overlapping, &options),
        Err(LatticeError::Build(_))
    ));
}

#[test]
fn test_built_lattice_transfer_map_matches_tracking() {
    let lattice = positioned_lattice();
    let x = ensemble(8, 1e-4, 42);
    let map = lattice.transfer_map(&MapOptions::default()).unwrap();
    let tracked = lattice.second_order(&x).unwrap();
    let mapped = map.apply_second_order(&x);
    for (a, b) in tracked.iter().zip(mapped.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
    }
}
