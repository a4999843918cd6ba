//! Alignment and field errors applied while building

use crate::test_helpers::proton_spec;
use approx::assert_relative_eq;
use beamline_rs::build::{
    from_sequence, AttributeValue, BuildOptions, Command, ErrorSource, ErrorTable,
};
use beamline_rs::elements::Kind;
use beamline_rs::parameters::{Parameter, ParameterValue};
use beamline_rs::segment::{LatticeElement, Segment};
use ndarray::Array2;

fn fodo_commands() -> Vec<Command> {
    let mut commands = Vec::new();
    for (i, k1) in [0.3, -0.3, 0.3, -0.3].into_iter().enumerate() {
        commands.push(Command::new("quadrupole").with_label(format!("q{}", i + 1)).with("l", 0.5).with("k1", k1));
        commands.push(Command::new("drift").with_label(format!("d{}", i + 1)).with("l", 2.0));
    }
    commands.push(Command::new("monitor").with_label("bpm"));
    commands
}

fn build(errors: ErrorSource, seed: u64) -> Segment {
    let options = BuildOptions::new().with_errors(errors).with_seed(seed);
    from_sequence(&proton_spec(), &fodo_commands(), &options).unwrap()
}

#[test]
fn test_only_misaligned_elements_are_wrapped() {
    let dy = ParameterValue::from(Parameter::new("q3.dy", 2e-4));
    let table = ErrorTable::new()
        .with_row("q1", [("dx", ParameterValue::from(0.0)), ("dy", ParameterValue::from(0.0))])
        .with_row("q2", [("tilt", ParameterValue::from(0.0))])
        .with_row("q3", [("dx", ParameterValue::from(0.0)), ("dy", dy)]);
    let lattice = build(ErrorSource::Table(table), 1);

    for label in ["q1", "q2", "q4", "bpm"] {
        let entry = lattice.get(label).unwrap();
        assert!(matches!(entry.single().unwrap(), LatticeElement::Element(_)), "{}", label);
    }
    let q3 = lattice.get("q3").unwrap();
    let q3 = q3.single().unwrap();
    let chain: Vec<Kind> = q3.unwrap_chain().iter().map(|e| e.kind()).collect();
    assert_eq!(chain, vec![Kind::Offset, Kind::Quadrupole]);
    assert_eq!(q3.attribute("dx"), Some(ParameterValue::Constant(0.0)));
    let dy = q3.attribute("dy").unwrap();
    assert_eq!(dy.parameter().unwrap().name(), "q3.dy");
    assert_eq!(dy.value(), 2e-4);

    assert_eq!(lattice.parameters().unwrap().names(), vec!["q3.dy"]);
}

#[test]
fn test_misalignment_changes_the_orbit() {
    let ideal = build(ErrorSource::None, 1);
    let table = ErrorTable::new().with_row("q2", [("dx", 1e-3)]);
    let misaligned = build(ErrorSource::Table(table), 1);

    let x = Array2::zeros((6, 1));
    let a = ideal.linear(&x).unwrap();
    let b = misaligned.linear(&x).unwrap();
    assert_eq!(a[[0, 0]], 0.0);
    assert!(b[[0, 0]].abs() > 1e-5);
    assert_eq!(b[[2, 0]], 0.0);
}

#[test]
fn test_field_errors_from_table_json() {
    let json = r#"{"rows": [
        {"name": "Q4", "errors": [["k1l", {"Constant": 0.05}]]},
        {"name": "bpm", "errors": [["mscalx", {"Constant": 0.1}]]}
    ]}"#;
    let table = ErrorTable::from_json(json).unwrap();
    let lattice = build(ErrorSource::Table(table), 1);
    assert_relative_eq!(lattice[6].attribute("dk1").unwrap().value(), 0.1);
    assert_eq!(lattice[8].kind(), Kind::BpmError);
    assert_eq!(lattice[8].attribute("rx"), Some(ParameterValue::Constant(0.1)));
}

fn with_random_errors(mut commands: Vec<Command>) -> Vec<Command> {
    commands.extend([
        Command::new("select").with("flag", "error").with("pattern", "q"),
        Command::new("ealign")
            .with("dx", AttributeValue::Gauss { mean: 0.0, sigma: 1e-4 })
            .with("dy", AttributeValue::Uniform { low: -1e-4, high: 1e-4 }),
        Command::new("efcomp").with("dkn", vec![0.0, 1e-3]),
    ]);
    commands
}

#[test]
fn test_random_errors_are_reproducible() {
    let commands = with_random_errors(fodo_commands());
    let build = |seed| {
        let options = BuildOptions::new().with_errors(ErrorSource::FromSequence).with_seed(seed);
        from_sequence(&proton_spec(), &commands, &options).unwrap()
    };
    let a = build(7);
    let b = build(7);
    let c = build(8);
    assert_eq!(a, b);
    assert_ne!(a, c);

    for i in [0, 2, 4, 6] {
        assert_eq!(a[i].kind(), Kind::Offset);
        let dy = a[i].attribute("dy").unwrap().value();
        assert!(dy.abs() <= 1e-4);
        assert_relative_eq!(a[i].attribute("dk1").unwrap().value(), 2e-3);
    }
    assert_ne!(a[0].attribute("dx"), a[2].attribute("dx"));
    for i in [1, 3, 5, 7, 8] {
        assert!(matches!(a[i], LatticeElement::Element(_)));
    }
}

#[test]
fn test_error_statements_are_ignored_without_request() {
    let commands = with_random_errors(fodo_commands());
    let lattice = from_sequence(&proton_spec(), &commands, &BuildOptions::default()).unwrap();
    assert_eq!(lattice.len(), 9);
    assert!(lattice.iter().all(|e| matches!(e, LatticeElement::Element(_))));
}
