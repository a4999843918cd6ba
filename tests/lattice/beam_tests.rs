//! Beam augmentation and its use by built lattices

use approx::assert_relative_eq;
use beamline_rs::beam::{augment_beam, BeamSpec, ELECTRON_MASS};
use beamline_rs::build::{from_sequence, BuildOptions, Command};

#[test]
fn test_any_kinematic_quantity_gives_the_same_beam() {
    let base = || BeamSpec::new().mass(1.0).charge(1.0);
    let specs = [
        base().energy(2.0),
        base().gamma(2.0),
        base().beta(0.75f64.sqrt()),
        base().pc(3f64.sqrt()),
        base().brho(3f64.sqrt() / 0.299792458),
    ];
    for spec in &specs {
        let beam = augment_beam(spec).unwrap();
        assert_relative_eq!(beam.beta, 0.75f64.sqrt(), max_relative = 1e-9);
        assert_relative_eq!(beam.gamma, 2.0, max_relative = 1e-9);
        assert_relative_eq!(beam.energy.unwrap(), 2.0, max_relative = 1e-9);
        assert_relative_eq!(beam.pc.unwrap(), 3f64.sqrt(), max_relative = 1e-9);
        assert_relative_eq!(beam.brho.unwrap(), 3f64.sqrt() / 0.299792458, max_relative = 1e-9);
    }
}

#[test]
fn test_negative_charge_rigidity() {
    let beam = augment_beam(&BeamSpec::new().particle("electron").energy(1.0)).unwrap();
    assert_eq!(beam.charge, Some(-1.0));
    assert_eq!(beam.mass, Some(ELECTRON_MASS));
    assert!(beam.brho.unwrap() > 0.0);
}

#[test]
fn test_lattice_elements_share_the_beam() {
    let spec = BeamSpec::new().particle("proton").pc(2.0);
    let commands = [
        Command::new("drift").with("l", 1.0),
        Command::new("quadrupole").with("l", 1.0).with("k1", 0.1),
        Command::new("sbend").with("l", 1.0).with("angle", 0.05),
    ];
    let lattice = from_sequence(&spec, &commands, &BuildOptions::default()).unwrap();
    let beam = augment_beam(&spec).unwrap();
    for element in &lattice {
        assert_eq!(element.beam(), Some(&beam));
    }
}
