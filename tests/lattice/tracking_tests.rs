//! Tracking particle ensembles through built lattices

use crate::test_helpers::{ensemble, matrix_approx_eq, proton_spec};
use beamline_rs::build::{from_sequence, BuildOptions, Command, Definitions};
use beamline_rs::elements::{Kind, SliceStyle};
use beamline_rs::segment::{
    Criteria, LossRecord, LossRecording, MapMethod, MapOptions, Method, Observe, Segment, Selector,
    TrackOptions,
};
use beamline_rs::transfer::is_symplectic;
use ndarray::{array, Array2};

/// FODO cells with a monitor after every quadrupole.
fn fodo(cells: usize) -> Segment {
    let mut definitions = Definitions::new();
    for (label, k1) in [("qf", 1.2), ("qd", -1.2)] {
        definitions
            .define(Command::new("quadrupole").with_label(label).with("l", 0.4).with("k1", k1).with("aperture", 0.02))
            .unwrap();
    }
    let mut commands = Vec::new();
    for cell in 0..cells {
        commands.push(Command::new("qf").with_label(format!("qf{}", cell)));
        commands.push(Command::new("monitor").with_label(format!("bpm_f{}", cell)));
        commands.push(Command::new("drift").with("l", 2.0));
        commands.push(Command::new("qd").with_label(format!("qd{}", cell)));
        commands.push(Command::new("monitor").with_label(format!("bpm_d{}", cell)));
        commands.push(Command::new("drift").with("l", 2.0));
    }
    let options = BuildOptions::new().with_definitions(definitions);
    from_sequence(&proton_spec(), &commands, &options).unwrap()
}

#[test]
fn test_fodo_cell_is_stable() {
    let cell = fodo(1);
    let map = cell.transfer_map(&MapOptions::default()).unwrap();
    assert!(is_symplectic(&map.r, 1e-10));
    let trace_x = map.r[[0, 0]] + map.r[[1, 1]];
    let trace_y = map.r[[2, 2]] + map.r[[3, 3]];
    assert!(trace_x.abs() < 2.0, "{}", trace_x);
    assert!(trace_y.abs() < 2.0, "{}", trace_y);
}

#[test]
fn test_accumulated_maps_end_with_the_total_map() {
    let lattice = fodo(2);
    let options = MapOptions::default();
    let accumulated = lattice.transfer_maps(MapMethod::Accumulate, &options).unwrap();
    assert_eq!(accumulated.len(), lattice.len());
    let total = lattice.transfer_map(&options).unwrap();
    assert!(matrix_approx_eq(&accumulated.last().unwrap().r, &total.r, 1e-12));
}

#[test]
fn test_monitor_history() {
    let lattice = fodo(4);
    let x = ensemble(50, 1e-3, 71);
    let options = TrackOptions::new(Method::Linear).with_observe(Observe::At(vec![Kind::Monitor.into()]));
    let result = lattice.forward(&x, &options).unwrap();
    let history = result.history.unwrap();
    assert_eq!(history.len(), 8);
    assert_eq!(history.labels()[0], Some("bpm_f0"));

    let head = Segment::new(lattice.elements()[..2].to_vec());
    assert_eq!(history.get("bpm_f0").unwrap(), &head.linear(&x).unwrap());
    assert_eq!(history.get("bpm_d3").unwrap().dim(), (6, 50));
    assert_eq!(lattice.linear(&x).unwrap(), result.x);
}

#[test]
fn test_particles_outside_the_aperture_are_lost() {
    let lattice = fodo(2);
    let x = array![
        [0.0, 0.05, 1e-3, 0.0],
        [0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.03],
        [0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0]
    ];
    let options = TrackOptions::new(Method::Linear)
        .with_recloss(LossRecording::At(vec![Selector::label("q*")]))
        .with_observe(Observe::At(vec![Selector::label("bpm_f0")]));
    let result = lattice.forward(&x, &options).unwrap();
    assert_eq!(result.x.ncols(), 2);

    // The first particle is lost at the first quadrupole
    assert_eq!(result.history.unwrap().get("bpm_f0").unwrap().ncols(), 3);
    let Some(LossRecord::History(losses)) = result.loss else {
        panic!("expected a loss history");
    };
    assert_eq!(losses.len(), 4);
    let at_qf0 = losses.get("qf0").unwrap();
    assert!(at_qf0[1] > 0.0);
    assert_eq!(at_qf0[0], 0.0);
    assert_eq!(losses.get("qd0").unwrap().len(), 3);
}

#[test]
fn test_everything_lost() {
    let lattice = fodo(1);
    let x = Array2::from_elem((6, 3), 0.5);
    let options = TrackOptions::new(Method::SecondOrder)
        .with_aperture(true)
        .with_observe(Observe::All);
    let result = lattice.forward(&x, &options).unwrap();
    assert_eq!(result.x.dim(), (6, 0));
    let history = result.history.unwrap();
    assert_eq!(history.get("bpm_d0").unwrap().dim(), (6, 0));
}

#[test]
fn test_thin_lattice_tracks_like_thick() {
    let lattice = fodo(2);
    let thin = lattice
        .makethin(&Criteria::new().with(Kind::Quadrupole, 32), &Criteria::all(SliceStyle::Teapot))
        .unwrap();
    let x = ensemble(10, 1e-4, 72);
    let thick = lattice.linear(&x).unwrap();
    let sliced = thin.linear(&x).unwrap();
    assert!(matrix_approx_eq(&thick, &sliced, 1e-6));
    assert_eq!(thin.len(), lattice.len());
    assert_eq!(thin.parameters().unwrap().len(), 0);
}

#[test]
fn test_summed_loss_with_transformation() {
    let lattice = fodo(1);
    let x = Array2::from_elem((6, 4), 0.03);
    let options = TrackOptions::new(Method::Linear)
        .with_recloss(LossRecording::Sum)
        .with_loss_func(|loss| loss.mapv(|l| if l > 0.0 { 1.0 } else { 0.0 }));
    let result = lattice.forward(&x, &options).unwrap();
    assert_eq!(result.loss, Some(LossRecord::Sum(4.0)));
    assert!(result.history.is_none());
}

#[test]
fn test_unmatched_entries_fail() {
    let lattice = fodo(1);
    let x = ensemble(2, 1e-3, 73);
    let options = TrackOptions::with_criteria(Criteria::new().with(Kind::Quadrupole, Method::Linear));
    assert!(lattice.forward(&x, &options).is_ok());
    assert!(lattice.forward(&x, &options.with_exact_drift(false)).is_err());
    let options = TrackOptions::with_criteria(
        Criteria::new().with(Kind::Quadrupole, Method::SecondOrder).or_default(Method::Linear),
    );
    assert!(lattice.forward(&x, &options).is_ok());
}
