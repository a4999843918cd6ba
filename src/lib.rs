//! # beamline-rs
//!
//! `beamline-rs` builds particle accelerator lattices and transports beams through
//! them, using transfer maps up to second order and exact drift propagation.
//!
//! The library provides:
//! - Beam descriptions completed from partial input ([`beam`])
//! - Lattice elements (drifts, monitors, kickers, quadrupoles, sextupoles, bends
//!   and their thin slices) with apertures ([`elements`], [`aperture`])
//! - Alignment errors as wrappers around elements ([`alignment`])
//! - An indexable, sliceable container of elements with tracking and transfer
//!   maps ([`segment`])
//! - Construction of lattices from command sequences, including inheritance,
//!   positioned sequences and error tables ([`build`])
//! - Tracked parameters for attributes that are meant to be varied ([`parameters`])
//!
//! ## Basic Usage
//!
//! ```
//! use beamline_rs::beam::{augment_beam, BeamSpec};
//! use beamline_rs::elements::Element;
//! use beamline_rs::segment::{MapOptions, Segment};
//! use ndarray::Array2;
//!
//! let beam = augment_beam(&BeamSpec::new().particle("proton").energy(1.0)).unwrap();
//! let mut lattice = Segment::default();
//! lattice.push(Element::quadrupole(0.5, 1.0, beam.clone()).with_label("qf"));
//! lattice.push(Element::drift(2.0, beam.clone()));
//! lattice.push(Element::quadrupole(-0.5, 1.0, beam).with_label("qd"));
//!
//! let x = Array2::<f64>::zeros((6, 10));
//! let y = lattice.linear(&x).unwrap();
//! assert_eq!(y.shape(), &[6, 10]);
//!
//! let map = lattice.transfer_map(&MapOptions::default()).unwrap();
//! assert_eq!(map.r.shape(), &[6, 6]);
//! ```

pub mod error;

pub mod parameters;

pub mod beam;

pub mod aperture;

pub mod transfer;

pub mod elements;

pub mod alignment;

pub mod segment;

pub mod build;

// Re-exports for convenience
pub use alignment::{Alignment, AlignmentKind};
pub use beam::{augment_beam, Beam, BeamSpec};
pub use build::{from_sequence, BuildOptions, Command, Lattice};
pub use elements::{Element, Kind, SBend};
pub use error::{LatticeError, Result};
pub use segment::{LatticeElement, Segment};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
