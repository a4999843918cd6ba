//! Tests for lattices built from commands and edited afterwards

mod beam_tests;
mod build_tests;
mod errors_tests;
mod segment_tests;
mod tracking_tests;
