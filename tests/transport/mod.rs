//! Tests for element, wrapper and slice transport

mod degeneracy_tests;
mod slicing_tests;
mod wrapper_tests;
