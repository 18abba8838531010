#[macro_use]
extern crate num_derive;

pub mod correlation_tools;
pub mod cube;
pub mod errors;
pub mod fitting;
pub mod geometry;
