//! Utility types and functions.
//!
//! This module contains fundamental types used throughout the library:
//! - [`Error`] / [`Result`] - Error handling
//! - Math type re-exports from glam and [`BBox3f`]

mod error;
mod math;

pub use error::*;
pub use math::*;
