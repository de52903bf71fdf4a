//! Shared primitives: time, views, rectangles, image planes, cancellation
//! and the crate error taxonomy.

pub mod core;
pub mod error;
pub(crate) mod math;
