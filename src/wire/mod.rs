//! Wire primitives - payload cursors and screen geometry.

mod geometry;
mod stream;

pub use geometry::*;
pub use stream::*;
