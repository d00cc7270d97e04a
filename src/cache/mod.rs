//! Bitmap, pointer and glyph caches, plus the persistent bitmap cache file.

mod bitmap;
mod glyph;
mod persister;
mod pointer;

pub use bitmap::*;
pub use glyph::*;
pub use persister::*;
pub use pointer::*;
