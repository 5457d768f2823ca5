//! Service layer
//!
//! I/O concerns kept separate from the pixel pipeline.

pub mod io;

pub use io::ImageIOService;
