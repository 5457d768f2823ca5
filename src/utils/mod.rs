//! Pixel-level helpers shared by the pipeline stages

pub mod histogram;
pub mod scaling;

pub use histogram::match_histograms;
pub use scaling::CoordinateMapper;
