//! Pure-Rust implementations of the [engine](crate::engine) traits.

mod gtiff;
mod rasterize;
mod vector;
mod warp;

pub use gtiff::TiffDriver;
pub use rasterize::ScanlineRasterizer;
pub use vector::MemoryVectorReader;
pub use warp::AffineWarper;
