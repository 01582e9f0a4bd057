//! GDAL-backed [`Engine`](crate::engine::Engine) collaborators.
//!
//! Raster I/O, warping and rasterization go through the GDAL C API;
//! vector layers are read through OGR. Enabled by the `gdal` feature.

mod cpl;
mod dataset;
mod geometry;
mod rasterize;
mod srs;
mod utils;
mod vector;
mod warp;

pub use cpl::CslStringList;
pub use dataset::{Dataset, GdalDriver, GdalOpenFlags};
pub use rasterize::GdalRasterizer;
pub use srs::SpatialRef;
pub use vector::OgrVectorReader;
pub use warp::GdalWarper;

/// Version string of the linked GDAL library, e.g. `"3.8.4"`.
pub fn version() -> String {
    let key = c"RELEASE_NAME";
    utils::_string(unsafe { gdal_sys::GDALVersionInfo(key.as_ptr()) })
}
