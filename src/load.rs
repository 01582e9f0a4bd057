//! Entry points.
//!
//! An empty target falls back to the default spec of the loader's
//! configuration, then to the grid of the loader's source.

use crate::errors::Result;
use crate::loader::RasterLoader;
use crate::raster::Raster;
use crate::spec::{SpatialSpec, TargetSpec};
use crate::stack::{self, StackOptions};

/// Load the raster `loader` produces on `target`, processing it first when
/// needed.
pub fn load(loader: &dyn RasterLoader, target: &TargetSpec) -> Result<Raster> {
    let spec = loader.parse_target_spec(target)?;
    loader.load(&spec)
}

/// Make sure the artifact `loader` produces on `target` exists. Returns the
/// resolved grid.
pub fn process(loader: &dyn RasterLoader, target: &TargetSpec) -> Result<SpatialSpec> {
    let spec = loader.parse_target_spec(target)?;
    if !loader.is_processed(&spec)? {
        loader.process(&spec)?;
    }
    Ok(spec)
}

/// Load several loaders as one stack with default [`StackOptions`].
pub fn load_all(loaders: &[&dyn RasterLoader], target: &TargetSpec) -> Result<Raster> {
    stack::load_stack(loaders, target, &StackOptions::default())
}
