//! Parameter-keyed artifact cache for geospatial rasters.
//!
//! Loaders describe how to produce a raster on a target grid: reproject a
//! source file, burn a vector layer, or run a generator. The first request
//! materializes the result as a GeoTIFF under a path derived from the grid
//! and the loader's parameters; later requests read it back.
//!
//! ## Use
//!
//! ```
//! use geodata::{
//!     load, Config, Crs, DataLoader, DataType, Engine, GeneratorOperation, GeoTransform,
//!     GeoTransformEx, Raster, RasterDriver, RasterCreationOptions, Shape, SpatialSpec,
//! };
//!
//! # fn main() -> geodata::errors::Result<()> {
//! let cache = tempfile::tempdir()?;
//! let ones = GeneratorOperation::new(|dst, spec, ctx| {
//!     let raster = Raster::filled("ones", spec.clone(), 1, DataType::Float32, 1.0)?;
//!     ctx.engine.driver.write(dst, &raster, &RasterCreationOptions::default())
//! });
//! let loader = DataLoader::new("OnesLoader")
//!     .with_operation(ones)
//!     .with_engine(Engine::native())
//!     .with_config(Config::default().with_path_data_processed(cache.path()));
//!
//! let spec = SpatialSpec::new(
//!     Crs::from_epsg(3035),
//!     GeoTransform::from_origin(4_000_000.0, 3_000_000.0, 1000.0, 1000.0),
//!     Shape::new(10, 10)?,
//! )?;
//! let raster = load(&loader, &spec.into())?;
//! assert_eq!(raster.name(), "ones");
//! assert_eq!(raster.data()[[0, 5, 5]], 1.0);
//! # Ok(())
//! # }
//! ```

#![crate_name = "geodata"]
#![crate_type = "lib"]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod engine;
pub mod errors;
pub mod key;
mod load;
pub mod loader;
pub mod native;
pub mod operation;
pub mod options;
pub mod paths;
pub mod raster;
pub mod registry;
pub mod spec;
pub mod stack;
pub mod state;

#[cfg(feature = "gdal")]
#[cfg_attr(docsrs, doc(cfg(feature = "gdal")))]
pub mod gdal;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use engine::{
    Engine, Feature, FeatureTable, FieldKind, FieldValue, RasterDriver, Rasterize, ResampleAlg,
    VectorReader, WarpOptions, WarpRequest, Warper,
};
pub use errors::{GeodataError, Result};
pub use key::{KeyParams, ParamValue};
pub use load::{load, load_all, process};
pub use loader::{DataLoader, RasterLoader};
pub use operation::{
    GeneratorOperation, Operation, OperationContext, Rasterizer, Reprojector, SourceOrGenerate,
};
pub use options::RasterCreationOptions;
pub use raster::{DataType, Raster, RasterMetadata};
pub use registry::LoaderRegistry;
pub use spec::{Bounds, Crs, GeoTransform, GeoTransformEx, Shape, SpatialSpec, TargetSpec};
pub use stack::{load_stack, Duplicates, SpecPolicy, StackOptions};
