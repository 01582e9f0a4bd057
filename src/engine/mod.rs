//! Seams to the raster and vector libraries doing the actual work.
//!
//! The caching layer never decodes pixels or does coordinate math itself; it
//! goes through the four traits of this module, bundled in an [`Engine`].
//! [`Engine::native`] is a pure-Rust implementation covering GeoTIFF and
//! same-CRS resampling; the `gdal` feature adds a GDAL-backed engine.

mod resample;
mod vector;

pub use resample::ResampleAlg;
pub use vector::{Feature, FeatureTable, FieldKind, FieldValue};

use std::fmt::{self, Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use geo_types::Geometry;
use ndarray::Array2;

use crate::errors::Result;
use crate::native;
use crate::options::RasterCreationOptions;
use crate::raster::{DataType, Raster, RasterMetadata};
use crate::spec::{Bounds, Crs, GeoTransform, SpatialSpec};

/// Opens, reads and writes raster files.
pub trait RasterDriver: Send + Sync {
    /// Read the metadata of `path` without its pixels.
    ///
    /// Fails with [`RasterIo`](crate::errors::GeodataError::RasterIo) for a
    /// missing or unreadable file.
    fn open(&self, path: &Path) -> Result<RasterMetadata>;

    /// Read the whole file.
    fn read(&self, path: &Path) -> Result<Raster>;

    /// Write `raster` to `path` as a GeoTIFF.
    fn write(&self, path: &Path, raster: &Raster, options: &RasterCreationOptions) -> Result<()>;
}

/// Tuning of a warp call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarpOptions {
    pub resampling: ResampleAlg,
    /// Memory limit in bytes; `0` selects the warper default.
    pub memory_limit: usize,
    pub num_threads: usize,
    /// Extra `KEY=VALUE` warp options passed through verbatim.
    pub extra: Vec<(String, String)>,
}

/// Everything needed to warp one file onto a target grid.
#[derive(Debug, Clone)]
pub struct WarpRequest {
    pub src_path: PathBuf,
    pub src_crs: Crs,
    pub src_nodata: f64,
    /// 1-based source bands, in output order.
    pub bands: Vec<usize>,
    pub dst_path: PathBuf,
    pub dst_spec: SpatialSpec,
    pub dst_dtype: DataType,
    pub dst_nodata: f64,
    /// Per output band.
    pub scales: Vec<f64>,
    /// Per output band.
    pub offsets: Vec<f64>,
    pub options: WarpOptions,
    pub creation_options: RasterCreationOptions,
}

/// Resamples rasters between grids.
pub trait Warper: Send + Sync {
    /// Write `request.src_path` resampled onto `request.dst_spec` to
    /// `request.dst_path`.
    fn warp(&self, request: &WarpRequest) -> Result<()>;

    /// The grid, at roughly the source resolution, that encloses the source
    /// extent once transformed to `dst_crs`. Returns `(transform, cols,
    /// rows)`.
    fn suggested_output(
        &self,
        src_crs: &Crs,
        dst_crs: &Crs,
        cols: usize,
        rows: usize,
        bounds: Bounds,
    ) -> Result<(GeoTransform, usize, usize)>;
}

/// Burns geometries into a grid.
pub trait Rasterize: Send + Sync {
    /// Burn each `(geometry, value)` pair, in order, into a grid of `spec`
    /// initialised with `fill`. Later shapes overwrite earlier ones.
    fn rasterize(
        &self,
        shapes: &[(Geometry<f64>, f64)],
        spec: &SpatialSpec,
        fill: f64,
        all_touched: bool,
        dtype: DataType,
    ) -> Result<Array2<f64>>;
}

/// Reads vector layers.
pub trait VectorReader: Send + Sync {
    /// Read the first layer of `path`, reprojected to `target_crs` when the
    /// reader is able to.
    fn read(&self, path: &Path, target_crs: &Crs) -> Result<FeatureTable>;
}

/// The collaborators handed to operations.
#[derive(Clone)]
pub struct Engine {
    pub driver: Arc<dyn RasterDriver>,
    pub warper: Arc<dyn Warper>,
    pub rasterizer: Arc<dyn Rasterize>,
    pub vectors: Arc<dyn VectorReader>,
}

impl Engine {
    /// Pure-Rust engine: GeoTIFF through the `tiff` crate, same-CRS
    /// resampling and an in-memory vector reader.
    pub fn native() -> Self {
        Engine::native_with_driver(Arc::new(native::TiffDriver::default()))
    }

    /// Native engine reading and writing through `driver`.
    pub fn native_with_driver(driver: Arc<dyn RasterDriver>) -> Self {
        Engine {
            warper: Arc::new(native::AffineWarper::new(driver.clone())),
            driver,
            rasterizer: Arc::new(native::ScanlineRasterizer),
            vectors: Arc::new(native::MemoryVectorReader::default()),
        }
    }

    /// GDAL for every collaborator.
    #[cfg(feature = "gdal")]
    pub fn gdal() -> Self {
        Engine {
            driver: Arc::new(crate::gdal::GdalDriver),
            warper: Arc::new(crate::gdal::GdalWarper),
            rasterizer: Arc::new(crate::gdal::GdalRasterizer),
            vectors: Arc::new(crate::gdal::OgrVectorReader),
        }
    }

    pub fn with_driver(mut self, driver: Arc<dyn RasterDriver>) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_warper(mut self, warper: Arc<dyn Warper>) -> Self {
        self.warper = warper;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterize>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_vectors(mut self, vectors: Arc<dyn VectorReader>) -> Self {
        self.vectors = vectors;
        self
    }
}

impl Default for Engine {
    /// GDAL when compiled in, native otherwise.
    fn default() -> Self {
        #[cfg(feature = "gdal")]
        {
            Engine::gdal()
        }
        #[cfg(not(feature = "gdal"))]
        {
            Engine::native()
        }
    }
}

impl Debug for Engine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}
