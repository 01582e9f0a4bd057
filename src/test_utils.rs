use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::Array3;

use crate::engine::RasterDriver;
use crate::errors::{GeodataError, Result};
use crate::key::{KeyParams, ParamValue};
use crate::native::TiffDriver;
use crate::operation::{atomic, Operation, OperationContext};
use crate::options::RasterCreationOptions;
use crate::raster::{DataType, Raster, RasterMetadata};
use crate::spec::SpatialSpec;

/// A struct that contains a temporary directory and a path to a file in that directory.
pub struct TempFixture {
    _temp_dir: tempfile::TempDir,
    temp_path: PathBuf,
}

impl TempFixture {
    /// Creates a temporary directory and path to a non-existent file with given `name`.
    /// Useful for writing results to during testing
    ///
    /// Returns the struct `TempFixture` that contains the temp dir (for clean-up on `drop`)
    /// as well as the empty file path.
    pub fn empty(name: &str) -> Self {
        let _temp_dir = tempfile::tempdir().unwrap();
        let temp_path = _temp_dir.path().join(name);
        Self {
            _temp_dir,
            temp_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.temp_path
    }
}

impl AsRef<Path> for TempFixture {
    fn as_ref(&self) -> &Path {
        self.path()
    }
}

/// Writes `raster` as a GeoTIFF with default creation options.
pub fn write_raster(path: &Path, raster: &Raster) {
    TiffDriver
        .write(path, raster, &RasterCreationOptions::default())
        .unwrap();
}

/// Scoped value for temporarily suppressing thread-local GDAL log messages.
///
/// Useful for tests that expect GDAL errors and want to keep the output log clean
/// of distracting yet expected error messages.
#[cfg(feature = "gdal")]
pub(crate) struct SuppressGDALErrorLog {
    // Make !Sync and !Send, and force use of `new`.
    _private: std::marker::PhantomData<*mut std::ffi::c_void>,
}

#[cfg(feature = "gdal")]
impl SuppressGDALErrorLog {
    pub(crate) fn new() -> Self {
        unsafe { gdal_sys::CPLPushErrorHandler(Some(gdal_sys::CPLQuietErrorHandler)) };
        SuppressGDALErrorLog {
            _private: std::marker::PhantomData,
        }
    }
}

#[cfg(feature = "gdal")]
impl Drop for SuppressGDALErrorLog {
    fn drop(&mut self) {
        unsafe { gdal_sys::CPLPopErrorHandler() };
    }
}

/// Writes constant rasters and counts how often it ran. Clones share the
/// counter.
#[derive(Debug, Clone)]
pub struct CountingOperation {
    calls: Arc<AtomicUsize>,
    value: f64,
    bands: usize,
    dtype: DataType,
    stackable: bool,
    params: KeyParams,
}

impl CountingOperation {
    pub fn new(value: f64) -> Self {
        CountingOperation {
            calls: Arc::new(AtomicUsize::new(0)),
            value,
            bands: 1,
            dtype: DataType::Float32,
            stackable: true,
            params: KeyParams::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key, value);
        self
    }

    pub fn with_bands(mut self, bands: usize) -> Self {
        self.bands = bands;
        self
    }

    pub fn with_dtype(mut self, dtype: DataType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn non_stackable(mut self) -> Self {
        self.stackable = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Operation for CountingOperation {
    fn kind(&self) -> &'static str {
        "counting"
    }

    fn key_params(&self) -> KeyParams {
        self.params.clone()
    }

    fn stackable(&self) -> bool {
        self.stackable
    }

    fn materialize(&self, dst: &Path, spec: &SpatialSpec, ctx: &OperationContext) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let raster = Raster::filled("counting", spec.clone(), self.bands, self.dtype, self.value)?;
        atomic::write_atomic(dst, |tmp| {
            ctx.engine
                .driver
                .write(tmp, &raster, &RasterCreationOptions::default())
        })
    }
}

/// Serves a container with several variables, NetCDF style.
///
/// The container path lists its variables as subdatasets named
/// `NETCDF:<container>:<variable>`; each subdataset holds `steps` bands
/// where band `t` of variable `v` is filled with `100 * v + t`. Other paths
/// go to the GeoTIFF driver.
pub struct SubdatasetDriver {
    container: PathBuf,
    variables: Vec<(String, Raster)>,
}

impl SubdatasetDriver {
    pub fn new(container: &Path, variables: &[&str], steps: usize, spec: SpatialSpec) -> Self {
        let shape = spec.shape();
        let variables = variables
            .iter()
            .enumerate()
            .map(|(v, name)| {
                let data = Array3::from_shape_fn((steps, shape.rows, shape.cols), |(t, _, _)| {
                    (100 * v + t) as f64
                });
                let raster = Raster::new(*name, data, spec.clone(), DataType::Float32).unwrap();
                (name.to_string(), raster)
            })
            .collect();
        SubdatasetDriver {
            container: container.to_path_buf(),
            variables,
        }
    }

    pub fn subdataset(&self, variable: &str) -> PathBuf {
        PathBuf::from(format!("NETCDF:{}:{variable}", self.container.display()))
    }

    fn variable(&self, path: &Path) -> Option<&Raster> {
        self.variables
            .iter()
            .find(|(name, _)| self.subdataset(name) == path)
            .map(|(_, raster)| raster)
    }

    fn container_raster(&self, path: &Path) -> Result<&Raster> {
        match self.variables.as_slice() {
            [(_, raster)] => Ok(raster),
            _ => Err(GeodataError::TooManyDimensions {
                path: path.to_path_buf(),
                dims: 4,
            }),
        }
    }
}

impl RasterDriver for SubdatasetDriver {
    fn open(&self, path: &Path) -> Result<RasterMetadata> {
        if let Some(raster) = self.variable(path) {
            return Ok(raster.metadata());
        }
        if path == self.container {
            let first = &self.variables[0].1;
            let mut meta = first.metadata();
            meta.subdatasets = self
                .variables
                .iter()
                .map(|(name, _)| self.subdataset(name).display().to_string())
                .collect();
            return Ok(meta);
        }
        TiffDriver.open(path)
    }

    fn read(&self, path: &Path) -> Result<Raster> {
        if let Some(raster) = self.variable(path) {
            return Ok(raster.clone());
        }
        if path == self.container {
            return self.container_raster(path).cloned();
        }
        TiffDriver.read(path)
    }

    fn write(&self, path: &Path, raster: &Raster, options: &RasterCreationOptions) -> Result<()> {
        TiffDriver.write(path, raster, options)
    }
}

/// Assert numerical difference between two expressions is less than
/// 64-bit machine epsilon or a specified epsilon.
///
/// # Examples:
/// ```rust, no_run
/// use geodata::assert_near;
/// use std::f64::consts::{PI, E};
/// assert_near!(PI / E, 1.1557273497909217);
/// // with specified epsilon
/// assert_near!(PI / E, 1.15572734, epsilon = 1e-8);
/// ```
#[macro_export]
macro_rules! assert_near {
    ($left:expr, $right:expr) => {
        assert_near!($left, $right, epsilon = f64::EPSILON)
    };
    ($left:expr, $right:expr, epsilon = $ep:expr) => {
        assert!(
            ($left - $right).abs() < $ep,
            "|{} - {}| = {} is greater than epsilon {:.4e}",
            $left,
            $right,
            ($left - $right).abs(),
            $ep
        )
    };
    ($left:expr, $right:expr, epsilon = $ep:expr, field = $field:expr) => {
        assert!(
            ($left - $right).abs() < $ep,
            "field {}: |{} - {}| = {} is greater than epsilon {:.4e}",
            $field,
            $left,
            $right,
            ($left - $right).abs(),
            $ep
        )
    };
    // Pseudo-specialization
    (Bounds, $left:expr, $right:expr, epsilon = $ep:expr) => {
        assert_near!($left.left, $right.left, epsilon = $ep, field = "left");
        assert_near!($left.bottom, $right.bottom, epsilon = $ep, field = "bottom");
        assert_near!($left.right, $right.right, epsilon = $ep, field = "right");
        assert_near!($left.top, $right.top, epsilon = $ep, field = "top");
    };
}
