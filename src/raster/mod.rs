//! In-memory rasters and raster metadata.

mod types;

pub use types::DataType;

use ndarray::{s, Array2, Array3, ArrayView2, Axis};

use crate::errors::{GeodataError, Result};
use crate::spec::{Bounds, Crs, GeoTransform, GeoTransformEx, Shape, SpatialSpec};

/// What a raster driver reports about a file without reading its pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMetadata {
    pub crs: Option<Crs>,
    pub transform: GeoTransform,
    pub shape: Shape,
    pub dtype: DataType,
    pub band_count: usize,
    pub nodata: Option<f64>,
    pub scales: Vec<f64>,
    pub offsets: Vec<f64>,
    /// Names of the data layers in a container format (e.g. NetCDF
    /// variables). Empty for plain single-layer files.
    pub subdatasets: Vec<String>,
}

impl RasterMetadata {
    pub fn bounds(&self) -> Bounds {
        self.transform.bounds(self.shape)
    }

    /// The grid of the file, when it carries (or is given) a CRS.
    pub fn spatial_spec(&self, fallback_crs: Option<&Crs>) -> Option<SpatialSpec> {
        let crs = self.crs.as_ref().or(fallback_crs)?;
        SpatialSpec::new(crs.clone(), self.transform, self.shape).ok()
    }
}

/// A georeferenced band stack held in memory.
///
/// Pixel values are stored as `f64` in a `(band, row, col)` array whatever
/// the on-disk [`DataType`]. Stacks carry one variable label per band.
#[derive(Debug, Clone)]
pub struct Raster {
    name: String,
    data: Array3<f64>,
    spec: SpatialSpec,
    dtype: DataType,
    nodata: Option<f64>,
    scales: Vec<f64>,
    offsets: Vec<f64>,
    variables: Option<Vec<String>>,
}

impl Raster {
    /// Construct a raster from a `(band, row, col)` array.
    ///
    /// Fails if the array's rows and columns do not match `spec`, or if it
    /// has no bands.
    pub fn new(
        name: impl Into<String>,
        data: Array3<f64>,
        spec: SpatialSpec,
        dtype: DataType,
    ) -> Result<Self> {
        let (bands, rows, cols) = data.dim();
        let shape = spec.shape();
        if bands == 0 || rows != shape.rows || cols != shape.cols {
            return Err(GeodataError::BadArgument(format!(
                "array of shape ({bands}, {rows}, {cols}) does not fit grid {shape}"
            )));
        }
        Ok(Raster {
            name: name.into(),
            data,
            spec,
            dtype,
            nodata: None,
            scales: vec![1.0; bands],
            offsets: vec![0.0; bands],
            variables: None,
        })
    }

    /// Single-band raster from a `(row, col)` array.
    pub fn from_band(
        name: impl Into<String>,
        band: Array2<f64>,
        spec: SpatialSpec,
        dtype: DataType,
    ) -> Result<Self> {
        Raster::new(name, band.insert_axis(Axis(0)), spec, dtype)
    }

    /// Raster with every pixel set to `value`.
    pub fn filled(
        name: impl Into<String>,
        spec: SpatialSpec,
        band_count: usize,
        dtype: DataType,
        value: f64,
    ) -> Result<Self> {
        let shape = spec.shape();
        let data = Array3::from_elem((band_count, shape.rows, shape.cols), value);
        Raster::new(name, data, spec, dtype)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<f64> {
        &mut self.data
    }

    pub fn into_data(self) -> Array3<f64> {
        self.data
    }

    pub fn spec(&self) -> &SpatialSpec {
        &self.spec
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    pub fn band_count(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// View of band `index` (0-based).
    pub fn band(&self, index: usize) -> Option<ArrayView2<'_, f64>> {
        (index < self.band_count()).then(|| self.data.slice(s![index, .., ..]))
    }

    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }

    /// Set per-band scale and offset. Both slices must have one entry per
    /// band.
    pub fn with_scales_offsets(mut self, scales: Vec<f64>, offsets: Vec<f64>) -> Result<Self> {
        let bands = self.band_count();
        if scales.len() != bands || offsets.len() != bands {
            return Err(GeodataError::BadArgument(format!(
                "expected {bands} scales and offsets, got {} and {}",
                scales.len(),
                offsets.len()
            )));
        }
        self.scales = scales;
        self.offsets = offsets;
        Ok(self)
    }

    /// Labels of the variable axis, for stacked rasters.
    pub fn variables(&self) -> Option<&[String]> {
        self.variables.as_deref()
    }

    pub fn with_variables(mut self, variables: Vec<String>) -> Result<Self> {
        if variables.len() != self.band_count() {
            return Err(GeodataError::BadArgument(format!(
                "expected {} variable labels, got {}",
                self.band_count(),
                variables.len()
            )));
        }
        self.variables = Some(variables);
        Ok(self)
    }

    pub fn without_variables(mut self) -> Self {
        self.variables = None;
        self
    }

    /// Band index of a variable label.
    pub fn variable_index(&self, label: &str) -> Option<usize> {
        self.variables.as_ref()?.iter().position(|v| v == label)
    }

    /// Keep only the listed bands (1-based, in the given order).
    pub fn select_bands(&self, bands: &[usize]) -> Result<Raster> {
        let count = self.band_count();
        if let Some(bad) = bands.iter().find(|b| **b == 0 || **b > count) {
            return Err(GeodataError::BadArgument(format!(
                "band index {bad} out of range 1..={count}"
            )));
        }
        let indices: Vec<usize> = bands.iter().map(|b| b - 1).collect();
        let mut selected = self.clone();
        selected.data = self.data.select(Axis(0), &indices);
        selected.scales = indices.iter().map(|i| self.scales[*i]).collect();
        selected.offsets = indices.iter().map(|i| self.offsets[*i]).collect();
        selected.variables = self
            .variables
            .as_ref()
            .map(|v| indices.iter().map(|i| v[*i].clone()).collect());
        Ok(selected)
    }

    /// Pixel values with nodata replaced by NaN and scale/offset applied.
    pub fn masked(&self) -> Array3<f64> {
        let mut out = self.data.clone();
        for (index, mut band) in out.axis_iter_mut(Axis(0)).enumerate() {
            let (scale, offset) = (self.scales[index], self.offsets[index]);
            band.mapv_inplace(|v| match self.nodata {
                Some(nodata) if v == nodata || (nodata.is_nan() && v.is_nan()) => f64::NAN,
                _ => v * scale + offset,
            });
        }
        out
    }

    pub fn metadata(&self) -> RasterMetadata {
        RasterMetadata {
            crs: Some(self.spec.crs().clone()),
            transform: *self.spec.transform(),
            shape: self.spec.shape(),
            dtype: self.dtype,
            band_count: self.band_count(),
            nodata: self.nodata,
            scales: self.scales.clone(),
            offsets: self.offsets.clone(),
            subdatasets: vec![],
        }
    }
}
