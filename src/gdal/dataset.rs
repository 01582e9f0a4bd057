use std::ffi::{c_uint, CString};
use std::path::Path;
use std::ptr;

use bitflags::bitflags;
use gdal_sys::{self, CPLErr, GDALDataType, GDALDatasetH, GDALRWFlag, GDALRasterBandH};
use libc::{c_double, c_int, c_void};
use ndarray::{Array2, Array3, ArrayView2};
use tracing::debug;

use super::cpl::CslStringList;
use super::srs::{crs_from_wkt, SpatialRef};
use super::utils::{
    _last_cpl_err, _last_null_pointer_err, _path_to_c_string, _register_drivers, _string,
    _string_array,
};
use crate::engine::RasterDriver;
use crate::errors::{GeodataError, Result};
use crate::options::RasterCreationOptions;
use crate::raster::{DataType, Raster, RasterMetadata};
use crate::spec::{Crs, GeoTransform, Shape, SpatialSpec};

// These are skipped by bindgen and manually updated.
bitflags! {
    /// Flags of the `nOpenFlags` argument to [`GDALOpenEx`].
    ///
    /// [`GDALOpenEx`]: https://gdal.org/doxygen/gdal_8h.html#a9cb8585d0b3c16726b08e25bcc94274a
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GdalOpenFlags: c_uint {
        /// Open in read-only mode (default).
        const GDAL_OF_READONLY = 0x00;
        /// Open in update mode.
        const GDAL_OF_UPDATE = 0x01;
        /// Allow raster drivers to be used.
        const GDAL_OF_RASTER = 0x02;
        /// Allow vector drivers to be used.
        const GDAL_OF_VECTOR = 0x04;
        /// Emit error message in case of failed open.
        const GDAL_OF_VERBOSE_ERROR = 0x40;
    }
}

impl Default for GdalOpenFlags {
    fn default() -> GdalOpenFlags {
        GdalOpenFlags::GDAL_OF_READONLY | GdalOpenFlags::GDAL_OF_RASTER
    }
}

pub(crate) fn gdal_type(dtype: DataType) -> GDALDataType::Type {
    match dtype {
        DataType::UInt8 => GDALDataType::GDT_Byte,
        DataType::UInt16 => GDALDataType::GDT_UInt16,
        DataType::Int16 => GDALDataType::GDT_Int16,
        DataType::UInt32 => GDALDataType::GDT_UInt32,
        DataType::Int32 => GDALDataType::GDT_Int32,
        DataType::Int64 => GDALDataType::GDT_Int64,
        DataType::Float32 => GDALDataType::GDT_Float32,
        DataType::Float64 => GDALDataType::GDT_Float64,
    }
}

fn from_gdal_type(gdal_type: GDALDataType::Type) -> Option<DataType> {
    DataType::available_types()
        .iter()
        .copied()
        .find(|dtype| self::gdal_type(*dtype) == gdal_type)
}

/// Owned `GDALDatasetH`, closed on drop.
#[derive(Debug)]
pub struct Dataset {
    c_dataset: GDALDatasetH,
}

unsafe impl Send for Dataset {}

impl Drop for Dataset {
    fn drop(&mut self) {
        unsafe {
            gdal_sys::GDALClose(self.c_dataset);
        }
    }
}

impl Dataset {
    pub fn open(path: &Path, flags: GdalOpenFlags) -> Result<Dataset> {
        _register_drivers();
        let c_filename = _path_to_c_string(path)?;
        let c_dataset = unsafe {
            gdal_sys::GDALOpenEx(
                c_filename.as_ptr(),
                flags.bits(),
                ptr::null(),
                ptr::null(),
                ptr::null(),
            )
        };
        if c_dataset.is_null() {
            let err = _last_null_pointer_err("GDALOpenEx");
            return Err(GeodataError::raster_io(path, err));
        }
        Ok(Dataset { c_dataset })
    }

    /// Create a dataset with `driver_name` (`GTiff`, `MEM`).
    pub fn create(
        driver_name: &str,
        path: &Path,
        shape: Shape,
        bands: usize,
        dtype: DataType,
        options: &CslStringList,
    ) -> Result<Dataset> {
        _register_drivers();
        let c_driver_name = CString::new(driver_name)?;
        let c_driver = unsafe { gdal_sys::GDALGetDriverByName(c_driver_name.as_ptr()) };
        if c_driver.is_null() {
            return Err(_last_null_pointer_err("GDALGetDriverByName"));
        }
        let c_filename = _path_to_c_string(path)?;
        let c_dataset = unsafe {
            gdal_sys::GDALCreate(
                c_driver,
                c_filename.as_ptr(),
                shape.cols as c_int,
                shape.rows as c_int,
                bands as c_int,
                gdal_type(dtype),
                options.as_ptr() as _,
            )
        };
        if c_dataset.is_null() {
            let err = _last_null_pointer_err("GDALCreate");
            return Err(GeodataError::raster_io(path, err));
        }
        Ok(Dataset { c_dataset })
    }

    /// In-memory dataset on `spec`.
    pub fn create_mem(spec: &SpatialSpec, bands: usize, dtype: DataType) -> Result<Dataset> {
        let dataset = Dataset::create(
            "MEM",
            Path::new(""),
            spec.shape(),
            bands,
            dtype,
            &CslStringList::new(),
        )?;
        dataset.set_spec(spec)?;
        Ok(dataset)
    }

    /// Returns the wrapped C pointer
    ///
    /// # Safety
    /// This method returns a raw C pointer
    pub unsafe fn c_dataset(&self) -> GDALDatasetH {
        self.c_dataset
    }

    pub fn shape(&self) -> Shape {
        let cols = unsafe { gdal_sys::GDALGetRasterXSize(self.c_dataset) } as usize;
        let rows = unsafe { gdal_sys::GDALGetRasterYSize(self.c_dataset) } as usize;
        Shape { rows, cols }
    }

    pub fn raster_count(&self) -> usize {
        (unsafe { gdal_sys::GDALGetRasterCount(self.c_dataset) }) as usize
    }

    pub fn projection(&self) -> String {
        _string(unsafe { gdal_sys::GDALGetProjectionRef(self.c_dataset) })
    }

    pub fn crs(&self) -> Result<Option<Crs>> {
        crs_from_wkt(&self.projection())
    }

    pub fn set_projection(&self, projection: &str) -> Result<()> {
        let c_projection = CString::new(projection)?;
        let rv = unsafe { gdal_sys::GDALSetProjection(self.c_dataset, c_projection.as_ptr()) };
        if rv != CPLErr::CE_None {
            return Err(_last_cpl_err(rv));
        }
        Ok(())
    }

    pub fn geo_transform(&self) -> Result<GeoTransform> {
        let mut transformation = GeoTransform::default();
        let rv = unsafe {
            gdal_sys::GDALGetGeoTransform(self.c_dataset, transformation.as_mut_ptr())
        };
        // GDALGetGeoTransform fills in the identity on failure
        if rv != CPLErr::CE_None {
            return Err(_last_cpl_err(rv));
        }
        Ok(transformation)
    }

    pub fn set_geo_transform(&self, transformation: &GeoTransform) -> Result<()> {
        let rv = unsafe {
            gdal_sys::GDALSetGeoTransform(
                self.c_dataset,
                transformation.as_ptr() as *mut c_double,
            )
        };
        if rv != CPLErr::CE_None {
            return Err(_last_cpl_err(rv));
        }
        Ok(())
    }

    pub fn set_spec(&self, spec: &SpatialSpec) -> Result<()> {
        self.set_geo_transform(spec.transform())?;
        self.set_projection(&SpatialRef::from_crs(spec.crs())?.to_wkt()?)
    }

    /// `SUBDATASET_n_NAME` entries of the dataset.
    pub fn subdatasets(&self) -> Vec<String> {
        let domain = c"SUBDATASETS";
        let entries = unsafe { gdal_sys::GDALGetMetadata(self.c_dataset, domain.as_ptr()) };
        _string_array(entries)
            .into_iter()
            .filter_map(|entry| {
                let (key, value) = entry.split_once('=')?;
                key.ends_with("_NAME").then(|| value.to_string())
            })
            .collect()
    }

    /// Band `index`, 1-based.
    pub fn band(&self, index: usize) -> Result<Band<'_>> {
        let c_band = unsafe { gdal_sys::GDALGetRasterBand(self.c_dataset, index as c_int) };
        if c_band.is_null() {
            return Err(_last_null_pointer_err("GDALGetRasterBand"));
        }
        Ok(Band {
            c_band,
            shape: self.shape(),
            _dataset: self,
        })
    }
}

/// A band borrowed from its [`Dataset`].
pub struct Band<'a> {
    c_band: GDALRasterBandH,
    shape: Shape,
    _dataset: &'a Dataset,
}

impl Band<'_> {
    pub fn dtype(&self) -> Option<DataType> {
        from_gdal_type(unsafe { gdal_sys::GDALGetRasterDataType(self.c_band) })
    }

    pub fn no_data_value(&self) -> Option<f64> {
        let mut pb_success = 1;
        let no_data = unsafe { gdal_sys::GDALGetRasterNoDataValue(self.c_band, &mut pb_success) };
        (pb_success == 1).then_some(no_data)
    }

    pub fn set_no_data_value(&self, no_data: Option<f64>) -> Result<()> {
        let rv = match no_data {
            Some(value) => unsafe { gdal_sys::GDALSetRasterNoDataValue(self.c_band, value) },
            None => unsafe { gdal_sys::GDALDeleteRasterNoDataValue(self.c_band) },
        };
        if rv != CPLErr::CE_None {
            return Err(_last_cpl_err(rv));
        }
        Ok(())
    }

    pub fn scale(&self) -> f64 {
        let mut pb_success = 1;
        let scale = unsafe { gdal_sys::GDALGetRasterScale(self.c_band, &mut pb_success) };
        if pb_success == 1 {
            scale
        } else {
            1.0
        }
    }

    pub fn offset(&self) -> f64 {
        let mut pb_success = 1;
        let offset = unsafe { gdal_sys::GDALGetRasterOffset(self.c_band, &mut pb_success) };
        if pb_success == 1 {
            offset
        } else {
            0.0
        }
    }

    pub fn set_scale_offset(&self, scale: f64, offset: f64) -> Result<()> {
        let rv = unsafe { gdal_sys::GDALSetRasterScale(self.c_band, scale) };
        if rv != CPLErr::CE_None {
            return Err(_last_cpl_err(rv));
        }
        let rv = unsafe { gdal_sys::GDALSetRasterOffset(self.c_band, offset) };
        if rv != CPLErr::CE_None {
            return Err(_last_cpl_err(rv));
        }
        Ok(())
    }

    pub fn fill(&self, value: f64) -> Result<()> {
        let rv = unsafe { gdal_sys::GDALFillRaster(self.c_band, value, 0.0) };
        if rv != CPLErr::CE_None {
            return Err(_last_cpl_err(rv));
        }
        Ok(())
    }

    /// The whole band as `f64`.
    pub fn read(&self) -> Result<Array2<f64>> {
        let Shape { rows, cols } = self.shape;
        let mut data = vec![0.0f64; rows * cols];
        let rv = unsafe {
            gdal_sys::GDALRasterIO(
                self.c_band,
                GDALRWFlag::GF_Read,
                0,
                0,
                cols as c_int,
                rows as c_int,
                data.as_mut_ptr() as *mut c_void,
                cols as c_int,
                rows as c_int,
                GDALDataType::GDT_Float64,
                0,
                0,
            )
        };
        if rv != CPLErr::CE_None {
            return Err(_last_cpl_err(rv));
        }
        Array2::from_shape_vec((rows, cols), data).map_err(Into::into)
    }

    pub fn write(&self, data: ArrayView2<'_, f64>) -> Result<()> {
        let Shape { rows, cols } = self.shape;
        let mut buffer: Vec<f64> = data.iter().copied().collect();
        if buffer.len() != rows * cols {
            return Err(GeodataError::BadArgument(format!(
                "band data has {} values, expected {rows}x{cols}",
                buffer.len()
            )));
        }
        let rv = unsafe {
            gdal_sys::GDALRasterIO(
                self.c_band,
                GDALRWFlag::GF_Write,
                0,
                0,
                cols as c_int,
                rows as c_int,
                buffer.as_mut_ptr() as *mut c_void,
                cols as c_int,
                rows as c_int,
                GDALDataType::GDT_Float64,
                0,
                0,
            )
        };
        if rv != CPLErr::CE_None {
            return Err(_last_cpl_err(rv));
        }
        Ok(())
    }
}

/// Raster I/O through GDAL. Writes GeoTIFF, reads anything GDAL opens.
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalDriver;

fn metadata_of(dataset: &Dataset, path: &Path) -> Result<RasterMetadata> {
    let band_count = dataset.raster_count();
    let (dtype, nodata) = if band_count > 0 {
        let band = dataset.band(1)?;
        let dtype = band
            .dtype()
            .ok_or_else(|| GeodataError::raster_io(path, "unsupported band data type"))?;
        (dtype, band.no_data_value())
    } else {
        (DataType::Float64, None)
    };
    let mut scales = Vec::with_capacity(band_count);
    let mut offsets = Vec::with_capacity(band_count);
    for index in 1..=band_count {
        let band = dataset.band(index)?;
        scales.push(band.scale());
        offsets.push(band.offset());
    }
    Ok(RasterMetadata {
        crs: dataset.crs()?,
        transform: dataset.geo_transform().unwrap_or([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
        shape: dataset.shape(),
        dtype,
        band_count,
        nodata,
        scales,
        offsets,
        subdatasets: dataset.subdatasets(),
    })
}

impl RasterDriver for GdalDriver {
    fn open(&self, path: &Path) -> Result<RasterMetadata> {
        let dataset = Dataset::open(path, GdalOpenFlags::default())?;
        metadata_of(&dataset, path)
    }

    fn read(&self, path: &Path) -> Result<Raster> {
        let dataset = Dataset::open(path, GdalOpenFlags::default())?;
        let metadata = metadata_of(&dataset, path)?;
        if metadata.band_count == 0 {
            return match metadata.subdatasets.as_slice() {
                [single] => self.read(Path::new(single)),
                subdatasets => Err(GeodataError::TooManyDimensions {
                    path: path.to_path_buf(),
                    dims: subdatasets.len() + 2,
                }),
            };
        }

        let Shape { rows, cols } = metadata.shape;
        let mut data = Array3::zeros((metadata.band_count, rows, cols));
        for (index, mut slot) in data.outer_iter_mut().enumerate() {
            slot.assign(&dataset.band(index + 1)?.read()?);
        }

        let crs = metadata.crs.clone().ok_or_else(|| {
            GeodataError::raster_io(path, "file carries no coordinate reference system")
        })?;
        let spec = SpatialSpec::new(crs, metadata.transform, metadata.shape)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Raster::new(name, data, spec, metadata.dtype)?
            .with_nodata(metadata.nodata)
            .with_scales_offsets(metadata.scales, metadata.offsets)
    }

    fn write(&self, path: &Path, raster: &Raster, options: &RasterCreationOptions) -> Result<()> {
        options.validate()?;
        let c_options = CslStringList::try_from(options)?;
        let dtype = raster.dtype();
        let dataset = Dataset::create(
            "GTiff",
            path,
            raster.spec().shape(),
            raster.band_count(),
            dtype,
            &c_options,
        )?;
        dataset.set_spec(raster.spec())?;

        let nodata = raster.nodata();
        for (index, band_data) in raster.data().outer_iter().enumerate() {
            let band = dataset.band(index + 1)?;
            if dtype.is_integer() {
                let fill = nodata.unwrap_or(0.0);
                let stored = band_data.mapv(|v| if v.is_nan() { fill } else { v });
                band.write(stored.view())?;
            } else {
                band.write(band_data)?;
            }
            band.set_no_data_value(nodata)?;
            let scale = raster.scales().get(index).copied().unwrap_or(1.0);
            let offset = raster.offsets().get(index).copied().unwrap_or(0.0);
            if scale != 1.0 || offset != 0.0 {
                band.set_scale_offset(scale, offset)?;
            }
        }
        debug!(path = %path.display(), bands = raster.band_count(), "Wrote GeoTIFF");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::GeoTransformEx;
    use crate::test_utils::{SuppressGDALErrorLog, TempFixture};

    fn spec() -> SpatialSpec {
        SpatialSpec::new(
            Crs::from_epsg(3035),
            GeoTransform::from_origin(4_000_000.0, 3_000_000.0, 100.0, 100.0),
            Shape::new(3, 4).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn write_then_read() {
        let fixture = TempFixture::empty("out.tif");
        let data = Array3::from_shape_fn((2, 3, 4), |(b, r, c)| (b * 100 + r * 4 + c) as f64);
        let raster = Raster::new("out", data.clone(), spec(), DataType::Int16)
            .unwrap()
            .with_nodata(Some(-1.0))
            .with_scales_offsets(vec![0.5, 1.0], vec![0.0, 2.0])
            .unwrap();
        GdalDriver
            .write(fixture.path(), &raster, &RasterCreationOptions::default())
            .unwrap();

        let meta = GdalDriver.open(fixture.path()).unwrap();
        assert_eq!(meta.crs, Some(Crs::from_epsg(3035)));
        assert_eq!(&meta.transform, spec().transform());
        assert_eq!(meta.band_count, 2);
        assert_eq!(meta.dtype, DataType::Int16);
        assert_eq!(meta.nodata, Some(-1.0));
        assert_eq!(meta.scales, vec![0.5, 1.0]);
        assert_eq!(meta.offsets, vec![0.0, 2.0]);
        assert!(meta.subdatasets.is_empty());

        let back = GdalDriver.read(fixture.path()).unwrap();
        assert_eq!(back.data(), &data);
        assert_eq!(back.name(), "out");
    }

    #[test]
    fn missing_file() {
        let _nolog = SuppressGDALErrorLog::new();
        let err = GdalDriver.open(Path::new("/does/not/exist.tif")).unwrap_err();
        assert!(matches!(err, GeodataError::RasterIo { .. }));
    }

    #[test]
    fn mem_dataset_fill() {
        let dataset = Dataset::create_mem(&spec(), 1, DataType::Float64).unwrap();
        let band = dataset.band(1).unwrap();
        band.fill(7.0).unwrap();
        assert!(band.read().unwrap().iter().all(|v| *v == 7.0));
        assert_eq!(dataset.crs().unwrap(), Some(Crs::from_epsg(3035)));
    }
}
