use std::ffi::CString;
use std::ptr::{self, NonNull};

use gdal_sys::{
    self, CPLErr, GDALCreateWarpOptions, GDALDestroyWarpOptions, GDALResampleAlg,
    GDALWarpInitDefaultBandMapping, GDALWarpInitDstNoDataReal, GDALWarpInitSrcNoDataReal,
    GDALWarpOptions,
};
use libc::{c_int, c_void};
use tracing::debug;

use super::cpl::CslStringList;
use super::dataset::{Dataset, GdalOpenFlags};
use super::srs::SpatialRef;
use super::utils::{_last_cpl_err, _last_null_pointer_err};
use crate::engine::{ResampleAlg, WarpOptions, WarpRequest, Warper};
use crate::errors::{GeodataError, Result};
use crate::raster::DataType;
use crate::spec::{Bounds, Crs, GeoTransform, GeoTransformEx, Shape, SpatialSpec};

/// Owned `GDALWarpOptions`.
struct GdalWarpOptions(NonNull<GDALWarpOptions>);

impl GdalWarpOptions {
    fn new() -> Result<Self> {
        NonNull::new(unsafe { GDALCreateWarpOptions() })
            .map(GdalWarpOptions)
            .ok_or_else(|| _last_null_pointer_err("GDALCreateWarpOptions"))
    }

    fn as_ptr_mut(&mut self) -> *mut GDALWarpOptions {
        self.0.as_ptr()
    }

    /// Map source `bands` (1-based) to destination bands `1..=n`.
    fn with_bands(&mut self, bands: &[usize]) -> &mut Self {
        let ptr = self.as_ptr_mut();
        unsafe {
            GDALWarpInitDefaultBandMapping(ptr, bands.len() as c_int);
            for (i, band) in bands.iter().enumerate() {
                *(*ptr).panSrcBands.add(i) = *band as c_int;
            }
        }
        self
    }

    /// Requires the band mapping to be initialised.
    fn with_nodata(&mut self, src_nodata: f64, dst_nodata: f64) -> &mut Self {
        let ptr = self.as_ptr_mut();
        unsafe {
            GDALWarpInitSrcNoDataReal(ptr, src_nodata);
            GDALWarpInitDstNoDataReal(ptr, dst_nodata);
        }
        self
    }

    fn with_resampling(&mut self, alg: ResampleAlg) -> &mut Self {
        unsafe { (*self.as_ptr_mut()).eResampleAlg = alg.ordinal() as GDALResampleAlg::Type };
        self
    }

    fn with_memory_limit(&mut self, limit_bytes: usize) -> &mut Self {
        unsafe { (*self.as_ptr_mut()).dfWarpMemoryLimit = limit_bytes as f64 };
        self
    }

    fn set_extra_option(&mut self, name: &str, value: &str) -> Result<()> {
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(GeodataError::BadArgument(format!(
                "Invalid characters in warp option name: '{name}'"
            )));
        }
        let psz_name = CString::new(name)?;
        let psz_value = CString::new(value)?;
        // GDALDestroyWarpOptions frees the list
        let ptr = self.as_ptr_mut();
        unsafe {
            (*ptr).papszWarpOptions = gdal_sys::CSLSetNameValue(
                (*ptr).papszWarpOptions,
                psz_name.as_ptr(),
                psz_value.as_ptr(),
            );
        }
        Ok(())
    }

    fn with_extra_options(&mut self, options: &WarpOptions) -> Result<&mut Self> {
        self.set_extra_option("INIT_DEST", "NO_DATA")?;
        if options.num_threads > 0 {
            self.set_extra_option("NUM_THREADS", &options.num_threads.to_string())?;
        }
        for (name, value) in &options.extra {
            self.set_extra_option(name, value)?;
        }
        Ok(self)
    }
}

impl Drop for GdalWarpOptions {
    fn drop(&mut self) {
        unsafe { GDALDestroyWarpOptions(self.as_ptr_mut()) }
    }
}

/// `GDALReprojectImage` into a freshly created GeoTIFF.
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalWarper;

fn create_destination(request: &WarpRequest) -> Result<Dataset> {
    let creation_options = CslStringList::try_from(&request.creation_options)?;
    let dst = Dataset::create(
        "GTiff",
        &request.dst_path,
        request.dst_spec.shape(),
        request.bands.len(),
        request.dst_dtype,
        &creation_options,
    )?;
    dst.set_spec(&request.dst_spec)?;
    for index in 1..=request.bands.len() {
        let band = dst.band(index)?;
        band.set_no_data_value(Some(request.dst_nodata))?;
        band.fill(request.dst_nodata)?;
    }
    Ok(dst)
}

impl Warper for GdalWarper {
    fn warp(&self, request: &WarpRequest) -> Result<()> {
        request.creation_options.validate()?;
        let src = Dataset::open(&request.src_path, GdalOpenFlags::default())?;
        let src_count = src.raster_count();
        if let Some(band) = request.bands.iter().find(|b| **b == 0 || **b > src_count) {
            return Err(GeodataError::BadArgument(format!(
                "Band {band} out of range for {} bands",
                src_count
            )));
        }
        let dst = create_destination(request)?;

        let src_wkt = CString::new(SpatialRef::from_crs(&request.src_crs)?.to_wkt()?)?;
        let dst_wkt = CString::new(SpatialRef::from_crs(request.dst_spec.crs())?.to_wkt()?)?;

        let mut warp_options = GdalWarpOptions::new()?;
        warp_options
            .with_bands(&request.bands)
            .with_nodata(request.src_nodata, request.dst_nodata)
            .with_resampling(request.options.resampling)
            .with_memory_limit(request.options.memory_limit)
            .with_extra_options(&request.options)?;

        debug!(
            src = %request.src_path.display(),
            dst = %request.dst_path.display(),
            resampling = %request.options.resampling,
            "GDALReprojectImage"
        );
        let rv = unsafe {
            gdal_sys::GDALReprojectImage(
                src.c_dataset(),
                src_wkt.as_ptr(),
                dst.c_dataset(),
                dst_wkt.as_ptr(),
                request.options.resampling.ordinal() as GDALResampleAlg::Type,
                request.options.memory_limit as f64,
                0.0,
                None,            // progress fn
                ptr::null_mut(), // progress arg
                warp_options.as_ptr_mut(),
            )
        };
        if rv != CPLErr::CE_None {
            return Err(_last_cpl_err(rv));
        }

        for (index, (scale, offset)) in request.scales.iter().zip(&request.offsets).enumerate() {
            if *scale != 1.0 || *offset != 0.0 {
                dst.band(index + 1)?.set_scale_offset(*scale, *offset)?;
            }
        }
        Ok(())
    }

    fn suggested_output(
        &self,
        src_crs: &Crs,
        dst_crs: &Crs,
        cols: usize,
        rows: usize,
        bounds: Bounds,
    ) -> Result<(GeoTransform, usize, usize)> {
        let transform = GeoTransform::from_origin(
            bounds.left,
            bounds.top,
            (bounds.right - bounds.left) / cols as f64,
            (bounds.top - bounds.bottom) / rows as f64,
        );
        let src_spec = SpatialSpec::new(src_crs.clone(), transform, Shape::new(rows, cols)?)?;
        let src = Dataset::create_mem(&src_spec, 1, DataType::UInt8)?;
        let src_wkt = CString::new(SpatialRef::from_crs(src_crs)?.to_wkt()?)?;
        let dst_wkt = CString::new(SpatialRef::from_crs(dst_crs)?.to_wkt()?)?;

        let transformer = unsafe {
            gdal_sys::GDALCreateGenImgProjTransformer(
                src.c_dataset(),
                src_wkt.as_ptr(),
                ptr::null_mut(),
                dst_wkt.as_ptr(),
                0,
                0.0,
                0,
            )
        };
        if transformer.is_null() {
            return Err(_last_null_pointer_err("GDALCreateGenImgProjTransformer"));
        }

        let mut geo_transform = GeoTransform::default();
        let mut pixels: c_int = 0;
        let mut lines: c_int = 0;
        let rv = unsafe {
            let rv = gdal_sys::GDALSuggestedWarpOutput(
                src.c_dataset(),
                Some(gdal_sys::GDALGenImgProjTransform),
                transformer,
                geo_transform.as_mut_ptr(),
                &mut pixels,
                &mut lines,
            );
            gdal_sys::GDALDestroyGenImgProjTransformer(transformer as *mut c_void);
            rv
        };
        if rv != CPLErr::CE_None {
            return Err(_last_cpl_err(rv));
        }
        Ok((geo_transform, pixels as usize, lines as usize))
    }
}
