use std::sync::Arc;

use ndarray::{Array3, ArrayView2};
use tracing::debug;

use crate::engine::{RasterDriver, ResampleAlg, WarpRequest, Warper};
use crate::errors::{GeodataError, Result};
use crate::native::TiffDriver;
use crate::raster::Raster;
use crate::spec::{Bounds, Crs, GeoTransform, GeoTransformEx};

/// Resamples between grids that share a CRS.
///
/// Supports nearest neighbour and bilinear resampling. Anything involving a
/// change of coordinate system needs the GDAL engine.
#[derive(Clone)]
pub struct AffineWarper {
    driver: Arc<dyn RasterDriver>,
}

impl AffineWarper {
    pub fn new(driver: Arc<dyn RasterDriver>) -> Self {
        AffineWarper { driver }
    }
}

impl Default for AffineWarper {
    fn default() -> Self {
        AffineWarper::new(Arc::new(TiffDriver))
    }
}

fn same_crs(src: &Crs, dst: &Crs) -> Result<()> {
    if src != dst {
        return Err(GeodataError::BadArgument(format!(
            "Reprojection from {src} to {dst} requires the gdal feature"
        )));
    }
    Ok(())
}

fn is_nodata(value: f64, nodata: f64) -> bool {
    value.is_nan() || value == nodata
}

fn sample_nearest(band: &ArrayView2<'_, f64>, x: f64, y: f64, nodata: f64) -> Option<f64> {
    let (rows, cols) = band.dim();
    if x < 0.0 || y < 0.0 {
        return None;
    }
    let (col, row) = (x.floor() as usize, y.floor() as usize);
    if col >= cols || row >= rows {
        return None;
    }
    let value = band[[row, col]];
    (!is_nodata(value, nodata)).then_some(value)
}

/// Bilinear interpolation between pixel centres. Nodata neighbours are left
/// out and the remaining weights renormalised.
fn sample_bilinear(band: &ArrayView2<'_, f64>, x: f64, y: f64, nodata: f64) -> Option<f64> {
    let (rows, cols) = band.dim();
    if x < 0.0 || y < 0.0 || x > cols as f64 || y > rows as f64 {
        return None;
    }
    let (fx, fy) = (x - 0.5, y - 0.5);
    let (x0, y0) = (fx.floor(), fy.floor());
    let (dx, dy) = (fx - x0, fy - y0);

    let mut sum = 0.0;
    let mut weight = 0.0;
    for (oy, wy) in [(0.0, 1.0 - dy), (1.0, dy)] {
        for (ox, wx) in [(0.0, 1.0 - dx), (1.0, dx)] {
            let w = wx * wy;
            if w == 0.0 {
                continue;
            }
            let (c, r) = (x0 + ox, y0 + oy);
            // clamp to the edge pixels
            let c = c.clamp(0.0, (cols - 1) as f64) as usize;
            let r = r.clamp(0.0, (rows - 1) as f64) as usize;
            let value = band[[r, c]];
            if is_nodata(value, nodata) {
                continue;
            }
            sum += value * w;
            weight += w;
        }
    }
    (weight > 0.0).then(|| sum / weight)
}

impl Warper for AffineWarper {
    fn warp(&self, request: &WarpRequest) -> Result<()> {
        same_crs(&request.src_crs, request.dst_spec.crs())?;
        let sampler: fn(&ArrayView2<'_, f64>, f64, f64, f64) -> Option<f64> =
            match request.options.resampling {
                ResampleAlg::NearestNeighbour => sample_nearest,
                ResampleAlg::Bilinear => sample_bilinear,
                other => {
                    return Err(GeodataError::BadArgument(format!(
                        "Resampling '{other}' requires the gdal feature"
                    )))
                }
            };

        let source = self.driver.read(&request.src_path)?;
        let source = source.select_bands(&request.bands)?;
        let src_inv = source.spec().transform().invert()?;
        let dst_gt = request.dst_spec.transform();
        let shape = request.dst_spec.shape();
        debug!(
            src = %request.src_path.display(),
            resampling = %request.options.resampling,
            "Resampling on a shared CRS"
        );

        let dtype = request.dst_dtype;
        let mut data = Array3::from_elem(
            (source.band_count(), shape.rows, shape.cols),
            request.dst_nodata,
        );
        for (index, mut out) in data.outer_iter_mut().enumerate() {
            let band = source.data().index_axis(ndarray::Axis(0), index);
            for ((row, col), value) in out.indexed_iter_mut() {
                let (wx, wy) = dst_gt.apply(col as f64 + 0.5, row as f64 + 0.5);
                let (x, y) = src_inv.apply(wx, wy);
                if let Some(sampled) = sampler(&band, x, y, request.src_nodata) {
                    *value = dtype.cast(sampled);
                }
            }
        }

        let raster = Raster::new(source.name(), data, request.dst_spec.clone(), dtype)?
            .with_nodata(Some(request.dst_nodata))
            .with_scales_offsets(request.scales.clone(), request.offsets.clone())?;
        self.driver
            .write(&request.dst_path, &raster, &request.creation_options)
    }

    fn suggested_output(
        &self,
        src_crs: &Crs,
        dst_crs: &Crs,
        cols: usize,
        rows: usize,
        bounds: Bounds,
    ) -> Result<(GeoTransform, usize, usize)> {
        same_crs(src_crs, dst_crs)?;
        let x_res = (bounds.right - bounds.left) / cols as f64;
        let y_res = (bounds.top - bounds.bottom) / rows as f64;
        Ok((
            GeoTransform::from_origin(bounds.left, bounds.top, x_res, y_res),
            cols,
            rows,
        ))
    }
}
