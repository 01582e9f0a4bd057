use std::ptr;

use gdal_sys::{self, CPLErr};
use geo_types::Geometry;
use ndarray::Array2;

use super::cpl::CslStringList;
use super::dataset::Dataset;
use super::geometry::OgrGeometry;
use super::utils::_last_cpl_err;
use crate::engine::Rasterize;
use crate::errors::Result;
use crate::raster::DataType;
use crate::spec::SpatialSpec;

/// `GDALRasterizeGeometries` on an in-memory dataset.
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalRasterizer;

impl Rasterize for GdalRasterizer {
    fn rasterize(
        &self,
        shapes: &[(Geometry<f64>, f64)],
        spec: &SpatialSpec,
        fill: f64,
        all_touched: bool,
        dtype: DataType,
    ) -> Result<Array2<f64>> {
        let dataset = Dataset::create_mem(spec, 1, dtype)?;
        let band = dataset.band(1)?;
        band.fill(fill)?;
        if shapes.is_empty() {
            return band.read();
        }

        let geometries = shapes
            .iter()
            .map(|(geometry, _)| OgrGeometry::from_geo(geometry))
            .collect::<Result<Vec<_>>>()?;
        let c_geometries: Vec<_> = geometries.iter().map(|g| g.c_geometry()).collect();
        let burn_values: Vec<f64> = shapes.iter().map(|(_, value)| *value).collect();
        let bands = [1i32];

        let mut options = CslStringList::new();
        options.set_name_value("ALL_TOUCHED", if all_touched { "TRUE" } else { "FALSE" })?;
        options.set_name_value("MERGE_ALG", "REPLACE")?;

        let rv = unsafe {
            // The C function takes `bands`, `geometries`, `burn_values`
            // and `options` without `const` in older bindings.
            gdal_sys::GDALRasterizeGeometries(
                dataset.c_dataset(),
                bands.len() as i32,
                bands.as_ptr() as _,
                c_geometries.len() as i32,
                c_geometries.as_ptr() as _,
                None,
                ptr::null_mut(),
                burn_values.as_ptr() as _,
                options.as_ptr() as _,
                None,
                ptr::null_mut(),
            )
        };
        if rv != CPLErr::CE_None {
            return Err(_last_cpl_err(rv));
        }
        band.read()
    }
}
