use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::engine::{ResampleAlg, WarpOptions, WarpRequest};
use crate::errors::{GeodataError, Result};
use crate::key::KeyParams;
use crate::operation::atomic;
use crate::operation::{Operation, OperationContext};
use crate::options::RasterCreationOptions;
use crate::raster::{DataType, RasterMetadata};
use crate::spec::{Crs, SpatialSpec};

/// Reprojects one raster source onto target grids.
///
/// Output data type, nodata, scales and offsets default to the source's.
/// Scales and offsets given as a single value apply to every output band.
///
/// ```
/// use geodata::engine::ResampleAlg;
/// use geodata::operation::Reprojector;
///
/// let op = Reprojector::new("data/elevation.tif")
///     .with_bands(vec![1])
///     .with_resampling(ResampleAlg::Bilinear);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Reprojector {
    src_path: PathBuf,
    src_crs: Option<Crs>,
    bands: Option<Vec<usize>>,
    resampling: ResampleAlg,
    dst_dtype: Option<DataType>,
    dst_nodata: Option<f64>,
    warp_options: Vec<(String, String)>,
    warp_mem_limit: Option<usize>,
    num_threads: Option<usize>,
    scales: Option<Vec<f64>>,
    offsets: Option<Vec<f64>>,
    raster_creation_options: Option<RasterCreationOptions>,
}

/// Everything derived from the source before warping.
struct Plan {
    src_crs: Crs,
    src_nodata: f64,
    bands: Vec<usize>,
    dtype: DataType,
    nodata: f64,
    scales: Vec<f64>,
    offsets: Vec<f64>,
}

fn nodata_eq(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

fn per_band(kind: &str, values: &[f64], count: usize) -> Result<Vec<f64>> {
    match values {
        [single] => Ok(vec![*single; count]),
        values if values.len() == count => Ok(values.to_vec()),
        values => Err(GeodataError::Configuration(format!(
            "expected 1 or {count} {kind}, got {}",
            values.len()
        ))),
    }
}

impl Reprojector {
    pub fn new(src_path: impl Into<PathBuf>) -> Self {
        Reprojector {
            src_path: src_path.into(),
            src_crs: None,
            bands: None,
            resampling: ResampleAlg::default(),
            dst_dtype: None,
            dst_nodata: None,
            warp_options: Vec::new(),
            warp_mem_limit: None,
            num_threads: None,
            scales: None,
            offsets: None,
            raster_creation_options: None,
        }
    }

    pub fn src_path(&self) -> &Path {
        &self.src_path
    }

    /// CRS to assume when the source file does not carry one.
    pub fn with_src_crs(mut self, crs: Crs) -> Self {
        self.src_crs = Some(crs);
        self
    }

    /// Source bands to reproject, 1-based, in output order. All bands by
    /// default.
    pub fn with_bands(mut self, bands: Vec<usize>) -> Self {
        self.bands = Some(bands);
        self
    }

    pub fn with_band(self, band: usize) -> Self {
        self.with_bands(vec![band])
    }

    pub fn with_resampling(mut self, resampling: ResampleAlg) -> Self {
        self.resampling = resampling;
        self
    }

    pub fn with_dst_dtype(mut self, dtype: DataType) -> Self {
        self.dst_dtype = Some(dtype);
        self
    }

    pub fn with_dst_nodata(mut self, nodata: f64) -> Self {
        self.dst_nodata = Some(nodata);
        self
    }

    /// Extra `KEY=VALUE` option handed to the warper as is.
    pub fn with_warp_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.warp_options.push((key.into(), value.into()));
        self
    }

    pub fn with_warp_mem_limit(mut self, bytes: usize) -> Self {
        self.warp_mem_limit = Some(bytes);
        self
    }

    pub fn with_num_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    pub fn with_scales(mut self, scales: Vec<f64>) -> Self {
        self.scales = Some(scales);
        self
    }

    pub fn with_offsets(mut self, offsets: Vec<f64>) -> Self {
        self.offsets = Some(offsets);
        self
    }

    pub fn with_raster_creation_options(mut self, options: RasterCreationOptions) -> Self {
        self.raster_creation_options = Some(options);
        self
    }

    fn open_source(&self, ctx: &OperationContext) -> Result<RasterMetadata> {
        let meta = ctx.engine.driver.open(&self.src_path)?;
        if meta.subdatasets.len() > 1 {
            return Err(GeodataError::MultiVariable {
                path: self.src_path.clone(),
                subdatasets: meta.subdatasets,
            });
        }
        Ok(meta)
    }

    fn plan(&self, meta: &RasterMetadata) -> Result<Plan> {
        let src_crs = meta
            .crs
            .clone()
            .or_else(|| self.src_crs.clone())
            .ok_or_else(|| {
                GeodataError::Configuration(format!(
                    "Cannot determine CRS for {}. Provide a source CRS.",
                    self.src_path.display()
                ))
            })?;

        let src_nodata = meta.nodata.unwrap_or_else(|| meta.dtype.default_nodata());

        let bands = match &self.bands {
            Some(bands) => bands.clone(),
            None => (1..=meta.band_count).collect(),
        };
        if bands.is_empty() {
            return Err(GeodataError::Configuration(
                "At least one band must be selected".to_string(),
            ));
        }
        if let Some(bad) = bands.iter().find(|b| **b == 0 || **b > meta.band_count) {
            return Err(GeodataError::BadArgument(format!(
                "Band {bad} out of range for {} ({} bands)",
                self.src_path.display(),
                meta.band_count
            )));
        }

        let dtype = self.dst_dtype.unwrap_or(meta.dtype);
        let nodata = match self.dst_nodata {
            Some(nodata) if !dtype.can_represent(nodata) => {
                return Err(GeodataError::Configuration(format!(
                    "Nodata value {nodata} cannot be stored as {dtype}"
                )))
            }
            Some(nodata) => nodata,
            None if dtype.can_represent(src_nodata) => src_nodata,
            None => dtype.default_nodata(),
        };

        let source_band = |values: &[f64], band: usize, default: f64| {
            values.get(band - 1).copied().unwrap_or(default)
        };
        let scales = match &self.scales {
            Some(scales) => per_band("scales", scales, bands.len())?,
            None => bands
                .iter()
                .map(|b| source_band(&meta.scales, *b, 1.0))
                .collect(),
        };
        let offsets = match &self.offsets {
            Some(offsets) => per_band("offsets", offsets, bands.len())?,
            None => bands
                .iter()
                .map(|b| source_band(&meta.offsets, *b, 0.0))
                .collect(),
        };

        Ok(Plan {
            src_crs,
            src_nodata,
            bands,
            dtype,
            nodata,
            scales,
            offsets,
        })
    }

    /// Whether the artifact would hold exactly the source data.
    fn is_identity(&self, meta: &RasterMetadata, plan: &Plan, spec: &SpatialSpec) -> bool {
        let all_bands: Vec<usize> = (1..=meta.band_count).collect();
        self.scales.is_none()
            && self.offsets.is_none()
            && self.src_path.is_file()
            && meta.crs.as_ref() == Some(spec.crs())
            && meta
                .spatial_spec(None)
                .is_some_and(|source| source.same_grid(spec))
            && plan.bands == all_bands
            && plan.dtype == meta.dtype
            && meta.nodata.is_some_and(|n| nodata_eq(n, plan.nodata))
    }
}

impl Operation for Reprojector {
    fn kind(&self) -> &'static str {
        "reproject"
    }

    fn key_params(&self) -> KeyParams {
        let mut params = KeyParams::new();
        params
            .insert("src_path", self.src_path.display().to_string())
            .insert_opt("src_crs", self.src_crs.as_ref().map(Crs::key_fragment))
            .insert_opt("bands", self.bands.clone())
            .insert_opt("dst_dtype", self.dst_dtype.map(|d| d.name()))
            .insert_opt("dst_nodata", self.dst_nodata)
            .insert_opt("scales", self.scales.clone())
            .insert_opt("offsets", self.offsets.clone());
        if self.resampling != ResampleAlg::default() {
            params.insert("resampling", self.resampling.name());
        }
        for (name, value) in &self.warp_options {
            params.insert(format!("warp_{name}"), value.as_str());
        }
        params
    }

    fn stackable(&self) -> bool {
        true
    }

    fn source_metadata(&self, ctx: &OperationContext) -> Result<Option<RasterMetadata>> {
        let mut meta = self.open_source(ctx)?;
        if meta.crs.is_none() {
            meta.crs = self.src_crs.clone();
        }
        Ok(Some(meta))
    }

    fn materialize(&self, dst: &Path, spec: &SpatialSpec, ctx: &OperationContext) -> Result<()> {
        if dst.exists() {
            return Err(GeodataError::ArtifactExists(dst.to_path_buf()));
        }
        info!(
            src = %self.src_path.display(),
            dst = %dst.display(),
            "Reprojecting"
        );

        let meta = self.open_source(ctx)?;
        let plan = self.plan(&meta)?;

        if self.is_identity(&meta, &plan, spec) {
            debug!(src = %self.src_path.display(), "Source matches target, linking");
            return atomic::symlink_noclobber(&self.src_path, dst);
        }

        let creation_options = self
            .raster_creation_options
            .clone()
            .unwrap_or_else(|| ctx.config.raster_creation_options.clone());
        creation_options.validate()?;

        let options = WarpOptions {
            resampling: self.resampling,
            memory_limit: self.warp_mem_limit.unwrap_or(ctx.config.warp_mem_limit),
            num_threads: self.num_threads.unwrap_or(ctx.config.num_threads),
            extra: self.warp_options.clone(),
        };

        atomic::write_atomic(dst, |tmp| {
            ctx.engine.warper.warp(&WarpRequest {
                src_path: self.src_path.clone(),
                src_crs: plan.src_crs.clone(),
                src_nodata: plan.src_nodata,
                bands: plan.bands.clone(),
                dst_path: tmp.to_path_buf(),
                dst_spec: spec.clone(),
                dst_dtype: plan.dtype,
                dst_nodata: plan.nodata,
                scales: plan.scales.clone(),
                offsets: plan.offsets.clone(),
                options,
                creation_options,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::{Engine, RasterDriver};
    use crate::native::TiffDriver;
    use crate::raster::Raster;
    use crate::spec::{GeoTransform, GeoTransformEx, Shape};
    use crate::test_utils::{write_raster, SubdatasetDriver, TempFixture};
    use ndarray::Array3;
    use std::sync::Arc;

    fn source_spec() -> SpatialSpec {
        SpatialSpec::new(
            Crs::from_epsg(3035),
            GeoTransform::from_origin(0.0, 4.0, 1.0, 1.0),
            Shape::new(4, 4).unwrap(),
        )
        .unwrap()
    }

    fn write_source(fixture: &TempFixture, bands: usize) {
        let data = Array3::from_shape_fn((bands, 4, 4), |(b, r, c)| (b * 100 + r * 4 + c) as f64);
        let raster = Raster::new("src", data, source_spec(), DataType::Int16)
            .unwrap()
            .with_nodata(Some(-1.0));
        write_raster(fixture.path(), &raster);
    }

    fn ctx() -> OperationContext {
        OperationContext::new(Engine::native(), Config::default())
    }

    #[test]
    fn key_params_only_when_set() {
        assert_eq!(
            Reprojector::new("a.tif").key_params().to_string(),
            "src_path=\"a.tif\""
        );
        let params = Reprojector::new("a.tif")
            .with_band(2)
            .with_resampling(ResampleAlg::Bilinear)
            .with_num_threads(8)
            .key_params();
        assert_eq!(
            params.to_string(),
            "bands=[2], resampling=\"bilinear\", src_path=\"a.tif\""
        );
    }

    #[test]
    fn source_and_warp_settings_are_keyed() {
        let params = Reprojector::new("data/a.tif")
            .with_src_crs(Crs::from_epsg(4326))
            .with_warp_option("SAMPLE_GRID", "YES")
            .key_params();
        assert_eq!(
            params.fragments().unwrap(),
            vec!["src_crs=EPSG_4326", "src_path=data_a.tif", "warp_SAMPLE_GRID=YES"]
        );
        assert_ne!(
            Reprojector::new("a.tif").key_params(),
            Reprojector::new("b.tif").key_params()
        );
    }

    #[test]
    fn source_metadata_with_crs_override() {
        let src = TempFixture::empty("src.tif");
        write_source(&src, 1);
        let meta = Reprojector::new(src.path())
            .with_src_crs(Crs::from_epsg(4326))
            .source_metadata(&ctx())
            .unwrap()
            .unwrap();
        // the file's own CRS wins
        assert_eq!(meta.crs, Some(Crs::from_epsg(3035)));
    }

    #[cfg(unix)]
    #[test]
    fn identical_grid_is_linked() {
        let src = TempFixture::empty("src.tif");
        let dst = TempFixture::empty("dst.tif");
        write_source(&src, 2);
        Reprojector::new(src.path())
            .materialize(dst.path(), &source_spec(), &ctx())
            .unwrap();
        let link = std::fs::symlink_metadata(dst.path()).unwrap();
        assert!(link.file_type().is_symlink());
        let out = TiffDriver.read(dst.path()).unwrap();
        assert_eq!(out.band_count(), 2);
        assert_eq!(out.data()[[1, 3, 3]], 115.0);
    }

    #[test]
    fn overrides_force_a_real_warp() {
        let src = TempFixture::empty("src.tif");
        let dst = TempFixture::empty("dst.tif");
        write_source(&src, 2);
        Reprojector::new(src.path())
            .with_band(2)
            .with_dst_dtype(DataType::Float32)
            .with_scales(vec![0.5])
            .materialize(dst.path(), &source_spec(), &ctx())
            .unwrap();
        assert!(!std::fs::symlink_metadata(dst.path())
            .unwrap()
            .file_type()
            .is_symlink());
        let out = TiffDriver.read(dst.path()).unwrap();
        assert_eq!(out.band_count(), 1);
        assert_eq!(out.dtype(), DataType::Float32);
        assert_eq!(out.scales(), &[0.5]);
        assert_eq!(out.nodata(), Some(-1.0));
        assert_eq!(out.data()[[0, 0, 1]], 101.0);
    }

    #[test]
    fn existing_destination_is_rejected() {
        let src = TempFixture::empty("src.tif");
        let dst = TempFixture::empty("dst.tif");
        write_source(&src, 1);
        std::fs::write(dst.path(), b"x").unwrap();
        let result = Reprojector::new(src.path()).materialize(dst.path(), &source_spec(), &ctx());
        assert!(matches!(result, Err(GeodataError::ArtifactExists(_))));
    }

    #[test]
    fn bad_band_is_rejected() {
        let src = TempFixture::empty("src.tif");
        let dst = TempFixture::empty("dst.tif");
        write_source(&src, 1);
        let result = Reprojector::new(src.path())
            .with_band(3)
            .materialize(dst.path(), &source_spec(), &ctx());
        assert!(matches!(result, Err(GeodataError::BadArgument(_))));
        assert!(!dst.path().exists());
    }

    #[test]
    fn unrepresentable_nodata_is_rejected() {
        let src = TempFixture::empty("src.tif");
        let dst = TempFixture::empty("dst.tif");
        write_source(&src, 1);
        let result = Reprojector::new(src.path())
            .with_dst_dtype(DataType::UInt8)
            .with_dst_nodata(-5.0)
            .materialize(dst.path(), &source_spec(), &ctx());
        assert!(matches!(result, Err(GeodataError::Configuration(_))));
    }

    #[test]
    fn multi_variable_source_is_rejected() {
        let fixture = TempFixture::empty("climate.nc");
        let driver = SubdatasetDriver::new(fixture.path(), &["tas", "pr"], 3, source_spec());
        let ctx = OperationContext::new(
            Engine::native_with_driver(Arc::new(driver)),
            Config::default(),
        );
        let dst = TempFixture::empty("dst.tif");
        let err = Reprojector::new(fixture.path())
            .materialize(dst.path(), &source_spec(), &ctx)
            .unwrap_err();
        match err {
            GeodataError::MultiVariable { subdatasets, .. } => {
                assert_eq!(subdatasets.len(), 2);
                assert!(subdatasets[0].ends_with(":tas"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn single_variable_container_is_read() {
        let fixture = TempFixture::empty("runoff.nc");
        let driver = SubdatasetDriver::new(fixture.path(), &["runoff"], 2, source_spec());
        let ctx = OperationContext::new(
            Engine::native_with_driver(Arc::new(driver)),
            Config::default(),
        );
        let dst = TempFixture::empty("dst.tif");
        Reprojector::new(fixture.path())
            .with_band(2)
            .materialize(dst.path(), &source_spec(), &ctx)
            .unwrap();
        let out = TiffDriver.read(dst.path()).unwrap();
        assert_eq!(out.band_count(), 1);
        assert!(out.data().iter().all(|v| *v == 1.0));
    }

    #[test]
    fn missing_crs_needs_override() {
        let meta = RasterMetadata {
            crs: None,
            transform: *source_spec().transform(),
            shape: source_spec().shape(),
            dtype: DataType::Float32,
            band_count: 1,
            nodata: None,
            scales: vec![],
            offsets: vec![],
            subdatasets: vec![],
        };
        let op = Reprojector::new("a.tif");
        assert!(matches!(
            op.plan(&meta),
            Err(GeodataError::Configuration(_))
        ));
        let plan = op.with_src_crs(Crs::from_epsg(4326)).plan(&meta).unwrap();
        assert_eq!(plan.src_crs, Crs::from_epsg(4326));
        assert!(plan.nodata.is_nan());
        assert_eq!(plan.scales, vec![1.0]);
    }
}
