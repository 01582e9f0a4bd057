use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use geo_types::Rect;
use geodata::native::{MemoryVectorReader, TiffDriver};
use geodata::{
    load, Config, Crs, DataLoader, DataType, Engine, Feature, FeatureTable, FieldKind,
    FieldValue, GeodataError, GeoTransform, GeoTransformEx, Raster, RasterDriver,
    RasterCreationOptions, RasterLoader, RasterMetadata, Rasterizer, ResampleAlg, Reprojector,
    Result, Shape, SpatialSpec,
};
use ndarray::Array3;

fn source_spec() -> SpatialSpec {
    SpatialSpec::new(
        Crs::from_epsg(3035),
        GeoTransform::from_origin(0.0, 4.0, 1.0, 1.0),
        Shape::new(4, 4).unwrap(),
    )
    .unwrap()
}

fn write_source(path: &Path) {
    let data = Array3::from_shape_fn((2, 4, 4), |(b, r, c)| (b * 100 + r * 4 + c) as f64);
    let raster = Raster::new("source", data, source_spec(), DataType::Float32)
        .unwrap()
        .with_nodata(Some(-9999.0));
    TiffDriver
        .write(path, &raster, &RasterCreationOptions::default())
        .unwrap();
}

fn loader(type_name: &str, cache: &Path) -> DataLoader {
    DataLoader::new(type_name)
        .with_engine(Engine::native())
        .with_config(Config::default().with_path_data_processed(cache))
}

#[cfg(unix)]
#[test]
fn identical_grid_links_source() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("source.tif");
    write_source(&src);
    let loader = loader("SourceLoader", &dir.path().join("cache"))
        .with_operation(Reprojector::new(&src));

    let raster = load(&loader, &source_spec().into()).unwrap();
    let artifact = loader.processed_path(&source_spec()).unwrap();
    assert!(fs::symlink_metadata(&artifact)
        .unwrap()
        .file_type()
        .is_symlink());
    assert_eq!(fs::canonicalize(&artifact).unwrap(), fs::canonicalize(&src).unwrap());
    assert_eq!(raster.band_count(), 2);
    assert_eq!(raster.data()[[1, 3, 3]], 115.0);
}

#[test]
fn band_selection_is_warped() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("source.tif");
    write_source(&src);
    let loader = loader("SecondBandLoader", &dir.path().join("cache"))
        .with_operation(Reprojector::new(&src).with_band(2));

    let raster = load(&loader, &source_spec().into()).unwrap();
    let artifact = loader.processed_path(&source_spec()).unwrap();
    assert!(!fs::symlink_metadata(&artifact)
        .unwrap()
        .file_type()
        .is_symlink());
    assert_eq!(raster.band_count(), 1);
    assert_eq!(raster.data()[[0, 0, 0]], 100.0);
    assert_eq!(raster.nodata(), Some(-9999.0));
}

#[test]
fn coarser_grid_nearest() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("source.tif");
    write_source(&src);
    let loader = loader("CoarseLoader", &dir.path().join("cache")).with_operation(
        Reprojector::new(&src)
            .with_band(1)
            .with_resampling(ResampleAlg::NearestNeighbour),
    );
    let coarse = SpatialSpec::new(
        Crs::from_epsg(3035),
        GeoTransform::from_origin(0.0, 4.0, 2.0, 2.0),
        Shape::new(2, 2).unwrap(),
    )
    .unwrap();

    let raster = load(&loader, &coarse.into()).unwrap();
    assert_eq!(raster.spec().shape(), Shape::new(2, 2).unwrap());
    // centres of the coarse pixels fall on source pixels (1, 1), (1, 3), ...
    assert_eq!(raster.data()[[0, 0, 0]], 5.0);
    assert_eq!(raster.data()[[0, 0, 1]], 7.0);
    assert_eq!(raster.data()[[0, 1, 0]], 13.0);
    assert_eq!(raster.data()[[0, 1, 1]], 15.0);
}

const PARCELS: &str = "parcels.gpkg";

fn parcels(crs: Crs) -> FeatureTable {
    FeatureTable::new(Some(crs))
        .with_column("yield", FieldKind::Real)
        .with_column("class", FieldKind::Integer)
        .with_column("owner", FieldKind::String)
        .with_feature(
            Feature::new(Rect::new((0.0, 0.0), (2.0, 4.0)))
                .with_field("yield", FieldValue::RealValue(1.5))
                .with_field("class", FieldValue::IntegerValue(3))
                .with_field("owner", FieldValue::StringValue("a".into())),
        )
        .with_feature(
            Feature::new(Rect::new((2.0, 0.0), (4.0, 2.0)))
                .with_field("class", FieldValue::IntegerValue(4))
                .with_field("owner", FieldValue::StringValue("b".into())),
        )
}

fn parcel_loader(type_name: &str, cache: &Path, table: FeatureTable, op: Rasterizer) -> DataLoader {
    let vectors = MemoryVectorReader::new().with_table(PARCELS, table);
    loader(type_name, cache)
        .with_engine(Engine::native().with_vectors(Arc::new(vectors)))
        .with_operation(op)
}

#[test]
fn rasterize_real_column() {
    let cache = tempfile::tempdir().unwrap();
    let loader = parcel_loader(
        "YieldLoader",
        cache.path(),
        parcels(Crs::from_epsg(3035)),
        Rasterizer::new(PARCELS)
            .with_column("yield")
            .with_all_touched(false),
    );
    let raster = load(&loader, &source_spec().into()).unwrap();
    assert_eq!(raster.dtype(), DataType::Float64);
    let band = raster.band(0).unwrap();
    assert_eq!(band[[0, 0]], 1.5);
    assert_eq!(band[[3, 1]], 1.5);
    // null value and outside of all features
    assert!(band[[3, 3]].is_nan());
    assert!(band[[0, 3]].is_nan());
}

#[test]
fn rasterize_integer_column_with_fill() {
    let cache = tempfile::tempdir().unwrap();
    let loader = parcel_loader(
        "ClassLoader",
        cache.path(),
        parcels(Crs::from_epsg(3035)),
        Rasterizer::new(PARCELS)
            .with_column("class")
            .with_dtype(DataType::Int16)
            .with_fill_value(-1.0)
            .with_all_touched(false),
    );
    let raster = load(&loader, &source_spec().into()).unwrap();
    assert_eq!(raster.dtype(), DataType::Int16);
    assert_eq!(raster.nodata(), Some(-1.0));
    let band = raster.band(0).unwrap();
    assert_eq!(band[[0, 0]], 3.0);
    assert_eq!(band[[3, 3]], 4.0);
    assert_eq!(band[[0, 3]], -1.0);
}

#[test]
fn rasterize_errors() {
    let cache = tempfile::tempdir().unwrap();

    let collision = parcel_loader(
        "ClassLoader",
        cache.path(),
        parcels(Crs::from_epsg(3035)),
        Rasterizer::new(PARCELS).with_column("class").with_fill_value(4.0),
    );
    let err = load(&collision, &source_spec().into()).unwrap_err();
    assert!(matches!(err, GeodataError::FillValueCollision { .. }));
    assert!(!collision.is_processed(&source_spec()).unwrap());

    let text = parcel_loader(
        "OwnerLoader",
        cache.path(),
        parcels(Crs::from_epsg(3035)),
        Rasterizer::new(PARCELS).with_column("owner"),
    );
    let err = load(&text, &source_spec().into()).unwrap_err();
    assert!(matches!(err, GeodataError::NonNumericColumn { .. }));

    let other_crs = parcel_loader(
        "ClassLoader",
        cache.path(),
        parcels(Crs::from_epsg(4326)),
        Rasterizer::new(PARCELS).with_column("class"),
    );
    let err = load(&other_crs, &source_spec().into()).unwrap_err();
    assert!(matches!(err, GeodataError::CrsMismatch { .. }));
}

/// Serves a NetCDF-like container holding two variables.
struct ContainerDriver {
    container: PathBuf,
}

impl ContainerDriver {
    fn variable(&self, name: &str) -> PathBuf {
        PathBuf::from(format!("NETCDF:{}:{name}", self.container.display()))
    }

    fn raster(&self, path: &Path) -> Option<Raster> {
        ["tas", "pr"].iter().position(|v| self.variable(v) == path).map(|i| {
            let data = Array3::from_elem((3, 4, 4), i as f64);
            Raster::new("variable", data, source_spec(), DataType::Float32).unwrap()
        })
    }
}

impl RasterDriver for ContainerDriver {
    fn open(&self, path: &Path) -> Result<RasterMetadata> {
        if path == self.container {
            let mut meta = self.raster(&self.variable("tas")).unwrap().metadata();
            meta.subdatasets = vec![
                self.variable("tas").display().to_string(),
                self.variable("pr").display().to_string(),
            ];
            return Ok(meta);
        }
        match self.raster(path) {
            Some(raster) => Ok(raster.metadata()),
            None => TiffDriver.open(path),
        }
    }

    fn read(&self, path: &Path) -> Result<Raster> {
        match self.raster(path) {
            Some(raster) => Ok(raster),
            None => TiffDriver.read(path),
        }
    }

    fn write(&self, path: &Path, raster: &Raster, options: &RasterCreationOptions) -> Result<()> {
        TiffDriver.write(path, raster, options)
    }
}

#[test]
fn multi_variable_container() {
    let dir = tempfile::tempdir().unwrap();
    let container = dir.path().join("climate.nc");
    fs::write(&container, b"").unwrap();
    let driver = Arc::new(ContainerDriver {
        container: container.clone(),
    });
    let engine = Engine::native_with_driver(driver.clone());
    let cache = dir.path().join("cache");

    let whole = loader("ClimateLoader", &cache)
        .with_engine(engine.clone())
        .with_operation(Reprojector::new(&container));
    match load(&whole, &source_spec().into()).unwrap_err() {
        GeodataError::MultiVariable { subdatasets, .. } => {
            assert_eq!(subdatasets.len(), 2);
            assert!(subdatasets[1].ends_with(":pr"));
        }
        other => panic!("unexpected error {other:?}"),
    }

    let precipitation = loader("PrecipitationLoader", &cache)
        .with_engine(engine)
        .with_operation(Reprojector::new(driver.variable("pr")));
    let raster = load(&precipitation, &source_spec().into()).unwrap();
    assert_eq!(raster.band_count(), 3);
    assert!(raster.data().iter().all(|v| *v == 1.0));
}
