use std::fmt::{self, Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use geo_types::Geometry;
use tracing::info;

use crate::engine::{FeatureTable, FieldKind, FieldValue};
use crate::errors::{GeodataError, Result};
use crate::key::KeyParams;
use crate::operation::atomic;
use crate::operation::{Operation, OperationContext};
use crate::options::RasterCreationOptions;
use crate::raster::{DataType, Raster};
use crate::spec::SpatialSpec;

/// Custom reader for the vector source of a [`Rasterizer`].
pub type TableLoader = Arc<dyn Fn(&Path, &SpatialSpec) -> Result<FeatureTable> + Send + Sync>;

/// Column name standing for the feature's position in the table, unless the
/// table has a column of that name.
pub const INDEX_COLUMN: &str = "index";

/// Burns one numeric attribute of a vector layer into a single-band grid.
///
/// The layer is read through the engine's vector reader, reprojected to
/// the target CRS, unless a custom [`TableLoader`] is set. Features without
/// a value in the column are skipped.
#[derive(Clone)]
pub struct Rasterizer {
    path: PathBuf,
    column: String,
    load_table: Option<TableLoader>,
    all_touched: bool,
    dtype: Option<DataType>,
    fill_value: Option<f64>,
    raster_creation_options: Option<RasterCreationOptions>,
}

impl Debug for Rasterizer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rasterizer")
            .field("path", &self.path)
            .field("column", &self.column)
            .field("custom_loader", &self.load_table.is_some())
            .field("all_touched", &self.all_touched)
            .field("dtype", &self.dtype)
            .field("fill_value", &self.fill_value)
            .finish_non_exhaustive()
    }
}

fn same_value(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

impl Rasterizer {
    /// Burns the feature position (the `index` column) by default. With an
    /// integer output the default fill is 0, which collides with the first
    /// feature, so that setup needs [`with_fill_value`](Self::with_fill_value).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Rasterizer {
            path: path.into(),
            column: INDEX_COLUMN.to_string(),
            load_table: None,
            all_touched: true,
            dtype: None,
            fill_value: None,
            raster_creation_options: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn with_table_loader(mut self, load_table: TableLoader) -> Self {
        self.load_table = Some(load_table);
        self
    }

    /// Burn every pixel a geometry touches rather than only those whose
    /// centre it covers. On by default.
    pub fn with_all_touched(mut self, all_touched: bool) -> Self {
        self.all_touched = all_touched;
        self
    }

    pub fn with_dtype(mut self, dtype: DataType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn with_fill_value(mut self, fill_value: f64) -> Self {
        self.fill_value = Some(fill_value);
        self
    }

    pub fn with_raster_creation_options(mut self, options: RasterCreationOptions) -> Self {
        self.raster_creation_options = Some(options);
        self
    }

    fn read_table(&self, spec: &SpatialSpec, ctx: &OperationContext) -> Result<FeatureTable> {
        match &self.load_table {
            Some(load) => load(&self.path, spec),
            None => ctx.engine.vectors.read(&self.path, spec.crs()),
        }
    }

    /// Turn the table into burnable `(geometry, value)` pairs and settle the
    /// output type and fill value.
    fn shapes(
        &self,
        table: FeatureTable,
        spec: &SpatialSpec,
    ) -> Result<(Vec<(Geometry<f64>, f64)>, DataType, f64)> {
        if table.crs.as_ref() != Some(spec.crs()) {
            return Err(GeodataError::CrsMismatch {
                expected: spec.crs().to_string(),
                found: table
                    .crs
                    .as_ref()
                    .map_or_else(|| "none".to_string(), |crs| crs.to_string()),
            });
        }

        let declared = table.column(&self.column);
        let by_position = declared.is_none() && self.column == INDEX_COLUMN;
        let kind = match declared {
            Some(kind) => kind,
            None if by_position => FieldKind::Integer,
            None => return Err(GeodataError::MissingColumn(self.column.clone())),
        };
        if !kind.is_numeric() {
            return Err(GeodataError::NonNumericColumn {
                column: self.column.clone(),
                found: kind.to_string(),
            });
        }

        let dtype = self.dtype.unwrap_or(match kind {
            FieldKind::Real => DataType::Float64,
            _ => DataType::Int64,
        });
        let fill = self.fill_value.unwrap_or_else(|| dtype.default_nodata());
        if !dtype.can_represent(fill) {
            return Err(GeodataError::Configuration(format!(
                "Fill value {fill} cannot be stored as {dtype}"
            )));
        }

        let mut shapes = Vec::with_capacity(table.len());
        for (position, feature) in table.features.into_iter().enumerate() {
            let value = if by_position {
                Some(position as f64)
            } else {
                feature.field(&self.column).and_then(FieldValue::as_f64)
            };
            let Some(value) = value else {
                continue;
            };
            if same_value(dtype.cast(value), fill) {
                return Err(GeodataError::FillValueCollision {
                    value: fill,
                    column: self.column.clone(),
                });
            }
            shapes.push((feature.geometry, value));
        }
        Ok((shapes, dtype, fill))
    }
}

impl Operation for Rasterizer {
    fn kind(&self) -> &'static str {
        "rasterize"
    }

    fn key_params(&self) -> KeyParams {
        let mut params = KeyParams::new();
        params.insert("path", self.path.display().to_string());
        if self.column != INDEX_COLUMN {
            params.insert("column", self.column.as_str());
        }
        if !self.all_touched {
            params.insert("all_touched", false);
        }
        params
            .insert_opt("dtype", self.dtype.map(|d| d.name()))
            .insert_opt("fill_value", self.fill_value);
        params
    }

    fn stackable(&self) -> bool {
        true
    }

    fn materialize(&self, dst: &Path, spec: &SpatialSpec, ctx: &OperationContext) -> Result<()> {
        if dst.exists() {
            return Err(GeodataError::ArtifactExists(dst.to_path_buf()));
        }
        info!(
            src = %self.path.display(),
            dst = %dst.display(),
            column = %self.column,
            "Rasterizing"
        );

        let table = self.read_table(spec, ctx)?;
        let (shapes, dtype, fill) = self.shapes(table, spec)?;
        let grid = ctx
            .engine
            .rasterizer
            .rasterize(&shapes, spec, fill, self.all_touched, dtype)?;

        let name = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.column.clone());
        let raster = Raster::from_band(name, grid, spec.clone(), dtype)?.with_nodata(Some(fill));

        let creation_options = self
            .raster_creation_options
            .clone()
            .unwrap_or_else(|| ctx.config.raster_creation_options.clone());
        creation_options.validate()?;

        atomic::write_atomic(dst, |tmp| {
            ctx.engine.driver.write(tmp, &raster, &creation_options)
        })
    }
}
