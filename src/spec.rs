//! Target grids.
//!
//! A [`SpatialSpec`] is the `(CRS, affine transform, shape)` triple that
//! identifies a raster grid. It is the first half of every cache key: two
//! specs address the same artifacts iff their [canonical
//! strings](SpatialSpec::canonical_string) are equal.
//!
//! ```
//! use geodata::spec::{Crs, Shape, SpatialSpec};
//!
//! let spec = SpatialSpec::new(
//!     Crs::from_epsg(4326),
//!     [-180.0, 0.1, 0.0, 90.0, 0.0, -0.1],
//!     Shape::new(1800, 3600).unwrap(),
//! )
//! .unwrap();
//! assert_eq!(
//!     spec.canonical_string(),
//!     "EPSG_4326/affine_0.1000_0.0000_-180.0000_0.0000_-0.1000_90.0000/1800-3600"
//! );
//! ```

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::engine::Warper;
use crate::errors::{GeodataError, Result};
use crate::raster::RasterMetadata;

/// A coordinate reference system identifier.
///
/// The crate treats the CRS as opaque: it is compared and serialized by its
/// string form. `EPSG` codes are normalized to the `EPSG:<code>` spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Crs(String);

impl Crs {
    pub fn new(definition: impl AsRef<str>) -> Result<Self> {
        let definition = definition.as_ref().trim();
        if definition.is_empty() {
            return Err(GeodataError::Configuration(
                "CRS definition is empty".to_string(),
            ));
        }
        if let Some(code) = parse_epsg(definition) {
            return Ok(Crs::from_epsg(code));
        }
        Ok(Crs(definition.to_string()))
    }

    pub fn from_epsg(code: u32) -> Self {
        Crs(format!("EPSG:{code}"))
    }

    /// The EPSG code, if this CRS is given as one.
    pub fn epsg(&self) -> Option<u32> {
        parse_epsg(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path fragment for this CRS: `:` and path separators become `_`.
    pub fn key_fragment(&self) -> String {
        self.0
            .chars()
            .map(|c| match c {
                ':' | '/' | '\\' => '_',
                c => c,
            })
            .collect()
    }
}

fn parse_epsg(definition: &str) -> Option<u32> {
    let (authority, code) = definition.split_once(':')?;
    if !authority.eq_ignore_ascii_case("epsg") {
        return None;
    }
    code.trim().parse().ok()
}

impl Display for Crs {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Crs {
    type Err = GeodataError;

    fn from_str(s: &str) -> Result<Self> {
        Crs::new(s)
    }
}

/// An affine transform.
///
/// A six-element array storing the coefficients of an affine transform used
/// in mapping coordinates between pixel/line `(P, L)` space and projected
/// `(Xp, Yp)` space, in GDAL ordering:
///
///   * `GeoTransform[0]`: x-coordinate of the upper-left corner of the upper-left pixel.
///   * `GeoTransform[1]`: W-E pixel resolution (pixel width).
///   * `GeoTransform[2]`: row rotation (typically zero).
///   * `GeoTransform[3]`: y-coordinate of the upper-left corner of the upper-left pixel.
///   * `GeoTransform[4]`: column rotation (typically zero).
///   * `GeoTransform[5]`: N-S pixel resolution (pixel height), negative value for a North-up image.
///
/// If a 3x3 transform matrix is defined as:
///
/// ```text
/// | a b c |
/// | d e f |
/// | 0 0 1 |
/// ```
///
/// the corresponding `GeoTransform` ordering is `[c, a, b, f, d, e]`. Cache
/// keys are written in `a..f` order.
pub type GeoTransform = [f64; 6];

/// Axis-aligned extent in CRS units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

/// Extension methods on [`GeoTransform`]
pub trait GeoTransformEx {
    /// Apply the transform to a pixel/line coordinate.
    fn apply(&self, pixel: f64, line: f64) -> (f64, f64);

    /// Invert the transform, for computing `(Xp, Yp) -> (P, L)`.
    fn invert(&self) -> Result<GeoTransform>;

    /// Extent covered by a grid of `shape` cells.
    fn bounds(&self, shape: Shape) -> Bounds;

    /// Coefficients in `a, b, c, d, e, f` order.
    fn to_affine(&self) -> [f64; 6];

    fn from_affine(affine: [f64; 6]) -> GeoTransform;

    /// North-up transform with square or rectangular cells.
    fn from_origin(west: f64, north: f64, x_size: f64, y_size: f64) -> GeoTransform;
}

impl GeoTransformEx for GeoTransform {
    fn apply(&self, pixel: f64, line: f64) -> (f64, f64) {
        (
            self[0] + pixel * self[1] + line * self[2],
            self[3] + pixel * self[4] + line * self[5],
        )
    }

    fn invert(&self) -> Result<GeoTransform> {
        let det = self[1] * self[5] - self[2] * self[4];
        if det.abs() < 1e-15 || !det.is_finite() {
            return Err(GeodataError::BadArgument(
                "Geo transform is uninvertible".to_string(),
            ));
        }
        let inv_det = 1.0 / det;
        Ok([
            (self[2] * self[3] - self[0] * self[5]) * inv_det,
            self[5] * inv_det,
            -self[2] * inv_det,
            (-self[1] * self[3] + self[0] * self[4]) * inv_det,
            -self[4] * inv_det,
            self[1] * inv_det,
        ])
    }

    fn bounds(&self, shape: Shape) -> Bounds {
        let (cols, rows) = (shape.cols as f64, shape.rows as f64);
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(cols, 0.0),
            self.apply(0.0, rows),
            self.apply(cols, rows),
        ];
        let mut bounds = Bounds {
            left: f64::INFINITY,
            bottom: f64::INFINITY,
            right: f64::NEG_INFINITY,
            top: f64::NEG_INFINITY,
        };
        for (x, y) in corners {
            bounds.left = bounds.left.min(x);
            bounds.right = bounds.right.max(x);
            bounds.bottom = bounds.bottom.min(y);
            bounds.top = bounds.top.max(y);
        }
        bounds
    }

    fn to_affine(&self) -> [f64; 6] {
        [self[1], self[2], self[0], self[4], self[5], self[3]]
    }

    fn from_affine(affine: [f64; 6]) -> GeoTransform {
        let [a, b, c, d, e, f] = affine;
        [c, a, b, f, d, e]
    }

    fn from_origin(west: f64, north: f64, x_size: f64, y_size: f64) -> GeoTransform {
        [west, x_size, 0.0, north, 0.0, -y_size]
    }
}

/// Raster dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
}

impl Shape {
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(GeodataError::Configuration(format!(
                "Shape must be positive, got ({rows}, {cols})"
            )));
        }
        Ok(Shape { rows, cols })
    }

    pub fn key_fragment(&self) -> String {
        format!("{}-{}", self.rows, self.cols)
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.rows, self.cols)
    }
}

/// Formats a transform coefficient with 4 decimals. Near-identical
/// coefficients produced by repeated float arithmetic collapse onto the same
/// string, and `-0.0000` is folded into `0.0000`.
fn coefficient_fragment(value: f64) -> String {
    let formatted = format!("{value:.4}");
    match formatted.strip_prefix('-') {
        Some(unsigned) if unsigned.chars().all(|c| c == '0' || c == '.') => unsigned.to_string(),
        _ => formatted,
    }
}

/// Path fragment for a transform: `affine_{a}_{b}_{c}_{d}_{e}_{f}`.
pub fn transform_fragment(transform: &GeoTransform) -> String {
    let parts: Vec<String> = transform
        .to_affine()
        .iter()
        .map(|v| coefficient_fragment(*v))
        .collect();
    format!("affine_{}", parts.join("_"))
}

/// A fully resolved target grid.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialSpec {
    crs: Crs,
    transform: GeoTransform,
    shape: Shape,
}

impl SpatialSpec {
    pub fn new(crs: Crs, transform: GeoTransform, shape: Shape) -> Result<Self> {
        if transform.iter().any(|v| !v.is_finite()) {
            return Err(GeodataError::Configuration(format!(
                "Transform coefficients must be finite, got {transform:?}"
            )));
        }
        Ok(SpatialSpec {
            crs,
            transform,
            shape,
        })
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn bounds(&self) -> Bounds {
        self.transform.bounds(self.shape)
    }

    /// The three path fragments `[crs, transform, shape]`.
    pub fn key_fragments(&self) -> [String; 3] {
        [
            self.crs.key_fragment(),
            transform_fragment(&self.transform),
            self.shape.key_fragment(),
        ]
    }

    pub fn canonical_string(&self) -> String {
        self.key_fragments().join("/")
    }

    /// Whether both specs address the same cached artifacts.
    pub fn same_grid(&self, other: &SpatialSpec) -> bool {
        self.canonical_string() == other.canonical_string()
    }
}

impl Display for SpatialSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

/// A partially specified target grid.
///
/// Missing parts are filled in from the source raster: nothing set means
/// "use the source grid as is"; a CRS alone means "the smallest grid at
/// native resolution enclosing the reprojected source bounds". Any other
/// partial target is rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetSpec {
    pub crs: Option<Crs>,
    pub transform: Option<GeoTransform>,
    pub shape: Option<Shape>,
}

impl TargetSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_crs(mut self, crs: Crs) -> Self {
        self.crs = Some(crs);
        self
    }

    pub fn with_transform(mut self, transform: GeoTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = Some(shape);
        self
    }

    /// The complete spec, when every part is set.
    ///
    /// Nothing set or a CRS alone are left for [`resolve`](Self::resolve).
    /// A transform or shape without the other parts, or parts that do not
    /// form a valid spec, are a configuration error.
    pub fn complete(&self) -> Result<Option<SpatialSpec>> {
        match (&self.crs, self.transform, self.shape) {
            (Some(crs), Some(transform), Some(shape)) => {
                SpatialSpec::new(crs.clone(), transform, shape).map(Some)
            }
            (_, None, None) => Ok(None),
            _ => Err(GeodataError::Configuration(format!(
                "Target needs a CRS, transform and shape together, got {self:?}"
            ))),
        }
    }

    /// Fill in missing parts from `source` metadata.
    ///
    /// `source_crs` stands in for the CRS when the source file does not
    /// record one; a CRS in the file takes precedence.
    pub fn resolve(
        &self,
        source: &RasterMetadata,
        source_crs: Option<&Crs>,
        warper: &dyn Warper,
    ) -> Result<SpatialSpec> {
        if let Some(spec) = self.complete()? {
            return Ok(spec);
        }

        let src_crs = source.crs.as_ref().or(source_crs).ok_or_else(|| {
            GeodataError::Configuration(
                "Cannot determine CRS of the source raster; provide a source CRS".to_string(),
            )
        })?;

        let Some(dst_crs) = &self.crs else {
            return SpatialSpec::new(src_crs.clone(), source.transform, source.shape);
        };

        let (transform, cols, rows) = warper.suggested_output(
            src_crs,
            dst_crs,
            source.shape.cols,
            source.shape.rows,
            source.bounds(),
        )?;
        SpatialSpec::new(dst_crs.clone(), transform, Shape::new(rows, cols)?)
    }
}

impl From<SpatialSpec> for TargetSpec {
    fn from(spec: SpatialSpec) -> Self {
        TargetSpec {
            crs: Some(spec.crs),
            transform: Some(spec.transform),
            shape: Some(spec.shape),
        }
    }
}

impl From<&SpatialSpec> for TargetSpec {
    fn from(spec: &SpatialSpec) -> Self {
        spec.clone().into()
    }
}
