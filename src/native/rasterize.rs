use geo_types::{Coord, Geometry, LineString, Polygon};
use ndarray::Array2;

use crate::engine::Rasterize;
use crate::errors::Result;
use crate::raster::DataType;
use crate::spec::{GeoTransform, GeoTransformEx, SpatialSpec};

/// Scanline rasterizer over `geo-types` geometries.
///
/// Polygons burn the pixels whose centre lies inside them (even-odd rule,
/// so holes are honoured); with `all_touched` every pixel crossed by a ring
/// is burned as well. Lines burn every pixel they cross, points the pixel
/// containing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanlineRasterizer;

const EPSILON: f64 = 1e-9;

struct Canvas<'a> {
    grid: &'a mut Array2<f64>,
    to_pixel: GeoTransform,
    all_touched: bool,
}

impl Canvas<'_> {
    fn rows(&self) -> usize {
        self.grid.nrows()
    }

    fn cols(&self) -> usize {
        self.grid.ncols()
    }

    fn pixel(&self, coord: Coord<f64>) -> (f64, f64) {
        self.to_pixel.apply(coord.x, coord.y)
    }

    fn set(&mut self, row: isize, col: isize, value: f64) {
        if row >= 0 && col >= 0 && (row as usize) < self.rows() && (col as usize) < self.cols() {
            self.grid[[row as usize, col as usize]] = value;
        }
    }

    fn burn(&mut self, geometry: &Geometry<f64>, value: f64) {
        match geometry {
            Geometry::Point(p) => self.burn_point(p.0, value),
            Geometry::MultiPoint(mp) => mp.iter().for_each(|p| self.burn_point(p.0, value)),
            Geometry::Line(l) => self.burn_segment(l.start, l.end, value),
            Geometry::LineString(ls) => self.burn_line_string(ls, value),
            Geometry::MultiLineString(mls) => {
                mls.iter().for_each(|ls| self.burn_line_string(ls, value))
            }
            Geometry::Polygon(p) => self.burn_polygon(p, value),
            Geometry::MultiPolygon(mp) => mp.iter().for_each(|p| self.burn_polygon(p, value)),
            Geometry::Rect(r) => self.burn_polygon(&r.to_polygon(), value),
            Geometry::Triangle(t) => self.burn_polygon(&t.to_polygon(), value),
            Geometry::GeometryCollection(gc) => gc.iter().for_each(|g| self.burn(g, value)),
        }
    }

    fn burn_point(&mut self, coord: Coord<f64>, value: f64) {
        let (x, y) = self.pixel(coord);
        self.set(y.floor() as isize, x.floor() as isize, value);
    }

    fn burn_line_string(&mut self, line: &LineString<f64>, value: f64) {
        for segment in line.lines() {
            self.burn_segment(segment.start, segment.end, value);
        }
    }

    /// Burns every pixel the segment passes through.
    fn burn_segment(&mut self, start: Coord<f64>, end: Coord<f64>, value: f64) {
        let a = self.pixel(start);
        let b = self.pixel(end);
        let (min_col, max_col) = (a.0.min(b.0).floor(), a.0.max(b.0).floor());
        let (min_row, max_row) = (a.1.min(b.1).floor(), a.1.max(b.1).floor());
        let min_col = min_col.max(0.0) as isize;
        let min_row = min_row.max(0.0) as isize;
        let max_col = max_col.min(self.cols() as f64 - 1.0) as isize;
        let max_row = max_row.min(self.rows() as f64 - 1.0) as isize;

        for row in min_row..=max_row {
            for col in min_col..=max_col {
                if crosses_cell(a, b, col as f64, row as f64) {
                    self.set(row, col, value);
                }
            }
        }
    }

    fn burn_polygon(&mut self, polygon: &Polygon<f64>, value: f64) {
        let rings: Vec<Vec<(f64, f64)>> = std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .map(|ring| ring.coords().map(|c| self.pixel(*c)).collect())
            .collect();

        let (min_y, max_y) = rings
            .iter()
            .flatten()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, y)| {
                (lo.min(*y), hi.max(*y))
            });
        if !min_y.is_finite() {
            return;
        }

        let first_row = (min_y - 0.5).ceil().max(0.0) as usize;
        let last_row = ((max_y - 0.5).floor()).min(self.rows() as f64 - 1.0);
        if last_row >= 0.0 {
            let mut crossings = Vec::new();
            for row in first_row..=last_row as usize {
                let yc = row as f64 + 0.5;
                crossings.clear();
                for ring in &rings {
                    for edge in ring.windows(2) {
                        let ((x1, y1), (x2, y2)) = (edge[0], edge[1]);
                        if (y1 <= yc) != (y2 <= yc) {
                            crossings.push(x1 + (yc - y1) * (x2 - x1) / (y2 - y1));
                        }
                    }
                }
                crossings.sort_by(f64::total_cmp);
                for span in crossings.chunks_exact(2) {
                    let first_col = (span[0] - 0.5).ceil().max(0.0) as isize;
                    let end_col = (span[1] - 0.5).ceil().min(self.cols() as f64) as isize;
                    for col in first_col..end_col {
                        self.set(row as isize, col, value);
                    }
                }
            }
        }

        if self.all_touched {
            for ring in polygon.interiors().iter().chain(std::iter::once(polygon.exterior())) {
                self.burn_line_string(ring, value);
            }
        }
    }
}

/// Whether segment `a`-`b` has a stretch of positive length inside the cell
/// `[col, col + 1] x [row, row + 1]`, or a degenerate segment lies inside it.
fn crosses_cell(a: (f64, f64), b: (f64, f64), col: f64, row: f64) -> bool {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [
        (-dx, a.0 - col),
        (dx, col + 1.0 - a.0),
        (-dy, a.1 - row),
        (dy, row + 1.0 - a.1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return false;
            }
        } else {
            let t = q / p;
            if p < 0.0 {
                t0 = t0.max(t);
            } else {
                t1 = t1.min(t);
            }
        }
    }
    if t0 > t1 {
        return false;
    }
    // midpoint of the clipped stretch must be strictly inside the cell so
    // that edges running along a cell border do not leak into neighbours
    let t = (t0 + t1) / 2.0;
    let (x, y) = (a.0 + t * dx, a.1 + t * dy);
    x > col + EPSILON && x < col + 1.0 - EPSILON && y > row + EPSILON && y < row + 1.0 - EPSILON
}

impl Rasterize for ScanlineRasterizer {
    fn rasterize(
        &self,
        shapes: &[(Geometry<f64>, f64)],
        spec: &SpatialSpec,
        fill: f64,
        all_touched: bool,
        dtype: DataType,
    ) -> Result<Array2<f64>> {
        let shape = spec.shape();
        let mut grid = Array2::from_elem((shape.rows, shape.cols), fill);
        let mut canvas = Canvas {
            grid: &mut grid,
            to_pixel: spec.transform().invert()?,
            all_touched,
        };
        for (geometry, value) in shapes {
            canvas.burn(geometry, dtype.cast(*value));
        }
        Ok(grid)
    }
}
