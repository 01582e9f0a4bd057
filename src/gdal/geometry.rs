//! Conversions between `geo-types` and OGR geometries.

use gdal_sys::{self, OGRErr, OGRGeometryH, OGRwkbGeometryType};
use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};

use super::srs::SpatialRef;
use super::utils::_last_null_pointer_err;
use crate::errors::{GeodataError, Result};

/// Owned `OGRGeometryH`.
pub struct OgrGeometry(OGRGeometryH);

impl Drop for OgrGeometry {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { gdal_sys::OGR_G_DestroyGeometry(self.0) };
        }
    }
}

impl OgrGeometry {
    fn empty(wkb_type: OGRwkbGeometryType::Type) -> Result<OgrGeometry> {
        let c_geom = unsafe { gdal_sys::OGR_G_CreateGeometry(wkb_type) };
        if c_geom.is_null() {
            return Err(_last_null_pointer_err("OGR_G_CreateGeometry"));
        }
        Ok(OgrGeometry(c_geom))
    }

    /// Takes ownership of a geometry GDAL handed out, e.g. via
    /// `OGR_F_StealGeometry`.
    ///
    /// # Safety
    /// `c_geom` must be an owned, valid geometry handle.
    pub unsafe fn from_c_geometry(c_geom: OGRGeometryH) -> OgrGeometry {
        OgrGeometry(c_geom)
    }

    pub fn c_geometry(&self) -> OGRGeometryH {
        self.0
    }

    fn with_points<'a>(
        wkb_type: OGRwkbGeometryType::Type,
        coords: impl IntoIterator<Item = &'a Coord<f64>>,
    ) -> Result<OgrGeometry> {
        let geom = OgrGeometry::empty(wkb_type)?;
        for coord in coords {
            unsafe { gdal_sys::OGR_G_AddPoint_2D(geom.0, coord.x, coord.y) };
        }
        Ok(geom)
    }

    fn add(&self, sub: OgrGeometry) -> Result<()> {
        let rv = unsafe { gdal_sys::OGR_G_AddGeometryDirectly(self.0, sub.0) };
        // the container owns `sub` now
        std::mem::forget(sub);
        if rv != OGRErr::OGRERR_NONE {
            return Err(GeodataError::BadArgument(format!(
                "OGR_G_AddGeometryDirectly failed with OGR error {rv}"
            )));
        }
        Ok(())
    }

    fn collection<T>(
        wkb_type: OGRwkbGeometryType::Type,
        items: &[T],
        convert: impl Fn(&T) -> Result<OgrGeometry>,
    ) -> Result<OgrGeometry> {
        let geom = OgrGeometry::empty(wkb_type)?;
        for item in items {
            geom.add(convert(item)?)?;
        }
        Ok(geom)
    }

    fn point(point: &Point<f64>) -> Result<OgrGeometry> {
        OgrGeometry::with_points(OGRwkbGeometryType::wkbPoint, [&point.0])
    }

    fn line_string(line: &LineString<f64>) -> Result<OgrGeometry> {
        OgrGeometry::with_points(OGRwkbGeometryType::wkbLineString, &line.0)
    }

    fn polygon(polygon: &Polygon<f64>) -> Result<OgrGeometry> {
        let geom = OgrGeometry::empty(OGRwkbGeometryType::wkbPolygon)?;
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
            geom.add(OgrGeometry::with_points(
                OGRwkbGeometryType::wkbLinearRing,
                &ring.0,
            )?)?;
        }
        Ok(geom)
    }

    pub fn from_geo(geometry: &Geometry<f64>) -> Result<OgrGeometry> {
        match geometry {
            Geometry::Point(p) => OgrGeometry::point(p),
            Geometry::Line(l) => OgrGeometry::line_string(&LineString::from(*l)),
            Geometry::LineString(l) => OgrGeometry::line_string(l),
            Geometry::Polygon(p) => OgrGeometry::polygon(p),
            Geometry::MultiPoint(MultiPoint(points)) => OgrGeometry::collection(
                OGRwkbGeometryType::wkbMultiPoint,
                points,
                OgrGeometry::point,
            ),
            Geometry::MultiLineString(MultiLineString(lines)) => OgrGeometry::collection(
                OGRwkbGeometryType::wkbMultiLineString,
                lines,
                OgrGeometry::line_string,
            ),
            Geometry::MultiPolygon(MultiPolygon(polygons)) => OgrGeometry::collection(
                OGRwkbGeometryType::wkbMultiPolygon,
                polygons,
                OgrGeometry::polygon,
            ),
            Geometry::GeometryCollection(GeometryCollection(items)) => OgrGeometry::collection(
                OGRwkbGeometryType::wkbGeometryCollection,
                items,
                OgrGeometry::from_geo,
            ),
            Geometry::Rect(r) => OgrGeometry::polygon(&r.to_polygon()),
            Geometry::Triangle(t) => OgrGeometry::polygon(&t.to_polygon()),
        }
    }

    pub fn transform_to(&self, srs: &SpatialRef) -> Result<()> {
        let rv = unsafe { gdal_sys::OGR_G_TransformTo(self.0, srs.to_c_hsrs()) };
        if rv != OGRErr::OGRERR_NONE {
            return Err(GeodataError::BadArgument(format!(
                "OGR_G_TransformTo failed with OGR error {rv}"
            )));
        }
        Ok(())
    }

    pub fn to_geo(&self) -> Result<Geometry<f64>> {
        unsafe { to_geo(self.0) }
    }
}

unsafe fn coords(c_geom: OGRGeometryH) -> Vec<Coord<f64>> {
    let count = gdal_sys::OGR_G_GetPointCount(c_geom);
    (0..count)
        .map(|i| {
            let (mut x, mut y, mut z) = (0.0, 0.0, 0.0);
            gdal_sys::OGR_G_GetPoint(c_geom, i, &mut x, &mut y, &mut z);
            Coord { x, y }
        })
        .collect()
}

unsafe fn children(c_geom: OGRGeometryH) -> Result<Vec<Geometry<f64>>> {
    let count = gdal_sys::OGR_G_GetGeometryCount(c_geom);
    (0..count)
        .map(|i| to_geo(gdal_sys::OGR_G_GetGeometryRef(c_geom, i)))
        .collect()
}

fn unexpected(expected: &str) -> GeodataError {
    GeodataError::BadArgument(format!("Expected to get a {expected}"))
}

/// Convert a borrowed OGR geometry. Z values are dropped.
unsafe fn to_geo(c_geom: OGRGeometryH) -> Result<Geometry<f64>> {
    let geometry_type = gdal_sys::OGR_GT_Flatten(gdal_sys::OGR_G_GetGeometryType(c_geom));
    let geometry = match geometry_type {
        OGRwkbGeometryType::wkbPoint => {
            let coords = coords(c_geom);
            let coord = coords.first().copied().ok_or_else(|| unexpected("Point"))?;
            Geometry::Point(Point(coord))
        }
        OGRwkbGeometryType::wkbLineString | OGRwkbGeometryType::wkbLinearRing => {
            Geometry::LineString(LineString(coords(c_geom)))
        }
        OGRwkbGeometryType::wkbPolygon => {
            let mut rings = children(c_geom)?.into_iter().map(|ring| match ring {
                Geometry::LineString(r) => Ok(r),
                _ => Err(unexpected("LineString")),
            });
            let exterior = rings.next().transpose()?.unwrap_or_else(|| LineString(vec![]));
            let interiors = rings.collect::<Result<Vec<_>>>()?;
            Geometry::Polygon(Polygon::new(exterior, interiors))
        }
        OGRwkbGeometryType::wkbMultiPoint => Geometry::MultiPoint(MultiPoint(
            children(c_geom)?
                .into_iter()
                .map(|g| Point::try_from(g).map_err(|_| unexpected("Point")))
                .collect::<Result<_>>()?,
        )),
        OGRwkbGeometryType::wkbMultiLineString => Geometry::MultiLineString(MultiLineString(
            children(c_geom)?
                .into_iter()
                .map(|g| LineString::try_from(g).map_err(|_| unexpected("LineString")))
                .collect::<Result<_>>()?,
        )),
        OGRwkbGeometryType::wkbMultiPolygon => Geometry::MultiPolygon(MultiPolygon(
            children(c_geom)?
                .into_iter()
                .map(|g| Polygon::try_from(g).map_err(|_| unexpected("Polygon")))
                .collect::<Result<_>>()?,
        )),
        OGRwkbGeometryType::wkbGeometryCollection => {
            Geometry::GeometryCollection(GeometryCollection(children(c_geom)?))
        }
        other => {
            return Err(GeodataError::BadArgument(format!(
                "Unsupported OGR geometry type {other}"
            )))
        }
    };
    Ok(geometry)
}
