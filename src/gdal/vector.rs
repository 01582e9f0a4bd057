use std::ffi::CString;
use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use gdal_sys::{self, OGRFeatureH, OGRFieldType, OGRLayerH};
use libc::c_int;
use tracing::debug;

use super::dataset::{Dataset, GdalOpenFlags};
use super::geometry::OgrGeometry;
use super::srs::SpatialRef;
use super::utils::{_last_null_pointer_err, _string};
use crate::engine::{Feature, FeatureTable, FieldKind, FieldValue, VectorReader};
use crate::errors::{GeodataError, Result};
use crate::spec::Crs;

/// Reads the first layer of anything OGR opens, reprojecting geometries to
/// the requested CRS.
#[derive(Debug, Clone, Copy, Default)]
pub struct OgrVectorReader;

fn field_kind(field_type: OGRFieldType::Type) -> Option<FieldKind> {
    match field_type {
        OGRFieldType::OFTInteger | OGRFieldType::OFTInteger64 => Some(FieldKind::Integer),
        OGRFieldType::OFTReal => Some(FieldKind::Real),
        OGRFieldType::OFTString => Some(FieldKind::String),
        OGRFieldType::OFTDate => Some(FieldKind::Date),
        OGRFieldType::OFTDateTime => Some(FieldKind::DateTime),
        _ => None,
    }
}

/// Owned `OGRFeatureH`.
struct OwnedFeature(OGRFeatureH);

impl Drop for OwnedFeature {
    fn drop(&mut self) {
        unsafe { gdal_sys::OGR_F_Destroy(self.0) };
    }
}

impl OwnedFeature {
    fn datetime(&self, field_id: c_int) -> Result<DateTime<FixedOffset>> {
        let mut year: c_int = 0;
        let mut month: c_int = 0;
        let mut day: c_int = 0;
        let mut hour: c_int = 0;
        let mut minute: c_int = 0;
        let mut second: c_int = 0;
        let mut tzflag: c_int = 0;

        let success = unsafe {
            gdal_sys::OGR_F_GetFieldAsDateTime(
                self.0,
                field_id,
                &mut year,
                &mut month,
                &mut day,
                &mut hour,
                &mut minute,
                &mut second,
                &mut tzflag,
            )
        };
        let invalid = || GeodataError::BadArgument(format!("Invalid date in field {field_id}"));
        if success == 0 {
            return Err(invalid());
        }

        // from https://github.com/OSGeo/gdal/blob/33a8a0edc764253b582e194d330eec3b83072863/gdal/ogr/ogrutils.cpp#L1309
        let tzoffset_secs = if tzflag == 0 || tzflag == 100 {
            0
        } else {
            (tzflag - 100) * 15 * 60
        };
        let offset = FixedOffset::east_opt(tzoffset_secs).ok_or_else(invalid)?;
        let naive = NaiveDate::from_ymd_opt(year, month as u32, day as u32)
            .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
            .ok_or_else(invalid)?;
        offset
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(invalid)
    }

    fn field(&self, field_id: c_int, kind: FieldKind) -> Result<Option<FieldValue>> {
        let is_set = unsafe { gdal_sys::OGR_F_IsFieldSetAndNotNull(self.0, field_id) };
        if is_set == 0 {
            return Ok(None);
        }
        let value = match kind {
            FieldKind::Integer => FieldValue::IntegerValue(unsafe {
                gdal_sys::OGR_F_GetFieldAsInteger64(self.0, field_id)
            }),
            FieldKind::Real => {
                FieldValue::RealValue(unsafe { gdal_sys::OGR_F_GetFieldAsDouble(self.0, field_id) })
            }
            FieldKind::String => FieldValue::StringValue(_string(unsafe {
                gdal_sys::OGR_F_GetFieldAsString(self.0, field_id)
            })),
            FieldKind::Date => FieldValue::DateValue(self.datetime(field_id)?.date_naive()),
            FieldKind::DateTime => FieldValue::DateTimeValue(self.datetime(field_id)?),
        };
        Ok(Some(value))
    }
}

fn layer_schema(c_layer: OGRLayerH) -> Vec<(c_int, String, FieldKind)> {
    let c_defn = unsafe { gdal_sys::OGR_L_GetLayerDefn(c_layer) };
    let count = unsafe { gdal_sys::OGR_FD_GetFieldCount(c_defn) };
    (0..count)
        .filter_map(|id| {
            let c_field = unsafe { gdal_sys::OGR_FD_GetFieldDefn(c_defn, id) };
            let name = _string(unsafe { gdal_sys::OGR_Fld_GetNameRef(c_field) });
            let field_type = unsafe { gdal_sys::OGR_Fld_GetType(c_field) };
            match field_kind(field_type) {
                Some(kind) => Some((id, name, kind)),
                None => {
                    debug!(field = %name, field_type, "Skipping unsupported field type");
                    None
                }
            }
        })
        .collect()
}

impl VectorReader for OgrVectorReader {
    fn read(&self, path: &Path, target_crs: &Crs) -> Result<FeatureTable> {
        let dataset = Dataset::open(path, GdalOpenFlags::GDAL_OF_VECTOR)?;
        let c_layer = unsafe { gdal_sys::GDALDatasetGetLayer(dataset.c_dataset(), 0) };
        if c_layer.is_null() {
            let err = _last_null_pointer_err("GDALDatasetGetLayer");
            return Err(GeodataError::raster_io(path, err));
        }

        let c_srs = unsafe { gdal_sys::OGR_L_GetSpatialRef(c_layer) };
        let layer_crs = if c_srs.is_null() {
            None
        } else {
            let mut c_wkt = std::ptr::null_mut();
            unsafe { gdal_sys::OSRExportToWkt(c_srs, &mut c_wkt) };
            let wkt = _string(c_wkt);
            unsafe { gdal_sys::VSIFree(c_wkt as *mut libc::c_void) };
            Some(SpatialRef::from_definition(&wkt)?)
        };
        let target = SpatialRef::from_crs(target_crs)?;
        let reproject = layer_crs.as_ref().is_some_and(|srs| !srs.is_same(&target));

        let schema = layer_schema(c_layer);
        let mut table = FeatureTable::new(match &layer_crs {
            Some(_) if reproject => Some(target_crs.clone()),
            Some(srs) => Some(srs.to_crs()?),
            None => None,
        });
        for (_, name, kind) in &schema {
            table = table.with_column(name.clone(), *kind);
        }

        unsafe { gdal_sys::OGR_L_ResetReading(c_layer) };
        loop {
            let c_feature = unsafe { gdal_sys::OGR_L_GetNextFeature(c_layer) };
            if c_feature.is_null() {
                break;
            }
            let feature = OwnedFeature(c_feature);
            let c_geom = unsafe { gdal_sys::OGR_F_StealGeometry(feature.0) };
            if c_geom.is_null() {
                continue;
            }
            let geometry = unsafe { OgrGeometry::from_c_geometry(c_geom) };
            if reproject {
                geometry.transform_to(&target)?;
            }
            let mut row = Feature::new(geometry.to_geo()?);
            for (id, name, kind) in &schema {
                if let Some(value) = feature.field(*id, *kind)? {
                    row = row.with_field(name.clone(), value);
                }
            }
            table = table.with_feature(row);
        }
        debug!(path = %path.display(), features = table.len(), reproject, "Read vector layer");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TempFixture;
    use geo_types::Geometry;

    const GEOJSON: &str = r#"{
  "type": "FeatureCollection",
  "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::4326" } },
  "features": [
    { "type": "Feature", "properties": { "id": 3, "area": 1.5, "name": "a" },
      "geometry": { "type": "Point", "coordinates": [10.0, 50.0] } },
    { "type": "Feature", "properties": { "id": 4, "area": null, "name": "b" },
      "geometry": { "type": "Point", "coordinates": [11.0, 51.0] } }
  ]
}"#;

    fn fixture() -> TempFixture {
        let fixture = TempFixture::empty("points.geojson");
        std::fs::write(fixture.path(), GEOJSON).unwrap();
        fixture
    }

    #[test]
    fn reads_fields_and_nulls() {
        let fixture = fixture();
        let table = OgrVectorReader
            .read(fixture.path(), &Crs::from_epsg(4326))
            .unwrap();
        assert_eq!(table.crs, Some(Crs::from_epsg(4326)));
        assert_eq!(table.column("id"), Some(FieldKind::Integer));
        assert_eq!(table.column("area"), Some(FieldKind::Real));
        assert_eq!(table.column("name"), Some(FieldKind::String));
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.features[0].field("id"),
            Some(&FieldValue::IntegerValue(3))
        );
        assert_eq!(table.features[1].field("area"), None);
    }

    #[test]
    fn reprojects_to_target() {
        let fixture = fixture();
        let table = OgrVectorReader
            .read(fixture.path(), &Crs::from_epsg(3035))
            .unwrap();
        assert_eq!(table.crs, Some(Crs::from_epsg(3035)));
        match &table.features[0].geometry {
            Geometry::Point(p) => assert!(p.x() > 1_000_000.0 && p.y() > 1_000_000.0),
            other => panic!("unexpected geometry {other:?}"),
        }
    }
}
