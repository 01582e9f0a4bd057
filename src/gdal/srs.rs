use std::ffi::CString;
use std::ptr;

use gdal_sys::{self, OGRErr, OGRSpatialReferenceH};
use libc::{c_char, c_void};

use super::utils::{_last_null_pointer_err, _string};
use crate::errors::{GeodataError, Result};
use crate::spec::Crs;

/// Owned `OGRSpatialReferenceH`.
#[derive(Debug)]
pub struct SpatialRef(OGRSpatialReferenceH);

impl Drop for SpatialRef {
    fn drop(&mut self) {
        unsafe { gdal_sys::OSRRelease(self.0) };
        self.0 = ptr::null_mut();
    }
}

fn ogr_err(err: OGRErr::Type, method_name: &'static str) -> Result<()> {
    if err != OGRErr::OGRERR_NONE {
        return Err(GeodataError::Configuration(format!(
            "{method_name} failed with OGR error {err}"
        )));
    }
    Ok(())
}

impl SpatialRef {
    fn empty() -> Result<SpatialRef> {
        let c_obj = unsafe { gdal_sys::OSRNewSpatialReference(ptr::null()) };
        if c_obj.is_null() {
            return Err(_last_null_pointer_err("OSRNewSpatialReference"));
        }
        unsafe {
            gdal_sys::OSRSetAxisMappingStrategy(
                c_obj,
                gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
            )
        };
        Ok(SpatialRef(c_obj))
    }

    /// Accepts anything `OSRSetFromUserInput` does: `EPSG:n`, WKT, PROJ
    /// strings.
    pub fn from_definition(definition: &str) -> Result<SpatialRef> {
        let srs = SpatialRef::empty()?;
        let c_str = CString::new(definition)?;
        let rv = unsafe { gdal_sys::OSRSetFromUserInput(srs.0, c_str.as_ptr()) };
        ogr_err(rv, "OSRSetFromUserInput")?;
        Ok(srs)
    }

    pub fn from_crs(crs: &Crs) -> Result<SpatialRef> {
        SpatialRef::from_definition(crs.as_str())
    }

    pub fn to_wkt(&self) -> Result<String> {
        let mut c_wkt: *mut c_char = ptr::null_mut();
        let rv = unsafe { gdal_sys::OSRExportToWkt(self.0, &mut c_wkt) };
        let res = ogr_err(rv, "OSRExportToWkt").map(|_| _string(c_wkt));
        unsafe { gdal_sys::VSIFree(c_wkt as *mut c_void) };
        res
    }

    /// EPSG code, identified from the definition when it does not carry one.
    pub fn epsg(&self) -> Option<u32> {
        unsafe {
            let name = gdal_sys::OSRGetAuthorityName(self.0, ptr::null());
            if name.is_null() {
                gdal_sys::OSRAutoIdentifyEPSG(self.0);
            }
            let name = gdal_sys::OSRGetAuthorityName(self.0, ptr::null());
            if name.is_null() || _string(name) != "EPSG" {
                return None;
            }
            _string(gdal_sys::OSRGetAuthorityCode(self.0, ptr::null()))
                .parse()
                .ok()
        }
    }

    /// `EPSG:n` when identifiable, WKT otherwise.
    pub fn to_crs(&self) -> Result<Crs> {
        match self.epsg() {
            Some(code) => Ok(Crs::from_epsg(code)),
            None => Crs::new(self.to_wkt()?),
        }
    }

    pub fn is_same(&self, other: &SpatialRef) -> bool {
        unsafe { gdal_sys::OSRIsSame(self.0, other.0) == 1 }
    }

    pub fn to_c_hsrs(&self) -> OGRSpatialReferenceH {
        self.0
    }
}

/// WKT for a dataset projection, `None` for an empty string.
pub fn crs_from_wkt(wkt: &str) -> Result<Option<Crs>> {
    if wkt.trim().is_empty() {
        return Ok(None);
    }
    SpatialRef::from_definition(wkt)?.to_crs().map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epsg_roundtrip() {
        let srs = SpatialRef::from_crs(&Crs::from_epsg(3035)).unwrap();
        assert_eq!(srs.epsg(), Some(3035));
        let wkt = srs.to_wkt().unwrap();
        assert!(wkt.contains("LAEA") || wkt.contains("Lambert"));
        assert_eq!(crs_from_wkt(&wkt).unwrap(), Some(Crs::from_epsg(3035)));
        assert_eq!(crs_from_wkt("").unwrap(), None);
    }

    #[test]
    fn same_definition() {
        let a = SpatialRef::from_crs(&Crs::from_epsg(4326)).unwrap();
        let b = SpatialRef::from_definition(&a.to_wkt().unwrap()).unwrap();
        let c = SpatialRef::from_crs(&Crs::from_epsg(3857)).unwrap();
        assert!(a.is_same(&b));
        assert!(!a.is_same(&c));
    }
}
