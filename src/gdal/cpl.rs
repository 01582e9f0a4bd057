//! `KEY=VALUE` string lists as taken by most GDAL entry points.

use std::ffi::CString;
use std::ptr;

use gdal_sys::{CSLCount, CSLDestroy, CSLFetchNameValue, CSLSetNameValue};
use libc::c_char;

use super::utils::_string;
use crate::errors::{GeodataError, Result};
use crate::options::RasterCreationOptions;

/// Owned `char **papszStrList`.
pub struct CslStringList {
    list_ptr: *mut *mut c_char,
}

impl CslStringList {
    pub fn new() -> Self {
        Self {
            list_ptr: ptr::null_mut(),
        }
    }

    /// Assigns `value` to `name`, overwriting a previous value.
    pub fn set_name_value(&mut self, name: &str, value: &str) -> Result<()> {
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(GeodataError::BadArgument(format!(
                "Invalid characters in name: '{name}'"
            )));
        }
        if value.contains(['\n', '\r']) {
            return Err(GeodataError::BadArgument(format!(
                "Invalid characters in value: '{value}'"
            )));
        }
        let psz_name = CString::new(name)?;
        let psz_value = CString::new(value)?;

        unsafe {
            self.list_ptr = CSLSetNameValue(self.list_ptr, psz_name.as_ptr(), psz_value.as_ptr());
        }

        Ok(())
    }

    pub fn fetch_name_value(&self, key: &str) -> Result<Option<String>> {
        let key = CString::new(key)?;
        let c_value = unsafe { CSLFetchNameValue(self.as_ptr(), key.as_ptr()) };
        let value = if c_value.is_null() {
            None
        } else {
            Some(_string(c_value))
        };
        Ok(value)
    }

    pub fn len(&self) -> usize {
        (unsafe { CSLCount(self.as_ptr()) }) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_ptr(&self) -> gdal_sys::CSLConstList {
        self.list_ptr
    }

    /// Hand the list over to a GDAL structure that frees it.
    pub fn into_raw(self) -> *mut *mut c_char {
        let list_ptr = self.list_ptr;
        std::mem::forget(self);
        list_ptr
    }
}

impl Drop for CslStringList {
    fn drop(&mut self) {
        unsafe { CSLDestroy(self.list_ptr) }
    }
}

impl Default for CslStringList {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<&[(String, String)]> for CslStringList {
    type Error = GeodataError;

    fn try_from(pairs: &[(String, String)]) -> Result<Self> {
        let mut list = CslStringList::new();
        for (name, value) in pairs {
            list.set_name_value(name, value)?;
        }
        Ok(list)
    }
}

impl TryFrom<&RasterCreationOptions> for CslStringList {
    type Error = GeodataError;

    fn try_from(options: &RasterCreationOptions) -> Result<Self> {
        CslStringList::try_from(options.to_name_values()?.as_slice())
    }
}
