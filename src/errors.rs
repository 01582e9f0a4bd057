use std::path::PathBuf;

use thiserror::Error;

#[cfg(feature = "gdal")]
use gdal_sys::CPLErr;
#[cfg(feature = "gdal")]
use libc::c_int;

pub type Result<T> = std::result::Result<T, GeodataError>;

#[derive(Debug, Error)]
pub enum GeodataError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(
        "Cannot reproject multi-variable dataset: {}\nSubdatasets:\n{}",
        path.display(),
        subdatasets.join("\n")
    )]
    MultiVariable {
        path: PathBuf,
        subdatasets: Vec<String>,
    },

    #[error("Stack error: {0}")]
    Stack(String),

    #[error("Destination already exists: {}", .0.display())]
    ArtifactExists(PathBuf),

    #[error("No operation available to produce '{0}'")]
    NotImplementedOperation(String),

    #[error("Fill value {value} is present in column '{column}'. Overwrite with a different value.")]
    FillValueCollision { value: f64, column: String },

    #[error("Column '{column}' must be numeric, got {found}")]
    NonNumericColumn { column: String, found: String },

    #[error("Column '{0}' not found in feature table")]
    MissingColumn(String),

    #[error("Feature table CRS ({found}) does not match target CRS ({expected})")]
    CrsMismatch { expected: String, found: String },

    #[error("Raster I/O error on '{}': {msg}", path.display())]
    RasterIo { path: PathBuf, msg: String },

    #[error("Raster '{}' has too many dimensions ({dims}); select a single variable", path.display())]
    TooManyDimensions { path: PathBuf, dims: usize },

    #[error("Bad argument: {0}")]
    BadArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[cfg(feature = "gdal")]
    #[error("FfiNulError")]
    FfiNulError(#[from] std::ffi::NulError),

    #[cfg(feature = "gdal")]
    #[error("StrUtf8Error")]
    StrUtf8Error(#[from] std::str::Utf8Error),

    #[cfg(feature = "gdal")]
    #[error("CPL error class: '{class:?}', error number: '{number}', error msg: '{msg}'")]
    CplError {
        class: CPLErr::Type,
        number: c_int,
        msg: String,
    },

    #[cfg(feature = "gdal")]
    #[error("GDAL method '{method_name}' returned a NULL pointer. Error msg: '{msg}'")]
    NullPointer {
        method_name: &'static str,
        msg: String,
    },
}

impl GeodataError {
    pub(crate) fn raster_io(path: impl Into<PathBuf>, msg: impl ToString) -> Self {
        GeodataError::RasterIo {
            path: path.into(),
            msg: msg.to_string(),
        }
    }

    /// Returns `true` for the value-class errors raised when the input data
    /// cannot be turned into an unambiguous artifact.
    pub fn is_value_error(&self) -> bool {
        matches!(
            self,
            GeodataError::FillValueCollision { .. }
                | GeodataError::NonNumericColumn { .. }
                | GeodataError::MissingColumn(_)
                | GeodataError::CrsMismatch { .. }
        )
    }
}
