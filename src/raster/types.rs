use crate::errors::{GeodataError, Result};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Pixel data types an artifact can be written with.
///
/// In-memory values are always held as `f64`; the data type governs how
/// they are stored and which fill values are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    UInt8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DataType {
    /// Subset of the GDAL data types supported by the crate.
    pub fn available_types() -> &'static [DataType] {
        use DataType::*;
        &[UInt8, UInt16, Int16, UInt32, Int32, Int64, Float32, Float64]
    }

    /// Lower-case name, as used in cache keys.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::Int16 => "int16",
            DataType::UInt32 => "uint32",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        }
    }

    /// Name of the matching GDAL data type.
    pub fn gdal_name(&self) -> &'static str {
        match self {
            DataType::UInt8 => "Byte",
            DataType::UInt16 => "UInt16",
            DataType::Int16 => "Int16",
            DataType::UInt32 => "UInt32",
            DataType::Int32 => "Int32",
            DataType::Int64 => "Int64",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
        }
    }

    /// Get the type size in **bits**.
    pub fn bits(&self) -> u8 {
        match self {
            DataType::UInt8 => 8,
            DataType::UInt16 | DataType::Int16 => 16,
            DataType::UInt32 | DataType::Int32 | DataType::Float32 => 32,
            DataType::Int64 | DataType::Float64 => 64,
        }
    }

    /// Get the type size in **bytes**.
    pub fn bytes(&self) -> u8 {
        self.bits() / 8
    }

    /// Returns `true` if data type is integral (non-floating point)
    pub fn is_integer(&self) -> bool {
        !self.is_floating()
    }

    /// Returns `true` if data type is floating point (non-integral)
    pub fn is_floating(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Returns `true` if data type supports negative values.
    pub fn is_signed(&self) -> bool {
        !matches!(self, DataType::UInt8 | DataType::UInt16 | DataType::UInt32)
    }

    pub fn min_value(&self) -> f64 {
        match self {
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 => 0.0,
            DataType::Int16 => i16::MIN as f64,
            DataType::Int32 => i32::MIN as f64,
            DataType::Int64 => i64::MIN as f64,
            DataType::Float32 => f32::MIN as f64,
            DataType::Float64 => f64::MIN,
        }
    }

    pub fn max_value(&self) -> f64 {
        match self {
            DataType::UInt8 => u8::MAX as f64,
            DataType::UInt16 => u16::MAX as f64,
            DataType::UInt32 => u32::MAX as f64,
            DataType::Int16 => i16::MAX as f64,
            DataType::Int32 => i32::MAX as f64,
            DataType::Int64 => i64::MAX as f64,
            DataType::Float32 => f32::MAX as f64,
            DataType::Float64 => f64::MAX,
        }
    }

    /// The nodata value used when none is given: NaN for floating point
    /// types, zero otherwise.
    pub fn default_nodata(&self) -> f64 {
        if self.is_floating() {
            f64::NAN
        } else {
            0.0
        }
    }

    /// Whether `value` survives a round trip through this type unchanged.
    pub fn can_represent(&self, value: f64) -> bool {
        if value.is_nan() {
            return self.is_floating();
        }
        if self.is_floating() {
            return true;
        }
        value.fract() == 0.0 && value >= self.min_value() && value <= self.max_value()
    }

    /// Convert a value the way it is stored: rounded and clamped for
    /// integer types, narrowed for `Float32`.
    pub fn cast(&self, value: f64) -> f64 {
        match self {
            DataType::Float64 => value,
            DataType::Float32 => value as f32 as f64,
            _ if value.is_nan() => 0.0,
            _ => value.round().clamp(self.min_value(), self.max_value()),
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = GeodataError;

    fn from_str(s: &str) -> Result<Self> {
        let dtype = match s.to_ascii_lowercase().as_str() {
            "uint8" | "byte" | "u8" => DataType::UInt8,
            "uint16" | "u16" => DataType::UInt16,
            "int16" | "i16" => DataType::Int16,
            "uint32" | "u32" => DataType::UInt32,
            "int32" | "i32" => DataType::Int32,
            "int64" | "i64" => DataType::Int64,
            "float32" | "f32" => DataType::Float32,
            "float64" | "f64" => DataType::Float64,
            _ => {
                return Err(GeodataError::BadArgument(format!(
                    "unknown data type '{s}'"
                )))
            }
        };
        Ok(dtype)
    }
}
