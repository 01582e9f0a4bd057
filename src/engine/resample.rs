use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::errors::{GeodataError, Result};

/// Warp resampling algorithm.
///
/// Discriminants match GDAL's `GDALResampleAlg` ordinals.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ResampleAlg {
    /// Nearest neighbour (select on one input pixel)
    #[default]
    NearestNeighbour = 0,
    /// Bilinear (2x2 kernel)
    Bilinear = 1,
    /// Cubic Convolution Approximation (4x4 kernel)
    Cubic = 2,
    /// Cubic B-Spline Approximation (4x4 kernel)
    CubicSpline = 3,
    /// Lanczos windowed sinc interpolation (6x6 kernel)
    Lanczos = 4,
    /// Average (computes the weighted average of all non-NODATA contributing pixels)
    Average = 5,
    /// Mode (selects the value which appears most often of all the sampled points)
    Mode = 6,
    /// Max (selects maximum of all non-NODATA contributing pixels)
    Max = 8,
    /// Min (selects minimum of all non-NODATA contributing pixels)
    Min = 9,
    /// Med (selects median of all non-NODATA contributing pixels)
    Med = 10,
    /// Q1 (selects first quartile of all non-NODATA contributing pixels)
    Q1 = 11,
    /// Q3 (selects third quartile of all non-NODATA contributing pixels)
    Q3 = 12,
    /// Sum (weighed sum of all non-NODATA contributing pixels)
    Sum = 13,
    /// RMS (weighted root mean square (quadratic mean) of all non-NODATA contributing pixels)
    RMS = 14,
}

impl ResampleAlg {
    const ALL: [ResampleAlg; 14] = [
        ResampleAlg::NearestNeighbour,
        ResampleAlg::Bilinear,
        ResampleAlg::Cubic,
        ResampleAlg::CubicSpline,
        ResampleAlg::Lanczos,
        ResampleAlg::Average,
        ResampleAlg::Mode,
        ResampleAlg::Max,
        ResampleAlg::Min,
        ResampleAlg::Med,
        ResampleAlg::Q1,
        ResampleAlg::Q3,
        ResampleAlg::Sum,
        ResampleAlg::RMS,
    ];

    pub fn ordinal(&self) -> u32 {
        *self as u32
    }

    pub fn from_ordinal(alg: u32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.ordinal() == alg)
            .ok_or_else(|| {
                GeodataError::BadArgument(format!(
                    "Ordinal {alg} does not map to a supported ResampleAlg"
                ))
            })
    }

    /// Name as used by `gdalwarp -r`.
    pub fn name(&self) -> &'static str {
        match self {
            ResampleAlg::NearestNeighbour => "nearest",
            ResampleAlg::Bilinear => "bilinear",
            ResampleAlg::Cubic => "cubic",
            ResampleAlg::CubicSpline => "cubicspline",
            ResampleAlg::Lanczos => "lanczos",
            ResampleAlg::Average => "average",
            ResampleAlg::Mode => "mode",
            ResampleAlg::Max => "max",
            ResampleAlg::Min => "min",
            ResampleAlg::Med => "med",
            ResampleAlg::Q1 => "q1",
            ResampleAlg::Q3 => "q3",
            ResampleAlg::Sum => "sum",
            ResampleAlg::RMS => "rms",
        }
    }
}

impl Display for ResampleAlg {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResampleAlg {
    type Err = GeodataError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.to_ascii_lowercase();
        if s == "near" {
            return Ok(ResampleAlg::NearestNeighbour);
        }
        Self::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| GeodataError::BadArgument(format!("Unknown resampling '{s}'")))
    }
}
