//! GeoTIFF creation options.
//!
//! A typed subset of the [GTiff creation options], validated before being
//! handed to a driver as `KEY=VALUE` pairs.
//!
//! [GTiff creation options]: https://gdal.org/drivers/raster/gtiff.html#creation-options

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::errors::{GeodataError, Result};

macro_rules! option_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $value:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Value as written in the GDAL creation option.
            pub fn gdal_value(&self) -> &'static str {
                match self {
                    $($name::$variant => $value),+
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(&self.gdal_value().to_ascii_lowercase())
            }
        }

        impl FromStr for $name {
            type Err = GeodataError;

            fn from_str(s: &str) -> Result<Self> {
                $(
                    if s.eq_ignore_ascii_case($value) {
                        return Ok($name::$variant);
                    }
                )+
                Err(GeodataError::Configuration(format!(
                    "Invalid {} '{s}'",
                    stringify!($name)
                )))
            }
        }
    };
}

option_enum!(
    /// Compression codec.
    Compression {
        Lzw => "LZW",
        Deflate => "DEFLATE",
        Zstd => "ZSTD",
        Lzma => "LZMA",
        Jpeg => "JPEG",
        Webp => "WEBP",
    }
);

option_enum!(
    /// Band interleaving.
    Interleave {
        Pixel => "PIXEL",
        Band => "BAND",
        Line => "LINE",
    }
);

option_enum!(
    /// Photometric interpretation.
    Photometric {
        MinIsBlack => "MINISBLACK",
        Rgb => "RGB",
        YCbCr => "YCBCR",
    }
);

option_enum!(
    /// BigTIFF creation policy.
    BigTiff {
        Yes => "YES",
        No => "NO",
        IfNeeded => "IF_NEEDED",
        IfSafer => "IF_SAFER",
    }
);

/// Compression predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Predictor {
    None = 1,
    Horizontal = 2,
    FloatingPoint = 3,
}

impl TryFrom<u8> for Predictor {
    type Error = GeodataError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Predictor::None),
            2 => Ok(Predictor::Horizontal),
            3 => Ok(Predictor::FloatingPoint),
            _ => Err(GeodataError::Configuration(format!(
                "Invalid predictor {value}, expected 1, 2 or 3"
            ))),
        }
    }
}

/// Creation options applied to every artifact written by the crate.
///
/// Unset fields leave the driver default in place.
///
/// ```
/// use geodata::options::{Compression, RasterCreationOptions};
///
/// let options = RasterCreationOptions {
///     compress: Some(Compression::Deflate),
///     compress_level: Some(6),
///     tiled: Some(true),
///     ..Default::default()
/// };
/// let pairs = options.to_name_values().unwrap();
/// assert!(pairs.contains(&("COMPRESS".to_string(), "DEFLATE".to_string())));
/// assert!(pairs.contains(&("ZLEVEL".to_string(), "6".to_string())));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RasterCreationOptions {
    pub compress: Option<Compression>,
    pub compress_level: Option<u8>,
    pub tiled: Option<bool>,
    pub block_x_size: Option<usize>,
    pub block_y_size: Option<usize>,
    pub interleave: Option<Interleave>,
    pub photometric: Option<Photometric>,
    pub predictor: Option<Predictor>,
    pub bigtiff: Option<BigTiff>,
    pub sparse_ok: Option<bool>,
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "YES"
    } else {
        "NO"
    }
}

impl RasterCreationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Check the options for values GDAL would reject or silently ignore.
    pub fn validate(&self) -> Result<()> {
        for (name, size) in [("x", self.block_x_size), ("y", self.block_y_size)] {
            if let Some(size) = size {
                if size == 0 || size % 16 != 0 {
                    return Err(GeodataError::Configuration(format!(
                        "Block {name} size must be a positive multiple of 16, got {size}"
                    )));
                }
            }
        }

        if let Some(level) = self.compress_level {
            let range = match self.compress {
                None => {
                    return Err(GeodataError::Configuration(
                        "Compression level given without a compression codec".to_string(),
                    ))
                }
                Some(Compression::Lzw) => {
                    return Err(GeodataError::Configuration(
                        "LZW compression does not take a level".to_string(),
                    ))
                }
                Some(Compression::Deflate) => 1..=12,
                Some(Compression::Zstd) => 1..=22,
                Some(Compression::Lzma) => 0..=9,
                Some(Compression::Jpeg) | Some(Compression::Webp) => 1..=100,
            };
            if !range.contains(&level) {
                return Err(GeodataError::Configuration(format!(
                    "Compression level {level} out of range {}..={} for {}",
                    range.start(),
                    range.end(),
                    self.compress.map(|c| c.to_string()).unwrap_or_default()
                )));
            }
        }
        Ok(())
    }

    /// Validated `KEY=VALUE` pairs for the GTiff driver.
    pub fn to_name_values(&self) -> Result<Vec<(String, String)>> {
        self.validate()?;

        let mut pairs: Vec<(&str, String)> = Vec::new();
        if let Some(compress) = self.compress {
            pairs.push(("COMPRESS", compress.gdal_value().to_string()));
            let level_key = match compress {
                Compression::Deflate => Some("ZLEVEL"),
                Compression::Zstd => Some("ZSTD_LEVEL"),
                Compression::Lzma => Some("LZMA_PRESET"),
                Compression::Jpeg => Some("JPEG_QUALITY"),
                Compression::Webp => Some("WEBP_LEVEL"),
                Compression::Lzw => None,
            };
            if let (Some(key), Some(level)) = (level_key, self.compress_level) {
                pairs.push((key, level.to_string()));
            }
        }
        if let Some(tiled) = self.tiled {
            pairs.push(("TILED", yes_no(tiled).to_string()));
        }
        if let Some(size) = self.block_x_size {
            pairs.push(("BLOCKXSIZE", size.to_string()));
        }
        if let Some(size) = self.block_y_size {
            pairs.push(("BLOCKYSIZE", size.to_string()));
        }
        if let Some(interleave) = self.interleave {
            pairs.push(("INTERLEAVE", interleave.gdal_value().to_string()));
        }
        if let Some(photometric) = self.photometric {
            pairs.push(("PHOTOMETRIC", photometric.gdal_value().to_string()));
        }
        if let Some(predictor) = self.predictor {
            pairs.push(("PREDICTOR", (predictor as u8).to_string()));
        }
        if let Some(bigtiff) = self.bigtiff {
            pairs.push(("BIGTIFF", bigtiff.gdal_value().to_string()));
        }
        if let Some(sparse_ok) = self.sparse_ok {
            pairs.push(("SPARSE_OK", yes_no(sparse_ok).to_string()));
        }

        Ok(pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_options_produce_nothing() {
        let options = RasterCreationOptions::new();
        assert!(options.is_empty());
        assert!(options.to_name_values().unwrap().is_empty());
    }

    #[test]
    fn all_options() {
        let options = RasterCreationOptions {
            compress: Some(Compression::Zstd),
            compress_level: Some(9),
            tiled: Some(true),
            block_x_size: Some(512),
            block_y_size: Some(256),
            interleave: Some(Interleave::Band),
            photometric: Some(Photometric::MinIsBlack),
            predictor: Some(Predictor::FloatingPoint),
            bigtiff: Some(BigTiff::IfSafer),
            sparse_ok: Some(false),
        };
        let pairs: Vec<String> = options
            .to_name_values()
            .unwrap()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        assert_eq!(
            pairs,
            [
                "COMPRESS=ZSTD",
                "ZSTD_LEVEL=9",
                "TILED=YES",
                "BLOCKXSIZE=512",
                "BLOCKYSIZE=256",
                "INTERLEAVE=BAND",
                "PHOTOMETRIC=MINISBLACK",
                "PREDICTOR=3",
                "BIGTIFF=IF_SAFER",
                "SPARSE_OK=NO",
            ]
        );
    }

    #[test]
    fn block_sizes_must_be_multiples_of_16() {
        let options = RasterCreationOptions {
            block_x_size: Some(100),
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(GeodataError::Configuration(_))
        ));
    }

    #[test]
    fn compression_level_checks() {
        let orphan = RasterCreationOptions {
            compress_level: Some(3),
            ..Default::default()
        };
        assert!(orphan.validate().is_err());

        let lzw = RasterCreationOptions {
            compress: Some(Compression::Lzw),
            compress_level: Some(3),
            ..Default::default()
        };
        assert!(lzw.validate().is_err());

        let deflate = RasterCreationOptions {
            compress: Some(Compression::Deflate),
            compress_level: Some(13),
            ..Default::default()
        };
        assert!(deflate.validate().is_err());
    }

    #[test]
    fn parse_enums() {
        assert_eq!("lzw".parse::<Compression>().unwrap(), Compression::Lzw);
        assert_eq!("if_needed".parse::<BigTiff>().unwrap(), BigTiff::IfNeeded);
        assert_eq!("ycbcr".parse::<Photometric>().unwrap(), Photometric::YCbCr);
        assert!("gzip".parse::<Compression>().is_err());
        assert_eq!(Predictor::try_from(2).unwrap(), Predictor::Horizontal);
        assert!(Predictor::try_from(4).is_err());
    }
}
