//! GeoTIFF reading and writing on top of the `tiff` crate.
//!
//! Covers what the cache needs from its own artifacts: north-up or rotated
//! affine georeferencing, an EPSG code or free-form CRS string, the
//! `GDAL_NODATA` tag and per-band scale/offset in `GDAL_METADATA`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use ndarray::Array3;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{
    ColorType, Gray16, Gray32, Gray32Float, Gray64Float, Gray8, GrayI16, GrayI32, GrayI64,
};
use tiff::encoder::{
    Compression as TiffCompression, DeflateLevel, DirectoryEncoder, TiffEncoder, TiffKind,
    TiffValue,
};
use tiff::tags::Tag;
use tiff::{TiffError, TiffResult};

use crate::engine::RasterDriver;
use crate::errors::{GeodataError, Result};
use crate::options::{Compression, RasterCreationOptions};
use crate::raster::{DataType, Raster, RasterMetadata};
use crate::spec::{Crs, GeoTransform, Shape, SpatialSpec};

const GDAL_METADATA: u16 = 42112;

const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GT_CITATION_GEO_KEY: u16 = 1026;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

/// Reads and writes GeoTIFF files without GDAL.
///
/// Compression (`lzw`, `deflate`) is applied to single-band files; other
/// creation options are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiffDriver;

fn io_err(path: &Path) -> impl Fn(TiffError) -> GeodataError + '_ {
    move |e| GeodataError::raster_io(path, e)
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| GeodataError::raster_io(path, e))?;
    let decoder = Decoder::new(BufReader::new(file)).map_err(io_err(path))?;
    Ok(decoder.with_limits(Limits::unlimited()))
}

fn is_geographic(epsg: u32) -> bool {
    (4000..5000).contains(&epsg)
}

/// Georeferencing tags of one image.
#[derive(Debug, Default)]
struct GeoTags {
    pixel_scale: Option<Vec<f64>>,
    tiepoint: Option<Vec<f64>>,
    transformation: Option<Vec<f64>>,
    geo_keys: Vec<u16>,
    ascii_params: String,
    nodata: Option<String>,
    metadata: Option<String>,
}

impl GeoTags {
    fn for_raster(raster: &Raster) -> Self {
        let spec = raster.spec();
        let gt = spec.transform();
        let mut tags = GeoTags::default();

        if gt[2] == 0.0 && gt[4] == 0.0 && gt[5] < 0.0 {
            tags.pixel_scale = Some(vec![gt[1], -gt[5], 0.0]);
            tags.tiepoint = Some(vec![0.0, 0.0, 0.0, gt[0], gt[3], 0.0]);
        } else {
            tags.transformation = Some(vec![
                gt[1], gt[2], 0.0, gt[0], //
                gt[4], gt[5], 0.0, gt[3], //
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ]);
        }

        let crs = spec.crs();
        tags.ascii_params = format!("{}|", crs.as_str());
        let epsg = crs.epsg().and_then(|code| u16::try_from(code).ok());
        let model_type = match crs.epsg() {
            Some(code) if is_geographic(code) => MODEL_TYPE_GEOGRAPHIC,
            _ => MODEL_TYPE_PROJECTED,
        };
        let mut keys = vec![
            [GT_MODEL_TYPE_GEO_KEY, 0, 1, model_type],
            [GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA],
            [
                GT_CITATION_GEO_KEY,
                Tag::GeoAsciiParamsTag.to_u16(),
                tags.ascii_params.len() as u16,
                0,
            ],
        ];
        let type_key = if model_type == MODEL_TYPE_GEOGRAPHIC {
            GEOGRAPHIC_TYPE_GEO_KEY
        } else {
            PROJECTED_CS_TYPE_GEO_KEY
        };
        keys.push([type_key, 0, 1, epsg.unwrap_or(USER_DEFINED)]);
        keys.sort_by_key(|key| key[0]);

        tags.geo_keys = vec![1, 1, 0, keys.len() as u16];
        tags.geo_keys.extend(keys.into_iter().flatten());

        tags.nodata = raster.nodata().map(format_nodata);
        tags.metadata = scale_offset_metadata(raster.scales(), raster.offsets());
        tags
    }

    fn write<W: Write + Seek, K: TiffKind>(
        &self,
        dir: &mut DirectoryEncoder<'_, W, K>,
    ) -> TiffResult<()> {
        if let Some(scale) = &self.pixel_scale {
            dir.write_tag(Tag::ModelPixelScaleTag, scale.as_slice())?;
        }
        if let Some(tiepoint) = &self.tiepoint {
            dir.write_tag(Tag::ModelTiepointTag, tiepoint.as_slice())?;
        }
        if let Some(matrix) = &self.transformation {
            dir.write_tag(Tag::ModelTransformationTag, matrix.as_slice())?;
        }
        dir.write_tag(Tag::GeoKeyDirectoryTag, self.geo_keys.as_slice())?;
        dir.write_tag(Tag::GeoAsciiParamsTag, self.ascii_params.as_str())?;
        if let Some(nodata) = &self.nodata {
            dir.write_tag(Tag::GdalNodata, nodata.as_str())?;
        }
        if let Some(metadata) = &self.metadata {
            dir.write_tag(Tag::Unknown(GDAL_METADATA), metadata.as_str())?;
        }
        Ok(())
    }
}

fn format_nodata(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        value.to_string()
    }
}

fn parse_nodata(text: &str) -> Option<f64> {
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if text.eq_ignore_ascii_case("nan") || text.eq_ignore_ascii_case("-nan") {
        return Some(f64::NAN);
    }
    text.parse().ok()
}

fn scale_offset_metadata(scales: &[f64], offsets: &[f64]) -> Option<String> {
    if scales.iter().all(|s| *s == 1.0) && offsets.iter().all(|o| *o == 0.0) {
        return None;
    }
    let mut xml = String::from("<GDALMetadata>\n");
    for (band, (scale, offset)) in scales.iter().zip(offsets).enumerate() {
        xml.push_str(&format!(
            "  <Item name=\"OFFSET\" sample=\"{band}\" role=\"offset\">{offset}</Item>\n"
        ));
        xml.push_str(&format!(
            "  <Item name=\"SCALE\" sample=\"{band}\" role=\"scale\">{scale}</Item>\n"
        ));
    }
    xml.push_str("</GDALMetadata>");
    Some(xml)
}

fn xml_attribute<'a>(element: &'a str, name: &str) -> Option<&'a str> {
    let start = element.find(&format!("{name}=\""))? + name.len() + 2;
    let len = element[start..].find('"')?;
    Some(&element[start..start + len])
}

/// Per-band `(scales, offsets)` from a `GDAL_METADATA` document.
fn parse_scale_offset(xml: &str, bands: usize) -> (Vec<f64>, Vec<f64>) {
    let mut scales = vec![1.0; bands];
    let mut offsets = vec![0.0; bands];
    for item in xml.split("<Item ").skip(1) {
        let Some((attributes, rest)) = item.split_once('>') else {
            continue;
        };
        let Some(value) = rest.split('<').next().and_then(|v| v.trim().parse().ok()) else {
            continue;
        };
        let Some(band) = xml_attribute(attributes, "sample").and_then(|s| s.parse::<usize>().ok())
        else {
            continue;
        };
        if band >= bands {
            continue;
        }
        match xml_attribute(attributes, "role") {
            Some("scale") => scales[band] = value,
            Some("offset") => offsets[band] = value,
            _ => {}
        }
    }
    (scales, offsets)
}

fn dtype_of(sample_format: u16, bits: u16) -> Option<DataType> {
    let dtype = match (sample_format, bits) {
        (1, 8) => DataType::UInt8,
        (1, 16) => DataType::UInt16,
        (2, 16) => DataType::Int16,
        (1, 32) => DataType::UInt32,
        (2, 32) => DataType::Int32,
        (2, 64) => DataType::Int64,
        (3, 32) => DataType::Float32,
        (3, 64) => DataType::Float64,
        _ => return None,
    };
    Some(dtype)
}

fn sample_format_of(dtype: DataType) -> u16 {
    if dtype.is_floating() {
        3
    } else if dtype.is_signed() {
        2
    } else {
        1
    }
}

fn first_u16<R: Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> TiffResult<Option<u16>> {
    Ok(decoder
        .find_tag(tag)?
        .map(|v| v.into_u16_vec())
        .transpose()?
        .and_then(|v| v.first().copied()))
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> TiffResult<(Option<Crs>, bool)> {
    let Some(directory) = decoder
        .find_tag(Tag::GeoKeyDirectoryTag)?
        .map(|v| v.into_u16_vec())
        .transpose()?
    else {
        return Ok((None, false));
    };
    let ascii = decoder
        .find_tag(Tag::GeoAsciiParamsTag)?
        .map(|v| v.into_string())
        .transpose()?
        .unwrap_or_default();

    let mut epsg = None;
    let mut citation = None;
    let mut pixel_is_point = false;
    for key in directory.chunks_exact(4).skip(1) {
        let (id, location, count, value) = (key[0], key[1], key[2] as usize, key[3] as usize);
        match id {
            GEOGRAPHIC_TYPE_GEO_KEY | PROJECTED_CS_TYPE_GEO_KEY
                if location == 0 && value as u16 != USER_DEFINED =>
            {
                epsg = Some(value as u32);
            }
            GT_CITATION_GEO_KEY if location == Tag::GeoAsciiParamsTag.to_u16() => {
                citation = ascii
                    .get(value..value + count)
                    .map(|c| c.trim_end_matches(['|', '\0']).to_string());
            }
            GT_RASTER_TYPE_GEO_KEY => pixel_is_point = value as u16 == RASTER_PIXEL_IS_POINT,
            _ => {}
        }
    }

    let crs = match (epsg, citation) {
        (Some(code), _) => Some(Crs::from_epsg(code)),
        (None, Some(citation)) => Crs::new(citation).ok(),
        _ => None,
    };
    Ok((crs, pixel_is_point))
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> TiffResult<GeoTransform> {
    let f64s = |v: Option<tiff::decoder::ifd::Value>| v.map(|v| v.into_f64_vec()).transpose();

    if let Some(m) = f64s(decoder.find_tag(Tag::ModelTransformationTag)?)? {
        if m.len() >= 8 {
            return Ok([m[3], m[0], m[1], m[7], m[4], m[5]]);
        }
    }
    let scale = f64s(decoder.find_tag(Tag::ModelPixelScaleTag)?)?;
    let tiepoint = f64s(decoder.find_tag(Tag::ModelTiepointTag)?)?;
    match (scale, tiepoint) {
        (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => Ok([
            t[3] - t[0] * s[0],
            s[0],
            0.0,
            t[4] + t[1] * s[1],
            0.0,
            -s[1],
        ]),
        _ => Ok([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
    }
}

/// Tags of the first image, as stored.
struct RawTags {
    width: u32,
    height: u32,
    samples: u16,
    bits: u16,
    sample_format: u16,
    crs: Option<Crs>,
    transform: GeoTransform,
    nodata: Option<f64>,
    metadata: Option<String>,
}

fn read_tags<R: Read + Seek>(decoder: &mut Decoder<R>) -> TiffResult<RawTags> {
    let (width, height) = decoder.dimensions()?;
    let (crs, pixel_is_point) = read_crs(decoder)?;
    let mut transform = read_transform(decoder)?;
    if pixel_is_point {
        transform[0] -= 0.5 * (transform[1] + transform[2]);
        transform[3] -= 0.5 * (transform[4] + transform[5]);
    }
    Ok(RawTags {
        width,
        height,
        samples: first_u16(decoder, Tag::SamplesPerPixel)?.unwrap_or(1),
        bits: first_u16(decoder, Tag::BitsPerSample)?.unwrap_or(1),
        sample_format: first_u16(decoder, Tag::SampleFormat)?.unwrap_or(1),
        crs,
        transform,
        nodata: decoder
            .find_tag(Tag::GdalNodata)?
            .map(|v| v.into_string())
            .transpose()?
            .and_then(|text| parse_nodata(&text)),
        metadata: decoder
            .find_tag(Tag::Unknown(GDAL_METADATA))?
            .map(|v| v.into_string())
            .transpose()?,
    })
}

fn read_metadata<R: Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<RasterMetadata> {
    let tags = read_tags(decoder).map_err(io_err(path))?;

    let dtype = dtype_of(tags.sample_format, tags.bits).ok_or_else(|| {
        GeodataError::raster_io(
            path,
            format!(
                "unsupported sample format {} with {} bits",
                tags.sample_format, tags.bits
            ),
        )
    })?;
    let band_count = tags.samples as usize;
    let (scales, offsets) = match &tags.metadata {
        Some(xml) => parse_scale_offset(xml, band_count),
        None => (vec![1.0; band_count], vec![0.0; band_count]),
    };
    let shape = Shape::new(tags.height as usize, tags.width as usize)
        .map_err(|e| GeodataError::raster_io(path, e))?;

    Ok(RasterMetadata {
        crs: tags.crs,
        transform: tags.transform,
        shape,
        dtype,
        band_count,
        nodata: tags.nodata,
        scales,
        offsets,
        subdatasets: vec![],
    })
}

fn into_f64(result: DecodingResult) -> Vec<f64> {
    match result {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        #[allow(unreachable_patterns)]
        _ => Vec::new(),
    }
}

/// Casts every value to the storage type. NaN in an integer raster becomes
/// the nodata value, or zero.
fn stored_values(raster: &Raster) -> impl Iterator<Item = f64> + '_ {
    let dtype = raster.dtype();
    let nodata = raster.nodata().unwrap_or(0.0);
    let bands = raster.band_count();
    let shape = raster.spec().shape();
    let data = raster.data();
    (0..shape.rows).flat_map(move |row| {
        (0..shape.cols).flat_map(move |col| {
            (0..bands).map(move |band| {
                let value = data[[band, row, col]];
                if value.is_nan() && dtype.is_integer() {
                    dtype.cast(nodata)
                } else {
                    dtype.cast(value)
                }
            })
        })
    })
}

fn push_sample(bytes: &mut Vec<u8>, dtype: DataType, value: f64) {
    match dtype {
        DataType::UInt8 => bytes.push(value as u8),
        DataType::UInt16 => bytes.extend_from_slice(&(value as u16).to_ne_bytes()),
        DataType::Int16 => bytes.extend_from_slice(&(value as i16).to_ne_bytes()),
        DataType::UInt32 => bytes.extend_from_slice(&(value as u32).to_ne_bytes()),
        DataType::Int32 => bytes.extend_from_slice(&(value as i32).to_ne_bytes()),
        DataType::Int64 => bytes.extend_from_slice(&(value as i64).to_ne_bytes()),
        DataType::Float32 => bytes.extend_from_slice(&(value as f32).to_ne_bytes()),
        DataType::Float64 => bytes.extend_from_slice(&value.to_ne_bytes()),
    }
}

fn tiff_compression(options: &RasterCreationOptions) -> TiffCompression {
    match options.compress {
        Some(Compression::Lzw) => TiffCompression::Lzw,
        Some(Compression::Deflate) => TiffCompression::Deflate(match options.compress_level {
            Some(level) if level <= 3 => DeflateLevel::Fast,
            Some(level) if level >= 7 => DeflateLevel::Best,
            _ => DeflateLevel::Balanced,
        }),
        _ => TiffCompression::Uncompressed,
    }
}

fn write_band<C, W>(
    encoder: &mut TiffEncoder<W>,
    shape: Shape,
    tags: &GeoTags,
    data: &[C::Inner],
) -> TiffResult<()>
where
    C: ColorType,
    [C::Inner]: TiffValue,
    W: Write + Seek,
{
    let mut image = encoder.new_image::<C>(shape.cols as u32, shape.rows as u32)?;
    tags.write(image.encoder())?;
    image.write_data(data)
}

fn write_single_band<W: Write + Seek>(
    encoder: &mut TiffEncoder<W>,
    raster: &Raster,
    tags: &GeoTags,
) -> TiffResult<()> {
    let shape = raster.spec().shape();
    let values = stored_values(raster);
    match raster.dtype() {
        DataType::UInt8 => {
            let data: Vec<u8> = values.map(|v| v as u8).collect();
            write_band::<Gray8, W>(encoder, shape, tags, &data)
        }
        DataType::UInt16 => {
            let data: Vec<u16> = values.map(|v| v as u16).collect();
            write_band::<Gray16, W>(encoder, shape, tags, &data)
        }
        DataType::Int16 => {
            let data: Vec<i16> = values.map(|v| v as i16).collect();
            write_band::<GrayI16, W>(encoder, shape, tags, &data)
        }
        DataType::UInt32 => {
            let data: Vec<u32> = values.map(|v| v as u32).collect();
            write_band::<Gray32, W>(encoder, shape, tags, &data)
        }
        DataType::Int32 => {
            let data: Vec<i32> = values.map(|v| v as i32).collect();
            write_band::<GrayI32, W>(encoder, shape, tags, &data)
        }
        DataType::Int64 => {
            let data: Vec<i64> = values.map(|v| v as i64).collect();
            write_band::<GrayI64, W>(encoder, shape, tags, &data)
        }
        DataType::Float32 => {
            let data: Vec<f32> = values.map(|v| v as f32).collect();
            write_band::<Gray32Float, W>(encoder, shape, tags, &data)
        }
        DataType::Float64 => {
            let data: Vec<f64> = values.collect();
            write_band::<Gray64Float, W>(encoder, shape, tags, &data)
        }
    }
}

/// Arbitrary band counts go through the directory encoder: one
/// uncompressed, pixel-interleaved strip.
fn write_multi_band<W: Write + Seek>(
    encoder: &mut TiffEncoder<W>,
    raster: &Raster,
    tags: &GeoTags,
) -> TiffResult<()> {
    let shape = raster.spec().shape();
    let dtype = raster.dtype();
    let bands = raster.band_count();

    let mut dir = encoder.image_directory()?;
    dir.write_tag(Tag::ImageWidth, shape.cols as u32)?;
    dir.write_tag(Tag::ImageLength, shape.rows as u32)?;
    dir.write_tag(Tag::BitsPerSample, vec![dtype.bits() as u16; bands].as_slice())?;
    dir.write_tag(Tag::Compression, 1u16)?;
    dir.write_tag(Tag::PhotometricInterpretation, 1u16)?;
    dir.write_tag(Tag::SamplesPerPixel, bands as u16)?;
    dir.write_tag(
        Tag::SampleFormat,
        vec![sample_format_of(dtype); bands].as_slice(),
    )?;
    dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
    dir.write_tag(Tag::RowsPerStrip, shape.rows as u32)?;
    dir.write_tag(Tag::ExtraSamples, vec![0u16; bands - 1].as_slice())?;
    tags.write(&mut dir)?;

    let mut bytes = Vec::with_capacity(shape.rows * shape.cols * bands * dtype.bytes() as usize);
    for value in stored_values(raster) {
        push_sample(&mut bytes, dtype, value);
    }
    let offset = dir.write_data(bytes.as_slice())?;
    let offset = u32::try_from(offset).map_err(|_| TiffError::LimitsExceeded)?;
    dir.write_tag(Tag::StripOffsets, offset)?;
    dir.write_tag(Tag::StripByteCounts, bytes.len() as u32)?;
    dir.finish()
}

impl TiffDriver {
    fn encode<W: Write + Seek>(
        &self,
        writer: W,
        raster: &Raster,
        options: &RasterCreationOptions,
    ) -> TiffResult<()> {
        let tags = GeoTags::for_raster(raster);
        if raster.band_count() == 1 {
            let mut encoder = TiffEncoder::new(writer)?.with_compression(tiff_compression(options));
            write_single_band(&mut encoder, raster, &tags)
        } else {
            let mut encoder = TiffEncoder::new(writer)?;
            write_multi_band(&mut encoder, raster, &tags)
        }
    }
}

impl RasterDriver for TiffDriver {
    fn open(&self, path: &Path) -> Result<RasterMetadata> {
        let mut decoder = open_decoder(path)?;
        read_metadata(&mut decoder, path)
    }

    fn read(&self, path: &Path) -> Result<Raster> {
        let mut decoder = open_decoder(path)?;
        let metadata = read_metadata(&mut decoder, path)?;
        let samples = into_f64(decoder.read_image().map_err(io_err(path))?);

        let Shape { rows, cols } = metadata.shape;
        let bands = metadata.band_count;
        if samples.len() != rows * cols * bands {
            return Err(GeodataError::raster_io(
                path,
                format!(
                    "decoded {} samples, expected {rows}x{cols}x{bands}",
                    samples.len()
                ),
            ));
        }
        let data = Array3::from_shape_fn((bands, rows, cols), |(b, r, c)| {
            samples[(r * cols + c) * bands + b]
        });

        let crs = metadata.crs.clone().ok_or_else(|| {
            GeodataError::raster_io(path, "file carries no coordinate reference system")
        })?;
        let spec = SpatialSpec::new(crs, metadata.transform, metadata.shape)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Raster::new(name, data, spec, metadata.dtype)?
            .with_nodata(metadata.nodata)
            .with_scales_offsets(metadata.scales, metadata.offsets)
    }

    fn write(&self, path: &Path, raster: &Raster, options: &RasterCreationOptions) -> Result<()> {
        options.validate()?;
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.encode(&mut writer, raster, options)
            .map_err(io_err(path))?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_near;
    use crate::spec::GeoTransformEx;
    use crate::test_utils::TempFixture;
    use ndarray::Array2;

    fn spec(crs: Crs) -> SpatialSpec {
        SpatialSpec::new(
            crs,
            GeoTransform::from_origin(10.0, 50.0, 0.5, 0.25),
            Shape::new(3, 4).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn single_band_roundtrip() {
        let fixture = TempFixture::empty("single.tif");
        let band = Array2::from_shape_fn((3, 4), |(r, c)| (r * 4 + c) as f64);
        let raster = Raster::from_band("x", band, spec(Crs::from_epsg(4326)), DataType::Int16)
            .unwrap()
            .with_nodata(Some(-1.0));
        let options = RasterCreationOptions {
            compress: Some(Compression::Deflate),
            ..Default::default()
        };
        TiffDriver.write(fixture.path(), &raster, &options).unwrap();

        let metadata = TiffDriver.open(fixture.path()).unwrap();
        assert_eq!(metadata.crs, Some(Crs::from_epsg(4326)));
        assert_eq!(metadata.dtype, DataType::Int16);
        assert_eq!(metadata.band_count, 1);
        assert_eq!(metadata.nodata, Some(-1.0));
        assert_eq!(metadata.shape, Shape::new(3, 4).unwrap());
        for (a, b) in metadata.transform.iter().zip(raster.spec().transform()) {
            assert_near!(a, b, epsilon = 1e-12);
        }

        let read = TiffDriver.read(fixture.path()).unwrap();
        assert_eq!(read.data(), raster.data());
        assert_eq!(read.name(), "single");
    }

    #[test]
    fn multi_band_roundtrip_with_scales() {
        let fixture = TempFixture::empty("multi.tif");
        let data = Array3::from_shape_fn((3, 3, 4), |(b, r, c)| (b * 100 + r * 4 + c) as f64);
        let raster = Raster::new("x", data, spec(Crs::from_epsg(3035)), DataType::Float32)
            .unwrap()
            .with_nodata(Some(f64::NAN))
            .with_scales_offsets(vec![1.0, 2.0, 0.5], vec![0.0, 1.0, -1.0])
            .unwrap();
        TiffDriver
            .write(fixture.path(), &raster, &RasterCreationOptions::default())
            .unwrap();

        let read = TiffDriver.read(fixture.path()).unwrap();
        assert_eq!(read.band_count(), 3);
        assert_eq!(read.data(), raster.data());
        assert_eq!(read.scales(), &[1.0, 2.0, 0.5]);
        assert_eq!(read.offsets(), &[0.0, 1.0, -1.0]);
        assert!(read.nodata().unwrap().is_nan());
        assert_eq!(read.spec().crs(), &Crs::from_epsg(3035));
    }

    #[test]
    fn free_form_crs_survives() {
        let fixture = TempFixture::empty("custom.tif");
        let crs = Crs::new("+proj=moll +lon_0=0 +datum=WGS84").unwrap();
        let raster = Raster::filled("x", spec(crs.clone()), 1, DataType::UInt8, 7.0).unwrap();
        TiffDriver
            .write(fixture.path(), &raster, &RasterCreationOptions::default())
            .unwrap();
        assert_eq!(TiffDriver.open(fixture.path()).unwrap().crs, Some(crs));
    }

    #[test]
    fn rotated_transform_roundtrip() {
        let fixture = TempFixture::empty("rotated.tif");
        let spec = SpatialSpec::new(
            Crs::from_epsg(32631),
            [500_000.0, 10.0, 2.0, 4_000_000.0, 1.5, -10.0],
            Shape::new(2, 2).unwrap(),
        )
        .unwrap();
        let raster = Raster::filled("x", spec.clone(), 1, DataType::Float64, 1.0).unwrap();
        TiffDriver
            .write(fixture.path(), &raster, &RasterCreationOptions::default())
            .unwrap();
        let metadata = TiffDriver.open(fixture.path()).unwrap();
        assert_eq!(&metadata.transform, spec.transform());
        assert!(metadata.transform.invert().is_ok());
    }

    #[test]
    fn integer_nan_becomes_nodata() {
        let fixture = TempFixture::empty("nan.tif");
        let band = Array2::from_shape_vec((1, 2), vec![f64::NAN, 3.0]).unwrap();
        let spec = SpatialSpec::new(
            Crs::from_epsg(4326),
            GeoTransform::from_origin(0.0, 1.0, 1.0, 1.0),
            Shape::new(1, 2).unwrap(),
        )
        .unwrap();
        let raster = Raster::from_band("x", band, spec, DataType::Int32)
            .unwrap()
            .with_nodata(Some(-9999.0));
        TiffDriver
            .write(fixture.path(), &raster, &RasterCreationOptions::default())
            .unwrap();
        let read = TiffDriver.read(fixture.path()).unwrap();
        assert_eq!(read.data().as_slice().unwrap(), &[-9999.0, 3.0]);
    }

    #[test]
    fn missing_file_is_raster_io() {
        let fixture = TempFixture::empty("missing.tif");
        assert!(matches!(
            TiffDriver.open(fixture.path()),
            Err(GeodataError::RasterIo { .. })
        ));
    }

    #[test]
    fn scale_offset_xml() {
        let xml = scale_offset_metadata(&[2.0], &[1.5]).unwrap();
        assert_eq!(parse_scale_offset(&xml, 1), (vec![2.0], vec![1.5]));
        assert!(scale_offset_metadata(&[1.0, 1.0], &[0.0, 0.0]).is_none());
        assert_eq!(parse_nodata("nan\0").map(f64::is_nan), Some(true));
        assert_eq!(parse_nodata("-9999"), Some(-9999.0));
    }
}
