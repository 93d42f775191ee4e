//! Raster codec.
//!
//! Rasters are stored as binary PGM:
//!
//! ```text
//! P5\n<width> <height>\n255\n<width * height raw bytes, row-major>
//! ```
//!
//! Decoding and encoding go through the `image` crate's PNM codec. Anything
//! that is not an 8-bit `P5` graymap is rejected; a run never starts on a
//! partially valid raster.

use crate::core::error::{RasterError, SegmentResult};
use crate::core::types::Raster;
use image::codecs::pnm::{PnmDecoder, PnmEncoder, PnmSubtype, SampleEncoding};
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};
use std::io::Cursor;
use std::path::Path;

/// Decode a binary PGM image.
pub fn decode_pgm(bytes: &[u8]) -> SegmentResult<Raster> {
    if !bytes.starts_with(b"P5") {
        let found = String::from_utf8_lossy(&bytes[..bytes.len().min(2)]).into_owned();
        return Err(RasterError::BadMagic { found }.into());
    }

    let decoder = PnmDecoder::new(Cursor::new(bytes))?;
    match DynamicImage::from_decoder(decoder)? {
        DynamicImage::ImageLuma8(buffer) => {
            let (width, height) = buffer.dimensions();
            Ok(Raster::new(width as usize, height as usize, buffer.into_raw())?)
        }
        other => Err(RasterError::NotGrayscale {
            color: format!("{:?}", other.color()),
        }
        .into()),
    }
}

/// Read a binary PGM file.
pub fn read_raster(path: impl AsRef<Path>) -> SegmentResult<Raster> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let raster = decode_pgm(&bytes)?;
    log::debug!("Loaded {} ({}x{})", path.display(), raster.width(), raster.height());
    Ok(raster)
}

/// Encode a raster as binary PGM.
pub fn encode_pgm(raster: &Raster) -> SegmentResult<Vec<u8>> {
    let (width, height) = encoded_dimensions(raster)?;
    let mut bytes = Vec::with_capacity(raster.len() + 32);
    let encoder = PnmEncoder::new(&mut bytes).with_subtype(PnmSubtype::Graymap(SampleEncoding::Binary));
    encoder.write_image(raster.pixels(), width, height, ExtendedColorType::L8)?;
    Ok(bytes)
}

/// Write a raster to a binary PGM file.
pub fn write_raster(path: impl AsRef<Path>, raster: &Raster) -> SegmentResult<()> {
    let path = path.as_ref();
    std::fs::write(path, encode_pgm(raster)?)?;
    log::debug!("Wrote {} ({}x{})", path.display(), raster.width(), raster.height());
    Ok(())
}

fn encoded_dimensions(raster: &Raster) -> Result<(u32, u32), RasterError> {
    let too_large = || RasterError::TooLarge {
        width: raster.width(),
        height: raster.height(),
    };
    let width = u32::try_from(raster.width()).map_err(|_| too_large())?;
    let height = u32::try_from(raster.height()).map_err(|_| too_large())?;
    Ok((width, height))
}

/// Load any image format `image` understands as an 8-bit grayscale raster.
///
/// With `resize`, the image is first scaled to exactly `(width, height)`
/// using a Lanczos3 filter.
pub fn convert_to_raster(path: impl AsRef<Path>, resize: Option<(u32, u32)>) -> SegmentResult<Raster> {
    let mut image = image::open(path.as_ref())?;
    if let Some((width, height)) = resize {
        image = image.resize_exact(width, height, FilterType::Lanczos3);
    }
    let gray = image.to_luma8();
    let (width, height) = gray.dimensions();
    Ok(Raster::new(width as usize, height as usize, gray.into_raw())?)
}

/// Place two rasters next to each other, left then right.
///
/// The shorter one is padded with black rows at the bottom.
pub fn side_by_side(left: &Raster, right: &Raster) -> Raster {
    let height = left.height().max(right.height());
    let split = left.width();
    Raster::from_fn(split + right.width(), height, |x, y| {
        if x < split {
            left.get(x, y).unwrap_or(0)
        } else {
            right.get(x - split, y).unwrap_or(0)
        }
    })
}
