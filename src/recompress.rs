//! Lossy recompression of image XObjects.
//!
//! Each image is decoded to 8 bit samples, reduced to gray or RGB (CMYK goes
//! through the device transform, indexed images through their palette) and
//! re-encoded as baseline JPEG. The whole run succeeds or leaves the document
//! untouched.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ExtendedColorType, ImageFormat};
use log::{debug, info};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::xobject::{ColorSpace, ImageObject};
use crate::{Document, Error, Object, ObjectId, Result, Stream};

/// JPEG quality, validated to lie in `1..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quality(u8);

impl Quality {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 100;

    pub fn new(value: u8) -> Result<Quality> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Quality(value))
        } else {
            Err(Error::InvalidParameter(format!(
                "quality {} outside {}..={}",
                value,
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Quality {
    type Error = Error;

    fn try_from(value: u8) -> Result<Quality> {
        Quality::new(value)
    }
}

/// Shared flag asking a running recompression to stop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Decoded image samples, one or three 8 bit channels.
#[derive(Debug, Clone)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub samples: Vec<u8>,
}

/// Re-encodes image XObjects at a fixed quality.
#[derive(Debug, Clone)]
pub struct Recompressor {
    quality: Quality,
    cancel: CancellationToken,
}

impl Recompressor {
    pub fn new(quality: Quality) -> Recompressor {
        Recompressor {
            quality,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Recompressor {
        self.cancel = cancel;
        self
    }

    /// Recompress the images `ids` of `doc` in place.
    ///
    /// Images are processed in parallel and written back only once all of
    /// them succeeded. On error or cancellation `doc` is left unchanged.
    /// Returns the number of streams replaced.
    pub fn apply(&self, doc: &mut Document, ids: &[ObjectId]) -> Result<usize> {
        let snapshot: &Document = doc;
        let work = |id: &ObjectId| -> Result<Option<(ObjectId, Stream)>> {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            Ok(self.recompress_image(snapshot, *id)?.map(|stream| (*id, stream)))
        };

        #[cfg(feature = "rayon")]
        let replacements: Result<Vec<_>> = ids.par_iter().map(work).collect();
        #[cfg(not(feature = "rayon"))]
        let replacements: Result<Vec<_>> = ids.iter().map(work).collect();

        let replacements = replacements?;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let replaced = replacements.iter().flatten().count();
        for (id, stream) in replacements.into_iter().flatten() {
            doc.objects.insert(id, Object::Stream(stream));
        }
        info!(
            "recompressed {} of {} images at quality {}",
            replaced,
            ids.len(),
            self.quality.value()
        );
        Ok(replaced)
    }

    /// Build the replacement stream for one image, or `None` when the image
    /// is better left as it is (stencil masks, or no gain without a color
    /// conversion being required).
    pub fn recompress_image(&self, doc: &Document, id: ObjectId) -> Result<Option<Stream>> {
        let stream = doc
            .get_object(id)
            .and_then(Object::as_stream)
            .map_err(|err| Error::ImageDecode {
                id,
                reason: err.to_string(),
            })?;
        let image = ImageObject::from_stream(id, stream, doc)?;
        if image.image_mask {
            debug!("image {:?} is a stencil mask, skipped", id);
            return Ok(None);
        }

        let raster = decode_raster(&image, stream)?;
        let encoded = encode_jpeg(&raster, self.quality).map_err(|err| Error::Encode {
            id,
            reason: err.to_string(),
        })?;

        let converts_color = source_components(&image.color_space) > 3;
        if !converts_color && encoded.len() >= stream.content.len() {
            debug!(
                "image {:?} kept, {} bytes encoded vs {} stored",
                id,
                encoded.len(),
                stream.content.len()
            );
            return Ok(None);
        }

        let mut replacement = stream.clone();
        let dict = &mut replacement.dict;
        dict.set("Filter", "DCTDecode");
        dict.set("ColorSpace", if raster.channels == 1 { "DeviceGray" } else { "DeviceRGB" });
        dict.set("BitsPerComponent", 8);
        dict.set("Width", i64::from(raster.width));
        dict.set("Height", i64::from(raster.height));
        dict.remove(b"DecodeParms");
        dict.remove(b"Decode");
        debug!("image {:?}: {} -> {} bytes", id, stream.content.len(), encoded.len());
        replacement.set_content(encoded);
        replacement.start_position = None;

        Ok(Some(replacement))
    }
}

/// Recompress every page image of `document` at `quality`.
///
/// Works on a copy; `document` itself is never modified.
pub fn recompress(document: &Document, quality: u8) -> Result<Document> {
    let quality = Quality::new(quality)?;
    let mut recompressed = document.clone();
    let ids = recompressed.unique_image_ids();
    Recompressor::new(quality).apply(&mut recompressed, &ids)?;
    Ok(recompressed)
}

/// Encode a raster as baseline JPEG.
pub fn encode_jpeg(raster: &Raster, quality: Quality) -> image::ImageResult<Vec<u8>> {
    let color_type = if raster.channels == 1 {
        ExtendedColorType::L8
    } else {
        ExtendedColorType::Rgb8
    };
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, quality.value()).encode(
        &raster.samples,
        raster.width,
        raster.height,
        color_type,
    )?;
    Ok(encoded)
}

/// Decode an image stream into gray or RGB samples.
pub fn decode_raster(image: &ImageObject, stream: &Stream) -> Result<Raster> {
    let id = image.id;
    let decode_error = |reason: String| Error::ImageDecode { id, reason };

    let (data, remaining) = stream
        .decode_leading_filters()
        .map_err(|err| decode_error(err.to_string()))?;

    match remaining.as_slice() {
        [] => raw_raster(image, &data),
        [filter] if filter == b"DCTDecode" || filter == b"DCT" => jpeg_raster(image, &data),
        [filter, ..] => Err(decode_error(format!(
            "unsupported filter {}",
            String::from_utf8_lossy(filter)
        ))),
    }
}

fn jpeg_raster(xobject: &ImageObject, data: &[u8]) -> Result<Raster> {
    let decoded = image::load_from_memory_with_format(data, ImageFormat::Jpeg).map_err(|err| Error::ImageDecode {
        id: xobject.id,
        reason: err.to_string(),
    })?;

    let (width, height) = (decoded.width(), decoded.height());
    let (channels, mut samples) = if matches!(decoded.color(), ColorType::L8 | ColorType::L16) {
        (1, decoded.to_luma8().into_raw())
    } else {
        (3, decoded.to_rgb8().into_raw())
    };

    if let Some(decode) = xobject.decode.as_deref().filter(|decode| !is_identity_decode(decode)) {
        // the decoder has already turned CMYK samples into RGB
        if source_components(&xobject.color_space) > 3 {
            return Err(Error::ImageDecode {
                id: xobject.id,
                reason: format!("Decode {:?} on a CMYK JPEG", decode),
            });
        }
        apply_decode(&mut samples, channels, decode);
    }

    Ok(Raster {
        width,
        height,
        channels: channels as u8,
        samples,
    })
}

fn raw_raster(image: &ImageObject, data: &[u8]) -> Result<Raster> {
    let id = image.id;
    let decode_error = |reason: String| Error::ImageDecode { id, reason };
    let truncated = || decode_error(format!("sample data too short ({} bytes)", data.len()));

    match &image.color_space {
        ColorSpace::Indexed { base, hival, lookup } => {
            let components = base
                .components()
                .filter(|n| matches!(n, 1 | 3 | 4))
                .ok_or_else(|| decode_error(format!("unsupported palette base {:?}", base)))?;
            let indices = unpack_samples(data, image.width, image.height, 1, image.bits_per_component, false)
                .ok_or_else(truncated)?;

            let mut expanded = Vec::with_capacity(indices.len() * components);
            for index in indices {
                let start = usize::from(index.min(*hival)) * components;
                let entry = lookup
                    .get(start..start + components)
                    .ok_or_else(|| decode_error("palette too short".to_string()))?;
                expanded.extend_from_slice(entry);
            }
            to_raster(id, image.width, image.height, components, expanded)
        }
        color_space => {
            let components = color_space
                .components()
                .ok_or_else(|| decode_error(format!("unsupported color space {:?}", color_space)))?;
            let mut samples = unpack_samples(data, image.width, image.height, components, image.bits_per_component, true)
                .ok_or_else(truncated)?;
            if let Some(decode) = &image.decode {
                apply_decode(&mut samples, components, decode);
            }
            to_raster(id, image.width, image.height, components, samples)
        }
    }
}

fn to_raster(id: ObjectId, width: u32, height: u32, components: usize, samples: Vec<u8>) -> Result<Raster> {
    let (channels, samples) = match components {
        1 => (1, samples),
        3 => (3, samples),
        4 => (3, cmyk_to_rgb(&samples)),
        n => {
            return Err(Error::ImageDecode {
                id,
                reason: format!("{} color components", n),
            });
        }
    };
    Ok(Raster {
        width,
        height,
        channels,
        samples,
    })
}

/// Color components of the samples as stored, looking through palettes.
fn source_components(color_space: &ColorSpace) -> usize {
    match color_space {
        ColorSpace::Indexed { base, .. } => base.components().unwrap_or(0),
        other => other.components().unwrap_or(0),
    }
}

/// Unpack rows of `bits` wide samples into one byte per sample.
///
/// Rows start on byte boundaries. With `scale` set the values are stretched
/// to the full 0..=255 range, otherwise they are kept (palette indices).
pub fn unpack_samples(
    data: &[u8], width: u32, height: u32, components: usize, bits: u8, scale: bool,
) -> Option<Vec<u8>> {
    let samples_per_row = width as usize * components;
    let row_bytes = (samples_per_row * usize::from(bits)).div_ceil(8);
    let rows = data.get(..row_bytes.checked_mul(height as usize)?)?;

    match bits {
        8 => Some(rows.to_vec()),
        16 => Some(rows.chunks_exact(2).map(|pair| pair[0]).collect()),
        1 | 2 | 4 => {
            let max = (1u16 << bits) - 1;
            let per_byte = 8 / usize::from(bits);
            let mut samples = Vec::with_capacity(samples_per_row * height as usize);
            for row in rows.chunks_exact(row_bytes) {
                for index in 0..samples_per_row {
                    let byte = row[index / per_byte];
                    let shift = 8 - usize::from(bits) * (index % per_byte + 1);
                    let value = (u16::from(byte) >> shift) & max;
                    samples.push(if scale { (value * 255 / max) as u8 } else { value as u8 });
                }
            }
            Some(samples)
        }
        _ => None,
    }
}

fn is_identity_decode(decode: &[f32]) -> bool {
    decode.chunks(2).all(|pair| pair == [0.0, 1.0])
}

/// Map samples through a `/Decode` array, one `[min max]` pair per component.
fn apply_decode(samples: &mut [u8], components: usize, decode: &[f32]) {
    if decode.len() < components * 2 || is_identity_decode(decode) {
        return;
    }

    for (index, sample) in samples.iter_mut().enumerate() {
        let component = index % components;
        let (min, max) = (decode[component * 2], decode[component * 2 + 1]);
        let value = min + f32::from(*sample) / 255.0 * (max - min);
        *sample = (value * 255.0).round().clamp(0.0, 255.0) as u8;
    }
}

/// Device CMYK to RGB: `r = 255·(1−c)(1−k)`, likewise for green and blue.
pub fn cmyk_to_rgb(samples: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(samples.len() / 4 * 3);
    for pixel in samples.chunks_exact(4) {
        let white = 255 - u32::from(pixel[3]);
        for &ink in &pixel[..3] {
            rgb.push(((255 - u32::from(ink)) * white / 255) as u8);
        }
    }
    rgb
}
