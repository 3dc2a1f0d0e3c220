//! EXIF-driven JPEG rotation.
//!
//! Reads the Orientation tag, turns the pixels upright and re-encodes. The
//! source EXIF segment is carried over with Orientation rewritten to 1, so
//! camera and capture data survive while viewers stop rotating a second time.

use crate::models::Orientation;
use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_JPEG_QUALITY: u8 = 100;

#[derive(Debug, Error)]
pub enum RotateError {
    #[error("image carries no EXIF orientation")]
    NoOrientation,
    #[error("unknown EXIF orientation value {0}")]
    UnknownOrientation(u32),
    #[error("image is already upright")]
    AlreadyUpright,
    #[error("could not read EXIF data: {0}")]
    Exif(#[from] exif::Error),
    #[error("JPEG decode failed: {0}")]
    Decode(#[source] image::ImageError),
    #[error("JPEG encode failed: {0}")]
    Encode(#[source] image::ImageError),
    #[error("rotation worker failed: {0}")]
    Worker(String),
}

impl RotateError {
    /// Outcomes that mean "nothing to correct" rather than a broken image.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NoOrientation | Self::AlreadyUpright)
    }
}

/// Upright bytes plus what was done to get there.
#[derive(Debug, Clone)]
pub struct Rotated {
    pub bytes: Bytes,
    pub orientation: Orientation,
    pub width: u32,
    pub height: u32,
}

/// The rotation capability the pipeline calls into.
#[async_trait]
pub trait Rotator: Send + Sync {
    async fn rotate(&self, input: Bytes) -> Result<Rotated, RotateError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ExifRotator {
    quality: u8,
}

impl ExifRotator {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for ExifRotator {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

#[async_trait]
impl Rotator for ExifRotator {
    async fn rotate(&self, input: Bytes) -> Result<Rotated, RotateError> {
        let quality = self.quality;
        tokio::task::spawn_blocking(move || rotate_jpeg(&input, quality))
            .await
            .map_err(|e| RotateError::Worker(e.to_string()))?
    }
}

/// Synchronous rotation of a JPEG buffer.
pub fn rotate_jpeg(input: &[u8], quality: u8) -> Result<Rotated, RotateError> {
    let orientation = read_orientation(input)?;
    if orientation == Orientation::Normal {
        return Err(RotateError::AlreadyUpright);
    }

    let img = image::load_from_memory_with_format(input, ImageFormat::Jpeg)
        .map_err(RotateError::Decode)?;
    let img = apply_orientation(img, orientation);

    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    img.to_rgb8()
        .write_with_encoder(encoder)
        .map_err(RotateError::Encode)?;

    let mut encoded = buf.into_inner();
    if let Some(segment) = exif_segment(input) {
        let mut segment = segment.to_vec();
        match segment
            .get_mut(EXIF_SEGMENT_HEADER_LEN..)
            .and_then(reset_orientation)
        {
            Some(()) => encoded = insert_segment(&encoded, &segment),
            None => warn!("could not rewrite orientation in EXIF segment; dropping it"),
        }
    }

    Ok(Rotated {
        bytes: Bytes::from(encoded),
        orientation,
        width: img.width(),
        height: img.height(),
    })
}

fn read_orientation(data: &[u8]) -> Result<Orientation, RotateError> {
    let mut cursor = Cursor::new(data);
    let exif = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(_)) => return Err(RotateError::NoOrientation),
        Err(err) => return Err(RotateError::Exif(err)),
    };

    let value = exif
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .ok_or(RotateError::NoOrientation)?;

    Orientation::from_u32(value).ok_or(RotateError::UnknownOrientation(value))
}

fn apply_orientation(img: DynamicImage, orientation: Orientation) -> DynamicImage {
    match orientation {
        Orientation::Normal => img,
        Orientation::FlipHorizontal => img.fliph(),
        Orientation::Rotate180 => img.rotate180(),
        Orientation::FlipVertical => img.flipv(),
        Orientation::Transpose => img.rotate90().fliph(),
        Orientation::Rotate90 => img.rotate90(),
        Orientation::Transverse => img.rotate270().fliph(),
        Orientation::Rotate270 => img.rotate270(),
    }
}

/// APP1 marker, segment length and the `Exif\0\0` identifier.
const EXIF_SEGMENT_HEADER_LEN: usize = 10;
const ORIENTATION_TAG: u16 = 0x0112;

/// The complete APP1 segment (marker included) holding EXIF data, if any.
fn exif_segment(jpeg: &[u8]) -> Option<&[u8]> {
    if !jpeg.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut pos = 2;
    while let Some(&[0xFF, marker, hi, lo]) = jpeg.get(pos..pos + 4) {
        // start of scan or end of image: no more metadata segments
        if marker == 0xDA || marker == 0xD9 {
            return None;
        }
        let len = u16::from_be_bytes([hi, lo]) as usize;
        let end = pos + 2 + len;
        if len < 2 || end > jpeg.len() {
            return None;
        }
        if marker == 0xE1 && jpeg[pos + 4..end].starts_with(b"Exif\0\0") {
            return Some(&jpeg[pos..end]);
        }
        pos = end;
    }
    None
}

/// Set the primary IFD's Orientation entry of a TIFF block to 1 in place.
fn reset_orientation(tiff: &mut [u8]) -> Option<()> {
    let big_endian = match tiff.get(0..2)? {
        b"MM" => true,
        b"II" => false,
        _ => return None,
    };
    let read_u16 = |buf: &[u8], at: usize| -> Option<u16> {
        let bytes = [*buf.get(at)?, *buf.get(at + 1)?];
        Some(if big_endian {
            u16::from_be_bytes(bytes)
        } else {
            u16::from_le_bytes(bytes)
        })
    };
    let read_u32 = |buf: &[u8], at: usize| -> Option<u32> {
        let bytes: [u8; 4] = buf.get(at..at + 4)?.try_into().ok()?;
        Some(if big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        })
    };

    let ifd = read_u32(tiff, 4)? as usize;
    let entries = read_u16(tiff, ifd)? as usize;
    for i in 0..entries {
        let entry = ifd + 2 + i * 12;
        if read_u16(tiff, entry)? == ORIENTATION_TAG {
            let upright = if big_endian {
                1u16.to_be_bytes()
            } else {
                1u16.to_le_bytes()
            };
            tiff.get_mut(entry + 8..entry + 10)?.copy_from_slice(&upright);
            return Some(());
        }
    }
    None
}

/// Insert `segment` after SOI, or after a leading JFIF APP0 segment.
fn insert_segment(jpeg: &[u8], segment: &[u8]) -> Vec<u8> {
    let at = match jpeg.get(2..6) {
        Some(&[0xFF, 0xE0, hi, lo]) => {
            (4 + u16::from_be_bytes([hi, lo]) as usize).min(jpeg.len())
        }
        _ => 2.min(jpeg.len()),
    };
    let mut out = Vec::with_capacity(jpeg.len() + segment.len());
    out.extend_from_slice(&jpeg[..at]);
    out.extend_from_slice(segment);
    out.extend_from_slice(&jpeg[at..]);
    out
}
