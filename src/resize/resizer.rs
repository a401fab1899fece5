use std::io;
use std::path::Path;

use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageDecoder, ImageReader, RgbaImage};
use tracing::{debug, trace};

use super::{Resizer, Transform, TransformOutput};
use crate::buffer::ImageBuffer;
use crate::error::{IoError, LoadError};

// =============================================================================
// Sizing
// =============================================================================

/// Output size of an approximate load.
///
/// The source is halved while both sides stay at or above the target, so
/// the result is the smallest power-of-two reduction that still covers the
/// box. Sources already smaller than the box, and boxes with a zero side,
/// keep their native size.
pub fn approximate_size(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (width, height) = (u64::from(source.0), u64::from(source.1));
    let (target_w, target_h) = (u64::from(target.0), u64::from(target.1));
    if target_w == 0 || target_h == 0 {
        return source;
    }

    let mut sample = 1u64;
    while width / (sample * 2) >= target_w && height / (sample * 2) >= target_h {
        sample *= 2;
    }

    (
        (width / sample).max(1) as u32,
        (height / sample).max(1) as u32,
    )
}

/// Largest size with the source's aspect ratio that fits inside the box.
pub fn fit_size(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (width, height) = source;
    let (target_w, target_h) = target;
    if width == 0 || height == 0 || target_w == 0 || target_h == 0 {
        return source;
    }

    let scale = f64::min(
        f64::from(target_w) / f64::from(width),
        f64::from(target_h) / f64::from(height),
    );
    let fit = |side: u32, bound: u32| ((f64::from(side) * scale).round() as u32).clamp(1, bound);

    (fit(width, target_w), fit(height, target_h))
}

// =============================================================================
// Image Resizer
// =============================================================================

/// [`Resizer`] backed by the `image` crate.
///
/// Sources are opened from the filesystem and their format is sniffed from
/// the content, falling back to the file extension.
#[derive(Debug, Clone)]
pub struct ImageResizer {
    filter: FilterType,
}

impl ImageResizer {
    /// Create a resizer using triangle (bilinear) filtering.
    pub fn new() -> Self {
        Self::with_filter(FilterType::Triangle)
    }

    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }

    fn render(&self, transform: Transform) -> Result<RgbaImage, LoadError> {
        let image = match transform {
            Transform::AsIs { path } => open(&path)?,
            Transform::Decode { bytes, .. } => image::load_from_memory(&bytes)?,
            Transform::Approximate {
                path,
                width,
                height,
            } => {
                let image = open(&path)?;
                let source = (image.width(), image.height());
                let (w, h) = approximate_size(source, (width, height));
                if (w, h) == source {
                    image
                } else {
                    image.resize_exact(w, h, self.filter)
                }
            }
            Transform::CenterCrop {
                path,
                width,
                height,
            } => {
                let image = open(&path)?;
                if width == 0 || height == 0 {
                    image
                } else {
                    image.resize_to_fill(width, height, self.filter)
                }
            }
            Transform::FitInSpace {
                path,
                width,
                height,
            } => {
                let image = open(&path)?;
                let source = (image.width(), image.height());
                let (w, h) = fit_size(source, (width, height));
                if (w, h) == source {
                    image
                } else {
                    image.resize_exact(w, h, self.filter)
                }
            }
        };

        Ok(image.into_rgba8())
    }
}

impl Default for ImageResizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Resizer for ImageResizer {
    fn run(&self, transform: Transform, recycled: Option<ImageBuffer>) -> TransformOutput {
        let mutable = transform.produces_mutable();
        let name = transform.name();

        // Cached bytes whose header matches the recycled buffer decode in place
        let recycled = match (&transform, recycled) {
            (Transform::Decode { bytes, mutable: true }, Some(mut target)) => {
                match decode_into(bytes, &mut target) {
                    Some(Ok(())) => {
                        trace!(buffer = %target.id(), "Decoded directly into recycled buffer");
                        return TransformOutput::success(target, None);
                    }
                    Some(Err(e)) => {
                        debug!(transform = name, error = %e, "Transform failed");
                        return TransformOutput::failure(e, Some(target));
                    }
                    None => Some(target),
                }
            }
            (_, other) => other,
        };

        match self.render(transform) {
            Ok(image) => {
                trace!(
                    transform = name,
                    width = image.width(),
                    height = image.height(),
                    "Transform complete"
                );
                into_buffer(image, mutable, recycled)
            }
            Err(e) => {
                debug!(transform = name, error = %e, "Transform failed");
                TransformOutput::failure(e, recycled)
            }
        }
    }
}

fn open(path: &Path) -> Result<DynamicImage, LoadError> {
    let reader = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| source_error(path, e))?;
    Ok(reader.decode()?)
}

fn source_error(path: &Path, err: io::Error) -> LoadError {
    if err.kind() == io::ErrorKind::NotFound {
        LoadError::Io(IoError::NotFound(path.display().to_string()))
    } else {
        LoadError::Io(IoError::read(path.display(), err))
    }
}

/// Decode `bytes` straight into `target`'s pixels.
///
/// Returns `None` without touching `target` when the stream is not RGBA8 at
/// exactly the target's dimensions, or when `target` is shared.
fn decode_into(bytes: &[u8], target: &mut ImageBuffer) -> Option<Result<(), LoadError>> {
    let reader = ImageReader::new(io::Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    let decoder = match reader.into_decoder() {
        Ok(decoder) => decoder,
        Err(e) => return Some(Err(e.into())),
    };

    if decoder.dimensions() != target.dimensions() || decoder.color_type() != ColorType::Rgba8 {
        return None;
    }
    let pixels = target.pixels_mut()?;
    if decoder.total_bytes() != pixels.len() as u64 {
        return None;
    }

    Some(decoder.read_image(pixels).map_err(LoadError::from))
}

/// Move decoded pixels into a buffer, reusing `recycled` when it fits.
fn into_buffer(image: RgbaImage, mutable: bool, recycled: Option<ImageBuffer>) -> TransformOutput {
    let (width, height) = image.dimensions();

    let recycled = match recycled {
        Some(mut target) if mutable && target.dimensions() == (width, height) => {
            match target.pixels_mut() {
                Some(pixels) => {
                    pixels.copy_from_slice(image.as_raw());
                    trace!(buffer = %target.id(), width, height, "Decoded into recycled buffer");
                    return TransformOutput::success(target, None);
                }
                None => Some(target),
            }
        }
        other => other,
    };

    let pixels = image.into_raw();
    let buffer = if mutable {
        ImageBuffer::from_rgba(width, height, pixels)
    } else {
        ImageBuffer::immutable(width, height, pixels)
    };

    match buffer {
        Some(buffer) => TransformOutput::success(buffer, recycled),
        None => TransformOutput::failure(
            LoadError::Decode {
                message: format!("decoded pixel data does not match {}x{}", width, height),
            },
            recycled,
        ),
    }
}

// =============================================================================
// Tests
// =============================================================================
