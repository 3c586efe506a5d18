//! Decoded RGB frames.

use std::time::Duration;

use crate::convert::RGB_BYTES;
use crate::traits::{CameraError, Result};

/// One RGB pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Rgb {
    /// Create a pixel from its channels.
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl From<(u8, u8, u8)> for Rgb {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Self { r, g, b }
    }
}

impl From<Rgb> for (u8, u8, u8) {
    fn from(pixel: Rgb) -> Self {
        (pixel.r, pixel.g, pixel.b)
    }
}

/// Metadata for a captured frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Bytes the device wrote into the source buffer.
    pub bytes_used: u32,
}

/// A decoded frame: a densely packed, row-major RGB raster.
///
/// Bytes are stored R, G, B per pixel with no row padding. A frame is an
/// owned copy and never borrows device memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
    metadata: FrameMetadata,
}

impl Frame {
    /// Create a black frame.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; raster_len(width, height)],
            metadata: FrameMetadata::default(),
        }
    }

    /// Wrap an existing RGB raster.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = raster_len(width, height);
        if data.len() != expected {
            return Err(CameraError::FrameTooSmall {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
            metadata: FrameMetadata::default(),
        })
    }

    /// Frame width in pixels.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Capture metadata.
    pub const fn metadata(&self) -> &FrameMetadata {
        &self.metadata
    }

    pub(crate) fn set_metadata(&mut self, metadata: FrameMetadata) {
        self.metadata = metadata;
    }

    /// Raw RGB bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume the frame, returning the RGB bytes.
    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    fn offset(&self, x: u32, y: u32) -> Result<usize> {
        if x >= self.width || y >= self.height {
            return Err(CameraError::PixelOutOfBounds {
                x,
                y,
                width: self.width,
                height: self.height,
            });
        }
        Ok((y as usize * self.width as usize + x as usize) * RGB_BYTES)
    }

    /// Read the pixel at (`x`, `y`).
    pub fn pixel(&self, x: u32, y: u32) -> Result<Rgb> {
        let offset = self.offset(x, y)?;
        match self.data.get(offset..offset + RGB_BYTES) {
            Some(&[r, g, b]) => Ok(Rgb::new(r, g, b)),
            _ => Err(CameraError::PixelOutOfBounds {
                x,
                y,
                width: self.width,
                height: self.height,
            }),
        }
    }

    /// Overwrite the pixel at (`x`, `y`).
    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: Rgb) -> Result<()> {
        let offset = self.offset(x, y)?;
        let (width, height) = (self.width, self.height);
        let slot = self
            .data
            .get_mut(offset..offset + RGB_BYTES)
            .ok_or(CameraError::PixelOutOfBounds {
                x,
                y,
                width,
                height,
            })?;
        slot.copy_from_slice(&[pixel.r, pixel.g, pixel.b]);
        Ok(())
    }
}

const fn raster_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * RGB_BYTES
}
