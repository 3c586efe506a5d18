//! YUYV (4:2:2 interleaved) to packed RGB conversion.
//!
//! Each 4-byte macropixel `[Y0, Cb, Y1, Cr]` decodes to two RGB pixels that
//! share the chroma pair. The arithmetic is fixed-point integer only:
//!
//! ```text
//! r = y + (357*cr)>>8 - 179
//! g = y - (87*cb)>>8 + 44 - (181*cr)>>8 + 91
//! b = y + (450*cb)>>8 - 226
//! ```

use crate::frame::Rgb;
use crate::traits::{CameraError, Result};

/// Bytes per YUYV macropixel.
pub const MACROPIXEL_BYTES: usize = 4;
/// Bytes per packed RGB pixel.
pub const RGB_BYTES: usize = 3;

#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
const fn clamp_channel(value: i32) -> u8 {
    if value > 255 {
        255
    } else if value < 0 {
        0
    } else {
        value as u8
    }
}

#[inline]
const fn decode(y: i32, cb: i32, cr: i32) -> Rgb {
    let r = y + ((357 * cr) >> 8) - 179;
    let g = y - ((87 * cb) >> 8) + 44 - ((181 * cr) >> 8) + 91;
    let b = y + ((450 * cb) >> 8) - 226;
    Rgb::new(clamp_channel(r), clamp_channel(g), clamp_channel(b))
}

/// Decode one macropixel `[Y0, Cb, Y1, Cr]` into its two pixels.
#[must_use]
#[allow(clippy::cast_lossless)]
pub const fn macropixel_to_rgb(macropixel: [u8; 4]) -> [Rgb; 2] {
    let [y0, cb, y1, cr] = macropixel;
    let cb = cb as i32;
    let cr = cr as i32;
    [decode(y0 as i32, cb, cr), decode(y1 as i32, cb, cr)]
}

/// Convert one row of YUYV into packed RGB.
///
/// `dst.len() / 3` pixels are written. For an odd width the last pixel takes
/// the first luma of the trailing macropixel.
pub fn convert_row(src: &[u8], dst: &mut [u8]) {
    let mut pairs = dst.chunks_exact_mut(2 * RGB_BYTES);
    let mut macropixels = src.chunks_exact(MACROPIXEL_BYTES);

    for (out, mp) in pairs.by_ref().zip(macropixels.by_ref()) {
        let &[y0, cb, y1, cr] = mp else { continue };
        let [first, second] = macropixel_to_rgb([y0, cb, y1, cr]);
        out.copy_from_slice(&[first.r, first.g, first.b, second.r, second.g, second.b]);
    }

    let tail = pairs.into_remainder();
    if let (Some(&[y0, cb, y1, cr]), [r, g, b]) = (macropixels.next(), tail) {
        let [first, _] = macropixel_to_rgb([y0, cb, y1, cr]);
        *r = first.r;
        *g = first.g;
        *b = first.b;
    }
}

/// Bytes of YUYV data in one row of `width` pixels.
#[must_use]
pub const fn row_len(width: u32) -> usize {
    (width as usize).div_ceil(2) * MACROPIXEL_BYTES
}

/// Number of YUYV bytes a frame needs when rows are `stride` bytes apart.
#[must_use]
pub const fn required_len(width: u32, height: u32, stride: u32) -> usize {
    if height == 0 {
        return 0;
    }
    (stride as usize) * (height as usize - 1) + row_len(width)
}

/// Convert a whole YUYV frame into a packed RGB raster.
///
/// `dst` must hold exactly `width * height * 3` bytes. Rows in `src` are
/// `stride` bytes apart, which may include driver padding.
pub fn yuyv_to_rgb(src: &[u8], width: u32, height: u32, stride: u32, dst: &mut [u8]) -> Result<()> {
    let row_in = row_len(width);
    if (stride as usize) < row_in {
        return Err(CameraError::FormatRejected(format!(
            "stride {stride} shorter than a {width} pixel row"
        )));
    }

    let expected = required_len(width, height, stride);
    if src.len() < expected {
        return Err(CameraError::FrameTooSmall {
            expected,
            actual: src.len(),
        });
    }

    let row_out = width as usize * RGB_BYTES;
    let raster = row_out * height as usize;
    if dst.len() != raster {
        return Err(CameraError::FrameTooSmall {
            expected: raster,
            actual: dst.len(),
        });
    }
    if row_out == 0 {
        return Ok(());
    }

    for (src_row, dst_row) in src.chunks(stride as usize).zip(dst.chunks_exact_mut(row_out)) {
        convert_row(src_row.get(..row_in).unwrap_or(src_row), dst_row);
    }
    Ok(())
}
