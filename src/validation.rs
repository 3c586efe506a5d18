//! Frame validation utilities for test pattern verification.
//!
//! This module provides functions to validate that captured frames contain
//! expected test patterns. Useful for integration testing with virtual cameras.

use crate::frame::{Frame, Rgb};
use crate::traits::{CameraError, Result};

/// Expected RGB values for 100% SMPTE color bars (8 bars).
///
/// These are the outputs of the YUYV converter for the limited-range YUV
/// values a test pattern generator emits for each bar.
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS: [Rgb; 8] = [
    Rgb::new(234, 237, 234), // White
    Rgb::new(234, 237, 12),  // Yellow
    Rgb::new(13, 238, 235),  // Cyan
    Rgb::new(13, 238, 13),   // Green
    Rgb::new(236, 17, 235),  // Magenta
    Rgb::new(236, 17, 13),   // Red
    Rgb::new(15, 18, 236),   // Blue
    Rgb::new(15, 18, 15),    // Black
];

/// Tolerance for RGB color matching (accounts for chroma rounding between sources).
const COLOR_TOLERANCE: u8 = 15;

/// Validates that a frame contains the SMPTE color bar pattern.
///
/// This function checks 8 vertical stripes at their center positions,
/// verifying that each stripe contains the expected color within
/// [`COLOR_TOLERANCE`].
///
/// # Errors
///
/// Returns `StreamError` if any color bar doesn't match the expected color
/// within tolerance, or `PixelOutOfBounds` if the frame is too narrow to
/// hold eight bars.
pub fn validate_color_bars(frame: &Frame) -> Result<()> {
    let bar_width = frame.width() / 8;
    let center_y = frame.height() / 2;

    for (bar_idx, expected) in (0u32..).zip(SMPTE_COLOR_BARS) {
        // Sample the center of each bar
        let sample_x = (bar_idx * bar_width) + (bar_width / 2);
        let actual = frame.pixel(sample_x, center_y)?;

        if !colors_match(actual, expected, COLOR_TOLERANCE) {
            return Err(CameraError::StreamError(format!(
                "Color bar {bar_idx} mismatch at ({sample_x}, {center_y}): \
                 expected {expected:?}, got {actual:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that a frame contains a horizontal gradient pattern.
///
/// This function samples a horizontal line at the center of the frame and
/// verifies that the luminance increases monotonically from left to right.
/// It also checks that there is a significant overall luminance change
/// across the frame (not a solid color).
///
/// # Errors
///
/// Returns `StreamError` if:
/// - The luminance doesn't increase monotonically
/// - The total luminance change is too small (solid color)
pub fn validate_gradient(frame: &Frame) -> Result<()> {
    let center_y = frame.height() / 2;

    // Sample every 10 pixels to check for monotonic increase
    let mut first_luminance: Option<f32> = None;
    let mut prev_luminance: Option<f32> = None;

    for x in (0..frame.width()).step_by(10) {
        let luminance = luma(frame.pixel(x, center_y)?);

        if first_luminance.is_none() {
            first_luminance = Some(luminance);
        }

        if let Some(prev) = prev_luminance {
            if luminance < prev - 1.0 {
                // Allow small decreases due to rounding
                return Err(CameraError::StreamError(format!(
                    "Gradient not monotonically increasing at x={x}: \
                     luminance {luminance} < previous {prev}"
                )));
            }
        }

        prev_luminance = Some(luminance);
    }

    // Check that there's a significant luminance change across the frame
    if let (Some(first), Some(last)) = (first_luminance, prev_luminance) {
        let luminance_change = last - first;
        if luminance_change < 50.0 {
            return Err(CameraError::StreamError(format!(
                "Insufficient luminance change for gradient: {luminance_change} \
                 (expected at least 50.0)"
            )));
        }
    }

    Ok(())
}

/// Validates that a sequence of frames has incrementing sequence numbers.
///
/// # Errors
///
/// Returns `StreamError` if:
/// - The frames slice is empty
/// - Any sequence number doesn't increment by exactly 1 from the previous
pub fn validate_frame_sequence(frames: &[Frame]) -> Result<()> {
    if frames.is_empty() {
        return Err(CameraError::StreamError(
            "Cannot validate empty frame sequence".to_owned(),
        ));
    }

    for (i, pair) in frames.windows(2).enumerate() {
        let [prev, curr] = pair else { continue };
        let prev_seq = prev.metadata().sequence;
        let curr_seq = curr.metadata().sequence;

        if curr_seq != prev_seq.wrapping_add(1) {
            return Err(CameraError::StreamError(format!(
                "Frame sequence gap at index {}: expected {}, got {curr_seq}",
                i + 1,
                prev_seq.wrapping_add(1)
            )));
        }
    }

    Ok(())
}

/// Rec. 601 luma of an RGB pixel.
fn luma(pixel: Rgb) -> f32 {
    0.114f32.mul_add(
        f32::from(pixel.b),
        0.587f32.mul_add(f32::from(pixel.g), 0.299 * f32::from(pixel.r)),
    )
}

/// Whether every channel of `actual` is within `tolerance` of `expected`.
const fn colors_match(actual: Rgb, expected: Rgb, tolerance: u8) -> bool {
    actual.r.abs_diff(expected.r) <= tolerance
        && actual.g.abs_diff(expected.g) <= tolerance
        && actual.b.abs_diff(expected.b) <= tolerance
}
