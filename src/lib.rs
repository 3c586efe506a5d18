//! yuyv-capture: V4L2 video capture with YUYV to RGB conversion.
//!
//! A [`Camera`] negotiates a YUYV format with a capture device, maps a ring
//! of driver buffers and streams from it. Every [`Camera::acquire_frame`]
//! call waits for one filled buffer, converts it into an owned RGB
//! [`Frame`] and hands the buffer back to the device.
//!
//! The device protocol sits behind the [`CameraDevice`] trait, implemented
//! for real hardware by [`V4L2Device`] and by a mock in unit tests.

pub mod camera;
pub mod config;
pub mod convert;
pub mod device;
pub mod frame;
pub mod pool;
mod sys;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use camera::Camera;
pub use config::CaptureConfig;
pub use device::V4L2Device;
pub use frame::{Frame, FrameMetadata, Rgb};
pub use pool::{BufferPool, SlotState};
pub use traits::{CameraDevice, CameraError, DeviceCapabilities, Format, FourCC, Result};
