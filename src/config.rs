//! Capture configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default readiness timeout for one frame.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Settings used to open and run a capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Device node, e.g. `/dev/video0`.
    pub device: PathBuf,
    /// Requested frame width. The device may pick another.
    pub width: u32,
    /// Requested frame height. The device may pick another.
    pub height: u32,
    /// Requested number of mapped buffers.
    pub buffer_count: u32,
    /// How long to wait for a filled buffer.
    pub timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/video0"),
            width: 640,
            height: 480,
            buffer_count: 4,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl CaptureConfig {
    /// Set the device node.
    #[must_use]
    pub fn with_device<P: Into<PathBuf>>(mut self, device: P) -> Self {
        self.device = device.into();
        self
    }

    /// Set the requested resolution.
    #[must_use]
    pub const fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the requested buffer count.
    #[must_use]
    pub const fn with_buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count;
        self
    }

    /// Set the readiness timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
