//! Core traits and types for the V4L2 capture abstraction.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Field order of captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrder {
    /// Let the driver choose.
    Any,
    /// Progressive (non-interlaced) frames.
    Progressive,
    /// Both fields interleaved line by line in one buffer.
    Interlaced,
    /// Any other field arrangement reported by a driver.
    Other,
}

impl From<v4l::format::FieldOrder> for FieldOrder {
    fn from(order: v4l::format::FieldOrder) -> Self {
        use v4l::format::FieldOrder as V4lOrder;
        match order {
            V4lOrder::Any => Self::Any,
            V4lOrder::Progressive => Self::Progressive,
            V4lOrder::Interlaced | V4lOrder::InterlacedTB | V4lOrder::InterlacedBT => {
                Self::Interlaced
            }
            _ => Self::Other,
        }
    }
}

impl From<FieldOrder> for v4l::format::FieldOrder {
    fn from(order: FieldOrder) -> Self {
        match order {
            FieldOrder::Progressive => Self::Progressive,
            FieldOrder::Interlaced => Self::Interlaced,
            FieldOrder::Any | FieldOrder::Other => Self::Any,
        }
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Field order.
    pub field_order: FieldOrder,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

/// Bytes in one YUYV row of `width` pixels; an odd width still takes a
/// whole macropixel.
#[must_use]
pub const fn yuyv_stride(width: u32) -> u32 {
    width.div_ceil(2).saturating_mul(4)
}

impl Format {
    /// Create a new format specification.
    ///
    /// Stride and size saturate at `u32::MAX` for absurd dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let stride = yuyv_stride(width);
        let size = stride.saturating_mul(height);
        Self {
            width,
            height,
            fourcc,
            field_order: FieldOrder::Interlaced,
            stride,
            size,
        }
    }

    /// Raise stride and size to at least what width and height imply.
    ///
    /// Some drivers report a zero or short `bytesperline`/`sizeimage`.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.stride = self.stride.max(yuyv_stride(self.width));
        let min_size = self.stride.saturating_mul(self.height);
        self.size = self.size.max(min_size);
        self
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Location of one device buffer, as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Buffer index.
    pub index: u32,
    /// Buffer length in bytes.
    pub length: u32,
    /// Offset to pass to `mmap`.
    pub offset: u32,
    /// Whether the driver still holds the buffer, queued or done.
    pub in_flight: bool,
}

/// Metadata of a buffer handed back by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferMeta {
    /// Buffer index.
    pub index: u32,
    /// Bytes of payload the device wrote.
    pub bytes_used: u32,
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// The device flagged the payload as corrupt.
    pub errored: bool,
}

/// Outcome of a single dequeue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dequeue {
    /// A filled buffer was handed back.
    Filled(BufferMeta),
    /// Nothing ready yet; wait and try again.
    Pending,
}

/// Error type for camera operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Device path could not be stat'ed.
    #[error("cannot identify '{}': {source}", path.display())]
    DeviceNotFound {
        /// Device path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Device path exists but is not a character special file.
    #[error("{} is no device", .0.display())]
    NotCharDevice(PathBuf),
    /// Failed to open device.
    #[error("failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Device lacks the video capture capability.
    #[error("{0} is no video capture device")]
    NoCaptureCapability(String),
    /// Device lacks streaming I/O.
    #[error("{0} does not support streaming i/o")]
    NoStreamingCapability(String),
    /// Format negotiation was rejected or produced an unusable format.
    #[error("format rejected: {0}")]
    FormatRejected(String),
    /// The device granted fewer than two buffers.
    #[error("insufficient buffer memory on {device}: granted {granted}, need at least 2")]
    InsufficientBuffers {
        /// Device name.
        device: String,
        /// Number of buffers granted.
        granted: u32,
    },
    /// Mapping a buffer into process memory failed.
    #[error("failed to map buffer {index}: {source}")]
    MapFailed {
        /// Buffer index.
        index: u32,
        /// Underlying error.
        source: io::Error,
    },
    /// Enabling streaming was rejected.
    #[error("failed to start streaming: {0}")]
    StreamOnFailed(String),
    /// The device handed back a buffer index outside the pool.
    #[error("device returned buffer index {index}, pool holds {count}")]
    InvalidBufferIndex {
        /// Index returned by the device.
        index: u32,
        /// Number of slots in the pool.
        count: usize,
    },
    /// A slot was used in a state that does not permit the operation.
    #[error("buffer {index} is {state:?}, cannot {operation}")]
    InvalidSlotState {
        /// Slot index.
        index: u32,
        /// Current state of the slot.
        state: crate::pool::SlotState,
        /// Attempted operation.
        operation: &'static str,
    },
    /// The stream lost data; the frame was dropped.
    #[error("stream lost data, frame dropped")]
    StreamLost,
    /// No frame became ready within the timeout.
    #[error("no frame ready within {0:?}")]
    Timeout(Duration),
    /// The wait was cancelled.
    #[error("capture cancelled")]
    Cancelled,
    /// The filled buffer is smaller than the negotiated frame.
    #[error("frame buffer too small: expected {expected} bytes, got {actual}")]
    FrameTooSmall {
        /// Bytes required by the negotiated format.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },
    /// Pixel coordinates outside the frame.
    #[error("pixel ({x}, {y}) outside {width}x{height} frame")]
    PixelOutOfBounds {
        /// X coordinate.
        x: u32,
        /// Y coordinate.
        y: u32,
        /// Frame width.
        width: u32,
        /// Frame height.
        height: u32,
    },
    /// Error during a streaming operation.
    #[error("stream error: {0}")]
    StreamError(String),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CameraError {
    /// Whether the error only affects the current frame.
    ///
    /// After a recoverable error the camera stays usable and the next
    /// `acquire_frame` call may succeed.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::StreamLost | Self::Timeout(_) | Self::FrameTooSmall { .. } | Self::Cancelled
        )
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Memory region of one device buffer mapped into the process.
///
/// The region is unmapped when dropped.
pub trait MappedRegion {
    /// Length of the region in bytes.
    fn len(&self) -> usize;

    /// Whether the region is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` over the region's bytes.
    fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&[u8]) -> T;
}

/// Abstraction over the streaming capture protocol of a device.
///
/// The operations mirror the V4L2 memory-mapped streaming sequence:
/// negotiate, request and map buffers, queue them, stream on, then
/// repeatedly wait, dequeue and requeue, and finally stream off.
pub trait CameraDevice {
    /// Mapped memory of one buffer.
    type Region: MappedRegion;

    /// Device name used in diagnostics.
    fn name(&self) -> &str;

    /// Get device capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Set capture format. Returns the actual format set by the driver.
    fn set_format(&mut self, format: &Format) -> Result<Format>;

    /// Request `count` buffers. Returns the number actually granted.
    fn request_buffers(&mut self, count: u32) -> Result<u32>;

    /// Query length and mapping offset of buffer `index`.
    fn query_buffer(&self, index: u32) -> Result<BufferInfo>;

    /// Map a buffer into process memory.
    fn map_buffer(&self, info: &BufferInfo) -> Result<Self::Region>;

    /// Hand buffer `index` to the device for filling.
    fn queue_buffer(&mut self, index: u32) -> Result<()>;

    /// Take back one filled buffer, if any is ready.
    fn dequeue_buffer(&mut self) -> Result<Dequeue>;

    /// Block until the device is readable or `timeout` elapses.
    ///
    /// Returns `false` on timeout.
    fn wait_readable(&self, timeout: Duration) -> Result<bool>;

    /// Enable streaming.
    fn stream_on(&mut self) -> Result<()>;

    /// Disable streaming. Every queued buffer returns to the application.
    fn stream_off(&mut self) -> Result<()>;
}
