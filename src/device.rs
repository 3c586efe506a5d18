//! V4L2 device implementation using the v4l crate.
//!
//! Capability and format queries go through v4l's safe API. The buffer
//! protocol (REQBUFS, QUERYBUF, QBUF, DQBUF, STREAMON/OFF) is issued
//! directly so that buffers can be owned slot by slot.

use std::fs;
use std::io;
use std::os::raw::c_int;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;
use v4l::buffer::Type;
use v4l::v4l2::vidioc;
use v4l::video::Capture;
use v4l::Device;

use crate::sys::{self, MmapRegion};
use crate::traits::{
    BufferInfo, BufferMeta, CameraDevice, CameraError, Dequeue, DeviceCapabilities, Format,
    FourCC, Result,
};

/// V4L2 device implementation wrapping the v4l crate.
pub struct V4L2Device {
    device: Device,
    path: PathBuf,
    capabilities: DeviceCapabilities,
}

impl V4L2Device {
    /// Open a V4L2 device node in non-blocking mode.
    ///
    /// The path must exist and be a character device.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).map_err(|source| CameraError::DeviceNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        if !metadata.file_type().is_char_device() {
            return Err(CameraError::NotCharDevice(path.to_path_buf()));
        }

        let device = Device::with_path(path)
            .map_err(|err| CameraError::DeviceOpenFailed(format!("{}: {err}", path.display())))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(format!("{}: {err}", path.display())))?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };
        debug!(path = %path.display(), card = %capabilities.card, "opened device");

        Ok(Self {
            device,
            path: path.to_path_buf(),
            capabilities,
        })
    }

    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn with_index(index: usize) -> Result<Self> {
        Self::open(format!("/dev/video{index}"))
    }

    /// Device node path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> c_int {
        self.device.handle().fd()
    }

    fn stream_ioctl(&self, request: vidioc::_IOC_TYPE) -> io::Result<()> {
        let mut buf_type = Type::VideoCapture as u32;
        sys::xioctl(self.fd(), request, &mut buf_type)
    }
}

impl CameraDevice for V4L2Device {
    type Region = MmapRegion;

    fn name(&self) -> &str {
        self.path.to_str().unwrap_or(&self.capabilities.card)
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        let mut fmt = self
            .device
            .format()
            .map_err(|err| CameraError::FormatRejected(err.to_string()))?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();
        fmt.field_order = format.field_order.into();

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|err| CameraError::FormatRejected(err.to_string()))?;

        Ok(Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            field_order: fmt.field_order.into(),
            stride: fmt.stride,
            size: fmt.size,
        })
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        let mut req = sys::capture_request(count);
        sys::xioctl(self.fd(), vidioc::VIDIOC_REQBUFS, &mut req).map_err(|err| {
            if err.raw_os_error() == Some(libc::EINVAL) {
                CameraError::StreamError(format!(
                    "{} does not support memory mapping",
                    self.name()
                ))
            } else {
                CameraError::Io(err)
            }
        })?;
        Ok(req.count)
    }

    fn query_buffer(&self, index: u32) -> Result<BufferInfo> {
        let mut buf = sys::capture_buffer(index);
        sys::xioctl(self.fd(), vidioc::VIDIOC_QUERYBUF, &mut buf)?;
        Ok(BufferInfo {
            index,
            length: buf.length,
            offset: sys::buffer_offset(&buf),
            in_flight: buf.flags & (sys::V4L2_BUF_FLAG_QUEUED | sys::V4L2_BUF_FLAG_DONE) != 0,
        })
    }

    fn map_buffer(&self, info: &BufferInfo) -> Result<Self::Region> {
        MmapRegion::map(self.fd(), info.offset, info.length as usize).map_err(|source| {
            CameraError::MapFailed {
                index: info.index,
                source,
            }
        })
    }

    fn queue_buffer(&mut self, index: u32) -> Result<()> {
        let mut buf = sys::capture_buffer(index);
        sys::xioctl(self.fd(), vidioc::VIDIOC_QBUF, &mut buf)?;
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> Result<Dequeue> {
        let mut buf = sys::capture_buffer(0);
        match sys::xioctl(self.fd(), vidioc::VIDIOC_DQBUF, &mut buf) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(Dequeue::Pending),
            // The driver may have taken a buffer off its queue without telling
            // us which; the caller resyncs through QUERYBUF.
            Err(err) if err.raw_os_error() == Some(libc::EIO) => {
                return Err(CameraError::StreamLost)
            }
            Err(err) => return Err(CameraError::Io(err)),
        }

        // V4L2 timestamps are non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = buf.timestamp.tv_sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (buf.timestamp.tv_usec.max(0) as u32).saturating_mul(1000);

        Ok(Dequeue::Filled(BufferMeta {
            index: buf.index,
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
            timestamp: Duration::new(secs, nanos),
            errored: buf.flags & sys::V4L2_BUF_FLAG_ERROR != 0,
        }))
    }

    fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        Ok(sys::poll_readable(self.fd(), timeout)?)
    }

    fn stream_on(&mut self) -> Result<()> {
        self.stream_ioctl(vidioc::VIDIOC_STREAMON)?;
        debug!(device = self.name(), "stream on");
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        self.stream_ioctl(vidioc::VIDIOC_STREAMOFF)?;
        debug!(device = self.name(), "stream off");
        Ok(())
    }
}
