//! Capture device lifecycle and the frame acquisition cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::convert;
use crate::device::V4L2Device;
use crate::frame::{Frame, FrameMetadata};
use crate::pool::BufferPool;
use crate::traits::{BufferMeta, CameraDevice, CameraError, Format, FourCC, Result};

/// Longest single readiness wait while a cancel flag is installed.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// An open, streaming capture device and its buffer ring.
///
/// Frames are pulled with [`Camera::acquire_frame`]; each call waits for one
/// filled buffer, converts it to RGB and hands the buffer straight back to
/// the device before returning.
pub struct Camera<D: CameraDevice> {
    device: D,
    pool: BufferPool<D::Region>,
    format: Format,
    timeout: Duration,
    cancel: Option<Arc<AtomicBool>>,
    closed: bool,
}

impl Camera<V4L2Device> {
    /// Open the V4L2 device named in `config` and start streaming.
    pub fn open_v4l2(config: &CaptureConfig) -> Result<Self> {
        let device = V4L2Device::open(&config.device)?;
        Self::open(device, config)
    }
}

impl<D: CameraDevice> Camera<D> {
    /// Negotiate a YUYV format, map the buffer ring and start streaming.
    ///
    /// The resulting width and height are what the device accepted, which
    /// may differ from the request.
    pub fn open(mut device: D, config: &CaptureConfig) -> Result<Self> {
        let caps = device.capabilities();
        if !caps.can_capture {
            return Err(CameraError::NoCaptureCapability(device.name().to_owned()));
        }
        if !caps.can_stream {
            return Err(CameraError::NoStreamingCapability(device.name().to_owned()));
        }

        let format = negotiate(&mut device, config.width, config.height)?;

        let mut pool = BufferPool::allocate(&mut device, config.buffer_count)?;
        pool.queue_all(&mut device)?;

        device
            .stream_on()
            .map_err(|err| CameraError::StreamOnFailed(err.to_string()))?;

        info!(
            device = device.name(),
            width = format.width,
            height = format.height,
            buffers = pool.len(),
            "capture started"
        );

        Ok(Self {
            device,
            pool,
            format,
            timeout: config.timeout,
            cancel: None,
            closed: false,
        })
    }

    /// Negotiated frame width.
    pub const fn width(&self) -> u32 {
        self.format.width
    }

    /// Negotiated frame height.
    pub const fn height(&self) -> u32 {
        self.format.height
    }

    /// Negotiated format, with stride and size sanitized.
    pub const fn format(&self) -> &Format {
        &self.format
    }

    /// Device name.
    pub fn name(&self) -> &str {
        self.device.name()
    }

    /// The underlying device.
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// The buffer ring.
    pub const fn pool(&self) -> &BufferPool<D::Region> {
        &self.pool
    }

    /// Readiness timeout per frame.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Change the readiness timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Install a flag that aborts a pending wait with [`CameraError::Cancelled`].
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Capture one frame.
    ///
    /// Blocks until the device fills a buffer or the timeout elapses. The
    /// buffer is requeued before this returns, whatever the outcome of the
    /// conversion. Errors for which [`CameraError::is_recoverable`] holds
    /// leave the camera ready for the next call.
    pub fn acquire_frame(&mut self) -> Result<Frame> {
        if self.closed {
            return Err(CameraError::StreamError("camera is closed".to_owned()));
        }

        let Format {
            width,
            height,
            stride,
            ..
        } = self.format;
        let mut frame = Frame::new(width, height);

        let meta = match self.wait_for_buffer() {
            Ok(meta) => meta,
            Err(CameraError::StreamLost) => {
                if let Err(err) = self.pool.resync(&mut self.device) {
                    warn!(device = self.device.name(), %err, "buffer resync failed");
                }
                return Err(CameraError::StreamLost);
            }
            Err(err) => return Err(err),
        };

        let converted = if meta.errored {
            Err(CameraError::StreamLost)
        } else {
            self.pool
                .read(meta.index, |bytes| {
                    let payload = match meta.bytes_used as usize {
                        0 => bytes,
                        used => bytes.get(..used).unwrap_or(bytes),
                    };
                    convert::yuyv_to_rgb(payload, width, height, stride, frame.as_bytes_mut())
                })
                .and_then(|result| result)
        };

        self.pool.queue(&mut self.device, meta.index)?;

        if let Err(err) = converted {
            warn!(index = meta.index, sequence = meta.sequence, %err, "dropping frame");
            return Err(err);
        }

        frame.set_metadata(FrameMetadata {
            sequence: meta.sequence,
            timestamp: meta.timestamp,
            bytes_used: meta.bytes_used,
        });
        Ok(frame)
    }

    /// Wait for readiness and dequeue one filled buffer.
    ///
    /// "Try again" from the device is retried until the deadline.
    fn wait_for_buffer(&mut self) -> Result<BufferMeta> {
        let deadline = Instant::now() + self.timeout;
        let mut remaining = self.timeout;

        loop {
            if self.is_cancelled() {
                return Err(CameraError::Cancelled);
            }

            let slice = if self.cancel.is_some() {
                remaining.min(CANCEL_POLL_INTERVAL)
            } else {
                remaining
            };

            if self.device.wait_readable(slice)? {
                if let Some(meta) = self.pool.dequeue_ready(&mut self.device)? {
                    return Ok(meta);
                }
                debug!("device not ready, retrying");
            } else if slice >= remaining {
                warn!(device = self.device.name(), timeout = ?self.timeout, "select timeout");
                return Err(CameraError::Timeout(self.timeout));
            }

            remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(device = self.device.name(), timeout = ?self.timeout, "select timeout");
                return Err(CameraError::Timeout(self.timeout));
            }
        }
    }

    /// Stop streaming, unmap every buffer and close the device.
    ///
    /// Every step runs even if an earlier one fails; the first failure is
    /// returned.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    pub(crate) fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_error = None;

        if let Err(err) = self.device.stream_off() {
            warn!(device = self.device.name(), %err, "VIDIOC_STREAMOFF failed");
            first_error.get_or_insert(err);
        }
        self.pool.reclaim_all();
        self.pool.release();

        if let Err(err) = self.device.request_buffers(0) {
            warn!(device = self.device.name(), %err, "failed to free device buffers");
            first_error.get_or_insert(err);
        }

        info!(device = self.device.name(), "capture stopped");
        first_error.map_or(Ok(()), Err)
    }
}

impl<D: CameraDevice> Drop for Camera<D> {
    fn drop(&mut self) {
        // Failures are already logged by shutdown.
        let _ = self.shutdown();
    }
}

/// Request YUYV interlaced at `width` x `height` and validate the answer.
fn negotiate<D: CameraDevice>(device: &mut D, width: u32, height: u32) -> Result<Format> {
    let fits = width
        .div_ceil(2)
        .checked_mul(4)
        .and_then(|stride| stride.checked_mul(height))
        .is_some();
    if !fits {
        return Err(CameraError::FormatRejected(format!(
            "{width}x{height} YUYV frame exceeds 4 GiB"
        )));
    }

    let requested = Format::new(width, height, FourCC::YUYV);
    let negotiated = device.set_format(&requested)?;

    if negotiated.fourcc != FourCC::YUYV {
        return Err(CameraError::FormatRejected(format!(
            "{} substituted pixel format {:?}",
            device.name(),
            String::from_utf8_lossy(&negotiated.fourcc.0)
        )));
    }
    if negotiated.width == 0 || negotiated.height == 0 {
        return Err(CameraError::FormatRejected(format!(
            "{} negotiated an empty {}x{} frame",
            device.name(),
            negotiated.width,
            negotiated.height
        )));
    }
    if (negotiated.width, negotiated.height) != (width, height) {
        info!(
            requested_width = width,
            requested_height = height,
            width = negotiated.width,
            height = negotiated.height,
            "device adjusted resolution"
        );
    }

    let sanitized = negotiated.clone().sanitized();
    if sanitized != negotiated {
        debug!(
            stride = sanitized.stride,
            size = sanitized.size,
            "raised short stride/size reported by driver"
        );
    }
    Ok(sanitized)
}
