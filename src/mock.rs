//! Mock device implementation for testing without hardware.
//!
//! The mock behaves like a V4L2 driver: buffers are filled in the order they
//! were queued, a test pattern is written into a buffer at the moment it is
//! dequeued, and faults can be scripted per dequeue attempt.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use crate::traits::{
    yuyv_stride, BufferInfo, BufferMeta, CameraDevice, CameraError, Dequeue, DeviceCapabilities,
    FieldOrder, Format, FourCC, MappedRegion, Result,
};

/// Operations the mock has seen, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    /// `request_buffers` with the requested count.
    RequestBuffers(u32),
    /// `queue_buffer`.
    Queue(u32),
    /// Successful `dequeue_buffer`.
    Dequeue(u32),
    /// `stream_on`.
    StreamOn,
    /// `stream_off`.
    StreamOff,
}

/// Fault injected into the next readiness wait or dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    /// The next readiness wait times out.
    Timeout,
    /// Dequeue reports nothing ready (EAGAIN).
    TryAgain,
    /// Dequeue fails with lost data (EIO).
    LostSync,
    /// Dequeue succeeds but the buffer is flagged as corrupt.
    Corrupt,
    /// Dequeue fails with EIO after silently consuming the oldest queued buffer.
    DroppedBuffer,
}

/// How `wait_readable` behaves when no fault is scripted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Readable whenever a queued buffer is waiting.
    Normal,
    /// Sleeps for the whole slice and reports not readable.
    NeverReady,
    /// Readable after a millisecond, but every dequeue says "try again".
    AlwaysPending,
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Region shared between the mock "driver" and the pool.
#[derive(Debug)]
pub struct MockRegion(Rc<RefCell<Vec<u8>>>);

impl MappedRegion for MockRegion {
    fn len(&self) -> usize {
        self.0.borrow().len()
    }

    fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&[u8]) -> T,
    {
        f(&self.0.borrow())
    }
}

/// Mock device for testing without hardware.
#[derive(Debug)]
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    format: Format,
    max_resolution: Option<(u32, u32)>,
    reported_stride: Option<u32>,
    substitute_fourcc: Option<FourCC>,
    pattern: TestPattern,
    granted_buffers: Option<u32>,
    map_failure_at: Option<u32>,
    bad_index: Option<u32>,
    truncate_to: Option<usize>,
    fail_stream_on: bool,
    fail_stream_off: bool,
    buffers: Vec<Rc<RefCell<Vec<u8>>>>,
    incoming: VecDeque<u32>,
    faults: VecDeque<MockFault>,
    timeouts: Cell<u32>,
    wait_mode: WaitMode,
    wait_slices: RefCell<Vec<Duration>>,
    streaming: bool,
    frame_count: u32,
    history: Vec<MockOp>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            format: Format::new(640, 480, FourCC::YUYV),
            max_resolution: None,
            reported_stride: None,
            substitute_fourcc: None,
            pattern: TestPattern::ColorBars,
            granted_buffers: None,
            map_failure_at: None,
            bad_index: None,
            truncate_to: None,
            fail_stream_on: false,
            fail_stream_off: false,
            buffers: Vec::new(),
            incoming: VecDeque::new(),
            faults: VecDeque::new(),
            timeouts: Cell::new(0),
            wait_mode: WaitMode::Normal,
            wait_slices: RefCell::new(Vec::new()),
            streaming: false,
            frame_count: 0,
            history: Vec::new(),
        }
    }

    /// Set the capabilities for this mock device.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Clamp negotiated resolution to at most `width` x `height`.
    #[must_use]
    pub const fn with_max_resolution(mut self, width: u32, height: u32) -> Self {
        self.max_resolution = Some((width, height));
        self
    }

    /// Report this stride and a zero image size, like a non-conforming driver.
    #[must_use]
    pub const fn with_reported_stride(mut self, stride: u32) -> Self {
        self.reported_stride = Some(stride);
        self
    }

    /// Negotiate a different pixel format than requested.
    #[must_use]
    pub const fn with_substituted_fourcc(mut self, fourcc: FourCC) -> Self {
        self.substitute_fourcc = Some(fourcc);
        self
    }

    /// Set the pattern written into filled buffers.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Grant `count` buffers regardless of the request.
    #[must_use]
    pub const fn with_granted_buffers(mut self, count: u32) -> Self {
        self.granted_buffers = Some(count);
        self
    }

    /// Fail mapping buffer `index`.
    #[must_use]
    pub const fn with_map_failure_at(mut self, index: u32) -> Self {
        self.map_failure_at = Some(index);
        self
    }

    /// Hand back this out-of-range index on the next dequeue.
    #[must_use]
    pub const fn with_bad_index(mut self, index: u32) -> Self {
        self.bad_index = Some(index);
        self
    }

    /// Make buffers only `len` bytes long.
    #[must_use]
    pub const fn with_buffer_len(mut self, len: usize) -> Self {
        self.truncate_to = Some(len);
        self
    }

    /// Reject `stream_on`.
    #[must_use]
    pub const fn with_stream_on_failure(mut self) -> Self {
        self.fail_stream_on = true;
        self
    }

    /// Reject `stream_off`.
    #[must_use]
    pub const fn with_stream_off_failure(mut self) -> Self {
        self.fail_stream_off = true;
        self
    }

    /// Change how readiness waits behave.
    #[must_use]
    pub const fn with_wait_mode(mut self, mode: WaitMode) -> Self {
        self.wait_mode = mode;
        self
    }

    /// Timeouts passed to `wait_readable`, in call order.
    pub fn wait_slices(&self) -> Vec<Duration> {
        self.wait_slices.borrow().clone()
    }

    /// Queue a fault for an upcoming wait or dequeue.
    pub fn push_fault(&mut self, fault: MockFault) {
        if fault == MockFault::Timeout {
            self.timeouts.set(self.timeouts.get() + 1);
        } else {
            self.faults.push_back(fault);
        }
    }

    /// Operations seen so far.
    pub fn history(&self) -> &[MockOp] {
        &self.history
    }

    /// Whether streaming is on.
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Number of buffers currently mapped by a pool.
    pub fn live_mappings(&self) -> usize {
        self.buffers
            .iter()
            .filter(|buffer| Rc::strong_count(buffer) > 1)
            .count()
    }

    fn fill(&self, index: u32) {
        if let Some(buffer) = self.buffers.get(index as usize) {
            let mut data = buffer.borrow_mut();
            generate_test_frame(&mut data, &self.format, self.pattern);
        }
    }
}

impl CameraDevice for MockDevice {
    type Region = MockRegion;

    fn name(&self) -> &str {
        &self.capabilities.card
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        let (width, height) = self.max_resolution.map_or((format.width, format.height), |(w, h)| {
            (format.width.min(w), format.height.min(h))
        });
        let mut negotiated = Format::new(
            width,
            height,
            self.substitute_fourcc.unwrap_or(format.fourcc),
        );
        negotiated.field_order = FieldOrder::Interlaced;
        if let Some(stride) = self.reported_stride {
            negotiated.stride = stride;
            negotiated.size = 0;
        }
        self.format = negotiated.clone();
        Ok(negotiated)
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        self.history.push(MockOp::RequestBuffers(count));
        if count == 0 {
            if self.live_mappings() > 0 {
                return Err(CameraError::Io(io::Error::from_raw_os_error(libc::EBUSY)));
            }
            self.buffers.clear();
            return Ok(0);
        }

        let granted = self.granted_buffers.unwrap_or(count);
        let len = self
            .truncate_to
            .unwrap_or_else(|| self.format.clone().sanitized().size as usize);
        self.buffers = (0..granted)
            .map(|_| Rc::new(RefCell::new(vec![0; len])))
            .collect();
        Ok(granted)
    }

    fn query_buffer(&self, index: u32) -> Result<BufferInfo> {
        let buffer = self
            .buffers
            .get(index as usize)
            .ok_or_else(|| CameraError::StreamError(format!("no buffer {index}")))?;
        #[allow(clippy::cast_possible_truncation)]
        let length = buffer.borrow().len() as u32;
        Ok(BufferInfo {
            index,
            length,
            offset: index * length,
            in_flight: self.incoming.contains(&index),
        })
    }

    fn map_buffer(&self, info: &BufferInfo) -> Result<Self::Region> {
        if self.map_failure_at == Some(info.index) {
            return Err(CameraError::MapFailed {
                index: info.index,
                source: io::Error::from_raw_os_error(libc::ENOMEM),
            });
        }
        let buffer = self
            .buffers
            .get(info.index as usize)
            .ok_or_else(|| CameraError::StreamError(format!("no buffer {}", info.index)))?;
        Ok(MockRegion(Rc::clone(buffer)))
    }

    fn queue_buffer(&mut self, index: u32) -> Result<()> {
        if index as usize >= self.buffers.len() || self.incoming.contains(&index) {
            return Err(CameraError::Io(io::Error::from_raw_os_error(libc::EINVAL)));
        }
        self.history.push(MockOp::Queue(index));
        self.incoming.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> Result<Dequeue> {
        if !self.streaming {
            return Err(CameraError::Io(io::Error::from_raw_os_error(libc::EINVAL)));
        }
        let errored = match self.faults.front() {
            Some(MockFault::TryAgain) => {
                self.faults.pop_front();
                return Ok(Dequeue::Pending);
            }
            Some(MockFault::LostSync) => {
                self.faults.pop_front();
                return Err(CameraError::StreamLost);
            }
            Some(MockFault::Corrupt) => {
                self.faults.pop_front();
                true
            }
            Some(MockFault::DroppedBuffer) => {
                self.faults.pop_front();
                self.incoming.pop_front();
                return Err(CameraError::StreamLost);
            }
            _ => false,
        };
        if self.wait_mode == WaitMode::AlwaysPending {
            return Ok(Dequeue::Pending);
        }
        if let Some(index) = self.bad_index.take() {
            return Ok(Dequeue::Filled(BufferMeta {
                index,
                bytes_used: 0,
                sequence: self.frame_count,
                timestamp: Duration::ZERO,
                errored,
            }));
        }

        let Some(index) = self.incoming.pop_front() else {
            return Ok(Dequeue::Pending);
        };
        self.fill(index);
        self.history.push(MockOp::Dequeue(index));

        let sequence = self.frame_count;
        self.frame_count += 1;
        Ok(Dequeue::Filled(BufferMeta {
            index,
            bytes_used: self.format.size,
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33), // ~30fps
            errored,
        }))
    }

    fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        self.wait_slices.borrow_mut().push(timeout);
        let timeouts = self.timeouts.get();
        if timeouts > 0 {
            self.timeouts.set(timeouts - 1);
            return Ok(false);
        }
        match self.wait_mode {
            WaitMode::Normal => Ok(self.streaming && !self.incoming.is_empty()),
            WaitMode::NeverReady => {
                thread::sleep(timeout);
                Ok(false)
            }
            WaitMode::AlwaysPending => {
                thread::sleep(timeout.min(Duration::from_millis(1)));
                Ok(true)
            }
        }
    }

    fn stream_on(&mut self) -> Result<()> {
        if self.fail_stream_on || self.incoming.is_empty() {
            return Err(CameraError::Io(io::Error::from_raw_os_error(libc::EINVAL)));
        }
        self.history.push(MockOp::StreamOn);
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        self.history.push(MockOp::StreamOff);
        self.streaming = false;
        self.incoming.clear();
        if self.fail_stream_off {
            return Err(CameraError::Io(io::Error::from_raw_os_error(libc::EIO)));
        }
        Ok(())
    }
}

/// Write the pattern into `data` using the format's stride.
fn generate_test_frame(data: &mut [u8], format: &Format, pattern: TestPattern) {
    match pattern {
        TestPattern::ColorBars => generate_color_bars(data, format),
        TestPattern::Gradient => generate_gradient(data, format),
        TestPattern::Solid(y, u, v) => {
            for_each_macropixel(data, format, |_| (y, u, v));
        }
    }
}

/// Visit every macropixel, writing the (Y, U, V) the callback returns for its x.
fn for_each_macropixel<F>(data: &mut [u8], format: &Format, mut yuv_at: F)
where
    F: FnMut(u32) -> (u8, u8, u8),
{
    let stride = format.stride.max(yuyv_stride(format.width)) as usize;
    let pairs = format.width.div_ceil(2) as usize;
    for row in data.chunks_mut(stride).take(format.height as usize) {
        for (pair, macropixel) in row.chunks_exact_mut(4).take(pairs).enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let (y_val, u_val, v_val) = yuv_at(pair as u32 * 2);
            macropixel.copy_from_slice(&[y_val, u_val, y_val, v_val]);
        }
    }
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], format: &Format) {
    // 8 color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    // YUYV values for each bar
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128), // White
        (210, 16, 146),  // Yellow
        (170, 166, 16),  // Cyan
        (145, 54, 34),   // Green
        (106, 202, 222), // Magenta
        (81, 90, 240),   // Red
        (41, 240, 110),  // Blue
        (16, 128, 128),  // Black
    ];

    let bar_width = (format.width / 8).max(1);
    for_each_macropixel(data, format, |x| {
        let bar_idx = (x / bar_width).min(7) as usize;
        bars.get(bar_idx).copied().unwrap_or((16, 128, 128))
    });
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], format: &Format) {
    let width = format.width.max(1);
    for_each_macropixel(data, format, |x| {
        #[allow(clippy::cast_possible_truncation)]
        let y_val = ((x * 255) / width) as u8;
        (y_val, 128, 128)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        assert_eq!(device.capabilities().driver, "mock");
        assert!(device.capabilities().can_capture);
        assert!(device.capabilities().can_stream);
    }

    #[test]
    fn test_mock_device_adjusts_format() {
        let mut device = MockDevice::new().with_max_resolution(320, 240);
        let actual = device
            .set_format(&Format::new(1280, 720, FourCC::YUYV))
            .expect("set_format should succeed");
        assert_eq!(actual.width, 320);
        assert_eq!(actual.height, 240);
    }

    #[test]
    fn test_mock_fills_in_queue_order() {
        let mut device = MockDevice::new();
        device
            .set_format(&Format::new(16, 2, FourCC::YUYV))
            .expect("set_format should succeed");
        device.request_buffers(3).expect("request_buffers should succeed");
        for index in [2, 0, 1] {
            device.queue_buffer(index).expect("queue should succeed");
        }
        device.stream_on().expect("stream_on should succeed");

        let order: Vec<u32> = (0..3)
            .map(|_| match device.dequeue_buffer().expect("dequeue should succeed") {
                Dequeue::Filled(meta) => meta.index,
                Dequeue::Pending => u32::MAX,
            })
            .collect();
        assert_eq!(order, vec![2, 0, 1]);
        assert_eq!(
            device.dequeue_buffer().expect("dequeue should succeed"),
            Dequeue::Pending
        );
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let mut data = vec![0u8; format.size as usize];
        generate_test_frame(&mut data, &format, TestPattern::ColorBars);

        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
        // Last bar should be black (Y=16)
        assert_eq!(data[1276], 16);
    }

    #[test]
    fn test_gradient_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let mut data = vec![0u8; format.size as usize];
        generate_test_frame(&mut data, &format, TestPattern::Gradient);

        // Left edge should be dark
        assert!(data[0] < 10);

        // Right edge should be bright (check last row, last pixel)
        let last_row_start = (479 * 640 * 2) as usize;
        let last_pixel_y = data[last_row_start + 638 * 2];
        assert!(last_pixel_y > 200);
    }

    #[test]
    fn test_solid_pattern_respects_stride() {
        let mut format = Format::new(4, 2, FourCC::YUYV);
        format.stride = 12;
        let mut data = vec![0u8; 24];
        generate_test_frame(&mut data, &format, TestPattern::Solid(128, 64, 192));

        assert_eq!(&data[..8], &[128, 64, 128, 192, 128, 64, 128, 192]);
        // padding untouched
        assert_eq!(&data[8..12], &[0, 0, 0, 0]);
        assert_eq!(&data[12..16], &[128, 64, 128, 192]);
    }
}
