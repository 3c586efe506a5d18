//! Ring of memory-mapped device buffers and their ownership states.
//!
//! Every slot is owned by exactly one party at a time. While a slot is
//! [`SlotState::Queued`] the device may write into it and the application
//! must not touch it; once dequeued it is [`SlotState::Filled`] and only the
//! application reads it until it is queued again.

use tracing::{debug, warn};

use crate::traits::{BufferMeta, CameraDevice, CameraError, Dequeue, MappedRegion, Result};

/// Minimum number of buffers needed to overlap capture and processing.
pub const MIN_BUFFERS: u32 = 2;

/// Ownership phase of one buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Region released.
    Unmapped,
    /// Mapped but not yet handed to the device.
    Mapped,
    /// Owned by the device, may be written at any time.
    Queued,
    /// Handed back with data, owned by the application.
    Filled,
}

/// One buffer of the ring.
#[derive(Debug)]
pub struct BufferSlot<R> {
    index: u32,
    length: usize,
    region: Option<R>,
    state: SlotState,
}

impl<R: MappedRegion> BufferSlot<R> {
    /// Slot index.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Buffer length reported by the device.
    pub const fn length(&self) -> usize {
        self.length
    }

    /// Current ownership state.
    pub const fn state(&self) -> SlotState {
        self.state
    }

    /// Length of the mapped region, if still mapped.
    pub fn mapped_len(&self) -> Option<usize> {
        self.region.as_ref().map(MappedRegion::len)
    }
}

/// Fixed-size ring of mapped buffers.
#[derive(Debug)]
pub struct BufferPool<R> {
    slots: Vec<BufferSlot<R>>,
}

impl<R: MappedRegion> BufferPool<R> {
    /// Request `count` buffers from `device` and map every granted one.
    ///
    /// Slots start [`SlotState::Mapped`]. Fails if fewer than
    /// [`MIN_BUFFERS`] are granted; regions mapped before a failure are
    /// unmapped on return.
    pub fn allocate<D>(device: &mut D, count: u32) -> Result<Self>
    where
        D: CameraDevice<Region = R>,
    {
        let granted = device.request_buffers(count)?;
        if granted < MIN_BUFFERS {
            return Err(CameraError::InsufficientBuffers {
                device: device.name().to_owned(),
                granted,
            });
        }
        if granted != count {
            debug!(requested = count, granted, "device adjusted buffer count");
        }

        let mut slots = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            let info = device.query_buffer(index)?;
            let region = device.map_buffer(&info)?;
            slots.push(BufferSlot {
                index,
                length: info.length as usize,
                region: Some(region),
                state: SlotState::Mapped,
            });
        }

        debug!(count = granted, "mapped buffer pool");
        Ok(Self { slots })
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the pool has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All slots in index order.
    pub fn slots(&self) -> &[BufferSlot<R>] {
        &self.slots
    }

    /// State of slot `index`.
    pub fn state(&self, index: u32) -> Option<SlotState> {
        self.slots.get(index as usize).map(|slot| slot.state)
    }

    /// Number of slots currently in `state`.
    pub fn count_in(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|slot| slot.state == state).count()
    }

    fn slot_mut(&mut self, index: u32) -> Result<&mut BufferSlot<R>> {
        let count = self.slots.len();
        self.slots
            .get_mut(index as usize)
            .ok_or(CameraError::InvalidBufferIndex { index, count })
    }

    /// Hand slot `index` to the device for filling.
    ///
    /// Only [`SlotState::Mapped`] or [`SlotState::Filled`] slots can be queued.
    pub fn queue<D>(&mut self, device: &mut D, index: u32) -> Result<()>
    where
        D: CameraDevice<Region = R>,
    {
        let slot = self.slot_mut(index)?;
        if !matches!(slot.state, SlotState::Mapped | SlotState::Filled) {
            return Err(CameraError::InvalidSlotState {
                index,
                state: slot.state,
                operation: "queue",
            });
        }
        device.queue_buffer(index)?;
        slot.state = SlotState::Queued;
        debug!(index, "queued buffer");
        Ok(())
    }

    /// Queue every slot that is not already queued, in index order.
    pub fn queue_all<D>(&mut self, device: &mut D) -> Result<()>
    where
        D: CameraDevice<Region = R>,
    {
        let idle: Vec<u32> = self
            .slots
            .iter()
            .filter(|slot| matches!(slot.state, SlotState::Mapped | SlotState::Filled))
            .map(|slot| slot.index)
            .collect();
        for index in idle {
            self.queue(device, index)?;
        }
        Ok(())
    }

    /// Take back one filled slot from the device, if any is ready.
    ///
    /// Returns `None` when the device has nothing yet. The returned slot is
    /// [`SlotState::Filled`].
    pub fn dequeue_ready<D>(&mut self, device: &mut D) -> Result<Option<BufferMeta>>
    where
        D: CameraDevice<Region = R>,
    {
        let meta = match device.dequeue_buffer()? {
            Dequeue::Filled(meta) => meta,
            Dequeue::Pending => return Ok(None),
        };

        let slot = self.slot_mut(meta.index)?;
        if slot.state != SlotState::Queued {
            return Err(CameraError::InvalidSlotState {
                index: meta.index,
                state: slot.state,
                operation: "dequeue",
            });
        }
        slot.state = SlotState::Filled;
        debug!(index = meta.index, sequence = meta.sequence, "dequeued buffer");
        Ok(Some(meta))
    }

    /// Requeue queued slots the device no longer holds.
    ///
    /// After a lost-data dequeue a driver may have taken a buffer off its
    /// queue without handing it back. Each such slot is submitted again so
    /// the ring keeps its size. Returns the number of slots requeued.
    pub fn resync<D>(&mut self, device: &mut D) -> Result<usize>
    where
        D: CameraDevice<Region = R>,
    {
        let mut requeued = 0;
        for slot in &self.slots {
            if slot.state != SlotState::Queued || device.query_buffer(slot.index)?.in_flight {
                continue;
            }
            device.queue_buffer(slot.index)?;
            warn!(index = slot.index, "device dropped buffer, requeued");
            requeued += 1;
        }
        Ok(requeued)
    }

    /// Run `f` over the bytes of a [`SlotState::Filled`] slot.
    pub fn read<T, F>(&self, index: u32, f: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> T,
    {
        let count = self.slots.len();
        let slot = self
            .slots
            .get(index as usize)
            .ok_or(CameraError::InvalidBufferIndex { index, count })?;
        match (&slot.region, slot.state) {
            (Some(region), SlotState::Filled) => Ok(region.read(f)),
            (_, state) => Err(CameraError::InvalidSlotState {
                index,
                state,
                operation: "read",
            }),
        }
    }

    /// Unmap every region. Safe to call more than once.
    ///
    /// The device must no longer own any slot, i.e. streaming is off.
    pub fn release(&mut self) {
        for slot in &mut self.slots {
            if slot.state == SlotState::Queued {
                warn!(index = slot.index, "releasing buffer still queued");
            }
            drop(slot.region.take());
            slot.state = SlotState::Unmapped;
        }
    }

    /// Take every queued slot back as idle once streaming is off.
    pub(crate) fn reclaim_all(&mut self) {
        for slot in &mut self.slots {
            if slot.state == SlotState::Queued {
                slot.state = SlotState::Mapped;
            }
        }
    }
}
