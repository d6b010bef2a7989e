use lyra_bufpool::{PoolAllocItem, PoolResult, Reuse};

use crate::error::{SampleError, SampleResult};

/// Identifies the playlist segment a sample was demuxed from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SegmentRef {
    pub sequence: u64,
    /// Index of the variant inside its program.
    pub variant: usize,
}

/// One demuxed access unit.
///
/// Timestamps are kept three ways: the raw 90 kHz PTS from the stream, the
/// rollover-corrected value in 100 ns units, and the value adjusted onto the
/// playback timeline. Payload bytes live in the owning buffer's pool.
#[derive(Debug, Default)]
pub struct Sample {
    payload: Option<PoolAllocItem>,
    pub pts_90k: u64,
    pub original_timestamp: i64,
    pub adjusted_timestamp: i64,
    /// 100 ns units.
    pub duration: i64,
    pub key_frame: bool,
    /// Declared bitrate of the variant that carried this sample.
    pub bitrate: u64,
    pub segment: Option<SegmentRef>,
    pub timeline: usize,
}

impl Sample {
    pub fn attach_payload(&mut self, item: PoolAllocItem) -> Option<PoolAllocItem> {
        self.payload.replace(item)
    }

    pub fn payload(&self) -> Option<&PoolAllocItem> {
        self.payload.as_ref()
    }

    pub fn payload_mut(&mut self) -> Option<&mut PoolAllocItem> {
        self.payload.as_mut()
    }

    pub fn take_payload(&mut self) -> Option<PoolAllocItem> {
        self.payload.take()
    }

    /// Written payload bytes.
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, PoolAllocItem::written)
    }

    /// Append payload bytes, growing the allocation as needed.
    ///
    /// # Errors
    ///
    /// [`SampleError::MissingPayload`] without an attached allocation, or the
    /// pool error when the allocation can no longer grow.
    pub fn append(&mut self, data: &[u8]) -> SampleResult<()> {
        let item = self.payload.as_mut().ok_or(SampleError::MissingPayload)?;
        item.append(data)?;
        Ok(())
    }

    /// Copy every payload byte into a fresh vector.
    ///
    /// # Errors
    ///
    /// Pool errors if the allocation was released underneath.
    pub fn payload_to_vec(&self) -> PoolResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.payload_len());
        if let Some(item) = &self.payload {
            item.copy_to(&mut out)?;
        }
        Ok(out)
    }

    /// Presentation end on the adjusted timeline.
    pub fn end_timestamp(&self) -> i64 {
        self.adjusted_timestamp + self.duration
    }
}

impl Reuse for Sample {
    fn reuse(&mut self) -> bool {
        // Payloads go back through the buffer so release order is checked.
        if self.payload.is_some() {
            return false;
        }
        *self = Sample::default();
        true
    }
}
