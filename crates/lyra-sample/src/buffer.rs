use std::collections::VecDeque;

use lyra_bufpool::{FifoMemoryPool, PoolAllocItem, PoolError, PoolOptions, Recycler};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    descriptor::{MediaType, StreamDescriptor},
    error::SampleResult,
    sample::Sample,
    timeline::{TimelineClock, TimelineSpec},
};

#[derive(Clone, Debug)]
pub struct SampleBufferOptions {
    pub pool: PoolOptions,
    /// Sample wrappers kept for reuse.
    pub recycle_capacity: usize,
}

impl Default for SampleBufferOptions {
    fn default() -> Self {
        Self {
            pool: PoolOptions::default(),
            recycle_capacity: 512,
        }
    }
}

impl SampleBufferOptions {
    pub fn with_pool(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_recycle_capacity(mut self, recycle_capacity: usize) -> Self {
        self.recycle_capacity = recycle_capacity;
        self
    }
}

/// Answer to a pending host request.
#[derive(Debug)]
pub enum SampleDelivery {
    Sample(Sample),
    EndOfStream,
}

/// Timeline change recorded at enqueue, reported once playback reaches it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimelineTransition {
    pub timeline: usize,
    pub adjusted_timestamp: i64,
    serial: u64,
}

#[derive(Default)]
struct BufferState {
    queue: VecDeque<(u64, Sample)>,
    duration: i64,
    bytes: usize,
    pending_requests: usize,
    buffering: bool,
    end_of_playback: bool,
    eos_delivered: bool,
    descriptor: Option<StreamDescriptor>,
    transitions: VecDeque<TimelineTransition>,
    last_timeline: Option<usize>,
    next_serial: u64,
    /// Payloads whose release had to wait for an older neighbour.
    deferred: Vec<PoolAllocItem>,
}

impl BufferState {
    fn pop(&mut self) -> Option<Sample> {
        let (serial, sample) = self.queue.pop_front()?;
        self.duration -= sample.duration;
        self.bytes -= sample.payload_len();
        while self.transitions.front().is_some_and(|t| t.serial <= serial) {
            self.transitions.pop_front();
        }
        Some(sample)
    }

    fn deliverable(&self) -> bool {
        if self.pending_requests == 0 {
            return false;
        }
        let playable = !self.buffering || self.end_of_playback;
        (playable && !self.queue.is_empty())
            || (self.end_of_playback && self.queue.is_empty() && !self.eos_delivered)
    }
}

/// Ordered sample queue for one media type.
///
/// The demux worker enqueues, the host pulls through
/// [`SampleBuffer::on_sample_requested`] and
/// [`SampleBuffer::try_report_pending`]. Every method takes `&self`; one
/// internal lock guards the queue and a second, only ever `try_lock`ed,
/// keeps request reporting from re-entering itself.
pub struct SampleBuffer {
    media_type: MediaType,
    pool: FifoMemoryPool,
    recycler: Recycler<Sample>,
    clock: TimelineClock,
    state: Mutex<BufferState>,
    report: Mutex<()>,
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("media_type", &self.media_type)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl SampleBuffer {
    pub fn new(media_type: MediaType, options: SampleBufferOptions, clock: TimelineClock) -> Self {
        Self {
            media_type,
            pool: FifoMemoryPool::new(options.pool),
            recycler: Recycler::new(options.recycle_capacity),
            clock,
            state: Mutex::new(BufferState {
                buffering: true,
                ..BufferState::default()
            }),
            report: Mutex::new(()),
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn pool(&self) -> &FifoMemoryPool {
        &self.pool
    }

    pub fn clock(&self) -> &TimelineClock {
        &self.clock
    }

    /// A cleared sample wrapper with a fresh payload allocation.
    ///
    /// # Errors
    ///
    /// Pool errors from the allocation.
    pub fn new_sample(&self, capacity: usize) -> SampleResult<Sample> {
        let mut sample = self.recycler.get();
        sample.attach_payload(self.pool.alloc(capacity)?);
        Ok(sample)
    }

    /// Establish `specs` on the shared clock.
    pub fn establish_timeline(&self, specs: &[TimelineSpec]) {
        self.clock.establish(specs);
    }

    /// Normalize timestamps and queue `sample`.
    ///
    /// # Errors
    ///
    /// [`SampleError::UnknownTimeline`](crate::SampleError::UnknownTimeline) if the sample's timeline was never
    /// established; the sample is released in that case.
    pub fn enqueue(&self, mut sample: Sample) -> SampleResult<()> {
        if let Some(item) = sample.payload_mut() {
            item.seal();
        }
        let mut state = self.state.lock();
        let normalized = self
            .clock
            .normalize(sample.timeline, sample.pts_90k, sample.duration);
        let (original, adjusted) = match normalized {
            Ok(pair) => pair,
            Err(error) => {
                drop(state);
                self.recycle(sample)?;
                return Err(error);
            }
        };
        sample.original_timestamp = original;
        sample.adjusted_timestamp = adjusted;

        let serial = state.next_serial;
        state.next_serial += 1;
        if state
            .last_timeline
            .is_some_and(|last| last != sample.timeline)
        {
            debug!(
                media = %self.media_type,
                timeline = sample.timeline,
                adjusted,
                "SampleBuffer: timeline transition queued"
            );
            state.transitions.push_back(TimelineTransition {
                timeline: sample.timeline,
                adjusted_timestamp: adjusted,
                serial,
            });
        }
        state.last_timeline = Some(sample.timeline);

        state.duration += sample.duration;
        state.bytes += sample.payload_len();
        trace!(
            media = %self.media_type,
            pts = sample.pts_90k,
            adjusted,
            len = sample.payload_len(),
            "SampleBuffer: enqueue"
        );
        state.queue.push_back((serial, sample));
        Ok(())
    }

    /// Summed duration of queued samples, 100 ns units.
    pub fn buffered_duration(&self) -> i64 {
        self.state.lock().duration
    }

    pub fn buffered_bytes(&self) -> usize {
        self.state.lock().bytes
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Adjusted timestamp of the head sample.
    pub fn head_timestamp(&self) -> Option<i64> {
        self.peek_sample(|sample| sample.adjusted_timestamp)
    }

    /// Adjusted end of the newest sample.
    pub fn tail_end(&self) -> Option<i64> {
        self.state
            .lock()
            .queue
            .back()
            .map(|(_, sample)| sample.end_timestamp())
    }

    pub fn peek_sample<R>(&self, f: impl FnOnce(&Sample) -> R) -> Option<R> {
        self.state.lock().queue.front().map(|(_, sample)| f(sample))
    }

    /// Take the head sample out of the queue without answering a request.
    pub fn remove_head(&self) -> Option<Sample> {
        self.state.lock().pop()
    }

    pub fn next_timeline_transition(&self) -> Option<TimelineTransition> {
        self.state.lock().transitions.front().copied()
    }

    pub fn set_buffering(&self, buffering: bool) {
        self.state.lock().buffering = buffering;
    }

    pub fn is_buffering(&self) -> bool {
        self.state.lock().buffering
    }

    pub fn set_end_of_playback(&self, end: bool) {
        let mut state = self.state.lock();
        state.end_of_playback = end;
        if !end {
            state.eos_delivered = false;
        }
    }

    pub fn is_end_of_playback(&self) -> bool {
        self.state.lock().end_of_playback
    }

    pub fn descriptor(&self) -> Option<StreamDescriptor> {
        self.state.lock().descriptor.clone()
    }

    /// Record the stream descriptor. Returns `true` when it changed.
    pub fn set_descriptor(&self, descriptor: StreamDescriptor) -> bool {
        let mut state = self.state.lock();
        if state.descriptor.as_ref() == Some(&descriptor) {
            return false;
        }
        debug!(media = %self.media_type, codec = ?descriptor.codec, "SampleBuffer: descriptor");
        state.descriptor = Some(descriptor);
        true
    }

    pub fn pending_requests(&self) -> usize {
        self.state.lock().pending_requests
    }

    /// Host asked for one more sample.
    pub fn on_sample_requested(&self) {
        self.state.lock().pending_requests += 1;
    }

    /// Answer one pending request if possible.
    ///
    /// Samples are handed out only while not buffering (or once playback has
    /// ended). End of stream is answered exactly once, after the queue has
    /// drained, and clears the pending count.
    pub fn process_pending_sample_request(&self) -> Option<SampleDelivery> {
        let mut state = self.state.lock();
        if !state.deliverable() {
            return None;
        }
        if let Some(sample) = state.pop() {
            state.pending_requests -= 1;
            return Some(SampleDelivery::Sample(sample));
        }
        state.eos_delivered = true;
        state.pending_requests = 0;
        debug!(media = %self.media_type, "SampleBuffer: end of stream");
        Some(SampleDelivery::EndOfStream)
    }

    /// Answer every pending request that can be answered, handing each result
    /// to `deliver`.
    ///
    /// Returns immediately with 0 if another caller is already reporting;
    /// that caller re-checks before it leaves, so no request is stranded.
    pub fn try_report_pending(&self, mut deliver: impl FnMut(SampleDelivery)) -> usize {
        let mut delivered = 0;
        loop {
            let Some(guard) = self.report.try_lock() else {
                return delivered;
            };
            while let Some(delivery) = self.process_pending_sample_request() {
                deliver(delivery);
                delivered += 1;
            }
            drop(guard);
            if !self.state.lock().deliverable() {
                return delivered;
            }
        }
    }

    /// Give a delivered or removed sample back.
    ///
    /// The payload is released to the pool; if an older payload is still out
    /// the release is deferred until that one returns.
    ///
    /// # Errors
    ///
    /// Pool errors other than out-of-order release.
    pub fn recycle(&self, mut sample: Sample) -> SampleResult<()> {
        if let Some(item) = sample.take_payload() {
            self.release_payload(item)?;
        }
        self.recycler.recycle(sample);
        Ok(())
    }

    fn release_payload(&self, item: PoolAllocItem) -> SampleResult<()> {
        let mut state = self.state.lock();
        match item.try_release() {
            Ok(()) => {}
            Err((PoolError::NotSupported { id }, item)) => {
                trace!(media = %self.media_type, id, "SampleBuffer: release deferred");
                state.deferred.push(item);
                return Ok(());
            }
            Err((error, _item)) => return Err(error.into()),
        }

        // Retry the deferred releases until no more progress is made.
        loop {
            let before = state.deferred.len();
            let mut still = Vec::with_capacity(before);
            for item in state.deferred.drain(..) {
                match item.try_release() {
                    Ok(()) => {}
                    Err((PoolError::NotSupported { .. }, item)) => still.push(item),
                    Err((error, _item)) => {
                        warn!(media = %self.media_type, %error, "SampleBuffer: deferred release failed");
                    }
                }
            }
            state.deferred = still;
            if state.deferred.is_empty() || state.deferred.len() == before {
                return Ok(());
            }
        }
    }

    /// Drop every queued sample and reset end-of-stream state.
    ///
    /// Pending host requests survive.
    ///
    /// # Errors
    ///
    /// The first pool error hit while releasing payloads.
    pub fn clear(&self) -> SampleResult<()> {
        let drained: Vec<Sample> = {
            let mut state = self.state.lock();
            let drained = state.queue.drain(..).map(|(_, sample)| sample).collect();
            state.duration = 0;
            state.bytes = 0;
            state.transitions.clear();
            state.last_timeline = None;
            state.end_of_playback = false;
            state.eos_delivered = false;
            drained
        };
        debug!(media = %self.media_type, dropped = drained.len(), "SampleBuffer: clear");
        let mut first_error = None;
        for sample in drained {
            if let Err(error) = self.recycle(sample) {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Release a sample that never made it into the queue.
    ///
    /// # Errors
    ///
    /// Same as [`SampleBuffer::recycle`].
    pub fn discard(&self, sample: Sample) -> SampleResult<()> {
        self.recycle(sample)
    }
}
