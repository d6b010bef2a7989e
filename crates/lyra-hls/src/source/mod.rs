//! Host-facing media source.
//!
//! [`HlsMediaStreamSource`] spawns one orchestrator task per session and
//! exposes the pull side of the two sample buffers. Sample requests never
//! block: they are answered on the calling thread when a sample is ready and
//! otherwise later from the worker, through [`MediaSink::deliver`].

use std::sync::Arc;

use lyra_net::Net;
use lyra_sample::{MediaType, Sample, SampleBuffer, SampleBufferOptions, TimelineClock};
use tokio::{
    sync::{Notify, broadcast, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

mod command;
mod sink;
mod worker;

pub use command::{Diagnostics, SessionSummary};
pub use sink::{ChannelSink, MediaSink, OpenInfo, SinkEvent};

use self::{
    command::Command,
    worker::{SourceWorker, WorkerParts},
};
use crate::{
    config::HlsConfig,
    error::{HlsError, HlsResult},
    events::{EventEmitter, HlsEvent},
    fetch::Fetcher,
};

pub struct HlsMediaStreamSource {
    video: Arc<SampleBuffer>,
    audio: Arc<SampleBuffer>,
    sink: Arc<dyn MediaSink>,
    commands: kanal::AsyncSender<Command>,
    events: EventEmitter,
    cancel: CancellationToken,
    wake: Arc<Notify>,
    worker: Option<JoinHandle<SessionSummary>>,
}

impl std::fmt::Debug for HlsMediaStreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HlsMediaStreamSource")
            .field("video", &self.video)
            .field("audio", &self.audio)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl HlsMediaStreamSource {
    /// Start a session over HTTP. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`HlsError::Net`] if the HTTP client cannot be built. Everything
    /// after that is reported through the sink.
    pub fn open(config: HlsConfig, sink: Arc<dyn MediaSink>) -> HlsResult<Self> {
        let fetcher = Fetcher::new(&config)?;
        Ok(Self::start(config, fetcher, sink))
    }

    /// Start a session over a caller-supplied transport.
    pub fn open_with_net(config: HlsConfig, net: Arc<dyn Net>, sink: Arc<dyn MediaSink>) -> Self {
        let fetcher = Fetcher::with_net(net, &config);
        Self::start(config, fetcher, sink)
    }

    fn start(config: HlsConfig, fetcher: Fetcher, sink: Arc<dyn MediaSink>) -> Self {
        let clock = TimelineClock::new();
        let options = SampleBufferOptions::default().with_pool(config.pool_options());
        let video = Arc::new(SampleBuffer::new(
            MediaType::Video,
            options.clone(),
            clock.clone(),
        ));
        let audio = Arc::new(SampleBuffer::new(MediaType::Audio, options, clock));

        let (commands, cmd_rx) = kanal::bounded_async(config.command_channel_capacity.max(1));
        let cancel = config
            .cancel
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        let events = EventEmitter::new(config.events_channel_capacity);
        let wake = Arc::new(Notify::new());

        debug!(url = %config.url, "HlsMediaStreamSource: opening");
        let worker = SourceWorker::new(WorkerParts {
            config,
            fetcher,
            sink: Arc::clone(&sink),
            events: events.clone(),
            video: Arc::clone(&video),
            audio: Arc::clone(&audio),
            cancel: cancel.clone(),
            commands: cmd_rx,
            wake: Arc::clone(&wake),
        });
        let worker = tokio::spawn(worker.run());

        Self {
            video,
            audio,
            sink,
            commands,
            events,
            cancel,
            wake,
            worker: Some(worker),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<HlsEvent> {
        self.events.subscribe()
    }

    fn buffer(&self, media: MediaType) -> &SampleBuffer {
        match media {
            MediaType::Video => &self.video,
            MediaType::Audio => &self.audio,
        }
    }

    /// Ask for one more sample of `media`.
    ///
    /// The answer arrives through [`MediaSink::deliver`], possibly before
    /// this returns.
    pub fn request_sample(&self, media: MediaType) {
        let buffer = self.buffer(media);
        buffer.on_sample_requested();
        buffer.try_report_pending(|delivery| self.sink.deliver(media, delivery));
        self.wake.notify_one();
    }

    /// Hand a delivered sample back once the host is done with it.
    ///
    /// # Errors
    ///
    /// Pool errors from releasing the payload.
    pub fn recycle(&self, media: MediaType, sample: Sample) -> HlsResult<()> {
        self.buffer(media).recycle(sample)?;
        self.wake.notify_one();
        Ok(())
    }

    /// Reposition; completion is reported through
    /// [`MediaSink::on_seek_completed`].
    pub async fn seek(&self, position: std::time::Duration) -> HlsResult<()> {
        self.send(Command::Seek { position }).await
    }

    /// Pin a variant, or return to ABR with `None`.
    pub async fn switch_variant(&self, variant: Option<usize>) -> HlsResult<()> {
        self.send(Command::SwitchVariant { variant }).await
    }

    pub async fn diagnostics(&self) -> HlsResult<Diagnostics> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Diagnostics { reply }).await?;
        rx.await.map_err(|_| HlsError::Closed)
    }

    async fn send(&self, cmd: Command) -> HlsResult<()> {
        if self.cancel.is_cancelled() {
            return Err(HlsError::Closed);
        }
        self.commands.send(cmd).await.map_err(|_| HlsError::Closed)
    }

    /// Stop the session and wait for the worker.
    pub async fn close(mut self) -> SessionSummary {
        self.cancel.cancel();
        let Some(worker) = self.worker.take() else {
            return SessionSummary::default();
        };
        worker.await.unwrap_or_else(|error| {
            warn!(%error, "HlsMediaStreamSource: worker task failed");
            SessionSummary::default()
        })
    }
}

impl Drop for HlsMediaStreamSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests;
