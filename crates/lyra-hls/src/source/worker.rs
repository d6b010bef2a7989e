//! The orchestrator task.
//!
//! One loop owns the playback state, the demuxer and the active segment
//! download. Network operations run as their own tasks and report back over
//! a channel; every report is tagged with the epoch it was started in so a
//! seek can invalidate whatever is still in flight.

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use futures::StreamExt;
use lyra_abr::AbrMode;
use lyra_drm::{DecryptContext, DrmResult, SegmentDecryptor};
use lyra_net::{ByteStream, NetError};
use lyra_sample::{MediaType, SampleBuffer, TimelineSpec};
use lyra_ts::{TS_PACKET_SIZE, TsDemux};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
    command::{Command, Diagnostics, SessionSummary},
    sink::{MediaSink, OpenInfo},
};
use crate::{
    config::HlsConfig,
    error::{HlsError, HlsResult},
    events::{EventEmitter, HlsEvent},
    fetch::Fetcher,
    keys::KeyCache,
    parsing::{EncryptionMethod, MediaPlaylist, Playlist},
    playback::{FailureOutcome, HlsPlayback, NextAction, SegmentRequest},
    playlist::HlsPlaylist,
};

/// Completion of one network task.
pub(crate) struct Tagged {
    epoch: u64,
    event: NetEvent,
}

enum NetEvent {
    Entry {
        started: Instant,
        result: HlsResult<Playlist>,
    },
    Media {
        variant: usize,
        started: Instant,
        result: HlsResult<MediaPlaylist>,
    },
    Key {
        request: SegmentRequest,
        result: HlsResult<[u8; 16]>,
    },
    Segment {
        request: SegmentRequest,
        key: Option<[u8; 16]>,
        started: Instant,
        result: HlsResult<ByteStream>,
    },
}

enum Step {
    Stop,
    Command(Command),
    Net(Tagged),
    Chunk(Option<Result<Bytes, NetError>>),
    Timer,
    Wake,
}

/// The segment whose body is being read.
struct ActiveSegment {
    request: SegmentRequest,
    stream: ByteStream,
    decryptor: Option<SegmentDecryptor>,
    /// Downloaded bytes not yet processed; flushed at the chunk size.
    pending: Vec<u8>,
    received: u64,
    /// Plaintext offset reached, including bytes skipped on resume.
    position: u64,
    started: Instant,
    chunk_started: Instant,
}

impl ActiveSegment {
    fn decrypt(&mut self, data: Vec<u8>, last: bool) -> DrmResult<Vec<u8>> {
        if self.decryptor.is_none() {
            return Ok(data);
        }
        let mut plain = Vec::with_capacity(data.len());
        if let Some(decryptor) = self.decryptor.as_mut() {
            decryptor.update(&data, &mut plain)?;
        }
        if last {
            if let Some(decryptor) = self.decryptor.take() {
                decryptor.finish(&mut plain)?;
            }
        }
        Ok(plain)
    }

    /// Plaintext safely handed to the demuxer, in whole packets.
    fn demuxed(&self) -> u64 {
        let packet = TS_PACKET_SIZE as u64;
        self.position / packet * packet
    }
}

pub(crate) struct WorkerParts {
    pub config: HlsConfig,
    pub fetcher: Fetcher,
    pub sink: Arc<dyn MediaSink>,
    pub events: EventEmitter,
    pub video: Arc<SampleBuffer>,
    pub audio: Arc<SampleBuffer>,
    pub cancel: CancellationToken,
    pub commands: kanal::AsyncReceiver<Command>,
    pub wake: Arc<Notify>,
}

pub(crate) struct SourceWorker {
    config: HlsConfig,
    fetcher: Fetcher,
    sink: Arc<dyn MediaSink>,
    events: EventEmitter,
    video: Arc<SampleBuffer>,
    audio: Arc<SampleBuffer>,
    demux: TsDemux,
    keys: KeyCache,
    playback: Option<HlsPlayback>,
    cancel: CancellationToken,
    commands: kanal::AsyncReceiver<Command>,
    net_tx: kanal::AsyncSender<Tagged>,
    net_rx: kanal::AsyncReceiver<Tagged>,
    wake: Arc<Notify>,
    epoch: u64,
    in_flight: Option<CancellationToken>,
    active: Option<ActiveSegment>,
    timer: Option<Instant>,
    chunk_size: usize,
    opened: bool,
    ended: bool,
    buffering: bool,
    progress: f32,
    /// Start of the segment a seek landed in, 100 ns units.
    seek_target: Option<i64>,
}

impl SourceWorker {
    pub(crate) fn new(parts: WorkerParts) -> Self {
        let (net_tx, net_rx) = kanal::unbounded_async();
        let demux = TsDemux::new(Some(Arc::clone(&parts.video)), Some(Arc::clone(&parts.audio)));
        Self {
            chunk_size: parts.config.chunk_size(),
            config: parts.config,
            fetcher: parts.fetcher,
            sink: parts.sink,
            events: parts.events,
            video: parts.video,
            audio: parts.audio,
            demux,
            keys: KeyCache::new(),
            playback: None,
            cancel: parts.cancel,
            commands: parts.commands,
            net_tx,
            net_rx,
            wake: parts.wake,
            epoch: 0,
            in_flight: None,
            active: None,
            timer: None,
            opened: false,
            ended: false,
            buffering: true,
            progress: -1.0,
            seek_target: None,
        }
    }

    pub(crate) async fn run(mut self) -> SessionSummary {
        debug!(url = %self.config.url, "SourceWorker: started");
        if let Err(error) = self.drive().await {
            self.fail(&error);
        }
        self.abort_in_flight();
        let summary = self.summary();
        debug!(?summary, "SourceWorker: stopped");
        summary
    }

    async fn drive(&mut self) -> HlsResult<()> {
        loop {
            self.update_buffering();
            self.report_pending();
            self.schedule()?;

            let step = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Step::Stop,
                cmd = self.commands.recv() => cmd.map_or(Step::Stop, Step::Command),
                msg = self.net_rx.recv() => msg.map_or(Step::Stop, Step::Net),
                chunk = next_chunk(&mut self.active) => Step::Chunk(chunk),
                () = sleep_until(self.timer) => Step::Timer,
                () = self.wake.notified() => Step::Wake,
            };

            match step {
                Step::Stop => return Ok(()),
                Step::Command(cmd) => self.handle_command(cmd)?,
                Step::Net(Tagged { epoch, event }) => {
                    if epoch == self.epoch {
                        self.in_flight = None;
                        self.handle_net(event)?;
                    } else {
                        trace!(epoch, current = self.epoch, "SourceWorker: dropping stale completion");
                    }
                }
                Step::Chunk(Some(Ok(bytes))) => self.on_chunk(&bytes)?,
                Step::Chunk(Some(Err(error))) => self.fail_active(error.into())?,
                Step::Chunk(None) => self.on_segment_end()?,
                Step::Timer => self.timer = None,
                Step::Wake => {}
            }
        }
    }

    // Commands.

    fn handle_command(&mut self, cmd: Command) -> HlsResult<()> {
        match cmd {
            Command::Seek { position } => self.seek(position),
            Command::SwitchVariant { variant } => {
                let mode = variant.map_or(AbrMode::Auto, AbrMode::Manual);
                info!(?mode, "SourceWorker: variant selection changed");
                match self.playback.as_mut() {
                    Some(playback) => playback.set_mode(mode),
                    None => self.config.abr.mode = mode,
                }
                Ok(())
            }
            Command::Diagnostics { reply } => {
                // The caller may have stopped waiting.
                let _ = reply.send(self.diagnostics());
                Ok(())
            }
        }
    }

    fn seek(&mut self, position: Duration) -> HlsResult<()> {
        let Some(playback) = self.playback.as_mut() else {
            warn!(?position, "SourceWorker: seek before the playlist is known, ignoring");
            return Ok(());
        };
        if !playback.is_seekable() {
            warn!(?position, "SourceWorker: stream is not seekable, ignoring seek");
            return Ok(());
        }
        let point = playback.seek(position)?;

        self.abort_in_flight();
        if let Err(error) = self.demux.reset() {
            warn!(%error, "SourceWorker: demux reset dropped a partial frame");
        }
        self.video.clear()?;
        self.audio.clear()?;
        let start_offset = duration_to_hns(point.start);
        let spec = [TimelineSpec { start_offset }];
        self.video.establish_timeline(&spec);
        self.audio.establish_timeline(&spec);

        self.ended = false;
        self.timer = None;
        self.seek_target = Some(start_offset);
        self.set_buffering(true);
        info!(
            ?position,
            sequence = point.sequence,
            start = ?point.start,
            "SourceWorker: seek"
        );
        Ok(())
    }

    fn diagnostics(&self) -> Diagnostics {
        let playback = self.playback.as_ref();
        let current = playback.and_then(HlsPlayback::current_variant);
        let bitrate = playback
            .zip(current)
            .and_then(|(p, index)| p.playlist().program.variant(index).ok())
            .map(|variant| variant.bandwidth);
        Diagnostics {
            current_variant: current,
            bitrate,
            bitrates: playback
                .map(|p| p.playlist().program.bitrates())
                .unwrap_or_default(),
            live: playback.is_some_and(HlsPlayback::is_live),
            buffering: self.buffering,
            video_buffered: hns_to_duration(self.video.buffered_duration()),
            audio_buffered: hns_to_duration(self.audio.buffered_duration()),
            buffered_bytes: self.video.buffered_bytes() + self.audio.buffered_bytes(),
            average_bps: playback.and_then(HlsPlayback::average_bps),
            recent_bps: playback.and_then(HlsPlayback::recent_bps),
            playback: playback.map(HlsPlayback::stats).unwrap_or_default(),
            demux: self.demux.stats(),
        }
    }

    fn summary(&self) -> SessionSummary {
        let playback = self.playback.as_ref();
        let stats = playback.map(HlsPlayback::stats).unwrap_or_default();
        SessionSummary {
            average_bandwidth_bps: playback
                .and_then(HlsPlayback::average_bps)
                .or(self.config.abr.initial_bandwidth_bps),
            segments_downloaded: stats.segments_downloaded,
            segments_skipped: stats.segments_skipped,
            bytes_downloaded: stats.bytes_downloaded,
        }
    }

    // Scheduling.

    fn schedule(&mut self) -> HlsResult<()> {
        while self.schedule_once()? {}
        Ok(())
    }

    /// Start the next operation if idle. Returns `true` when the step
    /// finished synchronously (a skipped segment) and should run again.
    fn schedule_once(&mut self) -> HlsResult<bool> {
        if self.in_flight.is_some() || self.active.is_some() || self.ended {
            return Ok(false);
        }
        let now = Instant::now();
        if self.timer.is_some_and(|at| at > now) {
            return Ok(false);
        }
        self.timer = None;

        if self.playback.is_none() {
            self.load_entry();
            return Ok(false);
        }
        if self.opened && self.buffer_full() {
            trace!("SourceWorker: buffer full");
            return Ok(false);
        }

        let level = self.buffer_level();
        let Some(playback) = self.playback.as_mut() else {
            return Ok(false);
        };
        match playback.next_action(level, now)? {
            NextAction::LoadPlaylist { at, .. } if at > now => {
                trace!(wait = ?(at - now), "SourceWorker: waiting for playlist reload");
                self.timer = Some(at);
            }
            NextAction::LoadPlaylist {
                variant, reload, ..
            } => self.load_media(variant, reload)?,
            NextAction::FetchSegment(request) => self.fetch_segment(request)?,
            NextAction::EndOfStream => self.end_of_stream()?,
        }
        Ok(self.in_flight.is_none() && self.active.is_none() && self.timer.is_none() && !self.ended)
    }

    fn spawn<F>(&mut self, op: F)
    where
        F: Future<Output = NetEvent> + Send + 'static,
    {
        let token = self.cancel.child_token();
        let tx = self.net_tx.clone();
        let epoch = self.epoch;
        self.in_flight = Some(token.clone());
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                event = op => {
                    // The worker is gone when this fails.
                    let _ = tx.send(Tagged { epoch, event }).await;
                }
            }
        });
    }

    fn load_entry(&mut self) {
        let fetcher = self.fetcher.clone();
        let url = self.config.url.clone();
        debug!(%url, "SourceWorker: loading entry playlist");
        self.spawn(async move {
            let started = Instant::now();
            let result = fetcher.load_playlist(&url).await;
            NetEvent::Entry { started, result }
        });
    }

    fn load_media(&mut self, variant: usize, reload: bool) -> HlsResult<()> {
        let url = match self.playback.as_ref() {
            Some(playback) => playback.playlist().program.variant(variant)?.url.clone(),
            None => return Ok(()),
        };
        debug!(variant, reload, %url, "SourceWorker: loading media playlist");
        let fetcher = self.fetcher.clone();
        self.spawn(async move {
            let started = Instant::now();
            let result = fetcher.load_media(&url, reload).await;
            NetEvent::Media {
                variant,
                started,
                result,
            }
        });
        Ok(())
    }

    fn fetch_segment(&mut self, request: SegmentRequest) -> HlsResult<()> {
        let Some(key) = request.key.clone() else {
            self.open_segment(request, None);
            return Ok(());
        };
        if !matches!(key.method, EncryptionMethod::Aes128) {
            let error = HlsError::KeyProcessing(format!(
                "unsupported encryption method {:?}",
                key.method
            ));
            return self.segment_failed(request, error, 0);
        }
        if let Some(cached) = self.keys.get(&key.url) {
            trace!(key_url = %key.url, "SourceWorker: key from cache");
            self.events.emit(HlsEvent::KeyFetched {
                key_url: key.url.to_string(),
                cached: true,
            });
            self.open_segment(request, Some(cached));
            return Ok(());
        }

        let fetcher = self.fetcher.clone();
        self.spawn(async move {
            let result = fetcher.load_key(&key.url, key.iv).await;
            NetEvent::Key { request, result }
        });
        Ok(())
    }

    fn open_segment(&mut self, request: SegmentRequest, key: Option<[u8; 16]>) {
        trace!(
            variant = request.variant,
            sequence = request.sequence,
            attempt = request.attempt,
            url = %request.url,
            "SourceWorker: opening segment"
        );
        let fetcher = self.fetcher.clone();
        self.spawn(async move {
            let started = Instant::now();
            let result = fetcher.open_segment(&request.url).await;
            NetEvent::Segment {
                request,
                key,
                started,
                result,
            }
        });
    }

    fn end_of_stream(&mut self) -> HlsResult<()> {
        info!("SourceWorker: end of stream");
        self.ended = true;
        self.video.set_end_of_playback(true);
        self.audio.set_end_of_playback(true);
        self.events.emit(HlsEvent::EndOfStream);
        if !self.opened {
            return Err(HlsError::ProtocolViolation(
                "stream ended before any playable sample".into(),
            ));
        }
        self.try_complete_seek(true)
    }

    // Network completions.

    fn handle_net(&mut self, event: NetEvent) -> HlsResult<()> {
        match event {
            NetEvent::Entry { started, result } => {
                let url = self.config.url.clone();
                let playlist = match result? {
                    Playlist::Master(master) => HlsPlaylist::from_master(url, master)?,
                    Playlist::Media(media) => HlsPlaylist::from_media(url, media, started)?,
                };
                let bitrates = playlist.program.bitrates();
                info!(
                    variants = bitrates.len(),
                    master = playlist.has_master,
                    "SourceWorker: entry playlist loaded"
                );
                self.events.emit(HlsEvent::VariantsDiscovered { bitrates });
                self.playback = Some(HlsPlayback::new(playlist, &self.config, self.events.clone()));
                Ok(())
            }
            NetEvent::Media {
                variant,
                started,
                result,
            } => {
                let media = result?;
                if let Some(playback) = self.playback.as_mut() {
                    let outcome = playback.on_playlist_loaded(variant, media, started)?;
                    debug!(variant, ?outcome, "SourceWorker: media playlist applied");
                }
                Ok(())
            }
            NetEvent::Key { request, result } => match result {
                Ok(key) => {
                    if let Some(ref stream_key) = request.key {
                        self.keys.insert(stream_key.url.clone(), key);
                        self.events.emit(HlsEvent::KeyFetched {
                            key_url: stream_key.url.to_string(),
                            cached: false,
                        });
                    }
                    self.open_segment(request, Some(key));
                    Ok(())
                }
                Err(error) => self.segment_failed(request, error, 0),
            },
            NetEvent::Segment {
                request,
                key,
                started,
                result,
            } => match result {
                Ok(stream) => self.begin_segment(request, key, stream, started),
                Err(error) => self.segment_failed(request, error, 0),
            },
        }
    }

    fn begin_segment(
        &mut self,
        request: SegmentRequest,
        key: Option<[u8; 16]>,
        stream: ByteStream,
        started: Instant,
    ) -> HlsResult<()> {
        let decryptor = key
            .zip(request.key.as_ref())
            .map(|(key, stream_key)| SegmentDecryptor::new(DecryptContext::new(key, stream_key.iv)));

        if request.discontinuity && request.resume_offset == 0 {
            debug!(
                sequence = request.sequence,
                timeline = request.timeline,
                "SourceWorker: discontinuity"
            );
            if let Err(error) = self.demux.discontinuity() {
                warn!(%error, "SourceWorker: partial frame dropped at discontinuity");
            }
            self.video.clock().mark_discontinuity(request.timeline)?;
        }
        self.demux.begin_segment(request.segment_context());
        if let Some(playback) = self.playback.as_ref() {
            playback.on_segment_started(&request);
        }

        self.active = Some(ActiveSegment {
            request,
            stream,
            decryptor,
            pending: Vec::with_capacity(self.chunk_size),
            received: 0,
            position: 0,
            started,
            chunk_started: Instant::now(),
        });
        Ok(())
    }

    // Segment body.

    fn on_chunk(&mut self, bytes: &[u8]) -> HlsResult<()> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        active.received += bytes.len() as u64;
        active.pending.extend_from_slice(bytes);
        if active.pending.len() < self.chunk_size {
            return Ok(());
        }
        let data = std::mem::take(&mut active.pending);
        self.process(data, false)
    }

    fn process(&mut self, data: Vec<u8>, last: bool) -> HlsResult<()> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        let elapsed = active.chunk_started.elapsed();
        active.chunk_started = Instant::now();
        if let Some(playback) = self.playback.as_mut() {
            playback.push_throughput(data.len() as u64, elapsed);
        }

        let plain = match active.decrypt(data, last) {
            Ok(plain) => plain,
            Err(error) => return self.fail_active(error.into()),
        };
        let start = active.position;
        active.position += plain.len() as u64;
        let skip = usize::try_from(active.request.resume_offset.saturating_sub(start))
            .unwrap_or(usize::MAX)
            .min(plain.len());

        if let Err(error) = self.demux.push(&plain[skip..]) {
            return self.fail_active(error.into());
        }
        self.check_open(false)?;
        self.try_complete_seek(false)
    }

    fn on_segment_end(&mut self) -> HlsResult<()> {
        let rest = match self.active.as_mut() {
            Some(active) => std::mem::take(&mut active.pending),
            None => return Ok(()),
        };
        self.process(rest, true)?;
        // Failed while processing the tail.
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        if let Err(error) = self.demux.end_of_segment() {
            let demuxed = active.demuxed();
            return self.segment_failed(active.request, error.into(), demuxed);
        }

        let elapsed = active.started.elapsed();
        debug!(
            variant = active.request.variant,
            sequence = active.request.sequence,
            bytes = active.received,
            elapsed_ms = elapsed.as_millis(),
            "SourceWorker: segment complete"
        );
        if let Some(playback) = self.playback.as_mut() {
            playback.on_segment_completed(&active.request, active.received, elapsed);
        }
        self.check_open(true)?;
        self.try_complete_seek(false)
    }

    fn fail_active(&mut self, error: HlsError) -> HlsResult<()> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        if let Err(flush) = self.demux.discontinuity() {
            warn!(%flush, "SourceWorker: partial frame dropped after failure");
        }
        let demuxed = active.demuxed();
        self.segment_failed(active.request, error, demuxed)
    }

    fn segment_failed(
        &mut self,
        request: SegmentRequest,
        error: HlsError,
        demuxed: u64,
    ) -> HlsResult<()> {
        let Some(playback) = self.playback.as_mut() else {
            return Err(error);
        };
        let attempt = request.attempt + 1;
        if playback.on_segment_failed(request, error, demuxed)? == FailureOutcome::Retry {
            let delay = self.config.net.retry_policy.delay_for_attempt(attempt);
            self.timer = Some(Instant::now() + delay);
        }
        Ok(())
    }

    // Buffers.

    fn bound_media(&self) -> Vec<MediaType> {
        let mut media: Vec<MediaType> = self
            .demux
            .bound_pids()
            .into_iter()
            .filter_map(|(_, kind)| kind.media_type())
            .collect();
        media.dedup();
        media
    }

    fn buffer(&self, media: MediaType) -> &SampleBuffer {
        match media {
            MediaType::Video => &self.video,
            MediaType::Audio => &self.audio,
        }
    }

    /// Buffered duration of the less filled bound stream.
    fn buffer_level(&self) -> Duration {
        self.bound_media()
            .into_iter()
            .map(|media| self.buffer(media).buffered_duration())
            .min()
            .map_or(Duration::ZERO, hns_to_duration)
    }

    fn buffer_full(&self) -> bool {
        self.buffer_level() >= self.config.max_buffer_duration
            || self.video.buffered_bytes() + self.audio.buffered_bytes()
                >= self.config.max_buffer_bytes
    }

    fn report_pending(&self) {
        for buffer in [&self.video, &self.audio] {
            let media = buffer.media_type();
            buffer.try_report_pending(|delivery| self.sink.deliver(media, delivery));
        }
    }

    fn update_buffering(&mut self) {
        let level = self.buffer_level();
        let min = self.config.min_buffer_to_play;
        if self.buffering {
            let progress = if min.is_zero() {
                1.0
            } else {
                (level.as_secs_f32() / min.as_secs_f32()).min(1.0)
            };
            self.report_progress(progress);
            let filled = level >= min || self.ended;
            if filled && self.opened && self.seek_target.is_none() {
                self.set_buffering(false);
            }
        } else if !self.ended
            && level.is_zero()
            && (self.video.pending_requests() > 0 || self.audio.pending_requests() > 0)
        {
            warn!("SourceWorker: buffer underrun");
            self.set_buffering(true);
        }
    }

    fn report_progress(&mut self, progress: f32) {
        if (progress - self.progress).abs() > f32::EPSILON {
            self.progress = progress;
            self.sink.on_buffering_progress(progress);
        }
    }

    fn set_buffering(&mut self, buffering: bool) {
        if !buffering {
            self.report_progress(1.0);
        }
        self.buffering = buffering;
        self.video.set_buffering(buffering);
        self.audio.set_buffering(buffering);
        debug!(buffering, "SourceWorker: buffering changed");
        self.events.emit(HlsEvent::BufferingChanged {
            buffering,
            progress: self.progress.max(0.0),
        });
    }

    /// Report the open once every bound stream is described, or at the end
    /// of a segment once any is.
    fn check_open(&mut self, segment_ended: bool) -> HlsResult<()> {
        if self.opened {
            return Ok(());
        }
        let video = self.video.descriptor();
        let audio = self.audio.descriptor();
        let bound = self.bound_media();
        let described = |media: &MediaType| match media {
            MediaType::Video => video.is_some(),
            MediaType::Audio => audio.is_some(),
        };
        let ready = if segment_ended {
            video.is_some() || audio.is_some()
        } else {
            !bound.is_empty() && bound.iter().all(described)
        };
        if !ready {
            if segment_ended {
                return Err(HlsError::ProtocolViolation(
                    "no playable elementary stream in segment".into(),
                ));
            }
            return Ok(());
        }

        let Some(playback) = self.playback.as_ref() else {
            return Ok(());
        };
        let info = OpenInfo {
            duration: playback.duration(),
            seekable: playback.is_seekable(),
            video,
            audio,
        };
        info!(
            duration = ?info.duration,
            seekable = info.seekable,
            video = info.video.is_some(),
            audio = info.audio.is_some(),
            "SourceWorker: open completed"
        );
        self.opened = true;
        self.sink.on_open_completed(info);
        Ok(())
    }

    /// After a seek, start video on a key frame and drop audio before it.
    fn try_complete_seek(&mut self, force: bool) -> HlsResult<()> {
        let Some(target) = self.seek_target else {
            return Ok(());
        };
        let has_video = self.bound_media().contains(&MediaType::Video);
        if has_video {
            while self.video.peek_sample(|sample| sample.key_frame) == Some(false) {
                if let Some(sample) = self.video.remove_head() {
                    self.video.recycle(sample)?;
                }
            }
        }
        let lead = if has_video { &self.video } else { &self.audio };
        let aligned = match lead.head_timestamp() {
            Some(timestamp) => timestamp,
            None if force => target,
            None => return Ok(()),
        };
        if has_video {
            while self
                .audio
                .peek_sample(|sample| sample.adjusted_timestamp < aligned)
                == Some(true)
            {
                if let Some(sample) = self.audio.remove_head() {
                    self.audio.recycle(sample)?;
                }
            }
        }

        self.seek_target = None;
        debug!(target, aligned, "SourceWorker: seek aligned");
        self.sink.on_seek_completed(aligned);
        Ok(())
    }

    // Teardown.

    fn abort_in_flight(&mut self) {
        self.epoch += 1;
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
        if let Some(active) = self.active.take() {
            debug!(
                sequence = active.request.sequence,
                "SourceWorker: segment download aborted"
            );
        }
    }

    fn fail(&self, error: &HlsError) {
        error!(%error, "SourceWorker: fatal error, closing");
        self.sink.on_error(error);
        self.events.emit(HlsEvent::Error {
            error: error.to_string(),
            fatal: true,
        });
    }
}

async fn next_chunk(active: &mut Option<ActiveSegment>) -> Option<Result<Bytes, NetError>> {
    match active {
        Some(active) => active.stream.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

pub(crate) fn duration_to_hns(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos() / 100).unwrap_or(i64::MAX)
}

pub(crate) fn hns_to_duration(hns: i64) -> Duration {
    Duration::from_nanos(u64::try_from(hns).unwrap_or(0).saturating_mul(100))
}
