//! Coordinator state machine driven with hand-made stream events
//!
//! Instants are passed explicitly so timestamp assertions do not depend on
//! scheduling.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crabcast::encoder::{
    AudioCodecKind, BufferFlags, BufferInfo, EncodedBuffer, EncoderEvent, MediaFormat,
    StreamEvent, StreamKind, VideoCodecKind,
};
use crabcast::audio::SourceKind;
use crabcast::errors::EncoderError;
use crabcast::recording::{MuxCoordinator, PtsMode, RecorderConfig, RecorderParts, RecorderState};
use crabcast::testing::{
    CallbackEvent, CollectingCallback, EncoderCalls, MemorySink, NullScreen, SinkRecord,
    StubEncoder, TrackRejection,
};
use crossbeam_channel::Receiver;

struct Harness {
    coordinator: MuxCoordinator,
    callback: Arc<CollectingCallback>,
    record: Arc<Mutex<SinkRecord>>,
    video_calls: Arc<EncoderCalls>,
    audio_calls: Arc<EncoderCalls>,
    _events_rx: Receiver<StreamEvent>,
}

impl Harness {
    fn new(video: StubEncoder, audio: Option<StubEncoder>, sink: MemorySink, config: RecorderConfig) -> Self {
        let callback = CollectingCallback::new();
        let record = sink.record();
        let video_calls = video.calls();
        let audio_calls = audio
            .as_ref()
            .map(|a| a.calls())
            .unwrap_or_else(|| Arc::new(EncoderCalls::default()));
        let (events_tx, events_rx) = crossbeam_channel::bounded(1024);

        let parts = RecorderParts {
            video: Box::new(video),
            audio: audio.map(|a| Box::new(a) as Box<dyn crabcast::Encoder>),
            capture: Box::new(NullScreen::default()),
            sink_factory: sink.into_factory(),
        };
        let coordinator =
            MuxCoordinator::new("out.mp4", config, parts, callback.clone(), events_tx);

        Self {
            coordinator,
            callback,
            record,
            video_calls,
            audio_calls,
            _events_rx: events_rx,
        }
    }

    fn with_audio() -> Self {
        Self::new(
            StubEncoder::video(),
            Some(StubEncoder::audio()),
            MemorySink::new(),
            RecorderConfig::default(),
        )
    }

    fn video_only() -> Self {
        Self::new(StubEncoder::video(), None, MemorySink::new(), RecorderConfig::default())
    }

    fn send(&mut self, stream: StreamKind, event: EncoderEvent, now: Instant) {
        self.coordinator.handle_event(StreamEvent { stream, event }, now);
    }

    fn format(&mut self, stream: StreamKind, now: Instant) {
        let format = match stream {
            StreamKind::Video => video_format(),
            StreamKind::Audio => audio_format(),
        };
        self.send(stream, EncoderEvent::FormatChanged(format), now);
    }

    fn buffer(&mut self, stream: StreamKind, size: usize, raw_pts: i64, now: Instant) {
        self.send(stream, EncoderEvent::BufferAvailable(sample(size, raw_pts)), now);
    }

    fn end_of_stream(&mut self, stream: StreamKind, now: Instant) {
        self.send(
            stream,
            EncoderEvent::BufferAvailable(EncodedBuffer::end_of_stream(0, 0)),
            now,
        );
    }

    fn record(&self) -> SinkRecord {
        self.record.lock().unwrap().clone()
    }
}

fn video_format() -> MediaFormat {
    MediaFormat::Video {
        codec: VideoCodecKind::H264,
        width: 16,
        height: 16,
        fps: 30.0,
    }
}

fn audio_format() -> MediaFormat {
    MediaFormat::Audio {
        codec: AudioCodecKind::Opus,
        sample_rate: 48_000,
        channels: 2,
    }
}

fn sample(size: usize, raw_pts: i64) -> EncodedBuffer {
    EncodedBuffer::new(
        0,
        Bytes::from(vec![0xAB; size]),
        BufferInfo::new(size, raw_pts, BufferFlags::KEY_FRAME),
    )
}

fn saved() -> Result<PathBuf, String> {
    Ok(PathBuf::from("out.mp4"))
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

// ═══════════════════════════════════════════════════════════════════════════
// START AND FORMAT HANDSHAKE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_start_prepares_both_encoders() {
    let mut h = Harness::with_audio();
    assert!(h.coordinator.start(Instant::now()));

    assert_eq!(h.coordinator.state(), RecorderState::Recording);
    assert_eq!(h.video_calls.prepared(), 1);
    assert_eq!(h.audio_calls.prepared(), 1);
    assert!(h.coordinator.audio_active());
    assert!(h.coordinator.clock().is_some());
    assert_eq!(h.callback.start_count(), 1);
    assert_eq!(h.record().path, Some(PathBuf::from("out.mp4")));
    assert!(!h.record().started);
}

#[test]
fn test_video_buffers_before_audio_format_are_flushed_in_order() {
    let t0 = Instant::now();
    let mut h = Harness::with_audio();
    assert!(h.coordinator.start(t0));

    h.format(StreamKind::Video, t0);
    h.buffer(StreamKind::Video, 1, 0, t0 + ms(10));
    h.buffer(StreamKind::Video, 2, 33_333, t0 + ms(20));
    h.buffer(StreamKind::Video, 3, 66_666, t0 + ms(30));

    assert!(!h.coordinator.is_sink_started());
    assert_eq!(h.coordinator.pending_len(StreamKind::Video), 3);
    assert!(h.record().samples.is_empty());

    h.format(StreamKind::Audio, t0 + ms(50));

    assert!(h.coordinator.is_sink_started());
    assert_eq!(h.coordinator.pending_len(StreamKind::Video), 0);
    let record = h.record();
    assert!(record.started);
    assert_eq!(record.tracks, vec![video_format(), audio_format()]);

    let sizes: Vec<usize> = record.samples.iter().map(|s| s.size).collect();
    assert_eq!(sizes, vec![1, 2, 3]);
    let pts = record.pts_for(0);
    assert!(pts.windows(2).all(|w| w[0] <= w[1]), "pts regressed: {:?}", pts);
    assert!(h.callback.stop_results().is_empty());
}

#[test]
fn test_audio_buffers_wait_for_video_format() {
    let t0 = Instant::now();
    let mut h = Harness::with_audio();
    h.coordinator.start(t0);

    h.format(StreamKind::Audio, t0);
    h.buffer(StreamKind::Audio, 10, 0, t0 + ms(5));
    h.buffer(StreamKind::Audio, 11, 20_000, t0 + ms(25));
    assert_eq!(h.coordinator.pending_len(StreamKind::Audio), 2);

    h.format(StreamKind::Video, t0 + ms(40));
    let record = h.record();
    let audio = record.track_of(StreamKind::Audio).unwrap();
    let sizes: Vec<usize> = record
        .samples
        .iter()
        .filter(|s| s.track == audio)
        .map(|s| s.size)
        .collect();
    assert_eq!(sizes, vec![10, 11]);
}

#[test]
fn test_video_only_sink_starts_on_video_format() {
    let t0 = Instant::now();
    let mut h = Harness::video_only();
    h.coordinator.start(t0);
    h.format(StreamKind::Video, t0);

    assert!(h.coordinator.is_sink_started());
    assert_eq!(h.record().tracks, vec![video_format()]);
}

#[test]
fn test_repeated_format_is_ignored() {
    let t0 = Instant::now();
    let mut h = Harness::video_only();
    h.coordinator.start(t0);
    h.format(StreamKind::Video, t0);
    h.format(StreamKind::Video, t0 + ms(10));

    assert_eq!(h.record().tracks.len(), 1);
    assert_eq!(h.coordinator.state(), RecorderState::Recording);
}

#[test]
fn test_codec_config_and_empty_buffers_are_not_samples() {
    let t0 = Instant::now();
    let mut h = Harness::video_only();
    h.coordinator.start(t0);
    h.format(StreamKind::Video, t0);

    let config = EncodedBuffer::new(
        0,
        Bytes::from_static(&[0, 0, 0, 1, 0x67]),
        BufferInfo::new(5, 0, BufferFlags::CODEC_CONFIG),
    );
    h.send(StreamKind::Video, EncoderEvent::BufferAvailable(config), t0 + ms(1));
    h.buffer(StreamKind::Video, 0, 0, t0 + ms(2));
    assert!(h.record().samples.is_empty());

    h.buffer(StreamKind::Video, 4, 0, t0 + ms(3));
    assert_eq!(h.record().samples.len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// PAUSE / RESUME
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_pause_gap_is_removed_from_timeline() {
    let t0 = Instant::now();
    let mut h = Harness::video_only();
    h.coordinator.start(t0);
    h.format(StreamKind::Video, t0);

    h.buffer(StreamKind::Video, 8, 0, t0 + ms(1967));
    h.buffer(StreamKind::Video, 8, 0, t0 + ms(2000));

    h.coordinator.pause(t0 + ms(2000));
    assert_eq!(h.coordinator.state(), RecorderState::Paused);

    // Encoders keep producing while paused; the output is discarded
    h.buffer(StreamKind::Video, 8, 0, t0 + ms(2200));
    h.buffer(StreamKind::Video, 8, 0, t0 + ms(2400));
    assert_eq!(h.coordinator.stats().paused_discards, 2);

    h.coordinator.resume(t0 + ms(2500));
    assert_eq!(h.coordinator.state(), RecorderState::Recording);
    h.buffer(StreamKind::Video, 8, 0, t0 + ms(2533));

    let pts = h.record().pts_for(0);
    assert_eq!(pts, vec![1_967_000, 2_000_000, 2_033_000]);
    assert_eq!(pts[2] - pts[1], 33_000);
}

#[test]
fn test_pause_requires_recording_state() {
    let mut h = Harness::video_only();
    h.coordinator.pause(Instant::now());
    assert_eq!(h.coordinator.state(), RecorderState::Idle);

    h.coordinator.start(Instant::now());
    h.coordinator.resume(Instant::now());
    assert_eq!(h.coordinator.state(), RecorderState::Recording);
}

#[test]
fn test_end_of_stream_is_honoured_while_paused() {
    let t0 = Instant::now();
    let mut h = Harness::video_only();
    h.coordinator.start(t0);
    h.format(StreamKind::Video, t0);
    h.coordinator.pause(t0 + ms(100));

    h.end_of_stream(StreamKind::Video, t0 + ms(200));

    assert!(h.coordinator.is_finished());
    assert_eq!(h.record().end_of_stream_tracks(), vec![0]);
    assert_eq!(h.callback.stop_results().len(), 1);
}

#[test]
fn test_encoder_relative_timestamps_are_rebased() {
    let t0 = Instant::now();
    let config = RecorderConfig::default().with_pts_mode(PtsMode::EncoderRelative);
    let mut h = Harness::new(StubEncoder::video(), None, MemorySink::new(), config);
    h.coordinator.start(t0);
    h.format(StreamKind::Video, t0);

    h.buffer(StreamKind::Video, 4, 5_000_000, t0);
    h.buffer(StreamKind::Video, 4, 5_033_000, t0);
    h.buffer(StreamKind::Video, 4, 5_010_000, t0);

    assert_eq!(h.record().pts_for(0), vec![0, 33_000, 34_000]);
}

// ═══════════════════════════════════════════════════════════════════════════
// DEGRADATION AND FAILURE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_unsupported_audio_track_continues_video_only() {
    let t0 = Instant::now();
    let mut h = Harness::new(
        StubEncoder::video(),
        Some(StubEncoder::audio()),
        MemorySink::new().rejecting(TrackRejection::AudioUnsupported),
        RecorderConfig::default(),
    );
    h.coordinator.start(t0);
    h.format(StreamKind::Video, t0);
    h.buffer(StreamKind::Audio, 6, 0, t0 + ms(5));
    h.format(StreamKind::Audio, t0 + ms(10));

    assert!(h.coordinator.is_sink_started());
    assert!(!h.coordinator.audio_active());
    assert_eq!(h.coordinator.pending_len(StreamKind::Audio), 0);
    assert_eq!(h.audio_calls.stopped(), 1);

    h.buffer(StreamKind::Video, 4, 0, t0 + ms(20));
    h.buffer(StreamKind::Audio, 6, 0, t0 + ms(25));
    h.buffer(StreamKind::Video, 4, 0, t0 + ms(40));

    let record = h.record();
    assert_eq!(record.tracks, vec![video_format()]);
    assert!(record.samples.iter().all(|s| s.track == 0));
    assert_eq!(record.samples.len(), 2);
    assert!(h.callback.stop_results().is_empty(), "on_stop fired early");
    assert_eq!(h.coordinator.state(), RecorderState::Recording);

    h.coordinator.stop();
    assert_eq!(h.callback.stop_results(), vec![saved()]);
    assert_eq!(h.audio_calls.released(), 1);
}

#[test]
fn test_video_track_rejection_is_fatal() {
    let t0 = Instant::now();
    let mut h = Harness::new(
        StubEncoder::video(),
        None,
        MemorySink::new().rejecting(TrackRejection::VideoFatal),
        RecorderConfig::default(),
    );
    h.coordinator.start(t0);
    h.format(StreamKind::Video, t0);

    assert!(h.coordinator.is_finished());
    assert_eq!(h.coordinator.state(), RecorderState::Released);
    let results = h.callback.stop_results();
    assert_eq!(results.len(), 1);
    assert!(results[0].as_ref().unwrap_err().contains("video track rejected"));
    assert_eq!(h.video_calls.released(), 1);
    assert!(h.record().released);

    h.coordinator.stop();
    assert_eq!(h.callback.stop_results().len(), 1);
}

#[test]
fn test_audio_error_after_start_degrades() {
    let t0 = Instant::now();
    let mut h = Harness::with_audio();
    h.coordinator.start(t0);
    h.format(StreamKind::Video, t0);
    h.format(StreamKind::Audio, t0);
    h.buffer(StreamKind::Audio, 6, 0, t0 + ms(10));

    h.send(
        StreamKind::Audio,
        EncoderEvent::Error(EncoderError::new(StreamKind::Audio, "device unplugged")),
        t0 + ms(20),
    );

    assert!(!h.coordinator.audio_active());
    assert_eq!(h.coordinator.state(), RecorderState::Recording);
    assert_eq!(h.record().end_of_stream_tracks(), vec![1]);

    h.buffer(StreamKind::Video, 4, 0, t0 + ms(30));
    h.buffer(StreamKind::Audio, 6, 0, t0 + ms(30));
    assert_eq!(h.record().pts_for(0).len(), 1);
    assert_eq!(h.record().pts_for(1).len(), 1);

    h.coordinator.stop();
    assert_eq!(h.callback.stop_results(), vec![saved()]);
    assert_eq!(h.record().end_of_stream_tracks(), vec![1, 0]);
}

#[test]
fn test_audio_error_is_fatal_when_required() {
    let t0 = Instant::now();
    let mut h = Harness::new(
        StubEncoder::video(),
        Some(StubEncoder::audio()),
        MemorySink::new(),
        RecorderConfig::default().with_audio_required(true),
    );
    h.coordinator.start(t0);
    h.send(
        StreamKind::Audio,
        EncoderEvent::Error(EncoderError::new(StreamKind::Audio, "no device")),
        t0,
    );

    assert!(h.coordinator.is_finished());
    let results = h.callback.stop_results();
    assert_eq!(results.len(), 1);
    assert!(results[0].as_ref().unwrap_err().contains("no device"));
}

#[test]
fn test_rejected_audio_track_is_fatal_when_required() {
    let t0 = Instant::now();
    let mut h = Harness::new(
        StubEncoder::video(),
        Some(StubEncoder::audio()),
        MemorySink::new().rejecting(TrackRejection::AudioUnsupported),
        RecorderConfig::default().with_audio_required(true),
    );
    h.coordinator.start(t0);
    h.format(StreamKind::Video, t0);
    h.format(StreamKind::Audio, t0 + ms(10));

    assert!(!h.coordinator.is_sink_started());
    assert!(h.coordinator.is_finished());
    let results = h.callback.stop_results();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
    assert!(h.record().samples.is_empty());
}

#[test]
fn test_audio_error_before_format_lets_sink_start() {
    let t0 = Instant::now();
    let mut h = Harness::with_audio();
    h.coordinator.start(t0);
    h.format(StreamKind::Video, t0);
    h.buffer(StreamKind::Video, 4, 0, t0 + ms(10));
    assert!(!h.coordinator.is_sink_started());

    h.send(
        StreamKind::Audio,
        EncoderEvent::Error(EncoderError::new(StreamKind::Audio, "codec refused")),
        t0 + ms(20),
    );

    assert!(h.coordinator.is_sink_started());
    assert_eq!(h.record().tracks, vec![video_format()]);
    assert_eq!(h.record().samples.len(), 1);
}

#[test]
fn test_audio_prepare_failure_records_video_only() {
    let t0 = Instant::now();
    let mut h = Harness::new(
        StubEncoder::video(),
        Some(StubEncoder::audio().failing_prepare()),
        MemorySink::new(),
        RecorderConfig::default(),
    );
    assert!(h.coordinator.start(t0));
    assert!(!h.coordinator.audio_active());
    assert_eq!(h.audio_calls.released(), 1);

    h.format(StreamKind::Video, t0);
    assert!(h.coordinator.is_sink_started());
    assert_eq!(h.callback.start_count(), 1);
}

#[test]
fn test_video_prepare_failure_is_fatal() {
    let mut h = Harness::new(
        StubEncoder::video().failing_prepare(),
        Some(StubEncoder::audio()),
        MemorySink::new(),
        RecorderConfig::default(),
    );
    assert!(!h.coordinator.start(Instant::now()));

    assert_eq!(h.callback.start_count(), 0);
    let results = h.callback.stop_results();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
    assert!(!h.record().started);
    assert_eq!(h.video_calls.released(), 1);
}

#[test]
fn test_video_error_is_fatal() {
    let t0 = Instant::now();
    let mut h = Harness::video_only();
    h.coordinator.start(t0);
    h.format(StreamKind::Video, t0);
    h.send(
        StreamKind::Video,
        EncoderEvent::Error(EncoderError::new(StreamKind::Video, "encoder lost")),
        t0 + ms(5),
    );

    assert!(h.coordinator.is_finished());
    let results = h.callback.stop_results();
    assert_eq!(results.len(), 1);
    assert!(results[0].as_ref().unwrap_err().contains("encoder lost"));
    assert!(h.record().stopped);
}

// ═══════════════════════════════════════════════════════════════════════════
// END OF STREAM AND TEARDOWN
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_teardown_after_both_tracks_end() {
    let t0 = Instant::now();
    let mut h = Harness::with_audio();
    h.coordinator.start(t0);
    h.format(StreamKind::Video, t0);
    h.format(StreamKind::Audio, t0);
    h.buffer(StreamKind::Video, 4, 0, t0 + ms(10));
    h.buffer(StreamKind::Audio, 6, 0, t0 + ms(10));

    h.end_of_stream(StreamKind::Video, t0 + ms(20));
    assert!(!h.coordinator.is_finished());

    // Samples arriving on an ended track are ignored
    h.buffer(StreamKind::Video, 4, 0, t0 + ms(25));
    assert_eq!(h.record().pts_for(0).len(), 1);

    h.end_of_stream(StreamKind::Audio, t0 + ms(30));
    assert!(h.coordinator.is_finished());

    let record = h.record();
    assert_eq!(record.end_of_stream_tracks(), vec![0, 1]);
    assert!(record.stopped);
    assert!(record.released);
    assert_eq!(h.callback.stop_results(), vec![saved()]);
    assert_eq!(h.video_calls.stopped(), 1);
    assert_eq!(h.video_calls.released(), 1);
    assert_eq!(h.audio_calls.released(), 1);
    assert_eq!(h.coordinator.state(), RecorderState::Released);
}

#[test]
fn test_stop_writes_end_of_stream_for_open_tracks() {
    let t0 = Instant::now();
    let mut h = Harness::with_audio();
    h.coordinator.start(t0);
    h.format(StreamKind::Video, t0);
    h.format(StreamKind::Audio, t0);
    h.buffer(StreamKind::Video, 4, 0, t0 + ms(100));

    h.coordinator.stop();
    h.coordinator.stop();

    let record = h.record();
    assert_eq!(record.end_of_stream_tracks(), vec![0, 1]);
    let eos = record.samples.iter().find(|s| s.end_of_stream && s.track == 0).unwrap();
    assert_eq!(eos.presentation_time_us, 100_000);
    assert_eq!(h.callback.stop_results().len(), 1);
}

#[test]
fn test_stop_before_sink_start_reports_success_without_samples() {
    let mut h = Harness::with_audio();
    h.coordinator.start(Instant::now());
    h.coordinator.stop();

    let record = h.record();
    assert!(!record.started);
    assert!(record.samples.is_empty());
    assert!(record.released);
    assert_eq!(h.callback.stop_results().len(), 1);
}

#[test]
fn test_discard_before_start_has_no_callbacks() {
    let mut h = Harness::with_audio();
    h.coordinator.stop();

    assert!(h.callback.events().is_empty());
    assert_eq!(h.video_calls.released(), 1);
    assert_eq!(h.audio_calls.released(), 1);
    assert_eq!(h.coordinator.state(), RecorderState::Released);
}

#[test]
fn test_on_recording_excludes_end_of_stream() {
    let t0 = Instant::now();
    let mut h = Harness::video_only();
    h.coordinator.start(t0);
    h.format(StreamKind::Video, t0);
    h.buffer(StreamKind::Video, 4, 0, t0 + ms(10));
    h.buffer(StreamKind::Video, 4, 0, t0 + ms(43));
    h.end_of_stream(StreamKind::Video, t0 + ms(50));

    assert_eq!(h.callback.recorded_pts(), vec![10_000, 43_000]);
}

#[test]
fn test_diagnostic_events_reach_callback() {
    let t0 = Instant::now();
    let mut h = Harness::with_audio();
    h.coordinator.start(t0);
    h.send(
        StreamKind::Audio,
        EncoderEvent::InternalAudioNotAvailable(SourceKind::Internal),
        t0,
    );
    h.send(StreamKind::Audio, EncoderEvent::WeakSignal(SourceKind::Microphone), t0);
    h.send(
        StreamKind::Audio,
        EncoderEvent::SilenceDetected { consecutive_frames: 10 },
        t0,
    );

    let events = h.callback.events();
    assert!(events.contains(&CallbackEvent::InternalAudioNotAvailable(SourceKind::Internal)));
    assert!(events.contains(&CallbackEvent::WeakSignal(SourceKind::Microphone)));
    assert!(events.contains(&CallbackEvent::SilenceDetected(10)));
    assert_eq!(h.coordinator.state(), RecorderState::Recording);
}
