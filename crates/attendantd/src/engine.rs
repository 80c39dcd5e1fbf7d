//! Monitoring loop: frames in, attendance decisions and overlays out.
//!
//! Runs on a dedicated OS thread. Every frame is pulled from the source so
//! the camera never backs up; only every Nth frame is encoded and decided.
//! Overlays from the last processed frame stay current until the next one.

use crate::sink::OverlaySink;
use attendant_core::{AttendanceStore, DecisionEngine, DecisionOutcome, FrameThrottle, Overlay};
use attendant_hw::{CameraError, FrameSource};
use attendant_store::{AttendanceWriter, RecognitionLog};
use attendant_vision::FaceEncoder;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("frame source failed: {0}")]
    Source(#[from] CameraError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread panicked")]
    Panicked,
}

/// Destination for recognition log entries, one batch per processed frame.
///
/// Best-effort and must not block the frame loop.
pub trait RecognitionSink: Send {
    fn record(&self, entries: Vec<RecognitionLog>);
}

impl RecognitionSink for AttendanceWriter {
    fn record(&self, entries: Vec<RecognitionLog>) {
        // Fire and forget; the spawned task logs its own failures.
        drop(self.queue_recognitions(entries));
    }
}

/// Counters reported when the loop ends.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonitorStats {
    pub frames_seen: u64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub faces: u64,
    pub marked: u64,
}

pub struct Monitor<S> {
    source: Box<dyn FrameSource>,
    encoder: Box<dyn FaceEncoder>,
    engine: DecisionEngine<S>,
    throttle: FrameThrottle,
    sink: Box<dyn OverlaySink>,
    recognitions: Option<Box<dyn RecognitionSink>>,
    overlays: Vec<Overlay>,
    stats: MonitorStats,
}

impl<S: AttendanceStore + 'static> Monitor<S> {
    pub fn new(
        source: Box<dyn FrameSource>,
        encoder: Box<dyn FaceEncoder>,
        engine: DecisionEngine<S>,
        throttle: FrameThrottle,
        sink: Box<dyn OverlaySink>,
    ) -> Self {
        Self {
            source,
            encoder,
            engine,
            throttle,
            sink,
            recognitions: None,
            overlays: Vec::new(),
            stats: MonitorStats::default(),
        }
    }

    pub fn with_recognition_log(mut self, sink: Box<dyn RecognitionSink>) -> Self {
        self.recognitions = Some(sink);
        self
    }

    /// Overlays from the most recently processed frame.
    pub fn overlays(&self) -> &[Overlay] {
        &self.overlays
    }

    /// Pull one frame and, if the throttle selects it, decide its faces.
    ///
    /// Returns `Ok(true)` when the frame was processed. A source error is
    /// returned as-is and ends the loop.
    pub fn step(&mut self) -> Result<bool, EngineError> {
        let frame = self.source.next_frame()?;
        self.stats.frames_seen += 1;

        if !self.throttle.should_process() {
            return Ok(false);
        }

        let observations = match self.encoder.encode(&frame) {
            Ok(observations) => observations,
            Err(e) => {
                self.stats.frames_skipped += 1;
                tracing::warn!(sequence = frame.sequence, error = %e, "face encoding failed; frame skipped");
                return Ok(false);
            }
        };
        self.stats.frames_processed += 1;

        let now = Utc::now();
        let outcomes = self.engine.decide_frame(&observations, now);

        self.stats.faces += observations.len() as u64;
        self.stats.marked += outcomes.iter().filter(|o| o.is_marked()).count() as u64;

        if let Some(log) = &self.recognitions {
            if !outcomes.is_empty() {
                log.record(outcomes.iter().map(|o| log_entry(o, now)).collect());
            }
        }

        self.overlays = observations
            .iter()
            .zip(&outcomes)
            .map(|(obs, outcome)| Overlay::new(obs.region.clone(), outcome))
            .collect();

        if let Err(e) = self.sink.render(&frame, &self.overlays) {
            tracing::warn!(error = %e, "overlay render failed");
        }

        Ok(true)
    }

    /// Run until `shutdown` is set or the source fails.
    ///
    /// The flag is checked between frames, so a decision in progress
    /// (including its store write) always completes first.
    pub fn run(mut self, shutdown: &AtomicBool) -> Result<MonitorStats, EngineError> {
        tracing::info!(
            source = %self.source.describe(),
            encoder = self.encoder.name(),
            stride = self.throttle.stride().get(),
            "monitoring started"
        );

        while !shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.step() {
                tracing::error!(error = %e, "monitoring stopped");
                return Err(e);
            }
        }

        tracing::info!(
            frames = self.stats.frames_seen,
            processed = self.stats.frames_processed,
            marked = self.stats.marked,
            "monitoring stopped on shutdown"
        );
        Ok(self.stats)
    }

    /// Spawn the loop on a dedicated OS thread.
    pub fn spawn(self, shutdown: Arc<AtomicBool>) -> Result<MonitorHandle, EngineError> {
        let thread = std::thread::Builder::new()
            .name("attendant-engine".into())
            .spawn(move || self.run(&shutdown))
            .map_err(EngineError::Spawn)?;
        Ok(MonitorHandle { thread })
    }
}

/// Join handle for the engine thread.
pub struct MonitorHandle {
    thread: JoinHandle<Result<MonitorStats, EngineError>>,
}

impl MonitorHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the loop to exit.
    pub fn join(self) -> Result<MonitorStats, EngineError> {
        self.thread.join().map_err(|_| EngineError::Panicked)?
    }
}

fn log_entry(outcome: &DecisionOutcome, now: chrono::DateTime<Utc>) -> RecognitionLog {
    RecognitionLog {
        identity: outcome.identity().map(|i| i.id.clone()),
        confidence: outcome.confidence(),
        status: outcome.status().to_string(),
        logged_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkError;
    use attendant_core::{
        AttendanceRecord, BoundingBox, CooldownTracker, DistanceMetric, Embedding, FaceMatcher,
        Gallery, Identity, Observation, PresentationState, StoreError,
    };
    use attendant_hw::Frame;
    use attendant_vision::EncoderError;
    use chrono::TimeDelta;
    use std::collections::VecDeque;
    use std::num::NonZeroU32;
    use std::sync::Mutex;

    /// Yields `frames` blank frames, then fails as disconnected.
    struct ScriptedSource {
        remaining: u32,
        sequence: u32,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            if self.remaining == 0 {
                return Err(CameraError::Disconnected("script exhausted".into()));
            }
            self.remaining -= 1;
            self.sequence += 1;
            Ok(Frame::new(vec![0; 4 * 4 * 3], 4, 4, self.sequence))
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    /// Returns scripted per-call results; counts calls.
    struct ScriptedEncoder {
        script: VecDeque<Result<Vec<Observation>, EncoderError>>,
        calls: Arc<Mutex<u32>>,
    }

    impl FaceEncoder for ScriptedEncoder {
        fn encode(&mut self, _frame: &Frame) -> Result<Vec<Observation>, EncoderError> {
            *self.calls.lock().unwrap() += 1;
            self.script.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<AttendanceRecord>>,
        fail: Mutex<bool>,
    }

    impl AttendanceStore for MemoryStore {
        fn append(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
            if *self.fail.lock().unwrap() {
                return Err(StoreError::Write("disk full".into()));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct CapturingSink {
        frames: Arc<Mutex<Vec<Vec<PresentationState>>>>,
    }

    impl OverlaySink for CapturingSink {
        fn render(&mut self, _frame: &Frame, overlays: &[Overlay]) -> Result<(), SinkError> {
            self.frames
                .lock()
                .unwrap()
                .push(overlays.iter().map(|o| o.state).collect());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct CapturingLog {
        batches: Arc<Mutex<Vec<Vec<RecognitionLog>>>>,
    }

    impl RecognitionSink for CapturingLog {
        fn record(&self, entries: Vec<RecognitionLog>) {
            self.batches.lock().unwrap().push(entries);
        }
    }

    fn observation(x: f32) -> Observation {
        Observation {
            region: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 2.0,
                height: 2.0,
                confidence: 0.9,
                landmarks: None,
            },
            embedding: Embedding::new(vec![x]),
        }
    }

    /// Alice at [0.0], euclidean: probe [x] has confidence 1 - |x|.
    fn decision_engine(store: Arc<MemoryStore>) -> DecisionEngine<Arc<MemoryStore>> {
        let gallery = Gallery::new(vec![Identity {
            id: "alice".into(),
            name: "Alice".into(),
            employee_id: None,
            references: vec![Embedding::new(vec![0.0])],
        }])
        .unwrap();
        let matcher = FaceMatcher::new(Arc::new(gallery), DistanceMetric::Euclidean, 0.6);
        let cooldown = Arc::new(CooldownTracker::new(TimeDelta::minutes(5)));
        DecisionEngine::new(matcher, cooldown, store)
    }

    struct Harness {
        monitor: Monitor<Arc<MemoryStore>>,
        store: Arc<MemoryStore>,
        calls: Arc<Mutex<u32>>,
        sink: CapturingSink,
    }

    fn harness(frames: u32, stride: u32, script: Vec<Result<Vec<Observation>, EncoderError>>) -> Harness {
        let store = Arc::new(MemoryStore::default());
        let calls = Arc::new(Mutex::new(0));
        let sink = CapturingSink::default();
        let monitor = Monitor::new(
            Box::new(ScriptedSource {
                remaining: frames,
                sequence: 0,
            }),
            Box::new(ScriptedEncoder {
                script: script.into(),
                calls: calls.clone(),
            }),
            decision_engine(store.clone()),
            FrameThrottle::new(NonZeroU32::new(stride).unwrap()),
            Box::new(sink.clone()),
        );
        Harness {
            monitor,
            store,
            calls,
            sink,
        }
    }

    #[test]
    fn test_only_every_nth_frame_is_encoded() {
        let mut h = harness(10, 5, vec![]);
        let processed: Vec<bool> = (0..10).map(|_| h.monitor.step().unwrap()).collect();
        assert_eq!(processed.iter().filter(|p| **p).count(), 2);
        assert!(processed[4] && processed[9]);
        assert_eq!(*h.calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_marks_once_then_cooldown() {
        let mut h = harness(2, 1, vec![Ok(vec![observation(0.2)]), Ok(vec![observation(0.1)])]);
        h.monitor.step().unwrap();
        h.monitor.step().unwrap();

        assert_eq!(h.store.records.lock().unwrap().len(), 1);
        let frames = h.sink.frames.lock().unwrap().clone();
        assert_eq!(
            frames,
            vec![
                vec![PresentationState::Confirmed],
                vec![PresentationState::Suppressed]
            ]
        );
        assert_eq!(h.monitor.overlays()[0].label(), "Alice (Cooldown)");
    }

    #[test]
    fn test_unknown_face_not_written() {
        let mut h = harness(1, 1, vec![Ok(vec![observation(0.6)])]);
        h.monitor.step().unwrap();
        assert!(h.store.records.lock().unwrap().is_empty());
        assert_eq!(h.monitor.overlays()[0].state, PresentationState::Unrecognized);
    }

    #[test]
    fn test_encoder_failure_skips_frame_and_keeps_overlays() {
        let mut h = harness(
            2,
            1,
            vec![
                Ok(vec![observation(0.0)]),
                Err(EncoderError::InvalidFrame("corrupt".into())),
            ],
        );
        assert!(h.monitor.step().unwrap());
        assert!(!h.monitor.step().unwrap());
        assert_eq!(h.monitor.overlays().len(), 1);
        assert_eq!(h.sink.frames.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_store_failure_shows_suppressed_and_retries_later() {
        let mut h = harness(2, 1, vec![Ok(vec![observation(0.0)]), Ok(vec![observation(0.0)])]);
        *h.store.fail.lock().unwrap() = true;
        h.monitor.step().unwrap();
        assert_eq!(h.monitor.overlays()[0].detail.as_deref(), Some("store write failed"));

        *h.store.fail.lock().unwrap() = false;
        h.monitor.step().unwrap();
        assert_eq!(h.monitor.overlays()[0].state, PresentationState::Confirmed);
        assert_eq!(h.store.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_recognition_log_one_batch_per_frame() {
        let h = harness(2, 1, vec![Ok(vec![observation(0.1), observation(0.9)]), Ok(vec![])]);
        let log = CapturingLog::default();
        let mut monitor = h.monitor.with_recognition_log(Box::new(log.clone()));
        monitor.step().unwrap();
        monitor.step().unwrap();

        let batches = log.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 1, "faceless frames send nothing");
        let entries = &batches[0];
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, "marked");
        assert_eq!(entries[0].identity.as_ref().map(|i| i.as_str()), Some("alice"));
        assert_eq!(entries[1].status, "unknown");
        assert_eq!(entries[1].identity, None);
    }

    #[test]
    fn test_source_failure_ends_run() {
        let h = harness(3, 1, vec![]);
        let shutdown = AtomicBool::new(false);
        let err = h.monitor.run(&shutdown).unwrap_err();
        assert!(matches!(err, EngineError::Source(CameraError::Disconnected(_))));
    }

    #[test]
    fn test_shutdown_flag_stops_spawned_loop() {
        let h = harness(u32::MAX, 5, vec![]);
        let shutdown = Arc::new(AtomicBool::new(true));
        let stats = h.monitor.spawn(shutdown).unwrap().join().unwrap();
        assert_eq!(stats, MonitorStats::default());
    }
}
