//! boxel-session — session state machine and the per-frame pipeline.
//!
//! The state machine mirrors a capture app's control surface: Idle,
//! Recording, Playing back, with no direct edge between the last two.
//! Transitions are pure; side effects come back to the caller as values.
//! The pipeline drives frames from a [`DepthSource`] through the confidence
//! filter and the clustering engine into a [`BoxSink`], and any collaborator
//! failure costs exactly one frame, never the loop.

use anyhow::{bail, ensure, Result};
use boxel_cluster::{find_clusters, ClusterConfig};
use boxel_core::{Aabb, DepthFrame};
use boxel_io::{FrameRecorder, FrameReplayer};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// ---------- session state ----------

/// The app's working state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    Idle,
    Recording,
    Playingback,
}

/// Control-surface inputs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    RecordPressed,
    PlaybackPressed,
    /// the playback stream ran out on its own
    PlaybackFinished,
}

/// Side effect the host must perform for a transition. Returned, never run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    StartRecording,
    StopRecording,
    OpenPlaybackPicker,
    StopPlayback,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: AppState,
    pub effect: Option<Effect>,
}

/// Exhaustive transition table. Record and playback controls ignore each
/// other's active state, so there is no Recording <-> Playingback edge.
pub fn transition(state: AppState, event: ControlEvent) -> Transition {
    use AppState::*;
    use ControlEvent::*;
    match (state, event) {
        (Idle, RecordPressed) => Transition { next: Recording, effect: Some(Effect::StartRecording) },
        (Recording, RecordPressed) => Transition { next: Idle, effect: Some(Effect::StopRecording) },
        (Idle, PlaybackPressed) => Transition { next: Playingback, effect: Some(Effect::OpenPlaybackPicker) },
        (Playingback, PlaybackPressed) => Transition { next: Idle, effect: Some(Effect::StopPlayback) },
        (Playingback, PlaybackFinished) => Transition { next: Idle, effect: Some(Effect::StopPlayback) },
        (Recording, PlaybackPressed) | (Playingback, RecordPressed) => {
            Transition { next: state, effect: None }
        }
        (Idle, PlaybackFinished) | (Recording, PlaybackFinished) => {
            Transition { next: state, effect: None }
        }
    }
}

/// Owns the current state; applies events and hands effects back.
#[derive(Debug)]
pub struct Session {
    state: AppState,
}

impl Default for Session {
    fn default() -> Self { Self { state: AppState::Idle } }
}

impl Session {
    pub fn new() -> Self { Self::default() }
    pub fn state(&self) -> AppState { self.state }

    pub fn apply(&mut self, event: ControlEvent) -> Option<Effect> {
        let t = transition(self.state, event);
        if t.next != self.state {
            info!("session: {:?} -> {:?}", self.state, t.next);
        }
        self.state = t.next;
        t.effect
    }
}

// ---------- pipeline seams ----------

/// Per-frame supplier of depth points. Returns None when the stream ends.
pub trait DepthSource {
    fn next_frame(&mut self) -> Result<Option<DepthFrame>>;
}

/// Consumer of the per-frame box set (a renderer, a logger, a test probe).
pub trait BoxSink {
    fn draw(&mut self, boxes: &[Aabb]) -> Result<()>;
}

impl DepthSource for FrameReplayer {
    fn next_frame(&mut self) -> Result<Option<DepthFrame>> {
        FrameReplayer::next_frame(self)
    }
}

// ---------- upstream filtering ----------

/// Drop points below `min_confidence` (inclusive keep). This is the upstream
/// half of the frame contract: the clustering engine only ever sees
/// pre-filtered points.
pub fn filter_confidence(frame: &DepthFrame, min_confidence: f32) -> DepthFrame {
    let keep: Vec<bool> = frame
        .confidence
        .par_iter()
        .map(|&c| c >= min_confidence)
        .collect();

    let mut out = DepthFrame::default();
    out.reserve(keep.iter().filter(|&&k| k).count());
    for i in 0..frame.len() {
        if keep[i] {
            out.push(frame.x[i], frame.y[i], frame.z[i], frame.confidence[i]);
        }
    }
    out
}

// ---------- per-frame pipeline ----------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// points below this confidence never reach the clustering engine
    pub min_confidence: f32,
    pub cluster: ClusterConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { min_confidence: 0.5, cluster: ClusterConfig::default() }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (0.0..=1.0).contains(&self.min_confidence),
            "min_confidence must be within [0, 1], got {}",
            self.min_confidence
        );
        self.cluster.validate()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    /// nothing to cluster after filtering (or an empty source frame)
    EmptyFrame,
    SourceError(String),
    SinkError(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FrameStats {
    pub points_in: usize,
    pub points_kept: usize,
    pub boxes: usize,
}

/// Outcome of one frame. Fatal errors are the Err arm of the surrounding
/// Result; everything that should cost at most one frame lands in Skipped.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    Rendered(FrameStats),
    Skipped(SkipReason),
}

/// A source that does nothing but error would otherwise spin the drain loop
/// forever.
const MAX_CONSECUTIVE_SOURCE_ERRORS: usize = 30;

pub struct Pipeline {
    cfg: PipelineConfig,
    session: Session,
    recorder: Option<FrameRecorder>,
}

impl Pipeline {
    /// Config problems are the one fatal error class, and they surface here,
    /// before any frame is touched.
    pub fn new(cfg: PipelineConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg, session: Session::new(), recorder: None })
    }

    pub fn config(&self) -> &PipelineConfig { &self.cfg }
    pub fn state(&self) -> AppState { self.session.state() }

    /// Begin teeing raw frames to `path`. Follows the Idle -> Recording edge.
    pub fn start_recording(&mut self, path: &str) -> Result<()> {
        ensure!(
            self.session.state() == AppState::Idle,
            "cannot start recording from {:?}",
            self.session.state()
        );
        self.recorder = Some(FrameRecorder::create(path)?);
        // the pipeline is its own effect handler here
        let _ = self.session.apply(ControlEvent::RecordPressed);
        Ok(())
    }

    /// Stop recording, returning how many frames were captured.
    pub fn stop_recording(&mut self) -> Result<usize> {
        ensure!(
            self.session.state() == AppState::Recording,
            "cannot stop recording from {:?}",
            self.session.state()
        );
        let _ = self.session.apply(ControlEvent::RecordPressed);
        match self.recorder.take() {
            Some(rec) => rec.finish(),
            None => bail!("recording state without an active recorder"),
        }
    }

    /// Run one frame through filter + clustering + sink.
    pub fn process_frame(&mut self, frame: DepthFrame, sink: &mut dyn BoxSink) -> Result<FrameOutcome> {
        if let Some(rec) = self.recorder.as_mut() {
            // the recording captures raw frames, before any filtering
            if let Err(e) = rec.record(&frame) {
                warn!("recorder failed, abandoning recording: {e:#}");
                self.recorder = None;
                let _ = self.session.apply(ControlEvent::RecordPressed);
            }
        }

        if frame.is_empty() {
            return Ok(FrameOutcome::Skipped(SkipReason::EmptyFrame));
        }
        let kept = filter_confidence(&frame, self.cfg.min_confidence);
        if kept.is_empty() {
            return Ok(FrameOutcome::Skipped(SkipReason::EmptyFrame));
        }

        let boxes = find_clusters((&kept).into(), &self.cfg.cluster)?;

        if let Err(e) = sink.draw(&boxes) {
            warn!("sink error, skipping frame: {e:#}");
            return Ok(FrameOutcome::Skipped(SkipReason::SinkError(format!("{e:#}"))));
        }
        Ok(FrameOutcome::Rendered(FrameStats {
            points_in: frame.len(),
            points_kept: kept.len(),
            boxes: boxes.len(),
        }))
    }

    /// Drain `source`, pushing each frame's boxes into `sink`. A source
    /// error costs one frame, not the run.
    pub fn run(&mut self, source: &mut dyn DepthSource, sink: &mut dyn BoxSink) -> Result<Vec<FrameOutcome>> {
        let mut outcomes = Vec::new();
        let mut consecutive_errors = 0usize;
        loop {
            match source.next_frame() {
                Ok(Some(frame)) => {
                    consecutive_errors = 0;
                    outcomes.push(self.process_frame(frame, sink)?);
                }
                Ok(None) => break,
                Err(e) => {
                    consecutive_errors += 1;
                    warn!("source error, skipping frame: {e:#}");
                    outcomes.push(FrameOutcome::Skipped(SkipReason::SourceError(format!("{e:#}"))));
                    if consecutive_errors >= MAX_CONSECUTIVE_SOURCE_ERRORS {
                        bail!("source failed {consecutive_errors} frames in a row, giving up");
                    }
                }
            }
        }
        Ok(outcomes)
    }

    /// Play a recorded session end to end: Idle -> Playingback, drain the
    /// stream, then the finished stream takes the session back to Idle.
    pub fn play_session(&mut self, path: &str, sink: &mut dyn BoxSink) -> Result<Vec<FrameOutcome>> {
        ensure!(
            self.session.state() == AppState::Idle,
            "cannot start playback from {:?}",
            self.session.state()
        );
        let mut replayer = FrameReplayer::open(path)?;
        let _ = self.session.apply(ControlEvent::PlaybackPressed);
        let outcomes = self.run(&mut replayer, sink);
        let _ = self.session.apply(ControlEvent::PlaybackFinished);
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_is_exhaustive_and_guarded() {
        use AppState::*;
        use ControlEvent::*;

        // the four real edges
        assert_eq!(transition(Idle, RecordPressed).next, Recording);
        assert_eq!(transition(Recording, RecordPressed).next, Idle);
        assert_eq!(transition(Idle, PlaybackPressed).next, Playingback);
        assert_eq!(transition(Playingback, PlaybackPressed).next, Idle);
        assert_eq!(transition(Playingback, PlaybackFinished).next, Idle);

        // cross-mode presses are no-ops with no effect
        for (s, e) in [(Recording, PlaybackPressed), (Playingback, RecordPressed)] {
            let t = transition(s, e);
            assert_eq!(t.next, s);
            assert_eq!(t.effect, None);
        }

        // never a direct Recording <-> Playingback edge
        for s in [Idle, Recording, Playingback] {
            for e in [RecordPressed, PlaybackPressed, PlaybackFinished] {
                let t = transition(s, e);
                assert!(!(s == Recording && t.next == Playingback));
                assert!(!(s == Playingback && t.next == Recording));
            }
        }
    }

    #[test]
    fn session_reports_effects_to_the_caller() {
        let mut s = Session::new();
        assert_eq!(s.apply(ControlEvent::RecordPressed), Some(Effect::StartRecording));
        assert_eq!(s.state(), AppState::Recording);
        assert_eq!(s.apply(ControlEvent::PlaybackPressed), None);
        assert_eq!(s.state(), AppState::Recording);
        assert_eq!(s.apply(ControlEvent::RecordPressed), Some(Effect::StopRecording));
        assert_eq!(s.state(), AppState::Idle);
    }

    #[test]
    fn confidence_filter_keeps_the_floor_value() {
        let mut f = DepthFrame::default();
        f.push(0.0, 0.0, 1.0, 0.49);
        f.push(0.0, 0.0, 1.0, 0.5);
        f.push(0.0, 0.0, 1.0, 0.51);
        let kept = filter_confidence(&f, 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept.confidence, vec![0.5, 0.51]);
    }

    struct VecSource(Vec<DepthFrame>);
    impl DepthSource for VecSource {
        fn next_frame(&mut self) -> Result<Option<DepthFrame>> {
            if self.0.is_empty() { Ok(None) } else { Ok(Some(self.0.remove(0))) }
        }
    }

    #[derive(Default)]
    struct CountingSink {
        draws: usize,
        last_boxes: usize,
    }
    impl BoxSink for CountingSink {
        fn draw(&mut self, boxes: &[Aabb]) -> Result<()> {
            self.draws += 1;
            self.last_boxes = boxes.len();
            Ok(())
        }
    }

    struct FailingSink;
    impl BoxSink for FailingSink {
        fn draw(&mut self, _boxes: &[Aabb]) -> Result<()> {
            bail!("gl context lost")
        }
    }

    fn tight_pair_frame() -> DepthFrame {
        let mut f = DepthFrame::default();
        f.push(0.0, 0.0, 1.0, 0.9);
        f.push(0.01, 0.0, 1.0, 0.9);
        f
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            min_confidence: 0.5,
            cluster: ClusterConfig { distance_threshold: 0.05, min_cluster_size: 1 },
        }
    }

    #[test]
    fn pipeline_rejects_invalid_config_up_front() {
        let cfg = PipelineConfig {
            min_confidence: 1.5,
            cluster: ClusterConfig::default(),
        };
        assert!(Pipeline::new(cfg).is_err());

        let cfg = PipelineConfig {
            min_confidence: 0.5,
            cluster: ClusterConfig { distance_threshold: 0.0, min_cluster_size: 1 },
        };
        assert!(Pipeline::new(cfg).is_err());
    }

    #[test]
    fn rendered_frames_report_their_stats() {
        let mut p = Pipeline::new(test_config()).unwrap();
        let mut sink = CountingSink::default();
        let outcome = p.process_frame(tight_pair_frame(), &mut sink).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Rendered(FrameStats { points_in: 2, points_kept: 2, boxes: 1 })
        );
        assert_eq!(sink.draws, 1);
        assert_eq!(sink.last_boxes, 1);
    }

    #[test]
    fn empty_and_all_filtered_frames_are_skipped() {
        let mut p = Pipeline::new(test_config()).unwrap();
        let mut sink = CountingSink::default();

        let outcome = p.process_frame(DepthFrame::default(), &mut sink).unwrap();
        assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::EmptyFrame));

        let mut low = DepthFrame::default();
        low.push(0.0, 0.0, 1.0, 0.1);
        let outcome = p.process_frame(low, &mut sink).unwrap();
        assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::EmptyFrame));
        assert_eq!(sink.draws, 0);
    }

    #[test]
    fn sink_failure_skips_the_frame_not_the_run() {
        let mut p = Pipeline::new(test_config()).unwrap();
        let mut source = VecSource(vec![tight_pair_frame(), tight_pair_frame()]);
        let outcomes = p.run(&mut source, &mut FailingSink).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, FrameOutcome::Skipped(SkipReason::SinkError(_)))));
    }

    #[test]
    fn record_then_replay_produces_the_same_boxes() {
        let path = std::env::temp_dir()
            .join(format!("boxel-session-{}-roundtrip.jsonl", std::process::id()))
            .to_string_lossy()
            .into_owned();

        let mut p = Pipeline::new(test_config()).unwrap();
        let mut live = CountingSink::default();

        p.start_recording(&path).unwrap();
        assert_eq!(p.state(), AppState::Recording);
        p.process_frame(tight_pair_frame(), &mut live).unwrap();
        let frames = p.stop_recording().unwrap();
        assert_eq!(frames, 1);
        assert_eq!(p.state(), AppState::Idle);

        let mut replayed = CountingSink::default();
        let outcomes = p.play_session(&path, &mut replayed).unwrap();
        assert_eq!(p.state(), AppState::Idle);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(
            outcomes[0],
            FrameOutcome::Rendered(FrameStats { points_in: 2, points_kept: 2, boxes: 1 })
        );
        assert_eq!(replayed.last_boxes, live.last_boxes);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn playback_refused_while_recording() {
        let path = std::env::temp_dir()
            .join(format!("boxel-session-{}-guard.jsonl", std::process::id()))
            .to_string_lossy()
            .into_owned();

        let mut p = Pipeline::new(test_config()).unwrap();
        p.start_recording(&path).unwrap();
        assert!(p.play_session(&path, &mut CountingSink::default()).is_err());
        assert_eq!(p.state(), AppState::Recording);
        p.stop_recording().unwrap();
        std::fs::remove_file(&path).ok();
    }
}
