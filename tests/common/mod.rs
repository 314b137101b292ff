//! Scripted doubles for the external collaborators of a capture point.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use gatecount_rs::config::{CapturePointConfig, LoopTiming};
use gatecount_rs::integration::{CaptureBackend, DetectionBuilder, Detector, FrameSource, IntoDetections};
use gatecount_rs::session::{Delta, LineId, MemorySessionStore, SessionId, SessionStatus, SessionStore};
use gatecount_rs::{Detection, DetectorError, OpenError, StoreError};
use image::RgbImage;

pub const FRAME_WIDTH: u32 = 400;
pub const FRAME_HEIGHT: u32 = 300;

/// Box of a bag whose centre sits at (`cx`, `cy`).
pub fn det_at(cx: f32, cy: f32) -> Detection {
    DetectionBuilder::new().xywh(cx, cy, 40.0, 30.0).score(0.95).build()
}

/// One bag moving up through both gates: far gate y=100, near gate y=160.
pub fn upward_pass() -> Vec<Vec<Detection>> {
    [220.0, 150.0, 130.0, 95.0, 55.0]
        .into_iter()
        .map(|y| vec![det_at(200.0, y)])
        .collect()
}

/// One bag moving down through both gates, against an upward flow.
pub fn downward_pass() -> Vec<Vec<Detection>> {
    [80.0, 120.0, 170.0, 200.0]
        .into_iter()
        .map(|y| vec![det_at(200.0, y)])
        .collect()
}

/// Empty frames until every track is dropped (max lost frames is 2).
pub fn gap() -> Vec<Vec<Detection>> {
    vec![Vec::new(); 4]
}

/// Region (0,0,400,300), far gate y=100, near gate y=160, fast loop.
pub fn line_config(line_id: LineId) -> CapturePointConfig {
    let mut config = CapturePointConfig::new(line_id, format!("rtsp://cam/{line_id}"), "0,0,400,300".parse().unwrap());
    config.far_gate_offset = 0;
    config.near_gate_offset = -40;
    config.timing = LoopTiming {
        pace_ms: 1,
        idle_ms: 1,
        error_backoff_ms: 5,
        join_timeout_ms: 2000,
    };
    config
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

pub const WAIT: Duration = Duration::from_secs(5);

/// Detections handed out one frame at a time; empty once exhausted.
#[derive(Default)]
pub struct Script {
    frames: Mutex<VecDeque<Vec<Detection>>>,
    panic_next: AtomicBool,
    hold: AtomicBool,
    held: AtomicBool,
}

impl Script {
    pub fn push(&self, frames: impl IntoIterator<Item = Vec<Detection>>) {
        self.frames.lock().unwrap().extend(frames);
    }

    pub fn remaining(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    /// Make the next inference hang until [`Script::let_go`].
    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn let_go(&self) {
        self.hold.store(false, Ordering::SeqCst);
    }

    /// Whether an inference is hanging right now.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

struct ScriptedDetector {
    script: Arc<Script>,
    drops: Arc<AtomicUsize>,
}

impl Detector for ScriptedDetector {
    fn infer(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        if self.script.panic_next.swap(false, Ordering::SeqCst) {
            panic!("detector crashed");
        }
        if self.script.hold.load(Ordering::SeqCst) {
            self.script.held.store(true, Ordering::SeqCst);
            while self.script.hold.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            self.script.held.store(false, Ordering::SeqCst);
        }
        let next = self.script.frames.lock().unwrap().pop_front();
        Ok(next.unwrap_or_default().into_detections())
    }
}

impl Drop for ScriptedDetector {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Yields a fresh blank frame on every call.
struct BlankFrames {
    released: bool,
    releases: Arc<AtomicUsize>,
}

impl FrameSource for BlankFrames {
    fn get_frame(&mut self) -> Option<Arc<RgbImage>> {
        (!self.released).then(|| Arc::new(RgbImage::new(FRAME_WIDTH, FRAME_HEIGHT)))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Backend whose detectors play a shared [`Script`], counting every open
/// and release.
#[derive(Default)]
pub struct ScriptedBackend {
    pub script: Arc<Script>,
    pub source_opens: AtomicUsize,
    pub detector_opens: AtomicUsize,
    pub source_releases: Arc<AtomicUsize>,
    pub detector_drops: Arc<AtomicUsize>,
    pub opened_sources: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opens(&self) -> usize {
        self.source_opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.source_releases.load(Ordering::SeqCst)
    }

    pub fn drops(&self) -> usize {
        self.detector_drops.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for ScriptedBackend {
    fn open_source(&self, source_ref: &str) -> Result<Box<dyn FrameSource>, OpenError> {
        self.source_opens.fetch_add(1, Ordering::SeqCst);
        self.opened_sources.lock().unwrap().push(source_ref.to_string());
        Ok(Box::new(BlankFrames {
            released: false,
            releases: Arc::clone(&self.source_releases),
        }))
    }

    fn open_detector(&self, _model: &str) -> Result<Box<dyn Detector>, OpenError> {
        self.detector_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDetector {
            script: Arc::clone(&self.script),
            drops: Arc::clone(&self.detector_drops),
        }))
    }
}

/// Memory store whose `append_log` can be taken offline.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemorySessionStore,
    pub offline: AtomicBool,
    pub rejected: AtomicUsize,
}

impl FlakyStore {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl SessionStore for FlakyStore {
    fn operating_session(&self, line_id: LineId) -> Result<Option<SessionId>, StoreError> {
        self.inner.operating_session(line_id)
    }

    fn create_session(&self, line_id: LineId, lot: &str, target_count: Option<u32>) -> Result<SessionId, StoreError> {
        self.inner.create_session(line_id, lot, target_count)
    }

    fn append_log(
        &self,
        session_id: SessionId,
        line_id: LineId,
        delta: Delta,
        running_total: u64,
    ) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("database offline".into()));
        }
        self.inner.append_log(session_id, line_id, delta, running_total)
    }

    fn finish_session(
        &self,
        session_id: SessionId,
        final_total: u64,
        status: SessionStatus,
        note: Option<&str>,
    ) -> Result<(), StoreError> {
        self.inner.finish_session(session_id, final_total, status, note)
    }
}
