//! One monitored line: a lazily started capture worker plus the session
//! state machine driven by command threads.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::CapturePointConfig;
use crate::error::{CaptureError, ConfigError, IterationError, OpenError};
use crate::integration::{CaptureBackend, CountingPipeline, FrameSource, LatestFrame, SnapshotWriter};
use crate::session::{DeltaLedger, LineId, SessionId, SessionStatus, SessionStore};
use crate::sync::{lock, try_lock};

const JOIN_POLL: Duration = Duration::from_millis(5);
const RELEASE_NOTE: &str = "capture point released";

/// Result of [`CapturePoint::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { session_id: SessionId },
    /// This capture point already runs a session; nothing changed.
    AlreadyOperating { session_id: SessionId },
    /// The store holds an Operating session for this line that this process
    /// does not own, e.g. left over from a crash.
    PersistedSessionOpen { session_id: SessionId },
}

/// Result of [`CapturePoint::stop`] and [`CapturePoint::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    /// `persisted` is false when the store rejected the final log entries or
    /// the finish call.
    Finished {
        session_id: SessionId,
        total: u64,
        persisted: bool,
    },
    NoActiveSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineState {
    /// No worker, nothing open
    Idle,
    /// Worker running without a session
    Warm,
    Operating,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub lot: String,
    pub started_at: DateTime<Utc>,
    pub target_count: Option<u32>,
}

/// Point-in-time view of a capture point for status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineStatus {
    pub line_id: LineId,
    pub name: String,
    pub state: LineState,
    pub session: Option<SessionInfo>,
    pub relative_total: u64,
    pub absolute_total: u64,
    pub worker_alive: bool,
    pub source: String,
    pub frames_processed: u64,
    pub iteration_errors: u64,
    pub pending_log_entries: usize,
}

struct Resources {
    generation: u64,
    source: Box<dyn FrameSource>,
    pipeline: CountingPipeline,
}

impl Resources {
    fn release(mut self) {
        self.source.release();
    }
}

struct ActiveSession {
    info: SessionInfo,
    baseline: u64,
    ledger: DeltaLedger,
}

enum Step {
    Processed,
    NoFrame,
    Stopped,
}

/// State shared between command threads and the worker.
struct Shared {
    config: CapturePointConfig,
    backend: Arc<dyn CaptureBackend>,
    store: Arc<dyn SessionStore>,
    source: Mutex<String>,
    resources: Mutex<Option<Resources>>,
    session: Mutex<Option<ActiveSession>>,
    /// Bumped on every teardown; a worker only touches state of its own
    /// generation.
    generation: AtomicU64,
    absolute: AtomicU64,
    relative: AtomicU64,
    preview: LatestFrame,
    frames_processed: AtomicU64,
    iteration_errors: AtomicU64,
}

impl Shared {
    fn line_id(&self) -> LineId {
        self.config.line_id
    }

    fn open_resources(&self, generation: u64) -> Result<Resources, OpenError> {
        let source_ref = lock(&self.source).clone();
        let detector = self.backend.open_detector(&self.config.model)?;
        let source = self.backend.open_source(&source_ref)?;

        let mut pipeline = CountingPipeline::new(detector, self.config.tracker_config());
        if let Some(dir) = &self.config.snapshot_dir {
            match SnapshotWriter::new(dir) {
                Ok(writer) => pipeline = pipeline.with_snapshots(writer),
                Err(err) => warn!(line_id = self.line_id(), error = %err, "snapshots disabled"),
            }
        }
        let lot = lock(&self.session).as_ref().map(|s| s.info.lot.clone());
        pipeline.set_lot(lot.as_deref());

        info!(line_id = self.line_id(), source = %source_ref, model = %self.config.model, "capture resources opened");
        Ok(Resources {
            generation,
            source,
            pipeline,
        })
    }

    fn iterate(&self, stop: &AtomicBool, generation: u64) -> Result<Step, IterationError> {
        let mut resources = lock(&self.resources);
        if resources.is_none() {
            if stop.load(Ordering::Acquire) {
                return Ok(Step::Stopped);
            }
            *resources = Some(self.open_resources(generation)?);
        }
        let Some(res) = resources.as_mut() else {
            return Ok(Step::NoFrame);
        };
        if res.generation != generation {
            return Ok(Step::Stopped);
        }
        let Some(frame) = res.source.get_frame() else {
            return Ok(Step::NoFrame);
        };
        let outcome = res.pipeline.process_frame(&frame)?;
        drop(resources);

        if stop.load(Ordering::Acquire) {
            return Ok(Step::Stopped);
        }
        self.preview.publish(outcome.annotated);
        self.absolute.store(outcome.absolute, Ordering::Release);
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.sync_session(outcome.absolute, generation);
        Ok(Step::Processed)
    }

    fn sync_session(&self, absolute: u64, generation: u64) {
        let mut session = lock(&self.session);
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        if let Some(active) = session.as_mut() {
            let relative = absolute.saturating_sub(active.baseline);
            self.relative.store(relative, Ordering::Release);
            // Failures stay queued in the ledger and are retried next frame.
            let _ = active.ledger.sync(self.store.as_ref(), relative);
        }
    }

    /// Release resources left behind by a teardown that could not take them.
    fn release_stale(&self, generation: u64) {
        let mut resources = lock(&self.resources);
        if resources
            .as_ref()
            .is_some_and(|r| r.generation == generation && generation < self.generation.load(Ordering::Acquire))
            && let Some(stale) = resources.take()
        {
            stale.release();
            info!(line_id = self.line_id(), "detached worker released capture resources");
        }
    }
}

fn run_worker(shared: Arc<Shared>, stop: Arc<AtomicBool>, generation: u64) {
    let line_id = shared.line_id();
    let timing = shared.config.timing;
    let mut failures: u64 = 0;
    debug!(line_id, generation, "capture worker started");

    while !stop.load(Ordering::Acquire) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| shared.iterate(&stop, generation)));
        let pause = match result {
            Ok(Ok(Step::Processed)) => {
                failures = 0;
                timing.pace()
            }
            Ok(Ok(Step::NoFrame)) => timing.idle(),
            Ok(Ok(Step::Stopped)) => break,
            Ok(Err(err)) => {
                failures += 1;
                shared.iteration_errors.fetch_add(1, Ordering::Relaxed);
                if failures % 100 == 1 {
                    warn!(line_id, failures, error = %err, "capture iteration failed");
                }
                timing.error_backoff()
            }
            Err(payload) => {
                failures += 1;
                shared.iteration_errors.fetch_add(1, Ordering::Relaxed);
                let err = IterationError::Panicked(panic_message(payload.as_ref()));
                error!(line_id, failures, error = %err, "capture iteration panicked");
                timing.error_backoff()
            }
        };
        thread::sleep(pause);
    }

    shared.release_stale(generation);
    debug!(line_id, generation, "capture worker exited");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// A monitored line.
///
/// Command threads call [`start`](Self::start), [`stop`](Self::stop) and the
/// status queries; a single worker thread pulls frames, counts and writes the
/// session's delta log. Commands are serialised by an internal mutex, so
/// concurrent `start` calls open at most one session.
///
/// Opening the frame source and detector is deferred until the first
/// `start` (or [`warm_up`](Self::warm_up)); `stop` releases them again.
pub struct CapturePoint {
    shared: Arc<Shared>,
    commands: Mutex<()>,
    worker: Mutex<Option<Worker>>,
    /// Worker left behind by a join that timed out
    detached: Mutex<Option<JoinHandle<()>>>,
}

impl CapturePoint {
    pub fn new(
        config: CapturePointConfig,
        backend: Arc<dyn CaptureBackend>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let source = config.source.clone();
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                backend,
                store,
                source: Mutex::new(source),
                resources: Mutex::new(None),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                absolute: AtomicU64::new(0),
                relative: AtomicU64::new(0),
                preview: LatestFrame::new(),
                frames_processed: AtomicU64::new(0),
                iteration_errors: AtomicU64::new(0),
            }),
            commands: Mutex::new(()),
            worker: Mutex::new(None),
            detached: Mutex::new(None),
        })
    }

    pub fn line_id(&self) -> LineId {
        self.shared.line_id()
    }

    pub fn config(&self) -> &CapturePointConfig {
        &self.shared.config
    }

    /// Open a session for `lot`.
    ///
    /// Rejections leave every piece of state untouched. Open and store
    /// failures are returned; a failed `create_session` leaves the worker
    /// warm without a session.
    pub fn start(&self, lot: &str, target_count: Option<u32>) -> Result<StartOutcome, CaptureError> {
        let _commands = lock(&self.commands);
        let line_id = self.line_id();

        if let Some(active) = lock(&self.shared.session).as_ref() {
            info!(line_id, session_id = active.info.id, "start ignored, session already operating");
            return Ok(StartOutcome::AlreadyOperating {
                session_id: active.info.id,
            });
        }
        if let Some(session_id) = self.shared.store.operating_session(line_id)? {
            warn!(line_id, session_id, "start refused, store has an operating session for this line");
            return Ok(StartOutcome::PersistedSessionOpen { session_id });
        }

        self.ensure_running_locked()?;
        let session_id = self.shared.store.create_session(line_id, lot, target_count)?;

        let mut resources = lock(&self.shared.resources);
        let baseline = match resources.as_mut() {
            Some(res) => {
                res.pipeline.set_lot(Some(lot));
                res.pipeline.absolute_count()
            }
            None => self.shared.absolute.load(Ordering::Acquire),
        };
        *lock(&self.shared.session) = Some(ActiveSession {
            info: SessionInfo {
                id: session_id,
                lot: lot.to_string(),
                started_at: Utc::now(),
                target_count,
            },
            baseline,
            ledger: DeltaLedger::new(session_id, line_id),
        });
        self.shared.relative.store(0, Ordering::Release);
        drop(resources);

        info!(line_id, session_id, lot, target_count, baseline, "session started");
        Ok(StartOutcome::Started { session_id })
    }

    /// Close the session as Finished and release everything.
    pub fn stop(&self, note: Option<&str>) -> StopOutcome {
        self.finish(SessionStatus::Finished, note)
    }

    /// Close the session as Cancelled and release everything.
    pub fn cancel(&self, note: Option<&str>) -> StopOutcome {
        self.finish(SessionStatus::Cancelled, note)
    }

    /// Cancel any open session and release the worker and its resources.
    pub fn release(&self) {
        if let StopOutcome::Finished { session_id, .. } = self.cancel(Some(RELEASE_NOTE)) {
            info!(line_id = self.line_id(), session_id, "open session cancelled on release");
        }
    }

    /// Start the worker without a session, e.g. for a live preview.
    pub fn warm_up(&self) -> Result<(), CaptureError> {
        let _commands = lock(&self.commands);
        self.ensure_running_locked()
    }

    /// Count from `source_ref` instead of the configured source; `None`
    /// switches back. A warm worker reopens its source in place and keeps its
    /// tracker.
    pub fn set_source(&self, source_ref: Option<&str>) -> Result<(), CaptureError> {
        let _commands = lock(&self.commands);
        let target = source_ref.map_or_else(|| self.shared.config.source.clone(), str::to_owned);

        self.reap_detached()?;
        let mut resources = lock(&self.shared.resources);
        if let Some(res) = resources.as_mut() {
            let opened = self.shared.backend.open_source(&target)?;
            let mut previous = std::mem::replace(&mut res.source, opened);
            previous.release();
        }
        info!(line_id = self.line_id(), source = %target, warm = resources.is_some(), "frame source switched");
        *lock(&self.shared.source) = target;
        Ok(())
    }

    pub fn status(&self) -> LineStatus {
        let (session, pending_log_entries) = match lock(&self.shared.session).as_ref() {
            Some(active) => (Some(active.info.clone()), active.ledger.pending()),
            None => (None, 0),
        };
        let worker_alive = lock(&self.worker)
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished());
        let state = match (&session, worker_alive) {
            (Some(_), _) => LineState::Operating,
            (None, true) => LineState::Warm,
            (None, false) => LineState::Idle,
        };

        LineStatus {
            line_id: self.line_id(),
            name: self.shared.config.name.clone(),
            state,
            session,
            relative_total: self.relative_total(),
            absolute_total: self.absolute_total(),
            worker_alive,
            source: lock(&self.shared.source).clone(),
            frames_processed: self.shared.frames_processed.load(Ordering::Relaxed),
            iteration_errors: self.shared.iteration_errors.load(Ordering::Relaxed),
            pending_log_entries,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        lock(&self.shared.session).as_ref().map(|s| s.info.id)
    }

    pub fn is_operating(&self) -> bool {
        self.session_id().is_some()
    }

    /// Total of the running session.
    pub fn relative_total(&self) -> u64 {
        self.shared.relative.load(Ordering::Acquire)
    }

    /// Total since the worker was last started.
    pub fn absolute_total(&self) -> u64 {
        self.shared.absolute.load(Ordering::Acquire)
    }

    /// Most recent annotated frame.
    pub fn latest_frame(&self) -> Option<Arc<RgbImage>> {
        self.shared.preview.latest()
    }

    /// Join a worker detached by an earlier teardown.
    ///
    /// Fails while that worker is still running: it may hold the resources
    /// lock for as long as its detector call takes.
    fn reap_detached(&self) -> Result<(), CaptureError> {
        let mut detached = lock(&self.detached);
        let Some(handle) = detached.take() else {
            return Ok(());
        };
        if !handle.is_finished() {
            *detached = Some(handle);
            warn!(line_id = self.line_id(), "detached capture worker still running, command refused");
            return Err(CaptureError::WorkerBusy(self.line_id()));
        }
        if handle.join().is_err() {
            error!(line_id = self.line_id(), "detached capture worker panicked");
        }
        debug!(line_id = self.line_id(), "detached capture worker reaped");
        Ok(())
    }

    fn ensure_running_locked(&self) -> Result<(), CaptureError> {
        self.reap_detached()?;
        let mut worker = lock(&self.worker);
        let generation = self.shared.generation.load(Ordering::Acquire);

        {
            let mut resources = lock(&self.shared.resources);
            if resources.as_ref().is_some_and(|r| r.generation != generation)
                && let Some(stale) = resources.take()
            {
                stale.release();
            }
            if resources.is_none() {
                *resources = Some(self.shared.open_resources(generation)?);
            }
        }

        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let spawned = thread::Builder::new()
            .name(format!("capture-line-{}", self.line_id()))
            .spawn({
                let shared = Arc::clone(&self.shared);
                let stop = Arc::clone(&stop);
                move || run_worker(shared, stop, generation)
            });
        match spawned {
            Ok(handle) => {
                *worker = Some(Worker { stop, handle });
                Ok(())
            }
            Err(err) => {
                if let Some(res) = lock(&self.shared.resources).take() {
                    res.release();
                }
                Err(CaptureError::Spawn(err))
            }
        }
    }

    fn finish(&self, status: SessionStatus, note: Option<&str>) -> StopOutcome {
        let _commands = lock(&self.commands);
        let outcome = self.close_session(status, note);
        self.teardown();
        outcome
    }

    fn close_session(&self, status: SessionStatus, note: Option<&str>) -> StopOutcome {
        let line_id = self.line_id();
        let Some(mut active) = lock(&self.shared.session).take() else {
            debug!(line_id, "stop without an active session");
            return StopOutcome::NoActiveSession;
        };

        let session_id = active.info.id;
        let total = self
            .shared
            .absolute
            .load(Ordering::Acquire)
            .saturating_sub(active.baseline);
        let store = self.shared.store.as_ref();

        let logged = active.ledger.sync(store, total).is_ok();
        if !logged {
            warn!(
                line_id,
                session_id,
                pending = active.ledger.pending(),
                "session closed with unsent delta log entries"
            );
        }
        let finished = match store.finish_session(session_id, total, status, note) {
            Ok(()) => true,
            Err(err) => {
                error!(line_id, session_id, error = %err, "failed to finish session");
                false
            }
        };

        info!(line_id, session_id, lot = %active.info.lot, total, ?status, "session closed");
        StopOutcome::Finished {
            session_id,
            total,
            persisted: logged && finished,
        }
    }

    fn teardown(&self) {
        let line_id = self.line_id();
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            worker.stop.store(true, Ordering::Release);
            if let Some(handle) = join_bounded(worker.handle, self.shared.config.timing.join_timeout(), line_id) {
                *lock(&self.detached) = Some(handle);
            }
        }
        self.shared.generation.fetch_add(1, Ordering::AcqRel);

        match try_lock(&self.shared.resources) {
            Some(mut resources) => {
                if let Some(res) = resources.take() {
                    res.release();
                    info!(line_id, "capture resources released");
                }
            }
            None => warn!(line_id, "worker still holds capture resources, released when it exits"),
        }

        self.shared.preview.clear();
        self.shared.absolute.store(0, Ordering::Release);
        self.shared.relative.store(0, Ordering::Release);
    }
}

impl Drop for CapturePoint {
    fn drop(&mut self) {
        self.release();
    }
}

/// Wait up to `timeout` for the worker; hands the handle back if it is
/// still running.
fn join_bounded(handle: JoinHandle<()>, timeout: Duration, line_id: LineId) -> Option<JoinHandle<()>> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(line_id, timeout_ms = timeout.as_millis() as u64, "capture worker did not exit in time, detaching");
            return Some(handle);
        }
        thread::sleep(JOIN_POLL);
    }
    if handle.join().is_err() {
        error!(line_id, "capture worker panicked");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionConfig;
    use crate::integration::Detector;
    use crate::session::MemorySessionStore;

    struct ClosedBackend;

    impl CaptureBackend for ClosedBackend {
        fn open_source(&self, source_ref: &str) -> Result<Box<dyn FrameSource>, OpenError> {
            Err(OpenError::Source {
                source_ref: source_ref.to_string(),
                reason: "camera offline".into(),
            })
        }

        fn open_detector(&self, _model: &str) -> Result<Box<dyn Detector>, OpenError> {
            Err(OpenError::Model {
                model: "none".into(),
                reason: "not installed".into(),
            })
        }
    }

    fn line(store: Arc<MemorySessionStore>) -> CapturePoint {
        let config = CapturePointConfig::new(5, "rtsp://cam/5", RegionConfig::default());
        CapturePoint::new(config, Arc::new(ClosedBackend), store).unwrap()
    }

    #[test]
    fn test_start_surfaces_open_failure_without_session() {
        let store = Arc::new(MemorySessionStore::new());
        let point = line(Arc::clone(&store));

        let err = point.start("lot", None).unwrap_err();
        assert!(matches!(err, CaptureError::Open(OpenError::Model { .. })));
        assert!(store.sessions().is_empty());
        assert_eq!(point.status().state, LineState::Idle);
    }

    #[test]
    fn test_persisted_session_blocks_start() {
        let store = Arc::new(MemorySessionStore::new());
        let leftover = store.create_session(5, "crashed lot", None).unwrap();
        let point = line(Arc::clone(&store));

        assert_eq!(
            point.start("lot", None).unwrap(),
            StartOutcome::PersistedSessionOpen { session_id: leftover }
        );
        assert!(!point.is_operating());
    }

    #[test]
    fn test_stop_when_idle_is_a_no_op() {
        let point = line(Arc::new(MemorySessionStore::new()));
        assert_eq!(point.stop(None), StopOutcome::NoActiveSession);
        assert_eq!(point.cancel(Some("x")), StopOutcome::NoActiveSession);
        assert!(point.set_source(Some("recorded.mp4")).is_ok());
        assert_eq!(point.status().source, "recorded.mp4");
        point.set_source(None).unwrap();
        assert_eq!(point.status().source, "rtsp://cam/5");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = CapturePointConfig::new(5, "", RegionConfig::default());
        config.min_confidence = 0.5;
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        assert!(CapturePoint::new(config, Arc::new(ClosedBackend), store).is_err());
    }
}
