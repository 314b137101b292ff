//! Frame acquisition: the source contract and a threaded latest-frame source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::RgbImage;
use tracing::{debug, warn};

use crate::sync::lock;

/// Delivers the most recently decoded frame.
pub trait FrameSource: Send {
    /// Latest frame not yet returned, or `None` when nothing new arrived.
    fn get_frame(&mut self) -> Option<Arc<RgbImage>>;

    /// Stop acquisition and free the device. Calling it again is a no-op.
    fn release(&mut self);
}

/// Single-slot frame buffer swapped wholesale between threads.
///
/// Writers replace the whole `Arc`; readers clone it out. Frames are never
/// mutated in place once published.
#[derive(Debug, Default)]
pub struct LatestFrame {
    slot: Mutex<Slot>,
}

#[derive(Debug, Default)]
struct Slot {
    sequence: u64,
    frame: Option<Arc<RgbImage>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame, returning its sequence number.
    pub fn publish(&self, frame: impl Into<Arc<RgbImage>>) -> u64 {
        let mut slot = lock(&self.slot);
        slot.sequence += 1;
        slot.frame = Some(frame.into());
        slot.sequence
    }

    pub fn latest(&self) -> Option<Arc<RgbImage>> {
        lock(&self.slot).frame.clone()
    }

    /// The current frame if its sequence number is above `seen`.
    pub fn newer_than(&self, seen: u64) -> Option<(u64, Arc<RgbImage>)> {
        let slot = lock(&self.slot);
        match &slot.frame {
            Some(frame) if slot.sequence > seen => Some((slot.sequence, Arc::clone(frame))),
            _ => None,
        }
    }

    pub fn clear(&self) {
        lock(&self.slot).frame = None;
    }
}

/// Blocking decoder driven by [`ThreadedSource`]'s capture thread.
pub trait FrameGrabber: Send + 'static {
    /// Decode the next frame. `None` is a transient miss; the thread retries.
    fn grab(&mut self) -> Option<RgbImage>;

    /// Called once on the capture thread when it exits.
    fn close(&mut self) {}
}

/// Runs a [`FrameGrabber`] on its own thread so that capture rate and
/// processing rate are decoupled; consumers only ever see the newest frame.
pub struct ThreadedSource {
    name: String,
    frames: Arc<LatestFrame>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    last_seen: u64,
}

impl ThreadedSource {
    /// Start capturing. `pace` is slept between grabs, e.g. the frame
    /// interval of a recorded file.
    pub fn spawn<G: FrameGrabber>(name: impl Into<String>, grabber: G, pace: Duration) -> std::io::Result<Self> {
        let name = name.into();
        let frames = Arc::new(LatestFrame::new());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = thread::Builder::new().name(format!("grab-{name}")).spawn({
            let frames = Arc::clone(&frames);
            let stop = Arc::clone(&stop);
            move || capture_loop(grabber, &frames, &stop, pace)
        })?;

        Ok(Self {
            name,
            frames,
            stop,
            handle: Some(handle),
            last_seen: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn capture_loop<G: FrameGrabber>(mut grabber: G, frames: &LatestFrame, stop: &AtomicBool, pace: Duration) {
    let mut misses: u64 = 0;
    while !stop.load(Ordering::Acquire) {
        match grabber.grab() {
            Some(frame) => {
                frames.publish(frame);
                misses = 0;
            }
            None => {
                misses += 1;
                if misses % 100 == 1 {
                    debug!(misses, "frame grab missed");
                }
            }
        }
        thread::sleep(pace);
    }
    grabber.close();
}

impl FrameSource for ThreadedSource {
    fn get_frame(&mut self) -> Option<Arc<RgbImage>> {
        let (sequence, frame) = self.frames.newer_than(self.last_seen)?;
        self.last_seen = sequence;
        Some(frame)
    }

    fn release(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(source = %self.name, "capture thread panicked");
            }
            self.frames.clear();
        }
    }
}

impl Drop for ThreadedSource {
    fn drop(&mut self) {
        self.release();
    }
}
