//! JPEG snapshots of objects that left the region without being counted.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use image::{Rgb, RgbImage};
use tracing::info;

use crate::error::SnapshotError;
use crate::integration::annotate::outline;
use crate::tracker::Track;

const NO_LOT: &str = "no_lot";
const MARK: Rgb<u8> = Rgb([0, 0, 255]);

/// Reduce a lot label to a safe directory / file name component.
pub fn sanitize_lot(lot: &str) -> String {
    let safe: String = lot
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let safe = safe.trim_matches('_');
    if safe.is_empty() { NO_LOT.to_string() } else { safe.to_string() }
}

/// Writes one image per uncounted track into a per-lot directory.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    base_dir: PathBuf,
    lot: Option<String>,
}

impl SnapshotWriter {
    /// Create the writer, making sure `base_dir` exists.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir, lot: None })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Direct further snapshots into the directory of `lot`, or back to the
    /// base directory when `None`.
    pub fn set_lot(&mut self, lot: Option<&str>) {
        self.lot = lot.map(sanitize_lot);
        if let Some(lot) = &self.lot {
            info!(dir = %self.base_dir.join(lot).display(), "uncounted snapshots enabled");
        }
    }

    pub fn target_dir(&self) -> PathBuf {
        match &self.lot {
            Some(lot) => self.base_dir.join(lot),
            None => self.base_dir.clone(),
        }
    }

    /// Save `frame` with the track's box marked. Returns the written path.
    pub fn save(&self, frame: &RgbImage, track: &Track) -> Result<PathBuf, SnapshotError> {
        let (width, height) = frame.dimensions();
        if track.bbox.clamp_to(width, height).is_none() {
            return Err(SnapshotError::EmptyCrop {
                track_id: track.track_id,
            });
        }

        let dir = self.target_dir();
        fs::create_dir_all(&dir)?;

        let lot = self.lot.as_deref().unwrap_or(NO_LOT);
        let stem = format!("{lot}_{}_id{}", Local::now().format("%H%M%S"), track.track_id);
        let path = unique_path(&dir, &stem);

        let mut marked = frame.clone();
        outline(&mut marked, &track.bbox, MARK);
        marked.save(&path)?;
        info!(path = %path.display(), track_id = track.track_id, "uncounted snapshot saved");
        Ok(path)
    }
}

fn unique_path(dir: &Path, stem: &str) -> PathBuf {
    let mut suffix = 0u32;
    loop {
        let name = match suffix {
            0 => format!("{stem}.jpg"),
            n => format!("{stem}_{n}.jpg"),
        };
        let path = dir.join(name);
        if !path.exists() {
            return path;
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{FlowMode, ReferencePoint};
    use crate::tracker::{Detection, ObjectTracker, TrackerConfig};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gatecount-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn departed_track() -> Track {
        let mut tracker = ObjectTracker::new(TrackerConfig {
            flow: FlowMode::Up,
            reference_point: ReferencePoint::Center,
            max_lost_frames: 0,
            ..TrackerConfig::default()
        });
        tracker.update(&[Detection::new(4.0, 4.0, 20.0, 20.0, 0.9)], 32);
        tracker.update(&[], 32).departed.remove(0)
    }

    #[test]
    fn test_sanitize_lot() {
        assert_eq!(sanitize_lot("  L-2024/07 #3 "), "L-2024_07__3");
        assert_eq!(sanitize_lot("///"), NO_LOT);
        assert_eq!(sanitize_lot(""), NO_LOT);
    }

    #[test]
    fn test_save_into_lot_directory_without_overwriting() {
        let base = scratch_dir("snap");
        let mut writer = SnapshotWriter::new(&base).unwrap();
        writer.set_lot(Some("lot 7"));

        let frame = RgbImage::new(32, 32);
        let track = departed_track();
        let first = writer.save(&frame, &track).unwrap();
        let second = writer.save(&frame, &track).unwrap();

        assert_eq!(first.parent().unwrap(), base.join("lot_7"));
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("lot_7_") && name.contains("_id1"));

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn test_offscreen_track_is_rejected() {
        let base = scratch_dir("snap-offscreen");
        let writer = SnapshotWriter::new(&base).unwrap();
        let track = departed_track();
        let err = writer.save(&RgbImage::new(2, 2), &track).unwrap_err();
        assert!(matches!(err, SnapshotError::EmptyCrop { track_id: 1 }));
        let _ = fs::remove_dir_all(&base);
    }
}
