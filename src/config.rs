//! Capture point configuration, loaded from JSON and validated once.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::counter::{FlowMode, GateLayout, ReferencePoint};
use crate::error::ConfigError;
use crate::tracker::{Rect, TrackerConfig};

/// Region of interest in frame pixels.
///
/// Deserialises from `"x,y,width,height"` or from an object. A zero width or
/// height disables the region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RegionRepr")]
pub struct RegionConfig {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl RegionConfig {
    pub fn to_rect(self) -> Rect {
        Rect::new(self.x as f32, self.y as f32, self.width as f32, self.height as f32)
    }
}

impl FromStr for RegionConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ConfigError::Region(s.to_string()))?;
        match parts[..] {
            [x, y, width, height] => Ok(Self {
                x,
                y,
                width,
                height,
            }),
            _ => Err(ConfigError::Region(s.to_string())),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RegionRepr {
    Text(String),
    Fields {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

impl TryFrom<RegionRepr> for RegionConfig {
    type Error = ConfigError;

    fn try_from(repr: RegionRepr) -> Result<Self, Self::Error> {
        match repr {
            RegionRepr::Text(text) => text.parse(),
            RegionRepr::Fields {
                x,
                y,
                width,
                height,
            } => Ok(Self {
                x,
                y,
                width,
                height,
            }),
        }
    }
}

/// Worker pacing and shutdown limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopTiming {
    /// Sleep after a processed frame
    pub pace_ms: u64,
    /// Sleep when no new frame was available
    pub idle_ms: u64,
    /// Sleep after a failed iteration
    pub error_backoff_ms: u64,
    /// Upper bound on waiting for the worker to exit on stop
    pub join_timeout_ms: u64,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            pace_ms: 5,
            idle_ms: 10,
            error_backoff_ms: 50,
            join_timeout_ms: 1500,
        }
    }
}

impl LoopTiming {
    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Static configuration of one capture point (line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturePointConfig {
    pub line_id: u32,
    #[serde(default)]
    pub name: String,
    /// Frame source reference (stream url or file path)
    pub source: String,
    #[serde(default)]
    pub region: RegionConfig,
    /// Detection model reference
    #[serde(default = "default_model")]
    pub model: String,
    /// Offset of the far (upper) gate from the region's first third
    #[serde(default = "default_far_gate_offset")]
    pub far_gate_offset: i32,
    /// Offset of the near (lower) gate from the region's second third
    #[serde(default = "default_near_gate_offset")]
    pub near_gate_offset: i32,
    #[serde(default)]
    pub flow_mode: FlowMode,
    #[serde(default)]
    pub reference_point: ReferencePoint,
    #[serde(default = "default_max_lost_frames")]
    pub max_lost_frames: u32,
    #[serde(default = "default_match_radius")]
    pub match_radius: f32,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_target_classes")]
    pub target_classes: Vec<u32>,
    #[serde(default = "default_reset_margin")]
    pub reset_margin: f32,
    /// Where to save frames of objects that left without being counted
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
    #[serde(default)]
    pub timing: LoopTiming,
}

fn default_model() -> String {
    "bags_yolov5n.onnx".to_string()
}

fn default_far_gate_offset() -> i32 {
    40
}

fn default_near_gate_offset() -> i32 {
    -40
}

fn default_max_lost_frames() -> u32 {
    2
}

fn default_match_radius() -> f32 {
    150.0
}

fn default_min_confidence() -> f32 {
    0.8
}

fn default_target_classes() -> Vec<u32> {
    vec![0]
}

fn default_reset_margin() -> f32 {
    20.0
}

impl CapturePointConfig {
    /// Config with defaults for every tuning knob.
    pub fn new(line_id: u32, source: impl Into<String>, region: RegionConfig) -> Self {
        Self {
            line_id,
            name: format!("line {line_id}"),
            source: source.into(),
            region,
            model: default_model(),
            far_gate_offset: default_far_gate_offset(),
            near_gate_offset: default_near_gate_offset(),
            flow_mode: FlowMode::default(),
            reference_point: ReferencePoint::default(),
            max_lost_frames: default_max_lost_frames(),
            match_radius: default_match_radius(),
            min_confidence: default_min_confidence(),
            target_classes: default_target_classes(),
            reset_margin: default_reset_margin(),
            snapshot_dir: None,
            timing: LoopTiming::default(),
        }
    }

    /// Parse and validate a single line.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| Err(ConfigError::invalid(self.line_id, reason));

        if self.source.trim().is_empty() {
            return invalid("source must not be empty");
        }
        if self.model.trim().is_empty() {
            return invalid("model must not be empty");
        }
        if !(self.match_radius.is_finite() && self.match_radius > 0.0) {
            return invalid("match_radius must be a positive number");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return invalid("min_confidence must lie in [0, 1]");
        }
        if !(self.reset_margin.is_finite() && self.reset_margin >= 0.0) {
            return invalid("reset_margin must not be negative");
        }
        if self.timing.join_timeout_ms == 0 {
            return invalid("timing.join_timeout_ms must be positive");
        }
        if self.flow_mode != FlowMode::None {
            let region = self.region.to_rect();
            if let Some(gates) = GateLayout::new(&region, self.far_gate_offset as f32, self.near_gate_offset as f32)
                && gates.far >= gates.near
            {
                return Err(ConfigError::invalid(
                    self.line_id,
                    format!(
                        "far gate (y={}) must lie above near gate (y={})",
                        gates.far, gates.near
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            region: self.region.to_rect(),
            match_radius: self.match_radius,
            max_lost_frames: self.max_lost_frames,
            min_confidence: self.min_confidence,
            target_classes: self.target_classes.clone(),
            reference_point: self.reference_point,
            flow: self.flow_mode,
            far_gate_offset: self.far_gate_offset as f32,
            near_gate_offset: self.near_gate_offset as f32,
            reset_margin: self.reset_margin,
        }
    }
}

/// Every capture point of one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    pub lines: Vec<CapturePointConfig>,
}

impl FleetConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for line in &self.lines {
            line.validate()?;
            if !seen.insert(line.line_id) {
                return Err(ConfigError::invalid(line.line_id, "duplicate line_id"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = CapturePointConfig::from_json_str(
            r#"{ "line_id": 1, "source": "rtsp://cam/101", "region": "765,495,300,375" }"#,
        )
        .unwrap();

        assert_eq!(
            config.region,
            RegionConfig {
                x: 765,
                y: 495,
                width: 300,
                height: 375
            }
        );
        assert_eq!(config.far_gate_offset, 40);
        assert_eq!(config.near_gate_offset, -40);
        assert_eq!(config.flow_mode, FlowMode::Up);
        assert_eq!(config.max_lost_frames, 2);
        assert_eq!(config.match_radius, 150.0);
        assert_eq!(config.min_confidence, 0.8);
        assert_eq!(config.target_classes, vec![0]);
        assert_eq!(config.timing, LoopTiming::default());
        assert!(config.snapshot_dir.is_none());
    }

    #[test]
    fn test_region_as_object_and_flow_names() {
        let config = CapturePointConfig::from_json_str(
            r#"{
                "line_id": 2,
                "source": "clip.mp4",
                "region": { "x": 10, "y": 20, "width": 300, "height": 300 },
                "flow_mode": "down",
                "reference_point": "leading",
                "timing": { "pace_ms": 1 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.region.to_rect(), Rect::new(10.0, 20.0, 300.0, 300.0));
        assert_eq!(config.flow_mode, FlowMode::Down);
        assert_eq!(config.reference_point, ReferencePoint::Leading);
        assert_eq!(config.timing.pace_ms, 1);
        assert_eq!(config.timing.join_timeout_ms, 1500);
    }

    #[test]
    fn test_bad_region_text() {
        assert!("1,2,3".parse::<RegionConfig>().is_err());
        assert!("a,b,c,d".parse::<RegionConfig>().is_err());
        assert_eq!("".parse::<RegionConfig>().unwrap(), RegionConfig::default());

        let err = CapturePointConfig::from_json_str(r#"{ "line_id": 1, "source": "x", "region": "1,2" }"#);
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validation_rejects_out_of_range_values() {
        let base = CapturePointConfig::new(4, "rtsp://cam", "0,0,400,300".parse().unwrap());
        assert!(base.validate().is_ok());

        let mut config = base.clone();
        config.min_confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.match_radius = 0.0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.source = "  ".into();
        assert!(config.validate().is_err());

        // 60px tall region: far gate 20 + 40 = 60 lies below near gate 40 - 40 = 0.
        let mut config = base.clone();
        config.region = "0,0,400,60".parse().unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("far gate"));

        // Gates are irrelevant without flow.
        config.flow_mode = FlowMode::None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fleet_rejects_duplicate_lines() {
        let json = r#"{ "lines": [
            { "line_id": 1, "source": "a" },
            { "line_id": 1, "source": "b" }
        ] }"#;
        let err = FleetConfig::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_tracker_config_mapping() {
        let mut config = CapturePointConfig::new(1, "rtsp://cam", "0,0,400,300".parse().unwrap());
        config.far_gate_offset = 0;
        let tracker = config.tracker_config();
        assert_eq!(tracker.region, Rect::new(0.0, 0.0, 400.0, 300.0));
        assert_eq!(tracker.far_gate_offset, 0.0);
        assert_eq!(tracker.near_gate_offset, -40.0);
    }
}
