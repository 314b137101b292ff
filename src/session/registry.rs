//! Process-wide set of capture points.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::config::{CapturePointConfig, FleetConfig};
use crate::error::{CaptureError, ConfigError};
use crate::integration::CaptureBackend;
use crate::session::{CapturePoint, LineId, LineStatus, SessionStore};
use crate::sync::lock;

/// Maps line ids to their [`CapturePoint`], built on first use.
pub struct LineRegistry {
    configs: BTreeMap<LineId, CapturePointConfig>,
    backend: Arc<dyn CaptureBackend>,
    store: Arc<dyn SessionStore>,
    lines: Mutex<BTreeMap<LineId, Arc<CapturePoint>>>,
}

impl LineRegistry {
    pub fn new(
        fleet: FleetConfig,
        backend: Arc<dyn CaptureBackend>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, ConfigError> {
        fleet.validate()?;
        let configs = fleet.lines.into_iter().map(|c| (c.line_id, c)).collect();
        Ok(Self {
            configs,
            backend,
            store,
            lines: Mutex::new(BTreeMap::new()),
        })
    }

    /// Configured line ids in ascending order.
    pub fn line_ids(&self) -> Vec<LineId> {
        self.configs.keys().copied().collect()
    }

    /// The capture point for `line_id`, created if needed.
    pub fn get(&self, line_id: LineId) -> Result<Arc<CapturePoint>, CaptureError> {
        let mut lines = lock(&self.lines);
        if let Some(point) = lines.get(&line_id) {
            return Ok(Arc::clone(point));
        }
        let config = self
            .configs
            .get(&line_id)
            .cloned()
            .ok_or(CaptureError::UnknownLine(line_id))?;
        let point = Arc::new(CapturePoint::new(
            config,
            Arc::clone(&self.backend),
            Arc::clone(&self.store),
        )?);
        lines.insert(line_id, Arc::clone(&point));
        info!(line_id, "capture point created");
        Ok(point)
    }

    /// Status of every line that has been created.
    pub fn statuses(&self) -> Vec<LineStatus> {
        let lines: Vec<_> = lock(&self.lines).values().cloned().collect();
        lines.iter().map(|p| p.status()).collect()
    }

    /// Release and forget a line's capture point. Returns whether it existed.
    pub fn drop_line(&self, line_id: LineId) -> bool {
        let removed = lock(&self.lines).remove(&line_id);
        match removed {
            Some(point) => {
                point.release();
                info!(line_id, "capture point dropped");
                true
            }
            None => false,
        }
    }

    /// Release every created line.
    pub fn release_all(&self) {
        let lines = std::mem::take(&mut *lock(&self.lines));
        for point in lines.into_values() {
            point.release();
        }
    }
}

impl Drop for LineRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}
