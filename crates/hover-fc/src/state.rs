use std::time::{Duration, Instant};

use hover_seq::VehicleStatus;
use mavlink::common::MavModeFlag;

/// What the last autopilot heartbeat told us.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatTracker {
    last_heartbeat: Option<Instant>,
    armed: bool,
    guided: bool,
    custom_mode: Option<u32>,
}

impl HeartbeatTracker {
    pub fn record(&mut self, base_mode: MavModeFlag, custom_mode: u32) {
        self.record_at(Instant::now(), base_mode, custom_mode);
    }

    pub fn record_at(&mut self, at: Instant, base_mode: MavModeFlag, custom_mode: u32) {
        self.last_heartbeat = Some(at);
        self.armed = base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
        self.guided = base_mode.contains(MavModeFlag::MAV_MODE_FLAG_GUIDED_ENABLED);
        self.custom_mode = Some(custom_mode);
    }

    pub fn seen(&self) -> bool {
        self.last_heartbeat.is_some()
    }

    pub fn hb_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }

    pub fn status(&self, timeout: Duration) -> VehicleStatus {
        self.status_at(Instant::now(), timeout)
    }

    pub fn status_at(&self, now: Instant, timeout: Duration) -> VehicleStatus {
        let connected = self
            .last_heartbeat
            .map(|t| now.saturating_duration_since(t) < timeout)
            .unwrap_or(false);
        VehicleStatus {
            connected,
            armed: self.armed,
            guided: self.guided,
            custom_mode: self.custom_mode,
        }
    }
}
