pub mod autodetect;
pub mod mav;
pub mod modes;
pub mod state;
pub mod transport;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FcConfig {
    /// mavlink connection URL, e.g. "serial:/dev/ttyACM0:57600",
    /// "udpin:0.0.0.0:14550" (SITL) or "tcpout:127.0.0.1:5760".
    pub endpoint: String,

    /// If true, try candidate serial ports/bauds and use the first that
    /// yields an autopilot HEARTBEAT instead of `endpoint`.
    pub autodetect: bool,

    /// Autodetect candidates (paths). Example:
    /// ["/dev/serial0","/dev/ttyAMA0","/dev/ttyUSB0","/dev/ttyACM0"]
    pub candidate_devs: Option<Vec<String>>,

    /// Autodetect candidate baud rates (common ArduPilot telemetry values).
    pub candidate_bauds: Option<Vec<u32>>,

    /// Heartbeat wait per device/baud attempt
    pub heartbeat_timeout_ms: Option<u64>,

    /// MAVLink ids we use (companion side)
    pub sys_id: u8,
    pub comp_id: u8,

    /// target system/component (FC side). 1/1 is common for ArduPilot.
    pub target_sys: u8,
    pub target_comp: u8,

    /// Companion heartbeat rate. Default 1 Hz.
    pub send_heartbeat_hz: Option<f32>,

    /// Link counts as connected while the last FC heartbeat is younger than this.
    pub connection_timeout_ms: u64,

    /// How long a command waits for its COMMAND_ACK.
    pub command_timeout_ms: u64,
}

impl Default for FcConfig {
    fn default() -> Self {
        Self {
            endpoint: "udpin:0.0.0.0:14550".into(),
            autodetect: false,
            candidate_devs: None,
            candidate_bauds: None,
            heartbeat_timeout_ms: None,
            sys_id: 1,
            comp_id: 191,
            target_sys: 1,
            target_comp: 1,
            send_heartbeat_hz: None,
            connection_timeout_ms: 10_000,
            command_timeout_ms: 3_000,
        }
    }
}

impl FcConfig {
    pub fn check(&self) -> anyhow::Result<()> {
        if !self.autodetect {
            anyhow::ensure!(!self.endpoint.trim().is_empty(), "fc.endpoint missing");
            transport::Endpoint::parse(&self.endpoint)?;
        }
        anyhow::ensure!(self.target_sys > 0, "fc.target_sys must be > 0");
        anyhow::ensure!(self.connection_timeout_ms > 0, "fc.connection_timeout_ms must be > 0");
        anyhow::ensure!(self.command_timeout_ms > 0, "fc.command_timeout_ms must be > 0");
        Ok(())
    }
}
