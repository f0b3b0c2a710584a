pub mod doctor;
pub mod link;
pub mod rate;
pub mod sequencer;

use serde::Deserialize;

pub use link::{ConnectionState, Shutdown, TelemetryChannel, VehicleCommands, VehicleStatus};
pub use sequencer::{SequenceError, Sequencer};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Loop rate for the connection wait, priming and steady-state publishing.
    /// The autopilot drops out of guided control below 2 Hz.
    pub rate_hz: f32,

    /// Setpoints sent before the mode change; the autopilot ignores external
    /// setpoints until it has seen a stream.
    pub prime_count: u32,

    /// Flight mode name requested before arming.
    pub mode: String,

    pub takeoff_alt_m: f32,

    /// Pause after a successful arm / takeoff request.
    pub arm_settle_s: f32,
    pub takeoff_settle_s: f32,

    /// Treat a negative reply (mode refused, arm denied, takeoff denied) as
    /// fatal, not only a failed call.
    pub abort_on_rejection: bool,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            rate_hz: 20.0,
            prime_count: 100,
            mode: "GUIDED".into(),
            takeoff_alt_m: 1.5,
            arm_settle_s: 2.0,
            takeoff_settle_s: 5.0,
            abort_on_rejection: false,
        }
    }
}
