use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use hover_proto::TargetPose;

/// Last status reported by the autopilot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VehicleStatus {
    pub connected: bool,
    pub armed: bool,
    pub guided: bool,
    pub custom_mode: Option<u32>,
}

/// Link status shared between the telemetry dispatch step (writer) and the
/// sequencer loop (reader). `Cell` keeps it on one thread.
#[derive(Debug, Default)]
pub struct ConnectionState {
    status: Cell<VehicleStatus>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(&self) -> bool {
        self.status.get().connected
    }

    pub fn status(&self) -> VehicleStatus {
        self.status.get()
    }

    pub fn update(&self, status: VehicleStatus) {
        self.status.set(status);
    }

    pub fn set_connected(&self, connected: bool) {
        let mut st = self.status.get();
        st.connected = connected;
        self.status.set(st);
    }
}

/// Asynchronous status feed from the vehicle.
pub trait TelemetryChannel {
    /// Dispatch whatever status updates are pending into `state`. Must not block.
    fn spin_once(&mut self, state: &ConnectionState) -> Result<()>;
}

/// Request/response commands plus the setpoint stream.
///
/// `Err` means the request could not be completed; `Ok(false)` means the
/// autopilot answered and refused.
pub trait VehicleCommands {
    fn publish_setpoint(&mut self, pose: &TargetPose) -> Result<()>;
    fn set_mode(&mut self, mode: &str) -> Result<bool>;
    fn arm(&mut self, value: bool) -> Result<bool>;
    fn takeoff(&mut self, altitude: f32) -> Result<bool>;
}

/// Process-wide stop request, set from the signal handler.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
