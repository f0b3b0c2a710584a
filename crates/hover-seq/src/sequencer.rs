use std::time::Duration;

use anyhow::Result;
use hover_proto::TargetPose;
use tracing::{debug, error, info, warn};

use crate::link::{ConnectionState, Shutdown, TelemetryChannel, VehicleCommands};
use crate::rate::Rate;
use crate::SequenceConfig;

#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("failed to change mode to {mode}")]
    ModeChange {
        mode: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("autopilot refused mode {mode}")]
    ModeRejected { mode: String },
    #[error("failed to call arming")]
    Arming {
        #[source]
        source: anyhow::Error,
    },
    #[error("autopilot refused to arm")]
    ArmRejected,
    #[error("failed to take off to {altitude} m")]
    Takeoff {
        altitude: f32,
        #[source]
        source: anyhow::Error,
    },
    #[error("autopilot refused takeoff to {altitude} m")]
    TakeoffRejected { altitude: f32 },
    #[error(transparent)]
    Link(#[from] anyhow::Error),
}

impl SequenceError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            SequenceError::Link(_) => 1,
            _ => -1,
        }
    }
}

/// Linear takeoff sequence: wait for link, prime setpoints, mode, arm,
/// takeoff, then hold the target forever.
pub struct Sequencer<V> {
    vehicle: V,
    cfg: SequenceConfig,
    target: TargetPose,
    state: ConnectionState,
    shutdown: Shutdown,
}

impl<V: TelemetryChannel + VehicleCommands> Sequencer<V> {
    pub fn new(vehicle: V, cfg: SequenceConfig, target: TargetPose, shutdown: Shutdown) -> Self {
        Self { vehicle, cfg, target, state: ConnectionState::new(), shutdown }
    }

    pub fn vehicle(&self) -> &V {
        &self.vehicle
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Runs until shutdown is requested (`Ok`) or a step fails.
    pub fn run(&mut self) -> Result<(), SequenceError> {
        let mut rate = Rate::new(self.cfg.rate_hz)?;

        if !self.await_connection(&mut rate)? {
            return Ok(());
        }
        if !self.prime(&mut rate)? {
            return Ok(());
        }
        self.request_mode()?;
        self.request_arm()?;
        self.request_takeoff()?;
        self.hold(&mut rate)
    }

    fn ok(&self) -> bool {
        !self.shutdown.is_requested()
    }

    fn await_connection(&mut self, rate: &mut Rate) -> Result<bool, SequenceError> {
        info!("waiting for FC connection");
        while self.ok() && !self.state.connected() {
            self.vehicle.spin_once(&self.state)?;
            rate.sleep();
        }
        if self.state.connected() {
            info!("FC connected: {:?}", self.state.status());
        }
        Ok(self.ok())
    }

    fn prime(&mut self, rate: &mut Rate) -> Result<bool, SequenceError> {
        debug!("priming setpoint stream with {} setpoints", self.cfg.prime_count);
        let mut sent = 0;
        while self.ok() && sent < self.cfg.prime_count {
            self.vehicle.publish_setpoint(&self.target)?;
            sent += 1;
            self.vehicle.spin_once(&self.state)?;
            rate.sleep();
        }
        Ok(self.ok())
    }

    fn request_mode(&mut self) -> Result<(), SequenceError> {
        let mode = self.cfg.mode.clone();
        match self.vehicle.set_mode(&mode) {
            Ok(sent) => {
                info!("Change mode cmd sent {}", sent);
                if !sent && self.cfg.abort_on_rejection {
                    return Err(SequenceError::ModeRejected { mode });
                }
                Ok(())
            }
            Err(source) => {
                error!("Failed to Change Mode Service: {:#}", source);
                Err(SequenceError::ModeChange { mode, source })
            }
        }
    }

    fn request_arm(&mut self) -> Result<(), SequenceError> {
        match self.vehicle.arm(true) {
            Ok(success) => {
                settle(self.cfg.arm_settle_s);
                info!("Arming command sent {}", success);
                if !success && self.cfg.abort_on_rejection {
                    return Err(SequenceError::ArmRejected);
                }
                Ok(())
            }
            Err(source) => {
                error!("Failed to Call Arming Service: {:#}", source);
                Err(SequenceError::Arming { source })
            }
        }
    }

    fn request_takeoff(&mut self) -> Result<(), SequenceError> {
        let altitude = self.cfg.takeoff_alt_m;
        match self.vehicle.takeoff(altitude) {
            Ok(success) => {
                settle(self.cfg.takeoff_settle_s);
                info!("takeoff sent {}", success);
                if !success && self.cfg.abort_on_rejection {
                    return Err(SequenceError::TakeoffRejected { altitude });
                }
                Ok(())
            }
            Err(source) => {
                error!("Failed to Take Off: {:#}", source);
                Err(SequenceError::Takeoff { altitude, source })
            }
        }
    }

    fn hold(&mut self, rate: &mut Rate) -> Result<(), SequenceError> {
        info!("holding target {:?} at {} Hz", self.target, self.cfg.rate_hz);
        while self.ok() {
            self.vehicle.publish_setpoint(&self.target)?;
            self.vehicle.spin_once(&self.state)?;
            if !rate.sleep() {
                warn!("setpoint loop overran its {:?} period", rate.period());
            }
        }
        info!("shutdown requested, leaving setpoint loop");
        Ok(())
    }
}

fn settle(secs: f32) {
    if secs > 0.0 {
        std::thread::sleep(Duration::from_secs_f32(secs));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::link::VehicleStatus;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Setpoint(TargetPose),
        SetMode(String),
        Arm(bool),
        Takeoff(f32),
    }

    #[derive(Debug, Clone, Copy)]
    enum Reply {
        Accept,
        Refuse,
        Fail,
    }

    impl Reply {
        fn answer(self) -> Result<bool> {
            match self {
                Reply::Accept => Ok(true),
                Reply::Refuse => Ok(false),
                Reply::Fail => anyhow::bail!("no ack"),
            }
        }
    }

    struct FakeVehicle {
        connect_after: Option<usize>,
        max_spins: usize,
        hold_ticks: usize,
        spins: usize,
        calls: Vec<Call>,
        held_at: Vec<Instant>,
        mode: Reply,
        arm: Reply,
        takeoff: Reply,
        shutdown: Shutdown,
    }

    impl FakeVehicle {
        fn new(shutdown: &Shutdown) -> Self {
            Self {
                connect_after: Some(3),
                max_spins: 10_000,
                hold_ticks: 5,
                spins: 0,
                calls: Vec::new(),
                held_at: Vec::new(),
                mode: Reply::Accept,
                arm: Reply::Accept,
                takeoff: Reply::Accept,
                shutdown: shutdown.clone(),
            }
        }

        fn took_off(&self) -> bool {
            self.calls.iter().any(|c| matches!(c, Call::Takeoff(_)))
        }

        fn first_command(&self) -> Option<usize> {
            self.calls.iter().position(|c| !matches!(c, Call::Setpoint(_)))
        }
    }

    impl TelemetryChannel for FakeVehicle {
        fn spin_once(&mut self, state: &ConnectionState) -> Result<()> {
            self.spins += 1;
            if let Some(n) = self.connect_after {
                if self.spins >= n {
                    state.update(VehicleStatus { connected: true, ..VehicleStatus::default() });
                }
            }
            if self.spins >= self.max_spins {
                self.shutdown.request();
            }
            Ok(())
        }
    }

    impl VehicleCommands for FakeVehicle {
        fn publish_setpoint(&mut self, pose: &TargetPose) -> Result<()> {
            self.calls.push(Call::Setpoint(*pose));
            if self.took_off() {
                self.held_at.push(Instant::now());
                if self.held_at.len() >= self.hold_ticks {
                    self.shutdown.request();
                }
            }
            Ok(())
        }

        fn set_mode(&mut self, mode: &str) -> Result<bool> {
            self.calls.push(Call::SetMode(mode.to_string()));
            self.mode.answer()
        }

        fn arm(&mut self, value: bool) -> Result<bool> {
            self.calls.push(Call::Arm(value));
            self.arm.answer()
        }

        fn takeoff(&mut self, altitude: f32) -> Result<bool> {
            self.calls.push(Call::Takeoff(altitude));
            self.takeoff.answer()
        }
    }

    fn fast_cfg() -> SequenceConfig {
        SequenceConfig {
            rate_hz: 1000.0,
            arm_settle_s: 0.0,
            takeoff_settle_s: 0.0,
            ..SequenceConfig::default()
        }
    }

    fn sequencer(vehicle: FakeVehicle, shutdown: Shutdown) -> Sequencer<FakeVehicle> {
        Sequencer::new(vehicle, fast_cfg(), TargetPose::hover(), shutdown)
    }

    #[test]
    fn never_connected_never_publishes() {
        let shutdown = Shutdown::new();
        let mut fake = FakeVehicle::new(&shutdown);
        fake.connect_after = None;
        fake.max_spins = 50;
        let mut seq = sequencer(fake, shutdown);

        seq.run().unwrap();
        assert_eq!(seq.vehicle().spins, 50);
        assert!(seq.vehicle().calls.is_empty());
        assert!(!seq.state().connected());
    }

    #[test]
    fn full_sequence_order() {
        let shutdown = Shutdown::new();
        let fake = FakeVehicle::new(&shutdown);
        let mut seq = sequencer(fake, shutdown);

        seq.run().unwrap();
        let calls = &seq.vehicle().calls;
        let first = seq.vehicle().first_command().unwrap();
        assert_eq!(first, 100);
        assert!(calls[..100].iter().all(|c| *c == Call::Setpoint(TargetPose::hover())));
        assert_eq!(calls[100], Call::SetMode("GUIDED".into()));
        assert_eq!(calls[101], Call::Arm(true));
        assert_eq!(calls[102], Call::Takeoff(1.5));
        assert_eq!(calls.len(), 103 + 5);
    }

    #[test]
    fn mode_failure_stops_before_arming() {
        let shutdown = Shutdown::new();
        let mut fake = FakeVehicle::new(&shutdown);
        fake.mode = Reply::Fail;
        let mut seq = sequencer(fake, shutdown);

        let err = seq.run().unwrap_err();
        assert!(matches!(err, SequenceError::ModeChange { ref mode, .. } if mode == "GUIDED"));
        assert_eq!(err.exit_code(), -1);
        let calls = &seq.vehicle().calls;
        assert_eq!(calls.last(), Some(&Call::SetMode("GUIDED".into())));
        assert!(!calls.iter().any(|c| matches!(c, Call::Arm(_) | Call::Takeoff(_))));
    }

    #[test]
    fn arming_failure_is_fatal() {
        let shutdown = Shutdown::new();
        let mut fake = FakeVehicle::new(&shutdown);
        fake.arm = Reply::Fail;
        let mut seq = sequencer(fake, shutdown);

        let err = seq.run().unwrap_err();
        assert!(matches!(err, SequenceError::Arming { .. }));
        assert_eq!(err.exit_code(), -1);
        assert!(!seq.vehicle().took_off());
    }

    #[test]
    fn takeoff_failure_skips_hold_loop() {
        let shutdown = Shutdown::new();
        let mut fake = FakeVehicle::new(&shutdown);
        fake.takeoff = Reply::Fail;
        let mut seq = sequencer(fake, shutdown);

        let err = seq.run().unwrap_err();
        assert!(matches!(err, SequenceError::Takeoff { altitude, .. } if altitude == 1.5));
        assert_eq!(err.exit_code(), -1);
        assert_eq!(seq.vehicle().calls.last(), Some(&Call::Takeoff(1.5)));
        assert!(seq.vehicle().held_at.is_empty());
    }

    #[test]
    fn refusal_is_logged_not_fatal_by_default() {
        let shutdown = Shutdown::new();
        let mut fake = FakeVehicle::new(&shutdown);
        fake.mode = Reply::Refuse;
        fake.arm = Reply::Refuse;
        let mut seq = sequencer(fake, shutdown);

        seq.run().unwrap();
        assert!(seq.vehicle().took_off());
        assert_eq!(seq.vehicle().held_at.len(), 5);
    }

    #[test]
    fn refusal_aborts_when_configured() {
        let shutdown = Shutdown::new();
        let mut fake = FakeVehicle::new(&shutdown);
        fake.arm = Reply::Refuse;
        let cfg = SequenceConfig { abort_on_rejection: true, ..fast_cfg() };
        let mut seq = Sequencer::new(fake, cfg, TargetPose::hover(), shutdown);

        let err = seq.run().unwrap_err();
        assert!(matches!(err, SequenceError::ArmRejected));
        assert!(!seq.vehicle().took_off());
    }

    #[test]
    fn hold_loop_repeats_the_fixed_target() {
        let shutdown = Shutdown::new();
        let mut fake = FakeVehicle::new(&shutdown);
        fake.hold_ticks = 25;
        let mut seq = sequencer(fake, shutdown);

        seq.run().unwrap();
        let calls = &seq.vehicle().calls;
        let after_takeoff = &calls[103..];
        assert_eq!(after_takeoff.len(), 25);
        let hover = TargetPose::new(0.0, 0.0, 2.0);
        assert!(after_takeoff.iter().all(|c| *c == Call::Setpoint(hover)));
    }

    #[test]
    fn hold_loop_keeps_at_least_twenty_hz() {
        let shutdown = Shutdown::new();
        let mut fake = FakeVehicle::new(&shutdown);
        fake.hold_ticks = 10;
        let cfg = SequenceConfig { rate_hz: 20.0, prime_count: 2, ..fast_cfg() };
        let mut seq = Sequencer::new(fake, cfg, TargetPose::hover(), shutdown);

        seq.run().unwrap();
        let held = &seq.vehicle().held_at;
        assert_eq!(held.len(), 10);
        let span = held[held.len() - 1].duration_since(held[0]);
        let mean = span / (held.len() as u32 - 1);
        // 50 ms nominal; allow scheduler jitter on loaded CI machines
        assert!(mean <= Duration::from_millis(60), "mean period {:?}", mean);
    }

    #[test]
    fn shutdown_during_priming_skips_commands() {
        let shutdown = Shutdown::new();
        let mut fake = FakeVehicle::new(&shutdown);
        fake.max_spins = 20;
        let mut seq = sequencer(fake, shutdown);

        assert!(matches!(seq.run(), Ok(())));
        assert!(seq.vehicle().first_command().is_none());
        assert!(seq.vehicle().calls.len() < 100);
    }

    #[test]
    fn bad_rate_is_a_link_error() {
        let shutdown = Shutdown::new();
        let fake = FakeVehicle::new(&shutdown);
        let cfg = SequenceConfig { rate_hz: 0.0, ..fast_cfg() };
        let mut seq = Sequencer::new(fake, cfg, TargetPose::hover(), shutdown);

        let err = seq.run().unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
