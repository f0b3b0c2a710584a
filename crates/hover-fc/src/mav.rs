use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use hover_proto::TargetPose;
use hover_seq::{ConnectionState, TelemetryChannel, VehicleCommands};
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavFrame, MavMessage, MavModeFlag, MavResult, MavState, MavType,
        PositionTargetTypemask, COMMAND_LONG_DATA, HEARTBEAT_DATA,
        SET_POSITION_TARGET_LOCAL_NED_DATA,
    },
    error::MessageReadError,
    MavHeader, MavlinkVersion,
};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::modes;
use crate::state::HeartbeatTracker;
use crate::transport::{self, Endpoint, Rx, Tx};
use crate::FcConfig;

type Frame = (MavHeader, MavMessage);

pub struct FcLink {
    tx: Tx,
    rx: mpsc::UnboundedReceiver<Frame>,
    // frames that arrived while waiting for a COMMAND_ACK
    backlog: VecDeque<Frame>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    hdr: MavHeader,
    target_sys: u8,
    target_comp: u8,
    heartbeat: HeartbeatTracker,
    hb_interval: Duration,
    last_hb_send: Option<Instant>,
    connection_timeout: Duration,
    command_timeout: Duration,
    started: Instant,
}

impl FcLink {
    /// Open `endpoint` (a mavlink connection URL such as `serial:/dev/ttyACM0:57600`
    /// or `udpin:0.0.0.0:14550`) and start the background reader.
    pub fn open(endpoint: &str, cfg: &FcConfig) -> Result<Self> {
        let ep = Endpoint::parse(endpoint)?;
        let (rx_half, tx) =
            transport::open(&ep).with_context(|| format!("mavlink connect {}", endpoint))?;

        let (frames, rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = Arc::clone(&stop);
        let reader = std::thread::Builder::new()
            .name("mavlink-rx".into())
            .spawn(move || read_loop(rx_half, frames, reader_stop))
            .context("spawn mavlink reader")?;

        let hb_hz = cfg.send_heartbeat_hz.unwrap_or(1.0).max(0.2);
        info!("FC link open on {}", endpoint);

        Ok(Self {
            tx,
            rx,
            backlog: VecDeque::new(),
            stop,
            reader: Some(reader),
            hdr: MavHeader { system_id: cfg.sys_id, component_id: cfg.comp_id, sequence: 0 },
            target_sys: cfg.target_sys,
            target_comp: cfg.target_comp,
            heartbeat: HeartbeatTracker::default(),
            hb_interval: Duration::from_secs_f32(1.0 / hb_hz),
            last_hb_send: None,
            connection_timeout: Duration::from_millis(cfg.connection_timeout_ms),
            command_timeout: Duration::from_millis(cfg.command_timeout_ms),
            started: Instant::now(),
        })
    }

    pub fn heartbeat(&self) -> &HeartbeatTracker {
        &self.heartbeat
    }

    pub fn send_heartbeat(&mut self) -> Result<()> {
        let hb = HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        self.send(MavMessage::HEARTBEAT(hb))
    }

    fn maybe_send_heartbeat(&mut self) -> Result<()> {
        let due = self.last_hb_send.map(|t| t.elapsed() >= self.hb_interval).unwrap_or(true);
        if due {
            self.send_heartbeat()?;
            self.last_hb_send = Some(Instant::now());
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Option<Frame> {
        self.backlog.pop_front().or_else(|| self.rx.try_recv().ok())
    }

    fn dispatch(&mut self, hdr: &MavHeader, msg: &MavMessage) {
        match msg {
            MavMessage::HEARTBEAT(hb)
                if hdr.system_id == self.target_sys
                    && hb.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID =>
            {
                let was_seen = self.heartbeat.seen();
                let prev_mode = self.heartbeat.status(self.connection_timeout).custom_mode;
                self.heartbeat.record(hb.base_mode, hb.custom_mode);
                if !was_seen {
                    info!("FC heartbeat from sys={} comp={}", hdr.system_id, hdr.component_id);
                }
                if prev_mode.is_some() && prev_mode != Some(hb.custom_mode) {
                    info!(
                        "FC mode now {}",
                        modes::mode_name(hb.custom_mode).unwrap_or("UNKNOWN")
                    );
                }
            }
            MavMessage::STATUSTEXT(text) => {
                let raw: Vec<u8> = text.text.iter().copied().take_while(|b| *b != 0).collect();
                info!("FC: {}", String::from_utf8_lossy(&raw));
            }
            _ => {}
        }
    }

    fn command_long(&mut self, command: MavCmd, params: [f32; 7]) -> Result<bool> {
        let cmd = COMMAND_LONG_DATA {
            target_system: self.target_sys,
            target_component: self.target_comp,
            command,
            confirmation: 0,
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
        };
        debug!("FC: sending {:?}", command);
        self.send(MavMessage::COMMAND_LONG(cmd))?;
        self.await_ack(command)
    }

    fn await_ack(&mut self, command: MavCmd) -> Result<bool> {
        let deadline = Instant::now() + self.command_timeout;
        loop {
            match self.rx.try_recv() {
                Ok((_hdr, MavMessage::COMMAND_ACK(ack))) if ack.command == command => {
                    debug!("FC: {:?} -> {:?}", command, ack.result);
                    return Ok(ack.result == MavResult::MAV_RESULT_ACCEPTED);
                }
                Ok(frame) => self.backlog.push_back(frame),
                Err(TryRecvError::Empty) => {
                    if Instant::now() >= deadline {
                        anyhow::bail!("no COMMAND_ACK for {:?} within {:?}", command, self.command_timeout);
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(TryRecvError::Disconnected) => anyhow::bail!("mavlink reader stopped"),
            }
        }
    }

    fn send(&mut self, msg: MavMessage) -> Result<()> {
        self.hdr.sequence = self.hdr.sequence.wrapping_add(1);
        let mut frame = Vec::with_capacity(280);
        mavlink::write_versioned_msg(&mut frame, MavlinkVersion::V2, self.hdr, &msg)
            .context("mavlink encode")?;
        self.tx.send_frame(&frame).context("mavlink send")
    }
}

impl Drop for FcLink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // the reader wakes within one read timeout and releases its half of the port
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("mavlink reader panicked");
            }
        }
    }
}

fn read_loop(rx: Rx, frames: mpsc::UnboundedSender<Frame>, stop: Arc<AtomicBool>) {
    match rx {
        Rx::Datagram { socket, peer, learn_peer } => {
            let mut buf = vec![0u8; 65536];
            while !stop.load(Ordering::SeqCst) {
                let (n, src) = match socket.recv_from(&mut buf) {
                    Ok(r) => r,
                    Err(e) if transport::is_timeout(&e) => continue,
                    Err(e) => {
                        debug!("mavlink udp read error: {}", e);
                        std::thread::sleep(Duration::from_millis(10));
                        continue;
                    }
                };
                if learn_peer {
                    *peer.lock().unwrap_or_else(|e| e.into_inner()) = Some(src);
                }
                let mut datagram = &buf[..n];
                while !datagram.is_empty() {
                    match mavlink::read_versioned_msg::<MavMessage, _>(&mut datagram, MavlinkVersion::V2) {
                        Ok(frame) => {
                            if frames.send(frame).is_err() {
                                return;
                            }
                        }
                        Err(_) => break,
                    }
                }
            }
        }
        Rx::Stream(mut reader) => {
            while !stop.load(Ordering::SeqCst) {
                match mavlink::read_versioned_msg::<MavMessage, _>(&mut reader, MavlinkVersion::V2) {
                    Ok(frame) => {
                        if frames.send(frame).is_err() {
                            return;
                        }
                    }
                    Err(MessageReadError::Io(e)) if transport::is_timeout(&e) => {}
                    Err(MessageReadError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        warn!("mavlink link closed");
                        return;
                    }
                    Err(MessageReadError::Io(e)) => {
                        debug!("mavlink read error: {}", e);
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(e) => debug!("mavlink parse error: {:?}", e),
                }
            }
        }
    }
}

impl TelemetryChannel for FcLink {
    fn spin_once(&mut self, state: &ConnectionState) -> Result<()> {
        self.maybe_send_heartbeat()?;
        while let Some((hdr, msg)) = self.next_frame() {
            self.dispatch(&hdr, &msg);
        }
        let was_connected = state.connected();
        let status = self.heartbeat.status(self.connection_timeout);
        let age = self.heartbeat.hb_age().unwrap_or_default();
        if !was_connected && status.connected {
            info!("FC link up, last heartbeat {:?} ago", age);
        } else if was_connected && !status.connected {
            warn!("FC heartbeat lost, last seen {:?} ago", age);
        }
        state.update(status);
        Ok(())
    }
}

impl VehicleCommands for FcLink {
    fn publish_setpoint(&mut self, pose: &TargetPose) -> Result<()> {
        let ned = pose.to_ned();
        let sp = SET_POSITION_TARGET_LOCAL_NED_DATA {
            time_boot_ms: self.started.elapsed().as_millis() as u32,
            target_system: self.target_sys,
            target_component: self.target_comp,
            coordinate_frame: MavFrame::MAV_FRAME_LOCAL_NED,
            type_mask: position_only_mask(),
            x: ned.north,
            y: ned.east,
            z: ned.down,
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
            afx: 0.0,
            afy: 0.0,
            afz: 0.0,
            yaw: 0.0,
            yaw_rate: 0.0,
        };
        self.send(MavMessage::SET_POSITION_TARGET_LOCAL_NED(sp))
    }

    fn set_mode(&mut self, mode: &str) -> Result<bool> {
        let custom = modes::custom_mode(mode)
            .with_context(|| format!("unknown flight mode {:?}", mode))?;
        let flag = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32;
        info!("FC: requesting mode {} ({})", mode, custom);
        self.command_long(MavCmd::MAV_CMD_DO_SET_MODE, [flag, custom as f32, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    fn arm(&mut self, value: bool) -> Result<bool> {
        info!("FC: sending {}", if value { "ARM" } else { "DISARM" });
        let p1 = if value { 1.0 } else { 0.0 };
        self.command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [p1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    fn takeoff(&mut self, altitude: f32) -> Result<bool> {
        info!("FC: sending TAKEOFF to {} m", altitude);
        self.command_long(MavCmd::MAV_CMD_NAV_TAKEOFF, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, altitude])
    }
}

/// Position-only setpoint: ignore velocity, acceleration and yaw fields.
fn position_only_mask() -> PositionTargetTypemask {
    PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VX_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VY_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VZ_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AX_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AY_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AZ_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_RATE_IGNORE
}
