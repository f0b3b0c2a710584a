use std::time::{Duration, Instant};

use anyhow::Result;
use hover_seq::{ConnectionState, TelemetryChannel};
use tracing::{info, warn};

use crate::mav::FcLink;
use crate::FcConfig;

#[derive(Debug, Clone)]
pub struct PortAttempt {
    pub dev: String,
    pub baud: u32,
    pub hb_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct AutodetectResult {
    pub chosen: Option<(String, u32)>,
    pub attempts: Vec<PortAttempt>,
}

impl AutodetectResult {
    /// mavlink URL of the chosen port.
    pub fn endpoint(&self) -> Option<String> {
        self.chosen.as_ref().map(|(dev, baud)| serial_endpoint(dev, *baud))
    }
}

pub fn serial_endpoint(dev: &str, baud: u32) -> String {
    format!("serial:{}:{}", dev, baud)
}

pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/serial0".into(),
        "/dev/ttyAMA0".into(),
        "/dev/ttyS0".into(),
        "/dev/ttyUSB0".into(),
        "/dev/ttyUSB1".into(),
        "/dev/ttyACM0".into(),
        "/dev/ttyACM1".into(),
    ]
}

pub fn default_candidate_bauds() -> Vec<u32> {
    vec![57600, 115200, 230400, 921600]
}

/// Try each device/baud pair until one yields an autopilot heartbeat.
pub fn autodetect_fc(cfg: &FcConfig) -> Result<AutodetectResult> {
    let devs = cfg.candidate_devs.clone().unwrap_or_else(default_candidate_devs);
    let bauds = cfg.candidate_bauds.clone().unwrap_or_else(default_candidate_bauds);
    let heartbeat_timeout = Duration::from_millis(cfg.heartbeat_timeout_ms.unwrap_or(1500));

    let mut attempts = Vec::new();

    for dev in devs {
        for baud in &bauds {
            let start = Instant::now();
            let mut hb_seen = false;

            let note = match FcLink::open(&serial_endpoint(&dev, *baud), cfg) {
                Ok(mut link) => {
                    let state = ConnectionState::new();
                    while start.elapsed() < heartbeat_timeout {
                        if link.spin_once(&state).is_ok() && link.heartbeat().seen() {
                            hb_seen = true;
                            break;
                        }
                        std::thread::sleep(Duration::from_millis(25));
                    }
                    if hb_seen { "heartbeat".to_string() } else { "no heartbeat".to_string() }
                }
                Err(e) => {
                    warn!("fc autodetect attempt failed dev={} baud={} err={:#}", dev, baud, e);
                    format!("open/connect failed: {:#}", e)
                }
            };

            attempts.push(PortAttempt {
                dev: dev.clone(),
                baud: *baud,
                hb_seen,
                elapsed_ms: start.elapsed().as_millis() as u64,
                note,
            });

            if hb_seen {
                info!("fc autodetect: OK {} @ {}", dev, baud);
                return Ok(AutodetectResult { chosen: Some((dev, *baud)), attempts });
            }
        }
    }

    Ok(AutodetectResult { chosen: None, attempts })
}
