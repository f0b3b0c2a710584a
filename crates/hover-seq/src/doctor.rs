use anyhow::Result;
use hover_proto::TargetPose;

use crate::SequenceConfig;

pub fn check_sequence(cfg: &SequenceConfig) -> Result<()> {
    anyhow::ensure!(cfg.rate_hz.is_finite() && cfg.rate_hz > 2.0, "sequence.rate_hz must be above 2 Hz");
    anyhow::ensure!(cfg.prime_count > 0, "sequence.prime_count must be > 0");
    anyhow::ensure!(!cfg.mode.trim().is_empty(), "sequence.mode missing");
    anyhow::ensure!(cfg.takeoff_alt_m > 0.0 && cfg.takeoff_alt_m <= 100.0, "sequence.takeoff_alt_m out of range");
    anyhow::ensure!(cfg.arm_settle_s >= 0.0 && cfg.takeoff_settle_s >= 0.0, "settle times must not be negative");
    Ok(())
}

pub fn check_target(target: &TargetPose) -> Result<()> {
    anyhow::ensure!(target.is_finite(), "target position is not finite");
    anyhow::ensure!(target.z > 0.0, "target.z must be above the origin");
    Ok(())
}
