pub mod setpoint;

pub use setpoint::{NedPosition, TargetPose};
