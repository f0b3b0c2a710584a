use serde::{Deserialize, Serialize};

/// Local position target in the east-north-up frame (metres from the EKF origin).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetPose {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for TargetPose {
    fn default() -> Self {
        Self::hover()
    }
}

impl TargetPose {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Hold position over the origin, 2 m up.
    pub const fn hover() -> Self {
        Self::new(0.0, 0.0, 2.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn to_ned(&self) -> NedPosition {
        NedPosition { north: self.y, east: self.x, down: -self.z }
    }
}

/// Same position in the north-east-down frame MAVLink local setpoints use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NedPosition {
    pub north: f32,
    pub east: f32,
    pub down: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_hover_point() {
        assert_eq!(TargetPose::default(), TargetPose::new(0.0, 0.0, 2.0));
    }

    #[test]
    fn enu_to_ned_swaps_axes_and_flips_up() {
        let ned = TargetPose::new(1.0, 3.0, 2.0).to_ned();
        assert_eq!(ned, NedPosition { north: 3.0, east: 1.0, down: -2.0 });
    }

    #[test]
    fn nan_is_not_finite() {
        assert!(!TargetPose::new(f32::NAN, 0.0, 1.0).is_finite());
        assert!(TargetPose::hover().is_finite());
    }
}
