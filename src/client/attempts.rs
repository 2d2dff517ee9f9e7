//! Capability attempts for direct capture
//!
//! Tried broadest first: any camera at all, then a user-facing one, then the
//! preferred resolution, and finally the device the operator picked.

use serde::{Deserialize, Serialize};

/// Which way a camera points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    User,
    Environment,
}

/// Constraints handed to the media backend for one attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub device_id: Option<String>,
    pub facing: Option<Facing>,
    pub resolution: Option<(u32, u32)>,
}

impl CaptureConstraints {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn is_unconstrained(&self) -> bool {
        self.device_id.is_none() && self.facing.is_none() && self.resolution.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityAttempt {
    pub name: String,
    pub constraints: CaptureConstraints,
}

impl CapabilityAttempt {
    fn new(name: &str, constraints: CaptureConstraints) -> Self {
        Self {
            name: name.to_string(),
            constraints,
        }
    }
}

pub const ANY_CAMERA: &str = "any-camera";
pub const FACING_USER: &str = "facing-user";
pub const PREFERRED_RESOLUTION: &str = "preferred-resolution";
pub const SELECTED_DEVICE: &str = "selected-device";

/// Attempts in priority order. `selected-device` is only tried when a device
/// was chosen.
pub fn attempt_plan(
    preferred_resolution: (u32, u32),
    selected_device: Option<&str>,
) -> Vec<CapabilityAttempt> {
    let mut plan = vec![
        CapabilityAttempt::new(ANY_CAMERA, CaptureConstraints::any()),
        CapabilityAttempt::new(
            FACING_USER,
            CaptureConstraints {
                facing: Some(Facing::User),
                ..CaptureConstraints::default()
            },
        ),
        CapabilityAttempt::new(
            PREFERRED_RESOLUTION,
            CaptureConstraints {
                resolution: Some(preferred_resolution),
                ..CaptureConstraints::default()
            },
        ),
    ];

    if let Some(device) = selected_device {
        plan.push(CapabilityAttempt::new(
            SELECTED_DEVICE,
            CaptureConstraints {
                device_id: Some(device.to_string()),
                resolution: Some(preferred_resolution),
                ..CaptureConstraints::default()
            },
        ));
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_order() {
        let names: Vec<_> = attempt_plan((1280, 720), None)
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec![ANY_CAMERA, FACING_USER, PREFERRED_RESOLUTION]);
    }

    #[test]
    fn test_selected_device_is_last() {
        let plan = attempt_plan((640, 480), Some("2"));
        assert_eq!(plan.len(), 4);
        assert!(plan[0].constraints.is_unconstrained());
        let last = plan.last().unwrap();
        assert_eq!(last.name, SELECTED_DEVICE);
        assert_eq!(last.constraints.device_id.as_deref(), Some("2"));
    }
}
