//! Request and response payloads for the cell drivers (arm, gripper, sensing).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::{Geometry, GeometryError, GeometryTag};

/// Cartesian stiffness of the arm: translational x, y, z then rotational a, b, c.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 6]", into = "[f64; 6]")]
pub struct Stiffness {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Stiffness {
    pub const fn new(x: f64, y: f64, z: f64, a: f64, b: f64, c: f64) -> Self {
        Self { x, y, z, a, b, c }
    }

    /// Stiff in every direction; used for free-space motion.
    pub const fn rigid() -> Self {
        Self::new(1000.0, 1000.0, 1000.0, 100.0, 100.0, 100.0)
    }

    pub fn as_array(&self) -> [f64; 6] {
        [self.x, self.y, self.z, self.a, self.b, self.c]
    }
}

impl Default for Stiffness {
    fn default() -> Self {
        Self::rigid()
    }
}

impl From<[f64; 6]> for Stiffness {
    fn from(v: [f64; 6]) -> Self {
        Self::new(v[0], v[1], v[2], v[3], v[4], v[5])
    }
}

impl From<Stiffness> for [f64; 6] {
    fn from(s: Stiffness) -> Self {
        s.as_array()
    }
}

impl fmt::Display for Stiffness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {}, {}, {})",
            self.x, self.y, self.z, self.a, self.b, self.c
        )
    }
}

/// Thresholds for a closed-loop grasp on the gripper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraspRequest {
    /// Motor current that marks first contact.
    #[serde(default = "default_current_threshold_contact")]
    pub current_threshold_contact: f64,
    /// Motor current that ends the grasp.
    #[serde(default = "default_current_threshold_final")]
    pub current_threshold_final: f64,
    #[serde(default = "default_max_belt_travel_mm")]
    pub max_belt_travel_mm: f64,
    #[serde(default = "default_phalange_delta_rad")]
    pub phalange_delta_rad: f64,
    /// Aperture below which the gripper counts as closed on nothing.
    #[serde(default = "default_gripper_closed_thresh")]
    pub gripper_closed_thresh: f64,
    #[serde(default = "default_check_phalanges")]
    pub check_phalanges: bool,
}

fn default_current_threshold_contact() -> f64 {
    20.0
}

fn default_current_threshold_final() -> f64 {
    35.0
}

fn default_max_belt_travel_mm() -> f64 {
    90.0
}

fn default_phalange_delta_rad() -> f64 {
    0.02
}

fn default_gripper_closed_thresh() -> f64 {
    1.5
}

fn default_check_phalanges() -> bool {
    true
}

impl Default for GraspRequest {
    fn default() -> Self {
        Self {
            current_threshold_contact: default_current_threshold_contact(),
            current_threshold_final: default_current_threshold_final(),
            max_belt_travel_mm: default_max_belt_travel_mm(),
            phalange_delta_rad: default_phalange_delta_rad(),
            gripper_closed_thresh: default_gripper_closed_thresh(),
            check_phalanges: default_check_phalanges(),
        }
    }
}

/// One primitive as perception reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensedPrimitive {
    pub tag: GeometryTag,
    pub payload: Vec<f64>,
}

impl SensedPrimitive {
    pub fn decode(&self) -> Result<Geometry, GeometryError> {
        Geometry::from_payload(self.tag, &self.payload)
    }
}

impl From<Geometry> for SensedPrimitive {
    fn from(geometry: Geometry) -> Self {
        Self {
            tag: geometry.tag(),
            payload: geometry.payload(),
        }
    }
}

/// Grasp geometry reported by the perception service, in wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensedGeometry {
    pub reference_frame: String,
    pub primitives: Vec<SensedPrimitive>,
}
