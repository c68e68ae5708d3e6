//! Geometric primitives attached to task links.
//!
//! Each primitive travels as a type tag plus a flat numeric payload. The
//! payload layout per tag:
//!
//! | Tag              | Len | Layout                         |
//! |------------------|-----|--------------------------------|
//! | `Point`          | 3   | position                       |
//! | `Line`           | 6   | point, direction               |
//! | `Plane`          | 4   | normal, offset                 |
//! | `Sphere`         | 4   | center, radius                 |
//! | `Cylinder`       | 7   | axis point, axis direction, radius |
//! | `Cone`           | 7   | apex, axis direction, half angle |
//! | `JointPosition`  | 1   | joint value                    |

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Vec3 = [f64; 3];

/// Errors decoding a tagged payload into a [`Geometry`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("{tag} payload must have {expected} values, got {actual}")]
    PayloadLength {
        tag: GeometryTag,
        expected: usize,
        actual: usize,
    },

    #[error("expected {expected} primitive, found {actual}")]
    UnexpectedTag {
        expected: GeometryTag,
        actual: GeometryTag,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryTag {
    Point,
    Line,
    Plane,
    Sphere,
    Cylinder,
    Cone,
    JointPosition,
}

impl GeometryTag {
    /// Number of scalars the payload of this primitive carries.
    pub fn payload_len(self) -> usize {
        match self {
            GeometryTag::Point => 3,
            GeometryTag::Line => 6,
            GeometryTag::Plane => 4,
            GeometryTag::Sphere => 4,
            GeometryTag::Cylinder => 7,
            GeometryTag::Cone => 7,
            GeometryTag::JointPosition => 1,
        }
    }
}

impl fmt::Display for GeometryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GeometryTag::Point => "point",
            GeometryTag::Line => "line",
            GeometryTag::Plane => "plane",
            GeometryTag::Sphere => "sphere",
            GeometryTag::Cylinder => "cylinder",
            GeometryTag::Cone => "cone",
            GeometryTag::JointPosition => "joint_position",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    Point { position: Vec3 },
    Line { point: Vec3, direction: Vec3 },
    Plane { normal: Vec3, offset: f64 },
    Sphere { center: Vec3, radius: f64 },
    Cylinder { point: Vec3, axis: Vec3, radius: f64 },
    Cone { apex: Vec3, axis: Vec3, half_angle: f64 },
    JointPosition { value: f64 },
}

impl Geometry {
    pub fn tag(&self) -> GeometryTag {
        match self {
            Geometry::Point { .. } => GeometryTag::Point,
            Geometry::Line { .. } => GeometryTag::Line,
            Geometry::Plane { .. } => GeometryTag::Plane,
            Geometry::Sphere { .. } => GeometryTag::Sphere,
            Geometry::Cylinder { .. } => GeometryTag::Cylinder,
            Geometry::Cone { .. } => GeometryTag::Cone,
            Geometry::JointPosition { .. } => GeometryTag::JointPosition,
        }
    }

    /// Flatten into the wire payload.
    pub fn payload(&self) -> Vec<f64> {
        match *self {
            Geometry::Point { position } => position.to_vec(),
            Geometry::Line { point, direction } => concat3(point, direction, &[]),
            Geometry::Plane { normal, offset } => concat3(normal, [], &[offset]),
            Geometry::Sphere { center, radius } => concat3(center, [], &[radius]),
            Geometry::Cylinder {
                point,
                axis,
                radius,
            } => concat3(point, axis, &[radius]),
            Geometry::Cone {
                apex,
                axis,
                half_angle,
            } => concat3(apex, axis, &[half_angle]),
            Geometry::JointPosition { value } => vec![value],
        }
    }

    /// Rebuild a primitive from its wire form.
    pub fn from_payload(tag: GeometryTag, payload: &[f64]) -> Result<Self, GeometryError> {
        let expected = tag.payload_len();
        if payload.len() != expected {
            return Err(GeometryError::PayloadLength {
                tag,
                expected,
                actual: payload.len(),
            });
        }
        let v = |i: usize| [payload[i], payload[i + 1], payload[i + 2]];
        Ok(match tag {
            GeometryTag::Point => Geometry::Point { position: v(0) },
            GeometryTag::Line => Geometry::Line {
                point: v(0),
                direction: v(3),
            },
            GeometryTag::Plane => Geometry::Plane {
                normal: v(0),
                offset: payload[3],
            },
            GeometryTag::Sphere => Geometry::Sphere {
                center: v(0),
                radius: payload[3],
            },
            GeometryTag::Cylinder => Geometry::Cylinder {
                point: v(0),
                axis: v(3),
                radius: payload[6],
            },
            GeometryTag::Cone => Geometry::Cone {
                apex: v(0),
                axis: v(3),
                half_angle: payload[6],
            },
            GeometryTag::JointPosition => Geometry::JointPosition { value: payload[0] },
        })
    }
}

fn concat3<const N: usize>(a: Vec3, b: [f64; N], tail: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(3 + N + tail.len());
    out.extend_from_slice(&a);
    out.extend_from_slice(&b);
    out.extend_from_slice(tail);
    out
}

pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn scale(a: Vec3, k: f64) -> Vec3 {
    [a[0] * k, a[1] * k, a[2] * k]
}

pub fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}
