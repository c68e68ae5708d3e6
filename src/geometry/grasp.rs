use pickplace_common::geometry::{Vec3, dot, scale};
use pickplace_common::{Geometry, GeometryError, GeometryTag, SensedGeometry, SensedPrimitive};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors turning sensed geometry into a grasp interval.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraspIntervalError {
    #[error("expected 4 grasp primitives, got {0}")]
    PrimitiveCount(usize),

    #[error("grasp primitive {index}: {source}")]
    Primitive {
        index: usize,
        #[source]
        source: GeometryError,
    },

    #[error("grasp planes do not bound a closed interval (normal dot product {0})")]
    OpenInterval(f64),
}

/// Region the end-effector must reach to grasp the object: between two
/// planes and between two coaxial cylinders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraspInterval {
    /// Frame the interval is expressed in.
    pub obj_frame: String,
    /// End-effector frame.
    pub e_frame: String,
    /// End-effector point, in `e_frame`.
    pub e: Vec3,
    /// Cylinder axis direction.
    pub v: Vec3,
    /// Reference point on the cylinder axis.
    pub p: Vec3,
    /// Inner and outer cylinder radii.
    pub r1: f64,
    pub r2: f64,
    /// Bottom plane.
    pub n1: Vec3,
    pub d1: f64,
    /// Top plane.
    pub n2: Vec3,
    pub d2: f64,
}

impl Default for GraspInterval {
    fn default() -> Self {
        let v = [0.0, 0.0, 1.0];
        Self {
            obj_frame: "world".to_string(),
            e_frame: "velvet_fingers_palm".to_string(),
            e: [0.0; 3],
            v,
            p: [0.9, -0.9, 0.16],
            r1: 0.05,
            r2: 0.15,
            n1: v,
            d1: 0.2,
            n2: scale(v, -1.0),
            d2: -0.35,
        }
    }
}

impl GraspInterval {
    /// Build an interval from the four sensed primitives: bottom plane, top
    /// plane, inner cylinder, outer cylinder. End-effector settings are kept
    /// from `previous`.
    pub fn from_sensed(
        sensed: &SensedGeometry,
        previous: &GraspInterval,
    ) -> Result<Self, GraspIntervalError> {
        if sensed.primitives.len() != 4 {
            return Err(GraspIntervalError::PrimitiveCount(sensed.primitives.len()));
        }
        let g = sensed
            .primitives
            .iter()
            .enumerate()
            .map(|(index, primitive)| {
                primitive
                    .decode()
                    .map_err(|source| GraspIntervalError::Primitive { index, source })
            })
            .collect::<Result<Vec<Geometry>, _>>()?;
        let g = g.as_slice();

        let (n1, d1) = expect_plane(g, 0)?;
        let (n2, d2) = expect_plane(g, 1)?;
        let (p, v, r1) = expect_cylinder(g, 2)?;
        let (_, _, r2) = expect_cylinder(g, 3)?;

        let alignment = dot(n1, n2);
        if alignment > 0.0 {
            return Err(GraspIntervalError::OpenInterval(alignment));
        }

        Ok(Self {
            obj_frame: sensed.reference_frame.clone(),
            e_frame: previous.e_frame.clone(),
            e: previous.e,
            v,
            p,
            r1,
            r2,
            n1,
            d1,
            n2,
            d2,
        })
    }

    /// The four primitives perception reports for this interval.
    pub fn to_sensed(&self) -> SensedGeometry {
        SensedGeometry {
            reference_frame: self.obj_frame.clone(),
            primitives: [
                Geometry::Plane {
                    normal: self.n1,
                    offset: self.d1,
                },
                Geometry::Plane {
                    normal: self.n2,
                    offset: self.d2,
                },
                Geometry::Cylinder {
                    point: self.p,
                    axis: self.v,
                    radius: self.r1,
                },
                Geometry::Cylinder {
                    point: self.p,
                    axis: self.v,
                    radius: self.r2,
                },
            ]
            .into_iter()
            .map(SensedPrimitive::from)
            .collect(),
        }
    }
}

fn unexpected(index: usize, expected: GeometryTag, actual: &Geometry) -> GraspIntervalError {
    GraspIntervalError::Primitive {
        index,
        source: GeometryError::UnexpectedTag {
            expected,
            actual: actual.tag(),
        },
    }
}

fn expect_plane(g: &[Geometry], index: usize) -> Result<(Vec3, f64), GraspIntervalError> {
    match g[index] {
        Geometry::Plane { normal, offset } => Ok((normal, offset)),
        ref other => Err(unexpected(index, GeometryTag::Plane, other)),
    }
}

fn expect_cylinder(g: &[Geometry], index: usize) -> Result<(Vec3, Vec3, f64), GraspIntervalError> {
    match g[index] {
        Geometry::Cylinder {
            point,
            axis,
            radius,
        } => Ok((point, axis, radius)),
        ref other => Err(unexpected(index, GeometryTag::Cylinder, other)),
    }
}

/// A placement target for the grasped object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceZone {
    pub place_frame: String,
    pub e_frame: String,
    /// End-effector point, in `e_frame`.
    pub e: Vec3,
    /// Placement cylinder axis.
    pub v: Vec3,
    /// Placement cylinder reference point.
    pub p: Vec3,
    /// Placement cylinder radius.
    pub r: f64,
    /// Placement plane.
    pub n: Vec3,
    pub d: f64,
    /// Arm configuration above the zone, one value per joint.
    pub joints: Vec<f64>,
}

impl Default for PlaceZone {
    fn default() -> Self {
        Self {
            place_frame: "world".to_string(),
            e_frame: "velvet_fingers_palm".to_string(),
            e: [0.16, 0.0, 0.0],
            v: [0.0, 0.0, 1.0],
            p: [0.75, 0.0, 0.16],
            r: 0.02,
            n: [0.0, 0.0, 1.0],
            d: 0.26,
            joints: vec![2.11, 0.58, -1.00, -1.71, 0.58, 0.82, -2.20],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grasp_interval_is_closed() {
        let grasp = GraspInterval::default();
        assert!(dot(grasp.n1, grasp.n2) <= 0.0);
        assert_eq!(grasp.n2, [0.0, 0.0, -1.0]);
    }

    #[test]
    fn test_from_sensed_accepts_well_formed_geometry() {
        let mut sensed = GraspInterval::default().to_sensed();
        sensed.reference_frame = "camera".to_string();
        sensed.primitives[3].payload[6] = 0.12;

        let grasp = GraspInterval::from_sensed(&sensed, &GraspInterval::default()).unwrap();
        assert_eq!(grasp.obj_frame, "camera");
        assert_eq!(grasp.e_frame, "velvet_fingers_palm");
        assert_eq!(grasp.r1, 0.05);
        assert_eq!(grasp.r2, 0.12);
    }

    #[test]
    fn test_from_sensed_rejects_wrong_count() {
        let mut sensed = GraspInterval::default().to_sensed();
        sensed.primitives.pop();
        assert_eq!(
            GraspInterval::from_sensed(&sensed, &GraspInterval::default()),
            Err(GraspIntervalError::PrimitiveCount(3))
        );
    }

    #[test]
    fn test_from_sensed_rejects_wrong_primitive() {
        let mut sensed = GraspInterval::default().to_sensed();
        sensed.primitives[1] = Geometry::Point {
            position: [0.0; 3],
        }
        .into();
        let err = GraspInterval::from_sensed(&sensed, &GraspInterval::default()).unwrap_err();
        match err {
            GraspIntervalError::Primitive { index, source } => {
                assert_eq!(index, 1);
                assert_eq!(
                    source,
                    GeometryError::UnexpectedTag {
                        expected: GeometryTag::Plane,
                        actual: GeometryTag::Point
                    }
                );
            }
            other => panic!("Expected Primitive, got {:?}", other),
        }
    }

    #[test]
    fn test_from_sensed_rejects_short_payload() {
        let mut sensed = GraspInterval::default().to_sensed();
        sensed.primitives[2].payload.truncate(6);
        let err = GraspInterval::from_sensed(&sensed, &GraspInterval::default()).unwrap_err();
        assert_eq!(
            err,
            GraspIntervalError::Primitive {
                index: 2,
                source: GeometryError::PayloadLength {
                    tag: GeometryTag::Cylinder,
                    expected: 7,
                    actual: 6
                }
            }
        );
    }

    #[test]
    fn test_from_sensed_rejects_open_interval() {
        let mut sensed = GraspInterval::default().to_sensed();
        sensed.primitives[1] = Geometry::Plane {
            normal: [0.0, 0.0, 1.0],
            offset: 0.35,
        }
        .into();
        assert!(matches!(
            GraspInterval::from_sensed(&sensed, &GraspInterval::default()),
            Err(GraspIntervalError::OpenInterval(_))
        ));
    }

    #[test]
    fn test_default_place_zone_has_seven_joints() {
        assert_eq!(PlaceZone::default().joints.len(), 7);
    }
}
