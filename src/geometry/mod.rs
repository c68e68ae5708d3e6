//! Task geometry for each stage.
//!
//! The sequencer asks a [`TaskGeometry`] for the descriptors of a stage and
//! treats them as opaque. [`CellGeometry`] is the built-in task set for a
//! 7-joint arm with a palm-mounted gripper picking from a cylindrical grasp
//! interval and placing onto a plane.

pub mod grasp;

pub use grasp::{GraspInterval, GraspIntervalError, PlaceZone};

use pickplace_common::geometry::add;
use pickplace_common::{Geometry, TaskDescriptor, TaskKind, TaskLink};

use crate::sequencer::{StageContext, StageKind};

/// Builds the task descriptors submitted for a stage.
pub trait TaskGeometry: Send + Sync {
    fn tasks(&self, kind: StageKind, ctx: &StageContext<'_>) -> Vec<TaskDescriptor>;
}

const ORIGIN: [f64; 3] = [0.0; 3];
const X_AXIS: [f64; 3] = [1.0, 0.0, 0.0];
const Y_AXIS: [f64; 3] = [0.0, 1.0, 0.0];
const Z_AXIS: [f64; 3] = [0.0, 0.0, 1.0];

#[derive(Debug, Clone, PartialEq)]
pub struct CellGeometry {
    pub sensing_config: Vec<f64>,
    pub transfer_config: Vec<f64>,
    /// Link frames the joint setpoints apply to, base first.
    pub joint_frames: Vec<String>,
    pub dynamics_gain: f64,
    /// Cone half angle for axis alignment tasks, radians.
    pub alignment_angle: f64,
    /// Height of the plane the palm stays above during joint motions.
    pub safety_height: f64,
    /// Height the object is lifted to on extract.
    pub extract_height: f64,
}

impl Default for CellGeometry {
    fn default() -> Self {
        Self {
            sensing_config: vec![2.26, 1.6, 0.09, 1.69, -0.09, -1.69, -1.47],
            transfer_config: vec![0.0, -1.57, 2.42, -1.0, 0.0, 0.52, 0.0],
            joint_frames: (1..=7).map(|i| format!("lwr_{}_link", i)).collect(),
            dynamics_gain: 1.5,
            alignment_angle: 0.1,
            safety_height: 0.1,
            extract_height: 0.2,
        }
    }
}

impl TaskGeometry for CellGeometry {
    fn tasks(&self, kind: StageKind, ctx: &StageContext<'_>) -> Vec<TaskDescriptor> {
        match kind {
            StageKind::SensingConfiguration => self.joint_configuration(&self.sensing_config),
            StageKind::TransferConfiguration => self.joint_configuration(&self.transfer_config),
            StageKind::ObjectTransfer => match ctx.zone {
                Some(zone) => self.joint_configuration(&zone.joints),
                None => self.joint_configuration(&self.transfer_config),
            },
            StageKind::GraspApproach => self.grasp_approach(ctx.grasp),
            StageKind::ObjectExtract => self.object_extract(ctx.grasp),
            StageKind::ObjectPlace => match ctx.zone {
                Some(zone) => self.object_place(zone),
                None => Vec::new(),
            },
            StageKind::GripperExtract => match ctx.zone {
                Some(zone) => self.gripper_extract(zone),
                None => Vec::new(),
            },
        }
    }
}

impl CellGeometry {
    /// Keep the palm above the safety plane, then drive every joint to
    /// `joints`. The setpoint task is always last.
    pub fn joint_configuration(&self, joints: &[f64]) -> Vec<TaskDescriptor> {
        let g = self.dynamics_gain;
        let palm_above_plane =
            TaskDescriptor::new("palm_above_horizontal_plane", TaskKind::Projection, 2)
                .with_distances(0.0, 0.02)
                .with_gain(g * 3.0)
                .with_link(TaskLink::new(
                    "world",
                    vec![Geometry::Plane {
                        normal: Z_AXIS,
                        offset: self.safety_height,
                    }],
                ))
                .with_link(TaskLink::new(
                    "velvet_fingers_palm",
                    vec![Geometry::Sphere {
                        center: ORIGIN,
                        radius: 0.1,
                    }],
                ));

        let mut setpoints = TaskDescriptor::new("joint_setpoints", TaskKind::JointSetpoint, 3)
            .equality()
            .with_gain(g);
        for (frame, value) in self.joint_frames.iter().zip(joints) {
            setpoints = setpoints.with_link(TaskLink::new(
                frame.clone(),
                vec![Geometry::JointPosition { value: *value }],
            ));
        }

        vec![palm_above_plane, setpoints]
    }

    pub fn grasp_approach(&self, grasp: &GraspInterval) -> Vec<TaskDescriptor> {
        let g = self.dynamics_gain;
        let ee = || {
            TaskLink::new(
                grasp.e_frame.clone(),
                vec![Geometry::Point { position: grasp.e }],
            )
        };
        let obj = |geometry: Geometry| TaskLink::new(grasp.obj_frame.clone(), vec![geometry]);

        vec![
            TaskDescriptor::new("ee_above_bottom_plane", TaskKind::Projection, 2)
                .with_distances(0.0, 0.02)
                .with_gain(g / 5.0)
                .with_link(obj(Geometry::Plane {
                    normal: grasp.n1,
                    offset: grasp.d1,
                }))
                .with_link(ee()),
            TaskDescriptor::new("ee_below_top_plane", TaskKind::Projection, 2)
                .with_distances(0.0, 0.05)
                .with_gain(g)
                .with_link(obj(Geometry::Plane {
                    normal: grasp.n2,
                    offset: grasp.d2,
                }))
                .with_link(ee()),
            TaskDescriptor::new("ee_outside_inner_cylinder", TaskKind::Projection, 2)
                .with_distances(0.0, 0.05)
                .with_gain(g)
                .with_link(obj(Geometry::Cylinder {
                    point: grasp.p,
                    axis: grasp.v,
                    radius: grasp.r1,
                }))
                .with_link(ee()),
            TaskDescriptor::new("ee_inside_outer_cylinder", TaskKind::Projection, 2)
                .with_distances(0.0, 0.05)
                .with_gain(g)
                .with_link(ee())
                .with_link(obj(Geometry::Cylinder {
                    point: grasp.p,
                    axis: grasp.v,
                    radius: grasp.r2,
                })),
            TaskDescriptor::new("gripper_plane_contains_axis", TaskKind::Coplanar, 2)
                .with_distances(0.0, 0.05)
                .with_gain(g)
                .with_link(obj(Geometry::Line {
                    point: grasp.p,
                    direction: grasp.v,
                }))
                .with_link(TaskLink::new(
                    grasp.e_frame.clone(),
                    vec![Geometry::Plane {
                        normal: Y_AXIS,
                        offset: 0.0,
                    }],
                )),
            TaskDescriptor::new("gripper_vertical_axis_alignment", TaskKind::Parallel, 2)
                .with_gain(g)
                .with_link(obj(Geometry::Cone {
                    apex: ORIGIN,
                    axis: grasp.v,
                    half_angle: self.alignment_angle,
                }))
                .with_link(TaskLink::new(
                    grasp.e_frame.clone(),
                    vec![Geometry::Line {
                        point: ORIGIN,
                        direction: Z_AXIS,
                    }],
                )),
        ]
    }

    pub fn object_extract(&self, grasp: &GraspInterval) -> Vec<TaskDescriptor> {
        let g = self.dynamics_gain;
        let attack_point = add(grasp.p, [0.0, 0.0, self.extract_height]);

        vec![
            TaskDescriptor::new("ee_on_attack_point", TaskKind::Projection, 2)
                .equality()
                .with_gain(g)
                .with_link(TaskLink::new(
                    grasp.obj_frame.clone(),
                    vec![Geometry::Point {
                        position: attack_point,
                    }],
                ))
                .with_link(TaskLink::new(
                    grasp.e_frame.clone(),
                    vec![Geometry::Point { position: grasp.e }],
                )),
            TaskDescriptor::new("gripper_vertical_axis_alignment", TaskKind::Parallel, 2)
                .with_gain(g)
                .with_link(TaskLink::new(
                    grasp.obj_frame.clone(),
                    vec![Geometry::Cone {
                        apex: ORIGIN,
                        axis: Z_AXIS,
                        half_angle: self.alignment_angle / 4.0,
                    }],
                ))
                .with_link(TaskLink::new(
                    grasp.e_frame.clone(),
                    vec![Geometry::Line {
                        point: ORIGIN,
                        direction: Z_AXIS,
                    }],
                )),
        ]
    }

    pub fn object_place(&self, zone: &PlaceZone) -> Vec<TaskDescriptor> {
        let g = self.dynamics_gain;
        let ee = || {
            TaskLink::new(
                zone.e_frame.clone(),
                vec![Geometry::Point { position: zone.e }],
            )
        };

        vec![
            TaskDescriptor::new("ee_on_horizontal_plane", TaskKind::Projection, 2)
                .equality()
                .with_gain(g)
                .with_link(TaskLink::new(
                    zone.place_frame.clone(),
                    vec![Geometry::Plane {
                        normal: zone.n,
                        offset: zone.d,
                    }],
                ))
                .with_link(ee()),
            TaskDescriptor::new("ee_in_placement_cylinder", TaskKind::Projection, 2)
                .with_distances(0.0, 0.05)
                .with_gain(g / 5.0)
                .with_link(ee())
                .with_link(TaskLink::new(
                    "world",
                    vec![Geometry::Cylinder {
                        point: zone.p,
                        axis: zone.v,
                        radius: zone.r,
                    }],
                )),
            TaskDescriptor::new("gripper_approach_axis_alignment", TaskKind::Parallel, 2)
                .with_distances(0.0, 0.05)
                .with_gain(g / 6.0)
                .with_link(TaskLink::new(
                    zone.place_frame.clone(),
                    vec![Geometry::Cone {
                        apex: ORIGIN,
                        axis: [-0.707, 0.707, 0.0],
                        half_angle: self.alignment_angle * 10.0,
                    }],
                ))
                .with_link(TaskLink::new(
                    zone.e_frame.clone(),
                    vec![Geometry::Line {
                        point: ORIGIN,
                        direction: X_AXIS,
                    }],
                )),
            TaskDescriptor::new("gripper_vertical_axis_alignment", TaskKind::Parallel, 2)
                .with_gain(g * 2.0)
                .with_link(TaskLink::new(
                    zone.place_frame.clone(),
                    vec![Geometry::Cone {
                        apex: ORIGIN,
                        axis: Z_AXIS,
                        half_angle: 0.0,
                    }],
                ))
                .with_link(TaskLink::new(
                    zone.e_frame.clone(),
                    vec![Geometry::Line {
                        point: ORIGIN,
                        direction: Z_AXIS,
                    }],
                )),
        ]
    }

    pub fn gripper_extract(&self, zone: &PlaceZone) -> Vec<TaskDescriptor> {
        let g = self.dynamics_gain;
        let retreat = [zone.p[0], zone.p[1] - 0.15, 0.6];

        vec![
            TaskDescriptor::new("ee_on_retreat_point", TaskKind::Projection, 2)
                .equality()
                .with_gain(g * 1.5)
                .with_link(TaskLink::new(
                    zone.place_frame.clone(),
                    vec![Geometry::Point { position: retreat }],
                ))
                .with_link(TaskLink::new(
                    zone.e_frame.clone(),
                    vec![Geometry::Point { position: zone.e }],
                )),
            TaskDescriptor::new("gripper_approach_axis_alignment", TaskKind::Parallel, 2)
                .with_distances(0.0, 0.05)
                .with_gain(g / 6.0)
                .with_link(TaskLink::new(
                    zone.place_frame.clone(),
                    vec![Geometry::Cone {
                        apex: zone.p,
                        axis: Y_AXIS,
                        half_angle: self.alignment_angle * 10.0,
                    }],
                ))
                .with_link(TaskLink::new(
                    zone.e_frame.clone(),
                    vec![Geometry::Line {
                        point: ORIGIN,
                        direction: X_AXIS,
                    }],
                )),
            TaskDescriptor::new("gripper_vertical_axis_alignment", TaskKind::Parallel, 2)
                .with_gain(g)
                .with_link(TaskLink::new(
                    zone.place_frame.clone(),
                    vec![Geometry::Cone {
                        apex: ORIGIN,
                        axis: Z_AXIS,
                        half_angle: self.alignment_angle / 4.0,
                    }],
                ))
                .with_link(TaskLink::new(
                    zone.e_frame.clone(),
                    vec![Geometry::Line {
                        point: ORIGIN,
                        direction: Z_AXIS,
                    }],
                )),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(grasp: &'a GraspInterval, zone: Option<&'a PlaceZone>) -> StageContext<'a> {
        StageContext { grasp, zone }
    }

    #[test]
    fn test_joint_configuration_ends_with_setpoints() {
        let geometry = CellGeometry::default();
        let tasks = geometry.joint_configuration(&geometry.sensing_config);
        let last = tasks.last().unwrap();
        assert_eq!(last.kind, TaskKind::JointSetpoint);
        assert!(last.is_equality);
        assert_eq!(last.links.len(), 7);
        assert_eq!(last.links[0].frame, "lwr_1_link");
        assert_eq!(
            last.links[6].geometries,
            vec![Geometry::JointPosition { value: -1.47 }]
        );
    }

    #[test]
    fn test_every_stage_builds_tasks_with_a_zone() {
        let geometry = CellGeometry::default();
        let grasp = GraspInterval::default();
        let zone = PlaceZone::default();
        for kind in StageKind::ALL {
            let tasks = geometry.tasks(kind, &ctx(&grasp, Some(&zone)));
            assert!(!tasks.is_empty(), "{} produced no tasks", kind);
            for task in &tasks {
                assert!(task.links.len() >= 2, "{} / {}", kind, task.name);
            }
        }
    }

    #[test]
    fn test_object_transfer_uses_zone_joints() {
        let geometry = CellGeometry::default();
        let grasp = GraspInterval::default();
        let zone = PlaceZone {
            joints: vec![0.1; 7],
            ..PlaceZone::default()
        };
        let tasks = geometry.tasks(StageKind::ObjectTransfer, &ctx(&grasp, Some(&zone)));
        let setpoints = tasks.last().unwrap();
        for link in &setpoints.links {
            assert_eq!(link.geometries, vec![Geometry::JointPosition { value: 0.1 }]);
        }
    }

    #[test]
    fn test_grasp_approach_follows_interval() {
        let geometry = CellGeometry::default();
        let grasp = GraspInterval {
            obj_frame: "pallet".to_string(),
            r2: 0.3,
            ..GraspInterval::default()
        };
        let tasks = geometry.grasp_approach(&grasp);
        let outer = tasks
            .iter()
            .find(|t| t.name == "ee_inside_outer_cylinder")
            .unwrap();
        assert_eq!(outer.links[1].frame, "pallet");
        match outer.links[1].geometries[0] {
            Geometry::Cylinder { radius, .. } => assert_eq!(radius, 0.3),
            ref other => panic!("Expected cylinder, got {:?}", other),
        }
    }
}
