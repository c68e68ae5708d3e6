//! The `pickplace.toml` file model.
//!
//! Every section and field is optional; a missing file is the default
//! configuration. Layering is file, then environment (`PICKPLACE_CONFIG`
//! selects the file), then CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [monitor]
//! diff_tol = 1e-5
//! timeout_secs = 0.5
//! feedback_deadline_secs = 30.0
//!
//! [stages.object_place]
//! error_tol = 1e-4
//! stiffness = [100.0, 1000.0, 1000.0, 100.0, 100.0, 100.0]
//!
//! [stages.grasp_approach]
//! monitor = "all"
//! visualize = "all"
//!
//! [cell]
//! dynamics_gain = 1.5
//! transfer_config = [0.0, -1.57, 2.42, -1.0, 0.0, 0.52, 0.0]
//!
//! [[cell.zones]]
//! place_frame = "world"
//! # ...
//!
//! [gripper]
//! initial_aperture = 0.3
//! release_aperture = 0.2
//! max_grasp_attempts = 5
//!
//! [persistent]
//! bundle = "task_definitions"
//! visualize_from = 7
//! visualize_count = 6
//!
//! [sim]
//! rate_hz = 50.0
//! speedup = 4.0
//! grasp_failures = 1
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use anyhow::{Context, Result, anyhow};
use pickplace_common::{GraspRequest, Stiffness};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::geometry::{CellGeometry, GraspInterval, PlaceZone};
use crate::logging::LogFormat;
use crate::sequencer::{MonitorPolicy, SequencerSettings, StageKind, StagePlan, VisualizePolicy};
use crate::sim::{MIN_TICK, SimDriversSettings, SimSettings};

/// Thresholds shared by every stage unless overridden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_diff_tol")]
    pub diff_tol: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    /// Abort a stage with no outcome after this many seconds. Unset waits forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_deadline_secs: Option<f64>,
}

fn default_diff_tol() -> f64 {
    1e-5
}

fn default_timeout_secs() -> f64 {
    0.5
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            diff_tol: default_diff_tol(),
            timeout_secs: default_timeout_secs(),
            feedback_deadline_secs: None,
        }
    }
}

/// Per-stage overrides, keyed by stage name in `[stages.<name>]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_tol: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_tol: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stiffness: Option<Stiffness>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualize: Option<VisualizePolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSection {
    #[serde(default = "default_sensing_config")]
    pub sensing_config: Vec<f64>,
    #[serde(default = "default_transfer_config")]
    pub transfer_config: Vec<f64>,
    #[serde(default = "default_joint_frames")]
    pub joint_frames: Vec<String>,
    #[serde(default = "default_dynamics_gain")]
    pub dynamics_gain: f64,
    #[serde(default = "default_alignment_angle")]
    pub alignment_angle: f64,
    #[serde(default = "default_safety_height")]
    pub safety_height: f64,
    #[serde(default = "default_extract_height")]
    pub extract_height: f64,
    /// Grasp interval used until perception reports one.
    #[serde(default)]
    pub grasp: GraspInterval,
    #[serde(default = "default_zones")]
    pub zones: Vec<PlaceZone>,
}

fn default_sensing_config() -> Vec<f64> {
    CellGeometry::default().sensing_config
}

fn default_transfer_config() -> Vec<f64> {
    CellGeometry::default().transfer_config
}

fn default_joint_frames() -> Vec<String> {
    CellGeometry::default().joint_frames
}

fn default_dynamics_gain() -> f64 {
    CellGeometry::default().dynamics_gain
}

fn default_alignment_angle() -> f64 {
    CellGeometry::default().alignment_angle
}

fn default_safety_height() -> f64 {
    CellGeometry::default().safety_height
}

fn default_extract_height() -> f64 {
    CellGeometry::default().extract_height
}

fn default_zones() -> Vec<PlaceZone> {
    vec![PlaceZone::default()]
}

impl Default for CellSection {
    fn default() -> Self {
        let geometry = CellGeometry::default();
        Self {
            sensing_config: geometry.sensing_config,
            transfer_config: geometry.transfer_config,
            joint_frames: geometry.joint_frames,
            dynamics_gain: geometry.dynamics_gain,
            alignment_angle: geometry.alignment_angle,
            safety_height: geometry.safety_height,
            extract_height: geometry.extract_height,
            grasp: GraspInterval::default(),
            zones: default_zones(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GripperSection {
    #[serde(default = "default_initial_aperture")]
    pub initial_aperture: f64,
    #[serde(default = "default_release_aperture")]
    pub release_aperture: f64,
    #[serde(default = "default_grasp_stiffness")]
    pub grasp_stiffness: Stiffness,
    /// Unset retries the grasp until it succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_grasp_attempts: Option<u32>,
    #[serde(default)]
    pub request: GraspRequest,
}

fn default_initial_aperture() -> f64 {
    SequencerSettings::default().initial_aperture
}

fn default_release_aperture() -> f64 {
    SequencerSettings::default().release_aperture
}

fn default_grasp_stiffness() -> Stiffness {
    SequencerSettings::default().grasp_stiffness
}

impl Default for GripperSection {
    fn default() -> Self {
        Self {
            initial_aperture: default_initial_aperture(),
            release_aperture: default_release_aperture(),
            grasp_stiffness: default_grasp_stiffness(),
            max_grasp_attempts: None,
            request: GraspRequest::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentSection {
    #[serde(default = "default_bundle")]
    pub bundle: String,
    #[serde(default = "default_visualize_from")]
    pub visualize_from: usize,
    #[serde(default = "default_visualize_count")]
    pub visualize_count: usize,
}

fn default_bundle() -> String {
    "task_definitions".to_string()
}

fn default_visualize_from() -> usize {
    7
}

fn default_visualize_count() -> usize {
    6
}

impl Default for PersistentSection {
    fn default() -> Self {
        Self {
            bundle: default_bundle(),
            visualize_from: default_visualize_from(),
            visualize_count: default_visualize_count(),
        }
    }
}

/// Simulator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimSection {
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f64,
    #[serde(default = "default_speedup")]
    pub speedup: f64,
    #[serde(default = "default_initial_residual")]
    pub initial_residual: f64,
    #[serde(default)]
    pub residual_floor: f64,
    #[serde(default = "default_persistent_count")]
    pub persistent_count: usize,
    /// Reject the N-th task submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_submission: Option<u32>,
    /// Number of grasp attempts that fail before one succeeds.
    #[serde(default)]
    pub grasp_failures: u32,
    #[serde(default = "default_sense_available")]
    pub sense_available: bool,
}

fn default_rate_hz() -> f64 {
    SimSettings::default().rate_hz
}

fn default_speedup() -> f64 {
    SimSettings::default().speedup
}

fn default_initial_residual() -> f64 {
    SimSettings::default().initial_residual
}

fn default_persistent_count() -> usize {
    SimSettings::default().persistent_count
}

fn default_sense_available() -> bool {
    true
}

impl Default for SimSection {
    fn default() -> Self {
        Self {
            rate_hz: default_rate_hz(),
            speedup: default_speedup(),
            initial_residual: default_initial_residual(),
            residual_floor: 0.0,
            persistent_count: default_persistent_count(),
            reject_submission: None,
            grasp_failures: 0,
            sense_available: default_sense_available(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Also write logs to this file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// The complete pickplace.toml configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PickPlaceToml {
    #[serde(default)]
    pub monitor: MonitorSection,
    /// Stage overrides keyed by stage name
    #[serde(default)]
    pub stages: BTreeMap<String, StageOverride>,
    #[serde(default)]
    pub cell: CellSection,
    #[serde(default)]
    pub gripper: GripperSection,
    #[serde(default)]
    pub persistent: PersistentSection,
    #[serde(default)]
    pub sim: SimSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

fn secs(value: f64, what: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| anyhow!("Invalid {} {}: {}", what, value, e))
}

impl PickPlaceToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse pickplace.toml")
    }

    /// Load `path`, or the defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize pickplace.toml")
    }

    /// The built-in stage plan with the monitor defaults and stage overrides applied.
    pub fn stage_plan(&self) -> Result<StagePlan> {
        let mut plan = StagePlan::default();
        let timeout = secs(self.monitor.timeout_secs, "monitor.timeout_secs")?;

        for kind in StageKind::ALL {
            let spec = plan.spec_mut(kind);
            spec.tolerances.diff_tol = self.monitor.diff_tol;
            spec.tolerances.timeout = timeout;

            let Some(overrides) = self.stages.get(kind.name()) else {
                continue;
            };
            if let Some(error_tol) = overrides.error_tol {
                spec.tolerances.error_tol = error_tol;
            }
            if let Some(diff_tol) = overrides.diff_tol {
                spec.tolerances.diff_tol = diff_tol;
            }
            if let Some(timeout_secs) = overrides.timeout_secs {
                spec.tolerances.timeout =
                    secs(timeout_secs, &format!("stages.{}.timeout_secs", kind))?;
            }
            if let Some(stiffness) = overrides.stiffness {
                spec.stiffness = Some(stiffness);
            }
            if let Some(monitor) = overrides.monitor {
                spec.monitor = monitor;
            }
            if let Some(visualize) = overrides.visualize {
                spec.visualize = visualize;
            }
        }

        Ok(plan)
    }

    pub fn sequencer_settings(&self) -> Result<SequencerSettings> {
        let feedback_deadline = self
            .monitor
            .feedback_deadline_secs
            .map(|s| secs(s, "monitor.feedback_deadline_secs"))
            .transpose()?;

        Ok(SequencerSettings {
            feedback_deadline,
            max_grasp_attempts: self.gripper.max_grasp_attempts,
            initial_aperture: self.gripper.initial_aperture,
            release_aperture: self.gripper.release_aperture,
            grasp_stiffness: self.gripper.grasp_stiffness,
            grasp_request: self.gripper.request.clone(),
            persistent_bundle: self.persistent.bundle.clone(),
            visualize_from: self.persistent.visualize_from,
            visualize_count: self.persistent.visualize_count,
        })
    }

    pub fn cell_geometry(&self) -> CellGeometry {
        CellGeometry {
            sensing_config: self.cell.sensing_config.clone(),
            transfer_config: self.cell.transfer_config.clone(),
            joint_frames: self.cell.joint_frames.clone(),
            dynamics_gain: self.cell.dynamics_gain,
            alignment_angle: self.cell.alignment_angle,
            safety_height: self.cell.safety_height,
            extract_height: self.cell.extract_height,
        }
    }

    pub fn sim_settings(&self) -> SimSettings {
        SimSettings {
            rate_hz: self.sim.rate_hz,
            speedup: self.sim.speedup,
            initial_residual: self.sim.initial_residual,
            residual_floor: self.sim.residual_floor,
            persistent_count: self.sim.persistent_count,
            reject_submission: self.sim.reject_submission,
        }
    }

    /// Simulated drivers that report the configured grasp interval.
    pub fn sim_drivers_settings(&self) -> SimDriversSettings {
        SimDriversSettings {
            grasp_failures: self.sim.grasp_failures,
            sense_available: self.sim.sense_available,
            interval: self.cell.grasp.clone(),
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.monitor.diff_tol < 0.0 {
            warnings.push(format!(
                "monitor.diff_tol is negative ({})",
                self.monitor.diff_tol
            ));
        }
        if self.monitor.timeout_secs < 0.0 {
            warnings.push(format!(
                "monitor.timeout_secs is negative ({})",
                self.monitor.timeout_secs
            ));
        }
        if let Some(deadline) = self.monitor.feedback_deadline_secs
            && deadline <= 0.0
        {
            warnings.push(format!(
                "monitor.feedback_deadline_secs must be positive ({})",
                deadline
            ));
        }

        for (name, overrides) in &self.stages {
            if StageKind::from_name(name).is_none() {
                let known: Vec<&str> = StageKind::ALL.iter().map(|k| k.name()).collect();
                warnings.push(format!(
                    "Unknown stage '{}' in [stages]; expected one of: {}",
                    name,
                    known.join(", ")
                ));
            }
            for (field, value) in [
                ("error_tol", overrides.error_tol),
                ("diff_tol", overrides.diff_tol),
                ("timeout_secs", overrides.timeout_secs),
            ] {
                if let Some(value) = value
                    && value < 0.0
                {
                    warnings.push(format!("stages.{}.{} is negative ({})", name, field, value));
                }
            }
        }

        if let Ok(plan) = self.stage_plan() {
            for spec in plan.iter() {
                let tol = spec.tolerances;
                if tol.diff_tol >= tol.error_tol && tol.error_tol > 0.0 {
                    warnings.push(format!(
                        "{}: diff_tol ({}) should be much smaller than error_tol ({})",
                        spec.kind, tol.diff_tol, tol.error_tol
                    ));
                }
            }
        }

        let joints = self.cell.joint_frames.len();
        for (what, config) in [
            ("cell.sensing_config", &self.cell.sensing_config),
            ("cell.transfer_config", &self.cell.transfer_config),
        ] {
            if config.len() != joints {
                warnings.push(format!(
                    "{} has {} values but {} joint frames are configured",
                    what,
                    config.len(),
                    joints
                ));
            }
        }
        if self.cell.zones.is_empty() {
            warnings.push("cell.zones is empty; nothing will be placed".to_string());
        }
        for (i, zone) in self.cell.zones.iter().enumerate() {
            if zone.joints.len() != joints {
                warnings.push(format!(
                    "cell.zones[{}].joints has {} values but {} joint frames are configured",
                    i,
                    zone.joints.len(),
                    joints
                ));
            }
        }

        if self.gripper.max_grasp_attempts == Some(0) {
            warnings.push("gripper.max_grasp_attempts = 0 behaves like 1".to_string());
        }

        let rate = self.sim.rate_hz;
        if !(rate.is_finite() && rate > 0.0) {
            warnings.push(format!("sim.rate_hz must be positive and finite ({})", rate));
        } else if rate > 1.0 / MIN_TICK.as_secs_f64() {
            warnings.push(format!(
                "sim.rate_hz = {} is above {} Hz; ticks are capped at {:?}",
                rate,
                1.0 / MIN_TICK.as_secs_f64(),
                MIN_TICK
            ));
        }
        if self.sim.speedup <= 0.0 {
            warnings.push(format!("sim.speedup must be positive ({})", self.sim.speedup));
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_file_is_default() {
        let config = PickPlaceToml::parse("").unwrap();
        assert_eq!(config, PickPlaceToml::default());
        assert!(config.validate().is_empty(), "{:?}", config.validate());
    }

    #[test]
    fn test_default_plan_matches_built_in_plan() {
        let plan = PickPlaceToml::default().stage_plan().unwrap();
        assert_eq!(plan, StagePlan::default());
    }

    #[test]
    fn test_stage_overrides_apply() {
        let config = PickPlaceToml::parse(
            r#"
            [monitor]
            diff_tol = 1e-6
            timeout_secs = 2.0

            [stages.object_place]
            error_tol = 5e-4
            timeout_secs = 1.0
            stiffness = [10.0, 20.0, 30.0, 1.0, 2.0, 3.0]
            monitor = "last"
            "#,
        )
        .unwrap();
        let plan = config.stage_plan().unwrap();

        let place = plan.spec(StageKind::ObjectPlace);
        assert_eq!(place.tolerances.error_tol, 5e-4);
        assert_eq!(place.tolerances.diff_tol, 1e-6);
        assert_eq!(place.tolerances.timeout, Duration::from_secs(1));
        assert_eq!(
            place.stiffness,
            Some(Stiffness::new(10.0, 20.0, 30.0, 1.0, 2.0, 3.0))
        );
        assert_eq!(place.monitor, MonitorPolicy::Last);

        let extract = plan.spec(StageKind::ObjectExtract);
        assert_eq!(extract.tolerances.error_tol, 1e-2);
        assert_eq!(extract.tolerances.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_negative_timeout_is_an_error() {
        let config = PickPlaceToml::parse("[monitor]\ntimeout_secs = -1.0\n").unwrap();
        assert!(config.stage_plan().is_err());
        assert!(
            config
                .validate()
                .iter()
                .any(|w| w.contains("timeout_secs"))
        );
    }

    #[test]
    fn test_validate_flags_problems() {
        let config = PickPlaceToml::parse(
            r#"
            [stages.nap]
            error_tol = 0.1

            [stages.grasp_approach]
            error_tol = 1e-6

            [cell]
            transfer_config = [0.0, 1.0]

            [sim]
            rate_hz = 0.0
            "#,
        )
        .unwrap();
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("Unknown stage 'nap'")));
        assert!(warnings.iter().any(|w| w.starts_with("grasp_approach: diff_tol")));
        assert!(warnings.iter().any(|w| w.contains("cell.transfer_config")));
        assert!(warnings.iter().any(|w| w.contains("sim.rate_hz")));
    }

    #[test]
    fn test_validate_flags_unbounded_rate() {
        let infinite = PickPlaceToml::parse("[sim]\nrate_hz = inf\n").unwrap();
        assert!(
            infinite
                .validate()
                .iter()
                .any(|w| w.contains("sim.rate_hz must be positive and finite"))
        );

        let huge = PickPlaceToml::parse("[sim]\nrate_hz = 1e12\n").unwrap();
        assert!(
            huge.validate()
                .iter()
                .any(|w| w.contains("sim.rate_hz") && w.contains("capped at 1ms"))
        );

        let fine = PickPlaceToml::parse("[sim]\nrate_hz = 1000.0\n").unwrap();
        assert!(!fine.validate().iter().any(|w| w.contains("sim.rate_hz")));
    }

    #[test]
    fn test_sequencer_settings_from_file() {
        let config = PickPlaceToml::parse(
            r#"
            [monitor]
            feedback_deadline_secs = 12.5

            [gripper]
            max_grasp_attempts = 4
            release_aperture = 0.25

            [gripper.request]
            current_threshold_final = 40.0

            [persistent]
            bundle = "cell_limits"
            "#,
        )
        .unwrap();
        let settings = config.sequencer_settings().unwrap();
        assert_eq!(settings.feedback_deadline, Some(Duration::from_secs_f64(12.5)));
        assert_eq!(settings.max_grasp_attempts, Some(4));
        assert_eq!(settings.release_aperture, 0.25);
        assert_eq!(settings.initial_aperture, 0.3);
        assert_eq!(settings.grasp_request.current_threshold_final, 40.0);
        assert_eq!(settings.grasp_request.current_threshold_contact, 20.0);
        assert_eq!(settings.persistent_bundle, "cell_limits");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pickplace.toml");

        let mut config = PickPlaceToml::default();
        config.sim.grasp_failures = 2;
        config.stages.insert(
            "object_place".to_string(),
            StageOverride {
                error_tol: Some(2e-4),
                ..StageOverride::default()
            },
        );
        config.cell.zones.push(PlaceZone {
            p: [0.75, 0.3, 0.16],
            ..PlaceZone::default()
        });
        config.save(&path).unwrap();

        let loaded = PickPlaceToml::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = PickPlaceToml::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, PickPlaceToml::default());
    }
}
