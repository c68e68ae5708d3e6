use async_trait::async_trait;
use pickplace_common::{GraspRequest, SensedGeometry, Stiffness};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

use crate::errors::ServiceError;
use crate::geometry::GraspInterval;
use crate::service::CellDrivers;

#[derive(Debug, Clone, PartialEq)]
pub struct SimDriversSettings {
    /// The first N grasp attempts report the object not acquired.
    pub grasp_failures: u32,
    /// When false, perception is unreachable.
    pub sense_available: bool,
    /// Interval perception reports.
    pub interval: GraspInterval,
}

impl Default for SimDriversSettings {
    fn default() -> Self {
        Self {
            grasp_failures: 0,
            sense_available: true,
            interval: GraspInterval::default(),
        }
    }
}

/// Simulated arm, gripper, perception and truck drivers. Every call succeeds
/// unless configured otherwise.
#[derive(Debug, Default)]
pub struct SimDrivers {
    settings: SimDriversSettings,
    grasp_attempts: AtomicU32,
    truck_moves: AtomicU32,
    apertures: Mutex<Vec<f64>>,
    stiffness: Mutex<Vec<Stiffness>>,
}

impl SimDrivers {
    pub fn new(settings: SimDriversSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn grasp_attempts(&self) -> u32 {
        self.grasp_attempts.load(Ordering::Relaxed)
    }

    pub fn truck_moves(&self) -> u32 {
        self.truck_moves.load(Ordering::Relaxed)
    }

    /// Every gripper aperture commanded, in order.
    pub fn apertures(&self) -> Vec<f64> {
        self.apertures
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    /// Every stiffness applied, in order.
    pub fn stiffness_history(&self) -> Vec<Stiffness> {
        self.stiffness
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CellDrivers for SimDrivers {
    async fn set_stiffness(&self, stiffness: Stiffness) -> Result<(), ServiceError> {
        debug!(%stiffness, "sim stiffness");
        if let Ok(mut history) = self.stiffness.lock() {
            history.push(stiffness);
        }
        Ok(())
    }

    async fn sense_grasp(&self) -> Result<SensedGeometry, ServiceError> {
        if !self.settings.sense_available {
            return Err(ServiceError::Unreachable {
                call: "sense_grasp",
                message: "perception offline".to_string(),
            });
        }
        Ok(self.settings.interval.to_sensed())
    }

    async fn gripper_to(&self, aperture: f64) -> Result<(), ServiceError> {
        if let Ok(mut apertures) = self.apertures.lock() {
            apertures.push(aperture);
        }
        Ok(())
    }

    async fn gripper_grasp(&self, request: &GraspRequest) -> Result<bool, ServiceError> {
        let attempt = self.grasp_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let acquired = attempt > self.settings.grasp_failures;
        debug!(
            attempt,
            acquired,
            threshold = request.current_threshold_final,
            "sim grasp"
        );
        Ok(acquired)
    }

    async fn advance_truck(&self) -> Result<(), ServiceError> {
        self.truck_moves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_grasp_fails_configured_times() {
        let drivers = SimDrivers::new(SimDriversSettings {
            grasp_failures: 2,
            ..SimDriversSettings::default()
        });
        let request = GraspRequest::default();
        assert!(!drivers.gripper_grasp(&request).await.unwrap());
        assert!(!drivers.gripper_grasp(&request).await.unwrap());
        assert!(drivers.gripper_grasp(&request).await.unwrap());
        assert_eq!(drivers.grasp_attempts(), 3);
    }

    #[tokio::test]
    async fn test_sense_grasp_reports_interval() {
        let drivers = SimDrivers::default();
        let sensed = drivers.sense_grasp().await.unwrap();
        let parsed = GraspInterval::from_sensed(&sensed, &GraspInterval::default()).unwrap();
        assert_eq!(parsed, GraspInterval::default());
    }

    #[tokio::test]
    async fn test_perception_offline() {
        let drivers = SimDrivers::new(SimDriversSettings {
            sense_available: false,
            ..SimDriversSettings::default()
        });
        let err = drivers.sense_grasp().await.unwrap_err();
        assert_eq!(err.call(), "sense_grasp");
    }
}
