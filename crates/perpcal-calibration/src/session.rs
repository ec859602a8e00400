//! Shared probing context.

use perpcal_core::{CalibrationConfig, Position, Result, SafetyError};
use perpcal_communication::{MotionChannel, MotionController, Prober};

/// Name of the probe endstop pin.
pub const PROBE_PIN: &str = "z_min";

/// Controller, prober and configuration bundled for the probing sequences.
pub struct ProbeSession<'a, C: MotionChannel> {
    pub controller: &'a mut MotionController<C>,
    pub prober: Prober,
    pub config: &'a CalibrationConfig,
}

impl<'a, C: MotionChannel> ProbeSession<'a, C> {
    pub fn new(controller: &'a mut MotionController<C>, config: &'a CalibrationConfig) -> Self {
        Self {
            controller,
            prober: Prober::default(),
            config,
        }
    }

    /// Whether the probe pin currently reads triggered. A missing pin
    /// report counts as not triggered.
    pub fn triggered(&mut self) -> Result<bool> {
        Ok(self
            .controller
            .probe_triggered(PROBE_PIN)?
            .unwrap_or(false))
    }

    /// Fail if the probe is triggered where a descent is about to start.
    pub fn require_clear(&mut self, x: f64, y: f64, z: f64) -> Result<()> {
        if self.triggered()? {
            return Err(SafetyError::TriggeredBeforeDescent { x, y, z }.into());
        }
        Ok(())
    }

    /// Fail if a toward-contact probe did not end up triggered.
    pub fn require_contact(&mut self, target: Position) -> Result<()> {
        if !self.triggered()? {
            return Err(SafetyError::NotTriggeredAfterContact {
                x: target.x,
                y: target.y,
                z: target.z,
            }
            .into());
        }
        Ok(())
    }
}
