//! The two calibration targets.
//!
//! The feeler-gauge target measures spindle and Z-axis tilt from a thin
//! blade swung around the spindle on an arm. The bolt-head target probes
//! the shank of a bolt chucked in the collet from four sides, at two tool
//! rotations, and measures the tool centerline and runout instead.

use perpcal_core::{
    BoltContact, CalibrationResult, ProbeAxis, Result, SafetyError,
};
use perpcal_communication::MotionChannel;
use tracing::debug;

use crate::fitter::{fit_bolt_plane, GeometryFitter};
use crate::operator::{ManualStep, Operator};
use crate::pipeline::run_feeler_gauge;
use crate::report::Reporter;
use crate::session::ProbeSession;

/// A probed target geometry that can produce calibration angles.
pub trait TargetGeometry<C: MotionChannel> {
    fn calibrate(
        &mut self,
        session: &mut ProbeSession<'_, C>,
        reporter: &mut dyn Reporter,
    ) -> Result<CalibrationResult>;
}

/// Feeler gauge on an arm, swung around the spindle.
#[derive(Debug, Default)]
pub struct FeelerGaugeTarget;

impl<C: MotionChannel> TargetGeometry<C> for FeelerGaugeTarget {
    fn calibrate(
        &mut self,
        session: &mut ProbeSession<'_, C>,
        reporter: &mut dyn Reporter,
    ) -> Result<CalibrationResult> {
        let samples = run_feeler_gauge(session, reporter)?;
        let result = GeometryFitter::fit(&samples)?;
        reporter.result(&result);
        Ok(result)
    }
}

/// Probing positions for the bolt-head target, in the workspace zeroed on
/// top of the bolt head.
#[derive(Debug, Clone, Copy)]
pub struct BoltLayout {
    /// X at which the YZ-plane probes run, mm
    pub probe_x: f64,
    /// Y at which the XZ-plane probes run, mm
    pub probe_y: f64,
    /// Height of the bolt head above the shank, mm
    pub head_height: f64,
    /// How far below the head the shank is probed, mm
    pub probe_height: f64,
    /// Also probe away from the shank to measure backlash
    pub probe_away: bool,
}

impl Default for BoltLayout {
    fn default() -> Self {
        Self {
            probe_x: 25.0,
            probe_y: 20.0,
            head_height: 7.5,
            probe_height: 15.0,
            probe_away: false,
        }
    }
}

impl BoltLayout {
    /// Retract height above the workspace zero on the bolt head.
    pub fn safe_height(&self) -> f64 {
        self.head_height + 2.0
    }
}

/// Bolt chucked in the collet, probed from four sides at two rotations.
pub struct BoltHeadTarget<C: MotionChannel> {
    layout: BoltLayout,
    operator: Box<dyn Operator<C>>,
}

impl<C: MotionChannel> BoltHeadTarget<C> {
    pub fn new(layout: BoltLayout, operator: Box<dyn Operator<C>>) -> Self {
        Self { layout, operator }
    }

    /// Probe one side of the shank in one plane over all depths, stepping
    /// back by one millimeter between probes. Returns the recorded
    /// contacts; the `ok` flag carries the trigger state instead of
    /// failing the run, so a bad depth can be excluded later.
    fn probe_side(
        &mut self,
        session: &mut ProbeSession<'_, C>,
        axis: ProbeAxis,
        side: i8,
        rotation_deg: f64,
        depths: &[f64],
        contacts: &mut Vec<BoltContact>,
    ) -> Result<()> {
        let feeds = session.config.feeds;
        let bolt_width = session.config.target.bolt_width;
        let safe_height = self.layout.safe_height();
        let sign = side as f64;

        let (mut x, mut y, px, py, dx, dy) = match axis {
            ProbeAxis::Y => (
                self.layout.probe_x,
                sign * (bolt_width + 3.0),
                self.layout.probe_x,
                sign * -10.0,
                0.0,
                sign,
            ),
            ProbeAxis::X => (
                sign * (bolt_width + 3.0),
                self.layout.probe_y,
                sign * -10.0,
                self.layout.probe_y,
                sign,
                0.0,
            ),
        };
        debug!(%axis, side, rotation_deg, "probing shank side");

        session
            .controller
            .move_to(x + dx, y + dy, safe_height, feeds.xy_speed, false, false)?;
        for &depth in depths {
            session
                .controller
                .move_to(x + dx, y + dy, depth, feeds.z_speed, false, true)?;
            session.require_clear(x + dx, y + dy, depth)?;

            let contact = session.prober.probe_with_retry(
                session.controller,
                px,
                py,
                depth,
                feeds.probe_speed,
                true,
            )?;
            (x, y) = (contact.x, contact.y);
            contacts.push(BoltContact {
                depth,
                rotation_deg,
                side,
                towards: true,
                value: match axis {
                    ProbeAxis::Y => contact.y,
                    ProbeAxis::X => contact.x,
                },
                ok: session.triggered()?,
            });

            if self.layout.probe_away {
                let released = session.prober.probe_with_retry(
                    session.controller,
                    x + dx,
                    y + dy,
                    depth,
                    feeds.probe_speed,
                    false,
                )?;
                (x, y) = (released.x, released.y);
                contacts.push(BoltContact {
                    depth,
                    rotation_deg,
                    side,
                    towards: false,
                    value: match axis {
                        ProbeAxis::Y => released.y,
                        ProbeAxis::X => released.x,
                    },
                    ok: !session.triggered()?,
                });
            }

            session
                .controller
                .move_to(x + dx, y + dy, depth, feeds.z_speed, false, true)?;
            session.require_clear(x + dx, y + dy, depth)?;
        }
        session
            .controller
            .move_to(x + dx, y + dy, safe_height, feeds.z_speed, false, false)?;
        Ok(())
    }
}

impl<C: MotionChannel> TargetGeometry<C> for BoltHeadTarget<C> {
    fn calibrate(
        &mut self,
        session: &mut ProbeSession<'_, C>,
        reporter: &mut dyn Reporter,
    ) -> Result<CalibrationResult> {
        let feeds = session.config.feeds;
        let max_backlash = session.config.target.max_backlash;
        let safe_height = self.layout.safe_height();

        // the probe must rest on top of the bolt head
        let staged = session.controller.query_position()?;
        session.require_contact(staged)?;

        session.controller.set_steppers(true, true, true, true)?;
        session
            .controller
            .zero_position(0.0, 0.0, self.layout.head_height)?;
        session
            .controller
            .move_to(0.0, 0.0, safe_height, feeds.z_speed, false, true)?;
        if session.triggered()? {
            return Err(SafetyError::TriggeredAfterRetract { z: safe_height }.into());
        }

        let mut depths: Vec<f64> = Vec::new();
        let mut depth = -self.layout.probe_height + 1.0;
        while depth <= -2.0 + 1e-9 {
            depths.push(depth);
            depth += 1.0;
        }

        let mut yz_contacts: Vec<BoltContact> = Vec::new();
        let mut xz_contacts: Vec<BoltContact> = Vec::new();
        for rotation_deg in [0.0, 180.0] {
            reporter.stage(&format!("probing shank at tool rotation {rotation_deg}"));
            for axis in [ProbeAxis::Y, ProbeAxis::X] {
                for side in [-1i8, 1] {
                    let contacts = match axis {
                        ProbeAxis::Y => &mut yz_contacts,
                        ProbeAxis::X => &mut xz_contacts,
                    };
                    self.probe_side(session, axis, side, rotation_deg, &depths, contacts)?;
                }
            }

            session
                .controller
                .move_to(0.0, 0.0, safe_height, feeds.xy_speed, false, false)?;
            if rotation_deg == 0.0 {
                self.operator
                    .perform(ManualStep::RotateTool180, session.controller)?;
            }
        }

        session
            .controller
            .move_to(0.0, 0.0, safe_height, feeds.xy_speed, false, false)?;
        session.controller.move_to(
            0.0,
            0.0,
            self.layout.head_height,
            feeds.z_speed,
            false,
            false,
        )?;
        session.controller.set_steppers(true, true, true, false)?;

        let (yz_angle, yz_runout) = fit_bolt_plane(&yz_contacts, max_backlash)?;
        let (xz_angle, xz_runout) = fit_bolt_plane(&xz_contacts, max_backlash)?;

        let result = CalibrationResult {
            spindle_around_x_deg: -yz_angle,
            spindle_around_y_deg: xz_angle,
            z_axis_around_x_deg: None,
            z_axis_around_y_deg: None,
            runout_around_x_deg: Some(-yz_runout),
            runout_around_y_deg: Some(xz_runout),
        };
        reporter.result(&result);
        Ok(result)
    }
}
