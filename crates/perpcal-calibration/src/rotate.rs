//! Contact-walk rotation of the spindle.
//!
//! The spindle cannot be rotated by a motor, so the machine rotates it by
//! pushing the arm around: descend near the gauge, probe onto it, then
//! circle the fixed probe contact one small arc step at a time. The blade
//! stays pressed against the contact, so the spindle angle follows the
//! orbit. Every step must keep the probe triggered; losing contact means
//! the arm slipped and the run cannot continue.

use perpcal_core::{Position, Result, SafetyError};
use perpcal_communication::MotionChannel;
use tracing::debug;

use crate::session::ProbeSession;

/// Approach, probe target and retreat offsets for one rotation stage,
/// relative to the current left center (or right center for the far
/// stages). Offsets are expressed in the staged reference frame; the
/// walker rotates them to the current spindle orientation.
#[derive(Debug, Clone, Copy)]
pub struct StagePoints {
    /// Where to descend before probing, relative offset
    pub start: (f64, f64),
    /// Probe target, relative offset
    pub target: (f64, f64),
    /// Retreat offset after the walk, away from the gauge
    pub end: (f64, f64),
}

/// The eight walk stages of a full revolution: front, left, left, back,
/// back, right, right, front. `right_center` is the right-center offset
/// found during the rough pass.
pub fn rotation_stages(
    inner_offset: f64,
    safe_distance: f64,
    right_center: (f64, f64),
) -> [StagePoints; 8] {
    let (rdx, rdy) = right_center;
    let front = StagePoints {
        start: (inner_offset, -safe_distance),
        target: (inner_offset, 0.0),
        end: (0.0, -safe_distance),
    };
    let left = StagePoints {
        start: (-safe_distance, 0.0),
        target: (0.0, 0.0),
        end: (-safe_distance, 0.0),
    };
    let back = StagePoints {
        start: (inner_offset, safe_distance),
        target: (inner_offset, 0.0),
        end: (0.0, safe_distance),
    };
    let right = StagePoints {
        start: (rdx + safe_distance, rdy),
        target: (rdx, rdy),
        end: (safe_distance, 0.0),
    };
    [front, left, left, back, back, right, right, front]
}

/// Orbits the machine around the fixed probe contact to rotate the arm.
pub struct RotationWalker {
    /// Angle decrement per walk step, degrees
    pub step_deg: f64,
}

impl RotationWalker {
    /// Run one stage: approach, probe onto the gauge, orbit `steps` arc
    /// increments around `pivot`, retreat, and reposition over the
    /// expected new left center.
    ///
    /// `pivot` is the workspace position of the fixed contact the blade
    /// is pushed against; the machine must circle it, or the arm cannot
    /// follow the commanded path. `approx_angle` is decremented in place,
    /// modulo 360; `reference_deg` is the staged reference angle the
    /// stage offsets are expressed against.
    #[allow(clippy::too_many_arguments)]
    pub fn advance<C: MotionChannel>(
        &self,
        session: &mut ProbeSession<'_, C>,
        stage: &StagePoints,
        left_center: Position,
        pivot: (f64, f64),
        approx_angle: &mut f64,
        steps: u32,
        reference_deg: f64,
    ) -> Result<()> {
        let feeds = session.config.feeds;
        let safe_height = session.config.safe_height;
        let rotate_height = session.config.rotate_height();
        let (x, y) = (left_center.x, left_center.y);

        session
            .controller
            .move_to(x, y, safe_height, feeds.z_speed, false, true)?;
        session.require_clear(x, y, safe_height)?;

        let rel = (*approx_angle - reference_deg).to_radians();
        let (start_x, start_y) = rotate_offset(stage.start, rel);
        let rotate_x = x + start_x;
        let rotate_y = y + start_y;
        session
            .controller
            .move_to(rotate_x, rotate_y, safe_height, feeds.xy_speed, false, false)?;
        session
            .controller
            .move_to(rotate_x, rotate_y, rotate_height, feeds.z_speed, false, true)?;
        session.require_clear(rotate_x, rotate_y, rotate_height)?;

        let (target_x, target_y) = rotate_offset(stage.target, rel);
        let target = Position::new(x + target_x, y + target_y, rotate_height);
        let touch = session.prober.probe_with_retry(
            session.controller,
            target.x,
            target.y,
            target.z,
            feeds.probe_speed,
            true,
        )?;
        session.require_contact(target)?;
        debug!(angle = *approx_angle, %touch, "walk stage engaged");

        // orbit the pivot clockwise; the blade stays pressed against it
        // and drags the spindle angle along with the machine
        let arc = (touch.x - pivot.0, touch.y - pivot.1);
        let mut swept = 0.0;
        let (mut wx, mut wy) = (touch.x, touch.y);
        for _ in 0..steps {
            *approx_angle = (*approx_angle - self.step_deg + 360.0) % 360.0;
            swept -= self.step_deg.to_radians();
            let (ox, oy) = rotate_offset(arc, swept);
            (wx, wy) = (pivot.0 + ox, pivot.1 + oy);

            session
                .controller
                .walk_arc(wx, wy, rotate_height, true, feeds.xy_speed)?;
            if !session.triggered()? {
                return Err(SafetyError::LostContactDuringRotation {
                    angle_deg: *approx_angle,
                }
                .into());
            }
        }

        // retreat, then reposition over the expected new left center,
        // which swings around the pivot with the blade
        let rel_end = (*approx_angle - reference_deg).to_radians();
        let (end_x, end_y) = rotate_offset(stage.end, rel_end);
        session.controller.move_to(
            wx + end_x,
            wy + end_y,
            rotate_height,
            feeds.xy_speed,
            false,
            false,
        )?;
        session.controller.move_to(
            wx + end_x,
            wy + end_y,
            safe_height,
            feeds.z_speed,
            false,
            false,
        )?;
        let (next_x, next_y) = rotate_about((x, y), pivot, swept);
        session
            .controller
            .move_to(next_x, next_y, safe_height, feeds.xy_speed, false, false)?;
        Ok(())
    }
}

fn rotate_offset((ox, oy): (f64, f64), angle: f64) -> (f64, f64) {
    let (sin, cos) = angle.sin_cos();
    (ox * cos - oy * sin, ox * sin + oy * cos)
}

fn rotate_about((px, py): (f64, f64), (cx, cy): (f64, f64), angle: f64) -> (f64, f64) {
    let (ox, oy) = rotate_offset((px - cx, py - cy), angle);
    (cx + ox, cy + oy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_offsets_follow_the_spindle() {
        let (x, y) = rotate_offset((10.0, -13.5), 0.0);
        assert!((x - 10.0).abs() < 1e-12 && (y + 13.5).abs() < 1e-12);

        // a quarter turn clockwise swings the front approach to the left
        let (x, y) = rotate_offset((10.0, -13.5), -90.0_f64.to_radians());
        assert!((x + 13.5).abs() < 1e-9);
        assert!((y + 10.0).abs() < 1e-9);
    }

    #[test]
    fn orbit_swings_the_center_around_the_pivot() {
        // a quarter turn clockwise around the contact carries the tip
        // from pointing away on -x to pointing away on -y
        let pivot = (191.5, 0.0);
        let (x, y) = rotate_about((0.0, 0.0), pivot, -90.0_f64.to_radians());
        assert!((x - 191.5).abs() < 1e-9);
        assert!((y - 191.5).abs() < 1e-9);
    }

    #[test]
    fn stages_cover_a_full_revolution() {
        let stages = rotation_stages(10.0, 13.5, (83.0, 0.5));
        assert_eq!(stages.len(), 8);
        assert_eq!(stages[0].start, (10.0, -13.5));
        assert_eq!(stages[3].start, (10.0, 13.5));
        assert_eq!(stages[5].start, (83.0 + 13.5, 0.5));
        assert_eq!(stages[7].target, stages[0].target);
    }
}
