//! The feeler-gauge measurement sequence.
//!
//! One run finds the gauge, zeroes the workspace on its left tip, measures
//! both tips, then alternates contact-walk rotation stages with fresh
//! center finds until the spindle has been sampled over a full revolution.

use perpcal_core::{CalibrationSample, GaugeEnd, Position, Result, SafetyError};
use perpcal_communication::MotionChannel;
use tracing::info;

use crate::center::{CenterFind, CenterFinder};
use crate::report::Reporter;
use crate::rotate::{rotation_stages, RotationWalker};
use crate::session::ProbeSession;

/// Run the full feeler-gauge sequence and collect one sample per spindle
/// orientation.
///
/// The machine must be staged with the probe resting on the gauge near the
/// left tip, arm at the configured reference angle.
pub fn run_feeler_gauge<C: MotionChannel>(
    session: &mut ProbeSession<'_, C>,
    reporter: &mut dyn Reporter,
) -> Result<Vec<CalibrationSample>> {
    let feeds = session.config.feeds;
    let safe_height = session.config.safe_height;

    // the staged position must have the probe triggered on the gauge
    let staged = session.controller.query_position()?;
    session.require_contact(staged)?;

    session.controller.set_steppers(true, true, true, true)?;
    session.controller.zero_position(0.0, 0.0, 0.0)?;
    session
        .controller
        .move_to(0.0, 0.0, safe_height, feeds.z_speed, false, true)?;
    if session.triggered()? {
        return Err(SafetyError::TriggeredAfterRetract { z: safe_height }.into());
    }

    // rough find to zero the workspace on the left tip
    reporter.stage("rough left center find");
    let rough = CenterFinder::new(&session.config.rough_grid, GaugeEnd::Left, 0.0).find(session)?;
    let gauge_angle = rough.estimate.angle;
    session.controller.zero_position(0.0, 0.0, 0.0)?;
    session
        .controller
        .move_to(0.0, 0.0, safe_height, feeds.z_speed, false, true)?;
    session.require_clear(0.0, 0.0, safe_height)?;

    // rough find on the right tip, along the fitted gauge direction
    reporter.stage("rough right center find");
    let span = session.config.target.distance_between_centers();
    let approx_right_x = gauge_angle.cos() * span;
    let approx_right_y = gauge_angle.sin() * span;
    session.controller.move_to(
        approx_right_x,
        approx_right_y,
        safe_height,
        feeds.xy_speed,
        false,
        true,
    )?;
    session.require_clear(approx_right_x, approx_right_y, safe_height)?;

    let rough_right =
        CenterFinder::new(&session.config.rough_grid, GaugeEnd::Right, 0.0).find(session)?;
    let (rdx, rdy) = (
        rough_right.estimate.position.x,
        rough_right.estimate.position.y,
    );
    info!(rdx, rdy, gauge_angle_deg = gauge_angle.to_degrees(), "gauge located");

    session
        .controller
        .move_to(rdx, rdy, safe_height, feeds.xy_speed, false, false)?;
    session
        .controller
        .move_to(0.0, 0.0, safe_height, feeds.xy_speed, false, true)?;

    // first fine find anchors the rotation stages
    reporter.stage("fine left center find");
    let fine_grid = &session.config.fine_grid;
    let first = CenterFinder::new(fine_grid, GaugeEnd::Left, 0.0).find(session)?;
    let (mut x, mut y) = (first.estimate.position.x, first.estimate.position.y);

    let offsets = &fine_grid.offsets;
    let inner_offset = (offsets.iter().copied().fold(f64::INFINITY, f64::min)
        + offsets.iter().copied().fold(f64::NEG_INFINITY, f64::max))
        / 2.0;
    let stages = rotation_stages(
        inner_offset,
        session.config.target.safe_distance(),
        (rdx, rdy),
    );

    let rotation = session.config.rotation;
    let walker = RotationWalker {
        step_deg: rotation.step_deg,
    };
    let steps =
        (90.0 / (rotation.num_angles as f64 / 3.0) / rotation.step_deg).round() as u32;
    let swept = -(steps as f64 * rotation.step_deg).to_radians();
    let reference_deg = rotation.approx_angle;
    let mut approx_angle = reference_deg;

    // the arm is pushed around the fixed probe contact, which sits on the
    // blade centerline at a known distance inboard of the measured center
    let target = session.config.target;
    let pivot_radius = target.arm_length + target.gauge_length / 2.0 - target.tip_to_center;
    let mut blade_angle = first.estimate.angle;

    let mut samples: Vec<CalibrationSample> = Vec::new();
    for (index, stage) in stages.iter().enumerate() {
        reporter.stage(&format!("rotation stage {} of {}", index + 1, stages.len()));
        let pivot = (
            x + pivot_radius * blade_angle.cos(),
            y + pivot_radius * blade_angle.sin(),
        );
        walker.advance(
            session,
            stage,
            Position::new(x, y, safe_height),
            pivot,
            &mut approx_angle,
            steps,
            reference_deg,
        )?;

        let yaw = blade_angle + swept;
        let left = CenterFinder::new(fine_grid, GaugeEnd::Left, yaw).find(session)?;
        (x, y) = (left.estimate.position.x, left.estimate.position.y);
        blade_angle = left.estimate.angle;

        // the right tip swings around the spindle with the gauge
        let (sin, cos) = (blade_angle - gauge_angle).sin_cos();
        let (span_x, span_y) = (rdx * cos - rdy * sin, rdx * sin + rdy * cos);
        session
            .controller
            .move_to(x, y, safe_height, feeds.z_speed, false, false)?;
        session.controller.move_to(
            x + span_x,
            y + span_y,
            safe_height,
            feeds.xy_speed,
            false,
            true,
        )?;
        session.require_clear(x + span_x, y + span_y, safe_height)?;

        let right = CenterFinder::new(fine_grid, GaugeEnd::Right, blade_angle).find(session)?;

        let sample = assemble_sample(approx_angle, &left, &right);
        reporter.sample(&sample);
        samples.push(sample);

        session.controller.move_to(
            right.estimate.position.x,
            right.estimate.position.y,
            safe_height,
            feeds.z_speed,
            false,
            false,
        )?;
        session
            .controller
            .move_to(x, y, safe_height, feeds.xy_speed, false, false)?;
    }

    Ok(samples)
}

/// Combine the left and right finds at one orientation into a sample. The
/// tip midpoint per depth averages the left and right side contacts.
fn assemble_sample(
    angle_deg: f64,
    left: &CenterFind,
    right: &CenterFind,
) -> CalibrationSample {
    let mut side_center: Vec<(f64, f64)> = Vec::new();
    for &(depth, left_x) in &left.side {
        if let Some(&(_, right_x)) = right
            .side
            .iter()
            .find(|(d, _)| (*d - depth).abs() < 1e-9)
        {
            side_center.push((depth, (left_x + right_x) / 2.0));
        }
    }
    side_center.sort_by(|a, b| a.0.total_cmp(&b.0));

    CalibrationSample {
        angle_deg,
        left: left.estimate,
        right: right.estimate,
        front_back_center: left.front_back_center.clone(),
        side_center,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perpcal_core::CenterEstimate;

    fn find(side: Vec<(f64, f64)>) -> CenterFind {
        CenterFind {
            estimate: CenterEstimate {
                position: Position::new(0.0, 0.0, -3.0),
                angle: 0.0,
            },
            front_back_center: vec![(-15.0, 0.1), (-3.0, 0.2)],
            side,
            contacts: Vec::new(),
        }
    }

    #[test]
    fn sample_averages_side_contacts_per_depth() {
        let left = find(vec![(-3.0, -1.0), (-15.0, -3.0)]);
        let right = find(vec![(-15.0, 5.0), (-3.0, 7.0)]);
        let sample = assemble_sample(135.0, &left, &right);
        assert_eq!(sample.side_center, vec![(-15.0, 1.0), (-3.0, 3.0)]);
        assert_eq!(sample.front_back_center, left.front_back_center);
    }

    #[test]
    fn sample_drops_unmatched_depths() {
        let left = find(vec![(-3.0, -1.0), (-9.0, -2.0)]);
        let right = find(vec![(-3.0, 7.0)]);
        let sample = assemble_sample(90.0, &left, &right);
        assert_eq!(sample.side_center, vec![(-3.0, 3.0)]);
    }
}
