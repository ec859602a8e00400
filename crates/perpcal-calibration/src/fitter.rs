//! Tilt decomposition from collected measurements.
//!
//! The feeler-gauge run yields one [`CalibrationSample`] per spindle
//! orientation; the circle the left tip traces gives the spindle tilt, and
//! comparing centerlines at opposite orientations isolates the Z-axis
//! travel tilt from it. The bolt-head run instead fits the tool centerline
//! and runout per probing plane.

use perpcal_core::fit::{fit_line, fit_plane, minimize_scalar};
use perpcal_core::{BoltContact, CalibrationResult, CalibrationSample, FitError, Result};
use tracing::{debug, warn};

/// Bracket half-width for the Z-axis angle search, radians.
const Z_SEARCH_RADIUS: f64 = 0.1;
/// Convergence tolerance of the golden-section search, radians.
const Z_SEARCH_TOL: f64 = 1e-10;
/// Two sample angles match a nominal orientation within this, degrees.
const ANGLE_TOL: f64 = 1.0;

/// Decomposes feeler-gauge samples into spindle and Z-axis tilts.
pub struct GeometryFitter;

impl GeometryFitter {
    /// Fit the spindle tilt from the circle of left-tip positions, then
    /// isolate the Z-axis travel tilt from the centerlines measured at
    /// opposite spindle orientations. Z-axis angles are `None` when no
    /// usable pair of opposite orientations was sampled.
    pub fn fit(samples: &[CalibrationSample]) -> Result<CalibrationResult> {
        let circle: Vec<(f64, f64, f64)> = samples
            .iter()
            .map(|s| {
                (
                    s.left.position.x,
                    s.left.position.y,
                    s.left.position.z,
                )
            })
            .collect();
        let (_, slope_x, slope_y) = fit_plane(&circle)?;

        let spindle_around_x_deg = slope_y.atan2(1.0).to_degrees();
        let spindle_around_y_deg = -slope_x.atan2(1.0).to_degrees();
        debug!(
            spindle_around_x_deg,
            spindle_around_y_deg, "spindle tilt fitted"
        );

        let front_back = paired_centerline(samples, |s| &s.front_back_center);
        let side = paired_centerline(samples, |s| &s.side_center);

        let z_axis_around_x_deg = front_back
            .as_deref()
            .and_then(|table| isolate_z_angle(table, spindle_around_x_deg, true));
        let z_axis_around_y_deg = side
            .as_deref()
            .and_then(|table| isolate_z_angle(table, spindle_around_y_deg, false));

        Ok(CalibrationResult {
            spindle_around_x_deg,
            spindle_around_y_deg,
            z_axis_around_x_deg,
            z_axis_around_y_deg,
            runout_around_x_deg: None,
            runout_around_y_deg: None,
        })
    }
}

/// Centerline averaged between the samples nearest 0 and 180 degrees,
/// matched per depth. `None` unless both orientations were sampled with at
/// least two common depths.
fn paired_centerline<F>(samples: &[CalibrationSample], table: F) -> Option<Vec<(f64, f64)>>
where
    F: Fn(&CalibrationSample) -> &[(f64, f64)],
{
    let at = |nominal: f64| {
        samples
            .iter()
            .rev()
            .find(|s| angle_distance(s.angle_deg, nominal) < ANGLE_TOL)
    };
    let zero = table(at(0.0)?);
    let opposite = table(at(180.0)?);

    let mut rows: Vec<(f64, f64)> = Vec::new();
    for &(depth, value) in zero {
        if let Some(&(_, other)) = opposite
            .iter()
            .find(|(d, _)| (*d - depth).abs() < 1e-9)
        {
            rows.push((depth, (value + other) / 2.0));
        }
    }
    if rows.len() < 2 {
        return None;
    }
    rows.sort_by(|a, b| a.0.total_cmp(&b.0));
    Some(rows)
}

fn angle_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

/// Search for the Z-axis travel angle that explains the centerline drift.
///
/// With the arm parallel to the measured axis, the lateral drift of the
/// spindle centerline per unit of Z travel satisfies
/// `delta = dz * (sin(z) + cos(z) * tan(z + spindle))` where `z` is the
/// travel tilt and `z + spindle` the total spindle tilt, both off
/// perpendicular. Deltas are taken against the deepest row; the lateral
/// sign is flipped for the front/back centerline so both planes share one
/// objective.
fn isolate_z_angle(table: &[(f64, f64)], spindle_deg: f64, flip: bool) -> Option<f64> {
    let (ref_depth, ref_value) = *table.first()?;
    let sign = if flip { -1.0 } else { 1.0 };
    let deltas: Vec<(f64, f64)> = table
        .iter()
        .skip(1)
        .map(|&(depth, value)| (depth - ref_depth, sign * (value - ref_value)))
        .collect();
    if deltas.is_empty() {
        return None;
    }

    let spindle_tan = spindle_deg.to_radians().tan();
    let objective = |angle: f64| {
        deltas
            .iter()
            .map(|&(dz, dy)| {
                let predicted = dz * (angle.sin() + angle.cos() * spindle_tan);
                (predicted - dy).powi(2)
            })
            .sum::<f64>()
    };
    let best = minimize_scalar(objective, -Z_SEARCH_RADIUS, Z_SEARCH_RADIUS, Z_SEARCH_TOL);
    Some(-best.to_degrees())
}

/// Fit the tool centerline angle and runout angle in one bolt-head probing
/// plane, both in degrees against the Z travel.
///
/// Depths where a probe did not read the expected trigger state are
/// dropped, as are depths whose towards/away disagreement exceeds
/// `max_backlash` on either side. At least two usable depths must remain.
pub fn fit_bolt_plane(contacts: &[BoltContact], max_backlash: f64) -> Result<(f64, f64)> {
    let mut invalid: Vec<f64> = Vec::new();
    for contact in contacts.iter().filter(|c| !c.ok) {
        if !invalid.iter().any(|d| (*d - contact.depth).abs() < 1e-9) {
            invalid.push(contact.depth);
        }
    }
    if !invalid.is_empty() {
        invalid.sort_by(f64::total_cmp);
        warn!(depths = ?invalid, "ignoring possibly invalid measurements");
    }

    let usable: Vec<&BoltContact> = contacts
        .iter()
        .filter(|c| !invalid.iter().any(|d| (*d - c.depth).abs() < 1e-9))
        .collect();

    let mut depths: Vec<f64> = Vec::new();
    for contact in &usable {
        if !depths.iter().any(|d| (*d - contact.depth).abs() < 1e-9) {
            depths.push(contact.depth);
        }
    }
    depths.sort_by(f64::total_cmp);

    let value_at = |depth: f64, rotation: f64, side: i8, towards: bool| {
        usable
            .iter()
            .find(|c| {
                (c.depth - depth).abs() < 1e-9
                    && angle_distance(c.rotation_deg, rotation) < ANGLE_TOL
                    && c.side == side
                    && c.towards == towards
            })
            .map(|c| c.value)
    };

    let mut centers: Vec<(f64, f64)> = Vec::new();
    let mut radii: Vec<(f64, f64)> = Vec::new();
    let mut backlash_depths: Vec<f64> = Vec::new();
    for &depth in &depths {
        let mut rotation_centers = [0.0; 2];
        let mut complete = true;
        let mut backlash_exceeded = false;
        for (slot, rotation) in [(0usize, 0.0), (1, 180.0)] {
            let left = value_at(depth, rotation, -1, true);
            let right = value_at(depth, rotation, 1, true);
            for (towards, side) in [(left, -1i8), (right, 1)] {
                if let (Some(towards), Some(away)) =
                    (towards, value_at(depth, rotation, side, false))
                {
                    if (towards - away).abs() > max_backlash {
                        backlash_exceeded = true;
                    }
                }
            }
            match (left, right) {
                (Some(left), Some(right)) => rotation_centers[slot] = (left + right) / 2.0,
                _ => complete = false,
            }
        }
        if backlash_exceeded {
            backlash_depths.push(depth);
            continue;
        }
        if complete {
            centers.push((depth, (rotation_centers[0] + rotation_centers[1]) / 2.0));
            radii.push((depth, (rotation_centers[0] - rotation_centers[1]) / 2.0));
        }
    }
    if !backlash_depths.is_empty() {
        warn!(depths = ?backlash_depths, "ignoring measurements with large backlash");
    }

    if centers.len() < 2 {
        return Err(FitError::TooFewPoints {
            model: "bolt centerline".to_string(),
            got: centers.len(),
            needed: 2,
        }
        .into());
    }

    let (_, center_slope) = fit_line(&centers)?;
    let (_, runout_slope) = fit_line(&radii)?;
    Ok((
        center_slope.atan2(1.0).to_degrees(),
        runout_slope.atan2(1.0).to_degrees(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use perpcal_core::{CenterEstimate, Position};

    fn sample(angle_deg: f64, z: f64, centerline_drift: f64) -> CalibrationSample {
        let position = Position::new(
            10.0 * angle_deg.to_radians().cos(),
            10.0 * angle_deg.to_radians().sin(),
            z,
        );
        let estimate = CenterEstimate {
            position,
            angle: 0.0,
        };
        CalibrationSample {
            angle_deg,
            left: estimate,
            right: estimate,
            front_back_center: vec![
                (-15.0, 0.0),
                (-9.0, 6.0 * centerline_drift),
                (-3.0, 12.0 * centerline_drift),
            ],
            side_center: vec![(-15.0, 0.0), (-9.0, 0.0), (-3.0, 0.0)],
        }
    }

    #[test]
    fn level_circle_means_no_spindle_tilt() {
        let samples: Vec<CalibrationSample> = [180.0, 135.0, 90.0, 45.0, 0.0, 315.0, 270.0]
            .iter()
            .map(|&a| sample(a, -3.0, 0.0))
            .collect();
        let result = GeometryFitter::fit(&samples).unwrap();
        assert!(result.spindle_around_x_deg.abs() < 1e-9);
        assert!(result.spindle_around_y_deg.abs() < 1e-9);
        assert!(result.z_axis_around_x_deg.unwrap().abs() < 1e-6);
        assert!(result.z_axis_around_y_deg.unwrap().abs() < 1e-6);
    }

    #[test]
    fn tilted_circle_recovers_spindle_angle() {
        // z grows with y at one degree of slope
        let slope = 1.0_f64.to_radians().tan();
        let samples: Vec<CalibrationSample> = [180.0, 135.0, 90.0, 45.0, 0.0, 315.0, 270.0]
            .iter()
            .map(|&a| {
                let mut s = sample(a, 0.0, 0.0);
                s.left.position.z = slope * s.left.position.y;
                s
            })
            .collect();
        let result = GeometryFitter::fit(&samples).unwrap();
        assert!((result.spindle_around_x_deg - 1.0).abs() < 1e-6);
        assert!(result.spindle_around_y_deg.abs() < 1e-6);
    }

    #[test]
    fn missing_opposite_orientation_skips_z_isolation() {
        let samples: Vec<CalibrationSample> = [180.0, 135.0, 90.0]
            .iter()
            .map(|&a| sample(a, -3.0, 0.0))
            .collect();
        let result = GeometryFitter::fit(&samples).unwrap();
        assert!(result.z_axis_around_x_deg.is_none());
        assert!(result.z_axis_around_y_deg.is_none());
    }

    #[test]
    fn pure_z_drift_isolates_as_z_axis_angle() {
        // with the spindle perpendicular, a centerline drifting by
        // tan(0.5 deg) per mm of travel is the Z axis leaning
        let drift = 0.5_f64.to_radians().tan();
        let table: Vec<(f64, f64)> = vec![(-15.0, 0.0), (-9.0, 6.0 * drift), (-3.0, 12.0 * drift)];
        let angle = isolate_z_angle(&table, 0.0, false).unwrap();
        assert!((angle + 0.5).abs() < 1e-4);
    }

    fn bolt(depth: f64, rotation_deg: f64, side: i8, towards: bool, value: f64) -> BoltContact {
        BoltContact {
            depth,
            rotation_deg,
            side,
            towards,
            value,
            ok: true,
        }
    }

    #[test]
    fn straight_bolt_fits_zero_angles() {
        let mut contacts = Vec::new();
        for depth in [-14.0, -10.0, -6.0, -2.0] {
            for rotation in [0.0, 180.0] {
                contacts.push(bolt(depth, rotation, -1, true, -5.0));
                contacts.push(bolt(depth, rotation, 1, true, 5.0));
            }
        }
        let (angle, runout) = fit_bolt_plane(&contacts, 0.06).unwrap();
        assert!(angle.abs() < 1e-9);
        assert!(runout.abs() < 1e-9);
    }

    #[test]
    fn leaning_bolt_recovers_centerline_angle() {
        let slope = 0.75_f64.to_radians().tan();
        let mut contacts = Vec::new();
        for depth in [-14.0, -10.0, -6.0, -2.0] {
            let center = slope * depth;
            for rotation in [0.0, 180.0] {
                contacts.push(bolt(depth, rotation, -1, true, center - 5.0));
                contacts.push(bolt(depth, rotation, 1, true, center + 5.0));
            }
        }
        let (angle, runout) = fit_bolt_plane(&contacts, 0.06).unwrap();
        assert!((angle - 0.75).abs() < 1e-9);
        assert!(runout.abs() < 1e-9);
    }

    #[test]
    fn runout_splits_rotations() {
        // centers offset symmetrically between the two tool rotations
        let slope = 0.5_f64.to_radians().tan();
        let mut contacts = Vec::new();
        for depth in [-14.0, -10.0, -6.0, -2.0] {
            for (rotation, sign) in [(0.0, 1.0), (180.0, -1.0)] {
                let center = sign * slope * depth;
                contacts.push(bolt(depth, rotation, -1, true, center - 5.0));
                contacts.push(bolt(depth, rotation, 1, true, center + 5.0));
            }
        }
        let (angle, runout) = fit_bolt_plane(&contacts, 0.06).unwrap();
        assert!(angle.abs() < 1e-9);
        assert!((runout - 0.5).abs() < 1e-9);
    }

    #[test]
    fn not_ok_and_backlash_depths_are_dropped() {
        let mut contacts = Vec::new();
        for depth in [-14.0, -10.0, -6.0, -2.0] {
            for rotation in [0.0, 180.0] {
                contacts.push(bolt(depth, rotation, -1, true, -5.0));
                contacts.push(bolt(depth, rotation, 1, true, 5.0));
                contacts.push(bolt(depth, rotation, -1, false, -5.01));
                contacts.push(bolt(depth, rotation, 1, false, 5.01));
            }
        }
        // one depth probed unreliably, one with excessive backlash
        contacts.push(BoltContact {
            ok: false,
            ..bolt(-14.0, 0.0, -1, true, -5.0)
        });
        contacts
            .iter_mut()
            .filter(|c| (c.depth + 10.0).abs() < 1e-9 && !c.towards && c.side == 1)
            .for_each(|c| c.value = 5.2);

        let (angle, runout) = fit_bolt_plane(&contacts, 0.06).unwrap();
        assert!(angle.abs() < 1e-9);
        assert!(runout.abs() < 1e-9);

        let too_few: Vec<BoltContact> = contacts
            .iter()
            .filter(|c| (c.depth + 2.0).abs() < 1e-9)
            .copied()
            .collect();
        assert!(fit_bolt_plane(&too_few, 0.06).is_err());
    }
}
