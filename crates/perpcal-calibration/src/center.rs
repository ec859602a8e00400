//! Center finding on one gauge end.
//!
//! Brackets the gauge front and back over a grid of offsets and depths,
//! fits a vertical plane through the centerline, probes the tip from the
//! side at each depth, and finishes with a confirming probe at the point
//! the plane predicts. All probing happens in a frame rotated by the
//! nominal blade angle, so a find works the same at every spindle
//! orientation. The returned estimate carries the tip position and the
//! absolute blade angle.

use perpcal_core::fit::{fit_line, fit_plane, interp_linear};
use perpcal_core::{
    CenterEstimate, Error, Face, GaugeEnd, Position, ProbeContact, ProbeGrid, Result,
};
use perpcal_communication::MotionChannel;
use tracing::debug;

use crate::session::ProbeSession;

/// Everything one center find produces.
#[derive(Debug, Clone)]
pub struct CenterFind {
    /// Tip position and absolute blade angle
    pub estimate: CenterEstimate,
    /// Centerline `(depth, machine y)` at the innermost probed offset
    pub front_back_center: Vec<(f64, f64)>,
    /// Tip contact `(depth, machine x)` from the side probes
    pub side: Vec<(f64, f64)>,
    /// Every recorded contact
    pub contacts: Vec<ProbeContact>,
}

/// Center finder for one end of the gauge.
///
/// `yaw` is the nominal blade rotation from the staged reference, radians.
/// Probe offsets run along the blade and bracketing probes run across it;
/// at zero yaw that is the machine X and Y axes.
pub struct CenterFinder<'a> {
    grid: &'a ProbeGrid,
    end: GaugeEnd,
    yaw: f64,
}

impl<'a> CenterFinder<'a> {
    pub fn new(grid: &'a ProbeGrid, end: GaugeEnd, yaw: f64) -> Self {
        Self { grid, end, yaw }
    }

    /// Run the find from the current position, which must be at or above
    /// the safe height over the approximate tip.
    pub fn find<C: MotionChannel>(&self, session: &mut ProbeSession<'_, C>) -> Result<CenterFind> {
        let safe_height = session.config.safe_height;
        let safe_distance = session.config.target.safe_distance();
        let feeds = session.config.feeds;
        let tip_to_center = session.config.target.tip_to_center;
        let probe_width = session.config.target.probe_width;
        let min_probe_distance = self.grid.min_probe_distance;

        let center = session.controller.query_position()?;
        if center.z < safe_height {
            return Err(Error::other(format!(
                "center find must start at safe height, currently at z={:.3}",
                center.z
            )));
        }
        let (cx, cy) = (center.x, center.y);

        // frame axes: `u` walks the contact inward from the tip, `v`
        // crosses the blade
        let direction = self.end.direction();
        let (ux, uy) = (self.yaw.cos() * direction, self.yaw.sin() * direction);
        let (vx, vy) = (-self.yaw.sin(), self.yaw.cos());
        let at = |a: f64, l: f64| (cx + a * ux + l * vx, cy + a * uy + l * vy);
        let frame = |p: &Position| {
            let (dx, dy) = (p.x - cx, p.y - cy);
            (dx * ux + dy * uy, dx * vx + dy * vy)
        };
        debug!(
            end = %self.end,
            cx,
            cy,
            yaw_deg = self.yaw.to_degrees(),
            "center find started"
        );

        // bracket the front and back faces over the grid. Probes sweep
        // past the assumed centerline, so a reposition error left by a
        // walk stage cannot stop them short of the face.
        let overshoot = safe_distance / 2.0;
        let mut contacts: Vec<ProbeContact> = Vec::new();
        let mut plane_points: Vec<(f64, f64, f64)> = Vec::new();
        for side in [-1.0, 1.0] {
            let mut lateral = side * safe_distance;
            let mut offsets = self.grid.offsets.clone();
            if side > 0.0 {
                offsets.reverse();
            }
            let mut last = at(offsets[0], lateral);
            for offset in offsets {
                let z_now = session.controller.query_position()?.z;
                let (x, y) = at(offset, lateral);
                session
                    .controller
                    .move_to(x, y, z_now, feeds.xy_speed, false, false)?;
                for &depth in &self.grid.depths {
                    let (x, y) = at(offset, lateral);
                    session
                        .controller
                        .move_to(x, y, depth, feeds.z_speed, false, true)?;
                    session.require_clear(x, y, depth)?;

                    let (tx, ty) = at(offset, -side * overshoot);
                    let contact = session.prober.probe_with_retry(
                        session.controller,
                        tx,
                        ty,
                        depth,
                        feeds.probe_speed,
                        true,
                    )?;
                    session.require_contact(Position::new(tx, ty, depth))?;

                    let face = if side < 0.0 { Face::Front } else { Face::Back };
                    contacts.push(ProbeContact {
                        offset,
                        depth,
                        face,
                        position: contact,
                    });
                    plane_points.push((offset, depth, frame(&contact).1));

                    lateral = frame(&contact).1 + side * min_probe_distance;
                    let (x, y) = at(offset, lateral);
                    session
                        .controller
                        .move_to(x, y, depth, feeds.xy_speed, false, false)?;
                    last = (x, y);
                }
            }
            session
                .controller
                .move_to(last.0, last.1, safe_height, feeds.z_speed, false, false)?;
        }

        // vertical plane through the centerline: lateral = c + a*offset
        // + b*depth
        let plane_cells = grouped_means(&plane_points);
        let (plane_c, plane_a, plane_b) = fit_plane(&plane_cells)?;
        let angle = self.yaw + plane_a.atan2(1.0) * direction;

        // probe the tip from the side at each depth, along the centerline
        let mut side_raw: Vec<(f64, f64)> = Vec::new();
        let mut side_along: Vec<(f64, f64)> = Vec::new();
        let mut along = -safe_distance;
        let (x, y) = at(along, plane_c + plane_a * along);
        session
            .controller
            .move_to(x, y, safe_height, feeds.xy_speed, false, false)?;
        let mut approach = (x, y);
        for &depth in &self.grid.depths {
            let column: Vec<(f64, f64)> = plane_cells
                .iter()
                .filter(|(_, d, _)| (*d - depth).abs() < 1e-9)
                .map(|&(a, _, l)| (a, l))
                .collect();
            let (line_c, line_a) = fit_line(&column)?;
            let center_lateral = line_c;
            let approach_lateral = line_c + line_a * along;

            let (x, y) = at(along, approach_lateral);
            session
                .controller
                .move_to(x, y, depth, feeds.z_speed, false, true)?;
            session.require_clear(x, y, depth)?;

            let (tx, ty) = at(0.0, center_lateral);
            let contact = session.prober.probe_with_retry(
                session.controller,
                tx,
                ty,
                depth,
                feeds.probe_speed,
                true,
            )?;
            session.require_contact(Position::new(tx, ty, depth))?;

            let tip_along = frame(&contact).0;
            side_raw.push((depth, contact.x));
            side_along.push((depth, tip_along));
            contacts.push(ProbeContact {
                offset: tip_along,
                depth,
                face: Face::Tip,
                position: contact,
            });

            along = tip_along - min_probe_distance;
            let (x, y) = at(along, approach_lateral);
            session
                .controller
                .move_to(x, y, depth, feeds.xy_speed, false, false)?;
            approach = (x, y);
        }

        // confirming probe at the plane-predicted tip point. The shift
        // from the probed tip to the assumed centerline is a named
        // approximation; the tip contact is not exactly on the centerline.
        let z_start = safe_height;
        let z_target = self
            .grid
            .depths
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let shift = tip_to_center + probe_width / 2.0;
        let along_start = interp_linear(&side_along, z_start)? + shift;
        let along_target = interp_linear(&side_along, z_target)? + shift;
        let (sx, sy) = at(along_start, plane_c + plane_a * along_start + plane_b * z_start);
        let (tx, ty) = at(
            along_target,
            plane_c + plane_a * along_target + plane_b * z_target,
        );

        session
            .controller
            .move_to(approach.0, approach.1, z_start, feeds.z_speed, false, false)?;
        session
            .controller
            .move_to(sx, sy, z_start, feeds.xy_speed, false, true)?;
        session.require_clear(sx, sy, z_start)?;

        let tip = session.prober.probe_with_retry(
            session.controller,
            tx,
            ty,
            z_target,
            feeds.probe_speed,
            true,
        )?;
        debug!(end = %self.end, %tip, angle_deg = angle.to_degrees(), "center found");

        Ok(CenterFind {
            estimate: CenterEstimate {
                position: tip,
                angle,
            },
            front_back_center: centerline_at_innermost(&contacts),
            side: side_raw,
            contacts,
        })
    }
}

/// Average duplicate front/back cells per `(offset, depth)` into plane fit
/// points `(offset, depth, lateral)`.
fn grouped_means(points: &[(f64, f64, f64)]) -> Vec<(f64, f64, f64)> {
    let mut cells: Vec<(f64, f64, f64, usize)> = Vec::new();
    for &(offset, depth, lateral) in points {
        match cells
            .iter_mut()
            .find(|(o, d, _, _)| (*o - offset).abs() < 1e-9 && (*d - depth).abs() < 1e-9)
        {
            Some(cell) => {
                cell.2 += lateral;
                cell.3 += 1;
            }
            None => cells.push((offset, depth, lateral, 1)),
        }
    }
    cells
        .into_iter()
        .map(|(offset, depth, sum, n)| (offset, depth, sum / n as f64))
        .collect()
}

/// Front/back midpoint per depth at the innermost probed offset, as raw
/// machine Y. Only meaningful to compare at opposite orientations.
fn centerline_at_innermost(contacts: &[ProbeContact]) -> Vec<(f64, f64)> {
    let faces: Vec<&ProbeContact> = contacts.iter().filter(|c| c.face != Face::Tip).collect();
    let Some(min_offset) = faces
        .iter()
        .map(|c| c.offset)
        .min_by(|a, b| a.total_cmp(b))
    else {
        return Vec::new();
    };

    let mut result: Vec<(f64, f64)> = Vec::new();
    for contact in faces.iter().filter(|c| (c.offset - min_offset).abs() < 1e-9) {
        let other = faces.iter().find(|c| {
            (c.offset - min_offset).abs() < 1e-9
                && (c.depth - contact.depth).abs() < 1e-9
                && c.face != contact.face
        });
        if let Some(other) = other {
            if contact.face == Face::Front
                && !result.iter().any(|(d, _)| (*d - contact.depth).abs() < 1e-9)
            {
                result.push((
                    contact.depth,
                    (contact.position.y + other.position.y) / 2.0,
                ));
            }
        }
    }
    result.sort_by(|a, b| a.0.total_cmp(&b.0));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(offset: f64, depth: f64, face: Face, y: f64) -> ProbeContact {
        ProbeContact {
            offset,
            depth,
            face,
            position: Position::new(offset, y, depth),
        }
    }

    #[test]
    fn grouped_means_average_repeated_cells() {
        let points = vec![
            (5.0, -3.0, -2.0),
            (5.0, -3.0, 2.0),
            (10.0, -3.0, -2.1),
        ];
        let means = grouped_means(&points);
        assert_eq!(means.len(), 2);
        let cell = means
            .iter()
            .find(|(o, _, _)| (*o - 5.0).abs() < 1e-9)
            .unwrap();
        assert!((cell.2 - 0.0).abs() < 1e-12);
    }

    #[test]
    fn centerline_uses_innermost_offset_only() {
        let contacts = vec![
            contact(5.0, -3.0, Face::Front, -2.4),
            contact(5.0, -3.0, Face::Back, 2.6),
            contact(5.0, -9.0, Face::Front, -2.3),
            contact(5.0, -9.0, Face::Back, 2.7),
            contact(10.0, -3.0, Face::Front, -9.9),
            contact(10.0, -3.0, Face::Back, 9.9),
        ];
        let centerline = centerline_at_innermost(&contacts);
        assert_eq!(centerline.len(), 2);
        assert!((centerline[0].0 + 9.0).abs() < 1e-12);
        assert!((centerline[0].1 - 0.2).abs() < 1e-12);
        assert!((centerline[1].1 - 0.1).abs() < 1e-12);
    }
}
