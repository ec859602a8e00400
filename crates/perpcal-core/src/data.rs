//! Data models for machine positions, probe contacts and calibration results.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Absolute machine position in workspace coordinates, millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X-axis position
    pub x: f64,
    /// Y-axis position
    pub y: f64,
    /// Z-axis position
    pub z: f64,
}

impl Position {
    /// Create a new position
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another position
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4}, {:.4})", self.x, self.y, self.z)
    }
}

/// A position report where any axis may be absent.
///
/// `M114` responses are parsed into this; axes the firmware did not report
/// stay `None` rather than defaulting to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisReport {
    /// Reported X-axis position, if present
    pub x: Option<f64>,
    /// Reported Y-axis position, if present
    pub y: Option<f64>,
    /// Reported Z-axis position, if present
    pub z: Option<f64>,
}

impl AxisReport {
    /// Convert to a full position; `None` if any axis is missing.
    pub fn complete(&self) -> Option<Position> {
        Some(Position::new(self.x?, self.y?, self.z?))
    }
}

/// Which tip of the gauge a center find targets.
///
/// The left tip is the one nearer the machine origin along the arm at the
/// reference rotation; `direction()` gives the sign with which probe offsets
/// step inward from that tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GaugeEnd {
    /// Tip on the negative-X side at the reference rotation
    Left,
    /// Tip on the positive-X side at the reference rotation
    Right,
}

impl GaugeEnd {
    /// Sign applied to inward probe offsets for this end.
    pub fn direction(&self) -> f64 {
        match self {
            GaugeEnd::Left => 1.0,
            GaugeEnd::Right => -1.0,
        }
    }
}

impl fmt::Display for GaugeEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GaugeEnd::Left => write!(f, "left"),
            GaugeEnd::Right => write!(f, "right"),
        }
    }
}

/// Which face of the gauge a contact was made on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Face {
    /// Front face (approached from negative Y)
    Front,
    /// Back face (approached from positive Y)
    Back,
    /// End face of the tip (approached along X)
    Tip,
}

/// One recorded probe contact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeContact {
    /// Inward offset from the approximate tip at which the probe ran, mm
    pub offset: f64,
    /// Probe depth below the workspace zero, mm (negative values)
    pub depth: f64,
    /// The face that was contacted
    pub face: Face,
    /// Machine position at contact
    pub position: Position,
}

/// Result of a center find on one gauge end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CenterEstimate {
    /// Tip position on the feature centerline, workspace mm
    pub position: Position,
    /// Blade direction in the XY plane, radians (nominal orientation
    /// plus the fitted centerline slope)
    pub angle: f64,
}

/// Measurements collected at one spindle orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    /// Nominal spindle angle for this sample, degrees
    pub angle_deg: f64,
    /// Center estimate at the left gauge end
    pub left: CenterEstimate,
    /// Center estimate at the right gauge end
    pub right: CenterEstimate,
    /// Gauge centerline lateral position per depth, `(depth, y)`, from the
    /// front/back contacts at the innermost offset of the left find
    pub front_back_center: Vec<(f64, f64)>,
    /// Gauge tip midpoint per depth, `(depth, x)`, averaged over the left
    /// and right side probes
    pub side_center: Vec<(f64, f64)>,
}

/// Which lateral machine axis a bolt-head plane measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeAxis {
    /// Contacts measured along X (probing in the XZ plane)
    X,
    /// Contacts measured along Y (probing in the YZ plane)
    Y,
}

impl fmt::Display for ProbeAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeAxis::X => write!(f, "X"),
            ProbeAxis::Y => write!(f, "Y"),
        }
    }
}

/// One bolt-head contact.
///
/// The bolt-head variant probes the shank from both lateral sides in both
/// planes, at two tool rotations 180 degrees apart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoltContact {
    /// Probe depth, workspace mm
    pub depth: f64,
    /// Tool rotation for this contact, 0 or 180 degrees
    pub rotation_deg: f64,
    /// Approach side along the measured axis, -1 or +1
    pub side: i8,
    /// Whether this was a toward-contact probe (false: probe-away)
    pub towards: bool,
    /// Measured lateral coordinate at contact, workspace mm
    pub value: f64,
    /// Whether the probe read the expected trigger state afterwards
    pub ok: bool,
}

/// Final decomposed calibration angles, all in degrees.
///
/// Positive angles follow the right-hand rule around the named machine
/// axis, viewed from the positive end of that axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Spindle axis tilt around machine X
    pub spindle_around_x_deg: f64,
    /// Spindle axis tilt around machine Y
    pub spindle_around_y_deg: f64,
    /// Z-axis travel tilt around machine X, when isolated
    pub z_axis_around_x_deg: Option<f64>,
    /// Z-axis travel tilt around machine Y, when isolated
    pub z_axis_around_y_deg: Option<f64>,
    /// Tool runout angle around machine X, bolt-head runs only
    pub runout_around_x_deg: Option<f64>,
    /// Tool runout angle around machine Y, bolt-head runs only
    pub runout_around_y_deg: Option<f64>,
}

impl CalibrationResult {
    /// Angle from the Z travel axis to the spindle axis around machine X.
    pub fn z_to_spindle_around_x_deg(&self) -> Option<f64> {
        Some(self.spindle_around_x_deg - self.z_axis_around_x_deg?)
    }

    /// Angle from the Z travel axis to the spindle axis around machine Y.
    pub fn z_to_spindle_around_y_deg(&self) -> Option<f64> {
        Some(self.spindle_around_y_deg - self.z_axis_around_y_deg?)
    }
}

impl fmt::Display for CalibrationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "spindle X {:+.4} deg, Y {:+.4} deg",
            self.spindle_around_x_deg, self.spindle_around_y_deg
        )?;
        if let (Some(zx), Some(zy)) = (self.z_axis_around_x_deg, self.z_axis_around_y_deg) {
            write!(f, "; z-axis X {:+.4} deg, Y {:+.4} deg", zx, zy)?;
        }
        if let (Some(rx), Some(ry)) = (self.runout_around_x_deg, self.runout_around_y_deg) {
            write!(f, "; runout X {:+.4} deg, Y {:+.4} deg", rx, ry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_report_requires_all_axes() {
        let report = AxisReport {
            x: Some(1.0),
            y: Some(2.0),
            z: None,
        };
        assert!(report.complete().is_none());

        let full = AxisReport {
            x: Some(1.0),
            y: Some(2.0),
            z: Some(3.0),
        };
        assert_eq!(full.complete(), Some(Position::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn gauge_end_directions_oppose() {
        assert_eq!(GaugeEnd::Left.direction(), -GaugeEnd::Right.direction());
    }

    #[test]
    fn z_to_spindle_needs_z_isolation() {
        let result = CalibrationResult {
            spindle_around_x_deg: 1.0,
            spindle_around_y_deg: -0.5,
            z_axis_around_x_deg: Some(0.25),
            z_axis_around_y_deg: None,
            runout_around_x_deg: None,
            runout_around_y_deg: None,
        };
        assert_eq!(result.z_to_spindle_around_x_deg(), Some(0.75));
        assert_eq!(result.z_to_spindle_around_y_deg(), None);
    }
}
