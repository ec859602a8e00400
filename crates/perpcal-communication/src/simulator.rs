//! Deterministic machine simulator.
//!
//! Models the kinematic chain of the machine analytically: the gantry
//! carries a tiltable Z axis, the Z axis carries a tiltable, rotatable
//! spindle, and the spindle carries the probed tool. Two setups are
//! supported:
//!
//! - feeler gauge: a rigid blade on an arm, swept over a fixed stylus
//! - bolt head: a shank on the spindle axis, probed against a fixed wire
//!   cross
//!
//! Contact moves are resolved by bisection along the commanded segment, so
//! results are exact to a tenth of a micron and perfectly repeatable. The
//! simulator speaks the same line protocol as the firmware, including the
//! `M800`/`M801`/`M802` misalignment injection commands.

use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use perpcal_core::{Result, RotationConfig, TargetConfig};
use tracing::debug;

use crate::channel::MotionChannel;
use crate::controller::MotionController;

/// Fixed stylus position in machine coordinates for the gauge setup, mm.
pub const STYLUS_POSITION: [f64; 3] = [500.0, 250.0, 40.0];

/// Machine position the gauge run is staged from, mm.
pub const GAUGE_START: [f64; 3] = [500.0, 250.0, 100.0];

/// Machine position the bolt-head run is staged from, mm.
pub const BOLT_START: [f64; 3] = [500.0, 250.0, 150.0];

/// Vertical extent of the simulated gauge blade, mm. Taller than a real
/// feeler gauge so every configured probe depth stays on the blade.
const BLADE_HEIGHT: f64 = 20.0;

/// Distance from the spindle nose plane down to the top of the tool, mm.
const TOOL_DROP: f64 = 35.0;

/// Flank length of the simulated bolt shank, mm.
const SHANK_LENGTH: f64 = 30.0;

/// Wire radius of the fixed probe cross, mm.
const WIRE_RADIUS: f64 = 2.0;

/// Half-length of each wire of the fixed probe cross, mm.
const WIRE_SPAN: f64 = 40.0;

/// Coarse contact scan step, mm.
const SCAN_STEP: f64 = 0.05;

/// Contact resolution of the bisection, mm.
const CONTACT_TOL: f64 = 1e-4;

/// Tool shape carried by the spindle.
#[derive(Debug, Clone, Copy)]
enum Tool {
    /// Gauge blade centered on the arm, local x along the arm.
    Blade {
        length: f64,
        thickness: f64,
        height: f64,
        stylus_width: f64,
    },
    /// Bolt shank centered on the spindle axis.
    Shank { width: f64 },
}

/// Fixed object the tool is probed against.
#[derive(Debug, Clone, Copy)]
enum Fixture {
    /// Point stylus (the probe wire tip) at a machine position.
    Stylus(Point3<f64>),
    /// Two crossed horizontal wires, one along X and one along Y.
    WireCross(Point3<f64>),
}

/// The simulated machine.
pub struct Simulator {
    machine: Vector3<f64>,
    origin: Vector3<f64>,
    z_axis_a: f64,
    z_axis_b: f64,
    spindle_a: f64,
    spindle_b: f64,
    spindle_angle: f64,
    tool_a: f64,
    tool_b: f64,
    arm_offset: f64,
    tool: Tool,
    fixture: Fixture,
}

impl Simulator {
    /// Feeler-gauge setup: blade dimensions from the target config, fixed
    /// stylus at [`STYLUS_POSITION`].
    pub fn gauge(target: &TargetConfig) -> Self {
        Self {
            machine: Vector3::from(GAUGE_START),
            origin: Vector3::zeros(),
            z_axis_a: 0.0,
            z_axis_b: 0.0,
            spindle_a: 0.0,
            spindle_b: 0.0,
            spindle_angle: 0.0,
            tool_a: 0.0,
            tool_b: 0.0,
            arm_offset: 0.0,
            tool: Tool::Blade {
                length: target.gauge_length,
                thickness: target.gauge_thickness,
                height: BLADE_HEIGHT,
                stylus_width: target.probe_width,
            },
            fixture: Fixture::Stylus(Point3::from(STYLUS_POSITION)),
        }
    }

    /// Bolt-head setup: shank on the spindle axis, wire cross under
    /// [`STYLUS_POSITION`].
    pub fn bolt_head(target: &TargetConfig) -> Self {
        Self {
            machine: Vector3::from(BOLT_START),
            origin: Vector3::zeros(),
            z_axis_a: 0.0,
            z_axis_b: 0.0,
            spindle_a: 0.0,
            spindle_b: 0.0,
            spindle_angle: 0.0,
            tool_a: 0.0,
            tool_b: 0.0,
            arm_offset: 0.0,
            tool: Tool::Shank {
                width: target.bolt_width,
            },
            fixture: Fixture::WireCross(Point3::from(STYLUS_POSITION)),
        }
    }

    /// Current position in workspace coordinates.
    pub fn workspace_position(&self) -> Vector3<f64> {
        self.machine - self.origin
    }

    /// Current spindle rotation, radians.
    pub fn spindle_angle(&self) -> f64 {
        self.spindle_angle
    }

    /// Whether the tool and the fixture are in contact.
    pub fn is_touching(&self) -> bool {
        let pose = self.spindle_pose();
        match (self.tool, self.fixture) {
            (
                Tool::Blade {
                    length,
                    thickness,
                    height,
                    stylus_width,
                },
                Fixture::Stylus(stylus),
            ) => {
                let blade = pose * Translation3::new(self.arm_offset, 0.0, 0.0);
                let local = blade.inverse_transform_point(&stylus);
                local.x.abs() <= length / 2.0 + stylus_width / 2.0
                    && local.y.abs() <= thickness / 2.0 + stylus_width / 2.0
                    && local.z >= -(TOOL_DROP + height)
                    && local.z <= -TOOL_DROP
            }
            (Tool::Shank { width }, Fixture::WireCross(center)) => {
                let inverse = pose.inverse();
                let along_x = |s: f64| Point3::new(center.x + s, center.y, center.z);
                let along_y = |s: f64| Point3::new(center.x, center.y + s, center.z);
                self.wire_hits_shank(&inverse, width, along_x)
                    || self.wire_hits_shank(&inverse, width, along_y)
            }
            // constructors pair tools and fixtures consistently
            _ => false,
        }
    }

    fn wire_hits_shank<F: Fn(f64) -> Point3<f64>>(
        &self,
        inverse: &Isometry3<f64>,
        width: f64,
        wire: F,
    ) -> bool {
        const SAMPLES: usize = 64;
        for i in 0..=SAMPLES {
            let s = -WIRE_SPAN + 2.0 * WIRE_SPAN * (i as f64) / (SAMPLES as f64);
            let local = inverse.transform_point(&wire(s));
            if local.x.abs() <= width / 2.0 + WIRE_RADIUS
                && local.y.abs() <= width / 2.0 + WIRE_RADIUS
                && local.z >= -(TOOL_DROP + SHANK_LENGTH) - WIRE_RADIUS
                && local.z <= -TOOL_DROP
            {
                return true;
            }
        }
        false
    }

    fn spindle_pose(&self) -> Isometry3<f64> {
        let rx = |a: f64| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), a);
        let ry = |a: f64| UnitQuaternion::from_axis_angle(&Vector3::y_axis(), a);
        let rz = |a: f64| UnitQuaternion::from_axis_angle(&Vector3::z_axis(), a);

        let gantry = Isometry3::from_parts(
            Translation3::new(self.machine.x, self.machine.y, 0.0),
            rx(self.z_axis_a) * ry(self.z_axis_b),
        );
        let carriage = Isometry3::from_parts(
            Translation3::new(0.0, 0.0, self.machine.z),
            rx(self.spindle_a) * ry(self.spindle_b) * rz(self.spindle_angle) * rx(self.tool_a)
                * ry(self.tool_b),
        );
        gantry * carriage
    }

    /// Execute one protocol line and return the response lines.
    pub fn execute(&mut self, line: &str) -> Vec<String> {
        let line = line.split(';').next().unwrap_or("");
        let line = line.split('(').next().unwrap_or("");
        let line = line.split('#').next().unwrap_or("");
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let a = field(&fields, "A");
        let b = field(&fields, "B");
        let o = field(&fields, "O");
        let r = field(&fields, "R");

        let x = field(&fields, "X");
        let y = field(&fields, "Y");
        let z = field(&fields, "Z");
        let has_x = x.is_some();
        let has_y = y.is_some();
        let has_z = z.is_some();

        let ws = self.workspace_position();
        let x = x.flatten().unwrap_or(ws.x);
        let y = y.flatten().unwrap_or(ws.y);
        let z = z.flatten().unwrap_or(ws.z);

        match fields[0] {
            "G0" | "G1" => {
                self.machine = Vector3::new(x, y, z) + self.origin;
                ok()
            }
            "G28" => self.home(has_x, has_y, has_z),
            "G38.2" => {
                self.probe_move(Vector3::new(x, y, z), true);
                ok()
            }
            "G38.4" => {
                self.probe_move(Vector3::new(x, y, z), false);
                ok()
            }
            "G38.8" => self.rotate_arm(Vector3::new(x, y, z), true),
            "G38.9" => self.rotate_arm(Vector3::new(x, y, z), false),
            "G92" => {
                self.origin = self.machine - Vector3::new(x, y, z);
                ok()
            }
            "M114" => {
                let ws = self.workspace_position();
                vec![
                    format!("X:{:.3} Y:{:.3} Z:{:.3}", ws.x, ws.y, ws.z),
                    "ok".to_string(),
                ]
            }
            "M119" => vec![
                format!(
                    "z_min: {}",
                    if self.is_touching() { "TRIGGERED" } else { "open" }
                ),
                "ok".to_string(),
            ],
            "M800" => {
                if let Some(Some(a)) = a {
                    self.z_axis_a = a.to_radians();
                }
                if let Some(Some(b)) = b {
                    self.z_axis_b = b.to_radians();
                }
                ok()
            }
            "M801" => {
                if let Some(Some(a)) = a {
                    self.spindle_a = a.to_radians();
                }
                if let Some(Some(b)) = b {
                    self.spindle_b = b.to_radians();
                }
                if let Some(Some(r)) = r {
                    self.spindle_angle = wrap_angle(r.to_radians());
                }
                ok()
            }
            "M802" => {
                if let Some(Some(a)) = a {
                    self.tool_a = a.to_radians();
                }
                if let Some(Some(b)) = b {
                    self.tool_b = b.to_radians();
                }
                if let Some(Some(o)) = o {
                    self.arm_offset = o;
                }
                ok()
            }
            "G90" | "M17" | "M18" | "M110" | "M400" => ok(),
            _ => vec![format!("error:unknown gcode command: {}", line)],
        }
    }

    fn home(&mut self, x: bool, y: bool, z: bool) -> Vec<String> {
        if x || y || !z {
            return vec!["error:only G28 Z is supported".to_string()];
        }
        let ws = self.workspace_position();
        self.probe_move(Vector3::new(ws.x, ws.y, -self.origin.z - 50.0), true);
        self.origin.z = self.machine.z;
        debug!(z = self.machine.z, "homed Z against the fixture");
        ok()
    }

    /// Move along the commanded segment until contact changes state.
    ///
    /// `towards`: stop at the first contact; otherwise stop where contact
    /// is lost. Ends at the segment end if the state never changes.
    fn probe_move(&mut self, target_ws: Vector3<f64>, towards: bool) {
        let start = self.machine;
        let target = target_ws + self.origin;
        let movement = target - start;
        let distance = movement.norm();
        if distance <= 1e-9 {
            return;
        }

        let mut at = |t: f64| {
            self.machine = start + movement * t;
            self.is_touching()
        };

        if at(0.0) == towards {
            // already in the stop state, stay put
            self.machine = start;
            return;
        }

        let step = (SCAN_STEP / distance).min(1.0);
        let mut lo = 0.0;
        let mut hi = None;
        while lo < 1.0 {
            let next = (lo + step).min(1.0);
            if at(next) == towards {
                hi = Some(next);
                break;
            }
            lo = next;
        }

        let Some(mut hi) = hi else {
            self.machine = target;
            return;
        };

        let tol = CONTACT_TOL / distance;
        while hi - lo > tol {
            let mid = (lo + hi) / 2.0;
            if at(mid) == towards {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        self.machine = start + movement * hi;
    }

    /// Contact-walk step: move to the commanded position, then settle the
    /// spindle angle back onto the contact edge.
    fn rotate_arm(&mut self, target_ws: Vector3<f64>, clockwise: bool) -> Vec<String> {
        self.machine = target_ws + self.origin;

        let direction = if clockwise { 1.0 } else { -1.0 };
        let radius = self.arm_offset.abs().max(1.0);
        let coarse = 0.1_f64.atan2(radius) * direction;

        // the commanded position may have stepped just past the contact
        // band; seek backwards onto it first
        if !self.is_touching() {
            let start = self.spindle_angle;
            let mut found = false;
            for i in 1..=150 {
                self.spindle_angle = wrap_angle(start - i as f64 * coarse);
                if self.is_touching() {
                    found = true;
                    break;
                }
            }
            if !found {
                self.spindle_angle = start;
                return vec![
                    "// rotate: contact not regained".to_string(),
                    "ok".to_string(),
                ];
            }
        }

        // back off until the probe is no longer touching
        let start = self.spindle_angle;
        for i in 0..100 {
            self.spindle_angle = wrap_angle(start - i as f64 * coarse);
            if !self.is_touching() {
                break;
            }
        }

        // creep forward until it touches again
        let fine = 0.001_f64.atan2(radius) * direction;
        let start = self.spindle_angle;
        for i in 0..200 {
            self.spindle_angle = wrap_angle(start + i as f64 * fine);
            if self.is_touching() {
                return ok();
            }
        }

        vec![
            "// rotate: contact not regained".to_string(),
            "ok".to_string(),
        ]
    }
}

fn ok() -> Vec<String> {
    vec!["ok".to_string()]
}

fn wrap_angle(angle: f64) -> f64 {
    use std::f64::consts::TAU;
    (angle % TAU + TAU) % TAU
}

fn field(fields: &[&str], name: &str) -> Option<Option<f64>> {
    for part in &fields[1..] {
        if let Some(rest) = part.strip_prefix(name) {
            if rest.is_empty() {
                return Some(None);
            }
            return Some(rest.parse().ok());
        }
    }
    None
}

/// Misalignments injected into a simulated machine, all in degrees.
#[derive(Debug, Clone, Copy, Default)]
pub struct InjectedTilts {
    /// Z-axis tilt around machine X and Y
    pub z_axis: (f64, f64),
    /// Spindle tilt around machine X and Y
    pub spindle: (f64, f64),
    /// Tool/arm tilt around the spindle X and Y
    pub tool: (f64, f64),
}

/// Stage a simulated gauge run: inject the tilts, park the machine where
/// the blade tip sits over the stylus, and home Z down onto it.
///
/// Mirrors the operator placing the arm by hand before a real run.
pub fn stage_gauge_start<C: MotionChannel>(
    controller: &mut MotionController<C>,
    tilts: &InjectedTilts,
    target: &TargetConfig,
    rotation: &RotationConfig,
) -> Result<()> {
    controller.send(&format!("M800 A{} B{}", tilts.z_axis.0, tilts.z_axis.1))?;
    controller.send(&format!(
        "M801 A{} B{} R{}",
        tilts.spindle.0,
        tilts.spindle.1,
        rotation.approx_angle - 180.0
    ))?;
    controller.send(&format!(
        "M802 A{} B{} O{}",
        tilts.tool.0, tilts.tool.1, target.arm_length
    ))?;

    let angle = rotation.approx_angle.to_radians();
    let start_x = STYLUS_POSITION[0] + angle.cos() * target.arm_length - target.gauge_length / 2.0;
    let start_y = STYLUS_POSITION[1] + angle.sin() * target.arm_length;
    controller.send(&format!("G1 X{:.3} Y{:.3}", start_x, start_y))?;
    controller.home("Z")?;
    Ok(())
}

/// Stage a simulated bolt-head run: inject the tilts and home Z down onto
/// the fixed probe.
pub fn stage_bolt_start<C: MotionChannel>(
    controller: &mut MotionController<C>,
    tilts: &InjectedTilts,
) -> Result<()> {
    controller.send(&format!("M800 A{} B{}", tilts.z_axis.0, tilts.z_axis.1))?;
    controller.send(&format!(
        "M801 A{} B{} R0",
        tilts.spindle.0, tilts.spindle.1
    ))?;
    controller.send(&format!("M802 A{} B{} O0", tilts.tool.0, tilts.tool.1))?;
    controller.home("Z")?;
    Ok(())
}
