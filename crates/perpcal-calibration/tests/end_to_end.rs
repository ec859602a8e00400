//! Full calibration runs against the deterministic simulator.
//!
//! Each test stages the simulated machine with known injected
//! misalignments, runs the complete probing sequence, and checks that the
//! fitted angles recover what was injected.

use perpcal_calibration::{
    BoltHeadTarget, BoltLayout, CenterFinder, FeelerGaugeTarget, ProbeSession, Reporter,
    RotationWalker, SimulatedOperator, TargetGeometry,
};
use perpcal_core::{
    CalibrationConfig, CalibrationResult, CalibrationSample, Error, GaugeEnd, Position,
    SafetyError,
};
use perpcal_communication::{
    stage_bolt_start, stage_gauge_start, InjectedTilts, MotionController, Simulator,
    SimulatorChannel,
};

/// Reporter that swallows everything.
struct Silent;

impl Reporter for Silent {
    fn stage(&mut self, _name: &str) {}
    fn sample(&mut self, _sample: &CalibrationSample) {}
    fn result(&mut self, _result: &CalibrationResult) {}
}

fn gauge_run(tilts: &InjectedTilts, config: &CalibrationConfig) -> CalibrationResult {
    let channel = SimulatorChannel::new(Simulator::gauge(&config.target));
    let mut controller = MotionController::new(channel);
    controller.connect().unwrap();
    stage_gauge_start(&mut controller, tilts, &config.target, &config.rotation).unwrap();

    let mut session = ProbeSession::new(&mut controller, config);
    FeelerGaugeTarget
        .calibrate(&mut session, &mut Silent)
        .unwrap()
}

fn bolt_run(tilts: &InjectedTilts, config: &CalibrationConfig) -> CalibrationResult {
    let channel = SimulatorChannel::new(Simulator::bolt_head(&config.target));
    let mut controller = MotionController::new(channel);
    controller.connect().unwrap();
    stage_bolt_start(&mut controller, tilts).unwrap();

    let mut session = ProbeSession::new(&mut controller, config);
    BoltHeadTarget::new(BoltLayout::default(), Box::new(SimulatedOperator))
        .calibrate(&mut session, &mut Silent)
        .unwrap()
}

#[test]
fn aligned_gauge_run_reads_level() {
    let config = CalibrationConfig::default();
    let result = gauge_run(&InjectedTilts::default(), &config);

    assert!(result.spindle_around_x_deg.abs() < 0.01, "{:?}", result);
    assert!(result.spindle_around_y_deg.abs() < 0.01, "{:?}", result);
    assert!(result.z_axis_around_x_deg.unwrap().abs() < 0.01, "{:?}", result);
    assert!(result.z_axis_around_y_deg.unwrap().abs() < 0.01, "{:?}", result);
    assert!(result.runout_around_x_deg.is_none());
}

#[test]
fn gauge_run_recovers_spindle_tilt() {
    let config = CalibrationConfig::default();
    let tilts = InjectedTilts {
        spindle: (1.0, 0.0),
        ..Default::default()
    };
    let result = gauge_run(&tilts, &config);

    assert!(
        (result.spindle_around_x_deg - 1.0).abs() < 0.05,
        "{:?}",
        result
    );
    assert!(result.spindle_around_y_deg.abs() < 0.05, "{:?}", result);
    // a pure spindle tilt leaves the travel direction vertical
    assert!(result.z_axis_around_x_deg.unwrap().abs() < 0.05, "{:?}", result);
}

#[test]
fn gauge_run_separates_z_axis_lean_from_spindle_tilt() {
    let config = CalibrationConfig::default();
    let tilts = InjectedTilts {
        z_axis: (0.5, 0.0),
        ..Default::default()
    };
    let result = gauge_run(&tilts, &config);

    // leaning the whole column tilts the spindle axis and the travel alike
    assert!(
        (result.spindle_around_x_deg - 0.5).abs() < 0.05,
        "{:?}",
        result
    );
    assert!(
        (result.z_axis_around_x_deg.unwrap() - 0.5).abs() < 0.05,
        "{:?}",
        result
    );
    assert!(result.spindle_around_y_deg.abs() < 0.05, "{:?}", result);
    assert!(result.z_axis_around_y_deg.unwrap().abs() < 0.05, "{:?}", result);
}

#[test]
fn center_find_reports_the_staged_gauge_angle() {
    let mut config = CalibrationConfig::default();
    config.rotation.approx_angle = 180.5;

    let channel = SimulatorChannel::new(Simulator::gauge(&config.target));
    let mut controller = MotionController::new(channel);
    controller.connect().unwrap();
    stage_gauge_start(
        &mut controller,
        &InjectedTilts::default(),
        &config.target,
        &config.rotation,
    )
    .unwrap();
    controller.zero_position(0.0, 0.0, 0.0).unwrap();
    controller
        .move_to(0.0, 0.0, config.safe_height, 3.0, false, true)
        .unwrap();

    let mut session = ProbeSession::new(&mut controller, &config);
    let find = CenterFinder::new(&config.fine_grid, GaugeEnd::Left, 0.0)
        .find(&mut session)
        .unwrap();
    assert!(
        (find.estimate.angle.to_degrees() - 0.5).abs() < 0.05,
        "angle = {} deg",
        find.estimate.angle.to_degrees()
    );
}

#[test]
fn walk_fails_when_the_arm_slips() {
    let config = CalibrationConfig::default();
    let channel = SimulatorChannel::new(Simulator::gauge(&config.target));
    let mut controller = MotionController::new(channel);
    controller.connect().unwrap();
    stage_gauge_start(
        &mut controller,
        &InjectedTilts::default(),
        &config.target,
        &config.rotation,
    )
    .unwrap();
    controller.zero_position(0.0, 0.0, 0.0).unwrap();
    controller
        .move_to(0.0, 0.0, config.safe_height, 3.0, false, true)
        .unwrap();

    let mut session = ProbeSession::new(&mut controller, &config);
    let find = CenterFinder::new(&config.fine_grid, GaugeEnd::Left, 0.0)
        .find(&mut session)
        .unwrap();

    // a badly mis-measured pivot walks the machine off the circle the
    // blade can follow; after enough steps the contact is out of reach
    let walker = RotationWalker {
        step_deg: config.rotation.step_deg,
    };
    let stages = perpcal_calibration::rotation_stages(10.0, config.target.safe_distance(), (83.0, 0.0));
    let mut approx_angle = config.rotation.approx_angle;
    let pivot = (
        find.estimate.position.x - 50.0,
        find.estimate.position.y,
    );
    let err = walker
        .advance(
            &mut session,
            &stages[0],
            Position::new(find.estimate.position.x, find.estimate.position.y, 10.0),
            pivot,
            &mut approx_angle,
            45,
            config.rotation.approx_angle,
        )
        .unwrap_err();
    assert!(
        matches!(
            err,
            Error::Safety(SafetyError::LostContactDuringRotation { .. })
        ),
        "unexpected error: {err}"
    );
}

#[test]
fn aligned_bolt_run_reads_level() {
    let config = CalibrationConfig::default();
    let result = bolt_run(&InjectedTilts::default(), &config);

    assert!(result.spindle_around_x_deg.abs() < 0.02, "{:?}", result);
    assert!(result.spindle_around_y_deg.abs() < 0.02, "{:?}", result);
    assert!(result.runout_around_x_deg.unwrap().abs() < 0.02, "{:?}", result);
    assert!(result.runout_around_y_deg.unwrap().abs() < 0.02, "{:?}", result);
    assert!(result.z_axis_around_x_deg.is_none());
}

#[test]
fn bolt_run_recovers_spindle_tilt() {
    let config = CalibrationConfig::default();
    let tilts = InjectedTilts {
        spindle: (0.5, 0.0),
        ..Default::default()
    };
    let result = bolt_run(&tilts, &config);

    assert!(
        (result.spindle_around_x_deg - 0.5).abs() < 0.05,
        "{:?}",
        result
    );
    assert!(result.spindle_around_y_deg.abs() < 0.05, "{:?}", result);
    assert!(result.runout_around_x_deg.unwrap().abs() < 0.05, "{:?}", result);
}

#[test]
fn bolt_run_attributes_tool_lean_to_runout() {
    let config = CalibrationConfig::default();
    let tilts = InjectedTilts {
        tool: (0.5, 0.0),
        ..Default::default()
    };
    let result = bolt_run(&tilts, &config);

    // a bent tool averages out of the centerline and shows up as runout
    assert!(result.spindle_around_x_deg.abs() < 0.05, "{:?}", result);
    assert!(
        (result.runout_around_x_deg.unwrap() - 0.5).abs() < 0.05,
        "{:?}",
        result
    );
    assert!(result.runout_around_y_deg.unwrap().abs() < 0.05, "{:?}", result);
}
