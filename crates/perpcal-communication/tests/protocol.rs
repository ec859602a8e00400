//! Protocol client round trips against the in-process simulator.

use perpcal_communication::{
    stage_gauge_start, InjectedTilts, MotionController, Prober, Simulator, SimulatorChannel,
    GAUGE_START,
};
use perpcal_core::{RotationConfig, TargetConfig};

fn gauge_controller() -> MotionController<SimulatorChannel> {
    let target = TargetConfig::default();
    let channel = SimulatorChannel::new(Simulator::gauge(&target));
    let mut controller = MotionController::new(channel);
    controller.connect().unwrap();
    controller
}

#[test]
fn connect_and_query_position() {
    let mut controller = gauge_controller();
    let position = controller.query_position().unwrap();
    assert!((position.x - GAUGE_START[0]).abs() < 1e-9);
    assert!((position.y - GAUGE_START[1]).abs() < 1e-9);
    assert!((position.z - GAUGE_START[2]).abs() < 1e-9);
}

#[test]
fn moves_round_trip_through_the_wire_format() {
    let mut controller = gauge_controller();
    controller
        .move_to(480.25, 251.5, 60.0, 8.0, false, true)
        .unwrap();
    let position = controller.query_position().unwrap();
    assert!((position.x - 480.25).abs() < 1e-3);
    assert!((position.y - 251.5).abs() < 1e-3);
    assert!((position.z - 60.0).abs() < 1e-3);
}

#[test]
fn zeroing_redefines_the_workspace() {
    let mut controller = gauge_controller();
    controller.move_to(480.0, 250.0, 60.0, 8.0, false, true).unwrap();
    controller.zero_position(0.0, 0.0, 0.0).unwrap();
    let position = controller.query_position().unwrap();
    assert!(position.x.abs() < 1e-9 && position.y.abs() < 1e-9 && position.z.abs() < 1e-9);
    controller.move_to(1.0, 0.0, 0.0, 8.0, false, true).unwrap();
    let position = controller.query_position().unwrap();
    assert!((position.x - 1.0).abs() < 1e-9);
}

#[test]
fn staging_homes_onto_the_blade() {
    let target = TargetConfig::default();
    let rotation = RotationConfig::default();
    let mut controller = gauge_controller();
    stage_gauge_start(
        &mut controller,
        &InjectedTilts::default(),
        &target,
        &rotation,
    )
    .unwrap();
    assert_eq!(controller.probe_triggered("z_min").unwrap(), Some(true));
    let position = controller.query_position().unwrap();
    assert!(position.z.abs() < 1e-6, "homing zeroes Z, got {}", position.z);
}

#[test]
fn probe_stops_on_the_front_face() {
    let target = TargetConfig::default();
    let rotation = RotationConfig::default();
    let mut controller = gauge_controller();
    stage_gauge_start(
        &mut controller,
        &InjectedTilts::default(),
        &target,
        &rotation,
    )
    .unwrap();
    controller.zero_position(0.0, 0.0, 0.0).unwrap();
    controller.move_to(0.0, 0.0, 10.0, 3.0, false, true).unwrap();
    assert_eq!(controller.probe_triggered("z_min").unwrap(), Some(false));

    controller.move_to(5.0, -13.5, -9.0, 3.0, false, true).unwrap();
    let contact = controller.probe_to(5.0, 0.0, -9.0, 1.0, true).unwrap();
    assert_eq!(controller.probe_triggered("z_min").unwrap(), Some(true));
    let expected = -(target.gauge_thickness / 2.0 + target.probe_width / 2.0);
    assert!((contact.y - expected).abs() < 0.01, "contact.y = {}", contact.y);
}

#[test]
fn probe_retry_settles_on_the_same_surface() {
    let target = TargetConfig::default();
    let rotation = RotationConfig::default();
    let mut controller = gauge_controller();
    stage_gauge_start(
        &mut controller,
        &InjectedTilts::default(),
        &target,
        &rotation,
    )
    .unwrap();
    controller.zero_position(0.0, 0.0, 0.0).unwrap();
    controller.move_to(5.0, -13.5, -9.0, 3.0, false, true).unwrap();

    let prober = Prober::default();
    let first = prober
        .probe_with_retry(&mut controller, 5.0, 0.0, -9.0, 1.0, true)
        .unwrap();
    // release and probe again; the settled contact must repeat exactly
    let _ = controller.probe_to(5.0, -13.5, -9.0, 1.0, false).unwrap();
    let second = prober
        .probe_with_retry(&mut controller, 5.0, 0.0, -9.0, 1.0, true)
        .unwrap();
    assert!((first.y - second.y).abs() < 1e-3, "{} vs {}", first.y, second.y);
}

#[test]
fn tilt_injection_shifts_the_contact() {
    let target = TargetConfig::default();
    let rotation = RotationConfig::default();

    let mut level = gauge_controller();
    stage_gauge_start(&mut level, &InjectedTilts::default(), &target, &rotation).unwrap();
    level.zero_position(0.0, 0.0, 0.0).unwrap();
    level.move_to(5.0, -13.5, -9.0, 3.0, false, true).unwrap();
    let level_contact = level.probe_to(5.0, 0.0, -9.0, 1.0, true).unwrap();

    let tilts = InjectedTilts {
        spindle: (1.0, 0.0),
        ..Default::default()
    };
    let mut tilted = gauge_controller();
    stage_gauge_start(&mut tilted, &tilts, &target, &rotation).unwrap();
    tilted.zero_position(0.0, 0.0, 0.0).unwrap();
    tilted.move_to(5.0, -13.5, -9.0, 3.0, false, true).unwrap();
    let tilted_contact = tilted.probe_to(5.0, 0.0, -9.0, 1.0, true).unwrap();

    // a spindle tilt around X moves the blade sideways at depth
    assert!(
        (tilted_contact.y - level_contact.y).abs() > 0.02,
        "level {} vs tilted {}",
        level_contact.y,
        tilted_contact.y
    );
}
