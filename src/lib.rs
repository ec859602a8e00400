//! # perpcal
//!
//! Spindle and Z-axis perpendicularity calibration for CNC machines over a
//! Marlin-style serial protocol.
//!
//! The machine probes a known target with a touch probe and regresses the
//! contact positions into tilt angles:
//!
//! - **feeler gauge**: a thin blade on an arm is swept around the spindle
//!   over a fixed stylus; the circle its tip traces gives the spindle tilt
//!   and comparing centerlines at opposite orientations isolates the
//!   Z-axis travel tilt
//! - **bolt head**: the shank of a bolt chucked in the collet is probed
//!   from four sides at two tool rotations, giving the tool centerline
//!   angle and runout
//!
//! ## Architecture
//!
//! perpcal is organized as a workspace:
//!
//! 1. **perpcal-core** - types, error taxonomy, configuration, fitting
//! 2. **perpcal-communication** - transports, protocol client, simulator
//! 3. **perpcal-calibration** - probing sequences and tilt decomposition
//! 4. **perpcal** - the calibration binary and the stand-alone simulator

pub use perpcal_calibration::{
    BoltHeadTarget, BoltLayout, ConsoleOperator, FeelerGaugeTarget, LogReporter, Operator,
    ProbeSession, Reporter, SimulatedOperator, TargetGeometry,
};
pub use perpcal_communication::{
    ChildProcessChannel, InjectedTilts, MotionChannel, MotionController, SerialChannel, Simulator,
    SimulatorChannel,
};
pub use perpcal_core::{
    CalibrationConfig, CalibrationResult, Error, Position, Result, TransportKind,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the default configuration
///
/// Console output through the tracing subscriber, filtered by `RUST_LOG`
/// with an `info` default.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
    Ok(())
}
