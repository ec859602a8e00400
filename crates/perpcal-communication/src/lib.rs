//! # perpcal communication
//!
//! Transports, protocol client, probe retry layer and the deterministic
//! machine simulator.

pub mod channel;
pub mod controller;
pub mod prober;
pub mod simulator;

pub use channel::{ChildProcessChannel, MotionChannel, SerialChannel, SimulatorChannel};
pub use controller::{feed_to_wire, parse_axis_report, parse_pin_state, MotionController};
pub use prober::Prober;
pub use simulator::{
    stage_bolt_start, stage_gauge_start, InjectedTilts, Simulator, GAUGE_START, STYLUS_POSITION,
};

impl<T: MotionChannel + ?Sized> MotionChannel for Box<T> {
    fn send_line(&mut self, line: &str) -> perpcal_core::Result<()> {
        (**self).send_line(line)
    }

    fn read_line(&mut self) -> perpcal_core::Result<Option<String>> {
        (**self).read_line()
    }
}
