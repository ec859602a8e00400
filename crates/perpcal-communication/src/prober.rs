//! Probe retry layer.
//!
//! A single `G38.2` can report contact a fraction early when the trigger
//! input bounces, so every probe is issued a fixed number of times; the
//! later attempts start from the contact point and settle onto the surface.
//! Whether the final position is a real contact is judged by the caller
//! through the endstop query.

use perpcal_core::{Error, Position, Result};

use crate::channel::MotionChannel;
use crate::controller::MotionController;

/// Repeats probe commands a fixed number of times.
#[derive(Debug, Clone, Copy)]
pub struct Prober {
    /// Number of times to issue each probe command.
    pub attempts: u32,
}

impl Default for Prober {
    fn default() -> Self {
        Self { attempts: 3 }
    }
}

impl Prober {
    /// Probe toward (or away from) `(x, y, z)`, repeating the command
    /// `attempts` times, and return the final settled position.
    pub fn probe_with_retry<C: MotionChannel>(
        &self,
        controller: &mut MotionController<C>,
        x: f64,
        y: f64,
        z: f64,
        mm_per_second: f64,
        towards: bool,
    ) -> Result<Position> {
        let mut position = None;
        for _ in 0..self.attempts {
            position = Some(controller.probe_to(x, y, z, mm_per_second, towards)?);
        }
        position.ok_or_else(|| Error::other("prober configured with zero attempts"))
    }
}
