//! Manual steps the machine cannot do by itself.

use perpcal_core::Result;
use perpcal_communication::{MotionChannel, MotionController};
use std::io::{self, BufRead, Write};
use tracing::info;

/// A step the operator has to perform by hand mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualStep {
    /// Turn the tool half a revolution in the collet.
    RotateTool180,
}

/// Carries out manual steps, or stands in for the operator against the
/// simulator.
pub trait Operator<C: MotionChannel> {
    fn perform(&mut self, step: ManualStep, controller: &mut MotionController<C>) -> Result<()>;
}

/// Prompts on the console and waits for the operator to confirm.
#[derive(Debug, Default)]
pub struct ConsoleOperator;

impl<C: MotionChannel> Operator<C> for ConsoleOperator {
    fn perform(&mut self, step: ManualStep, _controller: &mut MotionController<C>) -> Result<()> {
        match step {
            ManualStep::RotateTool180 => {
                print!("Rotate the end mill 180 degrees and press Enter to continue...");
                io::stdout().flush()?;
                let mut line = String::new();
                io::stdin().lock().read_line(&mut line)?;
            }
        }
        Ok(())
    }
}

/// Performs the manual steps through simulator control codes instead of a
/// human.
#[derive(Debug, Default)]
pub struct SimulatedOperator;

impl<C: MotionChannel> Operator<C> for SimulatedOperator {
    fn perform(&mut self, step: ManualStep, controller: &mut MotionController<C>) -> Result<()> {
        match step {
            ManualStep::RotateTool180 => {
                info!("rotating the simulated tool 180 degrees");
                controller.send("M801 R180")?;
            }
        }
        Ok(())
    }
}
