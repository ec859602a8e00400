//! Stand-alone machine simulator speaking the line protocol on stdio.
//!
//! Useful for exercising the calibration binary end to end without
//! hardware: run `perpcal` with the `subprocess` transport pointing at
//! this executable.

use std::io::{self, BufRead, Write};

use anyhow::bail;
use perpcal_communication::Simulator;
use perpcal_core::TargetConfig;

fn main() -> anyhow::Result<()> {
    let mut bolt = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--bolt" => bolt = true,
            // accepted for compatibility with interactive front ends
            "--no-keyboard" => {}
            other => bail!("unknown argument: {}", other),
        }
    }

    let target = TargetConfig::default();
    let mut simulator = if bolt {
        Simulator::bolt_head(&target)
    } else {
        Simulator::gauge(&target)
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        for response in simulator.execute(&line?) {
            writeln!(stdout, "{}", response)?;
        }
        stdout.flush()?;
    }
    Ok(())
}
