//! Transports for the line-oriented machine protocol.
//!
//! Three implementations of [`MotionChannel`]:
//! - [`SerialChannel`] for real hardware over a USB serial port
//! - [`ChildProcessChannel`] for the simulator executable over piped stdio
//! - [`SimulatorChannel`] wrapping the in-process simulator (tests and the
//!   default run mode)

use perpcal_core::{Error, ProtocolError, Result};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;
use tracing::{debug, trace};

use crate::simulator::Simulator;

/// Blocking line transport to the machine.
///
/// `read_line` returns `None` at end-of-stream; transport faults surface as
/// [`ProtocolError::Io`].
pub trait MotionChannel {
    /// Send one line; the newline is appended here.
    fn send_line(&mut self, line: &str) -> Result<()>;

    /// Read one line, stripped of line endings. `None` means the peer
    /// closed the stream.
    fn read_line(&mut self) -> Result<Option<String>>;
}

/// Serial port transport.
pub struct SerialChannel {
    port: Box<dyn serialport::SerialPort>,
    reader: Vec<u8>,
    name: String,
}

impl SerialChannel {
    /// Open a serial port and prepare it for the handshake.
    ///
    /// Waits for the controller to come out of its open-triggered reset,
    /// then discards whatever it printed while booting.
    pub fn open(port_name: &str, baud_rate: u32, wait: Duration, timeout: Duration) -> Result<Self> {
        let mut port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| ProtocolError::Io {
                transport: port_name.to_string(),
                reason: e.to_string(),
            })?;
        debug!(port = port_name, baud = baud_rate, "serial port open, waiting for reset");
        std::thread::sleep(wait);
        port.clear(serialport::ClearBuffer::Input)
            .map_err(|e| ProtocolError::Io {
                transport: port_name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            port,
            reader: Vec::new(),
            name: port_name.to_string(),
        })
    }

    fn io_error(&self, e: impl std::fmt::Display) -> Error {
        ProtocolError::Io {
            transport: self.name.clone(),
            reason: e.to_string(),
        }
        .into()
    }
}

impl MotionChannel for SerialChannel {
    fn send_line(&mut self, line: &str) -> Result<()> {
        trace!(line, "serial >");
        self.port
            .write_all(format!("{}\n", line.trim()).as_bytes())
            .map_err(|e| self.io_error(e))?;
        self.port.flush().map_err(|e| self.io_error(e))
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.reader.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = self.reader.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                trace!(line, "serial <");
                return Ok(Some(line));
            }
            let mut buf = [0u8; 256];
            match self.port.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => self.reader.extend_from_slice(&buf[..n]),
                Err(e) => return Err(self.io_error(e)),
            }
        }
    }
}

/// Simulator executable over piped stdio.
pub struct ChildProcessChannel {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ChildProcessChannel {
    /// Spawn the simulator executable with piped stdio.
    pub fn spawn(executable: &str, extra_args: &[&str]) -> Result<Self> {
        let mut child = Command::new(executable)
            .arg("--no-keyboard")
            .args(extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| ProtocolError::Io {
                transport: executable.to_string(),
                reason: e.to_string(),
            })?;
        debug!(executable, "simulator subprocess spawned");
        let stdin = child.stdin.take().ok_or_else(|| {
            Error::from(ProtocolError::Io {
                transport: executable.to_string(),
                reason: "no stdin pipe".to_string(),
            })
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            Error::from(ProtocolError::Io {
                transport: executable.to_string(),
                reason: "no stdout pipe".to_string(),
            })
        })?;
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }
}

impl MotionChannel for ChildProcessChannel {
    fn send_line(&mut self, line: &str) -> Result<()> {
        trace!(line, "sim >");
        self.stdin
            .write_all(format!("{}\n", line.trim()).as_bytes())
            .map_err(|e| ProtocolError::Io {
                transport: "simulator".to_string(),
                reason: e.to_string(),
            })?;
        self.stdin.flush().map_err(|e| {
            ProtocolError::Io {
                transport: "simulator".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = self.stdout.read_line(&mut line).map_err(|e| ProtocolError::Io {
            transport: "simulator".to_string(),
            reason: e.to_string(),
        })?;
        if n == 0 {
            return Ok(None);
        }
        let line = line.trim().to_string();
        trace!(line, "sim <");
        Ok(Some(line))
    }
}

impl Drop for ChildProcessChannel {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// In-process channel driving the deterministic simulator directly.
pub struct SimulatorChannel {
    simulator: Simulator,
    pending: std::collections::VecDeque<String>,
}

impl SimulatorChannel {
    /// Wrap a simulator instance.
    pub fn new(simulator: Simulator) -> Self {
        Self {
            simulator,
            pending: std::collections::VecDeque::new(),
        }
    }

    /// Access the simulated machine, for test assertions.
    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    /// Mutable access to the simulated machine.
    pub fn simulator_mut(&mut self) -> &mut Simulator {
        &mut self.simulator
    }
}

impl MotionChannel for SimulatorChannel {
    fn send_line(&mut self, line: &str) -> Result<()> {
        trace!(line, "sim >");
        for response in self.simulator.execute(line) {
            self.pending.push_back(response);
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        Ok(self.pending.pop_front())
    }
}
