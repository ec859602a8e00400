//! Marlin-style protocol client.
//!
//! One command in flight at a time: every request blocks until the firmware
//! answers `ok`. Informational lines (`echo:busy:`, `busy:`, `//`) are
//! filtered out of responses and never treated as the terminator. The
//! machine is always re-queried for state; nothing is cached client-side.

use perpcal_core::{AxisReport, Position, ProtocolError, Result};
use tracing::{debug, trace};

use crate::channel::MotionChannel;

/// Convert a feed rate in mm/s to the mm/min value the wire format wants.
pub fn feed_to_wire(mm_per_second: f64) -> f64 {
    mm_per_second * 60.0
}

/// Parse `label:value` pairs out of a position report.
///
/// Only the first occurrence of each label counts, so trailing stepper
/// counts (`Count X: ...`) do not overwrite the position fields.
pub fn parse_axis_report(response: &str) -> AxisReport {
    let mut report = AxisReport::default();
    let mut rest = response;
    while let Some(idx) = rest.find(':') {
        let label = rest[..idx].trim();
        let after = &rest[idx + 1..];
        let (value, next) = match after.split_once(' ') {
            Some((v, n)) => (v, n),
            None => (after, ""),
        };
        rest = next.trim_start();
        let parsed = value.trim().parse::<f64>().ok();
        match label {
            "X" if report.x.is_none() => report.x = parsed,
            "Y" if report.y.is_none() => report.y = parsed,
            "Z" if report.z.is_none() => report.z = parsed,
            _ => {}
        }
    }
    report
}

/// Parse an endstop report for one pin. `None` when the pin is absent.
pub fn parse_pin_state(response: &str, pin: &str) -> Option<bool> {
    let prefix = format!("{}: ", pin);
    response
        .lines()
        .find(|line| line.starts_with(&prefix))
        .map(|line| line.contains("TRIGGERED"))
}

/// Synchronous motion controller over a [`MotionChannel`].
pub struct MotionController<C: MotionChannel> {
    channel: C,
}

impl<C: MotionChannel> MotionController<C> {
    /// Wrap a channel. Call [`connect`](Self::connect) before anything else.
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    /// Access the underlying channel, for test assertions.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Handshake with the machine.
    ///
    /// The first line after a connect can be garbled, so a no-op (`M110 N0`)
    /// is sent first, then the position is queried to prove the link parses
    /// cleanly, then absolute positioning is selected.
    pub fn connect(&mut self) -> Result<()> {
        self.send("M110 N0")?;
        let report = parse_axis_report(&self.send("M114")?);
        let position = report.complete().ok_or(ProtocolError::Handshake {
            reason: format!("incomplete position report: {:?}", report),
        })?;
        debug!(%position, "machine connected");
        self.send("G90")?;
        Ok(())
    }

    /// Send one command and collect its response payload.
    ///
    /// Blocks until `ok`; returns all non-filtered lines before it,
    /// newline-joined.
    pub fn send(&mut self, line: &str) -> Result<String> {
        self.channel.send_line(line)?;
        let mut result = String::new();
        loop {
            let response = match self.channel.read_line()? {
                Some(response) => response,
                None => {
                    return Err(ProtocolError::ConnectionClosed {
                        command: line.to_string(),
                    }
                    .into())
                }
            };
            if response == "ok" {
                break;
            }
            if response.starts_with("echo:busy:")
                || response.starts_with("busy:")
                || response.starts_with("//")
            {
                trace!(line = response, "skipping informational line");
                continue;
            }
            result.push_str(&response);
            result.push('\n');
        }
        Ok(result)
    }

    /// Linear or rapid move to an absolute position.
    pub fn move_to(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        mm_per_second: f64,
        rapid: bool,
        wait: bool,
    ) -> Result<()> {
        let command = if rapid { "G0" } else { "G1" };
        self.send(&format!(
            "{} X{:.6} Y{:.6} Z{:.6} F{:.6}",
            command,
            x,
            y,
            z,
            feed_to_wire(mm_per_second)
        ))?;
        if wait {
            self.synchronize()?;
        }
        Ok(())
    }

    /// One probing move, toward (`G38.2`) or away from (`G38.4`) contact.
    ///
    /// Always synchronizes and re-queries the machine for the position it
    /// actually stopped at.
    pub fn probe_to(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        mm_per_second: f64,
        towards: bool,
    ) -> Result<Position> {
        let command = if towards { "G38.2" } else { "G38.4" };
        self.send(&format!(
            "{} X{:.6} Y{:.6} Z{:.6} F{:.6}",
            command,
            x,
            y,
            z,
            feed_to_wire(mm_per_second)
        ))?;
        self.synchronize()?;
        self.query_position()
    }

    /// Home one axis.
    pub fn home(&mut self, axis: &str) -> Result<()> {
        self.send(&format!("G28 {}", axis))?;
        Ok(())
    }

    /// Redefine the workspace coordinate system so the current machine
    /// position reads as the given coordinates.
    pub fn zero_position(&mut self, x: f64, y: f64, z: f64) -> Result<()> {
        self.send(&format!("G92 X{:.6} Y{:.6} Z{:.6}", x, y, z))?;
        Ok(())
    }

    /// Enable or disable stepper drivers per axis.
    pub fn set_steppers(&mut self, x: bool, y: bool, z: bool, enabled: bool) -> Result<()> {
        let mut command = String::from(if enabled { "M17" } else { "M18" });
        if x {
            command.push_str(" X");
        }
        if y {
            command.push_str(" Y");
        }
        if z {
            command.push_str(" Z");
        }
        self.send(&command)?;
        Ok(())
    }

    /// Block until the motion queue has drained.
    pub fn synchronize(&mut self) -> Result<()> {
        self.send("M400")?;
        Ok(())
    }

    /// Query the current workspace position.
    pub fn query_position(&mut self) -> Result<Position> {
        let response = self.send("M114")?;
        parse_axis_report(&response).complete().ok_or_else(|| {
            ProtocolError::Malformed {
                command: "M114".to_string(),
                line: response.trim().to_string(),
            }
            .into()
        })
    }

    /// Query one endstop pin. `None` when the firmware does not report it.
    pub fn probe_triggered(&mut self, pin: &str) -> Result<Option<bool>> {
        let response = self.send("M119")?;
        Ok(parse_pin_state(&response, pin))
    }

    /// One contact-walk arc step at the given nominal contact position.
    pub fn walk_arc(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        clockwise: bool,
        mm_per_second: f64,
    ) -> Result<()> {
        let command = if clockwise { "G38.8" } else { "G38.9" };
        self.send(&format!(
            "{} X{:.6} Y{:.6} Z{:.6} F{:.6}",
            command,
            x,
            y,
            z,
            feed_to_wire(mm_per_second)
        ))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perpcal_core::Error;
    use std::collections::VecDeque;

    /// Channel fed from a script of canned responses.
    struct FakeChannel {
        sent: Vec<String>,
        responses: VecDeque<Option<String>>,
    }

    impl FakeChannel {
        fn new(script: &[&str]) -> Self {
            Self {
                sent: Vec::new(),
                responses: script.iter().map(|s| Some(s.to_string())).collect(),
            }
        }

        fn with_eof(mut self) -> Self {
            self.responses.push_back(None);
            self
        }
    }

    impl MotionChannel for FakeChannel {
        fn send_line(&mut self, line: &str) -> Result<()> {
            self.sent.push(line.to_string());
            Ok(())
        }

        fn read_line(&mut self) -> Result<Option<String>> {
            Ok(self.responses.pop_front().flatten())
        }
    }

    #[test]
    fn send_skips_busy_and_comment_lines() {
        let channel = FakeChannel::new(&[
            "echo:busy: processing",
            "busy: heating",
            "// note from firmware",
            "X:1.000 Y:2.000 Z:3.000",
            "ok",
        ]);
        let mut controller = MotionController::new(channel);
        let response = controller.send("M114").unwrap();
        assert_eq!(response.trim(), "X:1.000 Y:2.000 Z:3.000");
    }

    #[test]
    fn send_fails_on_eof_before_ok() {
        let channel = FakeChannel::new(&["X:1.000"]).with_eof();
        let mut controller = MotionController::new(channel);
        let err = controller.send("M114").unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::ConnectionClosed { .. })
        ));
    }

    #[test]
    fn parses_position_ignoring_count_fields() {
        let report =
            parse_axis_report("X:1.500 Y:-2.250 Z:0.100 E:0.000 Count X:120 Y:-180 Z:8");
        assert_eq!(report.x, Some(1.5));
        assert_eq!(report.y, Some(-2.25));
        assert_eq!(report.z, Some(0.1));
    }

    #[test]
    fn missing_axes_stay_absent() {
        let report = parse_axis_report("X:4.000 Y:5.000");
        assert_eq!(report.z, None);
        assert!(report.complete().is_none());
    }

    #[test]
    fn parses_pin_states() {
        let response = "x_min: open\nz_min: TRIGGERED\n";
        assert_eq!(parse_pin_state(response, "z_min"), Some(true));
        assert_eq!(parse_pin_state(response, "x_min"), Some(false));
        assert_eq!(parse_pin_state(response, "y_min"), None);
    }

    #[test]
    fn moves_send_feed_in_mm_per_minute() {
        let channel = FakeChannel::new(&["ok", "ok", "ok"]);
        let mut controller = MotionController::new(channel);
        controller.move_to(1.0, 2.0, 3.0, 8.0, false, false).unwrap();
        let sent = &controller.channel_mut().sent;
        assert!(sent[0].starts_with("G1 "));
        assert!(sent[0].ends_with("F480.000000"), "{}", sent[0]);
    }

    #[test]
    fn rapid_and_wait_variants() {
        let channel = FakeChannel::new(&["ok", "ok"]);
        let mut controller = MotionController::new(channel);
        controller.move_to(0.0, 0.0, 10.0, 3.0, true, true).unwrap();
        let sent = &controller.channel_mut().sent;
        assert!(sent[0].starts_with("G0 "));
        assert_eq!(sent[1], "M400");
    }

    #[test]
    fn handshake_rejects_garbled_position() {
        let channel = FakeChannel::new(&["ok", "X:oops Y:2.000 Z:3.000", "ok"]);
        let mut controller = MotionController::new(channel);
        let err = controller.connect().unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::Handshake { .. })
        ));
    }

    #[test]
    fn steppers_command_lists_axes() {
        let channel = FakeChannel::new(&["ok", "ok"]);
        let mut controller = MotionController::new(channel);
        controller.set_steppers(true, true, true, true).unwrap();
        controller.set_steppers(true, true, false, false).unwrap();
        let sent = &controller.channel_mut().sent;
        assert_eq!(sent[0], "M17 X Y Z");
        assert_eq!(sent[1], "M18 X Y");
    }
}
