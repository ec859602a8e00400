//! Error handling for perpcal
//!
//! Provides error types for all layers of the calibration run:
//! - Protocol errors (connection/wire level)
//! - Safety errors (probe state violations that must abort the run)
//! - Fit errors (degenerate measurement data)
//!
//! All error types use `thiserror` for ergonomic error handling. Every
//! variant here is fatal for the current run; transient probe misses are
//! absorbed below this layer and data-quality issues are only warned about.

use thiserror::Error;

/// Protocol error type
///
/// Represents errors on the Marlin-style line protocol: channel setup,
/// unexpected stream end, and unparsable responses.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// The channel reached end-of-stream before the `ok` terminator
    #[error("Connection closed while waiting for response to '{command}'")]
    ConnectionClosed {
        /// The command whose response never completed.
        command: String,
    },

    /// The initial handshake with the machine failed
    #[error("Handshake failed: {reason}")]
    Handshake {
        /// The reason the handshake failed.
        reason: String,
    },

    /// Underlying transport I/O error
    #[error("I/O error on {transport}: {reason}")]
    Io {
        /// The transport name (serial port, simulator process).
        transport: String,
        /// The reason for the I/O error.
        reason: String,
    },

    /// A response line could not be parsed
    #[error("Malformed response to '{command}': {line}")]
    Malformed {
        /// The command that produced the response.
        command: String,
        /// The response line that failed to parse.
        line: String,
    },
}

/// Safety error type
///
/// Represents probe-state violations. The probing sequences assume the
/// machine is where the operator staged it; any of these firing means that
/// assumption is wrong and continuing could crash the tool.
#[derive(Error, Debug, Clone)]
pub enum SafetyError {
    /// Probe already triggered before a descent was commanded
    #[error("Probe triggered before descent at ({x:.3}, {y:.3}, {z:.3}); tool may be touching the target")]
    TriggeredBeforeDescent {
        /// Commanded X position in mm.
        x: f64,
        /// Commanded Y position in mm.
        y: f64,
        /// Commanded Z position in mm.
        z: f64,
    },

    /// A toward-contact probe finished without the probe reading triggered
    #[error("Probe not triggered after contact move to ({x:.3}, {y:.3}, {z:.3}); target not where expected")]
    NotTriggeredAfterContact {
        /// Probe target X position in mm.
        x: f64,
        /// Probe target Y position in mm.
        y: f64,
        /// Probe target Z position in mm.
        z: f64,
    },

    /// Probe still triggered after retracting to safe height
    #[error("Probe still triggered after retract to z={z:.3}; wiring or staging fault")]
    TriggeredAfterRetract {
        /// Retract Z position in mm.
        z: f64,
    },

    /// Contact was lost while walking the tool around the rotation arc
    #[error("Lost contact during rotation near {angle_deg:.1} deg")]
    LostContactDuringRotation {
        /// Approximate spindle angle when contact was lost, degrees.
        angle_deg: f64,
    },
}

/// Fit error type
///
/// Represents measurement sets too degenerate to regress.
#[derive(Error, Debug, Clone)]
pub enum FitError {
    /// Fewer samples than model parameters
    #[error("Too few points for {model}: {got} < {needed}")]
    TooFewPoints {
        /// The model being fitted.
        model: String,
        /// The number of points available.
        got: usize,
        /// The minimum number of points required.
        needed: usize,
    },

    /// The design matrix has no solution (collinear or identical samples)
    #[error("Singular system fitting {model}")]
    Singular {
        /// The model being fitted.
        model: String,
    },
}

/// Main error type for perpcal
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Safety error
    #[error(transparent)]
    Safety(#[from] SafetyError),

    /// Fit error
    #[error(transparent)]
    Fit(#[from] FitError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a protocol error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Check if this is a safety error
    pub fn is_safety_error(&self) -> bool {
        matches!(self, Error::Safety(_))
    }

    /// Check if this is a fit error
    pub fn is_fit_error(&self) -> bool {
        matches!(self, Error::Fit(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
