//! # perpcal core
//!
//! Shared types and numerics for the perpendicularity calibration:
//! error taxonomy, machine/probe data models, run configuration, and
//! least-squares fitting. This crate does no I/O.

pub mod config;
pub mod data;
pub mod error;
pub mod fit;

pub use config::{
    CalibrationConfig, ConnectionConfig, FeedConfig, ProbeGrid, RotationConfig, TargetConfig,
    TransportKind,
};
pub use data::{
    AxisReport, BoltContact, CalibrationResult, CalibrationSample, CenterEstimate, Face, GaugeEnd,
    Position, ProbeAxis, ProbeContact,
};
pub use error::{Error, FitError, ProtocolError, Result, SafetyError};
