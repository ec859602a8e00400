//! Probing sequences and tilt decomposition.
//!
//! Builds on [`perpcal_communication`] to drive a Marlin-style controller
//! through the calibration procedures: center finding on the feeler gauge,
//! contact-walk rotation of the spindle, bolt-shank probing, and the
//! least-squares decomposition of the collected contacts into spindle,
//! Z-axis and runout angles.

pub mod center;
pub mod fitter;
pub mod operator;
pub mod pipeline;
pub mod report;
pub mod rotate;
pub mod session;
pub mod target;

pub use center::{CenterFind, CenterFinder};
pub use fitter::{fit_bolt_plane, GeometryFitter};
pub use operator::{ConsoleOperator, ManualStep, Operator, SimulatedOperator};
pub use pipeline::run_feeler_gauge;
pub use report::{LogReporter, Reporter};
pub use rotate::{rotation_stages, RotationWalker, StagePoints};
pub use session::{ProbeSession, PROBE_PIN};
pub use target::{BoltHeadTarget, BoltLayout, FeelerGaugeTarget, TargetGeometry};
