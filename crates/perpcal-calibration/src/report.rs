//! Progress and result reporting.

use perpcal_core::{CalibrationResult, CalibrationSample};
use tracing::info;

/// Receives progress as a calibration run advances.
pub trait Reporter {
    /// A new phase of the run started.
    fn stage(&mut self, description: &str);

    /// One spindle orientation was fully measured.
    fn sample(&mut self, sample: &CalibrationSample);

    /// The run finished and the angles were decomposed.
    fn result(&mut self, result: &CalibrationResult);
}

/// Reporter that writes through the tracing subscriber.
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn stage(&mut self, description: &str) {
        info!("{description}");
    }

    fn sample(&mut self, sample: &CalibrationSample) {
        info!(
            angle_deg = sample.angle_deg,
            left = %sample.left.position,
            right = %sample.right.position,
            "orientation measured"
        );
    }

    fn result(&mut self, result: &CalibrationResult) {
        info!(
            "spindle angle around X: {:+8.4} degrees off perpendicular",
            result.spindle_around_x_deg
        );
        info!(
            "spindle angle around Y: {:+8.4} degrees off perpendicular",
            result.spindle_around_y_deg
        );
        if let (Some(zx), Some(to_spindle)) = (
            result.z_axis_around_x_deg,
            result.z_to_spindle_around_x_deg(),
        ) {
            info!("z axis angle around X:  {:+8.4} degrees off perpendicular", zx);
            info!("z axis to spindle in X: {:+8.4} degrees", to_spindle);
        }
        if let (Some(zy), Some(to_spindle)) = (
            result.z_axis_around_y_deg,
            result.z_to_spindle_around_y_deg(),
        ) {
            info!("z axis angle around Y:  {:+8.4} degrees off perpendicular", zy);
            info!("z axis to spindle in Y: {:+8.4} degrees", to_spindle);
        }
        if let Some(rx) = result.runout_around_x_deg {
            info!("runout angle around X:  {:+8.4} degrees", rx);
        }
        if let Some(ry) = result.runout_around_y_deg {
            info!("runout angle around Y:  {:+8.4} degrees", ry);
        }
    }
}
