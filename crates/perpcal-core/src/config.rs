//! Run configuration for perpcal
//!
//! Configuration is organized into logical sections:
//! - Connection settings (serial port / simulator subprocess)
//! - Feed rates
//! - Target geometry (feeler gauge or bolt head dimensions)
//! - Probing grids (rough and fine passes)
//! - Rotation sampling
//!
//! Defaults carry the values the procedure was developed with; a JSON file
//! can override any section.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Transport selection for the machine connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Serial/USB connection to real hardware
    Serial,
    /// Simulator executable over piped stdio
    Subprocess,
    /// In-process deterministic simulator
    Simulator,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Subprocess => write!(f, "subprocess"),
            Self::Simulator => write!(f, "simulator"),
        }
    }
}

/// Connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Transport to use
    pub transport: TransportKind,
    /// Serial port device path
    pub port: String,
    /// Baud rate for serial connections
    pub baud_rate: u32,
    /// Seconds to wait after opening the port before talking (board reset)
    pub wait_seconds: f64,
    /// Read timeout in milliseconds
    pub timeout_ms: u64,
    /// Simulator executable path for subprocess transport
    pub simulator_executable: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Simulator,
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 250_000,
            wait_seconds: 5.0,
            timeout_ms: 30_000,
            simulator_executable: "perpcal-sim".to_string(),
        }
    }
}

/// Feed rates, all in mm/s. The protocol layer converts to mm/min.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Vertical positioning moves
    pub z_speed: f64,
    /// Lateral positioning moves
    pub xy_speed: f64,
    /// Probing moves
    pub probe_speed: f64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            z_speed: 3.0,
            xy_speed: 8.0,
            probe_speed: 1.0,
        }
    }
}

/// Physical dimensions of the probed target and probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Gauge blade length along the arm, mm
    pub gauge_length: f64,
    /// Gauge blade thickness, mm
    pub gauge_thickness: f64,
    /// Gauge blade width (vertical extent), mm
    pub gauge_width: f64,
    /// Width of the fixed probe wire/stylus, mm
    pub probe_width: f64,
    /// Offset from the probed tip to the assumed feature centerline, mm.
    /// Approximation carried from the procedure this automates: the tip
    /// contact is not exactly on the centerline.
    pub tip_to_center: f64,
    /// Nominal arm radius from spindle axis to gauge center, mm
    pub arm_length: f64,
    /// Bolt shank width for the bolt-head variant, mm
    pub bolt_width: f64,
    /// Largest believable backlash spread before a depth is excluded, mm
    pub max_backlash: f64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            gauge_length: 89.0,
            gauge_thickness: 0.8,
            gauge_width: 13.0,
            probe_width: 4.0,
            tip_to_center: 3.0,
            arm_length: 150.0,
            bolt_width: 10.0,
            max_backlash: 0.06,
        }
    }
}

impl TargetConfig {
    /// Lateral clearance to keep between probe and gauge when staging.
    pub fn safe_distance(&self) -> f64 {
        self.gauge_width / 2.0 + self.probe_width / 2.0 + 5.0
    }

    /// Distance between the left and right find centers along the gauge.
    pub fn distance_between_centers(&self) -> f64 {
        self.gauge_length - 2.0 * self.tip_to_center
    }
}

/// One probing grid: inward offsets from the tip and probe depths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeGrid {
    /// Inward offsets from the approximate tip, mm
    pub offsets: Vec<f64>,
    /// Probe depths below workspace zero, mm (negative)
    pub depths: Vec<f64>,
    /// Step-back distance before each bracketing probe, mm
    pub min_probe_distance: f64,
}

impl ProbeGrid {
    /// Fine pass grid.
    pub fn fine() -> Self {
        Self {
            offsets: vec![5.0, 10.0, 15.0],
            depths: vec![-15.0, -9.0, -3.0],
            min_probe_distance: 1.0,
        }
    }

    /// Rough pass grid, used before the coordinate system is zeroed.
    pub fn rough() -> Self {
        Self {
            offsets: vec![4.0, 12.0],
            depths: vec![-15.0, -3.0],
            min_probe_distance: 5.0,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.offsets.len() < 2 || self.depths.len() < 2 {
            return Err(Error::other(format!(
                "{} grid needs at least 2 offsets and 2 depths",
                name
            )));
        }
        if self.depths.iter().any(|d| *d >= 0.0) {
            return Err(Error::other(format!("{} grid depths must be below zero", name)));
        }
        Ok(())
    }

    /// Deepest probe depth of the grid.
    pub fn min_depth(&self) -> f64 {
        self.depths.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

/// Rotation sampling parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Number of spindle orientations to sample; must be a positive
    /// multiple of 3
    pub num_angles: u32,
    /// Arc step during contact walking, degrees
    pub step_deg: f64,
    /// Reference angle the gauge is staged at, degrees
    pub approx_angle: f64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            num_angles: 6,
            step_deg: 1.0,
            approx_angle: 180.0,
        }
    }
}

/// Top-level run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Machine connection
    pub connection: ConnectionConfig,
    /// Feed rates
    pub feeds: FeedConfig,
    /// Target and probe geometry
    pub target: TargetConfig,
    /// Fine probing grid
    #[serde(default = "ProbeGrid::fine")]
    pub fine_grid: ProbeGrid,
    /// Rough probing grid
    #[serde(default = "ProbeGrid::rough")]
    pub rough_grid: ProbeGrid,
    /// Rotation sampling
    pub rotation: RotationConfig,
    /// Retract height between probing sequences, mm
    #[serde(default = "default_safe_height")]
    pub safe_height: f64,
}

fn default_safe_height() -> f64 {
    10.0
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            feeds: FeedConfig::default(),
            target: TargetConfig::default(),
            fine_grid: ProbeGrid::fine(),
            rough_grid: ProbeGrid::rough(),
            rotation: RotationConfig::default(),
            safe_height: default_safe_height(),
        }
    }
}

impl CalibrationConfig {
    /// Load configuration from a JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::other(format!("Failed to read config file: {}", e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::other(format!("Invalid JSON config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::other(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| Error::other(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.rotation.num_angles == 0 || self.rotation.num_angles % 3 != 0 {
            return Err(Error::other(
                "rotation.num_angles must be a positive multiple of 3",
            ));
        }
        self.fine_grid.validate("fine")?;
        self.rough_grid.validate("rough")?;
        if self.safe_height <= 0.0 {
            return Err(Error::other("safe_height must be positive"));
        }
        if self.feeds.probe_speed <= 0.0 || self.feeds.xy_speed <= 0.0 || self.feeds.z_speed <= 0.0
        {
            return Err(Error::other("feed rates must be positive"));
        }
        Ok(())
    }

    /// Z height used while walking the tool around the arc.
    pub fn rotate_height(&self) -> f64 {
        self.rough_grid.min_depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        CalibrationConfig::default().validate().unwrap();
    }

    #[test]
    fn rotate_height_tracks_rough_grid() {
        let config = CalibrationConfig::default();
        assert_eq!(config.rotate_height(), -15.0);
    }

    #[test]
    fn safe_distance_from_dimensions() {
        let target = TargetConfig::default();
        assert!((target.safe_distance() - 13.5).abs() < 1e-12);
        assert!((target.distance_between_centers() - 83.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_multiple_of_three_angles() {
        let mut config = CalibrationConfig::default();
        config.rotation.num_angles = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let config = CalibrationConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perpcal.json");
        config.save_to_file(&path).unwrap();
        let loaded = CalibrationConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.rotation.num_angles, config.rotation.num_angles);
        assert_eq!(loaded.fine_grid.offsets, config.fine_grid.offsets);
    }

    #[test]
    fn rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"{not json").unwrap();
        assert!(CalibrationConfig::load_from_file(&path).is_err());
    }
}
