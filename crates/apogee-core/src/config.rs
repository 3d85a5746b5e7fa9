//! Flight tuning parameters.
//!
//! Every physical threshold the detection logic depends on lives here rather
//! than in the code: liftoff and burnout levels, debounce windows, deployment
//! altitudes, pyro timing. Defaults are conservative values for a mid-power
//! dual-deploy flight and are expected to be overridden per airframe.
//!
//! The whole tree serializes with postcard so the firmware can persist a
//! field-tuned configuration next to the flight logs.

use serde::{Deserialize, Serialize};

use crate::sensors::Micros;

/// Standard gravity, m/s².
pub const GRAVITY_MPS2: f32 = 9.80665;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FlightConfig {
    pub sampling: SamplingConfig,
    pub estimator: EstimatorConfig,
    pub detection: DetectionConfig,
    pub pyro: PyroConfig,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig::default(),
            estimator: EstimatorConfig::default(),
            detection: DetectionConfig::default(),
            pyro: PyroConfig::default(),
        }
    }
}

impl FlightConfig {
    /// Serialize into `buf`, returning the used prefix.
    pub fn to_bytes<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8], postcard::Error> {
        postcard::to_slice(self, buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// Cadence and validity limits for the acquisition layer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SamplingConfig {
    /// Inertial sampling period. 5 ms = 200 Hz.
    pub inertial_period_us: Micros,
    /// Barometer is read every `baro_divider` inertial ticks (200 Hz / 8 = 25 Hz).
    pub baro_divider: u32,
    /// Upper bound on any single bus transaction.
    pub bus_timeout_us: Micros,
    /// Consecutive identical raw readings before a source is declared stuck.
    pub stuck_limit: u16,
    /// Low-G accelerometer measurement range, m/s² per axis.
    pub low_g_range_mps2: f32,
    /// High-G accelerometer measurement range, m/s² per axis.
    pub high_g_range_mps2: f32,
    /// Plausible static pressure window, Pa. Readings outside are invalid.
    pub pressure_min_pa: f32,
    pub pressure_max_pa: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            inertial_period_us: 5_000,
            baro_divider: 8,
            bus_timeout_us: 5_000,
            stuck_limit: 100,
            low_g_range_mps2: 16.0 * GRAVITY_MPS2,
            high_g_range_mps2: 200.0 * GRAVITY_MPS2,
            pressure_min_pa: 1_000.0,
            pressure_max_pa: 110_000.0,
        }
    }
}

/// State estimator tuning.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EstimatorConfig {
    /// Above this the low-G unit is considered saturated and the high-G unit
    /// takes over.
    pub accel_saturation_mps2: f32,
    /// Both accelerometers valid but differing by more than this clears the
    /// source-agreement flag.
    pub disagreement_tolerance_mps2: f32,
    /// With no valid source for this long the estimate is held at
    /// last-known-good with minimum confidence.
    pub sensor_timeout_us: Micros,
    /// Barometric altitude measurement noise variance, m².
    pub baro_noise_var: f32,
    /// Acceleration process noise variance, (m/s²)².
    pub accel_process_var: f32,
    /// Process noise inflation while propagating without an accelerometer.
    pub coast_process_var: f32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            accel_saturation_mps2: 15.0 * GRAVITY_MPS2,
            disagreement_tolerance_mps2: 2.0 * GRAVITY_MPS2,
            sensor_timeout_us: 250_000,
            baro_noise_var: 4.0,
            accel_process_var: 0.25,
            coast_process_var: 100.0,
        }
    }
}

/// Flight event detection thresholds and debounce windows.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    /// Net vertical acceleration that counts as liftoff.
    pub liftoff_accel_mps2: f32,
    /// Liftoff acceleration must be sustained this long.
    pub liftoff_debounce_us: Micros,
    /// Net vertical acceleration below this during boost counts as burnout.
    pub burnout_accel_mps2: f32,
    pub burnout_debounce_us: Micros,
    /// Descent velocity (below zero) required before apogee is declared.
    pub apogee_hysteresis_mps: f32,
    /// The descending condition must hold this long near the peak.
    pub apogee_debounce_us: Micros,
    /// Hard ceiling on coast duration; apogee is forced when it expires.
    pub coast_timeout_us: Micros,
    /// Main parachute deployment altitude, m AGL.
    pub main_deploy_altitude_m: f32,
    /// |velocity| below this counts toward landing detection.
    pub landing_velocity_mps: f32,
    /// Altitude must stay below this AGL for landing detection.
    pub landing_altitude_m: f32,
    pub landing_debounce_us: Micros,
    /// Persistent sensor silence or estimator disagreement longer than this
    /// aborts the flight.
    pub fault_window_us: Micros,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            liftoff_accel_mps2: 3.0 * GRAVITY_MPS2,
            liftoff_debounce_us: 100_000,
            burnout_accel_mps2: 0.5 * GRAVITY_MPS2,
            burnout_debounce_us: 200_000,
            apogee_hysteresis_mps: 2.0,
            apogee_debounce_us: 300_000,
            coast_timeout_us: 30_000_000,
            main_deploy_altitude_m: 300.0,
            landing_velocity_mps: 1.0,
            landing_altitude_m: 30.0,
            landing_debounce_us: 5_000_000,
            fault_window_us: 2_000_000,
        }
    }
}

/// Ignition timing and channel population.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PyroConfig {
    /// How long the firing signal is held on a channel.
    pub dwell_us: Micros,
    /// Window after firing within which the bridgewire must burn through
    /// (continuity loss) before the backup channel fires.
    pub backup_deadline_us: Micros,
    /// Number of staging channels present on the airframe (0 for single
    /// stage dual-deploy).
    pub stage_count: u8,
}

impl Default for PyroConfig {
    fn default() -> Self {
        Self {
            dwell_us: 1_000_000,
            backup_deadline_us: 1_500_000,
            stage_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_postcard_round_trip() {
        let config = FlightConfig::default();
        let mut buf = [0u8; 256];
        let used = config.to_bytes(&mut buf).unwrap();
        let decoded = FlightConfig::from_bytes(used).unwrap();
        assert_eq!(config, decoded);
    }

    #[test]
    fn test_defaults_are_sane() {
        let config = FlightConfig::default();
        assert!(config.detection.liftoff_accel_mps2 > 2.0 * GRAVITY_MPS2);
        assert!(config.detection.burnout_accel_mps2 < config.detection.liftoff_accel_mps2);
        assert!(config.estimator.accel_saturation_mps2 < config.sampling.high_g_range_mps2);
        assert!(config.pyro.backup_deadline_us > config.pyro.dwell_us);
    }
}
