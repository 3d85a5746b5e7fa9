//! Sensor acquisition layer.
//!
//! Raw bus readings are calibrated, range- and stuck-checked, and stamped
//! into [`SensorSample`]s. Samples that fail validation are marked invalid
//! rather than discarded so the flight log keeps them for post-flight
//! diagnosis. One [`SampleBatch`] is produced per inertial sampling tick and
//! carries whatever sources actually read this tick.

mod conditioner;
pub mod pump;

pub use conditioner::{AccelConditioner, BaroConditioner, Calibration};
pub use pump::{AcquisitionPump, InertialSensor, PressureSensor, SampleBus};

use serde::{Deserialize, Serialize};

/// Monotonic microsecond timestamp.
pub type Micros = u64;

/// Which physical device produced a sample.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorSource {
    /// Low-G accelerometer/gyro unit (fine resolution, saturates in boost).
    LowGImu,
    /// High-G accelerometer (coarse, covers the full boost envelope).
    HighGImu,
    /// Static pressure sensor.
    Barometer,
}

/// A calibrated reading in physical units.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// Body-frame specific force, m/s². Z is the thrust axis, up on the pad.
    Accel([f32; 3]),
    /// Static pressure, Pa.
    Pressure(f32),
}

/// One calibrated sensor reading. Immutable once produced.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub timestamp_us: Micros,
    pub source: SensorSource,
    pub reading: Reading,
    /// Cleared when the reading failed a range or stuck check, or the bus
    /// read itself failed. Invalid samples still flow to the logger.
    pub valid: bool,
}

impl SensorSample {
    /// The vertical (thrust-axis) acceleration component, if this is an
    /// accelerometer sample.
    pub fn accel_z(&self) -> Option<f32> {
        match self.reading {
            Reading::Accel(a) => Some(a[2]),
            Reading::Pressure(_) => None,
        }
    }

    pub fn pressure(&self) -> Option<f32> {
        match self.reading {
            Reading::Pressure(p) => Some(p),
            Reading::Accel(_) => None,
        }
    }
}

/// Everything the sensors produced on one sampling tick.
///
/// A `None` slot means the source was not scheduled this tick (the barometer
/// runs at a divided cadence) or the read timed out entirely.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleBatch {
    pub timestamp_us: Micros,
    pub low_g: Option<SensorSample>,
    pub high_g: Option<SensorSample>,
    pub baro: Option<SensorSample>,
}

impl SampleBatch {
    pub fn new(timestamp_us: Micros) -> Self {
        Self {
            timestamp_us,
            low_g: None,
            high_g: None,
            baro: None,
        }
    }

    /// True when no slot carries a valid reading.
    pub fn all_invalid(&self) -> bool {
        ![self.low_g, self.high_g, self.baro]
            .iter()
            .flatten()
            .any(|s| s.valid)
    }
}

/// Barometric pressure to altitude via the standard atmosphere, relative to
/// a reference pressure captured on the pad.
pub fn pressure_to_altitude_m(pressure_pa: f32, reference_pa: f32) -> f32 {
    44_330.77 * (1.0 - libm::powf(pressure_pa / reference_pa, 0.190_263))
}
