//! Per-sensor calibration and validity checking.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{FlightError, SensorFault};

use super::{Micros, Reading, SensorSample, SensorSource};

/// Bias/scale calibration applied to a raw three-axis reading.
///
/// `calibrated = (raw - bias) * scale`, per axis. Factory defaults are
/// identity; field calibration (pad averaging) fills in the bias.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub bias: [f32; 3],
    pub scale: [f32; 3],
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            bias: [0.0; 3],
            scale: [1.0; 3],
        }
    }
}

impl Calibration {
    pub fn apply(&self, raw: [f32; 3]) -> [f32; 3] {
        [
            (raw[0] - self.bias[0]) * self.scale[0],
            (raw[1] - self.bias[1]) * self.scale[1],
            (raw[2] - self.bias[2]) * self.scale[2],
        ]
    }
}

/// Counts consecutive identical raw readings. A sensor that stops updating
/// its output registers keeps acknowledging bus reads, so this is the only
/// way to catch a wedged device.
#[derive(Debug, Default)]
struct StuckDetector {
    last: Option<[u32; 3]>,
    run: u16,
}

impl StuckDetector {
    /// Feed the raw bits of a reading; returns true once the run length
    /// reaches `limit`.
    fn check(&mut self, raw: [f32; 3], limit: u16) -> bool {
        let bits = [raw[0].to_bits(), raw[1].to_bits(), raw[2].to_bits()];
        if self.last == Some(bits) {
            self.run = self.run.saturating_add(1);
        } else {
            self.last = Some(bits);
            self.run = 0;
        }
        self.run >= limit
    }
}

/// Conditions one accelerometer source: calibration, range check, stuck
/// detection.
#[derive(Debug)]
pub struct AccelConditioner {
    source: SensorSource,
    calibration: Calibration,
    range_mps2: f32,
    stuck_limit: u16,
    stuck: StuckDetector,
    was_valid: bool,
}

impl AccelConditioner {
    pub fn new(source: SensorSource, calibration: Calibration, range_mps2: f32, stuck_limit: u16) -> Self {
        Self {
            source,
            calibration,
            range_mps2,
            stuck_limit,
            stuck: StuckDetector::default(),
            was_valid: true,
        }
    }

    /// Produce a sample from a raw reading. Failed checks clear `valid`, the
    /// sample is produced either way.
    pub fn condition(&mut self, timestamp_us: Micros, raw: [f32; 3]) -> SensorSample {
        let stuck = self.stuck.check(raw, self.stuck_limit);
        let calibrated = self.calibration.apply(raw);
        let in_range = calibrated.iter().all(|a| a.abs() <= self.range_mps2 * 1.05);

        let valid = in_range && !stuck;
        if !valid && self.was_valid {
            let fault = if stuck {
                SensorFault::Stuck
            } else {
                SensorFault::OutOfRange
            };
            warn!(
                "{}",
                FlightError::Sensor {
                    source: self.source,
                    fault
                }
            );
        }
        self.was_valid = valid;

        SensorSample {
            timestamp_us,
            source: self.source,
            reading: Reading::Accel(calibrated),
            valid,
        }
    }

    /// A bus-level failure still yields a (marked-invalid) sample so the
    /// logger records the outage.
    pub fn failed(&self, timestamp_us: Micros) -> SensorSample {
        SensorSample {
            timestamp_us,
            source: self.source,
            reading: Reading::Accel([0.0; 3]),
            valid: false,
        }
    }
}

/// Conditions the barometer: offset calibration, plausibility window, stuck
/// detection.
#[derive(Debug)]
pub struct BaroConditioner {
    offset_pa: f32,
    min_pa: f32,
    max_pa: f32,
    stuck_limit: u16,
    stuck: StuckDetector,
    was_valid: bool,
}

impl BaroConditioner {
    pub fn new(offset_pa: f32, min_pa: f32, max_pa: f32, stuck_limit: u16) -> Self {
        Self {
            offset_pa,
            min_pa,
            max_pa,
            stuck_limit,
            stuck: StuckDetector::default(),
            was_valid: true,
        }
    }

    pub fn condition(&mut self, timestamp_us: Micros, raw_pa: f32) -> SensorSample {
        let stuck = self.stuck.check([raw_pa, 0.0, 0.0], self.stuck_limit);
        let pressure = raw_pa - self.offset_pa;
        let in_range = pressure >= self.min_pa && pressure <= self.max_pa;

        let valid = in_range && !stuck;
        if !valid && self.was_valid {
            let fault = if stuck {
                SensorFault::Stuck
            } else {
                SensorFault::OutOfRange
            };
            warn!(
                "{}",
                FlightError::Sensor {
                    source: SensorSource::Barometer,
                    fault
                }
            );
        }
        self.was_valid = valid;

        SensorSample {
            timestamp_us,
            source: SensorSource::Barometer,
            reading: Reading::Pressure(pressure),
            valid,
        }
    }

    pub fn failed(&self, timestamp_us: Micros) -> SensorSample {
        SensorSample {
            timestamp_us,
            source: SensorSource::Barometer,
            reading: Reading::Pressure(0.0),
            valid: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_bias_and_scale() {
        let cal = Calibration {
            bias: [0.5, -0.5, 0.0],
            scale: [1.0, 1.0, 2.0],
        };
        let out = cal.apply([1.5, 0.5, 3.0]);
        assert_eq!(out, [1.0, 1.0, 6.0]);
    }

    #[test]
    fn test_out_of_range_marks_invalid() {
        let mut cond = AccelConditioner::new(
            SensorSource::LowGImu,
            Calibration::default(),
            16.0 * 9.80665,
            100,
        );
        let ok = cond.condition(0, [0.0, 0.0, 9.81]);
        assert!(ok.valid);

        let saturated = cond.condition(5_000, [0.0, 0.0, 400.0]);
        assert!(!saturated.valid);
        // The reading is preserved for the log even though it is invalid.
        assert_eq!(saturated.accel_z(), Some(400.0));
    }

    #[test]
    fn test_stuck_reading_marks_invalid() {
        let mut cond = AccelConditioner::new(
            SensorSource::HighGImu,
            Calibration::default(),
            200.0 * 9.80665,
            3,
        );
        for i in 0..3 {
            let s = cond.condition(i * 5_000, [1.0, 2.0, 9.81]);
            assert!(s.valid, "run {i} below the stuck limit");
        }
        let s = cond.condition(20_000, [1.0, 2.0, 9.81]);
        assert!(!s.valid, "fourth identical reading trips the detector");

        // A changing reading resets the run.
        let s = cond.condition(25_000, [1.0, 2.0, 9.82]);
        assert!(s.valid);
    }

    #[test]
    fn test_baro_window() {
        let mut cond = BaroConditioner::new(0.0, 1_000.0, 110_000.0, 100);
        assert!(cond.condition(0, 101_325.0).valid);
        assert!(!cond.condition(10_000, 500_000.0).valid);
        assert!(!cond.condition(20_000, 0.0).valid);
    }
}
