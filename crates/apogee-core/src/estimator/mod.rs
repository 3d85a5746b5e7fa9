//! State estimator.
//!
//! Fuses the two accelerometers and the barometer into one altitude /
//! vertical-velocity estimate per sampling tick. The low-G unit is preferred
//! while it is inside its saturation range; the high-G unit takes over during
//! boost. Barometric altitude corrects the integrated state through a
//! two-state Kalman filter. Missing or invalid sources widen the filter
//! covariance (reduced confidence) rather than stopping the stream: exactly
//! one estimate is produced per tick, no matter what the sensors did.

mod kalman;

pub use kalman::VerticalFilter;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::{EstimatorConfig, GRAVITY_MPS2};
use crate::sensors::{Micros, SampleBatch, SensorSample, pressure_to_altitude_m};

/// Fused vertical state, one per sampling tick. Superseded by the next
/// estimate, never retroactively mutated.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StateEstimate {
    pub timestamp_us: Micros,
    /// Altitude above ground level, m.
    pub altitude_m: f32,
    /// Vertical velocity, m/s, up positive.
    pub velocity_mps: f32,
    /// Net vertical acceleration (gravity removed), m/s².
    pub accel_mps2: f32,
    /// 0.0 (sensor-blind) to 1.0 (fresh measurements, tight covariance).
    pub confidence: f32,
    /// Cleared when both accelerometers are valid yet disagree beyond the
    /// configured tolerance. Reduced confidence, not a failure.
    pub source_agreement: bool,
}

/// Minimum confidence reported while holding last-known-good state.
pub const CONFIDENCE_FLOOR: f32 = 0.0;

pub struct Estimator {
    filter: VerticalFilter,
    config: EstimatorConfig,
    nominal_dt_us: Micros,
    /// Running pad-pressure reference, filled while the vehicle is idle.
    pad_pressure_pa: Option<f32>,
    last_tick_us: Option<Micros>,
    last_valid_us: Option<Micros>,
    last_estimate: Option<StateEstimate>,
}

impl Estimator {
    pub fn new(config: EstimatorConfig, nominal_dt_us: Micros) -> Self {
        let filter = VerticalFilter::new(config.baro_noise_var);
        Self {
            filter,
            config,
            nominal_dt_us,
            pad_pressure_pa: None,
            last_tick_us: None,
            last_valid_us: None,
            last_estimate: None,
        }
    }

    /// Fold a pad-side barometer reading into the ground reference. Called
    /// while the vehicle sits on the pad; the reference freezes at liftoff
    /// simply because the caller stops calling this.
    pub fn track_pad_reference(&mut self, batch: &SampleBatch) {
        let Some(sample) = batch.baro.filter(|s| s.valid) else {
            return;
        };
        let Some(pressure) = sample.pressure() else {
            return;
        };
        // Slow exponential average; the pad reference should ride out
        // weather drift but not sensor noise.
        let reference = match self.pad_pressure_pa {
            Some(prev) => prev + 0.05 * (pressure - prev),
            None => pressure,
        };
        self.pad_pressure_pa = Some(reference);
        self.filter.reset(0.0);
    }

    pub fn pad_pressure_pa(&self) -> Option<f32> {
        self.pad_pressure_pa
    }

    /// Produce the estimate for this tick. Never skips: with every source
    /// invalid past the silence timeout the previous state is held at
    /// minimum confidence.
    pub fn step(&mut self, batch: &SampleBatch) -> StateEstimate {
        let now = batch.timestamp_us;
        let dt_us = match self.last_tick_us {
            Some(last) => now.saturating_sub(last).max(1),
            None => self.nominal_dt_us,
        };
        self.last_tick_us = Some(now);
        let dt = dt_us as f32 * 1e-6;

        let (accel, agreement) = self.select_accel(batch);
        let baro_alt = self.baro_altitude(batch);

        if accel.is_some() || baro_alt.is_some() {
            self.last_valid_us = Some(now);
        }

        let silent = match self.last_valid_us {
            Some(last) => now.saturating_sub(last) > self.config.sensor_timeout_us,
            None => true,
        };

        if silent {
            // Hold last-known-good rather than integrating garbage.
            let held = self.last_estimate.unwrap_or(StateEstimate {
                timestamp_us: now,
                altitude_m: 0.0,
                velocity_mps: 0.0,
                accel_mps2: 0.0,
                confidence: CONFIDENCE_FLOOR,
                source_agreement: true,
            });
            let estimate = StateEstimate {
                timestamp_us: now,
                confidence: CONFIDENCE_FLOOR,
                ..held
            };
            self.last_estimate = Some(estimate);
            return estimate;
        }

        match accel {
            Some(a) => self.filter.predict(dt, a, self.config.accel_process_var),
            // No usable accelerometer this tick: ballistic propagation with
            // inflated process noise.
            None => self
                .filter
                .predict(dt, 0.0, self.config.coast_process_var),
        }

        if let Some(alt) = baro_alt {
            self.filter.update(alt);
        }

        let mut confidence = 1.0 / (1.0 + self.filter.altitude_variance());
        if !agreement {
            confidence *= 0.5;
        }

        let estimate = StateEstimate {
            timestamp_us: now,
            altitude_m: self.filter.altitude(),
            velocity_mps: self.filter.velocity(),
            accel_mps2: accel.unwrap_or(0.0),
            confidence,
            source_agreement: agreement,
        };
        self.last_estimate = Some(estimate);
        estimate
    }

    /// Saturation-based source selection over the two accelerometers.
    /// Returns the net vertical acceleration (gravity removed) and the
    /// agreement flag.
    fn select_accel(&self, batch: &SampleBatch) -> (Option<f32>, bool) {
        let low = valid_accel_z(&batch.low_g);
        let high = valid_accel_z(&batch.high_g);

        // Disagreement is only meaningful while the low-G unit is inside its
        // range; a railed low-G diverging from the high-G is just saturation.
        let agreement = match (low, high) {
            (Some(l), Some(h)) if l.abs() < self.config.accel_saturation_mps2 => {
                let agree = (l - h).abs() <= self.config.disagreement_tolerance_mps2;
                if !agree {
                    warn!(
                        "accelerometer disagreement: low-G {:.1} vs high-G {:.1} m/s²",
                        l, h
                    );
                }
                agree
            }
            _ => true,
        };

        let selected = match (low, high) {
            (Some(l), _) if l.abs() < self.config.accel_saturation_mps2 => Some(l),
            (_, Some(h)) => Some(h),
            (Some(l), None) => Some(l),
            (None, None) => None,
        };

        (selected.map(|a| a - GRAVITY_MPS2), agreement)
    }

    fn baro_altitude(&self, batch: &SampleBatch) -> Option<f32> {
        let reference = self.pad_pressure_pa?;
        let sample = batch.baro.filter(|s| s.valid)?;
        let pressure = sample.pressure()?;
        Some(pressure_to_altitude_m(pressure, reference))
    }
}

fn valid_accel_z(slot: &Option<SensorSample>) -> Option<f32> {
    slot.filter(|s| s.valid).and_then(|s| s.accel_z())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{Reading, SensorSource};

    const PAD_PA: f32 = 101_325.0;
    const DT_US: Micros = 5_000;

    fn accel_sample(source: SensorSource, ts: Micros, z: f32, valid: bool) -> SensorSample {
        SensorSample {
            timestamp_us: ts,
            source,
            reading: Reading::Accel([0.0, 0.0, z]),
            valid,
        }
    }

    fn baro_sample(ts: Micros, pressure: f32) -> SensorSample {
        SensorSample {
            timestamp_us: ts,
            source: SensorSource::Barometer,
            reading: Reading::Pressure(pressure),
            valid: true,
        }
    }

    fn estimator_with_pad() -> Estimator {
        let mut est = Estimator::new(EstimatorConfig::default(), DT_US);
        let mut batch = SampleBatch::new(0);
        batch.baro = Some(baro_sample(0, PAD_PA));
        est.track_pad_reference(&batch);
        est
    }

    #[test]
    fn test_one_estimate_per_tick_with_all_sensors_dead() {
        let mut est = estimator_with_pad();

        // Prime with one good tick.
        let mut batch = SampleBatch::new(DT_US);
        batch.low_g = Some(accel_sample(SensorSource::LowGImu, DT_US, GRAVITY_MPS2, true));
        batch.baro = Some(baro_sample(DT_US, PAD_PA));
        let good = est.step(&batch);
        assert!(good.confidence > 0.0);

        // Then a long run of completely invalid batches.
        let mut last = good;
        for i in 2..200 {
            let ts = i * DT_US;
            let mut dead = SampleBatch::new(ts);
            dead.low_g = Some(accel_sample(SensorSource::LowGImu, ts, 0.0, false));
            last = est.step(&dead);
            assert_eq!(last.timestamp_us, ts, "an estimate is produced every tick");
        }
        // Past the silence timeout: held at last-known-good, floor confidence.
        assert_eq!(last.confidence, CONFIDENCE_FLOOR);
        assert!((last.altitude_m - good.altitude_m).abs() < 1.0);
    }

    #[test]
    fn test_saturation_hands_off_to_high_g() {
        let mut est = estimator_with_pad();
        let sat = EstimatorConfig::default().accel_saturation_mps2;

        let ts = DT_US;
        let mut batch = SampleBatch::new(ts);
        // Low-G rails at its limit; high-G sees the true 8 g boost.
        batch.low_g = Some(accel_sample(SensorSource::LowGImu, ts, sat + 1.0, true));
        batch.high_g = Some(accel_sample(
            SensorSource::HighGImu,
            ts,
            8.0 * GRAVITY_MPS2,
            true,
        ));
        let e = est.step(&batch);
        // The selected acceleration came from the high-G unit.
        assert!((e.accel_mps2 - 7.0 * GRAVITY_MPS2).abs() < 0.5);
    }

    #[test]
    fn test_disagreement_clears_flag_without_halting() {
        let mut est = estimator_with_pad();
        let ts = DT_US;
        let mut batch = SampleBatch::new(ts);
        batch.low_g = Some(accel_sample(SensorSource::LowGImu, ts, GRAVITY_MPS2, true));
        batch.high_g = Some(accel_sample(
            SensorSource::HighGImu,
            ts,
            GRAVITY_MPS2 + 50.0,
            true,
        ));
        let e = est.step(&batch);
        assert!(!e.source_agreement);
        assert!(e.confidence > 0.0, "degraded, not failed");
    }

    #[test]
    fn test_baro_outage_widens_confidence() {
        let mut est = estimator_with_pad();

        let mut with_baro = 0.0;
        for i in 1..50 {
            let ts = i * DT_US;
            let mut batch = SampleBatch::new(ts);
            batch.low_g = Some(accel_sample(SensorSource::LowGImu, ts, GRAVITY_MPS2, true));
            batch.baro = Some(baro_sample(ts, PAD_PA));
            with_baro = est.step(&batch).confidence;
        }

        let mut without_baro = with_baro;
        for i in 50..90 {
            let ts = i * DT_US;
            let mut batch = SampleBatch::new(ts);
            batch.low_g = Some(accel_sample(SensorSource::LowGImu, ts, GRAVITY_MPS2, true));
            without_baro = est.step(&batch).confidence;
        }
        assert!(without_baro < with_baro);
    }

    #[test]
    fn test_boost_integration_tracks_velocity() {
        let mut est = estimator_with_pad();
        // 2 s of 3 g net upward acceleration, no baro (ascent too fast).
        let mut last = None;
        for i in 1..=400 {
            let ts = i * DT_US;
            let mut batch = SampleBatch::new(ts);
            batch.low_g = Some(accel_sample(
                SensorSource::LowGImu,
                ts,
                4.0 * GRAVITY_MPS2,
                true,
            ));
            last = Some(est.step(&batch));
        }
        let e = last.unwrap();
        // v ≈ 3 g * 2 s ≈ 58.8 m/s
        assert!((e.velocity_mps - 3.0 * GRAVITY_MPS2 * 2.0).abs() < 3.0);
        assert!(e.altitude_m > 0.0);
    }
}
