//! Asynchronous acquisition pump.
//!
//! One [`embassy_time::Ticker`] paces the inertial cadence; the barometer is
//! read every `baro_divider` ticks. Every bus transaction is wrapped in a
//! bounded timeout so a wedged device degrades into invalid samples instead
//! of stalling the tick. The pump runs for the duration of the flight and is
//! not restartable mid-flight.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Ticker, with_timeout};
use log::warn;

use crate::config::SamplingConfig;
use crate::error::{FlightError, SensorFault};

use super::{AccelConditioner, BaroConditioner, SampleBatch, SensorSource};

/// Depth of the batch queue between the pump and the control loop. Kept
/// shallow so the control loop consumes batches in lockstep; the pump
/// backpressures rather than reordering.
pub const SAMPLE_BUS_DEPTH: usize = 4;

pub type SampleBus = Channel<CriticalSectionRawMutex, SampleBatch, SAMPLE_BUS_DEPTH>;

/// A three-axis accelerometer read over some bus.
pub trait InertialSensor {
    fn read_accel(&mut self) -> impl Future<Output = Result<[f32; 3], SensorFault>>;
}

/// A static pressure sensor read over some bus.
pub trait PressureSensor {
    fn read_pressure(&mut self) -> impl Future<Output = Result<f32, SensorFault>>;
}

pub struct AcquisitionPump<L, H, B> {
    low_g: L,
    high_g: H,
    baro: B,
    low_cond: AccelConditioner,
    high_cond: AccelConditioner,
    baro_cond: BaroConditioner,
    config: SamplingConfig,
}

impl<L, H, B> AcquisitionPump<L, H, B>
where
    L: InertialSensor,
    H: InertialSensor,
    B: PressureSensor,
{
    pub fn new(
        low_g: L,
        high_g: H,
        baro: B,
        low_cal: super::Calibration,
        high_cal: super::Calibration,
        baro_offset_pa: f32,
        config: SamplingConfig,
    ) -> Self {
        let low_cond = AccelConditioner::new(
            SensorSource::LowGImu,
            low_cal,
            config.low_g_range_mps2,
            config.stuck_limit,
        );
        let high_cond = AccelConditioner::new(
            SensorSource::HighGImu,
            high_cal,
            config.high_g_range_mps2,
            config.stuck_limit,
        );
        let baro_cond = BaroConditioner::new(
            baro_offset_pa,
            config.pressure_min_pa,
            config.pressure_max_pa,
            config.stuck_limit,
        );

        Self {
            low_g,
            high_g,
            baro,
            low_cond,
            high_cond,
            baro_cond,
            config,
        }
    }

    /// Run forever, producing one batch per inertial tick.
    pub async fn run(mut self, bus: &'static SampleBus) -> ! {
        let mut ticker = Ticker::every(Duration::from_micros(self.config.inertial_period_us));
        let timeout = Duration::from_micros(self.config.bus_timeout_us);
        let mut tick: u32 = 0;

        loop {
            ticker.next().await;
            let now_us = Instant::now().as_micros();
            let mut batch = SampleBatch::new(now_us);

            batch.low_g = Some(match with_timeout(timeout, self.low_g.read_accel()).await {
                Ok(Ok(raw)) => self.low_cond.condition(now_us, raw),
                Ok(Err(fault)) => {
                    log_read_fault(SensorSource::LowGImu, fault);
                    self.low_cond.failed(now_us)
                }
                Err(_) => {
                    log_read_fault(SensorSource::LowGImu, SensorFault::Timeout);
                    self.low_cond.failed(now_us)
                }
            });

            batch.high_g = Some(match with_timeout(timeout, self.high_g.read_accel()).await {
                Ok(Ok(raw)) => self.high_cond.condition(now_us, raw),
                Ok(Err(fault)) => {
                    log_read_fault(SensorSource::HighGImu, fault);
                    self.high_cond.failed(now_us)
                }
                Err(_) => {
                    log_read_fault(SensorSource::HighGImu, SensorFault::Timeout);
                    self.high_cond.failed(now_us)
                }
            });

            if tick % self.config.baro_divider == 0 {
                batch.baro = Some(match with_timeout(timeout, self.baro.read_pressure()).await {
                    Ok(Ok(raw)) => self.baro_cond.condition(now_us, raw),
                    Ok(Err(fault)) => {
                        log_read_fault(SensorSource::Barometer, fault);
                        self.baro_cond.failed(now_us)
                    }
                    Err(_) => {
                        log_read_fault(SensorSource::Barometer, SensorFault::Timeout);
                        self.baro_cond.failed(now_us)
                    }
                });
            }

            if batch.all_invalid() {
                warn!("acquisition tick {tick}: no valid sources");
            }

            // Lockstep hand-off; the control loop must keep up, the pump
            // never drops or reorders batches.
            bus.send(batch).await;
            tick = tick.wrapping_add(1);
        }
    }
}

fn log_read_fault(source: SensorSource, fault: SensorFault) {
    warn!("{}", FlightError::Sensor { source, fault });
}
