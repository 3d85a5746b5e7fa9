//! Embassy tasks and the static channels that join them.
//!
//! Task topology: the acquisition pump feeds the control task in lockstep
//! through `SAMPLE_BUS`; the control task owns the whole pipeline (and with
//! it the pyro channels, keeping the single-writer rule trivially true); the
//! logger task drains `LOG_QUEUE` to the SD card at lower priority; the
//! console task exchanges ground commands through `CMD_CHANNEL`/`RESP_CHANNEL`.

use apogee_core::command::{GroundCommand, GroundResponse};
use apogee_core::logging::{LogQueue, LogWriter, SdCardSink};
use apogee_core::pipeline::FlightPipeline;
use apogee_core::sensors::{AcquisitionPump, SampleBus};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::Instant;
use embedded_hal_bus::spi::ExclusiveDevice;
use log::{error, info};

use crate::baro::Bmp390;
use crate::bus::SensorBusDevice;
use crate::imu::{Adxl375, Lsm6dso};
use crate::pyro_bank::PyroBank;
use crate::sd::FixedTime;

pub static SAMPLE_BUS: SampleBus = SampleBus::new();
pub static LOG_QUEUE: LogQueue = LogQueue::new();
pub static CMD_CHANNEL: Channel<CriticalSectionRawMutex, GroundCommand, 2> = Channel::new();
pub static RESP_CHANNEL: Channel<CriticalSectionRawMutex, GroundResponse, 2> = Channel::new();

pub type I2cBus = esp_hal::i2c::master::I2c<'static, esp_hal::Async>;
pub type BusDevice = SensorBusDevice<'static, I2cBus>;
pub type FlightPump = AcquisitionPump<Lsm6dso<BusDevice>, Adxl375<BusDevice>, Bmp390<BusDevice>>;

pub type SdSpiDevice = ExclusiveDevice<
    esp_hal::spi::master::Spi<'static, esp_hal::Blocking>,
    esp_hal::gpio::Output<'static>,
    embassy_time::Delay,
>;
pub type FlightSink = SdCardSink<SdSpiDevice, embassy_time::Delay, FixedTime>;

#[embassy_executor::task]
pub async fn acquisition_task(pump: FlightPump) -> ! {
    pump.run(&SAMPLE_BUS).await
}

#[embassy_executor::task]
pub async fn control_task(mut pipeline: FlightPipeline<PyroBank>) -> ! {
    info!("control loop running, phase {}", pipeline.phase().label());
    loop {
        let batch = SAMPLE_BUS.receive().await;

        // Ground commands slot in between ticks, never mid-tick.
        while let Ok(command) = CMD_CHANNEL.try_receive() {
            let now = Instant::now().as_micros();
            let response = pipeline.handle_command(command, now);
            if RESP_CHANNEL.try_send(response).is_err() {
                error!("console response queue full");
            }
        }

        pipeline.tick(&batch);
    }
}

#[embassy_executor::task]
pub async fn logger_task(mut writer: LogWriter<FlightSink>) -> ! {
    let mut written: u32 = 0;
    loop {
        let record = LOG_QUEUE.next().await;
        // Storage faults are logged and absorbed; flight safety never waits
        // on the card.
        if writer.write(&record).is_err() {
            error!("flight log write failed");
        }
        written = written.wrapping_add(1);
        if written % 4096 == 0 {
            let stats = LOG_QUEUE.stats();
            info!(
                "flight log: {} records, dropped {}s/{}e/{}c, {} bulk skipped",
                written, stats.samples, stats.estimates, stats.critical,
                writer.skipped_bulk()
            );
        }
    }
}
