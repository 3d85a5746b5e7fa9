#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

use apogee_core::config::{FlightConfig, GRAVITY_MPS2};
use apogee_core::pyro::ChannelId;
use apogee_core::sensors::{AcquisitionPump, Calibration, InertialSensor};
use apogee_core::{FlightPipeline, logging::LogWriter};
use embassy_executor::Spawner;
use embassy_sync::mutex::Mutex;
use embassy_time::{Delay, Duration, Timer};
use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::SdCard;
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{Config as UartConfig, Uart};
use log::{error, info};
use rtt_target::rprintln;
use static_cell::StaticCell;

use apogee_firmware::baro::Bmp390;
use apogee_firmware::bus::{SensorBusDevice, SharedBus};
use apogee_firmware::imu::{Adxl375, Lsm6dso};
use apogee_firmware::pyro_bank::PyroBank;
use apogee_firmware::sd::{FixedTime, LOG_CAPACITY_BYTES};
use apogee_firmware::tasks::{
    self, FlightSink, I2cBus, LOG_QUEUE, acquisition_task, console_task, control_task, logger_task,
};

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

esp_bootloader_esp_idf::esp_app_desc!();

/// Average the pad-static accelerometer output into a bias calibration.
/// The vehicle must be vertical and still; the thrust axis should read +1 g.
async fn measure_accel_bias<S: InertialSensor>(sensor: &mut S) -> Calibration {
    let mut sum = [0.0f32; 3];
    let mut count = 0u32;
    for _ in 0..200 {
        if let Ok(a) = sensor.read_accel().await {
            sum[0] += a[0];
            sum[1] += a[1];
            sum[2] += a[2];
            count += 1;
        }
        Timer::after(Duration::from_millis(5)).await;
    }
    if count == 0 {
        error!("accel calibration failed, no readings; using identity");
        return Calibration::default();
    }
    let n = count as f32;
    Calibration {
        bias: [sum[0] / n, sum[1] / n, sum[2] / n - GRAVITY_MPS2],
        scale: [1.0; 3],
    }
}

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_print!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    rprintln!("Embassy initialized!");

    let flight_config = FlightConfig::default();

    // --- Sensor bus ---------------------------------------------------------
    let i2c = I2c::new(peripherals.I2C0, I2cConfig::default())
        .expect("Failed to initialize I2C")
        .with_sda(peripherals.GPIO8)
        .with_scl(peripherals.GPIO9)
        .into_async();

    static I2C_BUS: StaticCell<SharedBus<I2cBus>> = StaticCell::new();
    let i2c_bus = I2C_BUS.init(Mutex::new(i2c));

    let mut low_g = Lsm6dso::new(SensorBusDevice::new(i2c_bus));
    let mut high_g = Adxl375::new(SensorBusDevice::new(i2c_bus));
    let mut baro = Bmp390::new(SensorBusDevice::new(i2c_bus));

    // A sensor that fails init keeps flying as a permanently-invalid source;
    // the estimator and the abort logic handle the rest.
    if let Err(e) = low_g.init().await {
        error!("LSM6DSO init failed: {}", e);
    }
    if let Err(e) = high_g.init().await {
        error!("ADXL375 init failed: {}", e);
    }
    if let Err(e) = baro.init().await {
        error!("BMP390 init failed: {}", e);
    }

    let low_cal = measure_accel_bias(&mut low_g).await;
    let high_cal = measure_accel_bias(&mut high_g).await;
    info!("accelerometer bias calibrated");

    let pump = AcquisitionPump::new(
        low_g,
        high_g,
        baro,
        low_cal,
        high_cal,
        0.0,
        flight_config.sampling.clone(),
    );

    // --- Pyro channel bank --------------------------------------------------
    let sense_cfg = || InputConfig::default().with_pull(Pull::Up);
    let mut pyro = PyroBank::new();
    pyro.add_channel(
        ChannelId::DroguePrimary,
        Output::new(peripherals.GPIO4, Level::Low, OutputConfig::default()),
        Input::new(peripherals.GPIO10, sense_cfg()),
    );
    pyro.add_channel(
        ChannelId::DrogueBackup,
        Output::new(peripherals.GPIO5, Level::Low, OutputConfig::default()),
        Input::new(peripherals.GPIO11, sense_cfg()),
    );
    pyro.add_channel(
        ChannelId::MainPrimary,
        Output::new(peripherals.GPIO6, Level::Low, OutputConfig::default()),
        Input::new(peripherals.GPIO12, sense_cfg()),
    );
    pyro.add_channel(
        ChannelId::MainBackup,
        Output::new(peripherals.GPIO7, Level::Low, OutputConfig::default()),
        Input::new(peripherals.GPIO13, sense_cfg()),
    );

    let pipeline = FlightPipeline::new(&flight_config, pyro, &LOG_QUEUE);

    // --- SD card log sink ---------------------------------------------------
    let spi_bus = Spi::new(peripherals.SPI2, SpiConfig::default())
        .expect("Failed to initialize SPI")
        .with_sck(peripherals.GPIO36)
        .with_mosi(peripherals.GPIO35)
        .with_miso(peripherals.GPIO37);
    let sd_cs = Output::new(peripherals.GPIO34, Level::High, OutputConfig::default());
    let spi_device =
        ExclusiveDevice::new(spi_bus, sd_cs, Delay).expect("Failed to wrap SPI device");
    let sd_card = SdCard::new(spi_device, Delay);
    let sink: FlightSink = apogee_core::logging::SdCardSink::new(
        sd_card,
        FixedTime,
        LOG_CAPACITY_BYTES,
    );
    let writer = LogWriter::new(sink);

    // --- Ground console -----------------------------------------------------
    let uart = Uart::new(peripherals.UART1, UartConfig::default())
        .expect("Failed to initialize UART")
        .with_tx(peripherals.GPIO43)
        .with_rx(peripherals.GPIO44)
        .into_async();

    // --- Tasks --------------------------------------------------------------
    spawner
        .spawn(acquisition_task(pump))
        .expect("spawn acquisition");
    spawner
        .spawn(control_task(pipeline))
        .expect("spawn control");
    spawner.spawn(logger_task(writer)).expect("spawn logger");
    spawner.spawn(console_task(uart)).expect("spawn console");

    info!("flight computer up, awaiting arm");

    loop {
        Timer::after(Duration::from_secs(5)).await;
        let stats = tasks::LOG_QUEUE.stats();
        if stats.critical > 0 {
            error!("critical log records dropped: {}", stats.critical);
        }
    }
}
