//! Register-level drivers for the two accelerometers.
//!
//! LSM6DSO: low-G unit, configured for ±16 g. Fine resolution on the pad and
//! during coast/descent, saturates under boost.
//! ADXL375: high-G unit, fixed ±200 g range. Covers the whole boost envelope
//! at coarse resolution.

use apogee_core::config::GRAVITY_MPS2;
use apogee_core::error::SensorFault;
use apogee_core::sensors::InertialSensor;
use embedded_hal_async::i2c::I2c;
use log::info;

pub struct Lsm6dso<I2C> {
    i2c: I2C,
}

impl<I2C: I2c> Lsm6dso<I2C> {
    const ADDR: u8 = 0x6A;
    const WHO_AM_I: u8 = 0x0F;
    const CTRL1_XL: u8 = 0x10;
    const CTRL3_C: u8 = 0x12;
    const OUTX_L_A: u8 = 0x28;

    /// ±16 g full scale, 0.488 mg/LSB.
    const SCALE_MPS2: f32 = 0.488e-3 * GRAVITY_MPS2;

    pub fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    pub async fn init(&mut self) -> Result<(), SensorFault> {
        let mut id = [0u8; 1];
        self.i2c
            .write_read(Self::ADDR, &[Self::WHO_AM_I], &mut id)
            .await
            .map_err(|_| SensorFault::Bus)?;
        if id[0] != 0x6C {
            return Err(SensorFault::Bus);
        }

        // BDU on, register auto-increment
        self.i2c
            .write(Self::ADDR, &[Self::CTRL3_C, 0x44])
            .await
            .map_err(|_| SensorFault::Bus)?;

        // Accelerometer: 208 Hz ODR, ±16 g
        self.i2c
            .write(Self::ADDR, &[Self::CTRL1_XL, 0x54])
            .await
            .map_err(|_| SensorFault::Bus)?;

        info!("LSM6DSO: verified, 208Hz +/-16g");
        Ok(())
    }
}

impl<I2C: I2c> InertialSensor for Lsm6dso<I2C> {
    async fn read_accel(&mut self) -> Result<[f32; 3], SensorFault> {
        let mut buf = [0u8; 6];
        self.i2c
            .write_read(Self::ADDR, &[Self::OUTX_L_A], &mut buf)
            .await
            .map_err(|_| SensorFault::Bus)?;

        let x = i16::from_le_bytes([buf[0], buf[1]]) as f32;
        let y = i16::from_le_bytes([buf[2], buf[3]]) as f32;
        let z = i16::from_le_bytes([buf[4], buf[5]]) as f32;
        Ok([
            x * Self::SCALE_MPS2,
            y * Self::SCALE_MPS2,
            z * Self::SCALE_MPS2,
        ])
    }
}

pub struct Adxl375<I2C> {
    i2c: I2C,
}

impl<I2C: I2c> Adxl375<I2C> {
    const ADDR: u8 = 0x53;
    const DEVID: u8 = 0x00;
    const BW_RATE: u8 = 0x2C;
    const POWER_CTL: u8 = 0x2D;
    const DATA_FORMAT: u8 = 0x31;
    const DATAX0: u8 = 0x32;

    /// 49 mg/LSB, the fixed ADXL375 sensitivity.
    const SCALE_MPS2: f32 = 49.0e-3 * GRAVITY_MPS2;

    pub fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    pub async fn init(&mut self) -> Result<(), SensorFault> {
        let mut id = [0u8; 1];
        self.i2c
            .write_read(Self::ADDR, &[Self::DEVID], &mut id)
            .await
            .map_err(|_| SensorFault::Bus)?;
        if id[0] != 0xE5 {
            return Err(SensorFault::Bus);
        }

        // Full resolution
        self.i2c
            .write(Self::ADDR, &[Self::DATA_FORMAT, 0x0B])
            .await
            .map_err(|_| SensorFault::Bus)?;

        // 400 Hz ODR
        self.i2c
            .write(Self::ADDR, &[Self::BW_RATE, 0x0C])
            .await
            .map_err(|_| SensorFault::Bus)?;

        // Start measuring
        self.i2c
            .write(Self::ADDR, &[Self::POWER_CTL, 0x08])
            .await
            .map_err(|_| SensorFault::Bus)?;

        info!("ADXL375: verified, 400Hz +/-200g");
        Ok(())
    }
}

impl<I2C: I2c> InertialSensor for Adxl375<I2C> {
    async fn read_accel(&mut self) -> Result<[f32; 3], SensorFault> {
        let mut buf = [0u8; 6];
        self.i2c
            .write_read(Self::ADDR, &[Self::DATAX0], &mut buf)
            .await
            .map_err(|_| SensorFault::Bus)?;

        let x = i16::from_le_bytes([buf[0], buf[1]]) as f32;
        let y = i16::from_le_bytes([buf[2], buf[3]]) as f32;
        let z = i16::from_le_bytes([buf[4], buf[5]]) as f32;
        Ok([
            x * Self::SCALE_MPS2,
            y * Self::SCALE_MPS2,
            z * Self::SCALE_MPS2,
        ])
    }
}
