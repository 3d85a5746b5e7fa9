//! BMP390 barometer driver.
//!
//! Register-level, with the datasheet floating-point compensation. The
//! factory trim coefficients are read out of NVM once at init and baked into
//! the compensation constants.

use apogee_core::error::SensorFault;
use apogee_core::sensors::PressureSensor;
use embedded_hal_async::i2c::I2c;
use log::info;

pub struct Bmp390<I2C> {
    i2c: I2C,
    trim: Trim,
}

/// Compensation coefficients, pre-scaled per the datasheet.
#[derive(Default)]
struct Trim {
    par_t1: f64,
    par_t2: f64,
    par_t3: f64,
    par_p1: f64,
    par_p2: f64,
    par_p3: f64,
    par_p4: f64,
    par_p5: f64,
    par_p6: f64,
    par_p7: f64,
    par_p8: f64,
    par_p9: f64,
    par_p10: f64,
    par_p11: f64,
}

impl Trim {
    fn from_nvm(nvm: &[u8; 21]) -> Self {
        let u16le = |hi: usize, lo: usize| u16::from_le_bytes([nvm[lo], nvm[hi]]) as f64;
        let i16le = |hi: usize, lo: usize| i16::from_le_bytes([nvm[lo], nvm[hi]]) as f64;
        let i8v = |i: usize| nvm[i] as i8 as f64;

        Self {
            par_t1: u16le(1, 0) * 256.0,
            par_t2: u16le(3, 2) / (1u64 << 30) as f64,
            par_t3: i8v(4) / (1u64 << 48) as f64,
            par_p1: (i16le(6, 5) - (1 << 14) as f64) / (1u64 << 20) as f64,
            par_p2: (i16le(8, 7) - (1 << 14) as f64) / (1u64 << 29) as f64,
            par_p3: i8v(9) / (1u64 << 32) as f64,
            par_p4: i8v(10) / (1u64 << 37) as f64,
            par_p5: u16le(12, 11) * 8.0,
            par_p6: u16le(14, 13) / (1u64 << 6) as f64,
            par_p7: i8v(15) / (1u64 << 8) as f64,
            par_p8: i8v(16) / (1u64 << 15) as f64,
            par_p9: i16le(18, 17) / (1u64 << 48) as f64,
            par_p10: i8v(19) / (1u64 << 48) as f64,
            par_p11: i8v(20) / (1u128 << 65) as f64,
        }
    }
}

impl<I2C: I2c> Bmp390<I2C> {
    const ADDR: u8 = 0x77;
    const CHIP_ID: u8 = 0x00;
    const DATA_0: u8 = 0x04;
    const PWR_CTRL: u8 = 0x1B;
    const OSR: u8 = 0x1C;
    const ODR: u8 = 0x1D;
    const NVM_PAR: u8 = 0x31;

    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c,
            trim: Trim::default(),
        }
    }

    pub async fn init(&mut self) -> Result<(), SensorFault> {
        let mut id = [0u8; 1];
        self.i2c
            .write_read(Self::ADDR, &[Self::CHIP_ID], &mut id)
            .await
            .map_err(|_| SensorFault::Bus)?;
        if id[0] != 0x60 {
            return Err(SensorFault::Bus);
        }

        let mut nvm = [0u8; 21];
        self.i2c
            .write_read(Self::ADDR, &[Self::NVM_PAR], &mut nvm)
            .await
            .map_err(|_| SensorFault::Bus)?;
        self.trim = Trim::from_nvm(&nvm);

        // Pressure x4 oversampling, temperature x1
        self.i2c
            .write(Self::ADDR, &[Self::OSR, 0x02])
            .await
            .map_err(|_| SensorFault::Bus)?;
        // 50 Hz output rate
        self.i2c
            .write(Self::ADDR, &[Self::ODR, 0x02])
            .await
            .map_err(|_| SensorFault::Bus)?;
        // Pressure + temperature enabled, normal mode
        self.i2c
            .write(Self::ADDR, &[Self::PWR_CTRL, 0x33])
            .await
            .map_err(|_| SensorFault::Bus)?;

        info!("BMP390: verified, 50Hz normal mode");
        Ok(())
    }

    fn compensate(&self, raw_p: u32, raw_t: u32) -> f32 {
        let t = &self.trim;

        let pd1 = raw_t as f64 - t.par_t1;
        let pd2 = pd1 * t.par_t2;
        let t_lin = pd2 + pd1 * pd1 * t.par_t3;

        let out1 = t.par_p5
            + t.par_p6 * t_lin
            + t.par_p7 * t_lin * t_lin
            + t.par_p8 * t_lin * t_lin * t_lin;

        let p = raw_p as f64;
        let out2 = p * (t.par_p1 + t.par_p2 * t_lin + t.par_p3 * t_lin * t_lin
            + t.par_p4 * t_lin * t_lin * t_lin);

        let out3 = p * p * (t.par_p9 + t.par_p10 * t_lin) + p * p * p * t.par_p11;

        (out1 + out2 + out3) as f32
    }
}

impl<I2C: I2c> PressureSensor for Bmp390<I2C> {
    async fn read_pressure(&mut self) -> Result<f32, SensorFault> {
        let mut buf = [0u8; 6];
        self.i2c
            .write_read(Self::ADDR, &[Self::DATA_0], &mut buf)
            .await
            .map_err(|_| SensorFault::Bus)?;

        let raw_p = u32::from_le_bytes([buf[0], buf[1], buf[2], 0]);
        let raw_t = u32::from_le_bytes([buf[3], buf[4], buf[5], 0]);
        Ok(self.compensate(raw_p, raw_t))
    }
}
