// logging/sink.rs

use embedded_sdmmc::{Mode, SdCard, SdCardError, TimeSource, VolumeIdx, VolumeManager};

use crate::error::StorageFault;

/// Durable append-only byte sink behind the log writer.
pub trait LogSink {
    /// Append one framed record. On return the frame must survive an abrupt
    /// power loss.
    fn append(&mut self, frame: &[u8]) -> Result<(), StorageFault>;

    /// Flush anything the implementation buffers. May be a no-op for sinks
    /// that are durable per append.
    fn sync(&mut self) -> Result<(), StorageFault>;

    /// True once the medium is close to capacity; the writer sheds bulk
    /// records while this holds.
    fn low_space(&self) -> bool {
        false
    }
}

const FLIGHT_LOG_FILE: &str = "FLIGHT.LOG";

/// SD-card sink. Open/append/close per record batch: closing the file after
/// every append is what makes already-written records survive power loss,
/// at the cost of some card wear.
pub struct SdCardSink<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    volume_mgr: VolumeManager<SdCard<S, D>, T, 4, 4, 1>,
    bytes_written: u64,
    capacity_limit: u64,
}

impl<S, D, T> SdCardSink<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    /// `capacity_limit` bounds how much this sink will write before it
    /// reports low space (cards do not expose free space cheaply).
    pub fn new(sd_card: SdCard<S, D>, ts: T, capacity_limit: u64) -> Self {
        let volume_mgr = VolumeManager::new(sd_card, ts);
        Self {
            volume_mgr,
            bytes_written: 0,
            capacity_limit,
        }
    }

    fn append_inner(&mut self, frame: &[u8]) -> Result<(), embedded_sdmmc::Error<SdCardError>> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;
        let file = root_dir.open_file_in_dir(FLIGHT_LOG_FILE, Mode::ReadWriteCreateOrAppend)?;

        file.write(frame)?;

        // Explicit closes so errors surface here instead of being swallowed
        // by RAII drops.
        file.close()?;
        root_dir.close()?;
        volume0.close()?;
        Ok(())
    }
}

impl<S, D, T> LogSink for SdCardSink<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    fn append(&mut self, frame: &[u8]) -> Result<(), StorageFault> {
        self.append_inner(frame).map_err(|e| {
            log::error!("SD append failed: {:?}", e);
            StorageFault::WriteFailed
        })?;
        self.bytes_written += frame.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageFault> {
        // The file is closed after every append; nothing is buffered here.
        Ok(())
    }

    fn low_space(&self) -> bool {
        self.bytes_written >= self.capacity_limit / 10 * 9
    }
}
