//! SD-card log sink wiring.

use embedded_sdmmc::{TimeSource, Timestamp};

/// The board has no RTC; logs are ordered by the monotonic timestamps inside
/// the records, so the FAT timestamps are fixed.
#[derive(Clone, Copy)]
pub struct FixedTime;

impl TimeSource for FixedTime {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 55,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// Cap log growth to 512 MiB so a long pad wait cannot fill the card.
pub const LOG_CAPACITY_BYTES: u64 = 512 * 1024 * 1024;
