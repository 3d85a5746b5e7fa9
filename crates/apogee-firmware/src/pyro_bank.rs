//! Physical pyro channel bank.
//!
//! Each channel is one MOSFET gate drive output plus one continuity-sense
//! input. The sense line comes off the continuity MOSFET's pull-up divider
//! through the on-board comparator: low means current can flow through the
//! bridgewire, so continuity reads active-low.

use apogee_core::pyro::{ChannelId, MAX_CHANNELS, PyroDriver};
use esp_hal::gpio::{Input, Output};
use heapless::Vec;
use log::warn;

struct Channel {
    id: ChannelId,
    drive: Output<'static>,
    sense: Input<'static>,
}

pub struct PyroBank {
    channels: Vec<Channel, MAX_CHANNELS>,
}

impl PyroBank {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    /// Register a channel. Drive pins must be wired low-side off; the bank
    /// forces them low immediately.
    pub fn add_channel(&mut self, id: ChannelId, mut drive: Output<'static>, sense: Input<'static>) {
        drive.set_low();
        if self
            .channels
            .push(Channel { id, drive, sense })
            .is_err()
        {
            warn!("pyro bank full, dropping channel {}", id.label());
        }
    }

    fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| c.id == id)
    }
}

impl Default for PyroBank {
    fn default() -> Self {
        Self::new()
    }
}

impl PyroDriver for PyroBank {
    fn energize(&mut self, channel: ChannelId) {
        if let Some(ch) = self.channel_mut(channel) {
            ch.drive.set_high();
        }
    }

    fn deenergize(&mut self, channel: ChannelId) {
        if let Some(ch) = self.channel_mut(channel) {
            ch.drive.set_low();
        }
    }

    fn continuity(&mut self, channel: ChannelId) -> bool {
        // Unknown channel reads as broken: never energize what we cannot
        // sense.
        self.channel_mut(channel)
            .map(|ch| ch.sense.is_low())
            .unwrap_or(false)
    }
}
