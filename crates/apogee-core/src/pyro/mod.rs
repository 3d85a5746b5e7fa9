//! Redundant ignition controller.
//!
//! Owns the fixed set of pyro channels and is the only component allowed to
//! mutate them; everything else reads channel state for logging and
//! telemetry. Firing is guarded by the arming interlock and a live
//! continuity check, held for a minimum dwell, and latched: a channel fires
//! at most once per flight.
//!
//! Redundancy is a deadline watchdog. When a deployment command fires its
//! primary channel, a confirmation deadline is scheduled; confirmation is
//! continuity loss on the fired channel (the bridgewire burns through). If
//! the deadline expires unconfirmed the paired backup fires automatically,
//! and if the backup also goes unconfirmed the controller reports the
//! deployment as failed so the flight aborts. The watchdog is polled every
//! control tick, so fallback latency is bounded by the configured deadline
//! plus one tick period.

use heapless::Vec;
use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::config::PyroConfig;
use crate::error::PyroFault;
use crate::sensors::Micros;

/// Four recovery channels plus up to four staging channels.
pub const MAX_CHANNELS: usize = 8;

/// Most events a single `poll`/`command_deploy` can emit.
pub const MAX_EVENTS: usize = 8;

pub type PyroEvents = Vec<PyroEvent, MAX_EVENTS>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelId {
    DroguePrimary,
    DrogueBackup,
    MainPrimary,
    MainBackup,
    Stage(u8),
}

impl ChannelId {
    pub const fn label(self) -> &'static str {
        match self {
            Self::DroguePrimary => "drogue-primary",
            Self::DrogueBackup => "drogue-backup",
            Self::MainPrimary => "main-primary",
            Self::MainBackup => "main-backup",
            Self::Stage(_) => "stage",
        }
    }
}

/// A deployment the state machine can command.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployEvent {
    Drogue,
    Main,
    Stage(u8),
}

impl DeployEvent {
    pub const fn primary(self) -> ChannelId {
        match self {
            Self::Drogue => ChannelId::DroguePrimary,
            Self::Main => ChannelId::MainPrimary,
            Self::Stage(n) => ChannelId::Stage(n),
        }
    }

    /// Staging charges carry no redundant pair.
    pub const fn backup(self) -> Option<ChannelId> {
        match self {
            Self::Drogue => Some(ChannelId::DrogueBackup),
            Self::Main => Some(ChannelId::MainBackup),
            Self::Stage(_) => None,
        }
    }

    /// Drogue and main are mandatory for recovery; losing both channels of
    /// either is fatal to the mission.
    pub const fn mandatory(self) -> bool {
        matches!(self, Self::Drogue | Self::Main)
    }
}

/// Live state of one igniter circuit. Created at initialization, mutated
/// only by the [`IgnitionController`], never destroyed during a flight.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct IgnitionChannel {
    pub id: ChannelId,
    pub armed: bool,
    pub continuity: bool,
    /// Latched true at energize time; never reset during a flight.
    pub fired: bool,
    pub fire_time_us: Option<Micros>,
}

impl IgnitionChannel {
    const fn new(id: ChannelId) -> Self {
        Self {
            id,
            armed: false,
            continuity: false,
            fired: false,
            fire_time_us: None,
        }
    }
}

/// Observable ignition activity, logged as it happens.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyroEvent {
    Fired { channel: ChannelId, backup: bool },
    /// Bridgewire burn-through observed within the deadline.
    Confirmed { event: DeployEvent, channel: ChannelId },
    BlockedNoContinuity { channel: ChannelId },
    BlockedNotArmed { channel: ChannelId },
    /// Second fire command to an already-fired channel: logged, not executed.
    DoubleFire { channel: ChannelId },
    /// Primary and backup both failed to confirm.
    DeployFailed { event: DeployEvent },
    /// Abort path: un-fired channels commanded safe.
    Safed,
}

/// Physical igniter bank. GPIO drive per channel plus a continuity-sense
/// input (pull-up divider read against a threshold). Implementations return
/// `false` from `continuity` on a failed sense read; treating an unreadable
/// circuit as broken is the conservative direction.
pub trait PyroDriver {
    fn energize(&mut self, channel: ChannelId);
    fn deenergize(&mut self, channel: ChannelId);
    fn continuity(&mut self, channel: ChannelId) -> bool;
}

struct PendingDeploy {
    event: DeployEvent,
    /// Channel whose burn-through we are waiting on.
    watching: ChannelId,
    deadline_us: Micros,
    on_backup: bool,
}

pub struct IgnitionController<D: PyroDriver> {
    driver: D,
    config: PyroConfig,
    channels: Vec<IgnitionChannel, MAX_CHANNELS>,
    pending: Vec<PendingDeploy, 4>,
    /// De-energize deadlines for channels currently held energized.
    dwell: Vec<(ChannelId, Micros), MAX_CHANNELS>,
}

impl<D: PyroDriver> IgnitionController<D> {
    pub fn new(driver: D, config: PyroConfig) -> Self {
        let mut channels = Vec::new();
        for id in [
            ChannelId::DroguePrimary,
            ChannelId::DrogueBackup,
            ChannelId::MainPrimary,
            ChannelId::MainBackup,
        ] {
            // Capacity is MAX_CHANNELS, the fixed set always fits.
            let _ = channels.push(IgnitionChannel::new(id));
        }
        for n in 0..config.stage_count.min(4) {
            let _ = channels.push(IgnitionChannel::new(ChannelId::Stage(n)));
        }

        Self {
            driver,
            config,
            channels,
            pending: Vec::new(),
            dwell: Vec::new(),
        }
    }

    /// Read-only channel view for telemetry and logging.
    pub fn channels(&self) -> &[IgnitionChannel] {
        &self.channels
    }

    pub fn channel(&self, id: ChannelId) -> Option<&IgnitionChannel> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// Re-read continuity on every un-fired channel.
    pub fn refresh_continuity(&mut self) {
        for ch in self.channels.iter_mut() {
            if !ch.fired {
                ch.continuity = self.driver.continuity(ch.id);
            }
        }
    }

    /// Arm a single channel. Continuity must verify electrically first;
    /// a broken circuit blocks only this channel.
    pub fn arm_channel(&mut self, id: ChannelId) -> Result<(), PyroFault> {
        let continuity = self.driver.continuity(id);
        let Some(ch) = self.channels.iter_mut().find(|c| c.id == id) else {
            return Err(PyroFault::NoContinuity(id));
        };
        ch.continuity = continuity;
        if !continuity {
            warn!("arming blocked, no continuity on {}", id.label());
            return Err(PyroFault::NoContinuity(id));
        }
        ch.armed = true;
        Ok(())
    }

    /// Arm every channel, collecting the per-channel faults. Channels with
    /// continuity arm regardless of their neighbors.
    pub fn arm_all(&mut self) -> Vec<PyroFault, MAX_CHANNELS> {
        let ids: Vec<ChannelId, MAX_CHANNELS> = self.channels.iter().map(|c| c.id).collect();
        let mut faults = Vec::new();
        for id in ids {
            if let Err(fault) = self.arm_channel(id) {
                let _ = faults.push(fault);
            }
        }
        faults
    }

    /// True when at least one channel of the event's pair is armed, i.e. the
    /// deployment can be attempted at all.
    pub fn event_coverage(&self, event: DeployEvent) -> bool {
        let primary_ok = self
            .channel(event.primary())
            .is_some_and(|c| c.armed && !c.fired);
        let backup_ok = event
            .backup()
            .and_then(|id| self.channel(id))
            .is_some_and(|c| c.armed && !c.fired);
        primary_ok || backup_ok
    }

    /// Execute a deployment command from the state machine. Fires the
    /// primary if it is fireable, falling through to the backup immediately
    /// when it is not; schedules the confirmation watchdog for whichever
    /// channel fired.
    pub fn command_deploy(&mut self, event: DeployEvent, now: Micros) -> PyroEvents {
        let mut events = Vec::new();

        // A repeated command for an already-executed deployment is an
        // anomaly, not a license to spend the backup charge.
        if self.channel(event.primary()).is_some_and(|c| c.fired) {
            warn!("duplicate deploy command for {:?}", event);
            let _ = events.push(PyroEvent::DoubleFire {
                channel: event.primary(),
            });
            return events;
        }

        if self.try_fire(event.primary(), now, false, &mut events) {
            self.watch(event, event.primary(), false, now);
            return events;
        }

        match event.backup() {
            Some(backup_id) => {
                if self.try_fire(backup_id, now, true, &mut events) {
                    self.watch(event, backup_id, true, now);
                } else if event.mandatory() {
                    error!("deployment {:?}: primary and backup both unavailable", event);
                    let _ = events.push(PyroEvent::DeployFailed { event });
                }
            }
            None => {
                // Staging charge with no pair; the failure is logged by the
                // blocked event already in `events`.
            }
        }
        events
    }

    /// Watchdog and dwell bookkeeping, called every control tick.
    pub fn poll(&mut self, now: Micros) -> PyroEvents {
        let mut events = Vec::new();

        // Release channels whose dwell has elapsed.
        let driver = &mut self.driver;
        self.dwell.retain(|(id, deadline)| {
            if now >= *deadline {
                driver.deenergize(*id);
                false
            } else {
                true
            }
        });

        // Confirmation watchdog.
        let mut index = 0;
        while index < self.pending.len() {
            let watching = self.pending[index].watching;
            let deadline = self.pending[index].deadline_us;
            let event = self.pending[index].event;
            let on_backup = self.pending[index].on_backup;

            let continuity = self.driver.continuity(watching);
            if let Some(ch) = self.channels.iter_mut().find(|c| c.id == watching) {
                ch.continuity = continuity;
            }

            if !continuity {
                // Bridgewire burned through: deployment confirmed.
                let _ = events.push(PyroEvent::Confirmed {
                    event,
                    channel: watching,
                });
                self.pending.swap_remove(index);
                continue;
            }

            if now >= deadline {
                if on_backup {
                    error!("deployment {:?}: backup unconfirmed past deadline", event);
                    let _ = events.push(PyroEvent::DeployFailed { event });
                    self.pending.swap_remove(index);
                    continue;
                }

                warn!(
                    "deployment {:?}: primary unconfirmed, firing backup",
                    event
                );
                match event.backup() {
                    Some(backup_id) if self.try_fire(backup_id, now, true, &mut events) => {
                        self.pending[index].watching = backup_id;
                        self.pending[index].on_backup = true;
                        self.pending[index].deadline_us = now + self.config.backup_deadline_us;
                    }
                    _ => {
                        let _ = events.push(PyroEvent::DeployFailed { event });
                        self.pending.swap_remove(index);
                        continue;
                    }
                }
            }

            index += 1;
        }

        events
    }

    /// Abort path: de-energize everything and disarm every un-fired channel.
    /// Fired channels are left as-is; firing is irreversible.
    pub fn safe_all(&mut self) -> PyroEvents {
        let mut events = Vec::new();
        for ch in self.channels.iter_mut() {
            self.driver.deenergize(ch.id);
            if !ch.fired {
                ch.armed = false;
            }
        }
        self.dwell.clear();
        self.pending.clear();
        let _ = events.push(PyroEvent::Safed);
        events
    }

    fn watch(&mut self, event: DeployEvent, channel: ChannelId, on_backup: bool, now: Micros) {
        let _ = self.pending.push(PendingDeploy {
            event,
            watching: channel,
            deadline_us: now + self.config.backup_deadline_us,
            on_backup,
        });
    }

    /// Fire one channel if the interlocks allow it. Emits the exact reason
    /// when they do not; never energizes a broken or unarmed circuit.
    fn try_fire(
        &mut self,
        id: ChannelId,
        now: Micros,
        backup: bool,
        events: &mut PyroEvents,
    ) -> bool {
        let continuity = self.driver.continuity(id);
        let Some(ch) = self.channels.iter_mut().find(|c| c.id == id) else {
            return false;
        };

        if ch.fired {
            warn!("double fire command on {}", id.label());
            let _ = events.push(PyroEvent::DoubleFire { channel: id });
            return false;
        }
        if !ch.armed {
            let _ = events.push(PyroEvent::BlockedNotArmed { channel: id });
            return false;
        }
        ch.continuity = continuity;
        if !continuity {
            error!("fire blocked, no continuity on {}", id.label());
            let _ = events.push(PyroEvent::BlockedNoContinuity { channel: id });
            return false;
        }

        self.driver.energize(id);
        ch.fired = true;
        ch.fire_time_us = Some(now);
        let _ = self.dwell.push((id, now + self.config.dwell_us));
        let _ = events.push(PyroEvent::Fired {
            channel: id,
            backup,
        });
        true
    }
}

#[cfg(test)]
mod tests;
