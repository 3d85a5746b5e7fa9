//! Ground/arming command contract.
//!
//! The minimal command surface the core honors from whatever link the
//! hardware provides (serial console, umbilical, debugger). No wire format
//! is mandated here; the firmware's console maps its line protocol onto
//! these types.

use heapless::Vec;

use crate::flight::FlightPhase;
use crate::pyro::{ChannelId, MAX_CHANNELS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundCommand {
    /// Arm request: runs continuity checks and arms the pyro channels.
    Arm,
    /// Disarm request: refused once the vehicle is in flight.
    Disarm,
    /// Telemetry snapshot of phase and channel states.
    Query,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroundResponse {
    Armed,
    Rejected(RejectReason),
    Disarmed,
    Snapshot(TelemetrySnapshot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Arming is only accepted on the pad.
    NotIdle,
    /// A mandatory deployment has no armable channel.
    NoDeploymentCoverage,
    /// Disarming is locked out from Boost onward.
    InFlight,
}

/// Read-out of the current phase and channel states.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    pub phase: FlightPhase,
    pub max_altitude_m: f32,
    pub channels: Vec<ChannelSnapshot, MAX_CHANNELS>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSnapshot {
    pub id: ChannelId,
    pub armed: bool,
    pub continuity: bool,
    pub fired: bool,
}

impl TelemetrySnapshot {
    pub fn from_channels(
        phase: FlightPhase,
        max_altitude_m: f32,
        channels: &[crate::pyro::IgnitionChannel],
    ) -> Self {
        let channels = channels
            .iter()
            .map(|c| ChannelSnapshot {
                id: c.id,
                armed: c.armed,
                continuity: c.continuity,
                fired: c.fired,
            })
            .collect();
        Self {
            phase,
            max_altitude_m,
            channels,
        }
    }
}
