//! Fault taxonomy for the flight core.
//!
//! Faults are split by how they propagate: sensor and estimator conditions
//! are absorbed locally and only lower confidence, continuity faults block a
//! single pyro channel, ignition failure escalates to an abort once both
//! channels of a mandatory deployment have failed, and storage faults never
//! touch the control path.

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::pyro::{ChannelId, DeployEvent};
use crate::sensors::SensorSource;

/// A sensor reading could not be produced or cannot be trusted.
#[derive(Error, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorFault {
    #[error("bus transaction failed")]
    Bus,

    #[error("bus transaction timed out")]
    Timeout,

    #[error("reading outside physical range")]
    OutOfRange,

    #[error("reading stuck at a constant value")]
    Stuck,
}

/// Pyro channel conditions raised by the ignition controller.
#[derive(Error, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyroFault {
    #[error("no continuity on channel")]
    NoContinuity(ChannelId),

    #[error("channel is not armed")]
    NotArmed(ChannelId),

    #[error("channel has already fired")]
    AlreadyFired(ChannelId),

    #[error("both channels failed for deployment event")]
    DeploymentFailed(DeployEvent),
}

/// Log persistence conditions. Never fatal to flight safety.
#[derive(Error, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFault {
    #[error("append to the log sink failed")]
    WriteFailed,

    #[error("record too large for a log frame")]
    FrameOverflow,

    #[error("sink is out of space")]
    Full,
}

/// Top-level error for the flight core.
#[derive(Error, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightError {
    #[error("sensor fault on {source:?}: {fault}")]
    Sensor {
        source: SensorSource,
        fault: SensorFault,
    },

    #[error("estimator running with reduced confidence")]
    EstimatorDegraded,

    #[error("pyro fault: {0}")]
    Pyro(#[from] PyroFault),

    #[error("storage fault: {0}")]
    Storage(#[from] StorageFault),
}

pub type FlightResult<T> = Result<T, FlightError>;
