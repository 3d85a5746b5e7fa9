#![no_std]

#[cfg(test)]
extern crate std;

pub mod command;
pub mod config;
pub mod error;
pub mod estimator;
pub mod flight;
pub mod logging;
pub mod pipeline;
pub mod pyro;
pub mod sensors;

pub use command::{GroundCommand, GroundResponse};
pub use config::FlightConfig;
pub use error::FlightError;
pub use estimator::StateEstimate;
pub use flight::{FlightPhase, Transition};
pub use pipeline::FlightPipeline;
pub use pyro::{ChannelId, DeployEvent, IgnitionChannel};
pub use sensors::{Micros, SampleBatch, SensorSample, SensorSource};
