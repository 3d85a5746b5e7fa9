//! Flight event state machine.
//!
//! Phases advance strictly forward (Idle → Armed → Boost → Coast → Apogee →
//! DrogueDescent → MainDescent → Landed); the only escape is the Aborted
//! path. Every transition decision is a pure function of the current phase,
//! the latest estimate, the time spent in the phase, and the fault flags;
//! there is no hidden state beyond the debounce clocks below.

use serde::{Deserialize, Serialize};

use crate::config::DetectionConfig;
use crate::estimator::StateEstimate;
use crate::pyro::DeployEvent;
use crate::sensors::Micros;

#[repr(u8)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightPhase {
    Idle = 0,
    Armed = 1,
    Boost = 2,
    Coast = 3,
    Apogee = 4,
    DrogueDescent = 5,
    MainDescent = 6,
    Landed = 7,
    Aborted = 8,
}

impl FlightPhase {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Armed => "Armed",
            Self::Boost => "Boost",
            Self::Coast => "Coast",
            Self::Apogee => "Apogee",
            Self::DrogueDescent => "DrogueDescent",
            Self::MainDescent => "MainDescent",
            Self::Landed => "Landed",
            Self::Aborted => "Aborted",
        }
    }

    /// Terminal phases accept no further transitions.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Landed | Self::Aborted)
    }

    /// From Boost onward the flight cannot be externally cancelled; only the
    /// Aborted path leaves the sequence.
    pub const fn in_flight(self) -> bool {
        matches!(
            self,
            Self::Boost | Self::Coast | Self::Apogee | Self::DrogueDescent | Self::MainDescent
        )
    }
}

/// Why a transition fired. Logged with every transition.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    ArmCommand,
    DisarmCommand,
    LiftoffAccel,
    BurnoutAccel,
    ApogeeVelocity,
    ApogeeTimeout,
    MainAltitude,
    LandingStable,
    Abort(AbortReason),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// No valid sensor source for longer than the fault window.
    SensorSilence,
    /// Accelerometers contradicted each other past the fault window.
    PersistentDisagreement,
    /// Primary and backup both failed on a mandatory deployment.
    IgnitionFailure(DeployEvent),
}

/// A committed phase change, with the deployment it commands (if any).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub timestamp_us: Micros,
    pub from: FlightPhase,
    pub to: FlightPhase,
    pub cause: TransitionCause,
    pub deploy: Option<DeployEvent>,
}

/// Fault inputs evaluated on every tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultFlags {
    pub sensor_silent: bool,
    pub disagreement: bool,
    pub ignition_failed: Option<DeployEvent>,
}

pub struct FlightStateMachine {
    config: DetectionConfig,
    phase: FlightPhase,
    phase_entered_us: Micros,
    max_altitude_m: f32,
    /// Stage channels remaining to ignite at burnout, next index first.
    next_stage: u8,
    stage_count: u8,

    // Debounce clocks: the timestamp at which each condition started holding.
    liftoff_since: Option<Micros>,
    burnout_since: Option<Micros>,
    apogee_since: Option<Micros>,
    landing_since: Option<Micros>,
    fault_since: Option<Micros>,
}

impl FlightStateMachine {
    pub fn new(config: DetectionConfig, stage_count: u8) -> Self {
        Self {
            config,
            phase: FlightPhase::Idle,
            phase_entered_us: 0,
            max_altitude_m: 0.0,
            next_stage: 0,
            stage_count,
            liftoff_since: None,
            burnout_since: None,
            apogee_since: None,
            landing_since: None,
            fault_since: None,
        }
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    pub fn max_altitude_m(&self) -> f32 {
        self.max_altitude_m
    }

    /// Ground-commanded arming. The caller is responsible for the continuity
    /// precondition; this only enforces the phase.
    pub fn arm(&mut self, now: Micros) -> Option<Transition> {
        if self.phase != FlightPhase::Idle {
            return None;
        }
        Some(self.transition(FlightPhase::Armed, TransitionCause::ArmCommand, None, now))
    }

    /// Ground-commanded disarm. Refused from Boost onward.
    pub fn disarm(&mut self, now: Micros) -> Option<Transition> {
        if self.phase != FlightPhase::Armed {
            return None;
        }
        Some(self.transition(FlightPhase::Idle, TransitionCause::DisarmCommand, None, now))
    }

    /// Force the abort path from any non-terminal phase.
    pub fn abort(&mut self, reason: AbortReason, now: Micros) -> Option<Transition> {
        if self.phase.is_terminal() {
            return None;
        }
        Some(self.transition(
            FlightPhase::Aborted,
            TransitionCause::Abort(reason),
            None,
            now,
        ))
    }

    /// Evaluate this tick's estimate. At most one transition per tick.
    pub fn update(&mut self, est: &StateEstimate, faults: FaultFlags) -> Option<Transition> {
        let now = est.timestamp_us;

        if self.phase.is_terminal() {
            return None;
        }

        if est.altitude_m > self.max_altitude_m {
            self.max_altitude_m = est.altitude_m;
        }

        // Dual ignition failure is immediately fatal to the mission.
        if let Some(event) = faults.ignition_failed {
            return self.abort(AbortReason::IgnitionFailure(event), now);
        }

        // Persistent sensor loss or contradiction aborts after the fault
        // tolerance window, from any phase.
        let faulted = faults.sensor_silent || faults.disagreement;
        if self.hold(faulted, Clock::Fault, now, self.config.fault_window_us) {
            let reason = if faults.sensor_silent {
                AbortReason::SensorSilence
            } else {
                AbortReason::PersistentDisagreement
            };
            return self.abort(reason, now);
        }

        let time_in_phase = now.saturating_sub(self.phase_entered_us);

        match self.phase {
            // Arming is command-driven, never sensor-driven.
            FlightPhase::Idle => None,

            FlightPhase::Armed => {
                let lifting = est.accel_mps2 > self.config.liftoff_accel_mps2;
                if self.hold(lifting, Clock::Liftoff, now, self.config.liftoff_debounce_us) {
                    Some(self.transition(FlightPhase::Boost, TransitionCause::LiftoffAccel, None, now))
                } else {
                    None
                }
            }

            FlightPhase::Boost => {
                let burned_out = est.accel_mps2 < self.config.burnout_accel_mps2;
                if self.hold(burned_out, Clock::Burnout, now, self.config.burnout_debounce_us) {
                    let deploy = if self.next_stage < self.stage_count {
                        let stage = self.next_stage;
                        self.next_stage += 1;
                        Some(DeployEvent::Stage(stage))
                    } else {
                        None
                    };
                    Some(self.transition(
                        FlightPhase::Coast,
                        TransitionCause::BurnoutAccel,
                        deploy,
                        now,
                    ))
                } else {
                    None
                }
            }

            FlightPhase::Coast => {
                // Debounced zero-crossing with hysteresis: the vehicle must
                // be convincingly descending, not noise-wiggling at the peak.
                let descending = est.velocity_mps < -self.config.apogee_hysteresis_mps;
                if self.hold(descending, Clock::Apogee, now, self.config.apogee_debounce_us) {
                    Some(self.transition(
                        FlightPhase::Apogee,
                        TransitionCause::ApogeeVelocity,
                        None,
                        now,
                    ))
                } else if time_in_phase > self.config.coast_timeout_us {
                    Some(self.transition(
                        FlightPhase::Apogee,
                        TransitionCause::ApogeeTimeout,
                        None,
                        now,
                    ))
                } else {
                    None
                }
            }

            // Apogee is a fencepost: the next tick commands the drogue.
            FlightPhase::Apogee => Some(self.transition(
                FlightPhase::DrogueDescent,
                TransitionCause::ApogeeVelocity,
                Some(DeployEvent::Drogue),
                now,
            )),

            FlightPhase::DrogueDescent => {
                if est.altitude_m < self.config.main_deploy_altitude_m {
                    Some(self.transition(
                        FlightPhase::MainDescent,
                        TransitionCause::MainAltitude,
                        Some(DeployEvent::Main),
                        now,
                    ))
                } else {
                    None
                }
            }

            FlightPhase::MainDescent => {
                let stable = est.velocity_mps.abs() < self.config.landing_velocity_mps
                    && est.altitude_m < self.config.landing_altitude_m;
                if self.hold(stable, Clock::Landing, now, self.config.landing_debounce_us) {
                    Some(self.transition(
                        FlightPhase::Landed,
                        TransitionCause::LandingStable,
                        None,
                        now,
                    ))
                } else {
                    None
                }
            }

            FlightPhase::Landed | FlightPhase::Aborted => None,
        }
    }

    /// Debounce helper: true once `cond` has held continuously for `window`.
    fn hold(&mut self, cond: bool, clock: Clock, now: Micros, window: Micros) -> bool {
        let since = self.clock_mut(clock);
        if !cond {
            *since = None;
            return false;
        }
        let start = *since.get_or_insert(now);
        now.saturating_sub(start) >= window
    }

    fn clock_mut(&mut self, clock: Clock) -> &mut Option<Micros> {
        match clock {
            Clock::Liftoff => &mut self.liftoff_since,
            Clock::Burnout => &mut self.burnout_since,
            Clock::Apogee => &mut self.apogee_since,
            Clock::Landing => &mut self.landing_since,
            Clock::Fault => &mut self.fault_since,
        }
    }

    fn transition(
        &mut self,
        to: FlightPhase,
        cause: TransitionCause,
        deploy: Option<DeployEvent>,
        now: Micros,
    ) -> Transition {
        let from = self.phase;
        self.phase = to;
        self.phase_entered_us = now;
        self.liftoff_since = None;
        self.burnout_since = None;
        self.apogee_since = None;
        self.landing_since = None;
        Transition {
            timestamp_us: now,
            from,
            to,
            cause,
            deploy,
        }
    }
}

#[derive(Clone, Copy)]
enum Clock {
    Liftoff,
    Burnout,
    Apogee,
    Landing,
    Fault,
}

#[cfg(test)]
mod tests;
