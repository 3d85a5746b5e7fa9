//! Lockstep control pipeline.
//!
//! One call to [`FlightPipeline::tick`] per sample batch: estimate, evaluate
//! the state machine, execute deployment commands, poll the ignition
//! watchdogs, and hand every artifact to the logger. The firmware's control
//! task and the simulator both drive this same object, which is what makes
//! recorded flights replayable.

use heapless::Vec;
use log::{error, info};

use crate::command::{GroundCommand, GroundResponse, RejectReason, TelemetrySnapshot};
use crate::config::FlightConfig;
use crate::error::FlightError;
use crate::estimator::{CONFIDENCE_FLOOR, Estimator, StateEstimate};
use crate::flight::{FaultFlags, FlightPhase, FlightStateMachine, Transition};
use crate::logging::{FaultRecord, LogQueue, RecordPayload};
use crate::pyro::{DeployEvent, IgnitionController, PyroDriver, PyroEvent};
use crate::sensors::{Micros, SampleBatch};

/// Pyro events a single tick can surface (deploy command plus watchdogs).
pub const MAX_TICK_EVENTS: usize = 16;

/// Everything one tick produced, for callers that want to display it.
#[derive(Debug, Clone)]
pub struct TickOutput {
    pub estimate: StateEstimate,
    pub transition: Option<Transition>,
    pub pyro_events: Vec<PyroEvent, MAX_TICK_EVENTS>,
}

pub struct FlightPipeline<D: PyroDriver> {
    estimator: Estimator,
    machine: FlightStateMachine,
    pyro: IgnitionController<D>,
    queue: &'static LogQueue,
    /// Rising-edge trackers so fault records log the onset, not every tick.
    was_silent: bool,
    was_disagreeing: bool,
}

impl<D: PyroDriver> FlightPipeline<D> {
    pub fn new(config: &FlightConfig, driver: D, queue: &'static LogQueue) -> Self {
        Self {
            estimator: Estimator::new(config.estimator.clone(), config.sampling.inertial_period_us),
            machine: FlightStateMachine::new(config.detection.clone(), config.pyro.stage_count),
            pyro: IgnitionController::new(driver, config.pyro.clone()),
            queue,
            was_silent: false,
            was_disagreeing: false,
        }
    }

    pub fn phase(&self) -> FlightPhase {
        self.machine.phase()
    }

    /// Advance one sampling tick. Never blocks, never skips an estimate.
    pub fn tick(&mut self, batch: &SampleBatch) -> TickOutput {
        let now = batch.timestamp_us;
        let mut pyro_events: Vec<PyroEvent, MAX_TICK_EVENTS> = Vec::new();

        // Every sample is logged, invalid ones included.
        for sample in [batch.low_g, batch.high_g, batch.baro].into_iter().flatten() {
            self.queue
                .push(sample.timestamp_us, RecordPayload::Sample(sample));
        }

        // The pad reference keeps tracking weather drift until the vehicle
        // is moving.
        if self.on_pad() {
            self.estimator.track_pad_reference(batch);
        }

        let estimate = self.estimator.step(batch);
        self.queue.push(now, RecordPayload::Estimate(estimate));

        let faults = FaultFlags {
            sensor_silent: estimate.confidence <= CONFIDENCE_FLOOR,
            disagreement: !estimate.source_agreement,
            ignition_failed: None,
        };
        self.log_fault_edges(&faults, now);

        let transition = self.machine.update(&estimate, faults);
        if let Some(tr) = transition {
            self.apply_transition(&tr, &mut pyro_events);
        }

        // Watchdogs: dwell release, confirmation, backup deadlines.
        let polled = self.pyro.poll(now);
        for event in polled {
            self.queue.push(now, RecordPayload::Ignition(event));
            let _ = pyro_events.push(event);

            // Dual failure of a mandatory deployment aborts right here, on
            // the same tick the watchdog detected it.
            if let PyroEvent::DeployFailed { event } = event
                && event.mandatory()
                && let Some(tr) = self
                    .machine
                    .abort(crate::flight::AbortReason::IgnitionFailure(event), now)
            {
                self.apply_transition(&tr, &mut pyro_events);
            }
        }

        TickOutput {
            estimate,
            transition,
            pyro_events,
        }
    }

    /// Handle a ground command between ticks.
    pub fn handle_command(&mut self, command: GroundCommand, now: Micros) -> GroundResponse {
        match command {
            GroundCommand::Arm => self.handle_arm(now),
            GroundCommand::Disarm => match self.machine.disarm(now) {
                Some(tr) => {
                    self.queue.push(now, RecordPayload::Phase(tr));
                    for event in self.pyro.safe_all() {
                        self.queue.push(now, RecordPayload::Ignition(event));
                    }
                    info!("disarmed by ground command");
                    GroundResponse::Disarmed
                }
                None => GroundResponse::Rejected(RejectReason::InFlight),
            },
            GroundCommand::Query => GroundResponse::Snapshot(TelemetrySnapshot::from_channels(
                self.machine.phase(),
                self.machine.max_altitude_m(),
                self.pyro.channels(),
            )),
        }
    }

    /// Read-only channel view for telemetry.
    pub fn channels(&self) -> &[crate::pyro::IgnitionChannel] {
        self.pyro.channels()
    }

    fn handle_arm(&mut self, now: Micros) -> GroundResponse {
        if self.machine.phase() != FlightPhase::Idle {
            return GroundResponse::Rejected(RejectReason::NotIdle);
        }

        self.pyro.refresh_continuity();
        let faults = self.pyro.arm_all();
        for fault in &faults {
            self.queue.push(
                now,
                RecordPayload::Fault(FaultRecord {
                    phase: self.machine.phase(),
                    error: FlightError::Pyro(*fault),
                }),
            );
        }

        // A broken channel blocks only itself, but a deployment event with
        // neither channel armable has no recovery path: refuse to arm.
        let covered = self.pyro.event_coverage(DeployEvent::Drogue)
            && self.pyro.event_coverage(DeployEvent::Main);
        if !covered {
            error!("arming rejected: a mandatory deployment has no armable channel");
            self.pyro.safe_all();
            return GroundResponse::Rejected(RejectReason::NoDeploymentCoverage);
        }

        match self.machine.arm(now) {
            Some(tr) => {
                self.queue.push(now, RecordPayload::Phase(tr));
                info!("armed; {} continuity fault(s) logged", faults.len());
                GroundResponse::Armed
            }
            None => GroundResponse::Rejected(RejectReason::NotIdle),
        }
    }

    fn on_pad(&self) -> bool {
        matches!(self.machine.phase(), FlightPhase::Idle | FlightPhase::Armed)
    }

    fn apply_transition(
        &mut self,
        transition: &Transition,
        pyro_events: &mut Vec<PyroEvent, MAX_TICK_EVENTS>,
    ) {
        let now = transition.timestamp_us;
        info!(
            "phase {} -> {} ({:?})",
            transition.from.label(),
            transition.to.label(),
            transition.cause
        );
        self.queue.push(now, RecordPayload::Phase(*transition));

        if let Some(event) = transition.deploy {
            for e in self.pyro.command_deploy(event, now) {
                self.queue.push(now, RecordPayload::Ignition(e));
                let _ = pyro_events.push(e);
            }
        }

        if transition.to == FlightPhase::Aborted {
            for e in self.pyro.safe_all() {
                self.queue.push(now, RecordPayload::Ignition(e));
                let _ = pyro_events.push(e);
            }
        }
    }

    fn log_fault_edges(&mut self, faults: &FaultFlags, now: Micros) {
        if faults.sensor_silent && !self.was_silent {
            self.queue.push(
                now,
                RecordPayload::Fault(FaultRecord {
                    phase: self.machine.phase(),
                    error: FlightError::EstimatorDegraded,
                }),
            );
        }
        if faults.disagreement && !self.was_disagreeing {
            self.queue.push(
                now,
                RecordPayload::Fault(FaultRecord {
                    phase: self.machine.phase(),
                    error: FlightError::EstimatorDegraded,
                }),
            );
        }
        self.was_silent = faults.sensor_silent;
        self.was_disagreeing = faults.disagreement;
    }
}
