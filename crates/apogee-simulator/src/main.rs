//! Desktop simulator for the apogee-rs flight core.
//!
//! Drives the exact pipeline the firmware flies (estimator, state machine,
//! ignition controller, logger) with a synthetic dual-deploy flight
//! profile, then optionally replays the recorded log to check that the
//! reconstruction is deterministic.
//!
//! # Usage
//!
//! | Command                              | Action                              |
//! |--------------------------------------|-------------------------------------|
//! | `apogee-simulator fly out.bin`       | Fly the profile, record the log     |
//! | `apogee-simulator fly out.bin --broken-drogue-primary` | Same, with a dead primary channel |
//! | `apogee-simulator fly out.bin --baro-dropout` | Same, barometer dies during coast |
//! | `apogee-simulator replay out.bin`    | Replay a recorded log               |

use std::fs;
use std::process::ExitCode;

use log::{error, info, warn};

use apogee_core::command::{GroundCommand, GroundResponse};
use apogee_core::config::{FlightConfig, GRAVITY_MPS2};
use apogee_core::logging::{FrameReader, LogQueue, LogRecord, LogSink, LogWriter, RecordPayload};
use apogee_core::pipeline::FlightPipeline;
use apogee_core::pyro::{ChannelId, PyroDriver, PyroEvent};
use apogee_core::sensors::{Micros, Reading, SampleBatch, SensorSample, SensorSource};
use apogee_core::{FlightPhase, StateEstimate};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

const TICK_US: Micros = 5_000;
const BARO_DIVIDER: u64 = 8;
const PAD_PRESSURE_PA: f32 = 101_325.0;
const PAD_SETTLE_US: Micros = 1_000_000;
const LIFTOFF_US: Micros = 5_000_000;
const MAX_SIM_US: Micros = 300_000_000;

// ---------------------------------------------------------------------------
// Synthetic flight profile
// ---------------------------------------------------------------------------

/// Physical parameters of the scripted flight.
struct FlightProfile {
    boost_accel_g: f32,
    boost_duration_s: f32,
    drogue_descent_mps: f32,
    main_descent_mps: f32,
    main_handoff_altitude_m: f32,
}

impl Default for FlightProfile {
    fn default() -> Self {
        Self {
            boost_accel_g: 8.0,
            boost_duration_s: 2.0,
            drogue_descent_mps: 20.0,
            main_descent_mps: 5.0,
            main_handoff_altitude_m: 280.0,
        }
    }
}

/// Integrates the true vehicle state and synthesizes sensor readings with a
/// little deterministic noise.
struct FlightSim {
    profile: FlightProfile,
    alt_m: f32,
    vel_mps: f32,
    past_apogee: bool,
    apogee_alt_m: f32,
    apogee_time_us: Micros,
    /// Window during which the barometer returns invalid readings.
    baro_dropout_us: Option<(Micros, Micros)>,
}

impl FlightSim {
    fn new(profile: FlightProfile) -> Self {
        Self {
            profile,
            alt_m: 0.0,
            vel_mps: 0.0,
            past_apogee: false,
            apogee_alt_m: 0.0,
            apogee_time_us: 0,
            baro_dropout_us: None,
        }
    }

    fn boost_end_us(&self) -> Micros {
        LIFTOFF_US + (self.profile.boost_duration_s * 1e6) as Micros
    }

    fn advance(&mut self, now: Micros, dt: f32) {
        if now < LIFTOFF_US {
            return;
        }
        if self.past_apogee {
            self.vel_mps = if self.alt_m > self.profile.main_handoff_altitude_m {
                -self.profile.drogue_descent_mps
            } else {
                -self.profile.main_descent_mps
            };
        } else if now < self.boost_end_us() {
            self.vel_mps += (self.profile.boost_accel_g - 1.0) * GRAVITY_MPS2 * dt;
        } else {
            self.vel_mps -= GRAVITY_MPS2 * dt;
            if self.vel_mps <= 0.0 {
                self.past_apogee = true;
                self.apogee_alt_m = self.alt_m;
                self.apogee_time_us = now;
            }
        }
        self.alt_m += self.vel_mps * dt;
        if self.alt_m <= 0.0 {
            self.alt_m = 0.0;
            self.vel_mps = 0.0;
        }
    }

    /// Proper acceleration on the thrust axis: +1 g at rest, boost g during
    /// burn, zero in free fall, +1 g hanging on a canopy.
    fn proper_accel(&self, now: Micros) -> f32 {
        if now < LIFTOFF_US {
            GRAVITY_MPS2
        } else if now < self.boost_end_us() {
            self.profile.boost_accel_g * GRAVITY_MPS2
        } else if !self.past_apogee {
            0.0
        } else {
            GRAVITY_MPS2
        }
    }

    fn pressure_pa(&self) -> f32 {
        PAD_PRESSURE_PA * libm::powf(1.0 - self.alt_m / 44_330.77, 5.255_9)
    }

    /// Deterministic sensor noise so replays stay bit-exact.
    fn noise(&self, now: Micros, scale: f32) -> f32 {
        let t = now as f32 * 1e-6;
        scale * ((t * 37.0).sin() + 0.5 * (t * 131.0).cos())
    }

    fn batch(&self, tick: u64, now: Micros) -> SampleBatch {
        let accel = self.proper_accel(now);
        let mut batch = SampleBatch::new(now);
        batch.low_g = Some(SensorSample {
            timestamp_us: now,
            source: SensorSource::LowGImu,
            reading: Reading::Accel([0.0, 0.0, accel + self.noise(now, 0.05)]),
            valid: true,
        });
        batch.high_g = Some(SensorSample {
            timestamp_us: now,
            source: SensorSource::HighGImu,
            reading: Reading::Accel([0.0, 0.0, accel + self.noise(now, 0.5)]),
            valid: true,
        });
        if tick % BARO_DIVIDER == 0 {
            let dropped = self
                .baro_dropout_us
                .is_some_and(|(from, to)| now >= from && now < to);
            batch.baro = Some(SensorSample {
                timestamp_us: now,
                source: SensorSource::Barometer,
                reading: Reading::Pressure(if dropped {
                    0.0
                } else {
                    self.pressure_pa() + self.noise(now, 2.0)
                }),
                valid: !dropped,
            });
        }
        batch
    }
}

// ---------------------------------------------------------------------------
// Simulated pyro hardware
// ---------------------------------------------------------------------------

/// Bench igniters: healthy channels burn through as soon as they energize;
/// a broken channel never shows continuity.
struct SimPyro {
    continuity: Vec<(ChannelId, bool)>,
}

impl SimPyro {
    fn new(broken: &[ChannelId]) -> Self {
        let continuity = [
            ChannelId::DroguePrimary,
            ChannelId::DrogueBackup,
            ChannelId::MainPrimary,
            ChannelId::MainBackup,
        ]
        .iter()
        .map(|id| (*id, !broken.contains(id)))
        .collect();
        Self { continuity }
    }
}

impl PyroDriver for SimPyro {
    fn energize(&mut self, channel: ChannelId) {
        info!("PYRO energize {}", channel.label());
        for slot in self.continuity.iter_mut() {
            if slot.0 == channel {
                slot.1 = false;
            }
        }
    }

    fn deenergize(&mut self, _channel: ChannelId) {}

    fn continuity(&mut self, channel: ChannelId) -> bool {
        self.continuity
            .iter()
            .find(|(id, _)| *id == channel)
            .map(|(_, c)| *c)
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Log capture
// ---------------------------------------------------------------------------

struct FileImage(Vec<u8>);

impl LogSink for FileImage {
    fn append(&mut self, frame: &[u8]) -> Result<(), apogee_core::error::StorageFault> {
        self.0.extend_from_slice(frame);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), apogee_core::error::StorageFault> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fly mode
// ---------------------------------------------------------------------------

static LOG_QUEUE: LogQueue = LogQueue::new();

fn fly(out_path: &str, broken: &[ChannelId], baro_dropout: bool) -> ExitCode {
    let config = FlightConfig::default();
    let mut pipeline = FlightPipeline::new(&config, SimPyro::new(broken), &LOG_QUEUE);
    let mut sim = FlightSim::new(FlightProfile::default());
    if baro_dropout {
        // Barometer dies for two seconds mid-coast; the estimator should
        // coast on the accelerometers and recover.
        sim.baro_dropout_us = Some((10_000_000, 12_000_000));
    }
    let mut writer = LogWriter::new(FileImage(Vec::new()));

    let drain = |writer: &mut LogWriter<FileImage>| {
        while let Some(rec) = LOG_QUEUE.try_next() {
            if writer.write(&rec).is_err() {
                warn!("log write failed");
            }
        }
    };

    let mut tick: u64 = 0;
    let mut now: Micros = 0;
    let mut armed = false;

    while now < MAX_SIM_US {
        if !armed && now >= PAD_SETTLE_US {
            match pipeline.handle_command(GroundCommand::Arm, now) {
                GroundResponse::Armed => info!("armed at t={:.2}s", now as f64 * 1e-6),
                other => {
                    error!("arming failed: {other:?}");
                    return ExitCode::FAILURE;
                }
            }
            armed = true;
        }

        let out = pipeline.tick(&sim.batch(tick, now));
        report(&out.estimate, out.transition.as_ref().map(|t| (t.from, t.to)), &out.pyro_events, now);
        drain(&mut writer);

        if pipeline.phase().is_terminal() {
            break;
        }

        sim.advance(now, TICK_US as f32 * 1e-6);
        tick += 1;
        now = tick * TICK_US;
    }
    drain(&mut writer);

    info!(
        "flight over: phase {} after {:.1}s, true apogee {:.0}m at t={:.2}s",
        pipeline.phase().label(),
        now as f64 * 1e-6,
        sim.apogee_alt_m,
        sim.apogee_time_us as f64 * 1e-6,
    );
    for ch in pipeline.channels() {
        info!(
            "  {}: armed={} continuity={} fired={}",
            ch.id.label(),
            ch.armed,
            ch.continuity,
            ch.fired
        );
    }

    let image = writer.into_sink().0;
    if let Err(e) = fs::write(out_path, &image) {
        error!("failed to write {out_path}: {e}");
        return ExitCode::FAILURE;
    }
    info!("log written to {out_path} ({} bytes)", image.len());
    ExitCode::SUCCESS
}

fn report(
    estimate: &StateEstimate,
    transition: Option<(FlightPhase, FlightPhase)>,
    pyro_events: &[PyroEvent],
    now: Micros,
) {
    if let Some((from, to)) = transition {
        info!(
            "t={:8.3}s  {} -> {}  (alt {:.1}m, vel {:+.1}m/s)",
            now as f64 * 1e-6,
            from.label(),
            to.label(),
            estimate.altitude_m,
            estimate.velocity_mps
        );
    }
    for event in pyro_events {
        info!("t={:8.3}s  pyro: {event:?}", now as f64 * 1e-6);
    }
}

// ---------------------------------------------------------------------------
// Replay mode
// ---------------------------------------------------------------------------

static REPLAY_QUEUE: LogQueue = LogQueue::new();

fn replay(path: &str) -> ExitCode {
    let image = match fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            error!("failed to read {path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut reader = FrameReader::new(&image);
    let records: Vec<LogRecord> = reader.by_ref().collect();
    if reader.remaining() > 0 {
        warn!("{} trailing bytes ignored (truncated tail)", reader.remaining());
    }
    info!("{} records decoded", records.len());

    // Rebuild batches and the recorded phase path.
    let mut batches: Vec<SampleBatch> = Vec::new();
    let mut recorded: Vec<(FlightPhase, FlightPhase, Micros)> = Vec::new();
    let mut armed_at = None;
    for rec in &records {
        match rec.payload {
            RecordPayload::Sample(sample) => {
                if batches.last().map(|b| b.timestamp_us) != Some(sample.timestamp_us) {
                    batches.push(SampleBatch::new(sample.timestamp_us));
                }
                let batch = batches.last_mut().expect("just pushed");
                match sample.source {
                    SensorSource::LowGImu => batch.low_g = Some(sample),
                    SensorSource::HighGImu => batch.high_g = Some(sample),
                    SensorSource::Barometer => batch.baro = Some(sample),
                }
            }
            RecordPayload::Phase(tr) => {
                if tr.to == FlightPhase::Armed {
                    armed_at = Some(tr.timestamp_us);
                }
                recorded.push((tr.from, tr.to, tr.timestamp_us));
            }
            _ => {}
        }
    }
    let Some(armed_at) = armed_at else {
        error!("log holds no arming transition, nothing to replay");
        return ExitCode::FAILURE;
    };

    // Feed the recorded samples through a fresh pipeline.
    let config = FlightConfig::default();
    let mut pipeline = FlightPipeline::new(&config, SimPyro::new(&[]), &REPLAY_QUEUE);
    let mut replayed: Vec<(FlightPhase, FlightPhase, Micros)> = Vec::new();
    let mut armed = false;
    for batch in &batches {
        if !armed && batch.timestamp_us >= armed_at {
            pipeline.handle_command(GroundCommand::Arm, armed_at);
            armed = true;
        }
        if let Some(tr) = pipeline.tick(batch).transition {
            replayed.push((tr.from, tr.to, tr.timestamp_us));
        }
        while REPLAY_QUEUE.try_next().is_some() {}
    }

    let recorded_sensor: Vec<_> = recorded
        .iter()
        .filter(|(_, to, _)| *to != FlightPhase::Armed && *to != FlightPhase::Idle)
        .copied()
        .collect();

    for (from, to, ts) in &replayed {
        info!(
            "replayed t={:8.3}s  {} -> {}",
            *ts as f64 * 1e-6,
            from.label(),
            to.label()
        );
    }

    if replayed == recorded_sensor {
        info!("replay deterministic: {} transitions match", replayed.len());
        ExitCode::SUCCESS
    } else {
        error!(
            "replay diverged: recorded {} transitions, replayed {}",
            recorded_sensor.len(),
            replayed.len()
        );
        ExitCode::FAILURE
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn usage() -> ExitCode {
    eprintln!("usage: apogee-simulator fly <out.bin> [--broken-drogue-primary] [--baro-dropout]");
    eprintln!("       apogee-simulator replay <log.bin>");
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("fly") => {
            let Some(path) = args.get(1) else {
                return usage();
            };
            let broken: Vec<ChannelId> = if args.iter().any(|a| a == "--broken-drogue-primary") {
                vec![ChannelId::DroguePrimary]
            } else {
                Vec::new()
            };
            let baro_dropout = args.iter().any(|a| a == "--baro-dropout");
            fly(path, &broken, baro_dropout)
        }
        Some("replay") => {
            let Some(path) = args.get(1) else {
                return usage();
            };
            replay(path)
        }
        _ => usage(),
    }
}
