use super::*;

/// Bench driver: continuity is settable per channel, and burns through
/// (drops) a configurable time after energize when `burns` is set.
struct BenchDriver {
    continuity: [(ChannelId, bool); 4],
    /// Channels that behave like a healthy igniter: continuity drops as soon
    /// as they are energized.
    burns: [(ChannelId, bool); 4],
    energized: std::vec::Vec<ChannelId>,
    deenergized: std::vec::Vec<ChannelId>,
}

impl BenchDriver {
    fn new() -> Self {
        let all = [
            ChannelId::DroguePrimary,
            ChannelId::DrogueBackup,
            ChannelId::MainPrimary,
            ChannelId::MainBackup,
        ];
        Self {
            continuity: all.map(|id| (id, true)),
            burns: all.map(|id| (id, true)),
            energized: std::vec::Vec::new(),
            deenergized: std::vec::Vec::new(),
        }
    }

    fn set_continuity(&mut self, id: ChannelId, value: bool) {
        for slot in self.continuity.iter_mut() {
            if slot.0 == id {
                slot.1 = value;
            }
        }
    }

    /// Mark a channel as a dud: it keeps continuity after firing.
    fn set_dud(&mut self, id: ChannelId) {
        for slot in self.burns.iter_mut() {
            if slot.0 == id {
                slot.1 = false;
            }
        }
    }
}

impl PyroDriver for BenchDriver {
    fn energize(&mut self, channel: ChannelId) {
        self.energized.push(channel);
        let burns = self.burns.iter().any(|(id, b)| *id == channel && *b);
        if burns {
            self.set_continuity(channel, false);
        }
    }

    fn deenergize(&mut self, channel: ChannelId) {
        self.deenergized.push(channel);
    }

    fn continuity(&mut self, channel: ChannelId) -> bool {
        self.continuity
            .iter()
            .find(|(id, _)| *id == channel)
            .map(|(_, c)| *c)
            .unwrap_or(false)
    }
}

fn armed_controller(driver: BenchDriver) -> IgnitionController<BenchDriver> {
    let mut ctl = IgnitionController::new(driver, PyroConfig::default());
    let faults = ctl.arm_all();
    assert!(faults.is_empty(), "all channels have continuity: {faults:?}");
    ctl
}

fn has_fired(events: &PyroEvents, channel: ChannelId) -> bool {
    events
        .iter()
        .any(|e| matches!(e, PyroEvent::Fired { channel: c, .. } if *c == channel))
}

#[test]
fn test_channel_set_matches_hardware() {
    let ctl = IgnitionController::new(BenchDriver::new(), PyroConfig::default());
    let ids: std::vec::Vec<ChannelId> = ctl.channels().iter().map(|c| c.id).collect();
    assert_eq!(
        ids,
        std::vec![
            ChannelId::DroguePrimary,
            ChannelId::DrogueBackup,
            ChannelId::MainPrimary,
            ChannelId::MainBackup,
        ]
    );
    assert!(ctl.channels().iter().all(|c| !c.armed && !c.fired));
}

#[test]
fn test_arming_requires_continuity() {
    let mut driver = BenchDriver::new();
    driver.set_continuity(ChannelId::MainBackup, false);
    let mut ctl = IgnitionController::new(driver, PyroConfig::default());

    let faults = ctl.arm_all();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0], PyroFault::NoContinuity(ChannelId::MainBackup));

    // The broken circuit blocks only itself.
    assert!(!ctl.channel(ChannelId::MainBackup).unwrap().armed);
    assert!(ctl.channel(ChannelId::MainPrimary).unwrap().armed);
    assert!(ctl.event_coverage(DeployEvent::Main));
}

#[test]
fn test_fire_without_arming_is_blocked() {
    let mut ctl = IgnitionController::new(BenchDriver::new(), PyroConfig::default());
    let events = ctl.command_deploy(DeployEvent::Drogue, 1_000);
    assert!(events.iter().any(|e| matches!(
        e,
        PyroEvent::BlockedNotArmed {
            channel: ChannelId::DroguePrimary
        }
    )));
    assert!(!ctl.channel(ChannelId::DroguePrimary).unwrap().fired);
}

#[test]
fn test_nominal_fire_dwell_and_confirmation() {
    let config = PyroConfig::default();
    let mut ctl = armed_controller(BenchDriver::new());

    let t0 = 1_000_000;
    let events = ctl.command_deploy(DeployEvent::Drogue, t0);
    assert!(has_fired(&events, ChannelId::DroguePrimary));

    let ch = ctl.channel(ChannelId::DroguePrimary).unwrap();
    assert!(ch.fired);
    assert_eq!(ch.fire_time_us, Some(t0));

    // Healthy igniter burns through: next poll confirms, backup never fires.
    let events = ctl.poll(t0 + 5_000);
    assert!(events.iter().any(|e| matches!(
        e,
        PyroEvent::Confirmed {
            event: DeployEvent::Drogue,
            ..
        }
    )));

    // Dwell holds the drive until the configured time, then releases.
    assert!(ctl.poll(t0 + config.dwell_us - 1).is_empty());
    ctl.poll(t0 + config.dwell_us + 1);
    assert!(!ctl.channel(ChannelId::DrogueBackup).unwrap().fired);
}

#[test]
fn test_fired_flag_is_monotonic() {
    let mut ctl = armed_controller(BenchDriver::new());
    let t0 = 1_000_000;
    ctl.command_deploy(DeployEvent::Main, t0);
    assert!(ctl.channel(ChannelId::MainPrimary).unwrap().fired);

    // Long sequence of polls, a safe-all, and a repeat command: the flag
    // never goes back to false.
    for i in 1..100u64 {
        ctl.poll(t0 + i * 5_000);
        assert!(ctl.channel(ChannelId::MainPrimary).unwrap().fired);
    }
    ctl.safe_all();
    assert!(ctl.channel(ChannelId::MainPrimary).unwrap().fired);

    let events = ctl.command_deploy(DeployEvent::Main, t0 + 1_000_000);
    assert!(events.iter().any(|e| matches!(
        e,
        PyroEvent::DoubleFire {
            channel: ChannelId::MainPrimary
        }
    )));
    assert!(ctl.channel(ChannelId::MainPrimary).unwrap().fired);
    // And the duplicate command must not burn the backup charge.
    assert!(!ctl.channel(ChannelId::MainBackup).unwrap().fired);
}

#[test]
fn test_backup_fires_within_deadline_on_dud_primary() {
    let config = PyroConfig::default();
    let mut driver = BenchDriver::new();
    driver.set_dud(ChannelId::DroguePrimary);
    let mut ctl = armed_controller(driver);

    let t0 = 10_000_000;
    let events = ctl.command_deploy(DeployEvent::Drogue, t0);
    assert!(has_fired(&events, ChannelId::DroguePrimary));

    // Before the deadline the watchdog waits.
    let events = ctl.poll(t0 + config.backup_deadline_us - 5_000);
    assert!(!has_fired(&events, ChannelId::DrogueBackup));

    // One tick past the deadline the backup fires: bounded latency.
    let events = ctl.poll(t0 + config.backup_deadline_us + 5_000);
    assert!(has_fired(&events, ChannelId::DrogueBackup));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, PyroEvent::Fired { backup: true, .. }))
    );

    // The healthy backup confirms and the deployment settles.
    let events = ctl.poll(t0 + config.backup_deadline_us + 10_000);
    assert!(events.iter().any(|e| matches!(
        e,
        PyroEvent::Confirmed {
            event: DeployEvent::Drogue,
            channel: ChannelId::DrogueBackup
        }
    )));
}

#[test]
fn test_continuity_loss_at_arming_routes_to_backup() {
    // Scenario: drogue-primary wiring broken before arming. The backup
    // fires at the apogee event instead; the primary never energizes.
    let mut driver = BenchDriver::new();
    driver.set_continuity(ChannelId::DroguePrimary, false);
    let mut ctl = IgnitionController::new(driver, PyroConfig::default());

    let faults = ctl.arm_all();
    assert_eq!(faults, [PyroFault::NoContinuity(ChannelId::DroguePrimary)]);
    assert!(ctl.event_coverage(DeployEvent::Drogue));

    let t0 = 15_000_000;
    let events = ctl.command_deploy(DeployEvent::Drogue, t0);
    assert!(events.iter().any(|e| matches!(
        e,
        PyroEvent::BlockedNotArmed {
            channel: ChannelId::DroguePrimary
        }
    )));
    assert!(has_fired(&events, ChannelId::DrogueBackup));
    assert!(!ctl.channel(ChannelId::DroguePrimary).unwrap().fired);
    assert!(ctl.channel(ChannelId::DrogueBackup).unwrap().fired);
}

#[test]
fn test_dual_failure_reports_deploy_failed() {
    let config = PyroConfig::default();
    let mut driver = BenchDriver::new();
    driver.set_dud(ChannelId::MainPrimary);
    driver.set_dud(ChannelId::MainBackup);
    let mut ctl = armed_controller(driver);

    let t0 = 20_000_000;
    ctl.command_deploy(DeployEvent::Main, t0);

    let t1 = t0 + config.backup_deadline_us + 5_000;
    let events = ctl.poll(t1);
    assert!(has_fired(&events, ChannelId::MainBackup));

    let t2 = t1 + config.backup_deadline_us + 5_000;
    let events = ctl.poll(t2);
    assert!(events.iter().any(|e| matches!(
        e,
        PyroEvent::DeployFailed {
            event: DeployEvent::Main
        }
    )));
}

#[test]
fn test_safe_all_disarms_only_unfired_channels() {
    let mut ctl = armed_controller(BenchDriver::new());
    ctl.command_deploy(DeployEvent::Drogue, 1_000_000);

    let events = ctl.safe_all();
    assert!(events.iter().any(|e| matches!(e, PyroEvent::Safed)));

    for ch in ctl.channels() {
        if ch.fired {
            assert_eq!(ch.id, ChannelId::DroguePrimary);
        } else {
            assert!(!ch.armed, "{} should be disarmed", ch.id.label());
        }
    }
}

#[test]
fn test_staging_channel_population() {
    let config = PyroConfig {
        stage_count: 2,
        ..PyroConfig::default()
    };
    let ctl = IgnitionController::new(BenchDriver::new(), config);
    assert_eq!(ctl.channels().len(), 6);
    assert!(ctl.channel(ChannelId::Stage(0)).is_some());
    assert!(ctl.channel(ChannelId::Stage(1)).is_some());
}
