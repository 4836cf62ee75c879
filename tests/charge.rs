//! Charge controller behavior across ticks

use sc88xx_drivers::adc::Reference;
use sc88xx_drivers::battery::Supply;
use sc88xx_drivers::{
    ChargeConfig, ChargeState, Charger, Controller, CurrentSense, Instant, Report, Samples, Sink,
    Snapshot, Source, Status, SwitchPoint, TemperatureLimits,
};

#[derive(Default)]
struct Board {
    running: bool,
    starts: usize,
    stops: usize,
    programmed_ma: Option<u32>,
    sensed_ma: u32,
    switch_points: Vec<u8>,
    recharges: usize,
    adapter: bool,
}

impl Charger for Board {
    fn start(&mut self) {
        self.running = true;
        self.starts += 1;
    }
    fn stop(&mut self) {
        self.running = false;
        self.stops += 1;
    }
    fn set_current(&mut self, milliamps: u32) {
        self.programmed_ma = Some(milliamps);
    }
    fn set_switch_point(&mut self, point: SwitchPoint) {
        self.switch_points.push(point.raw());
    }
    fn set_recharge(&mut self) {
        self.recharges += 1;
    }
    fn stop_recharge(&mut self) {}
    fn is_adapter(&mut self) -> bool {
        self.adapter
    }
    fn charge_current(&mut self) -> sc88xx_drivers::Result<u32> {
        Ok(self.sensed_ma)
    }
}

const CONFIG: ChargeConfig = ChargeConfig {
    current_sense: CurrentSense::Charger,
    ..ChargeConfig::DEFAULT
};

// Battery counts, default calibration
const MV_3900: u16 = 862;
const MV_4145: u16 = 916;
const MV_4213: u16 = 931;
const MV_4354: u16 = 962;
const MV_3528: u16 = 780;

// Charger counts, through the 3/2 divider
const CHARGER_4998: u16 = 737;
const CHARGER_6504: u16 = 958;
const CHARGER_6108: u16 = 900;
const CHARGER_5794: u16 = 854;

struct Rig {
    controller: Controller<Board>,
    adc: Samples,
    now: u64,
}

impl Rig {
    fn new(config: ChargeConfig, battery: u16) -> Self {
        let board = Board {
            sensed_ma: 500,
            ..Board::default()
        };
        let mut rig = Rig {
            controller: Controller::new(board, config),
            adc: Samples {
                battery: Some(battery),
                charger: Some(CHARGER_4998),
                program: None,
                temperature: Some(600),
            },
            now: 0,
        };
        rig.controller.start(&mut rig.adc).unwrap();
        rig
    }

    fn tick(&mut self) -> Report {
        self.now += 100;
        self.controller
            .tick(Instant::from_millis(self.now), &mut self.adc)
    }

    fn ticks(&mut self, count: usize) -> Report {
        let mut report = self.tick();
        for _ in 1..count {
            report = self.tick();
        }
        report
    }

    fn board(&self) -> &Board {
        self.controller.charger()
    }
}

#[test]
fn plug_in_starts_charging() {
    let mut rig = Rig::new(CONFIG, MV_3900);
    assert_eq!(rig.controller.state(), ChargeState::Idle);
    assert_eq!(rig.controller.plug_in(true), Source::Usb);

    let report = rig.tick();
    assert_eq!(report.snapshot.state, ChargeState::Charging(Source::Usb));
    assert_eq!(report.snapshot.status, Status::Charging);
    assert!(report.snapshot.usb_online);
    assert!(report.notify.usb);
    assert!(report.notify.battery);
    assert!(!report.notify.ac);
    assert!(rig.board().running);
    assert_eq!(rig.board().programmed_ma, Some(400));
    assert_eq!(report.snapshot.current, Some(500));
}

#[test]
fn wall_adapter_charges_faster() {
    let mut rig = Rig::new(CONFIG, MV_3900);
    rig.controller.charger_mut().adapter = true;
    assert_eq!(rig.controller.plug_in(false), Source::Ac);
    let report = rig.tick();
    assert_eq!(report.snapshot.state, ChargeState::Charging(Source::Ac));
    assert!(report.notify.ac);
    assert_eq!(rig.board().programmed_ma, Some(600));
}

#[test]
fn unplug_stops_charging() {
    let mut rig = Rig::new(CONFIG, MV_3900);
    rig.controller.plug_in(true);
    rig.tick();
    rig.controller.plug_out();
    let report = rig.tick();
    assert_eq!(report.snapshot.state, ChargeState::Idle);
    assert_eq!(report.snapshot.status, Status::Discharging);
    assert_eq!(report.snapshot.current, None);
    assert!(report.notify.usb);
    assert!(!rig.board().running);
    assert_eq!(rig.controller.period(), 1000);
}

#[test]
fn over_voltage_hysteresis() {
    let mut rig = Rig::new(CONFIG, MV_3900);
    rig.controller.plug_in(true);
    rig.tick();

    rig.adc.charger = Some(CHARGER_6504);
    let report = rig.tick();
    assert_eq!(report.snapshot.state, ChargeState::OverVoltageProtect);
    assert!(report.snapshot.over_voltage);
    assert!(report.notify.battery);
    assert!(!rig.board().running);

    // Between recovery and trip: stays protected
    rig.adc.charger = Some(CHARGER_6108);
    let report = rig.ticks(5);
    assert_eq!(report.snapshot.state, ChargeState::OverVoltageProtect);
    assert_eq!(rig.board().starts, 1);

    rig.adc.charger = Some(CHARGER_5794);
    let report = rig.tick();
    assert_eq!(report.snapshot.state, ChargeState::Charging(Source::Usb));
    assert!(!report.snapshot.over_voltage);
    assert!(report.notify.battery);
    assert_eq!(rig.board().starts, 2);
}

#[test]
fn over_voltage_trips_without_current_sample() {
    let config = ChargeConfig {
        current_sense: CurrentSense::ProgramPin(sc88xx_drivers::adc::Ratio::new(1, 2)),
        ..CONFIG
    };
    let mut rig = Rig::new(config, MV_3900);
    rig.controller.plug_in(true);
    rig.tick();
    rig.adc.charger = Some(CHARGER_6504);
    let report = rig.tick();
    assert_eq!(report.snapshot.state, ChargeState::OverVoltageProtect);
}

#[test]
fn replug_while_protected_waits_for_recovery() {
    let mut rig = Rig::new(CONFIG, MV_3900);
    rig.controller.plug_in(true);
    rig.tick();
    rig.adc.charger = Some(CHARGER_6504);
    rig.tick();

    rig.controller.plug_out();
    rig.tick();
    rig.controller.plug_in(true);
    let report = rig.tick();
    assert_eq!(report.snapshot.state, ChargeState::OverVoltageProtect);
    assert_eq!(rig.board().starts, 1);

    rig.adc.charger = Some(CHARGER_4998);
    let report = rig.tick();
    assert_eq!(report.snapshot.state, ChargeState::Charging(Source::Usb));
}

#[test]
fn over_charge_finishes() {
    let mut rig = Rig::new(CONFIG, MV_4354);
    rig.controller.plug_in(true);
    let report = rig.tick();
    assert_eq!(report.snapshot.state, ChargeState::PreCharge);
    assert_eq!(report.snapshot.status, Status::Full);
    assert!(!rig.board().running);
}

#[test]
fn pulse_tail_then_top_off() {
    let config = ChargeConfig {
        pulse_ticks: 3,
        switch_update_ticks: 1,
        ..CONFIG
    };
    let mut rig = Rig::new(config, MV_4213);
    rig.controller.charger_mut().sensed_ma = 50;
    rig.controller.plug_in(true);

    let report = rig.tick();
    assert_eq!(report.snapshot.state, ChargeState::Charging(Source::Usb));
    // Above target plus margin, so the switch point came down
    assert_eq!(report.snapshot.switch_point, SwitchPoint::new(0x0E));

    let report = rig.ticks(2);
    assert_eq!(report.snapshot.state, ChargeState::Charging(Source::Usb));
    let report = rig.tick();
    assert_eq!(report.snapshot.state, ChargeState::PreCharge);
    assert_eq!(report.snapshot.status, Status::Full);
    assert!(report.notify.battery);
    assert!(!rig.board().running);

    // Holds while the battery stays high
    let report = rig.ticks(5);
    assert_eq!(report.snapshot.state, ChargeState::PreCharge);

    rig.adc.battery = Some(MV_4145);
    let mut resumed = false;
    for _ in 0..10 {
        if rig.tick().snapshot.state == ChargeState::Charging(Source::Usb) {
            resumed = true;
            break;
        }
    }
    assert!(resumed);
    assert_eq!(rig.board().starts, 2);
}

#[test]
fn low_current_raises_switch_point() {
    let config = ChargeConfig {
        switch_update_ticks: 2,
        ..CONFIG
    };
    let mut rig = Rig::new(config, MV_3900);
    rig.controller.charger_mut().sensed_ma = 200;
    rig.controller.plug_in(true);
    rig.tick();
    assert_eq!(rig.controller.snapshot().switch_point.raw(), 0x0F);
    rig.tick();
    assert_eq!(rig.controller.snapshot().switch_point.raw(), 0x10);
    rig.ticks(2);
    assert_eq!(rig.controller.snapshot().switch_point.raw(), 0x11);
    assert_eq!(rig.board().switch_points.last(), Some(&0x11));
    assert!(rig.board().recharges >= 4);
}

#[test]
fn switch_point_saturates() {
    let config = ChargeConfig {
        switch_update_ticks: 1,
        switch_point: SwitchPoint::new(0x1E),
        ..CONFIG
    };
    let mut rig = Rig::new(config, MV_3900);
    rig.controller.charger_mut().sensed_ma = 10;
    rig.controller.plug_in(true);
    let report = rig.ticks(5);
    assert_eq!(report.snapshot.switch_point, SwitchPoint::MAX);
}

#[test]
fn charge_timeout() {
    let config = ChargeConfig {
        max_charge_ms: 1000,
        ..CONFIG
    };
    let mut rig = Rig::new(config, MV_3900);
    rig.controller.plug_in(true);
    let report = rig.ticks(10);
    assert_eq!(report.snapshot.state, ChargeState::Charging(Source::Usb));
    assert_eq!(report.snapshot.charge_elapsed_ms, 900);

    let report = rig.tick();
    assert_eq!(report.snapshot.state, ChargeState::Charging(Source::Usb));
    let report = rig.tick();
    assert_eq!(report.snapshot.state, ChargeState::PreCharge);
    assert_eq!(report.snapshot.charge_elapsed_ms, 0);
    assert!(report.notify.battery);
}

#[test]
fn temperature_protection() {
    let config = ChargeConfig {
        temperature: Some(TemperatureLimits {
            report_delta: 0,
            ..TemperatureLimits::DEFAULT
        }),
        ..CONFIG
    };
    let mut rig = Rig::new(config, MV_3900);
    assert_eq!(rig.controller.snapshot().temperature, Some(22));
    rig.controller.plug_in(true);
    rig.tick();

    rig.adc.temperature = Some(300);
    let report = rig.ticks(10);
    assert_eq!(report.snapshot.temperature, Some(58));
    assert_eq!(report.snapshot.state, ChargeState::OverTempProtect);
    assert!(report.snapshot.over_temperature);
    assert!(!rig.board().running);

    // Back under the trip point, but not yet inside the resume band
    rig.adc.temperature = Some(340);
    let report = rig.ticks(10);
    assert_eq!(report.snapshot.temperature, Some(53));
    assert_eq!(report.snapshot.state, ChargeState::OverTempProtect);

    rig.adc.temperature = Some(440);
    let report = rig.ticks(10);
    assert_eq!(report.snapshot.temperature, Some(40));
    assert_eq!(report.snapshot.state, ChargeState::Charging(Source::Usb));
    assert!(rig.board().running);
}

#[test]
fn missing_thermistor_skips_only_temperature() {
    let config = ChargeConfig {
        temperature: Some(TemperatureLimits::DEFAULT),
        switch_update_ticks: 1,
        ..CONFIG
    };
    let mut rig = Rig::new(config, MV_3900);
    rig.controller.charger_mut().sensed_ma = 10;
    rig.controller.plug_in(true);
    rig.adc.temperature = None;
    let report = rig.ticks(3);
    assert_eq!(report.snapshot.state, ChargeState::Charging(Source::Usb));
    assert_eq!(report.snapshot.temperature, Some(22));
    assert_eq!(report.snapshot.switch_point.raw(), 0x12);
    assert_eq!(rig.board().recharges, 3);
}

#[test]
fn timeout_without_thermistor() {
    let config = ChargeConfig {
        temperature: Some(TemperatureLimits::DEFAULT),
        max_charge_ms: 1000,
        ..CONFIG
    };
    let mut rig = Rig::new(config, MV_3900);
    rig.controller.plug_in(true);
    rig.adc.temperature = None;
    let report = rig.ticks(11);
    assert_eq!(report.snapshot.state, ChargeState::Charging(Source::Usb));
    let report = rig.tick();
    assert_eq!(report.snapshot.state, ChargeState::PreCharge);
    assert!(report.notify.battery);
    assert!(!rig.board().running);
}

#[test]
fn timeout_without_battery_or_charger_samples() {
    let config = ChargeConfig {
        max_charge_ms: 1000,
        ..CONFIG
    };
    let mut rig = Rig::new(config, MV_3900);
    rig.controller.plug_in(true);
    rig.tick();
    rig.adc.battery = None;
    rig.adc.charger = None;
    let report = rig.ticks(10);
    assert_eq!(report.snapshot.state, ChargeState::Charging(Source::Usb));
    let report = rig.tick();
    assert_eq!(report.snapshot.state, ChargeState::PreCharge);
    assert!(!rig.board().running);
}

#[test]
fn capacity_stays_in_range() {
    let mut rig = Rig::new(CONFIG, MV_3900);
    let mut seed: u32 = 0x2545_F491;
    for step in 0..500 {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let raw = match step % 50 {
            0 => 0,
            1 => u16::MAX,
            _ => (seed >> 16) as u16 % 1200,
        };
        rig.adc.battery = Some(raw);
        rig.adc.charger = Some((seed >> 8) as u16 % 1100);
        if step % 37 == 0 {
            rig.controller.plug_in(step % 2 == 0);
        } else if step % 53 == 0 {
            rig.controller.plug_out();
        }
        rig.now += 1000;
        let report = rig
            .controller
            .tick(Instant::from_millis(rig.now), &mut rig.adc);
        assert!(report.snapshot.capacity <= 100);
        assert_eq!(report.snapshot.voltage % 10, 0);
    }
}

#[test]
fn capacity_updates_are_rate_limited() {
    let config = ChargeConfig {
        switch_update_ticks: 1,
        ..CONFIG
    };
    let mut rig = Rig::new(config, MV_3900);
    let start = rig.tick().snapshot.capacity;

    rig.adc.battery = Some(MV_4213);
    let report = rig.ticks(20);
    assert_eq!(report.snapshot.capacity, start);

    let report = rig.ticks(20);
    assert!(report.snapshot.capacity > start);
}

#[derive(Default)]
struct Listener {
    changes: Vec<(Supply, Snapshot)>,
}

impl Sink for Listener {
    fn changed(&mut self, supply: Supply, snapshot: &Snapshot) {
        self.changes.push((supply, *snapshot));
    }
}

#[test]
fn reports_reach_the_sink() {
    let mut rig = Rig::new(CONFIG, MV_3900);
    rig.controller.plug_in(true);
    let mut listener = Listener::default();
    rig.tick().publish(&mut listener);
    let supplies: Vec<_> = listener.changes.iter().map(|(supply, _)| *supply).collect();
    assert_eq!(supplies, [Supply::Battery, Supply::Usb]);
    assert!(listener.changes[0].1.usb_online);

    listener.changes.clear();
    rig.tick().publish(&mut listener);
    assert!(listener.changes.is_empty());
}

#[test]
fn sleep_ticks_do_not_publish() {
    let mut rig = Rig::new(CONFIG, MV_3900);
    rig.adc.battery = Some(MV_4213);
    for step in 1..=10 {
        let snapshot = rig
            .controller
            .tick_asleep(Instant::from_millis(step * 1000), &mut rig.adc);
        assert_eq!(snapshot.voltage, 3900);
    }
    let report = rig
        .controller
        .tick(Instant::from_millis(11_000), &mut rig.adc);
    assert_eq!(report.snapshot.voltage, 4210);
    assert!(report.notify.battery);
}

#[test]
fn resync_reports_critical_battery() {
    let mut rig = Rig::new(CONFIG, MV_3900);
    assert_eq!(rig.controller.resync(&mut rig.adc), Ok(false));

    rig.adc.battery = Some(MV_3528);
    assert_eq!(rig.controller.resync(&mut rig.adc), Ok(true));
    let report = rig.controller.resume();
    assert!(report.notify.battery);
    assert!(report.snapshot.capacity < 5);

    rig.adc.battery = None;
    assert!(rig.controller.resync(&mut rig.adc).is_err());
}

#[test]
fn runtime_calibration() {
    let mut rig = Rig::new(CONFIG, MV_3900);
    assert!(rig.controller.calibrate(Reference::High, (900 << 16) | 4200));
    assert!(rig.controller.calibrate(Reference::Low, (800 << 16) | 3700));
    assert_eq!(rig.controller.measure_battery(&mut rig.adc), Ok(3700 + 62 * 500 / 100));
    assert!(!rig.controller.calibrate(Reference::Low, (1 << 16) | 1));
}

#[test]
fn shutdown_returns_the_charger() {
    let mut rig = Rig::new(CONFIG, MV_3900);
    rig.controller.plug_in(true);
    rig.tick();
    let board = rig.controller.shutdown();
    assert!(!board.running);
    assert_eq!(board.stops, 1);
}
