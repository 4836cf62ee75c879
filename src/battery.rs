//! The battery charge controller
//!
//! A [`Controller`] owns a [`Charger`] and runs a periodic decision loop
//! over ADC samples. Each [`tick`](Controller::tick) reacts to plug events,
//! filters the battery, charger, current, and temperature readings, drives
//! the charger through its states, and reports what changed.
//!
//! The controller never blocks and holds no locks. Schedule ticks so they
//! never overlap, using [`period`](Controller::period) as the delay between
//! them.

use crate::adc::{self, Adc, AdcChannel, Calibration, Reference};
use crate::charger::{Charger, CurrentSense, SwitchPoint};
use crate::config::{ChargeConfig, TemperatureLimits};
use crate::curve;
use crate::filter::MovingAverage;
use crate::Result;

/// Samples averaged for the battery, charger, current, and temperature
const AVERAGE_WINDOW: usize = 10;
/// Averaged battery samples kept for the capacity estimate
const CAPACITY_WINDOW: usize = 32;
/// Battery samples taken by a resync
const RESYNC_SAMPLES: usize = 7;
/// Capacity, in percent, below which a resync reports a critical battery
const CRITICAL_CAPACITY: u8 = 5;

/// A point in time, in milliseconds from an arbitrary epoch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(u64);

impl Instant {
    pub const fn from_millis(millis: u64) -> Self {
        Instant(millis)
    }

    pub const fn millis(self) -> u64 {
        self.0
    }

    /// Milliseconds since `earlier`, or zero if `earlier` is later
    pub const fn since(self, earlier: Instant) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// A charge source
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    /// A USB host
    Usb,
    /// A wall adapter
    Ac,
}

/// The charge state machine's state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChargeState {
    /// Not charging, and no top-off pending
    Idle,
    /// Charging from a source
    Charging(Source),
    /// Charged; resumes once the battery sags below `precharge_start`
    PreCharge,
    /// The charger input voltage tripped its ceiling
    OverVoltageProtect,
    /// The battery temperature left its band
    OverTempProtect,
}

/// Power-supply status, as shown to users
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Charging,
    Full,
    Discharging,
}

/// A copy of the controller's observable state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub state: ChargeState,
    pub status: Status,
    pub usb_online: bool,
    pub ac_online: bool,
    /// State of charge, in `[0, 100]`
    pub capacity: u8,
    /// Battery voltage, rounded down to 10 mV
    pub voltage: u32,
    /// Averaged charger input voltage, in millivolts
    pub charger_voltage: u32,
    /// Averaged charge current, in milliamps, while charging
    pub current: Option<u32>,
    /// Battery temperature, in °C, when temperature limits are configured
    pub temperature: Option<i32>,
    pub switch_point: SwitchPoint,
    /// Milliseconds spent in the current charge
    pub charge_elapsed_ms: u64,
    pub over_voltage: bool,
    pub over_temperature: bool,
}

/// Which power supplies changed during a tick
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Notify {
    pub battery: bool,
    pub usb: bool,
    pub ac: bool,
}

impl Notify {
    pub const fn any(&self) -> bool {
        self.battery || self.usb || self.ac
    }
}

/// A power supply that consumers can observe
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Supply {
    Battery,
    Usb,
    Ac,
}

/// Receives change notifications
pub trait Sink {
    fn changed(&mut self, supply: Supply, snapshot: &Snapshot);
}

/// The outcome of a tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Report {
    pub snapshot: Snapshot,
    pub notify: Notify,
}

impl Report {
    /// Tell `sink` about every supply that changed
    pub fn publish<S: Sink + ?Sized>(&self, sink: &mut S) {
        if self.notify.battery {
            sink.changed(Supply::Battery, &self.snapshot);
        }
        if self.notify.usb {
            sink.changed(Supply::Usb, &self.snapshot);
        }
        if self.notify.ac {
            sink.changed(Supply::Ac, &self.snapshot);
        }
    }
}

/// The charge controller
///
/// Create one per battery, [`start`](Controller::start) it once the ADC is
/// usable, then [`tick`](Controller::tick) it every
/// [`period`](Controller::period).
pub struct Controller<C> {
    config: ChargeConfig,
    charger: C,
    calibration: Calibration,

    usb_online: bool,
    ac_online: bool,
    seen_usb: bool,
    seen_ac: bool,

    charging: bool,
    in_precharge: bool,
    over_voltage: bool,
    over_temperature: bool,
    source: Option<Source>,
    /// Remaining ticks of the pulse tail, once it has begun
    pulse: Option<u32>,
    switch_countdown: u32,
    capacity_ticks: u32,
    switch_point: SwitchPoint,
    charge_started: Instant,
    now: Instant,

    battery: MovingAverage<AVERAGE_WINDOW>,
    capacity_window: MovingAverage<CAPACITY_WINDOW>,
    current_window: MovingAverage<AVERAGE_WINDOW>,
    charger_window: MovingAverage<AVERAGE_WINDOW>,
    temperature_window: MovingAverage<AVERAGE_WINDOW>,

    voltage: u32,
    charger_voltage: u32,
    current: u32,
    temperature: Option<i32>,
    capacity: u8,
    reported_voltage: u32,
    capacity_updated: Option<Instant>,
    resync_capacity: Option<u8>,
}

impl<C: Charger> Controller<C> {
    pub fn new(charger: C, config: ChargeConfig) -> Self {
        Controller {
            charger,
            calibration: config.calibration,
            usb_online: false,
            ac_online: false,
            seen_usb: false,
            seen_ac: false,
            charging: false,
            in_precharge: false,
            over_voltage: false,
            over_temperature: false,
            source: None,
            pulse: None,
            switch_countdown: config.switch_update_ticks.max(1),
            capacity_ticks: 0,
            switch_point: config.switch_point,
            charge_started: Instant::default(),
            now: Instant::default(),
            battery: MovingAverage::new(),
            capacity_window: MovingAverage::new(),
            current_window: MovingAverage::new(),
            charger_window: MovingAverage::new(),
            temperature_window: MovingAverage::new(),
            voltage: 0,
            charger_voltage: 0,
            current: 0,
            temperature: None,
            capacity: 0,
            reported_voltage: 0,
            capacity_updated: None,
            resync_capacity: None,
            config,
        }
    }

    /// Prime the sample windows and program the switch point
    ///
    /// Fails with [`SampleUnavailable`](crate::Error::SampleUnavailable)
    /// if a channel can't be read; call again later.
    pub fn start<A: Adc + ?Sized>(&mut self, adc: &mut A) -> Result<()> {
        let raw = adc.sample(AdcChannel::BatteryVoltage)?;
        let celsius = match self.config.temperature {
            Some(_) => {
                let raw = adc.sample(AdcChannel::Temperature)?;
                self.temperature_window.fill(u32::from(raw));
                Some(curve::interpolate(
                    self.config.thermistor_curve,
                    i32::from(raw),
                ))
            }
            None => None,
        };
        self.temperature = celsius;
        self.battery.fill(u32::from(raw));
        self.capacity_window.fill(u32::from(raw));
        self.voltage = self.calibration.millivolts(raw);
        self.reported_voltage = round(self.voltage);
        self.capacity = curve::capacity(self.config.capacity_curve, self.voltage);
        self.charger.set_switch_point(self.switch_point);
        log::info!(
            "battery {} mV, {}% ({:?} calibration)",
            self.voltage,
            self.capacity,
            self.calibration.source()
        );
        Ok(())
    }

    /// A charger was attached
    ///
    /// `usb_cable` is set when the USB stack recognized a host. Otherwise
    /// the charger decides whether it sees a wall adapter. The next tick
    /// starts charging.
    pub fn plug_in(&mut self, usb_cable: bool) -> Source {
        let source = if usb_cable {
            Source::Usb
        } else if self.charger.is_adapter() {
            Source::Ac
        } else {
            log::warn!("unknown charger, treating it as USB");
            Source::Usb
        };
        self.usb_online = source == Source::Usb;
        self.ac_online = source == Source::Ac;
        log::info!(
            "charger plugged in: usb {} ac {}",
            self.usb_online,
            self.ac_online
        );
        source
    }

    /// The charger was detached; the next tick stops charging
    pub fn plug_out(&mut self) {
        log::info!("charger unplugged");
        self.detach();
    }

    /// Treat every source as detached, even if one is attached
    pub fn force_offline(&mut self) {
        log::info!("charging stopped on request");
        self.detach();
    }

    fn detach(&mut self) {
        self.usb_online = false;
        self.ac_online = false;
    }

    /// Delay until the next tick, in milliseconds
    ///
    /// Shorter while a source is attached, so charging decisions converge
    /// faster.
    pub fn period(&self) -> u32 {
        if self.online().is_some() {
            self.config.charging_period_ms
        } else {
            self.config.idle_period_ms
        }
    }

    /// Run one iteration of the control loop
    ///
    /// A missing charger, current, or temperature sample skips only the
    /// checks that need it. A missing battery sample ends the evaluation
    /// early, keeping the previous voltage; the charge time limit is still
    /// enforced.
    pub fn tick<A: Adc + ?Sized>(&mut self, now: Instant, adc: &mut A) -> Report {
        let mut notify = Notify::default();
        if let Err(err) = self.evaluate(now, adc, &mut notify) {
            log::debug!("tick cut short: {}", err);
        }
        self.report(now, &mut notify);
        Report {
            snapshot: self.snapshot(),
            notify,
        }
    }

    /// Run the control loop from a sleep wakeup
    ///
    /// Charging decisions are made, but the published capacity and voltage
    /// stay put, and nothing is reported.
    pub fn tick_asleep<A: Adc + ?Sized>(&mut self, now: Instant, adc: &mut A) -> Snapshot {
        let mut notify = Notify::default();
        if let Err(err) = self.evaluate(now, adc, &mut notify) {
            log::debug!("sleep tick cut short: {}", err);
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state(),
            status: self.status(),
            usb_online: self.usb_online,
            ac_online: self.ac_online,
            capacity: self.capacity,
            voltage: self.reported_voltage,
            charger_voltage: self.charger_voltage,
            current: if self.charging {
                Some(self.current)
            } else {
                None
            },
            temperature: self.temperature,
            switch_point: self.switch_point,
            charge_elapsed_ms: if self.charging {
                self.now.since(self.charge_started)
            } else {
                0
            },
            over_voltage: self.over_voltage,
            over_temperature: self.over_temperature,
        }
    }

    pub fn state(&self) -> ChargeState {
        if self.over_voltage {
            ChargeState::OverVoltageProtect
        } else if self.over_temperature {
            ChargeState::OverTempProtect
        } else if let (true, Some(source)) = (self.charging, self.source) {
            ChargeState::Charging(source)
        } else if self.in_precharge {
            ChargeState::PreCharge
        } else {
            ChargeState::Idle
        }
    }

    pub fn status(&self) -> Status {
        match (self.online(), self.charging, self.in_precharge) {
            (Some(_), true, _) => Status::Charging,
            (Some(_), false, true) => Status::Full,
            _ => Status::Discharging,
        }
    }

    /// Program a switch point by hand
    ///
    /// Switch-point control carries on from the new value.
    pub fn set_switch_point(&mut self, point: SwitchPoint) {
        self.switch_point = point;
        self.charger.set_switch_point(point);
    }

    /// Replace one battery calibration point, packed as `(adc << 16) | mV`
    ///
    /// Returns `false` if NV calibration is already in effect.
    pub fn calibrate(&mut self, reference: Reference, packed: u32) -> bool {
        let updated = self.calibration.update(reference, packed);
        if updated {
            log::info!("{:?} calibration point set to {:#010X}", reference, packed);
        } else {
            log::warn!("NV calibration in effect; ignoring {:?} point", reference);
        }
        updated
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Measure the battery now, without filtering
    pub fn measure_battery<A: Adc + ?Sized>(&self, adc: &mut A) -> Result<u32> {
        let raw = adc.sample(AdcChannel::BatteryVoltage)?;
        Ok(self.calibration.millivolts(raw))
    }

    /// Re-estimate capacity after a long sleep
    ///
    /// Takes the median of a burst of fresh battery samples. If the
    /// capacity it implies differs from the last resync, both battery
    /// windows restart from it. Returns `true` when the battery is
    /// critically low.
    pub fn resync<A: Adc + ?Sized>(&mut self, adc: &mut A) -> Result<bool> {
        let mut samples = [0u16; RESYNC_SAMPLES];
        for sample in samples.iter_mut() {
            *sample = adc.sample(AdcChannel::BatteryVoltage)?;
        }
        let raw = adc::median(samples);
        let millivolts = self.calibration.millivolts(raw);
        let capacity = curve::capacity(self.config.capacity_curve, millivolts);
        log::info!("resync: {} mV, {}%", millivolts, capacity);

        let previous = self.resync_capacity.or_else(|| self.window_capacity());
        if previous != Some(capacity) {
            self.battery.fill(u32::from(raw));
            self.capacity_window.fill(u32::from(raw));
        }
        self.resync_capacity = Some(capacity);
        Ok(capacity < CRITICAL_CAPACITY)
    }

    /// Recompute capacity on resume
    pub fn resume(&mut self) -> Report {
        if let Some(capacity) = self.window_capacity() {
            self.capacity = capacity;
        }
        Report {
            snapshot: self.snapshot(),
            notify: Notify {
                battery: true,
                ..Notify::default()
            },
        }
    }

    pub fn charger(&self) -> &C {
        &self.charger
    }

    pub fn charger_mut(&mut self) -> &mut C {
        &mut self.charger
    }

    /// Stop charging and release the charger
    pub fn shutdown(mut self) -> C {
        if self.charging {
            self.stop_charge();
        }
        log::info!("charge controller stopped");
        self.charger
    }

    fn online(&self) -> Option<Source> {
        if self.ac_online {
            Some(Source::Ac)
        } else if self.usb_online {
            Some(Source::Usb)
        } else {
            None
        }
    }

    fn protected(&self) -> bool {
        self.over_voltage || self.over_temperature
    }

    fn window_capacity(&self) -> Option<u8> {
        let raw = self.capacity_window.value()?;
        let millivolts = self.calibration.millivolts(narrow(raw));
        Some(curve::capacity(self.config.capacity_curve, millivolts))
    }

    fn enable(&mut self, source: Source) {
        let milliamps = match source {
            Source::Usb => self.config.usb_current,
            Source::Ac => self.config.ac_current,
        };
        self.switch_countdown = self.config.switch_update_ticks.max(1);
        self.charge_started = self.now;
        self.charging = true;
        self.pulse = None;
        self.source = Some(source);
        self.current_window.reset();
        self.current = 0;
        self.charger.set_current(milliamps);
        self.charger.set_switch_point(self.switch_point);
        self.charger.start();
        self.in_precharge = false;
        log::info!("charging from {:?} at {} mA", source, milliamps);
    }

    fn stop_charge(&mut self) {
        self.charger.stop();
        self.charger.stop_recharge();
        self.charging = false;
        self.pulse = None;
        self.in_precharge = false;
    }

    /// Stop charging and wait for the battery to sag
    fn finish(&mut self) {
        self.stop_charge();
        self.in_precharge = true;
    }

    fn sense_current<A: Adc + ?Sized>(&mut self, adc: &mut A) -> Result<u32> {
        match self.config.current_sense {
            CurrentSense::ProgramPin(scale) => {
                let raw = adc.sample(AdcChannel::ProgramVoltage)?;
                Ok(scale.apply(self.calibration.millivolts(raw)))
            }
            CurrentSense::Charger => self.charger.charge_current(),
        }
    }

    fn evaluate<A: Adc + ?Sized>(
        &mut self,
        now: Instant,
        adc: &mut A,
        notify: &mut Notify,
    ) -> Result<()> {
        self.now = now;
        self.plug_events(notify);

        let raw = match adc.sample(AdcChannel::BatteryVoltage) {
            Ok(raw) => raw,
            Err(err) => {
                if self.charging {
                    self.check_time_limit(notify);
                }
                return Err(err);
            }
        };
        self.battery.push(u32::from(raw));
        let averaged = self.battery.value().map(narrow).unwrap_or(raw);
        self.capacity_ticks += 1;
        if self.capacity_ticks >= self.config.switch_update_ticks.max(1) {
            self.capacity_ticks = 0;
            self.capacity_window.push(u32::from(averaged));
        }
        let voltage = self.calibration.millivolts(averaged);
        self.voltage = voltage;

        if !self.charging && self.in_precharge && voltage < self.config.precharge_start {
            if let Some(source) = self.online() {
                log::info!("battery at {} mV, resuming charge", voltage);
                self.enable(source);
                notify.battery = true;
            }
        }

        // A missing sample skips only the checks that depend on it.
        if let Some(source) = self.online() {
            if let Err(err) = self.check_charger(source, voltage, adc, notify) {
                log::debug!("charger checks skipped: {}", err);
            }
        }

        if let Some(limits) = self.config.temperature {
            match adc.sample(AdcChannel::Temperature) {
                Ok(raw) => self.check_temperature(limits, raw, notify),
                Err(err) => log::debug!("temperature checks skipped: {}", err),
            }
        }

        if self.charging {
            self.regulate(voltage, notify);
        }
        Ok(())
    }

    fn check_temperature(&mut self, limits: TemperatureLimits, raw: u16, notify: &mut Notify) {
        self.temperature_window.push(u32::from(raw));
        let averaged = self.temperature_window.value().map(narrow).unwrap_or(raw);
        let celsius = curve::interpolate(self.config.thermistor_curve, i32::from(averaged));
        let moved = match self.temperature {
            Some(last) => (last - celsius).abs() > limits.report_delta,
            None => true,
        };
        if moved {
            self.temperature = Some(celsius);
            notify.battery = true;
        }

        if limits.tripped(celsius) {
            if !self.over_temperature {
                log::error!("battery temperature {} °C out of range", celsius);
                self.over_temperature = true;
                self.stop_charge();
                notify.battery = true;
            }
        } else if self.over_temperature
            && !self.charging
            && !self.in_precharge
            && limits.resumable(celsius)
        {
            if let Some(source) = self.online() {
                log::info!("battery temperature recovered: {} °C", celsius);
                self.over_temperature = false;
                notify.battery = true;
                if !self.over_voltage {
                    self.enable(source);
                }
            }
        }
    }

    fn plug_events(&mut self, notify: &mut Notify) {
        let ac_changed = self.seen_ac != self.ac_online;
        let usb_changed = self.seen_usb != self.usb_online;
        if !ac_changed && !usb_changed {
            return;
        }
        self.seen_ac = self.ac_online;
        self.seen_usb = self.usb_online;
        notify.ac |= ac_changed;
        notify.usb |= usb_changed;
        notify.battery = true;

        match self.online() {
            Some(source) if !self.protected() => self.enable(source),
            Some(source) => log::warn!(
                "{:?} attached while protection is active; waiting for recovery",
                source
            ),
            None => self.stop_charge(),
        }
    }

    /// Current, charger voltage, and the protections that depend on them
    fn check_charger<A: Adc + ?Sized>(
        &mut self,
        source: Source,
        voltage: u32,
        adc: &mut A,
        notify: &mut Notify,
    ) -> Result<()> {
        if self.charging {
            match self.sense_current(adc) {
                Ok(current) => {
                    self.current_window.push(current);
                    self.current = self.current_window.value().unwrap_or(current);
                }
                Err(err) => log::debug!("current sample skipped: {}", err),
            }
        }

        let raw = adc.sample(AdcChannel::ChargerVoltage)?;
        let charger_voltage = self
            .config
            .charger_divider
            .apply(self.calibration.millivolts(raw));
        self.charger_window.push(charger_voltage);
        self.charger_voltage = self.charger_window.value().unwrap_or(charger_voltage);

        if charger_voltage > self.config.over_voltage && !self.over_voltage {
            log::error!("charger voltage too high: {} mV", charger_voltage);
            self.stop_charge();
            self.over_voltage = true;
            notify.battery = true;
        }

        if self.charging && voltage > self.config.over_charge {
            log::error!("battery over {} mV, stopping charge", voltage);
            self.finish();
            notify.battery = true;
        }

        log::debug!(
            "battery {} mV, charger {} mV, current {} mA, {:?}, switch point {:#04X}",
            voltage,
            charger_voltage,
            self.current,
            source,
            self.switch_point.raw()
        );

        if self.over_voltage
            && !self.charging
            && !self.in_precharge
            && charger_voltage <= self.config.over_voltage_recovery
        {
            log::info!("charger voltage recovered: {} mV", charger_voltage);
            self.over_voltage = false;
            notify.battery = true;
            if !self.over_temperature {
                self.enable(source);
            }
        }
        Ok(())
    }

    /// Switch-point control, the pulse tail, and the charge timeout
    fn regulate(&mut self, voltage: u32, notify: &mut Notify) {
        match self.pulse {
            None => {
                self.switch_countdown = self.switch_countdown.saturating_sub(1);
                if self.switch_countdown == 0 {
                    self.switch_countdown = self.config.switch_update_ticks.max(1);
                    self.adjust_switch_point(voltage);
                }
            }
            Some(left) => {
                let left = left.saturating_sub(1);
                if left == 0 {
                    log::info!("pulse charge complete");
                    self.finish();
                    notify.battery = true;
                } else {
                    self.pulse = Some(left);
                }
            }
        }

        if self.charging {
            self.charger.set_recharge();
            self.check_time_limit(notify);
        }
    }

    /// Anti-runaway limit; runs even when samples are missing
    fn check_time_limit(&mut self, notify: &mut Notify) {
        let elapsed = self.now.since(self.charge_started);
        if elapsed > self.config.max_charge_ms {
            log::error!("charging for {} ms, stopping charge", elapsed);
            self.finish();
            notify.battery = true;
        }
    }

    fn adjust_switch_point(&mut self, voltage: u32) {
        let target = self.config.precharge_end;
        if voltage <= target {
            if self.current < self.config.cc_cv_switch {
                self.step_switch_point(self.switch_point.raised());
            }
        } else {
            if self.current <= self.config.cv_stop {
                log::info!("current tapered to {} mA, pulse charging", self.current);
                self.pulse = Some(self.config.pulse_ticks.max(1));
            }
            if voltage > target + self.config.switch_margin {
                self.step_switch_point(self.switch_point.lowered());
            }
        }
    }

    fn step_switch_point(&mut self, point: SwitchPoint) {
        if point != self.switch_point {
            log::debug!("switch point {:#04X} -> {:#04X}", self.switch_point.raw(), point.raw());
            self.switch_point = point;
            self.charger.set_switch_point(point);
        }
    }

    fn report(&mut self, now: Instant, notify: &mut Notify) {
        let due = match self.capacity_updated {
            Some(at) => now.since(at) >= self.config.capacity_interval_ms,
            None => true,
        };
        if due {
            if let Some(capacity) = self.window_capacity() {
                self.capacity_updated = Some(now);
                if capacity != self.capacity {
                    self.capacity = capacity;
                    notify.battery = true;
                }
            }
        }

        let voltage = round(self.voltage);
        if voltage != self.reported_voltage {
            self.reported_voltage = voltage;
            notify.battery = true;
        }

        if notify.any() {
            log::debug!(
                "{:?}: {} mV, {}%, usb {} ac {}",
                self.state(),
                self.reported_voltage,
                self.capacity,
                self.usb_online,
                self.ac_online
            );
        }
    }
}

fn round(millivolts: u32) -> u32 {
    millivolts / 10 * 10
}

/// Averages of `u16` samples fit in a `u16`
fn narrow(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}
