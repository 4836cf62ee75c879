//! Charge controller configuration

use crate::adc::{Calibration, Ratio};
use crate::charger::{CurrentSense, SwitchPoint};
use crate::curve::{self, Curve};

/// Battery temperature protection thresholds, in °C
///
/// Trips outside `[trip_low, trip_high]`. Recovers only once the
/// temperature is back inside `[resume_low, resume_high]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TemperatureLimits {
    pub trip_high: i32,
    pub resume_high: i32,
    pub trip_low: i32,
    pub resume_low: i32,
    /// Report a temperature change larger than this
    pub report_delta: i32,
}

impl TemperatureLimits {
    pub const DEFAULT: TemperatureLimits = TemperatureLimits {
        trip_high: 55,
        resume_high: 50,
        trip_low: -5,
        resume_low: 0,
        report_delta: 2,
    };

    pub(crate) fn tripped(&self, celsius: i32) -> bool {
        celsius > self.trip_high || celsius < self.trip_low
    }

    pub(crate) fn resumable(&self, celsius: i32) -> bool {
        (self.resume_low..=self.resume_high).contains(&celsius)
    }
}

impl Default for TemperatureLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Thresholds and strategies for a [`Controller`](crate::battery::Controller)
///
/// Voltages are in millivolts, currents in milliamps. Start from
/// [`ChargeConfig::DEFAULT`] and override what the board needs:
///
/// ```
/// use sc88xx_drivers::ChargeConfig;
///
/// let config = ChargeConfig {
///     ac_current: 700,
///     ..ChargeConfig::DEFAULT
/// };
/// assert_eq!(config.usb_current, 400);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChargeConfig {
    /// Charge current from a USB host
    pub usb_current: u32,
    /// Charge current from a wall adapter
    pub ac_current: u32,
    /// Leave pre-charge once the battery falls below this
    pub precharge_start: u32,
    /// Target battery voltage for switch-point control
    pub precharge_end: u32,
    /// Lower the switch point once above `precharge_end + switch_margin`
    pub switch_margin: u32,
    /// Stop charging above this battery voltage
    pub over_charge: u32,
    /// Charger input voltage protection trip
    pub over_voltage: u32,
    /// Charger input voltage protection recovery; below `over_voltage`
    pub over_voltage_recovery: u32,
    /// Raise the switch point while current is below this
    pub cc_cv_switch: u32,
    /// Enter the pulse tail once current tapers to this
    pub cv_stop: u32,
    /// Length of the pulse tail, in charging ticks
    pub pulse_ticks: u32,
    /// Anti-runaway limit on a single charge, in milliseconds
    pub max_charge_ms: u64,
    /// Ticks between switch-point updates, and between capacity samples
    pub switch_update_ticks: u32,
    /// Publish capacity at most this often, in milliseconds
    pub capacity_interval_ms: u64,
    /// Tick period with no source attached, in milliseconds
    pub idle_period_ms: u32,
    /// Tick period with a source attached, in milliseconds
    pub charging_period_ms: u32,
    /// Temperature protection; `None` disables thermistor sampling
    pub temperature: Option<TemperatureLimits>,
    pub current_sense: CurrentSense,
    /// Charger input divider, applied to the calibrated voltage
    pub charger_divider: Ratio,
    /// Battery voltage to capacity percent
    pub capacity_curve: Curve,
    /// Thermistor conversion to °C
    pub thermistor_curve: Curve,
    pub calibration: Calibration,
    /// Switch point programmed at startup
    pub switch_point: SwitchPoint,
}

impl ChargeConfig {
    pub const DEFAULT: ChargeConfig = ChargeConfig {
        usb_current: 400,
        ac_current: 600,
        precharge_start: 4150,
        precharge_end: 4200,
        switch_margin: 10,
        over_charge: 4350,
        over_voltage: 6500,
        over_voltage_recovery: 5800,
        cc_cv_switch: 300,
        cv_stop: 100,
        pulse_ticks: 1200,
        max_charge_ms: 6 * 60 * 60 * 1000,
        switch_update_ticks: 10,
        capacity_interval_ms: 4000,
        idle_period_ms: 1000,
        charging_period_ms: 100,
        temperature: None,
        current_sense: CurrentSense::ProgramPin(Ratio::new(1, 2)),
        charger_divider: Ratio::new(3, 2),
        capacity_curve: curve::CAPACITY,
        thermistor_curve: curve::THERMISTOR,
        calibration: Calibration::DEFAULT,
        switch_point: SwitchPoint::new(0x0F),
    };
}

impl Default for ChargeConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::TemperatureLimits;

    #[test]
    fn temperature_band_is_asymmetric() {
        let limits = TemperatureLimits::DEFAULT;
        assert!(limits.tripped(56));
        assert!(limits.tripped(-6));
        assert!(!limits.tripped(55));
        assert!(!limits.resumable(52));
        assert!(limits.resumable(50));
        assert!(!limits.resumable(-2));
        assert!(limits.resumable(0));
    }
}
