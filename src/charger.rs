//! The charger hardware seam

use crate::adc::{AdcChannel, Ratio};
use crate::{Error, Result};

/// The charger's adaptive regulation threshold
///
/// A raw 5-bit register value. Raising it tightens regulation and lets
/// more current through near the constant-voltage knee.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SwitchPoint(u8);

impl SwitchPoint {
    pub const MIN: SwitchPoint = SwitchPoint(0);
    pub const MAX: SwitchPoint = SwitchPoint(0x1F);

    /// Create a switch point, saturating at [`SwitchPoint::MAX`]
    pub const fn new(raw: u8) -> Self {
        if raw > Self::MAX.0 {
            Self::MAX
        } else {
            SwitchPoint(raw)
        }
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    /// One step up, saturating
    #[must_use]
    pub const fn raised(self) -> Self {
        Self::new(self.0.saturating_add(1))
    }

    /// One step down, saturating
    #[must_use]
    pub const fn lowered(self) -> Self {
        SwitchPoint(self.0.saturating_sub(1))
    }
}

/// Commands the charge controller issues to the charger hardware
///
/// Implementations are synchronous register pokes. The charge controller
/// owns its charger for its whole life, and hands it back on
/// [`shutdown`](crate::battery::Controller::shutdown).
pub trait Charger {
    /// Begin charging at the programmed current
    fn start(&mut self);
    /// Stop charging
    fn stop(&mut self);
    /// Program the charge current, in milliamps
    fn set_current(&mut self, milliamps: u32);
    /// Program the adaptive switch point
    fn set_switch_point(&mut self, point: SwitchPoint);
    /// Arm the hardware recharge comparator
    ///
    /// Called on every charging tick.
    fn set_recharge(&mut self);
    /// Disarm the hardware recharge comparator
    fn stop_recharge(&mut self);
    /// Returns `true` if the attached source is a wall adapter
    ///
    /// Consulted only when a plug event can't identify a USB cable.
    fn is_adapter(&mut self) -> bool;
    /// Returns the charge current, in milliamps
    ///
    /// Used by [`CurrentSense::Charger`]. The default reports the
    /// current as unavailable.
    fn charge_current(&mut self) -> Result<u32> {
        Err(Error::SampleUnavailable(AdcChannel::ChargeCurrent))
    }
}

/// How the controller measures charge current
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CurrentSense {
    /// Sample the charger's PROG pin through the ADC
    ///
    /// The calibrated PROG voltage, in millivolts, is scaled to milliamps
    /// by the ratio.
    ProgramPin(Ratio),
    /// Ask the charger through [`Charger::charge_current`]
    Charger,
}

#[cfg(test)]
mod tests {
    use super::SwitchPoint;

    #[test]
    fn switch_point_saturates() {
        assert_eq!(SwitchPoint::new(0x40), SwitchPoint::MAX);
        assert_eq!(SwitchPoint::MAX.raised(), SwitchPoint::MAX);
        assert_eq!(SwitchPoint::MIN.lowered(), SwitchPoint::MIN);
        assert_eq!(SwitchPoint::new(0x0F).raised().raw(), 0x10);
        assert_eq!(SwitchPoint::new(0x0F).lowered().raw(), 0x0E);
    }
}
