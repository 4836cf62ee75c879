//! ADC channels, sampling, and calibration

use crate::{Error, Result};

/// Logical ADC channels consumed by the charge controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdcChannel {
    /// Battery voltage, through the battery divider
    BatteryVoltage,
    /// Charger input voltage
    ChargerVoltage,
    /// Voltage on the charger's PROG pin, proportional to charge current
    ProgramVoltage,
    /// Charge current, as reported by the charger
    ChargeCurrent,
    /// Battery thermistor
    Temperature,
}

/// Access to raw ADC conversions
///
/// The ADC is shared with other samplers. Implementations return
/// [`Error::SampleUnavailable`] when a conversion can't be made right now;
/// callers treat that as transient.
pub trait Adc {
    /// Sample `channel`, returning the raw conversion
    fn sample(&mut self, channel: AdcChannel) -> Result<u16>;
}

/// A fixed set of conversions, one per channel
///
/// `Samples` is the simplest [`Adc`]: a sampling task reads each channel
/// once, stores the results here, and hands the set to the charge
/// controller's tick. A missing value reads as unavailable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Samples {
    pub battery: Option<u16>,
    pub charger: Option<u16>,
    pub program: Option<u16>,
    pub temperature: Option<u16>,
}

impl Adc for Samples {
    fn sample(&mut self, channel: AdcChannel) -> Result<u16> {
        match channel {
            AdcChannel::BatteryVoltage => self.battery,
            AdcChannel::ChargerVoltage => self.charger,
            AdcChannel::ProgramVoltage => self.program,
            AdcChannel::Temperature => self.temperature,
            AdcChannel::ChargeCurrent => None,
        }
        .ok_or(Error::SampleUnavailable(channel))
    }
}

/// Where the active calibration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationSource {
    /// Built-in table
    Default,
    /// Factory fuses
    Efuse,
    /// Boot arguments
    BootArgs,
    /// Calibrated at runtime and persisted by the host
    Nv,
}

/// One calibration point
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point {
    pub adc: u16,
    pub millivolts: u16,
}

impl Point {
    /// Unpack a point stored as `(adc << 16) | millivolts`
    pub const fn from_packed(packed: u32) -> Self {
        Point {
            adc: (packed >> 16) as u16,
            millivolts: (packed & 0xFFFF) as u16,
        }
    }
}

/// Selects one of the two calibration points
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reference {
    /// The 4200 mV point
    High,
    /// The 3600 mV point
    Low,
}

/// Two-point linear calibration of the battery voltage channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Calibration {
    high: Point,
    low: Point,
    source: CalibrationSource,
}

impl Calibration {
    /// Typical conversion for an uncalibrated part
    pub const DEFAULT: Calibration = Calibration {
        high: Point { adc: 928, millivolts: 4200 },
        low: Point { adc: 796, millivolts: 3600 },
        source: CalibrationSource::Default,
    };

    /// Calibration from two packed points, high point first
    pub const fn from_packed(source: CalibrationSource, packed: [u32; 2]) -> Self {
        Calibration {
            high: Point::from_packed(packed[0]),
            low: Point::from_packed(packed[1]),
            source,
        }
    }

    pub const fn source(&self) -> CalibrationSource {
        self.source
    }

    /// Replace one point at runtime
    ///
    /// Runtime calibration writes the high point first, then the low point;
    /// the low point completes it and marks the calibration as `Nv`. Returns
    /// `false`, leaving the table alone, once an `Nv` calibration is active.
    pub fn update(&mut self, reference: Reference, packed: u32) -> bool {
        if self.source == CalibrationSource::Nv {
            return false;
        }
        match reference {
            Reference::High => self.high = Point::from_packed(packed),
            Reference::Low => {
                self.low = Point::from_packed(packed);
                self.source = CalibrationSource::Nv;
            }
        }
        true
    }

    /// Convert a raw battery conversion to millivolts
    pub fn millivolts(&self, adc: u16) -> u32 {
        let span_mv = i32::from(self.high.millivolts) - i32::from(self.low.millivolts);
        let span_adc = i32::from(self.high.adc) - i32::from(self.low.adc);
        if span_adc == 0 {
            return u32::from(self.low.millivolts);
        }
        let mv = i32::from(self.low.millivolts)
            + (i32::from(adc) - i32::from(self.low.adc)) * span_mv / span_adc;
        mv.max(0) as u32
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A ratio applied to a calibrated reading
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ratio {
    pub numerator: u32,
    pub denominator: u32,
}

impl Ratio {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Ratio {
            numerator,
            denominator,
        }
    }

    pub fn apply(self, value: u32) -> u32 {
        if self.denominator == 0 {
            return 0;
        }
        (u64::from(value) * u64::from(self.numerator) / u64::from(self.denominator)) as u32
    }
}

/// Returns the median of `samples`
///
/// Sorts in place with an insertion sort. Meant for the handful of
/// conversions taken after a wakeup, where a single glitched sample must
/// not decide the result.
pub fn median<const N: usize>(mut samples: [u16; N]) -> u16 {
    for i in 1..N {
        let mut j = i;
        while j > 0 && samples[j - 1] > samples[j] {
            samples.swap(j - 1, j);
            j -= 1;
        }
    }
    if N == 0 {
        0
    } else {
        samples[N / 2]
    }
}
