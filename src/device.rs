//! Per-device SPI settings

use crate::dma::Width;
use crate::ral::spi::{CLKD, CTL0};
use crate::{Error, Result};

/// Largest burst, in elements; the width of `CTL4.RX_MAX_CNT`
pub const DMA_BLOCK_MAX: u32 = 0x1FF;

/// Clock and chip-select signalling for a device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Mode {
    /// Clock idles high
    pub cpol: bool,
    /// Sample on the second clock edge
    pub cpha: bool,
    /// Chip-select is active high
    pub cs_high: bool,
}

impl Mode {
    pub const MODE_0: Mode = Mode {
        cpol: false,
        cpha: false,
        cs_high: false,
    };
    pub const MODE_1: Mode = Mode {
        cpol: false,
        cpha: true,
        cs_high: false,
    };
    pub const MODE_2: Mode = Mode {
        cpol: true,
        cpha: false,
        cs_high: false,
    };
    pub const MODE_3: Mode = Mode {
        cpol: true,
        cpha: true,
        cs_high: false,
    };
}

/// How a device is selected
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChipSelect {
    /// A GPIO, muxed as such by the board
    Gpio(u32),
    /// One of the controller's chip-select lines, by device number
    ///
    /// Devices 0 and 2 share line 0, devices 1 and 3 line 1. Other devices
    /// need a GPIO.
    Native,
}

/// Settings for one device on the bus
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    pub mode: Mode,
    /// Bits per word, up to 32; zero selects 8
    pub bits_per_word: u8,
    /// Fastest clock the device accepts; zero selects the slowest clock
    pub max_speed_hz: u32,
    pub chip_select: ChipSelect,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            mode: Mode::MODE_0,
            bits_per_word: 8,
            max_speed_hz: 0,
            chip_select: ChipSelect::Native,
        }
    }
}

/// Register values and burst limits computed at setup
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ControlBlock {
    pub clkd: u32,
    pub ctl0: u32,
    pub width: Width,
    /// Bytes per element
    pub data_width: u32,
    /// Largest burst, in bytes
    pub data_max: u32,
    pub mode: Mode,
    pub chip_select: ChipSelect,
}

impl ControlBlock {
    pub fn new(device: u8, settings: &Settings, source_clock_hz: u32) -> Result<Self> {
        let bits = match settings.bits_per_word {
            0 => 8,
            bits @ 1..=32 => bits,
            _ => return Err(Error::InvalidArgument),
        };
        let data_width = (u32::from(bits) + 7) / 8;

        let edge = if settings.mode.cpha {
            CTL0::EDGE::RW::EDGE_SECOND
        } else {
            CTL0::EDGE::RW::EDGE_FIRST
        };
        let cs = match settings.chip_select {
            ChipSelect::Gpio(_) => CTL0::CS::RW::CS_NONE,
            ChipSelect::Native => native_chip_select(device).ok_or(Error::InvalidArgument)?,
        };
        let ctl0 = (edge << CTL0::EDGE::offset)
            | (u32::from(settings.mode.cpol) << CTL0::CPOL::offset)
            | ((u32::from(bits) % 32) << CTL0::DATA_WIDTH::offset)
            | (cs << CTL0::CS::offset);

        Ok(ControlBlock {
            clkd: clock_divisor(source_clock_hz, settings.max_speed_hz),
            ctl0,
            width: Width::for_bits(bits),
            data_width,
            data_max: data_width * DMA_BLOCK_MAX,
            mode: settings.mode,
            chip_select: settings.chip_select,
        })
    }
}

/// The CTL0 line for `device`; only devices 0 through 3 have one
fn native_chip_select(device: u8) -> Option<u32> {
    match device {
        0 | 2 => Some(CTL0::CS::RW::CS0),
        1 | 3 => Some(CTL0::CS::RW::CS1),
        _ => None,
    }
}

/// Divisor giving the fastest clock no faster than `max_speed_hz`
///
/// The bus clock is `source_clock_hz / (2 * (CLKD + 1))`.
pub fn clock_divisor(source_clock_hz: u32, max_speed_hz: u32) -> u32 {
    if max_speed_hz == 0 {
        return CLKD::DIV::RW::DIV_MAX;
    }
    let divisor = u64::from(source_clock_hz) / (2 * u64::from(max_speed_hz));
    match divisor.checked_sub(1) {
        Some(clkd) => clkd.min(u64::from(CLKD::DIV::RW::DIV_MAX)) as u32,
        None => {
            log::warn!(
                "{} Hz is faster than the controller can clock; using {} Hz",
                max_speed_hz,
                source_clock_hz / 2
            );
            0
        }
    }
}

/// Board services the controller depends on
///
/// Module clocks, resets, and the GPIOs used as chip-selects.
pub trait Board {
    /// Gate the controller's clock on or off
    fn set_module_enabled(&mut self, enabled: bool);
    /// Pulse the controller's module reset
    fn reset_module(&mut self);
    /// Claim `pin` as an output; returns `false` if it's already claimed
    fn request_gpio(&mut self, pin: u32) -> bool;
    fn free_gpio(&mut self, pin: u32);
    fn set_gpio(&mut self, pin: u32, high: bool);
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLOCK: u32 = 192_000_000;

    #[test]
    fn divisor() {
        assert_eq!(clock_divisor(CLOCK, 1_000_000), 95);
        assert_eq!(clock_divisor(CLOCK, 96_000_000), 0);
        assert_eq!(clock_divisor(CLOCK, 0), 0xFFFF);
        assert_eq!(clock_divisor(CLOCK, 1), 0xFFFF);
    }

    #[test]
    fn too_fast_saturates() {
        assert_eq!(clock_divisor(CLOCK, 200_000_000), 0);
    }

    #[test]
    fn ctl0_layout() {
        let settings = Settings {
            mode: Mode::MODE_3,
            bits_per_word: 16,
            max_speed_hz: 1_000_000,
            chip_select: ChipSelect::Native,
        };
        let block = ControlBlock::new(1, &settings, CLOCK).unwrap();
        assert_eq!(block.ctl0, 0x01 | (1 << 13) | (16 << 2) | (0xD << 8));
        assert_eq!(block.data_width, 2);
        assert_eq!(block.data_max, 2 * DMA_BLOCK_MAX);
        assert_eq!(block.width, Width::HalfWord);
    }

    #[test]
    fn thirty_two_bits_encode_as_zero() {
        let settings = Settings {
            bits_per_word: 32,
            chip_select: ChipSelect::Gpio(40),
            ..Settings::default()
        };
        let block = ControlBlock::new(0, &settings, CLOCK).unwrap();
        assert_eq!(block.ctl0, 0x02 | (0xF << 8));
        assert_eq!(block.data_width, 4);
    }

    #[test]
    fn too_many_bits() {
        let settings = Settings {
            bits_per_word: 33,
            ..Settings::default()
        };
        assert_eq!(
            ControlBlock::new(0, &settings, CLOCK),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn native_lines_alias() {
        let settings = Settings::default();
        let cs = |device| (ControlBlock::new(device, &settings, CLOCK).unwrap().ctl0 >> 8) & 0xF;
        assert_eq!(cs(0), 0xE);
        assert_eq!(cs(2), 0xE);
        assert_eq!(cs(3), 0xD);
    }

    #[test]
    fn native_lines_stop_at_three() {
        let native = Settings::default();
        assert_eq!(
            ControlBlock::new(4, &native, CLOCK),
            Err(Error::InvalidArgument)
        );
        let gpio = Settings {
            chip_select: ChipSelect::Gpio(12),
            ..Settings::default()
        };
        assert!(ControlBlock::new(4, &gpio, CLOCK).is_ok());
    }
}
