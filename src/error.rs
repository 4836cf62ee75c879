//! Error and DMA status types

use crate::adc::AdcChannel;
use core::fmt::{self, Debug, Display};

/// Errors reported by the transfer engine and the charge controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A malformed message, segment, or device setting
    ///
    /// Rejected synchronously. The engine never retries these.
    InvalidArgument,
    /// The engine is stopping, or has stopped
    ///
    /// New submissions fail with this error. Messages still queued at
    /// shutdown complete with it.
    ShuttingDown,
    /// A bounded resource is exhausted
    ///
    /// The message queue, a segment list, or the device table is full, or
    /// a buffer could not be mapped for DMA.
    NoResources,
    /// The DMA controller reported an error while servicing a message
    HardwareFault(DmaStatus),
    /// An ADC channel could not be sampled
    ///
    /// Transient. The charge controller skips the rest of the tick and
    /// tries again on the next one.
    SampleUnavailable(AdcChannel),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument => f.write_str("invalid argument"),
            Error::ShuttingDown => f.write_str("controller is shutting down"),
            Error::NoResources => f.write_str("no resources"),
            Error::HardwareFault(status) => write!(f, "hardware fault: {}", status),
            Error::SampleUnavailable(channel) => write!(f, "{:?} sample unavailable", channel),
        }
    }
}

/// A wrapper around a DMA status value
///
/// The wrapper contains a copy of the DMA controller's
/// channel status register at the point of an error. Print it
/// to understand why the transfer failed.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DmaStatus {
    /// The raw status
    sts: u32,
}

impl DmaStatus {
    /// Wrap a raw status word read from the DMA controller
    pub const fn new(sts: u32) -> Self {
        DmaStatus { sts }
    }
    /// Returns the raw status value
    pub const fn raw(self) -> u32 {
        self.sts
    }
}

impl Debug for DmaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DMA_STS({:#010X})", self.sts)
    }
}

impl Display for DmaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DMA_STS: VLD {vld} CHN {chn} CFG {cfg} SRC {src} DST {dst} BURST {burst} BUS {bus}",
            vld = (self.sts >> 31) & 0x1,
            chn = (self.sts >> 8) & 0x1F,
            cfg = (self.sts >> 4) & 0x1,
            src = (self.sts >> 3) & 0x1,
            dst = (self.sts >> 2) & 0x1,
            burst = (self.sts >> 1) & 0x1,
            bus = self.sts & 0x1,
        )
    }
}
