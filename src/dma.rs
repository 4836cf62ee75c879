//! DMA channel seam
//!
//! The SPI controller moves data with two DMA channels, one per direction.
//! The transfer engine describes each burst with a [`Descriptor`] and drives
//! the channels through the [`Dma`] trait; the platform's DMA driver
//! implements it.

use crate::{DmaStatus, Result};

/// A DMA channel dedicated to the SPI controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// Memory to the SPI transmit FIFO
    Tx,
    /// SPI receive FIFO to memory
    Rx,
}

/// The direction of a buffer mapping
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// The device reads the buffer
    ToDevice,
    /// The device writes the buffer
    FromDevice,
}

/// How an address changes after each element
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Increment,
    Fixed,
}

/// Beats per burst on one side of a transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Burst {
    Single,
    Four,
}

/// Size of one element moved by the DMA controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Width {
    Byte,
    HalfWord,
    Word,
}

impl Width {
    /// The element size for a word of `bits` bits
    ///
    /// 24-bit words travel as 32-bit elements.
    pub const fn for_bits(bits: u8) -> Self {
        match bits {
            0..=8 => Width::Byte,
            9..=16 => Width::HalfWord,
            _ => Width::Word,
        }
    }
}

/// One programmed DMA burst
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub source: u32,
    pub destination: u32,
    /// Bytes to move
    pub length: u32,
    pub source_step: Step,
    pub destination_step: Step,
    pub source_burst: Burst,
    pub destination_burst: Burst,
    pub width: Width,
}

impl Descriptor {
    /// Move `length` bytes from a linear buffer into a hardware register
    pub const fn memory_to_hardware(source: u32, register: u32, length: u32, width: Width) -> Self {
        Descriptor {
            source,
            destination: register,
            length,
            source_step: Step::Increment,
            destination_step: Step::Fixed,
            source_burst: Burst::Four,
            destination_burst: Burst::Single,
            width,
        }
    }

    /// Move `length` bytes from a hardware register into a linear buffer
    pub const fn hardware_to_memory(
        register: u32,
        destination: u32,
        length: u32,
        width: Width,
    ) -> Self {
        Descriptor {
            source: register,
            destination,
            length,
            source_step: Step::Fixed,
            destination_step: Step::Increment,
            source_burst: Burst::Single,
            destination_burst: Burst::Four,
            width,
        }
    }
}

/// DMA controller operations used by the transfer engine
///
/// Calls are synchronous and may happen inside the engine's critical
/// section, so implementations must not block.
pub trait Dma {
    /// Load `descriptor` into `channel`, replacing its previous burst
    fn program(&mut self, channel: Channel, descriptor: &Descriptor);
    /// Enable `channel`; it raises its interrupt when the burst completes
    fn start(&mut self, channel: Channel);
    /// Disable `channel`
    fn stop(&mut self, channel: Channel);
    /// Returns the channel's error status, if it stopped on an error
    fn error(&mut self, channel: Channel) -> Option<DmaStatus>;
    /// Map `len` bytes at `address` for the DMA controller
    ///
    /// Returns the bus address, or [`NoResources`](crate::Error::NoResources)
    /// if the buffer can't be mapped.
    fn map(&mut self, address: u32, len: u32, direction: Direction) -> Result<u32>;
    /// Undo a [`map`](Dma::map)
    fn unmap(&mut self, bus_address: u32, len: u32, direction: Direction);
}
