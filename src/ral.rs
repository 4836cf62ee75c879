//! Register access layer for the SC88xx SPI controller
//!
//! Registers are described in the `ral-registers` style: a `#[repr(C)]`
//! register block, one module per register, and one module per field with
//! its `offset`, `mask`, and named values. Use the re-exported
//! [`read_reg!`], [`write_reg!`], and [`modify_reg!`] macros to touch them.

pub use ral_registers::{modify_reg, read_reg, write_reg, RORegister, RWRegister, WORegister};

/// A static reference to a register block
///
/// Wraps the address of a peripheral. Creating a `Static` is unsafe,
/// since every copy aliases the same hardware.
pub struct Static<T>(*const T);

impl<T> Static<T> {
    /// Create a `Static` from the address of a register block
    ///
    /// # Safety
    ///
    /// `ptr` must point at a live, properly aligned register block for as
    /// long as the `Static` (or any copy of it) is used. The caller is
    /// responsible for synchronizing access among aliases.
    pub const unsafe fn new(ptr: *const T) -> Self {
        Static(ptr)
    }
}

impl<T> Clone for Static<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Static<T> {}

impl<T> core::ops::Deref for Static<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        // Safety: pointer points to static, valid memory, per `new`.
        unsafe { &*self.0 }
    }
}

// Safety: a `Static` is only an address. Callers synchronize register access.
unsafe impl<T> Send for Static<T> {}
// Safety: see above.
unsafe impl<T> Sync for Static<T> {}

#[allow(non_snake_case, non_upper_case_globals)]
pub mod spi {
    //! SPI controller registers

    use super::{RORegister, RWRegister, WORegister};

    /// SPI controller register block
    #[repr(C)]
    pub struct RegisterBlock {
        /// Transmit / receive data, 0x00
        pub TXD: RWRegister<u32>,
        /// Clock divider, 0x04
        pub CLKD: RWRegister<u32>,
        /// Frame format and chip-select, 0x08
        pub CTL0: RWRegister<u32>,
        /// Transfer mode, 0x0C
        pub CTL1: RWRegister<u32>,
        /// DMA control, 0x10
        pub CTL2: RWRegister<u32>,
        /// Receive watermarks, 0x14
        pub CTL3: RWRegister<u32>,
        /// Receive-only control, 0x18
        pub CTL4: RWRegister<u32>,
        /// Frame interval, 0x1C
        pub CTL5: RWRegister<u32>,
        /// Interrupt enable, 0x20
        pub INT_EN: RWRegister<u32>,
        /// Interrupt clear, 0x24
        pub INT_CLR: WORegister<u32>,
        /// Raw interrupt status, 0x28
        pub INT_RAW_STS: RORegister<u32>,
        /// Masked interrupt status, 0x2C
        pub INT_MASK_STS: RORegister<u32>,
        /// FIFO status, 0x30
        pub STS1: RORegister<u32>,
        /// Controller status, 0x34
        pub STS2: RORegister<u32>,
        /// DSP wait, 0x38
        pub DSP_WAIT: RWRegister<u32>,
        /// Status 3, 0x3C
        pub STS3: RORegister<u32>,
        /// Transmit watermarks, 0x40
        pub CTL6: RWRegister<u32>,
        /// Status 4, 0x44
        pub STS4: RORegister<u32>,
        /// FIFO reset, 0x48
        pub FIFO_RST: RWRegister<u32>,
    }

    pub mod TXD {}

    pub mod CLKD {
        pub mod DIV {
            pub const offset: u32 = 0;
            pub const mask: u32 = 0xFFFF << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {
                /// Slowest clock
                pub const DIV_MAX: u32 = 0xFFFF;
            }
        }
    }

    pub mod CTL0 {
        /// Sampling edge selection (clock phase)
        pub mod EDGE {
            pub const offset: u32 = 0;
            pub const mask: u32 = 0b11 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {
                /// Sample on the second clock edge (CPHA = 1)
                pub const EDGE_SECOND: u32 = 0b01;
                /// Sample on the first clock edge (CPHA = 0)
                pub const EDGE_FIRST: u32 = 0b10;
            }
        }
        /// Bits per word; zero selects 32 bits
        pub mod DATA_WIDTH {
            pub const offset: u32 = 2;
            pub const mask: u32 = 0x1F << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        /// Native chip-select lines, active low
        pub mod CS {
            pub const offset: u32 = 8;
            pub const mask: u32 = 0xF << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {
                pub const CS0: u32 = 0xE;
                pub const CS1: u32 = 0xD;
                pub const CS_NONE: u32 = 0xF;
            }
        }
        /// Clock polarity
        pub mod CPOL {
            pub const offset: u32 = 13;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod CTL1 {
        pub mod RTX_MODE {
            pub const offset: u32 = 12;
            pub const mask: u32 = 0b11 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {
                pub const RTX_IDLE: u32 = 0b00;
                pub const RTX_RX: u32 = 0b01;
                pub const RTX_TX: u32 = 0b10;
                pub const RTX_BOTH: u32 = 0b11;
            }
        }
    }

    pub mod CTL2 {
        /// Hand the FIFOs to the DMA controller; must be written last
        pub mod DMA_EN {
            pub const offset: u32 = 6;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod CTL3 {
        pub mod RX_FULL_WATERMARK {
            pub const offset: u32 = 0;
            pub const mask: u32 = 0x1F << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod RX_EMPTY_WATERMARK {
            pub const offset: u32 = 8;
            pub const mask: u32 = 0x1F << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod CTL4 {
        /// Words to clock in during a receive-only burst
        pub mod RX_MAX_CNT {
            pub const offset: u32 = 0;
            pub const mask: u32 = 0x1FF << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod START_RX {
            pub const offset: u32 = 9;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod CTL5 {}
    pub mod INT_EN {}
    pub mod INT_CLR {}
    pub mod INT_RAW_STS {}
    pub mod INT_MASK_STS {}
    pub mod STS1 {}

    pub mod STS2 {
        pub mod TX_BUSY {
            pub const offset: u32 = 8;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod DSP_WAIT {}
    pub mod STS3 {}

    pub mod CTL6 {
        pub mod TX_EMPTY_WATERMARK {
            pub const offset: u32 = 0;
            pub const mask: u32 = 0x1F << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod TX_FULL_WATERMARK {
            pub const offset: u32 = 8;
            pub const mask: u32 = 0x1F << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod STS4 {}

    pub mod FIFO_RST {
        pub mod RST {
            pub const offset: u32 = 0;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }
}
