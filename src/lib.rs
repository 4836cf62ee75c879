//! Drivers for the Spreadtrum SC88xx SPI controller and battery charger
//!
//! `sc88xx-drivers` provides
//!
//! - an interrupt-driven SPI transfer [`Engine`] that queues [`Message`]s,
//!   moves their segments with DMA, and arbitrates chip-selects
//! - a charge [`Controller`] that filters battery and charger samples, runs
//!   the charge state machine, and protects the battery from over-voltage
//!   and over-temperature
//!
//! Both drivers reach the hardware through traits: [`Hardware`] (DMA
//! channels and board services) for the engine, [`Charger`] and [`Adc`] for
//! the controller. The SPI controller's own registers are accessed directly
//! through the [`ral`] register access layer.
//!
//! # Concurrency
//!
//! The engine guards its state with a [`critical_section`]. On bare-metal
//! ARM targets this crate selects `cortex-m`'s single-core implementation;
//! elsewhere, link an implementation yourself. The charge controller has no
//! locks. Call it from one periodic task.
//!
//! ### License
//!
//! Licensed under either of
//!
//! - [Apache License, Version 2.0](http://www.apache.org/licenses/LICENSE-2.0) ([LICENSE-APACHE](./LICENSE-APACHE))
//! - [MIT License](http://opensource.org/licenses/MIT) ([LICENSE-MIT](./LICENSE-MIT))
//!
//! at your option.
//!
//! Unless you explicitly state otherwise, any contribution intentionally submitted
//! for inclusion in the work by you, as defined in the Apache-2.0 license, shall be
//! dual licensed as above, without any additional terms or conditions.

#![no_std]

#[cfg(all(target_arch = "arm", target_os = "none"))]
use cortex_m as _;

pub mod adc;
pub mod battery;
pub mod charger;
pub mod config;
pub mod curve;
pub mod device;
pub mod dma;
mod engine;
mod error;
mod filter;
pub mod ral;
pub mod sync;
mod transfer;

pub use adc::{Adc, AdcChannel, Calibration, Samples};
pub use battery::{
    ChargeState, Controller, Instant, Notify, Report, Sink, Snapshot, Source, Status, Supply,
};
pub use charger::{Charger, CurrentSense, SwitchPoint};
pub use config::{ChargeConfig, TemperatureLimits};
pub use device::{Board, ChipSelect, Mode, Settings};
pub use engine::{Config, Engine, Hardware, MAX_DEVICES};
pub use error::{DmaStatus, Error};
pub use filter::MovingAverage;
pub use sync::{transfer, Signal};
pub use transfer::{Complete, Message, Outcome, Segment, MAX_SEGMENTS};

/// A driver result
pub type Result<T> = core::result::Result<T, Error>;

use core::{future::Future, pin::Pin, task::Poll};

/// Poll a future with a dummy waker.
///
/// Use `poll_no_wake` when you want to drive a future to completion, but you
/// don't care about the future waking an executor. It may be used to check
/// on a [`Signal`] that will later be awaited with [`block`].
pub fn poll_no_wake<F>(future: Pin<&mut F>) -> Poll<F::Output>
where
    F: Future,
{
    use core::task::{Context, RawWaker, RawWakerVTable, Waker};
    const VTABLE: RawWakerVTable = RawWakerVTable::new(|_| RAW_WAKER, |_| {}, |_| {}, |_| {});

    const RAW_WAKER: RawWaker = RawWaker::new(core::ptr::null(), &VTABLE);
    // Safety: raw waker meets documented requirements.
    let waker = unsafe { Waker::from_raw(RAW_WAKER) };
    let mut context = Context::from_waker(&waker);
    future.poll(&mut context)
}

/// Block until the future returns a result.
///
/// `block` invokes [`poll_no_wake`] in a loop until the future
/// returns a result. [`transfer`] uses it to wait for a message.
pub fn block<F>(mut future: Pin<&mut F>) -> F::Output
where
    F: Future,
{
    loop {
        match poll_no_wake(future.as_mut()) {
            Poll::Ready(result) => return result,
            Poll::Pending => core::hint::spin_loop(),
        }
    }
}
