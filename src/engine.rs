//! The SPI transfer engine
//!
//! An [`Engine`] owns the SPI controller, its two DMA channels, and a FIFO
//! of [`Message`]s. Submitting a message to an idle engine starts it
//! immediately. Every later step happens in [`on_interrupt`](Engine::on_interrupt),
//! which the DMA channel interrupts must call.
//!
//! All state sits behind one critical section. Completions run after the
//! critical section ends.

use crate::device::{Board, ChipSelect, ControlBlock, Settings};
use crate::dma::{Channel, Descriptor, Dma};
use crate::ral::{self, spi, Static};
use crate::transfer::{Complete, Message, Outcome};
use crate::{Error, Result};

use core::cell::RefCell;
use core::sync::atomic;
use critical_section::Mutex;
use heapless::{Deque, LinearMap};

/// Most devices that can be set up at once
pub const MAX_DEVICES: usize = 8;

/// Everything the engine needs from the platform
pub trait Hardware: Dma + Board {}
impl<T: Dma + Board> Hardware for T {}

/// Controller-wide configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// The SPI module clock, before the controller's divider
    pub source_clock_hz: u32,
    /// Bus address of the `TXD` register, for DMA descriptors
    pub data_register: u32,
    /// Number of chip-selects; devices are numbered below this
    pub chip_selects: u8,
}

impl Config {
    /// Default clocking for a controller whose `TXD` is at `data_register`
    pub const fn new(data_register: u32) -> Self {
        Config {
            source_clock_hz: 192_000_000,
            data_register,
            chip_selects: MAX_DEVICES as u8,
        }
    }
}

/// Progress through the active message
#[derive(Clone, Copy, Debug, Default)]
struct Cursor {
    segment: usize,
    /// Bytes of the segment already transferred
    offset: u32,
    /// Bytes in the burst now in flight
    armed: u32,
    /// Channel completions seen for a duplex burst
    acks: u8,
}

#[derive(Clone, Copy)]
struct Device {
    block: ControlBlock,
    /// Set when the chip-select GPIO was ours to claim
    claimed: bool,
}

struct State<H, C, const N: usize> {
    hardware: H,
    queue: Deque<Message<C>, N>,
    devices: LinearMap<u8, Device, MAX_DEVICES>,
    /// Present while the front message is being serviced
    active: Option<Cursor>,
    selected: Option<u8>,
    stopping: bool,
}

/// A finished message, ready for its completion
type Finished<C> = (C, Outcome);

/// The SPI transfer engine
///
/// `H` is the platform, `C` the completion type shared by all messages,
/// and `N` the depth of the message queue.
pub struct Engine<H, C, const N: usize> {
    registers: Static<spi::RegisterBlock>,
    config: Config,
    state: Mutex<RefCell<State<H, C, N>>>,
}

impl<H: Hardware, C: Complete, const N: usize> Engine<H, C, N> {
    /// Enable and reset the controller, then take ownership of it
    pub fn new(registers: Static<spi::RegisterBlock>, config: Config, mut hardware: H) -> Self {
        hardware.set_module_enabled(true);
        hardware.reset_module();
        let regs = &*registers;
        ral::write_reg!(crate::ral::spi, regs, INT_EN, 0);
        ral::write_reg!(crate::ral::spi, regs, CTL2, 0);
        ral::write_reg!(crate::ral::spi, regs, CTL1, RTX_MODE: RTX_IDLE);
        Engine {
            registers,
            config,
            state: Mutex::new(RefCell::new(State {
                hardware,
                queue: Deque::new(),
                devices: LinearMap::new(),
                active: None,
                selected: None,
                stopping: false,
            })),
        }
    }

    /// The configuration the engine was created with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Configure `device`, or reconfigure it
    ///
    /// A GPIO chip-select is claimed on first use and driven inactive; a
    /// GPIO someone else holds is used anyway, with a warning. New settings
    /// take effect the next time the device is selected. While one of the
    /// device's messages is in flight, changing its chip-select or its
    /// polarity fails with [`InvalidArgument`](Error::InvalidArgument).
    pub fn setup(&self, device: u8, settings: &Settings) -> Result<()> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.stopping {
                return Err(Error::ShuttingDown);
            }
            if device >= self.config.chip_selects {
                return Err(Error::InvalidArgument);
            }
            let block = ControlBlock::new(device, settings, self.config.source_clock_hz)?;
            if !state.devices.contains_key(&device) && state.devices.len() == MAX_DEVICES {
                return Err(Error::NoResources);
            }

            let previous = state.devices.get(&device).copied();
            let in_flight = state.selected == Some(device) && state.active.is_some();
            if let (true, Some(previous)) = (in_flight, previous) {
                // The active message still holds the old chip-select asserted.
                if previous.block.chip_select != block.chip_select
                    || previous.block.mode.cs_high != block.mode.cs_high
                {
                    log::warn!("device {} is mid-transfer; chip-select unchanged", device);
                    return Err(Error::InvalidArgument);
                }
            }
            if state.selected == Some(device) && !in_flight {
                self.deselect(&mut state);
            }

            let mut claimed = false;
            if let Some(previous) = previous {
                if previous.block.chip_select == block.chip_select {
                    claimed = previous.claimed;
                } else if let (ChipSelect::Gpio(pin), true) =
                    (previous.block.chip_select, previous.claimed)
                {
                    state.hardware.free_gpio(pin);
                }
            }
            if let ChipSelect::Gpio(pin) = block.chip_select {
                if previous.map(|p| p.block.chip_select) != Some(block.chip_select) {
                    claimed = state.hardware.request_gpio(pin);
                    if !claimed {
                        log::warn!("chip-select GPIO {} for device {} is busy", pin, device);
                    }
                }
                if state.selected != Some(device) {
                    state.hardware.set_gpio(pin, !settings.mode.cs_high);
                }
            }

            let regs = &*self.registers;
            ral::write_reg!(
                crate::ral::spi,
                regs,
                CTL3,
                RX_FULL_WATERMARK: 2,
                RX_EMPTY_WATERMARK: 0
            );
            ral::write_reg!(
                crate::ral::spi,
                regs,
                CTL6,
                TX_EMPTY_WATERMARK: 1,
                TX_FULL_WATERMARK: 0
            );

            state
                .devices
                .insert(device, Device { block, claimed })
                .map_err(|_| Error::NoResources)?;
            log::debug!(
                "device {}: CLKD {:#06X} CTL0 {:#06X}, {} byte bursts",
                device,
                block.clkd,
                block.ctl0,
                block.data_max
            );
            Ok(())
        })
    }

    /// Forget `device` and release its chip-select
    ///
    /// Fails with [`InvalidArgument`](Error::InvalidArgument) while any of
    /// its messages are queued.
    pub fn cleanup(&self, device: u8) -> Result<()> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.queue.iter().any(|message| message.device == device) {
                return Err(Error::InvalidArgument);
            }
            if state.selected == Some(device) {
                self.deselect(&mut state);
            }
            let removed = state.devices.remove(&device);
            if let Some(Device {
                block:
                    ControlBlock {
                        chip_select: ChipSelect::Gpio(pin),
                        ..
                    },
                claimed: true,
            }) = removed
            {
                state.hardware.free_gpio(pin);
            }
            Ok(())
        })
    }

    /// Queue `message`, starting it if the engine is idle
    ///
    /// Returns once the message is queued; its completion reports the
    /// outcome. Rejects
    ///
    /// - empty messages, segments without buffers, and unknown devices with
    ///   [`InvalidArgument`](Error::InvalidArgument)
    /// - everything after [`shutdown`](Engine::shutdown) with
    ///   [`ShuttingDown`](Error::ShuttingDown)
    /// - messages that don't fit the queue, or can't be mapped, with
    ///   [`NoResources`](Error::NoResources)
    ///
    /// A rejected message is dropped without running its completion.
    ///
    /// # Safety
    ///
    /// Every segment buffer must remain valid, and must not be touched by
    /// the CPU, until the message's completion runs. The DMA controller
    /// reads and writes them in the meantime.
    pub unsafe fn submit(&self, mut message: Message<C>) -> Result<()> {
        if !message.is_valid() {
            return Err(Error::InvalidArgument);
        }
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.stopping {
                return Err(Error::ShuttingDown);
            }
            if !state.devices.contains_key(&message.device) {
                return Err(Error::InvalidArgument);
            }
            if state.queue.is_full() {
                return Err(Error::NoResources);
            }
            message.map(&mut state.hardware)?;
            message.actual_length = 0;
            state
                .queue
                .push_back(message)
                .map_err(|_| Error::NoResources)?;
            if state.active.is_none() {
                self.begin(&mut state);
            }
            Ok(())
        })
    }

    /// Advance the active message after a DMA channel interrupt
    ///
    /// Call this from the interrupt handler of each SPI DMA channel. A
    /// duplex burst interrupts on both channels; only the second interrupt
    /// advances it. Interrupts with nothing in flight are ignored.
    ///
    /// ```no_run
    /// # use sc88xx_drivers::{dma::Channel, Engine, Hardware, Complete};
    /// # fn get<H: Hardware, C: Complete>(engine: &Engine<H, C, 4>) {
    /// // #[interrupt]
    /// // fn DMA_SPI_TX() {
    /// engine.on_interrupt(Channel::Tx);
    /// // }
    /// # }
    /// ```
    pub fn on_interrupt(&self, channel: Channel) {
        let finished =
            critical_section::with(|cs| self.service(&mut self.state.borrow_ref_mut(cs), channel));
        if let Some((complete, outcome)) = finished {
            complete.complete(outcome);
            critical_section::with(|cs| {
                let mut state = self.state.borrow_ref_mut(cs);
                if state.active.is_none() && !state.stopping {
                    self.begin(&mut state);
                }
            });
        }
    }

    /// Stop the engine for good
    ///
    /// Stops any burst in flight, completes every queued message with
    /// [`ShuttingDown`](Error::ShuttingDown), releases chip-select GPIOs,
    /// and gates the controller off. Later calls do nothing.
    pub fn shutdown(&self) {
        let mut drained = critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let mut drained: Deque<Message<C>, N> = Deque::new();
            if state.stopping {
                return drained;
            }
            state.stopping = true;
            if state.active.take().is_some() {
                self.halt(&mut state);
            }
            self.deselect(&mut state);

            let State {
                hardware,
                queue,
                devices,
                ..
            } = &mut *state;
            while let Some(mut message) = queue.pop_front() {
                message.unmap(hardware);
                if drained.push_back(message).is_err() {
                    log::error!("lost a message while draining the queue");
                }
            }
            for (_, device) in devices.iter() {
                if let (ChipSelect::Gpio(pin), true) = (device.block.chip_select, device.claimed) {
                    hardware.free_gpio(pin);
                }
            }
            devices.clear();
            hardware.set_module_enabled(false);
            log::info!("SPI engine stopped, {} messages drained", drained.len());
            drained
        });

        while let Some(message) = drained.pop_front() {
            message.complete.complete(Outcome {
                device: message.device,
                status: Err(Error::ShuttingDown),
                actual_length: message.actual_length,
            });
        }
    }

    /// Number of queued messages, including the active one
    pub fn queued(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).queue.len())
    }

    /// Returns `true` while a message is being serviced
    pub fn is_busy(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).active.is_some())
    }

    /// Run `f` with the platform, inside the critical section
    pub fn with_hardware<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs).hardware))
    }

    /// Start servicing the message at the front of the queue
    fn begin(&self, state: &mut State<H, C, N>) {
        let Some(device) = state.queue.front().map(|message| message.device) else {
            return;
        };
        state.active = Some(Cursor::default());
        self.select(state, device);
        self.arm(state);
    }

    fn select(&self, state: &mut State<H, C, N>, device: u8) {
        if state.selected == Some(device) {
            return;
        }
        self.deselect(state);
        let Some(entry) = state.devices.get(&device) else {
            return;
        };
        let regs = &*self.registers;
        ral::write_reg!(crate::ral::spi, regs, CLKD, entry.block.clkd);
        ral::write_reg!(crate::ral::spi, regs, CTL0, entry.block.ctl0);
        if let ChipSelect::Gpio(pin) = entry.block.chip_select {
            state.hardware.set_gpio(pin, entry.block.mode.cs_high);
        }
        state.selected = Some(device);
    }

    fn deselect(&self, state: &mut State<H, C, N>) {
        let Some(device) = state.selected.take() else {
            return;
        };
        let Some(entry) = state.devices.get(&device) else {
            return;
        };
        match entry.block.chip_select {
            ChipSelect::Gpio(pin) => state.hardware.set_gpio(pin, !entry.block.mode.cs_high),
            ChipSelect::Native => {
                let regs = &*self.registers;
                ral::modify_reg!(crate::ral::spi, regs, CTL0, CS: CS_NONE);
            }
        }
    }

    /// Program and start the next burst of the active segment
    fn arm(&self, state: &mut State<H, C, N>) {
        let State {
            hardware,
            queue,
            devices,
            active,
            ..
        } = state;
        let (Some(message), Some(cursor)) = (queue.front(), active.as_mut()) else {
            return;
        };
        let (Some(segment), Some(entry)) = (
            message.segments.get(cursor.segment),
            devices.get(&message.device),
        ) else {
            return;
        };
        let block = &entry.block;
        let chunk = segment.len().saturating_sub(cursor.offset).min(block.data_max);
        cursor.armed = chunk;
        cursor.acks = 0;

        let register = self.config.data_register;
        let regs = &*self.registers;
        if let Some(rx) = segment.rx_bus {
            let descriptor =
                Descriptor::hardware_to_memory(register, rx + cursor.offset, chunk, block.width);
            hardware.program(Channel::Rx, &descriptor);
        }
        if let Some(tx) = segment.tx_bus {
            let descriptor =
                Descriptor::memory_to_hardware(tx + cursor.offset, register, chunk, block.width);
            hardware.program(Channel::Tx, &descriptor);
        }

        match (segment.tx_bus.is_some(), segment.rx_bus.is_some()) {
            (true, true) => ral::modify_reg!(crate::ral::spi, regs, CTL1, RTX_MODE: RTX_BOTH),
            (false, true) => {
                let blocks = chunk / block.data_width;
                ral::write_reg!(crate::ral::spi, regs, CTL4, RX_MAX_CNT: blocks, START_RX: 1);
                ral::modify_reg!(crate::ral::spi, regs, CTL1, RTX_MODE: RTX_RX);
            }
            _ => ral::modify_reg!(crate::ral::spi, regs, CTL1, RTX_MODE: RTX_TX),
        }

        if segment.rx_bus.is_some() {
            hardware.start(Channel::Rx);
        }
        if segment.tx_bus.is_some() {
            hardware.start(Channel::Tx);
        }
        // Descriptors must land before the controller requests data.
        atomic::fence(atomic::Ordering::SeqCst);
        ral::modify_reg!(crate::ral::spi, regs, CTL2, DMA_EN: 1);
    }

    /// Quiesce the controller after a burst
    fn settle(&self) {
        let regs = &*self.registers;
        // The busy flag may read stale once after a burst; only the second
        // read counts.
        let _stale = ral::read_reg!(crate::ral::spi, regs, STS2, TX_BUSY == 1);
        let busy = ral::read_reg!(crate::ral::spi, regs, STS2, TX_BUSY == 1);
        ral::modify_reg!(crate::ral::spi, regs, CTL2, DMA_EN: 0);
        ral::modify_reg!(crate::ral::spi, regs, CTL1, RTX_MODE: RTX_IDLE);
        if busy {
            log::warn!("controller busy after its burst completed; resetting FIFOs");
            ral::write_reg!(crate::ral::spi, regs, FIFO_RST, RST: 1);
            ral::write_reg!(crate::ral::spi, regs, FIFO_RST, RST: 0);
        }
    }

    /// Stop both channels and the controller
    fn halt(&self, state: &mut State<H, C, N>) {
        state.hardware.stop(Channel::Tx);
        state.hardware.stop(Channel::Rx);
        self.settle();
    }

    fn service(&self, state: &mut State<H, C, N>, channel: Channel) -> Option<Finished<C>> {
        if state.stopping {
            return None;
        }
        let Some(mut cursor) = state.active else {
            log::debug!("ignoring {:?} interrupt with nothing in flight", channel);
            return None;
        };
        if let Some(status) = state.hardware.error(channel) {
            log::error!("DMA {:?} fault: {}", channel, status);
            return self.abort(state, Error::HardwareFault(status));
        }

        let (len, duplex, segments) = {
            let message = state.queue.front()?;
            let segment = message.segments.get(cursor.segment)?;
            (segment.len(), segment.is_duplex(), message.segments.len())
        };
        if duplex {
            state.hardware.stop(channel);
            cursor.acks += 1;
            if cursor.acks < 2 {
                state.active = Some(cursor);
                return None;
            }
            cursor.acks = 0;
        }

        self.settle();
        cursor.offset += cursor.armed;
        cursor.armed = 0;
        if cursor.offset < len {
            state.active = Some(cursor);
            self.arm(state);
            return None;
        }

        let State {
            hardware, queue, ..
        } = &mut *state;
        let message = queue.front_mut()?;
        message.actual_length += cursor.offset;
        if !message.dma_mapped {
            if let Some(segment) = message.segments.get_mut(cursor.segment) {
                segment.unmap(hardware);
            }
        }

        if cursor.segment + 1 < segments {
            state.active = Some(Cursor {
                segment: cursor.segment + 1,
                ..Cursor::default()
            });
            self.arm(state);
            return None;
        }

        self.deselect(state);
        state.active = None;
        let message = state.queue.pop_front()?;
        Some((
            message.complete,
            Outcome {
                device: message.device,
                status: Ok(()),
                actual_length: message.actual_length,
            },
        ))
    }

    /// Fail the active message
    fn abort(&self, state: &mut State<H, C, N>, error: Error) -> Option<Finished<C>> {
        self.halt(state);
        self.deselect(state);
        state.active = None;
        let mut message = state.queue.pop_front()?;
        message.unmap(&mut state.hardware);
        Some((
            message.complete,
            Outcome {
                device: message.device,
                status: Err(error),
                actual_length: message.actual_length,
            },
        ))
    }
}
